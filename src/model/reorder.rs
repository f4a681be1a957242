//! Computes the `order_index` writes for a reorder action. Nothing here talks to the store.

use crate::error::{Error, ErrorType, Result};
use crate::model::{Category, CategoryId, Direction, Forest};
use serde::Serialize;

/// One `order_index` write.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct OrderUpdate {
    pub id: CategoryId,
    pub order_index: i64,
}

impl OrderUpdate {
    pub fn new(id: CategoryId, order_index: i64) -> Self {
        Self { id, order_index }
    }
}

/// The outcome of planning a reorder within one sibling list.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ReorderPlan {
    /// The parent of the sibling list, `None` for the top level.
    pub parent_id: Option<CategoryId>,
    /// The sibling ids in their new display order.
    pub order: Vec<CategoryId>,
    /// The writes that produce `order`.
    pub updates: Vec<OrderUpdate>,
}

/// Plans a single-step move of `id`. Returns `None` when `id` is already at the boundary in
/// `direction`.
///
/// The move swaps `order_index` with the neighbour, which is two writes. When a swap would not
/// produce the intended order (equal `order_index` values resolved by the id tie-break) the whole
/// sibling list is reindexed instead.
pub fn plan_move(
    forest: &Forest,
    id: CategoryId,
    direction: Direction,
) -> Result<Option<ReorderPlan>> {
    let (parent_id, index) = forest.position(id).ok_or_else(|| {
        Error::message(
            ErrorType::NotFound,
            format!("Category {id} is not part of any sibling list"),
        )
    })?;
    let siblings = forest.siblings(parent_id);
    let neighbour = match direction {
        Direction::Up if index > 0 => index - 1,
        Direction::Down if index + 1 < siblings.len() => index + 1,
        _ => return Ok(None),
    };

    let mut order: Vec<CategoryId> = siblings.iter().map(|c| c.id).collect();
    order.swap(index, neighbour);

    let moved = &siblings[index];
    let other = &siblings[neighbour];
    let updates = vec![
        OrderUpdate::new(moved.id, other.order_index),
        OrderUpdate::new(other.id, moved.order_index),
    ];
    if resulting_order(siblings, &updates) == order {
        return Ok(Some(ReorderPlan {
            parent_id,
            order,
            updates,
        }));
    }
    plan_drag(siblings, parent_id, index, neighbour)
}

/// Plans a drag of the sibling at `from` to position `to`. Every sibling is rewritten with its new
/// position as `order_index`. Returns `None` when `from == to`.
pub fn plan_drag(
    siblings: &[Category],
    parent_id: Option<CategoryId>,
    from: usize,
    to: usize,
) -> Result<Option<ReorderPlan>> {
    let len = siblings.len();
    if from >= len || to >= len {
        return Err(Error::message(
            ErrorType::Validation,
            format!("Cannot move position {from} to {to} in a list of {len} categories"),
        ));
    }
    if from == to {
        return Ok(None);
    }

    let mut order: Vec<CategoryId> = siblings.iter().map(|c| c.id).collect();
    move_item(&mut order, from, to);
    let updates = order
        .iter()
        .enumerate()
        .map(|(position, id)| OrderUpdate::new(*id, position as i64))
        .collect();
    Ok(Some(ReorderPlan {
        parent_id,
        order,
        updates,
    }))
}

/// Removes the element at `from` and reinserts it at `to`.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) {
    let item = items.remove(from);
    items.insert(to, item);
}

/// Sets `order_index` on every category named in `updates`.
pub fn apply_updates(categories: &mut [Category], updates: &[OrderUpdate]) {
    for update in updates {
        if let Some(category) = categories.iter_mut().find(|c| c.id == update.id) {
            category.order_index = update.order_index;
        }
    }
}

fn resulting_order(siblings: &[Category], updates: &[OrderUpdate]) -> Vec<CategoryId> {
    let mut after = siblings.to_vec();
    apply_updates(&mut after, updates);
    after.sort_by_key(Category::sort_key);
    after.iter().map(|c| c.id).collect()
}
