//! Builds the two-level display forest from the flat list the store returns.

use crate::model::{Category, CategoryId, Direction};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// Top-level categories, their direct children, and any orphans, each group sorted by
/// `(order_index, id)`.
///
/// Depth is fixed at two so this is a list plus a map rather than a general tree. A category whose
/// parent is missing, or whose parent is itself a child, is an orphan: it is kept so the three
/// groups always partition the input, but it does not appear under any parent.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct Forest {
    top_level: Vec<Category>,
    children: BTreeMap<CategoryId, Vec<Category>>,
    orphans: Vec<Category>,
}

impl Forest {
    pub fn new(categories: impl IntoIterator<Item = Category>) -> Self {
        let (mut top_level, nested): (Vec<Category>, Vec<Category>) = categories
            .into_iter()
            .partition(|c| c.parent_id.is_none());
        top_level.sort_by_key(Category::sort_key);

        let mut children: BTreeMap<CategoryId, Vec<Category>> =
            top_level.iter().map(|c| (c.id, Vec::new())).collect();
        let mut orphans = Vec::new();
        for category in nested {
            match category.parent_id.and_then(|p| children.get_mut(&p)) {
                Some(siblings) => siblings.push(category),
                None => orphans.push(category),
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(Category::sort_key);
        }
        orphans.sort_by_key(Category::sort_key);

        Self {
            top_level,
            children,
            orphans,
        }
    }

    pub fn top_level(&self) -> &[Category] {
        &self.top_level
    }

    /// The children of `id`, empty if it has none or is not a top-level category.
    pub fn children(&self, id: CategoryId) -> &[Category] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn orphans(&self) -> &[Category] {
        &self.orphans
    }

    /// The ordered sibling list that shares `parent_id`.
    pub fn siblings(&self, parent_id: Option<CategoryId>) -> &[Category] {
        match parent_id {
            None => &self.top_level,
            Some(parent) => self.children(parent),
        }
    }

    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.iter()
            .chain(self.orphans.iter())
            .find(|c| c.id == id)
    }

    /// The sibling list `id` belongs to and its index there. Orphans have no position.
    pub fn position(&self, id: CategoryId) -> Option<(Option<CategoryId>, usize)> {
        let category = self.get(id)?;
        let index = self
            .siblings(category.parent_id)
            .iter()
            .position(|c| c.id == id)?;
        Some((category.parent_id, index))
    }

    /// Whether a single-step move of `id` in `direction` would change anything.
    pub fn can_move(&self, id: CategoryId, direction: Direction) -> bool {
        match self.position(id) {
            None => false,
            Some((parent_id, index)) => match direction {
                Direction::Up => index > 0,
                Direction::Down => index + 1 < self.siblings(parent_id).len(),
            },
        }
    }

    pub fn is_first(&self, id: CategoryId) -> bool {
        matches!(self.position(id), Some((_, 0)))
    }

    pub fn is_last(&self, id: CategoryId) -> bool {
        match self.position(id) {
            Some((parent_id, index)) => index + 1 == self.siblings(parent_id).len(),
            None => false,
        }
    }

    /// The number of categories, orphans included.
    pub fn len(&self) -> usize {
        let children: usize = self.children.values().map(Vec::len).sum();
        self.top_level.len() + children + self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Display order: each top-level category followed by its children. Orphans are not included.
    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.top_level
            .iter()
            .flat_map(move |parent| std::iter::once(parent).chain(self.children(parent.id)))
    }

    /// Renders the forest as indented text. Children are shown only under `expanded` parents.
    pub fn render(&self, expanded: &BTreeSet<CategoryId>) -> String {
        let mut out = String::new();
        if self.top_level.is_empty() {
            out.push_str("No categories yet. Create your first category!");
            return out;
        }
        for parent in &self.top_level {
            let children = self.children(parent.id);
            let marker = match (children.is_empty(), expanded.contains(&parent.id)) {
                (true, _) => "  ",
                (false, true) => "v ",
                (false, false) => "> ",
            };
            let _ = writeln!(out, "{marker}{}", line(parent));
            if expanded.contains(&parent.id) {
                for child in children {
                    let _ = writeln!(out, "      {}", line(child));
                }
            }
        }
        if !self.orphans.is_empty() {
            let _ = writeln!(out, "({} orphaned subcategories not shown)", self.orphans.len());
        }
        out.trim_end().to_string()
    }
}

fn line(category: &Category) -> String {
    let lock = if category.is_system { " [system]" } else { "" };
    format!(
        "{} {} (#{}) {}{lock}",
        category.display_icon(),
        category.name,
        category.id,
        category.display_color()
    )
}
