//! `CategoryTree` holds the local copy of the forest, applies mutations optimistically, pushes them
//! to the `CategoryStore`, and re-fetches afterwards so the store remains the source of truth.

use crate::api::CategoryStore;
use crate::error::{Error, ErrorType, Result};
use crate::model::{
    apply_updates, plan_drag, plan_move, validate_name, Category, CategoryId, CategoryPatch,
    Direction, Forest, NewCategory, Reassignment, ReorderPlan, DEFAULT_EDIT_COLOR, DEFAULT_ICON,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

const CREATED: &str = "Category added";
const CREATE_FAILED: &str = "Failed to add category";
const SAVED: &str = "Saved";
const SAVE_FAILED: &str = "Failed to save changes";
const DELETED: &str = "Category deleted";
const DELETE_FAILED: &str = "Failed to delete category";
const REORDER_FAILED: &str = "Failed to reorder categories";
const LOAD_FAILED: &str = "Failed to load categories";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
}

serde_plain::derive_display_from_serialize!(NoticeLevel);

/// A user-visible notification produced by an action.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }
}

/// The values staged while a category is being edited.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct StagedEdit {
    pub name: String,
    pub color: String,
    pub icon: String,
}

impl StagedEdit {
    fn from_category(category: &Category) -> Self {
        Self {
            name: category.name().to_string(),
            color: category.color().unwrap_or(DEFAULT_EDIT_COLOR).to_string(),
            icon: category.icon().unwrap_or(DEFAULT_ICON).to_string(),
        }
    }

    /// The fields that differ from `category`.
    fn diff(&self, name: String, category: &Category) -> CategoryPatch {
        let changed =
            |staged: &str, current: &str| (staged != current).then(|| staged.to_string());
        CategoryPatch {
            name: (name != category.name()).then_some(name),
            color: changed(&self.color, category.color().unwrap_or(DEFAULT_EDIT_COLOR)),
            icon: changed(&self.icon, category.icon().unwrap_or(DEFAULT_ICON)),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    Viewing,
    Editing(StagedEdit),
}

/// The key under which an in-flight action is tracked. A second submission of the same key is
/// refused until the first completes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Action {
    Refresh,
    Create,
    Update(CategoryId),
    /// A reorder of the sibling list under the given parent.
    Reorder(Option<CategoryId>),
    Delete(CategoryId),
}

#[derive(Debug, Default)]
struct TreeState {
    forest: Forest,
    expanded: BTreeSet<CategoryId>,
    edits: BTreeMap<CategoryId, StagedEdit>,
    pending: HashSet<Action>,
    notices: Vec<Notice>,
    /// Bumped by every change to the forest that did not come from a fetch.
    local_version: u64,
    /// The last ticket handed to a fetch, and the newest ticket whose list was applied.
    fetch_ticket: u64,
    applied_ticket: u64,
}

impl TreeState {
    fn categories(&self) -> Vec<Category> {
        self.forest
            .iter()
            .chain(self.forest.orphans())
            .cloned()
            .collect()
    }

    fn replace(&mut self, categories: Vec<Category>) {
        self.forest = Forest::new(categories);
        let forest = &self.forest;
        self.edits.retain(|id, _| forest.get(*id).is_some());
        self.expanded.retain(|id| forest.get(*id).is_some());
    }

    fn replace_local(&mut self, categories: Vec<Category>) {
        self.local_version += 1;
        self.replace(categories);
    }

    /// Replaces the category with the same id, or adds it.
    fn upsert(&mut self, category: Category) {
        let mut categories = self.categories();
        match categories.iter_mut().find(|c| c.id() == category.id()) {
            Some(slot) => *slot = category,
            None => categories.push(category),
        }
        self.replace_local(categories);
    }

    fn remove(&mut self, id: CategoryId) {
        let mut categories = self.categories();
        categories.retain(|c| c.id() != id);
        self.replace_local(categories);
    }

    fn notify(&mut self, notice: Notice) {
        debug!("{}: {}", notice.level, notice.message);
        self.notices.push(notice);
    }

    /// The category `id` if it exists and may be changed by the user.
    fn mutable(&self, id: CategoryId) -> Result<Category> {
        let category = self.forest.get(id).cloned().ok_or_else(|| not_found(id))?;
        if category.is_system() {
            return Err(Error::message(
                ErrorType::Forbidden,
                format!("'{}' is a system category and cannot be changed", category.name()),
            ));
        }
        Ok(category)
    }
}

/// Clears the pending flag for its action when dropped.
struct PendingGuard {
    state: Arc<Mutex<TreeState>>,
    action: Action,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let _ = lock(&self.state).pending.remove(&self.action);
    }
}

/// The category tree as seen by one user. Cloning yields another handle to the same tree.
#[derive(Clone)]
pub struct CategoryTree {
    store: Arc<dyn CategoryStore>,
    state: Arc<Mutex<TreeState>>,
}

impl std::fmt::Debug for CategoryTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryTree")
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl CategoryTree {
    /// Creates an empty tree. Call `refresh` to load it.
    pub fn new(store: Arc<dyn CategoryStore>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(TreeState::default())),
        }
    }

    /// Creates a tree and loads it from the store.
    pub async fn load(store: Arc<dyn CategoryStore>) -> Result<Self> {
        let tree = Self::new(store);
        tree.refresh().await?;
        Ok(tree)
    }

    /// Replaces the local forest with the store's current list.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.begin(Action::Refresh)?;
        self.fetch().await
    }

    /// Lists the store and applies the result unless it is stale. A list is stale when a fetch
    /// that started later has already been applied, or when the forest changed locally while it
    /// was in flight. The mutation behind such a local change runs its own fetch afterwards.
    async fn fetch(&self) -> Result<()> {
        let (ticket, version) = {
            let mut state = self.lock();
            state.fetch_ticket += 1;
            (state.fetch_ticket, state.local_version)
        };
        let categories = match self.store.list().await {
            Ok(categories) => categories,
            Err(e) => {
                warn!("Unable to load categories: {e}");
                self.lock().notify(Notice::error(LOAD_FAILED));
                return Err(e);
            }
        };
        let mut state = self.lock();
        if ticket <= state.applied_ticket || version != state.local_version {
            debug!("Discarding a stale list of {} categories", categories.len());
            return Ok(());
        }
        debug!("Loaded {} categories", categories.len());
        state.applied_ticket = ticket;
        state.replace(categories);
        Ok(())
    }

    /// A snapshot of the forest.
    pub fn forest(&self) -> Forest {
        self.lock().forest.clone()
    }

    pub fn render(&self) -> String {
        let state = self.lock();
        state.forest.render(&state.expanded)
    }

    /// Flips the expanded state of `id` and returns the new state.
    pub fn toggle_expand(&self, id: CategoryId) -> bool {
        let mut state = self.lock();
        if state.expanded.remove(&id) {
            false
        } else {
            state.expanded.insert(id)
        }
    }

    pub fn expand_all(&self) {
        let mut state = self.lock();
        let ids: Vec<CategoryId> = state.forest.top_level().iter().map(Category::id).collect();
        state.expanded.extend(ids);
    }

    pub fn is_expanded(&self, id: CategoryId) -> bool {
        self.lock().expanded.contains(&id)
    }

    pub fn expanded(&self) -> BTreeSet<CategoryId> {
        self.lock().expanded.clone()
    }

    /// False for system categories and unknown ids.
    pub fn can_mutate(&self, id: CategoryId) -> bool {
        self.lock().mutable(id).is_ok()
    }

    pub fn can_move(&self, id: CategoryId, direction: Direction) -> bool {
        self.lock().forest.can_move(id, direction)
    }

    /// Subcategories can only be added under non-system top-level categories.
    pub fn can_add_child(&self, id: CategoryId) -> bool {
        self.lock()
            .mutable(id)
            .map(|c| c.is_top_level())
            .unwrap_or(false)
    }

    pub fn row_state(&self, id: CategoryId) -> RowState {
        match self.lock().edits.get(&id) {
            Some(edit) => RowState::Editing(edit.clone()),
            None => RowState::Viewing,
        }
    }

    pub fn is_pending(&self, action: Action) -> bool {
        self.lock().pending.contains(&action)
    }

    /// Drains the notices produced so far.
    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.lock().notices)
    }

    /// Creates a category named `name` (trimmed) under `parent_id`, or at the top level.
    ///
    /// # Errors
    /// - `Validation` if the name is empty after trimming, or the parent is a subcategory. No call
    ///   is made to the store.
    /// - `Forbidden` if the parent is a system category.
    /// - The store's error if the create fails.
    pub async fn create(&self, name: &str, parent_id: Option<CategoryId>) -> Result<Category> {
        let name = validate_name(name)?;
        if let Some(parent_id) = parent_id {
            let parent = self.lock().mutable(parent_id)?;
            if !parent.is_top_level() {
                return Err(Error::message(
                    ErrorType::Validation,
                    format!("'{}' is a subcategory and cannot have children", parent.name()),
                ));
            }
        }

        let guard = self.begin(Action::Create)?;
        let result = self
            .store
            .create(&NewCategory::new(name, parent_id))
            .await;
        drop(guard);

        let created = match result {
            Ok(created) => created,
            Err(e) => {
                warn!("Unable to create category: {e}");
                self.lock().notify(Notice::error(CREATE_FAILED));
                return Err(e);
            }
        };
        info!("Created category {} '{}'", created.id(), created.name());
        {
            let mut state = self.lock();
            state.upsert(created.clone());
            if let Some(parent_id) = parent_id {
                state.expanded.insert(parent_id);
            }
            state.notify(Notice::success(CREATED));
        }
        self.reconcile().await;
        Ok(created)
    }

    /// Enters editing mode for `id`, staging its current values.
    pub fn start_edit(&self, id: CategoryId) -> Result<StagedEdit> {
        let mut state = self.lock();
        let category = state.mutable(id)?;
        let edit = StagedEdit::from_category(&category);
        state.edits.insert(id, edit.clone());
        Ok(edit)
    }

    pub fn stage_name(&self, id: CategoryId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.with_edit(id, |edit| edit.name = name)
    }

    pub fn stage_color(&self, id: CategoryId, color: impl Into<String>) -> Result<()> {
        let color = color.into();
        self.with_edit(id, |edit| edit.color = color)
    }

    pub fn stage_icon(&self, id: CategoryId, icon: impl Into<String>) -> Result<()> {
        let icon = icon.into();
        self.with_edit(id, |edit| edit.icon = icon)
    }

    /// Leaves editing mode without saving. Returns false if `id` was not being edited.
    pub fn cancel_edit(&self, id: CategoryId) -> bool {
        self.lock().edits.remove(&id).is_some()
    }

    /// Sends the staged changes for `id`. Only fields that differ from the current record are sent;
    /// when nothing differs no call is made and `None` is returned.
    ///
    /// On failure the staged edit is kept so that it can be retried.
    pub async fn confirm_edit(&self, id: CategoryId) -> Result<Option<Category>> {
        let (category, staged) = {
            let state = self.lock();
            let category = state.mutable(id)?;
            let staged = state.edits.get(&id).cloned().ok_or_else(|| {
                Error::message(
                    ErrorType::Validation,
                    format!("Category {id} is not being edited"),
                )
            })?;
            (category, staged)
        };
        let name = validate_name(&staged.name)?;
        let patch = staged.diff(name, &category);
        if patch.is_empty() {
            debug!("Nothing changed for category {id}");
            self.lock().edits.remove(&id);
            return Ok(None);
        }

        let guard = self.begin(Action::Update(id))?;
        let result = self.store.update(id, &patch).await;
        drop(guard);

        let updated = match result {
            Ok(updated) => updated,
            Err(e) => {
                warn!("Unable to update category {id}: {e}");
                self.lock().notify(Notice::error(SAVE_FAILED));
                return Err(e);
            }
        };
        {
            let mut state = self.lock();
            state.edits.remove(&id);
            state.upsert(updated.clone());
            state.notify(Notice::success(SAVED));
        }
        self.reconcile().await;
        Ok(Some(updated))
    }

    /// Moves `id` one step up or down among its siblings. Returns `None`, without calling the
    /// store, when it is already first (up) or last (down).
    pub async fn move_node(
        &self,
        id: CategoryId,
        direction: Direction,
    ) -> Result<Option<ReorderPlan>> {
        let plan = plan_move(&self.lock().forest, id, direction)?;
        match plan {
            Some(plan) => self.reorder(plan).await.map(Some),
            None => {
                debug!("Category {id} cannot move {direction}");
                Ok(None)
            }
        }
    }

    /// Moves the sibling at position `from` under `parent_id` to position `to`, rewriting the
    /// `order_index` of every sibling. Returns `None` when `from == to`.
    pub async fn drag(
        &self,
        parent_id: Option<CategoryId>,
        from: usize,
        to: usize,
    ) -> Result<Option<ReorderPlan>> {
        let siblings = {
            let state = self.lock();
            if let Some(parent_id) = parent_id {
                let parent = state.forest.get(parent_id).ok_or_else(|| not_found(parent_id))?;
                if !parent.is_top_level() {
                    return Err(not_found(parent_id));
                }
            }
            state.forest.siblings(parent_id).to_vec()
        };
        match plan_drag(&siblings, parent_id, from, to)? {
            Some(plan) => self.reorder(plan).await.map(Some),
            None => Ok(None),
        }
    }

    /// Applies `plan` locally, then sends all of its writes at once. Any failure yields a single
    /// error notice and a `PartialBatch` error; the local order is not rolled back and the store is
    /// re-fetched either way.
    async fn reorder(&self, plan: ReorderPlan) -> Result<ReorderPlan> {
        let guard = self.begin(Action::Reorder(plan.parent_id))?;
        {
            let mut state = self.lock();
            let mut categories = state.categories();
            apply_updates(&mut categories, &plan.updates);
            state.replace_local(categories);
        }

        let patches: Vec<(CategoryId, CategoryPatch)> = plan
            .updates
            .iter()
            .map(|u| (u.id, CategoryPatch::reorder(u.order_index)))
            .collect();
        let results = join_all(
            patches
                .iter()
                .map(|(id, patch)| self.store.update(*id, patch)),
        )
        .await;
        drop(guard);

        let failures: Vec<String> = patches
            .iter()
            .zip(results)
            .filter_map(|((id, _), result)| result.err().map(|e| format!("{id}: {e}")))
            .collect();
        if failures.is_empty() {
            debug!("Reordered {} categories", plan.updates.len());
            self.reconcile().await;
            return Ok(plan);
        }

        warn!(
            "{} of {} reorder writes failed",
            failures.len(),
            plan.updates.len()
        );
        self.lock().notify(Notice::error(REORDER_FAILED));
        self.reconcile().await;
        Err(Error::message(
            ErrorType::PartialBatch,
            format!(
                "{} of {} reorder writes failed: {}",
                failures.len(),
                plan.updates.len(),
                failures.join("; ")
            ),
        ))
    }

    /// The reassignment choices that are valid when deleting `id`.
    pub fn reassignment_options(&self, id: CategoryId) -> Result<Vec<Reassignment>> {
        let state = self.lock();
        let category = state.mutable(id)?;
        let mut options = vec![Reassignment::Parent];
        if category.is_top_level() {
            options.push(Reassignment::Uncategorized);
        }
        options.extend(
            state
                .forest
                .iter()
                .filter(|c| c.id() != id && c.parent_id() != Some(id))
                .map(|c| Reassignment::Category(c.id())),
        );
        Ok(options)
    }

    /// Deletes `id`, telling the store what to do with its transactions.
    ///
    /// # Errors
    /// - `Forbidden` for a system category.
    /// - `Validation` if `reassignment` is not one of `reassignment_options(id)`.
    /// - The store's error if the delete fails. Nothing changes locally in that case.
    pub async fn delete(&self, id: CategoryId, reassignment: Reassignment) -> Result<()> {
        if !self.reassignment_options(id)?.contains(&reassignment) {
            return Err(Error::message(
                ErrorType::Validation,
                format!("Cannot reassign the transactions of category {id} to {reassignment}"),
            ));
        }

        let guard = self.begin(Action::Delete(id))?;
        let result = self.store.delete(id, reassignment.reassign_to()).await;
        drop(guard);

        if let Err(e) = result {
            warn!("Unable to delete category {id}: {e}");
            self.lock().notify(Notice::error(DELETE_FAILED));
            return Err(e);
        }
        info!("Deleted category {id}, transactions reassigned to {reassignment}");
        {
            let mut state = self.lock();
            state.remove(id);
            state.notify(Notice::success(DELETED));
        }
        self.reconcile().await;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, TreeState> {
        lock(&self.state)
    }

    fn begin(&self, action: Action) -> Result<PendingGuard> {
        let mut state = self.lock();
        if !state.pending.insert(action) {
            return Err(Error::message(
                ErrorType::Busy,
                format!("{action:?} is already in progress"),
            ));
        }
        Ok(PendingGuard {
            state: self.state.clone(),
            action,
        })
    }

    fn with_edit(&self, id: CategoryId, f: impl FnOnce(&mut StagedEdit)) -> Result<()> {
        let mut state = self.lock();
        let edit = state.edits.get_mut(&id).ok_or_else(|| {
            Error::message(
                ErrorType::Validation,
                format!("Category {id} is not being edited"),
            )
        })?;
        f(edit);
        Ok(())
    }

    /// Re-fetches after a mutation. This bypasses the `Refresh` pending flag so that a refresh
    /// already in flight cannot swallow it. A failure is already reported as a notice.
    async fn reconcile(&self) {
        if let Err(e) = self.fetch().await {
            debug!("Refresh after mutation failed: {e}");
        }
    }
}

fn not_found(id: CategoryId) -> Error {
    Error::message(ErrorType::NotFound, format!("Category {id} not found"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MemoryStore, StoreCall, StoreState};
    use crate::model::OrderUpdate;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{oneshot, Semaphore};

    fn id(n: u64) -> CategoryId {
        CategoryId::new(n)
    }

    fn ids(categories: &[Category]) -> Vec<u64> {
        categories.iter().map(|c| c.id().value()).collect()
    }

    async fn tree_with(categories: Vec<Category>) -> (Arc<MemoryStore>, CategoryTree) {
        let store = Arc::new(MemoryStore::new(StoreState {
            categories,
            ..Default::default()
        }));
        let tree = CategoryTree::load(store.clone()).await.unwrap();
        store.clear_calls();
        (store, tree)
    }

    async fn seeded() -> (Arc<MemoryStore>, CategoryTree) {
        let store = Arc::new(MemoryStore::seeded());
        let tree = CategoryTree::load(store.clone()).await.unwrap();
        store.clear_calls();
        (store, tree)
    }

    fn abc() -> Vec<Category> {
        vec![
            Category::new(1, "A").with_order(0),
            Category::new(2, "B").with_order(1),
            Category::new(3, "C").with_order(2),
        ]
    }

    #[tokio::test]
    async fn test_load_builds_forest() {
        let (_, tree) = tree_with(vec![
            Category::new(1, "Food"),
            Category::new(2, "Snacks").with_parent(1),
        ])
        .await;
        let forest = tree.forest();
        assert_eq!(ids(forest.top_level()), vec![1]);
        assert_eq!(ids(forest.children(id(1))), vec![2]);
    }

    #[tokio::test]
    async fn test_move_up_swaps_two_order_indexes() {
        let (store, tree) = tree_with(abc()).await;
        let plan = tree.move_node(id(2), Direction::Up).await.unwrap().unwrap();
        assert_eq!(
            plan.updates,
            vec![OrderUpdate::new(id(2), 0), OrderUpdate::new(id(1), 1)]
        );
        assert_eq!(ids(tree.forest().top_level()), vec![2, 1, 3]);
        assert_eq!(
            store.writes(),
            vec![
                StoreCall::Update(id(2), CategoryPatch::reorder(0)),
                StoreCall::Update(id(1), CategoryPatch::reorder(1)),
            ]
        );
        assert_eq!(store.calls().last(), Some(&StoreCall::List));
        assert!(tree.take_notices().is_empty());
    }

    #[tokio::test]
    async fn test_move_at_boundary_is_noop() {
        let (store, tree) = tree_with(abc()).await;
        assert_eq!(tree.move_node(id(1), Direction::Up).await.unwrap(), None);
        assert_eq!(tree.move_node(id(3), Direction::Down).await.unwrap(), None);
        assert!(!tree.can_move(id(1), Direction::Up));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_move_unknown_is_not_found() {
        let (_, tree) = tree_with(abc()).await;
        let err = tree.move_node(id(42), Direction::Up).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::NotFound);
    }

    #[tokio::test]
    async fn test_drag_rewrites_every_sibling() {
        let mut categories = abc();
        categories.push(Category::new(4, "D").with_order(3));
        let (store, tree) = tree_with(categories).await;

        let plan = tree.drag(None, 0, 2).await.unwrap().unwrap();
        assert_eq!(plan.order, vec![id(2), id(3), id(1), id(4)]);
        assert_eq!(ids(tree.forest().top_level()), vec![2, 3, 1, 4]);
        let writes = store.writes();
        assert_eq!(writes.len(), 4);
        for (position, n) in [2u64, 3, 1, 4].into_iter().enumerate() {
            assert!(writes.contains(&StoreCall::Update(
                id(n),
                CategoryPatch::reorder(position as i64)
            )));
        }
    }

    #[tokio::test]
    async fn test_drag_children_and_bad_input() {
        let (store, tree) = seeded().await;
        let plan = tree.drag(Some(id(1)), 1, 0).await.unwrap().unwrap();
        assert_eq!(plan.order, vec![id(3), id(2)]);
        assert_eq!(ids(tree.forest().children(id(1))), vec![3, 2]);

        store.clear_calls();
        assert_eq!(tree.drag(Some(id(1)), 1, 1).await.unwrap(), None);
        let err = tree.drag(Some(id(1)), 0, 5).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
        let err = tree.drag(Some(id(2)), 0, 0).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::NotFound);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_partial_reorder_failure() {
        let (store, tree) = tree_with(abc()).await;
        store.fail_on(id(3));

        let err = tree.drag(None, 2, 0).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::PartialBatch);
        assert!(err.to_string().contains("1 of 3"));

        // the other writes still went through
        let state = store.state();
        let order = |n: u64| {
            state
                .categories
                .iter()
                .find(|c| c.id() == id(n))
                .map(Category::order_index)
        };
        assert_eq!(order(1), Some(1));
        assert_eq!(order(2), Some(2));

        let notices = tree.take_notices();
        assert_eq!(notices, vec![Notice::error(REORDER_FAILED)]);
        assert!(notices[0].is_error());
        assert_eq!(store.calls().last(), Some(&StoreCall::List));
        assert!(!tree.is_pending(Action::Reorder(None)));
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name_without_calls() {
        let (store, tree) = seeded().await;
        let err = tree.create("  ", None).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
        assert!(store.calls().is_empty());
        assert!(tree.take_notices().is_empty());
    }

    #[tokio::test]
    async fn test_create_subcategory_expands_parent() {
        let (store, tree) = seeded().await;
        let created = tree.create("  Garden ", Some(id(6))).await.unwrap();
        assert_eq!(created.name(), "Garden");
        assert_eq!(
            store.writes(),
            vec![StoreCall::Create(NewCategory::new("Garden", Some(id(6))))]
        );
        assert!(tree.is_expanded(id(6)));
        assert_eq!(ids(tree.forest().children(id(6))), vec![7, created.id().value()]);
        let notices = tree.take_notices();
        assert_eq!(notices, vec![Notice::success(CREATED)]);
        assert!(!notices[0].is_error());
    }

    #[tokio::test]
    async fn test_create_parent_rules() {
        let (store, tree) = seeded().await;
        assert!(tree.can_add_child(id(6)));
        assert!(!tree.can_add_child(id(1)));
        assert!(!tree.can_add_child(id(7)));

        let err = tree.create("Deep", Some(id(7))).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
        let err = tree.create("Fast food", Some(id(1))).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Forbidden);
        let err = tree.create("Lost", Some(id(99))).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::NotFound);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejected_by_store() {
        let (_, tree) = seeded().await;
        let err = tree.create("home", None).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Rejected);
        assert_eq!(tree.take_notices(), vec![Notice::error(CREATE_FAILED)]);
        assert!(!tree.is_pending(Action::Create));
    }

    #[tokio::test]
    async fn test_edit_sends_only_changed_fields() {
        let (store, tree) = seeded().await;
        let staged = tree.start_edit(id(7)).unwrap();
        assert_eq!(
            staged,
            StagedEdit {
                name: "Utilities".to_string(),
                color: DEFAULT_EDIT_COLOR.to_string(),
                icon: DEFAULT_ICON.to_string(),
            }
        );
        tree.stage_name(id(7), " Bills ").unwrap();
        assert!(matches!(tree.row_state(id(7)), RowState::Editing(_)));

        let updated = tree.confirm_edit(id(7)).await.unwrap().unwrap();
        assert_eq!(updated.name(), "Bills");
        assert_eq!(updated.color(), None);
        assert_eq!(
            store.writes(),
            vec![StoreCall::Update(
                id(7),
                CategoryPatch {
                    name: Some("Bills".to_string()),
                    ..Default::default()
                }
            )]
        );
        assert_eq!(tree.row_state(id(7)), RowState::Viewing);
        assert_eq!(tree.take_notices(), vec![Notice::success(SAVED)]);
    }

    #[tokio::test]
    async fn test_edit_without_changes_makes_no_call() {
        let (store, tree) = seeded().await;
        tree.start_edit(id(6)).unwrap();
        assert_eq!(tree.confirm_edit(id(6)).await.unwrap(), None);
        assert!(store.calls().is_empty());
        assert_eq!(tree.row_state(id(6)), RowState::Viewing);
    }

    #[tokio::test]
    async fn test_edit_blank_name_and_cancel() {
        let (store, tree) = seeded().await;
        tree.start_edit(id(6)).unwrap();
        tree.stage_name(id(6), "   ").unwrap();
        let err = tree.confirm_edit(id(6)).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
        assert!(matches!(tree.row_state(id(6)), RowState::Editing(_)));

        assert!(tree.cancel_edit(id(6)));
        assert!(!tree.cancel_edit(id(6)));
        assert!(tree.stage_color(id(6), "#000000").is_err());
        assert!(store.calls().is_empty());
        assert_eq!(tree.forest().get(id(6)).unwrap().name(), "Home");
    }

    #[tokio::test]
    async fn test_system_categories_cannot_be_edited_or_deleted() {
        let (store, tree) = seeded().await;
        assert!(!tree.can_mutate(id(1)));
        assert!(tree.can_mutate(id(2)));
        let err = tree.start_edit(id(1)).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Forbidden);
        let err = tree.delete(id(4), Reassignment::Parent).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Forbidden);
        assert!(store.calls().is_empty());

        // system categories can still be reordered
        assert!(tree.move_node(id(1), Direction::Down).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_multiple_simultaneous_edits() {
        let (store, tree) = seeded().await;
        tree.start_edit(id(2)).unwrap();
        tree.start_edit(id(6)).unwrap();
        tree.stage_icon(id(2), "🥕").unwrap();
        tree.stage_color(id(6), "#00ff00").unwrap();

        tree.confirm_edit(id(6)).await.unwrap();
        assert!(matches!(tree.row_state(id(2)), RowState::Editing(_)));
        tree.confirm_edit(id(2)).await.unwrap();

        let state = store.state();
        let get = |n: u64| state.categories.iter().find(|c| c.id() == id(n)).unwrap();
        assert_eq!(get(6).color(), Some("#00ff00"));
        assert_eq!(get(2).icon(), Some("🥕"));
    }

    #[tokio::test]
    async fn test_failed_edit_keeps_staged_values() {
        let (store, tree) = seeded().await;
        store.fail_on(id(6));
        tree.start_edit(id(6)).unwrap();
        tree.stage_name(id(6), "House").unwrap();
        let err = tree.confirm_edit(id(6)).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Rejected);
        assert_eq!(tree.take_notices(), vec![Notice::error(SAVE_FAILED)]);
        match tree.row_state(id(6)) {
            RowState::Editing(edit) => assert_eq!(edit.name, "House"),
            RowState::Viewing => panic!("edit was discarded"),
        }
        assert_eq!(tree.forest().get(id(6)).unwrap().name(), "Home");
    }

    #[tokio::test]
    async fn test_delete_subcategory_defaults_to_parent() {
        let store = Arc::new(MemoryStore::new(StoreState {
            categories: vec![
                Category::new(1, "Food"),
                Category::new(5, "Snacks").with_parent(1),
            ],
            assignments: BTreeMap::from([(10, Some(id(5)))]),
        }));
        let tree = CategoryTree::load(store.clone()).await.unwrap();
        store.clear_calls();

        tree.delete(id(5), Reassignment::Parent).await.unwrap();
        assert_eq!(store.writes(), vec![StoreCall::Delete(id(5), None)]);
        assert_eq!(store.state().assignments[&10], Some(id(1)));
        assert!(tree.forest().get(id(5)).is_none());
        assert_eq!(tree.take_notices(), vec![Notice::success(DELETED)]);
    }

    #[tokio::test]
    async fn test_reassignment_options() {
        let (_, tree) = seeded().await;
        let options = tree.reassignment_options(id(6)).unwrap();
        assert_eq!(&options[..2], &[Reassignment::Parent, Reassignment::Uncategorized]);
        assert!(!options.contains(&Reassignment::Category(id(6))));
        assert!(!options.contains(&Reassignment::Category(id(7))));
        assert!(options.contains(&Reassignment::Category(id(2))));

        let options = tree.reassignment_options(id(2)).unwrap();
        assert!(!options.contains(&Reassignment::Uncategorized));
        assert!(options.contains(&Reassignment::Category(id(1))));
    }

    #[tokio::test]
    async fn test_delete_validates_reassignment() {
        let (store, tree) = seeded().await;
        let err = tree
            .delete(id(2), Reassignment::Uncategorized)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
        let err = tree
            .delete(id(6), Reassignment::Category(id(7)))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
        assert!(store.calls().is_empty());

        tree.delete(id(7), Reassignment::Category(id(5))).await.unwrap();
        assert_eq!(store.writes(), vec![StoreCall::Delete(id(7), Some(id(5)))]);
    }

    #[tokio::test]
    async fn test_failed_delete_changes_nothing() {
        let (store, tree) = seeded().await;
        store.set_offline(true);
        let err = tree.delete(id(6), Reassignment::Parent).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Transport);
        assert!(tree.forest().get(id(6)).is_some());
        assert_eq!(tree.take_notices(), vec![Notice::error(DELETE_FAILED)]);

        store.set_offline(false);
        tree.delete(id(6), Reassignment::Parent).await.unwrap();
        assert!(tree.forest().get(id(6)).is_none());
    }

    #[tokio::test]
    async fn test_expand_state() {
        let (_, tree) = seeded().await;
        assert!(!tree.is_expanded(id(1)));
        assert!(tree.toggle_expand(id(1)));
        assert!(tree.render().contains("Groceries"));
        assert!(!tree.toggle_expand(id(1)));
        assert!(!tree.render().contains("Groceries"));
        tree.expand_all();
        assert_eq!(tree.expanded().len(), 4);
    }

    /// Holds every update until the gate is opened.
    struct GatedStore {
        inner: MemoryStore,
        gate: Semaphore,
        /// Updates that have reached the gate.
        entered: AtomicUsize,
    }

    impl GatedStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                gate: Semaphore::new(0),
                entered: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl CategoryStore for GatedStore {
        async fn list(&self) -> Result<Vec<Category>> {
            self.inner.list().await
        }

        async fn create(&self, new: &NewCategory) -> Result<Category> {
            self.inner.create(new).await
        }

        async fn update(&self, id: CategoryId, patch: &CategoryPatch) -> Result<Category> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: CategoryId, reassign_to: Option<CategoryId>) -> Result<()> {
            self.inner.delete(id, reassign_to).await
        }
    }

    #[tokio::test]
    async fn test_duplicate_action_is_busy() {
        let store = Arc::new(GatedStore::new(MemoryStore::seeded()));
        let tree = CategoryTree::load(store.clone()).await.unwrap();
        tree.start_edit(id(6)).unwrap();
        tree.stage_name(id(6), "House").unwrap();

        let first = tree.confirm_edit(id(6));
        let second = async {
            tokio::task::yield_now().await;
            assert!(tree.is_pending(Action::Update(id(6))));
            let second = tree.confirm_edit(id(6)).await;
            store.gate.add_permits(10);
            second
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap().unwrap().name(), "House");
        assert_eq!(second.unwrap_err().error_type(), ErrorType::Busy);
        assert!(!tree.is_pending(Action::Update(id(6))));
        let writes = store.inner.writes();
        assert_eq!(writes.len(), 1);
    }

    #[tokio::test]
    async fn test_drag_sends_every_write_before_any_completes() {
        let mut categories = abc();
        categories.push(Category::new(4, "D").with_order(3));
        let store = Arc::new(GatedStore::new(MemoryStore::new(StoreState {
            categories,
            ..Default::default()
        })));
        let tree = CategoryTree::load(store.clone()).await.unwrap();

        let open_gate = async {
            for _ in 0..100 {
                if store.entered.load(Ordering::SeqCst) == 4 {
                    break;
                }
                tokio::task::yield_now().await;
            }
            let entered = store.entered.load(Ordering::SeqCst);
            let completed = store.inner.writes().len();
            store.gate.add_permits(4);
            (entered, completed)
        };
        let (plan, (entered, completed)) = tokio::join!(tree.drag(None, 0, 3), open_gate);

        assert_eq!(entered, 4);
        assert_eq!(completed, 0);
        assert_eq!(plan.unwrap().unwrap().updates.len(), 4);
        assert_eq!(store.inner.writes().len(), 4);
        assert_eq!(ids(tree.forest().top_level()), vec![2, 3, 4, 1]);
    }

    /// Takes its snapshot when `list` is called, then holds it until the test releases it.
    struct SlowListStore {
        inner: MemoryStore,
        holding: AtomicBool,
        held: Mutex<Vec<oneshot::Sender<()>>>,
        returned: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CategoryStore for SlowListStore {
        async fn list(&self) -> Result<Vec<Category>> {
            let snapshot = self.inner.list().await;
            if self.holding.load(Ordering::SeqCst) {
                let (tx, rx) = oneshot::channel();
                lock(&self.held).push(tx);
                let _ = rx.await;
            }
            self.returned.fetch_add(1, Ordering::SeqCst);
            snapshot
        }

        async fn create(&self, new: &NewCategory) -> Result<Category> {
            self.inner.create(new).await
        }

        async fn update(&self, id: CategoryId, patch: &CategoryPatch) -> Result<Category> {
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: CategoryId, reassign_to: Option<CategoryId>) -> Result<()> {
            self.inner.delete(id, reassign_to).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_reorders_end_in_store_order() {
        let store = Arc::new(SlowListStore {
            inner: MemoryStore::new(StoreState {
                categories: vec![
                    Category::new(1, "A").with_order(0),
                    Category::new(2, "B").with_order(1),
                    Category::new(3, "X").with_parent(1).with_order(0),
                    Category::new(4, "Y").with_parent(1).with_order(1),
                ],
                ..Default::default()
            }),
            holding: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            returned: AtomicUsize::new(0),
        });
        let tree = CategoryTree::load(store.clone()).await.unwrap();
        store.holding.store(true, Ordering::SeqCst);
        let before = store.returned.load(Ordering::SeqCst);

        // Release the later list first so the earlier snapshot lands last.
        let release = async {
            while lock(&store.held).len() < 2 {
                tokio::task::yield_now().await;
            }
            let mut held = std::mem::take(&mut *lock(&store.held));
            let _ = held.pop().unwrap().send(());
            while store.returned.load(Ordering::SeqCst) == before {
                tokio::task::yield_now().await;
            }
            let _ = held.pop().unwrap().send(());
        };
        let (top, children, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                tree.drag(None, 0, 1),
                tree.drag(Some(id(1)), 0, 1),
                release
            )
        })
        .await
        .unwrap();
        top.unwrap().unwrap();
        children.unwrap().unwrap();

        let remote = Forest::new(store.inner.state().categories);
        let local = tree.forest();
        assert_eq!(ids(remote.top_level()), vec![2, 1]);
        assert_eq!(ids(remote.children(id(1))), vec![4, 3]);
        assert_eq!(ids(local.top_level()), ids(remote.top_level()));
        assert_eq!(ids(local.children(id(1))), ids(remote.children(id(1))));
        assert_eq!(store.returned.load(Ordering::SeqCst), before + 2);
    }

    #[tokio::test]
    async fn test_user_refresh_is_busy_while_one_is_running() {
        let (store, tree) = seeded().await;
        let _guard = tree.begin(Action::Refresh).unwrap();
        let err = tree.refresh().await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Busy);
        // internal re-fetches still run
        tree.start_edit(id(6)).unwrap();
        tree.stage_name(id(6), "House").unwrap();
        tree.confirm_edit(id(6)).await.unwrap();
        assert_eq!(store.calls().last(), Some(&StoreCall::List));
        assert_eq!(tree.forest().get(id(6)).unwrap().name(), "House");
    }
}
