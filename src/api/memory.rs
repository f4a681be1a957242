//! Implements the `CategoryStore` trait with in-memory data.
//!
//! This is part of the release build too: the CLI's test mode runs against it, end to end, with no
//! category server. It applies the rules a real store would: ids and default `order_index` values
//! are assigned here, duplicate sibling names and edits to system categories are refused, and
//! deleting a category reassigns its transactions.

use crate::api::CategoryStore;
use crate::error::{Error, ErrorType, IntoResult, Result};
use crate::model::{Category, CategoryId, CategoryPatch, NewCategory};
use crate::utils;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Everything the in-memory store holds.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub categories: Vec<Category>,
    /// Transaction id -> the category it is assigned to.
    #[serde(default)]
    pub assignments: BTreeMap<u64, Option<CategoryId>>,
}

/// A record of one call made against the store.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StoreCall {
    List,
    Create(NewCategory),
    Update(CategoryId, CategoryPatch),
    Delete(CategoryId, Option<CategoryId>),
}

impl StoreCall {
    /// True for calls that change the store.
    pub fn is_write(&self) -> bool {
        !matches!(self, StoreCall::List)
    }
}

/// An implementation of the `CategoryStore` trait that keeps its data in memory and, optionally,
/// saves it to a JSON file after every write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    calls: Mutex<Vec<StoreCall>>,
    failing: Mutex<HashSet<CategoryId>>,
    offline: AtomicBool,
    persist_path: Option<PathBuf>,
    /// Held while a snapshot is written, so the file always ends up with the latest state.
    persist_lock: tokio::sync::Mutex<()>,
}

impl MemoryStore {
    /// Create a new `MemoryStore` holding `state`.
    pub fn new(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Default::default()
        }
    }

    /// A store seeded with a small set of system and user categories.
    pub fn seeded() -> Self {
        Self::new(seed_state())
    }

    /// Loads the store from `path`, or seeds it if the file does not exist yet. Every write is
    /// saved back to `path`.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let exists = utils::exists(&path).await.pub_result(ErrorType::Config)?;
        let state = if exists {
            utils::deserialize(&path)
                .await
                .pub_result(ErrorType::Config)?
        } else {
            debug!("No test store at {}, seeding a new one", path.display());
            seed_state()
        };
        let store = Self {
            persist_path: Some(path),
            ..Self::new(state)
        };
        store.persist().await?;
        Ok(store)
    }

    /// A copy of the current state.
    pub fn state(&self) -> StoreState {
        self.lock_state().clone()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Only the calls that change the store.
    pub fn writes(&self) -> Vec<StoreCall> {
        self.calls().into_iter().filter(StoreCall::is_write).collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Makes every update or delete of `id` fail with a rejection.
    pub fn fail_on(&self, id: CategoryId) {
        let _ = lock(&self.failing).insert(id);
    }

    /// While offline every call fails as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }

    /// Records the call and fails it if the store is offline.
    fn begin(&self, call: StoreCall) -> Result<()> {
        trace!("{call:?}");
        lock(&self.calls).push(call);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::message(
                ErrorType::Transport,
                "The in-memory store is offline",
            ));
        }
        Ok(())
    }

    fn check_failing(&self, id: CategoryId) -> Result<()> {
        if lock(&self.failing).contains(&id) {
            return Err(rejected(format!("Writes to category {id} are failing")));
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let _persisting = self.persist_lock.lock().await;
        let json = serde_json::to_string_pretty(&*self.lock_state())
            .context("Unable to serialize the test store")
            .pub_result(ErrorType::Internal)?;
        let staging = path.with_extension("json.tmp");
        utils::write(&staging, json)
            .await
            .pub_result(ErrorType::Transport)?;
        utils::rename(&staging, path)
            .await
            .pub_result(ErrorType::Transport)
    }
}

#[async_trait::async_trait]
impl CategoryStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Category>> {
        self.begin(StoreCall::List)?;
        Ok(self.lock_state().categories.clone())
    }

    async fn create(&self, new: &NewCategory) -> Result<Category> {
        self.begin(StoreCall::Create(new.clone()))?;
        let created = self.lock_state().create(new)?;
        self.persist().await?;
        Ok(created)
    }

    async fn update(&self, id: CategoryId, patch: &CategoryPatch) -> Result<Category> {
        self.begin(StoreCall::Update(id, patch.clone()))?;
        self.check_failing(id)?;
        let updated = self.lock_state().update(id, patch)?;
        self.persist().await?;
        Ok(updated)
    }

    async fn delete(&self, id: CategoryId, reassign_to: Option<CategoryId>) -> Result<()> {
        self.begin(StoreCall::Delete(id, reassign_to))?;
        self.check_failing(id)?;
        self.lock_state().delete(id, reassign_to)?;
        self.persist().await
    }
}

impl StoreState {
    fn get(&self, id: CategoryId) -> Result<&Category> {
        self.categories
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| rejected(format!("Category {id} does not exist")))
    }

    /// A parent must exist and be top-level.
    fn check_parent(&self, parent_id: CategoryId, child: Option<CategoryId>) -> Result<()> {
        let parent = self.get(parent_id)?;
        if Some(parent_id) == child {
            return Err(rejected("A category cannot be its own parent"));
        }
        if !parent.is_top_level() {
            return Err(rejected(format!(
                "Category {parent_id} is a subcategory and cannot have children"
            )));
        }
        Ok(())
    }

    fn check_unique_name(
        &self,
        name: &str,
        parent_id: Option<CategoryId>,
        except: Option<CategoryId>,
    ) -> Result<()> {
        let taken = self.categories.iter().any(|c| {
            Some(c.id) != except && c.parent_id == parent_id && c.name.eq_ignore_ascii_case(name)
        });
        if taken {
            return Err(rejected(format!("A category named '{name}' already exists")));
        }
        Ok(())
    }

    fn next_id(&self) -> CategoryId {
        let max = self.categories.iter().map(|c| c.id.value()).max();
        CategoryId::new(max.unwrap_or(0) + 1)
    }

    fn next_order(&self, parent_id: Option<CategoryId>) -> i64 {
        self.categories
            .iter()
            .filter(|c| c.parent_id == parent_id)
            .map(|c| c.order_index + 1)
            .max()
            .unwrap_or(0)
    }

    fn create(&mut self, new: &NewCategory) -> Result<Category> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(rejected("Category name cannot be empty"));
        }
        if let Some(parent_id) = new.parent_id {
            self.check_parent(parent_id, None)?;
        }
        self.check_unique_name(name, new.parent_id, None)?;
        let category = Category {
            id: self.next_id(),
            name: name.to_string(),
            icon: None,
            color: None,
            is_system: false,
            parent_id: new.parent_id,
            order_index: self.next_order(new.parent_id),
        };
        self.categories.push(category.clone());
        Ok(category)
    }

    fn update(&mut self, id: CategoryId, patch: &CategoryPatch) -> Result<Category> {
        let current = self.get(id)?.clone();
        if current.is_system && patch.touches_appearance() {
            return Err(rejected(format!(
                "System category '{}' cannot be modified",
                current.name
            )));
        }
        if let Some(Some(parent_id)) = patch.parent_id {
            self.check_parent(parent_id, Some(id))?;
        }
        let mut updated = current;
        updated.apply(patch);
        if updated.name.trim().is_empty() {
            return Err(rejected("Category name cannot be empty"));
        }
        if patch.name.is_some() || patch.parent_id.is_some() {
            self.check_unique_name(&updated.name, updated.parent_id, Some(id))?;
        }
        if let Some(slot) = self.categories.iter_mut().find(|c| c.id == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    fn delete(&mut self, id: CategoryId, reassign_to: Option<CategoryId>) -> Result<()> {
        let deleted = self.get(id)?.clone();
        if deleted.is_system {
            return Err(rejected(format!(
                "System category '{}' cannot be deleted",
                deleted.name
            )));
        }
        if let Some(target) = reassign_to {
            if target == id {
                return Err(rejected("Cannot reassign transactions to the deleted category"));
            }
            let _ = self.get(target)?;
        }
        let destination = reassign_to.or(deleted.parent_id);
        for assigned in self.assignments.values_mut() {
            if *assigned == Some(id) {
                *assigned = destination;
            }
        }
        for category in self.categories.iter_mut() {
            if category.parent_id == Some(id) {
                category.parent_id = None;
            }
        }
        self.categories.retain(|c| c.id != id);
        Ok(())
    }
}

fn rejected(message: impl Into<String>) -> Error {
    Error::message(ErrorType::Rejected, message)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Seed data: three system categories with a few user subcategories.
fn seed_state() -> StoreState {
    let categories = vec![
        Category::new(1, "Food")
            .with_icon("🍔")
            .with_color("#f97316")
            .system(),
        Category::new(2, "Groceries").with_parent(1).with_icon("🛒"),
        Category::new(3, "Restaurants")
            .with_parent(1)
            .with_order(1)
            .with_icon("🍽"),
        Category::new(4, "Transport")
            .with_order(1)
            .with_icon("🚌")
            .with_color("#3b82f6")
            .system(),
        Category::new(5, "Fuel").with_parent(4).with_icon("⛽"),
        Category::new(6, "Home").with_order(2).with_icon("🏠"),
        Category::new(7, "Utilities").with_parent(6),
        Category::new(8, "Other").with_order(3).system(),
    ];
    let assignments = BTreeMap::from([
        (101, Some(CategoryId::new(2))),
        (102, Some(CategoryId::new(3))),
        (103, Some(CategoryId::new(5))),
        (104, Some(CategoryId::new(7))),
        (105, Some(CategoryId::new(6))),
        (106, None),
    ]);
    StoreState {
        categories,
        assignments,
    }
}
