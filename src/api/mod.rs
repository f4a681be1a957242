//! The remote category store. `CategoryStore` is the seam between the tree logic and the store
//! that owns the data; `HttpStore` talks to the REST API and `MemoryStore` keeps everything in
//! memory for tests and for running the CLI without a server.

mod http;
mod memory;

use crate::error::{ErrorType, IntoResult, Result};
use crate::model::{Category, CategoryId, CategoryPatch, NewCategory};
use crate::Config;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub use http::HttpStore;
pub use memory::{MemoryStore, StoreCall, StoreState};

/// When set to a non-empty value the CLI uses the in-memory store instead of the REST API.
pub const TEST_MODE_ENV: &str = "CATTREE_IN_TEST_MODE";

/// The operations the remote store offers. Implementations take `&self` so that independent
/// writes, such as the ones making up a reorder, can be in flight at the same time.
#[async_trait::async_trait]
pub trait CategoryStore: Send + Sync {
    /// All categories visible to the current user, system and owned.
    async fn list(&self) -> Result<Vec<Category>>;

    /// Creates a category and returns it with its assigned `id` and default `order_index`.
    async fn create(&self, new: &NewCategory) -> Result<Category>;

    /// Applies `patch` to category `id` and returns the updated category.
    async fn update(&self, id: CategoryId, patch: &CategoryPatch) -> Result<Category>;

    /// Deletes category `id`. When `reassign_to` is `None` the store moves the affected
    /// transactions to the deleted category's parent, or leaves them uncategorized if it has none.
    async fn delete(&self, id: CategoryId, reassign_to: Option<CategoryId>) -> Result<()>;
}

/// Which store implementation to use.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Use the REST API at the configured base URL.
    #[default]
    Http,
    /// Use an in-memory store persisted in the home directory.
    Test,
}

serde_plain::derive_display_from_serialize!(Mode);
serde_plain::derive_fromstr_from_deserialize!(Mode);

impl Mode {
    /// `Mode::Test` if `CATTREE_IN_TEST_MODE` is set and non-empty, otherwise `Mode::Http`.
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(value) if !value.is_empty() => Mode::Test,
            _ => Mode::Http,
        }
    }
}

/// Creates the store selected by `mode`.
pub async fn store(config: &Config, mode: Mode) -> Result<Arc<dyn CategoryStore>> {
    debug!("Using the {mode} category store");
    match mode {
        Mode::Http => {
            let token = config.token().await.pub_result(ErrorType::Config)?;
            let store = HttpStore::new(config.base_url().clone(), token, config.timeout())?;
            debug!("Category store at {}", store.base_url());
            Ok(Arc::new(store))
        }
        Mode::Test => {
            let store = MemoryStore::load(config.test_store_path()).await?;
            Ok(Arc::new(store))
        }
    }
}
