//! Insert command handlers.

use crate::api::Mode;
use crate::args::AddArgs;
use crate::commands::{log_notices, open, Out};
use crate::model::Category;
use crate::{Config, Result};

/// Adds a category. With `--parent` it becomes a subcategory of that top-level category.
///
/// # Errors
/// - `Validation` if the name is blank; nothing is sent to the store.
/// - `Forbidden` if the parent is a system category.
/// - `Rejected` if the store refuses the name, e.g. because a sibling already has it.
pub async fn add(config: &Config, mode: Mode, args: AddArgs) -> Result<Out<Category>> {
    let tree = open(config, mode).await?;
    let result = tree.create(args.name(), args.parent()).await;
    log_notices(&tree);
    let created = result?;
    let message = match created.parent_id() {
        Some(parent) => format!(
            "Added category '{}' (#{}) under #{parent}",
            created.name(),
            created.id()
        ),
        None => format!("Added category '{}' (#{})", created.name(), created.id()),
    };
    Ok(Out::new(message, created))
}
