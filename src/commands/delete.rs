//! Delete command handlers.

use crate::api::Mode;
use crate::args::DeleteArgs;
use crate::commands::{log_notices, open, Out};
use crate::model::Reassignment;
use crate::{Config, Result};

/// Deletes a category. The store moves its transactions according to `--reassign`.
///
/// A category's children are not deleted with it.
///
/// # Errors
/// - `Forbidden` for a system category.
/// - `Validation` if the reassignment is not allowed for this category, e.g. "none" for a
///   subcategory or one of the category's own children.
pub async fn delete(config: &Config, mode: Mode, args: DeleteArgs) -> Result<Out<Reassignment>> {
    let tree = open(config, mode).await?;
    let id = args.id();
    let deleted = tree.forest().get(id).cloned();
    let result = tree.delete(id, args.reassign()).await;
    log_notices(&tree);
    result?;
    let Some(deleted) = deleted else {
        return Ok(Out::new(format!("Deleted category #{id}"), args.reassign()));
    };
    let destination = match args.reassign().destination(&deleted) {
        Some(target) => format!("category #{target}"),
        None => "no category".to_string(),
    };
    Ok(Out::new(
        format!(
            "Deleted category '{}' (#{id}), transactions moved to {destination}",
            deleted.name()
        ),
        args.reassign(),
    ))
}
