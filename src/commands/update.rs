//! Update command handlers: editing a category and changing its position.

use crate::api::Mode;
use crate::args::{EditArgs, MoveArgs, ReorderArgs};
use crate::commands::{log_notices, open, Out};
use crate::error::{Error, ErrorType};
use crate::model::{Category, Direction, ReorderPlan};
use crate::{Config, Result};

/// Changes the name, color and/or icon of a category. Fields that are not given keep their current
/// value, and nothing is sent if the given values match the current ones.
///
/// # Errors
/// - `Validation` if no field is given or the new name is blank.
/// - `Forbidden` if the category is a system category.
pub async fn edit(config: &Config, mode: Mode, args: EditArgs) -> Result<Out<Option<Category>>> {
    if args.name().is_none() && args.color().is_none() && args.icon().is_none() {
        return Err(Error::message(
            ErrorType::Validation,
            "Nothing to change, pass --name, --color or --icon",
        ));
    }
    let tree = open(config, mode).await?;
    let id = args.id();
    let _ = tree.start_edit(id)?;
    if let Some(name) = args.name() {
        tree.stage_name(id, name)?;
    }
    if let Some(color) = args.color() {
        tree.stage_color(id, color)?;
    }
    if let Some(icon) = args.icon() {
        tree.stage_icon(id, icon)?;
    }
    let result = tree.confirm_edit(id).await;
    log_notices(&tree);
    match result? {
        Some(updated) => Ok(Out::new(
            format!("Updated category '{}' (#{id})", updated.name()),
            Some(updated),
        )),
        None => Ok(Out::new(format!("Category #{id} is unchanged"), None)),
    }
}

/// Moves a category one step up or down among its siblings.
pub async fn move_category(
    config: &Config,
    mode: Mode,
    args: MoveArgs,
) -> Result<Out<Option<ReorderPlan>>> {
    let tree = open(config, mode).await?;
    let id = args.id();
    let direction = args.direction();
    let result = tree.move_node(id, direction).await;
    log_notices(&tree);
    Ok(match result? {
        Some(plan) => Out::new(format!("Moved category #{id} {direction}"), Some(plan)),
        None => Out::new(
            format!("Category #{id} is already at the {}", boundary(direction)),
            None,
        ),
    })
}

/// Moves the category at position `from` to position `to` among the children of `--parent`, or
/// among the top-level categories.
pub async fn reorder(
    config: &Config,
    mode: Mode,
    args: ReorderArgs,
) -> Result<Out<Option<ReorderPlan>>> {
    let tree = open(config, mode).await?;
    let result = tree.drag(args.parent(), args.from(), args.to()).await;
    log_notices(&tree);
    Ok(match result? {
        Some(plan) => {
            let count = plan.updates.len();
            let message = format!(
                "Reordered {} categor{}",
                count,
                if count == 1 { "y" } else { "ies" }
            );
            Out::new(message, Some(plan))
        }
        None => Out::new("Nothing to reorder", None),
    })
}

fn boundary(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "top",
        Direction::Down => "bottom",
    }
}
