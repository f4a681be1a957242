//! Types that represent the core data model: `Category`, the `Forest` built from a flat list of
//! categories, and the reorder planner.
mod category;
mod forest;
mod reorder;

pub use category::{
    validate_name, Category, CategoryId, CategoryPatch, Direction, NewCategory, Reassignment,
    DEFAULT_COLOR, DEFAULT_EDIT_COLOR, DEFAULT_ICON,
};
pub use forest::Forest;
pub use reorder::{apply_updates, move_item, plan_drag, plan_move, OrderUpdate, ReorderPlan};
