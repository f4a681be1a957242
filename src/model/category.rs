use crate::error::{Error, ErrorType, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::str::FromStr;

/// Color shown for a category that has none.
pub const DEFAULT_COLOR: &str = "#9ca3af";

/// Icon shown for a category that has none.
pub const DEFAULT_ICON: &str = "📦";

/// Color staged when editing starts on a category that has none.
pub const DEFAULT_EDIT_COLOR: &str = "#cccccc";

/// The identifier the remote store assigns to a category.
#[derive(
    Debug, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CategoryId(u64);

impl CategoryId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for CategoryId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for CategoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CategoryId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// A single category as held by the remote store.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub(crate) id: CategoryId,
    pub(crate) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) color: Option<String>,
    #[serde(default)]
    pub(crate) is_system: bool,
    #[serde(default)]
    pub(crate) parent_id: Option<CategoryId>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub(crate) order_index: i64,
}

impl Category {
    /// Creates a user (non-system) top-level category with `order_index` 0.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: CategoryId(id),
            name: name.into(),
            icon: None,
            color: None,
            is_system: false,
            parent_id: None,
            order_index: 0,
        }
    }

    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(CategoryId(parent_id));
        self
    }

    pub fn with_order(mut self, order_index: i64) -> Self {
        self.order_index = order_index;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn id(&self) -> CategoryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    pub fn parent_id(&self) -> Option<CategoryId> {
        self.parent_id
    }

    pub fn order_index(&self) -> i64 {
        self.order_index
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn display_color(&self) -> &str {
        self.color().unwrap_or(DEFAULT_COLOR)
    }

    pub fn display_icon(&self) -> &str {
        self.icon().unwrap_or(DEFAULT_ICON)
    }

    /// Sibling ordering: `order_index` ascending, ties broken by `id`.
    pub fn sort_key(&self) -> (i64, CategoryId) {
        (self.order_index, self.id)
    }

    /// Applies the fields present in `patch`.
    pub(crate) fn apply(&mut self, patch: &CategoryPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(color) = &patch.color {
            self.color = Some(color.clone());
        }
        if let Some(icon) = &patch.icon {
            self.icon = Some(icon.clone());
        }
        if let Some(order_index) = patch.order_index {
            self.order_index = order_index;
        }
        if let Some(parent_id) = patch.parent_id {
            self.parent_id = parent_id;
        }
    }
}

fn null_as_zero<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or_default())
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Trims `name` and rejects it if nothing is left.
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::message(
            ErrorType::Validation,
            "Category name cannot be empty or whitespace-only",
        ));
    }
    Ok(trimmed.to_string())
}

/// The body of a create request.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NewCategory {
    pub(crate) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parent_id: Option<CategoryId>,
}

impl NewCategory {
    pub fn new(name: impl Into<String>, parent_id: Option<CategoryId>) -> Self {
        Self {
            name: name.into(),
            parent_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_id(&self) -> Option<CategoryId> {
        self.parent_id
    }
}

/// A partial update. Only the fields that are `Some` are sent.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
    /// `Some(None)` moves the category to the top level.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub parent_id: Option<Option<CategoryId>>,
}

impl CategoryPatch {
    pub fn reorder(order_index: i64) -> Self {
        Self {
            order_index: Some(order_index),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// True if the patch changes any of the user-editable appearance fields.
    pub fn touches_appearance(&self) -> bool {
        self.name.is_some() || self.color.is_some() || self.icon.is_some()
    }
}

/// What happens to the transactions of a deleted category.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reassignment {
    /// Move them to the deleted category's parent, or leave them uncategorized if it has none.
    Parent,
    /// Leave them without a category.
    Uncategorized,
    /// Move them to this category.
    Category(CategoryId),
}

impl Reassignment {
    /// The explicit target sent to the store. `Parent` and `Uncategorized` are the store's default
    /// and are sent as an absent `reassign_to`.
    pub fn reassign_to(&self) -> Option<CategoryId> {
        match self {
            Reassignment::Category(id) => Some(*id),
            Reassignment::Parent | Reassignment::Uncategorized => None,
        }
    }

    /// Where the transactions of `deleted` end up under this strategy.
    pub fn destination(&self, deleted: &Category) -> Option<CategoryId> {
        match self {
            Reassignment::Parent => deleted.parent_id,
            Reassignment::Uncategorized => None,
            Reassignment::Category(id) => Some(*id),
        }
    }
}

impl Display for Reassignment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Reassignment::Parent => write!(f, "parent"),
            Reassignment::Uncategorized => write!(f, "none"),
            Reassignment::Category(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for Reassignment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "parent" => Ok(Reassignment::Parent),
            "none" => Ok(Reassignment::Uncategorized),
            other => other
                .parse::<CategoryId>()
                .map(Reassignment::Category)
                .map_err(|_| {
                    format!(
                        "Invalid reassignment '{other}', expected 'parent', 'none' or a category id"
                    )
                }),
        }
    }
}

/// The direction of a single-step move within a sibling list.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Up,
    Down,
}

serde_plain::derive_display_from_serialize!(Direction);
serde_plain::derive_fromstr_from_deserialize!(Direction);
