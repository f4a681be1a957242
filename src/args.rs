//! These structs provide the CLI interface for the cattree CLI.

use crate::model::{CategoryId, Direction, Reassignment};
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// cattree: A command-line tool for managing a two-level tree of spending categories.
///
/// The categories live in a remote store that is reached over its REST API. Every command fetches
/// the current list, applies one change, and writes it back.
///
/// Set CATTREE_IN_TEST_MODE to any non-empty value to use a local, file-backed store instead of
/// the REST API.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the home directory and initialize the configuration file.
    ///
    /// This is the first command you should run. Pass the base URL of the category store as
    /// --base-url and, if the store requires it, a file holding your bearer token as --token-file.
    Init(InitArgs),
    /// Print the category tree.
    List(ListArgs),
    /// Add a category, or a subcategory with --parent.
    Add(AddArgs),
    /// Rename, recolor or change the icon of a category.
    Edit(EditArgs),
    /// Move a category one step up or down among its siblings.
    Move(MoveArgs),
    /// Move the category at one position to another position among its siblings.
    Reorder(ReorderArgs),
    /// Delete a category and reassign its transactions.
    Delete(DeleteArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where cattree configuration is held. Defaults to ~/cattree
    #[arg(long, env = "CATTREE_HOME", default_value_t = default_cattree_home())]
    cattree_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, cattree_home: PathBuf) -> Self {
        Self {
            log_level,
            cattree_home: cattree_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn cattree_home(&self) -> &DisplayPath {
        &self.cattree_home
    }
}

/// Args for the `cattree init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The base URL of the category store, e.g. https://example.com/api
    #[arg(long)]
    base_url: String,

    /// A file holding the bearer token. It is copied into the secrets directory.
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// The request timeout in seconds. Defaults to 30.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl InitArgs {
    pub fn new(
        base_url: impl Into<String>,
        token_file: Option<PathBuf>,
        timeout_secs: Option<u64>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token_file,
            timeout_secs,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token_file(&self) -> Option<&Path> {
        self.token_file.as_deref()
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }
}

/// Args for the `cattree list` command.
#[derive(Debug, Parser, Clone, Default)]
pub struct ListArgs {
    /// Show only the top-level categories.
    #[arg(long)]
    collapsed: bool,
}

impl ListArgs {
    pub fn new(collapsed: bool) -> Self {
        Self { collapsed }
    }

    pub fn collapsed(&self) -> bool {
        self.collapsed
    }
}

/// Args for the `cattree add` command.
#[derive(Debug, Parser, Clone)]
pub struct AddArgs {
    /// The name of the new category.
    name: String,

    /// Create the category as a subcategory of this top-level category.
    #[arg(long)]
    parent: Option<CategoryId>,
}

impl AddArgs {
    pub fn new(name: impl Into<String>, parent: Option<CategoryId>) -> Self {
        Self {
            name: name.into(),
            parent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<CategoryId> {
        self.parent
    }
}

/// Args for the `cattree edit` command. Only the given fields are changed.
#[derive(Debug, Parser, Clone)]
pub struct EditArgs {
    /// The category to edit.
    id: CategoryId,

    #[arg(long)]
    name: Option<String>,

    /// A color such as #ff8800.
    #[arg(long)]
    color: Option<String>,

    #[arg(long)]
    icon: Option<String>,
}

impl EditArgs {
    pub fn new(
        id: CategoryId,
        name: Option<String>,
        color: Option<String>,
        icon: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            color,
            icon,
        }
    }

    pub fn id(&self) -> CategoryId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }
}

/// Args for the `cattree move` command.
#[derive(Debug, Parser, Clone)]
pub struct MoveArgs {
    /// The category to move.
    id: CategoryId,

    /// "up" or "down"
    direction: Direction,
}

impl MoveArgs {
    pub fn new(id: CategoryId, direction: Direction) -> Self {
        Self { id, direction }
    }

    pub fn id(&self) -> CategoryId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Args for the `cattree reorder` command. Positions start at 0.
#[derive(Debug, Parser, Clone)]
pub struct ReorderArgs {
    /// Reorder the children of this category. Without it the top-level categories are reordered.
    #[arg(long)]
    parent: Option<CategoryId>,

    /// The current position of the category to move.
    from: usize,

    /// The position to move it to.
    to: usize,
}

impl ReorderArgs {
    pub fn new(parent: Option<CategoryId>, from: usize, to: usize) -> Self {
        Self { parent, from, to }
    }

    pub fn parent(&self) -> Option<CategoryId> {
        self.parent
    }

    pub fn from(&self) -> usize {
        self.from
    }

    pub fn to(&self) -> usize {
        self.to
    }
}

/// Args for the `cattree delete` command.
#[derive(Debug, Parser, Clone)]
pub struct DeleteArgs {
    /// The category to delete.
    id: CategoryId,

    /// Where its transactions go: "parent", "none" (top-level categories only), or the id of
    /// another category.
    #[arg(long)]
    reassign: Reassignment,
}

impl DeleteArgs {
    pub fn new(id: CategoryId, reassign: Reassignment) -> Self {
        Self { id, reassign }
    }

    pub fn id(&self) -> CategoryId {
        self.id
    }

    pub fn reassign(&self) -> Reassignment {
        self.reassign
    }
}

fn default_cattree_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("cattree"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --cattree-home or CATTREE_HOME instead of relying on the \
                default home directory.",
            );
            PathBuf::from("cattree")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut full = vec!["cattree", "--cattree-home", "/tmp/cattree"];
        full.extend_from_slice(args);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_parse_delete() {
        let args = parse(&["delete", "5", "--reassign", "parent"]);
        match args.command() {
            Command::Delete(delete) => {
                assert_eq!(delete.id(), CategoryId::new(5));
                assert_eq!(delete.reassign(), Reassignment::Parent);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Args::try_parse_from(["cattree", "delete", "5"]).is_err());
    }

    #[test]
    fn test_parse_move_and_reorder() {
        match parse(&["move", "3", "down"]).command() {
            Command::Move(m) => assert_eq!(m.direction(), Direction::Down),
            other => panic!("unexpected command {other:?}"),
        }
        match parse(&["reorder", "--parent", "1", "0", "2"]).command() {
            Command::Reorder(r) => {
                assert_eq!(r.parent(), Some(CategoryId::new(1)));
                assert_eq!((r.from(), r.to()), (0, 2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_common_defaults() {
        let args = parse(&["list"]);
        assert_eq!(args.common().log_level(), LevelFilter::INFO);
        assert_eq!(args.common().cattree_home().path(), Path::new("/tmp/cattree"));
    }
}
