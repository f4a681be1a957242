//! A client for a two-level tree of spending categories held by a remote store.
//!
//! `CategoryTree` keeps the local forest, applies create, edit, reorder and delete actions
//! optimistically, and reconciles with the store after each one. The store is reached through the
//! `CategoryStore` trait, with an HTTP implementation and an in-memory one.

pub mod api;
pub mod args;
pub mod commands;
mod config;
mod error;
pub mod model;
mod tree;
mod utils;


pub use api::{CategoryStore, Mode};
pub use config::Config;
pub use error::{Error, ErrorType, Result};
pub use tree::{Action, CategoryTree, Notice, NoticeLevel, RowState, StagedEdit};
