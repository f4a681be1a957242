use crate::api::Mode;
use crate::commands::{log_notices, open, Out};
use crate::model::Forest;
use crate::{Config, Result};

/// Fetches the categories and renders them as a tree. Children are shown unless `collapsed`.
pub async fn list(config: &Config, mode: Mode, collapsed: bool) -> Result<Out<Forest>> {
    let tree = open(config, mode).await?;
    if !collapsed {
        tree.expand_all();
    }
    log_notices(&tree);
    Ok(Out::new(tree.render(), tree.forest()))
}
