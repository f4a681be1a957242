use crate::commands::Out;
use crate::{Config, Result};
use std::path::Path;

/// Creates the home directory, its `.secrets` subdirectory and an initial `config.json`.
///
/// # Arguments
/// - `cattree_home` - The directory that will be the root of the home directory, e.g.
///   `$HOME/cattree`
/// - `base_url` - The base URL of the category store.
/// - `token_file` - An optional file holding the bearer token. It is copied to `.secrets/token`.
/// - `timeout_secs` - An optional request timeout.
///
/// # Errors
/// - Returns a `Config` error if the URL is invalid or any file operations fail.
pub async fn init(
    cattree_home: &Path,
    base_url: &str,
    token_file: Option<&Path>,
    timeout_secs: Option<u64>,
) -> Result<Out<()>> {
    let config = Config::create(cattree_home, base_url, token_file, timeout_secs).await?;
    Ok(format!(
        "Successfully created the cattree directory at {}",
        config.root().display()
    )
    .into())
}
