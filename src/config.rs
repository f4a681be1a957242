//! Configuration file handling for cattree.
//!
//! The configuration file is stored at `$CATTREE_HOME/config.json` and holds the base URL of the
//! category store, the request timeout, and the location of the bearer token.

use crate::error::{ErrorType, IntoResult, Res};
use crate::{utils, Result};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const APP_NAME: &str = "cattree";
const CONFIG_VERSION: u8 = 1;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const SECRETS: &str = ".secrets";
const TOKEN: &str = "token";
const CONFIG_JSON: &str = "config.json";
const TEST_STORE_JSON: &str = "test_store.json";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$CATTREE_HOME` and from there it loads `$CATTREE_HOME/config.json`. It provides
/// paths to other items that are expected in a certain location within the home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    base_url: Url,
}

impl Config {
    /// Creates the home directory, its `.secrets` subdirectory and an initial `config.json`.
    ///
    /// # Arguments
    /// - `dir` - The directory that will be the root of the home directory, e.g. `$HOME/cattree`
    /// - `base_url` - The base URL of the category store, e.g. `https://example.com/api`
    /// - `token_file` - A file holding the bearer token. It is copied to `.secrets/token`. When
    ///   absent, requests are sent without an `Authorization` header.
    /// - `timeout_secs` - The request timeout, defaults to 30 seconds.
    ///
    /// # Errors
    /// - Returns an error if `base_url` is not a valid URL or any file operation fails.
    pub async fn create(
        dir: impl Into<PathBuf>,
        base_url: &str,
        token_file: Option<&Path>,
        timeout_secs: Option<u64>,
    ) -> Result<Self> {
        Self::create_inner(dir.into(), base_url, token_file, timeout_secs)
            .await
            .pub_result(ErrorType::Config)
    }

    async fn create_inner(
        maybe_relative: PathBuf,
        base_url: &str,
        token_file: Option<&Path>,
        timeout_secs: Option<u64>,
    ) -> Res<Self> {
        let base_url = parse_base_url(base_url)?;

        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the cattree home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;
        let secrets = root.join(SECRETS);
        utils::make_dir(&secrets).await?;

        if let Some(token_file) = token_file {
            utils::copy(token_file, secrets.join(TOKEN)).await?;
        }

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile {
            base_url: base_url.to_string(),
            timeout_secs: timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ..ConfigFile::default()
        };
        config_file.save(&config_path).await?;

        Ok(Self {
            root,
            secrets,
            config_path,
            config_file,
            base_url,
        })
    }

    /// This will
    /// - validate that `cattree_home` exists and that the config file exists
    /// - load the config file
    /// - validate that the secrets directory exists
    /// - return the loaded configuration object
    pub async fn load(cattree_home: impl Into<PathBuf>) -> Result<Self> {
        Self::load_inner(cattree_home.into())
            .await
            .pub_result(ErrorType::Config)
    }

    async fn load_inner(maybe_relative: PathBuf) -> Res<Self> {
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The cattree home directory is missing, run 'cattree init' first")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;
        let base_url = parse_base_url(&config_file.base_url)?;

        let secrets = root.join(SECRETS);
        if !secrets.is_dir() {
            bail!("The secrets directory is missing '{}'", secrets.display())
        }
        Ok(Self {
            root,
            secrets,
            config_path,
            config_file,
            base_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config_file.timeout_secs)
    }

    /// Where the in-memory store used in test mode keeps its state.
    pub fn test_store_path(&self) -> PathBuf {
        self.root.join(TEST_STORE_JSON)
    }

    /// Returns the stored `token_path` if it is absolute, otherwise resolves it against the root.
    pub fn token_path(&self) -> PathBuf {
        let p = self.config_file.token_path();
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }

    /// Reads the bearer token. Returns `None` if the token file does not exist.
    pub(crate) async fn token(&self) -> Res<Option<String>> {
        let path = self.token_path();
        if !utils::exists(&path).await? {
            return Ok(None);
        }
        let token = utils::read(&path).await?.trim().to_string();
        anyhow::ensure!(!token.is_empty(), "The token file '{}' is empty", path.display());
        Ok(Some(token))
    }
}

fn parse_base_url(s: &str) -> Res<Url> {
    let url = Url::parse(s).with_context(|| format!("Invalid base URL '{s}'"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "The base URL '{s}' must use http or https"
    );
    Ok(url)
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "cattree",
///   "config_version": 1,
///   "base_url": "https://example.com/api",
///   "timeout_secs": 30,
///   "token_path": ".secrets/token"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "cattree"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// Base URL of the category store
    base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,

    /// Path to the bearer token file (optional, relative to `$CATTREE_HOME` or absolute)
    /// Defaults to $CATTREE_HOME/.secrets/token if not specified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            base_url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            token_path: None,
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile from `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or names another app.
    async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path).await?;
        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        Ok(config)
    }

    async fn save(&self, path: impl AsRef<Path>) -> Res<()> {
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(path, data)
            .await
            .context("Unable to write config file")
    }

    /// Gets the token path. If None, defaults to `.secrets/token`.
    fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN))
    }
}
