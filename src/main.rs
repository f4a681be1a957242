use category_tree::args::{Args, Command};
use category_tree::{commands, Config, Mode, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error ({}): {e}", e.error_type());
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().cattree_home().path();

    // When CATTREE_IN_TEST_MODE is set and non-empty, the mode will be Mode::Test and a local
    // file-backed store is used, otherwise it will be Mode::Http.
    let mode = Mode::from_env();

    let _: () = match args.command() {
        Command::Init(init_args) => commands::init(
            home,
            init_args.base_url(),
            init_args.token_file(),
            init_args.timeout_secs(),
        )
        .await?
        .print(),

        Command::List(list_args) => {
            let config = Config::load(home).await?;
            commands::list(&config, mode, list_args.collapsed())
                .await?
                .print()
        }

        Command::Add(add_args) => {
            let config = Config::load(home).await?;
            commands::add(&config, mode, add_args.clone()).await?.print()
        }

        Command::Edit(edit_args) => {
            let config = Config::load(home).await?;
            commands::edit(&config, mode, edit_args.clone())
                .await?
                .print()
        }

        Command::Move(move_args) => {
            let config = Config::load(home).await?;
            commands::move_category(&config, mode, move_args.clone())
                .await?
                .print()
        }

        Command::Reorder(reorder_args) => {
            let config = Config::load(home).await?;
            commands::reorder(&config, mode, reorder_args.clone())
                .await?
                .print()
        }

        Command::Delete(delete_args) => {
            let config = Config::load(home).await?;
            commands::delete(&config, mode, delete_args.clone())
                .await?
                .print()
        }
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => EnvFilter::from_default_env(),
        // RUST_LOG does not exist; use the given level for the library and this binary only.
        None => EnvFilter::new(format!(
            "{}={},{}={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            level,
            env!("CARGO_BIN_NAME"),
            level
        )),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
