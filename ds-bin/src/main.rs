use clap::{CommandFactory, Parser, Subcommand};
use color_eyre::eyre;
use colored::Colorize;
use ds_common::{ErrorCategory, SnapshotError};
use ds_executor::bollard::Docker;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

mod commands;
mod completion;
mod output;
mod settings;

use commands::App;
use settings::{Overrides, Settings, SETTINGS_FILE};

#[derive(Parser)]
#[command(name = "ds", version)]
#[command(about = "Snapshot and restore a directory inside a Docker container", long_about = None)]
struct Cli {
    /// Container whose directory is snapshotted
    #[arg(long, global = true, env = "DS_CONTAINER_NAME")]
    container_name: Option<String>,

    /// Directory inside the container to snapshot and restore
    #[arg(long, global = true, env = "DS_DIRECTORY")]
    directory: Option<String>,

    /// Namespace of the helper image, volume and container
    #[arg(long, global = true, env = "DS_NAMESPACE")]
    namespace: Option<String>,

    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List snapshots and the current state of the directory
    #[command(visible_alias = "list")]
    Ls,

    /// Snapshot the directory
    Create {
        /// Snapshot name (generated if omitted)
        name: Option<String>,
    },

    /// Delete a snapshot
    #[command(visible_aliases = ["d", "rm"])]
    Delete {
        /// Snapshot name
        name: String,
    },

    /// Restore a snapshot into the directory
    Restore {
        /// Snapshot name (latest if omitted)
        name: Option<String>,
    },

    /// Delete all snapshots
    Prune {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Create ds.yaml with default settings
    Init,

    /// Print a bash completion script, load it with `source <(ds completions)`
    Completions,

    /// Print snapshot names, one per line, for shell completion
    #[command(hide = true)]
    Names,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            container_name: self.container_name.clone(),
            directory: self.directory.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

fn app(overrides: &Overrides) -> Result<App, SnapshotError> {
    let settings = Settings::load(Path::new(SETTINGS_FILE))?.with_overrides(overrides);
    debug!(?settings, "Loaded settings");

    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| SnapshotError::Engine(format!("cannot connect to Docker: {e}")))?;
    Ok(App::new(settings, Arc::new(docker)))
}

async fn run(cli: Cli) -> Result<(), SnapshotError> {
    let overrides = cli.overrides();
    match cli.command {
        Commands::Init => commands::init(Path::new(SETTINGS_FILE)),
        Commands::Completions => {
            print!("{}", completion::bash_script(&Cli::command()));
            Ok(())
        }
        Commands::Names => commands::names(&app(&overrides)?).await,
        Commands::Ls => commands::list(&app(&overrides)?).await,
        Commands::Create { name } => commands::create(&app(&overrides)?, name).await,
        Commands::Delete { name } => commands::delete(&app(&overrides)?, &name).await,
        Commands::Restore { name } => commands::restore(&app(&overrides)?, name).await,
        Commands::Prune { yes } => commands::prune(&app(&overrides)?, yes).await,
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Dropping the command future on Ctrl-C still releases the helper and
    // restarts the target container
    let outcome = tokio::select! {
        outcome = run(cli) => outcome,
        _ = tokio::signal::ctrl_c() => Err(SnapshotError::Interrupted),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(SnapshotError::Interrupted) => {
            eprintln!("{}", "Interrupted".red());
            Ok(ExitCode::from(130))
        }
        Err(e) => {
            if e.category() == ErrorCategory::Consistency {
                error!(error = %e, "Snapshot store is inconsistent");
            }
            eprintln!("{}", e.to_string().red());
            Ok(ExitCode::FAILURE)
        }
    }
}
