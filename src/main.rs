use clap::{Parser, Subcommand};
use dockhand::DockhandError;
use dockhand::cli::{RunArgs, SetupArgs, run, setup};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dockhand",
    version,
    about = "Runs one Docker container from image to removal"
)]
struct Cli {
    /// Config file (default: ./dockhand.toml when present)
    #[arg(long, short = 'c', env = "DOCKHAND_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the image, run the container and remove it once it exits
    Run(RunArgs),
    /// Pull or build the image only
    Setup(SetupArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => run::run(args, config).await,
        Commands::Setup(args) => setup::install(args, config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            // mirror the container's exit code when it failed
            let code = err
                .downcast_ref::<DockhandError>()
                .and_then(DockhandError::exit_code)
                .and_then(|code| u8::try_from(code).ok())
                .filter(|code| *code != 0)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
