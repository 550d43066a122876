use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use assetscribe::config::{load_config, load_config_from_env, Config};
use assetscribe::worker::{build_controller, open_sqlite_store};
use assetscribe::{Asset, WorkerError};

#[derive(Parser, Debug)]
#[command(author, version, about = "Transcribes uploaded audio and video assets", long_about = None)]
struct Cli {
    /// JSON config file; built-in defaults plus environment when omitted
    #[arg(short, long, env = "ASSETSCRIBE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll for jobs until interrupted (default)
    Run,
    /// Process the currently pending jobs once, then exit
    Once,
    /// Register an asset in the SQLite store and queue a job for it
    Enqueue {
        /// `file://` or `http(s)://` URL of the asset file
        file_url: String,
        /// Original file name; taken from the URL when omitted
        #[arg(long)]
        file_name: Option<String>,
        /// Asset kind: audio, video, text, markdown or image
        #[arg(long, default_value = "audio")]
        file_type: String,
        #[arg(long)]
        project_id: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path),
        None => load_config_from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    assetscribe::logging::init(&config.logging);
    info!("Starting assetscribe worker v{}", env!("CARGO_PKG_VERSION"));

    match run(cli.command.unwrap_or(Command::Run), &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config) -> assetscribe::Result<()> {
    let once = match command {
        Command::Enqueue {
            file_url,
            file_name,
            file_type,
            project_id,
        } => return enqueue(config, file_url, file_name, file_type, project_id),
        Command::Once => true,
        Command::Run => false,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(WorkerError::Runtime)?;

    runtime.block_on(serve(config, once))
}

async fn serve(config: &Config, once: bool) -> assetscribe::Result<()> {
    let controller = build_controller(config)?;

    if once {
        for outcome in controller.run_once().await {
            info!(?outcome, "Job done");
        }
        return Ok(());
    }

    let shutdown = controller.shutdown_flag();
    ctrlc::set_handler(move || {
        info!("Received interrupt, finishing running jobs...");
        shutdown.store(true, Ordering::Release);
    })
    .map_err(|e| WorkerError::Signal(e.to_string()))?;

    controller.run().await;
    Ok(())
}

fn enqueue(
    config: &Config,
    file_url: String,
    file_name: Option<String>,
    file_type: String,
    project_id: Option<String>,
) -> assetscribe::Result<()> {
    let store = open_sqlite_store(config)?;

    let file_name = file_name.unwrap_or_else(|| {
        file_url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|n| !n.is_empty())
            .unwrap_or("asset")
            .to_string()
    });
    let size = file_url
        .strip_prefix("file://")
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len());

    let asset = Asset {
        id: uuid::Uuid::new_v4().to_string(),
        project_id,
        mime_type: mime_guess::from_path(&file_name)
            .first()
            .map(|m| m.essence_str().to_string()),
        file_name,
        file_type,
        file_url,
        size,
        content: None,
    };
    store.insert_asset(&asset)?;
    let job = store.enqueue(&asset.id)?;

    info!(job_id = %job.id, asset_id = %asset.id, "Job queued");
    match serde_json::to_string_pretty(&job) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to print job: {}", e),
    }
    Ok(())
}
