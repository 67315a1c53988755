mod cli;
mod display;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use display::TransferBar;
use ferry::transfer::{output_path, Progress};
use ferry::{Client, Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = &cli.host {
        config.server_address = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    let show_progress = !cli.no_progress;

    match cli.command {
        Commands::Serve {
            dir,
            bind,
            max_sessions,
        } => {
            if let Some(dir) = dir {
                config.server_directory = dir;
            }
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if let Some(max) = max_sessions {
                config.max_sessions = max;
            }
            config.validate()?;
            run_server(config).await?;
        }
        command => {
            config.validate()?;
            run_client(Client::new(config), command, show_progress).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server(config: Config) -> Result<()> {
    let endpoint = config.bind_endpoint();
    let server = ferry::Server::bind(config)
        .await
        .with_context(|| format!("Failed to start server on {}", endpoint))?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Ctrl+C received - initiating graceful shutdown");
        signal_token.cancel();
    });

    server.run(shutdown).await?;
    Ok(())
}

async fn run_client(client: Client, command: Commands, show_progress: bool) -> Result<()> {
    let endpoint = client.config().server_endpoint();

    match command {
        Commands::List { json } => {
            let entries = client
                .list()
                .await
                .with_context(|| format!("Listing files on {} failed", endpoint))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                display::print_listing(&entries);
            }
        }
        Commands::Info { name } => {
            let entry = client
                .info(&name)
                .await
                .with_context(|| format!("Looking up {} failed", name))?;
            display::print_info(&entry);
        }
        Commands::Get { name, output } => {
            download(&client, &name, output, show_progress).await?;
        }
        Commands::Put { path, name } => {
            upload(&client, &path, name, show_progress).await?;
        }
        Commands::Ping => {
            let rtt = client
                .ping()
                .await
                .with_context(|| format!("No answer from {}", endpoint))?;
            println!("✓ {} answered in {} ms", endpoint, rtt.as_millis());
        }
        Commands::Quit => {
            client.quit().await?;
            println!("✓ Server said goodbye");
        }
        Commands::Serve { .. } => anyhow::bail!("serve is not a client command"),
    }

    Ok(())
}

async fn download(
    client: &Client,
    name: &str,
    output: Option<PathBuf>,
    show_progress: bool,
) -> Result<()> {
    let dest = output_path(name, output);
    let progress = Arc::new(Progress::new());
    let bar = TransferBar::attach(name, progress.clone(), show_progress);
    let started = Instant::now();

    let result = client.download(name, &dest, &progress).await;
    bar.finish();
    let bytes = result.with_context(|| format!("Download of {} failed", name))?;

    println!(
        "✓ Downloaded {} → {} ({}) in {} ms",
        name,
        dest.display(),
        display::format_size(bytes),
        started.elapsed().as_millis()
    );
    Ok(())
}

async fn upload(
    client: &Client,
    path: &Path,
    name: Option<String>,
    show_progress: bool,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid file path: {}", path.display()))?,
    };
    let progress = Arc::new(Progress::new());
    let bar = TransferBar::attach(&name, progress.clone(), show_progress);
    let started = Instant::now();

    let result = client.upload(path, &name, &progress).await;
    bar.finish();
    let bytes = result.with_context(|| format!("Upload of {} failed", path.display()))?;

    println!(
        "✓ Uploaded {} as {} ({}) in {} ms",
        path.display(),
        name,
        display::format_size(bytes),
        started.elapsed().as_millis()
    );
    Ok(())
}
