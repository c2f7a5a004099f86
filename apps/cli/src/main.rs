//! Cipherpart command-line client.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cipherpart_crypto::LocalCrypto;
use cipherpart_network::{HttpNetwork, StorageClient};
use cipherpart_protocol::FileMetadata;
use cipherpart_protocol::sizing::Layout;
use cipherpart_transfer::{Download, TransferEvent, Upload};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use config::CliConfig;

/// Encrypted, part-based object storage client.
#[derive(Parser)]
#[command(name = "cipherpart")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage node URL (overrides the config file)
    #[arg(long, global = true)]
    node: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and upload a file, printing its handle
    Upload {
        file: PathBuf,

        /// Name stored in the metadata record (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// MIME type stored in the metadata record
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
    },

    /// Download and decrypt an object into a file
    Download {
        /// 128-character hex handle
        handle: String,

        /// Output path
        out: PathBuf,
    },

    /// Print the on-disk layout of a plaintext size
    Sizes { bytes: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cipherpart=debug")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Sizes { bytes } = cli.command {
        print_layout(bytes);
        return Ok(());
    }

    let mut config = match CliConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            CliConfig::default()
        }
    };
    if let Some(node) = cli.node {
        config.node_url = node;
    }
    let (keys, generated) = config.account_keys()?;
    if generated {
        tracing::info!("generated new account seed");
        config.save()?;
    }

    let network = Arc::new(HttpNetwork::new()?);
    let crypto = Arc::new(LocalCrypto::new(keys));
    let client = StorageClient::new(config.node_url.clone(), network, crypto);
    tracing::debug!(node = %client.endpoint(), "storage client ready");

    match cli.command {
        Commands::Upload { file, name, mime } => upload(client, &config, file, name, mime).await,
        Commands::Download { handle, out } => download(client, &config, &handle, out).await,
        Commands::Sizes { .. } => Ok(()),
    }
}

fn print_layout(bytes: u64) {
    let layout = Layout::for_size(bytes);
    println!("plaintext bytes: {}", layout.size);
    println!("on-disk bytes:   {}", layout.size_on_disk);
    println!("blocks:          {}", layout.blocks);
    println!("parts:           {}", layout.parts);
}

async fn upload(
    client: StorageClient,
    config: &CliConfig,
    file: PathBuf,
    name: Option<String>,
    mime: String,
) -> anyhow::Result<()> {
    let size = tokio::fs::metadata(&file)
        .await
        .with_context(|| format!("cannot stat {}", file.display()))?
        .len();
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".into()),
    };
    let reader = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("cannot open {}", file.display()))?;

    let session = Upload::new(client, FileMetadata::new(name, size, mime), config.upload_config());
    if let Some(events) = session.take_events() {
        tokio::spawn(report(events));
    }

    let handle = tokio::select! {
        res = session.upload_reader(reader) => res?,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            anyhow::bail!("upload cancelled");
        }
    };
    println!("{handle}");
    Ok(())
}

async fn download(
    client: StorageClient,
    config: &CliConfig,
    handle: &str,
    out: PathBuf,
) -> anyhow::Result<()> {
    let session = Download::from_hex(client, handle, config.download_config())?;
    if let Some(events) = session.take_events() {
        tokio::spawn(report(events));
    }
    let writer = tokio::fs::File::create(&out)
        .await
        .with_context(|| format!("cannot create {}", out.display()))?;

    let metadata = tokio::select! {
        res = session.write_to(writer) => res?,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            anyhow::bail!("download cancelled");
        }
    };
    tracing::info!(
        name = %metadata.name,
        mime = %metadata.mime_type,
        bytes = metadata.size,
        path = %out.display(),
        "download saved"
    );
    Ok(())
}

/// Logs session events until the channel closes or a terminal event arrives.
async fn report(mut events: mpsc::Receiver<TransferEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransferEvent::Progress(p) => tracing::info!(
                parts = %format!("{}/{}", p.completed_parts, p.total_parts),
                percent = %format!("{:.1}", p.fraction() * 100.0),
                rate_kib = (p.bytes_per_second / 1024.0) as u64,
                eta_secs = p.eta().map(|d| d.as_secs()),
                "progress"
            ),
            TransferEvent::Completed { .. }
            | TransferEvent::Failed { .. }
            | TransferEvent::Cancelled { .. } => break,
        }
    }
}
