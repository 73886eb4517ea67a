use std::path::PathBuf;

use clap::{Parser, Subcommand};
use podcast_agent::episodes::{import_file, EpisodeId, EpisodeStore, FsEpisodeStore};
use podcast_proto::config::Config;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Manage locally stored podcast episodes.
#[derive(Parser, Debug)]
#[command(name = "podcasts", version)]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import an audio file as a new episode.
    Add {
        file: PathBuf,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        author: String,
    },
    /// List stored episodes.
    List,
    /// Show one episode.
    Get { id: EpisodeId },
    /// Delete an episode.  Deleting an unknown id is not an error.
    Delete { id: EpisodeId },
    /// Write an episode's audio payload to a file.
    Export { id: EpisodeId, out: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = podcast_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("agent.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,podcast_agent=debug")),
        )
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;
    info!("Config loaded from: {:?}", config_path);

    let store = FsEpisodeStore::open(
        config.paths.episodes_dir.clone(),
        config.paths.episodes_quota_bytes,
    )
    .await?;

    match cli.command {
        Command::Add {
            file,
            title,
            author,
        } => {
            let id = import_file(&store, &file, &title, &author).await?;
            println!("Added episode {}", id);
        }
        Command::List => {
            let episodes = store.list().await?;
            if episodes.is_empty() {
                println!("No episodes stored.");
            }
            for ep in episodes {
                println!(
                    "{:>4}  {}  {} - {}  ({}, {} bytes)",
                    ep.id,
                    ep.created.format("%Y-%m-%d %H:%M"),
                    ep.title,
                    ep.author,
                    ep.payload.mime_type,
                    ep.payload.len()
                );
            }
        }
        Command::Get { id } => match store.get(id).await? {
            Some(ep) => {
                println!("{}", ep.now_playing_label());
                println!("  id:      {}", ep.id);
                println!("  created: {}", ep.created.to_rfc3339());
                println!("  type:    {}", ep.payload.mime_type);
                println!("  size:    {} bytes", ep.payload.len());
            }
            None => anyhow::bail!("episode {} not found", id),
        },
        Command::Delete { id } => {
            store.delete(id).await?;
            println!("Deleted episode {}", id);
        }
        Command::Export { id, out } => {
            let Some(ep) = store.get(id).await? else {
                anyhow::bail!("episode {} not found", id);
            };
            tokio::fs::write(&out, &ep.payload.data).await?;
            println!("Wrote {} bytes to {}", ep.payload.len(), out.display());
        }
    }

    Ok(())
}
