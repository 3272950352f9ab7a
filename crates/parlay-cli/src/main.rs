//! # parlay-chat
//!
//! Terminal front end for one direct-message conversation. Talks to the
//! REST backend configured through `PARLAY_*` environment variables and
//! uses the default audio devices for voice messages.

mod chat;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use parlay_client::{ClientConfig, ConversationSession, LogNotifier, RestBackend};
use parlay_media::{MediaAsset, MediaUploader};
use parlay_shared::{MediaKind, UserId};

/// Direct messages from the terminal
#[derive(Parser)]
#[command(name = "parlay-chat")]
#[command(about = "Chat with one other user from the terminal", long_about = None)]
#[command(version)]
struct Cli {
    /// Your user id
    #[arg(long = "as", env = "PARLAY_USER_ID")]
    user: String,

    /// The other participant's user id
    #[arg(long = "with")]
    peer: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Open the conversation interactively (default)
    Chat,
    /// Print the conversation and exit
    History {
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send one text message and exit
    Say {
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Upload a WAV or image file and send it
    Attach {
        path: PathBuf,

        /// Text shown with the attachment
        #[arg(short, long)]
        caption: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,parlay_client=info,parlay_media=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::from_env();
    info!(
        api_url = %config.api_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Loaded configuration"
    );
    if config.api_key.is_empty() {
        anyhow::bail!("PARLAY_API_KEY is not set");
    }

    let backend = Arc::new(RestBackend::new(&config)?);
    let session = ConversationSession::new(
        UserId::new(cli.user),
        UserId::new(cli.peer),
        backend.clone(),
        Arc::new(LogNotifier),
        &config.sync_config(),
        config.request_timeout,
    );

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat::run(session, backend, &config).await?,
        Command::History { json } => {
            session.poll_once().await?;
            render::print_view(&session.view(), session.conversation().local_user(), json)?;
        }
        Command::Say { text } => {
            let key = session.send_text(text.join(" ")).await?;
            println!("sent {key}");
        }
        Command::Attach { path, caption } => {
            let uploader = MediaUploader::new(backend, config.upload_config());
            let mut asset = MediaAsset::from_file(kind_for_path(&path), path);
            let key = session.send_attachment(&uploader, &mut asset, caption).await?;
            if let Some(url) = asset.remote_url() {
                println!("uploaded {url}");
            }
            println!("sent {key}");
        }
    }

    Ok(())
}

/// WAV files go out as voice messages, everything else as a photo.
pub(crate) fn kind_for_path(path: &Path) -> MediaKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("wav") => MediaKind::Audio,
        _ => MediaKind::Image,
    }
}
