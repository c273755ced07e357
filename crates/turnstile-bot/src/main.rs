use clap::{Parser, Subcommand};
use tracing::info;
use turnstile_core::{InboundMessage, SessionId, TurnstileConfig};
use turnstile_stream::codec::{inbound_to_fields, outbound_from_entry};

mod app;
mod games;

/// Turnstile - chat game bots behind a per-session serialized pipeline.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about, long_about = None)]
struct Cli {
    /// Config file [default: ~/.turnstile/turnstile.toml]
    #[arg(long, global = true, env = "TURNSTILE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Consume the inbound stream and run the configured bot (default).
    Run,
    /// Append a message to the inbound stream.
    Send {
        #[arg(long)]
        chat: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        thread: Option<String>,
        /// Message text.
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Print the newest replies from the outbound stream.
    Outbox {
        #[arg(long, default_value_t = 20)]
        count: usize,
        /// Only show replies to this chat.
        #[arg(long)]
        chat: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "turnstile=info,turnstile_dispatch=info,turnstile_stream=info,turnstile_store=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > TURNSTILE_CONFIG env > ~/.turnstile/turnstile.toml
    let config = TurnstileConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), error = %e, "Config load failed, using defaults");
        TurnstileConfig::default()
    });

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(consumer = %config.stream.consumer, "Turnstile starting");
            app::run(config, app::shutdown_signal()).await?;
        }
        Commands::Send {
            chat,
            user,
            sender,
            thread,
            text,
        } => {
            let msg = InboundMessage {
                session_id: SessionId::from(chat),
                user_id: user,
                content: text.join(" "),
                thread_id: thread,
                sender,
            };
            let log = app::open_stream(&config)?;
            let id = log
                .append(&config.stream.inbound, &inbound_to_fields(&msg), None)
                .await?;
            println!("{id}");
        }
        Commands::Outbox { count, chat } => {
            let log = app::open_stream(&config)?;
            let entries = log.latest(&config.stream.outbound, count).await?;
            // Oldest first reads like a chat transcript.
            for entry in entries.iter().rev() {
                let msg = match outbound_from_entry(entry) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable outbound entry");
                        continue;
                    }
                };
                if chat.as_deref().is_some_and(|c| c != msg.session_id.as_str()) {
                    continue;
                }
                let at = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(entry.created_at_ms)
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("[{at}] {} {:>7}  {}", msg.session_id, msg.kind.as_str(), msg.text);
            }
        }
    }
    Ok(())
}
