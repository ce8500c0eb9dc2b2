//! CLI commands for Threadline using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;

use crate::config::{get_home_dir, get_settings_path, load_settings, load_settings_from, save_settings, Settings};
use crate::core::{
    ConversationStore, Dispatcher, InboundEvent, QueueLimits, QueueStats, ReplyProcessor,
    UserSerializer,
};
use crate::providers::create_services;
use crate::telegram::{run_telegram_daemon, TelegramTransport};
use crate::transport::{ConsoleTransport, Transport};
use crate::web::run_web_server;

/// User key for messages sent with `threadline ask`.
const CLI_USER: &str = "cli";

/// Threadline - per-user serialized assistant replies over Telegram.
#[derive(Parser)]
#[command(name = "threadline")]
#[command(version = "0.1.0")]
#[command(about = "Threadline - one conversation thread per user, answered in order", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the Telegram bot and the status server
    Run {
        /// Status server port (overrides settings)
        #[arg(short, long)]
        port: Option<u16>,

        /// Assistant ID (overrides settings)
        #[arg(short, long)]
        assistant: Option<String>,
    },

    /// Send one message through the pipeline and print the reply
    Ask {
        /// Message to send
        message: String,
    },

    /// Write the settings file
    Setup {
        /// Telegram bot token (from @BotFather)
        #[arg(long)]
        token: String,

        /// OpenAI assistant ID
        #[arg(long)]
        assistant: String,

        /// OpenAI API key
        #[arg(long = "api-key")]
        api_key: String,

        /// Status server port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show effective settings (secrets masked)
    Config,

    /// Show queue statistics of a running instance
    Status {
        /// Status server port (defaults to settings)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Run { port, assistant } => cmd_run(*port, assistant).await,
            Command::Ask { message } => cmd_ask(message).await,
            Command::Setup {
                token,
                assistant,
                api_key,
                port,
            } => cmd_setup(token, assistant, api_key, *port).await,
            Command::Config => cmd_config().await,
            Command::Status { port } => cmd_status(*port).await,
        }
    }
}

/// Wire the processing pipeline for `transport`.
fn build_dispatcher(
    settings: &Settings,
    home: &Path,
    transport: Arc<dyn Transport>,
    conversations: Arc<ConversationStore>,
) -> Result<Dispatcher> {
    let services = create_services(&settings.openai)?;
    let processor = ReplyProcessor::new(
        services,
        settings.assistant_id.clone(),
        home.join("media"),
        settings.delivery.max_chunk_chars,
    );
    let serializer = UserSerializer::new(Arc::new(processor), QueueLimits::from(&settings.queue));

    Ok(Dispatcher::new(serializer, conversations, transport))
}

fn ensure_home_dirs(home: &Path) -> Result<()> {
    std::fs::create_dir_all(home.join("files"))?;
    std::fs::create_dir_all(home.join("media"))?;
    Ok(())
}

fn open_conversations(home: &Path) -> Result<Arc<ConversationStore>> {
    Ok(Arc::new(ConversationStore::open(
        home.join("conversations.json"),
    )?))
}

// Command implementations

async fn cmd_run(port: Option<u16>, assistant: &Option<String>) -> Result<()> {
    let mut settings = load_settings()?;
    if let Some(port) = port {
        settings.port = port;
    }
    if let Some(assistant) = assistant {
        settings.assistant_id = assistant.clone();
    }
    settings.validate_for_bot()?;

    let token = settings
        .bot_token()
        .ok_or_else(|| anyhow::anyhow!("Telegram bot token not configured"))?
        .to_string();

    let home = get_home_dir()?;
    ensure_home_dirs(&home)?;

    let bot = Bot::new(&token);
    let transport = Arc::new(TelegramTransport::new(bot.clone(), token, home.join("files")));
    let conversations = open_conversations(&home)?;
    tracing::info!("Loaded {} conversation(s)", conversations.len());

    let dispatcher = Arc::new(build_dispatcher(&settings, &home, transport, conversations)?);
    let serializer = dispatcher.serializer().clone();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let web = tokio::spawn({
        let serializer = serializer.clone();
        let port = settings.port;
        async move {
            let shutdown = async move {
                let _ = stop_rx.await;
            };
            if let Err(e) = run_web_server(port, serializer, shutdown).await {
                tracing::error!("Status server error: {}", e);
            }
        }
    });

    println!("Threadline running. Status on http://localhost:{}/health", settings.port);
    println!("Press Ctrl+C to stop");

    let result = run_telegram_daemon(bot, dispatcher).await;

    let grace = Duration::from_secs(settings.queue.shutdown_grace_secs);
    tracing::info!("Waiting up to {:?} for in-flight tasks", grace);
    if !serializer.wait_idle(grace).await {
        tracing::warn!("Shutdown grace elapsed with work left: {}", serializer.stats());
    }

    let _ = stop_tx.send(());
    if let Err(e) = web.await {
        tracing::warn!("Status server task ended abnormally: {}", e);
    }

    result?;
    Ok(())
}

async fn cmd_ask(message: &str) -> Result<()> {
    let settings = load_settings()?;
    settings.validate_for_assistant()?;

    let home = get_home_dir()?;
    ensure_home_dirs(&home)?;

    let conversations = open_conversations(&home)?;
    let dispatcher = build_dispatcher(
        &settings,
        &home,
        Arc::new(ConsoleTransport),
        conversations,
    )?;

    if dispatcher
        .on_event(InboundEvent::text(CLI_USER, message))
        .is_none()
    {
        anyhow::bail!("Message was not accepted");
    }

    // Run timeout plus slack for delivery.
    let limit = Duration::from_secs(settings.openai.run_timeout_secs + 30);
    if !dispatcher.serializer().wait_idle(limit).await {
        anyhow::bail!("Timed out after {:?} waiting for a reply", limit);
    }
    Ok(())
}

async fn cmd_setup(token: &str, assistant: &str, api_key: &str, port: Option<u16>) -> Result<()> {
    let home = get_home_dir()?;
    ensure_home_dirs(&home)?;

    let path = get_settings_path()?;
    let mut settings = load_settings_from(&path)?;
    settings.telegram.bot_token = Some(token.trim().to_string());
    settings.assistant_id = assistant.trim().to_string();
    settings.openai.api_key = Some(api_key.trim().to_string());
    if let Some(port) = port {
        settings.port = port;
    }
    settings.validate_for_bot()?;

    save_settings(&path, &settings)?;

    println!("✓ Saved settings to {}", path.display());
    println!("\nStart the bot with: threadline run");
    Ok(())
}

async fn cmd_config() -> Result<()> {
    let settings = load_settings()?;
    let path = get_settings_path()?;

    println!("Settings file: {}", path.display());
    if !path.exists() {
        println!("(not found; showing defaults and environment overrides)");
    }
    println!("{}", serde_json::to_string_pretty(&settings.redacted())?);

    if let Err(e) = settings.validate_for_bot() {
        println!("\n⚠ {}", e);
    }
    Ok(())
}

async fn cmd_status(port: Option<u16>) -> Result<()> {
    let port = match port {
        Some(port) => port,
        None => load_settings()?.port,
    };
    let url = format!("http://127.0.0.1:{}/api/queue", port);

    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Threadline is not reachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        anyhow::bail!("Status server returned {}", response.status());
    }

    let stats: QueueStats = response.json().await?;
    println!("{}", stats);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Commands::command().debug_assert();
    }

    #[test]
    fn test_parse_run_overrides() {
        let args = Commands::try_parse_from(["threadline", "run", "--port", "8080", "-a", "asst_x"])
            .unwrap();
        match args.command {
            Command::Run { port, assistant } => {
                assert_eq!(port, Some(8080));
                assert_eq!(assistant.as_deref(), Some("asst_x"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_setup_requires_secrets() {
        assert!(Commands::try_parse_from(["threadline", "setup", "--token", "t"]).is_err());

        let args = Commands::try_parse_from([
            "threadline",
            "setup",
            "--token",
            "123:abc",
            "--assistant",
            "asst_1",
            "--api-key",
            "sk-1",
        ])
        .unwrap();
        match args.command {
            Command::Setup { api_key, port, .. } => {
                assert_eq!(api_key, "sk-1");
                assert_eq!(port, None);
            }
            _ => panic!("expected setup"),
        }
    }

    #[test]
    fn test_build_dispatcher_requires_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let result = build_dispatcher(
            &settings,
            dir.path(),
            Arc::new(ConsoleTransport),
            Arc::new(ConversationStore::in_memory()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.assistant_id = "asst_1".to_string();
        settings.openai.api_key = Some("sk-test".to_string());

        let dispatcher = build_dispatcher(
            &settings,
            dir.path(),
            Arc::new(ConsoleTransport),
            Arc::new(ConversationStore::in_memory()),
        )
        .unwrap();
        assert_eq!(dispatcher.serializer().stats(), QueueStats::default());
    }
}
