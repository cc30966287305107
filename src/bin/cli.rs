//! CLI binary for voxchat.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxchat::audio::{AudioSink, NullSink};
use voxchat::history::HistoryStore;
use voxchat::llm::HttpChatTransport;
use voxchat::tts::HttpSynthesizer;
use voxchat::{ChatConfig, ConversationController, ConversationEvent, Transcript};

/// voxchat: chat with an LLM and hear the reply while it streams in.
#[derive(Parser)]
#[command(name = "voxchat", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Type messages and read the streamed replies.
    Chat {
        /// Also speak each reply.
        #[arg(long)]
        speak: bool,
    },

    /// Live conversation: each stdin line is a final transcript and replies
    /// are spoken as they stream.
    Live,

    /// List stored conversations.
    History {
        /// Print every message instead of a summary line.
        #[arg(long)]
        full: bool,
    },

    /// Print the effective configuration.
    Config {
        /// Write the default configuration file if none exists.
        #[arg(long)]
        write: bool,
    },

    /// List audio output devices.
    #[cfg(feature = "audio")]
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voxchat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(ChatConfig::default_config_path);

    let config = if config_path.exists() {
        ChatConfig::from_file(&config_path)?
    } else if cli.config.is_some() {
        anyhow::bail!("config file {} not found", config_path.display());
    } else {
        ChatConfig::default()
    };

    match cli.command.unwrap_or(Command::Chat { speak: false }) {
        Command::Chat { speak } => run_chat(config, speak, false).await,
        Command::Live => run_chat(config, true, true).await,
        Command::History { full } => show_history(&config, full),
        Command::Config { write } => show_config(&config, &config_path, write),
        #[cfg(feature = "audio")]
        Command::Devices => list_devices(),
    }
}

fn build_sink(config: &ChatConfig) -> Arc<dyn AudioSink> {
    #[cfg(feature = "audio")]
    {
        match voxchat::audio::playback::CpalPlayback::new(&config.audio) {
            Ok(playback) => return Arc::new(playback),
            Err(e) => warn!("audio output unavailable, replies will not be heard: {e}"),
        }
    }
    #[cfg(not(feature = "audio"))]
    {
        let _ = config;
        warn!("built without the `audio` feature, replies will not be heard");
    }
    Arc::new(NullSink)
}

async fn run_chat(config: ChatConfig, speak: bool, live: bool) -> anyhow::Result<()> {
    println!("voxchat v{}", env!("CARGO_PKG_VERSION"));

    let chat = Arc::new(HttpChatTransport::new(&config.chat));
    let synthesizer = Arc::new(HttpSynthesizer::new(&config.tts));
    let sink: Arc<dyn AudioSink> = if speak {
        build_sink(&config)
    } else {
        Arc::new(NullSink)
    };

    let controller = ConversationController::start(config, chat, synthesizer, sink);
    controller.set_speak_replies(speak);
    if live {
        controller.start_live();
        println!("\nLive mode. Each line you type is heard as speech. /new starts over, Ctrl+D quits.\n");
    } else {
        println!("\nType a message. /new starts over, Ctrl+D quits.\n");
    }

    let printer = tokio::spawn(print_events(controller.subscribe()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/new" => {
                controller.new_conversation();
                println!("(new conversation)");
                continue;
            }
            _ => {}
        }

        if live {
            // Replies are not awaited so a new line can cut in.
            if controller
                .on_transcript(&Transcript::final_text(line))
                .is_none()
            {
                println!("(not heard while speaking)");
            }
            continue;
        }

        let Some(turn) = controller.submit(&line) else {
            continue;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
            _ = turn.wait() => {}
        }
    }

    controller.shutdown().await;
    printer.abort();
    Ok(())
}

/// Print reply text as it grows.
async fn print_events(mut events: broadcast::Receiver<ConversationEvent>) {
    let mut printed = 0usize;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("display fell behind by {n} events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let mut stdout = std::io::stdout();
        match event {
            ConversationEvent::TurnStarted { .. } => printed = 0,
            ConversationEvent::TextUpdated { text, .. } => {
                if let Some(suffix) = text.get(printed..) {
                    let _ = write!(stdout, "{suffix}");
                    let _ = stdout.flush();
                }
                printed = text.len();
            }
            ConversationEvent::TurnCompleted { .. } => {
                let _ = writeln!(stdout, "\n");
            }
            ConversationEvent::TurnFailed { message, .. } => {
                let _ = writeln!(stdout, "\n{message}\n");
            }
            _ => {}
        }
    }
}

fn show_history(config: &ChatConfig, full: bool) -> anyhow::Result<()> {
    let store = HistoryStore::new(
        config.history.effective_path(),
        config.history.max_conversations,
    );
    let conversations = store.load()?;
    if conversations.is_empty() {
        println!("No stored conversations in {}", store.path().display());
        return Ok(());
    }

    for (i, conversation) in conversations.iter().enumerate() {
        let Some(first) = conversation.first() else {
            continue;
        };
        let preview: String = first.content.chars().take(60).collect();
        println!(
            "{:>2}. {}  {} ({} messages)",
            i + 1,
            first.timestamp.format("%Y-%m-%d %H:%M"),
            preview,
            conversation.len()
        );
        if full {
            for message in conversation {
                let who = if message.is_user { "you" } else { "assistant" };
                println!("      {who}: {}", message.content);
            }
        }
    }
    Ok(())
}

fn show_config(config: &ChatConfig, path: &std::path::Path, write: bool) -> anyhow::Result<()> {
    if write {
        if path.exists() {
            println!("{} already exists", path.display());
        } else {
            ChatConfig::default().save_to_file(path)?;
            println!("wrote {}", path.display());
        }
        return Ok(());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(feature = "audio")]
fn list_devices() -> anyhow::Result<()> {
    println!("Output devices:");
    for name in voxchat::audio::playback::CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }
    Ok(())
}
