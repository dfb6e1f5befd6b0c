mod error;
mod render;
mod replay;
mod settings;

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pagechat_stream::{
    ChatClient, ChatTransport, Conversation, ConversationId, StreamOutcome, cancel_pair,
    now_millis,
};
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

use error::{AppError, AppResult, ClientSnafu, ReadTranscriptSnafu, SerializeSnafu, WriteSnafu};
use render::{TerminalStream, render_reply_details};
use replay::ReplayTransport;
use settings::{Settings, SettingsStore};

/// Exit status used when the reply was cancelled with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "pagechat", about = "Ask questions about indexed documents")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask one question and stream the answer
    Ask {
        question: String,
        /// Document ids to search (repeatable, overrides the settings file)
        #[arg(short, long = "doc")]
        documents: Vec<String>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Feed a recorded SSE transcript through the stream pipeline
    Replay {
        path: PathBuf,
        /// Bytes per simulated network chunk
        #[arg(long, default_value_t = 64)]
        chunk_size: usize,
    },
    /// Print the effective settings
    Config {
        /// Save the effective settings to the settings file
        #[arg(long)]
        write: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };

    match run(cli.command, store).await {
        Ok(StreamOutcome::Completed) => ExitCode::SUCCESS,
        Ok(StreamOutcome::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Ok(StreamOutcome::Failed { .. }) => ExitCode::FAILURE,
        Err(error) => {
            tracing::error!(error = %error, "pagechat failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, mut store: SettingsStore) -> AppResult<StreamOutcome> {
    match command {
        Command::Ask {
            question,
            documents,
            timeout,
            endpoint,
        } => {
            let settings = Settings {
                endpoint: endpoint.unwrap_or_else(|| store.settings().endpoint.clone()),
                timeout_secs: timeout.unwrap_or(store.settings().timeout_secs),
                documents: if documents.is_empty() {
                    store.settings().documents.clone()
                } else {
                    documents
                },
                ..store.settings().clone()
            };
            tracing::debug!(
                endpoint = %settings.endpoint,
                documents = settings.documents.len(),
                "asking question"
            );

            let client = ChatClient::from_config(&settings.to_client_config()).context(
                ClientSnafu {
                    stage: "build-http-client",
                },
            )?;
            stream_reply(&client, &question, &settings.documents, false).await
        }
        Command::Replay { path, chunk_size } => {
            let transcript = tokio::fs::read(&path).await.context(ReadTranscriptSnafu {
                stage: "read-transcript-file",
                path: path.clone(),
            })?;
            tracing::debug!(
                path = ?path,
                bytes = transcript.len(),
                chunk_size,
                "replaying transcript"
            );

            let client = ChatClient::new(
                ReplayTransport::new(transcript, chunk_size),
                Duration::from_secs(store.settings().timeout_secs),
            );
            stream_reply(&client, "replay", &[], true).await
        }
        Command::Config { write } => {
            if write {
                let settings = store.settings().clone();
                store.update(settings)?;
            }

            let rendered = serde_json::to_string_pretty(&store.settings().masked()).context(
                SerializeSnafu {
                    stage: "serialize-settings",
                },
            )?;
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "# {}", store.config_path().display())
                .and_then(|()| writeln!(stdout, "{rendered}"))
                .context(WriteSnafu {
                    stage: "print-settings",
                })?;
            Ok(StreamOutcome::Completed)
        }
    }
}

/// Sends one question and streams the reply until it ends or Ctrl-C cancels it.
///
/// `replay` runs silently and prints the finished reply as JSON instead.
async fn stream_reply<T>(
    client: &ChatClient<T>,
    question: &str,
    documents: &[String],
    replay: bool,
) -> AppResult<StreamOutcome>
where
    T: ChatTransport,
{
    let mut conversation = Conversation::new(ConversationId::new_v7(), question);
    let target = conversation
        .submit(question, now_millis())
        .map_err(|rejection| AppError::Rejected {
            stage: "submit-question",
            rejection,
        })?;
    let request = conversation.to_request().with_documents(documents.iter());
    let (mut cancel, signal) = cancel_pair();

    let outcome = {
        let handler = TerminalStream::new(
            conversation.stream_handler(target),
            io::stdout(),
            io::stderr(),
        );
        let mut handler = if replay { handler.quiet() } else { handler };

        let send = client.send_message(&request, &mut handler, signal);
        tokio::pin!(send);

        tokio::select! {
            outcome = &mut send => outcome,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("cancelling reply");
                cancel.cancel();
                send.await
            }
        }
    };

    conversation
        .finish(target, &outcome)
        .map_err(|rejection| AppError::Rejected {
            stage: "finish-reply",
            rejection,
        })?;

    let Some(reply) = conversation.messages().last() else {
        return Ok(outcome);
    };

    let mut stdout = io::stdout().lock();
    if replay {
        let rendered = serde_json::to_string_pretty(reply).context(SerializeSnafu {
            stage: "serialize-reply",
        })?;
        writeln!(stdout, "{rendered}").context(WriteSnafu {
            stage: "print-reply",
        })?;
    } else {
        render_reply_details(reply, &mut stdout, stdout_is_terminal()).context(WriteSnafu {
            stage: "print-reply-details",
        })?;
    }

    if matches!(outcome, StreamOutcome::Cancelled) {
        eprintln!("cancelled");
    }
    Ok(outcome)
}

fn stdout_is_terminal() -> bool {
    io::stdout().is_terminal()
}
