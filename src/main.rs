use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use ember_core::ids::SessionId;
use ember_engine::{SendPromptParams, SessionOrchestrator, TurnPhase};
use ember_gateway::HttpGateway;
use ember_telemetry::{LogFormat, TelemetryConfig};

#[derive(Parser)]
#[command(name = "ember", about = "Streaming chat client for a local LLM server")]
struct Cli {
    /// Base URL of the chat server.
    #[arg(long, env = "EMBER_SERVER_URL", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check server health.
    Health,
    /// List sessions.
    Sessions,
    /// List available models.
    Models,
    /// Send one prompt and stream the reply. Ctrl-C stops the generation.
    Chat {
        /// Existing session id; a new session is created when omitted.
        #[arg(long)]
        session: Option<i64>,
        /// Model override.
        #[arg(long)]
        model: Option<String>,
        /// System prompt override.
        #[arg(long)]
        system_prompt: Option<String>,
        /// Request reasoning output.
        #[arg(long)]
        think: bool,
        /// The prompt text.
        prompt: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    ember_telemetry::init_with(&TelemetryConfig {
        default_directive: "info".into(),
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
    });

    let gateway = Arc::new(HttpGateway::new(&cli.server).context("building gateway")?);

    match cli.command {
        Command::Health => {
            let health = gateway.health().await?;
            println!("{} (server v{})", health.status, health.version);
        }
        Command::Sessions => {
            for session in gateway.list_sessions().await? {
                println!("{:>6}  {}  {}", session.id, session.updated_at, session.title);
            }
        }
        Command::Models => {
            for model in gateway.list_models().await? {
                match model.size {
                    Some(size) => println!("{}  ({:.1} GB)", model.name, size as f64 / 1e9),
                    None => println!("{}", model.name),
                }
            }
        }
        Command::Chat {
            session,
            model,
            system_prompt,
            think,
            prompt,
        } => {
            let prompt = prompt.join(" ");
            chat(gateway, session, model, system_prompt, think, prompt).await?;
        }
    }

    Ok(())
}

async fn chat(
    gateway: Arc<HttpGateway>,
    session: Option<i64>,
    model: Option<String>,
    system_prompt: Option<String>,
    think: bool,
    prompt: String,
) -> anyhow::Result<()> {
    let session_id = match session {
        Some(id) => SessionId::new(id),
        None => {
            let created = gateway.create_session(None).await?;
            tracing::info!(session_id = created.id.as_i64(), "created session");
            created.id
        }
    };

    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&gateway) as Arc<dyn ember_core::gateway::ChatGateway>
    ));
    orchestrator.select_session(session_id);

    let mut turn = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .send_prompt(SendPromptParams {
                    prompt: Some(prompt),
                    model,
                    system_prompt,
                    think,
                    ..Default::default()
                })
                .await
        })
    };

    let renderer = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { render_stream(&orchestrator, session_id).await })
    };

    let report = tokio::select! {
        result = &mut turn => result.context("turn task")?,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel();
            // Cancellation is synchronous at the state layer; the drive
            // task unwinds right after.
            let result = turn.await.context("turn task")?;
            let _ = renderer.await;
            eprintln!("\n[stopped]");
            return result.map(drop).map_err(Into::into);
        }
    };

    let _ = renderer.await;

    match report {
        Ok(report) => {
            if report.state.phase == TurnPhase::Cancelled {
                eprintln!("\n[stopped]");
            } else if let Some(metrics) = &report.state.metrics {
                match metrics.tokens_per_second {
                    Some(tps) => eprintln!(
                        "\n[{} prompt + {} completion tokens, {tps:.1} tok/s]",
                        metrics.prompt_tokens, metrics.completion_tokens
                    ),
                    None => eprintln!(
                        "\n[{} prompt + {} completion tokens]",
                        metrics.prompt_tokens, metrics.completion_tokens
                    ),
                }
            }
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Print content as it accumulates. Chunk payloads are cumulative, so only
/// the unseen suffix is written.
async fn render_stream(orchestrator: &SessionOrchestrator, session_id: SessionId) {
    use std::io::Write;

    let Some(mut rx) = wait_for_observer(orchestrator, session_id).await else {
        return;
    };

    let mut printed = 0usize;
    loop {
        {
            let state = rx.borrow_and_update().clone();
            if let Some(suffix) = state.content.get(printed..) {
                if !suffix.is_empty() {
                    print!("{suffix}");
                    let _ = std::io::stdout().flush();
                    printed = state.content.len();
                }
            }
            if state.phase.is_terminal() {
                if state.phase == TurnPhase::Error {
                    if let Some(message) = &state.error_message {
                        eprintln!("\nerror: {message}");
                    }
                }
                println!();
                return;
            }
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// The observer appears once the orchestrator claims the turn slot.
async fn wait_for_observer(
    orchestrator: &SessionOrchestrator,
    session_id: SessionId,
) -> Option<tokio::sync::watch::Receiver<ember_engine::TurnState>> {
    for _ in 0..200 {
        if let Some(rx) = orchestrator.turn_state(session_id) {
            return Some(rx);
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    None
}
