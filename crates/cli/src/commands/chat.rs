use anyhow::Result;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use triage_agent::{ExternalOutput, Orchestrator, SessionOutcome, PERSONA};
use triage_core::domain::conversation::{Role, Turn};

use crate::bootstrap::bootstrap;
use crate::commands::{load_config, runtime, CommandResult};

pub fn run(message: Option<String>) -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let app = match bootstrap(config).await {
            Ok(app) => app,
            Err(error) => {
                return CommandResult::failure(
                    "chat",
                    error.error_class(),
                    error.to_string(),
                    error.exit_code(),
                )
            }
        };

        let result = match message {
            Some(message) => single_turn(&app.orchestrator, message).await,
            None => match interactive(&app.orchestrator).await {
                Ok(()) => CommandResult { exit_code: 0, output: String::new() },
                Err(error) => CommandResult::failure("chat", "io", error.to_string(), 7),
            },
        };
        app.db_pool.close().await;
        result
    })
}

async fn single_turn(orchestrator: &Orchestrator, message: String) -> CommandResult {
    match orchestrator.run(vec![Turn::system(PERSONA), Turn::user(message)]).await {
        Ok(outcome) => CommandResult::success("chat", describe(&outcome.output)),
        Err(failure) => {
            CommandResult::failure("chat", failure.error_class(), failure.error.to_string(), 8)
        }
    }
}

/// Each stdin line is one user turn; the accumulated history is carried into
/// the next run so the router sees the whole call.
async fn interactive(orchestrator: &Orchestrator) -> Result<()> {
    let mut stdout = io::stdout();
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut turns = vec![Turn::system(PERSONA)];

    stdout.write_all(b"connected. type a message, or an empty line to hang up.\n").await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        turns.push(Turn::user(line));

        let reply = match orchestrator.run(turns.clone()).await {
            Ok(SessionOutcome { final_turns, output, .. }) => {
                turns = final_turns;
                format!("assistant: {}\n", describe(&output))
            }
            Err(failure) => {
                warn!(
                    event_name = "cli.chat.session_failed",
                    session_id = %failure.session_id,
                    error_class = failure.error_class(),
                    "session failed; keeping partial history"
                );
                let message = format!("[{}] {}\n", failure.error_class(), failure.error);
                turns = resumable_history(failure.partial_history);
                message
            }
        };
        stdout.write_all(reply.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Drops a trailing assistant turn whose tool calls never got results, since
/// chat-completions endpoints reject such a history.
fn resumable_history(mut turns: Vec<Turn>) -> Vec<Turn> {
    if turns.last().is_some_and(|turn| turn.role == Role::Assistant && turn.has_tool_calls()) {
        turns.pop();
    }
    turns
}

fn describe(output: &ExternalOutput) -> String {
    match output {
        ExternalOutput::Text(text) => text.clone(),
        ExternalOutput::Audio { text, format, bytes } => {
            format!("{text} [{} bytes of {format} audio]", bytes.len())
        }
    }
}
