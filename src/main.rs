// Claude Recall - background worker and prompt-hook entry point
//
// `claude-recall-worker` (or `claude-recall-worker run`) drains the queue and
// runs maintenance until Ctrl+C. `claude-recall-worker capture` reads one hook
// event as JSON from stdin: prompts are classified into facts, tool calls
// become tool-use records. It always exits successfully so a hook is never
// blocked by memory capture.

use std::io::Read;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use claude_recall::services::bridge::HookInput;
use claude_recall::storage::ConfigService;
use claude_recall::utils::paths::database_path;
use claude_recall::AppState;

/// Logs go to stderr; hooks treat stdout as assistant input
fn init_tracing() {
    let json = std::env::var("RECALL_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let (plain_layer, json_layer) = if json {
        (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
    } else {
        (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_recall=info".into()),
        )
        .with(plain_layer)
        .with(json_layer)
        .init();
}

fn open_state() -> Result<AppState> {
    let config = ConfigService::new()?;
    let db_path = database_path()?;
    tracing::debug!(
        config = %config.path().display(),
        database = %db_path.display(),
        "opening state"
    );
    Ok(AppState::open(config.get_config_clone(), &db_path)?)
}

fn capture() -> Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let input: HookInput = serde_json::from_str(&input)?;
    let state = open_state()?;
    if let Some(id) = state.bridge().capture(&input) {
        tracing::info!(message_id = %id, "hook event captured");
    }
    Ok(())
}

async fn run() -> Result<()> {
    let state = open_state()?;
    state.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    if let Some(report) = state.shutdown().await? {
        tracing::info!(
            acked = report.acked,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            "worker summary"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match std::env::args().nth(1).as_deref() {
        Some("capture") => {
            if let Err(e) = capture() {
                tracing::warn!(error = %e, "hook capture skipped");
            }
            Ok(())
        }
        None | Some("run") => run().await,
        Some(other) => anyhow::bail!("unknown command: {} (expected `run` or `capture`)", other),
    }
}
