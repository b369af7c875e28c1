//! `estate-watch` -- follow the progress of one server-side job.
//!
//! Connects to the progress WebSocket for a job, prints a line per
//! update and exits once the job completes or the connection is lost.
//!
//! # Usage
//!
//! ```text
//! estate-watch <job-id>
//! ```
//!
//! # Environment variables
//!
//! | Variable                          | Required | Default                 | Description                          |
//! |-----------------------------------|----------|-------------------------|--------------------------------------|
//! | `PROGRESS_JOB_ID`                 | no       | --                      | Job to follow when no argument given |
//! | `PROGRESS_API_URL`                | no       | `http://localhost:8000` | API origin; `https` selects `wss`    |
//! | `PROGRESS_WS_HOST`                | no       | --                      | Overrides the host and port          |
//! | `PROGRESS_RECONNECT_BASE_MS`      | no       | `1000`                  | Backoff base delay                   |
//! | `PROGRESS_RECONNECT_MAX_MS`       | no       | `10000`                 | Backoff cap                          |
//! | `PROGRESS_RECONNECT_MAX_ATTEMPTS` | no       | `5`                     | Reconnections before giving up       |
//! | `PROGRESS_TEARDOWN_GRACE_MS`      | no       | `1000`                  | Delay before closing after complete  |
//!
//! Exit status is `0` on completion, `1` on failure and `130` when
//! interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use estate_progress::{ProgressCallbacks, ProgressConfig, ProgressSubscription};
use estate_watcher::render;
use estate_watcher::watch::{self, Outcome};

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "estate_watcher=info,estate_progress=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "estate-watch failed");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let job_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PROGRESS_JOB_ID").ok())
        .filter(|id| !id.trim().is_empty())
        .context("usage: estate-watch <job-id> (or set PROGRESS_JOB_ID)")?;

    let config = ProgressConfig::from_env().context("invalid progress configuration")?;

    tracing::info!(
        job_id = %job_id,
        host = %config.host,
        secure = config.secure,
        "Starting estate-watch",
    );

    let sub = ProgressSubscription::new(config, Arc::new(ProgressCallbacks::new()));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let mut stdout = std::io::stdout();
    let outcome = watch::run(&sub, &job_id, shutdown, &mut stdout).await?;

    println!("{}", render::summary_line(&sub.snapshot()));

    Ok(match outcome {
        Outcome::Completed(data) => {
            if !data.is_null() {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
            ExitCode::SUCCESS
        }
        Outcome::Failed(message) => {
            tracing::error!(job_id = %job_id, error = %message, "Job tracking failed");
            ExitCode::from(EXIT_FAILURE)
        }
        Outcome::Interrupted => ExitCode::from(EXIT_INTERRUPTED),
    })
}
