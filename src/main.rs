//! mailstream - terminal client for the analyzed email stream

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use mailstream::app::{Command, PageController};
use mailstream::config::Settings;
use mailstream::providers::{HttpMailApi, MailApi, RemoteSettings};
use mailstream::services::{HttpConnector, Notification};
use mailstream::ui::TerminalPainter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is the painted page.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load().context("Failed to load settings")?;
    tracing::info!(server = %settings.server.base_url, "Starting mailstream");

    let api = Arc::new(HttpMailApi::new(&settings.server).context("Failed to build API client")?);
    let (remote, settings_error) = match api.fetch_settings().await {
        Ok(remote) => (remote, None),
        Err(e) => {
            tracing::warn!(error = %e, "Could not fetch remote settings, using defaults");
            (RemoteSettings::default(), Some(e.to_string()))
        }
    };

    let connector = HttpConnector::new(
        &settings.server,
        Some(remote.email_preferences.days_to_analyze),
    )
    .context("Failed to build stream connector")?;
    let painter = TerminalPainter::new(std::io::stdout(), settings.render.width);
    let mut controller = PageController::new(&settings, remote, Arc::new(connector), api, painter);
    if let Some(message) = settings_error {
        controller.notify(Notification::settings_unavailable(&message));
    }

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(read_commands(tx));

    tokio::select! {
        result = controller.run(rx) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }
    Ok(())
}

/// Forwards stdin lines as commands until EOF or `quit`.
async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        };

        match Command::parse(&line) {
            Ok(Some(command)) => {
                let quit = command == Command::Shutdown;
                if tx.send(command).await.is_err() || quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => eprintln!("{e}"),
        }
    }
}
