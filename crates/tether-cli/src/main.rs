//! # tether
//!
//! Command-line client: loads settings, opens a supervised connection,
//! prints state transitions and subscribed events until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::Value;
use tether_client::{ConnectionHandle, ConnectionSupervisor, SupervisorConfig, WsTransport};
use tether_core::{ConnectionState, TetherError};
use tether_settings::TetherSettings;

/// How long to wait for the transport to close on Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Tether real-time connection client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Persistent WebSocket connection with heartbeat and reconnect")]
struct Cli {
    /// Endpoint (`ws://` or `wss://`). Overrides settings.
    #[arg(long)]
    url: Option<String>,

    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print inbound events with this name. Repeatable.
    #[arg(long = "subscribe", value_name = "EVENT")]
    subscriptions: Vec<String>,

    /// Send `EVENT=JSON` once the first connection opens. Repeatable.
    #[arg(long = "emit", value_name = "EVENT=JSON", value_parser = parse_emit)]
    emits: Vec<(String, Value)>,

    /// Log level filter (overrides settings; `RUST_LOG` wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Log as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Record metrics and print them in Prometheus format on exit.
    #[arg(long)]
    metrics: bool,
}

/// Parse `event=json`. A payload that is not JSON is sent as a string.
fn parse_emit(raw: &str) -> std::result::Result<(String, Value), String> {
    let (event, payload) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected EVENT=JSON, got `{raw}`"))?;
    let event = event.trim();
    if event.is_empty() {
        return Err("event name must not be empty".to_string());
    }
    let payload =
        serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()));
    Ok((event.to_string(), payload))
}

/// Layer command-line flags over loaded settings.
fn apply_cli_overrides(settings: &mut TetherSettings, cli: &Cli) {
    if let Some(url) = &cli.url {
        settings.connection.url.clone_from(url);
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
}

fn install_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;
    tracing::debug!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Why the connection stopped without a shutdown request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StopReason {
    /// The reconnect budget was spent and the connection is `failed`.
    RetriesExhausted,
    /// The transport gave up on its own and the connection fell back to
    /// `disconnected`.
    TransportStopped,
}

/// States the client cannot leave without user action.
///
/// The run loop never calls `disconnect` itself, so any `disconnected`
/// it observes after connecting is terminal.
fn stop_reason(state: ConnectionState) -> Option<StopReason> {
    match state {
        ConnectionState::Failed => Some(StopReason::RetriesExhausted),
        ConnectionState::Disconnected => Some(StopReason::TransportStopped),
        ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting => {
            None
        }
    }
}

/// Connect, print state changes, and send `emits` on the first open.
///
/// Returns `None` once `shutdown` resolves, or the reason the connection
/// stopped on its own.
async fn run<S>(
    handle: &ConnectionHandle,
    emits: Vec<(String, Value)>,
    shutdown: S,
) -> Result<Option<StopReason>>
where
    S: Future<Output = std::io::Result<()>>,
{
    let mut state = handle.watch_state();
    let mut pending = Some(emits);
    tokio::pin!(shutdown);

    handle.connect();
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("Failed to listen for ctrl-c")?;
                return Ok(None);
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Err(TetherError::SupervisorGone.into());
                }
                let current = *state.borrow_and_update();
                println!("state: {current}");
                if current == ConnectionState::Connected {
                    for (event, payload) in pending.take().unwrap_or_default() {
                        handle.emit(event, payload);
                    }
                }
                if let Some(reason) = stop_reason(current) {
                    return Ok(Some(reason));
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(tether_settings::settings_path);
    let mut settings = tether_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    apply_cli_overrides(&mut settings, &cli);
    settings.validate().context("Invalid settings")?;

    tether_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let metrics = if cli.metrics {
        Some(install_metrics()?)
    } else {
        None
    };

    let config = SupervisorConfig::from_settings(&settings.connection);
    let handle = ConnectionSupervisor::spawn(config, WsTransport::new())
        .context("Failed to start connection supervisor")?;
    tracing::info!(connection_id = %handle.id(), url = %settings.connection.url, "starting");

    for event in &cli.subscriptions {
        let name = event.clone();
        let _ = handle.subscribe(event.as_str(), move |payload| {
            println!("{name} {payload}");
        });
    }

    let outcome = run(&handle, cli.emits, tokio::signal::ctrl_c()).await;

    if matches!(outcome, Ok(None)) {
        tracing::info!("shutting down");
        handle.disconnect();
        if tokio::time::timeout(
            SHUTDOWN_GRACE,
            handle.wait_for_state(ConnectionState::Disconnected),
        )
        .await
        .is_err()
        {
            tracing::warn!("transport did not close in time");
        }
    }

    if let Some(metrics) = metrics {
        print!("{}", metrics.render());
    }

    match outcome? {
        None => Ok(()),
        Some(StopReason::RetriesExhausted) => {
            let attempts = handle.snapshot().await.map(|s| s.attempts).unwrap_or_default();
            bail!("connection failed after {attempts} attempts")
        }
        Some(StopReason::TransportStopped) => {
            bail!("transport stopped retrying, connection is disconnected")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_client::mock::{MockLink, MockTransport};
    use tokio::sync::oneshot;

    async fn first_link(transport: &MockTransport) -> MockLink {
        loop {
            if let Some(link) = transport.last_link() {
                return link;
            }
            tokio::task::yield_now().await;
        }
    }

    fn mock_config(max_reconnect_attempts: u32) -> SupervisorConfig {
        SupervisorConfig {
            url: "ws://mock/ws".into(),
            max_reconnect_attempts,
            ..SupervisorConfig::default()
        }
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tether").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn parse_emit_json_payload() {
        let (event, payload) = parse_emit(r#"chat={"text":"hi"}"#).unwrap();
        assert_eq!(event, "chat");
        assert_eq!(payload, json!({"text": "hi"}));
    }

    #[test]
    fn parse_emit_plain_payload_becomes_string() {
        let (event, payload) = parse_emit("note=hello there").unwrap();
        assert_eq!(event, "note");
        assert_eq!(payload, json!("hello there"));
    }

    #[test]
    fn parse_emit_splits_on_first_equals() {
        let (event, payload) = parse_emit("q=a=b").unwrap();
        assert_eq!(event, "q");
        assert_eq!(payload, json!("a=b"));
    }

    #[test]
    fn parse_emit_rejects_malformed() {
        assert!(parse_emit("no-separator").is_err());
        assert!(parse_emit("=1").is_err());
    }

    #[test]
    fn repeatable_flags() {
        let cli = cli(&[
            "--subscribe",
            "chat",
            "--subscribe",
            "presence",
            "--emit",
            "join={}",
            "--emit",
            "chat=\"hi\"",
        ]);
        assert_eq!(cli.subscriptions, vec!["chat", "presence"]);
        assert_eq!(cli.emits.len(), 2);
        assert_eq!(cli.emits[1], ("chat".to_string(), json!("hi")));
    }

    #[test]
    fn overrides_apply_over_settings() {
        let cli = cli(&[
            "--url",
            "wss://rt.example.com/ws",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = TetherSettings::default();
        apply_cli_overrides(&mut settings, &cli);
        assert_eq!(settings.connection.url, "wss://rt.example.com/ws");
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn no_flags_keep_settings() {
        let cli = cli(&[]);
        let mut settings = TetherSettings::default();
        apply_cli_overrides(&mut settings, &cli);
        assert_eq!(settings, TetherSettings::default());
        assert!(!cli.metrics);
    }

    #[test]
    fn invalid_url_override_fails_validation() {
        let cli = cli(&["--url", "http://example.com"]);
        let mut settings = TetherSettings::default();
        apply_cli_overrides(&mut settings, &cli);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connection": {"maxReconnectAttempts": 2}}"#).unwrap();
        let settings = tether_settings::load_settings_with(&path, |_| None).unwrap();
        let config = SupervisorConfig::from_settings(&settings.connection);
        assert_eq!(config.max_reconnect_attempts, 2);
    }

    #[test]
    fn terminal_states() {
        assert_eq!(stop_reason(ConnectionState::Failed), Some(StopReason::RetriesExhausted));
        assert_eq!(
            stop_reason(ConnectionState::Disconnected),
            Some(StopReason::TransportStopped)
        );
        assert_eq!(stop_reason(ConnectionState::Connecting), None);
        assert_eq!(stop_reason(ConnectionState::Connected), None);
        assert_eq!(stop_reason(ConnectionState::Reconnecting), None);
    }

    #[tokio::test]
    async fn run_exits_when_transport_gives_up() {
        let transport = MockTransport::new();
        let handle = ConnectionSupervisor::spawn(mock_config(5), transport.clone()).unwrap();
        let give_up = async {
            let link = first_link(&transport).await;
            assert!(link.open());
            link.end();
        };

        let (stopped, ()) = tokio::join!(
            run(&handle, Vec::new(), std::future::pending()),
            give_up
        );
        assert_eq!(stopped.unwrap(), Some(StopReason::TransportStopped));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn run_exits_when_retries_are_exhausted() {
        let transport = MockTransport::new();
        let handle = ConnectionSupervisor::spawn(mock_config(2), transport.clone()).unwrap();
        let refuse = async {
            let link = first_link(&transport).await;
            assert!(link.error("refused"));
            assert!(link.error("refused"));
        };

        let (stopped, ()) = tokio::join!(
            run(&handle, Vec::new(), std::future::pending()),
            refuse
        );
        assert_eq!(stopped.unwrap(), Some(StopReason::RetriesExhausted));
        assert_eq!(handle.snapshot().await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn run_sends_emits_and_stops_on_shutdown() {
        let transport = MockTransport::new();
        let handle = ConnectionSupervisor::spawn(mock_config(5), transport.clone()).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let shutdown = async move {
            let _ = stop_rx.await;
            Ok::<(), std::io::Error>(())
        };
        let server = async {
            let link = first_link(&transport).await;
            assert!(link.open());
            let mut sent = Vec::new();
            while sent.is_empty() {
                sent = link.take_sent();
                tokio::task::yield_now().await;
            }
            let _ = stop_tx.send(());
            sent
        };

        let (stopped, sent) = tokio::join!(
            run(&handle, vec![("join".to_string(), json!({"room": 1}))], shutdown),
            server
        );
        assert_eq!(stopped.unwrap(), None);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, "join");
        assert_eq!(handle.state(), ConnectionState::Connected);
    }
}
