//! # consult-agent
//!
//! Consultation server binary: loads settings, initializes logging and
//! metrics, and runs the HTTP/WebSocket server until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use consult_core::logging::{LogFormat, init_subscriber};
use consult_server::config::ServerConfig;
use consult_server::metrics as server_metrics;
use consult_server::server::ConsultServer;
use consult_settings::ConsultSettings;

/// Consultation workflow server.
#[derive(Parser, Debug)]
#[command(name = "consult-agent", about = "Consultation workflow server")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings if specified).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.consult/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Maximum concurrent WebSocket connections (overrides settings if specified).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log level filter (overrides settings if specified).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Server config from loaded settings with command-line overrides applied.
    fn server_config(&self, settings: &ConsultSettings) -> ServerConfig {
        let mut config = ServerConfig::from(settings);
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        config
    }

    fn log_level<'a>(&'a self, settings: &'a ConsultSettings) -> &'a str {
        self.log_level.as_deref().unwrap_or(&settings.logging.level)
    }

    fn log_format(&self, settings: &ConsultSettings) -> LogFormat {
        LogFormat::from_json_flag(self.json_logs || settings.logging.json)
    }
}

fn load(cli: &Cli) -> Result<ConsultSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(consult_settings::settings_path);
    consult_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = load(&args)?;
    init_subscriber(args.log_level(&settings), args.log_format(&settings));

    let metrics_handle = match server_metrics::install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics will be empty");
            server_metrics::detached_handle()
        }
    };

    let config = args.server_config(&settings);
    let server = ConsultServer::new(config, metrics_handle);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!("Consult server listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_no_overrides() {
        let cli = Cli::parse_from(["consult-agent"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.settings.is_none());
        assert!(!cli.json_logs);
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["consult-agent", "--port", "8080"]);
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn cli_max_connections() {
        let cli = Cli::parse_from(["consult-agent", "--max-connections", "20"]);
        assert_eq!(cli.max_connections, Some(20));
    }

    #[test]
    fn settings_used_without_overrides() {
        let cli = Cli::parse_from(["consult-agent"]);
        let config = cli.server_config(&ConsultSettings::default());
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, ConsultSettings::default().server.host);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "consult-agent",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--max-connections",
            "3",
        ]);
        let config = cli.server_config(&ConsultSettings::default());
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn log_overrides() {
        let settings = ConsultSettings::default();
        let cli = Cli::parse_from(["consult-agent", "--log-level", "debug", "--json-logs"]);
        assert_eq!(cli.log_level(&settings), "debug");
        assert_eq!(cli.log_format(&settings), LogFormat::Json);

        let cli = Cli::parse_from(["consult-agent"]);
        assert_eq!(cli.log_level(&settings), settings.logging.level);
        assert_eq!(cli.log_format(&settings), LogFormat::Compact);
    }

    #[test]
    fn load_reads_explicit_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9100}}"#).unwrap();
        let cli = Cli::parse_from(["consult-agent", "--settings", path.to_str().unwrap()]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 9100);
    }

    #[test]
    fn load_fails_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let cli = Cli::parse_from(["consult-agent", "--settings", path.to_str().unwrap()]);
        assert!(load(&cli).is_err());
    }

    #[tokio::test]
    async fn server_serves_health_and_shuts_down() {
        let cli = Cli::parse_from(["consult-agent", "--host", "127.0.0.1", "--port", "0"]);
        let config = cli.server_config(&ConsultSettings::default());
        let server = ConsultServer::new(config, server_metrics::detached_handle());
        let (addr, handle) = server.listen().await.unwrap();

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("shutdown timed out")
            .expect("join error");
    }
}
