//! CLI argument definitions for the Folio server.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::{Path, PathBuf};

use folio_core::config::FolioConfig;

/// Folio - admission and authorization front for the sheet-music service.
#[derive(Parser, Debug)]
#[command(name = "folio", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Address to bind.
    #[arg(short = 'b', long = "bind")]
    pub bind: Option<String>,

    /// Data directory for the SQLite database and the generated signing secret.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Priority: --config flag > FOLIO_CONFIG env var > ~/.folio/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("FOLIO_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --port flag > FOLIO_PORT env var > config file value > 3030.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("FOLIO_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        3030
    }

    pub fn resolve_bind(&self, config_bind: &str) -> String {
        self.bind
            .clone()
            .unwrap_or_else(|| config_bind.to_string())
    }

    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    /// Load the config file and apply flag and env overrides on top.
    pub fn load_config(&self) -> (PathBuf, FolioConfig) {
        let path = self.resolve_config_path();
        let mut config = FolioConfig::load_or_default(&path);
        if let Some(level) = self.resolve_log_level() {
            config.general.log_level = level;
        }
        if let Some(dir) = self.resolve_data_dir() {
            config.general.data_dir = dir;
        }
        config.general.port = self.resolve_port(config.general.port);
        config.general.bind = self.resolve_bind(&config.general.bind);
        (path, config)
    }
}

/// Priority: FOLIO_SIGNING_SECRET env var > config file value.
/// `None` means a secret should be generated and persisted.
pub fn resolve_signing_secret(config_secret: Option<&str>) -> Option<String> {
    std::env::var("FOLIO_SIGNING_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| config_secret.filter(|s| !s.is_empty()).map(str::to_string))
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            Path::new(&home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".folio").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "folio",
            "--config",
            "/etc/folio.toml",
            "-p",
            "8080",
            "--bind",
            "0.0.0.0",
            "-l",
            "debug",
        ]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/folio.toml"));
        assert_eq!(args.resolve_port(3030), 8080);
        assert_eq!(args.resolve_bind("127.0.0.1"), "0.0.0.0");
        assert_eq!(args.resolve_log_level().as_deref(), Some("debug"));
        assert_eq!(args.resolve_data_dir(), None);
    }

    #[test]
    fn test_bind_falls_back_to_config() {
        let args = CliArgs::parse_from(["folio"]);
        assert_eq!(args.resolve_bind("10.1.2.3"), "10.1.2.3");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/lib/folio"), PathBuf::from("/var/lib/folio"));
        assert!(expand_home("~/data").ends_with("data"));
        assert!(!expand_home("~/data").starts_with("~"));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[general]
bind = "10.0.0.5"
port = 4040
log_level = "warn"
data_dir = "/srv/folio"

[rate_limit]
max_requests_per_window = 7.5
"#,
        );

        let args = CliArgs::parse_from([
            "folio",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9090",
            "--log-level",
            "debug",
        ]);
        let (resolved, config) = args.load_config();

        assert_eq!(resolved, path);
        assert_eq!(config.general.port, 9090);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.bind, "10.0.0.5");
        assert_eq!(config.general.data_dir, "/srv/folio");
        assert_eq!(config.rate_limit.max_requests_per_window, 7.5);
    }

    #[test]
    fn test_invalid_config_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[rate_limit]\nmax_requests_per_window = -1.0\n");

        let args = CliArgs::parse_from(["folio", "-c", path.to_str().unwrap(), "-p", "3100"]);
        let (_, config) = args.load_config();

        let defaults = FolioConfig::default();
        assert_eq!(
            config.rate_limit.max_requests_per_window,
            defaults.rate_limit.max_requests_per_window
        );
        assert_eq!(config.general.bind, defaults.general.bind);
        assert_eq!(config.general.port, 3100);
    }
}
