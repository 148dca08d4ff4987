// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layered configuration: built-in defaults, an optional TOML file,
//! `DRAIN_*` environment variables, then explicit CLI flags — each layer
//! overriding the last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use drain_core::BackoffSchedule;
use drain_engine::SelectionMode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    pub tracker_command: String,
    pub agent_command: String,
    pub poll_interval: Duration,
    pub tracker_timeout: Duration,
    pub tracker_show_timeout: Duration,
    pub agent_timeout: Duration,
    pub backoff: BackoffSchedule,
    pub max_failures: u32,
    pub selection_mode: SelectionMode,
    pub epic: Option<String>,
    pub eager_switch: bool,
    pub prompt_template_path: Option<PathBuf>,
    pub follow_up_template_path: Option<PathBuf>,
    pub event_log_path: PathBuf,
    pub state_file_path: PathBuf,
    /// Opaque — handed to whatever control-socket collaborator is wired
    /// in, never parsed here.
    pub socket_path: PathBuf,
    pub log_filter: String,
}

impl Default for DrainConfig {
    fn default() -> Self {
        let state_dir = default_state_dir();
        Self {
            tracker_command: "br".into(),
            agent_command: "claude".into(),
            poll_interval: Duration::from_secs(10),
            tracker_timeout: Duration::from_secs(30),
            tracker_show_timeout: Duration::from_secs(5),
            agent_timeout: Duration::from_secs(60 * 60),
            backoff: BackoffSchedule::default(),
            max_failures: drain_core::DEFAULT_MAX_FAILURES,
            selection_mode: SelectionMode::Global,
            epic: None,
            eager_switch: false,
            prompt_template_path: None,
            follow_up_template_path: None,
            event_log_path: state_dir.join("events.jsonl"),
            state_file_path: state_dir.join("state.json"),
            socket_path: state_dir.join("drain.sock"),
            log_filter: "info".into(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DRAIN_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("drain");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".local/state/drain")
}

/// All-optional mirror of [`DrainConfig`] for the TOML file layer.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileConfig {
    tracker_command: Option<String>,
    agent_command: Option<String>,
    poll_interval_secs: Option<u64>,
    tracker_timeout_secs: Option<u64>,
    tracker_show_timeout_secs: Option<u64>,
    agent_timeout_secs: Option<u64>,
    backoff_initial_secs: Option<u64>,
    backoff_multiplier: Option<f64>,
    backoff_max_secs: Option<u64>,
    max_failures: Option<u32>,
    selection_mode: Option<String>,
    epic: Option<String>,
    eager_switch: Option<bool>,
    prompt_template_path: Option<PathBuf>,
    follow_up_template_path: Option<PathBuf>,
    event_log_path: Option<PathBuf>,
    state_file_path: Option<PathBuf>,
    socket_path: Option<PathBuf>,
    log_filter: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply(self, cfg: &mut DrainConfig) {
        if let Some(v) = self.tracker_command {
            cfg.tracker_command = v;
        }
        if let Some(v) = self.agent_command {
            cfg.agent_command = v;
        }
        if let Some(v) = self.poll_interval_secs {
            cfg.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.tracker_timeout_secs {
            cfg.tracker_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.tracker_show_timeout_secs {
            cfg.tracker_show_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.agent_timeout_secs {
            cfg.agent_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.backoff_initial_secs {
            cfg.backoff.initial = Duration::from_secs(v);
        }
        if let Some(v) = self.backoff_multiplier {
            cfg.backoff.multiplier = v;
        }
        if let Some(v) = self.backoff_max_secs {
            cfg.backoff.max = Duration::from_secs(v);
        }
        if let Some(v) = self.max_failures {
            cfg.max_failures = v;
        }
        if let Some(v) = self.selection_mode {
            if let Some(mode) = parse_selection_mode(&v) {
                cfg.selection_mode = mode;
            }
        }
        if let Some(v) = self.epic {
            cfg.epic = Some(v);
        }
        if let Some(v) = self.eager_switch {
            cfg.eager_switch = v;
        }
        if let Some(v) = self.prompt_template_path {
            cfg.prompt_template_path = Some(v);
        }
        if let Some(v) = self.follow_up_template_path {
            cfg.follow_up_template_path = Some(v);
        }
        if let Some(v) = self.event_log_path {
            cfg.event_log_path = v;
        }
        if let Some(v) = self.state_file_path {
            cfg.state_file_path = v;
        }
        if let Some(v) = self.socket_path {
            cfg.socket_path = v;
        }
        if let Some(v) = self.log_filter {
            cfg.log_filter = v;
        }
    }
}

fn parse_selection_mode(s: &str) -> Option<SelectionMode> {
    match s {
        "global" => Some(SelectionMode::Global),
        "top-level" | "top_level" => Some(SelectionMode::TopLevel),
        _ => None,
    }
}

fn apply_env(cfg: &mut DrainConfig) {
    if let Ok(v) = std::env::var("DRAIN_TRACKER_COMMAND") {
        cfg.tracker_command = v;
    }
    if let Ok(v) = std::env::var("DRAIN_AGENT_COMMAND") {
        cfg.agent_command = v;
    }
    if let Some(v) = env_u64("DRAIN_POLL_INTERVAL_SECS") {
        cfg.poll_interval = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("DRAIN_TRACKER_TIMEOUT_SECS") {
        cfg.tracker_timeout = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("DRAIN_TRACKER_SHOW_TIMEOUT_SECS") {
        cfg.tracker_show_timeout = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("DRAIN_AGENT_TIMEOUT_SECS") {
        cfg.agent_timeout = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("DRAIN_BACKOFF_INITIAL_SECS") {
        cfg.backoff.initial = Duration::from_secs(v);
    }
    if let Ok(v) = std::env::var("DRAIN_BACKOFF_MULTIPLIER") {
        if let Ok(v) = v.parse() {
            cfg.backoff.multiplier = v;
        }
    }
    if let Some(v) = env_u64("DRAIN_BACKOFF_MAX_SECS") {
        cfg.backoff.max = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("DRAIN_MAX_FAILURES") {
        cfg.max_failures = v as u32;
    }
    if let Ok(v) = std::env::var("DRAIN_SELECTION_MODE") {
        if let Some(mode) = parse_selection_mode(&v) {
            cfg.selection_mode = mode;
        }
    }
    if let Ok(v) = std::env::var("DRAIN_EPIC") {
        cfg.epic = Some(v);
    }
    if let Ok(v) = std::env::var("DRAIN_EAGER_SWITCH") {
        cfg.eager_switch = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("DRAIN_PROMPT_TEMPLATE_PATH") {
        cfg.prompt_template_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("DRAIN_FOLLOW_UP_TEMPLATE_PATH") {
        cfg.follow_up_template_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("DRAIN_EVENT_LOG_PATH") {
        cfg.event_log_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("DRAIN_STATE_FILE_PATH") {
        cfg.state_file_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("DRAIN_SOCKET_PATH") {
        cfg.socket_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("DRAIN_LOG") {
        cfg.log_filter = v;
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Command-line overrides. Every field is optional so an absent flag never
/// clobbers a value already set by the file or env layers.
#[derive(Debug, Parser, Default)]
#[command(name = "draind", about = "Drain-loop orchestration daemon")]
pub struct Cli {
    /// Path to a TOML config file, applied before env vars and flags.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub tracker_command: Option<String>,
    #[arg(long)]
    pub agent_command: Option<String>,
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
    #[arg(long)]
    pub max_failures: Option<u32>,
    #[arg(long)]
    pub selection_mode: Option<String>,
    #[arg(long)]
    pub epic: Option<String>,
    #[arg(long)]
    pub eager_switch: bool,
    #[arg(long)]
    pub prompt_template_path: Option<PathBuf>,
    #[arg(long)]
    pub event_log_path: Option<PathBuf>,
    #[arg(long)]
    pub state_file_path: Option<PathBuf>,
    #[arg(long)]
    pub socket_path: Option<PathBuf>,
}

impl Cli {
    fn apply(self, cfg: &mut DrainConfig) {
        if let Some(v) = self.tracker_command {
            cfg.tracker_command = v;
        }
        if let Some(v) = self.agent_command {
            cfg.agent_command = v;
        }
        if let Some(v) = self.poll_interval_secs {
            cfg.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.max_failures {
            cfg.max_failures = v;
        }
        if let Some(v) = self.selection_mode {
            if let Some(mode) = parse_selection_mode(&v) {
                cfg.selection_mode = mode;
            }
        }
        if let Some(v) = self.epic {
            cfg.epic = Some(v);
        }
        if self.eager_switch {
            cfg.eager_switch = true;
        }
        if let Some(v) = self.prompt_template_path {
            cfg.prompt_template_path = Some(v);
        }
        if let Some(v) = self.event_log_path {
            cfg.event_log_path = v;
        }
        if let Some(v) = self.state_file_path {
            cfg.state_file_path = v;
        }
        if let Some(v) = self.socket_path {
            cfg.socket_path = v;
        }
    }
}

impl DrainConfig {
    /// Builds the layered config: defaults, then an optional TOML file
    /// (`--config`, or `DRAIN_CONFIG` if no flag is given), then `DRAIN_*`
    /// env vars, then `cli`.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let mut cfg = DrainConfig::default();

        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("DRAIN_CONFIG").ok().map(PathBuf::from));
        if let Some(path) = config_path {
            if path.exists() {
                FileConfig::load(&path)?.apply(&mut cfg);
            }
        }

        apply_env(&mut cfg);
        cli.apply(&mut cfg);
        Ok(cfg)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
