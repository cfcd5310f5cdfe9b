//! AutoPilot configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AutopilotError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub deliverability: DeliverabilityConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

fn default_database_path() -> String { "~/.autopilot/autopilot.db".into() }

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            gateway: GatewayConfig::default(),
            secrets: SecretsConfig::default(),
            workflow: WorkflowConfig::default(),
            scheduler: SchedulerConfig::default(),
            deliverability: DeliverabilityConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl AutopilotConfig {
    /// Load config from the default path (~/.autopilot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load config from a specific path, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutopilotError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AutopilotError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config.with_env_overrides())
    }

    /// Save config to a path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AutopilotError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the AutoPilot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autopilot")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// Secrets from the environment win over the file.
    pub fn with_env_overrides(mut self) -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        if let Some(v) = env("AUTOPILOT_CRON_SECRET") {
            self.secrets.cron_secret = v;
        }
        if let Some(v) = env("AUTOPILOT_DISPATCH_SECRET") {
            self.secrets.dispatch_secret = v;
        }
        if let Some(v) = env("AUTOPILOT_EMAIL_WEBHOOK_SECRET") {
            self.secrets.email_webhook_secret = v;
        }
        if let Some(v) = env("AUTOPILOT_WORKFLOW_TOKEN") {
            self.workflow.auth_token = v;
        }
        self
    }
}

/// Gateway (HTTP server) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_port() -> u16 { 3000 }
fn default_host() -> String { "127.0.0.1".into() }
fn default_request_timeout() -> u64 { 30 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Static pre-shared credentials for system-to-system calls.
/// An empty value means "not configured"; the matching endpoint refuses
/// every call until it is set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// Bearer token the external timer presents to the tick endpoint.
    #[serde(default)]
    pub cron_secret: String,
    /// Bearer token the workflow engine presents to the dispatch gateway.
    #[serde(default)]
    pub dispatch_secret: String,
    /// Signing secret for delivery-event webhooks (`whsec_...`).
    #[serde(default)]
    pub email_webhook_secret: String,
}

/// Workflow engine (actuator) endpoints, one per action kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub post_url: String,
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub outreach_url: String,
    /// Optional bearer token sent to the workflow engine.
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_workflow_timeout")]
    pub timeout_secs: u64,
}

fn default_workflow_timeout() -> u64 { 15 }

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            post_url: String::new(),
            video_url: String::new(),
            outreach_url: String::new(),
            auth_token: String::new(),
            timeout_secs: default_workflow_timeout(),
        }
    }
}

/// In-process scheduler loop. Off by default; most deployments hit the
/// tick endpoint from an external cron instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 { 900 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval(),
        }
    }
}

/// Deliverability safety thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverabilityConfig {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// Pause when bounced / sent exceeds this ratio.
    #[serde(default = "default_bounce_threshold")]
    pub bounce_threshold: f64,
    /// Pause when complained / sent exceeds this ratio.
    #[serde(default = "default_complaint_threshold")]
    pub complaint_threshold: f64,
    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance_secs: i64,
}

fn default_window_days() -> i64 { 30 }
fn default_bounce_threshold() -> f64 { 0.10 }
fn default_complaint_threshold() -> f64 { 0.001 }
fn default_signature_tolerance() -> i64 { 300 }

impl Default for DeliverabilityConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            bounce_threshold: default_bounce_threshold(),
            complaint_threshold: default_complaint_threshold(),
            signature_tolerance_secs: default_signature_tolerance(),
        }
    }
}

/// Activity ledger paging and resend rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_resend_limit")]
    pub resend_limit: i64,
    #[serde(default = "default_resend_window")]
    pub resend_window_secs: i64,
}

fn default_page_size() -> usize { 50 }
fn default_resend_limit() -> i64 { 3 }
fn default_resend_window() -> i64 { 3600 }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            resend_limit: default_resend_limit(),
            resend_window_secs: default_resend_window(),
        }
    }
}
