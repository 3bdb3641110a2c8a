//! Layered configuration: `config/default.toml`, an optional
//! `config/local.toml` on top, then `APP_`-prefixed environment variables on
//! top of that. The teacher hardcodes its port and file paths as `const`s in
//! `main.rs`; this generalizes the same handful of knobs into one struct
//! that a real deployment can override without a rebuild.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_database_path() -> String {
    "database.sqlite".to_string()
}
fn default_content_root() -> String {
    "content".to_string()
}
fn default_jwt_expiry_hours() -> i64 {
    24
}
fn default_channel_read_timeout_secs() -> u64 {
    60
}
fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_stuck_active_threshold_mins() -> i64 {
    15
}
fn default_stuck_pending_threshold_mins() -> i64 {
    2
}
fn default_rejected_gc_threshold_mins() -> i64 {
    30
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiry_hours")]
    pub jwt_expiry_hours: i64,
    #[serde(default = "default_content_root")]
    pub content_root: String,
    #[serde(default)]
    pub strict_origin_check: bool,
    #[serde(default = "default_channel_read_timeout_secs")]
    pub channel_read_timeout_secs: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_stuck_active_threshold_mins")]
    pub stuck_active_threshold_mins: i64,
    #[serde(default = "default_stuck_pending_threshold_mins")]
    pub stuck_pending_threshold_mins: i64,
    #[serde(default = "default_rejected_gc_threshold_mins")]
    pub rejected_gc_threshold_mins: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
            jwt_secret: String::new(),
            jwt_expiry_hours: default_jwt_expiry_hours(),
            content_root: default_content_root(),
            strict_origin_check: false,
            channel_read_timeout_secs: default_channel_read_timeout_secs(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            stuck_active_threshold_mins: default_stuck_active_threshold_mins(),
            stuck_pending_threshold_mins: default_stuck_pending_threshold_mins(),
            rejected_gc_threshold_mins: default_rejected_gc_threshold_mins(),
        }
    }
}

// Hand-rolled so the secret never ends up in a log line via `{:?}`.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_expiry_hours", &self.jwt_expiry_hours)
            .field("content_root", &self.content_root)
            .field("strict_origin_check", &self.strict_origin_check)
            .field("channel_read_timeout_secs", &self.channel_read_timeout_secs)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("stuck_active_threshold_mins", &self.stuck_active_threshold_mins)
            .field("stuck_pending_threshold_mins", &self.stuck_pending_threshold_mins)
            .field("rejected_gc_threshold_mins", &self.rejected_gc_threshold_mins)
            .finish()
    }
}

impl ServerConfig {
    /// Loads `default.toml`, layers `local.toml` over it if present, then
    /// layers `APP_*` environment variables over that.
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let mut value = toml_value_from_file(&config_dir.join("default.toml"))?;

        let local = config_dir.join("local.toml");
        if local.exists() {
            merge_toml(&mut value, toml_value_from_file(&local)?);
        }

        let mut config: ServerConfig = value.try_into().unwrap_or_default();
        config.apply_env_overrides();

        if config.jwt_secret.is_empty() {
            anyhow::bail!("jwt_secret must be set via config/local.toml or APP_JWT_SECRET");
        }
        Ok(config)
    }

    /// `APP_*` environment variables take precedence over any file value.
    /// Kept as explicit typed parses rather than merging into the TOML tree,
    /// since env vars arrive as strings and the struct's fields are not.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("APP_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("APP_DATABASE_PATH") {
            self.database_path = v;
        }
        if let Ok(v) = std::env::var("APP_JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("APP_JWT_EXPIRY_HOURS").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.jwt_expiry_hours = v;
        }
        if let Ok(v) = std::env::var("APP_CONTENT_ROOT") {
            self.content_root = v;
        }
        if let Ok(v) = std::env::var("APP_STRICT_ORIGIN_CHECK").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.strict_origin_check = v;
        }
    }

    pub fn frames_dir(&self, video_id: uuid::Uuid) -> PathBuf {
        PathBuf::from(&self.content_root)
            .join("session_videos")
            .join(video_id.to_string())
            .join("frames")
    }

    pub fn legacy_video_path(&self, video_id: uuid::Uuid) -> PathBuf {
        PathBuf::from(&self.content_root)
            .join("session_videos")
            .join(video_id.to_string())
            .join("legacy.mp4")
    }

    pub fn transfer_upload_dir(&self, session_id: uuid::Uuid) -> PathBuf {
        PathBuf::from(&self.content_root)
            .join("file_transfers")
            .join(session_id.to_string())
    }
}

fn toml_value_from_file(path: &Path) -> anyhow::Result<toml::Value> {
    if !path.exists() {
        return Ok(toml::Value::Table(Default::default()));
    }
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (k, v) in overlay_table {
                match base_table.get_mut(&k) {
                    Some(existing) => merge_toml(existing, v),
                    None => {
                        base_table.insert(k, v);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

