//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::fetcher::DEFAULT_FETCH_TIMEOUT_SECS;
use crate::intake::DEFAULT_MAX_UPLOAD_BYTES;
use crate::pdf_service::DEFAULT_RENDER_TIMEOUT_SECS;
use crate::quota::{QuotaConfig, DEFAULT_DAILY_LIMIT, DEFAULT_HOURLY_LIMIT};

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token
    pub telegram_token: String,

    /// Endpoint of the markdown-to-PDF service
    pub pdf_service_url: String,

    /// Timeout for the PDF service call
    pub pdf_timeout_secs: u64,

    /// Timeout for fetching remote markdown
    pub fetch_timeout_secs: u64,

    /// Free-tier limits
    pub quota: QuotaConfig,

    /// Periodic usage-log backups
    pub auto_backup: bool,
    pub backup_interval_hours: u64,
    pub backup_keep: usize,

    /// Users allowed to run admin commands
    pub admin_ids: Vec<i64>,

    /// Users granted premium at startup
    pub premium_ids: Vec<i64>,

    /// SQLite usage log
    pub usage_db_path: PathBuf,

    /// Directory for usage-log backups
    pub backup_dir: PathBuf,

    /// Upload and remote-content size limit
    pub max_upload_bytes: u64,

    /// Sessions idle longer than this are dropped
    pub session_idle_hours: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let telegram_token =
            std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

        let pdf_service_url = std::env::var("PDF_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8000/convert".to_string());

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mdpdf-bot");

        let usage_db_path = std::env::var("USAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("usage.db"));

        let backup_dir = std::env::var("BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("backups"));

        Ok(Self {
            telegram_token,
            pdf_service_url,
            pdf_timeout_secs: env_parse("PDF_SERVICE_TIMEOUT_SECS", DEFAULT_RENDER_TIMEOUT_SECS),
            fetch_timeout_secs: env_parse("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS),
            quota: QuotaConfig {
                daily_limit: env_parse("DAILY_LIMIT", DEFAULT_DAILY_LIMIT),
                hourly_limit: env_parse("HOURLY_LIMIT", DEFAULT_HOURLY_LIMIT),
            },
            auto_backup: env_bool("AUTO_BACKUP_ENABLED", true),
            backup_interval_hours: env_parse("BACKUP_INTERVAL_HOURS", 24u64).max(1),
            backup_keep: env_parse("BACKUP_KEEP", 7usize).max(1),
            admin_ids: parse_id_list(&std::env::var("ADMIN_USER_IDS").unwrap_or_default()),
            premium_ids: parse_id_list(&std::env::var("PREMIUM_USER_IDS").unwrap_or_default()),
            usage_db_path,
            backup_dir,
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            session_idle_hours: env_parse("SESSION_IDLE_HOURS", 24u64).max(1),
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_hours * 3600)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_hours * 3600)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

/// Parse a comma-separated list of user ids, skipping junk
pub fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("1, 2,3"), vec![1, 2, 3]);
        assert_eq!(parse_id_list(""), Vec::<i64>::new());
        assert_eq!(parse_id_list("12,abc, -5"), vec![12, -5]);
    }

    #[test]
    fn test_env_parse_falls_back() {
        std::env::set_var("MDPDF_TEST_BAD_NUMBER", "lots");
        assert_eq!(env_parse("MDPDF_TEST_BAD_NUMBER", 15u32), 15);
        std::env::set_var("MDPDF_TEST_GOOD_NUMBER", " 4 ");
        assert_eq!(env_parse("MDPDF_TEST_GOOD_NUMBER", 15u32), 4);
        assert_eq!(env_parse("MDPDF_TEST_MISSING", 3u32), 3);
    }

    #[test]
    fn test_env_bool() {
        std::env::set_var("MDPDF_TEST_FLAG_OFF", "false");
        assert!(!env_bool("MDPDF_TEST_FLAG_OFF", true));
        std::env::set_var("MDPDF_TEST_FLAG_ON", "1");
        assert!(env_bool("MDPDF_TEST_FLAG_ON", false));
        assert!(env_bool("MDPDF_TEST_FLAG_MISSING", true));
    }
}
