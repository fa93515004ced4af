//! Engine configuration
//!
//! Every field has a default matching the production plant. `from_env` reads
//! overrides from `WASTE_*` environment variables.
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory application code for request approval grants.
    pub approval_application: String,
    /// Directory application code for event signing grants.
    pub signing_application: String,
    /// Safety (HSE) department. Owns the safety side of field verification
    /// and the event creation privilege.
    pub safety_department: String,
    pub approval_final_department: String,
    pub signing_hse_department: String,
    pub signing_final_department: String,
    pub performer_job_level: u8,
    pub supervisor_job_levels: Vec<u8>,
    pub directory_ttl: Duration,
    pub directory_timeout: Duration,
    pub directory_cache_capacity: usize,
    pub numbering_utc_offset_hours: i32,
    pub pending_signature_age_days: i64,
    pub test_bypass_enabled: bool,
    pub test_bypass_token: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approval_application: "ePengelolaan_Limbah".to_string(),
            signing_application: "ePengelolaan_Limbah_Berita_Acara".to_string(),
            safety_department: "KL".to_string(),
            approval_final_department: "KL".to_string(),
            signing_hse_department: "KL".to_string(),
            signing_final_department: "PL".to_string(),
            performer_job_level: 7,
            supervisor_job_levels: vec![5, 6],
            directory_ttl: Duration::from_secs(5 * 60),
            directory_timeout: Duration::from_secs(5),
            directory_cache_capacity: 512,
            numbering_utc_offset_hours: 7,
            pending_signature_age_days: 7,
            test_bypass_enabled: false,
            test_bypass_token: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Missing keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("WASTE_APPROVAL_APPLICATION") {
            config.approval_application = v;
        }
        if let Some(v) = get("WASTE_SIGNING_APPLICATION") {
            config.signing_application = v;
        }
        if let Some(v) = get("WASTE_SAFETY_DEPARTMENT") {
            config.safety_department = v.to_uppercase();
        }
        if let Some(v) = get("WASTE_APPROVAL_FINAL_DEPARTMENT") {
            config.approval_final_department = v.to_uppercase();
        }
        if let Some(v) = get("WASTE_SIGNING_HSE_DEPARTMENT") {
            config.signing_hse_department = v.to_uppercase();
        }
        if let Some(v) = get("WASTE_SIGNING_FINAL_DEPARTMENT") {
            config.signing_final_department = v.to_uppercase();
        }
        if let Some(v) = get("WASTE_PERFORMER_JOB_LEVEL") {
            config.performer_job_level = parse("WASTE_PERFORMER_JOB_LEVEL", &v)?;
        }
        if let Some(v) = get("WASTE_SUPERVISOR_JOB_LEVELS") {
            config.supervisor_job_levels = v
                .split(',')
                .map(|part| parse("WASTE_SUPERVISOR_JOB_LEVELS", part.trim()))
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = get("WASTE_DIRECTORY_TTL_SECS") {
            config.directory_ttl = Duration::from_secs(parse("WASTE_DIRECTORY_TTL_SECS", &v)?);
        }
        if let Some(v) = get("WASTE_DIRECTORY_TIMEOUT_MS") {
            config.directory_timeout = Duration::from_millis(parse("WASTE_DIRECTORY_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("WASTE_DIRECTORY_CACHE_CAPACITY") {
            config.directory_cache_capacity = parse("WASTE_DIRECTORY_CACHE_CAPACITY", &v)?;
        }
        if let Some(v) = get("WASTE_NUMBERING_UTC_OFFSET_HOURS") {
            let hours: i32 = parse("WASTE_NUMBERING_UTC_OFFSET_HOURS", &v)?;
            if !(-23..=23).contains(&hours) {
                return Err(ConfigError::InvalidValue {
                    key: "WASTE_NUMBERING_UTC_OFFSET_HOURS",
                    value: v,
                });
            }
            config.numbering_utc_offset_hours = hours;
        }
        if let Some(v) = get("WASTE_PENDING_SIGNATURE_AGE_DAYS") {
            config.pending_signature_age_days = parse("WASTE_PENDING_SIGNATURE_AGE_DAYS", &v)?;
        }
        if let Some(v) = get("WASTE_TEST_BYPASS_VERIFICATION") {
            config.test_bypass_enabled = parse_flag("WASTE_TEST_BYPASS_VERIFICATION", &v)?;
        }
        config.test_bypass_token = get("WASTE_TEST_BYPASS_TOKEN");

        Ok(config)
    }

    /// Offset used for the month and year in request numbers.
    pub fn numbering_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.numbering_utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
