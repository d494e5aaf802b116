use std::path::PathBuf;

use chrono::Duration;
use tracing::{info, warn};

use crate::error::AppError;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://app.db?mode=rwc";
pub const DEFAULT_MASTER_CODE: &str = "COACH123";
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 12;
pub const DEFAULT_UPLOAD_DIR: &str = "static";

#[derive(Clone, PartialEq, Eq)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

impl std::fmt::Debug for SmsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("from_number", &self.from_number)
            .finish()
    }
}

/// Everything the server needs at startup. Built once and handed to Rocket as
/// managed state.
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub session_secret: Option<String>,
    pub master_code: String,
    pub session_ttl: Duration,
    pub upload_dir: PathBuf,
    pub sms: Option<SmsConfig>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field("session_secret", &self.session_secret.as_ref().map(|_| "<redacted>"))
            .field("master_code", &"<redacted>")
            .field("session_ttl", &self.session_ttl)
            .field("upload_dir", &self.upload_dir)
            .field("sms", &self.sms)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let session_ttl = match non_empty("SESSION_TTL_HOURS") {
            Some(raw) => {
                let hours: i64 = raw.parse().map_err(|_| {
                    AppError::Configuration(format!("SESSION_TTL_HOURS must be an integer, got '{}'", raw))
                })?;
                if hours <= 0 {
                    return Err(AppError::Configuration(
                        "SESSION_TTL_HOURS must be positive".to_string(),
                    ));
                }
                Duration::hours(hours)
            }
            None => Duration::hours(DEFAULT_SESSION_TTL_HOURS),
        };

        let sms = match (
            non_empty("TWILIO_ACCOUNT_SID"),
            non_empty("TWILIO_AUTH_TOKEN"),
            non_empty("TWILIO_FROM"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(SmsConfig {
                account_sid,
                auth_token,
                from_number,
            }),
            (None, None, None) => None,
            _ => {
                warn!("Twilio is partially configured; SMS features stay disabled");
                None
            }
        };

        let config = Self {
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            session_secret: non_empty("SESSION_SECRET"),
            master_code: non_empty("INSTRUCTOR_MASTER_CODE")
                .unwrap_or_else(|| DEFAULT_MASTER_CODE.to_string()),
            session_ttl,
            upload_dir: non_empty("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            sms,
        };

        info!(
            sms_enabled = config.sms.is_some(),
            upload_dir = %config.upload_dir.display(),
            "Loaded configuration"
        );

        Ok(config)
    }

    pub fn session_secret(&self) -> Result<&str, AppError> {
        self.session_secret.as_deref().ok_or_else(|| {
            AppError::Configuration("SESSION_SECRET is not set".to_string())
        })
    }

    pub fn sms_enabled(&self) -> bool {
        self.sms.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.master_code, "COACH123");
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.session_ttl, Duration::hours(12));
        assert!(config.sms.is_none());
        assert!(matches!(
            config.session_secret(),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn sms_needs_all_three_credentials() {
        let partial = AppConfig::from_lookup(lookup_from(&[
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "secret"),
        ]))
        .unwrap();
        assert!(!partial.sms_enabled());

        let full = AppConfig::from_lookup(lookup_from(&[
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "secret"),
            ("TWILIO_FROM", "+15550000000"),
        ]))
        .unwrap();
        assert_eq!(
            full.sms,
            Some(SmsConfig {
                account_sid: "AC123".to_string(),
                auth_token: "secret".to_string(),
                from_number: "+15550000000".to_string(),
            })
        );
    }

    #[test]
    fn invalid_ttl_is_a_configuration_error() {
        let result = AppConfig::from_lookup(lookup_from(&[("SESSION_TTL_HOURS", "soon")]));
        assert!(matches!(result, Err(AppError::Configuration(_))));

        let result = AppConfig::from_lookup(lookup_from(&[("SESSION_TTL_HOURS", "0")]));
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("SESSION_SECRET", "super-secret-value"),
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "twilio-token"),
            ("TWILIO_FROM", "+15550000000"),
        ]))
        .unwrap();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-value"));
        assert!(!rendered.contains("twilio-token"));
        assert!(!rendered.contains("COACH123"));
    }

    #[test]
    #[serial]
    fn reads_process_environment() {
        temp_env::with_vars(
            [
                ("SESSION_SECRET", Some("abc")),
                ("INSTRUCTOR_MASTER_CODE", Some("LETMEIN")),
                ("UPLOAD_DIR", Some("/tmp/uploads")),
                ("TWILIO_ACCOUNT_SID", None),
                ("TWILIO_AUTH_TOKEN", None),
                ("TWILIO_FROM", None),
            ],
            || {
                let config = AppConfig::from_env().unwrap();
                assert_eq!(config.session_secret().unwrap(), "abc");
                assert_eq!(config.master_code, "LETMEIN");
                assert_eq!(config.upload_dir, PathBuf::from("/tmp/uploads"));
                assert!(!config.sms_enabled());
            },
        );
    }
}
