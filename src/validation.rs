use crate::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9]{7,15}$").unwrap());

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationResponse {
    pub status: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            errors,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(errors)
    }
}

impl From<&AppError> for ValidationResponse {
    fn from(error: &AppError) -> Self {
        let (field, message) = match error {
            AppError::Fields(errors) => return field_errors_to_response(errors),
            AppError::Database(_) | AppError::Storage(_) | AppError::Internal(_) => {
                ("server", "Internal server error".to_string())
            }
            AppError::Configuration(_) => ("server", "Server is misconfigured".to_string()),
            AppError::Unauthenticated => ("authentication", "Authentication required".to_string()),
            AppError::InvalidCredentials(msg) => ("credentials", msg.clone()),
            AppError::Forbidden(msg) => ("permission", format!("Permission denied: {}", msg)),
            AppError::FeatureDisabled(msg) => ("service", msg.clone()),
            AppError::DeliveryFailed(msg) => ("service", format!("Delivery failed: {}", msg)),
            AppError::NotFound(msg) => ("resource", format!("Not found: {}", msg)),
            AppError::Validation(msg) => ("request", msg.clone()),
        };

        ValidationResponse::with_error(field, &message)
    }
}

fn field_errors_to_response(errors: &validator::ValidationErrors) -> ValidationResponse {
    let mut error_map = HashMap::new();

    for (field, field_errors) in errors.field_errors() {
        let error_messages: Vec<String> = field_errors
            .iter()
            .map(|error| {
                error
                    .message
                    .clone()
                    .unwrap_or_else(|| "Invalid value".into())
                    .to_string()
            })
            .collect();

        error_map.insert(field.to_string(), error_messages);
    }

    ValidationResponse::new(error_map)
}

pub trait JsonValidateExt<T> {
    fn validate_payload(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_payload(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        inner.validate()?;
        Ok(inner)
    }
}

/// Strips common separators and checks the result looks like a dialable number.
/// Blank input means "no phone".
pub fn normalize_phone(raw: &str) -> Result<Option<String>, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let compact: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if PHONE_PATTERN.is_match(&compact) {
        Ok(Some(compact))
    } else {
        Err(AppError::Validation(format!(
            "'{}' is not a valid phone number",
            trimmed
        )))
    }
}

/// Ages a player may be registered with.
pub const MAX_PLAYER_AGE: i64 = 120;

pub fn check_age(age: i64) -> Result<i64, AppError> {
    if (1..=MAX_PLAYER_AGE).contains(&age) {
        Ok(age)
    } else {
        Err(AppError::Validation(format!(
            "Age must be between 1 and {}",
            MAX_PLAYER_AGE
        )))
    }
}

/// Parses a free-text age. Blank means no age; anything else must be an
/// integer inside the allowed range.
pub fn parse_age(raw: Option<&str>) -> Result<Option<i64>, AppError> {
    let raw = match raw.map(str::trim).filter(|a| !a.is_empty()) {
        Some(raw) => raw,
        None => return Ok(None),
    };

    match raw.parse::<i64>() {
        Ok(age) if check_age(age).is_ok() => Ok(Some(age)),
        _ => Err(AppError::Validation(format!("invalid age '{}'", raw))),
    }
}
