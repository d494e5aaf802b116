use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{error, info, instrument, warn};

use crate::config::SmsConfig;
use crate::db::{get_drill, get_drill_delivery, get_player, record_drill_delivery, update_delivery_status};
use crate::error::AppError;
use crate::models::{DrillDelivery, SmsStatus};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Anything that can deliver a text message to a phone number.
#[rocket::async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), AppError>;
}

#[derive(Debug, Serialize)]
struct TwilioMessage<'a> {
    #[serde(rename = "To")]
    to: &'a str,
    #[serde(rename = "From")]
    from: &'a str,
    #[serde(rename = "Body")]
    body: &'a str,
}

/// Client for the Twilio Messages API.
pub struct TwilioGateway {
    client: Client,
    config: SmsConfig,
}

impl TwilioGateway {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[rocket::async_trait]
impl SmsGateway for TwilioGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), AppError> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            TWILIO_API_BASE, self.config.account_sid
        );

        let payload = TwilioMessage {
            to,
            from: &self.config.from_number,
            body,
        };

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&payload)
            .send()
            .await
            .map_err(|e| AppError::DeliveryFailed(format!("Twilio request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AppError::DeliveryFailed(format!(
                "Twilio returned {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

/// The SMS collaborator as seen by routes. Holds no gateway when credentials
/// are missing, in which case every send reports `FeatureDisabled`.
#[derive(Clone)]
pub struct Messenger {
    gateway: Option<Arc<dyn SmsGateway>>,
}

impl Messenger {
    pub fn from_config(config: Option<&SmsConfig>) -> Self {
        match config {
            Some(config) => Self::with_gateway(Arc::new(TwilioGateway::new(config.clone()))),
            None => {
                warn!("SMS is not configured (missing Twilio credentials)");
                Self::disabled()
            }
        }
    }

    pub fn with_gateway(gateway: Arc<dyn SmsGateway>) -> Self {
        Self {
            gateway: Some(gateway),
        }
    }

    pub fn disabled() -> Self {
        Self { gateway: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    pub async fn send(&self, to: &str, body: &str) -> Result<(), AppError> {
        match &self.gateway {
            Some(gateway) => gateway.send(to, body).await,
            None => Err(AppError::FeatureDisabled(
                "SMS is not configured".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DrillSendOutcome {
    pub delivery: DrillDelivery,
    pub message: String,
}

/// Shares a drill with a player and, when asked, texts them about it. The
/// delivery is recorded whatever happens to the text; SMS problems end up in
/// the delivery's status instead of failing the call.
#[instrument(skip(pool, messenger))]
pub async fn send_drill(
    pool: &Pool<Sqlite>,
    messenger: &Messenger,
    instructor_id: i64,
    player_id: i64,
    drill_id: i64,
    text_also: bool,
) -> Result<DrillSendOutcome, AppError> {
    let player = get_player(pool, player_id).await?;
    let drill = get_drill(pool, drill_id).await?;

    let delivery_id = record_drill_delivery(pool, drill.id, player.id, instructor_id).await?;

    let (status, sms_error, message) = if !text_also {
        (SmsStatus::NotRequested, None, "Drill shared with player.".to_string())
    } else {
        match player.phone.as_deref() {
            None => (
                SmsStatus::NoPhone,
                None,
                "Drill shared with player. No phone on file, so no text was sent.".to_string(),
            ),
            Some(phone) => {
                let body = format!("Coach shared a drill: {}", drill.display_name());
                match messenger.send(phone, &body).await {
                    Ok(()) => (
                        SmsStatus::Sent,
                        None,
                        "Drill shared with player and texted.".to_string(),
                    ),
                    Err(AppError::FeatureDisabled(msg)) => {
                        info!("Skipping drill text: {}", msg);
                        (
                            SmsStatus::Disabled,
                            None,
                            "Drill shared with player. SMS is not configured.".to_string(),
                        )
                    }
                    Err(err) => {
                        error!(error = %err, delivery_id, "Drill text failed");
                        (
                            SmsStatus::Failed,
                            Some(err.to_string()),
                            "Drill shared with player, but the text failed.".to_string(),
                        )
                    }
                }
            }
        }
    };

    update_delivery_status(pool, delivery_id, status, sms_error.as_deref()).await?;
    let delivery = get_drill_delivery(pool, delivery_id).await?;

    Ok(DrillSendOutcome { delivery, message })
}

/// Free-form text to a player. Unlike `send_drill`, SMS errors are the result.
#[instrument(skip(pool, messenger, body))]
pub async fn text_player(
    pool: &Pool<Sqlite>,
    messenger: &Messenger,
    player_id: i64,
    body: &str,
) -> Result<(), AppError> {
    if !messenger.is_enabled() {
        return Err(AppError::FeatureDisabled("Twilio not configured.".to_string()));
    }

    let player = get_player(pool, player_id).await?;
    let phone = player
        .phone
        .as_deref()
        .ok_or_else(|| AppError::Validation("Player phone missing.".to_string()))?;

    messenger.send(phone, body).await?;
    info!("Text sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rocket::async_test]
    async fn disabled_messenger_reports_feature_disabled() {
        let messenger = Messenger::disabled();
        assert!(!messenger.is_enabled());

        let result = messenger.send("+15550001111", "hello").await;
        assert!(matches!(result, Err(AppError::FeatureDisabled(_))));
    }

    #[test]
    fn configured_messenger_is_enabled() {
        let messenger = Messenger::from_config(Some(&SmsConfig {
            account_sid: "AC123".to_string(),
            auth_token: "token".to_string(),
            from_number: "+15550000000".to_string(),
        }));
        assert!(messenger.is_enabled());
        assert!(!Messenger::from_config(None).is_enabled());
    }
}
