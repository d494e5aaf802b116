#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod db;
mod env;
mod error;
mod import;
mod models;
mod sms;
mod storage;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use api::{
    api_add_metric, api_add_note, api_create_instructor, api_create_player, api_dashboard,
    api_delete_player, api_get_chart, api_get_drills, api_get_player, api_get_theme,
    api_import_players, api_login_instructor, api_login_player, api_logout, api_me,
    api_my_clients, api_roster, api_send_drill, api_set_note_shared, api_text_player,
    api_toggle_favorite, api_toggle_theme, api_upload_drill, api_upload_photo, health,
    uploaded_file,
};
use auth::{
    bad_request_api, forbidden_api, not_found_api, unauthorized_api, unprocessable_api,
};
use config::AppConfig;
use db::{clean_expired_sessions, ensure_master_instructor};
use error::AppError;
use rocket::data::{Limits, ToByteUnit};
use rocket::{Build, Config, Rocket, tokio};
use sms::Messenger;
use sqlx::SqlitePool;
use storage::UploadStore;
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;
use tracing::{error, info};

const SESSION_PURGE_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("Rocket error: {0}")]
    Rocket(Box<rocket::Error>),
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    // Env files must be loaded before the subscriber reads RUST_LOG.
    let loaded = env::load_environment()?;
    let _otel_guard = init_tracing();
    info!(profile = ?loaded.profile, files = ?loaded.files, "Environment loaded");

    let config = AppConfig::from_env()?;
    // Refuse to start without a key for the session cookies.
    config.session_secret()?;

    let pool = SqlitePool::connect(&config.database_url).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await.map_err(AppError::from)?;
    info!("Migrations completed successfully");

    spawn_session_cleanup(pool.clone());

    let messenger = Messenger::from_config(config.sms.as_ref());

    let _rocket = init_rocket(pool, config, messenger).await?.launch().await?;

    Ok(())
}

fn spawn_session_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(SESSION_PURGE_INTERVAL_SECS))
                .await;
        }
    });
}

pub async fn init_rocket(
    pool: SqlitePool,
    config: AppConfig,
    messenger: Messenger,
) -> Result<Rocket<Build>, AppError> {
    info!(sms_enabled = config.sms_enabled(), "Starting swing tracker");

    let secret_key = config.session_secret()?.to_string();

    ensure_master_instructor(&pool, &config.master_code).await?;

    let store = UploadStore::new(config.upload_dir.clone());
    store.ensure_dirs().await?;

    let limits = Limits::default()
        .limit("file", 16.mebibytes())
        .limit("data-form", 20.mebibytes());

    let figment = Config::figment()
        .merge(("secret_key", secret_key))
        .merge(("limits", limits));

    Ok(rocket::custom(figment)
        .manage(pool)
        .manage(config)
        .manage(messenger)
        .manage(store)
        .mount(
            "/api",
            routes![
                api_login_instructor,
                api_login_player,
                api_create_instructor,
                api_logout,
                api_me,
                api_dashboard,
                api_roster,
                api_my_clients,
                api_get_player,
                api_get_chart,
                api_create_player,
                api_delete_player,
                api_upload_photo,
                api_import_players,
                api_add_metric,
                api_add_note,
                api_set_note_shared,
                api_toggle_favorite,
                api_get_drills,
                api_upload_drill,
                api_send_drill,
                api_text_player,
                api_get_theme,
                api_toggle_theme,
                health,
            ],
        )
        .mount("/static", routes![uploaded_file])
        .register(
            "/api",
            catchers![
                bad_request_api,
                unauthorized_api,
                forbidden_api,
                not_found_api,
                unprocessable_api
            ],
        )
        .attach(TelemetryFairing))
}
