use chrono::{NaiveDateTime, Utc};
use rand::Rng;
use rocket::http::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::fmt;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::create_session;
use crate::error::AppError;

pub const SESSION_COOKIE: &str = "session_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Instructor,
    Player,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Instructor => "instructor",
            Role::Player => "player",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "instructor" => Ok(Role::Instructor),
            "player" => Ok(Role::Player),
            _ => Err(AppError::Internal(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: i64,
    pub token: String,
    pub role: Role,
    pub subject_id: i64,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(sqlx::FromRow)]
pub struct DbUserSession {
    pub id: Option<i64>,
    pub token: Option<String>,
    pub role: Option<String>,
    pub subject_id: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

impl TryFrom<DbUserSession> for UserSession {
    type Error = AppError;

    fn try_from(row: DbUserSession) -> Result<Self, Self::Error> {
        let now = Utc::now().naive_utc();
        Ok(Self {
            id: row.id.unwrap_or_default(),
            token: row.token.unwrap_or_default(),
            role: Role::from_str(row.role.as_deref().unwrap_or_default())?,
            subject_id: row.subject_id.unwrap_or_default(),
            created_at: row.created_at.unwrap_or(now),
            // A row without an expiry is treated as already expired.
            expires_at: row.expires_at.unwrap_or(now),
        })
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now().naive_utc()
    }
}

/// Six uppercase hex characters, the format handed out to players and coaches.
pub fn generate_login_code() -> String {
    let bytes: [u8; 3] = rand::rng().random();
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Random lowercase hex used for stored file names.
pub fn random_hex(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from_digit(rng.random_range(0..16u32), 16).unwrap_or('0'))
        .collect()
}

/// Creates the session row. Refuses when no signing secret is configured, since
/// the cookie carrying the token could not be protected.
#[instrument(skip(pool, config))]
pub async fn issue_session(
    pool: &Pool<Sqlite>,
    config: &AppConfig,
    role: Role,
    subject_id: i64,
) -> Result<UserSession, AppError> {
    config.session_secret()?;

    let token = UserSession::generate_token();
    let now = Utc::now();
    let expires_at = (now + config.session_ttl).naive_utc();

    let id = create_session(pool, &token, role, subject_id, expires_at).await?;
    info!(role = %role, subject_id, "Issued session");

    Ok(UserSession {
        id,
        token,
        role,
        subject_id,
        created_at: now.naive_utc(),
        expires_at,
    })
}

pub fn set_session_cookie(cookies: &CookieJar<'_>, session: &UserSession, config: &AppConfig) {
    let cookie = Cookie::build((SESSION_COOKIE, session.token.clone()))
        .same_site(SameSite::Lax)
        .http_only(true)
        .max_age(rocket::time::Duration::seconds(
            config.session_ttl.num_seconds(),
        ));
    cookies.add_private(cookie);
}

pub fn clear_session_cookie(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::build(SESSION_COOKIE));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_codes_are_six_uppercase_hex() {
        for _ in 0..50 {
            let code = generate_login_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn random_hex_has_requested_length() {
        let value = random_hex(16);
        assert_eq!(value.len(), 16);
        assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(UserSession::generate_token(), UserSession::generate_token());
    }

    #[test]
    fn roles_round_trip_through_strings() {
        assert_eq!(Role::from_str("instructor").unwrap(), Role::Instructor);
        assert_eq!(Role::Player.to_string(), "player");
        assert!(Role::from_str("admin").is_err());
    }
}
