use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

/// Upper bound for a recorded exit velocity, in mph.
pub const MAX_EXIT_VELOCITY: f64 = 150.0;

fn to_utc(value: Option<NaiveDateTime>) -> DateTime<Utc> {
    value
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, Serialize, Clone)]
pub struct Instructor {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbInstructor {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbInstructor> for Instructor {
    fn from(row: DbInstructor) -> Self {
        Self {
            id: row.id.unwrap_or_default(),
            name: row.name.unwrap_or_else(|| "Coach".to_string()),
            code: row.code.unwrap_or_default(),
            created_at: to_utc(row.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgeGroup {
    #[serde(rename = "7-9")]
    SevenToNine,
    #[serde(rename = "10-12")]
    TenToTwelve,
    #[serde(rename = "13-15")]
    ThirteenToFifteen,
    #[serde(rename = "16-18")]
    SixteenToEighteen,
    #[serde(rename = "18+")]
    Adult,
    Unassigned,
}

impl AgeGroup {
    /// Roster display order.
    pub const ALL: [AgeGroup; 6] = [
        AgeGroup::SevenToNine,
        AgeGroup::TenToTwelve,
        AgeGroup::ThirteenToFifteen,
        AgeGroup::SixteenToEighteen,
        AgeGroup::Adult,
        AgeGroup::Unassigned,
    ];

    pub fn for_age(age: Option<i64>) -> Self {
        match age {
            Some(7..=9) => AgeGroup::SevenToNine,
            Some(10..=12) => AgeGroup::TenToTwelve,
            Some(13..=15) => AgeGroup::ThirteenToFifteen,
            Some(16..=18) => AgeGroup::SixteenToEighteen,
            Some(a) if a >= 19 => AgeGroup::Adult,
            _ => AgeGroup::Unassigned,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgeGroup::SevenToNine => "7-9",
            AgeGroup::TenToTwelve => "10-12",
            AgeGroup::ThirteenToFifteen => "13-15",
            AgeGroup::SixteenToEighteen => "16-18",
            AgeGroup::Adult => "18+",
            AgeGroup::Unassigned => "Unassigned",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub age: Option<i64>,
    pub code: String,
    pub phone: Option<String>,
    pub photo_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Player {
    pub fn age_group(&self) -> AgeGroup {
        AgeGroup::for_age(self.age)
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbPlayer {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub age: Option<i64>,
    pub code: Option<String>,
    pub phone: Option<String>,
    pub photo_path: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbPlayer> for Player {
    fn from(row: DbPlayer) -> Self {
        Self {
            id: row.id.unwrap_or_default(),
            name: row.name.unwrap_or_default(),
            age: row.age,
            code: row.code.unwrap_or_default(),
            phone: row.phone.filter(|p| !p.is_empty()),
            photo_path: row.photo_path,
            created_at: to_utc(row.created_at),
        }
    }
}

/// Input for creating a player, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlayer {
    pub name: String,
    pub age: Option<i64>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Metric {
    pub id: i64,
    pub player_id: i64,
    pub exit_velocity: f64,
    pub created_at: DateTime<Utc>,
}

impl Metric {
    pub fn check_exit_velocity(value: f64) -> Result<f64, AppError> {
        if value.is_finite() && value > 0.0 && value <= MAX_EXIT_VELOCITY {
            Ok(value)
        } else {
            Err(AppError::Validation(format!(
                "Exit velocity must be between 0 and {} mph",
                MAX_EXIT_VELOCITY
            )))
        }
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbMetric {
    pub id: Option<i64>,
    pub player_id: Option<i64>,
    pub exit_velocity: Option<f64>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbMetric> for Metric {
    fn from(row: DbMetric) -> Self {
        Self {
            id: row.id.unwrap_or_default(),
            player_id: row.player_id.unwrap_or_default(),
            exit_velocity: row.exit_velocity.unwrap_or_default(),
            created_at: to_utc(row.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChartPoint {
    pub date: String,
    pub exit_velocity: f64,
}

impl From<&Metric> for ChartPoint {
    fn from(metric: &Metric) -> Self {
        Self {
            date: metric.created_at.format("%Y-%m-%d").to_string(),
            exit_velocity: metric.exit_velocity,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Note {
    pub id: i64,
    pub player_id: i64,
    pub instructor_id: i64,
    pub instructor_name: String, // Denormalized for display
    pub text: String,
    pub shared: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbNote {
    pub id: Option<i64>,
    pub player_id: Option<i64>,
    pub instructor_id: Option<i64>,
    pub instructor_name: Option<String>,
    pub text: Option<String>,
    pub shared_with_player: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbNote> for Note {
    fn from(row: DbNote) -> Self {
        Self {
            id: row.id.unwrap_or_default(),
            player_id: row.player_id.unwrap_or_default(),
            instructor_id: row.instructor_id.unwrap_or_default(),
            instructor_name: row.instructor_name.unwrap_or_default(),
            text: row.text.unwrap_or_default(),
            shared: row.shared_with_player.unwrap_or_default(),
            created_at: to_utc(row.created_at),
        }
    }
}

/// Which notes a read may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteVisibility {
    All,
    SharedOnly,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Drill {
    pub id: i64,
    pub instructor_id: i64,
    pub filename: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Drill {
    pub fn display_name(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.filename)
    }
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDrill {
    pub id: Option<i64>,
    pub instructor_id: Option<i64>,
    pub filename: Option<String>,
    pub title: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbDrill> for Drill {
    fn from(row: DbDrill) -> Self {
        Self {
            id: row.id.unwrap_or_default(),
            instructor_id: row.instructor_id.unwrap_or_default(),
            filename: row.filename.unwrap_or_default(),
            title: row.title,
            created_at: to_utc(row.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    NotRequested,
    Sent,
    Disabled,
    NoPhone,
    Failed,
}

impl SmsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmsStatus::NotRequested => "not_requested",
            SmsStatus::Sent => "sent",
            SmsStatus::Disabled => "disabled",
            SmsStatus::NoPhone => "no_phone",
            SmsStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "not_requested" => Ok(SmsStatus::NotRequested),
            "sent" => Ok(SmsStatus::Sent),
            "disabled" => Ok(SmsStatus::Disabled),
            "no_phone" => Ok(SmsStatus::NoPhone),
            "failed" => Ok(SmsStatus::Failed),
            _ => Err(AppError::Internal(format!("Unknown SMS status: {}", s))),
        }
    }
}

impl fmt::Display for SmsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DrillDelivery {
    pub id: i64,
    pub drill_id: i64,
    pub player_id: i64,
    pub instructor_id: i64,
    pub drill_filename: String,
    pub drill_title: Option<String>,
    pub sms_status: SmsStatus,
    pub sms_error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbDrillDelivery {
    pub id: Option<i64>,
    pub drill_id: Option<i64>,
    pub player_id: Option<i64>,
    pub instructor_id: Option<i64>,
    pub drill_filename: Option<String>,
    pub drill_title: Option<String>,
    pub sms_status: Option<String>,
    pub sms_error: Option<String>,
    pub sent_at: Option<NaiveDateTime>,
}

impl TryFrom<DbDrillDelivery> for DrillDelivery {
    type Error = AppError;

    fn try_from(row: DbDrillDelivery) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.unwrap_or_default(),
            drill_id: row.drill_id.unwrap_or_default(),
            player_id: row.player_id.unwrap_or_default(),
            instructor_id: row.instructor_id.unwrap_or_default(),
            drill_filename: row.drill_filename.unwrap_or_default(),
            drill_title: row.drill_title,
            sms_status: SmsStatus::from_str(row.sms_status.as_deref().unwrap_or("not_requested"))?,
            sms_error: row.sms_error,
            sent_at: to_utc(row.sent_at),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FavoriteToggle {
    pub active: bool,
    pub count: i64,
}
