use crate::{
    auth::{DbUserSession, Role, UserSession, generate_login_code},
    error::AppError,
    models::{
        DbDrill, DbDrillDelivery, DbInstructor, DbMetric, DbNote, DbPlayer, Drill, DrillDelivery,
        FavoriteToggle, Instructor, Metric, NewPlayer, Note, NoteVisibility, Player, SmsStatus,
    },
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};

const CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy)]
enum CodeOwner {
    Instructor,
    Player,
}

impl CodeOwner {
    fn lookup_query(&self) -> &'static str {
        match self {
            CodeOwner::Instructor => "SELECT COUNT(*) FROM instructors WHERE code = ?",
            CodeOwner::Player => "SELECT COUNT(*) FROM players WHERE code = ?",
        }
    }
}

async fn unused_login_code(pool: &Pool<Sqlite>, owner: CodeOwner) -> Result<String, AppError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_login_code();
        let taken: i64 = sqlx::query_scalar(owner.lookup_query())
            .bind(&code)
            .fetch_one(pool)
            .await?;

        if taken == 0 {
            return Ok(code);
        }
    }

    Err(AppError::Internal(format!(
        "Could not issue a unique {:?} login code",
        owner
    )))
}

// ---------- Instructors ----------

#[instrument(skip(pool, master_code))]
pub async fn ensure_master_instructor(
    pool: &Pool<Sqlite>,
    master_code: &str,
) -> Result<Instructor, AppError> {
    if let Some(existing) = find_instructor_by_code(pool, master_code).await? {
        return Ok(existing);
    }

    info!("Seeding head coach account");
    let res = sqlx::query("INSERT INTO instructors (name, code) VALUES (?, ?)")
        .bind("Head Coach")
        .bind(master_code)
        .execute(pool)
        .await?;

    get_instructor(pool, res.last_insert_rowid()).await
}

#[instrument]
pub async fn get_instructor(pool: &Pool<Sqlite>, id: i64) -> Result<Instructor, AppError> {
    info!("Fetching instructor by ID");
    let row = sqlx::query_as::<_, DbInstructor>(
        "SELECT id, name, code, created_at FROM instructors WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(instructor) => Ok(Instructor::from(instructor)),
        _ => Err(AppError::NotFound(format!(
            "Instructor with id {} not found",
            id
        ))),
    }
}

#[instrument(skip_all)]
pub async fn find_instructor_by_code(
    pool: &Pool<Sqlite>,
    code: &str,
) -> Result<Option<Instructor>, AppError> {
    let row = sqlx::query_as::<_, DbInstructor>(
        "SELECT id, name, code, created_at FROM instructors WHERE code = ?",
    )
    .bind(code.trim())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Instructor::from))
}

/// Creates an instructor account when `bootstrap_code` matches the configured
/// master code. The new instructor gets their own login code.
#[instrument(skip(pool, master_code, bootstrap_code))]
pub async fn create_instructor(
    pool: &Pool<Sqlite>,
    master_code: &str,
    bootstrap_code: &str,
    name: &str,
) -> Result<Instructor, AppError> {
    if bootstrap_code.trim() != master_code {
        warn!("Instructor creation attempted with a wrong bootstrap code");
        return Err(AppError::InvalidCredentials(
            "Invalid instructor code.".to_string(),
        ));
    }

    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation(
            "A name is required to create an instructor".to_string(),
        ));
    }

    info!("Creating instructor");
    let code = unused_login_code(pool, CodeOwner::Instructor).await?;
    let res = sqlx::query("INSERT INTO instructors (name, code) VALUES (?, ?)")
        .bind(name)
        .bind(&code)
        .execute(pool)
        .await?;

    get_instructor(pool, res.last_insert_rowid()).await
}

// ---------- Players ----------

#[instrument(skip(pool))]
pub async fn create_player(pool: &Pool<Sqlite>, player: &NewPlayer) -> Result<Player, AppError> {
    let name = player.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Player name is required".to_string()));
    }

    info!("Creating player");
    let code = unused_login_code(pool, CodeOwner::Player).await?;
    let res = sqlx::query("INSERT INTO players (name, age, phone, code) VALUES (?, ?, ?, ?)")
        .bind(name)
        .bind(player.age)
        .bind(player.phone.as_deref())
        .bind(&code)
        .execute(pool)
        .await?;

    get_player(pool, res.last_insert_rowid()).await
}

#[instrument]
pub async fn get_player(pool: &Pool<Sqlite>, id: i64) -> Result<Player, AppError> {
    info!("Fetching player by ID");
    let row = sqlx::query_as::<_, DbPlayer>(
        "SELECT id, name, age, code, phone, photo_path, created_at FROM players WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(player) => Ok(Player::from(player)),
        _ => Err(AppError::NotFound(format!("Player with id {} not found", id))),
    }
}

#[instrument(skip_all)]
pub async fn find_player_by_code(
    pool: &Pool<Sqlite>,
    code: &str,
) -> Result<Option<Player>, AppError> {
    let row = sqlx::query_as::<_, DbPlayer>(
        "SELECT id, name, age, code, phone, photo_path, created_at FROM players WHERE code = ?",
    )
    .bind(code.trim())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Player::from))
}

#[instrument]
pub async fn get_all_players(pool: &Pool<Sqlite>) -> Result<Vec<Player>, AppError> {
    info!("Getting all players");
    let rows = sqlx::query_as::<_, DbPlayer>(
        "SELECT id, name, age, code, phone, photo_path, created_at
         FROM players
         ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Player::from).collect())
}

#[instrument]
pub async fn set_player_photo(
    pool: &Pool<Sqlite>,
    player_id: i64,
    photo_path: &str,
) -> Result<(), AppError> {
    info!("Updating player photo");
    let res = sqlx::query("UPDATE players SET photo_path = ? WHERE id = ?")
        .bind(photo_path)
        .bind(player_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Player with id {} not found",
            player_id
        )));
    }

    Ok(())
}

/// Removes the player, everything attached to them, and any sessions they hold.
#[instrument]
pub async fn delete_player(pool: &Pool<Sqlite>, player_id: i64) -> Result<(), AppError> {
    info!("Deleting player");
    let mut tx = pool.begin().await?;

    let res = sqlx::query("DELETE FROM players WHERE id = ?")
        .bind(player_id)
        .execute(&mut *tx)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Player with id {} not found",
            player_id
        )));
    }

    sqlx::query("DELETE FROM sessions WHERE role = ? AND subject_id = ?")
        .bind(Role::Player.as_str())
        .bind(player_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

// ---------- Metrics ----------

#[instrument]
pub async fn add_metric(
    pool: &Pool<Sqlite>,
    player_id: i64,
    exit_velocity: f64,
) -> Result<Metric, AppError> {
    let exit_velocity = Metric::check_exit_velocity(exit_velocity)?;
    get_player(pool, player_id).await?;

    info!("Recording metric");
    let res = sqlx::query("INSERT INTO metrics (player_id, exit_velocity) VALUES (?, ?)")
        .bind(player_id)
        .bind(exit_velocity)
        .execute(pool)
        .await?;

    let row = sqlx::query_as::<_, DbMetric>(
        "SELECT id, player_id, exit_velocity, created_at FROM metrics WHERE id = ?",
    )
    .bind(res.last_insert_rowid())
    .fetch_one(pool)
    .await?;

    Ok(Metric::from(row))
}

/// Oldest first, the order the chart plots them.
#[instrument]
pub async fn get_player_metrics(
    pool: &Pool<Sqlite>,
    player_id: i64,
) -> Result<Vec<Metric>, AppError> {
    info!("Getting player metrics");
    let rows = sqlx::query_as::<_, DbMetric>(
        "SELECT id, player_id, exit_velocity, created_at
         FROM metrics
         WHERE player_id = ?
         ORDER BY created_at ASC, id ASC",
    )
    .bind(player_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Metric::from).collect())
}

#[instrument]
pub async fn get_metric_counts(pool: &Pool<Sqlite>) -> Result<HashMap<i64, i64>, AppError> {
    let rows: Vec<(i64, i64)> =
        sqlx::query_as("SELECT player_id, COUNT(*) FROM metrics GROUP BY player_id")
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().collect())
}

// ---------- Notes ----------

const NOTE_COLUMNS: &str = "SELECT n.id, n.player_id, n.instructor_id, i.name AS instructor_name,
            n.text, n.shared_with_player, n.created_at
     FROM notes n
     LEFT JOIN instructors i ON i.id = n.instructor_id";

#[instrument(skip(pool, text))]
pub async fn add_note(
    pool: &Pool<Sqlite>,
    player_id: i64,
    instructor_id: i64,
    text: &str,
    shared: bool,
) -> Result<Note, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Note text is required".to_string()));
    }
    get_player(pool, player_id).await?;

    info!("Adding note");
    let res = sqlx::query(
        "INSERT INTO notes (player_id, instructor_id, text, shared_with_player) VALUES (?, ?, ?, ?)",
    )
    .bind(player_id)
    .bind(instructor_id)
    .bind(text)
    .bind(shared)
    .execute(pool)
    .await?;

    get_note(pool, res.last_insert_rowid()).await
}

#[instrument]
pub async fn get_note(pool: &Pool<Sqlite>, note_id: i64) -> Result<Note, AppError> {
    let row = sqlx::query_as::<_, DbNote>(&format!("{} WHERE n.id = ?", NOTE_COLUMNS))
        .bind(note_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(note) => Ok(Note::from(note)),
        _ => Err(AppError::NotFound(format!("Note with id {} not found", note_id))),
    }
}

/// Only the shared flag of a note is mutable.
#[instrument]
pub async fn set_note_shared(
    pool: &Pool<Sqlite>,
    note_id: i64,
    shared: bool,
) -> Result<Note, AppError> {
    info!("Updating note visibility");
    let res = sqlx::query("UPDATE notes SET shared_with_player = ? WHERE id = ?")
        .bind(shared)
        .bind(note_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Note with id {} not found", note_id)));
    }

    get_note(pool, note_id).await
}

/// Newest first. `SharedOnly` is the only visibility a player-facing read may use.
#[instrument]
pub async fn get_player_notes(
    pool: &Pool<Sqlite>,
    player_id: i64,
    visibility: NoteVisibility,
) -> Result<Vec<Note>, AppError> {
    info!("Getting player notes");
    let filter = match visibility {
        NoteVisibility::All => "WHERE n.player_id = ?",
        NoteVisibility::SharedOnly => "WHERE n.player_id = ? AND n.shared_with_player = 1",
    };

    let rows = sqlx::query_as::<_, DbNote>(&format!(
        "{} {} ORDER BY n.created_at DESC, n.id DESC",
        NOTE_COLUMNS, filter
    ))
    .bind(player_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Note::from).collect())
}

// ---------- Favorites ----------

#[instrument]
pub async fn toggle_favorite(
    pool: &Pool<Sqlite>,
    instructor_id: i64,
    player_id: i64,
) -> Result<FavoriteToggle, AppError> {
    get_player(pool, player_id).await?;

    let removed = sqlx::query("DELETE FROM favorites WHERE instructor_id = ? AND player_id = ?")
        .bind(instructor_id)
        .bind(player_id)
        .execute(pool)
        .await?
        .rows_affected();

    let active = if removed > 0 {
        false
    } else {
        sqlx::query("INSERT OR IGNORE INTO favorites (instructor_id, player_id) VALUES (?, ?)")
            .bind(instructor_id)
            .bind(player_id)
            .execute(pool)
            .await?;
        true
    };

    let count = get_favorite_count(pool, instructor_id).await?;
    info!(active, count, "Toggled favorite");

    Ok(FavoriteToggle { active, count })
}

#[instrument]
pub async fn get_favorite_count(pool: &Pool<Sqlite>, instructor_id: i64) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM favorites WHERE instructor_id = ?")
        .bind(instructor_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

#[instrument]
pub async fn get_favorite_ids(
    pool: &Pool<Sqlite>,
    instructor_id: i64,
) -> Result<HashSet<i64>, AppError> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT player_id FROM favorites WHERE instructor_id = ?")
        .bind(instructor_id)
        .fetch_all(pool)
        .await?;

    Ok(ids.into_iter().collect())
}

/// "My Clients": joined against players so the result is always part of the roster.
#[instrument]
pub async fn get_favorite_players(
    pool: &Pool<Sqlite>,
    instructor_id: i64,
) -> Result<Vec<Player>, AppError> {
    info!("Getting favorite players");
    let rows = sqlx::query_as::<_, DbPlayer>(
        "SELECT p.id, p.name, p.age, p.code, p.phone, p.photo_path, p.created_at
         FROM favorites f
         JOIN players p ON p.id = f.player_id
         WHERE f.instructor_id = ?
         ORDER BY p.name",
    )
    .bind(instructor_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Player::from).collect())
}

// ---------- Drills ----------

#[instrument]
pub async fn create_drill(
    pool: &Pool<Sqlite>,
    instructor_id: i64,
    filename: &str,
    title: Option<&str>,
) -> Result<Drill, AppError> {
    info!("Recording drill");
    let title = title.map(str::trim).filter(|t| !t.is_empty());
    let res = sqlx::query("INSERT INTO drills (instructor_id, filename, title) VALUES (?, ?, ?)")
        .bind(instructor_id)
        .bind(filename)
        .bind(title)
        .execute(pool)
        .await?;

    get_drill(pool, res.last_insert_rowid()).await
}

#[instrument]
pub async fn get_drill(pool: &Pool<Sqlite>, drill_id: i64) -> Result<Drill, AppError> {
    let row = sqlx::query_as::<_, DbDrill>(
        "SELECT id, instructor_id, filename, title, created_at FROM drills WHERE id = ?",
    )
    .bind(drill_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(drill) => Ok(Drill::from(drill)),
        _ => Err(AppError::NotFound(format!("Drill with id {} not found", drill_id))),
    }
}

#[instrument]
pub async fn get_all_drills(pool: &Pool<Sqlite>) -> Result<Vec<Drill>, AppError> {
    let rows = sqlx::query_as::<_, DbDrill>(
        "SELECT id, instructor_id, filename, title, created_at FROM drills ORDER BY filename",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Drill::from).collect())
}

const DELIVERY_COLUMNS: &str = "SELECT dd.id, dd.drill_id, dd.player_id, dd.instructor_id,
            d.filename AS drill_filename, d.title AS drill_title,
            dd.sms_status, dd.sms_error, dd.sent_at
     FROM drill_deliveries dd
     JOIN drills d ON d.id = dd.drill_id";

#[instrument]
pub async fn record_drill_delivery(
    pool: &Pool<Sqlite>,
    drill_id: i64,
    player_id: i64,
    instructor_id: i64,
) -> Result<i64, AppError> {
    info!("Recording drill delivery");
    let res = sqlx::query(
        "INSERT INTO drill_deliveries (drill_id, player_id, instructor_id, sms_status) VALUES (?, ?, ?, ?)",
    )
    .bind(drill_id)
    .bind(player_id)
    .bind(instructor_id)
    .bind(SmsStatus::NotRequested.as_str())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn update_delivery_status(
    pool: &Pool<Sqlite>,
    delivery_id: i64,
    status: SmsStatus,
    error: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query("UPDATE drill_deliveries SET sms_status = ?, sms_error = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error)
        .bind(delivery_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument]
pub async fn get_drill_delivery(
    pool: &Pool<Sqlite>,
    delivery_id: i64,
) -> Result<DrillDelivery, AppError> {
    let row = sqlx::query_as::<_, DbDrillDelivery>(&format!("{} WHERE dd.id = ?", DELIVERY_COLUMNS))
        .bind(delivery_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(delivery) => DrillDelivery::try_from(delivery),
        _ => Err(AppError::NotFound(format!(
            "Drill delivery with id {} not found",
            delivery_id
        ))),
    }
}

#[instrument]
pub async fn get_player_deliveries(
    pool: &Pool<Sqlite>,
    player_id: i64,
) -> Result<Vec<DrillDelivery>, AppError> {
    let rows = sqlx::query_as::<_, DbDrillDelivery>(&format!(
        "{} WHERE dd.player_id = ? ORDER BY dd.sent_at DESC, dd.id DESC",
        DELIVERY_COLUMNS
    ))
    .bind(player_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(DrillDelivery::try_from).collect()
}

// ---------- Sessions ----------

#[instrument(skip(pool, token))]
pub async fn create_session(
    pool: &Pool<Sqlite>,
    token: &str,
    role: Role,
    subject_id: i64,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating session");

    let res = sqlx::query(
        "INSERT INTO sessions (token, role, subject_id, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(token)
    .bind(role.as_str())
    .bind(subject_id)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, token, role, subject_id, created_at, expires_at FROM sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => UserSession::try_from(session),
        _ => Err(AppError::Unauthenticated),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
