use std::collections::HashMap;
use std::path::PathBuf;

use rocket::FromForm;
use rocket::State;
use rocket::form::Form;
use rocket::fs::{NamedFile, TempFile};
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{
    Identity, Role, SESSION_COOKIE, clear_session_cookie, issue_session, set_session_cookie,
};
use crate::config::AppConfig;
use crate::db::{
    add_metric, add_note, create_drill, create_instructor, create_player, delete_player,
    find_instructor_by_code, find_player_by_code, get_all_drills, get_all_players,
    get_favorite_count, get_favorite_ids, get_favorite_players, get_instructor,
    get_metric_counts, get_player, get_player_deliveries, get_player_metrics, get_player_notes,
    invalidate_session, set_note_shared, set_player_photo, toggle_favorite,
};
use crate::error::AppError;
use crate::import::{ImportReport, import_players};
use crate::models::{
    AgeGroup, ChartPoint, Drill, DrillDelivery, FavoriteToggle, Metric, NewPlayer, Note,
    NoteVisibility, Player,
};
use crate::sms::{DrillSendOutcome, Messenger, send_drill, text_player};
use crate::storage::{UploadKind, UploadStore, read_upload_to_string};
use crate::validation::{JsonValidateExt, normalize_phone, parse_age};

const THEME_COOKIE: &str = "theme";

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

// ---------- Auth ----------

#[derive(Deserialize, Validate)]
pub struct InstructorLoginRequest {
    #[validate(length(min = 1, max = 64, message = "Code is required"))]
    code: String,
    #[validate(length(max = 100, message = "Name is too long"))]
    name: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct PlayerLoginRequest {
    #[validate(length(min = 1, max = 64, message = "Code is required"))]
    code: String,
}

#[derive(Deserialize, Validate)]
pub struct CreateInstructorRequest {
    #[validate(length(min = 1, max = 64, message = "Bootstrap code is required"))]
    bootstrap_code: String,
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    name: String,
}

#[derive(Serialize, Debug)]
pub struct LoginResponse {
    pub identity: Identity,
    pub name: String,
    pub issued_code: Option<String>,
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct CreatedInstructor {
    pub id: i64,
    pub name: String,
    pub code: String,
}

/// Logs an instructor in by code. A request carrying the master code together
/// with a name creates a new instructor instead, logs them in and reports the
/// code they should use from now on.
#[post("/login/instructor", data = "<login>")]
pub async fn api_login_instructor(
    login: Json<InstructorLoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, AppError> {
    let login = login.validate_payload()?;
    let code = login.code.trim();
    let name = login.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let (instructor, issued_code) = match name {
        Some(name) if code == config.master_code => {
            let instructor = create_instructor(db, &config.master_code, code, name).await?;
            let issued = instructor.code.clone();
            (instructor, Some(issued))
        }
        _ => match find_instructor_by_code(db, code).await? {
            Some(instructor) => (instructor, None),
            None => {
                return Err(AppError::InvalidCredentials(
                    "Invalid instructor code.".to_string(),
                ));
            }
        },
    };

    end_current_session(cookies, db).await?;
    let session = issue_session(db, config, Role::Instructor, instructor.id).await?;
    set_session_cookie(cookies, &session, config);

    let message = match &issued_code {
        Some(code) => format!("Instructor created. Your login code: {}", code),
        None => format!("Welcome back, {}.", instructor.name),
    };

    Ok(Json(LoginResponse {
        identity: Identity::Instructor(instructor.id),
        name: instructor.name,
        issued_code,
        message,
    }))
}

#[post("/login/player", data = "<login>")]
pub async fn api_login_player(
    login: Json<PlayerLoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, AppError> {
    let login = login.validate_payload()?;

    let player = find_player_by_code(db, &login.code)
        .await?
        .ok_or_else(|| AppError::InvalidCredentials("Invalid player code.".to_string()))?;

    end_current_session(cookies, db).await?;
    let session = issue_session(db, config, Role::Player, player.id).await?;
    set_session_cookie(cookies, &session, config);

    Ok(Json(LoginResponse {
        identity: Identity::Player(player.id),
        message: format!("Welcome, {}.", player.name),
        name: player.name,
        issued_code: None,
    }))
}

#[post("/instructors", data = "<request>")]
pub async fn api_create_instructor(
    request: Json<CreateInstructorRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<CreatedInstructor>, AppError> {
    let request = request.validate_payload()?;

    let instructor =
        create_instructor(db, &config.master_code, &request.bootstrap_code, &request.name).await?;

    Ok(Json(CreatedInstructor {
        id: instructor.id,
        name: instructor.name,
        code: instructor.code,
    }))
}

#[post("/logout")]
pub async fn api_logout(
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    end_current_session(cookies, db).await?;
    clear_session_cookie(cookies);

    Ok(MessageResponse::new("Logged out."))
}

/// Drops the session row behind the request's cookie, if there is one.
async fn end_current_session(cookies: &CookieJar<'_>, db: &Pool<Sqlite>) -> Result<(), AppError> {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        invalidate_session(db, &token).await?;
    }
    Ok(())
}

#[derive(Serialize, Debug)]
pub struct MeResponse {
    pub identity: Identity,
    pub name: Option<String>,
}

#[get("/me")]
pub async fn api_me(
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MeResponse>, AppError> {
    let name = match identity {
        Identity::Instructor(id) => Some(get_instructor(db, id).await?.name),
        Identity::Player(id) => Some(get_player(db, id).await?.name),
        Identity::Anonymous => None,
    };

    Ok(Json(MeResponse { identity, name }))
}

// ---------- Player views ----------

/// What the caller may see of a given player's record.
fn player_visibility(identity: &Identity, player_id: i64) -> Result<NoteVisibility, AppError> {
    match identity {
        Identity::Instructor(_) => Ok(NoteVisibility::All),
        Identity::Player(id) if *id == player_id => Ok(NoteVisibility::SharedOnly),
        Identity::Player(_) => Err(AppError::Forbidden(
            "players can only view their own record".to_string(),
        )),
        Identity::Anonymous => Err(AppError::Unauthenticated),
    }
}

fn chart_points(metrics: &[Metric]) -> Vec<ChartPoint> {
    metrics.iter().map(ChartPoint::from).collect()
}

#[derive(Serialize, Debug)]
pub struct DashboardView {
    pub player: Player,
    pub latest_shared_note: Option<Note>,
    pub shared_notes: Vec<Note>,
    pub chart_points: Vec<ChartPoint>,
    pub drills: Vec<DrillDelivery>,
}

#[get("/dashboard")]
pub async fn api_dashboard(
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<DashboardView>, AppError> {
    let player_id = identity.require_player()?;

    let player = get_player(db, player_id).await?;
    let shared_notes = get_player_notes(db, player_id, NoteVisibility::SharedOnly).await?;
    let metrics = get_player_metrics(db, player_id).await?;
    let drills = get_player_deliveries(db, player_id).await?;

    Ok(Json(DashboardView {
        player,
        latest_shared_note: shared_notes.first().cloned(),
        shared_notes,
        chart_points: chart_points(&metrics),
        drills,
    }))
}

#[derive(Serialize, Debug)]
pub struct PlayerDetailView {
    pub player: Player,
    pub notes: Vec<Note>,
    pub metrics: Vec<Metric>,
    pub chart_points: Vec<ChartPoint>,
    pub drills: Vec<DrillDelivery>,
    pub favorite: bool,
}

#[get("/players/<id>")]
pub async fn api_get_player(
    id: i64,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<PlayerDetailView>, AppError> {
    let visibility = player_visibility(&identity, id)?;

    let player = get_player(db, id).await?;
    let notes = get_player_notes(db, id, visibility).await?;
    let metrics = get_player_metrics(db, id).await?;
    let drills = get_player_deliveries(db, id).await?;

    let favorite = match identity {
        Identity::Instructor(instructor_id) => {
            get_favorite_ids(db, instructor_id).await?.contains(&id)
        }
        Identity::Player(_) | Identity::Anonymous => false,
    };

    Ok(Json(PlayerDetailView {
        player,
        notes,
        chart_points: chart_points(&metrics),
        metrics,
        drills,
        favorite,
    }))
}

#[get("/players/<id>/chart")]
pub async fn api_get_chart(
    id: i64,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ChartPoint>>, AppError> {
    player_visibility(&identity, id)?;

    get_player(db, id).await?;
    let metrics = get_player_metrics(db, id).await?;

    Ok(Json(chart_points(&metrics)))
}

// ---------- Roster ----------

#[derive(Serialize, Debug)]
pub struct RosterEntry {
    #[serde(flatten)]
    pub player: Player,
    pub metric_count: i64,
    pub favorite: bool,
}

#[derive(Serialize, Debug)]
pub struct RosterGroup {
    pub group: AgeGroup,
    pub players: Vec<RosterEntry>,
}

#[derive(Serialize, Debug)]
pub struct RosterView {
    pub groups: Vec<RosterGroup>,
    pub favorite_count: i64,
    pub drills: Vec<Drill>,
    pub sms_ready: bool,
}

#[get("/roster")]
pub async fn api_roster(
    identity: Identity,
    db: &State<Pool<Sqlite>>,
    messenger: &State<Messenger>,
) -> Result<Json<RosterView>, AppError> {
    let instructor_id = identity.require_instructor()?;

    let players = get_all_players(db).await?;
    let counts = get_metric_counts(db).await?;
    let favorites = get_favorite_ids(db, instructor_id).await?;

    let mut by_group: HashMap<AgeGroup, Vec<RosterEntry>> = HashMap::new();
    for player in players {
        let entry = RosterEntry {
            metric_count: counts.get(&player.id).copied().unwrap_or(0),
            favorite: favorites.contains(&player.id),
            player,
        };
        by_group.entry(entry.player.age_group()).or_default().push(entry);
    }

    let groups = AgeGroup::ALL
        .iter()
        .map(|group| RosterGroup {
            group: *group,
            players: by_group.remove(group).unwrap_or_default(),
        })
        .collect();

    Ok(Json(RosterView {
        groups,
        favorite_count: favorites.len() as i64,
        drills: get_all_drills(db).await?,
        sms_ready: messenger.is_enabled(),
    }))
}

#[get("/clients/mine")]
pub async fn api_my_clients(
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<RosterEntry>>, AppError> {
    let instructor_id = identity.require_instructor()?;

    let players = get_favorite_players(db, instructor_id).await?;
    let counts = get_metric_counts(db).await?;

    let entries = players
        .into_iter()
        .map(|player| RosterEntry {
            metric_count: counts.get(&player.id).copied().unwrap_or(0),
            favorite: true,
            player,
        })
        .collect();

    Ok(Json(entries))
}

#[derive(Deserialize)]
pub struct FavoriteRequest {
    player_id: i64,
}

#[post("/favorites/toggle", data = "<request>")]
pub async fn api_toggle_favorite(
    request: Json<FavoriteRequest>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<FavoriteToggle>, AppError> {
    let instructor_id = identity.require_instructor()?;

    let toggle = toggle_favorite(db, instructor_id, request.player_id).await?;

    Ok(Json(toggle))
}

// ---------- Players ----------

#[derive(FromForm)]
pub struct PlayerForm<'r> {
    name: String,
    age: Option<String>,
    phone: Option<String>,
    photo: Option<TempFile<'r>>,
}

#[derive(Serialize, Debug)]
pub struct CreatedPlayer {
    pub player: Player,
    pub message: String,
}

#[post("/players", data = "<form>")]
pub async fn api_create_player(
    mut form: Form<PlayerForm<'_>>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
    store: &State<UploadStore>,
) -> Result<Json<CreatedPlayer>, AppError> {
    identity.require_instructor()?;

    let new_player = NewPlayer {
        name: form.name.trim().to_string(),
        age: parse_age(form.age.as_deref())?,
        phone: normalize_phone(form.phone.as_deref().unwrap_or_default())?,
    };

    let mut player = create_player(db, &new_player).await?;

    if let Some(photo) = form.photo.as_mut().filter(|p| p.len() > 0) {
        let stored = store.save(UploadKind::PlayerPhoto, photo).await?;
        set_player_photo(db, player.id, &stored.public_path).await?;
        player.photo_path = Some(stored.public_path);
    }

    Ok(Json(CreatedPlayer {
        message: format!("Player created. Login code: {}", player.code),
        player,
    }))
}

#[delete("/players/<id>")]
pub async fn api_delete_player(
    id: i64,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    identity.require_instructor()?;

    delete_player(db, id).await?;

    Ok(MessageResponse::new("Player deleted."))
}

#[derive(FromForm)]
pub struct PhotoUpload<'r> {
    photo: TempFile<'r>,
}

#[post("/players/<id>/photo", data = "<form>")]
pub async fn api_upload_photo(
    id: i64,
    mut form: Form<PhotoUpload<'_>>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
    store: &State<UploadStore>,
) -> Result<Json<Player>, AppError> {
    identity.require_instructor()?;

    get_player(db, id).await?;
    let stored = store.save(UploadKind::PlayerPhoto, &mut form.photo).await?;
    set_player_photo(db, id, &stored.public_path).await?;

    Ok(Json(get_player(db, id).await?))
}

#[derive(FromForm)]
pub struct CsvUpload<'r> {
    file: TempFile<'r>,
}

#[derive(Serialize, Debug)]
pub struct ImportResponse {
    pub message: String,
    pub report: ImportReport,
}

#[post("/players/import", data = "<form>")]
pub async fn api_import_players(
    form: Form<CsvUpload<'_>>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ImportResponse>, AppError> {
    identity.require_instructor()?;

    let contents = read_upload_to_string(&form.file).await?;
    let report = import_players(db, &contents).await?;

    let message = match report.errors.len() {
        0 => format!("Imported {} players.", report.created.len()),
        rejected => format!(
            "Imported {} players; {} rows were rejected.",
            report.created.len(),
            rejected
        ),
    };

    Ok(Json(ImportResponse { message, report }))
}

// ---------- Metrics & notes ----------

#[derive(Deserialize)]
pub struct MetricRequest {
    player_id: i64,
    exit_velocity: f64,
}

#[post("/metrics", data = "<request>")]
pub async fn api_add_metric(
    request: Json<MetricRequest>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Metric>, AppError> {
    identity.require_instructor()?;

    let metric = add_metric(db, request.player_id, request.exit_velocity).await?;

    Ok(Json(metric))
}

#[derive(Deserialize, Validate)]
pub struct NoteRequest {
    player_id: i64,
    #[validate(length(min = 1, max = 5000, message = "Note text is required"))]
    text: String,
    #[serde(default)]
    shared: bool,
}

#[post("/notes", data = "<request>")]
pub async fn api_add_note(
    request: Json<NoteRequest>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Note>, AppError> {
    let instructor_id = identity.require_instructor()?;
    let request = request.validate_payload()?;

    let note = add_note(db, request.player_id, instructor_id, &request.text, request.shared).await?;

    Ok(Json(note))
}

#[derive(Deserialize)]
pub struct SharedFlagRequest {
    shared: bool,
}

#[put("/notes/<id>/shared", data = "<request>")]
pub async fn api_set_note_shared(
    id: i64,
    request: Json<SharedFlagRequest>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Note>, AppError> {
    identity.require_instructor()?;

    let note = set_note_shared(db, id, request.shared).await?;

    Ok(Json(note))
}

// ---------- Drills & texts ----------

#[get("/drills")]
pub async fn api_get_drills(
    identity: Identity,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Drill>>, AppError> {
    identity.require_instructor()?;

    Ok(Json(get_all_drills(db).await?))
}

#[derive(FromForm)]
pub struct DrillUpload<'r> {
    file: TempFile<'r>,
    title: Option<String>,
}

#[post("/drills", data = "<form>")]
pub async fn api_upload_drill(
    mut form: Form<DrillUpload<'_>>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
    store: &State<UploadStore>,
) -> Result<Json<Drill>, AppError> {
    let instructor_id = identity.require_instructor()?;

    let stored = store.save(UploadKind::Drill, &mut form.file).await?;
    let drill = create_drill(db, instructor_id, &stored.filename, form.title.as_deref()).await?;

    Ok(Json(drill))
}

#[derive(Deserialize)]
pub struct SendDrillRequest {
    player_id: i64,
    drill_id: i64,
    #[serde(default)]
    text_also: bool,
}

#[post("/drills/send", data = "<request>")]
pub async fn api_send_drill(
    request: Json<SendDrillRequest>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
    messenger: &State<Messenger>,
) -> Result<Json<DrillSendOutcome>, AppError> {
    let instructor_id = identity.require_instructor()?;

    let outcome = send_drill(
        db,
        messenger,
        instructor_id,
        request.player_id,
        request.drill_id,
        request.text_also,
    )
    .await?;

    Ok(Json(outcome))
}

#[derive(Deserialize, Validate)]
pub struct TextRequest {
    #[validate(length(min = 1, max = 1600, message = "Message body is required"))]
    body: String,
}

#[post("/players/<id>/text", data = "<request>")]
pub async fn api_text_player(
    id: i64,
    request: Json<TextRequest>,
    identity: Identity,
    db: &State<Pool<Sqlite>>,
    messenger: &State<Messenger>,
) -> Result<Json<MessageResponse>, AppError> {
    identity.require_instructor()?;
    let request = request.validate_payload()?;

    text_player(db, messenger, id, &request.body).await?;

    Ok(MessageResponse::new("Text sent."))
}

// ---------- Theme ----------

#[derive(Serialize, Deserialize, Debug)]
pub struct ThemeResponse {
    pub theme: String,
}

fn current_theme(cookies: &CookieJar<'_>) -> &'static str {
    match cookies.get(THEME_COOKIE).map(|c| c.value()) {
        Some("dark") => "dark",
        _ => "light",
    }
}

#[get("/theme")]
pub fn api_get_theme(cookies: &CookieJar<'_>) -> Json<ThemeResponse> {
    Json(ThemeResponse {
        theme: current_theme(cookies).to_string(),
    })
}

#[post("/theme/toggle")]
pub fn api_toggle_theme(cookies: &CookieJar<'_>) -> Json<ThemeResponse> {
    let next = match current_theme(cookies) {
        "dark" => "light",
        _ => "dark",
    };

    cookies.add(
        Cookie::build((THEME_COOKIE, next))
            .same_site(SameSite::Lax)
            .max_age(rocket::time::Duration::days(365)),
    );

    Json(ThemeResponse {
        theme: next.to_string(),
    })
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

// ---------- Static uploads ----------

#[get("/<path..>")]
pub async fn uploaded_file(path: PathBuf, store: &State<UploadStore>) -> Option<NamedFile> {
    let full_path = store.resolve(&path);
    match NamedFile::open(&full_path).await {
        Ok(file) => Some(file),
        Err(err) => {
            info!(path = %full_path.display(), error = %err, "Upload not found");
            None
        }
    }
}
