use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::get_session_by_token;
use crate::error::AppError;
use crate::validation::ValidationResponse;

use super::{Role, SESSION_COOKIE, UserSession};

/// Who is making the request. Resolved from the session cookie on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", content = "id", rename_all = "lowercase")]
pub enum Identity {
    Instructor(i64),
    Player(i64),
    Anonymous,
}

impl From<&UserSession> for Identity {
    fn from(session: &UserSession) -> Self {
        match session.role {
            Role::Instructor => Identity::Instructor(session.subject_id),
            Role::Player => Identity::Player(session.subject_id),
        }
    }
}

impl Identity {
    pub fn require_instructor(&self) -> Result<i64, AppError> {
        match self {
            Identity::Instructor(id) => Ok(*id),
            Identity::Player(_) => Err(AppError::Forbidden(
                "instructor access required".to_string(),
            )),
            Identity::Anonymous => Err(AppError::Unauthenticated),
        }
    }

    pub fn require_player(&self) -> Result<i64, AppError> {
        match self {
            Identity::Player(id) => Ok(*id),
            Identity::Instructor(_) => {
                Err(AppError::Forbidden("player access required".to_string()))
            }
            Identity::Anonymous => Err(AppError::Unauthenticated),
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            Identity::Instructor(_) => Role::Instructor.as_str(),
            Identity::Player(_) => Role::Player.as_str(),
            Identity::Anonymous => "anonymous",
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Identity {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("identity_guard");
        let _guard = auth_span.enter();

        let token = request
            .cookies()
            .get_private(SESSION_COOKIE)
            .map(|c| c.value().to_string());

        let Some(token) = token else {
            return Outcome::Success(Identity::Anonymous);
        };

        let db = match request.rocket().state::<SqlitePool>() {
            Some(pool) => pool,
            _ => {
                tracing::error!("Database pool not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        match get_session_by_token(db, &token).await {
            Ok(session) if session.is_valid() => {
                let identity = Identity::from(&session);
                tracing::info!(role = identity.role_name(), subject_id = session.subject_id, "Resolved session");
                Outcome::Success(identity)
            }
            Ok(_) => {
                tracing::warn!("Session token expired");
                Outcome::Success(Identity::Anonymous)
            }
            Err(AppError::Unauthenticated) => {
                tracing::warn!("Unknown session token");
                Outcome::Success(Identity::Anonymous)
            }
            Err(err) => {
                err.log_and_record("Resolving session");
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

/// Request bodies that Rocket could not parse into the route's form or JSON.
#[catch(400)]
pub fn bad_request_api(req: &Request) -> Custom<Json<ValidationResponse>> {
    tracing::warn!(uri = %req.uri(), "Malformed request body");
    Custom(
        Status::BadRequest,
        Json(ValidationResponse::with_error("request", "Malformed request")),
    )
}

#[catch(422)]
pub fn unprocessable_api(req: &Request) -> Custom<Json<ValidationResponse>> {
    tracing::warn!(uri = %req.uri(), "Request body has invalid fields");
    Custom(
        Status::UnprocessableEntity,
        Json(ValidationResponse::with_error(
            "request",
            "Request body has missing or invalid fields",
        )),
    )
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<ValidationResponse>> {
    Custom(
        Status::Unauthorized,
        Json(ValidationResponse::with_error(
            "authentication",
            "Authentication required",
        )),
    )
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<ValidationResponse>> {
    tracing::warn!("Forbidden access attempt");
    Custom(
        Status::Forbidden,
        Json(ValidationResponse::with_error(
            "permission",
            "You don't have permission to perform this action",
        )),
    )
}

#[catch(404)]
pub fn not_found_api(_req: &Request) -> Custom<Json<ValidationResponse>> {
    Custom(
        Status::NotFound,
        Json(ValidationResponse::with_error("resource", "Resource not found")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_checks_are_exhaustive() {
        assert_eq!(Identity::Instructor(3).require_instructor().unwrap(), 3);
        assert!(matches!(
            Identity::Player(3).require_instructor(),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            Identity::Anonymous.require_instructor(),
            Err(AppError::Unauthenticated)
        ));

        assert_eq!(Identity::Player(9).require_player().unwrap(), 9);
        assert!(matches!(
            Identity::Instructor(9).require_player(),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            Identity::Anonymous.require_player(),
            Err(AppError::Unauthenticated)
        ));
    }
}
