#[cfg(test)]
mod tests {
    use crate::{
        auth::{Identity, Role, UserSession, issue_session},
        config::AppConfig,
        db::{clean_expired_sessions, create_session, delete_player, get_session_by_token, invalidate_session},
        error::AppError,
        test::test_client::test_config,
        test::test_db::{TestDb, TestDbBuilder},
    };
    use chrono::{Duration, NaiveDateTime, Utc};
    use rocket::tokio;

    async fn create_test_session() -> (i64, String, NaiveDateTime, TestDb) {
        let test_db = TestDbBuilder::new()
            .player("Session Player", Some(10), None)
            .build()
            .await
            .expect("Failed to build test database");

        let player_id = test_db.player("Session Player").id;
        let token = UserSession::generate_token();
        let expires_at = (Utc::now() + Duration::hours(1)).naive_utc();

        (player_id, token, expires_at, test_db)
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let (player_id, token, expires_at, test_db) = create_test_session().await;

        let session_id = create_session(&test_db.pool, &token, Role::Player, player_id, expires_at)
            .await
            .expect("Failed to create session");

        assert!(session_id > 0, "Session ID should be positive");

        let session = get_session_by_token(&test_db.pool, &token)
            .await
            .expect("Failed to get session");

        assert_eq!(session.subject_id, player_id);
        assert_eq!(session.role, Role::Player);
        assert_eq!(Identity::from(&session), Identity::Player(player_id));

        let expires_diff =
            (session.expires_at.and_utc().timestamp() - expires_at.and_utc().timestamp()).abs();
        assert!(
            expires_diff <= 1,
            "Expiration timestamps should match within 1 second"
        );
    }

    #[tokio::test]
    async fn test_get_nonexistent_session() {
        let test_db = TestDbBuilder::new()
            .build()
            .await
            .expect("Failed to build test database");

        let result = get_session_by_token(&test_db.pool, "nonexistent_token").await;

        assert!(
            matches!(result, Err(AppError::Unauthenticated)),
            "Unknown token should be unauthenticated, got {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_invalidate_session() {
        let (player_id, token, expires_at, test_db) = create_test_session().await;

        create_session(&test_db.pool, &token, Role::Player, player_id, expires_at)
            .await
            .expect("Failed to create session");

        assert!(get_session_by_token(&test_db.pool, &token).await.is_ok());

        invalidate_session(&test_db.pool, &token)
            .await
            .expect("Failed to invalidate session");

        let result = get_session_by_token(&test_db.pool, &token).await;
        assert!(result.is_err(), "Session should not exist after invalidation");
    }

    #[tokio::test]
    async fn test_clean_expired_sessions() {
        let (player_id, _, _, test_db) = create_test_session().await;
        let pool = &test_db.pool;

        let expired = UserSession::generate_token();
        let soon = UserSession::generate_token();
        let later = UserSession::generate_token();

        create_session(pool, &expired, Role::Player, player_id, (Utc::now() - Duration::hours(1)).naive_utc())
            .await
            .expect("Failed to create expired session");
        create_session(pool, &soon, Role::Player, player_id, (Utc::now() + Duration::minutes(1)).naive_utc())
            .await
            .expect("Failed to create expiring soon session");
        create_session(pool, &later, Role::Instructor, test_db.head_coach.id, (Utc::now() + Duration::days(1)).naive_utc())
            .await
            .expect("Failed to create future session");

        let cleaned_count = clean_expired_sessions(pool)
            .await
            .expect("Failed to clean expired sessions");

        assert_eq!(cleaned_count, 1, "Should have cleaned exactly 1 expired session");
        assert!(get_session_by_token(pool, &expired).await.is_err());
        assert!(get_session_by_token(pool, &soon).await.is_ok());
        assert!(get_session_by_token(pool, &later).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_validity() {
        let (player_id, token, expires_at, test_db) = create_test_session().await;

        let expired_token = UserSession::generate_token();
        create_session(
            &test_db.pool,
            &expired_token,
            Role::Player,
            player_id,
            (Utc::now() - Duration::hours(1)).naive_utc(),
        )
        .await
        .expect("Failed to create expired session");

        let session = get_session_by_token(&test_db.pool, &expired_token)
            .await
            .expect("Should be able to retrieve expired session");
        assert!(!session.is_valid(), "Expired session should be invalid");

        create_session(&test_db.pool, &token, Role::Player, player_id, expires_at)
            .await
            .expect("Failed to create valid session");

        let valid_session = get_session_by_token(&test_db.pool, &token)
            .await
            .expect("Should be able to retrieve valid session");
        assert!(valid_session.is_valid(), "Future session should be valid");
    }

    #[tokio::test]
    async fn test_issue_session_uses_configured_ttl() {
        let (player_id, _, _, test_db) = create_test_session().await;
        let config = test_config();

        let session = issue_session(&test_db.pool, &config, Role::Player, player_id)
            .await
            .expect("Failed to issue session");

        let ttl = session.expires_at - session.created_at;
        assert_eq!(ttl.num_hours(), config.session_ttl.num_hours());

        let stored = get_session_by_token(&test_db.pool, &session.token)
            .await
            .expect("Issued session should be stored");
        assert_eq!(stored.subject_id, player_id);
    }

    #[tokio::test]
    async fn test_issue_session_without_secret_is_configuration_error() {
        let (player_id, _, _, test_db) = create_test_session().await;
        let config = AppConfig {
            session_secret: None,
            ..test_config()
        };

        let result = issue_session(&test_db.pool, &config, Role::Player, player_id).await;

        assert!(
            matches!(result, Err(AppError::Configuration(_))),
            "Expected configuration error, got {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_deleting_player_ends_their_sessions() {
        let (player_id, token, expires_at, test_db) = create_test_session().await;

        create_session(&test_db.pool, &token, Role::Player, player_id, expires_at)
            .await
            .expect("Failed to create session");

        delete_player(&test_db.pool, player_id)
            .await
            .expect("Failed to delete player");

        assert!(get_session_by_token(&test_db.pool, &token).await.is_err());
    }
}
