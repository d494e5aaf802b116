pub mod test_db {
    use crate::db::{create_instructor, create_player, ensure_master_instructor};
    use crate::error::AppError;
    use crate::models::{Instructor, NewPlayer, Player};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static MASTER_CODE: &str = "COACH123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        instructors: Vec<String>,
        players: Vec<NewPlayer>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn instructor(mut self, name: &str) -> Self {
            self.instructors.push(name.to_string());
            self
        }

        pub fn player(mut self, name: &str, age: Option<i64>, phone: Option<&str>) -> Self {
            self.players.push(NewPlayer {
                name: name.to_string(),
                age,
                phone: phone.map(String::from),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .parse_filters("debug")
                    .is_test(true)
                    .try_init();
            });

            // One connection, kept open: every connection to `sqlite::memory:`
            // would otherwise see its own empty database.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let head_coach = ensure_master_instructor(&pool, MASTER_CODE).await?;

            let mut instructors = HashMap::new();
            for name in &self.instructors {
                let instructor = create_instructor(&pool, MASTER_CODE, MASTER_CODE, name).await?;
                instructors.insert(name.clone(), instructor);
            }

            let mut players = HashMap::new();
            for new_player in &self.players {
                let player = create_player(&pool, new_player).await?;
                players.insert(new_player.name.clone(), player);
            }

            Ok(TestDb {
                pool,
                head_coach,
                instructors,
                players,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub head_coach: Instructor,
        pub instructors: HashMap<String, Instructor>,
        pub players: HashMap<String, Player>,
    }

    impl TestDb {
        pub fn instructor(&self, name: &str) -> &Instructor {
            self.instructors
                .get(name)
                .unwrap_or_else(|| panic!("No test instructor named {}", name))
        }

        pub fn player(&self, name: &str) -> &Player {
            self.players
                .get(name)
                .unwrap_or_else(|| panic!("No test player named {}", name))
        }
    }

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .instructor("Coach Carter")
            .player("Jane Doe", Some(12), Some("555-123-4567"))
            .player("Sam Lee", Some(16), None)
            .player("Ana Ruiz", None, Some("+15550001111"))
            .build()
            .await
            .expect("Failed to build test database")
    }
}

pub mod test_client {
    use super::test_db::{MASTER_CODE, TestDb};
    use crate::auth::random_hex;
    use crate::config::AppConfig;
    use crate::init_rocket;
    use crate::sms::Messenger;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::{Value, json};

    /// A fixed, non-zero 256-bit key so private cookies work under test.
    pub static TEST_SECRET: &str =
        "8f4c1d2e3b5a69788796a5b4c3d2e1f00f1e2d3c4b5a69788796a5b4c3d2e1f0";

    pub fn test_config() -> AppConfig {
        let upload_dir = std::env::temp_dir()
            .join(format!("swing-tracker-test-{}", random_hex(12)))
            .to_string_lossy()
            .to_string();

        AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some("sqlite::memory:".to_string()),
            "SESSION_SECRET" => Some(TEST_SECRET.to_string()),
            "INSTRUCTOR_MASTER_CODE" => Some(MASTER_CODE.to_string()),
            "UPLOAD_DIR" => Some(upload_dir.clone()),
            _ => None,
        })
        .expect("Failed to build test config")
    }

    pub async fn setup_test_client(test_db: &TestDb, messenger: Messenger) -> Client {
        let rocket = init_rocket(test_db.pool.clone(), test_config(), messenger)
            .await
            .expect("Failed to build rocket");

        Client::tracked(rocket)
            .await
            .expect("Failed to create test client")
    }

    pub async fn post_json(client: &Client, uri: &str, body: Value) -> (Status, Value) {
        let response = client
            .post(uri)
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;

        let status = response.status();
        let body = response.into_json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn put_json(client: &Client, uri: &str, body: Value) -> (Status, Value) {
        let response = client
            .put(uri)
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;

        let status = response.status();
        let body = response.into_json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn post_form(client: &Client, uri: &str, body: &str) -> (Status, Value) {
        let response = client
            .post(uri)
            .header(ContentType::Form)
            .body(body.to_string())
            .dispatch()
            .await;

        let status = response.status();
        let body = response.into_json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub static MULTIPART_BOUNDARY: &str = "swing-tracker-test-boundary";

    /// One multipart part. Parts with a filename arrive as file uploads.
    pub struct Part<'a> {
        pub name: &'a str,
        pub filename: Option<&'a str>,
        pub content: &'a str,
    }

    pub async fn post_multipart(client: &Client, uri: &str, parts: &[Part<'_>]) -> (Status, Value) {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!("--{}\r\n", MULTIPART_BOUNDARY));
            match part.filename {
                Some(filename) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                    part.name, filename
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    part.name
                )),
            }
            body.push_str(part.content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", MULTIPART_BOUNDARY));

        let content_type =
            ContentType::new("multipart", "form-data").with_params(("boundary", MULTIPART_BOUNDARY));

        let response = client
            .post(uri)
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        let status = response.status();
        let body = response.into_json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get_json(client: &Client, uri: &str) -> (Status, Value) {
        let response = client.get(uri).dispatch().await;

        let status = response.status();
        let body = response.into_json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn login_instructor(client: &Client, code: &str) -> Value {
        let (status, body) = post_json(client, "/api/login/instructor", json!({ "code": code })).await;
        assert_eq!(status, Status::Ok, "Instructor login failed: {}", body);
        body
    }

    pub async fn login_player(client: &Client, code: &str) -> Value {
        let (status, body) = post_json(client, "/api/login/player", json!({ "code": code })).await;
        assert_eq!(status, Status::Ok, "Player login failed: {}", body);
        body
    }
}

pub mod fake_sms {
    use crate::error::AppError;
    use crate::sms::SmsGateway;
    use std::sync::Mutex;

    /// Accepts every message and keeps it for inspection.
    #[derive(Default)]
    pub struct RecordingGateway {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingGateway {
        pub fn messages(&self) -> Vec<(String, String)> {
            self.sent.lock().map(|m| m.clone()).unwrap_or_default()
        }
    }

    #[rocket::async_trait]
    impl SmsGateway for RecordingGateway {
        async fn send(&self, to: &str, body: &str) -> Result<(), AppError> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((to.to_string(), body.to_string()));
            }
            Ok(())
        }
    }

    /// Rejects every message the way an unreachable provider would.
    pub struct FailingGateway;

    #[rocket::async_trait]
    impl SmsGateway for FailingGateway {
        async fn send(&self, _to: &str, _body: &str) -> Result<(), AppError> {
            Err(AppError::DeliveryFailed(
                "Twilio returned 400 Bad Request: invalid 'To' number".to_string(),
            ))
        }
    }
}
