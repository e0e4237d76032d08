use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::lives::MAX_LIVES;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub content_catalog_path: Option<String>,
    pub exam: ExamSettings,
}

/// Timing and penalty policy for proctored exams.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExamSettings {
    pub duration_seconds: u64,
    pub submit_unlock_seconds: u64,
    pub grace_period_seconds: u64,
    pub max_lives: u8,
    pub life_restore_seconds: u64,
    pub tick_interval_ms: u64,
    pub time_critical_seconds: u64,
    /// Finished sessions kept in memory before older ones are read back
    /// from the store.
    pub archive_capacity: usize,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            duration_seconds: 3 * 60 * 60,
            submit_unlock_seconds: 2 * 60 * 60,
            grace_period_seconds: 10,
            max_lives: 3,
            life_restore_seconds: 10 * 60,
            tick_interval_ms: 1000,
            time_critical_seconds: 10 * 60,
            archive_capacity: 1024,
        }
    }
}

impl ExamSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn life_restore_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.life_restore_seconds as i64)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if !(1..=MAX_LIVES).contains(&self.max_lives) {
            return Err(config::ConfigError::Message(format!(
                "exam.max_lives must be between 1 and {}",
                MAX_LIVES
            )));
        }
        if self.archive_capacity == 0 {
            return Err(config::ConfigError::Message(
                "exam.archive_capacity must be at least 1".to_string(),
            ));
        }
        if self.submit_unlock_seconds > self.duration_seconds {
            return Err(config::ConfigError::Message(
                "exam.submit_unlock_seconds cannot exceed exam.duration_seconds".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                match env::var("REDIS_PASSWORD") {
                    Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                    Err(_) => format!("redis://{}:{}/0", host, port),
                }
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "proctor".to_string());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                tracing::warn!("Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let content_catalog_path = settings
            .get_string("content.catalog_path")
            .or_else(|_| env::var("EXAM_CATALOG_PATH"))
            .ok();

        let exam = match settings.get::<ExamSettings>("exam") {
            Ok(exam) => exam,
            Err(config::ConfigError::NotFound(_)) => ExamSettings::default(),
            Err(e) => return Err(e),
        };
        exam.validate()?;

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            bind_addr,
            content_catalog_path,
            exam,
        })
    }
}
