use std::path::PathBuf;
use std::time::Duration;

use attend_core::DEFAULT_MATCH_THRESHOLD;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Timezone the schedule and calendar are written in.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Mexico_City;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the gallery snapshot (JSON).
    pub gallery_path: PathBuf,
    /// Euclidean distance below which a match is accepted.
    pub match_threshold: f32,
    /// Time budget for one recognition request.
    pub request_budget: Duration,
    /// Institutional e-mail domain used to derive enrollment numbers.
    pub email_domain: String,
    /// Timezone used to read "now" when a request carries no timestamp.
    pub timezone: Tz,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("attend");

        let db_path = std::env::var("ATTEND_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let gallery_path = std::env::var("ATTEND_GALLERY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.json"));

        Self {
            db_path,
            gallery_path,
            match_threshold: env_f32("ATTEND_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            request_budget: Duration::from_millis(env_u64("ATTEND_REQUEST_BUDGET_MS", 5000)),
            email_domain: std::env::var("ATTEND_EMAIL_DOMAIN")
                .unwrap_or_else(|_| "upy.edu.mx".to_string()),
            timezone: env_tz("ATTEND_TZ", DEFAULT_TIMEZONE),
        }
    }

    /// Current wall-clock time in the configured timezone.
    pub fn now(&self) -> NaiveDateTime {
        wall_clock(self.timezone, Utc::now())
    }
}

/// Wall-clock reading of `at` in `tz`, independent of the host's zone.
pub fn wall_clock(tz: Tz, at: DateTime<Utc>) -> NaiveDateTime {
    at.with_timezone(&tz).naive_local()
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_tz(key: &str, default: Tz) -> Tz {
    match std::env::var(key) {
        Ok(name) => name.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %name, "unknown timezone, using {}", default);
            default
        }),
        Err(_) => default,
    }
}
