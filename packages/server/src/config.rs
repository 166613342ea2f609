use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Process-wide secret for cursor signing.
    pub cursor_secret: String,
    /// Base URL of the media gateway; when set (with the secret below) the
    /// signed-URL resolver is used, otherwise logical URIs pass through.
    pub media_base_url: Option<String>,
    pub media_url_secret: Option<String>,
    /// Directory export artifacts are written under.
    pub artifact_dir: String,
    /// Skew window for client timestamps, ± milliseconds.
    pub skew_window_ms: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            cursor_secret: env::var("CURSOR_SECRET").context("CURSOR_SECRET must be set")?,
            media_base_url: env::var("MEDIA_BASE_URL").ok(),
            media_url_secret: env::var("MEDIA_URL_SECRET").ok(),
            artifact_dir: env::var("ARTIFACT_DIR").unwrap_or_else(|_| "artifacts".to_string()),
            skew_window_ms: env::var("SKEW_WINDOW_MS")
                .unwrap_or_else(|_| (24 * 60 * 60 * 1000).to_string())
                .parse()
                .context("SKEW_WINDOW_MS must be a valid number")?,
        })
    }
}
