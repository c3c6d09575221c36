//! Process-wide configuration for the caption/translation streaming core.
//!
//! Loaded once at startup from environment variables (optionally backed by a
//! `.env` file via `dotenvy`) and passed by value into the components that
//! need it. Nothing in the core re-reads the environment after `Settings::load`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid ALLOWED_ORIGINS value: {0}")]
    InvalidOrigins(String),
}

/// Promoter tuning: polling cadence and finalization thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoterSettings {
    /// How often the promoter samples ASR over the rolling window.
    pub poll_interval_ms: u64,
    /// Size of the rolling audio window, in seconds.
    pub window_seconds: u64,
    /// How long a partial must be unchanged before it is promoted to final.
    pub finalize_after_ms: u64,
    /// Minimum buffered audio, in seconds, before a tick calls ASR at all.
    pub min_window_seconds: f64,
}

impl Default for PromoterSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 800,
            window_seconds: 8,
            finalize_after_ms: 500,
            min_window_seconds: 1.0,
        }
    }
}

/// External service endpoints the core talks to as black boxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub asr_base_url: String,
    pub translation_base_url: String,
    /// Carried for completeness; the streaming core never calls TTS itself.
    pub tts_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub endpoints: ServiceEndpoints,
    pub promoter: PromoterSettings,
    /// Canonical sample rate; producers at other rates must resample upstream.
    pub sample_rate: u32,
    /// Empty means "allow any origin" (development only).
    pub allowed_origins: Vec<String>,
}

impl Settings {
    /// Loads settings from the process environment, falling back to the
    /// documented defaults for anything unset. Unknown `*_` variables
    /// are ignored rather than rejected.
    pub fn load() -> Result<Self, SettingsError> {
        // Missing .env is fine — production deployments set real env vars.
        let _ = dotenvy::dotenv();

        let raw = config::Config::builder()
            .set_default("asr_base_url", "http://localhost:8000")?
            .set_default("translation_base_url", "http://localhost:8001")?
            .set_default("tts_base_url", None::<String>)?
            .set_default("poll_interval_ms", 800i64)?
            .set_default("window_seconds", 8i64)?
            .set_default("finalize_after_ms", 500i64)?
            .set_default("sample_rate", 16000i64)?
            .set_default("allowed_origins", "")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let asr_base_url = raw.get_string("asr_base_url")?;
        let translation_base_url = raw.get_string("translation_base_url")?;
        let tts_base_url = raw.get_string("tts_base_url").ok().filter(|s| !s.is_empty());
        let poll_interval_ms = raw.get_int("poll_interval_ms")? as u64;
        let window_seconds = raw.get_int("window_seconds")? as u64;
        let finalize_after_ms = raw.get_int("finalize_after_ms")? as u64;
        let sample_rate = raw.get_int("sample_rate")? as u32;
        let origins_raw = raw.get_string("allowed_origins").unwrap_or_default();

        let allowed_origins = parse_origins(&origins_raw)?;

        if allowed_origins.is_empty() {
            tracing::warn!(
                "ALLOWED_ORIGINS is empty — accepting WebSocket upgrades from any origin. \
                 This is fine for local development but MUST be set in production."
            );
        }

        Ok(Self {
            endpoints: ServiceEndpoints {
                asr_base_url,
                translation_base_url,
                tts_base_url,
            },
            promoter: PromoterSettings {
                poll_interval_ms,
                window_seconds,
                finalize_after_ms,
                min_window_seconds: 1.0,
            },
            sample_rate,
            allowed_origins,
        })
    }
}

fn parse_origins(raw: &str) -> Result<Vec<String>, SettingsError> {
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowed_origins_means_permissive() {
        assert!(parse_origins("").unwrap().is_empty());
        assert!(parse_origins("   ").unwrap().is_empty());
    }

    #[test]
    fn allowed_origins_splits_and_trims() {
        let origins = parse_origins("https://a.example, https://b.example ,").unwrap();
        assert_eq!(origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn promoter_defaults_are_documented_values() {
        let p = PromoterSettings::default();
        assert_eq!(p.poll_interval_ms, 800);
        assert_eq!(p.window_seconds, 8);
        assert_eq!(p.finalize_after_ms, 500);
    }
}
