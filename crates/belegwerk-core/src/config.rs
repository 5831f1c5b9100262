// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BelegError, Result};

/// Persistent application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture normalization and enhancement parameters.
    pub capture: CaptureConfig,
    /// Upload tiers, retry timing and bucket naming.
    pub upload: UploadConfig,
}

impl AppConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        debug!(path = %path.as_ref().display(), "configuration loaded");
        Ok(config)
    }

    /// Like [`AppConfig::load`], but falls back to defaults when the file is
    /// missing or unreadable.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.as_ref().display(), "using default configuration: {err}");
                Self::default()
            }
        }
    }

    /// Reject values that would make the pipeline or the retry loop meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.capture.max_dimension == 0 {
            return Err(BelegError::Config("capture.max_dimension must be positive".into()));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(BelegError::Config("capture.jpeg_quality must be within 1..=100".into()));
        }
        if self.upload.max_attempts == 0 {
            return Err(BelegError::Config("upload.max_attempts must be at least 1".into()));
        }
        if self.upload.initial_delay_ms > self.upload.max_delay_ms {
            return Err(BelegError::Config(
                "upload.initial_delay_ms must not exceed upload.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Capture normalization and enhancement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Pixels whose darkest channel is below this value count as content when
    /// trimming margins. 230 keeps faint thermal print while dropping paper
    /// background.
    pub trim_threshold: u8,
    /// Longest edge after downscaling, in pixels.
    pub max_dimension: u32,
    /// Per-channel contrast multiplier.
    pub contrast: f32,
    /// Per-channel brightness offset applied after the multiplier.
    pub brightness: f32,
    /// Run the 3x3 sharpen pass as the final stage.
    pub sharpen: bool,
    /// JPEG quality of the persisted asset (1-100).
    pub jpeg_quality: u8,
    /// Drawn radius of a corner handle in display pixels; touches within
    /// twice this distance select the handle.
    pub handle_radius: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            trim_threshold: 230,
            max_dimension: 1600,
            contrast: 1.15,
            brightness: -10.0,
            sharpen: true,
            jpeg_quality: 90,
            handle_radius: 20.0,
        }
    }
}

/// Upload tiers, retry timing and bucket naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Configured primary bucket name.
    pub bucket: String,
    /// Prefer the legacy bucket spelling when the configured one uses the
    /// current convention.
    pub prefer_legacy_bucket: bool,
    /// Suffix of the legacy bucket naming convention.
    pub legacy_bucket_suffix: String,
    /// Suffix of the current bucket naming convention.
    pub current_bucket_suffix: String,
    /// Reference-resolution attempts per round.
    pub max_attempts: u32,
    /// Base delay of the resolution backoff, in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap of the resolution backoff, in milliseconds.
    pub max_delay_ms: u64,
    /// Compare the stored object's digest before re-uploading after a
    /// resolution timeout.
    pub verify_before_reupload: bool,
    /// Pre-signed preset provider tried before the primary store.
    pub secondary: Option<SecondaryConfig>,
    /// De-duplication window for save listeners, in milliseconds.
    pub listener_cooldown_ms: u64,
}

impl UploadConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn listener_cooldown(&self) -> Duration {
        Duration::from_millis(self.listener_cooldown_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: "belegwerk.firebasestorage.app".into(),
            prefer_legacy_bucket: true,
            legacy_bucket_suffix: "appspot.com".into(),
            current_bucket_suffix: "firebasestorage.app".into(),
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            verify_before_reupload: true,
            secondary: None,
            listener_cooldown_ms: 5000,
        }
    }
}

/// Settings of the pre-signed preset provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryConfig {
    /// Optional folder prefix placed before `{owner}/{receipt}`.
    pub folder_root: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behavior() {
        let config = AppConfig::default();
        assert_eq!(config.capture.trim_threshold, 230);
        assert_eq!(config.capture.max_dimension, 1600);
        assert_eq!(config.capture.jpeg_quality, 90);
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.upload.initial_delay(), Duration::from_millis(1000));
        assert_eq!(config.upload.max_delay(), Duration::from_millis(10_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "capture": { "trim_threshold": 200 } }"#).unwrap();
        assert_eq!(config.capture.trim_threshold, 200);
        assert_eq!(config.capture.max_dimension, 1600);
        assert_eq!(config.upload.max_attempts, 3);
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.upload.max_attempts = 0;
        assert!(matches!(config.validate(), Err(BelegError::Config(_))));
    }
}
