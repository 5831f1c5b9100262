// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bucket naming: the two historical conventions and switching between them.

use belegwerk_core::UploadConfig;

/// The two bucket-name suffixes a project may be reachable under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNaming {
    pub legacy_suffix: String,
    pub current_suffix: String,
}

impl From<&UploadConfig> for BucketNaming {
    fn from(config: &UploadConfig) -> Self {
        Self {
            legacy_suffix: config.legacy_bucket_suffix.clone(),
            current_suffix: config.current_bucket_suffix.clone(),
        }
    }
}

impl BucketNaming {
    /// Same bucket under the other convention, `None` if `bucket` uses
    /// neither.
    pub fn alternate(&self, bucket: &str) -> Option<String> {
        if let Some(stem) = bucket.strip_suffix(&self.current_suffix) {
            Some(format!("{stem}{}", self.legacy_suffix))
        } else {
            bucket
                .strip_suffix(&self.legacy_suffix)
                .map(|stem| format!("{stem}{}", self.current_suffix))
        }
    }

    /// Bucket the primary upload should use.
    pub fn preferred(&self, configured: &str, prefer_legacy: bool) -> String {
        if prefer_legacy && configured.ends_with(&self.current_suffix) {
            self.alternate(configured).unwrap_or_else(|| configured.to_string())
        } else {
            configured.to_string()
        }
    }
}
