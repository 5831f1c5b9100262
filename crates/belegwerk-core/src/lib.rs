// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Belegwerk: core types and error definitions shared across all crates.

pub mod config;
pub mod cooldown;
pub mod error;
pub mod human_errors;
pub mod types;

pub use config::{AppConfig, CaptureConfig, SecondaryConfig, UploadConfig};
pub use cooldown::CooldownCache;
pub use error::BelegError;
pub use types::*;
