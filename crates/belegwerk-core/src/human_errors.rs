// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the capture and save flows.
//
// Every technical error maps to a plain sentence plus a suggestion the user
// can act on. Severity drives how the front end presents it.

use crate::error::BelegError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Network blip or slow backend; retrying is reasonable.
    Transient,
    /// The user has to do something first (move a corner, rescan).
    ActionRequired,
    /// Retrying the same input will not help.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether the save may be retried as-is.
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: impl Into<String>, retriable: bool, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable,
            severity,
        }
    }
}

/// Convert a `BelegError` into something a user can act on.
pub fn humanize_error(err: &BelegError) -> HumanError {
    match err {
        // -- Capture --
        BelegError::DegenerateQuadrilateral(_) => HumanError::new(
            "The receipt outline doesn't look right.",
            "Drag the four corners onto the corners of the receipt, then try again.",
            false,
            Severity::ActionRequired,
        ),
        BelegError::Viewport(_) => HumanError::new(
            "The preview isn't ready yet.",
            "Wait for the image to appear, then adjust the corners.",
            true,
            Severity::Transient,
        ),
        BelegError::ImageError(_) | BelegError::NoImage => HumanError::new(
            "We couldn't read the scanned image.",
            "Scan the receipt again on a flat, well-lit surface.",
            false,
            Severity::ActionRequired,
        ),
        BelegError::TextRecognition(_) => HumanError::new(
            "We couldn't read the text on this receipt.",
            "Try scanning again with better lighting and the receipt in focus.",
            true,
            Severity::Transient,
        ),
        BelegError::StructuredExtractionParse(_) => HumanError::new(
            "Some receipt details were filled in automatically.",
            "Check the store, date and total before saving.",
            false,
            Severity::ActionRequired,
        ),

        // -- Save --
        BelegError::StreamUnavailable(_) => HumanError::new(
            "The scanned image is no longer available.",
            "Scan the receipt again and save it right away.",
            false,
            Severity::ActionRequired,
        ),
        BelegError::ObjectNotFound(_) => HumanError::new(
            "The storage location for receipts couldn't be found.",
            "This is usually a setup problem. Please report it.",
            false,
            Severity::Permanent,
        ),
        BelegError::Transport(detail) => humanize_transport(detail),
        BelegError::UploadRejected { status, .. } if *status >= 500 => HumanError::new(
            "The storage service had a problem.",
            "Wait a moment and save again.",
            true,
            Severity::Transient,
        ),
        BelegError::UploadRejected { status, .. } => HumanError::new(
            "The storage service refused the receipt.",
            format!("Check that you are signed in, then try again. (Status {status})"),
            false,
            Severity::ActionRequired,
        ),
        BelegError::ReferenceResolutionTimeout { .. } => HumanError::new(
            "The receipt was sent but isn't available yet.",
            "Storage can take a moment to catch up. Try saving again shortly.",
            true,
            Severity::Transient,
        ),
        BelegError::MetadataPersist { .. } => HumanError::new(
            "The image was saved but its details were not.",
            "Save again. The image will not be uploaded twice.",
            true,
            Severity::Transient,
        ),

        // -- Storage / setup --
        BelegError::Database(_) => HumanError::new(
            "Local receipt storage had a problem.",
            "Close and reopen the app. Saved receipts are not affected.",
            true,
            Severity::Transient,
        ),
        BelegError::Config(detail) => HumanError::new(
            "The settings file has an invalid value.",
            format!("Fix the setting and restart. ({detail})"),
            false,
            Severity::Permanent,
        ),
        BelegError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => HumanError::new(
            "The file couldn't be found.",
            "It may have been moved or deleted. Try choosing the file again.",
            false,
            Severity::ActionRequired,
        ),
        BelegError::Io(io_err) if io_err.kind() == std::io::ErrorKind::PermissionDenied => {
            HumanError::new(
                "The app doesn't have permission to use that file.",
                "Check the file permissions, or copy the file somewhere else first.",
                false,
                Severity::ActionRequired,
            )
        }
        BelegError::Io(_) => HumanError::new(
            "There was a problem reading or writing a file.",
            "Try again. If this keeps happening, your device's storage may be full.",
            true,
            Severity::Transient,
        ),
        BelegError::Serialization(_) => HumanError::new(
            "The app had an internal data problem.",
            "Try again. If this keeps happening, please report it.",
            true,
            Severity::Transient,
        ),
    }
}

fn humanize_transport(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        HumanError::new(
            "The upload took too long.",
            "Check your connection and save again.",
            true,
            Severity::Transient,
        )
    } else if lower.contains("unauthorized") || lower.contains("permission") {
        HumanError::new(
            "You're not allowed to save to this account.",
            "Sign in again, then save the receipt.",
            false,
            Severity::ActionRequired,
        )
    } else {
        HumanError::new(
            "We couldn't reach the storage service.",
            format!("Check your connection and save again. (Detail: {detail})"),
            true,
            Severity::Transient,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_timeout_is_transient() {
        let err = BelegError::ReferenceResolutionTimeout {
            attempts: 3,
            last_error: "object not yet visible".into(),
        };
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.retriable);
    }

    #[test]
    fn degenerate_outline_needs_user() {
        let human = humanize_error(&BelegError::DegenerateQuadrilateral("collinear".into()));
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(!human.retriable);
    }

    #[test]
    fn server_rejection_is_retriable_client_rejection_is_not() {
        let server = humanize_error(&BelegError::UploadRejected {
            status: 503,
            detail: "unavailable".into(),
        });
        let client = humanize_error(&BelegError::UploadRejected {
            status: 403,
            detail: "forbidden".into(),
        });
        assert!(server.retriable);
        assert!(!client.retriable);
    }

    #[test]
    fn transport_timeout_detected() {
        let human = humanize_error(&BelegError::Transport("request timed out after 30s".into()));
        assert_eq!(human.message, "The upload took too long.");
    }
}
