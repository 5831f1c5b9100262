// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text recognition and structured extraction seams, with the mandatory
// fallback to the heuristic parser.

use std::sync::LazyLock;

use async_trait::async_trait;
use belegwerk_core::error::{BelegError, Result};
use belegwerk_core::{ReceiptMetadata, StructuredReceipt};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::parse::{self, parse_receipt_text};

/// Longest OCR text handed to the extractor, in characters.
pub const MAX_EXTRACTION_CHARS: usize = 2000;

/// Label recorded in `metadata.processedBy` when the extractor succeeded and
/// did not name itself.
pub const MODEL_PROCESSOR: &str = "model";

/// On-device text recognition.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &RgbaImage) -> Result<String>;
}

/// Model-backed extraction. Returns the model's raw textual answer, which is
/// expected to be a JSON object, possibly inside a code fence.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(&self, raw_text: &str) -> Result<String>;
}

/// Where a receipt's structured fields came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    Model,
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct ExtractedReceipt {
    pub receipt: StructuredReceipt,
    pub source: ExtractionSource,
}

static HORIZONTAL_SPACE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[ \t]+"));
static BLANK_RUN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\n{3,}"));

/// Collapse runs of spaces and tabs, squeeze 3+ newlines to 2 and cap the
/// length.
pub fn sanitize_ocr(text: &str) -> String {
    let mut cleaned = text.to_string();
    if let Ok(re) = &*HORIZONTAL_SPACE {
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }
    if let Ok(re) = &*BLANK_RUN {
        cleaned = re.replace_all(&cleaned, "\n\n").into_owned();
    }
    match cleaned.char_indices().nth(MAX_EXTRACTION_CHARS) {
        Some((cut, _)) => cleaned[..cut].to_string(),
        None => cleaned,
    }
}

/// Strip an optional ```json fence and parse the object.
pub fn parse_structured_response(response: &str) -> Result<StructuredReceipt> {
    let mut text = response.trim();
    if text.is_empty() {
        return Err(BelegError::StructuredExtractionParse("empty response".into()));
    }
    text = text.strip_prefix("```json").unwrap_or(text);
    text = text.strip_prefix("```").unwrap_or(text);
    text = text.strip_suffix("```").unwrap_or(text);
    serde_json::from_str(text.trim())
        .map_err(|err| BelegError::StructuredExtractionParse(err.to_string()))
}

fn is_timeout(err: &BelegError) -> bool {
    match err {
        BelegError::Transport(detail) => {
            let lower = detail.to_ascii_lowercase();
            lower.contains("timed out") || lower.contains("timeout")
        }
        _ => false,
    }
}

/// Run the extractor and fall back to the heuristic parser on any failure.
///
/// A timed-out extractor call is retried once. Parse failures are never
/// returned; they are logged and recovered locally.
#[instrument(skip_all, fields(chars = raw_text.len()))]
pub async fn extract_receipt(
    extractor: &dyn StructuredExtractor,
    raw_text: &str,
    now: DateTime<Utc>,
) -> ExtractedReceipt {
    let cleaned = sanitize_ocr(raw_text);

    let mut response = extractor.extract(&cleaned).await;
    if response.as_ref().is_err_and(is_timeout) {
        warn!("extractor timed out, retrying once");
        response = extractor.extract(&cleaned).await;
    }

    let parsed = response.and_then(|text| parse_structured_response(&text));
    match parsed {
        Ok(mut receipt) => {
            fill_model_defaults(&mut receipt, raw_text, now);
            info!("structured fields extracted by model");
            ExtractedReceipt {
                receipt,
                source: ExtractionSource::Model,
            }
        }
        Err(err) => {
            warn!("structured extraction failed, using heuristic parser: {err}");
            ExtractedReceipt {
                receipt: parse_receipt_text(raw_text, now),
                source: ExtractionSource::Heuristic,
            }
        }
    }
}

/// Recognize text in `image`, then extract fields from it.
pub async fn recognize_and_extract(
    recognizer: &dyn TextRecognizer,
    extractor: &dyn StructuredExtractor,
    image: &RgbaImage,
    now: DateTime<Utc>,
) -> Result<(String, ExtractedReceipt)> {
    let text = recognizer.recognize(image).await?;
    debug!(chars = text.len(), "text recognized");
    let extracted = extract_receipt(extractor, &text, now).await;
    Ok((text, extracted))
}

fn fill_model_defaults(receipt: &mut StructuredReceipt, raw_text: &str, now: DateTime<Utc>) {
    let info = &mut receipt.receipt;
    if info.date_timestamp <= 0 {
        info.date_timestamp = info
            .date
            .as_deref()
            .and_then(parse::parse_date)
            .unwrap_or_else(|| now.timestamp_millis());
    }
    let metadata = receipt.metadata.get_or_insert_with(ReceiptMetadata::default);
    if metadata.ocr_text.is_none() {
        metadata.ocr_text = Some(raw_text.to_string());
    }
    if metadata.processed_by.is_none() {
        metadata.processed_by = Some(MODEL_PROCESSOR.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedExtractor {
        responses: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedExtractor {
        fn new(mut responses: Vec<Result<String>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StructuredExtractor for ScriptedExtractor {
        async fn extract(&self, _raw_text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(BelegError::Transport("no more responses".into())))
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn sanitize_collapses_whitespace_and_caps() {
        assert_eq!(sanitize_ocr("a  \t b\n\n\n\nc"), "a b\n\nc");
        let long = "x".repeat(MAX_EXTRACTION_CHARS + 50);
        assert_eq!(sanitize_ocr(&long).chars().count(), MAX_EXTRACTION_CHARS);
    }

    #[test]
    fn fenced_json_parses() {
        let r = parse_structured_response(
            "```json\n{\"store\":{\"name\":\"Cafe\"},\"receipt\":{\"total\":3.5}}\n```",
        )
        .unwrap();
        assert_eq!(r.store.name.as_deref(), Some("Cafe"));
        assert_eq!(r.receipt.total, 3.5);
    }

    #[test]
    fn null_numbers_read_as_zero() {
        let r = parse_structured_response(
            r#"{"store":{"name":"Cafe"},"receipt":{"total":4.2,"subtotal":null,"tax":null,"dateTimestamp":null},"items":null}"#,
        )
        .unwrap();
        assert_eq!(r.store.name.as_deref(), Some("Cafe"));
        assert_eq!(r.receipt.total, 4.2);
        assert_eq!(r.receipt.subtotal, 0.0);
        assert_eq!(r.receipt.tax, 0.0);
        assert_eq!(r.receipt.date_timestamp, 0);
        assert!(r.items.is_empty());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            parse_structured_response("I could not read this receipt"),
            Err(BelegError::StructuredExtractionParse(_))
        ));
    }

    #[tokio::test]
    async fn model_answer_is_used() {
        let extractor = ScriptedExtractor::new(vec![Ok(
            r#"{"store":{"name":"Cafe"},"receipt":{"total":4.2,"date":"2024-05-01"}}"#.into(),
        )]);
        let out = extract_receipt(&extractor, "CAFE\nTOTAL 4.20", now()).await;
        assert_eq!(out.source, ExtractionSource::Model);
        assert_eq!(out.receipt.receipt.total, 4.2);
        assert_eq!(out.receipt.receipt.date_timestamp, parse::parse_date("2024-05-01").unwrap());
        assert_eq!(
            out.receipt.metadata.unwrap().processed_by.as_deref(),
            Some(MODEL_PROCESSOR)
        );
    }

    #[tokio::test]
    async fn garbage_falls_back_to_heuristics() {
        let extractor = ScriptedExtractor::new(vec![Ok("sorry".into())]);
        let out = extract_receipt(&extractor, "SHOP\nTOTAL 9.99", now()).await;
        assert_eq!(out.source, ExtractionSource::Heuristic);
        assert_eq!(out.receipt.receipt.total, 9.99);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_retried_once() {
        let extractor = ScriptedExtractor::new(vec![
            Err(BelegError::Transport("request timed out".into())),
            Err(BelegError::Transport("request timed out".into())),
        ]);
        let out = extract_receipt(&extractor, "SHOP\nTOTAL 1.00", now()).await;
        assert_eq!(out.source, ExtractionSource::Heuristic);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }
}
