// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Heuristic receipt parser: store name, total, date and line items pulled
// out of raw OCR text with a handful of regular expressions.

use std::sync::LazyLock;

use belegwerk_core::{LineItem, ReceiptInfo, ReceiptMetadata, StoreInfo, StructuredReceipt};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use tracing::{debug, warn};

/// Label recorded in `metadata.processedBy` for parser output.
pub const HEURISTIC_PROCESSOR: &str = "heuristic";

/// Patterns compiled once. On a compile failure parsing degrades to an empty
/// receipt.
struct Patterns {
    labelled_total: Regex,
    money: Regex,
    date: Regex,
    item_line: Regex,
    summary_line: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            labelled_total: Regex::new(r"(?i)\b(total|amount|balance)\b.*?([0-9]+[.,][0-9]{2})")?,
            money: Regex::new(r"([0-9]+[.,][0-9]{2})")?,
            date: Regex::new(r"(\d{4}-\d{2}-\d{2})|(\d{2}[/.\-]\d{2}[/.\-]\d{4})")?,
            item_line: Regex::new(r"^\s*(.+?)\s+([0-9]+[.,][0-9]{2})\s*$")?,
            summary_line: Regex::new(r"(?i)\b(sub\s*-?\s*total|total|tax|balance|amount\s+due|change)\b")?,
        })
    }
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::compile);

fn patterns() -> Option<&'static Patterns> {
    match &*PATTERNS {
        Ok(p) => Some(p),
        Err(err) => {
            warn!("receipt patterns failed to compile: {err}");
            None
        }
    }
}

/// Parse OCR text into a receipt. `now` stands in for the date when none can
/// be read.
pub fn parse_receipt_text(text: &str, now: DateTime<Utc>) -> StructuredReceipt {
    let mut receipt = StructuredReceipt {
        metadata: Some(ReceiptMetadata {
            ocr_text: Some(text.to_string()),
            processed_by: Some(HEURISTIC_PROCESSOR.into()),
            ..Default::default()
        }),
        ..Default::default()
    };
    receipt.receipt.date_timestamp = now.timestamp_millis();
    if text.trim().is_empty() {
        return receipt;
    }
    let Some(patterns) = patterns() else {
        return receipt;
    };

    receipt.store = StoreInfo {
        name: text.lines().map(str::trim).find(|l| !l.is_empty()).map(String::from),
        ..Default::default()
    };

    receipt.receipt = ReceiptInfo {
        total: find_total(patterns, text).unwrap_or(0.0),
        ..receipt.receipt
    };

    if let Some((date, millis)) = find_date_with(patterns, text) {
        receipt.receipt.date = Some(date);
        receipt.receipt.date_timestamp = millis;
        receipt.receipt.receipt_date_timestamp = millis;
    }

    receipt.items = text
        .lines()
        .filter(|line| !patterns.summary_line.is_match(line))
        .filter_map(|line| {
            let caps = patterns.item_line.captures(line)?;
            let price = parse_amount(&caps[2])?;
            Some(LineItem {
                name: Some(caps[1].trim().to_string()),
                total_price: Some(price),
                ..Default::default()
            })
        })
        .collect();

    debug!(
        total = receipt.receipt.total,
        items = receipt.items.len(),
        dated = receipt.receipt.date.is_some(),
        "heuristic parse complete"
    );
    receipt
}

fn find_total(patterns: &Patterns, text: &str) -> Option<f64> {
    if let Some(caps) = patterns.labelled_total.captures(text) {
        return parse_amount(&caps[2]);
    }
    patterns
        .money
        .find_iter(text)
        .last()
        .and_then(|m| parse_amount(m.as_str()))
}

/// Amounts always carry exactly two decimals; a comma is the decimal mark.
fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}

/// First date in `text` as printed, plus its midnight-UTC epoch millis.
pub fn find_date(text: &str) -> Option<(String, i64)> {
    find_date_with(patterns()?, text)
}

fn find_date_with(patterns: &Patterns, text: &str) -> Option<(String, i64)> {
    patterns.date.find_iter(text).find_map(|m| {
        let raw = m.as_str();
        parse_date(raw).map(|date| (raw.to_string(), date))
    })
}

/// Epoch millis (midnight UTC) of an ISO or day-first date string.
pub fn parse_date(raw: &str) -> Option<i64> {
    let normalized = raw.replace(['.', '-'], "/");
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&normalized, "%d/%m/%Y"))
        .ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}
