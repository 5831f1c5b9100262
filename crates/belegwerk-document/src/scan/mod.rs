// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanning pipeline: capture flow, enhancement stages, text recognition and
// receipt field extraction.

pub mod capture;
pub mod enhance;
pub mod extract;
pub mod parse;

pub use capture::{ProcessedCapture, ScannedPage, ScannerResult, process_capture, recrop_and_enhance};
pub use enhance::ScanEnhancer;
pub use extract::{
    ExtractedReceipt, ExtractionSource, StructuredExtractor, TextRecognizer, extract_receipt,
    recognize_and_extract, sanitize_ocr,
};
pub use parse::parse_receipt_text;
