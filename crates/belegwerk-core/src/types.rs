// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for Belegwerk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique identifier for a saved receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId(pub Uuid);

impl ReceiptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReceiptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner used when no authenticated user is available.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// A bucket plus an object path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub path: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Canonical location of a receipt image: `receipts/{owner}/{id}.jpg`.
    pub fn for_receipt(bucket: impl Into<String>, owner_id: &str, id: ReceiptId) -> Self {
        Self::new(bucket, format!("receipts/{owner_id}/{id}.jpg"))
    }

    /// Same path, different bucket.
    pub fn with_bucket(&self, bucket: impl Into<String>) -> Self {
        Self::new(bucket, self.path.clone())
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}

/// The ordered fallback tiers of a save call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadTier {
    /// Pre-signed preset provider.
    Secondary,
    /// Streamed (or whole-file) upload to the primary location.
    Primary,
    /// Second upload of the same bytes after resolution timed out.
    Reupload,
    /// Upload to the bucket spelled with the other naming convention.
    AlternateBucket,
    /// Single-shot in-memory upload, the last resort.
    WholePayload,
}

/// How a provider failure bears on the next step of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadErrorClass {
    /// Object or location does not exist (yet).
    NotFound,
    /// Network or server trouble; trying again may help.
    Transient,
    /// Retrying the same request cannot succeed.
    Permanent,
}

// -- Receipt model ------------------------------------------------------------

/// Read an explicit `null` as the type's default. Extractor answers use
/// `null` for fields they could not read.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Store details printed on the receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreInfo {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

/// Totals, date and payment details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiptInfo {
    pub receipt_id: Option<String>,
    /// Date as printed (or as normalized by the extractor).
    pub date: Option<String>,
    pub time: Option<String>,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub card_last4: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub subtotal: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub tax: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub total: f64,
    pub category: Option<String>,
    /// Epoch milliseconds of `date`, or of the capture time when no date was
    /// readable.
    #[serde(deserialize_with = "null_as_default")]
    pub date_timestamp: i64,
    /// Epoch milliseconds of the purchase itself, zero when unknown.
    #[serde(deserialize_with = "null_as_default")]
    pub receipt_date_timestamp: i64,
}

impl ReceiptInfo {
    /// Category if it carries information; extractors sometimes emit an empty
    /// string or the literal `"null"`.
    pub fn meaningful_category(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != "null")
    }

    /// Purchase timestamp, falling back to the date timestamp.
    pub fn effective_receipt_timestamp(&self) -> i64 {
        if self.receipt_date_timestamp > 0 {
            self.receipt_date_timestamp
        } else {
            self.date_timestamp
        }
    }
}

/// One purchased line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineItem {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub total_price: Option<f64>,
    pub category: Option<String>,
}

impl LineItem {
    /// Total price, else unit price times quantity, else zero.
    pub fn effective_price(&self) -> f64 {
        match (self.total_price, self.unit_price, self.quantity) {
            (Some(total), _, _) => total,
            (None, Some(unit), Some(qty)) => unit * qty,
            _ => 0.0,
        }
    }
}

/// Free-form extras some receipts carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdditionalInfo {
    pub tax_number: Option<String>,
    pub cashier: Option<String>,
    pub store_number: Option<String>,
    pub notes: Option<String>,
}

/// Provenance of the structured data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiptMetadata {
    pub ocr_text: Option<String>,
    pub processed_by: Option<String>,
    pub uploaded_at: Option<String>,
    pub user_id: Option<String>,
}

/// Structured receipt, as produced by the extractor or the heuristic parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructuredReceipt {
    #[serde(deserialize_with = "null_as_default")]
    pub store: StoreInfo,
    #[serde(deserialize_with = "null_as_default")]
    pub receipt: ReceiptInfo,
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<LineItem>,
    pub additional: Option<AdditionalInfo>,
    pub metadata: Option<ReceiptMetadata>,
}

// -- Persisted record ---------------------------------------------------------

/// Final, persisted description of a saved receipt image.
///
/// Built only after an upload tier succeeded; later changes go through merge
/// updates of the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub receipt_id: ReceiptId,
    pub owner_id: String,
    /// Publicly resolvable URL of the image, if one was obtained.
    pub image_url: Option<String>,
    /// Asset id assigned by the secondary provider, if it stored the image.
    pub secondary_asset_id: Option<String>,
    pub raw_text: Option<String>,
    pub receipt: StructuredReceipt,
    pub created_at: DateTime<Utc>,
}

impl AssetRecord {
    pub fn new(
        receipt_id: ReceiptId,
        owner_id: impl Into<String>,
        receipt: StructuredReceipt,
        raw_text: Option<String>,
        image_url: Option<String>,
        secondary_asset_id: Option<String>,
    ) -> Self {
        Self {
            receipt_id,
            owner_id: owner_id.into(),
            image_url,
            secondary_asset_id,
            raw_text,
            receipt,
            created_at: Utc::now(),
        }
    }

    pub fn store_name(&self) -> Option<&str> {
        self.receipt.store.name.as_deref()
    }

    pub fn total(&self) -> f64 {
        self.receipt.receipt.total
    }

    /// Collection holding this owner's receipt documents.
    pub fn collection_path(&self) -> String {
        format!("users/{}/receipts", self.owner_id)
    }

    /// Field map written with merge semantics.
    ///
    /// Absent optional values are left out entirely so a merge never clears a
    /// field written by someone else.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let store = &self.receipt.store;
        let info = &self.receipt.receipt;

        let mut store_map = Map::new();
        put_opt(&mut store_map, "name", &store.name);
        put_opt(&mut store_map, "address", &store.address);
        put_opt(&mut store_map, "phone", &store.phone);
        put_opt(&mut store_map, "website", &store.website);
        map.insert("store".into(), Value::Object(store_map));

        let mut receipt_map = Map::new();
        put_opt(&mut receipt_map, "receiptId", &info.receipt_id);
        put_opt(&mut receipt_map, "date", &info.date);
        put_opt(&mut receipt_map, "time", &info.time);
        put_opt(&mut receipt_map, "currency", &info.currency);
        put_opt(&mut receipt_map, "paymentMethod", &info.payment_method);
        put_opt(&mut receipt_map, "cardLast4", &info.card_last4);
        if let Some(category) = info.meaningful_category() {
            receipt_map.insert("category".into(), Value::from(category));
        }
        receipt_map.insert("subtotal".into(), Value::from(info.subtotal));
        receipt_map.insert("tax".into(), Value::from(info.tax));
        receipt_map.insert("total".into(), Value::from(info.total));
        receipt_map.insert("dateTimestamp".into(), Value::from(info.date_timestamp));
        let purchase = info.effective_receipt_timestamp();
        if purchase > 0 {
            receipt_map.insert("receiptDateTimestamp".into(), Value::from(purchase));
        }
        map.insert("receipt".into(), Value::Object(receipt_map));

        if !self.receipt.items.is_empty() {
            let items = self
                .receipt
                .items
                .iter()
                .map(|item| {
                    let mut m = Map::new();
                    put_opt(&mut m, "name", &item.name);
                    put_opt(&mut m, "quantity", &item.quantity);
                    put_opt(&mut m, "unitPrice", &item.unit_price);
                    put_opt(&mut m, "totalPrice", &item.total_price);
                    put_opt(&mut m, "category", &item.category);
                    m.insert("price".into(), Value::from(item.effective_price()));
                    Value::Object(m)
                })
                .collect();
            map.insert("items".into(), Value::Array(items));
        }

        if let Some(additional) = &self.receipt.additional {
            let mut m = Map::new();
            put_opt(&mut m, "taxNumber", &additional.tax_number);
            put_opt(&mut m, "cashier", &additional.cashier);
            put_opt(&mut m, "storeNumber", &additional.store_number);
            put_opt(&mut m, "notes", &additional.notes);
            map.insert("additional".into(), Value::Object(m));
        }

        if let Some(metadata) = &self.receipt.metadata {
            let mut m = Map::new();
            put_opt(&mut m, "ocrText", &metadata.ocr_text);
            put_opt(&mut m, "processedBy", &metadata.processed_by);
            put_opt(&mut m, "uploadedAt", &metadata.uploaded_at);
            put_opt(&mut m, "userId", &metadata.user_id);
            map.insert("metadata".into(), Value::Object(m));
        }

        put_opt(&mut map, "imageUrl", &self.image_url);
        put_opt(&mut map, "secondaryAssetId", &self.secondary_asset_id);
        put_opt(&mut map, "rawText", &self.raw_text);
        put_opt(&mut map, "storeName", &store.name);
        map.insert("date".into(), Value::from(info.date_timestamp));
        map.insert("total".into(), Value::from(info.total));
        map.insert("userId".into(), Value::from(self.owner_id.as_str()));
        map.insert("createdAt".into(), Value::from(self.created_at.to_rfc3339()));
        map
    }
}

fn put_opt<T: Into<Value> + Clone>(map: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v.clone().into());
    }
}

/// Merge `patch` into `target`: nested objects merge key by key, every other
/// value replaces what was there. Keys absent from `patch` are untouched.
pub fn merge_fields(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Object(incoming) if matches!(target.get(&key), Some(Value::Object(_))) => {
                if let Some(Value::Object(existing)) = target.get_mut(&key) {
                    merge_fields(existing, incoming);
                }
            }
            value => {
                target.insert(key, value);
            }
        }
    }
}
