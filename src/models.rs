use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One row of the shared `products` table.
///
/// Every column serializes even when null: PostgREST rejects batches whose
/// rows carry different key sets, so no `skip_serializing_if` here.
#[derive(Debug, Clone, Serialize)]
pub struct ProductRow {
    pub id: String,
    pub source: &'static str,
    pub brand: &'static str,
    pub title: String,
    pub description: Option<String>,
    pub product_url: String,
    pub affiliate_url: Option<String>,
    pub image_url: String,
    pub additional_images: Option<String>,
    pub category: Option<String>,
    pub gender: &'static str,
    pub size: Option<String>,
    pub price: Option<String>,
    pub sale: Option<String>,
    pub second_hand: bool,
    pub country: &'static str,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<String>,
    pub other: Option<String>,
    pub created_at: DateTime<Utc>,
    pub image_embedding: Option<Vec<f32>>,
    pub info_embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub skip_embeddings: bool,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub fetched: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub written: usize,
    pub dry_run: bool,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}
