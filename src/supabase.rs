use crate::http::build_client;
use crate::models::ProductRow;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

// PostgREST handles large batches fine; 100 keeps request bodies with two
// 768-dim vectors per row comfortably small.
const UPSERT_CHUNK_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Request(String),
}

impl SupabaseClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_KEY")
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    // The conflict target makes the write an overwrite, not an insert.
    fn upsert_url(&self) -> String {
        format!(
            "{}/rest/v1/products?on_conflict=source,product_url",
            self.base_url
        )
    }

    /// Upsert keyed on (source, product_url); rows with a matching key are
    /// replaced, others inserted. Any failed chunk fails the whole batch.
    pub async fn upsert_rows(&self, rows: &[ProductRow]) -> Result<usize, SupabaseError> {
        let url = self.upsert_url();
        let mut written = 0usize;
        for chunk in rows.chunks(UPSERT_CHUNK_SIZE) {
            let response = self
                .http
                .post(&url)
                .header("apikey", &self.service_key)
                .header("Authorization", format!("Bearer {}", self.service_key))
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(chunk)
                .send()
                .await
                .map_err(|err| SupabaseError::Request(err.to_string()))?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let body: String = body.chars().take(500).collect();
                return Err(SupabaseError::Request(format!("HTTP {status}: {body}")));
            }
            written += chunk.len();
            debug!(
                target = "importer.supabase",
                written,
                total = rows.len(),
                "upserted chunk"
            );
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> SupabaseClient {
        SupabaseClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: "service-key".to_string(),
            http: build_client(),
        }
    }

    #[test]
    fn upsert_request_carries_the_conflict_target() {
        let client = client("https://example.supabase.co");
        assert_eq!(
            client.upsert_url(),
            "https://example.supabase.co/rest/v1/products?on_conflict=source,product_url"
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = client("https://example.supabase.co/");
        assert!(
            client
                .upsert_url()
                .starts_with("https://example.supabase.co/rest/v1/")
        );
    }
}
