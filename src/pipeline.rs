use crate::embeddings::{self, Embedder};
use crate::http::build_client;
use crate::metrics;
use crate::models::{ProductRow, RunOptions, RunReport, StageReport};
use crate::supabase::SupabaseClient;
use reqwest::Client;
use serde_json::{Value, json};
use std::{future::Future, time::Instant};
use thiserror::Error;
use tracing::info;

pub struct Pipeline {
    http: Client,
    supabase: Option<SupabaseClient>,
}

impl Pipeline {
    pub fn from_env() -> Self {
        Self {
            http: build_client(),
            supabase: SupabaseClient::from_env(),
        }
    }

    /// Runs the four stages in order: fetch, map, embed, write. Control
    /// flows strictly forward; each stage materializes its output before
    /// the next begins.
    pub async fn run(&self, opts: RunOptions) -> Result<RunReport, PipelineError> {
        // Credentials and the model are validated before any network
        // activity so a misconfigured run aborts immediately.
        if !opts.dry_run && self.supabase.is_none() {
            return Err(PipelineError::config(
                "write_rows",
                "SUPABASE_URL and SUPABASE_SERVICE_KEY are required unless --dry-run is set",
            ));
        }
        let embedder: Option<Box<dyn Embedder>> = if opts.skip_embeddings {
            None
        } else {
            let embedder = embeddings::default_embedder()
                .map_err(|err| PipelineError::config("embed_products", err.to_string()))?;
            Some(embedder)
        };

        let mut stages = Vec::new();

        let raw = self
            .capture_stage(
                "fetch_catalog",
                &mut stages,
                stages::fetch_catalog(&self.http, opts.limit),
            )
            .await?;
        let fetched = raw.len();
        info!(target = "importer", fetched, "processing products");

        let rows = self
            .capture_stage("map_products", &mut stages, async {
                stages::map_products(&raw)
            })
            .await?;

        let (rows, embedded, skipped) = match embedder.as_deref() {
            Some(embedder) => {
                let out = self
                    .capture_stage(
                        "embed_products",
                        &mut stages,
                        stages::embed_products(&self.http, embedder, rows),
                    )
                    .await?;
                (out.rows, out.embedded, out.skipped)
            }
            None => {
                info!(target = "importer.embed", "skipping embeddings");
                (rows, 0, 0)
            }
        };

        let written = self
            .capture_stage(
                "write_rows",
                &mut stages,
                stages::write_rows(self.supabase.as_ref(), &rows, opts.dry_run),
            )
            .await?;

        Ok(RunReport {
            fetched,
            embedded,
            skipped,
            written,
            dry_run: opts.dry_run,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Missing credential or unusable model directory; caught before any
    /// network activity.
    Config,
    /// Catalog fetch or store write failure; aborts the run.
    Fatal,
}

impl PipelineError {
    pub fn config(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Config,
        }
    }

    pub fn fatal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Fatal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

#[derive(Debug)]
pub struct EmbedOutcome {
    pub rows: Vec<ProductRow>,
    pub embedded: usize,
    pub skipped: usize,
}

pub(crate) mod stages {
    use super::*;
    use crate::config::EMBEDDING_DIM;
    use crate::shopify::{self, RawProduct};
    use crate::transform;
    use tracing::{debug, warn};

    pub async fn fetch_catalog(
        http: &Client,
        limit: Option<usize>,
    ) -> Result<StageOutcome<Vec<RawProduct>>, PipelineError> {
        let products = shopify::fetch_all_products(http, limit)
            .await
            .map_err(|err| PipelineError::fatal("fetch_catalog", err.to_string()))?;
        let output = json!({ "count": products.len(), "limit": limit });
        Ok(StageOutcome::new(products, output))
    }

    pub fn map_products(
        raw: &[RawProduct],
    ) -> Result<StageOutcome<Vec<ProductRow>>, PipelineError> {
        let rows: Vec<ProductRow> = raw.iter().map(transform::build_row).collect();
        let sample: Vec<&str> = rows.iter().take(2).map(|r| r.product_url.as_str()).collect();
        let output = json!({ "count": rows.len(), "sample": sample });
        Ok(StageOutcome::new(rows, output))
    }

    pub async fn embed_products(
        http: &Client,
        embedder: &dyn Embedder,
        rows: Vec<ProductRow>,
    ) -> Result<StageOutcome<EmbedOutcome>, PipelineError> {
        let total = rows.len();
        let mut kept = Vec::with_capacity(total);
        let mut embedded = 0usize;
        let mut skipped = 0usize;
        let mut without_image = 0usize;

        for (index, mut row) in rows.into_iter().enumerate() {
            if row.image_url.is_empty() {
                warn!(
                    target = "importer.embed",
                    id = %row.id,
                    "product has no image, keeping row without embeddings"
                );
                without_image += 1;
                kept.push(row);
                continue;
            }

            let bytes = match embeddings::fetch_image(http, &row.image_url).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(
                        target = "importer.embed",
                        id = %row.id,
                        url = %row.image_url,
                        error = %err,
                        "image fetch failed, skipping product"
                    );
                    skipped += 1;
                    continue;
                }
            };

            let image_embedding = match embedder.embed_image(&bytes) {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(
                        target = "importer.embed",
                        id = %row.id,
                        error = %err,
                        "image embedding failed, skipping product"
                    );
                    skipped += 1;
                    continue;
                }
            };
            let info_text = transform::build_info_text(&row);
            let info_embedding = match embedder.embed_text(&info_text) {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(
                        target = "importer.embed",
                        id = %row.id,
                        error = %err,
                        "text embedding failed, skipping product"
                    );
                    skipped += 1;
                    continue;
                }
            };

            row.image_embedding = embedding_or_none(&row.id, "image_embedding", image_embedding);
            row.info_embedding = embedding_or_none(&row.id, "info_embedding", info_embedding);
            embedded += 1;
            debug!(
                target = "importer.embed",
                "[{}/{}] embedded {}",
                index + 1,
                total,
                row.id
            );
            kept.push(row);
        }

        let output = json!({
            "embedded": embedded,
            "skipped": skipped,
            "without_image": without_image,
        });
        Ok(StageOutcome::new(
            EmbedOutcome {
                rows: kept,
                embedded,
                skipped,
            },
            output,
        ))
    }

    // A wrong-dimension vector would be rejected by the vector column, so it
    // is nulled and the row still written.
    pub(crate) fn embedding_or_none(
        id: &str,
        field: &'static str,
        vector: Vec<f32>,
    ) -> Option<Vec<f32>> {
        if vector.len() == EMBEDDING_DIM {
            Some(vector)
        } else {
            warn!(
                target = "importer.embed",
                id = %id,
                field = field,
                dim = vector.len(),
                expected = EMBEDDING_DIM,
                "unexpected embedding dimension, storing null"
            );
            None
        }
    }

    pub async fn write_rows(
        supabase: Option<&SupabaseClient>,
        rows: &[ProductRow],
        dry_run: bool,
    ) -> Result<StageOutcome<usize>, PipelineError> {
        if dry_run {
            let sample: Vec<&str> = rows
                .iter()
                .take(3)
                .map(|r| r.product_url.as_str())
                .collect();
            info!(
                target = "importer.supabase",
                count = rows.len(),
                "[dry run] skipping upsert"
            );
            let output = json!({
                "dry_run": true,
                "would_write": rows.len(),
                "sample": sample,
            });
            return Ok(StageOutcome::new(0, output));
        }
        if rows.is_empty() {
            return Ok(StageOutcome::new(0, json!({ "written": 0 })));
        }
        let client = supabase
            .ok_or_else(|| PipelineError::config("write_rows", "supabase credentials missing"))?;
        let written = client
            .upsert_rows(rows)
            .await
            .map_err(|err| PipelineError::fatal("write_rows", err.to_string()))?;
        metrics::rows_written(written);
        Ok(StageOutcome::new(written, json!({ "written": written })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EMBEDDING_DIM;
    use crate::embeddings::FakeEmbedder;
    use crate::shopify::RawProduct;

    fn sample_raw(id: u64, image: Option<&str>) -> RawProduct {
        let images: Vec<_> = image
            .into_iter()
            .map(|src| serde_json::json!({ "src": src }))
            .collect();
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": format!("Product {id}"),
            "handle": format!("product-{id}"),
            "product_type": "Hoodie",
            "tags": ["basics"],
            "variants": [{"option1": "S", "price": "140.00"}],
            "images": images,
        }))
        .expect("raw product")
    }

    #[test]
    fn map_stage_produces_one_row_per_record() {
        let raw = vec![sample_raw(1, None), sample_raw(2, None)];
        let out = stages::map_products(&raw).expect("map");
        assert_eq!(out.value.len(), 2);
        assert_eq!(out.value[0].id, "drmersclub_1");
        assert_eq!(out.output["count"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn embed_stage_keeps_imageless_rows_without_vectors() {
        let embedder = FakeEmbedder::new(EMBEDDING_DIM);
        let rows = stages::map_products(&[sample_raw(1, None)]).expect("map").value;
        let out = stages::embed_products(&build_client(), &embedder, rows)
            .await
            .expect("embed");
        assert_eq!(out.value.rows.len(), 1);
        assert_eq!(out.value.embedded, 0);
        assert_eq!(out.value.skipped, 0);
        assert!(out.value.rows[0].image_embedding.is_none());
        assert!(out.value.rows[0].info_embedding.is_none());
    }

    #[tokio::test]
    async fn embed_stage_skips_products_with_unreachable_images() {
        // reqwest refuses the file scheme before any socket is opened.
        let embedder = FakeEmbedder::new(EMBEDDING_DIM);
        let rows = stages::map_products(&[sample_raw(1, Some("file:///missing.jpg"))])
            .expect("map")
            .value;
        let out = stages::embed_products(&build_client(), &embedder, rows)
            .await
            .expect("embed");
        assert!(out.value.rows.is_empty());
        assert_eq!(out.value.skipped, 1);
    }

    #[test]
    fn wrong_dimension_vectors_are_nulled() {
        assert!(stages::embedding_or_none("drmersclub_1", "image_embedding", vec![0.0; 4]).is_none());
        let ok = stages::embedding_or_none("drmersclub_1", "image_embedding", vec![0.0; EMBEDDING_DIM]);
        assert_eq!(ok.map(|v| v.len()), Some(EMBEDDING_DIM));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing_even_with_rows() {
        let rows = stages::map_products(&[sample_raw(1, None), sample_raw(2, None)])
            .expect("map")
            .value;
        // No client exists, so a write attempt would be a Config error; Ok
        // proves the stage never reached for one.
        let out = stages::write_rows(None, &rows, true).await.expect("dry run");
        assert_eq!(out.value, 0);
        assert_eq!(out.output["would_write"], serde_json::json!(2));
        assert_eq!(out.output["dry_run"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn write_without_credentials_is_config_error() {
        let rows = stages::map_products(&[sample_raw(1, None)]).expect("map").value;
        let err = stages::write_rows(None, &rows, false)
            .await
            .expect_err("missing creds");
        assert_eq!(err.kind(), PipelineErrorKind::Config);
        assert_eq!(err.stage(), "write_rows");
    }

    #[tokio::test]
    async fn run_fails_fast_without_credentials() {
        let pipeline = Pipeline {
            http: build_client(),
            supabase: None,
        };
        let err = pipeline
            .run(RunOptions {
                limit: Some(1),
                dry_run: false,
                skip_embeddings: true,
            })
            .await
            .expect_err("should fail before any fetch");
        assert_eq!(err.kind(), PipelineErrorKind::Config);
    }
}
