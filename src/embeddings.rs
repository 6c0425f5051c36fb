use crate::config::{EMBEDDING_DIM, SIGLIP_MODEL_DIR};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::siglip;
use reqwest::Client;
use std::path::PathBuf;
use thiserror::Error;
use tokenizers::Tokenizer;
use tokio::time::{Duration, sleep};
use tracing::info;

// SigLIP's text tower has a short window; anything past this is noise.
const MAX_TEXT_CHARS: usize = 500;
const IMAGE_FETCH_RETRIES: usize = 2;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("model files unavailable: {0}")]
    ModelDir(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("inference error: {0}")]
    Inference(#[from] candle_core::Error),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("image fetch failed: {0}")]
    Fetch(String),
    #[error("empty text input")]
    EmptyText,
}

/// The pretrained model as an opaque capability. One instance is loaded per
/// run and shared across all products.
pub trait Embedder: Send + Sync {
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError>;
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// siglip-base-patch16-384 via candle, loaded from a local directory holding
/// `tokenizer.json`, `config.json` and `model.safetensors`.
pub struct SiglipEmbedder {
    model: siglip::Model,
    tokenizer: Tokenizer,
    image_size: usize,
    max_text_len: usize,
    pad_id: u32,
    device: Device,
}

impl SiglipEmbedder {
    pub fn load() -> Result<Self, EmbeddingError> {
        let dir = PathBuf::from(SIGLIP_MODEL_DIR.as_str());
        if !dir.is_dir() {
            return Err(EmbeddingError::ModelDir(format!(
                "{} is not a directory (set SIGLIP_MODEL_DIR)",
                dir.display()
            )));
        }
        let device = Device::cuda_if_available(0)?;
        info!(
            target = "importer.embed",
            dir = %dir.display(),
            device = ?device,
            "loading siglip model"
        );
        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|err| EmbeddingError::Tokenizer(err.to_string()))?;
        let raw_config = std::fs::read_to_string(dir.join("config.json"))
            .map_err(|err| EmbeddingError::ModelDir(err.to_string()))?;
        let config: siglip::Config = serde_json::from_str(&raw_config)
            .map_err(|err| EmbeddingError::ModelDir(err.to_string()))?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &[dir.join("model.safetensors")],
                DType::F32,
                &device,
            )?
        };
        let model = siglip::Model::new(&config, vb)?;
        // The tokenizer pads with `</s>` (id 1 for the siglip checkpoints).
        let pad_id = tokenizer.get_vocab(true).get("</s>").copied().unwrap_or(1);
        info!(target = "importer.embed", dim = EMBEDDING_DIM, "model loaded");
        Ok(Self {
            model,
            tokenizer,
            image_size: config.vision_config.image_size,
            max_text_len: config.text_config.max_position_embeddings,
            pad_id,
            device,
        })
    }

    // HWC u8 -> 1CHW f32 in [-1, 1] (siglip normalizes with mean/std 0.5).
    fn pixel_values(&self, bytes: &[u8]) -> Result<Tensor, EmbeddingError> {
        let size = self.image_size;
        let img = image::load_from_memory(bytes)?
            .resize_to_fill(size as u32, size as u32, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let tensor = Tensor::from_vec(img.into_raw(), (size, size, 3), &self.device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(2f64 / 255., -1.)?
            .unsqueeze(0)?;
        Ok(tensor)
    }

    fn input_ids(&self, text: &str) -> Result<Tensor, EmbeddingError> {
        let max_len = self.max_text_len;
        let pad_id = self.pad_id;
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|err| EmbeddingError::Tokenizer(err.to_string()))?;
        let mut ids = encoding.get_ids().to_vec();
        ids.truncate(max_len);
        ids.resize(max_len, pad_id);
        Ok(Tensor::new(ids, &self.device)?.unsqueeze(0)?)
    }
}

impl Embedder for SiglipEmbedder {
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let pixel_values = self.pixel_values(bytes)?;
        let features = self.model.get_image_features(&pixel_values)?;
        Ok(features.squeeze(0)?.to_dtype(DType::F32)?.to_vec1()?)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }
        let clipped: String = text.chars().take(MAX_TEXT_CHARS).collect();
        let input_ids = self.input_ids(&clipped)?;
        let features = self.model.get_text_features(&input_ids)?;
        Ok(features.squeeze(0)?.to_dtype(DType::F32)?.to_vec1()?)
    }
}

/// Deterministic hash-bucket embedder for offline runs and tests.
pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn bucketed<I: IntoIterator<Item = u64>>(&self, hashes: I) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, h) in hashes.into_iter().enumerate() {
            let idx = (h as usize) % self.dim;
            v[idx] += ((h >> 32) as u32) as f32 / u32::MAX as f32 + (i % 3) as f32 * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        use std::hash::{DefaultHasher, Hash, Hasher};
        Ok(self.bucketed(bytes.chunks(64).map(|chunk| {
            let mut hasher = DefaultHasher::new();
            chunk.hash(&mut hasher);
            hasher.finish()
        })))
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        use std::hash::{DefaultHasher, Hash, Hasher};
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyText);
        }
        Ok(self.bucketed(text.split_whitespace().map(|token| {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            hasher.finish()
        })))
    }
}

/// Loads the run-wide embedder. `IMPORTER_USE_FAKE_EMBEDDINGS=1` selects the
/// deterministic fake so test runs stay offline.
pub fn default_embedder() -> Result<Box<dyn Embedder>, EmbeddingError> {
    let use_fake = std::env::var("IMPORTER_USE_FAKE_EMBEDDINGS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if use_fake {
        info!(target = "importer.embed", dim = EMBEDDING_DIM, "using fake embedder");
        return Ok(Box::new(FakeEmbedder::new(EMBEDDING_DIM)));
    }
    Ok(Box::new(SiglipEmbedder::load()?))
}

/// Downloads a product image, retrying transient failures before giving up.
/// A 4xx means the image will never appear, so those fail immediately.
pub async fn fetch_image(client: &Client, url: &str) -> Result<Vec<u8>, EmbeddingError> {
    let mut last_err = String::new();
    for attempt in 0..=IMAGE_FETCH_RETRIES {
        if attempt > 0 {
            sleep(Duration::from_secs(1)).await;
        }
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                return response
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|err| EmbeddingError::Fetch(err.to_string()));
            }
            Ok(response) if response.status().is_client_error() => {
                return Err(EmbeddingError::Fetch(format!(
                    "HTTP {}",
                    response.status()
                )));
            }
            Ok(response) => last_err = format!("HTTP {}", response.status()),
            Err(err) => last_err = err.to_string(),
        }
    }
    Err(EmbeddingError::Fetch(last_err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_embedder_is_deterministic_and_normalized() {
        let embedder = FakeEmbedder::new(EMBEDDING_DIM);
        let a = embedder.embed_text("cloud hoodie fleece").expect("embed");
        let b = embedder.embed_text("cloud hoodie fleece").expect("embed");
        assert_eq!(a.len(), EMBEDDING_DIM);
        assert_eq!(a, b);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn fake_embedder_distinguishes_inputs() {
        let embedder = FakeEmbedder::new(EMBEDDING_DIM);
        let a = embedder.embed_text("cloud hoodie").expect("embed");
        let b = embedder.embed_text("denim jacket").expect("embed");
        assert_ne!(a, b);
    }

    #[test]
    fn fake_embedder_handles_image_bytes() {
        let embedder = FakeEmbedder::new(EMBEDDING_DIM);
        let v = embedder.embed_image(&[7u8; 256]).expect("embed");
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[test]
    fn empty_text_is_rejected() {
        let embedder = FakeEmbedder::new(EMBEDDING_DIM);
        assert!(matches!(
            embedder.embed_text("   "),
            Err(EmbeddingError::EmptyText)
        ));
    }

    #[tokio::test]
    async fn image_fetch_gives_up_immediately_on_client_errors() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handle = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                hits_handle.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let client = crate::http::build_client();
        let url = format!("http://{addr}/missing.jpg");
        let err = fetch_image(&client, &url).await.expect_err("404 is final");
        assert!(matches!(err, EmbeddingError::Fetch(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1, "no retries after a 404");
    }
}
