//! On-device XLM-RoBERTa (BGE-M3 style) embeddings via candle.
//!
//! The model directory must contain `tokenizer.json`, `config.json` and
//! `pytorch_model.bin`. Weights load lazily on the first call.

mod device;
mod pool;
mod tokenize;

pub use pool::masked_mean_l2;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;

use exemplar_core::config::{expand_path, local_token_window, LOCAL_MODEL_MAX_TOKENS};
use exemplar_core::{Error, Result, Settings};

use crate::provider::{EmbedProvider, ProviderError};

struct LoadedModel {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LoadedModel {
    fn load(model_dir: &Path) -> candle_core::Result<Self> {
        let device = device::select_device();
        tracing::info!(dir = %model_dir.display(), "loading embedding model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            candle_core::Error::msg(format!(
                "failed to load tokenizer from {}: {}",
                tokenizer_path.display(),
                e
            ))
        })?;
        let config_raw = std::fs::read_to_string(model_dir.join("config.json"))?;
        let config: XLMRobertaConfig =
            serde_json::from_str(&config_raw).map_err(|e| candle_core::Error::msg(e.to_string()))?;
        let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        tracing::info!("embedding model loaded");
        Ok(Self { model, tokenizer, device })
    }

    fn embed_one(&self, text: &str, max_len: usize) -> candle_core::Result<Vec<f32>> {
        let (input_ids, attention_mask) =
            tokenize::tokenize_on_device(&self.tokenizer, text, max_len, &self.device)?;
        let token_type_ids = Tensor::zeros((1, max_len), DType::I64, &self.device)?;
        let hidden =
            self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()
    }
}

pub struct LocalModelProvider {
    model_dir: PathBuf,
    model: OnceCell<Arc<LoadedModel>>,
    /// Tokens per input; longer inputs are truncated.
    max_len: usize,
    id: String,
}

impl LocalModelProvider {
    /// The token window follows `chunking.max_chars` so whole chunks fit.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let dir = settings
            .embedding
            .model_dir
            .as_deref()
            .map(expand_path)
            .or_else(|| std::env::var("APP_MODEL_DIR").ok().map(PathBuf::from))
            .ok_or_else(|| {
                Error::InvalidConfig(
                    "embedding.model_dir is required for the local provider".into(),
                )
            })?;
        Self::new(dir, local_token_window(settings.chunking.max_chars))
    }

    pub fn new(model_dir: PathBuf, max_len: usize) -> Result<Self> {
        if max_len == 0 || max_len > LOCAL_MODEL_MAX_TOKENS {
            return Err(Error::InvalidConfig(format!(
                "local model token window must be within 1..={}, got {}",
                LOCAL_MODEL_MAX_TOKENS, max_len
            )));
        }
        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        Ok(Self { model_dir, model: OnceCell::new(), max_len, id: format!("local:{}", name) })
    }

    async fn loaded(&self) -> std::result::Result<Arc<LoadedModel>, ProviderError> {
        self.model
            .get_or_try_init(|| async {
                let dir = self.model_dir.clone();
                tokio::task::spawn_blocking(move || LoadedModel::load(&dir))
                    .await
                    .map_err(|e| ProviderError::Permanent(format!("model loader panicked: {}", e)))?
                    .map(Arc::new)
                    .map_err(|e| ProviderError::Permanent(format!("failed to load model: {}", e)))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl EmbedProvider for LocalModelProvider {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let model = self.loaded().await?;
        let texts = texts.to_vec();
        let max_len = self.max_len;
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|t| model.embed_one(t, max_len))
                .collect::<candle_core::Result<Vec<_>>>()
        })
        .await
        .map_err(|e| ProviderError::Permanent(format!("embedding task panicked: {}", e)))?
        .map_err(|e| ProviderError::Permanent(e.to_string()))
    }
}
