//! Local sequence-classification backend.
//!
//! Loads an exported ONNX model with tract-onnx and its `tokenizer.json` with
//! the tokenizers crate. Inference runs on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use threadpulse_schema::Sentiment;
use tract_onnx::prelude::*;

use crate::{label_for_logits, ClassifierConfig, ClassifierError, SentimentClassifier};

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

type RunFn = dyn Fn(TVec<TValue>) -> TractResult<TVec<TValue>> + Send + Sync;

struct Inner {
    tokenizer: tokenizers::Tokenizer,
    run: Box<RunFn>,
    input_count: usize,
    max_length: usize,
    batch_size: usize,
    labels: Vec<Sentiment>,
}

pub struct OnnxSentimentClassifier {
    inner: Arc<Inner>,
    model_id: String,
}

impl OnnxSentimentClassifier {
    pub fn load(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let dir = config
            .model_dir
            .as_deref()
            .ok_or_else(|| ClassifierError::Load("no model directory configured".into()))?;
        if config.max_length == 0 {
            return Err(ClassifierError::Load("max_length must be positive".into()));
        }
        config.validate_labels()?;
        let (onnx_path, tokenizer_path) = model_files(dir)?;

        let tokenizer = load_tokenizer(&tokenizer_path, config.max_length)?;

        let model = tract_onnx::onnx()
            .model_for_path(&onnx_path)
            .map_err(|e| ClassifierError::Load(format!("onnx: {e}")))?
            .into_optimized()
            .map_err(|e| ClassifierError::Load(format!("optimize: {e}")))?;
        let input_count = model.inputs.len();
        if !(2..=3).contains(&input_count) {
            return Err(ClassifierError::Load(format!(
                "expected 2 or 3 model inputs, found {input_count}"
            )));
        }
        let plan = model
            .into_runnable()
            .map_err(|e| ClassifierError::Load(format!("runnable: {e}")))?;

        let model_id = config.model_id.clone().unwrap_or_else(|| {
            dir.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "onnx-sentiment".to_string())
        });
        tracing::info!(
            "Loaded sentiment model '{model_id}' from {} ({input_count} inputs)",
            dir.display()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                tokenizer,
                run: Box::new(move |inputs| plan.run(inputs)),
                input_count,
                max_length: config.max_length,
                batch_size: config.batch_size.max(1),
                labels: config.labels.clone(),
            }),
            model_id,
        })
    }
}

fn model_files(dir: &Path) -> Result<(PathBuf, PathBuf), ClassifierError> {
    let onnx = [dir.join(MODEL_FILE), dir.join("onnx").join(MODEL_FILE)]
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| {
            ClassifierError::Load(format!("{MODEL_FILE} not found in {}", dir.display()))
        })?;
    let tokenizer = dir.join(TOKENIZER_FILE);
    if !tokenizer.is_file() {
        return Err(ClassifierError::Load(format!(
            "{TOKENIZER_FILE} not found in {}",
            dir.display()
        )));
    }
    Ok((onnx, tokenizer))
}

/// Truncation happens inside the tokenizer so `[CLS]`/`[SEP]` survive on long inputs.
fn load_tokenizer(
    path: &Path,
    max_length: usize,
) -> Result<tokenizers::Tokenizer, ClassifierError> {
    let mut tokenizer = tokenizers::Tokenizer::from_file(path)
        .map_err(|e| ClassifierError::Load(format!("tokenizer: {e}")))?;
    tokenizer
        .with_truncation(Some(tokenizers::TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| ClassifierError::Load(format!("tokenizer truncation: {e}")))?;
    Ok(tokenizer)
}

#[async_trait]
impl SentimentClassifier for OnnxSentimentClassifier {
    async fn classify_batch(&self, texts: &[String]) -> Result<Vec<Sentiment>, ClassifierError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.classify(&texts))
            .await
            .map_err(|e| ClassifierError::Inference(format!("worker panicked: {e}")))?
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl Inner {
    fn classify(&self, texts: &[String]) -> Result<Vec<Sentiment>, ClassifierError> {
        let mut labels = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            labels.extend(self.classify_chunk(chunk)?);
        }
        Ok(labels)
    }

    fn classify_chunk(&self, chunk: &[String]) -> Result<Vec<Sentiment>, ClassifierError> {
        let encodings = chunk
            .iter()
            .map(|s| {
                self.tokenizer
                    .encode(s.as_str(), true)
                    .map_err(|e| ClassifierError::Tokenize(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(1)
            .clamp(1, self.max_length);
        let batch = encodings.len();

        let mut input_ids = vec![0i64; batch * seq_len];
        let mut attention_mask = vec![0i64; batch * seq_len];
        for (i, enc) in encodings.iter().enumerate() {
            for (j, &id) in enc.get_ids().iter().take(seq_len).enumerate() {
                input_ids[i * seq_len + j] = id as i64;
                attention_mask[i * seq_len + j] = 1;
            }
        }

        let mut inputs: TVec<TValue> = tvec!(
            to_tensor(batch, seq_len, input_ids)?.into(),
            to_tensor(batch, seq_len, attention_mask)?.into()
        );
        if self.input_count == 3 {
            inputs.push(to_tensor(batch, seq_len, vec![0i64; batch * seq_len])?.into());
        }

        let outputs = (self.run)(inputs).map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let logits = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::Inference("model produced no output".into()))?;
        let view = logits
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let shape = view.shape().to_vec();
        if shape.len() != 2 || shape[0] != batch || shape[1] != self.labels.len() {
            return Err(ClassifierError::Shape(shape));
        }
        (0..batch)
            .map(|i| {
                let row: Vec<f32> = view.slice(ndarray::s![i, ..]).iter().copied().collect();
                label_for_logits(&row, &self.labels)
            })
            .collect()
    }
}

fn to_tensor(batch: usize, seq_len: usize, data: Vec<i64>) -> Result<Tensor, ClassifierError> {
    let array = ndarray::Array2::from_shape_vec((batch, seq_len), data)
        .map_err(|e| ClassifierError::Inference(format!("input shape: {e}")))?;
    Ok(array.into())
}
