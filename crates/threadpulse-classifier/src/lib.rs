//! Sentiment classification port.
//!
//! [`SentimentClassifier`] is the fallible backend contract. [`ClassifierHandle`]
//! is what the rest of the system holds: it is either ready or permanently
//! unavailable, and its `classify_batch` never fails.

mod handle;
pub mod onnx;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use threadpulse_schema::Sentiment;

pub use handle::ClassifierHandle;
pub use onnx::OnnxSentimentClassifier;

/// Output label order of the sequence-classification head.
pub const LABELS: [Sentiment; 3] = [Sentiment::Negative, Sentiment::Neutral, Sentiment::Positive];

pub const DEFAULT_MAX_LENGTH: usize = 128;
pub const DEFAULT_BATCH_SIZE: usize = 16;

#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    /// One label per input, in input order.
    async fn classify_batch(&self, texts: &[String]) -> Result<Vec<Sentiment>, ClassifierError>;

    fn model_id(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("failed to load classifier: {0}")]
    Load(String),
    #[error("tokenization failed: {0}")]
    Tokenize(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output shape {0:?}")]
    Shape(Vec<usize>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    /// Identifier reported as the analysis source. Defaults to the directory name.
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Label for each logit index of the classification head.
    #[serde(default = "default_labels")]
    pub labels: Vec<Sentiment>,
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_labels() -> Vec<Sentiment> {
    LABELS.to_vec()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            model_id: None,
            max_length: DEFAULT_MAX_LENGTH,
            batch_size: DEFAULT_BATCH_SIZE,
            labels: default_labels(),
        }
    }
}

impl ClassifierConfig {
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    /// Labels must be a permutation of negative, neutral and positive.
    pub fn validate_labels(&self) -> Result<(), ClassifierError> {
        let mut sorted = self.labels.clone();
        sorted.sort_by_key(|l| l.as_str());
        let mut expected = LABELS.to_vec();
        expected.sort_by_key(|l| l.as_str());
        if sorted != expected {
            return Err(ClassifierError::Load(format!(
                "labels must be a permutation of negative, neutral, positive; got {:?}",
                self.labels
            )));
        }
        Ok(())
    }
}

/// Numerically stable softmax over one row of logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// Highest-probability label for one row of logits. Ties go to the earlier label.
pub fn label_for_logits(logits: &[f32], labels: &[Sentiment]) -> Result<Sentiment, ClassifierError> {
    if logits.len() != labels.len() || labels.is_empty() {
        return Err(ClassifierError::Shape(vec![logits.len()]));
    }
    let probs = softmax(logits);
    let mut best = 0;
    for (i, p) in probs.iter().enumerate().skip(1) {
        if *p > probs[best] {
            best = i;
        }
    }
    Ok(labels[best])
}

/// Returns the same label for every input. For tests and offline runs.
pub struct FixedClassifier {
    label: Sentiment,
    model_id: String,
}

impl FixedClassifier {
    pub fn new(label: Sentiment) -> Self {
        Self {
            label,
            model_id: format!("fixed-{label}"),
        }
    }
}

#[async_trait]
impl SentimentClassifier for FixedClassifier {
    async fn classify_batch(&self, texts: &[String]) -> Result<Vec<Sentiment>, ClassifierError> {
        Ok(vec![self.label; texts.len()])
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 999.0, -1000.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(probs[0] > probs[1]);
    }

    #[test]
    fn argmax_picks_highest_label() {
        assert_eq!(label_for_logits(&[0.1, 0.2, 3.0], &LABELS).unwrap(), Sentiment::Positive);
        assert_eq!(label_for_logits(&[4.0, 0.2, 0.0], &LABELS).unwrap(), Sentiment::Negative);
        assert_eq!(label_for_logits(&[-1.0, 2.0, 1.9], &LABELS).unwrap(), Sentiment::Neutral);
    }

    #[test]
    fn argmax_tie_prefers_first_label() {
        assert_eq!(label_for_logits(&[1.0, 1.0, 1.0], &LABELS).unwrap(), Sentiment::Negative);
    }

    #[test]
    fn wrong_logit_count_is_shape_error() {
        let err = label_for_logits(&[1.0, 2.0], &LABELS).unwrap_err();
        assert!(matches!(err, ClassifierError::Shape(ref s) if s == &vec![2]));
    }

    #[tokio::test]
    async fn fixed_classifier_matches_input_length() {
        let c = FixedClassifier::new(Sentiment::Neutral);
        assert!(c.classify_batch(&[]).await.unwrap().is_empty());
        let out = c
            .classify_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![Sentiment::Neutral, Sentiment::Neutral]);
        assert_eq!(c.model_id(), "fixed-neutral");
    }

    #[test]
    fn custom_label_order_is_respected() {
        let labels = [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral];
        assert_eq!(label_for_logits(&[3.0, 0.0, 0.0], &labels).unwrap(), Sentiment::Positive);
    }

    #[test]
    fn config_defaults() {
        let c = ClassifierConfig::default();
        assert_eq!(c.max_length, 128);
        assert!(c.model_dir.is_none());
        assert_eq!(c.labels, LABELS.to_vec());
        assert!(c.validate_labels().is_ok());
    }

    #[test]
    fn labels_must_cover_three_classes() {
        let mut c = ClassifierConfig::default();
        c.labels = vec![Sentiment::Positive, Sentiment::Positive, Sentiment::Negative];
        assert!(c.validate_labels().is_err());
        c.labels = vec![Sentiment::Error, Sentiment::Neutral, Sentiment::Positive];
        assert!(c.validate_labels().is_err());
    }
}
