use std::sync::Arc;

use threadpulse_schema::Sentiment;

use crate::{ClassifierConfig, OnnxSentimentClassifier, SentimentClassifier};

/// Process-wide classifier slot, decided once at startup.
#[derive(Clone)]
pub enum ClassifierHandle {
    Ready(Arc<dyn SentimentClassifier>),
    Unavailable { reason: String },
}

impl ClassifierHandle {
    /// Load the ONNX backend, degrading to [`ClassifierHandle::Unavailable`] on any failure.
    pub fn load(config: &ClassifierConfig) -> Self {
        match OnnxSentimentClassifier::load(config) {
            Ok(classifier) => Self::Ready(Arc::new(classifier)),
            Err(e) => {
                tracing::warn!("Sentiment classifier unavailable: {e}");
                Self::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn ready(classifier: Arc<dyn SentimentClassifier>) -> Self {
        Self::Ready(classifier)
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            Self::Ready(c) => Some(c.model_id()),
            Self::Unavailable { .. } => None,
        }
    }

    /// Always returns exactly one label per input.
    pub async fn classify_batch(&self, texts: &[String]) -> Vec<Sentiment> {
        let classifier = match self {
            Self::Ready(c) => c,
            Self::Unavailable { .. } => return vec![Sentiment::Error; texts.len()],
        };
        match classifier.classify_batch(texts).await {
            Ok(labels) if labels.len() == texts.len() => labels,
            Ok(labels) => {
                tracing::warn!(
                    "Classifier returned {} labels for {} inputs",
                    labels.len(),
                    texts.len()
                );
                vec![Sentiment::Error; texts.len()]
            }
            Err(e) => {
                tracing::warn!("Classification failed for batch of {}: {e}", texts.len());
                vec![Sentiment::Error; texts.len()]
            }
        }
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(c) => f.debug_tuple("Ready").field(&c.model_id()).finish(),
            Self::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassifierError, FixedClassifier};
    use async_trait::async_trait;

    struct Broken;

    #[async_trait]
    impl SentimentClassifier for Broken {
        async fn classify_batch(&self, _: &[String]) -> Result<Vec<Sentiment>, ClassifierError> {
            Err(ClassifierError::Inference("boom".into()))
        }
        fn model_id(&self) -> &str {
            "broken"
        }
    }

    struct Short;

    #[async_trait]
    impl SentimentClassifier for Short {
        async fn classify_batch(&self, _: &[String]) -> Result<Vec<Sentiment>, ClassifierError> {
            Ok(vec![Sentiment::Positive])
        }
        fn model_id(&self) -> &str {
            "short"
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {i}")).collect()
    }

    #[tokio::test]
    async fn unavailable_labels_every_item_error() {
        let handle = ClassifierHandle::unavailable("no model");
        assert!(!handle.is_available());
        assert_eq!(handle.classify_batch(&texts(3)).await, vec![Sentiment::Error; 3]);
        assert!(handle.classify_batch(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn ready_handle_passes_through() {
        let handle = ClassifierHandle::ready(Arc::new(FixedClassifier::new(Sentiment::Positive)));
        assert!(handle.is_available());
        assert_eq!(handle.model_id(), Some("fixed-positive"));
        assert_eq!(handle.classify_batch(&texts(2)).await.len(), 2);
        assert!(handle.classify_batch(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn inference_failure_degrades_to_error_labels() {
        let handle = ClassifierHandle::ready(Arc::new(Broken));
        assert_eq!(handle.classify_batch(&texts(4)).await, vec![Sentiment::Error; 4]);
    }

    #[tokio::test]
    async fn length_mismatch_degrades_to_error_labels() {
        let handle = ClassifierHandle::ready(Arc::new(Short));
        assert_eq!(handle.classify_batch(&texts(3)).await, vec![Sentiment::Error; 3]);
    }

    #[test]
    fn load_without_model_is_unavailable() {
        let handle = ClassifierHandle::load(&ClassifierConfig::default());
        assert!(!handle.is_available());
        assert!(format!("{handle:?}").contains("Unavailable"));
    }
}
