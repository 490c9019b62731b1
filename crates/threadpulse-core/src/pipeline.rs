//! Fetch, classify and shape analysis results.

use std::sync::Arc;

use chrono::Utc;
use threadpulse_classifier::ClassifierHandle;
use threadpulse_schema::{AnalyzeResponse, AnalyzedItem, Aspect, QueryEcho, RawItem, Sentiment};
use threadpulse_source::ContentSource;

use crate::aspect::tag_aspect;
use crate::cache::{CachePolicy, QueryCache};

pub const DEFAULT_FETCH_LIMIT: usize = 50;
pub const DEFAULT_EXCERPT_CHARS: usize = 150;
pub const UNAVAILABLE_EXCERPT_CHARS: usize = 100;
pub const UNAVAILABLE_SOURCE: &str = "unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub fetch_limit: usize,
    pub excerpt_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }
}

/// Owns the query cache and classifier handle for the lifetime of the process.
pub struct AnalysisPipeline {
    cache: QueryCache,
    source: Arc<dyn ContentSource>,
    classifier: ClassifierHandle,
    settings: PipelineSettings,
}

impl AnalysisPipeline {
    pub fn new(
        source: Arc<dyn ContentSource>,
        classifier: ClassifierHandle,
        policy: CachePolicy,
    ) -> Self {
        Self {
            cache: QueryCache::new(policy),
            source,
            classifier,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn classifier(&self) -> &ClassifierHandle {
        &self.classifier
    }

    /// Model identifier reported alongside results.
    pub fn analysis_source(&self) -> &str {
        self.classifier.model_id().unwrap_or(UNAVAILABLE_SOURCE)
    }

    /// Analyze up to the configured fetch limit of items. Empty means no data.
    ///
    /// A failed fetch also yields no data but is not cached.
    pub async fn analyze(&self, scope: &str, topic: &str) -> Vec<AnalyzedItem> {
        let limit = self.settings.fetch_limit;
        let source = Arc::clone(&self.source);
        let fetched = self
            .cache
            .get_or_fetch(scope, topic, limit, |s, t, l| async move {
                source.try_fetch(&s, &t, l).await
            })
            .await;
        let items: &[RawItem] = &fetched[..fetched.len().min(limit)];
        if items.is_empty() {
            return Vec::new();
        }

        let observed_at = Utc::now();
        if !self.classifier.is_available() {
            tracing::warn!(
                "Classifier unavailable, returning {} unlabeled items for r/{scope} '{topic}'",
                items.len()
            );
            return items
                .iter()
                .map(|item| AnalyzedItem {
                    id: item.id.clone(),
                    text_excerpt: excerpt(&item.text, UNAVAILABLE_EXCERPT_CHARS),
                    aspect: Aspect::NotApplicable,
                    sentiment: Sentiment::Unavailable,
                    observed_at,
                })
                .collect();
        }

        let texts: Vec<String> = items.iter().map(|i| i.text.clone()).collect();
        let labels = self.classifier.classify_batch(&texts).await;

        items
            .iter()
            .zip(labels)
            .map(|(item, sentiment)| AnalyzedItem {
                id: item.id.clone(),
                text_excerpt: excerpt(&item.text, self.settings.excerpt_chars),
                aspect: tag_aspect(&item.text),
                sentiment,
                observed_at,
            })
            .collect()
    }

    /// Wrap [`AnalysisPipeline::analyze`] in the response envelope.
    pub async fn report(&self, scope: &str, topic: &str) -> AnalyzeResponse {
        let data = self.analyze(scope, topic).await;
        if data.is_empty() {
            return AnalyzeResponse::no_data();
        }
        AnalyzeResponse::Success {
            query: QueryEcho {
                subreddit: scope.to_string(),
                topic: topic.to_string(),
            },
            results_count: data.len(),
            analysis_source: self.analysis_source().to_string(),
            data,
        }
    }
}

/// First `max_chars` characters with line breaks flattened, plus an ellipsis.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut out: String = text
        .chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use threadpulse_classifier::FixedClassifier;
    use threadpulse_source::SourceError;

    struct CountingSource {
        items: Vec<RawItem>,
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn with(n: usize) -> Arc<Self> {
            let items = (0..n)
                .map(|i| RawItem::post(&i.to_string(), format!("Post {i} | battery\nlife"), "apple"))
                .collect();
            Arc::new(Self {
                items,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ContentSource for CountingSource {
        async fn fetch(&self, _scope: &str, _topic: &str, limit: usize) -> Vec<RawItem> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.items.iter().take(limit).cloned().collect()
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    /// Fails its first call, then serves one post.
    struct FlakySource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentSource for FlakySource {
        async fn fetch(&self, scope: &str, topic: &str, limit: usize) -> Vec<RawItem> {
            self.try_fetch(scope, topic, limit).await.unwrap_or_default()
        }

        async fn try_fetch(
            &self,
            scope: &str,
            _topic: &str,
            _limit: usize,
        ) -> Result<Vec<RawItem>, SourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SourceError::Status {
                    status: 503,
                    endpoint: "/search".into(),
                });
            }
            Ok(vec![RawItem::post("a1", "Title | body", scope)])
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn ready() -> ClassifierHandle {
        ClassifierHandle::ready(Arc::new(FixedClassifier::new(Sentiment::Positive)))
    }

    #[test]
    fn excerpt_truncates_and_flattens() {
        assert_eq!(excerpt("a\nb", 150), "a b...");
        let long = "x".repeat(200);
        assert_eq!(excerpt(&long, 150).chars().count(), 153);
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
    }

    #[tokio::test]
    async fn analyze_labels_and_tags_every_item() {
        let source = CountingSource::with(3);
        let pipeline = AnalysisPipeline::new(source, ready(), CachePolicy::default());
        let items = pipeline.analyze("apple", "iPhone").await;
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.sentiment == Sentiment::Positive));
        assert!(items.iter().all(|i| i.aspect == Aspect::Battery));
        assert_eq!(items[0].text_excerpt, "Post 0 | battery life...");
        assert_eq!(items[0].observed_at, items[2].observed_at);
    }

    #[tokio::test]
    async fn analyze_caps_at_fetch_limit() {
        let source = CountingSource::with(80);
        let pipeline = AnalysisPipeline::new(source, ready(), CachePolicy::default());
        assert_eq!(pipeline.analyze("apple", "iPhone").await.len(), 50);
    }

    #[tokio::test]
    async fn empty_fetch_yields_no_data() {
        let source = CountingSource::with(0);
        let pipeline = AnalysisPipeline::new(source, ready(), CachePolicy::default());
        assert!(pipeline.analyze("apple", "iPhone").await.is_empty());
        assert_eq!(
            pipeline.report("apple", "iPhone").await,
            AnalyzeResponse::no_data()
        );
    }

    #[tokio::test]
    async fn unavailable_classifier_degrades_without_failing() {
        let source = CountingSource::with(2);
        let pipeline = AnalysisPipeline::new(
            source,
            ClassifierHandle::unavailable("no model"),
            CachePolicy::default(),
        );
        let items = pipeline.analyze("apple", "iPhone").await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.sentiment == Sentiment::Unavailable));
        assert!(items.iter().all(|i| i.aspect == Aspect::NotApplicable));

        match pipeline.report("apple", "iPhone").await {
            AnalyzeResponse::Success {
                analysis_source, ..
            } => assert_eq!(analysis_source, "unavailable"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_analyze_hits_cache() {
        let source = CountingSource::with(4);
        let pipeline =
            AnalysisPipeline::new(source.clone(), ready(), CachePolicy::default());
        let first = pipeline.analyze("apple", "iPhone").await;
        let second = pipeline.analyze("apple", "iPhone").await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let ids = |v: &[AnalyzedItem]| v.iter().map(|i| i.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn report_echoes_query_and_model() {
        let source = CountingSource::with(2);
        let pipeline = AnalysisPipeline::new(source, ready(), CachePolicy::default());
        match pipeline.report("apple", "iPhone 16").await {
            AnalyzeResponse::Success {
                query,
                results_count,
                analysis_source,
                data,
            } => {
                assert_eq!(query.topic, "iPhone 16");
                assert_eq!(results_count, 2);
                assert_eq!(data.len(), 2);
                assert_eq!(analysis_source, "fixed-positive");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn source_failure_is_retried_on_next_request() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        });
        let pipeline =
            AnalysisPipeline::new(source.clone(), ready(), CachePolicy::default());

        assert!(pipeline.analyze("apple", "iPhone").await.is_empty());
        assert!(pipeline.cache().is_empty());

        let items = pipeline.analyze("apple", "iPhone").await;
        assert_eq!(items.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        pipeline.analyze("apple", "iPhone").await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
