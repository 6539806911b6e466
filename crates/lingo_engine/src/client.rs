use async_trait::async_trait;
use lingo_core::Explanation;

use crate::completions::CompletionsApi;
use crate::persist::SegmentPersister;
use crate::{ExplainError, ExplainFailure};

/// AI backend for explanation jobs.
///
/// A job succeeds only when both calls succeed; `persist` runs after
/// `explain` and before the result is merged into the store.
#[async_trait]
pub trait ExplanationClient: Send + Sync {
    async fn explain(&self, text: &str, target_language: &str) -> Result<Explanation, ExplainError>;

    async fn persist(&self, segment_id: &str, explanation: &Explanation) -> Result<(), ExplainError>;
}

/// Production client: a completions endpoint plus a persister.
pub struct CompletionsClient<P> {
    api: CompletionsApi,
    persister: P,
}

impl<P: SegmentPersister> CompletionsClient<P> {
    pub fn new(api: CompletionsApi, persister: P) -> Self {
        Self { api, persister }
    }

    pub fn api(&self) -> &CompletionsApi {
        &self.api
    }

    pub fn persister(&self) -> &P {
        &self.persister
    }
}

#[async_trait]
impl<P: SegmentPersister> ExplanationClient for CompletionsClient<P> {
    async fn explain(&self, text: &str, target_language: &str) -> Result<Explanation, ExplainError> {
        self.api.explain_segment(text, target_language).await
    }

    async fn persist(&self, segment_id: &str, explanation: &Explanation) -> Result<(), ExplainError> {
        self.persister
            .save(segment_id, explanation)
            .await
            .map_err(|err| ExplainError::new(ExplainFailure::Persist, err.to_string()))
    }
}
