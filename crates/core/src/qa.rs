use crate::chunking::ChunkingConfig;
use crate::config::QaConfig;
use crate::context::{
    assemble_context, best_distance, build_prompt, confidence, dedupe_sources,
    EMPTY_QUESTION_ANSWER, IRRELEVANT_ANSWER, NO_INDEX_ANSWER,
};
use crate::embeddings::Embedder;
use crate::entities::{entity_answer, extract_entities};
use crate::error::{ConfigError, GenerationError, IndexError, IngestError};
use crate::generation::{GenerationRequest, GenerationService};
use crate::index::{load_page_images, Metric, VectorStore};
use crate::ingest::{ingest_document, IngestionReport};
use crate::logger::InteractionLogger;
use crate::models::{Answer, AnswerRoute, PageImage, SourceRef};
use crate::retry::with_retry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

pub struct QaEngine {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn GenerationService>,
    logger: Option<Arc<InteractionLogger>>,
    config: QaConfig,
    indexes: RwLock<HashMap<PathBuf, Arc<VectorStore>>>,
}

impl QaEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn GenerationService>,
        config: QaConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            embedder,
            generator,
            logger: None,
            config,
            indexes: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_logger(mut self, logger: Arc<InteractionLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &QaConfig {
        &self.config
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Ingest `pdf` with this engine's embedder and drop any cached copy of
    /// the index it replaces.
    pub async fn ingest(
        &self,
        pdf: &Path,
        index_root: &Path,
        chunking: ChunkingConfig,
    ) -> Result<IngestionReport, IngestError> {
        let report = ingest_document(
            pdf,
            index_root,
            chunking,
            self.embedder.as_ref(),
            Metric::default(),
        )
        .await?;
        self.invalidate(&report.index_path).await;
        Ok(report)
    }

    /// Forget the cached index for `path`; the next question reloads it.
    pub async fn invalidate(&self, path: &Path) {
        self.indexes.write().await.remove(path);
    }

    async fn load_index(&self, path: &Path) -> Result<Arc<VectorStore>, IndexError> {
        if let Some(store) = self.indexes.read().await.get(path) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(VectorStore::load(path).await?);
        self.indexes
            .write()
            .await
            .insert(path.to_path_buf(), Arc::clone(&store));
        Ok(store)
    }

    pub async fn answer(&self, question: &str, index_path: &Path) -> Answer {
        self.answer_with_sink(question, index_path, None).await
    }

    /// Like [`QaEngine::answer`], forwarding generated fragments to `sink` as
    /// they arrive. A retried attempt may forward fragments again; the
    /// returned answer holds only the successful attempt's text.
    pub async fn answer_with_sink(
        &self,
        question: &str,
        index_path: &Path,
        sink: Option<&mpsc::Sender<String>>,
    ) -> Answer {
        let question = question.trim();
        if question.is_empty() {
            return Answer::canned(EMPTY_QUESTION_ANSWER, AnswerRoute::EmptyQuestion);
        }

        let store = match self.load_index(index_path).await {
            Ok(store) => store,
            Err(error) => {
                warn!(index = %index_path.display(), %error, "no usable index");
                return Answer::canned(NO_INDEX_ANSWER, AnswerRoute::NoIndex);
            }
        };

        let hits = match store
            .search(question, self.config.top_k, self.embedder.as_ref())
            .await
        {
            Ok(hits) => hits,
            Err(error) if error.is_unavailable() => {
                warn!(index = %index_path.display(), %error, "index unusable for this embedder");
                return Answer::canned(NO_INDEX_ANSWER, AnswerRoute::NoIndex);
            }
            Err(error) => {
                warn!(index = %index_path.display(), %error, "retrieval failed");
                Vec::new()
            }
        };

        if hits.is_empty() {
            let answer = Answer::canned(IRRELEVANT_ANSWER, AnswerRoute::NoResults);
            self.log(question, &answer).await;
            return answer;
        }

        let best = best_distance(&hits);
        debug!(hits = hits.len(), best_distance = ?best, "retrieved chunks");

        let context = assemble_context(&hits);
        let sources = dedupe_sources(&hits);

        if let Some((kind, matched)) = entity_answer(question, &extract_entities(&context)) {
            debug!(?kind, "answered from extracted entities");
            let answer = Answer {
                answer: matched,
                sources,
                confidence: 1.0,
                used_vision: false,
                route: AnswerRoute::Entity,
            };
            self.log(question, &answer).await;
            return answer;
        }

        if let (Some(threshold), Some(best)) = (self.config.relevance_threshold, best) {
            if best > threshold {
                debug!(best, threshold, "best match is below the relevance threshold");
                let answer = Answer::canned(IRRELEVANT_ANSWER, AnswerRoute::BelowRelevance);
                self.log(question, &answer).await;
                return answer;
            }
        }

        let images = self.vision_images(&store, &sources).await;
        let request = GenerationRequest {
            prompt: build_prompt(&context, question, self.config.max_context_chars),
            images,
        };
        let used_vision = !request.images.is_empty();

        let generated = {
            let generator = self.generator.as_ref();
            let request = &request;
            with_retry(&self.config.retry, generator.name(), move |_attempt| {
                collect_completion(generator, request, sink)
            })
            .await
        };

        let answer = match generated {
            Ok(text) => Answer {
                answer: text,
                sources,
                confidence: confidence(&hits),
                used_vision,
                route: AnswerRoute::Generated,
            },
            Err(error) => {
                warn!(service = self.generator.name(), %error, "generation failed");
                Answer {
                    answer: IRRELEVANT_ANSWER.to_string(),
                    sources,
                    confidence: 0.0,
                    used_vision: false,
                    route: AnswerRoute::GenerationFailed,
                }
            }
        };

        info!(
            route = ?answer.route,
            confidence = answer.confidence,
            sources = answer.sources.len(),
            used_vision = answer.used_vision,
            "answered question"
        );
        self.log(question, &answer).await;
        answer
    }

    /// Images of cited pages that a vision model can read.
    async fn vision_images(&self, store: &VectorStore, sources: &[SourceRef]) -> Vec<PageImage> {
        let pages: Vec<u32> = sources
            .iter()
            .filter(|source| source.has_images)
            .map(|source| source.page)
            .collect();
        if pages.is_empty() {
            return Vec::new();
        }
        load_page_images(store.path(), &pages)
            .await
            .into_iter()
            .filter(|image| image.mime_type().is_some())
            .collect()
    }

    async fn log(&self, question: &str, answer: &Answer) {
        if let Some(logger) = &self.logger {
            logger
                .append(question, &answer.answer, &answer.sources, Some(answer.confidence))
                .await;
        }
    }
}

/// Drain one completion stream to its end. A blank completion is an error.
async fn collect_completion(
    generator: &dyn GenerationService,
    request: &GenerationRequest,
    sink: Option<&mpsc::Sender<String>>,
) -> Result<String, GenerationError> {
    let mut fragments = generator.stream(request).await?;
    let mut text = String::new();

    while let Some(fragment) = fragments.recv().await {
        let fragment = fragment?;
        if let Some(sink) = sink {
            // a caller that stopped listening does not cancel the answer
            let _ = sink.send(fragment.clone()).await;
        }
        text.push_str(&fragment);
    }

    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::Empty {
            service: generator.name().to_string(),
        });
    }
    Ok(text.to_string())
}
