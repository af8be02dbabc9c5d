use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::Instrument;
use uuid::Uuid;

use crate::checking::prompt;
use crate::core::config::Settings;
use crate::schemas::checking::{CheckStatus, CheckingResult, QualityLevel, TaskContext};
use crate::services::ai_client::{
    AiRequestError, CompletionClient, CompletionRequest, OpenAiCompletionClient,
};
use crate::services::cache::{get_json, result_key, set_json, CheckCache};
use crate::services::heuristic::HeuristicScorer;
use crate::services::ocr::{recognizer_from_settings, OcrEngine, TextRecognizer};
use crate::services::plagiarism::PlagiarismDetector;
use crate::services::preprocess::ImagePreprocessor;
use crate::services::response_validator::{self, Assessment};
use crate::services::retry::{RetryError, RetryPolicy, Retryable};

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub photo: Vec<u8>,
    pub task: TaskContext,
    pub user_id: String,
    pub quality: QualityLevel,
    /// Skip the cache lookup. The fresh result is still written back.
    pub bypass_cache: bool,
}

#[derive(Debug, Clone)]
pub struct CheckingOptions {
    pub text_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub cache_ttl: Duration,
    pub cache_prefix_bytes: usize,
    pub history_limit: usize,
    pub history_capacity: usize,
}

impl Default for CheckingOptions {
    fn default() -> Self {
        Self {
            text_model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            max_tokens: 1500,
            temperature: 0.3,
            cache_ttl: Duration::from_secs(3600),
            cache_prefix_bytes: 1024,
            history_limit: 10,
            history_capacity: 50,
        }
    }
}

impl CheckingOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let ai = settings.ai();
        let checking = settings.checking();
        Self {
            text_model: ai.text_model.clone(),
            vision_model: ai.vision_model.clone(),
            max_tokens: ai.max_tokens,
            temperature: ai.temperature,
            cache_ttl: Duration::from_secs(checking.cache_ttl_seconds),
            cache_prefix_bytes: checking.cache_prefix_bytes,
            history_limit: checking.history_limit,
            history_capacity: checking.history_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScoringMethod {
    Heuristic,
    AiText,
    AiVision,
}

impl ScoringMethod {
    fn as_str(self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::AiText => "ai_text",
            Self::AiVision => "ai_vision",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackReason {
    NotConfigured,
    RetriesExhausted,
    Rejected,
}

impl FallbackReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::NotConfigured => "ai_not_configured",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Rejected => "request_rejected",
        }
    }
}

struct Scored {
    assessment: Assessment,
    method: ScoringMethod,
    fallback: Option<FallbackReason>,
}

struct Recognition {
    text: String,
    image_base64: Option<String>,
}

/// Drives one photo submission from cache lookup to a finished result.
///
/// `check` never fails. Anything unexpected inside the pipeline, including a
/// panic in the blocking recognition worker, becomes a `failed` result.
pub struct CheckingOrchestrator {
    cache: Arc<dyn CheckCache>,
    completion: Option<Arc<dyn CompletionClient>>,
    preprocessor: ImagePreprocessor,
    ocr: OcrEngine,
    retry: RetryPolicy,
    plagiarism: PlagiarismDetector,
    scorer: HeuristicScorer,
    options: CheckingOptions,
}

impl CheckingOrchestrator {
    pub fn new(
        cache: Arc<dyn CheckCache>,
        recognizer: Arc<dyn TextRecognizer>,
        options: CheckingOptions,
    ) -> Self {
        let preprocessor = ImagePreprocessor::default();
        let plagiarism =
            PlagiarismDetector::new(cache.clone(), options.history_limit, options.history_capacity);

        Self {
            cache,
            completion: None,
            ocr: OcrEngine::new(recognizer, preprocessor.clone()),
            preprocessor,
            retry: RetryPolicy::new(3, Duration::from_secs(4), Duration::from_secs(10)),
            plagiarism,
            scorer: HeuristicScorer,
            options,
        }
    }

    pub fn with_completion_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(client);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_settings(settings: &Settings, cache: Arc<dyn CheckCache>) -> Result<Self> {
        let recognizer = recognizer_from_settings(settings.ocr());
        let orchestrator = Self::new(cache, recognizer, CheckingOptions::from_settings(settings))
            .with_retry_policy(RetryPolicy::from_settings(settings.retry()));

        if !settings.ai().is_configured() {
            tracing::warn!("OPENAI_API_KEY is not set; AI tiers will use heuristic scoring");
            return Ok(orchestrator);
        }

        let client = OpenAiCompletionClient::from_settings(settings.ai())?;
        Ok(orchestrator.with_completion_client(Arc::new(client)))
    }

    pub async fn check(&self, request: CheckRequest) -> CheckingResult {
        let started = Instant::now();
        let quality = request.quality;
        let user_id = request.user_id.clone();
        let span = tracing::info_span!(
            "photo_check",
            check_id = %Uuid::new_v4(),
            quality = quality.as_str(),
            user_id = %user_id
        );

        let result = match self.run(request, started).instrument(span).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(
                    quality = quality.as_str(),
                    user_id = %user_id,
                    error = %format!("{err:#}"),
                    "Photo check failed"
                );
                CheckingResult::failed(quality, started.elapsed().as_secs_f64())
            }
        };

        metrics::counter!(
            "photo_checks_total",
            "status" => result.status.as_str(),
            "quality" => quality.as_str()
        )
        .increment(1);
        metrics::histogram!("photo_check_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn run(&self, request: CheckRequest, started: Instant) -> Result<CheckingResult> {
        let key =
            result_key(&request.photo, &request.task.description, self.options.cache_prefix_bytes);

        if !request.bypass_cache {
            if let Some(cached) = self.cached_result(&key).await {
                metrics::counter!("photo_check_cache_hits_total").increment(1);
                tracing::info!(cache_key = %key, quality = request.quality.as_str(), "Cache hit");
                return Ok(cached);
            }
        }

        let CheckRequest { photo, task, user_id, quality, .. } = request;
        let recognition = self.recognize(photo, quality.sends_image()).await?;
        let scored = self.score(&task, quality, &recognition).await;

        let plagiarism_score = if quality.checks_plagiarism() {
            Some(self.plagiarism.check(&recognition.text, &user_id).await)
        } else {
            None
        };

        let Scored { assessment, method, fallback } = scored;
        let mut detailed_analysis = assessment.detailed_analysis;
        detailed_analysis.insert("scoring_method".to_string(), Value::from(method.as_str()));
        if let Some(reason) = fallback {
            detailed_analysis.insert("fallback_reason".to_string(), Value::from(reason.as_str()));
        }

        let result = CheckingResult {
            recognized_text: recognition.text,
            score: assessment.score.clamp(0.0, 100.0),
            feedback: assessment.feedback,
            detailed_analysis,
            confidence_score: assessment.confidence.clamp(0.0, 1.0),
            processing_time: started.elapsed().as_secs_f64(),
            status: CheckStatus::Checked,
            quality_level: quality,
            suggestions: assessment.suggestions,
            plagiarism_score,
        };

        tracing::info!(
            cache_key = %key,
            quality = quality.as_str(),
            scoring_method = method.as_str(),
            score = result.score,
            processing_time = result.processing_time,
            "Photo checked"
        );

        self.store(&key, &result).await;
        Ok(result)
    }

    async fn recognize(&self, photo: Vec<u8>, with_image: bool) -> Result<Recognition> {
        let preprocessor = self.preprocessor.clone();
        let ocr = self.ocr.clone();

        tokio::task::spawn_blocking(move || -> Result<Recognition> {
            let image = preprocessor.decode(&photo).context("Failed to decode photo")?;
            let processed = preprocessor.preprocess(&image).context("Failed to preprocess photo")?;
            let text = ocr.perform_ocr(&image, &processed);
            let image_base64 = if with_image {
                Some(preprocessor.encode_jpeg_base64(&image).context("Failed to encode photo")?)
            } else {
                None
            };
            Ok(Recognition { text, image_base64 })
        })
        .await
        .context("Recognition worker panicked")?
    }

    async fn score(
        &self,
        task: &TaskContext,
        quality: QualityLevel,
        recognition: &Recognition,
    ) -> Scored {
        let heuristic = |fallback: Option<FallbackReason>| Scored {
            assessment: self.scorer.score(
                &recognition.text,
                &task.description,
                &task.checking_criteria,
            ),
            method: ScoringMethod::Heuristic,
            fallback,
        };

        if !quality.uses_ai() {
            return heuristic(None);
        }

        let Some(client) = self.completion.as_ref() else {
            metrics::counter!("ai_fallback_total", "reason" => FallbackReason::NotConfigured.as_str())
                .increment(1);
            return heuristic(Some(FallbackReason::NotConfigured));
        };

        let (model, method, image_base64) = if quality.sends_image() {
            (&self.options.vision_model, ScoringMethod::AiVision, recognition.image_base64.clone())
        } else {
            (&self.options.text_model, ScoringMethod::AiText, None)
        };

        let request = CompletionRequest {
            model: model.clone(),
            system_prompt: prompt::SYSTEM_PROMPT.to_string(),
            user_prompt: prompt::user_prompt(task, &recognition.text),
            image_base64,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        };

        match self.complete_with_retry(client.as_ref(), &request).await {
            Ok(raw) => Scored {
                assessment: response_validator::validate(&raw),
                method,
                fallback: None,
            },
            Err(err) => {
                let reason = if err.last.is_retryable() {
                    FallbackReason::RetriesExhausted
                } else {
                    FallbackReason::Rejected
                };
                metrics::counter!("ai_fallback_total", "reason" => reason.as_str()).increment(1);
                tracing::warn!(
                    quality = quality.as_str(),
                    attempts = err.attempts,
                    error = %err.last,
                    "AI scoring unavailable; falling back to heuristic"
                );
                heuristic(Some(reason))
            }
        }
    }

    async fn complete_with_retry(
        &self,
        client: &dyn CompletionClient,
        request: &CompletionRequest,
    ) -> Result<Map<String, Value>, RetryError<AiRequestError>> {
        self.retry
            .run(|attempt| async move {
                let outcome = client.complete(request).await.and_then(|content| {
                    response_validator::extract_json_object(&content)
                        .ok_or(AiRequestError::Malformed)
                });
                let label = if outcome.is_ok() { "success" } else { "failure" };
                metrics::counter!("ai_completion_attempts_total", "outcome" => label).increment(1);
                tracing::debug!(attempt, model = %request.model, outcome = label, "AI attempt finished");
                outcome
            })
            .await
    }

    async fn cached_result(&self, key: &str) -> Option<CheckingResult> {
        match get_json(self.cache.as_ref(), key).await {
            Ok(cached) => cached,
            Err(err) => {
                tracing::warn!(cache_key = %key, error = %err, "Ignoring cached result");
                None
            }
        }
    }

    async fn store(&self, key: &str, result: &CheckingResult) {
        if let Err(err) = set_json(self.cache.as_ref(), key, result, self.options.cache_ttl).await {
            tracing::warn!(cache_key = %key, error = %err, "Failed to cache result");
        }
    }
}
