use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use crate::services::ai_client::{AiRequestError, CompletionClient, CompletionRequest};
use crate::services::ocr::{OcrError, PageLayout, TextRecognizer};

const TEST_REDIS_DB: &str = "1";

pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn set_test_env() {
    std::env::set_var("PHOTO_CHECK_ENV", "test");
    std::env::set_var("PHOTO_CHECK_STRICT_CONFIG", "0");
    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "6379");
    std::env::set_var("REDIS_DB", TEST_REDIS_DB);
    std::env::remove_var("REDIS_PASSWORD");
    std::env::remove_var("OPENAI_API_KEY");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for name in [
        "OPENAI_BASE_URL",
        "AI_TEXT_MODEL",
        "AI_VISION_MODEL",
        "AI_MAX_TOKENS",
        "AI_TEMPERATURE",
        "AI_REQUEST_TIMEOUT",
        "AI_RETRY_ATTEMPTS",
        "AI_RETRY_MIN_WAIT_SECONDS",
        "AI_RETRY_MAX_WAIT_SECONDS",
        "CHECK_CACHE_TTL_SECONDS",
        "CHECK_CACHE_PREFIX_BYTES",
        "PLAGIARISM_HISTORY_LIMIT",
        "PLAGIARISM_HISTORY_CAPACITY",
    ] {
        std::env::remove_var(name);
    }
}

/// A small page with a few dark strokes, encoded as PNG.
pub(crate) fn sample_photo_png() -> Vec<u8> {
    let page = GrayImage::from_fn(64, 48, |x, y| {
        if (10..54).contains(&x) && matches!(y, 12..=13 | 22..=23 | 32..=33) {
            Luma([20])
        } else {
            Luma([235])
        }
    });

    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(page)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("encode sample photo");
    buffer.into_inner()
}

pub(crate) struct FixedRecognizer {
    text: String,
}

impl FixedRecognizer {
    pub(crate) fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl TextRecognizer for FixedRecognizer {
    fn recognize(&self, _image: &GrayImage, _layout: PageLayout) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

/// Replays a fixed sequence of completion outcomes and records what was sent.
pub(crate) struct ScriptedCompletionClient {
    script: Mutex<VecDeque<Result<String, AiRequestError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl ScriptedCompletionClient {
    pub(crate) fn new(script: Vec<Result<String, AiRequestError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().expect("requests lock").last().cloned()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiRequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(request.clone());
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(AiRequestError::Transport("script exhausted".to_string())))
    }
}
