use std::sync::Arc;

use image::{DynamicImage, GrayImage};
use thiserror::Error;

use crate::core::config::OcrSettings;
use crate::services::preprocess::ImagePreprocessor;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to initialize recognizer: {0}")]
    Init(String),
    #[error("text recognition failed: {0}")]
    Recognition(String),
    #[error("no text recognizer is available in this build")]
    Unavailable,
}

/// Layout assumption handed to the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLayout {
    UniformBlock,
    FullyAutomatic,
}

impl PageLayout {
    pub fn page_segmentation_mode(self) -> u8 {
        match self {
            Self::UniformBlock => 6,
            Self::FullyAutomatic => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::UniformBlock => "uniform_block",
            Self::FullyAutomatic => "fully_automatic",
        }
    }
}

/// Blocking text recognition. Called from worker threads only.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &GrayImage, layout: PageLayout) -> Result<String, OcrError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRecognizer;

impl TextRecognizer for UnavailableRecognizer {
    fn recognize(&self, _image: &GrayImage, _layout: PageLayout) -> Result<String, OcrError> {
        Err(OcrError::Unavailable)
    }
}

#[cfg(feature = "tesseract")]
pub use tesseract::TesseractRecognizer;

#[cfg(feature = "tesseract")]
mod tesseract {
    use std::io::Cursor;

    use image::{GrayImage, ImageFormat};
    use leptess::{LepTess, Variable};

    use super::{OcrError, PageLayout, TextRecognizer};

    /// Tesseract through leptess. A fresh engine is created per call since
    /// `LepTess` is not `Sync` and calls run on arbitrary worker threads.
    #[derive(Debug, Clone)]
    pub struct TesseractRecognizer {
        languages: String,
        tessdata_path: Option<String>,
    }

    impl TesseractRecognizer {
        pub fn new(languages: impl Into<String>, tessdata_path: Option<String>) -> Self {
            Self { languages: languages.into(), tessdata_path }
        }
    }

    impl TextRecognizer for TesseractRecognizer {
        fn recognize(&self, image: &GrayImage, layout: PageLayout) -> Result<String, OcrError> {
            let mut engine = LepTess::new(self.tessdata_path.as_deref(), &self.languages)
                .map_err(|err| OcrError::Init(err.to_string()))?;
            engine
                .set_variable(
                    Variable::TesseditPagesegMode,
                    &layout.page_segmentation_mode().to_string(),
                )
                .map_err(|err| OcrError::Init(err.to_string()))?;

            let mut png = Cursor::new(Vec::new());
            image
                .write_to(&mut png, ImageFormat::Png)
                .map_err(|err| OcrError::Recognition(err.to_string()))?;
            engine
                .set_image_from_mem(png.get_ref())
                .map_err(|err| OcrError::Recognition(err.to_string()))?;

            let text =
                engine.get_utf8_text().map_err(|err| OcrError::Recognition(err.to_string()))?;
            tracing::debug!(
                layout = layout.as_str(),
                confidence = engine.mean_text_conf(),
                "Tesseract pass finished"
            );
            Ok(text)
        }
    }
}

/// Picks the recognizer this build supports.
pub fn recognizer_from_settings(settings: &OcrSettings) -> Arc<dyn TextRecognizer> {
    #[cfg(feature = "tesseract")]
    {
        Arc::new(TesseractRecognizer::new(settings.languages.clone(), settings.tessdata_path.clone()))
    }
    #[cfg(not(feature = "tesseract"))]
    {
        tracing::warn!(
            languages = %settings.languages,
            "Built without the tesseract feature; OCR will yield empty text"
        );
        Arc::new(UnavailableRecognizer)
    }
}

/// Two-pass recognition. Never fails: a failed pass contributes no text.
#[derive(Clone)]
pub struct OcrEngine {
    recognizer: Arc<dyn TextRecognizer>,
    preprocessor: ImagePreprocessor,
}

impl OcrEngine {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, preprocessor: ImagePreprocessor) -> Self {
        Self { recognizer, preprocessor }
    }

    /// Runs the block-layout pass on `processed` and the automatic-layout pass
    /// on a contrast-enhanced copy of `photo`, then keeps the longer output.
    /// Ties go to the processed image.
    pub fn perform_ocr(&self, photo: &DynamicImage, processed: &GrayImage) -> String {
        let block = self.pass(processed, PageLayout::UniformBlock);
        let enhanced = self.preprocessor.enhance_contrast(photo);
        let automatic = self.pass(&enhanced, PageLayout::FullyAutomatic);

        let block_len = block.chars().count();
        let automatic_len = automatic.chars().count();
        tracing::debug!(block_len, automatic_len, "OCR passes compared");

        if automatic_len > block_len {
            automatic
        } else {
            block
        }
    }

    fn pass(&self, image: &GrayImage, layout: PageLayout) -> String {
        match self.recognizer.recognize(image, layout) {
            Ok(text) => clean_text(&text),
            Err(err) => {
                metrics::counter!("ocr_pass_failures_total", "layout" => layout.as_str())
                    .increment(1);
                tracing::warn!(layout = layout.as_str(), error = %err, "OCR pass failed");
                String::new()
            }
        }
    }
}

/// Collapses runs of whitespace, strips stray symbols at the start of each
/// line and drops lines left empty.
pub fn clean_text(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
            collapsed
                .trim_start_matches(|ch: char| is_stray_leading(ch) || ch.is_whitespace())
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_stray_leading(ch: char) -> bool {
    matches!(ch, '|' | '_' | '~' | '`' | '\'' | '"' | '«' | '»' | '*' | '•' | '·' | '®' | '©')
}
