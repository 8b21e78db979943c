//! OCR engine adapter
//!
//! An [`OcrEngine`] turns one page image into words with bounding boxes and
//! confidences. Document-level helpers run it over every page and aggregate
//! the results.

mod tesseract;

pub use tesseract::*;

use crate::error::OcrError;
use crate::models::{OcrPayload, PageOcrResult};
use crate::render::PageImage;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Text recognition backend
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Whether the engine can run at all
    async fn is_available(&self) -> bool;

    /// Recognize one page. Must be deterministic for identical image bytes
    /// and languages.
    async fn recognize(
        &self,
        page: &PageImage,
        languages: &[String],
    ) -> Result<PageOcrResult, OcrError>;
}

/// Language codes are passed to external tools, so only allow the
/// characters real codes use (`eng`, `chi_sim`, `pol`)
pub fn validate_language(lang: &str) -> Result<(), OcrError> {
    if lang.is_empty() || lang.len() > 20 {
        return Err(OcrError::ProcessingError(format!(
            "invalid language code length: '{}'",
            lang
        )));
    }
    if let Some(c) = lang
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_')
    {
        return Err(OcrError::ProcessingError(format!(
            "invalid character '{}' in language code '{}'",
            c, lang
        )));
    }
    Ok(())
}

/// Run the engine over every page in order.
///
/// A page without text becomes an empty result. `EngineUnavailable` and
/// processing errors abort the document.
pub async fn recognize_document(
    engine: &dyn OcrEngine,
    pages: &[PageImage],
    languages: &[String],
) -> Result<OcrPayload, OcrError> {
    for lang in languages {
        validate_language(lang)?;
    }

    let mut results = Vec::with_capacity(pages.len());
    for page in pages {
        match engine.recognize(page, languages).await {
            Ok(result) => results.push(result),
            Err(OcrError::NoTextFound) => {
                debug!(page = page.page_index, "No text found");
                results.push(PageOcrResult::empty(page.page_index));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(OcrPayload::new(languages.to_vec(), results))
}

/// Frequency of one word across the document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordFrequency {
    pub word: String,
    pub count: usize,
}

/// Document-level OCR statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrSummary {
    pub total_pages: usize,
    pub pages_with_text: usize,
    pub total_words: usize,
    pub total_characters: usize,
    /// Mean word confidence, 0.0 - 1.0
    pub average_confidence: Option<f32>,
    pub most_common_words: Vec<WordFrequency>,
}

impl OcrSummary {
    /// Words shorter than this are left out of `most_common_words`
    const MIN_COMMON_WORD_CHARS: usize = 4;
    const COMMON_WORD_LIMIT: usize = 10;

    pub fn from_payload(payload: &OcrPayload) -> Self {
        let words: Vec<_> = payload.pages.iter().flat_map(|p| &p.words).collect();

        let average_confidence = if words.is_empty() {
            None
        } else {
            Some(words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32)
        };

        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in &words {
            let normalized: String = word
                .text
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if normalized.chars().count() >= Self::MIN_COMMON_WORD_CHARS {
                *counts.entry(normalized).or_default() += 1;
            }
        }
        let mut most_common: Vec<WordFrequency> = counts
            .into_iter()
            .map(|(word, count)| WordFrequency { word, count })
            .collect();
        most_common.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
        most_common.truncate(Self::COMMON_WORD_LIMIT);

        Self {
            total_pages: payload.pages.len(),
            pages_with_text: payload
                .pages
                .iter()
                .filter(|p| !p.full_text.trim().is_empty())
                .count(),
            total_words: words.len(),
            total_characters: payload
                .pages
                .iter()
                .map(|p| p.full_text.chars().count())
                .sum(),
            average_confidence,
            most_common_words: most_common,
        }
    }
}
