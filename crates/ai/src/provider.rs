//! The AI provider abstraction (transcription, language detection,
//! speech-to-speech translation, and text translation) behind one
//! trait so the pipeline orchestrator never branches on which vendor
//! is configured.

use async_trait::async_trait;
use thiserror::Error;

use crate::noise::is_noise_transcription;

#[derive(Debug, Clone)]
pub struct AudioClip {
    pub pcm_s16le: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.pcm_s16le.len() as f64 / self.sample_rate as f64
    }
}

/// One prior (source, translated) pair fed back into a translation
/// call so recurring terminology stays consistent across an
/// utterance sequence from the same speaker.
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub source_text: String,
    pub translated_text: String,
}

#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    /// The recognized text in the source language.
    pub original_text: String,
    /// The translated text in the target language.
    pub translated_text: String,
    /// Synthesized speech audio in the target language, used by
    /// translated-audio-mode listeners. `None` if the provider could
    /// only produce text (e.g. same-language shortcut taken upstream).
    pub synthesized_audio: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,
    #[error("upstream provider error: {0}")]
    Upstream(String),
    #[error("provider returned an unparseable response: {0}")]
    InvalidResponse(String),
    #[error("provider is missing an API key")]
    MissingApiKey,
    #[error("transcription rejected as noise")]
    Noise,
}

#[async_trait]
pub trait AiProvider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Transcribes audio in its own (possibly hinted) language. Must
    /// apply noise filtering before returning: a provider that only
    /// heard silence or a platform-boilerplate phrase should return
    /// [`ProviderError::Noise`], not an empty-ish string.
    async fn transcribe(&self, audio: &AudioClip, hint_lang: Option<&str>) -> Result<String, ProviderError>;

    /// Identifies the speaker's source language along with the
    /// transcript, in one call where the provider supports it.
    async fn detect_language(
        &self,
        audio: &AudioClip,
        hint_lang: Option<&str>,
    ) -> Result<(String, String), ProviderError>;

    /// Full speech-to-speech translation: produces translated text
    /// and synthesized target-language audio in one call.
    async fn translate(
        &self,
        audio: &AudioClip,
        src_lang: &str,
        tgt_lang: &str,
    ) -> Result<TranslationOutcome, ProviderError>;

    /// Text-only translation, used for the subtitle cache's
    /// background fills and the `/translate` proxy route.
    async fn translate_text(
        &self,
        text: &str,
        src_lang: &str,
        tgt_lang: &str,
        context: &[ContextItem],
    ) -> Result<String, ProviderError>;
}

/// Wraps a raw transcript from any provider with the shared noise
/// check, so each backend doesn't have to remember to call it.
pub fn reject_noise(text: String) -> Result<String, ProviderError> {
    if is_noise_transcription(&text) {
        Err(ProviderError::Noise)
    } else {
        Ok(text)
    }
}

pub(crate) fn language_display_name(code: &str) -> &'static str {
    match code {
        "ja" => "Japanese",
        "en" => "English",
        "zh" => "Chinese (Simplified)",
        "vi" => "Vietnamese",
        _ => "the target language",
    }
}

/// Builds the strict, conversation-forbidding system prompt used for
/// text translation, with language-specific register hints matching
/// the conventions this system's supported languages need (polite
/// register for Japanese, simplified characters for Chinese, full
/// diacritics for Vietnamese).
pub(crate) fn translation_system_prompt(tgt_lang: &str) -> String {
    let target = language_display_name(tgt_lang);
    let mut prompt = format!(
        "You are a translation engine. Translate the given text into {target}. \
         Output ONLY the translation, with no explanation, no quotation marks, \
         and no conversational filler."
    );
    match tgt_lang {
        "ja" => prompt.push_str(" Use polite (desu/masu) register unless the source is clearly casual."),
        "zh" => prompt.push_str(" Use simplified Chinese characters."),
        "vi" => prompt.push_str(" Include full diacritics."),
        _ => {}
    }
    prompt
}
