pub mod noise;
pub mod provider;
pub mod providers;
pub mod qos;
pub mod vad;
pub mod wav;

use std::sync::Arc;

use lams_config::{AiProvider as AiProviderKind, Settings};
pub use provider::{AiProvider, AudioClip, ContextItem, ProviderError, TranslationOutcome};
pub use qos::{DegradationLevel, QosMetrics, QosMonitor};

/// Builds the configured provider backend from settings. Returns an
/// error rather than panicking so the caller (server bootstrap) can
/// report a clean configuration error instead of a bare unwrap panic.
pub fn build_provider(settings: &Settings) -> Result<Arc<dyn AiProvider>, ProviderError> {
    let api_key = settings
        .ai_api_key()
        .ok_or(ProviderError::MissingApiKey)?
        .to_string();

    let provider: Arc<dyn AiProvider> = match settings.ai_provider {
        AiProviderKind::Gemini => Arc::new(providers::GeminiProvider::new(
            settings.gemini_base_url.clone(),
            settings.gemini_model.clone(),
            api_key,
        )),
        AiProviderKind::OpenaiRealtime => Arc::new(providers::OpenAiProvider::new(
            settings.openai_base_url.clone(),
            settings.openai_model.clone(),
            api_key,
        )),
    };
    Ok(provider)
}
