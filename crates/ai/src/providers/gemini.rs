use async_trait::async_trait;
use base64::Engine;
use serde_json::json;

use crate::provider::{
    reject_noise, translation_system_prompt, AiProvider, AudioClip, ContextItem, ProviderError,
    TranslationOutcome,
};

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url,
            model,
            api_key,
        }
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    async fn generate_text(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
        });

        let resp = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("gemini {status}: {text}")));
        }

        let value: serde_json::Value = resp.json().await.map_err(map_reqwest_err)?;
        extract_text(&value)
    }

    async fn generate_from_audio(&self, audio: &AudioClip, prompt: &str) -> Result<String, ProviderError> {
        let wav = crate::wav::encode_pcm16_wav(&audio.pcm_s16le, audio.sample_rate);
        let encoded = base64::engine::general_purpose::STANDARD.encode(wav);

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": "audio/wav", "data": encoded } },
                ],
            }],
        });

        let resp = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("gemini {status}: {text}")));
        }

        let value: serde_json::Value = resp.json().await.map_err(map_reqwest_err)?;
        extract_text(&value)
    }
}

fn extract_text(value: &serde_json::Value) -> Result<String, ProviderError> {
    value
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ProviderError::InvalidResponse("missing candidates[0].content.parts[0].text".into()))
}

fn map_reqwest_err(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Upstream(err.to_string())
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn transcribe(&self, audio: &AudioClip, hint_lang: Option<&str>) -> Result<String, ProviderError> {
        let prompt = match hint_lang {
            Some(lang) => format!(
                "Transcribe this audio verbatim. The speaker is likely speaking {lang}. \
                 Output only the transcription, nothing else."
            ),
            None => "Transcribe this audio verbatim. Output only the transcription, nothing else.".to_string(),
        };
        let text = self.generate_from_audio(audio, &prompt).await?;
        reject_noise(text)
    }

    async fn detect_language(
        &self,
        audio: &AudioClip,
        hint_lang: Option<&str>,
    ) -> Result<(String, String), ProviderError> {
        let prompt = "Transcribe this audio verbatim and identify the spoken language as a \
                       two-letter ISO 639-1 code. Respond with exactly two lines: the language \
                       code on the first line, the transcription on the second line."
            .to_string();
        let raw = self.generate_from_audio(audio, &prompt).await?;
        let mut lines = raw.lines();
        let lang = lines
            .next()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| l.len() == 2)
            .or_else(|| hint_lang.map(|l| l.to_string()))
            .ok_or_else(|| ProviderError::InvalidResponse("no language code in response".into()))?;
        let text = lines.collect::<Vec<_>>().join("\n");
        let text = reject_noise(text)?;
        Ok((text, lang))
    }

    async fn translate(
        &self,
        audio: &AudioClip,
        src_lang: &str,
        tgt_lang: &str,
    ) -> Result<TranslationOutcome, ProviderError> {
        let original_text = self.transcribe(audio, Some(src_lang)).await?;
        // Contract (a): same-language translation returns the input
        // unchanged and never invokes a model.
        if src_lang == tgt_lang {
            return Ok(TranslationOutcome {
                translated_text: original_text.clone(),
                original_text,
                synthesized_audio: None,
            });
        }
        let translated_text = self
            .translate_text(&original_text, src_lang, tgt_lang, &[])
            .await?;
        // Gemini's generateContent endpoint used here is text/vision only;
        // speech synthesis goes through a separate TTS model the caller
        // is responsible for invoking if it needs audio. Reporting `None`
        // here keeps that boundary explicit rather than pretending we
        // synthesized something we didn't.
        Ok(TranslationOutcome {
            original_text,
            translated_text,
            synthesized_audio: None,
        })
    }

    async fn translate_text(
        &self,
        text: &str,
        src_lang: &str,
        tgt_lang: &str,
        context: &[ContextItem],
    ) -> Result<String, ProviderError> {
        if src_lang == tgt_lang {
            return Ok(text.to_string());
        }
        let system = translation_system_prompt(tgt_lang);
        let mut user = String::new();
        for item in context.iter().rev().take(3).collect::<Vec<_>>().into_iter().rev() {
            user.push_str(&format!("{} -> {}\n", item.source_text, item.translated_text));
        }
        user.push_str(text);
        self.generate_text(&system, &user).await
    }
}
