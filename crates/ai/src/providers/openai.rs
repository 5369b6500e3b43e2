use async_trait::async_trait;
use serde_json::json;

use crate::provider::{
    reject_noise, translation_system_prompt, AiProvider, AudioClip, ContextItem, ProviderError,
    TranslationOutcome,
};

/// Talks to an OpenAI-compatible `/audio/transcriptions`,
/// `/audio/speech`, and `/chat/completions` trio rather than the
/// bidirectional Realtime websocket API — this coordinator already
/// segments utterances client-side via VAD, so the request/response
/// shape fits better than a persistent duplex session.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiProvider {
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

    async fn chat(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": 0.0,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("openai {status}: {text}")));
        }

        let value: serde_json::Value = resp.json().await.map_err(map_reqwest_err)?;
        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))
    }

    async fn transcribe_raw(&self, audio: &AudioClip, hint_lang: Option<&str>) -> Result<String, ProviderError> {
        let wav = crate::wav::encode_pcm16_wav(&audio.pcm_s16le, audio.sample_rate);

        let mut form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(wav).file_name("utterance.wav"))
            .text("model", "whisper-1");
        if let Some(lang) = hint_lang {
            form = form.text("language", lang.to_string());
        }

        let resp = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("openai {status}: {text}")));
        }

        let value: serde_json::Value = resp.json().await.map_err(map_reqwest_err)?;
        value
            .get("text")
            .and_then(|t| t.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("missing text field".into()))
    }

    async fn synthesize(&self, text: &str, _tgt_lang: &str) -> Result<Vec<u8>, ProviderError> {
        let body = json!({
            "model": "tts-1",
            "voice": "alloy",
            "input": text,
            "response_format": "wav",
        });

        let resp = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("openai {status}: {text}")));
        }

        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(map_reqwest_err)
    }
}

fn map_reqwest_err(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Upstream(err.to_string())
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai_realtime"
    }

    async fn transcribe(&self, audio: &AudioClip, hint_lang: Option<&str>) -> Result<String, ProviderError> {
        let text = self.transcribe_raw(audio, hint_lang).await?;
        reject_noise(text)
    }

    async fn detect_language(
        &self,
        audio: &AudioClip,
        hint_lang: Option<&str>,
    ) -> Result<(String, String), ProviderError> {
        let text = self.transcribe(audio, hint_lang).await?;
        let lang = self
            .chat(
                "Identify the language of the following text as a two-letter ISO 639-1 code. \
                 Respond with only the code.",
                &text,
            )
            .await
            .ok()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| s.len() == 2)
            .or_else(|| hint_lang.map(|l| l.to_string()))
            .unwrap_or_else(|| "en".to_string());
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
        let synthesized_audio = self.synthesize(&translated_text, tgt_lang).await.ok();
        Ok(TranslationOutcome {
            original_text,
            translated_text,
            synthesized_audio,
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
        self.chat(&system, &user).await
    }
}
