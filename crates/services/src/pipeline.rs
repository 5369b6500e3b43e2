//! The pipeline orchestrator (C7): turns one speaker's raw WAV
//! utterance into original-audio fan-out, translated-audio fan-out,
//! ordered subtitle delivery, background translation fill, and a
//! persisted transcript row. This is the one place every other
//! component in this crate is wired together.

use std::collections::HashMap;
use std::sync::Arc;

use std::time::Duration;

use bson::oid::ObjectId;
use futures::future::join_all;
use lams_ai::{AiProvider, AudioClip, ProviderError, QosMonitor};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::SubtitleCache;
use crate::dao::{SessionStore, SubtitleStore};
use crate::room::{AudioMode, RoomHandle, RoomRegistry};

/// Minimum payload size admitted into the pipeline: a 44-byte WAV
/// header plus ~0.5s of 16kHz mono 16-bit PCM (spec §4.2/§4.7 step 1).
pub const MIN_WAV_BYTES: usize = 44 + 16_000;

/// Upper bound on a speech-to-speech or ASR call to the AI provider
/// (spec §5 "translation ≤15s").
const TRANSLATE_TIMEOUT: Duration = Duration::from_secs(15);
/// Upper bound on a text-only translation call (spec §5 "text
/// translation ≤30s").
const TRANSLATE_TEXT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs `fut`, converting a timeout into `ProviderError::Timeout` so
/// callers handle a hung upstream exactly like any other provider
/// error (spec §5 "every external call is bounded").
async fn bounded<T>(
    duration: Duration,
    fut: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout),
    }
}

#[derive(Debug, Clone)]
pub struct SubtitleEvent {
    pub id: String,
    pub seq: u64,
    pub speaker_id: ObjectId,
    pub text: String,
    pub lang: String,
    pub is_translated: bool,
    pub translation_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    Light,
    Moderate,
    Severe,
}

/// Outbound effects the orchestrator asks the connection layer to
/// deliver. Kept as plain data so `lams_services` never depends on
/// the transport crate — `RoomTransport` is the only seam.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Subtitle(SubtitleEvent),
    QosWarning { lang: String, level: QosLevel },
}

/// The fan-out/delivery seam C8 (the connection hub) implements.
/// Every method is best-effort from the orchestrator's point of view:
/// a failed send to one listener must never abort delivery to others
/// or stop the pipeline from reaching persistence (spec §4.7 Failure
/// semantics, §5 Backpressure).
#[async_trait::async_trait]
pub trait RoomTransport: Send + Sync + 'static {
    async fn send_audio(&self, room_id: ObjectId, user_id: ObjectId, audio: &[u8]);
    async fn send_event(&self, room_id: ObjectId, user_id: ObjectId, event: OutboundEvent);
}

pub struct PipelineOrchestrator<T: RoomTransport> {
    provider: Arc<dyn AiProvider>,
    cache: Arc<dyn SubtitleCache>,
    sessions: Arc<dyn SessionStore>,
    subtitles: Arc<dyn SubtitleStore>,
    rooms: Arc<RoomRegistry>,
    transport: Arc<T>,
    /// Serializes session-open races per room without taking the room
    /// actor's own lock for the whole DB round-trip (spec §4.6,
    /// §9 "Session identity race").
    session_open_locks: Mutex<HashMap<ObjectId, Arc<Mutex<()>>>>,
}

impl<T: RoomTransport> PipelineOrchestrator<T> {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        cache: Arc<dyn SubtitleCache>,
        sessions: Arc<dyn SessionStore>,
        subtitles: Arc<dyn SubtitleStore>,
        rooms: Arc<RoomRegistry>,
        transport: Arc<T>,
    ) -> Self {
        Self {
            provider,
            cache,
            sessions,
            subtitles,
            rooms,
            transport,
            session_open_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Step 1 + the rest of the algorithm in spec.md §4.7, run for one
    /// accepted WAV utterance from `speaker_id` in `room_id`.
    pub async fn process_utterance(&self, room_id: ObjectId, speaker_id: ObjectId, audio_bytes: Vec<u8>) {
        if audio_bytes.len() < MIN_WAV_BYTES {
            return;
        }
        let wav = match lams_ai::wav::decode_wav(&audio_bytes) {
            Ok(wav) => wav,
            Err(err) => {
                warn!(%err, "rejecting utterance: not a decodable WAV blob");
                return;
            }
        };
        if !lams_ai::vad::has_speech(&wav.pcm_s16le, wav.sample_rate) {
            return;
        }

        let Some(room) = self.rooms.get(&room_id) else {
            return;
        };

        // Step 2: immediate original-mode fan-out, before any ASR or
        // translation work, and never serialized behind it.
        let (speaker_native_lang, original_listeners) = {
            let state = room.state.lock().await;
            let Some(speaker) = state.participants.get(&speaker_id) else {
                return;
            };
            let native_lang = speaker.native_language.clone();
            let listeners = state.original_audio_listeners();
            (native_lang, listeners)
        };
        for listener in &original_listeners {
            if *listener != speaker_id {
                self.transport.send_audio(room_id, *listener, &audio_bytes).await;
            }
        }

        // Step 3: language-detecting ASR.
        let clip = AudioClip {
            pcm_s16le: wav.pcm_s16le,
            sample_rate: wav.sample_rate,
        };
        let (original_text, detected_lang) = match bounded(
            TRANSLATE_TIMEOUT,
            self.provider.detect_language(&clip, Some(&speaker_native_lang)),
        )
        .await
        {
            Ok((text, lang)) if !lang.trim().is_empty() => (text, lang),
            Ok((text, _)) => (text, speaker_native_lang.clone()),
            Err(err) => {
                info!(%err, "ASR failed; original audio already delivered, stopping here");
                return;
            }
        };
        if original_text.trim().is_empty() {
            return;
        }
        let speaker_lang = detected_lang;

        // Step 4: reclassify translated-mode listeners whose target
        // matches the now-known speaker language, and split the rest
        // into target-language buckets.
        let (reclassified, mut buckets, speaker_audio_mode, speaker_target_lang, subtitle_listeners) = {
            let state = room.state.lock().await;
            let mut reclassified = Vec::new();
            let mut buckets: HashMap<String, Vec<ObjectId>> = HashMap::new();
            for p in state.participants.values() {
                if p.user_id == speaker_id || p.audio_mode != AudioMode::Translated {
                    continue;
                }
                if p.target_language == speaker_lang {
                    reclassified.push(p.user_id);
                } else {
                    buckets.entry(p.target_language.clone()).or_default().push(p.user_id);
                }
            }
            let speaker = state.participants.get(&speaker_id);
            let speaker_mode = speaker.map(|p| p.audio_mode).unwrap_or(AudioMode::Original);
            let speaker_target = speaker.map(|p| p.target_language.clone()).unwrap_or_else(|| speaker_lang.clone());
            let subtitle_listeners: Vec<ObjectId> = state
                .participants
                .values()
                .filter(|p| p.subtitle_enabled)
                .map(|p| p.user_id)
                .collect();
            (reclassified, buckets, speaker_mode, speaker_target, subtitle_listeners)
        };
        for listener in &reclassified {
            self.transport.send_audio(room_id, *listener, &audio_bytes).await;
        }
        // The speaker, if in translated mode with a target matching
        // the detected language, is a subtitle-only participant in
        // this bucket per spec §4.7 step 8 — never echoed audio.
        if speaker_audio_mode == AudioMode::Translated && speaker_target_lang != speaker_lang {
            buckets.entry(speaker_target_lang.clone()).or_default().push(speaker_id);
        }

        // Step 5: dedup against this speaker's last recognized text.
        {
            let mut state = room.state.lock().await;
            if state.is_duplicate(&speaker_id, &original_text) {
                return;
            }
            state.record_speaker_text(speaker_id, original_text.clone());
        }

        // Step 6: subtitle identity.
        let subtitle_id = Uuid::new_v4().to_string();
        let seq = { room.state.lock().await.next_seq() };
        let _ = self.cache.store_original(&subtitle_id, &original_text, &speaker_lang).await;

        // Step 7: original-subtitle fan-out — original-mode listeners
        // with subtitles on, plus the speaker if in original mode.
        let original_event = OutboundEvent::Subtitle(SubtitleEvent {
            id: subtitle_id.clone(),
            seq,
            speaker_id,
            text: original_text.clone(),
            lang: speaker_lang.clone(),
            is_translated: false,
            translation_failed: false,
        });
        for listener in &original_listeners {
            if subtitle_listeners.contains(listener) {
                if *listener == speaker_id && speaker_audio_mode == AudioMode::Translated {
                    continue;
                }
                self.transport
                    .send_event(room_id, *listener, original_event.clone())
                    .await;
            }
        }
        if speaker_audio_mode == AudioMode::Original
            && subtitle_listeners.contains(&speaker_id)
            && !original_listeners.contains(&speaker_id)
        {
            self.transport.send_event(room_id, speaker_id, original_event.clone()).await;
        }

        // Step 8: translated fan-out, per bucket, concurrently.
        let qos = &room.qos;
        let bucket_futures = buckets.into_iter().map(|(tgt, listeners)| {
            let audio_bytes = &audio_bytes;
            let speaker_lang = speaker_lang.clone();
            let subtitle_id = subtitle_id.clone();
            let subtitle_listeners = &subtitle_listeners;
            async move {
                self.translate_bucket(
                    room_id,
                    speaker_id,
                    audio_bytes,
                    &speaker_lang,
                    &tgt,
                    seq,
                    &subtitle_id,
                    &listeners,
                    subtitle_listeners,
                    qos,
                )
                .await
            }
        });
        let bucket_results: Vec<(String, String)> = join_all(bucket_futures).await.into_iter().flatten().collect();
        let translations: HashMap<String, String> = bucket_results.into_iter().collect();

        // Step 9: background translation fill for subtitle-enabled
        // original-mode listeners whose target wasn't produced above.
        let fill_targets: Vec<String> = {
            let state = room.state.lock().await;
            state
                .participants
                .values()
                .filter(|p| {
                    p.subtitle_enabled
                        && p.audio_mode == AudioMode::Original
                        && p.target_language != speaker_lang
                        && !translations.contains_key(&p.target_language)
                })
                .map(|p| p.target_language.clone())
                .collect()
        };
        for tgt in fill_targets {
            if translations.contains_key(&tgt) {
                continue;
            }
            if matches!(self.cache.mark_pending(&subtitle_id, &tgt).await, Ok(true)) {
                let provider = self.provider.clone();
                let cache = self.cache.clone();
                let subtitles = self.subtitles.clone();
                let subtitle_id = subtitle_id.clone();
                let original_text = original_text.clone();
                let speaker_lang = speaker_lang.clone();
                tokio::spawn(async move {
                    match bounded(
                        TRANSLATE_TEXT_TIMEOUT,
                        provider.translate_text(&original_text, &speaker_lang, &tgt, &[]),
                    )
                    .await
                    {
                        Ok(text) => {
                            let _ = cache.store_translation(&subtitle_id, &tgt, &text).await;
                            let _ = subtitles.add_translation_if_absent(&subtitle_id, &tgt, &text).await;
                        }
                        Err(err) => {
                            warn!(%err, lang = %tgt, "background translation fill failed");
                            // The pending marker simply expires via
                            // PENDING_TTL so a later reader can retry
                            // (spec §4.4) — nothing to clear explicitly.
                        }
                    }
                });
            }
        }

        // Step 10: persistence.
        let session_id = self.get_or_create_active_session(room_id).await;
        if let Some(session_id) = session_id {
            room.state.lock().await.session_id = Some(session_id);
            let _ = self.sessions.increment_utterance_count(&session_id).await;
        }
        let speaker_display_name = {
            room.state
                .lock()
                .await
                .participants
                .get(&speaker_id)
                .map(|p| p.display_name.clone())
                .unwrap_or_default()
        };
        if let Err(err) = self
            .subtitles
            .append(
                &subtitle_id,
                &room_id,
                session_id,
                seq,
                &speaker_id,
                &speaker_display_name,
                &speaker_lang,
                &original_text,
                translations,
            )
            .await
        {
            warn!(%err, "failed to persist subtitle row; fan-out already succeeded");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn translate_bucket(
        &self,
        room_id: ObjectId,
        speaker_id: ObjectId,
        audio_bytes: &[u8],
        speaker_lang: &str,
        tgt: &str,
        seq: u64,
        subtitle_id: &str,
        listeners: &[ObjectId],
        subtitle_listeners: &[ObjectId],
        qos: &Mutex<QosMonitor>,
    ) -> Option<(String, String)> {
        let clip = match lams_ai::wav::decode_wav(audio_bytes) {
            Ok(wav) => AudioClip {
                pcm_s16le: wav.pcm_s16le,
                sample_rate: wav.sample_rate,
            },
            Err(_) => return None,
        };

        let measurement = qos.lock().await.start_measurement();
        let outcome = bounded(TRANSLATE_TIMEOUT, self.provider.translate(&clip, speaker_lang, tgt)).await;
        let metrics = qos.lock().await.end_measurement(measurement);

        let level = match metrics.degradation {
            lams_ai::DegradationLevel::Severe => Some(QosLevel::Severe),
            lams_ai::DegradationLevel::Moderate => Some(QosLevel::Moderate),
            lams_ai::DegradationLevel::Light => Some(QosLevel::Light),
            lams_ai::DegradationLevel::None => None,
        };

        match outcome {
            Ok(result) => {
                let skip_audio = metrics.should_fallback_to_subtitle;
                if !skip_audio {
                    if let Some(audio) = &result.synthesized_audio {
                        for listener in listeners {
                            if *listener != speaker_id {
                                self.transport.send_audio(room_id, *listener, audio).await;
                            }
                        }
                    }
                } else {
                    // Jitter alone can trip should_fallback_to_subtitle while
                    // the latency band is still None; the warning still must
                    // go out (spec §4.3), so floor at Moderate in that case.
                    let level = level.unwrap_or(QosLevel::Moderate);
                    for listener in listeners {
                        self.transport
                            .send_event(room_id, *listener, OutboundEvent::QosWarning { lang: tgt.to_string(), level })
                            .await;
                    }
                }
                for listener in listeners {
                    if subtitle_listeners.contains(listener) {
                        self.transport
                            .send_event(
                                room_id,
                                *listener,
                                OutboundEvent::Subtitle(SubtitleEvent {
                                    id: subtitle_id.to_string(),
                                    seq,
                                    speaker_id,
                                    text: result.translated_text.clone(),
                                    lang: tgt.to_string(),
                                    is_translated: true,
                                    translation_failed: false,
                                }),
                            )
                            .await;
                    }
                }
                Some((tgt.to_string(), result.translated_text))
            }
            Err(err) => {
                warn!(%err, lang = tgt, "translation failed for bucket; sending original text with failure flag");
                for listener in listeners {
                    if subtitle_listeners.contains(listener) {
                        self.transport
                            .send_event(
                                room_id,
                                *listener,
                                OutboundEvent::Subtitle(SubtitleEvent {
                                    id: subtitle_id.to_string(),
                                    seq,
                                    speaker_id,
                                    text: String::new(),
                                    lang: tgt.to_string(),
                                    is_translated: true,
                                    translation_failed: true,
                                }),
                            )
                            .await;
                    }
                }
                None
            }
        }
    }

    /// Returns the active session id for `room_id`, creating one if
    /// none is open yet. Serializes concurrent first-utterances on
    /// the same room through a per-room lock so at most one `open()`
    /// call reaches Mongo, with the partial unique index as a
    /// crash-recovery backstop (spec §4.6, §9).
    async fn get_or_create_active_session(&self, room_id: ObjectId) -> Option<ObjectId> {
        let lock = {
            let mut locks = self.session_open_locks.lock().await;
            locks.entry(room_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock().await;

        match self.sessions.find_active(&room_id).await {
            Ok(Some(session)) => session.id,
            Ok(None) => match self.sessions.open(&room_id).await {
                Ok(session) => session.id,
                Err(err) => {
                    warn!(%err, "failed to open meeting session");
                    None
                }
            },
            Err(err) => {
                warn!(%err, "failed to look up active meeting session");
                None
            }
        }
    }

    /// Called when the room's last participant disconnects (spec
    /// §4.5/§4.6): closes the active session, if any.
    pub async fn end_session_if_open(&self, room_id: ObjectId) {
        self.session_open_locks.lock().await.remove(&room_id);
        match self.sessions.find_active(&room_id).await {
            Ok(Some(session)) => {
                if let Some(id) = session.id {
                    if let Err(err) = self.sessions.close(&id).await {
                        warn!(%err, "failed to close meeting session on room disposal");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "failed to look up active session during room disposal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use lams_ai::{ContextItem, ProviderError, TranslationOutcome};
    use lams_db::models::{MeetingSession, Subtitle};

    use crate::cache::InProcessCache;
    use crate::dao::base::DaoResult;
    use crate::room::Participant;

    #[test]
    fn min_wav_bytes_is_header_plus_half_second_16khz_mono16() {
        assert_eq!(MIN_WAV_BYTES, 44 + 16_000);
    }

    /// A loud tone at a sample rate `webrtc-vad` doesn't support, so
    /// `has_speech` takes its energy-only fallback path deterministically
    /// (mirrors `lams_ai::vad`'s own test for the same reason) rather
    /// than depending on whether a synthetic sine wave happens to look
    /// like speech to the real frame classifier.
    fn speech_wav() -> Vec<u8> {
        let samples: Vec<i16> = (0..12_000).map(|i| ((i as f64 * 0.3).sin() * 20_000.0) as i16).collect();
        lams_ai::wav::encode_pcm16_wav(&samples, 22_050)
    }

    #[derive(Default)]
    struct FakeProvider {
        detected_lang: String,
        text: String,
        delay_for: HashMap<String, Duration>,
        fail_for: std::collections::HashSet<String>,
        translate_calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(detected_lang: &str, text: &str) -> Self {
            Self {
                detected_lang: detected_lang.to_string(),
                text: text.to_string(),
                ..Default::default()
            }
        }

        fn with_delay(mut self, lang: &str, delay: Duration) -> Self {
            self.delay_for.insert(lang.to_string(), delay);
            self
        }
    }

    #[async_trait]
    impl AiProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn transcribe(&self, _audio: &AudioClip, _hint_lang: Option<&str>) -> Result<String, ProviderError> {
            Ok(self.text.clone())
        }

        async fn detect_language(
            &self,
            _audio: &AudioClip,
            _hint_lang: Option<&str>,
        ) -> Result<(String, String), ProviderError> {
            Ok((self.text.clone(), self.detected_lang.clone()))
        }

        async fn translate(
            &self,
            _audio: &AudioClip,
            _src_lang: &str,
            tgt_lang: &str,
        ) -> Result<TranslationOutcome, ProviderError> {
            self.translate_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.contains(tgt_lang) {
                return Err(ProviderError::Upstream("simulated upstream failure".into()));
            }
            if let Some(delay) = self.delay_for.get(tgt_lang) {
                tokio::time::sleep(*delay).await;
            }
            Ok(TranslationOutcome {
                original_text: self.text.clone(),
                translated_text: format!("[{tgt_lang}] {}", self.text),
                synthesized_audio: Some(format!("audio-{tgt_lang}").into_bytes()),
            })
        }

        async fn translate_text(
            &self,
            text: &str,
            _src_lang: &str,
            tgt_lang: &str,
            _context: &[ContextItem],
        ) -> Result<String, ProviderError> {
            Ok(format!("[{tgt_lang}] {text}"))
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        audio: Mutex<Vec<(ObjectId, Vec<u8>)>>,
        events: Mutex<Vec<(ObjectId, OutboundEvent)>>,
    }

    #[async_trait]
    impl RoomTransport for FakeTransport {
        async fn send_audio(&self, _room_id: ObjectId, user_id: ObjectId, audio: &[u8]) {
            self.audio.lock().await.push((user_id, audio.to_vec()));
        }

        async fn send_event(&self, _room_id: ObjectId, user_id: ObjectId, event: OutboundEvent) {
            self.events.lock().await.push((user_id, event));
        }
    }

    #[derive(Default)]
    struct FakeSessionStore {
        sessions: Mutex<HashMap<ObjectId, MeetingSession>>,
    }

    #[async_trait]
    impl SessionStore for FakeSessionStore {
        async fn find_active(&self, room_id: &ObjectId) -> DaoResult<Option<MeetingSession>> {
            Ok(self.sessions.lock().await.get(room_id).filter(|s| s.is_active).cloned())
        }

        async fn open(&self, room_id: &ObjectId) -> DaoResult<MeetingSession> {
            let session = MeetingSession {
                id: Some(ObjectId::new()),
                room_id: *room_id,
                is_active: true,
                opened_at: bson::DateTime::now(),
                closed_at: None,
                utterance_count: 0,
            };
            self.sessions.lock().await.insert(*room_id, session.clone());
            Ok(session)
        }

        async fn close(&self, session_id: &ObjectId) -> DaoResult<()> {
            for s in self.sessions.lock().await.values_mut() {
                if s.id.as_ref() == Some(session_id) {
                    s.is_active = false;
                }
            }
            Ok(())
        }

        async fn increment_utterance_count(&self, session_id: &ObjectId) -> DaoResult<()> {
            for s in self.sessions.lock().await.values_mut() {
                if s.id.as_ref() == Some(session_id) {
                    s.utterance_count += 1;
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSubtitleStore {
        rows: Mutex<Vec<Subtitle>>,
    }

    #[async_trait]
    impl SubtitleStore for FakeSubtitleStore {
        async fn append(
            &self,
            subtitle_id: &str,
            room_id: &ObjectId,
            session_id: Option<ObjectId>,
            seq: u64,
            speaker_id: &ObjectId,
            speaker_display_name: &str,
            original_language: &str,
            original_text: &str,
            translations: HashMap<String, String>,
        ) -> DaoResult<Subtitle> {
            let row = Subtitle {
                id: Some(ObjectId::new()),
                subtitle_id: subtitle_id.to_string(),
                room_id: *room_id,
                session_id,
                seq,
                speaker_id: *speaker_id,
                speaker_display_name: speaker_display_name.to_string(),
                original_text: original_text.to_string(),
                original_language: original_language.to_string(),
                translations,
                created_at: bson::DateTime::now(),
            };
            self.rows.lock().await.push(row.clone());
            Ok(row)
        }

        async fn add_translation_if_absent(&self, subtitle_id: &str, lang: &str, text: &str) -> DaoResult<()> {
            let mut rows = self.rows.lock().await;
            if let Some(row) = rows.iter_mut().find(|r| r.subtitle_id == subtitle_id) {
                row.translations.entry(lang.to_string()).or_insert_with(|| text.to_string());
            }
            Ok(())
        }
    }

    struct Harness {
        orchestrator: PipelineOrchestrator<FakeTransport>,
        rooms: Arc<RoomRegistry>,
        transport: Arc<FakeTransport>,
        sessions: Arc<FakeSessionStore>,
        subtitles: Arc<FakeSubtitleStore>,
    }

    impl Harness {
        fn new(provider: FakeProvider, max_latency_ms: u64, max_jitter_ms: u64) -> Self {
            let rooms = Arc::new(RoomRegistry::new(max_latency_ms, max_jitter_ms));
            let transport = Arc::new(FakeTransport::default());
            let cache: Arc<dyn SubtitleCache> = Arc::new(InProcessCache::new());
            let sessions = Arc::new(FakeSessionStore::default());
            let subtitles = Arc::new(FakeSubtitleStore::default());
            let orchestrator = PipelineOrchestrator::new(
                Arc::new(provider),
                cache,
                sessions.clone(),
                subtitles.clone(),
                rooms.clone(),
                transport.clone(),
            );
            Self {
                orchestrator,
                rooms,
                transport,
                sessions,
                subtitles,
            }
        }

        /// Mirrors the websocket handler's disconnect path: leave the
        /// room, and if that empties it, close the active session and
        /// tear down the room's in-process state (spec §4.5/§4.6).
        async fn leave(&self, room_id: ObjectId, user_id: ObjectId) {
            let room_empty = match self.rooms.get(&room_id) {
                Some(room) => room.state.lock().await.leave(&user_id),
                None => return,
            };
            if room_empty {
                self.orchestrator.end_session_if_open(room_id).await;
                self.rooms.dispose_if_empty(&room_id).await;
            }
        }

        async fn join(&self, room_id: ObjectId, mut participant: Participant, audio_mode: AudioMode, target_language: &str) -> ObjectId {
            participant.audio_mode = audio_mode;
            participant.target_language = target_language.to_string();
            let user_id = participant.user_id;
            let room = self.rooms.get_or_create(room_id);
            room.state.lock().await.join(participant);
            user_id
        }

        async fn audio_recipients(&self) -> Vec<ObjectId> {
            self.transport.audio.lock().await.iter().map(|(id, _)| *id).collect()
        }

        async fn events_for(&self, user_id: ObjectId) -> Vec<OutboundEvent> {
            self.transport
                .events
                .lock()
                .await
                .iter()
                .filter(|(id, _)| *id == user_id)
                .map(|(_, e)| e.clone())
                .collect()
        }
    }

    fn subtitle_event(events: &[OutboundEvent]) -> Option<&SubtitleEvent> {
        events.iter().find_map(|e| match e {
            OutboundEvent::Subtitle(s) => Some(s),
            _ => None,
        })
    }

    #[tokio::test]
    async fn original_mode_echo_avoidance_and_dedup() {
        let room_id = ObjectId::new();
        let provider = FakeProvider::new("ja", "こんにちは");
        let harness = Harness::new(provider, 1200, 200);

        let alice = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Alice".into(), "ja".into()),
            AudioMode::Original,
            "ja",
        ).await;
        let bob = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Bob".into(), "ja".into()),
            AudioMode::Original,
            "ja",
        ).await;

        let audio = speech_wav();
        harness.orchestrator.process_utterance(room_id, alice, audio.clone()).await;

        let recipients = harness.audio_recipients().await;
        assert!(recipients.contains(&bob));
        assert!(!recipients.contains(&alice), "speaker must never hear their own echoed audio");

        let bob_events = harness.events_for(bob).await;
        let bob_subtitle = subtitle_event(&bob_events).expect("bob should receive the original subtitle");
        assert_eq!(bob_subtitle.lang, "ja");
        assert_eq!(bob_subtitle.text, "こんにちは");
        assert!(!bob_subtitle.is_translated);

        let alice_events = harness.events_for(alice).await;
        let alice_subtitle = subtitle_event(&alice_events).expect("alice sees her own words in original mode");
        assert_eq!(alice_subtitle.lang, "ja");

        // Second, identical utterance: audio still reaches Bob (step 2
        // always runs), but the duplicate subtitle is suppressed.
        harness.orchestrator.process_utterance(room_id, alice, audio).await;
        let recipients_after = harness.audio_recipients().await;
        assert_eq!(recipients_after.iter().filter(|id| **id == bob).count(), 2);
        assert_eq!(harness.events_for(bob).await.len(), 1, "duplicate subtitle must not be re-sent");
    }

    #[tokio::test]
    async fn translated_mode_fan_out_per_target_language() {
        let room_id = ObjectId::new();
        let provider = FakeProvider::new("ja", "こんにちは");
        let harness = Harness::new(provider, 1200, 200);

        let alice = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Alice".into(), "ja".into()),
            AudioMode::Original,
            "ja",
        ).await;
        let carol = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Carol".into(), "en".into()),
            AudioMode::Translated,
            "en",
        ).await;
        let dan = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Dan".into(), "zh".into()),
            AudioMode::Translated,
            "zh",
        ).await;

        harness.orchestrator.process_utterance(room_id, alice, speech_wav()).await;

        assert_eq!(harness.audio_recipients().await.iter().filter(|id| **id == alice).count(), 0);

        let carol_events = harness.events_for(carol).await;
        assert!(harness.transport.audio.lock().await.iter().any(|(id, a)| *id == carol && a == b"audio-en"));
        let carol_subtitle = subtitle_event(&carol_events).unwrap();
        assert_eq!(carol_subtitle.lang, "en");
        assert!(carol_subtitle.is_translated);

        let dan_events = harness.events_for(dan).await;
        assert!(harness.transport.audio.lock().await.iter().any(|(id, a)| *id == dan && a == b"audio-zh"));
        let dan_subtitle = subtitle_event(&dan_events).unwrap();
        assert_eq!(dan_subtitle.lang, "zh");
        assert!(dan_subtitle.is_translated);

        let alice_events = harness.events_for(alice).await;
        let alice_subtitle = subtitle_event(&alice_events).unwrap();
        assert_eq!(alice_subtitle.lang, "ja");
        assert!(!alice_subtitle.is_translated);
    }

    #[tokio::test]
    async fn translated_mode_speaker_gets_own_bucket_subtitle_but_no_audio_echo() {
        let room_id = ObjectId::new();
        let provider = FakeProvider::new("ja", "こんにちは");
        let harness = Harness::new(provider, 1200, 200);

        // Alice speaks in translated mode with a target language that
        // differs from what ASR detects, so she lands in her own
        // translation bucket for subtitles only (spec §4.7 step 8).
        let alice = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Alice".into(), "en".into()),
            AudioMode::Translated,
            "en",
        ).await;

        harness.orchestrator.process_utterance(room_id, alice, speech_wav()).await;

        assert!(
            harness.transport.audio.lock().await.iter().all(|(id, _)| *id != alice),
            "speaker must never receive their own synthesized audio back"
        );
        let alice_events = harness.events_for(alice).await;
        let alice_subtitle = subtitle_event(&alice_events).unwrap();
        assert_eq!(alice_subtitle.lang, "en");
        assert!(alice_subtitle.is_translated, "speaker's own-language subtitle comes from their translation bucket");
    }

    #[tokio::test]
    async fn detected_language_matching_target_reclassifies_listener_to_original_audio() {
        let room_id = ObjectId::new();
        // Alice's declared native language is "en" but she actually
        // speaks "ja" once ASR runs.
        let provider = FakeProvider::new("ja", "こんにちは");
        let harness = Harness::new(provider, 1200, 200);

        let alice = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Alice".into(), "en".into()),
            AudioMode::Original,
            "en",
        ).await;
        let eve = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Eve".into(), "ja".into()),
            AudioMode::Translated,
            "ja",
        ).await;

        harness.orchestrator.process_utterance(room_id, alice, speech_wav()).await;

        let recipients = harness.audio_recipients().await;
        assert!(recipients.contains(&eve), "reclassified listener must receive raw audio, not TTS");

        let eve_events = harness.events_for(eve).await;
        let eve_subtitle = subtitle_event(&eve_events).unwrap();
        assert_eq!(eve_subtitle.lang, "ja");
        assert!(!eve_subtitle.is_translated, "a reclassified listener sees the original subtitle, not a translated one");
    }

    #[tokio::test]
    async fn qos_severe_degradation_falls_back_to_subtitle_only() {
        let room_id = ObjectId::new();
        let provider = FakeProvider::new("ja", "こんにちは").with_delay("vi", Duration::from_millis(20));
        // A 1ms bound guarantees the simulated 20ms translation call is
        // classified severe without relying on real provider latency.
        let harness = Harness::new(provider, 1, 1);

        let alice = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Alice".into(), "ja".into()),
            AudioMode::Original,
            "ja",
        ).await;
        let eve = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Eve".into(), "vi".into()),
            AudioMode::Translated,
            "vi",
        ).await;

        harness.orchestrator.process_utterance(room_id, alice, speech_wav()).await;

        assert!(
            !harness.transport.audio.lock().await.iter().any(|(id, _)| *id == eve),
            "a severely degraded bucket must not deliver translated audio"
        );

        let eve_events = harness.events_for(eve).await;
        let subtitle = subtitle_event(&eve_events).expect("the subtitle is still delivered under QoS fallback");
        assert_eq!(subtitle.lang, "vi");
        assert!(eve_events
            .iter()
            .any(|e| matches!(e, OutboundEvent::QosWarning { lang, level } if lang == "vi" && *level == QosLevel::Severe)));
    }

    #[tokio::test]
    async fn session_boundary_opens_on_first_utterance_and_rotates_on_rejoin() {
        let room_id = ObjectId::new();
        let provider = FakeProvider::new("ja", "こんにちは");
        let harness = Harness::new(provider, 1200, 200);

        let alice = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Alice".into(), "ja".into()),
            AudioMode::Original,
            "ja",
        ).await;
        let bob = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Bob".into(), "ja".into()),
            AudioMode::Original,
            "ja",
        ).await;

        assert!(
            harness.sessions.find_active(&room_id).await.unwrap().is_none(),
            "no session should exist before the first utterance"
        );

        harness.orchestrator.process_utterance(room_id, alice, speech_wav()).await;

        let first_session = harness.sessions.find_active(&room_id).await.unwrap().expect("session opened on first utterance");
        assert!(first_session.is_active);
        let first_subtitle = harness.subtitles.rows.lock().await.last().cloned().expect("subtitle row written");
        assert_eq!(first_subtitle.session_id, first_session.id);

        harness.leave(room_id, alice).await;
        harness.leave(room_id, bob).await;

        let closed = harness
            .sessions
            .sessions
            .lock()
            .await
            .get(&room_id)
            .cloned()
            .expect("session row retained after close");
        assert!(!closed.is_active, "session must be closed once the room empties");
        assert!(
            harness.sessions.find_active(&room_id).await.unwrap().is_none(),
            "no active session once both participants left"
        );

        let alice2 = harness.join(
            room_id,
            Participant::new(ObjectId::new(), "Alice".into(), "ja".into()),
            AudioMode::Original,
            "ja",
        ).await;
        harness.orchestrator.process_utterance(room_id, alice2, speech_wav()).await;

        let second_session = harness.sessions.find_active(&room_id).await.unwrap().expect("a new session opens on rejoin");
        assert_ne!(second_session.id, first_session.id, "rejoin must allocate a new session id");
    }
}
