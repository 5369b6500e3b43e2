//! Voice activity gate: decides whether a captured audio clip is
//! worth sending to transcription at all. Two stages, cheapest first.
//!
//! 1. RMS energy: near-silent clips (room tone, line hiss) never make
//!    it past this and cost nothing more than a sum-of-squares pass.
//! 2. Framed VAD: clips that pass the energy check are split into
//!    20ms frames and classified; a clip needs enough voiced frames
//!    to count as speech, not just one loud click.

use std::sync::Once;

use webrtc_vad::{SampleRate, Vad, VadMode};

/// Below this RMS amplitude (16-bit PCM scale) a clip is treated as
/// silence without running the framed classifier at all.
pub const MIN_ENERGY_THRESHOLD: f64 = 500.0;

/// A clip needs at least this fraction of its 20ms frames classified
/// as voiced to count as speech.
pub const MIN_SPEECH_RATIO: f64 = 0.1;

const FRAME_MS: u32 = 20;

static VAD_UNAVAILABLE_WARNED: Once = Once::new();

/// Root-mean-square energy of a PCM16 buffer.
pub fn audio_energy(pcm: &[i16]) -> f64 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = pcm.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / pcm.len() as f64).sqrt()
}

fn frame_len(sample_rate: u32) -> usize {
    (sample_rate as usize * FRAME_MS as usize) / 1000
}

fn supported_sample_rate(sample_rate: u32) -> Option<SampleRate> {
    match sample_rate {
        8000 => Some(SampleRate::Rate8kHz),
        16000 => Some(SampleRate::Rate16kHz),
        32000 => Some(SampleRate::Rate32kHz),
        48000 => Some(SampleRate::Rate48kHz),
        _ => None,
    }
}

/// Classifies a mono PCM16 buffer into a voiced-frame ratio. Frames
/// that don't divide evenly are dropped from the denominator, matching
/// the original's "ignore the trailing partial frame" behavior.
///
/// Returns `None` if the sample rate isn't one the VAD backend
/// supports, so the caller can fall back to energy-only detection
/// rather than silently misclassifying everything as speech.
pub fn voiced_frame_ratio(pcm: &[i16], sample_rate: u32) -> Option<f64> {
    let rate = supported_sample_rate(sample_rate)?;
    let mut vad = Vad::new_with_rate_and_mode(rate, VadMode::Aggressive);

    let len = frame_len(sample_rate);
    if len == 0 || pcm.len() < len {
        return Some(0.0);
    }

    let mut total = 0usize;
    let mut voiced = 0usize;
    for frame in pcm.chunks_exact(len) {
        total += 1;
        match vad.is_voice_segment(frame) {
            Ok(true) => voiced += 1,
            Ok(false) => {}
            Err(_) => {
                // Malformed frame for this backend; treat as unsupported
                // rather than guessing.
                return None;
            }
        }
    }
    if total == 0 {
        Some(0.0)
    } else {
        Some(voiced as f64 / total as f64)
    }
}

/// The two-stage speech gate described above. `sample_rate` must be
/// the rate of `pcm`; clips are expected to already be mono.
pub fn has_speech(pcm: &[i16], sample_rate: u32) -> bool {
    if audio_energy(pcm) < MIN_ENERGY_THRESHOLD {
        return false;
    }

    match voiced_frame_ratio(pcm, sample_rate) {
        Some(ratio) => ratio >= MIN_SPEECH_RATIO,
        None => {
            VAD_UNAVAILABLE_WARNED.call_once(|| {
                tracing::warn!(
                    sample_rate,
                    "VAD backend does not support this sample rate; falling back to energy-only detection"
                );
            });
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(n: usize) -> Vec<i16> {
        vec![0; n]
    }

    fn loud_tone(n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| ((i as f64 * 0.3).sin() * 20000.0) as i16)
            .collect()
    }

    #[test]
    fn silence_has_no_speech() {
        assert!(!has_speech(&silence(16000), 16000));
    }

    #[test]
    fn energy_threshold_gates_before_frame_analysis() {
        assert_eq!(audio_energy(&silence(100)), 0.0);
        assert!(audio_energy(&loud_tone(100)) > MIN_ENERGY_THRESHOLD);
    }

    #[test]
    fn unsupported_rate_falls_back_to_energy_pass() {
        assert!(has_speech(&loud_tone(16000), 22050));
    }
}
