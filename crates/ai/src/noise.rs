//! Hallucination/noise filtering for ASR output. Speech providers
//! reliably hallucinate a small, recurring set of phrases when fed
//! silence or near-silence (confirmations, filler words, and — for
//! providers trained on scraped video captions — platform boilerplate
//! like "subscribe" nags). None of these should ever become a
//! subtitle.

/// Exact-match noise phrases (case-insensitive, punctuation-stripped).
/// Short confirmations and filler words a provider emits on silence.
const NOISE_PATTERNS_EXACT: &[&str] = &[
    "bye", "by", "uh", "um", "uh huh", "mhm", "hmm", "ok", "okay", "yeah", "yes", "no",
    "thank you", "thanks", "you", "the", "a", "i", "...", "..", ".",
    "はい", "うん", "ええ", "あの", "えっと",
    "嗯", "好的", "是的", "谢谢",
    "vâng", "dạ",
];

/// Substring matches for platform boilerplate that shows up when a
/// model was trained on scraped video captions rather than live
/// speech.
const MEDIA_NOISE_KEYWORDS: &[&str] = &[
    "amara.org",
    "subtitles by",
    "like and subscribe",
    "please subscribe",
    "don't forget to subscribe",
    "thanks for watching",
    "see you next time",
    "字幕",
    "訂閱",
    "订阅",
    "チャンネル登録",
    "高評価",
    "よろしくお願いします",
];

fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Mirrors the original pipeline's layered heuristic: reject very
/// short transcripts outright, then exact-match against the noise
/// list, then look for degenerate repeated-character output, then
/// scan for media-platform boilerplate.
pub fn is_noise_transcription(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() <= 3 {
        return true;
    }

    let normalized = normalize(trimmed);
    if normalized.is_empty() {
        return true;
    }
    if NOISE_PATTERNS_EXACT.contains(&normalized.as_str()) {
        return true;
    }

    let distinct_chars: std::collections::HashSet<char> =
        normalized.chars().filter(|c| !c.is_whitespace()).collect();
    if !distinct_chars.is_empty() && distinct_chars.len() <= 2 && normalized.chars().count() >= 4 {
        return true;
    }

    let lowered = trimmed.to_lowercase();
    MEDIA_NOISE_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_strings() {
        assert!(is_noise_transcription("ok"));
        assert!(is_noise_transcription("uh"));
        assert!(is_noise_transcription(""));
    }

    #[test]
    fn rejects_exact_noise_phrases() {
        assert!(is_noise_transcription("Thank you."));
        assert!(is_noise_transcription("はい"));
    }

    #[test]
    fn rejects_repeated_character_runs() {
        assert!(is_noise_transcription("aaaaaaaa"));
    }

    #[test]
    fn rejects_media_boilerplate() {
        assert!(is_noise_transcription("Don't forget to like and subscribe!"));
        assert!(is_noise_transcription("字幕は amara.org のコミュニティによって提供されました"));
    }

    #[test]
    fn accepts_real_speech() {
        assert!(!is_noise_transcription("Let's move the meeting to three o'clock tomorrow."));
        assert!(!is_noise_transcription("今日の会議はこれで終わりにしましょう"));
    }
}
