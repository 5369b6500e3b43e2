//! Minimal WAV (RIFF/PCM) codec. Clients send each VAD-segmented
//! utterance as a WAV blob; providers that accept raw audio bytes
//! (rather than a pre-decoded PCM buffer) need one back out.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WavError {
    #[error("not a RIFF/WAVE file")]
    NotRiff,
    #[error("missing fmt chunk")]
    MissingFmt,
    #[error("missing data chunk")]
    MissingData,
    #[error("unsupported bits-per-sample: {0}")]
    UnsupportedBitsPerSample(u16),
    #[error("truncated chunk")]
    Truncated,
}

pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub pcm_s16le: Vec<i16>,
}

/// Walks RIFF chunks to find `fmt ` and `data`, then converts the PCM
/// payload into mono i16 samples (averaging down from stereo by
/// taking every other sample pair, matching how client audio capture
/// already downmixes before segmenting).
pub fn decode_wav(bytes: &[u8]) -> Result<WavInfo, WavError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotRiff);
    }

    let mut pos = 12usize;
    let mut sample_rate = 0u32;
    let mut channels = 0u16;
    let mut bits_per_sample = 0u16;
    let mut data: Option<&[u8]> = None;

    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body_start = pos + 8;
        let body_end = body_start.checked_add(chunk_size).ok_or(WavError::Truncated)?;
        if body_end > bytes.len() {
            return Err(WavError::Truncated);
        }
        let body = &bytes[body_start..body_end];

        match chunk_id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(WavError::Truncated);
                }
                channels = u16::from_le_bytes(body[2..4].try_into().unwrap());
                sample_rate = u32::from_le_bytes(body[4..8].try_into().unwrap());
                bits_per_sample = u16::from_le_bytes(body[14..16].try_into().unwrap());
            }
            b"data" => {
                data = Some(body);
            }
            _ => {}
        }

        // Chunks are word-aligned: an odd-sized chunk is followed by a
        // padding byte.
        pos = body_end + (chunk_size % 2);
    }

    if sample_rate == 0 || channels == 0 {
        return Err(WavError::MissingFmt);
    }
    let data = data.ok_or(WavError::MissingData)?;
    if bits_per_sample != 16 {
        return Err(WavError::UnsupportedBitsPerSample(bits_per_sample));
    }

    let samples: Vec<i16> = data
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    let mono = if channels == 1 {
        samples
    } else {
        samples
            .chunks_exact(channels as usize)
            .map(|frame| frame[0])
            .collect()
    };

    Ok(WavInfo {
        sample_rate,
        channels: 1,
        bits_per_sample: 16,
        pcm_s16le: mono,
    })
}

/// Encodes mono PCM16 samples into a minimal 44-byte-header WAV file.
pub fn encode_pcm16_wav(pcm: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * 2;
    let block_align: u16 = 2;

    let mut out = Vec::with_capacity(44 + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());
    for sample in pcm {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mono_pcm() {
        let samples: Vec<i16> = (0..1000).map(|i| (i % 100) as i16 * 100).collect();
        let wav = encode_pcm16_wav(&samples, 16000);
        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.pcm_s16le, samples);
    }

    #[test]
    fn downmixes_stereo_by_taking_left_channel() {
        let mut stereo_bytes = Vec::new();
        let left: Vec<i16> = vec![100, 200, 300];
        for &l in &left {
            stereo_bytes.extend_from_slice(&l.to_le_bytes());
            stereo_bytes.extend_from_slice(&(-l).to_le_bytes());
        }
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&((36 + stereo_bytes.len()) as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes()); // stereo
        wav.extend_from_slice(&16000u32.to_le_bytes());
        wav.extend_from_slice(&64000u32.to_le_bytes());
        wav.extend_from_slice(&4u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(stereo_bytes.len() as u32).to_le_bytes());
        wav.extend_from_slice(&stereo_bytes);

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.pcm_s16le, left);
    }
}
