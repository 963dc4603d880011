use anyhow::{Context, Result};
use std::{fs::File, io::Write, path::Path};

use sonogram::{FrequencyScale, SpecOptionsBuilder};

use crate::chapters::Chapter;
use crate::config::FingerprintOptions;
use crate::fingerprint::FingerprintVector;
use crate::sound::MonoAudio;

/// Time columns the spectrogram is resampled to before averaging.
const SPECTROGRAM_COLUMNS: usize = 64;

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

/// Spectral fingerprint of one segment: the spectrogram resampled to
/// `opts.bands` frequency rows, each row averaged over time, then centred on
/// its own mean. The buffer is in dB, so centring removes overall loudness
/// and leaves the spectral shape for cosine similarity to compare.
pub fn fingerprint_segment(
    samples: &[f32],
    sample_rate: u32,
    opts: &FingerprintOptions,
) -> Result<FingerprintVector> {
    let mut spectrobuilder = SpecOptionsBuilder::new(opts.fft_bins)
        .load_data_from_memory_f32(samples.to_vec(), sample_rate)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to set up spectrogram: {e:?}"))?;
    let spectrogram = spectrobuilder.compute();

    let buffer = spectrogram.to_buffer(FrequencyScale::Log, SPECTROGRAM_COLUMNS, opts.bands);
    let mut bands: Vec<f32> = buffer
        .chunks(SPECTROGRAM_COLUMNS)
        .take(opts.bands)
        .map(|row| {
            let finite: Vec<f32> = row.iter().copied().filter(|v| v.is_finite()).collect();
            if finite.is_empty() {
                f32::NAN
            } else {
                finite.iter().sum::<f32>() / finite.len() as f32
            }
        })
        .collect();

    // bands with no finite energy sit at the quietest observed level
    let floor = bands
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::INFINITY, f32::min);
    let floor = if floor.is_finite() { floor } else { 0.0 };
    for band in bands.iter_mut().filter(|v| !v.is_finite()) {
        *band = floor;
    }

    let mean = bands.iter().sum::<f32>() / bands.len().max(1) as f32;
    for band in &mut bands {
        *band -= mean;
    }

    Ok(FingerprintVector::new(bands))
}

/// Fingerprints the first `opts.segment_length` of every chapter, one worker
/// thread per chapter. Chapters shorter than the segment, whose window runs
/// past the end of the decoded audio, or that open quieter than
/// `opts.silence_rms` get `None`.
pub fn extract_fingerprints(
    audio: &MonoAudio,
    chapters: &[Chapter],
    opts: &FingerprintOptions,
) -> Result<Vec<Option<FingerprintVector>>> {
    log::info!(
        "Fingerprinting the first {:?} of {} chapters",
        opts.segment_length,
        chapters.len()
    );

    std::thread::scope(|scope| {
        let handles: Vec<_> = chapters
            .iter()
            .map(|chapter| {
                scope.spawn(move || -> Result<Option<FingerprintVector>> {
                    if chapter.length < opts.segment_length {
                        log::debug!(
                            "Chapter {} is shorter than the {:?} fingerprint segment",
                            chapter.index,
                            opts.segment_length
                        );
                        return Ok(None);
                    }
                    let Some(window) = audio.window(chapter.start, opts.segment_length) else {
                        log::debug!(
                            "Chapter {} runs past the end of the decoded audio",
                            chapter.index
                        );
                        return Ok(None);
                    };
                    if rms(window) < opts.silence_rms {
                        log::debug!("Chapter {} opens with silence", chapter.index);
                        return Ok(None);
                    }
                    fingerprint_segment(window, audio.sample_rate, opts)
                        .with_context(|| format!("Chapter {}", chapter.index))
                        .map(Some)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("Fingerprint worker panicked"))?
            })
            .collect::<Result<Vec<_>>>()
    })
}

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();
const FINGERPRINT_CACHE_VERSION: u8 = 1;

pub fn save_fingerprints(
    fingerprints: &[Option<FingerprintVector>],
    path: impl AsRef<Path>,
) -> Result<()> {
    let raw: Vec<Option<Vec<f32>>> = fingerprints
        .iter()
        .map(|fp| fp.as_ref().map(|fp| fp.as_slice().to_vec()))
        .collect();
    let bytes = bincode::encode_to_vec((FINGERPRINT_CACHE_VERSION, raw), BINCODE_CONFIG)?;

    if path.as_ref().exists() {
        log::info!("Overwriting fingerprint cache {}", path.as_ref().display());
    }
    let mut file = File::create(path.as_ref())
        .with_context(|| format!("Failed to create file at {}", path.as_ref().display()))?;
    file.write_all(&bytes)?;

    Ok(())
}

pub fn load_fingerprints(path: impl AsRef<Path>) -> Result<Vec<Option<FingerprintVector>>> {
    let bytes = std::fs::read(&path)
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let (version, raw): (u8, Vec<Option<Vec<f32>>>) =
        bincode::decode_from_slice(&bytes, BINCODE_CONFIG).map(|(v, _)| v)?;
    if version != FINGERPRINT_CACHE_VERSION {
        anyhow::bail!(
            "Fingerprint cache {} has version {version}, expected {FINGERPRINT_CACHE_VERSION}",
            path.as_ref().display()
        );
    }

    Ok(raw.into_iter().map(|fp| fp.map(FingerprintVector::new)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::chapters_from_lengths;
    use std::time::Duration;

    fn tone(freq: f32, rate: u32, secs: f32) -> Vec<f32> {
        let n = (rate as f32 * secs) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn rms_of_silence_and_tone() {
        assert_eq!(rms(&[0.0; 64]), 0.0);
        let r = rms(&tone(440.0, 8000, 1.0));
        assert!((r - 0.5 / 2f32.sqrt()).abs() < 1e-2);
    }

    #[test]
    fn silent_and_truncated_chapters_have_no_fingerprint() -> Result<()> {
        let rate = 8000;
        let mut samples = tone(440.0, rate, 2.0);
        samples.extend(vec![0.0; 2 * rate as usize]);
        samples.extend(tone(440.0, rate, 1.0));
        let audio = MonoAudio {
            samples,
            sample_rate: rate,
        };
        let chapters = chapters_from_lengths(&[Duration::from_secs(2); 3]);
        let opts = FingerprintOptions {
            segment_length: Duration::from_millis(1500),
            fft_bins: 256,
            bands: 8,
            ..Default::default()
        };

        let fingerprints = extract_fingerprints(&audio, &chapters, &opts)?;
        assert_eq!(fingerprints.len(), 3);
        assert_eq!(fingerprints[0].as_ref().map(|fp| fp.dimension()), Some(8));
        assert!(fingerprints[1].is_none());
        assert!(fingerprints[2].is_none());
        Ok(())
    }

    #[test]
    fn chapters_shorter_than_the_segment_are_skipped() -> Result<()> {
        let rate = 8000;
        let audio = MonoAudio {
            samples: tone(440.0, rate, 4.0),
            sample_rate: rate,
        };
        let chapters = chapters_from_lengths(&[Duration::from_secs(1), Duration::from_secs(3)]);
        let opts = FingerprintOptions {
            segment_length: Duration::from_millis(1500),
            fft_bins: 256,
            bands: 8,
            ..Default::default()
        };

        let fingerprints = extract_fingerprints(&audio, &chapters, &opts)?;
        assert!(fingerprints[0].is_none());
        assert!(fingerprints[1].is_some());
        Ok(())
    }

    /// Deterministic white noise in `[-amplitude, amplitude]`.
    fn noise(seed: u64, amplitude: f32, len: usize) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
                amplitude * (2.0 * unit - 1.0)
            })
            .collect()
    }

    fn mix(a: &[f32], b: &[f32]) -> Vec<f32> {
        a.iter().zip(b).map(|(x, y)| x + y).collect()
    }

    #[test]
    fn fingerprints_separate_content_and_match_repeats() -> Result<()> {
        use crate::config::{SimilarityMeasure, SplitConfig};
        use crate::fingerprint::similarity;

        let rate = 8000;
        let secs = 4.0;
        let len = (rate as f32 * secs) as usize;
        let opts = FingerprintOptions::default();
        let config = SplitConfig::default();

        let intro = mix(&tone(440.0, rate, secs), &noise(7, 0.05, len));
        let louder_intro: Vec<f32> = intro.iter().map(|s| s * 0.8).collect();
        let other = mix(&tone(3000.0, rate, secs), &noise(11, 0.05, len));

        let a = fingerprint_segment(&intro, rate, &opts)?;
        let b = fingerprint_segment(&louder_intro, rate, &opts)?;
        let c = fingerprint_segment(&other, rate, &opts)?;

        // centred: no common offset left in the vector
        let mean: f32 = a.as_slice().iter().sum::<f32>() / a.dimension() as f32;
        assert!(mean.abs() < 1e-3);

        let repeat = similarity(SimilarityMeasure::Cosine, &a, &b);
        let distinct = similarity(SimilarityMeasure::Cosine, &a, &c);
        assert!(repeat > config.confirmation_threshold, "repeat scored {repeat}");
        assert!(distinct < config.similarity_threshold, "distinct scored {distinct}");
        Ok(())
    }

    #[test]
    fn cache_preserves_fingerprints() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("disc.fp");
        let fingerprints = vec![Some(FingerprintVector::new(vec![0.25, 1.5])), None];
        save_fingerprints(&fingerprints, &path)?;
        assert_eq!(load_fingerprints(&path)?, fingerprints);
        Ok(())
    }
}
