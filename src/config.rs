use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::SplitError;

/// Pairwise similarity used to link chapter fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMeasure {
    #[default]
    Cosine,
    /// Normalized cross-correlation at zero lag.
    Ncc,
}

/// Whether a marker chapter (intro or outro) sits at the beginning of the
/// episode it belongs to or at its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarkerPosition {
    /// The marker opens an episode: the episode starts at the marker chapter.
    #[default]
    EpisodeStart,
    /// The marker closes an episode: the episode ends at the marker chapter.
    EpisodeEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintOptions {
    /// Audio analysed from the start of each chapter.
    #[serde(with = "humantime_serde")]
    pub segment_length: Duration,
    pub silence_rms: f32,
    pub bands: usize,
    pub fft_bins: usize,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            segment_length: Duration::from_secs(10),
            silence_rms: 0.005,
            bands: 32,
            fft_bins: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub mkvextract: PathBuf,
    pub mkvmerge: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            mkvextract: PathBuf::from("mkvextract"),
            mkvmerge: PathBuf::from("mkvmerge"),
        }
    }
}

/// Every tunable of a detection run. Passed explicitly to each core function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Relative duration tolerance used when grouping chapters by length.
    pub tolerance_eps: f64,
    #[serde(with = "humantime_serde")]
    pub min_marker_length: Duration,
    #[serde(with = "humantime_serde")]
    pub max_marker_length: Duration,
    /// Minimum share of all chapters a duration cluster must cover.
    pub min_marker_fraction: f64,
    pub expected_episodes: Option<usize>,

    pub similarity: SimilarityMeasure,
    pub similarity_threshold: f64,
    pub confirmation_threshold: f64,

    #[serde(with = "humantime_serde")]
    pub min_episode_length: Duration,
    pub marker_position: MarkerPosition,
    pub display_confidence_threshold: f64,

    pub fingerprint: FingerprintOptions,
    pub tools: ToolPaths,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            tolerance_eps: 0.02,
            min_marker_length: Duration::from_secs(10),
            max_marker_length: Duration::from_secs(3 * 60),
            min_marker_fraction: 0.15,
            expected_episodes: None,
            similarity: SimilarityMeasure::Cosine,
            similarity_threshold: 0.995,
            confirmation_threshold: 0.9995,
            min_episode_length: Duration::from_secs(10 * 60),
            marker_position: MarkerPosition::EpisodeStart,
            display_confidence_threshold: 0.5,
            fingerprint: FingerprintOptions::default(),
            tools: ToolPaths::default(),
        }
    }
}

impl SplitConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config {}", path.as_ref().display()))?;
        let config: SplitConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.as_ref().display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SplitError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(SplitError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {v}"
                )))
            }
        };
        unit("tolerance_eps", self.tolerance_eps)?;
        unit("min_marker_fraction", self.min_marker_fraction)?;
        unit("display_confidence_threshold", self.display_confidence_threshold)?;

        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(SplitError::InvalidConfig(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.confirmation_threshold <= self.similarity_threshold
            || self.confirmation_threshold > 1.0
        {
            return Err(SplitError::InvalidConfig(format!(
                "confirmation_threshold ({}) must be above similarity_threshold ({}) and at most 1",
                self.confirmation_threshold, self.similarity_threshold
            )));
        }
        if self.min_marker_length > self.max_marker_length {
            return Err(SplitError::InvalidConfig(
                "min_marker_length exceeds max_marker_length".to_owned(),
            ));
        }
        if self.expected_episodes == Some(0) {
            return Err(SplitError::InvalidConfig(
                "expected_episodes must be positive".to_owned(),
            ));
        }
        if self.fingerprint.bands == 0 || self.fingerprint.fft_bins == 0 {
            return Err(SplitError::InvalidConfig(
                "fingerprint bands and fft_bins must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}
