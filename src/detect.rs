use serde::{Deserialize, Serialize};

use crate::boundary::{DetectionStatus, SplitPlan, select_boundaries};
use crate::chapters::Chapter;
use crate::cluster::{BoundaryCandidate, Cluster};
use crate::config::SplitConfig;
use crate::duration::cluster_by_duration;
use crate::error::SplitError;
use crate::fingerprint::{FingerprintVector, cluster_by_fingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Recurring chapter lengths.
    Chapters,
    /// Recurring audio at chapter starts.
    Audio,
}

/// Everything a detection run produced, for operator review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub mode: DetectionMode,
    pub chapters: Vec<Chapter>,
    pub clusters: Vec<Cluster>,
    pub candidates: Vec<BoundaryCandidate>,
    pub plan: SplitPlan,
    #[serde(flatten)]
    pub status: DetectionStatus,
}

impl Detection {
    pub fn is_inconclusive(&self) -> bool {
        self.status.is_inconclusive()
    }
}

pub fn detect_by_chapter_length(
    chapters: &[Chapter],
    config: &SplitConfig,
) -> Result<Detection, SplitError> {
    let clustering = cluster_by_duration(chapters, config)?;
    let selection = select_boundaries(chapters, &clustering.candidates, config)?;
    Ok(Detection {
        mode: DetectionMode::Chapters,
        chapters: chapters.to_vec(),
        clusters: clustering.clusters,
        candidates: clustering.candidates,
        plan: selection.plan,
        status: selection.status,
    })
}

pub fn detect_by_audio(
    chapters: &[Chapter],
    fingerprints: &[Option<FingerprintVector>],
    config: &SplitConfig,
) -> Result<Detection, SplitError> {
    let clustering = cluster_by_fingerprint(chapters, fingerprints, config)?;
    let selection = select_boundaries(chapters, &clustering.candidates, config)?;
    Ok(Detection {
        mode: DetectionMode::Audio,
        chapters: chapters.to_vec(),
        clusters: clustering.clusters,
        candidates: clustering.candidates,
        plan: selection.plan,
        status: selection.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::InconclusiveReason;
    use crate::chapters::chapters_from_lengths;
    use std::time::Duration;

    #[test]
    fn chapter_mode_report_serializes_status_inline() -> anyhow::Result<()> {
        let chapters = chapters_from_lengths(&[
            Duration::from_secs(90),
            Duration::from_secs(1200),
            Duration::from_secs(90),
            Duration::from_secs(1250),
        ]);
        let detection = detect_by_chapter_length(&chapters, &SplitConfig::default())?;
        assert_eq!(detection.plan.len(), 2);
        assert!(!detection.is_inconclusive());

        let json = serde_json::to_value(&detection)?;
        assert_eq!(json["status"], "confident");
        assert_eq!(json["mode"], "chapters");
        assert_eq!(json["chapters"][1]["start"], "1m 30s");
        Ok(())
    }

    #[test]
    fn audio_mode_without_signal_is_inconclusive() -> anyhow::Result<()> {
        let chapters = chapters_from_lengths(&[Duration::from_secs(700); 3]);
        let detection = detect_by_audio(&chapters, &[None, None, None], &SplitConfig::default())?;
        assert_eq!(
            detection.status,
            DetectionStatus::Inconclusive {
                reason: InconclusiveReason::NoCandidates
            }
        );
        Ok(())
    }
}
