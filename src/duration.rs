//! Chapter-length clustering.
//!
//! Discs that carry one chapter per intro (or outro) repeat that chapter's
//! length once per episode, give or take encoder jitter. Grouping lengths
//! within a relative tolerance exposes those recurring chapters.

use std::time::Duration;

use crate::chapters::{Chapter, validate_chapters};
use crate::cluster::{BoundaryCandidate, CandidateSource, Cluster, ClusterRole, ClusterSignature};
use crate::config::{MarkerPosition, SplitConfig};
use crate::error::SplitError;

#[derive(Debug, Clone, PartialEq)]
pub struct DurationClustering {
    /// Every length group, ordered by first member.
    pub clusters: Vec<Cluster>,
    /// One candidate per chapter of every marker cluster, ordered by chapter.
    pub candidates: Vec<BoundaryCandidate>,
}

impl DurationClustering {
    pub fn markers(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter().filter(|cluster| cluster.is_marker())
    }
}

struct LengthGroup {
    members: Vec<usize>,
    mean: f64,
    variance: f64,
}

pub fn cluster_by_duration(
    chapters: &[Chapter],
    config: &SplitConfig,
) -> Result<DurationClustering, SplitError> {
    validate_chapters(chapters)?;
    config.validate()?;

    let total = chapters.len() as f64;
    let max_marker = config.max_marker_length.as_secs_f64();
    let min_marker = config.min_marker_length.as_secs_f64();

    let mut groups = group_by_length(chapters, config.tolerance_eps);
    groups.sort_by_key(|group| group.members[0]);

    let qualifies = |group: &LengthGroup| {
        group.members.len() >= 2
            && group.members.len() as f64 >= config.min_marker_fraction * total
            && group.mean < max_marker
            && group.mean >= min_marker
    };
    let mut is_marker: Vec<bool> = groups.iter().map(qualifies).collect();

    if let Some(expected) = config.expected_episodes {
        let fits = |count: usize| match config.marker_position {
            MarkerPosition::EpisodeEnd => count == expected,
            MarkerPosition::EpisodeStart => count == expected || count + 1 == expected,
        };
        let matching: Vec<bool> = groups
            .iter()
            .zip(&is_marker)
            .map(|(group, &marker)| marker && fits(group.members.len()))
            .collect();
        if matching.iter().any(|&m| m) {
            is_marker = matching;
        } else if is_marker.iter().any(|&m| m) {
            log::warn!(
                "No recurring chapter length implies {expected} episodes, keeping all marker groups"
            );
        }
    }

    let mut clusters = Vec::with_capacity(groups.len());
    let mut candidates = Vec::new();
    for (group, marker) in groups.into_iter().zip(is_marker) {
        let role = if marker {
            ClusterRole::Marker
        } else if group.mean >= max_marker {
            ClusterRole::Content
        } else {
            ClusterRole::Unknown
        };

        if marker {
            let confidence = 1.0 / (1.0 + group.variance);
            log::debug!(
                "Marker length {:.3}s at chapters {:?} (variance {:.4}, confidence {:.3})",
                group.mean,
                group.members,
                group.variance,
                confidence
            );
            candidates.extend(
                group
                    .members
                    .iter()
                    .map(|&index| BoundaryCandidate::new(index, confidence, CandidateSource::Duration)),
            );
        }

        clusters.push(Cluster::new(
            group.members,
            ClusterSignature::Duration(Duration::from_secs_f64(group.mean)),
            role,
        ));
    }
    candidates.sort_by_key(|candidate| candidate.chapter_index);

    if candidates.is_empty() {
        log::debug!("No chapter length recurs often enough to act as a marker");
    }

    Ok(DurationClustering {
        clusters,
        candidates,
    })
}

fn within_tolerance(a: f64, b: f64, eps: f64) -> bool {
    (b - a).abs() <= eps * a.max(b)
}

/// Single-linkage grouping over a sorted scan: neighbours in length order
/// join the same group when they are within tolerance of each other.
fn group_by_length(chapters: &[Chapter], eps: f64) -> Vec<LengthGroup> {
    let mut order: Vec<&Chapter> = chapters.iter().collect();
    order.sort_by(|a, b| a.length.cmp(&b.length).then(a.index.cmp(&b.index)));

    let mut runs: Vec<Vec<&Chapter>> = Vec::new();
    for chapter in order {
        let joins = runs
            .last()
            .and_then(|run| run.last())
            .is_some_and(|prev| {
                within_tolerance(prev.length.as_secs_f64(), chapter.length.as_secs_f64(), eps)
            });
        match runs.last_mut() {
            Some(run) if joins => run.push(chapter),
            _ => runs.push(vec![chapter]),
        }
    }

    runs.into_iter()
        .map(|run| {
            let lengths: Vec<f64> = run.iter().map(|c| c.length.as_secs_f64()).collect();
            let mean = lengths.iter().sum::<f64>() / lengths.len() as f64;
            let variance =
                lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / lengths.len() as f64;
            let mut members: Vec<usize> = run.iter().map(|c| c.index).collect();
            members.sort_unstable();
            LengthGroup {
                members,
                mean,
                variance,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::chapters_from_lengths;

    fn secs(values: &[f64]) -> Vec<Chapter> {
        chapters_from_lengths(
            &values
                .iter()
                .map(|&s| Duration::from_secs_f64(s))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn jitter_within_tolerance_is_absorbed() {
        let chapters = secs(&[90.0, 700.0, 640.0, 90.4, 710.0, 655.0, 89.8, 720.0, 600.0]);
        let result = cluster_by_duration(&chapters, &SplitConfig::default()).unwrap();

        let markers: Vec<_> = result.markers().collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].members(), &[0, 3, 6]);
        let indices: Vec<_> = result.candidates.iter().map(|c| c.chapter_index).collect();
        assert_eq!(indices, vec![0, 3, 6]);
        assert!(result.candidates.iter().all(|c| c.confidence < 1.0 && c.confidence > 0.8));
    }

    #[test]
    fn exact_lengths_with_zero_tolerance() {
        let chapters = secs(&[
            60.0, 301.0, 302.0, 60.0, 303.0, 304.0, 60.0, 305.0, 306.0, 307.0,
        ]);
        let config = SplitConfig {
            tolerance_eps: 0.0,
            ..Default::default()
        };
        let result = cluster_by_duration(&chapters, &config).unwrap();
        let markers: Vec<_> = result.markers().collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].len(), 3);
        assert!(result.candidates.iter().all(|c| c.confidence == 1.0));
    }

    #[test]
    fn long_ties_are_content_not_markers() {
        let chapters = secs(&[1300.0, 1300.0, 1300.0, 45.0]);
        let result = cluster_by_duration(&chapters, &SplitConfig::default()).unwrap();
        assert!(result.candidates.is_empty());
        assert_eq!(result.clusters[0].role(), ClusterRole::Content);
        assert_eq!(result.clusters[1].role(), ClusterRole::Unknown);
    }

    #[test]
    fn all_distinct_lengths_yield_nothing() {
        let chapters = secs(&[30.0, 60.0, 90.0, 120.0, 150.0]);
        let result = cluster_by_duration(&chapters, &SplitConfig::default()).unwrap();
        assert!(result.candidates.is_empty());
        assert!(result.clusters.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn expected_episodes_picks_matching_group() {
        // outro (30s) closes each of 3 episodes, a 60s recap appears twice
        let chapters = secs(&[
            700.0, 30.0, 60.0, 710.0, 30.0, 60.0, 720.0, 30.0,
        ]);
        let config = SplitConfig {
            min_marker_length: Duration::from_secs(5),
            expected_episodes: Some(3),
            marker_position: MarkerPosition::EpisodeEnd,
            ..Default::default()
        };
        let result = cluster_by_duration(&chapters, &config).unwrap();
        let indices: Vec<_> = result.candidates.iter().map(|c| c.chapter_index).collect();
        assert_eq!(indices, vec![1, 4, 7]);
    }

    #[test]
    fn expected_episodes_accepts_intros_missing_from_the_first_episode() {
        // 30s intro opens episodes 2 and 3 only, 60s recap chapters occur four times
        let chapters = secs(&[700.0, 30.0, 710.0, 60.0, 60.0, 30.0, 720.0, 60.0, 60.0]);
        let config = SplitConfig {
            min_marker_length: Duration::from_secs(5),
            expected_episodes: Some(3),
            marker_position: MarkerPosition::EpisodeStart,
            ..Default::default()
        };
        let result = cluster_by_duration(&chapters, &config).unwrap();
        let indices: Vec<_> = result.candidates.iter().map(|c| c.chapter_index).collect();
        assert_eq!(indices, vec![1, 5]);
        let markers: Vec<_> = result.markers().collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].members(), &[1, 5]);
    }

    #[test]
    fn single_chapter_is_an_input_error() {
        let chapters = secs(&[100.0]);
        assert_eq!(
            cluster_by_duration(&chapters, &SplitConfig::default()),
            Err(SplitError::TooFewChapters(1))
        );
    }
}
