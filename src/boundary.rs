use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chapters::{Chapter, span_length, validate_chapters};
use crate::cluster::BoundaryCandidate;
use crate::config::{MarkerPosition, SplitConfig};
use crate::error::SplitError;

/// Inclusive chapter range of one episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRange {
    pub start_chapter: usize,
    pub end_chapter: usize,
}

impl EpisodeRange {
    pub fn chapter_count(&self) -> usize {
        self.end_chapter - self.start_chapter + 1
    }

    pub fn contains(&self, chapter: usize) -> bool {
        (self.start_chapter..=self.end_chapter).contains(&chapter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedEpisode {
    pub range: EpisodeRange,
    #[serde(with = "humantime_serde")]
    pub start: Duration,
    #[serde(with = "humantime_serde")]
    pub length: Duration,
    /// Mean confidence of the boundaries delimiting this episode.
    pub confidence: f64,
}

/// Ordered episodes covering every chapter exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPlan {
    episodes: Vec<PlannedEpisode>,
}

impl SplitPlan {
    pub fn episodes(&self) -> &[PlannedEpisode] {
        &self.episodes
    }

    pub fn ranges(&self) -> impl Iterator<Item = EpisodeRange> + '_ {
        self.episodes.iter().map(|episode| episode.range)
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Weakest episode confidence.
    pub fn confidence(&self) -> f64 {
        self.episodes
            .iter()
            .map(|episode| episode.confidence)
            .fold(f64::INFINITY, f64::min)
            .min(1.0)
            .max(0.0)
    }

    /// Chapters that mark each episode under `position`: the first chapter of
    /// every range for `EpisodeStart`, the last one for `EpisodeEnd`.
    pub fn boundary_chapters(&self, position: MarkerPosition) -> Vec<usize> {
        self.ranges()
            .map(|range| match position {
                MarkerPosition::EpisodeStart => range.start_chapter,
                MarkerPosition::EpisodeEnd => range.end_chapter,
            })
            .collect()
    }

    /// True when the ranges are contiguous, ascending, and cover `0..chapter_count`.
    pub fn covers(&self, chapter_count: usize) -> bool {
        let mut next = 0;
        for range in self.ranges() {
            if range.start_chapter != next || range.end_chapter < range.start_chapter {
                return false;
            }
            next = range.end_chapter + 1;
        }
        next == chapter_count && chapter_count > 0
    }

    /// Value for mkvmerge's `--split chapters:` option, which takes the 1-based
    /// numbers of the chapters each new file starts at. `None` for one episode.
    pub fn mkvmerge_split_chapters(&self) -> Option<String> {
        if self.episodes.len() < 2 {
            return None;
        }
        let numbers: Vec<String> = self
            .ranges()
            .skip(1)
            .map(|range| (range.start_chapter + 1).to_string())
            .collect();
        Some(format!("chapters:{}", numbers.join(",")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconclusiveReason {
    NoCandidates,
    AllCandidatesFiltered,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectionStatus {
    Confident,
    /// A plan exists but its weakest episode is below the display threshold.
    LowConfidence { confidence: f64, threshold: f64 },
    /// The plan is a single episode spanning the whole input.
    Inconclusive { reason: InconclusiveReason },
}

impl DetectionStatus {
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, DetectionStatus::Inconclusive { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub plan: SplitPlan,
    pub status: DetectionStatus,
}

/// Position at which a new episode begins.
#[derive(Debug, Clone, Copy)]
struct Cut {
    at: usize,
    confidence: f64,
}

/// Turns boundary candidates from either clusterer into a split plan.
///
/// Never fails on weak evidence: without a usable boundary the plan is one
/// episode spanning the input and the status is `Inconclusive`.
pub fn select_boundaries(
    chapters: &[Chapter],
    candidates: &[BoundaryCandidate],
    config: &SplitConfig,
) -> Result<Selection, SplitError> {
    validate_chapters(chapters)?;
    config.validate()?;
    let n = chapters.len();
    if let Some(bad) = candidates.iter().find(|c| c.chapter_index >= n) {
        return Err(SplitError::CandidateOutOfRange {
            index: bad.chapter_index,
            count: n,
        });
    }

    // fields are public, so re-apply the [0, 1] clamp from `BoundaryCandidate::new`
    let mut sorted: Vec<BoundaryCandidate> = candidates
        .iter()
        .map(|c| BoundaryCandidate::new(c.chapter_index, c.confidence, c.source))
        .collect();
    sorted.sort_by_key(|c| c.chapter_index);
    sorted.dedup_by(|later, kept| {
        if later.chapter_index != kept.chapter_index {
            return false;
        }
        if later.confidence > kept.confidence {
            kept.confidence = later.confidence;
        }
        true
    });

    // Cuts at 0 or n coincide with the input edges and only feed confidence.
    let mut leading = Vec::new();
    let mut trailing = Vec::new();
    let mut cuts = Vec::new();
    for candidate in &sorted {
        let at = match config.marker_position {
            MarkerPosition::EpisodeStart => candidate.chapter_index,
            MarkerPosition::EpisodeEnd => candidate.chapter_index + 1,
        };
        if at == 0 {
            leading.push(candidate.confidence);
        } else if at >= n {
            trailing.push(candidate.confidence);
        } else {
            cuts.push(Cut {
                at,
                confidence: candidate.confidence,
            });
        }
    }

    let min_length = config.min_episode_length;
    let mut accepted: Vec<Cut> = Vec::with_capacity(cuts.len());
    for cut in cuts {
        let previous = accepted.last().map_or(0, |c| c.at);
        if span_length(chapters, previous, cut.at - 1) >= min_length {
            accepted.push(cut);
            continue;
        }
        match accepted.last_mut() {
            Some(last) if cut.at - last.at <= 1 && cut.confidence > last.confidence => {
                log::debug!(
                    "Boundary at chapter {} replaces {} (confidence {:.3} > {:.3})",
                    cut.at,
                    last.at,
                    cut.confidence,
                    last.confidence
                );
                *last = cut;
            }
            _ => log::debug!(
                "Dropping boundary at chapter {}: episode from chapter {} would be shorter than {:?}",
                cut.at,
                previous,
                min_length
            ),
        }
    }
    while let Some(last) = accepted.last() {
        if span_length(chapters, last.at, n - 1) >= min_length {
            break;
        }
        log::debug!(
            "Dropping boundary at chapter {}: final episode would be shorter than {:?}",
            last.at,
            min_length
        );
        accepted.pop();
    }

    if accepted.is_empty() {
        let reason = if candidates.is_empty() {
            InconclusiveReason::NoCandidates
        } else {
            InconclusiveReason::AllCandidatesFiltered
        };
        log::info!("No usable episode boundary ({reason:?}), returning a single-episode plan");
        let whole = EpisodeRange {
            start_chapter: 0,
            end_chapter: n - 1,
        };
        return Ok(Selection {
            plan: SplitPlan {
                episodes: vec![planned(chapters, whole, &[])],
            },
            status: DetectionStatus::Inconclusive { reason },
        });
    }

    let mut edges = Vec::with_capacity(accepted.len() + 2);
    edges.push(0);
    edges.extend(accepted.iter().map(|c| c.at));
    edges.push(n);

    let last = edges.len() - 2;
    let episodes = edges
        .windows(2)
        .enumerate()
        .map(|(k, pair)| {
            let range = EpisodeRange {
                start_chapter: pair[0],
                end_chapter: pair[1] - 1,
            };
            let mut bounding = Vec::new();
            if k == 0 {
                bounding.extend_from_slice(&leading);
            } else {
                bounding.push(accepted[k - 1].confidence);
            }
            if k == last {
                bounding.extend_from_slice(&trailing);
            } else {
                bounding.push(accepted[k].confidence);
            }
            planned(chapters, range, &bounding)
        })
        .collect();

    let plan = SplitPlan { episodes };
    let confidence = plan.confidence();
    let status = if confidence < config.display_confidence_threshold {
        log::warn!(
            "Split plan confidence {confidence:.3} is below {:.3}, review before exporting",
            config.display_confidence_threshold
        );
        DetectionStatus::LowConfidence {
            confidence,
            threshold: config.display_confidence_threshold,
        }
    } else {
        DetectionStatus::Confident
    };

    Ok(Selection { plan, status })
}

fn planned(chapters: &[Chapter], range: EpisodeRange, bounding: &[f64]) -> PlannedEpisode {
    let confidence = if bounding.is_empty() {
        0.0
    } else {
        bounding.iter().sum::<f64>() / bounding.len() as f64
    };
    PlannedEpisode {
        range,
        start: chapters[range.start_chapter].start,
        length: span_length(chapters, range.start_chapter, range.end_chapter),
        confidence,
    }
}
