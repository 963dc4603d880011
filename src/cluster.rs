use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fingerprint::FingerprintVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    /// Recurring non-episode material such as an intro or outro.
    Marker,
    /// Episode body material.
    Content,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSignature {
    Duration(#[serde(with = "humantime_serde")] Duration),
    Centroid(FingerprintVector),
}

/// A group of chapters produced by one of the clusterers. Read-only after
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    members: Vec<usize>,
    signature: ClusterSignature,
    role: ClusterRole,
}

impl Cluster {
    pub(crate) fn new(mut members: Vec<usize>, signature: ClusterSignature, role: ClusterRole) -> Self {
        members.sort_unstable();
        members.dedup();
        Self {
            members,
            signature,
            role,
        }
    }

    /// Chapter indices, ascending.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, chapter: usize) -> bool {
        self.members.binary_search(&chapter).is_ok()
    }

    pub fn signature(&self) -> &ClusterSignature {
        &self.signature
    }

    pub fn role(&self) -> ClusterRole {
        self.role
    }

    pub fn is_marker(&self) -> bool {
        self.role == ClusterRole::Marker
    }

    /// Number of separate occurrences: a run of adjacent member chapters
    /// counts once.
    pub fn recurrences(&self) -> usize {
        self.members
            .windows(2)
            .filter(|pair| pair[1] > pair[0] + 1)
            .count()
            + usize::from(!self.members.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Duration,
    Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryCandidate {
    pub chapter_index: usize,
    /// Clamped to `[0, 1]` by [`BoundaryCandidate::new`] and again by
    /// [`crate::boundary::select_boundaries`].
    pub confidence: f64,
    pub source: CandidateSource,
}

impl BoundaryCandidate {
    pub fn new(chapter_index: usize, confidence: f64, source: CandidateSource) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            chapter_index,
            confidence,
            source,
        }
    }
}
