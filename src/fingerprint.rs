//! Audio-similarity clustering of chapters.
//!
//! Chapters are linked when the fingerprints of their opening seconds are
//! more similar than `similarity_threshold`. Connected components of that
//! graph are the clusters; a component is only trusted as a marker when its
//! average internal similarity also clears `confirmation_threshold`, since
//! single linkage can chain unrelated chapters together.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::chapters::{Chapter, validate_chapters};
use crate::cluster::{BoundaryCandidate, CandidateSource, Cluster, ClusterRole, ClusterSignature};
use crate::config::{SimilarityMeasure, SplitConfig};
use crate::error::SplitError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintVector(Vec<f32>);

impl FingerprintVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Element-wise mean. All vectors must share one dimension.
    fn centroid<'a>(vectors: impl IntoIterator<Item = &'a FingerprintVector>) -> Self {
        let mut sum: Vec<f64> = Vec::new();
        let mut count = 0usize;
        for vector in vectors {
            if sum.is_empty() {
                sum = vec![0.0; vector.dimension()];
            }
            for (acc, &v) in sum.iter_mut().zip(&vector.0) {
                *acc += f64::from(v);
            }
            count += 1;
        }
        let count = count.max(1) as f64;
        Self(sum.into_iter().map(|s| (s / count) as f32).collect())
    }
}

impl From<Vec<f32>> for FingerprintVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

pub fn similarity(measure: SimilarityMeasure, a: &FingerprintVector, b: &FingerprintVector) -> f64 {
    match measure {
        SimilarityMeasure::Cosine => cosine(a.as_slice(), b.as_slice(), 0.0, 0.0),
        SimilarityMeasure::Ncc => {
            let mean = |v: &[f32]| {
                if v.is_empty() {
                    0.0
                } else {
                    v.iter().map(|&x| f64::from(x)).sum::<f64>() / v.len() as f64
                }
            };
            cosine(a.as_slice(), b.as_slice(), mean(a.as_slice()), mean(b.as_slice()))
        }
    }
}

/// Cosine of `a - offset_a` and `b - offset_b`; zero when either is a zero vector.
fn cosine(a: &[f32], b: &[f32], offset_a: f64, offset_b: f64) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let x = f64::from(x) - offset_a;
        let y = f64::from(y) - offset_b;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Union-find over dense indices.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintClustering {
    /// Connected components, ordered by first member. Chapters without a
    /// fingerprint belong to none of them.
    pub clusters: Vec<Cluster>,
    /// Index into `clusters` of the intro/outro signature, if any.
    pub primary: Option<usize>,
    /// Members of the primary cluster, ordered by chapter.
    pub candidates: Vec<BoundaryCandidate>,
}

impl FingerprintClustering {
    pub fn primary_cluster(&self) -> Option<&Cluster> {
        self.primary.map(|i| &self.clusters[i])
    }
}

/// `fingerprints[i]` belongs to `chapters[i]`; `None` marks a chapter that
/// could not be fingerprinted (silence, truncated audio) and is left out.
pub fn cluster_by_fingerprint(
    chapters: &[Chapter],
    fingerprints: &[Option<FingerprintVector>],
    config: &SplitConfig,
) -> Result<FingerprintClustering, SplitError> {
    validate_chapters(chapters)?;
    config.validate()?;
    if fingerprints.len() != chapters.len() {
        return Err(SplitError::FingerprintCountMismatch {
            expected: chapters.len(),
            found: fingerprints.len(),
        });
    }

    let present: Vec<(usize, &FingerprintVector)> = fingerprints
        .iter()
        .enumerate()
        .filter_map(|(index, fp)| fp.as_ref().map(|fp| (index, fp)))
        .collect();

    if let Some(&(_, first)) = present.first() {
        let expected = first.dimension();
        if let Some(&(chapter, fp)) = present.iter().find(|(_, fp)| fp.dimension() != expected) {
            return Err(SplitError::DimensionMismatch {
                chapter,
                expected,
                found: fp.dimension(),
            });
        }
    }
    if present.len() < chapters.len() {
        log::debug!(
            "{} of {} chapters have no fingerprint and are excluded",
            chapters.len() - present.len(),
            chapters.len()
        );
    }

    let n = present.len();
    let mut matrix = vec![0.0f64; n * n];
    let mut components = DisjointSet::new(n);
    for i in 0..n {
        matrix[i * n + i] = 1.0;
        for j in (i + 1)..n {
            let sim = similarity(config.similarity, present[i].1, present[j].1);
            matrix[i * n + j] = sim;
            matrix[j * n + i] = sim;
            if sim > config.similarity_threshold {
                components.union(i, j);
            }
        }
    }

    let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
    for position in 0..n {
        let root = components.find(position);
        match groups.iter_mut().find(|(r, _)| *r == root) {
            Some((_, group)) => group.push(position),
            None => groups.push((root, vec![position])),
        }
    }

    struct Scored {
        cluster: Cluster,
        positions: Vec<usize>,
        centroid: FingerprintVector,
        cohesion: f64,
    }

    let scored: Vec<Scored> = groups
        .into_iter()
        .map(|(_, positions)| {
            let centroid = FingerprintVector::centroid(positions.iter().map(|&p| present[p].1));
            let cohesion = mean_pairwise(&matrix, n, &positions);
            let role = if positions.len() >= 2 && cohesion > config.confirmation_threshold {
                ClusterRole::Marker
            } else {
                ClusterRole::Unknown
            };
            let members = positions.iter().map(|&p| present[p].0).collect();
            Scored {
                cluster: Cluster::new(members, ClusterSignature::Centroid(centroid.clone()), role),
                positions,
                centroid,
                cohesion,
            }
        })
        .collect();

    let primary = scored
        .iter()
        .enumerate()
        .filter(|(_, s)| s.cluster.is_marker())
        .max_by(|(_, a), (_, b)| {
            a.cluster
                .recurrences()
                .cmp(&b.cluster.recurrences())
                .then(a.cohesion.total_cmp(&b.cohesion))
                .then(b.cluster.members()[0].cmp(&a.cluster.members()[0]))
        })
        .map(|(i, _)| i);

    let candidates = match primary {
        Some(i) => {
            let chosen = &scored[i];
            log::debug!(
                "Primary audio signature at chapters {:?} (cohesion {:.5})",
                chosen.cluster.members(),
                chosen.cohesion
            );
            let mut candidates: Vec<BoundaryCandidate> = chosen
                .positions
                .iter()
                .map(|&p| {
                    let (index, fp) = present[p];
                    let confidence = similarity(config.similarity, fp, &chosen.centroid);
                    BoundaryCandidate::new(index, confidence, CandidateSource::Fingerprint)
                })
                .collect();
            candidates.sort_by_key(|c| c.chapter_index);
            candidates
        }
        None => {
            log::debug!("No audio signature recurs with enough confidence");
            Vec::new()
        }
    };

    Ok(FingerprintClustering {
        clusters: scored.into_iter().map(|s| s.cluster).collect(),
        primary,
        candidates,
    })
}

fn mean_pairwise(matrix: &[f64], n: usize, positions: &[usize]) -> f64 {
    let mut sum = 0.0;
    let mut pairs = 0usize;
    for (k, &i) in positions.iter().enumerate() {
        for &j in &positions[k + 1..] {
            sum += matrix[i * n + j];
            pairs += 1;
        }
    }
    if pairs == 0 { 1.0 } else { sum / pairs as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::chapters_from_lengths;
    use std::time::Duration;

    fn chapters(n: usize) -> Vec<Chapter> {
        chapters_from_lengths(&vec![Duration::from_secs(120); n])
    }

    fn unit(dim: usize, axis: usize) -> FingerprintVector {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        FingerprintVector::new(v)
    }

    #[test]
    fn cosine_and_ncc() {
        let a = FingerprintVector::new(vec![1.0, 2.0, 3.0]);
        let b = FingerprintVector::new(vec![2.0, 4.0, 6.0]);
        let c = FingerprintVector::new(vec![3.0, 2.0, 1.0]);
        assert!((similarity(SimilarityMeasure::Cosine, &a, &b) - 1.0).abs() < 1e-9);
        assert!((similarity(SimilarityMeasure::Ncc, &a, &c) + 1.0).abs() < 1e-9);
        let zero = FingerprintVector::new(vec![0.0; 3]);
        assert_eq!(similarity(SimilarityMeasure::Cosine, &a, &zero), 0.0);
    }

    #[test]
    fn identical_vectors_form_the_primary_cluster() {
        // chapters 0, 3, 6 share an intro; the rest are orthogonal
        let intro = unit(8, 0);
        let fps: Vec<Option<FingerprintVector>> = (0..8)
            .map(|i| Some(if i % 3 == 0 { intro.clone() } else { unit(8, i) }))
            .collect();
        let result = cluster_by_fingerprint(&chapters(8), &fps, &SplitConfig::default()).unwrap();

        let primary = result.primary_cluster().unwrap();
        assert_eq!(primary.members(), &[0, 3, 6]);
        assert_eq!(result.clusters.iter().filter(|c| c.is_marker()).count(), 1);
        assert!(result.clusters.iter().filter(|c| !c.is_marker()).all(|c| c.len() == 1));
        assert!(result.candidates.iter().all(|c| (c.confidence - 1.0).abs() < 1e-6));
    }

    #[test]
    fn missing_fingerprints_are_skipped() {
        let intro = FingerprintVector::new(vec![0.3, 0.9, 0.1, 0.4]);
        let fps = vec![
            Some(intro.clone()),
            Some(unit(4, 0)),
            None,
            Some(intro.clone()),
            Some(unit(4, 2)),
            Some(intro),
        ];
        let result = cluster_by_fingerprint(&chapters(6), &fps, &SplitConfig::default()).unwrap();
        let indices: Vec<_> = result.candidates.iter().map(|c| c.chapter_index).collect();
        assert_eq!(indices, vec![0, 3, 5]);
        assert!(result.clusters.iter().all(|c| !c.contains(2)));
    }

    #[test]
    fn chained_links_are_not_confirmed() {
        // a~b and b~c clear the edge threshold, but a and c are far apart
        let a = FingerprintVector::new(vec![1.0, 0.0]);
        let b = FingerprintVector::new(vec![0.8, 0.6]);
        let c = FingerprintVector::new(vec![0.28, 0.96]);
        let config = SplitConfig {
            similarity_threshold: 0.79,
            confirmation_threshold: 0.9,
            ..Default::default()
        };
        let result =
            cluster_by_fingerprint(&chapters(3), &[Some(a), Some(b), Some(c)], &config).unwrap();
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].role(), ClusterRole::Unknown);
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let fps = vec![Some(unit(4, 0)), Some(unit(3, 0))];
        assert_eq!(
            cluster_by_fingerprint(&chapters(2), &fps, &SplitConfig::default()),
            Err(SplitError::DimensionMismatch {
                chapter: 1,
                expected: 4,
                found: 3
            })
        );
    }

    #[test]
    fn fingerprint_count_must_match() {
        let fps = vec![Some(unit(4, 0))];
        assert!(matches!(
            cluster_by_fingerprint(&chapters(2), &fps, &SplitConfig::default()),
            Err(SplitError::FingerprintCountMismatch { .. })
        ));
    }

    #[test]
    fn union_find_merges_transitively() {
        let mut set = DisjointSet::new(5);
        set.union(0, 1);
        set.union(3, 4);
        set.union(1, 4);
        assert_eq!(set.find(0), set.find(3));
        assert_ne!(set.find(2), set.find(0));
    }
}
