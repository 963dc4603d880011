//! Episode boundary detection for multi-episode Matroska rips.
//!
//! A disc rip concatenates several episodes into one file. The chapter
//! markers usually reveal where one episode ends: the intro (or outro)
//! chapter has the same length every time, and starts with the same music.
//! [`duration`] clusters chapters by length, [`fingerprint`] by audio, and
//! [`boundary`] turns either result into a [`SplitPlan`] for mkvmerge.

pub mod boundary;
pub mod chapters;
pub mod cluster;
pub mod config;
pub mod detect;
pub mod duration;
pub mod error;
pub mod fingerprint;
pub mod mkv;
pub mod sound;
pub mod spectrogram;
pub mod temp;

pub use boundary::{DetectionStatus, EpisodeRange, InconclusiveReason, SplitPlan, select_boundaries};
pub use chapters::Chapter;
pub use cluster::{BoundaryCandidate, CandidateSource, Cluster, ClusterRole, ClusterSignature};
pub use config::{MarkerPosition, SimilarityMeasure, SplitConfig};
pub use detect::{Detection, DetectionMode, detect_by_audio, detect_by_chapter_length};
pub use duration::cluster_by_duration;
pub use error::SplitError;
pub use fingerprint::{FingerprintVector, cluster_by_fingerprint};
