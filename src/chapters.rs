use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;
use std::fs;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_xml_rs::de::from_str;

use crate::config::ToolPaths;
use crate::error::SplitError;
use crate::temp::create_temp_file;

/// One contiguous segment of the recording, as delimited by its chapter markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub index: usize,
    #[serde(with = "humantime_serde")]
    pub start: Duration,
    #[serde(with = "humantime_serde")]
    pub length: Duration,
}

impl Chapter {
    pub fn end(&self) -> Duration {
        self.start + self.length
    }
}

/// Builds a chapter sequence starting at zero from consecutive lengths.
pub fn chapters_from_lengths(lengths: &[Duration]) -> Vec<Chapter> {
    let mut start = Duration::ZERO;
    lengths
        .iter()
        .enumerate()
        .map(|(index, &length)| {
            let chapter = Chapter {
                index,
                start,
                length,
            };
            start += length;
            chapter
        })
        .collect()
}

/// Checks the structural guarantees every core function relies on.
pub fn validate_chapters(chapters: &[Chapter]) -> Result<(), SplitError> {
    if chapters.len() < 2 {
        return Err(SplitError::TooFewChapters(chapters.len()));
    }
    for (position, chapter) in chapters.iter().enumerate() {
        if chapter.index != position {
            return Err(SplitError::NonContiguousIndex {
                position,
                index: chapter.index,
            });
        }
    }
    for pair in chapters.windows(2) {
        if pair[1].start != pair[0].end() {
            return Err(SplitError::NonContiguousStart(pair[1].index));
        }
    }
    Ok(())
}

/// Total running time of chapters `first..=last`.
pub(crate) fn span_length(chapters: &[Chapter], first: usize, last: usize) -> Duration {
    chapters[last].end() - chapters[first].start
}

pub fn extract_chapters(
    mkv_file_path: impl AsRef<Path>,
    tools: &ToolPaths,
) -> anyhow::Result<Vec<ChapterAtom>> {
    let (_temp_dir, temp_file) = create_temp_file("chapters.xml")?;

    log::info!(
        "Extracting chapters \"{}\" to \"{}\"",
        mkv_file_path.as_ref().display(),
        temp_file.display()
    );

    let output = Command::new(&tools.mkvextract)
        .arg(mkv_file_path.as_ref())
        .arg("chapters")
        .arg(&temp_file)
        .output()
        .with_context(|| format!("Failed to run {}", tools.mkvextract.display()))?;

    if !output.status.success() {
        log::warn!("stdout\n{}", String::from_utf8_lossy(&output.stdout));
        log::warn!("stderr\n{}", String::from_utf8_lossy(&output.stderr));
        anyhow::bail!(
            "mkvextract failed on {} with status: {}",
            mkv_file_path.as_ref().display(),
            output.status
        );
    }

    // mkvextract leaves an empty file when the container has no chapters
    if !temp_file.exists() || fs::metadata(&temp_file)?.len() == 0 {
        return Ok(Vec::new());
    }

    let xml_content = fs::read_to_string(&temp_file)?;
    let chapters = parse_chapter_xml(&xml_content)?;

    Ok(chapters.into_atoms())
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct ChapterXml {
    #[serde(rename = "EditionEntry", default)]
    editions: Vec<EditionEntry>,
}

impl ChapterXml {
    /// Atoms of the first (default) edition.
    pub fn into_atoms(self) -> Vec<ChapterAtom> {
        self.editions
            .into_iter()
            .next()
            .map(|edition| edition.chapters)
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct EditionEntry {
    #[serde(rename = "ChapterAtom", default)]
    chapters: Vec<ChapterAtom>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChapterAtom {
    #[serde(rename = "ChapterTimeStart")]
    pub start_time: String,

    #[serde(rename = "ChapterTimeEnd")]
    pub end_time: Option<String>,

    #[serde(rename = "ChapterDisplay", default)]
    pub display: Vec<ChapterDisplay>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChapterDisplay {
    #[serde(rename = "ChapterString")]
    pub title: String,
}

pub fn parse_chapter_xml(xml: &str) -> anyhow::Result<ChapterXml> {
    let chapters: ChapterXml = from_str(xml).context("Malformed chapter XML")?;
    Ok(chapters)
}

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):(\d{1,2}):(\d{1,2})(?:[.,](\d{1,9}))?$").expect("valid timestamp regex")
});

/// Parses a Matroska chapter timestamp such as `00:23:41.123456789`.
pub fn parse_time(s: &str) -> Option<Duration> {
    let caps = TIMESTAMP.captures(s.trim())?;

    let hours = caps[1].parse::<u64>().ok()?;
    let minutes = caps[2].parse::<u64>().ok()?;
    let seconds = caps[3].parse::<u64>().ok()?;
    let nanos = match caps.get(4) {
        Some(fraction) => format!("{:0<9}", fraction.as_str()).parse::<u32>().ok()?,
        None => 0,
    };

    Some(Duration::new(hours * 3600 + minutes * 60 + seconds, nanos))
}

/// Turns raw atoms into a contiguous chapter sequence. The final chapter's
/// length comes from its own end time, falling back to `total`.
pub fn chapters_from_atoms(
    atoms: &[ChapterAtom],
    total: Option<Duration>,
) -> anyhow::Result<Vec<Chapter>> {
    let mut spans = atoms
        .iter()
        .map(|atom| {
            let start = parse_time(&atom.start_time)
                .ok_or_else(|| anyhow::anyhow!("Invalid chapter start \"{}\"", atom.start_time))?;
            let end = atom.end_time.as_deref().and_then(parse_time);
            Ok((start, end))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    spans.sort_by_key(|(start, _)| *start);

    if let Some(pair) = spans.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        anyhow::bail!("Two chapters start at {:?}", pair[0].0);
    }

    let mut chapters = Vec::with_capacity(spans.len());
    for (index, &(start, end)) in spans.iter().enumerate() {
        let next = match spans.get(index + 1) {
            Some(&(next_start, _)) => next_start,
            None => end
                .filter(|end| *end > start)
                .or(total.filter(|total| *total > start))
                .ok_or_else(|| {
                    anyhow::anyhow!("Cannot determine the length of the final chapter {index}")
                })?,
        };
        chapters.push(Chapter {
            index,
            start,
            length: next - start,
        });
    }

    Ok(chapters)
}
