use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};

use crate::{
    boundary::SplitPlan,
    chapters::{Chapter, ChapterAtom, chapters_from_atoms, extract_chapters},
    config::{SplitConfig, ToolPaths},
    detect::{Detection, DetectionMode, detect_by_audio, detect_by_chapter_length},
    sound::{decode_mono_samples, probe_duration},
    spectrogram::extract_fingerprints,
};

/// Reads the chapter list of `path`. The final chapter's length falls back
/// to the container's audio duration when its end time is not recorded.
pub fn read_chapters(path: impl AsRef<Path>, tools: &ToolPaths) -> Result<Vec<Chapter>> {
    let path = path.as_ref();
    let atoms: Vec<ChapterAtom> = extract_chapters(path, tools)?;
    if atoms.is_empty() {
        anyhow::bail!("{} has no chapters", path.display());
    }

    let total = if atoms.last().is_some_and(|atom| atom.end_time.is_some()) {
        None
    } else {
        probe_duration(path).unwrap_or_else(|e| {
            log::warn!("Could not read duration of {}: {e:#}", path.display());
            None
        })
    };

    chapters_from_atoms(&atoms, total)
}

pub fn analyze_mkv(
    path: impl AsRef<Path>,
    mode: DetectionMode,
    config: &SplitConfig,
) -> Result<Detection> {
    let path = path.as_ref();
    config.validate()?;

    log::info!("Processing {} in {:?} mode", path.display(), mode);
    let chapters = read_chapters(path, &config.tools)?;
    log::info!("Found {} chapters", chapters.len());

    let detection = match mode {
        DetectionMode::Chapters => detect_by_chapter_length(&chapters, config)?,
        DetectionMode::Audio => {
            let audio = decode_mono_samples(path)?;
            let fingerprints = extract_fingerprints(&audio, &chapters, &config.fingerprint)?;
            let usable = fingerprints.iter().filter(|fp| fp.is_some()).count();
            log::info!(
                "Created fingerprints for {usable} of {} chapters",
                chapters.len()
            );
            detect_by_audio(&chapters, &fingerprints, config)?
        }
    };

    log::info!(
        "{} episode(s), status {:?}",
        detection.plan.len(),
        detection.status
    );
    Ok(detection)
}

/// Default output name: `<stem>_episodes.mkv` beside the input. mkvmerge
/// numbers the parts itself (`-001`, `-002`, ...).
pub fn default_output_path(input: impl AsRef<Path>) -> PathBuf {
    let input = input.as_ref();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    input.with_file_name(format!("{stem}_episodes.mkv"))
}

pub fn split_command(
    input: impl AsRef<Path>,
    plan: &SplitPlan,
    output: impl AsRef<Path>,
    tools: &ToolPaths,
) -> Result<Command> {
    let split = plan
        .mkvmerge_split_chapters()
        .ok_or_else(|| anyhow::anyhow!("Split plan has a single episode, nothing to split"))?;

    let mut command = Command::new(&tools.mkvmerge);
    command
        .arg("-o")
        .arg(output.as_ref())
        .arg("--split")
        .arg(split)
        .arg(input.as_ref());
    Ok(command)
}

/// Runs mkvmerge to write one file per planned episode.
pub fn export_split_plan(
    input: impl AsRef<Path>,
    plan: &SplitPlan,
    output: impl AsRef<Path>,
    tools: &ToolPaths,
) -> Result<()> {
    let mut command = split_command(&input, plan, &output, tools)?;
    log::info!("Running {:?}", command);

    let output_status = command
        .output()
        .with_context(|| format!("Failed to run {}", tools.mkvmerge.display()))?;
    // mkvmerge exits with 1 when it only emitted warnings
    if !output_status.status.success() && output_status.status.code() != Some(1) {
        log::warn!("stdout\n{}", String::from_utf8_lossy(&output_status.stdout));
        log::warn!("stderr\n{}", String::from_utf8_lossy(&output_status.stderr));
        anyhow::bail!(
            "mkvmerge failed on {} with status: {}",
            input.as_ref().display(),
            output_status.status
        );
    }

    log::info!("Wrote episodes to {}", output.as_ref().display());
    Ok(())
}

/// Writes the detection as pretty JSON for review before exporting.
pub fn write_report(detection: &Detection, out_path: impl AsRef<Path>) -> Result<()> {
    let out_path = out_path.as_ref();
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if out_path.exists() {
        log::warn!(
            "Output file already exists and will be overwritten: {}",
            out_path.display()
        );
    }

    let mut file = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let json = serde_json::to_string_pretty(detection)?;
    writeln!(file, "{}", json)?;
    log::info!("Wrote: {}", out_path.display());
    Ok(())
}
