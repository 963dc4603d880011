use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Mono PCM of a recording's first decodable audio track.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Samples covering `start..start + length`, or `None` when that window
    /// runs past the end of the audio.
    pub fn window(&self, start: Duration, length: Duration) -> Option<&[f32]> {
        let rate = f64::from(self.sample_rate);
        let first = (start.as_secs_f64() * rate) as usize;
        let count = (length.as_secs_f64() * rate) as usize;
        self.samples.get(first..first.checked_add(count)?)
    }
}

fn open_format(path: &Path) -> anyhow::Result<Box<dyn FormatReader>> {
    let src = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Unsupported container {}", path.display()))?;
    Ok(probed.format)
}

/// Running time of the first decodable audio track, if the container says.
pub fn probe_duration(path: impl AsRef<Path>) -> anyhow::Result<Option<Duration>> {
    let format = open_format(path.as_ref())?;
    let Some(track) = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    else {
        return Ok(None);
    };

    let params = &track.codec_params;
    let duration = match (params.time_base, params.n_frames) {
        (Some(time_base), Some(n_frames)) => {
            let time = time_base.calc_time(n_frames);
            Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
        }
        (None, Some(n_frames)) => params
            .sample_rate
            .map(|rate| Duration::from_secs_f64(n_frames as f64 / f64::from(rate))),
        _ => None,
    };
    Ok(duration)
}

/// Decodes the whole first audio track, averaging channels down to mono.
pub fn decode_mono_samples(path: impl AsRef<Path>) -> anyhow::Result<MonoAudio> {
    let path = path.as_ref();
    log::info!("[1/3] Probing <{}>", path.display());
    let mut format = open_format(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow::anyhow!("No supported audio track in {}", path.display()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow::anyhow!("Audio track {track_id} has no sample rate"))?;

    log::info!("[2/3] Decoding track {} ({} Hz)", track_id, sample_rate);
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .with_context(|| format!("No decoder for codec {:?}", codec_params.codec))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::ResetRequired) => {
                log::warn!("Track list changed mid-stream, stopping decode");
                break;
            }
            Err(err) => return Err(err).context("Failed to read packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) | Err(Error::DecodeError(_)) => continue,
            Err(err) => return Err(err).context("Unrecoverable decode error"),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend(
            buffer
                .samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    let audio = MonoAudio {
        samples,
        sample_rate,
    };
    log::info!(
        "[3/3] Decoded {:.1}s of audio from <{}>",
        audio.duration().as_secs_f64(),
        path.display()
    );
    Ok(audio)
}
