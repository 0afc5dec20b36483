//! WAV file writer utility
//!
//! Writes the interleaved 16-bit stereo stream produced by
//! [`SongRenderer::render_samples`](crate::engine::SongRenderer::render_samples).

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::Result;

/// Write interleaved stereo 16-bit PCM samples to a WAV file
///
/// # Arguments
/// * `path` - Output file path
/// * `samples` - Interleaved left/right samples
/// * `sample_rate` - Sample rate in Hz (only for header)
///
/// # Example
/// ```
/// use sonare::wav::write_wav_stereo;
///
/// let dir = std::env::temp_dir().join("sonare-doc.wav");
/// let samples = vec![0i16; 2 * 16000]; // 1 second of silence at 16kHz
/// write_wav_stereo(&dir, &samples, 16000).unwrap();
/// ```
pub fn write_wav_stereo(path: impl AsRef<Path>, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
