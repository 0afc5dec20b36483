//! Offline song renderer
//!
//! Builds a short demo song in code: an FM bass and a unison FM lead with
//! automated modulation depth, both routed into a master track. The song is
//! rendered block by block through `render_samples` the way an audio
//! callback would drive it, then written as a stereo 16-bit WAV.
//!
//! # Usage
//!
//! ```bash
//! render out.wav
//! render out.wav --seconds 16 --block 128 --config engine.toml
//! RUST_LOG=debug render out.wav --workers 0
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use sonare::engine::{Automation, AutomationPoint, Event, MidiLane};
use sonare::pipeline::{encode_parameters, FmParam, FmSynth};
use sonare::wav::write_wav_stereo;
use sonare::{Device, EngineConfig, Receive, Song, SongRenderer, TrackDesc};

const SAMPLE_RATE: f32 = 44100.0;
const TEMPO: i32 = 120;

#[derive(Parser)]
#[command(name = "render")]
#[command(author, version, about = "Render the demo song to a WAV file")]
struct Args {
    /// Output WAV file
    #[arg(default_value = "song.wav")]
    output: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Song length in seconds
    #[arg(long, short = 's', default_value = "8")]
    seconds: f64,

    /// Frames requested per render call
    #[arg(long, short = 'b', default_value = "256")]
    block: usize,

    /// Override the configured worker thread count
    #[arg(long, short = 'w')]
    workers: Option<usize>,
}

/// (start beat, length in beats, note, velocity)
type Note = (f64, f64, u8, u8);

fn beats_to_samples(beats: f64) -> u64 {
    (beats * 60.0 / TEMPO as f64 * SAMPLE_RATE as f64).round() as u64
}

/// Turn absolute notes into a delta-encoded lane
///
/// Releases sort before starts on the same sample so a repeated note
/// retriggers instead of being cut.
fn lane_from_notes(notes: &[Note]) -> MidiLane {
    let mut timed: Vec<(u64, bool, u8, u8)> = Vec::with_capacity(notes.len() * 2);
    for &(start, length, note, velocity) in notes {
        let on = beats_to_samples(start);
        let off = beats_to_samples(start + length);
        timed.push((on, true, note, velocity));
        timed.push((off, false, note, 0));
    }
    timed.sort_by_key(|&(pos, is_on, _, _)| (pos, is_on));

    let mut last = 0;
    let events = timed
        .into_iter()
        .map(|(pos, is_on, note, velocity)| {
            let delta = (pos - last) as usize;
            last = pos;
            if is_on {
                Event::note_on(delta, note, velocity)
            } else {
                Event::note_off(delta, note)
            }
        })
        .collect();
    MidiLane::new(events)
}

fn bass_line(bars: usize) -> Vec<Note> {
    let roots = [33u8, 33, 41, 38];
    (0..bars * 8)
        .map(|eighth| {
            let root = roots[(eighth / 8) % roots.len()];
            let octave = if eighth % 4 == 3 { 12 } else { 0 };
            (eighth as f64 * 0.5, 0.4, root + octave, 100)
        })
        .collect()
}

fn lead_line(bars: usize) -> Vec<Note> {
    let phrase = [(0.0, 1.5, 69u8), (1.5, 0.5, 72), (2.0, 1.0, 76), (3.0, 1.0, 74)];
    (0..bars)
        .flat_map(|bar| {
            phrase
                .iter()
                .map(move |&(start, len, note)| (bar as f64 * 4.0 + start, len, note, 90))
        })
        .collect()
}

fn synth_blob(overrides: &[(FmParam, f32)]) -> Vec<u8> {
    let defaults = FmSynth::new(1, 1);
    let mut values: Vec<f32> = FmParam::ALL
        .iter()
        .map(|p| defaults.get_param(p.index()))
        .collect();
    for &(param, value) in overrides {
        values[param.index()] = value;
    }
    encode_parameters(&values)
}

fn demo_song(config: &EngineConfig, seconds: f64) -> Song {
    let mut song = Song::new(SAMPLE_RATE, TEMPO, seconds);
    let bars = (seconds * TEMPO as f64 / 60.0 / 4.0).ceil() as usize;

    let bass_lane = song.add_midi_lane(lane_from_notes(&bass_line(bars)));
    let lead_lane = song.add_midi_lane(lane_from_notes(&lead_line(bars)));

    let bass = song.add_device(
        Box::new(FmSynth::from_config(config)),
        synth_blob(&[
            (FmParam::Op1Ratio, 2.0),
            (FmParam::Op1Feedback, 0.4),
            (FmParam::Op1Decay, 120.0),
            (FmParam::Op1Sustain, 0.1),
            (FmParam::FeedForward, 0.8),
            (FmParam::Op2Release, 60.0),
            (FmParam::PitchAttack, 0.0),
            (FmParam::PitchDecay, 15.0),
            (FmParam::PitchAmount, 12.0),
            (FmParam::VelocitySensitivity, 0.5),
        ]),
    );
    let lead = song.add_device(
        Box::new(FmSynth::from_config(config)),
        synth_blob(&[
            (FmParam::Op1Ratio, 3.0),
            (FmParam::Op1Waveform, 0.5),
            (FmParam::Op2Waveform, 0.3),
            (FmParam::Op2Attack, 30.0),
            (FmParam::Op2Release, 400.0),
            (FmParam::VibratoRate, 5.5),
            (FmParam::VibratoDepth, 0.15),
            (FmParam::MasterLevel, 0.3),
            (FmParam::VoicesUnisono, 3.0),
            (FmParam::VoicesDetune, 0.12),
            (FmParam::VoicesPan, 0.9),
        ]),
    );

    let bass_track = song.add_track(TrackDesc {
        volume: 0.8,
        devices: vec![bass],
        midi_lane: Some(bass_lane),
        ..TrackDesc::default()
    });

    // Open the lead's modulator over the length of the song
    let sweep = Automation {
        device: 0,
        param: FmParam::FeedForward.index(),
        points: vec![
            AutomationPoint {
                delta_samples: 0,
                value: 0.2,
            },
            AutomationPoint {
                delta_samples: (seconds * SAMPLE_RATE as f64) as usize,
                value: 1.0,
            },
        ],
    };
    let lead_track = song.add_track(TrackDesc {
        volume: 0.6,
        devices: vec![lead],
        midi_lane: Some(lead_lane),
        automations: vec![sweep],
        ..TrackDesc::default()
    });

    song.add_track(TrackDesc {
        receives: vec![Receive::main(bass_track, 1.0), Receive::main(lead_track, 0.9)],
        ..TrackDesc::default()
    });
    song
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            EngineConfig::from_toml_str(&text)?
        }
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    anyhow::ensure!(args.block > 0, "--block must be at least 1");

    let song = demo_song(&config, args.seconds);
    let mut renderer = SongRenderer::new(song, config)?;
    info!(
        tracks = renderer.track_count(),
        workers = renderer.worker_count(),
        seconds = renderer.length(),
        "rendering"
    );

    let total = renderer.length_frames() as usize;
    let mut output = vec![0i16; total * 2];
    let started = Instant::now();
    for chunk in output.chunks_mut(args.block * 2) {
        let frames = chunk.len() / 2;
        renderer.render_samples(chunk, frames);
    }
    let elapsed = started.elapsed().as_secs_f64();
    info!(
        elapsed_ms = elapsed * 1000.0,
        realtime = renderer.position_seconds() / elapsed.max(f64::EPSILON),
        "render complete"
    );

    write_wav_stereo(&args.output, &output, renderer.sample_rate() as u32)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(path = %args.output.display(), "wrote wav");
    Ok(())
}
