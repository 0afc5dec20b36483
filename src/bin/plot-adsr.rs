//! Plot an envelope curve to SVG
//!
//! ```bash
//! plot-adsr 100 200 0.7 300 640 output.svg   # note_off at 640ms
//! plot-adsr 50 100 0.5 200 30 early.svg      # release during attack
//! ```

use anyhow::{bail, Result};
use clap::Parser;
use plotters::prelude::*;
use sonare::generator::{
    EnvelopeGenerator, EnvelopeSettings, EnvelopeState, GeneratorState, SignalGenerator,
};
use tracing::info;

const SAMPLE_RATE: f32 = 1000.0; // 1ms = 1 sample
const FRAME_SIZE: usize = 64;
const MAX_SAMPLES: usize = 100_000;

#[derive(Parser)]
#[command(name = "plot-adsr")]
#[command(about = "Render an ADSR envelope to an SVG plot")]
struct Args {
    /// Attack time in ms
    attack_ms: f32,
    /// Decay time in ms
    decay_ms: f32,
    /// Sustain level (0.0 to 1.0)
    sustain_level: f32,
    /// Release time in ms
    release_ms: f32,
    /// Time of the note-off in ms
    note_off_ms: f32,
    /// Output SVG path
    output: String,

    /// Largest allowed jump between consecutive samples
    #[arg(long, default_value = "0.15")]
    max_jump: f32,
}

/// Render the envelope, splitting frames so the note-off lands on its exact sample
fn generate(args: &Args) -> Result<(Vec<f32>, Vec<EnvelopeState>)> {
    let settings = EnvelopeSettings::new(
        args.attack_ms,
        args.decay_ms,
        args.sustain_level,
        args.release_ms,
    );
    let mut env = EnvelopeGenerator::new(settings, SAMPLE_RATE);
    let note_off_sample = (args.note_off_ms * SAMPLE_RATE / 1000.0) as usize;

    let mut samples = Vec::new();
    let mut states = Vec::new();
    let mut frame = [0.0f32; FRAME_SIZE];
    let mut released = false;

    loop {
        let pos = samples.len();
        if !released && pos == note_off_sample {
            env.note_off();
            released = true;
        }
        let len = if released {
            FRAME_SIZE
        } else {
            FRAME_SIZE.min(note_off_sample - pos)
        };

        let state_at_start = env.state();
        let result = env.process(&mut frame[..len]);
        samples.extend_from_slice(&frame[..len]);
        states.extend(std::iter::repeat(state_at_start).take(len));

        if result == GeneratorState::Complete {
            break;
        }
        if samples.len() > MAX_SAMPLES {
            bail!("envelope exceeded {} samples", MAX_SAMPLES);
        }
    }

    Ok((samples, states))
}

fn check_discontinuities(samples: &[f32], max_jump: f32) -> Result<()> {
    let (index, jump) = samples
        .windows(2)
        .enumerate()
        .map(|(i, w)| (i + 1, (w[1] - w[0]).abs()))
        .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best });

    if jump > max_jump {
        bail!(
            "discontinuity at {}ms: {} -> {} (jump {})",
            index,
            samples[index - 1],
            samples[index],
            jump
        );
    }
    info!(max_jump = jump, at_ms = index, "envelope is continuous");
    Ok(())
}

fn create_plot(args: &Args, samples: &[f32], states: &[EnvelopeState]) -> Result<()> {
    let root = SVGBackend::new(&args.output, (800, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_time = samples.len().saturating_sub(1) as f32;
    let title = format!(
        "ADSR: A={}ms, D={}ms, S={:.2}, R={}ms, note_off={}ms",
        args.attack_ms, args.decay_ms, args.sustain_level, args.release_ms, args.note_off_ms
    );

    let mut chart = ChartBuilder::on(&root)
        .caption(&title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f32..max_time.max(1.0), 0f32..1.1f32)?;

    chart
        .configure_mesh()
        .x_desc("Time (ms)")
        .y_desc("Amplitude")
        .x_labels(10)
        .y_labels(10)
        .draw()?;

    chart.draw_series(LineSeries::new(
        samples.iter().enumerate().map(|(i, &s)| (i as f32, s)),
        BLUE.stroke_width(2),
    ))?;

    // Mark stage changes
    let changes = states
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] != w[1])
        .map(|(i, _)| i + 1);
    chart.draw_series(changes.map(|i| Cross::new((i as f32, samples[i]), 6, BLACK.filled())))?;

    chart.draw_series(std::iter::once(Circle::new(
        (args.note_off_ms, samples.get(args.note_off_ms as usize).copied().unwrap_or(0.0)),
        5,
        RED.filled(),
    )))?;

    root.present()?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.attack_ms < 0.0 || args.decay_ms < 0.0 || args.release_ms < 0.0 {
        bail!("time values must be non-negative");
    }
    if !(0.0..=1.0).contains(&args.sustain_level) {
        bail!("sustain level must be between 0.0 and 1.0");
    }
    if args.note_off_ms < 0.0 {
        bail!("note off time must be non-negative");
    }

    let (samples, states) = generate(&args)?;
    info!(
        samples = samples.len(),
        expected_ms = args.note_off_ms + args.release_ms,
        "envelope generated"
    );

    check_discontinuities(&samples, args.max_jump)?;
    create_plot(&args, &samples, &states)?;
    info!(path = %args.output, "plot written");
    Ok(())
}
