//! Song renderer and its worker threads
//!
//! [`SongRenderer::render_samples`] is the entry point for an audio callback.
//! Each pass resets the track states, wakes the workers through their start
//! channels, renders on the calling thread alongside them, and waits for
//! every woken worker to report back before mixing the master track down.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::denormal::DenormalGuard;
use crate::engine::automation::AutomationCurve;
use crate::engine::device::Device;
use crate::engine::mixdown::mixdown;
use crate::engine::parallel::TrackGraph;
use crate::engine::song::Song;
use crate::engine::track::Track;
use crate::error::{Error, Result};

enum WorkerCommand {
    Render { num_samples: usize },
    Shutdown,
}

struct Worker {
    start: Sender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
}

/// Renders a validated song into interleaved 16-bit stereo
pub struct SongRenderer {
    graph: Arc<TrackGraph>,
    workers: Vec<Worker>,
    done: Receiver<()>,
    config: EngineConfig,
    sample_rate: f32,
    tempo: i32,
    length: f64,
    frames_rendered: u64,
}

impl SongRenderer {
    /// Validate `song`, load its devices and start the worker threads
    ///
    /// # Example
    /// ```
    /// use sonare::{EngineConfig, Song, SongRenderer, TrackDesc};
    ///
    /// let mut song = Song::new(44100.0, 120, 1.0);
    /// song.add_track(TrackDesc::default());
    ///
    /// let mut renderer = SongRenderer::new(song, EngineConfig::default()).unwrap();
    /// let mut buffer = vec![1i16; 256 * 2];
    /// renderer.render_samples(&mut buffer, 256);
    /// assert!(buffer.iter().all(|&s| s == 0));
    /// ```
    pub fn new(song: Song, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let routing = song.validate()?;

        let Song {
            sample_rate,
            tempo,
            length,
            devices,
            midi_lanes,
            tracks: descs,
        } = song;

        let mut devices: Vec<Option<Box<dyn Device>>> = devices
            .into_iter()
            .map(|mut d| {
                d.device.set_sample_rate(sample_rate);
                d.device.set_tempo(tempo);
                d.device.set_parameters(&d.parameters);
                Some(d.device)
            })
            .collect();
        let lanes: Vec<Arc<_>> = midi_lanes.into_iter().map(Arc::new).collect();

        let tracks = descs
            .into_iter()
            .map(|desc| {
                // Validation guarantees every index exists and is used once
                let chain = desc
                    .devices
                    .iter()
                    .filter_map(|&d| devices[d].take())
                    .collect();
                let automations = desc.automations.iter().map(AutomationCurve::new).collect();
                Track::new(
                    desc.volume,
                    desc.receives,
                    chain,
                    desc.midi_lane.map(|l| Arc::clone(&lanes[l])),
                    automations,
                    sample_rate,
                    config.max_block_size,
                )
            })
            .collect();

        let graph = Arc::new(TrackGraph::new(tracks, routing.dependencies, routing.master));

        let (done_tx, done) = bounded(config.worker_threads.max(1));
        let workers = spawn_workers(config.worker_threads, &graph, &done_tx, |index| {
            thread::Builder::new().name(format!("sonare-render-{}", index))
        })?;

        debug!(
            tracks = graph.len(),
            master = graph.master(),
            workers = workers.len(),
            max_block_size = config.max_block_size,
            "song renderer ready"
        );

        Ok(Self {
            graph,
            workers,
            done,
            config,
            sample_rate,
            tempo,
            length,
            frames_rendered: 0,
        })
    }

    /// Fill `buffer` with `num_samples` interleaved stereo frames
    ///
    /// Writes exactly `num_samples * 2` values. Longer requests are split
    /// into passes of at most `max_block_size` frames.
    pub fn render_samples(&mut self, buffer: &mut [i16], num_samples: usize) {
        debug_assert!(buffer.len() >= num_samples * 2, "buffer too short");
        let frames = num_samples.min(buffer.len() / 2);
        if frames < num_samples {
            warn!(num_samples, frames, "output buffer too short, rendering what fits");
        }

        let _guard = DenormalGuard::new();
        for chunk in buffer[..frames * 2].chunks_mut(self.config.max_block_size * 2) {
            let n = chunk.len() / 2;
            self.render_pass(n);
            if let Some([left, right]) = self.graph.finished_output(self.graph.master(), n) {
                mixdown(left, right, chunk);
            }
        }
    }

    /// Render every track once for `num_samples` frames
    fn render_pass(&mut self, num_samples: usize) {
        // SAFETY: all workers reported back from the previous pass and the
        // previous pass's master output is no longer borrowed.
        unsafe { self.graph.reset() };

        let mut woken = 0;
        for worker in &self.workers {
            match worker.start.send(WorkerCommand::Render { num_samples }) {
                Ok(()) => woken += 1,
                Err(_) => warn!("render worker is gone, continuing without it"),
            }
        }

        self.graph.work(num_samples);

        for _ in 0..woken {
            if self.done.recv().is_err() {
                warn!("render workers disconnected mid-pass");
                break;
            }
        }

        self.frames_rendered += num_samples as u64;
        trace!(num_samples, woken, "pass complete");
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn tempo(&self) -> i32 {
        self.tempo
    }

    /// Song length in seconds
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Song length in frames, rounded up
    pub fn length_frames(&self) -> u64 {
        (self.length * self.sample_rate as f64).ceil() as u64
    }

    /// Seconds rendered so far
    pub fn position_seconds(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn track_count(&self) -> usize {
        self.graph.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for SongRenderer {
    fn drop(&mut self) {
        shutdown_workers(&mut self.workers);
        debug!("song renderer shut down");
    }
}

/// Start `count` workers; on failure the ones already running are joined
fn spawn_workers(
    count: usize,
    graph: &Arc<TrackGraph>,
    done_tx: &Sender<()>,
    builder: impl Fn(usize) -> thread::Builder,
) -> Result<Vec<Worker>> {
    let mut workers = Vec::with_capacity(count);
    for index in 0..count {
        let (start, start_rx) = bounded(1);
        let graph = Arc::clone(graph);
        let done_tx = done_tx.clone();
        match builder(index).spawn(move || worker_loop(index, graph, start_rx, done_tx)) {
            Ok(handle) => workers.push(Worker {
                start,
                handle: Some(handle),
            }),
            Err(err) => {
                warn!(worker = index, error = %err, "failed to spawn render worker");
                shutdown_workers(&mut workers);
                return Err(Error::ThreadSpawn(err));
            }
        }
    }
    Ok(workers)
}

fn shutdown_workers(workers: &mut [Worker]) {
    for worker in workers.iter() {
        let _ = worker.start.send(WorkerCommand::Shutdown);
    }
    for worker in workers.iter_mut() {
        if let Some(handle) = worker.handle.take() {
            if handle.join().is_err() {
                warn!("render worker panicked");
            }
        }
    }
}

fn worker_loop(
    index: usize,
    graph: Arc<TrackGraph>,
    start: Receiver<WorkerCommand>,
    done: Sender<()>,
) {
    debug!(worker = index, "render worker started");
    for command in start.iter() {
        match command {
            WorkerCommand::Render { num_samples } => {
                {
                    let _guard = DenormalGuard::new();
                    graph.work(num_samples);
                }
                if done.send(()).is_err() {
                    break;
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }
    debug!(worker = index, "render worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::device::{INPUT_CHANNELS, OUTPUT_CHANNELS};
    use crate::engine::song::{Event, MidiLane, Receive, TrackDesc};
    use crate::engine::track::tests::Constant;
    use crate::pipeline::{encode_parameters, FmParam, FmSynth};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Outputs the number of blocks it has rendered so far
    struct PassCounter {
        passes: f32,
    }

    impl Device for PassCounter {
        fn run(
            &mut self,
            _: f64,
            _: [&[f32]; INPUT_CHANNELS],
            outputs: [&mut [f32]; OUTPUT_CHANNELS],
        ) {
            self.passes += 1.0;
            for out in outputs {
                out.fill(self.passes);
            }
        }
    }

    /// Expects its main input to equal `senders * passes` and counts mismatches
    struct StaleCheck {
        senders: f32,
        passes: f32,
        stale: Arc<AtomicUsize>,
    }

    impl Device for StaleCheck {
        fn run(
            &mut self,
            _: f64,
            inputs: [&[f32]; INPUT_CHANNELS],
            outputs: [&mut [f32]; OUTPUT_CHANNELS],
        ) {
            self.passes += 1.0;
            let expected = self.senders * self.passes;
            if inputs[0].iter().chain(inputs[1]).any(|&s| s != expected) {
                self.stale.fetch_add(1, Ordering::Relaxed);
            }
            for out in outputs {
                out.fill(0.0);
            }
        }
    }

    fn config(workers: usize, block: usize) -> EngineConfig {
        EngineConfig {
            worker_threads: workers,
            max_block_size: block,
            ..EngineConfig::default()
        }
    }

    /// Two FM tracks into a master, with notes crossing block boundaries
    fn fm_song() -> Song {
        let mut song = Song::new(44100.0, 120, 0.5);
        let lane = song.add_midi_lane(MidiLane::new(vec![
            Event::note_on(37, 48, 110),
            Event::note_on(500, 55, 90),
            Event::note_off(3000, 48),
            Event::note_off(1234, 55),
        ]));

        let mut tracks = Vec::new();
        for (ratio, unison) in [(1.0, 1.0), (2.0, 3.0)] {
            let synth = FmSynth::new(16, 16);
            let mut values: Vec<f32> = FmParam::ALL
                .iter()
                .map(|p| synth.get_param(p.index()))
                .collect();
            values[FmParam::Op1Ratio.index()] = ratio;
            values[FmParam::VoicesUnisono.index()] = unison;
            values[FmParam::VoicesDetune.index()] = 0.15;
            values[FmParam::VoicesPan.index()] = 0.8;
            let device = song.add_device(Box::new(synth), encode_parameters(&values));
            tracks.push(song.add_track(TrackDesc {
                devices: vec![device],
                midi_lane: Some(lane),
                volume: 0.7,
                ..TrackDesc::default()
            }));
        }
        song.add_track(TrackDesc {
            receives: tracks.iter().map(|&t| Receive::main(t, 0.8)).collect(),
            ..TrackDesc::default()
        });
        song
    }

    fn render_all(song: Song, config: EngineConfig, frames: usize, block: usize) -> Vec<i16> {
        let mut renderer = SongRenderer::new(song, config).unwrap();
        let mut out = vec![0i16; frames * 2];
        for chunk in out.chunks_mut(block * 2) {
            let n = chunk.len() / 2;
            renderer.render_samples(chunk, n);
        }
        out
    }

    #[test]
    fn test_scenario_b_receive_mix() {
        let mut song = Song::new(1000.0, 120, 1.0);
        let a_dev = song.add_device(Box::new(Constant(0.25)), Vec::new());
        let b_dev = song.add_device(Box::new(Constant(0.5)), Vec::new());
        let a = song.add_track(TrackDesc {
            devices: vec![a_dev],
            ..TrackDesc::default()
        });
        let b = song.add_track(TrackDesc {
            devices: vec![b_dev],
            ..TrackDesc::default()
        });
        song.add_track(TrackDesc {
            receives: vec![Receive::main(a, 1.0), Receive::main(b, 0.5)],
            ..TrackDesc::default()
        });

        let mut renderer = SongRenderer::new(song, config(2, 64)).unwrap();
        let mut buffer = vec![0i16; 8];
        renderer.render_samples(&mut buffer, 4);
        // 0.25 + 0.5 * 0.5 = 0.5
        assert_eq!(buffer, vec![16383; 8]);
    }

    #[test]
    fn test_writes_exactly_requested_frames() {
        let mut song = Song::new(1000.0, 120, 1.0);
        let dev = song.add_device(Box::new(Constant(1.0)), Vec::new());
        song.add_track(TrackDesc {
            devices: vec![dev],
            ..TrackDesc::default()
        });

        let mut renderer = SongRenderer::new(song, config(1, 16)).unwrap();
        let mut buffer = vec![-1i16; 200];
        renderer.render_samples(&mut buffer, 50);
        assert!(buffer[..100].iter().all(|&s| s == 32767));
        assert!(buffer[100..].iter().all(|&s| s == -1));
        assert_eq!(renderer.frames_rendered(), 50);
        assert_eq!(renderer.position_seconds(), 0.05);
    }

    #[test]
    fn test_accessors() {
        let mut song = Song::new(48000.0, 140, 2.5);
        song.add_track(TrackDesc::default());
        let renderer = SongRenderer::new(song, config(2, 128)).unwrap();
        assert_eq!(renderer.sample_rate(), 48000.0);
        assert_eq!(renderer.tempo(), 140);
        assert_eq!(renderer.length(), 2.5);
        assert_eq!(renderer.length_frames(), 120_000);
        assert_eq!(renderer.worker_count(), 2);
        assert_eq!(renderer.track_count(), 1);
        assert_eq!(renderer.position_seconds(), 0.0);
        assert_eq!(renderer.config().max_block_size, 128);
    }

    #[test]
    fn test_invalid_song_and_config_rejected() {
        let song = Song::new(44100.0, 120, 1.0);
        assert!(matches!(
            SongRenderer::new(song, EngineConfig::default()),
            Err(Error::Song(_))
        ));

        let mut song = Song::new(44100.0, 120, 1.0);
        song.add_track(TrackDesc::default());
        assert!(matches!(
            SongRenderer::new(song, config(1, 0)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_fm_song_is_audible() {
        let out = render_all(fm_song(), config(2, 256), 8192, 256);
        assert!(out.iter().any(|&s| s != 0));
        // Nothing before the first note
        assert!(out[..74].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_deterministic_across_runs_and_thread_counts() {
        let reference = render_all(fm_song(), config(0, 128), 10_000, 300);
        assert_eq!(render_all(fm_song(), config(0, 128), 10_000, 300), reference);
        assert_eq!(render_all(fm_song(), config(3, 128), 10_000, 300), reference);
        assert_eq!(render_all(fm_song(), config(1, 128), 10_000, 300), reference);
    }

    #[test]
    fn test_block_size_does_not_change_output() {
        let a = render_all(fm_song(), config(2, 64), 4096, 64);
        let b = render_all(fm_song(), config(2, 512), 4096, 512);
        assert_eq!(a, b);
    }

    #[test]
    fn test_receivers_never_see_stale_senders() {
        const SOURCES: usize = 6;
        let stale = Arc::new(AtomicUsize::new(0));
        let mut song = Song::new(44100.0, 120, 1.0);

        let mut sources = Vec::new();
        for _ in 0..SOURCES {
            let dev = song.add_device(Box::new(PassCounter { passes: 0.0 }), Vec::new());
            sources.push(song.add_track(TrackDesc {
                devices: vec![dev],
                ..TrackDesc::default()
            }));
        }
        // Two layers of checks so receivers also wait on receivers
        let mut checks = Vec::new();
        for _ in 0..3 {
            let dev = song.add_device(
                Box::new(StaleCheck {
                    senders: SOURCES as f32,
                    passes: 0.0,
                    stale: Arc::clone(&stale),
                }),
                Vec::new(),
            );
            checks.push(song.add_track(TrackDesc {
                devices: vec![dev],
                receives: sources.iter().map(|&s| Receive::main(s, 1.0)).collect(),
                ..TrackDesc::default()
            }));
        }
        let mut master = TrackDesc {
            receives: checks.iter().map(|&p| Receive::main(p, 1.0)).collect(),
            ..TrackDesc::default()
        };
        master.receives.push(Receive::sidechain(sources[0], 1.0));
        song.add_track(master);

        let mut renderer = SongRenderer::new(song, config(4, 32)).unwrap();
        let mut buffer = vec![0i16; 64];
        for _ in 0..2000 {
            renderer.render_samples(&mut buffer, 32);
        }
        assert_eq!(stale.load(Ordering::Relaxed), 0);
        assert_eq!(renderer.frames_rendered(), 64_000);
    }

    #[test]
    fn test_failed_spawn_joins_started_workers() {
        let graph = Arc::new(TrackGraph::new(Vec::new(), Vec::new(), 0));
        let (done_tx, _done) = bounded(3);

        // A stack larger than the address space makes the third spawn fail
        let result = spawn_workers(3, &graph, &done_tx, |index| {
            let builder = thread::Builder::new();
            if index == 2 {
                builder.stack_size(usize::MAX / 4)
            } else {
                builder
            }
        });
        assert!(matches!(result, Err(Error::ThreadSpawn(_))));
        // Joined workers have released their handle on the graph
        assert_eq!(Arc::strong_count(&graph), 1);
    }

    #[test]
    fn test_drop_joins_workers() {
        let mut song = Song::new(44100.0, 120, 1.0);
        song.add_track(TrackDesc::default());
        let mut renderer = SongRenderer::new(song, config(3, 64)).unwrap();
        let mut buffer = vec![0i16; 128];
        renderer.render_samples(&mut buffer, 64);
        drop(renderer);
    }
}
