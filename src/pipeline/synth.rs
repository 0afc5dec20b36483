//! FM synthesizer device
//!
//! Glues the voice pool, the event scheduler and the two-operator voice into
//! a [`Device`] that can sit at the head of a track's chain.

use crate::config::EngineConfig;
use crate::engine::device::{Device, INPUT_CHANNELS, OUTPUT_CHANNELS};
use crate::generator::{EnvelopeSettings, FmVoice, FmVoiceParams};
use crate::pipeline::scheduler::{EventScheduler, EventTarget, NoteEvent};
use crate::pipeline::voicemgr::{UnisonSettings, VoicePool};

/// Automatable parameters of [`FmSynth`], in blob order
///
/// Values are in natural units: envelope times in ms, pitch amounts in
/// semitones, rates in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmParam {
    Op1Ratio,
    Op1Feedback,
    Op1Waveform,
    Op1Attack,
    Op1Decay,
    Op1Sustain,
    Op1Release,
    Op2Ratio,
    Op2Feedback,
    Op2Waveform,
    Op2Attack,
    Op2Decay,
    Op2Sustain,
    Op2Release,
    FeedForward,
    FeedbackScale,
    OutputScale,
    PitchAttack,
    PitchDecay,
    PitchSustain,
    PitchRelease,
    PitchAmount,
    VibratoRate,
    VibratoDepth,
    VelocitySensitivity,
    MasterLevel,
    VoicesUnisono,
    VoicesDetune,
    VoicesPan,
}

impl FmParam {
    pub const COUNT: usize = 29;

    pub const ALL: [FmParam; Self::COUNT] = [
        FmParam::Op1Ratio,
        FmParam::Op1Feedback,
        FmParam::Op1Waveform,
        FmParam::Op1Attack,
        FmParam::Op1Decay,
        FmParam::Op1Sustain,
        FmParam::Op1Release,
        FmParam::Op2Ratio,
        FmParam::Op2Feedback,
        FmParam::Op2Waveform,
        FmParam::Op2Attack,
        FmParam::Op2Decay,
        FmParam::Op2Sustain,
        FmParam::Op2Release,
        FmParam::FeedForward,
        FmParam::FeedbackScale,
        FmParam::OutputScale,
        FmParam::PitchAttack,
        FmParam::PitchDecay,
        FmParam::PitchSustain,
        FmParam::PitchRelease,
        FmParam::PitchAmount,
        FmParam::VibratoRate,
        FmParam::VibratoDepth,
        FmParam::VelocitySensitivity,
        FmParam::MasterLevel,
        FmParam::VoicesUnisono,
        FmParam::VoicesDetune,
        FmParam::VoicesPan,
    ];

    pub fn from_index(index: usize) -> Option<FmParam> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Encode parameter values as the little-endian f32 blob read by
/// [`Device::set_parameters`]
pub fn encode_parameters(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Polyphonic two-operator FM synthesizer
pub struct FmSynth {
    params: FmVoiceParams,
    unison: UnisonSettings,
    pool: VoicePool<FmVoice>,
    scheduler: EventScheduler,
    sample_rate: f32,
    tempo: i32,
}

impl FmSynth {
    /// Create a synth with `max_voices` voices and room for `max_events`
    /// pending note events
    pub fn new(max_voices: usize, max_events: usize) -> Self {
        let sample_rate = 44100.0;
        Self {
            params: FmVoiceParams::default(),
            unison: UnisonSettings::default(),
            pool: VoicePool::new(max_voices, |_| FmVoice::new(sample_rate)),
            scheduler: EventScheduler::new(max_events),
            sample_rate,
            tempo: 120,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_voices, config.max_events)
    }

    pub fn params(&self) -> &FmVoiceParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut FmVoiceParams {
        &mut self.params
    }

    pub fn unison(&self) -> &UnisonSettings {
        &self.unison
    }

    pub fn unison_mut(&mut self) -> &mut UnisonSettings {
        &mut self.unison
    }

    pub fn active_voices(&self) -> usize {
        self.pool.active_count()
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn dropped_events(&self) -> u64 {
        self.scheduler.dropped()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn tempo(&self) -> i32 {
        self.tempo
    }

    /// Release every sounding voice and forget pending events
    pub fn all_notes_off(&mut self) {
        self.scheduler.clear();
        self.pool.all_notes_off();
    }

    fn set(&mut self, param: FmParam, value: f32) {
        let p = &mut self.params;
        match param {
            FmParam::Op1Ratio => p.op1.ratio = value,
            FmParam::Op1Feedback => p.op1.feedback = value,
            FmParam::Op1Waveform => p.op1.waveform = value,
            FmParam::Op1Attack => set_attack(&mut p.op1.envelope, value),
            FmParam::Op1Decay => set_decay(&mut p.op1.envelope, value),
            FmParam::Op1Sustain => set_sustain(&mut p.op1.envelope, value),
            FmParam::Op1Release => set_release(&mut p.op1.envelope, value),
            FmParam::Op2Ratio => p.op2.ratio = value,
            FmParam::Op2Feedback => p.op2.feedback = value,
            FmParam::Op2Waveform => p.op2.waveform = value,
            FmParam::Op2Attack => set_attack(&mut p.op2.envelope, value),
            FmParam::Op2Decay => set_decay(&mut p.op2.envelope, value),
            FmParam::Op2Sustain => set_sustain(&mut p.op2.envelope, value),
            FmParam::Op2Release => set_release(&mut p.op2.envelope, value),
            FmParam::FeedForward => p.feed_forward = value,
            FmParam::FeedbackScale => p.feedback_scale = value,
            FmParam::OutputScale => p.output_scale = value,
            FmParam::PitchAttack => set_attack(&mut p.pitch_envelope, value),
            FmParam::PitchDecay => set_decay(&mut p.pitch_envelope, value),
            FmParam::PitchSustain => set_sustain(&mut p.pitch_envelope, value),
            FmParam::PitchRelease => set_release(&mut p.pitch_envelope, value),
            FmParam::PitchAmount => p.pitch_amount = value,
            FmParam::VibratoRate => p.vibrato_rate = value,
            FmParam::VibratoDepth => p.vibrato_depth = value,
            FmParam::VelocitySensitivity => p.velocity_sensitivity = value.clamp(0.0, 1.0),
            FmParam::MasterLevel => p.master_level = value,
            FmParam::VoicesUnisono => self.unison.voices = value.round().max(1.0) as usize,
            FmParam::VoicesDetune => self.unison.detune = value,
            FmParam::VoicesPan => self.unison.pan = value.clamp(0.0, 1.0),
        }
    }

    fn get(&self, param: FmParam) -> f32 {
        let p = &self.params;
        match param {
            FmParam::Op1Ratio => p.op1.ratio,
            FmParam::Op1Feedback => p.op1.feedback,
            FmParam::Op1Waveform => p.op1.waveform,
            FmParam::Op1Attack => p.op1.envelope.attack,
            FmParam::Op1Decay => p.op1.envelope.decay,
            FmParam::Op1Sustain => p.op1.envelope.sustain,
            FmParam::Op1Release => p.op1.envelope.release,
            FmParam::Op2Ratio => p.op2.ratio,
            FmParam::Op2Feedback => p.op2.feedback,
            FmParam::Op2Waveform => p.op2.waveform,
            FmParam::Op2Attack => p.op2.envelope.attack,
            FmParam::Op2Decay => p.op2.envelope.decay,
            FmParam::Op2Sustain => p.op2.envelope.sustain,
            FmParam::Op2Release => p.op2.envelope.release,
            FmParam::FeedForward => p.feed_forward,
            FmParam::FeedbackScale => p.feedback_scale,
            FmParam::OutputScale => p.output_scale,
            FmParam::PitchAttack => p.pitch_envelope.attack,
            FmParam::PitchDecay => p.pitch_envelope.decay,
            FmParam::PitchSustain => p.pitch_envelope.sustain,
            FmParam::PitchRelease => p.pitch_envelope.release,
            FmParam::PitchAmount => p.pitch_amount,
            FmParam::VibratoRate => p.vibrato_rate,
            FmParam::VibratoDepth => p.vibrato_depth,
            FmParam::VelocitySensitivity => p.velocity_sensitivity,
            FmParam::MasterLevel => p.master_level,
            FmParam::VoicesUnisono => self.unison.voices as f32,
            FmParam::VoicesDetune => self.unison.detune,
            FmParam::VoicesPan => self.unison.pan,
        }
    }
}

fn set_attack(env: &mut EnvelopeSettings, ms: f32) {
    env.attack = ms.max(0.0);
}

fn set_decay(env: &mut EnvelopeSettings, ms: f32) {
    env.decay = ms.max(0.0);
}

fn set_sustain(env: &mut EnvelopeSettings, level: f32) {
    env.sustain = level.clamp(0.0, 1.0);
}

fn set_release(env: &mut EnvelopeSettings, ms: f32) {
    env.release = ms.max(0.0);
}

/// Split borrow of the synth handed to the scheduler for one block
struct SynthTarget<'a> {
    params: &'a FmVoiceParams,
    unison: &'a UnisonSettings,
    pool: &'a mut VoicePool<FmVoice>,
    left: &'a mut [f32],
    right: &'a mut [f32],
}

impl EventTarget for SynthTarget<'_> {
    fn handle_event(&mut self, event: NoteEvent) {
        match event {
            NoteEvent::On { note, velocity } => {
                self.pool.note_on(self.params, note, velocity, self.unison);
            }
            NoteEvent::Off { note } => self.pool.note_off(note),
        }
    }

    fn render(&mut self, offset: usize, len: usize) {
        let end = offset + len;
        self.pool.run(
            self.params,
            &mut self.left[offset..end],
            &mut self.right[offset..end],
        );
    }
}

impl Device for FmSynth {
    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for voice in self.pool.voices_mut() {
            voice.set_sample_rate(sample_rate);
        }
    }

    fn set_tempo(&mut self, tempo: i32) {
        self.tempo = tempo;
    }

    /// Consecutive little-endian f32 values in [`FmParam`] order; values
    /// past the end of the blob keep their current setting
    fn set_parameters(&mut self, data: &[u8]) {
        for (param, chunk) in FmParam::ALL.iter().zip(data.chunks_exact(4)) {
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.set(*param, value);
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        if let Some(param) = FmParam::from_index(index) {
            self.set(param, value);
        }
    }

    fn get_param(&self, index: usize) -> f32 {
        FmParam::from_index(index).map_or(0.0, |p| self.get(p))
    }

    fn note_on(&mut self, note: u8, velocity: u8, delta_samples: usize) {
        self.scheduler
            .schedule(NoteEvent::On { note, velocity }, delta_samples);
    }

    fn note_off(&mut self, note: u8, delta_samples: usize) {
        self.scheduler.schedule(NoteEvent::Off { note }, delta_samples);
    }

    fn run(
        &mut self,
        _song_position: f64,
        _inputs: [&[f32]; INPUT_CHANNELS],
        outputs: [&mut [f32]; OUTPUT_CHANNELS],
    ) {
        let [left, right] = outputs;
        left.fill(0.0);
        right.fill(0.0);

        let num_samples = left.len();
        let mut target = SynthTarget {
            params: &self.params,
            unison: &self.unison,
            pool: &mut self.pool,
            left,
            right,
        };
        self.scheduler.run(num_samples, &mut target);
    }
}
