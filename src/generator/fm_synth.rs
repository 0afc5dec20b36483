use super::adsr::{EnvelopeGenerator, EnvelopeSettings, EnvelopeState};
use super::{note_to_frequency, pan_left, pan_right, square35};
use crate::pipeline::voicemgr::Voice;
use std::f32::consts::TAU;

/// One operator of the two-operator voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatorParams {
    /// Frequency multiplier relative to the note frequency
    pub ratio: f32,
    /// Self-feedback amount (scaled by `FmVoiceParams::feedback_scale`)
    pub feedback: f32,
    /// How much of the 1/3/5 square is mixed onto the sine
    pub waveform: f32,
    /// Amplitude envelope of this operator
    pub envelope: EnvelopeSettings,
}

/// Parameters for the two-operator feedback FM voice
///
/// Operator 1 modulates operator 2; both can feed back into themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FmVoiceParams {
    pub op1: OperatorParams,
    pub op2: OperatorParams,
    /// Operator 1 -> operator 2 modulation; applied squared
    pub feed_forward: f32,
    pub feedback_scale: f32,
    pub output_scale: f32,
    pub pitch_envelope: EnvelopeSettings,
    /// Pitch envelope depth in semitones
    pub pitch_amount: f32,
    /// Vibrato rate in Hz
    pub vibrato_rate: f32,
    /// Vibrato depth in semitones
    pub vibrato_depth: f32,
    /// 0 ignores velocity, 1 scales amplitude linearly by velocity
    pub velocity_sensitivity: f32,
    pub master_level: f32,
}

impl Default for FmVoiceParams {
    fn default() -> Self {
        Self {
            op1: OperatorParams {
                ratio: 1.0,
                feedback: 0.2,
                waveform: 0.0,
                envelope: EnvelopeSettings::new(1.0, 200.0, 0.4, 200.0),
            },
            op2: OperatorParams {
                ratio: 1.0,
                feedback: 0.0,
                waveform: 0.0,
                envelope: EnvelopeSettings::new(2.0, 300.0, 0.7, 250.0),
            },
            feed_forward: 0.6,
            feedback_scale: 1.0,
            output_scale: 0.5,
            pitch_envelope: EnvelopeSettings::new(0.0, 50.0, 0.0, 0.0),
            pitch_amount: 0.0,
            vibrato_rate: 5.0,
            vibrato_depth: 0.0,
            velocity_sensitivity: 0.0,
            master_level: 0.5,
        }
    }
}

/// Per-note state of the two-operator feedback oscillator pair
///
/// Per sample:
/// 1. pitch = note + detune + pitch_env * pitch_amount + vibrato
/// 2. in1 = phase1 + feedback1 * feedback_scale * prev1
/// 3. out1 = (sin(in1) + square35(in1) * waveform1) * env1 * output_scale
/// 4. in2 = phase2 + feedback2 * feedback_scale * prev2 * output_scale + out1 * feed_forward^2
/// 5. out2 = (sin(in2) + square35(in2) * waveform2) * env2 * output_scale
/// 6. out2 * master_level is added to both channels through the pan law
///
/// Operator 2's envelope is the amplitude envelope: once it is finished
/// the voice goes inactive on the following sample.
#[derive(Debug, Clone)]
pub struct FmVoice {
    active: bool,
    note: u8,
    velocity: u8,
    detune: f32,
    pan: f32,

    phase1: f32,
    phase2: f32,
    prev1: f32,
    prev2: f32,
    vibrato_phase: f32,

    env1: EnvelopeGenerator,
    env2: EnvelopeGenerator,
    pitch_env: EnvelopeGenerator,

    sample_rate: f32,
}

impl FmVoice {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            active: false,
            note: 0,
            velocity: 0,
            detune: 0.0,
            pan: 0.5,
            phase1: 0.0,
            phase2: 0.0,
            prev1: 0.0,
            prev2: 0.0,
            vibrato_phase: 0.0,
            env1: EnvelopeGenerator::idle(sample_rate),
            env2: EnvelopeGenerator::idle(sample_rate),
            pitch_env: EnvelopeGenerator::idle(sample_rate),
            sample_rate,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.env1.set_sample_rate(sample_rate);
        self.env2.set_sample_rate(sample_rate);
        self.pitch_env.set_sample_rate(sample_rate);
    }

    /// Unison detune offset in semitones
    pub fn detune(&self) -> f32 {
        self.detune
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn amplitude_envelope(&self) -> &EnvelopeGenerator {
        &self.env2
    }
}

impl Voice for FmVoice {
    type Params = FmVoiceParams;

    fn is_active(&self) -> bool {
        self.active
    }

    fn note(&self) -> u8 {
        self.note
    }

    fn note_on(&mut self, params: &FmVoiceParams, note: u8, velocity: u8, detune: f32, pan: f32) {
        self.active = true;
        self.note = note;
        self.velocity = velocity;
        self.detune = detune;
        self.pan = pan;

        self.phase1 = 0.0;
        self.phase2 = 0.0;
        self.prev1 = 0.0;
        self.prev2 = 0.0;
        self.vibrato_phase = 0.0;

        self.env1.trigger(params.op1.envelope);
        self.env2.trigger(params.op2.envelope);
        self.pitch_env.trigger(params.pitch_envelope);
    }

    fn note_off(&mut self) {
        self.env1.note_off();
        self.env2.note_off();
        self.pitch_env.note_off();
    }

    fn run(&mut self, params: &FmVoiceParams, left: &mut [f32], right: &mut [f32]) {
        let inv_sr = 1.0 / self.sample_rate;
        let velocity_gain =
            1.0 - params.velocity_sensitivity * (1.0 - self.velocity as f32 / 127.0);
        let level = params.master_level * velocity_gain;
        let left_gain = pan_left(self.pan) * level;
        let right_gain = pan_right(self.pan) * level;

        let feedback1 = params.op1.feedback * params.feedback_scale;
        let feedback2 = params.op2.feedback * params.feedback_scale;
        let feed_forward = params.feed_forward * params.feed_forward;

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            if self.env2.state() == EnvelopeState::Finished {
                self.active = false;
                break;
            }

            let vibrato = self.vibrato_phase.sin() * params.vibrato_depth;
            let pitch = self.note as f32
                + self.detune
                + self.pitch_env.get_value() * params.pitch_amount
                + vibrato;
            let phase_step = TAU * note_to_frequency(pitch) * inv_sr;

            let in1 = self.phase1 + feedback1 * self.prev1;
            let out1 = (in1.sin() + square35(in1) * params.op1.waveform)
                * self.env1.get_value()
                * params.output_scale;

            let in2 = self.phase2
                + feedback2 * self.prev2 * params.output_scale
                + out1 * feed_forward;
            let out2 = (in2.sin() + square35(in2) * params.op2.waveform)
                * self.env2.get_value()
                * params.output_scale;

            self.prev1 = out1;
            self.prev2 = out2;

            *l += out2 * left_gain;
            *r += out2 * right_gain;

            // Phases stay in [0, TAU)
            self.phase1 = (self.phase1 + phase_step * params.op1.ratio).rem_euclid(TAU);
            self.phase2 = (self.phase2 + phase_step * params.op2.ratio).rem_euclid(TAU);
            self.vibrato_phase =
                (self.vibrato_phase + TAU * params.vibrato_rate * inv_sr).rem_euclid(TAU);

            self.env1.next();
            self.env2.next();
            self.pitch_env.next();
        }
    }
}
