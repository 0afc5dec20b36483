pub mod adsr;
pub mod fm_synth;

pub use adsr::{EnvelopeGenerator, EnvelopeSettings, EnvelopeState};
pub use fm_synth::{FmVoice, FmVoiceParams, OperatorParams};

/// Represents the current state of a signal generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Generator is still producing samples
    Running,
    /// Generator has completed and will produce no more samples
    Complete,
}

/// Core trait for block-oriented signal generators
///
/// Generators produce samples frame by frame. The frame length is the
/// length of the slice handed to `process`, so callers that need an event
/// to land on an exact sample split the frame at that sample.
pub trait SignalGenerator {
    /// Process the next frame of samples
    ///
    /// # Returns
    /// * `GeneratorState::Running` if the generator is still active
    /// * `GeneratorState::Complete` if the generator has finished
    ///
    /// Even when Complete is returned the whole buffer is filled with
    /// valid samples (zeros once finished).
    fn process(&mut self, buffer: &mut [f32]) -> GeneratorState;

    /// Check if this generator has completed
    fn is_complete(&self) -> bool;

    /// Reset the generator to its initial state
    fn reset(&mut self);
}

/// MIDI note number (fractional notes allowed) to frequency in Hz, A4 = 440 Hz.
#[inline]
pub fn note_to_frequency(note: f32) -> f32 {
    440.0 * 2f32.powf((note - 69.0) / 12.0)
}

/// Left channel gain for a pan position in [0, 1] (0.5 = center).
#[inline]
pub fn pan_left(pan: f32) -> f32 {
    (1.0 - pan.clamp(0.0, 1.0)).sqrt()
}

/// Right channel gain for a pan position in [0, 1] (0.5 = center).
#[inline]
pub fn pan_right(pan: f32) -> f32 {
    pan.clamp(0.0, 1.0).sqrt()
}

/// Square approximation built from the 1st, 3rd and 5th odd harmonics.
///
/// `phase` is in radians. Stays bounded (peak ~1.07) so it can be mixed
/// onto a sine without blowing up operator feedback.
#[inline]
pub fn square35(phase: f32) -> f32 {
    phase.sin() + (phase * 3.0).sin() / 3.0 + (phase * 5.0).sin() / 5.0
}
