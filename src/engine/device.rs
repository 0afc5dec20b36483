//! Device capability interface
//!
//! A device is a synthesizer or effect sitting at one position of a track's
//! chain. It owns all of its DSP state and is only ever driven by the thread
//! currently rendering its track.

/// Channels a device reads: the track's main stereo pair followed by the
/// sidechain pair
pub const INPUT_CHANNELS: usize = 4;

/// Channels a device writes: one stereo pair
pub const OUTPUT_CHANNELS: usize = 2;

/// Uniform control and render interface of every device in a chain
///
/// Everything except `run` has a default that ignores the call, so simple
/// effects only implement what they use.
pub trait Device: Send {
    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    fn set_tempo(&mut self, _tempo: i32) {}

    /// Load a serialized parameter blob
    fn set_parameters(&mut self, _data: &[u8]) {}

    /// Set a single parameter, used by automation
    fn set_param(&mut self, _index: usize, _value: f32) {}

    fn get_param(&self, _index: usize) -> f32 {
        0.0
    }

    /// Schedule a note start `delta_samples` into the next `run`
    fn note_on(&mut self, _note: u8, _velocity: u8, _delta_samples: usize) {}

    /// Schedule a note release `delta_samples` into the next `run`
    fn note_off(&mut self, _note: u8, _delta_samples: usize) {}

    /// Render one block
    ///
    /// Every input and output slice has the same length, the number of
    /// samples in this block. Outputs hold garbage on entry; a device must
    /// write every output sample.
    ///
    /// # Arguments
    /// * `song_position` - Song time in seconds at the first sample
    fn run(
        &mut self,
        song_position: f64,
        inputs: [&[f32]; INPUT_CHANNELS],
        outputs: [&mut [f32]; OUTPUT_CHANNELS],
    );
}
