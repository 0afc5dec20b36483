use super::{GeneratorState, SignalGenerator};

/// Stage times (milliseconds) and sustain level of an ADSR curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeSettings {
    /// Attack time in ms
    pub attack: f32,
    /// Decay time in ms
    pub decay: f32,
    /// Sustain level (0.0 to 1.0)
    pub sustain: f32,
    /// Release time in ms
    pub release: f32,
}

impl EnvelopeSettings {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack: attack.max(0.0),
            decay: decay.max(0.0),
            sustain: sustain.clamp(0.0, 1.0),
            release: release.max(0.0),
        }
    }
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self::new(2.0, 100.0, 0.7, 150.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// ADSR (Attack-Decay-Sustain-Release) envelope generator
///
/// A per-sample state machine:
/// 1. Attack: linear ramp 0.0 -> 1.0
/// 2. Decay: quadratic blend from 1.0 toward the sustain level
/// 3. Sustain: holds the sustain level until `note_off`
/// 4. Release: quadratic fade from the value held when release began
/// 5. Finished: 0.0 forever
///
/// Read the current value with [`get_value`](Self::get_value) and advance one
/// sample with [`next`](Self::next). `note_off` takes effect immediately, so a
/// caller that delivers it on the right sample gets a sample-accurate release.
///
/// # Example
/// ```
/// use sonare::generator::adsr::{EnvelopeGenerator, EnvelopeSettings, EnvelopeState};
///
/// let settings = EnvelopeSettings::new(10.0, 20.0, 0.5, 5.0);
/// let mut env = EnvelopeGenerator::new(settings, 44100.0);
/// assert_eq!(env.state(), EnvelopeState::Attack);
/// env.next();
/// assert!(env.get_value() > 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct EnvelopeGenerator {
    settings: EnvelopeSettings,
    /// Milliseconds per sample
    step: f32,

    state: EnvelopeState,
    /// Time in ms since the current stage began
    pos: f32,
    release_value: f32,
}

impl EnvelopeGenerator {
    /// Create an envelope already triggered (in Attack at position 0)
    pub fn new(settings: EnvelopeSettings, sample_rate: f32) -> Self {
        Self {
            settings,
            step: 1000.0 / sample_rate,
            state: EnvelopeState::Attack,
            pos: 0.0,
            release_value: 0.0,
        }
    }

    /// Create an envelope that stays silent until [`trigger`](Self::trigger)
    pub fn idle(sample_rate: f32) -> Self {
        Self {
            state: EnvelopeState::Finished,
            ..Self::new(EnvelopeSettings::default(), sample_rate)
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.step = 1000.0 / sample_rate;
    }

    pub fn settings(&self) -> &EnvelopeSettings {
        &self.settings
    }

    /// Restart from the beginning of Attack with new settings
    pub fn trigger(&mut self, settings: EnvelopeSettings) {
        self.settings = settings;
        self.state = EnvelopeState::Attack;
        self.pos = 0.0;
        self.release_value = 0.0;
    }

    /// Enter Release from whatever value the curve has right now
    ///
    /// Ignored once the envelope is already releasing or finished.
    pub fn note_off(&mut self) {
        match self.state {
            EnvelopeState::Attack | EnvelopeState::Decay | EnvelopeState::Sustain => {
                self.release_value = self.get_value();
                self.state = EnvelopeState::Release;
                self.pos = 0.0;
            }
            EnvelopeState::Release | EnvelopeState::Finished => {}
        }
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    /// Time in ms since the current stage began
    pub fn position(&self) -> f32 {
        self.pos
    }

    pub fn is_finished(&self) -> bool {
        self.state == EnvelopeState::Finished
    }

    /// Value of the curve at the current position
    pub fn get_value(&self) -> f32 {
        let s = &self.settings;
        match self.state {
            EnvelopeState::Attack => {
                if s.attack <= 0.0 {
                    1.0
                } else {
                    (self.pos / s.attack).min(1.0)
                }
            }
            EnvelopeState::Decay => {
                let f = squared_fall(self.pos, s.decay);
                f + s.sustain * (1.0 - f)
            }
            EnvelopeState::Sustain => s.sustain,
            EnvelopeState::Release => self.release_value * squared_fall(self.pos, s.release),
            EnvelopeState::Finished => 0.0,
        }
    }

    /// Advance one sample
    ///
    /// Time that overshoots the end of Attack is carried into Decay.
    pub fn next(&mut self) {
        let s = self.settings;
        match self.state {
            EnvelopeState::Attack => {
                self.pos += self.step;
                if self.pos >= s.attack {
                    self.pos -= s.attack;
                    self.state = EnvelopeState::Decay;
                    if self.pos >= s.decay {
                        self.state = EnvelopeState::Sustain;
                    }
                }
            }
            EnvelopeState::Decay => {
                self.pos += self.step;
                if self.pos >= s.decay {
                    self.state = EnvelopeState::Sustain;
                }
            }
            EnvelopeState::Sustain => {}
            EnvelopeState::Release => {
                self.pos += self.step;
                if self.pos >= s.release {
                    self.state = EnvelopeState::Finished;
                }
            }
            EnvelopeState::Finished => {}
        }
    }
}

/// (1 - pos/len)^2, clamped so an overshoot never climbs back up
#[inline]
fn squared_fall(pos: f32, len: f32) -> f32 {
    if len <= 0.0 {
        return 0.0;
    }
    let f = (1.0 - pos / len).max(0.0);
    f * f
}

impl SignalGenerator for EnvelopeGenerator {
    fn process(&mut self, buffer: &mut [f32]) -> GeneratorState {
        for sample in buffer.iter_mut() {
            *sample = self.get_value();
            self.next();
        }

        if self.is_finished() {
            GeneratorState::Complete
        } else {
            GeneratorState::Running
        }
    }

    fn is_complete(&self) -> bool {
        self.is_finished()
    }

    fn reset(&mut self) {
        self.trigger(self.settings);
    }
}
