//! Fixed-capacity voice pool for polyphonic synthesis
//!
//! Voices are claimed with a first-available scan over a preallocated array
//! and released implicitly when they clear their own `active` flag. Nothing
//! in here allocates after construction.

/// Per-note synthesis state that can be claimed from a [`VoicePool`]
pub trait Voice {
    /// Shared configuration handed to every voice on note-on and per block
    type Params;

    fn is_active(&self) -> bool;

    /// Note this voice was last started with
    fn note(&self) -> u8;

    /// Start a note
    ///
    /// # Arguments
    /// * `detune` - Unison detune offset in semitones
    /// * `pan` - Stereo position in [0, 1], 0.5 is center
    fn note_on(&mut self, params: &Self::Params, note: u8, velocity: u8, detune: f32, pan: f32);

    /// Enter release; the voice stays active until its amplitude envelope finishes
    fn note_off(&mut self);

    /// Add this voice's output into the two channel slices
    fn run(&mut self, params: &Self::Params, left: &mut [f32], right: &mut [f32]);
}

/// How many voices a single note spawns and how they are spread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnisonSettings {
    /// Voices per note (at least 1)
    pub voices: usize,
    /// Detune of the outermost voice in semitones
    pub detune: f32,
    /// Stereo width in [0, 1]; 0.5 collapses every voice to center
    pub pan: f32,
}

impl Default for UnisonSettings {
    fn default() -> Self {
        Self {
            voices: 1,
            detune: 0.0,
            pan: 0.5,
        }
    }
}

/// Detune and pan of voice `index` among `count` unison voices
///
/// With f = index / (count - 1) (0 for a single voice):
/// detune = f * detune, pan = (f - 0.5) * (2 * pan - 1) + 0.5
///
/// A lone voice sits at the center of the spread: no detune, pan 0.5.
pub fn unison_spread(index: usize, count: usize, detune: f32, pan: f32) -> (f32, f32) {
    if count <= 1 {
        return (0.0, 0.5);
    }
    let f = index as f32 / (count - 1) as f32;
    (f * detune, (f - 0.5) * (pan * 2.0 - 1.0) + 0.5)
}

/// Fixed-size pool of voices
pub struct VoicePool<V> {
    voices: Box<[V]>,
}

impl<V: Voice> VoicePool<V> {
    /// Create a pool of `capacity` voices, each built by `make`
    ///
    /// # Example
    /// ```
    /// use sonare::generator::FmVoice;
    /// use sonare::pipeline::VoicePool;
    ///
    /// let pool = VoicePool::new(8, |_| FmVoice::new(44100.0));
    /// assert_eq!(pool.capacity(), 8);
    /// assert_eq!(pool.active_count(), 0);
    /// ```
    pub fn new(capacity: usize, make: impl FnMut(usize) -> V) -> Self {
        Self {
            voices: (0..capacity).map(make).collect(),
        }
    }

    /// Claim up to `unison.voices` inactive voices for a note
    ///
    /// The spread is always computed over the requested voice count, so a
    /// nearly full pool plays the first voices of the spread and drops the
    /// rest rather than re-centering them.
    ///
    /// # Returns
    /// Number of voices actually started
    pub fn note_on(
        &mut self,
        params: &V::Params,
        note: u8,
        velocity: u8,
        unison: &UnisonSettings,
    ) -> usize {
        let requested = unison.voices.max(1);
        let mut claimed = 0;
        for voice in self.voices.iter_mut() {
            if claimed == requested {
                break;
            }
            if voice.is_active() {
                continue;
            }
            let (detune, pan) = unison_spread(claimed, requested, unison.detune, unison.pan);
            voice.note_on(params, note, velocity, detune, pan);
            claimed += 1;
        }
        claimed
    }

    /// Release every active voice playing `note`
    pub fn note_off(&mut self, note: u8) {
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.note() == note {
                voice.note_off();
            }
        }
    }

    /// Release every active voice
    pub fn all_notes_off(&mut self) {
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.note_off();
        }
    }

    /// Mix all active voices into the channel slices
    pub fn run(&mut self, params: &V::Params, left: &mut [f32], right: &mut [f32]) {
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.run(params, left, right);
        }
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn voices(&self) -> &[V] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [V] {
        &mut self.voices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    /// Voice that records how it was started and dies after `life` samples of release
    #[derive(Default)]
    struct TestVoice {
        active: bool,
        releasing: bool,
        note: u8,
        detune: f32,
        pan: f32,
        release_left: usize,
    }

    impl Voice for TestVoice {
        type Params = usize;

        fn is_active(&self) -> bool {
            self.active
        }

        fn note(&self) -> u8 {
            self.note
        }

        fn note_on(&mut self, _: &usize, note: u8, _: u8, detune: f32, pan: f32) {
            self.active = true;
            self.releasing = false;
            self.note = note;
            self.detune = detune;
            self.pan = pan;
        }

        fn note_off(&mut self) {
            self.releasing = true;
        }

        fn run(&mut self, life: &usize, left: &mut [f32], right: &mut [f32]) {
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                if self.releasing {
                    if self.release_left == 0 {
                        self.release_left = *life;
                    }
                    self.release_left -= 1;
                    if self.release_left == 0 {
                        self.active = false;
                        break;
                    }
                }
                *l += 1.0;
                *r += 1.0;
            }
        }
    }

    fn pool(capacity: usize) -> VoicePool<TestVoice> {
        VoicePool::new(capacity, |_| TestVoice::default())
    }

    #[test]
    fn test_single_voice_is_centered() {
        let mut pool = pool(8);
        let unison = UnisonSettings {
            voices: 1,
            detune: 0.4,
            pan: 1.0,
        };
        assert_eq!(pool.note_on(&4, 60, 100, &unison), 1);
        assert_eq!(pool.active_count(), 1);
        let voice = &pool.voices()[0];
        assert_eq!(voice.detune, 0.0);
        assert_eq!(voice.pan, 0.5);
    }

    #[test]
    fn test_unison_spread_values() {
        let mut pool = pool(8);
        let unison = UnisonSettings {
            voices: 3,
            detune: 0.2,
            pan: 1.0,
        };
        assert_eq!(pool.note_on(&4, 60, 100, &unison), 3);
        let voices = pool.voices();
        assert_abs_diff_eq!(voices[0].detune, 0.0);
        assert_abs_diff_eq!(voices[1].detune, 0.1);
        assert_abs_diff_eq!(voices[2].detune, 0.2);
        assert_abs_diff_eq!(voices[0].pan, 0.0);
        assert_abs_diff_eq!(voices[1].pan, 0.5);
        assert_abs_diff_eq!(voices[2].pan, 1.0);
    }

    #[test]
    fn test_exhausted_pool_claims_what_is_free() {
        let mut pool = pool(4);
        let unison = UnisonSettings {
            voices: 6,
            ..UnisonSettings::default()
        };
        assert_eq!(pool.note_on(&4, 60, 100, &unison), 4);
        assert_eq!(pool.active_count(), 4);

        // Nothing left for the next note
        assert_eq!(pool.note_on(&4, 64, 100, &UnisonSettings::default()), 0);
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn test_first_available_scan_skips_active() {
        let mut pool = pool(4);
        pool.note_on(&4, 60, 100, &UnisonSettings::default());
        pool.note_on(&4, 62, 100, &UnisonSettings::default());
        assert_eq!(pool.voices()[0].note, 60);
        assert_eq!(pool.voices()[1].note, 62);
        assert!(!pool.voices()[2].is_active());
    }

    #[test]
    fn test_note_off_releases_only_matching() {
        let mut pool = pool(4);
        let unison = UnisonSettings {
            voices: 2,
            ..UnisonSettings::default()
        };
        pool.note_on(&4, 60, 100, &unison);
        pool.note_on(&4, 67, 100, &UnisonSettings::default());

        pool.note_off(60);
        // Releasing does not deactivate
        assert_eq!(pool.active_count(), 3);
        assert!(pool.voices()[0].releasing);
        assert!(pool.voices()[1].releasing);
        assert!(!pool.voices()[2].releasing);

        let mut left = vec![0.0f32; 16];
        let mut right = vec![0.0f32; 16];
        pool.run(&4, &mut left, &mut right);
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn test_released_voice_is_reused() {
        let mut pool = pool(1);
        pool.note_on(&2, 60, 100, &UnisonSettings::default());
        pool.all_notes_off();
        let mut left = vec![0.0f32; 8];
        let mut right = vec![0.0f32; 8];
        pool.run(&2, &mut left, &mut right);
        assert_eq!(pool.active_count(), 0);

        assert_eq!(pool.note_on(&2, 72, 100, &UnisonSettings::default()), 1);
        assert_eq!(pool.voices()[0].note, 72);
    }

    #[test]
    fn test_run_mixes_all_active() {
        let mut pool = pool(4);
        let unison = UnisonSettings {
            voices: 3,
            ..UnisonSettings::default()
        };
        pool.note_on(&4, 60, 100, &unison);
        let mut left = vec![0.0f32; 4];
        let mut right = vec![0.0f32; 4];
        pool.run(&4, &mut left, &mut right);
        assert_eq!(left, vec![3.0; 4]);
        assert_eq!(right, vec![3.0; 4]);
    }

    proptest! {
        #[test]
        fn prop_spread_stays_in_range(
            count in 1usize..16,
            detune in 0.0f32..2.0,
            pan in 0.0f32..=1.0,
        ) {
            for index in 0..count {
                let (d, p) = unison_spread(index, count, detune, pan);
                prop_assert!(d >= 0.0 && d <= detune + 1e-6);
                prop_assert!((-1e-6..=1.0 + 1e-6).contains(&p));
            }
        }

        #[test]
        fn prop_claims_min_of_free_and_requested(capacity in 1usize..16, voices in 1usize..24) {
            let mut pool = pool(capacity);
            let unison = UnisonSettings { voices, ..UnisonSettings::default() };
            let claimed = pool.note_on(&4, 60, 100, &unison);
            prop_assert_eq!(claimed, voices.min(capacity));
            prop_assert_eq!(pool.active_count(), claimed);
        }
    }
}
