//! Per-track render pass
//!
//! One call to [`Track::render`] runs, in order: note dispatch from the
//! track's lane, automation, buffer clear, receive mixing, the device chain
//! and the track volume. Buffers are sized once at construction; rendering
//! never allocates.

use std::sync::Arc;

use crate::engine::automation::AutomationCurve;
use crate::engine::device::{Device, INPUT_CHANNELS};
use crate::engine::song::{EventKind, MidiLane, Receive};

/// Cursor over a shared lane that turns delta times into absolute positions
struct LaneCursor {
    lane: Arc<MidiLane>,
    index: usize,
    /// Absolute sample position of `lane.events[index]`
    next_pos: u64,
}

impl LaneCursor {
    fn new(lane: Arc<MidiLane>) -> Self {
        let next_pos = lane.events.first().map_or(0, |e| e.delta_samples as u64);
        Self {
            lane,
            index: 0,
            next_pos,
        }
    }
}

/// Render state of one track
pub struct Track {
    volume: f32,
    receives: Vec<Receive>,
    chain: Vec<Box<dyn Device>>,
    lane: Option<LaneCursor>,
    automations: Vec<AutomationCurve>,
    /// Main stereo pair followed by the sidechain pair
    buffers: [Vec<f32>; INPUT_CHANNELS],
    /// Device output, swapped with the main pair after each device
    scratch: [Vec<f32>; 2],
    sample_rate: f32,
    last_sample_pos: u64,
}

impl Track {
    /// Create a track able to render blocks of up to `max_block_size` samples
    pub fn new(
        volume: f32,
        receives: Vec<Receive>,
        chain: Vec<Box<dyn Device>>,
        lane: Option<Arc<MidiLane>>,
        automations: Vec<AutomationCurve>,
        sample_rate: f32,
        max_block_size: usize,
    ) -> Self {
        Self {
            volume,
            receives,
            chain,
            lane: lane.map(LaneCursor::new),
            automations,
            buffers: std::array::from_fn(|_| vec![0.0; max_block_size]),
            scratch: std::array::from_fn(|_| vec![0.0; max_block_size]),
            sample_rate,
            last_sample_pos: 0,
        }
    }

    pub fn last_sample_pos(&self) -> u64 {
        self.last_sample_pos
    }

    /// Largest block this track can render
    pub fn max_block_size(&self) -> usize {
        self.scratch[0].len()
    }

    /// Main stereo output of the last render, `num_samples` long
    pub fn output(&self, num_samples: usize) -> [&[f32]; 2] {
        [&self.buffers[0][..num_samples], &self.buffers[1][..num_samples]]
    }

    /// Render one block
    ///
    /// `sender_output` returns the main output of a sending track; every
    /// sender must have finished this block before it is called.
    pub fn render<'s>(
        &mut self,
        num_samples: usize,
        sender_output: impl Fn(usize) -> [&'s [f32]; 2],
    ) {
        let n = num_samples;
        debug_assert!(n <= self.max_block_size());
        let block_end = self.last_sample_pos + n as u64;

        // Notes due inside this block, relative to its first sample
        if let Some(cursor) = &mut self.lane {
            while cursor.index < cursor.lane.events.len() && cursor.next_pos < block_end {
                let event = cursor.lane.events[cursor.index];
                let delta = (cursor.next_pos - self.last_sample_pos) as usize;
                for device in self.chain.iter_mut() {
                    match event.kind {
                        EventKind::NoteOn => device.note_on(event.note, event.velocity, delta),
                        EventKind::NoteOff => device.note_off(event.note, delta),
                    }
                }
                cursor.index += 1;
                if let Some(next) = cursor.lane.events.get(cursor.index) {
                    cursor.next_pos += next.delta_samples as u64;
                }
            }
        }

        for curve in self.automations.iter_mut() {
            if let Some(value) = curve.value_at(self.last_sample_pos) {
                if let Some(device) = self.chain.get_mut(curve.device()) {
                    device.set_param(curve.param(), value);
                }
            }
        }

        for buffer in self.buffers.iter_mut() {
            buffer[..n].fill(0.0);
        }

        for receive in &self.receives {
            let input = sender_output(receive.sending_track);
            let channel = receive.receiving_channel;
            for (side, source) in input.iter().enumerate() {
                let target = &mut self.buffers[channel + side][..n];
                for (t, s) in target.iter_mut().zip(source.iter()) {
                    *t += s * receive.volume;
                }
            }
        }

        let song_position = self.last_sample_pos as f64 / self.sample_rate as f64;
        for device in self.chain.iter_mut() {
            let [left, right, side_left, side_right] = &self.buffers;
            let [out_left, out_right] = &mut self.scratch;
            device.run(
                song_position,
                [&left[..n], &right[..n], &side_left[..n], &side_right[..n]],
                [&mut out_left[..n], &mut out_right[..n]],
            );
            std::mem::swap(&mut self.buffers[0], &mut self.scratch[0]);
            std::mem::swap(&mut self.buffers[1], &mut self.scratch[1]);
        }

        for buffer in self.buffers[..2].iter_mut() {
            for s in buffer[..n].iter_mut() {
                *s *= self.volume;
            }
        }

        self.last_sample_pos = block_end;
    }
}
