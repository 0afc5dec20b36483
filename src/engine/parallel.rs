//! Lock-free dependency scheduling of track renders
//!
//! Every track carries an atomic [`TrackRenderState`]. Contexts scan the
//! track list for an Idle track whose senders are all Finished, claim it
//! with a compare-and-swap to Rendering, render it and publish Finished with
//! a release store. The acquire loads in the readiness check pair with that
//! store, so a receiver always sees its senders' completed buffers.

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::trace;

use crate::engine::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackRenderState {
    Idle = 0,
    Rendering = 1,
    Finished = 2,
}

impl TrackRenderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TrackRenderState::Idle,
            1 => TrackRenderState::Rendering,
            _ => TrackRenderState::Finished,
        }
    }
}

/// Tracks of a song plus the state tags that coordinate access to them
pub struct TrackGraph {
    tracks: Box<[UnsafeCell<Track>]>,
    states: Box<[AtomicU8]>,
    dependencies: Vec<Vec<usize>>,
    master: usize,
}

// SAFETY: a track is only mutated by the context whose CAS moved it from
// Idle to Rendering, and only read by others after its Finished store has
// been observed with acquire ordering.
unsafe impl Sync for TrackGraph {}

impl TrackGraph {
    /// `dependencies[i]` lists the senders of track `i`; the graph must be
    /// acyclic with `master` as its only sink, or [`work`](Self::work) never
    /// returns.
    pub fn new(tracks: Vec<Track>, dependencies: Vec<Vec<usize>>, master: usize) -> Self {
        let states = tracks
            .iter()
            .map(|_| AtomicU8::new(TrackRenderState::Idle as u8))
            .collect();
        Self {
            tracks: tracks.into_iter().map(UnsafeCell::new).collect(),
            states,
            dependencies,
            master,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn master(&self) -> usize {
        self.master
    }

    pub fn state(&self, track: usize) -> TrackRenderState {
        TrackRenderState::from_u8(self.states[track].load(Ordering::Acquire))
    }

    /// Set every track back to Idle for a new pass
    ///
    /// # Safety
    /// No context may be inside [`work`](Self::work) and no reference
    /// returned by [`finished_output`](Self::finished_output) may be alive.
    pub unsafe fn reset(&self) {
        for state in self.states.iter() {
            state.store(TrackRenderState::Idle as u8, Ordering::Relaxed);
        }
    }

    fn is_ready(&self, track: usize) -> bool {
        self.dependencies[track]
            .iter()
            .all(|&s| self.state(s) == TrackRenderState::Finished)
    }

    /// Render `track` if it is Idle, its senders are Finished, and this
    /// context wins the claim
    pub fn try_render(&self, track: usize, num_samples: usize) -> bool {
        if self.state(track) != TrackRenderState::Idle || !self.is_ready(track) {
            return false;
        }
        if self.states[track]
            .compare_exchange(
                TrackRenderState::Idle as u8,
                TrackRenderState::Rendering as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return false;
        }

        // SAFETY: the CAS above makes this context the only one touching
        // `track` until it stores Finished. Senders are Finished, so nobody
        // writes them for the rest of the pass.
        let target = unsafe { &mut *self.tracks[track].get() };
        target.render(num_samples, |sender| unsafe {
            (*self.tracks[sender].get()).output(num_samples)
        });

        self.states[track].store(TrackRenderState::Finished as u8, Ordering::Release);
        trace!(track, num_samples, "track finished");
        true
    }

    /// Render ready tracks until the master is Finished
    ///
    /// Busy-polls; a pass over a fixed block is short and bounded.
    pub fn work(&self, num_samples: usize) {
        while self.state(self.master) != TrackRenderState::Finished {
            for track in 0..self.tracks.len() {
                self.try_render(track, num_samples);
            }
            hint::spin_loop();
        }
    }

    /// Output of a track that finished in the current pass
    pub fn finished_output(&self, track: usize, num_samples: usize) -> Option<[&[f32]; 2]> {
        if self.state(track) != TrackRenderState::Finished {
            return None;
        }
        // SAFETY: Finished tracks are not written again until `reset`.
        Some(unsafe { (*self.tracks[track].get()).output(num_samples) })
    }
}
