//! Per-device synthesis pipeline
//!
//! Provides the machinery a synthesizing device runs on:
//! - Scheduler: sample-accurate delivery of note events into a block
//! - VoicePool: fixed-capacity voice allocation with unison spreading
//! - FmSynth: the built-in FM synthesizer device

pub mod scheduler;
pub mod synth;
pub mod voicemgr;

pub use scheduler::{EventScheduler, EventTarget, NoteEvent};
pub use synth::{encode_parameters, FmParam, FmSynth};
pub use voicemgr::{unison_spread, UnisonSettings, Voice, VoicePool};
