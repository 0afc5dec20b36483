//! Song rendering engine
//!
//! - Song: in-memory model and load-time validation
//! - Track: per-track render pass (notes, automation, receives, chain, volume)
//! - TrackGraph: lock-free dependency scheduling of track renders
//! - SongRenderer: worker threads, chunked rendering and mixdown

pub mod automation;
pub mod device;
pub mod mixdown;
pub mod parallel;
pub mod renderer;
pub mod song;
pub mod track;

pub use automation::AutomationCurve;
pub use device::{Device, INPUT_CHANNELS, OUTPUT_CHANNELS};
pub use mixdown::mixdown;
pub use parallel::{TrackGraph, TrackRenderState};
pub use renderer::SongRenderer;
pub use song::{
    Automation, AutomationPoint, Event, EventKind, MidiLane, Receive, Routing, Song, SongDevice,
    TrackDesc,
};
pub use track::Track;
