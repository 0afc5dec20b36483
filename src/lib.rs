//! Sample-accurate multi-threaded song renderer
//!
//! A [`Song`] describes devices, note lanes and tracks routed into a single
//! master track. [`SongRenderer`] renders it block by block across a small
//! pool of worker threads and mixes the master down to interleaved 16-bit
//! stereo.

pub mod config;
pub mod denormal;
pub mod engine;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod wav;

pub use config::EngineConfig;
pub use engine::{Device, Receive, Song, SongRenderer, TrackDesc};
pub use error::{Error, Result, SongError};
