//! Error types

use thiserror::Error;

/// Malformed song data, found when a song is loaded
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SongError {
    #[error("song has no tracks")]
    NoTracks,

    #[error("track {track}: receive from track {sender}, but the song has {count} tracks")]
    SenderOutOfRange {
        track: usize,
        sender: usize,
        count: usize,
    },

    #[error("track {track}: receive into channel {channel}, expected 0 (main) or 2 (sidechain)")]
    ChannelOutOfRange { track: usize, channel: usize },

    #[error("track {track}: device {device} does not exist ({count} devices)")]
    DeviceOutOfRange {
        track: usize,
        device: usize,
        count: usize,
    },

    #[error("device {device} is used by more than one chain position")]
    DeviceShared { device: usize },

    #[error("track {track}: midi lane {lane} does not exist ({count} lanes)")]
    LaneOutOfRange {
        track: usize,
        lane: usize,
        count: usize,
    },

    #[error("track {track}: automation targets chain position {position}, chain has {len} devices")]
    AutomationOutOfRange {
        track: usize,
        position: usize,
        len: usize,
    },

    #[error("routing graph has a cycle through track {track}")]
    Cycle { track: usize },

    #[error("expected exactly one master track, found {count}")]
    MasterCount { count: usize },
}

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid song: {0}")]
    Song(#[from] SongError),

    #[error("failed to spawn render worker: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("wav output: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
