//! In-memory song model and load-time validation
//!
//! A [`Song`] is what a loader hands to the renderer: devices, note lanes,
//! and tracks wired together by receives. [`Song::validate`] checks every
//! index and the shape of the routing graph once, so the render path can
//! assume a well-formed acyclic graph with a single master track.

use std::collections::HashSet;

use crate::engine::device::Device;
use crate::error::SongError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
}

/// A note event, delta-encoded against the previous event of its lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub note: u8,
    pub velocity: u8,
    /// Samples since the previous event (or the song start for the first)
    pub delta_samples: usize,
}

impl Event {
    pub fn note_on(delta_samples: usize, note: u8, velocity: u8) -> Self {
        Self {
            kind: EventKind::NoteOn,
            note,
            velocity,
            delta_samples,
        }
    }

    pub fn note_off(delta_samples: usize, note: u8) -> Self {
        Self {
            kind: EventKind::NoteOff,
            note,
            velocity: 0,
            delta_samples,
        }
    }
}

/// Ordered sequence of note events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MidiLane {
    pub events: Vec<Event>,
}

impl MidiLane {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Total length of the lane in samples
    pub fn duration(&self) -> usize {
        self.events.iter().map(|e| e.delta_samples).sum()
    }
}

/// Audio flowing from another track into this one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Receive {
    pub sending_track: usize,
    /// First channel of the receiving pair: 0 for main, 2 for sidechain
    pub receiving_channel: usize,
    pub volume: f32,
}

impl Receive {
    pub fn main(sending_track: usize, volume: f32) -> Self {
        Self {
            sending_track,
            receiving_channel: 0,
            volume,
        }
    }

    pub fn sidechain(sending_track: usize, volume: f32) -> Self {
        Self {
            sending_track,
            receiving_channel: 2,
            volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationPoint {
    /// Samples since the previous point (or the song start for the first)
    pub delta_samples: usize,
    pub value: f32,
}

/// Parameter curve driving one parameter of one device in a track's chain
#[derive(Debug, Clone, PartialEq)]
pub struct Automation {
    /// Position in the owning track's chain
    pub device: usize,
    pub param: usize,
    pub points: Vec<AutomationPoint>,
}

/// One track as described by the song
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDesc {
    pub volume: f32,
    pub receives: Vec<Receive>,
    /// Indices into [`Song::devices`], in chain order
    pub devices: Vec<usize>,
    pub midi_lane: Option<usize>,
    pub automations: Vec<Automation>,
}

impl Default for TrackDesc {
    fn default() -> Self {
        Self {
            volume: 1.0,
            receives: Vec::new(),
            devices: Vec::new(),
            midi_lane: None,
            automations: Vec::new(),
        }
    }
}

/// A device together with the parameter blob it is loaded with
pub struct SongDevice {
    pub device: Box<dyn Device>,
    pub parameters: Vec<u8>,
}

/// Everything needed to render a song
pub struct Song {
    pub sample_rate: f32,
    pub tempo: i32,
    /// Song length in seconds
    pub length: f64,
    pub devices: Vec<SongDevice>,
    pub midi_lanes: Vec<MidiLane>,
    pub tracks: Vec<TrackDesc>,
}

/// Routing facts derived by [`Song::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    /// The only track no other track receives from
    pub master: usize,
    /// Distinct sending tracks of each track
    pub dependencies: Vec<Vec<usize>>,
}

impl Song {
    pub fn new(sample_rate: f32, tempo: i32, length: f64) -> Self {
        Self {
            sample_rate,
            tempo,
            length,
            devices: Vec::new(),
            midi_lanes: Vec::new(),
            tracks: Vec::new(),
        }
    }

    /// Add a device and return its index
    pub fn add_device(&mut self, device: Box<dyn Device>, parameters: Vec<u8>) -> usize {
        self.devices.push(SongDevice { device, parameters });
        self.devices.len() - 1
    }

    /// Add a lane and return its index
    pub fn add_midi_lane(&mut self, lane: MidiLane) -> usize {
        self.midi_lanes.push(lane);
        self.midi_lanes.len() - 1
    }

    /// Add a track and return its index
    pub fn add_track(&mut self, track: TrackDesc) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    /// Check indices and the routing graph
    ///
    /// The graph must be acyclic and have exactly one sink, the master.
    /// With both holding, every track reaches the master.
    pub fn validate(&self) -> Result<Routing, SongError> {
        let count = self.tracks.len();
        if count == 0 {
            return Err(SongError::NoTracks);
        }

        let mut used_devices = HashSet::new();
        let mut dependencies = Vec::with_capacity(count);
        for (index, track) in self.tracks.iter().enumerate() {
            let mut senders: Vec<usize> = Vec::new();
            for receive in &track.receives {
                if receive.sending_track >= count {
                    return Err(SongError::SenderOutOfRange {
                        track: index,
                        sender: receive.sending_track,
                        count,
                    });
                }
                if receive.receiving_channel != 0 && receive.receiving_channel != 2 {
                    return Err(SongError::ChannelOutOfRange {
                        track: index,
                        channel: receive.receiving_channel,
                    });
                }
                if !senders.contains(&receive.sending_track) {
                    senders.push(receive.sending_track);
                }
            }

            for &device in &track.devices {
                if device >= self.devices.len() {
                    return Err(SongError::DeviceOutOfRange {
                        track: index,
                        device,
                        count: self.devices.len(),
                    });
                }
                if !used_devices.insert(device) {
                    return Err(SongError::DeviceShared { device });
                }
            }

            if let Some(lane) = track.midi_lane {
                if lane >= self.midi_lanes.len() {
                    return Err(SongError::LaneOutOfRange {
                        track: index,
                        lane,
                        count: self.midi_lanes.len(),
                    });
                }
            }

            for automation in &track.automations {
                if automation.device >= track.devices.len() {
                    return Err(SongError::AutomationOutOfRange {
                        track: index,
                        position: automation.device,
                        len: track.devices.len(),
                    });
                }
            }

            dependencies.push(senders);
        }

        check_acyclic(&dependencies)?;

        let mut is_sender = vec![false; count];
        for senders in &dependencies {
            for &s in senders {
                is_sender[s] = true;
            }
        }
        let sinks: Vec<usize> = (0..count).filter(|&t| !is_sender[t]).collect();
        match sinks.as_slice() {
            [master] => Ok(Routing {
                master: *master,
                dependencies,
            }),
            _ => Err(SongError::MasterCount { count: sinks.len() }),
        }
    }
}

/// Kahn's algorithm over sender -> receiver edges
fn check_acyclic(dependencies: &[Vec<usize>]) -> Result<(), SongError> {
    let count = dependencies.len();
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut receivers = vec![Vec::new(); count];
    for (track, senders) in dependencies.iter().enumerate() {
        for &s in senders {
            receivers[s].push(track);
        }
    }

    let mut ready: Vec<usize> = (0..count).filter(|&t| in_degree[t] == 0).collect();
    let mut visited = 0;
    while let Some(track) = ready.pop() {
        visited += 1;
        for &r in &receivers[track] {
            in_degree[r] -= 1;
            if in_degree[r] == 0 {
                ready.push(r);
            }
        }
    }

    if visited == count {
        Ok(())
    } else {
        let track = in_degree.iter().position(|&d| d > 0).unwrap_or(0);
        Err(SongError::Cycle { track })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::device::{INPUT_CHANNELS, OUTPUT_CHANNELS};

    struct Silence;

    impl Device for Silence {
        fn run(
            &mut self,
            _: f64,
            _: [&[f32]; INPUT_CHANNELS],
            outputs: [&mut [f32]; OUTPUT_CHANNELS],
        ) {
            for out in outputs {
                out.fill(0.0);
            }
        }
    }

    fn receiving(senders: &[usize]) -> TrackDesc {
        TrackDesc {
            receives: senders.iter().map(|&s| Receive::main(s, 1.0)).collect(),
            ..TrackDesc::default()
        }
    }

    fn song_with(tracks: Vec<TrackDesc>) -> Song {
        let mut song = Song::new(44100.0, 120, 1.0);
        song.tracks = tracks;
        song
    }

    #[test]
    fn test_valid_fan_in() {
        let song = song_with(vec![receiving(&[]), receiving(&[]), receiving(&[0, 1])]);
        let routing = song.validate().unwrap();
        assert_eq!(routing.master, 2);
        assert_eq!(routing.dependencies, vec![vec![], vec![], vec![0, 1]]);
    }

    #[test]
    fn test_master_need_not_be_last() {
        let song = song_with(vec![receiving(&[1, 2]), receiving(&[2]), receiving(&[])]);
        assert_eq!(song.validate().unwrap().master, 0);
    }

    #[test]
    fn test_duplicate_receives_are_one_dependency() {
        let mut master = receiving(&[0]);
        master.receives.push(Receive::sidechain(0, 0.5));
        let song = song_with(vec![receiving(&[]), master]);
        assert_eq!(song.validate().unwrap().dependencies[1], vec![0]);
    }

    #[test]
    fn test_single_track_is_master() {
        let song = song_with(vec![TrackDesc::default()]);
        assert_eq!(song.validate().unwrap().master, 0);
    }

    #[test]
    fn test_empty_song() {
        assert_eq!(song_with(vec![]).validate(), Err(SongError::NoTracks));
    }

    #[test]
    fn test_cycle_detected() {
        let song = song_with(vec![receiving(&[1]), receiving(&[0]), receiving(&[0])]);
        assert!(matches!(song.validate(), Err(SongError::Cycle { .. })));

        let song = song_with(vec![receiving(&[0])]);
        assert_eq!(song.validate(), Err(SongError::Cycle { track: 0 }));
    }

    #[test]
    fn test_two_sinks_rejected() {
        let song = song_with(vec![receiving(&[]), receiving(&[]), receiving(&[0])]);
        assert_eq!(song.validate(), Err(SongError::MasterCount { count: 2 }));
    }

    #[test]
    fn test_index_errors() {
        let song = song_with(vec![receiving(&[5])]);
        assert_eq!(
            song.validate(),
            Err(SongError::SenderOutOfRange {
                track: 0,
                sender: 5,
                count: 1
            })
        );

        let mut bad_channel = receiving(&[]);
        bad_channel.receives.push(Receive {
            sending_track: 0,
            receiving_channel: 1,
            volume: 1.0,
        });
        let song = song_with(vec![TrackDesc::default(), bad_channel]);
        assert_eq!(
            song.validate(),
            Err(SongError::ChannelOutOfRange {
                track: 1,
                channel: 1
            })
        );

        let song = song_with(vec![TrackDesc {
            midi_lane: Some(0),
            ..TrackDesc::default()
        }]);
        assert!(matches!(song.validate(), Err(SongError::LaneOutOfRange { .. })));

        let song = song_with(vec![TrackDesc {
            devices: vec![0],
            ..TrackDesc::default()
        }]);
        assert!(matches!(song.validate(), Err(SongError::DeviceOutOfRange { .. })));
    }

    #[test]
    fn test_shared_device_rejected() {
        let mut song = Song::new(44100.0, 120, 1.0);
        let device = song.add_device(Box::new(Silence), Vec::new());
        let a = song.add_track(TrackDesc {
            devices: vec![device],
            ..TrackDesc::default()
        });
        song.add_track(TrackDesc {
            devices: vec![device],
            receives: vec![Receive::main(a, 1.0)],
            ..TrackDesc::default()
        });
        assert_eq!(song.validate(), Err(SongError::DeviceShared { device }));
    }

    #[test]
    fn test_automation_position_checked() {
        let mut song = Song::new(44100.0, 120, 1.0);
        let device = song.add_device(Box::new(Silence), Vec::new());
        song.add_track(TrackDesc {
            devices: vec![device],
            automations: vec![Automation {
                device: 1,
                param: 0,
                points: vec![],
            }],
            ..TrackDesc::default()
        });
        assert_eq!(
            song.validate(),
            Err(SongError::AutomationOutOfRange {
                track: 0,
                position: 1,
                len: 1
            })
        );
    }

    #[test]
    fn test_lane_duration() {
        let lane = MidiLane::new(vec![
            Event::note_on(10, 60, 100),
            Event::note_off(20, 60),
        ]);
        assert_eq!(lane.duration(), 30);
    }
}
