//! roomcast-audio – Lokale Audio-Wiedergabe
//!
//! Spielt die Live-Streams von Peers auf einem lokalen Ausgabegeraet ab:
//! - Frame-Normalisierung (Sample-Format, Layout) und Kanal-Anpassung
//! - Jitter Buffer mit fester Tiefe und Verdraengung der aeltesten Frames
//! - Geraeteauswahl mit Fallback auf das erste Ausgabegeraet
//! - Format-Fallback f32 -> i16 -> i32 -> i24
//! - Per-Peer Lautstaerke, Pause/Resume, Status
//! - Per-Peer Audio-Callbacks vor dem Jitter Buffer
//! - WAV-Aufnahme einzelner Tracks
//!
//! Der Treiber ist ueber [`AudioHost`] austauschbar. Mit dem Feature `cpal`
//! steht [`CpalHost`] fuer echte Geraete zur Verfuegung.

#[cfg(feature = "cpal")]
pub mod cpal_host;
pub mod device;
pub mod error;
pub mod frame;
pub mod jitter_buffer;
pub mod playback;
pub mod player;
pub mod recorder;

// Bequeme Re-Exporte der wichtigsten Typen
#[cfg(feature = "cpal")]
pub use cpal_host::CpalHost;
pub use device::{
    AudioHost, AusgabeWahl, DeviceManager, NullHost, OutputDevice, OutputStream, RenderCallback,
    SampleFormat, StreamConfig,
};
pub use error::{AudioError, AudioResult};
pub use frame::{
    adapt_channels, AudioFrame, AudioTrack, ChannelTrack, SampleData, TrackHandle, TrackKind,
};
pub use jitter_buffer::{JitterBuffer, JitterBufferStatistik};
pub use playback::{AudioCallback, CallbackSlot, Lautstaerke, PlaybackConfig, PlaybackPipeline};
pub use player::{AudioSystemStatus, LocalAudioPlayer, PeerAudioStatus, PlayerConfig};
pub use recorder::{AudioRecorder, AufnahmeInfo};
