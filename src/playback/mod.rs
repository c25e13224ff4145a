#[cfg(any(target_os = "macos", target_os = "linux", target_os = "windows"))]
pub mod cpal_output;
pub mod player;
pub mod pump;
pub mod sink;

#[cfg(any(target_os = "macos", target_os = "linux", target_os = "windows"))]
pub use cpal_output::{AudioError, CpalSink};
pub use player::{PlaybackReport, Player, PlayerError, PlayerOptions};
pub use pump::{pump, PumpError, PumpStats};
pub use sink::{PcmSink, SinkError, BYTES_PER_FRAME, CD_SAMPLE_RATE};
