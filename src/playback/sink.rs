use thiserror::Error;

/// CD audio sample rate
pub const CD_SAMPLE_RATE: u32 = 44_100;

pub use crate::cd::BYTES_PER_FRAME;

/// Why a sink refused a write
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink is in a bad state")]
    BadState,
    #[error("Sink buffer underrun")]
    Underrun,
    #[error("Sink is suspended")]
    Suspended,
    #[error("Unknown sink error")]
    Unknown,
}

/// A paced PCM output accepting interleaved S16LE stereo frames
///
/// `write_frames` blocks while the sink's buffer is full; that blocking is
/// the only backpressure between disc reads and playback.
pub trait PcmSink {
    /// Frames the sink prefers per write
    fn transfer_frames(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Write up to `frames` frames from `data`, returning how many were accepted
    fn write_frames(&mut self, data: &[u8], frames: usize) -> Result<usize, SinkError>;

    /// Bring the sink back to a running state after an underrun
    fn resume(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Block until queued frames have been played
    fn drain(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: PcmSink + ?Sized> PcmSink for Box<S> {
    fn transfer_frames(&self) -> usize {
        (**self).transfer_frames()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn write_frames(&mut self, data: &[u8], frames: usize) -> Result<usize, SinkError> {
        (**self).write_frames(data, frames)
    }

    fn resume(&mut self) -> Result<(), SinkError> {
        (**self).resume()
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        (**self).drain()
    }
}
