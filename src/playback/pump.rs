//! Drains a filled audio buffer into a [`PcmSink`]

use crate::playback::sink::{PcmSink, SinkError, BYTES_PER_FRAME};
use thiserror::Error;
use tracing::{debug, trace};

/// Consecutive zero-frame writes tolerated before giving up
pub const MAX_ZERO_WRITES: u32 = 64;

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("Sink write failed after {frames_written} frames: {kind}")]
    Sink {
        kind: SinkError,
        frames_written: usize,
    },
    #[error("Sink accepted no frames {attempts} times in a row after {frames_written} frames")]
    Stalled { attempts: u32, frames_written: usize },
}

impl PumpError {
    /// Frames of the buffer that reached the sink before the failure
    pub fn frames_written(&self) -> usize {
        match self {
            PumpError::Sink { frames_written, .. } | PumpError::Stalled { frames_written, .. } => {
                *frames_written
            }
        }
    }

    pub fn sink_error(&self) -> Option<SinkError> {
        match self {
            PumpError::Sink { kind, .. } => Some(*kind),
            PumpError::Stalled { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub frames_written: usize,
    pub writes: usize,
}

/// Write `data` to `sink` in transfer-unit slices
///
/// Full transfer units are handed over until less than one remains, then the
/// remainder. Partial accepts advance by the frames accepted. Sink errors are
/// returned with the position reached so the caller can resume from there.
pub fn pump<S: PcmSink + ?Sized>(sink: &mut S, data: &[u8]) -> Result<PumpStats, PumpError> {
    let unit = sink.transfer_frames().max(1);
    let total_frames = data.len() / BYTES_PER_FRAME;

    let mut stats = PumpStats::default();
    let mut zero_writes = 0;

    while stats.frames_written < total_frames {
        let frames = unit.min(total_frames - stats.frames_written);
        let start = stats.frames_written * BYTES_PER_FRAME;
        let slice = &data[start..start + frames * BYTES_PER_FRAME];

        let accepted = sink
            .write_frames(slice, frames)
            .map_err(|kind| PumpError::Sink {
                kind,
                frames_written: stats.frames_written,
            })?;
        stats.writes += 1;

        if accepted == 0 {
            zero_writes += 1;
            if zero_writes >= MAX_ZERO_WRITES {
                return Err(PumpError::Stalled {
                    attempts: zero_writes,
                    frames_written: stats.frames_written,
                });
            }
            continue;
        }
        zero_writes = 0;

        if accepted < frames {
            trace!("Sink accepted {} of {} frames", accepted, frames);
        }
        stats.frames_written += accepted.min(frames);
    }

    debug!(
        "Pumped {} frames in {} writes",
        stats.frames_written, stats.writes
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockSink, SinkStep};

    fn frames(n: usize) -> Vec<u8> {
        (0..n * BYTES_PER_FRAME).map(|i| i as u8).collect()
    }

    #[test]
    fn test_full_units_then_remainder() {
        let mut sink = MockSink::new(100);
        let requests = sink.requests();
        let written = sink.written();
        let data = frames(350);

        let stats = pump(&mut sink, &data).unwrap();

        assert_eq!(stats.frames_written, 350);
        assert_eq!(*requests.lock().unwrap(), vec![100, 100, 100, 50]);
        assert_eq!(*written.lock().unwrap(), data);
    }

    #[test]
    fn test_partial_accept_advances_by_accepted() {
        let mut sink = MockSink::new(100);
        sink.push_step(SinkStep::Accept(30));
        let requests = sink.requests();
        let written = sink.written();
        let data = frames(250);

        let stats = pump(&mut sink, &data).unwrap();

        assert_eq!(stats.frames_written, 250);
        assert_eq!(*requests.lock().unwrap(), vec![100, 100, 100, 20]);
        assert_eq!(*written.lock().unwrap(), data);
    }

    #[test]
    fn test_sink_error_is_returned_with_position() {
        let mut sink = MockSink::new(100);
        sink.push_step(SinkStep::Accept(100));
        sink.push_step(SinkStep::Fail(SinkError::Underrun));
        let requests = sink.requests();

        let err = pump(&mut sink, &frames(300)).unwrap_err();

        assert_eq!(err.sink_error(), Some(SinkError::Underrun));
        assert_eq!(err.frames_written(), 100);
        // No silent retry after the failure
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_every_sink_error_kind_surfaces() {
        for kind in [
            SinkError::BadState,
            SinkError::Underrun,
            SinkError::Suspended,
            SinkError::Unknown,
        ] {
            let mut sink = MockSink::new(16);
            sink.push_step(SinkStep::Fail(kind));
            let err = pump(&mut sink, &frames(32)).unwrap_err();
            assert_eq!(err.sink_error(), Some(kind));
        }
    }

    #[test]
    fn test_stalled_sink() {
        let mut sink = MockSink::new(10);
        for _ in 0..MAX_ZERO_WRITES {
            sink.push_step(SinkStep::Accept(0));
        }

        let err = pump(&mut sink, &frames(20)).unwrap_err();
        assert!(matches!(
            err,
            PumpError::Stalled {
                frames_written: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_buffer_writes_nothing() {
        let mut sink = MockSink::new(10);
        let requests = sink.requests();
        assert_eq!(pump(&mut sink, &[]).unwrap(), PumpStats::default());
        assert!(requests.lock().unwrap().is_empty());
    }
}
