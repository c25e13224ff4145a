//! Track playback: disc reads feeding the pump
//!
//! In pipelined mode a reader thread fills one chunk while the current one
//! plays. Two chunk buffers circulate between the threads over channels, so
//! neither side ever touches a buffer the other is using.

use crate::cd::ffi::SgDevice;
use crate::cd::reader::{AudioChunk, AudioCursor, AudioReadError, AudioReader};
use crate::cd::toc::{Toc, TrackDescriptor};
use crate::cd::transport::{ScsiDevice, Transport};
use crate::cd::SECTORS_PER_SECOND;
use crate::playback::pump::{pump, PumpError};
use crate::playback::sink::{PcmSink, SinkError, BYTES_PER_FRAME, CD_SAMPLE_RATE};
use std::sync::mpsc;
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Underrun recoveries allowed in a row without any frame getting through
pub const MAX_UNDERRUN_RECOVERIES: u32 = 8;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Track {track} is not on this disc (tracks {first}-{last})")]
    InvalidTrack { track: u8, first: u8, last: u8 },
    #[error(transparent)]
    Read(#[from] AudioReadError),
    #[error(transparent)]
    Pump(#[from] PumpError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("Sink kept underrunning after {0} recoveries")]
    UnderrunRecoveryFailed(u32),
    #[error("Audio reader thread panicked")]
    ReaderPanicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerOptions {
    /// Sectors per chunk handed to the pump
    pub chunk_sectors: u32,
    /// Read the next chunk on a separate thread while the current one plays
    pub pipeline: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            chunk_sectors: 2 * SECTORS_PER_SECOND,
            pipeline: true,
        }
    }
}

/// Summary of one playback run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub track: u8,
    pub start_sector: u32,
    /// First sector not played
    pub end_sector: u32,
    pub chunks: usize,
    pub frames_played: usize,
    pub underruns: u32,
}

/// Plays a disc from a chosen track through to the lead-out
pub struct Player<S: PcmSink, D: ScsiDevice = SgDevice> {
    transport: Transport<D>,
    sink: S,
    toc: Toc,
    reader: AudioReader,
    options: PlayerOptions,
}

impl<S: PcmSink, D: ScsiDevice> Player<S, D> {
    pub fn new(
        transport: Transport<D>,
        sink: S,
        toc: Toc,
        reader: AudioReader,
        options: PlayerOptions,
    ) -> Self {
        Self {
            transport,
            sink,
            toc,
            reader,
            options,
        }
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    pub fn into_parts(self) -> (Transport<D>, S) {
        (self.transport, self.sink)
    }

    /// Look up `track`, rejecting numbers outside the disc's track range
    pub fn validate_track(&self, track: u8) -> Result<&TrackDescriptor, PlayerError> {
        let invalid = PlayerError::InvalidTrack {
            track,
            first: self.toc.first_track(),
            last: self.toc.last_track(),
        };
        if track < self.toc.first_track() || track > self.toc.last_track() {
            return Err(invalid);
        }
        self.toc.track(track).ok_or(invalid)
    }
}

impl<S: PcmSink, D: ScsiDevice + Send> Player<S, D> {
    /// Play from the start of `track` to the end of the disc
    pub fn play_from_track(&mut self, track: u8) -> Result<PlaybackReport, PlayerError> {
        let start_sector = self.validate_track(track)?.start_sector;

        if self.sink.sample_rate() != CD_SAMPLE_RATE {
            warn!(
                "Sink runs at {} Hz, CD audio is {} Hz",
                self.sink.sample_rate(),
                CD_SAMPLE_RATE
            );
        }

        info!(
            "Playing from track {} (LBA {}) to lead-out at {}{}",
            track,
            start_sector,
            self.toc.leadout_sector(),
            if self.options.pipeline {
                ", pipelined"
            } else {
                ""
            }
        );

        let mut report = PlaybackReport {
            track,
            start_sector,
            end_sector: start_sector,
            ..PlaybackReport::default()
        };

        if self.options.pipeline {
            self.play_pipelined(&mut report)?;
        } else {
            self.play_sequential(&mut report)?;
        }

        self.sink.drain()?;
        info!(
            "Playback finished: {} chunks, {} frames, {} underruns",
            report.chunks, report.frames_played, report.underruns
        );
        Ok(report)
    }

    fn play_sequential(&mut self, report: &mut PlaybackReport) -> Result<(), PlayerError> {
        let mut cursor = AudioCursor::new(
            report.start_sector,
            self.toc.leadout_sector(),
            self.options.chunk_sectors,
        )?;
        let mut chunk = AudioChunk::with_capacity(self.options.chunk_sectors)?;

        while cursor.next_chunk(&self.reader, &mut self.transport, &mut chunk)? {
            play_chunk(&mut self.sink, &chunk, report)?;
        }
        Ok(())
    }

    fn play_pipelined(&mut self, report: &mut PlaybackReport) -> Result<(), PlayerError> {
        let mut cursor = AudioCursor::new(
            report.start_sector,
            self.toc.leadout_sector(),
            self.options.chunk_sectors,
        )?;

        let (filled_tx, filled_rx) = mpsc::sync_channel::<Result<AudioChunk, AudioReadError>>(1);
        let (free_tx, free_rx) = mpsc::sync_channel::<AudioChunk>(2);
        for _ in 0..2 {
            let chunk = AudioChunk::with_capacity(self.options.chunk_sectors)?;
            // Both ends are alive here
            let _ = free_tx.send(chunk);
        }

        let reader = self.reader;
        let transport = &mut self.transport;
        let sink = &mut self.sink;

        thread::scope(|scope| {
            let producer = scope.spawn(move || {
                for mut chunk in free_rx.iter() {
                    match cursor.next_chunk(&reader, transport, &mut chunk) {
                        Ok(true) => {
                            let finished = cursor.is_finished();
                            if filled_tx.send(Ok(chunk)).is_err() || finished {
                                break;
                            }
                        }
                        Ok(false) => break,
                        Err(e) => {
                            let _ = filled_tx.send(Err(e));
                            break;
                        }
                    }
                }
                debug!("Audio reader stopped at LBA {}", cursor.position());
            });

            let result = consume(sink, &filled_rx, &free_tx, report);

            // Unblock the reader whichever side it is waiting on
            drop(free_tx);
            drop(filled_rx);

            producer.join().map_err(|_| PlayerError::ReaderPanicked)?;
            result
        })
    }
}

fn consume<S: PcmSink>(
    sink: &mut S,
    filled_rx: &mpsc::Receiver<Result<AudioChunk, AudioReadError>>,
    free_tx: &mpsc::SyncSender<AudioChunk>,
    report: &mut PlaybackReport,
) -> Result<(), PlayerError> {
    for item in filled_rx.iter() {
        let chunk = item?;
        play_chunk(sink, &chunk, report)?;
        if free_tx.send(chunk).is_err() {
            break;
        }
    }
    Ok(())
}

/// Pump one chunk, resuming the sink after underruns
fn play_chunk<S: PcmSink>(
    sink: &mut S,
    chunk: &AudioChunk,
    report: &mut PlaybackReport,
) -> Result<(), PlayerError> {
    let data = chunk.data();
    let mut offset = 0;
    let mut stalled_recoveries = 0;

    loop {
        match pump(sink, &data[offset..]) {
            Ok(stats) => {
                report.frames_played += stats.frames_written;
                break;
            }
            Err(e) if e.sink_error() == Some(SinkError::Underrun) => {
                let frames = e.frames_written();
                report.frames_played += frames;
                report.underruns += 1;
                offset += frames * BYTES_PER_FRAME;

                if frames > 0 {
                    stalled_recoveries = 0;
                }
                stalled_recoveries += 1;
                if stalled_recoveries > MAX_UNDERRUN_RECOVERIES {
                    return Err(PlayerError::UnderrunRecoveryFailed(MAX_UNDERRUN_RECOVERIES));
                }

                warn!(
                    "Sink underrun at LBA {}, resuming",
                    chunk.start_sector() as usize + offset / crate::cd::SECTOR_SIZE
                );
                sink.resume()?;
            }
            Err(e) => {
                report.frames_played += e.frames_written();
                return Err(e.into());
            }
        }
    }

    report.chunks += 1;
    report.end_sector = chunk.end_sector();
    Ok(())
}
