use crate::playback::sink::{PcmSink, SinkError, BYTES_PER_FRAME, CD_SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig,
};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

const CD_CHANNELS: usize = 2;

const STREAM_OK: u8 = 0;
const STREAM_DEVICE_LOST: u8 = 1;
const STREAM_BACKEND_ERROR: u8 = 2;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No audio output device found")]
    DeviceNotFound,
    #[error("Stream configuration error: {0}")]
    StreamConfigError(String),
    #[error("Output device does not support {0} Hz playback")]
    UnsupportedSampleRate(u32),
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

/// State shared between the writer and the stream callback
struct StreamState {
    error: AtomicU8,
    underrun: AtomicBool,
    primed: AtomicBool,
    draining: AtomicBool,
    queued: AtomicUsize,
}

/// CD audio output through the default cpal device
///
/// Periods are queued on a bounded channel; `write_frames` blocks once the
/// queue is full, which paces the caller to the playback rate.
pub struct CpalSink {
    _stream: Stream,
    period_tx: SyncSender<Vec<i16>>,
    state: Arc<StreamState>,
    transfer_frames: usize,
    sample_rate: u32,
    period: Duration,
}

impl CpalSink {
    /// Open the default output device for 44.1 kHz stereo playback
    pub fn open(period_frames: usize, queue_periods: usize) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::DeviceNotFound)?;

        let supported = find_config(&device)?;
        let sample_format = supported.sample_format();
        let stream_config = StreamConfig::from(supported);

        info!(
            "Audio device: {} channels, {} Hz, {:?}",
            stream_config.channels, stream_config.sample_rate.0, sample_format
        );

        let (period_tx, period_rx) = mpsc::sync_channel(queue_periods.max(1));
        let state = Arc::new(StreamState {
            error: AtomicU8::new(STREAM_OK),
            underrun: AtomicBool::new(false),
            primed: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
        });

        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, period_rx, &state),
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, period_rx, &state),
            SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, period_rx, &state),
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, period_rx, &state),
            other => {
                return Err(AudioError::StreamConfigError(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        let period_frames = period_frames.max(1);
        Ok(Self {
            _stream: stream,
            period_tx,
            state,
            transfer_frames: period_frames,
            sample_rate: stream_config.sample_rate.0,
            period: Duration::from_secs_f64(period_frames as f64 / f64::from(CD_SAMPLE_RATE)),
        })
    }

    fn check_stream(&self) -> Result<(), SinkError> {
        match self.state.error.load(Ordering::Acquire) {
            STREAM_OK => {}
            STREAM_DEVICE_LOST => return Err(SinkError::BadState),
            _ => return Err(SinkError::Unknown),
        }
        if self.state.underrun.load(Ordering::Acquire) {
            return Err(SinkError::Underrun);
        }
        Ok(())
    }
}

impl PcmSink for CpalSink {
    fn transfer_frames(&self) -> usize {
        self.transfer_frames
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_frames(&mut self, data: &[u8], frames: usize) -> Result<usize, SinkError> {
        self.check_stream()?;

        let frames = frames.min(data.len() / BYTES_PER_FRAME);
        let samples: Vec<i16> = data[..frames * BYTES_PER_FRAME]
            .chunks_exact(2)
            .map(|s| i16::from_le_bytes([s[0], s[1]]))
            .collect();

        self.state.draining.store(false, Ordering::Release);
        self.state.queued.fetch_add(1, Ordering::AcqRel);
        if self.period_tx.send(samples).is_err() {
            self.state.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(SinkError::BadState);
        }
        Ok(frames)
    }

    fn resume(&mut self) -> Result<(), SinkError> {
        if self.state.error.load(Ordering::Acquire) != STREAM_OK {
            return Err(SinkError::BadState);
        }
        // Start over as if nothing had been written yet
        self.state.primed.store(false, Ordering::Release);
        self.state.underrun.store(false, Ordering::Release);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        self.state.draining.store(true, Ordering::Release);

        let queued = self.state.queued.load(Ordering::Acquire);
        let deadline = Instant::now() + self.period * (queued as u32 + 4) * 2;
        while self.state.queued.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                warn!("Audio drain timed out with {} periods queued", queued);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.check_stream().or_else(|e| match e {
            SinkError::Underrun => Ok(()),
            other => Err(other),
        })
    }
}

/// Pick an output configuration able to play 44.1 kHz, preferring stereo
fn find_config(device: &Device) -> Result<SupportedStreamConfig, AudioError> {
    let ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamConfigError(e.to_string()))?
        .filter(|range| {
            range.min_sample_rate().0 <= CD_SAMPLE_RATE && range.max_sample_rate().0 >= CD_SAMPLE_RATE
        })
        .collect();

    let best = ranges
        .iter()
        .find(|r| usize::from(r.channels()) == CD_CHANNELS && r.sample_format() == SampleFormat::I16)
        .or_else(|| {
            ranges
                .iter()
                .find(|r| usize::from(r.channels()) == CD_CHANNELS)
        })
        .or_else(|| ranges.first())
        .ok_or(AudioError::UnsupportedSampleRate(CD_SAMPLE_RATE))?;

    Ok(best.clone().with_sample_rate(SampleRate(CD_SAMPLE_RATE)))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    period_rx: Receiver<Vec<i16>>,
    state: &Arc<StreamState>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = usize::from(config.channels);
    let callback_state = Arc::clone(state);
    let error_state = Arc::clone(state);

    let mut pending: Vec<i16> = Vec::new();
    let mut pending_pos = 0usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    if pending_pos >= pending.len() {
                        if !pending.is_empty() {
                            callback_state.queued.fetch_sub(1, Ordering::AcqRel);
                            pending.clear();
                            pending_pos = 0;
                        }
                        match period_rx.try_recv() {
                            Ok(next) => {
                                pending = next;
                                pending_pos = 0;
                                callback_state.primed.store(true, Ordering::Release);
                            }
                            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                                if callback_state.primed.load(Ordering::Acquire)
                                    && !callback_state.draining.load(Ordering::Acquire)
                                {
                                    callback_state.underrun.store(true, Ordering::Release);
                                }
                                frame.fill(T::EQUILIBRIUM);
                                continue;
                            }
                        }
                    }

                    let left = pending[pending_pos];
                    let right = pending.get(pending_pos + 1).copied().unwrap_or(left);
                    pending_pos += CD_CHANNELS;

                    match frame {
                        [mono] => *mono = T::from_sample(((i32::from(left) + i32::from(right)) / 2) as i16),
                        [l, r, rest @ ..] => {
                            *l = T::from_sample(left);
                            *r = T::from_sample(right);
                            rest.fill(T::EQUILIBRIUM);
                        }
                        [] => {}
                    }
                }
            },
            move |err| {
                error!("Audio stream error: {:?}", err);
                let code = match err {
                    cpal::StreamError::DeviceNotAvailable => STREAM_DEVICE_LOST,
                    _ => STREAM_BACKEND_ERROR,
                };
                error_state.error.store(code, Ordering::Release);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}
