use crate::cd::reader::{AudioReader, DEFAULT_BATCH_SECTORS};
use crate::cd::SECTORS_PER_SECOND;
use crate::playback::PlayerOptions;
use std::collections::HashMap;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    File(#[from] dotenvy::Error),
}

/// Application configuration
///
/// In debug builds a `.env` file in the working directory is loaded first.
/// Every value can be overridden through `CDPLAY_*` environment variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// SCSI generic device of the drive
    pub device_path: PathBuf,
    /// Timeout for TOC and READ CD commands
    pub timeout_ms: u32,
    /// Timeout for the CD-Text read, which some drives answer slowly
    pub cd_text_timeout_ms: u32,
    /// Sectors per READ CD command
    pub batch_sectors: u32,
    /// Seconds of audio per chunk handed to the sink
    pub chunk_seconds: u32,
    /// CD-Text block selected after reading
    pub cd_text_block: u8,
    pub verify_cd_text_crc: bool,
    /// Read ahead on a separate thread during playback
    pub pipeline: bool,
    /// Frames per sink write
    pub period_frames: usize,
    /// Periods the sink may queue before writes block
    pub queue_periods: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/sg0"),
            timeout_ms: 5_000,
            cd_text_timeout_ms: 10_000,
            batch_sectors: DEFAULT_BATCH_SECTORS,
            chunk_seconds: 2,
            cd_text_block: 0,
            verify_cd_text_crc: false,
            pipeline: true,
            period_frames: 1024,
            queue_periods: 8,
        }
    }
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Config: Dev mode activated - loaded .env file");
            } else {
                debug!("Config: No .env file found");
            }
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a dotenv-style file without touching the
    /// process environment
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let mut vars = HashMap::new();
        for item in dotenvy::from_path_iter(path)? {
            let (key, value) = item?;
            vars.insert(key, value);
        }
        Ok(Self::from_lookup(|key| vars.get(key).cloned()))
    }

    /// Build a config from an arbitrary key lookup, using defaults for
    /// missing or invalid values
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let device_path = lookup("CDPLAY_DEVICE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.device_path);

        let config = Self {
            device_path,
            timeout_ms: parse_in(&lookup, "CDPLAY_TIMEOUT_MS", defaults.timeout_ms, 1..=u32::MAX),
            cd_text_timeout_ms: parse_in(
                &lookup,
                "CDPLAY_CDTEXT_TIMEOUT_MS",
                defaults.cd_text_timeout_ms,
                1..=u32::MAX,
            ),
            batch_sectors: parse_in(
                &lookup,
                "CDPLAY_BATCH_SECTORS",
                defaults.batch_sectors,
                1..=crate::cd::cdb::MAX_TRANSFER_LENGTH,
            ),
            chunk_seconds: parse_in(&lookup, "CDPLAY_CHUNK_SECONDS", defaults.chunk_seconds, 1..=60),
            cd_text_block: parse_in(
                &lookup,
                "CDPLAY_CDTEXT_BLOCK",
                defaults.cd_text_block,
                0..=crate::cd::cdtext::MAX_BLOCK,
            ),
            verify_cd_text_crc: parse_bool(
                &lookup,
                "CDPLAY_VERIFY_CDTEXT_CRC",
                defaults.verify_cd_text_crc,
            ),
            pipeline: parse_bool(&lookup, "CDPLAY_PIPELINE", defaults.pipeline),
            period_frames: parse_in(
                &lookup,
                "CDPLAY_PERIOD_FRAMES",
                defaults.period_frames,
                1..=1 << 20,
            ),
            queue_periods: parse_in(
                &lookup,
                "CDPLAY_QUEUE_PERIODS",
                defaults.queue_periods,
                1..=1024,
            ),
        };

        debug!("Config: {:?}", config);
        config
    }

    /// Sectors per playback chunk
    pub fn chunk_sectors(&self) -> u32 {
        self.chunk_seconds * SECTORS_PER_SECOND
    }

    pub fn audio_reader(&self) -> AudioReader {
        AudioReader::new(self.batch_sectors, self.timeout_ms)
    }

    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            chunk_sectors: self.chunk_sectors(),
            pipeline: self.pipeline,
        }
    }
}

fn parse_in<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    range: RangeInclusive<T>,
) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => value,
        Ok(value) => {
            warn!(
                "Config: {}={} outside {}..={}, using {}",
                key,
                value,
                range.start(),
                range.end(),
                default
            );
            default
        }
        Err(_) => {
            warn!("Config: invalid {}={:?}, using {}", key, raw, default);
            default
        }
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            warn!("Config: invalid {}={:?}, using {}", key, raw, default);
            default
        }
    }
}
