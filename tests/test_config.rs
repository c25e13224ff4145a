mod support;

use std::io::Write;
use std::path::PathBuf;

use crate::support::tracing_init;
use cdplay::Config;
use tempfile::NamedTempFile;

#[test]
fn test_config_from_env_file() {
    tracing_init();

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# drive on the second SCSI generic node").unwrap();
    writeln!(file, "CDPLAY_DEVICE=/dev/sg1").unwrap();
    writeln!(file, "CDPLAY_TIMEOUT_MS=8000").unwrap();
    writeln!(file, "CDPLAY_CDTEXT_BLOCK=1").unwrap();
    writeln!(file, "CDPLAY_PIPELINE=false").unwrap();
    writeln!(file, "CDPLAY_QUEUE_PERIODS=4").unwrap();
    file.flush().unwrap();

    let config = Config::from_env_file(file.path()).unwrap();

    assert_eq!(config.device_path, PathBuf::from("/dev/sg1"));
    assert_eq!(config.timeout_ms, 8000);
    assert_eq!(config.cd_text_block, 1);
    assert!(!config.pipeline);
    assert_eq!(config.queue_periods, 4);
    // Unset keys keep their defaults
    assert_eq!(config.batch_sectors, 27);
    assert_eq!(config.chunk_sectors(), 150);
    assert_eq!(config.cd_text_timeout_ms, 10_000);
}

#[test]
fn test_invalid_entries_use_defaults() {
    tracing_init();

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "CDPLAY_BATCH_SECTORS=lots").unwrap();
    writeln!(file, "CDPLAY_CHUNK_SECONDS=0").unwrap();
    writeln!(file, "CDPLAY_VERIFY_CDTEXT_CRC=sometimes").unwrap();
    file.flush().unwrap();

    let config = Config::from_env_file(file.path()).unwrap();
    let defaults = Config::default();

    assert_eq!(config.batch_sectors, defaults.batch_sectors);
    assert_eq!(config.chunk_seconds, defaults.chunk_seconds);
    assert_eq!(config.verify_cd_text_crc, defaults.verify_cd_text_crc);
}

#[test]
fn test_missing_file_is_an_error() {
    tracing_init();

    let dir = tempfile::tempdir().unwrap();
    assert!(Config::from_env_file(&dir.path().join("missing.env")).is_err());
}
