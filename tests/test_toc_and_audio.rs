#![cfg(feature = "test-utils")]

mod support;
use tracing::debug;

use crate::support::tracing_init;
use cdplay::cd::cdb::{READ_CD, READ_TOC};
use cdplay::cd::toc::TOC_ALLOCATION_LEN;
use cdplay::cd::{
    read_toc, AudioChunk, AudioCursor, AudioReadError, AudioReader, TocError, Transport,
    TransportError, SECTOR_SIZE,
};
use cdplay::test_support::{synthetic_sector, toc_response, MockScsiDevice};

fn three_track_disc() -> MockScsiDevice {
    let mut device = MockScsiDevice::with_disc(21000);
    device.push_data(toc_response(
        1,
        3,
        &[(1, 0, 0x00), (2, 7350, 0x00), (3, 14000, 0x00)],
        21000,
    ));
    device
}

#[test]
fn test_read_toc_then_stream_to_leadout() {
    tracing_init();

    let device = three_track_disc();
    let log = device.command_log();
    let mut transport = Transport::from_device(device);

    let toc = read_toc(&mut transport, 5000).unwrap();
    assert_eq!(toc.track(2).unwrap().start_sector, 7350);
    assert_eq!(toc.leadout_sector(), 21000);
    assert_eq!(
        usize::from(toc.track_count()),
        usize::from(toc.last_track() - toc.first_track()) + 1
    );

    let reader = AudioReader::new(27, 5000);
    let chunk = reader
        .read_audio(&mut transport, 20900, toc.leadout_sector(), 500)
        .unwrap();
    assert_eq!(chunk.sector_count(), 100);
    assert!(chunk.leadout_reached());
    assert_eq!(&chunk.data()[..SECTOR_SIZE], synthetic_sector(20900).as_slice());

    let commands = log.lock().unwrap();
    debug!("{} commands issued", commands.len());
    assert_eq!(commands[0][0], READ_TOC);
    assert_eq!(
        u16::from_be_bytes([commands[0][7], commands[0][8]]) as usize,
        TOC_ALLOCATION_LEN
    );
    assert!(commands[1..].iter().all(|cdb| cdb[0] == READ_CD));
    // 100 sectors in batches of at most 27
    assert_eq!(commands.len() - 1, 4);
}

#[test]
fn test_one_handle_serves_every_command() {
    tracing_init();

    let mut transport = Transport::from_device(three_track_disc());
    assert!(transport.is_open());

    let toc = read_toc(&mut transport, 5000).unwrap();
    let reader = AudioReader::default();
    let mut cursor = AudioCursor::new(
        toc.track(3).unwrap().start_sector,
        toc.leadout_sector(),
        2 * 75,
    )
    .unwrap();
    let mut chunk = AudioChunk::new();

    let mut sectors = 0;
    let mut chunks = 0;
    while cursor.next_chunk(&reader, &mut transport, &mut chunk).unwrap() {
        sectors += chunk.sector_count();
        chunks += 1;
    }

    assert_eq!(sectors, toc.track_sectors(3).unwrap());
    assert_eq!(chunks, 47);
    assert!(transport.is_open());
}

#[test]
fn test_toc_sense_is_reported() {
    tracing_init();

    let mut device = MockScsiDevice::new();
    device.push_sense(vec![0x70, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x0a]);
    let mut transport = Transport::from_device(device);

    match read_toc(&mut transport, 5000) {
        Err(TocError::Transport(TransportError::Sense(sense))) => {
            assert_eq!(sense.to_string(), "70 00 02 00 00 00 00 0a");
        }
        other => panic!("expected sense error, got {:?}", other),
    }
}

#[test]
fn test_empty_toc_is_no_data() {
    tracing_init();

    let mut device = MockScsiDevice::new();
    device.push_data(vec![0x00, 0x02, 0x01, 0x01]);
    let mut transport = Transport::from_device(device);

    assert!(matches!(
        read_toc(&mut transport, 5000),
        Err(TocError::NoData)
    ));
}

#[test]
fn test_reading_past_leadout_is_rejected() {
    tracing_init();

    let mut transport = Transport::from_device(MockScsiDevice::with_disc(21000));
    let reader = AudioReader::default();

    assert!(matches!(
        reader.read_audio(&mut transport, 21001, 21000, 1),
        Err(AudioReadError::StartBeyondLeadout { .. })
    ));
}
