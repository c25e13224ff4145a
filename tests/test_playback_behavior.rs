#![cfg(feature = "test-utils")]

mod support;
use std::time::Instant;
use tracing::debug;

use crate::support::tracing_init;
use cdplay::cd::{read_toc, AudioReader, Transport, SECTOR_SIZE};
use cdplay::playback::{
    pump, PcmSink, PlaybackReport, Player, PlayerError, PlayerOptions, SinkError, BYTES_PER_FRAME,
};
use cdplay::test_support::{synthetic_sector, toc_response, MockScsiDevice, MockSink, SinkStep};

const LEADOUT: u32 = 1200;

/// Test helper: a player over a four track synthetic disc
struct PlaybackTestFixture {
    player: Player<MockSink, MockScsiDevice>,
    written: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

impl PlaybackTestFixture {
    fn new(sink: MockSink, pipeline: bool, fail_at: Option<u32>) -> Self {
        tracing_init();

        let mut device = MockScsiDevice::with_disc(LEADOUT);
        device.push_data(toc_response(
            1,
            4,
            &[(1, 0, 0), (2, 300, 0), (3, 600, 0), (4, 900, 0)],
            LEADOUT,
        ));
        if let Some(lba) = fail_at {
            device.fail_read_at(lba);
        }

        let mut transport = Transport::from_device(device);
        let toc = read_toc(&mut transport, 5000).unwrap();
        let written = sink.written();

        let player = Player::new(
            transport,
            sink,
            toc,
            AudioReader::new(27, 5000),
            PlayerOptions {
                chunk_sectors: 75,
                pipeline,
            },
        );
        Self { player, written }
    }

    fn play(&mut self, track: u8) -> Result<PlaybackReport, PlayerError> {
        let start = Instant::now();
        let result = self.player.play_from_track(track);
        debug!("Playback of track {} took {:?}", track, start.elapsed());
        result
    }

    fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

fn disc_audio(start: u32, end: u32) -> Vec<u8> {
    (start..end).flat_map(synthetic_sector).collect()
}

#[test]
fn test_track_validated_against_toc() {
    let mut fixture = PlaybackTestFixture::new(MockSink::new(588), true, None);

    assert!(matches!(
        fixture.play(5),
        Err(PlayerError::InvalidTrack {
            track: 5,
            first: 1,
            last: 4
        })
    ));
    assert!(fixture.written().is_empty());
}

#[test]
fn test_playback_from_each_track_reaches_leadout() {
    for (track, start) in [(1u8, 0u32), (2, 300), (3, 600), (4, 900)] {
        for pipeline in [false, true] {
            let mut fixture = PlaybackTestFixture::new(MockSink::new(441), pipeline, None);

            let report = fixture.play(track).unwrap();

            assert_eq!(report.start_sector, start);
            assert_eq!(report.end_sector, LEADOUT);
            assert_eq!(
                report.frames_played,
                (LEADOUT - start) as usize * SECTOR_SIZE / BYTES_PER_FRAME
            );
            assert!(fixture.written() == disc_audio(start, LEADOUT));
        }
    }
}

#[test]
fn test_slow_sink_partial_writes() {
    let mut sink = MockSink::new(1024);
    for _ in 0..50 {
        sink.push_step(SinkStep::Accept(100));
    }
    let mut fixture = PlaybackTestFixture::new(sink, true, None);

    fixture.play(4).unwrap();
    assert!(fixture.written() == disc_audio(900, LEADOUT));
}

#[test]
fn test_underrun_recovered_by_caller() {
    let mut sink = MockSink::new(588);
    sink.push_step(SinkStep::Accept(588));
    sink.push_step(SinkStep::Accept(588));
    sink.push_step(SinkStep::Fail(SinkError::Underrun));
    let resumes = sink.resumes();
    let mut fixture = PlaybackTestFixture::new(sink, true, None);

    let report = fixture.play(4).unwrap();

    assert_eq!(report.underruns, 1);
    assert_eq!(*resumes.lock().unwrap(), 1);
    assert!(fixture.written() == disc_audio(900, LEADOUT));
}

#[test]
fn test_suspended_sink_aborts_playback() {
    let mut sink = MockSink::new(588);
    sink.push_step(SinkStep::Accept(588));
    sink.push_step(SinkStep::Fail(SinkError::Suspended));
    let mut fixture = PlaybackTestFixture::new(sink, true, None);

    match fixture.play(1) {
        Err(PlayerError::Pump(e)) => {
            assert_eq!(e.sink_error(), Some(SinkError::Suspended));
            assert_eq!(e.frames_written(), 588);
        }
        other => panic!("expected suspended sink, got {:?}", other),
    }
    assert_eq!(fixture.written().len(), 588 * BYTES_PER_FRAME);
}

#[test]
fn test_read_error_mid_disc() {
    let mut fixture = PlaybackTestFixture::new(MockSink::new(588), false, Some(700));

    assert!(matches!(
        fixture.play(3),
        Err(PlayerError::Read(_))
    ));
    // Track 3 starts at 600; the chunk holding LBA 700 is 675..750
    assert!(fixture.written() == disc_audio(600, 675));
}

#[test]
fn test_pump_hands_sink_transfer_units() {
    tracing_init();

    let mut sink = MockSink::new(1000);
    let requests = sink.requests();
    let data = synthetic_sector(0).repeat(3);

    let stats = pump(&mut sink, &data).unwrap();

    assert_eq!(stats.frames_written, 3 * 588);
    assert_eq!(*requests.lock().unwrap(), vec![1000, 764]);
    assert_eq!(sink.transfer_frames(), 1000);
}
