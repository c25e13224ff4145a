#![cfg(feature = "test-utils")]

mod support;

use crate::support::tracing_init;
use cdplay::cd::{read_cd_text, CdText, CdTextError, TextField, Transport};
use cdplay::test_support::{
    cd_text_response, numbered_text_packs, size_info_packs, text_packs, MockScsiDevice,
};

const TITLE: u8 = 0x80;
const PERFORMER: u8 = 0x81;
const SONGWRITER: u8 = 0x82;

/// Two language blocks for a four track disc
fn bilingual_disc() -> Vec<u8> {
    let mut packs = Vec::new();

    packs.extend(text_packs(
        TITLE,
        0,
        &["Night Drive", "Intro", "Highway", "Neon Lights", "Outro"],
    ));
    packs.extend(text_packs(
        PERFORMER,
        0,
        &["The Example Band", "The Example Band", "\t", "Guest Singer", "\t"],
    ));
    packs.extend(text_packs(SONGWRITER, 0, &["", "A. Writer", "\t", "B. Writer", ""]));
    packs.extend(size_info_packs(0, 1, 4));

    packs.extend(text_packs(
        TITLE,
        1,
        &["Nachtfahrt", "Einleitung", "Autobahn", "Neonlichter", "Ausklang"],
    ));
    packs.extend(size_info_packs(1, 1, 4));

    cd_text_response(&packs)
}

fn read(response: Vec<u8>, block: u8) -> Result<CdText, CdTextError> {
    let mut device = MockScsiDevice::new();
    device.push_data(response);
    let mut transport = Transport::from_device(device);
    read_cd_text(&mut transport, 10_000, block)
}

#[test]
fn test_album_and_tracks_of_default_block() {
    tracing_init();

    let text = read(bilingual_disc(), 0).unwrap();
    let block = text.block().unwrap();

    assert_eq!(block.album().title, "Night Drive");
    assert_eq!(block.album().artist, "The Example Band");
    assert_eq!(block.range().count, 4);
    assert_eq!(block.tracks().len(), 4);

    let titles: Vec<&str> = block.tracks().iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Intro", "Highway", "Neon Lights", "Outro"]);

    assert_eq!(text.track_artist(1), Some("The Example Band"));
    assert_eq!(text.track_artist(2), Some("The Example Band"));
    assert_eq!(text.track_artist(3), Some("Guest Singer"));
    assert_eq!(text.track_artist(4), Some("Guest Singer"));
    assert_eq!(text.track_title(5), None);
}

#[test]
fn test_second_language_block() {
    tracing_init();

    let mut text = read(bilingual_disc(), 1).unwrap();
    assert_eq!(text.album().unwrap().title, "Nachtfahrt");
    assert_eq!(text.track_title(3), Some("Neonlichter"));
    // No performer packs in this block
    assert_eq!(text.track_artist(3), Some(""));

    text.select_block(0).unwrap();
    assert_eq!(text.track_title(3), Some("Neon Lights"));
}

#[test]
fn test_songwriters() {
    tracing_init();

    let text = read(bilingual_disc(), 0).unwrap();
    let songwriters = text
        .block()
        .unwrap()
        .field(TextField::Songwriter)
        .unwrap();

    assert_eq!(songwriters.album, "");
    assert_eq!(
        songwriters.tracks,
        vec!["A. Writer", "A. Writer", "B. Writer", ""]
    );
}

#[test]
fn test_checksums_of_well_formed_disc() {
    tracing_init();

    let text = read(bilingual_disc(), 0).unwrap();
    assert!(text.verify_checksums().is_ok());
    assert_eq!(text.block_numbers(), vec![0, 1]);
}

#[test]
fn test_missing_block_keeps_selection() {
    tracing_init();

    let mut text = read(bilingual_disc(), 0).unwrap();
    assert!(matches!(
        text.select_block(5),
        Err(CdTextError::BlockNotFound(5))
    ));
    assert_eq!(text.block().unwrap().number(), 0);
}

#[test]
fn test_default_block_out_of_range() {
    tracing_init();

    assert!(matches!(
        read(bilingual_disc(), 9),
        Err(CdTextError::BlockNumberOutOfRange(9))
    ));
}

#[test]
fn test_absent_and_empty_are_distinct() {
    tracing_init();

    let mut device = MockScsiDevice::new();
    device.push_sense(vec![0x70, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x0a]);
    let mut transport = Transport::from_device(device);
    let absent = read_cd_text(&mut transport, 10_000, 0).unwrap_err();

    let empty = read(vec![0x00, 0x02, 0x00, 0x00], 0).unwrap_err();

    assert!(matches!(absent, CdTextError::DoesNotExist));
    assert!(matches!(empty, CdTextError::DataEmpty));
    assert!(absent.is_absent());
    assert!(!empty.is_absent());
}

#[test]
fn test_transport_failure_is_not_absence() {
    tracing_init();

    let mut device = MockScsiDevice::new();
    device.push_io_error();
    let mut transport = Transport::from_device(device);

    let err = read_cd_text(&mut transport, 10_000, 0).unwrap_err();
    assert!(matches!(err, CdTextError::Transport(_)));
    assert!(!err.is_absent());
}

#[test]
fn test_disc_starting_past_track_one() {
    tracing_init();

    let mut packs = numbered_text_packs(
        TITLE,
        0,
        5,
        &["Box Set Disc Two", "Fifth", "Sixth", "Seventh"],
    );
    packs.extend(size_info_packs(0, 5, 7));

    let text = read(cd_text_response(&packs), 0).unwrap();
    let block = text.block().unwrap();

    assert_eq!(block.album().title, "Box Set Disc Two");
    assert_eq!(block.range().first, 5);
    assert_eq!(text.track_title(5), Some("Fifth"));
    assert_eq!(text.track_title(7), Some("Seventh"));
    assert_eq!(text.track_title(1), None);
    assert!(text.verify_checksums().is_ok());
}
