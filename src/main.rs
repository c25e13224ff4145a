use std::env;
use std::error::Error;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use cdplay::cd::{self, CdText, Toc, Transport};
use cdplay::Config;

enum Command {
    Toc,
    Text { block: Option<u8> },
    Play { track: Option<u8> },
}

fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("cdplay");

    let mut config = Config::load();
    let mut command = None;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--device" => {
                let Some(path) = args.get(i + 1) else {
                    error!("--device requires a path");
                    print_usage(program);
                    std::process::exit(1);
                };
                config.device_path = PathBuf::from(path);
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            "--block" => {
                let block = parse_number(args.get(i + 1), "--block", program);
                match &mut command {
                    Some(Command::Text { block: b }) => *b = Some(block),
                    _ => {
                        error!("--block is only valid after 'text'");
                        std::process::exit(1);
                    }
                }
                i += 2;
            }
            "--track" => {
                let track = parse_number(args.get(i + 1), "--track", program);
                match &mut command {
                    Some(Command::Play { track: t }) => *t = Some(track),
                    _ => {
                        error!("--track is only valid after 'play'");
                        std::process::exit(1);
                    }
                }
                i += 2;
            }
            "toc" if command.is_none() => {
                command = Some(Command::Toc);
                i += 1;
            }
            "text" if command.is_none() => {
                command = Some(Command::Text { block: None });
                i += 1;
            }
            "play" if command.is_none() => {
                command = Some(Command::Play { track: None });
                i += 1;
            }
            "-h" | "--help" => {
                print_usage(program);
                return;
            }
            other => {
                error!("Unknown argument: {}", other);
                print_usage(program);
                std::process::exit(1);
            }
        }
    }

    let Some(command) = command else {
        print_usage(program);
        std::process::exit(1);
    };

    let result = match command {
        Command::Toc => show_toc(&config, json),
        Command::Text { block } => show_text(&config, block, json),
        Command::Play { track } => play(&config, track),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn parse_number(value: Option<&String>, flag: &str, program: &str) -> u8 {
    match value.map(|v| v.parse::<u8>()) {
        Some(Ok(n)) => n,
        _ => {
            error!("{} requires a number between 0 and 255", flag);
            print_usage(program);
            std::process::exit(1);
        }
    }
}

fn show_toc(config: &Config, json: bool) -> Result<(), Box<dyn Error>> {
    let mut transport = Transport::new(&config.device_path);
    let toc = cd::read_toc(&mut transport, config.timeout_ms)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&toc)?);
        return Ok(());
    }

    let total = toc.total_seconds();
    println!(
        "Tracks {}-{}, lead-out at LBA {} ({:02}:{:02})",
        toc.first_track(),
        toc.last_track(),
        toc.leadout_sector(),
        total / 60,
        total % 60
    );
    for track in toc.tracks() {
        let (m, s, f) = track.start_msf();
        let seconds = toc.track_sectors(track.number).unwrap_or(0) / cd::SECTORS_PER_SECOND;
        println!(
            "  {:02}  LBA {:>6}  {:02}:{:02}.{:02}  {:02}:{:02}  {}{}",
            track.number,
            track.start_sector,
            m,
            s,
            f,
            seconds / 60,
            seconds % 60,
            if track.control.is_audio() { "audio" } else { "data" },
            if track.control.pre_emphasis() { " (pre-emphasis)" } else { "" }
        );
    }
    Ok(())
}

enum TextLookup {
    Found(CdText),
    Absent,
    Empty,
}

fn read_text(
    transport: &mut Transport,
    config: &Config,
    block: u8,
) -> Result<TextLookup, cd::CdTextError> {
    match cd::read_cd_text(transport, config.cd_text_timeout_ms, block) {
        Ok(text) => {
            if config.verify_cd_text_crc {
                text.verify_checksums()?;
            }
            Ok(TextLookup::Found(text))
        }
        Err(e) if e.is_absent() => {
            debug!("No CD-Text: {}", e);
            Ok(TextLookup::Absent)
        }
        Err(cd::CdTextError::DataEmpty) => {
            debug!("CD-Text response carried no packs");
            Ok(TextLookup::Empty)
        }
        Err(e) => Err(e),
    }
}

fn show_text(config: &Config, block: Option<u8>, json: bool) -> Result<(), Box<dyn Error>> {
    let mut transport = Transport::new(&config.device_path);
    let block = block.unwrap_or(config.cd_text_block);

    let text = match read_text(&mut transport, config, block)? {
        TextLookup::Found(text) => text,
        TextLookup::Absent => {
            println!("No CD-Text on this disc");
            return Ok(());
        }
        TextLookup::Empty => {
            println!("CD-Text present but empty");
            return Ok(());
        }
    };
    let Some(selected) = text.block() else {
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(selected)?);
        return Ok(());
    }

    println!(
        "Block {} (language 0x{:02x}), blocks on disc: {:?}",
        selected.number(),
        selected.info().language_code,
        text.block_numbers()
    );
    println!("{} - {}", selected.album().artist, selected.album().title);
    let first = selected.range().first;
    for (i, track) in selected.tracks().iter().enumerate() {
        println!(
            "  {:02}  {} - {}",
            usize::from(first) + i,
            track.artist,
            track.title
        );
    }
    Ok(())
}

fn play(config: &Config, track: Option<u8>) -> Result<(), Box<dyn Error>> {
    let mut transport = Transport::new(&config.device_path);
    let toc = cd::read_toc(&mut transport, config.timeout_ms)?;
    let track = track.unwrap_or(toc.first_track());

    match read_text(&mut transport, config, config.cd_text_block) {
        Ok(TextLookup::Found(text)) => {
            if let Some(album) = text.album() {
                info!("Album: {} - {}", album.artist, album.title);
            }
            if let Some(title) = text.track_title(track) {
                info!(
                    "Track {}: {} - {}",
                    track,
                    text.track_artist(track).unwrap_or_default(),
                    title
                );
            }
        }
        Ok(TextLookup::Absent) => {}
        Ok(TextLookup::Empty) => info!("CD-Text present but empty"),
        Err(e) => warn!("Ignoring unreadable CD-Text: {}", e),
    }

    play_with_default_output(config, transport, toc, track)
}

#[cfg(any(target_os = "macos", target_os = "linux", target_os = "windows"))]
fn play_with_default_output(
    config: &Config,
    transport: Transport,
    toc: Toc,
    track: u8,
) -> Result<(), Box<dyn Error>> {
    use cdplay::playback::{CpalSink, Player};

    let sink = CpalSink::open(config.period_frames, config.queue_periods)?;
    let mut player = Player::new(
        transport,
        sink,
        toc,
        config.audio_reader(),
        config.player_options(),
    );
    let report = player.play_from_track(track)?;
    info!(
        "Played LBA {}-{} ({} underruns)",
        report.start_sector, report.end_sector, report.underruns
    );
    Ok(())
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn play_with_default_output(
    _config: &Config,
    _transport: Transport,
    _toc: Toc,
    _track: u8,
) -> Result<(), Box<dyn Error>> {
    Err("no audio output available on this platform".into())
}

fn print_usage(program_name: &str) {
    eprintln!("Usage:");
    eprintln!("  {} [--device <path>] toc [--json]", program_name);
    eprintln!("  {} [--device <path>] text [--block <0-7>] [--json]", program_name);
    eprintln!("  {} [--device <path>] play [--track <n>]", program_name);
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} toc", program_name);
    eprintln!("  {} --device /dev/sg1 text --block 1", program_name);
    eprintln!("  {} play --track 3", program_name);
}
