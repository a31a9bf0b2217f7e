use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use barline::pipeline::persistence;
use barline::{
    ClickTrack, ClockDevice, PlaybackState, Section, SectionId, Song, TransportController, TransportEvent,
};

// Demo driver: loads a song (or builds one), plays it through the clock device
// with a click track, pokes the transport on a little script and prints what
// happens. Usage: barline [song.json]
fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

#[derive(Clone, Copy, Debug)]
enum Step {
    NextPart,
    PreviousPart,
    Pause,
    Resume,
    Stop,
}

// (seconds after start, what to do)
const SCRIPT: [(f64, Step); 5] = [
    (1.5, Step::NextPart),
    (2.5, Step::Pause),
    (3.0, Step::Resume),
    (3.2, Step::PreviousPart),
    (12.0, Step::Stop),
];

fn run() -> anyhow::Result<()> {
    init_logger();

    let project_dir = std::env::current_dir().unwrap_or_default();
    let config = persistence::load_config(&project_dir);
    let song = match std::env::args().nth(1) {
        Some(path) => persistence::load_song(Path::new(&path))?,
        None => demo_song(),
    };
    println!(
        "{}: {} sections, {} parts, {} structure bars at {} bpm",
        song.name,
        song.sections.len(),
        song.parts.len(),
        song.structure_bars(),
        song.tempo_bpm
    );

    let (device, ticks) = ClockDevice::start(config.clock_tick(), config.clock_command_capacity)?;
    let transport = TransportController::new(Box::new(device), ticks, Arc::new(ClickTrack), &config)?;
    let events = transport.subscribe();

    transport.set_song(Arc::new(song));
    transport.set_enabled(true)?;
    transport.play(0)?;

    let started = Instant::now();
    let mut script = SCRIPT.iter().peekable();
    let mut last_bar = None;

    loop {
        while let Some((at, step)) = script.next_if(|(at, _)| started.elapsed().as_secs_f64() >= *at) {
            println!("[{at:>4.1}s] {step:?}");
            match step {
                Step::NextPart => report_skip(transport.skip_to_next_part()),
                Step::PreviousPart => report_skip(transport.skip_to_previous_part()),
                Step::Pause => transport.pause()?,
                Step::Resume => transport.resume()?,
                Step::Stop => transport.stop()?,
            }
        }

        match events.recv_timeout(Duration::from_millis(50)) {
            Ok(TransportEvent::PositionChanged { new, .. }) if last_bar != Some(new.bar) => {
                last_bar = Some(new.bar);
                match transport.lead_sheet_position() {
                    Ok(lead) => println!("  bar {:>3}  (lead sheet bar {:>3}, {:?})", new.bar, lead.bar, lead.section),
                    Err(e) => println!("  bar {:>3}  ({e})", new.bar),
                }
            }
            Ok(TransportEvent::StateChanged { old, new }) => println!("  state {old:?} -> {new:?}"),
            Ok(TransportEvent::SessionChanged { new: Some(id), .. }) => println!("  session {id}"),
            Ok(TransportEvent::EndOfSequence) => {
                println!("  end of sequence");
                transport.stop()?;
            }
            Ok(_) | Err(_) => {}
        }

        // stopped either by the script or by running off the end
        if transport.state() == PlaybackState::Stopped {
            break;
        }
    }

    transport.set_enabled(false)?;
    Ok(())
}

fn report_skip(result: Result<Option<u32>, barline::TransportError>) {
    match result {
        Ok(Some(bar)) => println!("  -> bar {bar}"),
        Ok(None) => println!("  -> nowhere to go"),
        Err(e) => println!("  -> {e}"),
    }
}

// Intro, two verse/chorus rounds with the chorus doubled at the end. The
// bridge is written but never placed.
fn demo_song() -> Song {
    let mut song = Song::new(
        "Demo",
        240.0,
        vec![
            Section::new(0, "Intro", 0, 2),
            Section::new(1, "Verse", 2, 4),
            Section::new(2, "Chorus", 6, 4),
            Section::new(3, "Bridge", 10, 2),
        ],
    );
    for section in [0, 1, 2, 1, 2, 2] {
        song.push_part(SectionId(section));
    }
    song
}

fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
