use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use modengine::{Engine, TransportCommand, TransportState};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the MOD file to play.
    mod_path: PathBuf,
}

fn print_help() {
    println!("commands: p=play s=stop a=pause r=rewind f=fast-forward i=position q=quit");
}

fn main() {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let sdl_context = sdl2::init().expect("failed to init SDL2");
    let sink = modengine::sink::sdl2::Sdl2Sink::new(&sdl_context).expect("failed to create audio sink");

    let engine = Engine::new();
    engine
        .init(Box::new(sink))
        .expect("failed to initialize engine");
    engine
        .load_mod(&cli.mod_path)
        .unwrap_or_else(|e| panic!("failed to load {}: {}", cli.mod_path.display(), e));

    print_help();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let cmd = match line.trim().chars().next() {
            Some('p') => Some(TransportCommand::Play),
            Some('s') => Some(TransportCommand::Stop),
            Some('a') => Some(TransportCommand::Pause),
            Some('r') => Some(TransportCommand::Rewind),
            Some('f') => Some(TransportCommand::FastForward),
            Some('q') => break,
            Some('i') => None,
            _ => {
                print_help();
                continue;
            }
        };

        if let Some(cmd) = cmd {
            engine.command(cmd).expect("transport command failed");
        }

        let pos = engine.get_position().expect("engine not initialized");
        let state = engine.state().expect("engine not initialized");
        println!(
            "state={} order={}/{} pattern={} step={} samples={}",
            match state {
                TransportState::NoSongLoaded => "no song",
                TransportState::Stopped => "stopped",
                TransportState::Playing => "playing",
                TransportState::Paused => "paused",
                TransportState::Rewinding => "rewinding",
                TransportState::FastForwarding => "fast-forwarding",
            },
            pos.iorder,
            pos.norder,
            pos.ipattern,
            pos.istep,
            pos.raw_samples
        );
        io::stdout().flush().ok();
    }

    engine.deinit().expect("failed to deinitialize engine");
}
