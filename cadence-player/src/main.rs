//! Cadence - headless player shell
//!
//! Drives the playback core the way a GUI would: open, start, poll the
//! clock and the event channels, forward key presses, stop. Keys are read
//! from stdin one per line (`space`, `left`, `right`, `r`, `f2`, `q`).

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cadence_core::backend::{PatternBackend, PatternSpec};
use cadence_core::{Key, Player, PlayerConfig};
use crossbeam_channel::{never, select, unbounded, Receiver};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Options {
    input: Option<PathBuf>,
    config: Option<PathBuf>,
    offset: Option<Duration>,
    looping: bool,
    pattern: Option<Duration>,
    probe: bool,
    system_audio: bool,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options {
        input: None,
        config: None,
        offset: None,
        looping: false,
        pattern: None,
        probe: false,
        system_audio: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --input"))?;
                options.input = Some(PathBuf::from(value));
                i += 2;
            }
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                options.config = Some(PathBuf::from(value));
                i += 2;
            }
            "--offset" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --offset"))?;
                let secs: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid --offset value: {}", value))?;
                if !secs.is_finite() || secs < 0.0 {
                    anyhow::bail!("--offset must be a non-negative number of seconds");
                }
                options.offset = Some(Duration::from_secs_f64(secs));
                i += 2;
            }
            "--pattern" => {
                // Optional duration in seconds
                let secs = args.get(i + 1).and_then(|v| v.parse::<u64>().ok());
                options.pattern = Some(Duration::from_secs(secs.unwrap_or(10)));
                i += if secs.is_some() { 2 } else { 1 };
            }
            "--loop" => {
                options.looping = true;
                i += 1;
            }
            "--probe" => {
                options.probe = true;
                i += 1;
            }
            "--system-audio" => {
                options.system_audio = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                anyhow::bail!("Unknown option: {}", other);
            }
            other => {
                options.input = Some(PathBuf::from(other));
                i += 1;
            }
        }
    }

    if options.input.is_none() && options.pattern.is_none() {
        anyhow::bail!("No input given (pass a file or --pattern)");
    }
    Ok(options)
}

fn print_usage() {
    println!("cadence {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE: cadence [OPTIONS] <FILE>");
    println!();
    println!("  -i, --input <FILE>     media file to play");
    println!("  -c, --config <FILE>    JSON player config");
    println!("      --offset <SECS>    advance/back distance");
    println!("      --pattern [SECS]   play a generated test pattern instead of a file");
    println!("      --loop             restart at end of playback");
    println!("      --probe            print stream info as JSON and exit");
    println!("      --system-audio     play through the system output device");
    println!();
    println!("Keys (stdin, one per line): space, left, right, r, f2, q");
}

fn build_player(options: &Options) -> Result<Player> {
    let config = match &options.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };

    let mut player = Player::new(config);
    if let Some(duration) = options.pattern {
        let spec = PatternSpec::default().with_duration(duration);
        player = player.with_backend(Arc::new(PatternBackend::new(spec)));
    }
    if options.system_audio {
        player = with_system_audio(player)?;
    }
    if let Some(offset) = options.offset {
        player.set_offset(offset);
    }
    Ok(player)
}

#[cfg(feature = "audio")]
fn with_system_audio(player: Player) -> Result<Player> {
    Ok(player.with_audio_registry(cadence_core::AudioDeviceRegistry::system()))
}

#[cfg(not(feature = "audio"))]
fn with_system_audio(_player: Player) -> Result<Player> {
    anyhow::bail!("built without the `audio` feature")
}

/// Forward stdin lines as keys until stdin closes
fn spawn_key_reader() -> Result<Receiver<Key>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("cadence-keys".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match Key::from_name(&line) {
                    Some(key) => {
                        if tx.send(key).is_err() {
                            break;
                        }
                    }
                    None => tracing::warn!("unknown key: {:?}", line.trim()),
                }
            }
        })
        .context("failed to spawn key reader")?;
    Ok(rx)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cadence=info,cadence_core=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    let mut player = build_player(&options)?;

    let input = options
        .input
        .clone()
        .unwrap_or_else(|| PathBuf::from("pattern"));
    let info = player
        .try_open(&input)
        .with_context(|| format!("Failed to open {}", input.display()))?;

    if options.probe {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    tracing::info!("Cadence v{}", env!("CARGO_PKG_VERSION"));
    if !player.start() {
        anyhow::bail!("failed to start playback");
    }

    let events = player.events();
    let keys = spawn_key_reader()?;
    let mut stdin_open = true;
    let mut frames: u64 = 0;
    let mut last_status = Instant::now();

    loop {
        let key_rx = if stdin_open { keys.clone() } else { never() };
        select! {
            recv(key_rx) -> key => match key {
                Ok(key) => player.handle_key(key),
                // stdin closed: keep playing without input
                Err(_) => stdin_open = false,
            },
            recv(events.frame_ready) -> _ => frames += 1,
            recv(events.end_of_playback) -> _ => {
                if options.looping {
                    tracing::info!("end of playback, looping");
                    player.restart();
                } else {
                    tracing::info!("end of playback");
                    break;
                }
            },
            recv(events.fullscreen) -> on => {
                if let Ok(on) = on {
                    tracing::info!(fullscreen = on, "fullscreen toggled");
                }
            },
            default(Duration::from_millis(100)) => {},
        }

        if !player.is_running() {
            break;
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            tracing::info!(
                pts = player.current_pts().as_secs_f64(),
                duration = player.duration().as_secs_f64(),
                status = ?player.play_status(),
                decoder = ?player.decoder_status(),
                frames,
                "playing"
            );
        }
    }

    player.stop();
    tracing::info!(frames, "done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("cadence")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_file_and_flags() {
        let options = parse_args(&args(&["--offset", "2.5", "--loop", "movie.mkv"])).unwrap();
        assert_eq!(options.input, Some(PathBuf::from("movie.mkv")));
        assert_eq!(options.offset, Some(Duration::from_millis(2_500)));
        assert!(options.looping);
        assert!(!options.probe);
    }

    #[test]
    fn test_parse_pattern() {
        let options = parse_args(&args(&["--pattern", "3"])).unwrap();
        assert_eq!(options.pattern, Some(Duration::from_secs(3)));
        assert!(options.input.is_none());

        let options = parse_args(&args(&["--pattern", "--probe"])).unwrap();
        assert_eq!(options.pattern, Some(Duration::from_secs(10)));
        assert!(options.probe);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["--offset"])).is_err());
        assert!(parse_args(&args(&["--offset", "-1", "a.wav"])).is_err());
        assert!(parse_args(&args(&["--bogus", "a.wav"])).is_err());
    }
}
