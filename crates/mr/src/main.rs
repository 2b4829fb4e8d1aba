//! mr - macro recorder CLI
//!
//! Capture lines arrive on stdin, synthetic input is written to stdout as JSON
//! lines, and status messages go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use serde::Serialize;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use macrorec::prelude::*;
use macrorec::{ErrorReport, MacroError};

#[derive(Parser)]
#[command(name = "mr")]
#[command(about = "Record mouse clicks and key presses, then replay them with the original timing")]
#[command(version)]
struct Cli {
    /// Print status messages as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record capture lines from stdin until EOF or Ctrl-C, then save
    Record {
        /// Destination file (default: macro_<timestamp>.macro)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay a macro file
    Play {
        file: PathBuf,
        /// Playback speed (1.0 = realtime, 2.0 = 2x)
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
    },
    /// Print the events of a macro file
    Show { file: PathBuf },
    /// Interactive control surface
    Shell {
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
    },
}

#[derive(Serialize)]
struct Output<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

impl<T: Serialize> Output<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl Output<()> {
    fn err(e: &MacroError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorReport::from(e)),
        }
    }
}

#[derive(Serialize)]
struct MacroSummary<'a> {
    events: usize,
    duration: f64,
    log: &'a EventLog,
}

fn print_json<T: Serialize>(output: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(output)?);
    Ok(())
}

fn report(status: &Status, json: bool) {
    if json {
        match serde_json::to_string(status) {
            Ok(line) => eprintln!("{}", line),
            Err(_) => eprintln!("{}", status),
        }
    } else {
        eprintln!("{}", status);
    }
}

// ── Capture line parsing ────────────────────────────────────────────────────

enum CaptureLine {
    Pointer(PointerInput),
    Key(KeyRef),
}

/// `click X Y [left|right|middle] [down|up]` or `key TOKEN`
fn parse_capture(line: &str) -> Option<std::result::Result<CaptureLine, String>> {
    let mut words = line.split_whitespace();
    match words.next()? {
        "click" => Some(parse_click(words.collect())),
        "key" => Some(match words.next() {
            Some(token) => Ok(CaptureLine::Key(KeyRef::from_input(token))),
            None => Err("usage: key TOKEN".to_string()),
        }),
        _ => None,
    }
}

fn parse_click(args: Vec<&str>) -> std::result::Result<CaptureLine, String> {
    let usage = || "usage: click X Y [left|right|middle] [down|up]".to_string();
    if args.len() < 2 || args.len() > 4 {
        return Err(usage());
    }
    let x = args[0].parse().map_err(|_| usage())?;
    let y = args[1].parse().map_err(|_| usage())?;
    let mut button = MouseButton::Left;
    let mut pressed = true;
    for word in &args[2..] {
        match *word {
            "down" => pressed = true,
            "up" => pressed = false,
            other => button = other.parse()?,
        }
    }
    Ok(CaptureLine::Pointer(PointerInput {
        x,
        y,
        button,
        pressed,
    }))
}

fn feed(input: &CaptureSender, line: CaptureLine) {
    match line {
        CaptureLine::Pointer(p) => input.pointer(p),
        CaptureLine::Key(k) => input.key(k),
    };
}

/// Stdin lines on a channel so they can be selected against Ctrl-C
fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands return `Ok(false)` when a failure was already reported as a status.
fn record(output: Option<PathBuf>, json: bool) -> Result<bool> {
    let (capture, input) = ChannelCapture::new();
    let mut controller = Controller::new(Arc::new(capture), Arc::new(ConsoleInjector::stdout()));

    let (interrupt_tx, interrupt_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let status = controller.start_recording();
    report(&status, json);
    if status.is_error() {
        return Ok(false);
    }

    let lines = stdin_lines();
    loop {
        select! {
            recv(lines) -> line => match line {
                Ok(line) => match parse_capture(&line) {
                    Some(Ok(parsed)) => feed(&input, parsed),
                    Some(Err(usage)) => report(&Status::advisory(usage), json),
                    None if line.trim().is_empty() => {}
                    None => report(&Status::advisory(format!("unrecognized input: {}", line)), json),
                },
                Err(_) => break,
            },
            recv(interrupt_rx) -> _ => break,
        }
    }

    // Stop returns only after every queued input has been recorded
    report(&controller.stop_recording(), json);

    let path = output.unwrap_or_else(|| PathBuf::from(storage::default_file_name()));
    let status = controller.save_macro(&path);
    report(&status, json);
    Ok(!status.is_error())
}

fn play(file: PathBuf, speed: f64, json: bool) -> Result<bool> {
    let (capture, _input) = ChannelCapture::new();
    let controller = Controller::new(Arc::new(capture), Arc::new(ConsoleInjector::stdout()))
        .replayer(Replayer::new().speed(speed));

    let status = controller.load_macro(&file);
    report(&status, json);
    if status.is_error() {
        return Ok(false);
    }

    let stop = controller.stop_signal();
    ctrlc::set_handler(move || stop.stop()).context("Failed to install Ctrl-C handler")?;

    let status = controller.play_macro();
    report(&status, json);
    Ok(!status.is_error())
}

fn show(file: PathBuf, json: bool) -> Result<bool> {
    let log = storage::load(&file)?;

    if json {
        print_json(&Output::ok(MacroSummary {
            events: log.len(),
            duration: log.duration(),
            log: &log,
        }))?;
        return Ok(true);
    }

    println!("{}: {} events, {:.3}s", file.display(), log.len(), log.duration());
    let base = log.first().map(Event::timestamp).unwrap_or_default();
    for (i, event) in log.iter().enumerate() {
        let offset = event.timestamp() - base;
        match event {
            Event::MouseClick {
                x,
                y,
                button,
                pressed,
                ..
            } => println!(
                "{:>5}  +{:>9.3}s  click  ({}, {}) {} {}",
                i,
                offset,
                x,
                y,
                button,
                if *pressed { "down" } else { "up" }
            ),
            Event::KeyPress { key, .. } => println!("{:>5}  +{:>9.3}s  key    {}", i, offset, key),
        }
    }
    Ok(true)
}

const SHELL_HELP: &str = "commands: start | stop | play | save [PATH] | load PATH | status | help | quit
capture:  click X Y [left|right|middle] [down|up] | key TOKEN";

/// Routes Ctrl-C: cancels a running playback, otherwise asks the shell to exit
#[derive(Clone)]
struct Interrupts {
    playing: Arc<AtomicBool>,
    stop: StopSignal,
    quit: Sender<()>,
}

impl Interrupts {
    fn fire(&self) {
        if self.playing.load(Ordering::SeqCst) {
            self.stop.stop();
        } else {
            let _ = self.quit.try_send(());
        }
    }

    fn during_playback<T>(&self, f: impl FnOnce() -> T) -> T {
        self.playing.store(true, Ordering::SeqCst);
        let out = f();
        self.playing.store(false, Ordering::SeqCst);
        out
    }
}

fn shell(speed: f64, json: bool) -> Result<bool> {
    let (capture, input) = ChannelCapture::new();
    let mut controller = Controller::new(Arc::new(capture), Arc::new(ConsoleInjector::stdout()))
        .replayer(Replayer::new().speed(speed));

    let (quit_tx, quit_rx) = bounded(1);
    let interrupts = Interrupts {
        playing: Arc::new(AtomicBool::new(false)),
        stop: controller.stop_signal(),
        quit: quit_tx,
    };
    let handler = interrupts.clone();
    ctrlc::set_handler(move || handler.fire()).context("Failed to install Ctrl-C handler")?;

    eprintln!("{}", SHELL_HELP);
    let lines = stdin_lines();
    loop {
        let line = select! {
            recv(lines) -> line => match line {
                Ok(line) => line,
                Err(_) => break,
            },
            recv(quit_rx) -> _ => break,
        };
        let mut words = line.split_whitespace();
        let status = match words.next() {
            None => continue,
            Some("start") => controller.execute(Command::StartRecording),
            Some("stop") => controller.execute(Command::StopRecording),
            Some("play") => interrupts.during_playback(|| controller.execute(Command::PlayMacro)),
            Some("save") => {
                let path = words
                    .next()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(storage::default_file_name()));
                controller.execute(Command::SaveMacro(path))
            }
            Some("load") => match words.next() {
                Some(path) => controller.execute(Command::LoadMacro(PathBuf::from(path))),
                None => Status::advisory("usage: load PATH"),
            },
            Some("status") => {
                let log = controller.log();
                Status::info(format!(
                    "{:?}, {} events, {:.3}s",
                    controller.phase(),
                    log.len(),
                    log.duration()
                ))
            }
            Some("help") => {
                eprintln!("{}", SHELL_HELP);
                continue;
            }
            Some("quit") | Some("exit") => break,
            Some(_) => match parse_capture(&line) {
                Some(Ok(parsed)) if controller.phase() == Phase::Recording => {
                    feed(&input, parsed);
                    continue;
                }
                Some(Ok(_)) => Status::advisory("Not recording; input ignored."),
                Some(Err(usage)) => Status::advisory(usage),
                None => Status::advisory(format!("unknown command: {} (try help)", line.trim())),
            },
        };
        report(&status, json);
    }

    if controller.phase() == Phase::Recording {
        report(&controller.stop_recording(), json);
    }
    Ok(true)
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    let result = match cli.command {
        Commands::Record { output } => record(output, json),
        Commands::Play { file, speed } => play(file, speed, json),
        Commands::Show { file } => show(file, json),
        Commands::Shell { speed } => shell(speed, json),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            match e.downcast_ref::<MacroError>() {
                Some(err) if json => {
                    if print_json(&Output::<()>::err(err)).is_err() {
                        eprintln!("Error: {}", e);
                    }
                }
                _ => eprintln!("Error: {:#}", e),
            }
            std::process::exit(1);
        }
    }
}
