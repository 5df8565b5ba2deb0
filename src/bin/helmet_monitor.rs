//! helmet_monitor - interactive helmet compliance monitor
//!
//! Menu-driven front end:
//! 1. Webcam: live detection until ESC or `z` is entered
//! 2. Image: annotate one image and write it to the output path
//! 3. Video: play a file to the end (or until ESC / `z`), then offer another
//! 4. Exit
//!
//! Passing `--webcam`, `--video` or `--image` runs that one session without the
//! menu. Ctrl-C at any point stops the alarm, releases audio and exits.

use anyhow::Result;
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};

use helmet_monitor::alarm::PolicyKind;
use helmet_monitor::config::{default_audio_device, DetectorKind};
use helmet_monitor::{
    open_source, ConsoleEvent, ConsoleInput, DirectorySink, EndReason, FrameSink, Monitor,
    MonitorConfig, NullSink, SourceSpec,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Alarm policy: symmetric (default) or countdown.
    #[arg(long, value_name = "POLICY")]
    policy: Option<PolicyKind>,
    /// Detector backend: scripted or tract.
    #[arg(long, value_name = "BACKEND")]
    detector: Option<DetectorKind>,
    /// JSON detection script for the scripted detector.
    #[arg(long, value_name = "PATH")]
    script: Option<PathBuf>,
    /// ONNX model for the tract detector.
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,
    /// Run one webcam session on this device (or stub:// locator).
    #[arg(long, value_name = "DEVICE", conflicts_with_all = ["video", "image"])]
    webcam: Option<String>,
    /// Run one video session on this file (or stub:// locator).
    #[arg(long, value_name = "PATH", conflicts_with = "image")]
    video: Option<String>,
    /// Annotate one image and exit.
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,
    /// Write annotated frames to this directory.
    #[arg(long, value_name = "DIR")]
    sink_dir: Option<PathBuf>,
    /// Keep every Nth frame when --sink-dir is set.
    #[arg(long, default_value_t = 1)]
    sink_every: u64,
}

impl Args {
    fn apply(&self, cfg: &mut MonitorConfig) {
        if let Some(policy) = self.policy {
            cfg.alarm.policy = policy;
        }
        if let Some(detector) = self.detector {
            cfg.detector.backend = detector;
        }
        if let Some(script) = &self.script {
            cfg.detector.script_path = Some(script.clone());
        }
        if let Some(model) = &self.model {
            cfg.detector.model_path = model.clone();
        }
    }

    fn single_source(&self) -> Option<SourceSpec> {
        if let Some(device) = &self.webcam {
            return Some(SourceSpec::Webcam(device.clone()));
        }
        if let Some(path) = &self.video {
            return Some(SourceSpec::Video(path.clone()));
        }
        self.image.clone().map(SourceSpec::Image)
    }
}

enum Flow {
    Continue,
    Exit,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = MonitorConfig::load()?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let mut monitor = Monitor::from_config(&cfg, default_audio_device())?;
    let mut sink: Box<dyn FrameSink> = match &args.sink_dir {
        Some(dir) => Box::new(DirectorySink::new(dir, args.sink_every)?),
        None => Box::new(NullSink),
    };

    let (tx, rx) = mpsc::channel();
    let interrupt_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(ConsoleEvent::Interrupt);
    })
    .expect("error setting Ctrl-C handler");
    spawn_stdin_reader(tx);
    let mut console = ConsoleInput::new(rx);

    let result = match args.single_source() {
        Some(SourceSpec::Image(path)) => {
            run_image(&mut monitor, &cfg, &path, sink.as_mut());
            Ok(())
        }
        Some(spec) => {
            run_stream(&mut monitor, &cfg, &spec, sink.as_mut(), &mut console);
            Ok(())
        }
        None => run_menu(&mut monitor, &cfg, sink.as_mut(), &mut console),
    };

    monitor.shutdown();
    log::info!("alarm stopped and audio released, exiting");
    result
}

fn spawn_stdin_reader(tx: Sender<ConsoleEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(ConsoleEvent::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(ConsoleEvent::Closed);
    });
}

/// Print `text` and wait for a line. `None` means the program should exit.
fn prompt(console: &mut ConsoleInput, text: &str) -> Option<String> {
    print!("{}", text);
    let _ = std::io::stdout().flush();
    let line = console.read_line();
    if line.is_none() && console.interrupted() {
        println!("\nProgram interrupted. Exiting cleanly.");
    }
    line
}

fn run_menu(
    monitor: &mut Monitor,
    cfg: &MonitorConfig,
    sink: &mut dyn FrameSink,
    console: &mut ConsoleInput,
) -> Result<()> {
    loop {
        println!("\nSelect Mode:");
        println!("1. Webcam Detection");
        println!("2. Image Detection");
        println!("3. Video Detection");
        println!("4. Exit");
        let Some(choice) = prompt(console, "Enter choice (1/2/3/4): ") else {
            return Ok(());
        };

        let flow = match choice.as_str() {
            "1" => {
                let spec = SourceSpec::Webcam(cfg.webcam_device.clone());
                run_stream(monitor, cfg, &spec, sink, console)
            }
            "2" => match prompt(console, "Enter image path: ") {
                Some(path) if path.is_empty() => {
                    println!("No file selected.");
                    Flow::Continue
                }
                Some(path) => {
                    run_image(monitor, cfg, &PathBuf::from(path), sink);
                    Flow::Continue
                }
                None => Flow::Exit,
            },
            "3" => run_videos(monitor, cfg, sink, console),
            "4" => {
                println!("Exiting program.");
                Flow::Exit
            }
            _ => {
                println!("Invalid choice. Please select 1, 2, 3, or 4.");
                Flow::Continue
            }
        };

        if let Flow::Exit = flow {
            return Ok(());
        }
    }
}

fn run_videos(
    monitor: &mut Monitor,
    cfg: &MonitorConfig,
    sink: &mut dyn FrameSink,
    console: &mut ConsoleInput,
) -> Flow {
    loop {
        let Some(path) = prompt(console, "Enter video path: ") else {
            return Flow::Exit;
        };
        if path.is_empty() {
            println!("No video selected. Returning to Main Menu.");
            return Flow::Continue;
        }
        if let Flow::Exit = run_stream(monitor, cfg, &SourceSpec::Video(path), sink, console) {
            return Flow::Exit;
        }
        match prompt(console, "Load another video? (y/n): ") {
            Some(answer) if answer.eq_ignore_ascii_case("y") => continue,
            Some(_) => return Flow::Continue,
            None => return Flow::Exit,
        }
    }
}

/// Run a webcam or video session. Failures are reported and never end the program.
fn run_stream(
    monitor: &mut Monitor,
    cfg: &MonitorConfig,
    spec: &SourceSpec,
    sink: &mut dyn FrameSink,
    console: &mut ConsoleInput,
) -> Flow {
    let mut source = match open_source(spec, &cfg.source_settings()) {
        Ok(source) => source,
        Err(err) => {
            log::error!("failed to open {}: {:#}", spec.label(), err);
            eprintln!("Error: Could not open {}.", spec.label());
            return Flow::Continue;
        }
    };
    println!("Press ESC or Z (then Enter) to exit {} mode.", spec.label());

    match monitor.run_session(source.as_mut(), sink, console) {
        Ok(outcome) => {
            log::info!(
                "{} session: {} frames, last counts total={} helmet={} no helmet={}, alarm raised={}",
                spec.label(),
                outcome.frames,
                outcome.last_counts.total(),
                outcome.last_counts.compliant,
                outcome.last_counts.non_compliant,
                outcome.alarm_was_on
            );
            match outcome.reason {
                EndReason::EndOfStream => {
                    println!("End of {}.", spec.label());
                    Flow::Continue
                }
                EndReason::UserQuit => {
                    println!("Exiting {} mode.", spec.label());
                    Flow::Continue
                }
                EndReason::Interrupted => {
                    println!("\nProgram interrupted. Exiting cleanly.");
                    Flow::Exit
                }
            }
        }
        Err(err) => {
            eprintln!("Error: {} session ended: {:#}", spec.label(), err);
            Flow::Continue
        }
    }
}

fn run_image(monitor: &mut Monitor, cfg: &MonitorConfig, path: &Path, sink: &mut dyn FrameSink) {
    match monitor.run_image(path, &cfg.output_image, sink) {
        Ok(counts) => println!(
            "Detection completed: {} persons, {} with helmet, {} without. Saved to {}.",
            counts.total(),
            counts.compliant,
            counts.non_compliant,
            cfg.output_image.display()
        ),
        Err(err) => {
            log::error!("image detection failed: {:#}", err);
            eprintln!("Error: Could not read image {}", path.display());
        }
    }
}
