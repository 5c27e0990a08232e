use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use log::{info, warn};
use videocal::{
    validate_source, BatchController, CalibrationCheckerDriver, CalibrationConfig,
    CalibrationDriver, ConfigError, DriverError, Frame, FrameProcessor, FrameSink,
    InteractiveController, NoDevices, OutputLocation, SourceArg, SourceError, Trigger,
    TriggerInbox, VideoDriver,
};

/// Roughly 30 frames per second.
const TICK_PERIOD: Duration = Duration::from_millis(33);

#[derive(Debug, Parser)]
#[command(name = "videocal", author, version, about = "Chessboard camera calibration from video")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Camera index or image file / directory of frames.
    #[arg(short, long, default_value = "0")]
    source: String,

    /// Sample every `sample frequency`-th frame without waiting for keys.
    #[arg(short, long)]
    noninteractive: bool,

    /// File name prefix for saved or loaded calibration files.
    #[arg(short, long)]
    prefix: Option<String>,

    /// Write the displayed frame to this PNG while running interactively.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Collect chessboard views and calibrate.
    Calibrate {
        #[command(flatten)]
        common: CommonArgs,

        /// Directory for views and calibration results.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Measure board motion with an existing calibration.
    Check {
        #[command(flatten)]
        common: CommonArgs,

        /// Directory holding `intrinsics.txt` and `distortion.txt`.
        #[arg(short = 'd', long = "calib-dir")]
        calib_dir: PathBuf,
    },
}

impl Command {
    fn common(&self) -> &CommonArgs {
        match self {
            Command::Calibrate { common, .. } | Command::Check { common, .. } => common,
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Keeps the latest displayed frame on disk.
struct PreviewSink {
    path: PathBuf,
}

impl FrameSink for PreviewSink {
    fn show(&mut self, frame: &Frame) {
        if let Err(err) = frame.save(&self.path) {
            warn!("failed to write preview {}: {err}", self.path.display());
        }
    }
}

enum Sink {
    Preview(PreviewSink),
    Discard,
}

impl FrameSink for Sink {
    fn show(&mut self, frame: &Frame) {
        if let Sink::Preview(sink) = self {
            sink.show(frame);
        }
    }
}

/// Reads keys from stdin (one per line, or several on a line) and posts
/// them. End of input quits the session.
fn spawn_key_reader(inbox: Arc<TriggerInbox>, keys: &'static [Trigger]) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            for key in line.chars() {
                match Trigger::from_key(key) {
                    Some(trigger) if keys.contains(&trigger) => inbox.post(trigger),
                    _ if key.is_whitespace() => {}
                    _ => warn!("ignoring key '{key}'"),
                }
            }
        }
        inbox.post(Trigger::Quit);
    });
}

fn run_session<P: FrameProcessor>(
    driver: VideoDriver<P>,
    common: &CommonArgs,
    keys: &'static [Trigger],
) -> Result<(), CliError> {
    if common.noninteractive {
        BatchController::new(driver).run()?;
        return Ok(());
    }

    for trigger in keys {
        info!("press '{}' then Enter: {}", trigger.key(), describe(*trigger));
    }
    let sink = match &common.preview {
        Some(path) => Sink::Preview(PreviewSink { path: path.clone() }),
        None => Sink::Discard,
    };
    let inbox = Arc::new(TriggerInbox::new());
    spawn_key_reader(Arc::clone(&inbox), keys);
    InteractiveController::new(driver, sink).run(&inbox, TICK_PERIOD)?;
    Ok(())
}

fn describe(trigger: Trigger) -> &'static str {
    match trigger {
        Trigger::Capture => "capture an image",
        Trigger::Translation => "measure translation",
        Trigger::MeanStdDev => "measure the mean/std-dev of a fixed position",
        Trigger::Quit => "quit",
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let common = cli.command.common();
    let config = CalibrationConfig::load(&common.config)?;
    let spec = validate_source(Some(SourceArg::Text(&common.source)))?;

    match &cli.command {
        Command::Calibrate { output, .. } => {
            let location = OutputLocation::new(output.clone(), common.prefix.clone());
            let driver = CalibrationDriver::open(&config, &spec, &NoDevices, location)?;
            run_session(driver, common, &[Trigger::Capture, Trigger::Quit])
        }
        Command::Check { calib_dir, .. } => {
            let driver = CalibrationCheckerDriver::open(
                &config,
                &spec,
                &NoDevices,
                Some(calib_dir.as_path()),
                common.prefix.as_deref(),
            )?;
            run_session(
                driver,
                common,
                &[
                    Trigger::Capture,
                    Trigger::Translation,
                    Trigger::MeanStdDev,
                    Trigger::Quit,
                ],
            )
        }
    }
}

fn init_logging(verbose: u8) {
    #[cfg(feature = "tracing")]
    {
        let _ = verbose;
        videocal::init_tracing(false);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = videocal::init_with_level(videocal::level_from_verbosity(verbose));
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.command.common().verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
