// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use log::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry, EnvFilter};
use tracing_appender::non_blocking::NonBlockingBuilder;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use alica::analyzer::Analyzer;
use alica::controller::Controller;
use alica::feedback_loop::{FeedbackLoop, SignalSource};
use alica::simulated_sample::{SampleParams, SimulatedSample};
use alica_elements::frame::Pixels;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ControllerKind {
    SelfTuning,
    Manual,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Source {
    Batch,
    Intermittent,
}

/// Runs the AutoLase analyzer and a controller in closed loop against a
/// simulated field of blinking emitters.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Simulated frame width, pixels.
    #[arg(long, default_value = "64")]
    width: u32,

    /// Simulated frame height, pixels.
    #[arg(long, default_value = "64")]
    height: u32,

    /// Number of emitter sites in the simulated sample.
    #[arg(long, default_value = "50")]
    emitters: usize,

    /// Per-frame activation probability per unit of laser output.
    #[arg(long, default_value = "0.05")]
    activation_per_output: f64,

    /// Seed for the simulated sample.
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Pixel side length in the sample plane, micrometers.
    #[arg(long, default_value = "0.1")]
    pixel_size_um: f64,

    /// AutoLase intensity threshold.
    #[arg(long, default_value = "80")]
    threshold: u32,

    #[arg(long, value_enum, default_value = "self-tuning")]
    controller: ControllerKind,

    /// Target AutoLase density (max. on time, frames).
    #[arg(long, default_value = "5.0")]
    setpoint: f64,

    /// Upper bound of the laser output, mW.
    #[arg(long, default_value = "20.0")]
    max_output: f64,

    /// Laser output before the first tick, mW.
    #[arg(long, default_value = "0.0")]
    initial_output: f64,

    /// Calibration step size, mW.
    #[arg(long, default_value = "2.0")]
    step: f64,

    /// Proportional factor.
    #[arg(long, default_value = "0.1")]
    p_factor: f64,

    /// Integral factor.
    #[arg(long, default_value = "0.03")]
    i_factor: f64,

    /// Time between simulated frames, seconds.
    #[arg(long, value_parser = parse_duration, default_value = "0.01")]
    frame_interval: Duration,

    /// Time between control ticks, seconds.
    #[arg(long, value_parser = parse_duration, default_value = "0.1")]
    tick_interval: Duration,

    /// How long to run, seconds.
    #[arg(long, value_parser = parse_duration, default_value = "30.0")]
    duration: Duration,

    /// Analyzer output fed to the controller.
    #[arg(long, value_enum, default_value = "batch")]
    signal_source: Source,

    #[arg(long, default_value = ".")]
    log_dir: String,

    #[arg(long, default_value = "alica_log.txt")]
    log_file: String,
}

fn parse_duration(arg: &str)
                  -> Result<std::time::Duration, std::num::ParseFloatError> {
    let seconds = arg.parse()?;
    Ok(std::time::Duration::from_secs_f64(seconds))
}

fn main() {
    let args = Args::parse();

    // Set up logging.
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&args.log_file)
        .max_log_files(10)
        .build(&args.log_dir).unwrap();

    // Create non-blocking writers for both the file and stdout
    let (non_blocking_file, _guard1) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(file_appender);
    let (non_blocking_stdout, _guard2) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(std::io::stdout());
    registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking_stdout))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking_file))
        .init();

    let got_signal = Arc::new(AtomicBool::new(false));
    let got_signal2 = got_signal.clone();
    ctrlc::set_handler(move || {
        info!("Got control-c");
        got_signal2.store(true, AtomicOrdering::Relaxed);
    }).unwrap();

    if let Err(e) = run(&args, &got_signal) {
        error!("{}", e.to_string());
        std::process::exit(1);
    }
}

fn run(args: &Args, got_signal: &AtomicBool)
       -> Result<(), canonical_error::CanonicalError> {
    let params = SampleParams{
        width: args.width,
        height: args.height,
        num_emitters: args.emitters,
        activation_per_output: args.activation_per_output,
        ..Default::default()
    };
    let mut sample = SimulatedSample::new(params, args.seed)?;
    let analyzer = Arc::new(Analyzer::autolase(args.threshold)?);
    let controller = match args.controller {
        ControllerKind::SelfTuning => {
            let c = Controller::self_tuning_pi(args.max_output, args.initial_output)?;
            c.set_setpoint(args.setpoint)?;
            c.recalibrate(args.step, args.p_factor, args.i_factor)?;
            c
        },
        ControllerKind::Manual => Controller::manual(args.max_output, args.initial_output)?,
    };
    let signal_source = match args.signal_source {
        Source::Batch => SignalSource::Batch,
        Source::Intermittent => SignalSource::Intermittent,
    };
    let mut feedback = FeedbackLoop::new(
        analyzer.clone(), Arc::new(controller), Box::new(sample.laser()),
        signal_source, args.tick_interval)?;
    info!("Running {} with {} controller for {:?}",
          analyzer.name(), feedback.controller().name(), args.duration);
    feedback.start();

    let start = Instant::now();
    let mut last_report = start;
    let mut timestamp_ms = 0;
    while start.elapsed() < args.duration && !got_signal.load(AtomicOrdering::Relaxed) {
        let pixels = sample.next_frame();
        analyzer.process_image(Pixels::Gray16(&pixels), params.width, params.height,
                               args.pixel_size_um, timestamp_ms)?;
        timestamp_ms += args.frame_interval.as_millis() as u64;
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let status = feedback.status();
            info!("Tick {} ({}): {} {}, laser {:.3}",
                  status.tick_count,
                  feedback.controller().status_label(),
                  analyzer.intermittent_output(),
                  analyzer.short_return_description(),
                  sample.laser_output());
        }
        thread::sleep(args.frame_interval);
    }
    feedback.stop();

    let status = feedback.status();
    let stats = analyzer.output_stats();
    info!("Finished after {} ticks; final laser output {:.3}",
          status.tick_count, sample.laser_output());
    info!("Density over last {} frames: mean {:.2} stddev {:.2}",
          stats.session_count.min(100), stats.recent.mean, stats.recent.stddev);
    info!("Tick latency {:.3}ms mean, {:.3}ms max",
          status.tick_latency_ms.session.mean, status.tick_latency_ms.session.max);
    analyzer.dispose();
    Ok(())
}
