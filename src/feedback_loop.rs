// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use canonical_error::{CanonicalError, invalid_argument_error};
use log::{debug, error, info};

use alica_elements::actuator_trait::ActuatorTrait;
use alica_elements::value_stats::{ValueStats, ValueStatsAccumulator};

use crate::analyzer::Analyzer;
use crate::controller::Controller;

// Which Analyzer output feeds the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalSource {
    // Mean of the frames since the previous tick; NaN if there were none.
    Batch,

    // Most recent frame only.
    Intermittent,
}

#[derive(Clone, Debug, Default)]
pub struct LoopStatus {
    pub tick_count: u64,

    // None before the first tick.
    pub last_signal: Option<f64>,
    pub last_output: Option<f64>,

    // Time taken by each tick, in milliseconds.
    pub tick_latency_ms: ValueStats,
}

// Drives a Controller from an Analyzer at a fixed tick interval, forwarding
// each output to an actuator.
pub struct FeedbackLoop {
    // Our state, shared between FeedbackLoop methods and the worker thread.
    state: Arc<Mutex<LoopState>>,

    // Signalled by stop() to wake the worker, and by the worker when it exits.
    wakeup: Arc<Condvar>,
}

// State shared between worker thread and the FeedbackLoop methods.
struct LoopState {
    analyzer: Arc<Analyzer>,
    controller: Arc<Controller>,
    actuator: Box<dyn ActuatorTrait + Send>,
    signal_source: SignalSource,
    tick_interval: Duration,

    tick_count: u64,
    last_signal: Option<f64>,
    last_output: Option<f64>,
    tick_latency: ValueStatsAccumulator,

    // Set by stop(); the worker thread exits when it sees this.
    stop_request: bool,

    worker_thread: Option<thread::JoinHandle<()>>,
}

impl Drop for FeedbackLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl FeedbackLoop {
    // The loop is idle until start() is called. Returns InvalidArgument if
    // `tick_interval` is zero.
    pub fn new(analyzer: Arc<Analyzer>, controller: Arc<Controller>,
               actuator: Box<dyn ActuatorTrait + Send>,
               signal_source: SignalSource, tick_interval: Duration)
               -> Result<Self, CanonicalError> {
        if tick_interval.is_zero() {
            return Err(invalid_argument_error("tick_interval must be positive"));
        }
        Ok(FeedbackLoop{
            state: Arc::new(Mutex::new(LoopState{
                analyzer,
                controller,
                actuator,
                signal_source,
                tick_interval,
                tick_count: 0,
                last_signal: None,
                last_output: None,
                tick_latency: ValueStatsAccumulator::new(100),
                stop_request: false,
                worker_thread: None,
            })),
            wakeup: Arc::new(Condvar::new()),
        })
    }

    pub fn controller(&self) -> Arc<Controller> {
        self.state.lock().unwrap().controller.clone()
    }

    pub fn set_signal_source(&self, signal_source: SignalSource) {
        self.state.lock().unwrap().signal_source = signal_source;
    }

    // Takes effect after the current interval.
    pub fn set_tick_interval(&self, tick_interval: Duration)
                             -> Result<(), CanonicalError> {
        if tick_interval.is_zero() {
            return Err(invalid_argument_error("tick_interval must be positive"));
        }
        self.state.lock().unwrap().tick_interval = tick_interval;
        Ok(())
    }

    // Starts ticking on a worker thread. No-op if already running.
    pub fn start(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.worker_thread.is_some() {
            return;
        }
        info!("Starting feedback loop with {} controller, tick interval {:?}",
              state.controller.name(), state.tick_interval);
        let cloned_state = self.state.clone();
        let cloned_condvar = self.wakeup.clone();
        state.worker_thread = Some(thread::spawn(|| {
            FeedbackLoop::worker(cloned_state, cloned_condvar);
        }));
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().worker_thread.is_some()
    }

    // Waits for the worker thread to exit. The loop can be start()ed again.
    pub fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.worker_thread.is_none() {
            return;
        }
        state.stop_request = true;
        self.wakeup.notify_all();
        while state.worker_thread.is_some() {
            state = self.wakeup.wait(state).unwrap();
        }
    }

    // Runs a single control step now, independent of the worker thread.
    // Returns the controller output.
    pub fn tick(&self) -> f64 {
        FeedbackLoop::tick_locked(&mut self.state.lock().unwrap())
    }

    pub fn status(&self) -> LoopStatus {
        let state = self.state.lock().unwrap();
        LoopStatus{
            tick_count: state.tick_count,
            last_signal: state.last_signal,
            last_output: state.last_output,
            tick_latency_ms: state.tick_latency.value_stats().clone(),
        }
    }

    fn tick_locked(state: &mut LoopState) -> f64 {
        let start = Instant::now();
        let signal = match state.signal_source {
            SignalSource::Batch => state.analyzer.batch_output(),
            SignalSource::Intermittent => state.analyzer.intermittent_output(),
        };
        // NaN goes through as is; the controller holds its output.
        let output = state.controller.compute_output(signal);
        if let Err(e) = state.actuator.set_output(output) {
            error!("Error setting actuator output {}: {}", output, e.to_string());
        }
        state.tick_count += 1;
        state.last_signal = Some(signal);
        state.last_output = Some(output);
        state.tick_latency.add_value(start.elapsed().as_secs_f64() * 1000.0);
        debug!("Tick {}: signal {} output {}", state.tick_count, signal, output);
        output
    }

    fn worker(state: Arc<Mutex<LoopState>>, wakeup: Arc<Condvar>) {
        let mut next_tick = Instant::now();
        let mut locked_state = state.lock().unwrap();
        loop {
            if locked_state.stop_request {
                info!("Stopping feedback loop");
                locked_state.stop_request = false;
                break;
            }
            let now = Instant::now();
            if next_tick > now {
                locked_state = wakeup.wait_timeout(
                    locked_state, next_tick - now).unwrap().0;
                continue;
            }
            FeedbackLoop::tick_locked(&mut locked_state);
            next_tick += locked_state.tick_interval;
            if next_tick < now {
                // Fell behind; don't try to catch up with a burst of ticks.
                next_tick = now + locked_state.tick_interval;
            }
        }
        locked_state.worker_thread = None;
        wakeup.notify_all();
    }
}

// mod tests.
