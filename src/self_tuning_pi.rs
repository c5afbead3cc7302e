// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::sync::Mutex;

use canonical_error::{CanonicalError, invalid_argument_error};
use log::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationState {
    // No recalibrate() yet. Output is held.
    Uncalibrated,

    // Step search for the operating point is in progress.
    Calibrating,

    // Step search has settled; the PI law is active.
    Calibrated,
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CalibrationState::Uncalibrated => "Requires calibration...",
            CalibrationState::Calibrating => "Calibrating...",
            CalibrationState::Calibrated => "Calibrated",
        };
        write!(f, "{}", label)
    }
}

// Governs when the step search considers the loop calibrated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationPolicy {
    // An error within max(tolerance_fraction * |setpoint|, min_tolerance) of
    // zero counts as settled.
    pub tolerance_fraction: f64,
    pub min_tolerance: f64,

    // Consecutive settled ticks needed to finish calibrating.
    pub settled_ticks: u32,

    // The step is halved each time the search reverses direction. After this
    // many halvings the operating point is considered bracketed.
    pub max_halvings: u32,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        CalibrationPolicy{
            tolerance_fraction: 0.1,
            min_tolerance: 0.5,
            settled_ticks: 3,
            max_halvings: 5,
        }
    }
}

impl CalibrationPolicy {
    fn validate(&self) -> Result<(), CanonicalError> {
        if !(self.tolerance_fraction.is_finite() && self.tolerance_fraction >= 0.0) ||
            !(self.min_tolerance.is_finite() && self.min_tolerance >= 0.0) ||
            self.settled_ticks < 1
        {
            return Err(invalid_argument_error(
                format!("Invalid calibration policy {:?}", self).as_str()));
        }
        Ok(())
    }
}

// Seeds supplied to recalibrate().
#[derive(Clone, Copy, Debug)]
struct Tuning {
    step_size: f64,
    p: f64,
    i: f64,
}

struct PiState {
    max_output: f64,
    setpoint: f64,
    blocked: bool,
    calibration_state: CalibrationState,

    // None until the first successful recalibrate().
    tuning: Option<Tuning>,

    // Step search. `direction` is 0 before the first move, else +1 or -1.
    current_step: f64,
    direction: f64,
    halvings: u32,
    settled_count: u32,

    // Output the last step search settled on. None until calibrated.
    operating_point: Option<f64>,

    integrator: f64,

    // Always within [0, max_output].
    last_output: f64,
}

// PI controller whose operating point is found by a step search after each
// recalibrate() request. All methods may be called from any thread; each
// call observes and leaves a consistent snapshot of the controller state.
pub struct SelfTuningPi {
    policy: CalibrationPolicy,
    state: Mutex<PiState>,
}

impl SelfTuningPi {
    // Returns InvalidArgument unless `max_output` is positive and finite and
    // `initial_output` is finite. `initial_output` is clamped to
    // [0, max_output].
    pub fn new(max_output: f64, initial_output: f64)
               -> Result<Self, CanonicalError> {
        Self::with_policy(max_output, initial_output, CalibrationPolicy::default())
    }

    pub fn with_policy(max_output: f64, initial_output: f64,
                       policy: CalibrationPolicy) -> Result<Self, CanonicalError> {
        validate_bounds(max_output, initial_output)?;
        policy.validate()?;
        Ok(SelfTuningPi{
            policy,
            state: Mutex::new(PiState{
                max_output,
                setpoint: 0.0,
                blocked: false,
                calibration_state: CalibrationState::Uncalibrated,
                tuning: None,
                current_step: 0.0,
                direction: 0.0,
                halvings: 0,
                settled_count: 0,
                operating_point: None,
                integrator: 0.0,
                last_output: initial_output.clamp(0.0, max_output),
            }),
        })
    }

    pub fn policy(&self) -> &CalibrationPolicy {
        &self.policy
    }

    // Starts a new step search from the current output. Returns
    // InvalidArgument unless every argument is positive and finite and
    // `step_size` does not exceed the output range; state is unchanged in that
    // case.
    pub fn recalibrate(&self, step_size: f64, p_factor: f64, i_factor: f64)
                       -> Result<(), CanonicalError> {
        let mut state = self.state.lock().unwrap();
        validate_tuning(step_size, p_factor, i_factor, state.max_output)?;
        state.tuning = Some(Tuning{step_size, p: p_factor, i: i_factor});
        state.calibration_state = CalibrationState::Calibrating;
        state.current_step = step_size;
        state.direction = 0.0;
        state.halvings = 0;
        state.settled_count = 0;
        state.integrator = 0.0;
        info!("Recalibrating from output {} with step {}, P {}, I {}",
              state.last_output, step_size, p_factor, i_factor);
        Ok(())
    }

    // Called once per control tick with the latest measured signal. Returns
    // the new output, always within [0, max_output]. A non-finite signal
    // (e.g. a NaN batch output meaning "no new data") holds the output.
    pub fn compute_output(&self, signal: f64) -> f64 {
        let mut state = self.state.lock().unwrap();
        if state.blocked {
            return state.last_output;
        }
        if !signal.is_finite() {
            debug!("No usable signal ({}), holding output {}",
                   signal, state.last_output);
            return state.last_output;
        }
        let error = state.setpoint - signal;
        let output = match state.calibration_state {
            CalibrationState::Uncalibrated => state.last_output,
            CalibrationState::Calibrating => self.step_search(&mut state, error),
            CalibrationState::Calibrated => pi_law(&mut state, error),
        };
        assert!(output >= 0.0 && output <= state.max_output,
                "Output {} outside [0, {}]", output, state.max_output);
        state.last_output = output;
        debug!("Signal {} error {} output {}", signal, error, output);
        output
    }

    fn step_search(&self, state: &mut PiState, error: f64) -> f64 {
        let tolerance = f64::max(self.policy.tolerance_fraction * state.setpoint.abs(),
                                 self.policy.min_tolerance);
        if error.abs() <= tolerance {
            state.settled_count += 1;
            if state.settled_count >= self.policy.settled_ticks {
                enter_calibrated(state);
            }
            return state.last_output;
        }
        state.settled_count = 0;

        // More output gives more signal, so a positive error calls for more
        // output.
        let direction = error.signum();
        if state.direction != 0.0 && direction != state.direction {
            state.current_step /= 2.0;
            state.halvings += 1;
            if state.halvings >= self.policy.max_halvings {
                enter_calibrated(state);
                return state.last_output;
            }
        }
        state.direction = direction;
        (state.last_output + direction * state.current_step).clamp(0.0, state.max_output)
    }

    // While blocked, compute_output() returns the held output and changes
    // nothing else.
    pub fn block(&self) {
        self.state.lock().unwrap().blocked = true;
        info!("Controller blocked");
    }

    pub fn unblock(&self) {
        self.state.lock().unwrap().blocked = false;
        info!("Controller unblocked");
    }

    pub fn is_blocked(&self) -> bool {
        self.state.lock().unwrap().blocked
    }

    // Returns InvalidArgument unless `setpoint` is finite and non-negative.
    pub fn set_setpoint(&self, setpoint: f64) -> Result<(), CanonicalError> {
        if !(setpoint.is_finite() && setpoint >= 0.0) {
            return Err(invalid_argument_error(
                format!("Setpoint must be finite and >= 0, got {}", setpoint).as_str()));
        }
        self.state.lock().unwrap().setpoint = setpoint;
        info!("Setpoint {}", setpoint);
        Ok(())
    }

    pub fn setpoint(&self) -> f64 {
        self.state.lock().unwrap().setpoint
    }

    pub fn output(&self) -> f64 {
        self.state.lock().unwrap().last_output
    }

    pub fn max_output(&self) -> f64 {
        self.state.lock().unwrap().max_output
    }

    pub fn calibration_state(&self) -> CalibrationState {
        self.state.lock().unwrap().calibration_state
    }

    pub fn status_label(&self) -> String {
        self.calibration_state().to_string()
    }

    // Output at which the most recent step search settled.
    pub fn operating_point(&self) -> Option<f64> {
        self.state.lock().unwrap().operating_point
    }

    pub fn step_size(&self) -> Option<f64> {
        self.state.lock().unwrap().tuning.map(|t| t.step_size)
    }

    pub fn p(&self) -> Option<f64> {
        self.state.lock().unwrap().tuning.map(|t| t.p)
    }

    pub fn i(&self) -> Option<f64> {
        self.state.lock().unwrap().tuning.map(|t| t.i)
    }
}

fn enter_calibrated(state: &mut PiState) {
    state.calibration_state = CalibrationState::Calibrated;
    state.operating_point = Some(state.last_output);
    state.integrator = 0.0;
    info!("Calibrated at operating point {}", state.last_output);
}

// u = last output + P*e + integral. The integral is not advanced while the
// output is saturated in the direction the error pushes.
fn pi_law(state: &mut PiState, error: f64) -> f64 {
    let Some(tuning) = state.tuning else {
        return state.last_output;
    };
    let integrator = state.integrator + tuning.i * error;
    let unclamped = state.last_output + tuning.p * error + integrator;
    let output = unclamped.clamp(0.0, state.max_output);
    let saturated = (unclamped > state.max_output && error > 0.0) ||
        (unclamped < 0.0 && error < 0.0);
    if !saturated {
        state.integrator = integrator;
    }
    output
}

pub(crate) fn validate_bounds(max_output: f64, initial_output: f64)
                              -> Result<(), CanonicalError> {
    if !(max_output.is_finite() && max_output > 0.0) {
        return Err(invalid_argument_error(
            format!("max_output must be positive, got {}", max_output).as_str()));
    }
    if !initial_output.is_finite() {
        return Err(invalid_argument_error(
            format!("initial_output must be finite, got {}", initial_output).as_str()));
    }
    Ok(())
}

pub(crate) fn validate_tuning(step_size: f64, p_factor: f64, i_factor: f64,
                              max_output: f64) -> Result<(), CanonicalError> {
    for (name, value) in [("step_size", step_size), ("P", p_factor), ("I", i_factor)] {
        if !(value.is_finite() && value > 0.0) {
            return Err(invalid_argument_error(
                format!("{} must be positive, got {}", name, value).as_str()));
        }
    }
    if step_size > max_output {
        return Err(invalid_argument_error(
            format!("step_size {} exceeds output range [0, {}]",
                    step_size, max_output).as_str()));
    }
    Ok(())
}

// mod tests.
