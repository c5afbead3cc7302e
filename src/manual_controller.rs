// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Mutex;

use canonical_error::CanonicalError;
use log::info;

use crate::self_tuning_pi::{validate_bounds, validate_tuning};

struct ManualState {
    max_output: f64,

    // Set by the operator; within [0, max_output].
    output: f64,

    // While Some, compute_output() returns this instead of `output`.
    held: Option<f64>,
}

// Controller without feedback: the output is whatever the operator last set.
pub struct ManualController {
    state: Mutex<ManualState>,
}

impl ManualController {
    // Returns InvalidArgument unless `max_output` is positive and finite and
    // `initial_output` is finite. `initial_output` is clamped to
    // [0, max_output].
    pub fn new(max_output: f64, initial_output: f64)
               -> Result<Self, CanonicalError> {
        validate_bounds(max_output, initial_output)?;
        Ok(ManualController{
            state: Mutex::new(ManualState{
                max_output,
                output: initial_output.clamp(0.0, max_output),
                held: None,
            }),
        })
    }

    // Clamped to [0, max_output]. NaN is ignored. Returns the new setting.
    pub fn set_output(&self, value: f64) -> f64 {
        let mut state = self.state.lock().unwrap();
        if !value.is_nan() {
            state.output = value.clamp(0.0, state.max_output);
            info!("Manual output {}", state.output);
        }
        state.output
    }

    // The signal is ignored.
    pub fn compute_output(&self, _signal: f64) -> f64 {
        let state = self.state.lock().unwrap();
        state.held.unwrap_or(state.output)
    }

    pub fn output(&self) -> f64 {
        self.compute_output(f64::NAN)
    }

    pub fn max_output(&self) -> f64 {
        self.state.lock().unwrap().max_output
    }

    // Freezes the output at its current value; set_output() calls made while
    // blocked take effect on unblock().
    pub fn block(&self) {
        let mut state = self.state.lock().unwrap();
        if state.held.is_none() {
            state.held = Some(state.output);
        }
    }

    pub fn unblock(&self) {
        self.state.lock().unwrap().held = None;
    }

    pub fn is_blocked(&self) -> bool {
        self.state.lock().unwrap().held.is_some()
    }

    // There is nothing to calibrate, but the arguments are held to the same
    // rules as for the self-tuning controller.
    pub fn recalibrate(&self, step_size: f64, p_factor: f64, i_factor: f64)
                       -> Result<(), CanonicalError> {
        let max_output = self.state.lock().unwrap().max_output;
        validate_tuning(step_size, p_factor, i_factor, max_output)
    }
}

// mod tests.
