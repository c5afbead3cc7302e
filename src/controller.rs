// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use canonical_error::{CanonicalError, failed_precondition_error};

use crate::manual_controller::ManualController;
use crate::self_tuning_pi::{CalibrationState, SelfTuningPi};

// The controllers the feedback loop can drive. Chosen at construction.
pub enum Controller {
    SelfTuningPi(SelfTuningPi),
    Manual(ManualController),
}

impl Controller {
    // See SelfTuningPi::new().
    pub fn self_tuning_pi(max_output: f64, initial_output: f64)
                          -> Result<Self, CanonicalError> {
        Ok(Controller::SelfTuningPi(SelfTuningPi::new(max_output, initial_output)?))
    }

    pub fn manual(max_output: f64, initial_output: f64)
                  -> Result<Self, CanonicalError> {
        Ok(Controller::Manual(ManualController::new(max_output, initial_output)?))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Controller::SelfTuningPi(_) => "SelfTuningPI",
            Controller::Manual(_) => "Manual",
        }
    }

    // Called once per control tick. The result is within [0, max_output()].
    pub fn compute_output(&self, signal: f64) -> f64 {
        match self {
            Controller::SelfTuningPi(c) => c.compute_output(signal),
            Controller::Manual(c) => c.compute_output(signal),
        }
    }

    pub fn output(&self) -> f64 {
        match self {
            Controller::SelfTuningPi(c) => c.output(),
            Controller::Manual(c) => c.output(),
        }
    }

    pub fn max_output(&self) -> f64 {
        match self {
            Controller::SelfTuningPi(c) => c.max_output(),
            Controller::Manual(c) => c.max_output(),
        }
    }

    pub fn block(&self) {
        match self {
            Controller::SelfTuningPi(c) => c.block(),
            Controller::Manual(c) => c.block(),
        }
    }

    pub fn unblock(&self) {
        match self {
            Controller::SelfTuningPi(c) => c.unblock(),
            Controller::Manual(c) => c.unblock(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        match self {
            Controller::SelfTuningPi(c) => c.is_blocked(),
            Controller::Manual(c) => c.is_blocked(),
        }
    }

    // Returns InvalidArgument for non-positive arguments or a step larger than
    // the output range.
    pub fn recalibrate(&self, step_size: f64, p_factor: f64, i_factor: f64)
                       -> Result<(), CanonicalError> {
        match self {
            Controller::SelfTuningPi(c) => c.recalibrate(step_size, p_factor, i_factor),
            Controller::Manual(c) => c.recalibrate(step_size, p_factor, i_factor),
        }
    }

    // Self-tuning PI only; FailedPrecondition for the manual controller.
    pub fn set_setpoint(&self, setpoint: f64) -> Result<(), CanonicalError> {
        match self {
            Controller::SelfTuningPi(c) => c.set_setpoint(setpoint),
            Controller::Manual(_) => Err(failed_precondition_error(
                "Manual controller has no setpoint")),
        }
    }

    pub fn calibration_state(&self) -> Option<CalibrationState> {
        match self {
            Controller::SelfTuningPi(c) => Some(c.calibration_state()),
            Controller::Manual(_) => None,
        }
    }

    pub fn status_label(&self) -> String {
        match self {
            Controller::SelfTuningPi(c) => c.status_label(),
            Controller::Manual(_) => "Manual".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use canonical_error::CanonicalErrorCode;
    use super::*;

    #[test]
    fn test_self_tuning_variant() {
        let controller = Controller::self_tuning_pi(10.0, 2.0).unwrap();
        assert_eq!(controller.name(), "SelfTuningPI");
        assert_eq!(controller.status_label(), "Requires calibration...");
        assert_eq!(controller.calibration_state(),
                   Some(CalibrationState::Uncalibrated));
        controller.set_setpoint(5.0).unwrap();
        controller.recalibrate(1.0, 0.1, 0.1).unwrap();
        assert_eq!(controller.compute_output(0.0), 3.0);
        controller.block();
        assert!(controller.is_blocked());
        assert_eq!(controller.compute_output(0.0), 3.0);
        controller.unblock();
        assert_eq!(controller.compute_output(0.0), 4.0);
        assert_eq!(controller.output(), 4.0);
        assert_eq!(controller.max_output(), 10.0);
    }

    #[test]
    fn test_manual_variant() {
        let controller = Controller::manual(10.0, 2.0).unwrap();
        assert_eq!(controller.name(), "Manual");
        assert_eq!(controller.status_label(), "Manual");
        assert_eq!(controller.calibration_state(), None);
        assert!(controller.set_setpoint(1.0).unwrap_err().code ==
                CanonicalErrorCode::FailedPrecondition);
        assert!(controller.recalibrate(0.0, 1.0, 1.0).is_err());
        for signal in [0.0, 50.0, f64::NAN] {
            assert_eq!(controller.compute_output(signal), 2.0);
        }
    }

}  // mod tests.
