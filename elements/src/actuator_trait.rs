// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use canonical_error::CanonicalError;

// Hardware boundary for the controlled quantity, e.g. an activation laser.
// `value` is in the controller's output units and is already bounded to
// [0, max_output].
pub trait ActuatorTrait {
    fn set_output(&mut self, value: f64) -> Result<(), CanonicalError>;
}
