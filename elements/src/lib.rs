// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod actuator_trait;
pub mod frame;
pub mod localizer_trait;
pub mod predictor_trait;
pub mod value_stats;
