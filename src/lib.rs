// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod analyzer;
pub mod autolase;
pub mod controller;
pub mod feedback_loop;
pub mod manual_controller;
pub mod self_tuning_pi;
pub mod simulated_sample;
