// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::{Arc, Mutex};

use canonical_error::{CanonicalError, invalid_argument_error};
use log::debug;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rand::seq::index;

use alica_elements::actuator_trait::ActuatorTrait;

// Highest activation probability of an emitter, regardless of laser output.
const MAX_ACTIVATION_PROBABILITY: f64 = 0.95;

#[derive(Clone, Copy, Debug)]
pub struct SampleParams {
    pub width: u32,
    pub height: u32,

    // Number of distinct emitter sites. At most width * height.
    pub num_emitters: usize,

    // Per-frame probability that a site is on, per unit of laser output.
    pub activation_per_output: f64,

    // Intensity of an emitter site that is on.
    pub brightness: u16,

    // Dark pixels are uniform noise in [0, background_max]. Keep this at or
    // below the AutoLase threshold.
    pub background_max: u16,
}

impl Default for SampleParams {
    fn default() -> Self {
        SampleParams{
            width: 64,
            height: 64,
            num_emitters: 50,
            activation_per_output: 0.05,
            brightness: 1000,
            background_max: 60,
        }
    }
}

// A field of blinking emitters whose activity rises with the laser output.
// Deterministic for a given seed.
pub struct SimulatedSample {
    params: SampleParams,

    // Row-major pixel indices of the emitter sites.
    emitter_sites: Vec<usize>,

    // Written by the SimulatedLaser.
    laser_output: Arc<Mutex<f64>>,

    rng: StdRng,
}

impl SimulatedSample {
    // Returns InvalidArgument for empty dimensions, more emitters than
    // pixels, or a negative or non-finite activation_per_output.
    pub fn new(params: SampleParams, seed: u64) -> Result<Self, CanonicalError> {
        let num_pixels = params.width as usize * params.height as usize;
        if num_pixels == 0 {
            return Err(invalid_argument_error(
                format!("Empty sample {}x{}", params.width, params.height).as_str()));
        }
        if params.num_emitters > num_pixels {
            return Err(invalid_argument_error(
                format!("{} emitters do not fit in {} pixels",
                        params.num_emitters, num_pixels).as_str()));
        }
        if !(params.activation_per_output.is_finite() &&
             params.activation_per_output >= 0.0) {
            return Err(invalid_argument_error(
                format!("Invalid activation_per_output {}",
                        params.activation_per_output).as_str()));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let emitter_sites =
            index::sample(&mut rng, num_pixels, params.num_emitters).into_vec();
        Ok(SimulatedSample{
            params,
            emitter_sites,
            laser_output: Arc::new(Mutex::new(0.0)),
            rng,
        })
    }

    pub fn params(&self) -> &SampleParams {
        &self.params
    }

    // Actuator that sets the laser output seen by this sample.
    pub fn laser(&self) -> SimulatedLaser {
        SimulatedLaser{output: self.laser_output.clone()}
    }

    pub fn laser_output(&self) -> f64 {
        *self.laser_output.lock().unwrap()
    }

    pub fn activation_probability(&self) -> f64 {
        f64::min(MAX_ACTIVATION_PROBABILITY,
                 self.params.activation_per_output * self.laser_output())
    }

    // Renders the next frame: width * height pixels, row-major.
    pub fn next_frame(&mut self) -> Vec<u16> {
        let probability = self.activation_probability();
        let background_max = self.params.background_max;
        let num_pixels = self.params.width as usize * self.params.height as usize;
        let mut pixels: Vec<u16> = (0..num_pixels)
            .map(|_| self.rng.gen_range(0..=background_max))
            .collect();
        let mut num_on = 0;
        for &site in &self.emitter_sites {
            if self.rng.gen::<f64>() < probability {
                pixels[site] = self.params.brightness;
                num_on += 1;
            }
        }
        debug!("Simulated frame with {} of {} emitters on",
               num_on, self.emitter_sites.len());
        pixels
    }
}

// Laser whose output drives a SimulatedSample.
#[derive(Clone)]
pub struct SimulatedLaser {
    output: Arc<Mutex<f64>>,
}

impl SimulatedLaser {
    pub fn output(&self) -> f64 {
        *self.output.lock().unwrap()
    }
}

impl ActuatorTrait for SimulatedLaser {
    fn set_output(&mut self, value: f64) -> Result<(), CanonicalError> {
        if !(value.is_finite() && value >= 0.0) {
            return Err(invalid_argument_error(
                format!("Invalid laser output {}", value).as_str()));
        }
        *self.output.lock().unwrap() = value;
        Ok(())
    }
}

// mod tests.
