// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use canonical_error::CanonicalError;

use crate::frame::{Gray16Image, LiveMap};

// A learned estimator that maps a frame to a per-pixel emitter density map.
// Model loading and the inference runtime belong to the implementation; the
// analyzer only drives it frame by frame.
//
// Errors returned by the methods below:
//   FailedPrecondition: predict() has not yet succeeded on any image, or
//     local_count_map() is called before maximum_local_count().
//   InvalidArgument: the image bit depth is not supported by the model.
//   Unavailable: the inference session has been closed.
pub trait PredictorTrait {
    // Computes the density map of `image`, which is already cropped to the
    // region of interest.
    fn predict(&mut self, image: &Gray16Image) -> Result<(), CanonicalError>;

    // Integral of the most recent density map, i.e. the estimated number of
    // emitters in the image.
    fn count(&self) -> Result<f64, CanonicalError>;

    // Largest count found in any `box_size` x `box_size` window of the most
    // recent density map. `box_size` is odd.
    fn maximum_local_count(&mut self, box_size: u32) -> Result<f64, CanonicalError>;

    fn density_map(&self) -> Result<LiveMap, CanonicalError>;

    // Map of local counts from the most recent maximum_local_count() call.
    fn local_count_map(&self) -> Result<LiveMap, CanonicalError>;

    // Releases the inference session. Subsequent predict() calls fail with
    // Unavailable.
    fn close(&mut self);
}
