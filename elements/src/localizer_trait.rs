// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use canonical_error::CanonicalError;

use crate::frame::{Gray16Image, LiveMap};

// A single-molecule detection core that localizes individual emitters in a
// frame. The analyzer only needs the number of localizations.
pub trait LocalizerTrait {
    // Localizes emitters in `image` (already cropped to the region of
    // interest) and returns how many were found. `frame_index` increases by
    // one for each frame handed to this localizer.
    fn count_localizations(&mut self, image: &Gray16Image, frame_index: u64)
                           -> Result<f64, CanonicalError>;

    // Rendering of the most recent localizations, if the core offers one.
    fn localization_map(&self) -> Option<LiveMap> {
        None
    }

    fn close(&mut self) {}
}
