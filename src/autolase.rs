// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// AutoLase activation density estimate.
//
// Every pixel of the active region carries a count of the consecutive frames
// in which it read above `threshold`. A reading at or below threshold resets
// the count to zero. The density measure of a frame is the largest count in
// the region, i.e. the longest ongoing "on" streak. A pixel lit by a single
// transient contributes 1.
//
// The run length is unbounded: there is no averaging window, and a pixel
// that stays lit for N frames reports N.

use canonical_error::{CanonicalError, invalid_argument_error};
use image::Luma;
use imageproc::rect::Rect;
use log::{debug, info};

use alica_elements::frame::{Frame, LiveMap, Pixels};

pub const DEFAULT_THRESHOLD: u32 = 80;

#[derive(Debug)]
pub struct AutoLase {
    // Pixels strictly above this value count as "on".
    threshold: u32,

    // None means the whole frame.
    region: Option<Rect>,

    // Absent until the first frame after construction or after a threshold
    // or region change.
    accumulator: Option<Accumulator>,

    current_density: f64,
}

// On-streak counts for the pixels of one resolved region, row-major.
#[derive(Debug)]
struct Accumulator {
    region: Rect,
    counts: Vec<u32>,
}

impl Accumulator {
    fn new(region: Rect) -> Self {
        let len = region.width() as usize * region.height() as usize;
        Accumulator{region, counts: vec![0; len]}
    }

    // Advances every count by one frame and returns the largest count.
    // `pixels` is the full frame, `stride` its width. The region has already
    // been validated against the frame.
    fn advance<T: Copy + Into<u32>>(&mut self, pixels: &[T], stride: u32,
                                    threshold: u32) -> u32 {
        let x0 = self.region.left() as usize;
        let y0 = self.region.top() as usize;
        let width = self.region.width() as usize;
        let stride = stride as usize;

        let mut max_count = 0_u32;
        for (j, count_row) in self.counts.chunks_exact_mut(width).enumerate() {
            let start = (y0 + j) * stride + x0;
            let pixel_row = &pixels[start..start + width];
            for (count, &pixel) in count_row.iter_mut().zip(pixel_row) {
                let value: u32 = pixel.into();
                if value > threshold {
                    *count = count.saturating_add(1);
                } else {
                    *count = 0;
                }
                max_count = max_count.max(*count);
            }
        }
        max_count
    }
}

impl Default for AutoLase {
    fn default() -> Self {
        AutoLase{
            threshold: DEFAULT_THRESHOLD,
            region: None,
            accumulator: None,
            current_density: 0.0,
        }
    }
}

impl AutoLase {
    // Returns InvalidArgument if `threshold` is less than 1.
    pub fn new(threshold: u32) -> Result<Self, CanonicalError> {
        let mut autolase = AutoLase::default();
        autolase.configure(threshold)?;
        Ok(autolase)
    }

    // Returns InvalidArgument if `threshold` is less than 1, in which case
    // nothing changes. Otherwise the accumulator is discarded.
    pub fn configure(&mut self, threshold: u32) -> Result<(), CanonicalError> {
        if threshold < 1 {
            return Err(invalid_argument_error(
                format!("AutoLase threshold must be at least 1, got {}",
                        threshold).as_str()));
        }
        info!("AutoLase threshold {}", threshold);
        self.threshold = threshold;
        self.accumulator = None;
        Ok(())
    }

    // Takes effect on the next update(). The accumulator is discarded even if
    // `region` is unchanged.
    pub fn set_region(&mut self, region: Option<Rect>) {
        self.region = region;
        self.accumulator = None;
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn region(&self) -> Option<Rect> {
        self.region
    }

    // Processes the next frame and returns the new density value.
    // Returns InvalidArgument if the region does not fit inside `frame`; the
    // accumulator is untouched in that case.
    pub fn update(&mut self, frame: &Frame) -> Result<f64, CanonicalError> {
        let region = frame.resolve_region(self.region.as_ref())?;

        // With no explicit region, a change of frame size also changes the
        // region.
        if self.accumulator.as_ref().is_some_and(|acc| acc.region != region) {
            debug!("Frame size changed, reallocating accumulator");
            self.accumulator = None;
        }
        let threshold = self.threshold;
        let accumulator =
            self.accumulator.get_or_insert_with(|| Accumulator::new(region));
        let max_count = match frame.pixels() {
            Pixels::Gray8(p) => accumulator.advance(p, frame.width(), threshold),
            Pixels::Gray16(p) => accumulator.advance(p, frame.width(), threshold),
        };
        self.current_density = max_count as f64;
        Ok(self.current_density)
    }

    pub fn current_density(&self) -> f64 {
        self.current_density
    }

    // Count for pixel (i, j) relative to the region origin. None if there is
    // no accumulator yet or (i, j) is outside the region.
    pub fn accumulator_count(&self, i: u32, j: u32) -> Option<u32> {
        let acc = self.accumulator.as_ref()?;
        if i >= acc.region.width() || j >= acc.region.height() {
            return None;
        }
        Some(acc.counts[j as usize * acc.region.width() as usize + i as usize])
    }

    // Snapshot of the accumulator, one f32 pixel per region pixel.
    pub fn accumulator_map(&self) -> Option<LiveMap> {
        let acc = self.accumulator.as_ref()?;
        let width = acc.region.width();
        Some(LiveMap::from_fn(width, acc.region.height(), |x, y| {
            Luma([acc.counts[y as usize * width as usize + x as usize] as f32])
        }))
    }
}

// mod tests.
