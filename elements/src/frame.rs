// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use canonical_error::{CanonicalError,
                      failed_precondition_error, invalid_argument_error};
use image::{ImageBuffer, Luma};
use imageproc::rect::Rect;

// Owned 16 bit single channel image. This is what external estimators
// (predictors, localizers) receive.
pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

// Rendering of an estimator's internal per-pixel state (accumulator, density
// map, local count map) for live viewing.
pub type LiveMap = ImageBuffer<Luma<f32>, Vec<f32>>;

// Raw pixel data of a single channel camera frame, row-major, no padding.
#[derive(Clone, Copy, Debug)]
pub enum Pixels<'a> {
    Gray8(&'a [u8]),
    Gray16(&'a [u16]),
}

impl Pixels<'_> {
    pub fn len(&self) -> usize {
        match self {
            Pixels::Gray8(p) => p.len(),
            Pixels::Gray16(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bit_depth(&self) -> u32 {
        match self {
            Pixels::Gray8(_) => 8,
            Pixels::Gray16(_) => 16,
        }
    }
}

// Borrowed view of a camera frame. Not retained beyond the call that
// supplies it.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    width: u32,
    height: u32,
    pixels: Pixels<'a>,
}

impl<'a> Frame<'a> {
    // Returns FailedPrecondition if either dimension is zero or if the pixel
    // buffer length is not exactly `width` * `height`.
    pub fn new(pixels: Pixels<'a>, width: u32, height: u32)
               -> Result<Self, CanonicalError> {
        if width == 0 || height == 0 {
            return Err(failed_precondition_error(
                format!("Frame dimensions {}x{} are empty", width, height).as_str()));
        }
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(failed_precondition_error(
                format!("Frame {}x{} needs {} pixels, buffer has {}",
                        width, height, expected, pixels.len()).as_str()));
        }
        Ok(Frame{width, height, pixels})
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> Pixels<'a> {
        self.pixels
    }

    pub fn bounds(&self) -> Rect {
        Rect::at(0, 0).of_size(self.width, self.height)
    }

    // Intensity at (x, y) in full frame coordinates. Panics if out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> u16 {
        assert!(x < self.width && y < self.height);
        let index = y as usize * self.width as usize + x as usize;
        match self.pixels {
            Pixels::Gray8(p) => p[index] as u16,
            Pixels::Gray16(p) => p[index],
        }
    }

    // Resolves an optional region of interest against this frame. None means
    // the whole frame. Returns InvalidArgument if the region is not entirely
    // within the frame.
    pub fn resolve_region(&self, roi: Option<&Rect>) -> Result<Rect, CanonicalError> {
        let roi = match roi {
            None => return Ok(self.bounds()),
            Some(r) => *r,
        };
        // Rect::right() and bottom() can overflow i32 for far-off regions.
        if roi.left() < 0 || roi.top() < 0 ||
            roi.left() as i64 + roi.width() as i64 > self.width as i64 ||
            roi.top() as i64 + roi.height() as i64 > self.height as i64
        {
            return Err(invalid_argument_error(
                format!("Region {:?} exceeds frame {}x{}",
                        roi, self.width, self.height).as_str()));
        }
        Ok(roi)
    }

    // Copies the given region (which must already be resolved against this
    // frame) into an owned 16 bit image. 8 bit pixels are widened without
    // rescaling.
    pub fn crop(&self, region: &Rect) -> Gray16Image {
        let (x, y) = (region.left() as u32, region.top() as u32);
        Gray16Image::from_fn(region.width(), region.height(), |cx, cy| {
            Luma([self.pixel(x + cx, y + cy)])
        })
    }
}

// Builds a region of interest. Returns InvalidArgument for a negative origin
// or a region smaller than 1x1.
pub fn region_of_interest(x: i32, y: i32, width: u32, height: u32)
                          -> Result<Rect, CanonicalError> {
    if width < 1 || height < 1 {
        return Err(invalid_argument_error(
            format!("Region {}x{} is smaller than 1x1", width, height).as_str()));
    }
    if x < 0 || y < 0 {
        return Err(invalid_argument_error(
            format!("Region origin ({}, {}) is negative", x, y).as_str()));
    }
    // The far edge must be representable as a Rect coordinate.
    if x as i64 + width as i64 - 1 > i32::MAX as i64 ||
        y as i64 + height as i64 - 1 > i32::MAX as i64
    {
        return Err(invalid_argument_error(
            format!("Region {}x{} at ({}, {}) exceeds coordinate range",
                    width, height, x, y).as_str()));
    }
    Ok(Rect::at(x, y).of_size(width, height))
}

// Area covered by `region`, in square micrometers.
pub fn field_of_view_area(region: &Rect, pixel_size_um: f64) -> f64 {
    pixel_size_um * pixel_size_um * region.width() as f64 * region.height() as f64
}

// mod tests.
