// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Mutex;

use canonical_error::{CanonicalError,
                      failed_precondition_error, invalid_argument_error};
use imageproc::rect::Rect;
use log::{debug, error, info};

use alica_elements::frame::{Frame, Gray16Image, LiveMap, Pixels,
                            field_of_view_area};
use alica_elements::localizer_trait::LocalizerTrait;
use alica_elements::predictor_trait::PredictorTrait;
use alica_elements::value_stats::{ValueStats, ValueStatsAccumulator};

use crate::autolase::AutoLase;

// Normalized outputs are reported per 10um x 10um = 100um^2 of field of view.
pub const SCALE_FACTOR: f64 = 100.0;

// Default square window for the maximum local count.
pub const DEFAULT_BOX_SIZE: u32 = 7;

// How many recent outputs `output_stats()` summarizes.
const STATS_CAPACITY: usize = 100;

// The estimators an Analyzer can wrap. Chosen at construction.
enum Estimator {
    AutoLase(AutoLase),

    // Learned density map. Reports either the total count normalized by the
    // field of view area, or the maximum count within any `box_size` window.
    DensityMap {
        predictor: Box<dyn PredictorTrait + Send>,
        box_size: u32,
        max_local_count: bool,
    },

    // Count of localized emitters, normalized by the field of view area.
    Localization {
        localizer: Box<dyn LocalizerTrait + Send>,
        frame_index: u64,
    },
}

struct CoreState {
    estimator: Estimator,

    // None means the whole frame.
    region: Option<Rect>,
}

struct OutputCache {
    // Output of the most recently processed frame.
    intermittent_output: f64,

    // One entry per frame processed since the last batch_output() call.
    output_history: Vec<f64>,

    stats: ValueStatsAccumulator,
}

struct LiveView {
    enabled: bool,

    // Rendering of the estimator state as of the most recent frame. Always
    // matches the current region and mode; discarded when either changes.
    map: Option<LiveMap>,
}

// Reduces camera frames to a scalar activation density signal.
//
// process_image() is called from the acquisition thread; all other methods
// may be called concurrently from any thread. Each piece of state has its own
// mutex, and when more than one is held they are taken in the order `core`,
// `outputs`, `live_view`. Readers of the outputs never wait on an estimator
// computation.
pub struct Analyzer {
    core: Mutex<CoreState>,
    outputs: Mutex<OutputCache>,
    live_view: Mutex<LiveView>,
}

impl Analyzer {
    // Returns InvalidArgument if `threshold` is less than 1.
    pub fn autolase(threshold: u32) -> Result<Self, CanonicalError> {
        Ok(Self::with_estimator(Estimator::AutoLase(AutoLase::new(threshold)?)))
    }

    pub fn density_map(predictor: Box<dyn PredictorTrait + Send>) -> Self {
        Self::with_estimator(Estimator::DensityMap{
            predictor, box_size: DEFAULT_BOX_SIZE, max_local_count: false})
    }

    pub fn localization(localizer: Box<dyn LocalizerTrait + Send>) -> Self {
        Self::with_estimator(Estimator::Localization{localizer, frame_index: 0})
    }

    fn with_estimator(estimator: Estimator) -> Self {
        Analyzer{
            core: Mutex::new(CoreState{estimator, region: None}),
            outputs: Mutex::new(OutputCache{
                intermittent_output: 0.0,
                output_history: Vec::new(),
                stats: ValueStatsAccumulator::new(STATS_CAPACITY),
            }),
            live_view: Mutex::new(LiveView{enabled: false, map: None}),
        }
    }

    pub fn name(&self) -> &'static str {
        match self.core.lock().unwrap().estimator {
            Estimator::AutoLase(_) => "AutoLase",
            Estimator::DensityMap{..} => "DensityMap",
            Estimator::Localization{..} => "LocalizationCount",
        }
    }

    // Units label for the outputs.
    pub fn short_return_description(&self) -> String {
        let per_area = format!("counts/{} um^2", SCALE_FACTOR as i32);
        match self.core.lock().unwrap().estimator {
            Estimator::AutoLase(_) => "max. on time".to_string(),
            Estimator::DensityMap{max_local_count: true, ..} =>
                "maximum local count".to_string(),
            Estimator::DensityMap{..} => per_area,
            Estimator::Localization{..} => per_area,
        }
    }

    // Analyzes the next frame. `pixels` is `width` x `height`, row-major.
    // `pixel_size_um` is the side length of a (square) pixel in the sample
    // plane.
    //
    // Errors leave all analyzer state as it was before the call:
    //   FailedPrecondition: malformed frame (empty, or buffer length does not
    //     match the dimensions), or a non-positive pixel size when the output
    //     is normalized by area.
    //   InvalidArgument: the region of interest does not fit in the frame.
    // Failures inside a predictor or localizer are logged and the frame is
    // skipped; Ok is returned.
    pub fn process_image(&self, pixels: Pixels, width: u32, height: u32,
                         pixel_size_um: f64, timestamp_ms: u64)
                         -> Result<(), CanonicalError> {
        let frame = Frame::new(pixels, width, height)?;

        let mut core = self.core.lock().unwrap();
        let region = frame.resolve_region(core.region.as_ref())?;
        let value = match &mut core.estimator {
            Estimator::AutoLase(autolase) => autolase.update(&frame)?,
            Estimator::DensityMap{predictor, box_size, max_local_count} => {
                let fov_area = checked_fov_area(&region, pixel_size_um)?;
                let image = frame.crop(&region);
                match estimate_density(predictor.as_mut(), &image, *box_size,
                                       *max_local_count, fov_area) {
                    Ok(v) => v,
                    Err(e) => {
                        error!("Density map estimate failed for frame at {}ms: {}",
                               timestamp_ms, e.to_string());
                        return Ok(());
                    }
                }
            },
            Estimator::Localization{localizer, frame_index} => {
                let fov_area = checked_fov_area(&region, pixel_size_um)?;
                let image = frame.crop(&region);
                let index = *frame_index;
                *frame_index += 1;
                match localizer.count_localizations(&image, index) {
                    Ok(count) => count / fov_area * SCALE_FACTOR,
                    Err(e) => {
                        error!("Localization failed for frame at {}ms: {}",
                               timestamp_ms, e.to_string());
                        return Ok(());
                    }
                }
            },
        };

        let live_enabled = self.live_view.lock().unwrap().enabled;
        let map = if live_enabled { render(&core.estimator) } else { None };
        {
            let mut outputs = self.outputs.lock().unwrap();
            outputs.intermittent_output = value;
            outputs.output_history.push(value);
            outputs.stats.add_value(value);
        }
        if let Some(map) = map {
            let mut live_view = self.live_view.lock().unwrap();
            // Live mode may have been turned off while we rendered.
            if live_view.enabled {
                live_view.map = Some(map);
            }
        }
        debug!("Frame at {}ms: output {}", timestamp_ms, value);
        Ok(())
    }

    pub fn intermittent_output(&self) -> f64 {
        self.outputs.lock().unwrap().intermittent_output
    }

    // Mean of the outputs produced since the previous call, which are then
    // discarded. NaN means no frame was processed since the previous call.
    pub fn batch_output(&self) -> f64 {
        let mut outputs = self.outputs.lock().unwrap();
        if outputs.output_history.is_empty() {
            return f64::NAN;
        }
        let mean = outputs.output_history.iter().sum::<f64>() /
            outputs.output_history.len() as f64;
        outputs.output_history.clear();
        mean
    }

    // Takes effect on the next process_image() call. Any estimator state
    // sized to the previous region is discarded.
    pub fn set_region(&self, region: Option<Rect>) {
        let mut core = self.core.lock().unwrap();
        core.region = region;
        if let Estimator::AutoLase(autolase) = &mut core.estimator {
            autolase.set_region(region);
        }
        self.live_view.lock().unwrap().map = None;
        info!("Analyzer region {:?}", region);
    }

    pub fn region(&self) -> Option<Rect> {
        self.core.lock().unwrap().region
    }

    // AutoLase only; FailedPrecondition otherwise. InvalidArgument if
    // `threshold` is less than 1.
    pub fn set_threshold(&self, threshold: u32) -> Result<(), CanonicalError> {
        let mut core = self.core.lock().unwrap();
        match &mut core.estimator {
            Estimator::AutoLase(autolase) => autolase.configure(threshold),
            _ => Err(failed_precondition_error(
                "Threshold applies only to AutoLase")),
        }
    }

    // Density map only; FailedPrecondition otherwise. InvalidArgument unless
    // `box_size` is odd (and thus at least 1).
    pub fn set_box_size(&self, box_size: u32) -> Result<(), CanonicalError> {
        if box_size % 2 == 0 {
            return Err(invalid_argument_error(
                format!("box_size must be odd, got {}", box_size).as_str()));
        }
        let mut core = self.core.lock().unwrap();
        match &mut core.estimator {
            Estimator::DensityMap{box_size: b, ..} => {
                *b = box_size;
                Ok(())
            },
            _ => Err(failed_precondition_error(
                "box_size applies only to the density map analyzer")),
        }
    }

    pub fn box_size(&self) -> Option<u32> {
        match self.core.lock().unwrap().estimator {
            Estimator::DensityMap{box_size, ..} => Some(box_size),
            _ => None,
        }
    }

    // Switches the density map analyzer to report the maximum local count.
    // Pending outputs are in the old units and are discarded.
    pub fn max_local_count_on(&self) -> Result<(), CanonicalError> {
        self.set_max_local_count(true)
    }

    pub fn max_local_count_off(&self) -> Result<(), CanonicalError> {
        self.set_max_local_count(false)
    }

    pub fn is_max_local_count(&self) -> bool {
        matches!(self.core.lock().unwrap().estimator,
                 Estimator::DensityMap{max_local_count: true, ..})
    }

    fn set_max_local_count(&self, enabled: bool) -> Result<(), CanonicalError> {
        let mut core = self.core.lock().unwrap();
        match &mut core.estimator {
            Estimator::DensityMap{max_local_count, ..} => {
                if *max_local_count != enabled {
                    *max_local_count = enabled;
                    self.outputs.lock().unwrap().output_history.clear();
                    self.live_view.lock().unwrap().map = None;
                }
                Ok(())
            },
            _ => Err(failed_precondition_error(
                "Maximum local count applies only to the density map analyzer")),
        }
    }

    pub fn live_mode_on(&self) {
        self.live_view.lock().unwrap().enabled = true;
    }

    pub fn live_mode_off(&self) {
        let mut live_view = self.live_view.lock().unwrap();
        live_view.enabled = false;
        live_view.map = None;
    }

    pub fn is_live_mode_on(&self) -> bool {
        self.live_view.lock().unwrap().enabled
    }

    // Copy of the most recent live map. None if live mode is off or no frame
    // has been rendered since it was turned on (or since the region changed).
    pub fn current_map(&self) -> Option<LiveMap> {
        self.live_view.lock().unwrap().map.clone()
    }

    pub fn output_stats(&self) -> ValueStats {
        self.outputs.lock().unwrap().stats.value_stats().clone()
    }

    pub fn reset_session_stats(&self) {
        self.outputs.lock().unwrap().stats.reset_session();
    }

    // Releases the external estimator, if any.
    pub fn dispose(&self) {
        let mut core = self.core.lock().unwrap();
        match &mut core.estimator {
            Estimator::AutoLase(_) => (),
            Estimator::DensityMap{predictor, ..} => predictor.close(),
            Estimator::Localization{localizer, ..} => localizer.close(),
        }
        self.live_mode_off();
    }
}

// Returns FailedPrecondition unless the area is positive and finite.
fn checked_fov_area(region: &Rect, pixel_size_um: f64) -> Result<f64, CanonicalError> {
    let fov_area = field_of_view_area(region, pixel_size_um);
    if !(fov_area.is_finite() && fov_area > 0.0) {
        return Err(failed_precondition_error(
            format!("Invalid pixel size {}um", pixel_size_um).as_str()));
    }
    Ok(fov_area)
}

fn estimate_density(predictor: &mut (dyn PredictorTrait + Send),
                    image: &Gray16Image, box_size: u32, max_local_count: bool,
                    fov_area: f64) -> Result<f64, CanonicalError> {
    predictor.predict(image)?;
    if max_local_count {
        predictor.maximum_local_count(box_size)
    } else {
        Ok(predictor.count()? / fov_area * SCALE_FACTOR)
    }
}

fn render(estimator: &Estimator) -> Option<LiveMap> {
    match estimator {
        Estimator::AutoLase(autolase) => autolase.accumulator_map(),
        Estimator::DensityMap{predictor, max_local_count, ..} => {
            let map = if *max_local_count {
                predictor.local_count_map()
            } else {
                predictor.density_map()
            };
            match map {
                Ok(m) => Some(m),
                Err(e) => {
                    error!("Cannot update live view: {}", e.to_string());
                    None
                }
            }
        },
        Estimator::Localization{localizer, ..} => localizer.localization_map(),
    }
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use canonical_error::{CanonicalErrorCode, unavailable_error};
    use image::Luma;
    use alica_elements::frame::region_of_interest;
    use super::*;

    #[derive(Default)]
    struct PredictorControls {
        count: f64,
        max_local_count: f64,
        fail: bool,
        closed: bool,
    }

    struct FakePredictor {
        controls: Arc<Mutex<PredictorControls>>,
        dimensions: Option<(u32, u32)>,
        last_box_size: Option<u32>,
    }

    impl FakePredictor {
        fn new(controls: Arc<Mutex<PredictorControls>>) -> Self {
            FakePredictor{controls, dimensions: None, last_box_size: None}
        }
    }

    impl PredictorTrait for FakePredictor {
        fn predict(&mut self, image: &Gray16Image) -> Result<(), CanonicalError> {
            let controls = self.controls.lock().unwrap();
            if controls.fail || controls.closed {
                return Err(unavailable_error("session closed"));
            }
            self.dimensions = Some(image.dimensions());
            Ok(())
        }
        fn count(&self) -> Result<f64, CanonicalError> {
            if self.dimensions.is_none() {
                return Err(failed_precondition_error("uninitialized"));
            }
            Ok(self.controls.lock().unwrap().count)
        }
        fn maximum_local_count(&mut self, box_size: u32) -> Result<f64, CanonicalError> {
            self.last_box_size = Some(box_size);
            Ok(self.controls.lock().unwrap().max_local_count)
        }
        fn density_map(&self) -> Result<LiveMap, CanonicalError> {
            let (w, h) = self.dimensions.unwrap();
            Ok(LiveMap::from_pixel(w, h, Luma([1.0])))
        }
        fn local_count_map(&self) -> Result<LiveMap, CanonicalError> {
            match self.last_box_size {
                Some(_) => {
                    let (w, h) = self.dimensions.unwrap();
                    Ok(LiveMap::from_pixel(w, h, Luma([2.0])))
                },
                None => Err(failed_precondition_error("no local count map")),
            }
        }
        fn close(&mut self) {
            self.controls.lock().unwrap().closed = true;
        }
    }

    // Reports the frame index as the number of localizations.
    struct CountingLocalizer {
        fail: Arc<AtomicBool>,
    }

    impl LocalizerTrait for CountingLocalizer {
        fn count_localizations(&mut self, _image: &Gray16Image, frame_index: u64)
                               -> Result<f64, CanonicalError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(failed_precondition_error("localizer not ready"));
            }
            Ok(frame_index as f64)
        }
    }

    fn lit_frame(width: u32, height: u32, lit: Option<(u32, u32)>) -> Vec<u16> {
        let mut pixels = vec![0_u16; (width * height) as usize];
        if let Some((x, y)) = lit {
            pixels[(y * width + x) as usize] = 200;
        }
        pixels
    }

    fn process(analyzer: &Analyzer, pixels: &[u16], width: u32, height: u32) {
        analyzer.process_image(Pixels::Gray16(pixels), width, height, 0.1, 0).unwrap();
    }

    #[test]
    fn test_autolase_outputs() {
        let analyzer = Analyzer::autolase(80).unwrap();
        assert_eq!(analyzer.name(), "AutoLase");
        assert_eq!(analyzer.short_return_description(), "max. on time");
        let on = lit_frame(10, 10, Some((3, 3)));
        for _ in 0..3 {
            process(&analyzer, &on, 10, 10);
        }
        assert_eq!(analyzer.intermittent_output(), 3.0);
        // History is 1, 2, 3.
        assert_eq!(analyzer.batch_output(), 2.0);

        process(&analyzer, &lit_frame(10, 10, None), 10, 10);
        assert_eq!(analyzer.intermittent_output(), 0.0);
    }

    #[test]
    fn test_batch_output_nan_contract() {
        let analyzer = Analyzer::autolase(80).unwrap();
        assert!(analyzer.batch_output().is_nan());

        let on = lit_frame(4, 4, Some((0, 0)));
        process(&analyzer, &on, 4, 4);
        process(&analyzer, &on, 4, 4);
        assert_eq!(analyzer.batch_output(), 1.5);
        assert!(analyzer.batch_output().is_nan());

        // Intermittent output is not consumed by batch reads.
        assert_eq!(analyzer.intermittent_output(), 2.0);
        assert_eq!(analyzer.intermittent_output(), 2.0);
    }

    #[test]
    fn test_malformed_frame_preserves_state() {
        let analyzer = Analyzer::autolase(80).unwrap();
        let on = lit_frame(4, 4, Some((1, 1)));
        process(&analyzer, &on, 4, 4);
        process(&analyzer, &on, 4, 4);

        let err = analyzer.process_image(
            Pixels::Gray16(&on[..15]), 4, 4, 0.1, 0).unwrap_err();
        assert!(err.code == CanonicalErrorCode::FailedPrecondition);
        assert_eq!(analyzer.intermittent_output(), 2.0);

        // The streak continues as if the bad frame never arrived.
        process(&analyzer, &on, 4, 4);
        assert_eq!(analyzer.intermittent_output(), 3.0);
        assert_eq!(analyzer.batch_output(), 2.0);
    }

    #[test]
    fn test_region_outside_frame() {
        let analyzer = Analyzer::autolase(80).unwrap();
        analyzer.set_region(Some(region_of_interest(2, 2, 4, 4).unwrap()));
        let pixels = lit_frame(5, 5, None);
        let err = analyzer.process_image(
            Pixels::Gray16(&pixels), 5, 5, 0.1, 0).unwrap_err();
        assert!(err.code == CanonicalErrorCode::InvalidArgument);
        assert!(analyzer.batch_output().is_nan());
    }

    #[test]
    fn test_far_region_rejected() {
        let analyzer = Analyzer::localization(
            Box::new(CountingLocalizer{fail: Arc::new(AtomicBool::new(false))}));
        analyzer.set_region(Some(Rect::at(i32::MAX, 0).of_size(2, 2)));
        let pixels = lit_frame(10, 10, None);
        let err = analyzer.process_image(
            Pixels::Gray16(&pixels), 10, 10, 1.0, 0).unwrap_err();
        assert!(err.code == CanonicalErrorCode::InvalidArgument);

        // The analyzer is still usable.
        analyzer.set_region(Some(region_of_interest(0, 0, 10, 10).unwrap()));
        analyzer.process_image(Pixels::Gray16(&pixels), 10, 10, 1.0, 0).unwrap();
        assert_abs_diff_eq!(analyzer.intermittent_output(), 0.0, epsilon = 1e-9);

        let autolase = Analyzer::autolase(80).unwrap();
        autolase.set_region(Some(Rect::at(3, i32::MAX).of_size(1, 1)));
        assert!(autolase.process_image(Pixels::Gray16(&pixels), 10, 10, 1.0, 0)
                .unwrap_err().code == CanonicalErrorCode::InvalidArgument);
        assert!(autolase.batch_output().is_nan());
    }

    #[test]
    fn test_region_change_resets_autolase() {
        let analyzer = Analyzer::autolase(80).unwrap();
        let on = lit_frame(6, 6, Some((2, 2)));
        for _ in 0..4 {
            process(&analyzer, &on, 6, 6);
        }
        assert_eq!(analyzer.intermittent_output(), 4.0);
        let region = region_of_interest(1, 1, 3, 3).unwrap();
        analyzer.set_region(Some(region));
        assert_eq!(analyzer.region(), Some(region));
        process(&analyzer, &on, 6, 6);
        assert_eq!(analyzer.intermittent_output(), 1.0);
    }

    #[test]
    fn test_threshold_reconfiguration() {
        let analyzer = Analyzer::autolase(80).unwrap();
        assert!(analyzer.set_threshold(0).unwrap_err().code ==
                CanonicalErrorCode::InvalidArgument);
        analyzer.set_threshold(250).unwrap();
        process(&analyzer, &lit_frame(3, 3, Some((1, 1))), 3, 3);
        assert_eq!(analyzer.intermittent_output(), 0.0);
        assert!(analyzer.set_box_size(5).unwrap_err().code ==
                CanonicalErrorCode::FailedPrecondition);
    }

    #[test]
    fn test_density_map_normalization() {
        let controls = Arc::new(Mutex::new(PredictorControls{
            count: 4.0, max_local_count: 1.5, ..Default::default()}));
        let analyzer = Analyzer::density_map(
            Box::new(FakePredictor::new(controls.clone())));
        assert_eq!(analyzer.name(), "DensityMap");
        assert_eq!(analyzer.short_return_description(), "counts/100 um^2");
        assert_eq!(analyzer.box_size(), Some(DEFAULT_BOX_SIZE));

        // 20x20 pixels of 0.1um: 4um^2. 4 counts -> 100 per 100um^2.
        let pixels = lit_frame(20, 20, None);
        process(&analyzer, &pixels, 20, 20);
        assert_abs_diff_eq!(analyzer.intermittent_output(), 100.0, epsilon = 1e-9);

        // Region of 10x10 pixels: 1um^2.
        analyzer.set_region(Some(region_of_interest(5, 5, 10, 10).unwrap()));
        process(&analyzer, &pixels, 20, 20);
        assert_abs_diff_eq!(analyzer.intermittent_output(), 400.0, epsilon = 1e-9);

        // Area normalization needs a pixel size.
        let err = analyzer.process_image(
            Pixels::Gray16(&pixels), 20, 20, 0.0, 0).unwrap_err();
        assert!(err.code == CanonicalErrorCode::FailedPrecondition);
    }

    #[test]
    fn test_max_local_count_mode() {
        let controls = Arc::new(Mutex::new(PredictorControls{
            count: 4.0, max_local_count: 1.5, ..Default::default()}));
        let analyzer = Analyzer::density_map(
            Box::new(FakePredictor::new(controls.clone())));
        let pixels = lit_frame(20, 20, None);
        process(&analyzer, &pixels, 20, 20);

        assert!(analyzer.set_box_size(4).unwrap_err().code ==
                CanonicalErrorCode::InvalidArgument);
        assert!(analyzer.set_box_size(0).is_err());
        analyzer.set_box_size(5).unwrap();
        assert_eq!(analyzer.box_size(), Some(5));

        // Switching mode discards outputs in the old units.
        analyzer.max_local_count_on().unwrap();
        assert!(analyzer.is_max_local_count());
        assert_eq!(analyzer.short_return_description(), "maximum local count");
        assert!(analyzer.batch_output().is_nan());

        process(&analyzer, &pixels, 20, 20);
        assert_eq!(analyzer.intermittent_output(), 1.5);
        assert_eq!(analyzer.batch_output(), 1.5);

        analyzer.max_local_count_off().unwrap();
        assert!(!analyzer.is_max_local_count());
    }

    #[test]
    fn test_predictor_failure_skips_frame() {
        let controls = Arc::new(Mutex::new(PredictorControls{
            count: 4.0, ..Default::default()}));
        let analyzer = Analyzer::density_map(
            Box::new(FakePredictor::new(controls.clone())));
        analyzer.live_mode_on();
        let pixels = lit_frame(20, 20, None);
        process(&analyzer, &pixels, 20, 20);
        let before = analyzer.intermittent_output();
        assert!(analyzer.current_map().is_some());
        assert_eq!(analyzer.batch_output(), before);

        controls.lock().unwrap().fail = true;
        controls.lock().unwrap().count = 8.0;
        // Failure is logged, not returned.
        process(&analyzer, &pixels, 20, 20);
        assert_eq!(analyzer.intermittent_output(), before);
        assert!(analyzer.batch_output().is_nan());
        assert!(analyzer.current_map().is_some());
        assert_eq!(analyzer.output_stats().session_count, 1);
    }

    #[test]
    fn test_dispose_closes_predictor() {
        let controls = Arc::new(Mutex::new(PredictorControls::default()));
        let analyzer = Analyzer::density_map(
            Box::new(FakePredictor::new(controls.clone())));
        analyzer.live_mode_on();
        analyzer.dispose();
        assert!(controls.lock().unwrap().closed);
        assert!(!analyzer.is_live_mode_on());
    }

    #[test]
    fn test_localization_analyzer() {
        let fail = Arc::new(AtomicBool::new(false));
        let analyzer = Analyzer::localization(
            Box::new(CountingLocalizer{fail: fail.clone()}));
        assert_eq!(analyzer.name(), "LocalizationCount");
        assert_eq!(analyzer.short_return_description(), "counts/100 um^2");

        // 10x10 pixels of 1um: 100um^2, so outputs equal the counts.
        let pixels = lit_frame(10, 10, None);
        for _ in 0..3 {
            analyzer.process_image(Pixels::Gray16(&pixels), 10, 10, 1.0, 0).unwrap();
        }
        assert_abs_diff_eq!(analyzer.intermittent_output(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(analyzer.batch_output(), 1.0, epsilon = 1e-9);

        fail.store(true, Ordering::Relaxed);
        analyzer.process_image(Pixels::Gray16(&pixels), 10, 10, 1.0, 0).unwrap();
        assert!(analyzer.batch_output().is_nan());

        // The failed frame still consumed an index.
        fail.store(false, Ordering::Relaxed);
        analyzer.process_image(Pixels::Gray16(&pixels), 10, 10, 1.0, 0).unwrap();
        assert_abs_diff_eq!(analyzer.intermittent_output(), 4.0, epsilon = 1e-9);
        // Localizer offers no map.
        analyzer.live_mode_on();
        analyzer.process_image(Pixels::Gray16(&pixels), 10, 10, 1.0, 0).unwrap();
        assert!(analyzer.current_map().is_none());
    }

    #[test]
    fn test_live_view() {
        let analyzer = Analyzer::autolase(80).unwrap();
        let on = lit_frame(6, 6, Some((2, 2)));
        process(&analyzer, &on, 6, 6);
        assert!(analyzer.current_map().is_none());

        analyzer.live_mode_on();
        assert!(analyzer.is_live_mode_on());
        process(&analyzer, &on, 6, 6);
        let map = analyzer.current_map().unwrap();
        assert_eq!(map.dimensions(), (6, 6));
        assert_eq!(map.get_pixel(2, 2).0[0], 2.0);

        // A region change discards the map until the next frame.
        analyzer.set_region(Some(region_of_interest(1, 1, 3, 3).unwrap()));
        assert!(analyzer.current_map().is_none());
        process(&analyzer, &on, 6, 6);
        assert_eq!(analyzer.current_map().unwrap().dimensions(), (3, 3));

        analyzer.live_mode_off();
        assert!(analyzer.current_map().is_none());
        process(&analyzer, &on, 6, 6);
        assert!(analyzer.current_map().is_none());
    }

    #[test]
    fn test_output_stats() {
        let analyzer = Analyzer::autolase(80).unwrap();
        let on = lit_frame(4, 4, Some((0, 0)));
        for _ in 0..4 {
            process(&analyzer, &on, 4, 4);
        }
        let stats = analyzer.output_stats();
        assert_eq!(stats.session_count, 4);
        assert_eq!(stats.recent.max, 4.0);
        assert_eq!(stats.recent.mean, 2.5);
        analyzer.reset_session_stats();
        assert_eq!(analyzer.output_stats().session_count, 0);
    }

    #[test]
    fn test_concurrent_batch_reads() {
        let analyzer = Arc::new(Analyzer::localization(
            Box::new(CountingLocalizer{fail: Arc::new(AtomicBool::new(false))})));
        const NUM_FRAMES: u64 = 2000;

        let writer = {
            let analyzer = analyzer.clone();
            thread::spawn(move || {
                let pixels = vec![0_u16; 100];
                for _ in 0..NUM_FRAMES {
                    analyzer.process_image(
                        Pixels::Gray16(&pixels), 10, 10, 1.0, 0).unwrap();
                }
            })
        };
        // Each batch is a contiguous run of frame indices, so its mean must
        // lie within the range seen so far and never go backwards.
        let mut prev_mean = -1.0;
        let mut batches = 0;
        while !writer.is_finished() {
            let mean = analyzer.batch_output();
            if !mean.is_nan() {
                assert!(mean > prev_mean);
                assert!(mean <= (NUM_FRAMES - 1) as f64);
                prev_mean = mean;
                batches += 1;
            }
        }
        writer.join().unwrap();
        let last = analyzer.batch_output();
        if !last.is_nan() {
            assert!(last > prev_mean);
            batches += 1;
        }
        assert!(batches >= 1);
        assert!(analyzer.batch_output().is_nan());
        assert_eq!(analyzer.output_stats().session_count, NUM_FRAMES as usize);
    }

}  // mod tests.
