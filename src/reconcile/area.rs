//! Reconciliation of the selected print area with the rectangle overlay.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::events::{EventChannel, Subscription};
use crate::geodesy::{
    PixelDimension, RealDimension, pixel_height_to_real_length, pixel_width_to_real_length,
    real_height_to_pixels, real_width_to_pixels,
};
use crate::viewport::{MoveEvent, ResizeEvent, Viewport};

/// Owns the authoritative selected print area (meters on the ground) and
/// keeps it consistent with the on-screen selection rectangle (pixels).
///
/// Program to rectangle: a defined value set through [`set_selected_area`]
/// while enabled is converted to pixels against the current projection and
/// applied to the rectangle overlay, creating it on first use; the
/// conversion is re-applied on every viewport move because the pixel size of
/// a fixed ground distance drifts with the view center. An undefined value
/// removes the overlay. Every programmatic rectangle write happens with the
/// user-resize subscription torn down, so it cannot be re-heard as a user
/// resize.
///
/// Rectangle to program: a user resize is measured back to meters with the
/// projection the resize event carried, gated by the scale-derived precision
/// filter, and emitted on [`changed`] when accepted. Resize events arriving
/// before any reduction factor is known are ignored outright.
///
/// [`set_selected_area`]: AreaReconciler::set_selected_area
/// [`changed`]: AreaReconciler::changed
pub struct AreaReconciler {
    viewport: Viewport,
    program: EventChannel<Option<RealDimension>>,
    changed: EventChannel<RealDimension>,
    state: Rc<RefCell<AreaState>>,
}

struct AreaState {
    area: Option<RealDimension>,
    reduction_factor: Option<f64>,
    enabled: bool,
    subs: AreaSubs,
}

#[derive(Default)]
struct AreaSubs {
    program: Option<Subscription>,
    moved: Option<Subscription>,
    resized: Option<Subscription>,
}

impl AreaReconciler {
    /// Creates a disabled reconciler over `viewport` with an undefined
    /// selected area.
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            program: EventChannel::new(),
            changed: EventChannel::new(),
            state: Rc::new(RefCell::new(AreaState {
                area: None,
                reduction_factor: None,
                enabled: false,
                subs: AreaSubs::default(),
            })),
        }
    }

    /// The outbound channel carrying user-driven area changes.
    pub fn changed(&self) -> &EventChannel<RealDimension> {
        &self.changed
    }

    /// The current authoritative selected area.
    pub fn selected_area(&self) -> Option<RealDimension> {
        self.state.borrow().area
    }

    /// Whether area selection is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    /// Sets the reduction factor (scale denominator) used by the precision
    /// filter. `None` makes user resizes unconvertible, so they are ignored.
    pub fn set_reduction_factor(&self, reduction_factor: Option<f64>) {
        self.state.borrow_mut().reduction_factor = reduction_factor;
    }

    /// Sets the authoritative selected area. Setting the current value again
    /// is a no-op. While enabled, a defined value attaches or resizes the
    /// rectangle overlay; an undefined value removes it.
    pub fn set_selected_area(&self, area: Option<RealDimension>) {
        {
            let mut state = self.state.borrow_mut();
            if state.area == area {
                return;
            }
            state.area = area;
        }
        self.program.emit(&area);
    }

    /// Enables area selection: attaches the channels and, if a dimension is
    /// already defined, materializes the rectangle overlay. Without a
    /// defined dimension no overlay is created.
    pub fn enable(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.enabled {
                return;
            }
            state.enabled = true;
        }
        debug!("area selection enabled");

        self.attach_program();
        self.attach_moved();
        attach_resized(&self.state, &self.viewport, &self.changed);

        let retained = self.state.borrow().area;
        if retained.is_some() {
            sync_rectangle(&self.state, &self.viewport, &self.changed, retained);
        }
    }

    /// Disables area selection: detaches the channels, removes the overlay
    /// if present, and clears the scale bookkeeping. The authoritative area
    /// value is retained.
    pub fn disable(&self) {
        {
            let mut state = self.state.borrow_mut();
            if !state.enabled {
                return;
            }
            state.enabled = false;
            state.reduction_factor = None;
            state.subs = AreaSubs::default();
        }
        debug!("area selection disabled");
        if self.viewport.selection().is_some() {
            self.viewport.detach_selection();
        }
    }

    fn attach_program(&self) {
        let state = Rc::clone(&self.state);
        let viewport = self.viewport.clone();
        let changed = self.changed.clone();
        let sub = self
            .program
            .subscribe(move |area: &Option<RealDimension>| {
                sync_rectangle(&state, &viewport, &changed, *area);
            });
        self.state.borrow_mut().subs.program = Some(sub);
    }

    fn attach_moved(&self) {
        let state = Rc::clone(&self.state);
        let viewport = self.viewport.clone();
        let changed = self.changed.clone();
        let sub = self.viewport.events().moved.subscribe(move |_: &MoveEvent| {
            // The projection changed under the rectangle: re-derive its
            // pixel size from the unchanged real dimension.
            let area = state.borrow().area;
            if area.is_some() {
                sync_rectangle(&state, &viewport, &changed, area);
            }
        });
        self.state.borrow_mut().subs.moved = Some(sub);
    }
}

/// Applies `area` to the rectangle overlay, converting through the current
/// projection. The user-resize subscription is torn down for the duration of
/// the write and rebuilt afterwards, so the programmatic resize is never
/// observed as a user action.
fn sync_rectangle(
    state: &Rc<RefCell<AreaState>>,
    viewport: &Viewport,
    changed: &EventChannel<RealDimension>,
    area: Option<RealDimension>,
) {
    let was_listening = state.borrow_mut().subs.resized.take().is_some();

    match area {
        Some(dimension) => {
            let projection = viewport.projection();
            let size = PixelDimension {
                width: real_width_to_pixels(&projection, dimension.width),
                height: real_height_to_pixels(&projection, dimension.height),
            };
            if viewport.selection().is_some() {
                viewport.resize_selection(size);
            } else {
                viewport.attach_selection(size);
            }
        }
        None => {
            if viewport.selection().is_some() {
                viewport.detach_selection();
            }
        }
    }

    if was_listening {
        attach_resized(state, viewport, changed);
    }
}

fn attach_resized(
    state: &Rc<RefCell<AreaState>>,
    viewport: &Viewport,
    changed: &EventChannel<RealDimension>,
) {
    let sub = {
        let state = Rc::clone(state);
        let changed = changed.clone();
        viewport
            .events()
            .selection_resized
            .subscribe(move |ev: &ResizeEvent| {
                let (last, reduction_factor) = {
                    let st = state.borrow();
                    (st.area, st.reduction_factor)
                };
                // Without a reduction factor there is no precision scale to
                // judge the resize against: ignore it entirely.
                let Some(reduction_factor) = reduction_factor else {
                    return;
                };

                let measured = RealDimension {
                    width: pixel_width_to_real_length(&ev.projection, ev.size.width),
                    height: pixel_height_to_real_length(&ev.projection, ev.size.height),
                };

                let precision = reduction_factor / 1000.0;
                let accepted = match last {
                    None => true,
                    Some(last) => {
                        exceeds_precision(measured.width, last.width, precision, ev.size.width)
                            || exceeds_precision(
                                measured.height,
                                last.height,
                                precision,
                                ev.size.height,
                            )
                    }
                };
                if !accepted {
                    return;
                }

                state.borrow_mut().area = Some(measured);
                changed.emit(&measured);
            })
    };
    state.borrow_mut().subs.resized = Some(sub);
}

/// The precision filter: accepts a measured dimension only when it differs
/// from the last authoritative one by more than the sub-pixel noise floor of
/// the current view.
///
/// `precision` is the ground distance of one millimeter of paper at the
/// active scale (reduction factor / 1000). The discrepancy, in precision
/// units, must exceed the per-pixel noise ratio rounded up to the nearest
/// power of ten. The formula is kept exactly as the quantized noise
/// rejection it describes, including the power-of-ten rounding.
fn exceeds_precision(measured: f64, last: f64, precision: f64, span_px: u32) -> bool {
    if span_px == 0 || precision <= 0.0 || measured <= 0.0 {
        return false;
    }
    let noise = measured / precision / f64::from(span_px);
    let threshold = 10f64.powf(noise.log10().ceil());
    (measured - last).abs() / precision > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::GeoPoint;

    struct Setup {
        viewport: Viewport,
        reconciler: AreaReconciler,
        emitted: Rc<RefCell<Vec<RealDimension>>>,
        _listener: Subscription,
    }

    fn setup() -> Setup {
        let viewport = Viewport::new(GeoPoint::new(46.01, 12.01), 13);
        let reconciler = AreaReconciler::new(viewport.clone());
        let emitted = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&emitted);
        let listener = reconciler
            .changed()
            .subscribe(move |d: &RealDimension| sink.borrow_mut().push(*d));
        Setup {
            viewport,
            reconciler,
            emitted,
            _listener: listener,
        }
    }

    const AREA: RealDimension = RealDimension {
        width: 2000.0,
        height: 3000.0,
    };

    #[test]
    fn enable_without_dimension_creates_no_rectangle() {
        let s = setup();
        s.reconciler.enable();
        assert!(s.viewport.selection().is_none());

        // Only a defined dimension materializes the overlay.
        s.reconciler.set_selected_area(Some(AREA));
        assert!(s.viewport.selection().is_some());
    }

    #[test]
    fn rectangle_size_comes_from_the_live_projection() {
        let s = setup();
        s.reconciler.enable();
        s.reconciler.set_selected_area(Some(AREA));

        let projection = s.viewport.projection();
        let expected = PixelDimension {
            width: real_width_to_pixels(&projection, AREA.width),
            height: real_height_to_pixels(&projection, AREA.height),
        };
        assert_eq!(s.viewport.selection(), Some(expected));
    }

    #[test]
    fn viewport_move_rederives_the_rectangle() {
        let s = setup();
        s.reconciler.enable();
        s.reconciler.set_selected_area(Some(AREA));
        let before = s.viewport.selection().unwrap();

        // Pan far north: the same ground distance spans more pixels.
        s.viewport.begin_user_pan();
        s.viewport.user_pan_to(GeoPoint::new(60.0, 12.01));
        s.viewport.end_user_pan();

        let after = s.viewport.selection().unwrap();
        assert!(after.width > before.width, "{before:?} -> {after:?}");
        // The authoritative real dimension did not change.
        assert_eq!(s.reconciler.selected_area(), Some(AREA));
        assert!(s.emitted.borrow().is_empty());
    }

    #[test]
    fn programmatic_resize_is_not_echoed_as_a_change() {
        let s = setup();
        s.reconciler.enable();
        s.reconciler.set_reduction_factor(Some(25_000.0));
        s.reconciler.set_selected_area(Some(AREA));
        s.reconciler.set_selected_area(Some(RealDimension {
            width: 4000.0,
            height: 6000.0,
        }));

        assert!(s.emitted.borrow().is_empty());
    }

    #[test]
    fn user_resize_measures_and_emits() {
        let s = setup();
        s.reconciler.enable();
        s.reconciler.set_reduction_factor(Some(25_000.0));
        s.reconciler.set_selected_area(Some(AREA));

        let size = s.viewport.selection().unwrap();
        let grown = PixelDimension {
            width: size.width * 2,
            height: size.height * 2,
        };
        s.viewport.user_resize_selection(grown);

        let projection = s.viewport.projection();
        let expected = RealDimension {
            width: pixel_width_to_real_length(&projection, grown.width),
            height: pixel_height_to_real_length(&projection, grown.height),
        };
        assert_eq!(*s.emitted.borrow(), vec![expected]);
        assert_eq!(s.reconciler.selected_area(), Some(expected));
    }

    #[test]
    fn user_resize_without_reduction_factor_is_ignored() {
        let s = setup();
        s.reconciler.enable();
        s.reconciler.set_selected_area(Some(AREA));

        let size = s.viewport.selection().unwrap();
        s.viewport.user_resize_selection(PixelDimension {
            width: size.width * 2,
            height: size.height * 2,
        });

        assert!(s.emitted.borrow().is_empty());
        assert_eq!(s.reconciler.selected_area(), Some(AREA));
    }

    #[test]
    fn sub_pixel_jitter_is_rejected() {
        let s = setup();
        s.reconciler.enable();
        // A coarse print scale at a deep zoom: one pixel of resize is far
        // below the precision threshold.
        s.viewport.set_zoom(18);
        s.reconciler.set_reduction_factor(Some(100_000.0));
        s.reconciler.set_selected_area(Some(AREA));

        let size = s.viewport.selection().unwrap();
        s.viewport.user_resize_selection(PixelDimension {
            width: size.width + 1,
            height: size.height,
        });

        assert!(s.emitted.borrow().is_empty());
        assert_eq!(s.reconciler.selected_area(), Some(AREA));
    }

    #[test]
    fn disable_removes_the_rectangle_exactly_once() {
        let s = setup();
        s.reconciler.enable();
        s.reconciler.set_selected_area(Some(AREA));
        assert!(s.viewport.selection().is_some());

        // A redundant removal would trip the viewport's detach assertion,
        // so completing both calls proves exactly one removal happened.
        s.reconciler.disable();
        s.reconciler.disable();

        assert!(s.viewport.selection().is_none());
    }

    #[test]
    fn undefined_dimension_removes_the_rectangle_exactly_once() {
        let s = setup();
        s.reconciler.enable();
        s.reconciler.set_selected_area(Some(AREA));

        s.reconciler.set_selected_area(None);
        assert!(s.viewport.selection().is_none());

        // Disabling afterwards finds nothing left to remove; a second
        // removal attempt would panic in the viewport.
        s.reconciler.disable();
        assert!(s.viewport.selection().is_none());
    }

    #[test]
    fn disable_clears_the_scale_bookkeeping() {
        let s = setup();
        s.reconciler.enable();
        s.reconciler.set_reduction_factor(Some(25_000.0));
        s.reconciler.set_selected_area(Some(AREA));
        s.reconciler.disable();

        // Re-enabled without a fresh scale: resizes are unconvertible.
        s.reconciler.enable();
        let size = s.viewport.selection().unwrap();
        s.viewport.user_resize_selection(PixelDimension {
            width: size.width * 2,
            height: size.height * 2,
        });
        assert!(s.emitted.borrow().is_empty());
    }

    mod precision_filter {
        use super::super::exceeds_precision;

        // The worked example: 1:25000 paper scale, a 2000 m wide area drawn
        // 200 px wide, so one pixel is 10 m of ground and the precision unit
        // is 25 m.
        const PRECISION: f64 = 25.0;

        #[test]
        fn accepts_a_real_resize_step() {
            // 200 px -> 210 px: measured 2100 m against 2000 m.
            // noise = 2100 / 25 / 210 = 0.4, threshold 10^0 = 1,
            // discrepancy 100 / 25 = 4.
            assert!(exceeds_precision(2100.0, 2000.0, PRECISION, 210));
            assert!(exceeds_precision(2300.0, 2200.0, PRECISION, 230));
        }

        #[test]
        fn rejects_sub_precision_noise() {
            // Half a precision unit of jitter on an unchanged rectangle.
            assert!(!exceeds_precision(2012.5, 2000.0, PRECISION, 200));
            assert!(!exceeds_precision(2000.1, 2000.0, PRECISION, 200));
        }

        #[test]
        fn threshold_scales_with_the_noise_floor() {
            // A fine zoom: 2000 m over 20000 px. noise = 0.004, threshold
            // 10^-2, so even a tiny fraction of a precision unit counts.
            assert!(exceeds_precision(2000.5, 2000.0, PRECISION, 20_000));
            // A coarse zoom: 2000 m over 2 px. noise = 40, threshold 10^2:
            // a whole step of 100 m is still below it.
            assert!(!exceeds_precision(2100.0, 2000.0, PRECISION, 2));
        }

        #[test]
        fn degenerate_inputs_reject() {
            assert!(!exceeds_precision(2100.0, 2000.0, PRECISION, 0));
            assert!(!exceeds_precision(2100.0, 2000.0, 0.0, 210));
            assert!(!exceeds_precision(0.0, 2000.0, PRECISION, 210));
        }
    }
}
