//! Shared map-view state and its event surface.
//!
//! A [`Viewport`] is a cheaply-cloneable handle to the state every part of
//! the widget reads: geographical center, zoom level, the on-screen view
//! rectangle, and the optional selection rectangle overlay.
//!
//! Writes come in two flavors, and the distinction carries the whole
//! echo-suppression story of the crate:
//!
//! - *Program writes* ([`pan_to`], [`resize_selection`], ...) are silent.
//!   They change the state and emit nothing, so a reconciler applying an
//!   external value can never hear its own write come back as user input.
//! - *User gestures* ([`begin_user_pan`] .. [`end_user_pan`],
//!   [`user_resize_selection`], ...) emit events. Per pan gesture, exactly
//!   one `move_start` precedes any number of `moved` events, which precede
//!   exactly one `move_end`.
//!
//! [`pan_to`]: Viewport::pan_to
//! [`resize_selection`]: Viewport::resize_selection
//! [`begin_user_pan`]: Viewport::begin_user_pan
//! [`end_user_pan`]: Viewport::end_user_pan
//! [`user_resize_selection`]: Viewport::user_resize_selection

use std::cell::RefCell;
use std::rc::Rc;

use egui::{Pos2, Rect, pos2};
use log::debug;

use crate::events::EventChannel;
use crate::geodesy::{GeoPoint, PixelDimension};
use crate::projection::MapProjection;

/// Payload of `moved` and `move_end` events.
#[derive(Clone, Copy, Debug)]
pub struct MoveEvent {
    /// The view center after the movement step.
    pub center: GeoPoint,

    /// The projection current at the instant the event fired.
    pub projection: MapProjection,
}

/// Payload of `selection_resized` events.
#[derive(Clone, Copy, Debug)]
pub struct ResizeEvent {
    /// The selection rectangle size after the resize step.
    pub size: PixelDimension,

    /// The projection current at the instant the event fired.
    pub projection: MapProjection,
}

/// The event channels a viewport exposes to its observers.
#[derive(Default)]
pub struct ViewportEvents {
    /// A user pan or zoom gesture began.
    pub move_start: EventChannel<()>,

    /// The view center or zoom changed within a user gesture.
    pub moved: EventChannel<MoveEvent>,

    /// The user gesture completed.
    pub move_end: EventChannel<MoveEvent>,

    /// The user resized the selection rectangle.
    pub selection_resized: EventChannel<ResizeEvent>,
}

struct ViewportState {
    center: GeoPoint,
    zoom: u8,
    view_rect: Rect,
    selection: Option<PixelDimension>,
    panning: bool,
}

/// Handle to the shared view state. Clones share state and events.
#[derive(Clone)]
pub struct Viewport {
    state: Rc<RefCell<ViewportState>>,
    events: Rc<ViewportEvents>,
}

impl Viewport {
    /// Creates a viewport centered on `center` at `zoom`.
    ///
    /// The view rectangle starts at a nominal 800x600; the widget replaces
    /// it with the allocated rectangle on every frame, and tests set it
    /// explicitly.
    pub fn new(center: GeoPoint, zoom: u8) -> Self {
        Self {
            state: Rc::new(RefCell::new(ViewportState {
                center,
                zoom,
                view_rect: Rect::from_min_max(Pos2::ZERO, pos2(800.0, 600.0)),
                selection: None,
                panning: false,
            })),
            events: Rc::new(ViewportEvents::default()),
        }
    }

    /// The event channels of this viewport.
    pub fn events(&self) -> &ViewportEvents {
        &self.events
    }

    /// The current geographical center.
    pub fn center(&self) -> GeoPoint {
        self.state.borrow().center
    }

    /// The current zoom level.
    pub fn zoom(&self) -> u8 {
        self.state.borrow().zoom
    }

    /// The current on-screen view rectangle.
    pub fn view_rect(&self) -> Rect {
        self.state.borrow().view_rect
    }

    /// A projection snapshot for the current view.
    pub fn projection(&self) -> MapProjection {
        projection_of(&self.state.borrow())
    }

    /// Whether a user pan gesture is in progress.
    pub fn is_user_panning(&self) -> bool {
        self.state.borrow().panning
    }

    /// Pans the view to `center` silently: no movement event fires.
    pub fn pan_to(&self, center: GeoPoint) {
        debug!("silent pan to {center:?}");
        self.state.borrow_mut().center = center;
    }

    /// Sets the zoom level silently.
    pub fn set_zoom(&self, zoom: u8) {
        self.state.borrow_mut().zoom = zoom;
    }

    /// Sets the on-screen view rectangle. Called by the widget every frame.
    pub fn set_view_rect(&self, view_rect: Rect) {
        self.state.borrow_mut().view_rect = view_rect;
    }

    /// Begins a user pan gesture and emits `move_start`. Ignored if a
    /// gesture is already in progress.
    pub fn begin_user_pan(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.panning {
                return;
            }
            state.panning = true;
        }
        self.events.move_start.emit(&());
    }

    /// Moves the view center within a user pan gesture and emits `moved`.
    ///
    /// # Panics
    ///
    /// Panics when no gesture is in progress; that is a wiring bug in the
    /// caller, not a recoverable condition.
    pub fn user_pan_to(&self, center: GeoPoint) {
        let event = {
            let mut state = self.state.borrow_mut();
            assert!(state.panning, "user_pan_to outside a pan gesture");
            state.center = center;
            MoveEvent {
                center,
                projection: projection_of(&state),
            }
        };
        self.events.moved.emit(&event);
    }

    /// Completes a user pan gesture and emits `move_end`.
    ///
    /// # Panics
    ///
    /// Panics when no gesture is in progress.
    pub fn end_user_pan(&self) {
        let event = {
            let mut state = self.state.borrow_mut();
            assert!(state.panning, "end_user_pan without begin_user_pan");
            state.panning = false;
            MoveEvent {
                center: state.center,
                projection: projection_of(&state),
            }
        };
        self.events.move_end.emit(&event);
    }

    /// Applies a user zoom step (wheel or double-click) as a compact
    /// gesture: `move_start`, one `moved`, `move_end`.
    ///
    /// A zoom arriving while a pan gesture is open folds into that gesture
    /// as a single `moved` event instead of nesting a second gesture.
    pub fn user_zoom_to(&self, center: GeoPoint, zoom: u8) {
        if self.is_user_panning() {
            let event = {
                let mut state = self.state.borrow_mut();
                state.center = center;
                state.zoom = zoom;
                MoveEvent {
                    center,
                    projection: projection_of(&state),
                }
            };
            self.events.moved.emit(&event);
            return;
        }

        self.begin_user_pan();
        let event = {
            let mut state = self.state.borrow_mut();
            state.center = center;
            state.zoom = zoom;
            MoveEvent {
                center,
                projection: projection_of(&state),
            }
        };
        self.events.moved.emit(&event);
        self.end_user_pan();
    }

    /// The current selection rectangle size, if one is attached.
    pub fn selection(&self) -> Option<PixelDimension> {
        self.state.borrow().selection
    }

    /// Attaches the selection rectangle overlay at `size`, silently.
    ///
    /// # Panics
    ///
    /// Panics when a rectangle is already attached.
    pub fn attach_selection(&self, size: PixelDimension) {
        let mut state = self.state.borrow_mut();
        assert!(
            state.selection.is_none(),
            "attach_selection with a rectangle already attached"
        );
        debug!("attach selection {size:?}");
        state.selection = Some(size);
    }

    /// Removes the selection rectangle overlay, silently.
    ///
    /// # Panics
    ///
    /// Panics when no rectangle is attached. A redundant removal is a
    /// wiring bug; callers own the exactly-once discipline.
    pub fn detach_selection(&self) {
        let mut state = self.state.borrow_mut();
        assert!(
            state.selection.is_some(),
            "detach_selection without a rectangle"
        );
        debug!("detach selection");
        state.selection = None;
    }

    /// Resizes the selection rectangle, silently.
    ///
    /// # Panics
    ///
    /// Panics when no rectangle is attached.
    pub fn resize_selection(&self, size: PixelDimension) {
        let mut state = self.state.borrow_mut();
        assert!(
            state.selection.is_some(),
            "resize_selection without a rectangle"
        );
        state.selection = Some(size);
    }

    /// Resizes the selection rectangle as a user action and emits
    /// `selection_resized`.
    ///
    /// # Panics
    ///
    /// Panics when no rectangle is attached.
    pub fn user_resize_selection(&self, size: PixelDimension) {
        let event = {
            let mut state = self.state.borrow_mut();
            assert!(
                state.selection.is_some(),
                "user_resize_selection without a rectangle"
            );
            state.selection = Some(size);
            ResizeEvent {
                size,
                projection: projection_of(&state),
            }
        };
        self.events.selection_resized.emit(&event);
    }
}

fn projection_of(state: &ViewportState) -> MapProjection {
    MapProjection::new(state.zoom, state.center, state.view_rect)
}
