//! Reconciliation of the authoritative map center with the viewport.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::events::{EventChannel, Subscription};
use crate::geodesy::GeoPoint;
use crate::viewport::{MoveEvent, Viewport};

/// Owns the authoritative geographical center and keeps it consistent with
/// the viewport in both directions.
///
/// Program to viewport: a defined value set through [`set_center`] pans the
/// viewport silently, so the pan cannot be re-heard as user input. User to
/// program: once a pan gesture starts, the program channel is torn down for
/// the duration of the gesture, every distinct intermediate center updates
/// the authoritative value and is emitted on [`changed`], and the gesture's
/// single `move_end` rebuilds the program channel.
///
/// [`set_center`]: CenterReconciler::set_center
/// [`changed`]: CenterReconciler::changed
pub struct CenterReconciler {
    viewport: Viewport,
    program: EventChannel<GeoPoint>,
    changed: EventChannel<GeoPoint>,
    state: Rc<RefCell<CenterState>>,
}

struct CenterState {
    center: Option<GeoPoint>,
    active: bool,
    subs: CenterSubs,
}

#[derive(Default)]
struct CenterSubs {
    program: Option<Subscription>,
    move_start: Option<Subscription>,
    moved: Option<Subscription>,
    move_end: Option<Subscription>,
}

impl CenterReconciler {
    /// Creates an inactive reconciler over `viewport` with an undefined
    /// center.
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            program: EventChannel::new(),
            changed: EventChannel::new(),
            state: Rc::new(RefCell::new(CenterState {
                center: None,
                active: false,
                subs: CenterSubs::default(),
            })),
        }
    }

    /// The outbound channel carrying user-driven center changes.
    pub fn changed(&self) -> &EventChannel<GeoPoint> {
        &self.changed
    }

    /// The current authoritative center.
    pub fn center(&self) -> Option<GeoPoint> {
        self.state.borrow().center
    }

    /// Whether the reconciler is currently active.
    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Sets the authoritative center. Setting the current value again is a
    /// no-op; a defined new value pans the viewport silently while active.
    pub fn set_center(&self, center: Option<GeoPoint>) {
        {
            let mut state = self.state.borrow_mut();
            if state.center == center {
                return;
            }
            state.center = center;
        }
        if let Some(center) = center {
            self.program.emit(&center);
        }
    }

    /// Activates both channels and replays the retained center as one
    /// silent pan, without emitting a change event.
    pub fn activate(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.active {
                return;
            }
            state.active = true;
        }
        debug!("center reconciler active");

        attach_program(&self.state, &self.program, &self.viewport);
        self.attach_move_start();

        let retained = self.state.borrow().center;
        if let Some(center) = retained {
            self.viewport.pan_to(center);
        }
    }

    /// Deactivates both channels. The authoritative center is retained for
    /// reactivation without re-emitting.
    pub fn deactivate(&self) {
        let mut state = self.state.borrow_mut();
        if !state.active {
            return;
        }
        debug!("center reconciler inactive");
        state.active = false;
        state.subs = CenterSubs::default();
    }

    fn attach_move_start(&self) {
        let state = Rc::clone(&self.state);
        let viewport = self.viewport.clone();
        let program = self.program.clone();
        let changed = self.changed.clone();

        let sub = self.viewport.events().move_start.subscribe(move |_| {
            // The user owns the viewport for the duration of the gesture:
            // tear down the program channel so a silent completion of the
            // drag cannot be mistaken for another program update.
            state.borrow_mut().subs.program = None;

            let moved_sub = {
                let state = Rc::clone(&state);
                let changed = changed.clone();
                viewport.events().moved.subscribe(move |ev: &MoveEvent| {
                    let mut st = state.borrow_mut();
                    if st.center != Some(ev.center) {
                        st.center = Some(ev.center);
                        drop(st);
                        changed.emit(&ev.center);
                    }
                })
            };

            let end_sub = {
                let move_end = viewport.events().move_end.clone();
                let state = Rc::clone(&state);
                let viewport = viewport.clone();
                let program = program.clone();
                move_end.subscribe(move |_| {
                    {
                        // Consume exactly one end-of-move, then resume
                        // applying program writes.
                        let mut st = state.borrow_mut();
                        st.subs.moved = None;
                        st.subs.move_end = None;
                    }
                    attach_program(&state, &program, &viewport);
                })
            };

            let mut st = state.borrow_mut();
            st.subs.moved = Some(moved_sub);
            st.subs.move_end = Some(end_sub);
        });

        self.state.borrow_mut().subs.move_start = Some(sub);
    }
}

fn attach_program(
    state: &Rc<RefCell<CenterState>>,
    program: &EventChannel<GeoPoint>,
    viewport: &Viewport,
) {
    let viewport = viewport.clone();
    let sub = program.subscribe(move |center: &GeoPoint| viewport.pan_to(*center));
    state.borrow_mut().subs.program = Some(sub);
}
