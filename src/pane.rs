//! Map pane composition: wiring project state to the reconcilers.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::events::{EventChannel, Subscription};
use crate::geodesy::{GeoPoint, RealDimension};
use crate::reconcile::{AreaReconciler, CenterReconciler};
use crate::viewport::Viewport;

/// An enumerated print scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scale {
    /// 1:10 000
    OneTo10000,
    /// 1:25 000
    OneTo25000,
    /// 1:50 000
    OneTo50000,
    /// 1:100 000
    OneTo100000,
}

impl Scale {
    /// The denominator of the scale ratio: meters of ground per millimeter
    /// of paper, times 1000.
    pub fn reduction_factor(&self) -> f64 {
        match self {
            Scale::OneTo10000 => 10_000.0,
            Scale::OneTo25000 => 25_000.0,
            Scale::OneTo50000 => 50_000.0,
            Scale::OneTo100000 => 100_000.0,
        }
    }

    /// Human-readable label, e.g. `1:25 000`.
    pub fn label(&self) -> &'static str {
        match self {
            Scale::OneTo10000 => "1:10 000",
            Scale::OneTo25000 => "1:25 000",
            Scale::OneTo50000 => "1:50 000",
            Scale::OneTo100000 => "1:100 000",
        }
    }

    /// All supported scales, coarsest last.
    pub const ALL: [Scale; 4] = [
        Scale::OneTo10000,
        Scale::OneTo25000,
        Scale::OneTo50000,
        Scale::OneTo100000,
    ];
}

/// Paper margins in millimeters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    /// Top margin in millimeters.
    pub top: f64,
    /// Right margin in millimeters.
    pub right: f64,
    /// Bottom margin in millimeters.
    pub bottom: f64,
    /// Left margin in millimeters.
    pub left: f64,
}

impl Margins {
    /// Uniform margins on all four sides.
    pub fn uniform(margin: f64) -> Self {
        Self {
            top: margin,
            right: margin,
            bottom: margin,
            left: margin,
        }
    }
}

/// A print project as the surrounding application stores it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Display name of the project.
    pub name: String,

    /// Stored map center; `None` for a project that has not been placed yet.
    pub center: Option<GeoPoint>,

    /// Paper width in millimeters.
    pub paper_width: f64,

    /// Paper height in millimeters.
    pub paper_height: f64,

    /// Paper margins in millimeters.
    pub margins: Margins,

    /// Print scale.
    pub scale: Scale,
}

impl Project {
    /// The real-world area covered by the printable part of the paper:
    /// paper minus margins, scaled from millimeters of paper to meters of
    /// ground.
    pub fn selected_area(&self) -> RealDimension {
        let factor = self.scale.reduction_factor() / 1000.0;
        RealDimension {
            width: (self.paper_width - self.margins.left - self.margins.right) * factor,
            height: (self.paper_height - self.margins.top - self.margins.bottom) * factor,
        }
    }
}

/// A user-driven area change, carrying the margin and scale bookkeeping the
/// store needs to reconstruct a full area update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AreaUpdate {
    /// The new selected area in meters.
    pub area: RealDimension,

    /// The margins of the project the change belongs to.
    pub margins: Margins,

    /// The scale of the project the change belongs to.
    pub scale: Scale,
}

/// Wires the two reconcilers to externally-supplied project state.
///
/// Project selection activates both reconcilers with the project's center,
/// scale and printable area; deselection deactivates them and falls back to
/// the configured default center. Reconciler change events are forwarded
/// outward on [`center_updates`] and [`area_updates`].
///
/// [`center_updates`]: MapPane::center_updates
/// [`area_updates`]: MapPane::area_updates
pub struct MapPane {
    viewport: Viewport,
    center: CenterReconciler,
    area: AreaReconciler,
    default_center: GeoPoint,
    bookkeeping: Rc<RefCell<Option<(Margins, Scale)>>>,
    center_updates: EventChannel<GeoPoint>,
    area_updates: EventChannel<AreaUpdate>,
    _forwarders: [Subscription; 2],
}

impl MapPane {
    /// Creates a pane over `viewport` with no project selected.
    pub fn new(viewport: Viewport, default_center: GeoPoint) -> Self {
        let center = CenterReconciler::new(viewport.clone());
        let area = AreaReconciler::new(viewport.clone());
        let bookkeeping: Rc<RefCell<Option<(Margins, Scale)>>> = Rc::new(RefCell::new(None));
        let center_updates = EventChannel::new();
        let area_updates = EventChannel::new();

        let forward_center = {
            let updates = center_updates.clone();
            center
                .changed()
                .subscribe(move |c: &GeoPoint| updates.emit(c))
        };
        let forward_area = {
            let updates = area_updates.clone();
            let bookkeeping = Rc::clone(&bookkeeping);
            area.changed().subscribe(move |dimension: &RealDimension| {
                let Some((margins, scale)) = *bookkeeping.borrow() else {
                    return;
                };
                updates.emit(&AreaUpdate {
                    area: *dimension,
                    margins,
                    scale,
                });
            })
        };

        Self {
            viewport,
            center,
            area,
            default_center,
            bookkeeping,
            center_updates,
            area_updates,
            _forwarders: [forward_center, forward_area],
        }
    }

    /// The viewport this pane drives.
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Outbound user-driven center changes.
    pub fn center_updates(&self) -> &EventChannel<GeoPoint> {
        &self.center_updates
    }

    /// Outbound user-driven area changes, with margins and scale attached.
    pub fn area_updates(&self) -> &EventChannel<AreaUpdate> {
        &self.area_updates
    }

    /// The current authoritative center.
    pub fn center(&self) -> Option<GeoPoint> {
        self.center.center()
    }

    /// The current authoritative selected area.
    pub fn selected_area(&self) -> Option<RealDimension> {
        self.area.selected_area()
    }

    /// Selects or deselects the current project.
    pub fn set_project(&self, project: Option<&Project>) {
        match project {
            Some(project) => {
                debug!("project selected: {}", project.name);
                *self.bookkeeping.borrow_mut() = Some((project.margins, project.scale));
                self.center.set_center(project.center);
                self.area
                    .set_reduction_factor(Some(project.scale.reduction_factor()));
                self.area.set_selected_area(Some(project.selected_area()));
                self.center.activate();
                self.area.enable();
            }
            None => {
                debug!("project deselected");
                self.center.deactivate();
                self.area.disable();
                *self.bookkeeping.borrow_mut() = None;
                self.viewport.pan_to(self.default_center);
            }
        }
    }
}
