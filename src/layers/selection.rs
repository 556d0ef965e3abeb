//! A layer for the resizable print-area selection rectangle.
//!
//! The rectangle has no position of its own: the selected area is defined by
//! the map center plus a dimension, so the overlay is always centered on the
//! view and a handle drag resizes it symmetrically. The layer never owns the
//! rectangle state; it renders and manipulates the selection carried by the
//! shared [`Viewport`], so programmatic resizes from the reconcilers and
//! user resizes meet in one place.

use egui::{Color32, CursorIcon, Painter, Pos2, Rect, Response, Stroke, StrokeKind, vec2};
use std::any::Any;

use crate::geodesy::PixelDimension;
use crate::layers::{Layer, dist_sq_to_segment};
use crate::projection::MapProjection;
use crate::viewport::Viewport;

/// A resize handle on the selection rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Handle {
    North,
    East,
    South,
    West,
    NorthEast,
    SouthEast,
    SouthWest,
    NorthWest,
}

const CORNERS: [Handle; 4] = [
    Handle::NorthWest,
    Handle::NorthEast,
    Handle::SouthEast,
    Handle::SouthWest,
];
const EDGES: [Handle; 4] = [Handle::North, Handle::East, Handle::South, Handle::West];

/// Layer implementation that lets the user resize the print-area rectangle.
pub struct SelectionLayer {
    viewport: Viewport,

    /// The stroke style of the rectangle outline.
    pub stroke: Stroke,

    /// The fill color of the rectangle.
    pub fill: Color32,

    /// The radius of the resize handles.
    pub handle_radius: f32,

    /// The fill color of the resize handles.
    pub handle_fill: Color32,

    dragged_handle: Option<Handle>,
}

impl SelectionLayer {
    /// Creates a selection layer over `viewport`.
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            stroke: Stroke::new(2.0, Color32::from_rgb(200, 30, 30)),
            fill: Color32::from_rgba_unmultiplied(200, 30, 30, 30),
            handle_radius: 5.0,
            handle_fill: Color32::from_rgb(200, 30, 30),
            dragged_handle: None,
        }
    }

    fn screen_rect(&self, projection: &MapProjection) -> Option<Rect> {
        let size = self.viewport.selection()?;
        Some(Rect::from_center_size(
            projection.view_rect().center(),
            vec2(size.width as f32, size.height as f32),
        ))
    }

    fn find_handle_at(&self, screen_pos: Pos2, rect: &Rect) -> Option<Handle> {
        // Corners win over edges: they are the smaller target.
        let corner_tolerance_sq = (self.handle_radius * 3.0).powi(2);
        for handle in CORNERS {
            if handle_point(rect, handle).distance_sq(screen_pos) < corner_tolerance_sq {
                return Some(handle);
            }
        }

        let edge_tolerance_sq = (self.handle_radius * 2.0).powi(2);
        for handle in EDGES {
            let (a, b) = edge_segment(rect, handle);
            if dist_sq_to_segment(screen_pos, a, b) < edge_tolerance_sq {
                return Some(handle);
            }
        }
        None
    }

    fn resized_dimension(
        &self,
        handle: Handle,
        pointer: Pos2,
        center: Pos2,
        current: PixelDimension,
    ) -> PixelDimension {
        let span = |offset: f32| (2.0 * offset.abs()).round().max(1.0) as u32;
        let mut size = current;
        match handle {
            Handle::East | Handle::West => size.width = span(pointer.x - center.x),
            Handle::North | Handle::South => size.height = span(pointer.y - center.y),
            Handle::NorthEast | Handle::SouthEast | Handle::SouthWest | Handle::NorthWest => {
                size.width = span(pointer.x - center.x);
                size.height = span(pointer.y - center.y);
            }
        }
        size
    }
}

impl Layer for SelectionLayer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handle_input(&mut self, response: &Response, projection: &MapProjection) -> bool {
        let Some(rect) = self.screen_rect(projection) else {
            self.dragged_handle = None;
            return false;
        };

        // A pan gesture in flight keeps the map's input priority.
        if self.viewport.is_user_panning() {
            return false;
        }

        if response.drag_started() {
            if let Some(pointer_pos) = response.interact_pointer_pos() {
                self.dragged_handle = self.find_handle_at(pointer_pos, &rect);
            }
        }

        if response.dragged() {
            if let Some(handle) = self.dragged_handle {
                if let Some(pointer_pos) = response.ctx.input(|i| i.pointer.interact_pos()) {
                    let size = self.resized_dimension(
                        handle,
                        pointer_pos,
                        rect.center(),
                        self.viewport.selection().unwrap_or_default(),
                    );
                    if Some(size) != self.viewport.selection() {
                        self.viewport.user_resize_selection(size);
                    }
                }
            }
        }

        if response.drag_stopped() {
            self.dragged_handle = None;
        }

        let hovered_handle = self
            .dragged_handle
            .or_else(|| response.hover_pos().and_then(|pos| self.find_handle_at(pos, &rect)));
        if let Some(handle) = hovered_handle {
            response.ctx.set_cursor_icon(cursor_for(handle));
        }

        self.dragged_handle.is_some() || hovered_handle.is_some()
    }

    fn draw(&self, painter: &Painter, projection: &MapProjection) {
        let Some(rect) = self.screen_rect(projection) else {
            return;
        };

        painter.rect_filled(rect, 0.0, self.fill);
        painter.rect_stroke(rect, 0.0, self.stroke, StrokeKind::Middle);

        for handle in CORNERS.into_iter().chain(EDGES) {
            painter.circle_filled(handle_point(&rect, handle), self.handle_radius, self.handle_fill);
        }
    }
}

fn handle_point(rect: &Rect, handle: Handle) -> Pos2 {
    match handle {
        Handle::North => rect.center_top(),
        Handle::East => rect.right_center(),
        Handle::South => rect.center_bottom(),
        Handle::West => rect.left_center(),
        Handle::NorthEast => rect.right_top(),
        Handle::SouthEast => rect.right_bottom(),
        Handle::SouthWest => rect.left_bottom(),
        Handle::NorthWest => rect.left_top(),
    }
}

fn edge_segment(rect: &Rect, handle: Handle) -> (Pos2, Pos2) {
    match handle {
        Handle::North => (rect.left_top(), rect.right_top()),
        Handle::East => (rect.right_top(), rect.right_bottom()),
        Handle::South => (rect.left_bottom(), rect.right_bottom()),
        Handle::West => (rect.left_top(), rect.left_bottom()),
        _ => unreachable!("corner handles have no edge segment"),
    }
}

fn cursor_for(handle: Handle) -> CursorIcon {
    match handle {
        Handle::North | Handle::South => CursorIcon::ResizeVertical,
        Handle::East | Handle::West => CursorIcon::ResizeHorizontal,
        Handle::NorthEast | Handle::SouthWest => CursorIcon::ResizeNeSw,
        Handle::NorthWest | Handle::SouthEast => CursorIcon::ResizeNwSe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::GeoPoint;
    use egui::pos2;

    fn layer() -> SelectionLayer {
        let viewport = Viewport::new(GeoPoint::new(46.01, 12.01), 13);
        viewport.attach_selection(PixelDimension {
            width: 200,
            height: 100,
        });
        SelectionLayer::new(viewport)
    }

    #[test]
    fn finds_corner_and_edge_handles() {
        let layer = layer();
        let rect = Rect::from_center_size(pos2(400.0, 300.0), vec2(200.0, 100.0));

        assert_eq!(
            layer.find_handle_at(pos2(500.0, 250.0), &rect),
            Some(Handle::NorthEast)
        );
        assert_eq!(
            layer.find_handle_at(pos2(300.0, 352.0), &rect),
            Some(Handle::SouthWest)
        );
        assert_eq!(
            layer.find_handle_at(pos2(400.0, 250.0), &rect),
            Some(Handle::North)
        );
        assert_eq!(
            layer.find_handle_at(pos2(500.0, 300.0), &rect),
            Some(Handle::East)
        );
        assert_eq!(layer.find_handle_at(pos2(400.0, 300.0), &rect), None);
        assert_eq!(layer.find_handle_at(pos2(0.0, 0.0), &rect), None);
    }

    #[test]
    fn corner_drag_resizes_both_axes_symmetrically() {
        let layer = layer();
        let current = PixelDimension {
            width: 200,
            height: 100,
        };

        let resized = layer.resized_dimension(
            Handle::SouthEast,
            pos2(515.0, 365.0),
            pos2(400.0, 300.0),
            current,
        );
        assert_eq!(
            resized,
            PixelDimension {
                width: 230,
                height: 130,
            }
        );
    }

    #[test]
    fn edge_drag_resizes_one_axis() {
        let layer = layer();
        let current = PixelDimension {
            width: 200,
            height: 100,
        };

        let resized =
            layer.resized_dimension(Handle::West, pos2(290.0, 300.0), pos2(400.0, 300.0), current);
        assert_eq!(
            resized,
            PixelDimension {
                width: 220,
                height: 100,
            }
        );

        let resized =
            layer.resized_dimension(Handle::North, pos2(400.0, 240.0), pos2(400.0, 300.0), current);
        assert_eq!(
            resized,
            PixelDimension {
                width: 200,
                height: 120,
            }
        );
    }

    #[test]
    fn degenerate_drag_clamps_to_one_pixel() {
        let layer = layer();
        let resized = layer.resized_dimension(
            Handle::East,
            pos2(400.0, 300.0),
            pos2(400.0, 300.0),
            PixelDimension {
                width: 200,
                height: 100,
            },
        );
        assert_eq!(resized.width, 1);
    }
}
