//! Map projection.

use egui::Rect;

use crate::geodesy::GeoPoint;
use crate::{TILE_SIZE, lat_to_y, lon_to_x, x_to_lon, y_to_lat};

/// An immutable snapshot of the view used to convert between geographical
/// and screen coordinates.
///
/// A projection is only valid for the view it was taken from; it is `Copy`
/// so that viewport events can carry the projection that was current when
/// they fired, and handlers never have to re-read a viewport that may have
/// moved on since.
#[derive(Clone, Copy, Debug)]
pub struct MapProjection {
    zoom: u8,
    center: GeoPoint,
    view_rect: Rect,
}

impl MapProjection {
    pub(crate) fn new(zoom: u8, center: GeoPoint, view_rect: Rect) -> Self {
        Self {
            zoom,
            center,
            view_rect,
        }
    }

    /// The geographical center of the view this projection was taken from.
    pub fn center(&self) -> GeoPoint {
        self.center
    }

    /// The zoom level of the view this projection was taken from.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// The screen rectangle of the view this projection was taken from.
    pub fn view_rect(&self) -> Rect {
        self.view_rect
    }

    /// Projects a geographical coordinate to a screen coordinate.
    pub fn project(&self, geo_pos: GeoPoint) -> egui::Pos2 {
        let center_x = lon_to_x(self.center.lon, self.zoom);
        let center_y = lat_to_y(self.center.lat, self.zoom);

        let tile_x = lon_to_x(geo_pos.lon, self.zoom);
        let tile_y = lat_to_y(geo_pos.lat, self.zoom);

        let dx = (tile_x - center_x) * TILE_SIZE as f64;
        let dy = (tile_y - center_y) * TILE_SIZE as f64;

        let view_center = self.view_rect.center();
        view_center + egui::vec2(dx as f32, dy as f32)
    }

    /// Un-projects a screen coordinate to a geographical coordinate.
    pub fn unproject(&self, screen_pos: egui::Pos2) -> GeoPoint {
        let rel_pos = screen_pos - self.view_rect.min;
        let view_center_x = self.view_rect.width() as f64 / 2.0;
        let view_center_y = self.view_rect.height() as f64 / 2.0;

        let center_x = lon_to_x(self.center.lon, self.zoom);
        let center_y = lat_to_y(self.center.lat, self.zoom);

        let target_x = center_x + (rel_pos.x as f64 - view_center_x) / TILE_SIZE as f64;
        let target_y = center_y + (rel_pos.y as f64 - view_center_y) / TILE_SIZE as f64;

        GeoPoint::new(y_to_lat(target_y, self.zoom), x_to_lon(target_x, self.zoom))
    }
}
