#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // hide console window on Windows in release
#![allow(rustdoc::missing_crate_level_docs)] // it's a demo

use std::cell::RefCell;
use std::rc::Rc;

use eframe::egui;
use egui_print_area::config::{MapConfig, OpenStreetMapConfig};
use egui_print_area::events::Subscription;
use egui_print_area::layers::selection::SelectionLayer;
use egui_print_area::pane::{AreaUpdate, MapPane, Margins, Project, Scale};
use egui_print_area::{GeoPoint, Map};

fn main() -> eframe::Result {
    env_logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1000.0, 700.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Print area editor test",
        options,
        Box::new(|_cc| Ok(Box::<EditorApp>::default())),
    )
}

struct EditorApp {
    map: Map,
    pane: MapPane,
    project: Project,
    selected: bool,
    last_center: Rc<RefCell<Option<GeoPoint>>>,
    last_area: Rc<RefCell<Option<AreaUpdate>>>,
    _listeners: [Subscription; 2],
}

impl Default for EditorApp {
    fn default() -> Self {
        let config = OpenStreetMapConfig::default();
        let default_center = config.default_center();

        let mut map = Map::new(config);
        map.add_layer("selection", SelectionLayer::new(map.viewport().clone()));

        let pane = MapPane::new(map.viewport().clone(), default_center);

        // In the full application these updates feed the persisted project
        // store; here they feed the side panel.
        let last_center = Rc::new(RefCell::new(None));
        let last_area = Rc::new(RefCell::new(None));
        let center_listener = {
            let last_center = Rc::clone(&last_center);
            pane.center_updates()
                .subscribe(move |c: &GeoPoint| *last_center.borrow_mut() = Some(*c))
        };
        let area_listener = {
            let last_area = Rc::clone(&last_area);
            pane.area_updates()
                .subscribe(move |u: &AreaUpdate| *last_area.borrow_mut() = Some(*u))
        };

        Self {
            map,
            pane,
            project: Project {
                name: "City walk".to_string(),
                center: Some(GeoPoint::new(46.01, 12.01)),
                paper_width: 210.0,
                paper_height: 297.0,
                margins: Margins::uniform(10.0),
                scale: Scale::OneTo25000,
            },
            selected: false,
            last_center,
            last_area,
            _listeners: [center_listener, area_listener],
        }
    }
}

impl eframe::App for EditorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::SidePanel::right("project").show(ctx, |ui| {
            ui.heading(&self.project.name);

            let mut scale = self.project.scale;
            egui::ComboBox::from_label("Scale")
                .selected_text(scale.label())
                .show_ui(ui, |ui| {
                    for candidate in Scale::ALL {
                        ui.selectable_value(&mut scale, candidate, candidate.label());
                    }
                });
            if scale != self.project.scale {
                self.project.scale = scale;
                if self.selected {
                    // Re-select to push the new scale through the pane.
                    self.pane.set_project(Some(&self.project));
                }
            }

            if ui
                .button(if self.selected { "Deselect" } else { "Select" })
                .clicked()
            {
                self.selected = !self.selected;
                self.pane
                    .set_project(self.selected.then_some(&self.project));
            }

            ui.separator();
            if let Some(area) = self.pane.selected_area() {
                ui.label(format!(
                    "Selected area: {:.0} m x {:.0} m",
                    area.width, area.height
                ));
            }
            if let Some(center) = self.last_center.borrow().as_ref() {
                ui.label(format!(
                    "Center update: {:.5}, {:.5}",
                    center.lat, center.lon
                ));
            }
            if let Some(update) = self.last_area.borrow().as_ref() {
                ui.label(format!(
                    "Area update: {:.0} m x {:.0} m at {}",
                    update.area.width,
                    update.area.height,
                    update.scale.label()
                ));
            }
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                ui.add(&mut self.map);
            });
    }
}
