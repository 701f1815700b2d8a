use std::path::Path;

use eframe::egui;

use crate::state::AppState;
use crate::ui::{panels, plot};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct RustyCrystalApp {
    pub state: AppState,
}

impl RustyCrystalApp {
    /// Start the viewer, opening `db` straight away when given.
    pub fn new(db: Option<&Path>) -> Self {
        let mut state = AppState::default();
        if let Some(path) = db {
            panels::load_database(&mut state, path);
        }
        Self { state }
    }
}

impl eframe::App for RustyCrystalApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ---- Top panel: menu bar ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        // ---- Left side panel: filters ----
        egui::SidePanel::left("filter_panel")
            .default_width(220.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        // ---- Central panel: plot ----
        egui::CentralPanel::default().show(ctx, |ui| {
            plot::telluric_plot(ui, &self.state);
        });
    }
}
