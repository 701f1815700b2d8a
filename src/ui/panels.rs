use std::path::Path;

use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};

use crate::color::class_color;
use crate::data::model::TelluricClass;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – filter widgets
// ---------------------------------------------------------------------------

/// Render the left filter panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Filters");
    ui.separator();

    if state.records.is_none() {
        ui.label("No database loaded.");
        return;
    }

    ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            // ---- Classes ----
            ui.strong("Class");
            for class in TelluricClass::ALL {
                let mut checked = state.filter.classes.contains(&class);
                let text = RichText::new(class.to_string()).color(class_color(class));
                if ui.checkbox(&mut checked, text).changed() {
                    state.toggle_class(class);
                }
            }
            ui.separator();

            // ---- Orders ----
            let orders: Vec<u32> = state.orders.iter().copied().collect();
            let n_selected = state.filter.orders.len();
            let header_text = if n_selected == 0 {
                format!("Orders  (all {})", orders.len())
            } else {
                format!("Orders  ({n_selected}/{})", orders.len())
            };
            egui::CollapsingHeader::new(RichText::new(header_text).strong())
                .id_salt("orders")
                .default_open(false)
                .show(ui, |ui: &mut Ui| {
                    if ui.small_button("All").clicked() {
                        state.all_orders();
                    }
                    for order in orders {
                        let mut checked = state.filter.orders.contains(&order);
                        if ui.checkbox(&mut checked, format!("{order:02}")).changed() {
                            state.toggle_order(order);
                        }
                    }
                });
            ui.separator();

            // ---- Wavelength window ----
            ui.strong("Wavelength (Å)");
            ui.horizontal(|ui: &mut Ui| {
                ui.add(egui::TextEdit::singleline(&mut state.window_start).desired_width(70.0));
                ui.label("–");
                ui.add(egui::TextEdit::singleline(&mut state.window_end).desired_width(70.0));
            });
            ui.horizontal(|ui: &mut Ui| {
                if ui.small_button("Apply").clicked() {
                    match state.apply_wavelength_window() {
                        Ok(()) => state.status_message = None,
                        Err(e) => state.status_message = Some(format!("Window: {e:#}")),
                    }
                }
                if ui.small_button("Clear").clicked() {
                    state.clear_wavelength_window();
                }
            });
        });
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(source) = &state.source {
            ui.label(format!(
                "{}: {} records, {} visible",
                source.display(),
                state.record_count(),
                state.visible_indices.len()
            ));
        }

        if let Some(msg) = &state.status_message {
            ui.separator();
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File loading
// ---------------------------------------------------------------------------

pub fn open_file_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open telluric database")
        .add_filter("Supported files", &["csv", "parquet", "pq"])
        .add_filter("CSV", &["csv"])
        .add_filter("Parquet", &["parquet", "pq"])
        .pick_file();

    if let Some(path) = file {
        load_database(state, &path);
    }
}

pub fn load_database(state: &mut AppState, path: &Path) {
    match crate::data::db::read_db(path) {
        Ok(records) => {
            log::info!("Loaded {} records from {}", records.len(), path.display());
            state.set_records(records, path.to_path_buf());
        }
        Err(e) => {
            log::error!("Failed to load database: {e:#}");
            state.status_message = Some(format!("Error: {e:#}"));
        }
    }
}
