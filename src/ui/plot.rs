use eframe::egui::Ui;
use egui_plot::{Legend, Plot, PlotPoints, Points};

use crate::color::class_color;
use crate::data::model::TelluricClass;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Telluric plot (central panel)
// ---------------------------------------------------------------------------

/// Coadded intensity against wavelength, one series per class.
pub fn telluric_plot(ui: &mut Ui, state: &AppState) {
    let records = match &state.records {
        Some(r) => r,
        None => {
            ui.centered_and_justified(|ui: &mut Ui| {
                ui.heading("Open a telluric database  (File → Open…)");
            });
            return;
        }
    };

    Plot::new("telluric_plot")
        .legend(Legend::default())
        .x_axis_label("Wavelength (Å)")
        .y_axis_label("Coadded intensity")
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            for class in TelluricClass::ALL {
                let points: PlotPoints = state
                    .visible_indices
                    .iter()
                    .map(|&i| &records[i])
                    .filter(|r| r.class == class)
                    .map(|r| [r.wavelength, r.median_intensity.exp()])
                    .collect();

                plot_ui.points(
                    Points::new(points)
                        .name(class.to_string())
                        .color(class_color(class))
                        .radius(1.5),
                );
            }
        });
}
