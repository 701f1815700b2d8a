use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;

use crate::data::db::TelluricRecord;
use crate::data::filter::{RecordFilter, filtered_indices, orders_present};
use crate::data::model::TelluricClass;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
#[derive(Default)]
pub struct AppState {
    /// Loaded database records (None until user loads a file).
    pub records: Option<Vec<TelluricRecord>>,

    /// File the records came from.
    pub source: Option<PathBuf>,

    /// Orders present in the loaded records.
    pub orders: BTreeSet<u32>,

    pub filter: RecordFilter,

    /// Indices of records passing the current filter (cached).
    pub visible_indices: Vec<usize>,

    /// Text of the wavelength window inputs.
    pub window_start: String,
    pub window_end: String,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl AppState {
    /// Ingest newly loaded records and reset the filter.
    pub fn set_records(&mut self, records: Vec<TelluricRecord>, source: PathBuf) {
        self.orders = orders_present(&records);
        self.filter = RecordFilter::default();
        self.visible_indices = (0..records.len()).collect();
        self.window_start.clear();
        self.window_end.clear();
        self.records = Some(records);
        self.source = Some(source);
        self.status_message = None;
    }

    /// Recompute `visible_indices` after a filter change.
    pub fn refilter(&mut self) {
        if let Some(records) = &self.records {
            self.visible_indices = filtered_indices(records, &self.filter);
        }
    }

    pub fn toggle_class(&mut self, class: TelluricClass) {
        if !self.filter.classes.remove(&class) {
            self.filter.classes.insert(class);
        }
        self.refilter();
    }

    /// Toggle one order. An empty selection shows every order.
    pub fn toggle_order(&mut self, order: u32) {
        if !self.filter.orders.remove(&order) {
            self.filter.orders.insert(order);
        }
        self.refilter();
    }

    pub fn all_orders(&mut self) {
        self.filter.orders.clear();
        self.refilter();
    }

    /// Apply the window typed into `window_start`/`window_end`.
    pub fn apply_wavelength_window(&mut self) -> Result<()> {
        let start: f64 = self.window_start.trim().parse()?;
        let end: f64 = self.window_end.trim().parse()?;
        self.filter = self.filter.clone().with_wavelength_range(start, end)?;
        self.refilter();
        Ok(())
    }

    pub fn clear_wavelength_window(&mut self) {
        self.filter.wavelength = None;
        self.window_start.clear();
        self.window_end.clear();
        self.refilter();
    }

    pub fn record_count(&self) -> usize {
        self.records.as_ref().map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<TelluricRecord> {
        [(1, 5000.0, TelluricClass::Water), (2, 6000.0, TelluricClass::Airmass)]
            .into_iter()
            .map(|(order, wavelength, class)| TelluricRecord {
                order,
                pixel: 0,
                wavelength,
                class,
                pcc: Some(0.8),
                slope: Some(-0.1),
                intercept: Some(0.0),
                median_intensity: -0.2,
            })
            .collect()
    }

    fn loaded() -> AppState {
        let mut state = AppState::default();
        state.set_records(records(), PathBuf::from("db.csv"));
        state
    }

    #[test]
    fn loading_shows_everything() {
        let state = loaded();
        assert_eq!(state.visible_indices, vec![0, 1]);
        assert_eq!(state.orders.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn toggles_update_visibility() {
        let mut state = loaded();
        state.toggle_class(TelluricClass::Water);
        assert_eq!(state.visible_indices, vec![1]);
        state.toggle_class(TelluricClass::Water);
        state.toggle_order(1);
        assert_eq!(state.visible_indices, vec![0]);
        state.all_orders();
        assert_eq!(state.visible_indices, vec![0, 1]);
    }

    #[test]
    fn wavelength_window_from_text() {
        let mut state = loaded();
        state.window_start = "5500".into();
        state.window_end = " 6500 ".into();
        state.apply_wavelength_window().unwrap();
        assert_eq!(state.visible_indices, vec![1]);

        state.window_end = "5000".into();
        assert!(state.apply_wavelength_window().is_err());

        state.clear_wavelength_window();
        assert_eq!(state.visible_indices, vec![0, 1]);
    }
}
