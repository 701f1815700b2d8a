use std::collections::BTreeSet;

use anyhow::{Result, bail};

use super::db::TelluricRecord;
use super::model::TelluricClass;

// ---------------------------------------------------------------------------
// Filter predicate: which records of the database are shown
// ---------------------------------------------------------------------------

/// Selection over telluric records.
///
/// An empty `orders` set means "no order constraint"; an empty `classes`
/// set hides everything.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFilter {
    pub classes: BTreeSet<TelluricClass>,
    pub orders: BTreeSet<u32>,
    /// Inclusive wavelength window in Ångström.
    pub wavelength: Option<(f64, f64)>,
}

impl Default for RecordFilter {
    fn default() -> Self {
        RecordFilter {
            classes: TelluricClass::ALL.into_iter().collect(),
            orders: BTreeSet::new(),
            wavelength: None,
        }
    }
}

impl RecordFilter {
    /// Restrict to `start..=end` Å. The window must be non-empty.
    pub fn with_wavelength_range(mut self, start: f64, end: f64) -> Result<Self> {
        if !(start.is_finite() && end.is_finite()) {
            bail!("wavelength range {start}..{end} is not finite");
        }
        if start >= end {
            bail!("start wavelength {start} not less than end wavelength {end}");
        }
        self.wavelength = Some((start, end));
        Ok(self)
    }

    pub fn matches(&self, record: &TelluricRecord) -> bool {
        if !self.classes.contains(&record.class) {
            return false;
        }
        if !self.orders.is_empty() && !self.orders.contains(&record.order) {
            return false;
        }
        match self.wavelength {
            Some((lo, hi)) => lo <= record.wavelength && record.wavelength <= hi,
            None => true,
        }
    }
}

/// Return indices of records that pass the filter.
pub fn filtered_indices(records: &[TelluricRecord], filter: &RecordFilter) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| filter.matches(r))
        .map(|(i, _)| i)
        .collect()
}

/// Sorted unique orders present in the records.
pub fn orders_present(records: &[TelluricRecord]) -> BTreeSet<u32> {
    records.iter().map(|r| r.order).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(order: u32, wavelength: f64, class: TelluricClass) -> TelluricRecord {
        TelluricRecord {
            order,
            pixel: 0,
            wavelength,
            class,
            pcc: None,
            slope: None,
            intercept: None,
            median_intensity: 0.0,
        }
    }

    fn sample() -> Vec<TelluricRecord> {
        vec![
            record(1, 5000.0, TelluricClass::Water),
            record(1, 5001.0, TelluricClass::Airmass),
            record(2, 6000.0, TelluricClass::Composite),
            record(3, 6500.0, TelluricClass::Water),
        ]
    }

    #[test]
    fn default_shows_everything() {
        assert_eq!(filtered_indices(&sample(), &RecordFilter::default()), vec![0, 1, 2, 3]);
    }

    #[test]
    fn class_and_order_constraints() {
        let mut filter = RecordFilter::default();
        filter.classes.remove(&TelluricClass::Airmass);
        filter.orders.insert(1);
        assert_eq!(filtered_indices(&sample(), &filter), vec![0]);

        filter.classes.clear();
        assert!(filtered_indices(&sample(), &filter).is_empty());
    }

    #[test]
    fn wavelength_window_is_inclusive() {
        let filter = RecordFilter::default()
            .with_wavelength_range(5001.0, 6000.0)
            .unwrap();
        assert_eq!(filtered_indices(&sample(), &filter), vec![1, 2]);
    }

    #[test]
    fn rejects_inverted_window() {
        assert!(RecordFilter::default().with_wavelength_range(6000.0, 5000.0).is_err());
        assert!(RecordFilter::default().with_wavelength_range(5000.0, 5000.0).is_err());
    }

    #[test]
    fn lists_orders() {
        assert_eq!(orders_present(&sample()).into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
