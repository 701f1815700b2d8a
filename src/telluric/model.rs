//! Telluric spectrum generation from the database, and correction of science
//! spectra with it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::db::TelluricRecord;
use crate::data::model::TelluricClass;

// ---------------------------------------------------------------------------
// Model generation
// ---------------------------------------------------------------------------

/// One pixel of a generated telluric spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPoint {
    pub order: u32,
    pub pixel: usize,
    pub wavelength: f64,
    pub class: TelluricClass,
    /// Predicted linear intensity; `None` for composite pixels.
    pub intensity: Option<f64>,
}

/// Evaluate every record for a water calibrator value and an airmass.
///
/// Water and airmass pixels are kept when they absorb more than
/// `min_model_depth`; composite pixels are always kept, without intensity.
pub fn generate_model(
    records: &[TelluricRecord],
    water_value: f64,
    airmass: f64,
    min_model_depth: f64,
) -> Vec<ModelPoint> {
    records
        .iter()
        .filter_map(|r| {
            let intensity = match r.class {
                TelluricClass::Composite => None,
                TelluricClass::Water => Some(r.fit()?.intensity(water_value)),
                TelluricClass::Airmass => Some(r.fit()?.intensity(airmass)),
            };
            if let Some(i) = intensity {
                if !(i < 1.0 - min_model_depth) {
                    return None;
                }
            }
            Some(ModelPoint {
                order: r.order,
                pixel: r.pixel,
                wavelength: r.wavelength,
                class: r.class,
                intensity,
            })
        })
        .collect()
}

/// `<dir>/<stem>_tel.csv` for a science file.
pub fn model_path_for(science: &Path) -> PathBuf {
    let stem = science
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("spectrum");
    science.with_file_name(format!("{stem}_tel.csv"))
}

/// Space-delimited with header `order px wavelength class intensity`.
pub fn write_model(path: &Path, points: &[ModelPoint]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b' ')
        .quote(b'\'')
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    writer
        .write_record(["order", "px", "wavelength", "class", "intensity"])
        .context("writing model header")?;
    for p in points {
        let intensity = match p.intensity {
            Some(i) => format!("{i:.4}"),
            None => "-1".to_string(),
        };
        writer
            .write_record([
                format!("{:02}", p.order),
                format!("{:04}", p.pixel),
                format!("{:.2}", p.wavelength),
                p.class.code().to_string(),
                intensity,
            ])
            .context("writing model point")?;
    }
    writer.flush().context("flushing model")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Science spectrum correction
// ---------------------------------------------------------------------------

/// A science spectrum as read from JSON: `{ "orders": { "<n>": { ... } } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScienceSpectrum {
    pub orders: BTreeMap<u32, OrderSpectrum>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderSpectrum {
    pub wavelength: Vec<f64>,
    /// Linear intensity indexed by pixel within the order.
    pub intensity: Vec<f64>,
}

impl ScienceSpectrum {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).context("parsing science spectrum JSON")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("serializing science spectrum")?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }
}

/// Counts from [`apply_model`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectionSummary {
    pub corrected: usize,
    pub composite: usize,
    pub unmatched: usize,
}

/// Divide the telluric model out of a science spectrum in place.
///
/// Composite points have no intensity and are left alone, as are points whose
/// order or pixel the science spectrum does not cover.
pub fn apply_model(science: &mut ScienceSpectrum, model: &[ModelPoint]) -> CorrectionSummary {
    let mut summary = CorrectionSummary::default();
    for point in model {
        let Some(intensity) = point.intensity else {
            summary.composite += 1;
            continue;
        };
        let target = science
            .orders
            .get_mut(&point.order)
            .and_then(|o| o.intensity.get_mut(point.pixel));
        match target {
            Some(value) if intensity > 0.0 => {
                *value /= intensity;
                summary.corrected += 1;
            }
            _ => summary.unmatched += 1,
        }
    }
    log::info!(
        "corrected {} pixels ({} composite skipped, {} unmatched)",
        summary.corrected,
        summary.composite,
        summary.unmatched
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(pixel: usize, class: TelluricClass, slope: f64, intercept: f64) -> TelluricRecord {
        let composite = class == TelluricClass::Composite;
        TelluricRecord {
            order: 2,
            pixel,
            wavelength: 6000.0 + pixel as f64 * 0.05,
            class,
            pcc: (!composite).then_some(0.9),
            slope: (!composite).then_some(slope),
            intercept: (!composite).then_some(intercept),
            median_intensity: -0.1,
        }
    }

    #[test]
    fn evaluates_each_class_against_its_calibrator() {
        let records = vec![
            record(1, TelluricClass::Water, -0.5, 0.0),
            record(2, TelluricClass::Airmass, -0.2, 0.1),
            record(3, TelluricClass::Composite, 0.0, 0.0),
        ];
        let model = generate_model(&records, 0.4, 1.5, 0.01);
        assert_eq!(model.len(), 3);
        assert_relative_eq!(model[0].intensity.unwrap(), (-0.2f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(model[1].intensity.unwrap(), (-0.2f64).exp(), epsilon = 1e-12);
        assert_eq!(model[2].intensity, None);
    }

    #[test]
    fn drops_shallow_points() {
        let records = vec![
            record(1, TelluricClass::Water, -0.001, 0.0),
            record(2, TelluricClass::Water, -0.5, 0.0),
        ];
        let model = generate_model(&records, 1.0, 1.0, 0.01);
        assert_eq!(model.len(), 1);
        assert_eq!(model[0].pixel, 2);
    }

    #[test]
    fn correction_divides_model_out() {
        let mut science = ScienceSpectrum::default();
        science.orders.insert(
            2,
            OrderSpectrum {
                wavelength: vec![6000.0, 6000.05, 6000.1],
                intensity: vec![1.0, 0.5, 0.8],
            },
        );
        let model = vec![
            ModelPoint {
                order: 2,
                pixel: 1,
                wavelength: 6000.05,
                class: TelluricClass::Water,
                intensity: Some(0.5),
            },
            ModelPoint {
                order: 2,
                pixel: 2,
                wavelength: 6000.1,
                class: TelluricClass::Composite,
                intensity: None,
            },
            ModelPoint {
                order: 9,
                pixel: 0,
                wavelength: 7000.0,
                class: TelluricClass::Airmass,
                intensity: Some(0.9),
            },
        ];

        let summary = apply_model(&mut science, &model);
        assert_eq!(
            summary,
            CorrectionSummary {
                corrected: 1,
                composite: 1,
                unmatched: 1
            }
        );
        assert_relative_eq!(science.orders[&2].intensity[1], 1.0);
        assert_relative_eq!(science.orders[&2].intensity[2], 0.8);
    }

    #[test]
    fn model_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let science = dir.path().join("hd1234.json");
        let path = model_path_for(&science);
        assert_eq!(path.file_name().unwrap(), "hd1234_tel.csv");

        let points = vec![ModelPoint {
            order: 3,
            pixel: 42,
            wavelength: 6870.123,
            class: TelluricClass::Composite,
            intensity: None,
        }];
        write_model(&path, &points).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "order px wavelength class intensity\n03 0042 6870.12 c -1\n");
    }

    #[test]
    fn science_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("science.json");
        std::fs::write(
            &path,
            r#"{ "orders": { "4": { "wavelength": [1.0], "intensity": [0.7] } } }"#,
        )
        .unwrap();
        let science = ScienceSpectrum::load(&path).unwrap();
        assert_eq!(science.orders[&4].intensity, vec![0.7]);

        science.save(&path).unwrap();
        assert_eq!(ScienceSpectrum::load(&path).unwrap(), science);
    }
}
