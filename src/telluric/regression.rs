use crate::data::model::{CalibratorBundle, LinearFit, Shard, TelluricClass};
use crate::error::TelluricError;

/// Ordinary least squares fit of `y = slope * x + intercept`.
///
/// Returns a description of the problem when the inputs cannot determine a
/// line: fewer than two points, a non-finite value, or a constant `x`.
pub fn fit_linear(x: &[f64], y: &[f64]) -> Result<LinearFit, String> {
    if x.len() != y.len() {
        return Err(format!("{} x values but {} y values", x.len(), y.len()));
    }
    if x.len() < 2 {
        return Err(format!("{} point(s), need at least 2", x.len()));
    }
    if let Some(v) = x.iter().chain(y).find(|v| !v.is_finite()) {
        return Err(format!("non-finite input {v}"));
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (mut sxx, mut sxy) = (0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        sxx += dx * dx;
        sxy += dx * (yi - mean_y);
    }

    let scale = x.iter().map(|v| v * v).sum::<f64>().max(f64::MIN_POSITIVE);
    if sxx <= scale * f64::EPSILON {
        return Err("constant calibrator series".into());
    }

    let slope = sxy / sxx;
    Ok(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

/// Fit every water and airmass cluster pixel against its calibrator series.
///
/// Depths are collected by walking `bundle.exposure_order` so they line up
/// with the calibrator values. Pixels that cannot be fitted get no
/// coefficients and are returned as `DegenerateFit` errors.
pub fn fit_shard(shard: &mut Shard, bundle: &CalibratorBundle) -> Vec<TelluricError> {
    let mut errors = Vec::new();

    for class in [TelluricClass::Water, TelluricClass::Airmass] {
        let Some(series) = bundle.series(class) else {
            continue;
        };

        let mut fits = Vec::new();
        for cluster in shard.clusters(class) {
            for px in cluster.pixels() {
                let depths: Vec<f64> = bundle
                    .exposure_order
                    .iter()
                    .filter_map(|id| shard.spectra.get(id))
                    .map(|sp| sp.log_intensity[px])
                    .collect();

                match fit_linear(series, &depths) {
                    Ok(fit) => fits.push((px, fit)),
                    Err(reason) => {
                        let err = TelluricError::DegenerateFit {
                            addr: shard.addr,
                            pixel: px,
                            class,
                            reason,
                        };
                        log::warn!("{err}");
                        errors.push(err);
                    }
                }
            }
        }

        let coeffs = match class {
            TelluricClass::Water => &mut shard.water_coeffs,
            _ => &mut shard.airmass_coeffs,
        };
        coeffs.extend(fits);
    }

    errors
}
