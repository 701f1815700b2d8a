/// Telluric core: cluster identification, resolution and regression.
///
/// Per shard, strictly in this order:
/// ```text
///   flags ──► form ──► width / trough / isolation filters ──► expand
///                                                              │
///   coefficients ◄── regression ◄── diff-class resolve ◄── same-class merge
/// ```
/// Shards never share mutable state, so [`calibrate_all`] may fan them out
/// over the rayon pool.

pub mod clusters;
pub mod coadd;
pub mod model;
pub mod regression;
pub mod resolve;

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::config::Config;
use crate::data::model::{CalibratorBundle, Shard, ShardAddr, TelluricClass};
use crate::error::TelluricError;

// ---------------------------------------------------------------------------
// ShardReport – summary of one completed shard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ShardReport {
    pub addr: ShardAddr,
    pub water_clusters: usize,
    pub airmass_clusters: usize,
    pub composite_clusters: usize,
    pub fitted_pixels: usize,
    /// Recoverable problems met along the way.
    pub warnings: Vec<TelluricError>,
}

pub type ShardOutcome = (ShardAddr, Result<ShardReport, TelluricError>);

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Form, filter, expand and merge the clusters of both classes.
///
/// Returns `OutOfRangeCluster` warnings for clusters clamped by expansion.
pub fn identify_clusters(shard: &mut Shard, config: &Config) -> Vec<TelluricError> {
    let coadded = coadd::coadd(shard);
    let n = shard.len();
    let mut warnings = Vec::new();

    for class in [TelluricClass::Water, TelluricClass::Airmass] {
        let flags = shard.flags(class).unwrap_or(&[]);

        let found = clusters::form_clusters(flags);
        let wide = clusters::remove_narrow_clusters(&found);
        let troughs =
            clusters::remove_non_trough_clusters(&wide, &coadded, config.gradient_threshold);
        let grouped = clusters::remove_isolated_clusters(
            &troughs,
            &coadded.wavelength,
            config.isolation_distance_angstrom,
        );
        log::debug!(
            "{}: {class} clusters {} formed, {} wide, {} troughs, {} grouped",
            shard.addr,
            found.len(),
            wide.len(),
            troughs.len(),
            grouped.len()
        );

        let expansion = clusters::expand_clusters(&grouped, n);
        for c in &expansion.clamped {
            let warning = TelluricError::OutOfRangeCluster {
                addr: shard.addr,
                class,
                start: c.start,
                end: c.end,
            };
            log::warn!("{warning}");
            warnings.push(warning);
        }

        *shard.clusters_mut(class) = clusters::merge_same_class(&expansion.clusters);
    }

    warnings
}

/// Run the full pipeline on one shard.
///
/// On a fatal error the shard's derived state is cleared so nothing
/// half-resolved can reach persistence.
pub fn calibrate_shard(
    shard: &mut Shard,
    bundle: &CalibratorBundle,
    config: &Config,
) -> Result<ShardReport, TelluricError> {
    shard.validate(bundle)?;
    shard.clear_derived();

    let mut warnings = identify_clusters(shard, config);

    if let Err(e) = resolve::resolve_diff_class_overlaps(shard) {
        shard.clear_derived();
        return Err(e);
    }

    warnings.extend(regression::fit_shard(shard, bundle));
    debug_assert!(warnings.iter().all(|w| !w.is_fatal()));

    Ok(ShardReport {
        addr: shard.addr,
        water_clusters: shard.water_clusters.len(),
        airmass_clusters: shard.airmass_clusters.len(),
        composite_clusters: shard.composite_clusters.len(),
        fitted_pixels: shard.water_coeffs.len() + shard.airmass_coeffs.len(),
        warnings,
    })
}

/// Calibrate every shard, one outcome per shard in input order.
///
/// `cancel` is only consulted before a shard starts; a shard in progress
/// always runs to completion.
pub fn calibrate_all(
    shards: &mut [Shard],
    bundle: &CalibratorBundle,
    config: &Config,
    cancel: Option<&AtomicBool>,
) -> Vec<ShardOutcome> {
    let run = |shard: &mut Shard| -> ShardOutcome {
        let addr = shard.addr;
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return (addr, Err(TelluricError::Cancelled { addr }));
        }
        let outcome = calibrate_shard(shard, bundle, config);
        if let Err(e) = &outcome {
            log::error!("{e}");
        }
        (addr, outcome)
    };

    let outcomes: Vec<ShardOutcome> = if config.parallel {
        shards.par_iter_mut().map(|s| run(s)).collect()
    } else {
        shards.iter_mut().map(|s| run(s)).collect()
    };

    let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
    let warnings: usize = outcomes
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok())
        .map(|r| r.warnings.len())
        .sum();
    log::info!(
        "calibrated {} shards: {} failed, {} warnings",
        outcomes.len(),
        failed,
        warnings
    );
    outcomes
}
