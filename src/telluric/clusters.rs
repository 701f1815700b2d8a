//! Cluster formation, noise rejection, expansion and same-class merging.
//!
//! Every pass reads a snapshot of its input and builds a new list; no list
//! is edited while it is being walked.

use crate::data::model::Cluster;

use super::coadd::CoaddedSpectrum;

/// Narrowest cluster that can be a resolved absorption line.
pub const MIN_CLUSTER_WIDTH: usize = 3;

// ---------------------------------------------------------------------------
// Formation
// ---------------------------------------------------------------------------

/// Maximal runs of `true` as inclusive pixel ranges, in pixel order.
pub fn form_clusters(flags: &[bool]) -> Vec<Cluster> {
    let mut clusters = Vec::new();
    let mut run_start = None;

    for (i, &flag) in flags.iter().enumerate() {
        match (flag, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                clusters.push(Cluster::new(start, i - 1));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        clusters.push(Cluster::new(start, flags.len() - 1));
    }
    clusters
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Drop 1 and 2 pixel clusters.
pub fn remove_narrow_clusters(clusters: &[Cluster]) -> Vec<Cluster> {
    clusters
        .iter()
        .filter(|c| c.width() >= MIN_CLUSTER_WIDTH)
        .copied()
        .collect()
}

/// Gradient-based trough test on a run of log intensities.
///
/// Differences are smoothed pairwise (`blocked[i] = delta[i] + delta[i+1]`);
/// the run is a trough when a blocked value falls below `-threshold` and a
/// later one rises above `+threshold`.
pub fn is_trough(log_intensity: &[f64], threshold: f64) -> bool {
    let deltas: Vec<f64> = log_intensity.windows(2).map(|w| w[1] - w[0]).collect();

    let mut was_below = false;
    for blocked in deltas.windows(2).map(|d| d[0] + d[1]) {
        if blocked < -threshold {
            was_below = true;
        } else if blocked > threshold && was_below {
            return true;
        }
    }
    false
}

/// Keep clusters whose coadded profile, with one pixel of context on each
/// side, is a trough. Context is clamped at the shard edges.
pub fn remove_non_trough_clusters(
    clusters: &[Cluster],
    coadded: &CoaddedSpectrum,
    threshold: f64,
) -> Vec<Cluster> {
    let last = coadded.len().saturating_sub(1);
    clusters
        .iter()
        .filter(|c| {
            let lo = c.start.saturating_sub(1);
            let hi = (c.end + 1).min(last);
            let keep = is_trough(&coadded.log_intensity[lo..=hi], threshold);
            if !keep {
                log::debug!("cluster {c} rejected: not a trough");
            }
            keep
        })
        .copied()
        .collect()
}

/// Keep clusters that have a same-class neighbour within `max_distance`
/// Ångström on either side.
///
/// Neighbours are taken from the input snapshot, so every cluster is judged
/// against the full pre-pass set.
pub fn remove_isolated_clusters(
    clusters: &[Cluster],
    wavelength: &[f64],
    max_distance: f64,
) -> Vec<Cluster> {
    let gap = |left: &Cluster, right: &Cluster| wavelength[right.start] - wavelength[left.end];

    clusters
        .iter()
        .enumerate()
        .filter(|&(i, c)| {
            let near_left = i > 0 && gap(&clusters[i - 1], c) <= max_distance;
            let near_right = i + 1 < clusters.len() && gap(c, &clusters[i + 1]) <= max_distance;
            if !(near_left || near_right) {
                log::debug!("cluster {c} rejected: isolated");
            }
            near_left || near_right
        })
        .map(|(_, c)| *c)
        .collect()
}

// ---------------------------------------------------------------------------
// Expansion and merging
// ---------------------------------------------------------------------------

/// Clusters after expansion, plus the originals whose growth hit a shard edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub clusters: Vec<Cluster>,
    pub clamped: Vec<Cluster>,
}

/// Grow every cluster by one pixel per side within `0..n_pixels`.
pub fn expand_clusters(clusters: &[Cluster], n_pixels: usize) -> Expansion {
    let last = n_pixels.saturating_sub(1);
    let mut expansion = Expansion::default();

    for c in clusters {
        if c.start == 0 || c.end >= last {
            expansion.clamped.push(*c);
        }
        expansion
            .clusters
            .push(Cluster::new(c.start.saturating_sub(1), (c.end + 1).min(last)));
    }
    expansion
}

/// Merge overlapping neighbours of one class. Input must be sorted by start.
pub fn merge_same_class(clusters: &[Cluster]) -> Vec<Cluster> {
    let mut merged: Vec<Cluster> = Vec::with_capacity(clusters.len());
    for c in clusters {
        match merged.last_mut() {
            Some(prev) if c.start <= prev.end => prev.end = prev.end.max(c.end),
            _ => merged.push(*c),
        }
    }
    merged
}
