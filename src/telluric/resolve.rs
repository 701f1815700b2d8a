//! Resolution of water/airmass cluster overlaps.
//!
//! When a water cluster and an airmass cluster claim the same pixels, the
//! shared region is split using the per-pixel PCCs of both classes:
//!
//! ```text
//!   L cluster [ overlap region ] R cluster
//!   LLLLLLLLLL[LLLLRRLRLLRLRRRR]RRRRRRRRR     before shrinking
//!   LLLLLLLLLLLLLL[RRLRLLRL]RRRRRRRRRRRRR     after shrinking
//! ```
//!
//! Pixels at either edge of the overlap that clearly belong to one side are
//! ceded to it. What is left is handed wholesale to a side holding at least
//! [`MAJORITY_FRACTION`] of it, or becomes a composite cluster.

use crate::data::model::{Cluster, Shard, ShardAddr, TelluricClass};
use crate::error::TelluricError;

/// Share of the residual overlap a side needs to take all of it.
pub const MAJORITY_FRACTION: f64 = 0.75;

/// First `(i, j)` with `a[i]` overlapping `b[j]`.
pub fn find_overlap(a: &[Cluster], b: &[Cluster]) -> Option<(usize, usize)> {
    a.iter().enumerate().find_map(|(i, ca)| {
        b.iter()
            .position(|cb| ca.overlaps(cb))
            .map(|j| (i, j))
    })
}

/// Outcome of splitting one partially overlapping pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    pub left: Cluster,
    pub right: Cluster,
    pub composite: Option<Cluster>,
}

/// Split the overlap between `left` and `right`, where `left.start < right.start`
/// and neither contains the other.
pub fn split_overlap(
    mut left: Cluster,
    mut right: Cluster,
    left_pcc: &[f64],
    right_pcc: &[f64],
) -> Split {
    // Cede pixels at the left edge of the overlap to L...
    while left.end >= right.start && left_pcc[right.start] > right_pcc[right.start] {
        right.start += 1;
    }
    // ...and pixels at the right edge to R.
    while left.end >= right.start && right_pcc[left.end] > left_pcc[left.end] {
        left.end -= 1;
    }

    if left.end < right.start {
        return Split {
            left,
            right,
            composite: None,
        };
    }

    let residual = Cluster::new(right.start, left.end);
    let left_count = residual
        .pixels()
        .filter(|&px| left_pcc[px] >= right_pcc[px])
        .count();
    let total = residual.width();
    let right_count = total - left_count;

    let mut composite = None;
    if left_count as f64 / total as f64 >= MAJORITY_FRACTION {
        right.start = residual.end + 1;
    } else if right_count as f64 / total as f64 >= MAJORITY_FRACTION {
        left.end = residual.start - 1;
    } else {
        left.end = residual.start - 1;
        right.start = residual.end + 1;
        composite = Some(residual);
    }

    Split {
        left,
        right,
        composite,
    }
}

/// Eliminate every water/airmass overlap in the shard, appending composite
/// clusters as needed, then verify the three lists are mutually disjoint.
///
/// Runs to a fixed point; the cluster lists are only consistent again once
/// this returns.
pub fn resolve_diff_class_overlaps(shard: &mut Shard) -> Result<(), TelluricError> {
    while let Some((wi, zi)) = find_overlap(&shard.water_clusters, &shard.airmass_clusters) {
        let water = shard.water_clusters[wi];
        let airmass = shard.airmass_clusters[zi];

        if airmass.contains(&water) {
            log::debug!("{}: water {water} inside airmass {airmass}, dropped", shard.addr);
            shard.water_clusters.remove(wi);
            continue;
        }
        if water.contains(&airmass) {
            log::debug!("{}: airmass {airmass} inside water {water}, dropped", shard.addr);
            shard.airmass_clusters.remove(zi);
            continue;
        }

        let water_left = water.start < airmass.start;
        let split = if water_left {
            split_overlap(water, airmass, &shard.water_pcc, &shard.airmass_pcc)
        } else {
            split_overlap(airmass, water, &shard.airmass_pcc, &shard.water_pcc)
        };
        let (new_water, new_airmass) = if water_left {
            (split.left, split.right)
        } else {
            (split.right, split.left)
        };

        log::debug!(
            "{}: split water {water} / airmass {airmass} into {new_water} / {new_airmass}",
            shard.addr
        );
        shard.water_clusters[wi] = new_water;
        shard.airmass_clusters[zi] = new_airmass;
        if let Some(composite) = split.composite {
            log::debug!("{}: composite cluster {composite}", shard.addr);
            shard.composite_clusters.push(composite);
        }
    }

    shard.composite_clusters.sort();
    check_disjoint(shard)
}

/// Fail with `InvariantViolation` if any water, airmass or composite
/// clusters overlap across classes.
pub fn check_disjoint(shard: &Shard) -> Result<(), TelluricError> {
    use TelluricClass::*;

    for (first, second) in [(Water, Airmass), (Water, Composite), (Airmass, Composite)] {
        let a = shard.clusters(first);
        let b = shard.clusters(second);
        if let Some((i, j)) = find_overlap(a, b) {
            return Err(violation(shard.addr, first, a[i], second, b[j]));
        }
    }
    Ok(())
}

fn violation(
    addr: ShardAddr,
    first: TelluricClass,
    a: Cluster,
    second: TelluricClass,
    b: Cluster,
) -> TelluricError {
    TelluricError::InvariantViolation {
        addr,
        first,
        second,
        first_range: a.to_string(),
        second_range: b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(n: usize, water: &[(usize, usize)], airmass: &[(usize, usize)]) -> Shard {
        let mut shard = Shard::new(ShardAddr::new(5, 0, n));
        shard.water_pcc = vec![0.5; n];
        shard.airmass_pcc = vec![0.5; n];
        shard.water_clusters = water.iter().map(|&(s, e)| Cluster::new(s, e)).collect();
        shard.airmass_clusters = airmass.iter().map(|&(s, e)| Cluster::new(s, e)).collect();
        shard
    }

    /// Set PCCs over `start..` so 'L' favours water and 'R' favours airmass.
    fn favour(shard: &mut Shard, start: usize, pattern: &str) {
        for (i, ch) in pattern.chars().enumerate() {
            let (w, z) = if ch == 'L' { (0.9, 0.6) } else { (0.6, 0.9) };
            shard.water_pcc[start + i] = w;
            shard.airmass_pcc[start + i] = z;
        }
    }

    fn all_disjoint(shard: &Shard) -> bool {
        let all: Vec<Cluster> = TelluricClass::ALL
            .iter()
            .flat_map(|&c| shard.clusters(c).to_vec())
            .collect();
        all.iter()
            .enumerate()
            .all(|(i, a)| all[i + 1..].iter().all(|b| !a.overlaps(b)))
    }

    #[test]
    fn contained_cluster_is_dropped() {
        let mut s = shard(30, &[(10, 20)], &[(12, 15)]);
        resolve_diff_class_overlaps(&mut s).unwrap();
        assert_eq!(s.water_clusters, vec![Cluster::new(10, 20)]);
        assert!(s.airmass_clusters.is_empty());
        assert!(s.composite_clusters.is_empty());
    }

    #[test]
    fn identical_ranges_keep_airmass() {
        let mut s = shard(30, &[(10, 20)], &[(10, 20)]);
        resolve_diff_class_overlaps(&mut s).unwrap();
        assert!(s.water_clusters.is_empty());
        assert_eq!(s.airmass_clusters, vec![Cluster::new(10, 20)]);
    }

    #[test]
    fn clear_edges_are_ceded() {
        // water 0..=9, airmass 6..=15; overlap 6..=9 splits cleanly LLRR
        let mut s = shard(20, &[(0, 9)], &[(6, 15)]);
        favour(&mut s, 6, "LLRR");
        resolve_diff_class_overlaps(&mut s).unwrap();
        assert_eq!(s.water_clusters, vec![Cluster::new(0, 7)]);
        assert_eq!(s.airmass_clusters, vec![Cluster::new(8, 15)]);
        assert!(s.composite_clusters.is_empty());
    }

    #[test]
    fn majority_residual_goes_to_left() {
        // overlap 10..=15 with residual RLLLLL: 5 of 6 favour L
        let mut s = shard(30, &[(4, 15)], &[(10, 22)]);
        favour(&mut s, 10, "RLLLLL");
        resolve_diff_class_overlaps(&mut s).unwrap();
        assert_eq!(s.water_clusters, vec![Cluster::new(4, 15)]);
        assert_eq!(s.airmass_clusters, vec![Cluster::new(16, 22)]);
        assert!(s.composite_clusters.is_empty());
    }

    #[test]
    fn majority_residual_goes_to_right() {
        // airmass on the left this time; residual RRRRRL favours R (water)
        let mut s = shard(30, &[(10, 22)], &[(4, 15)]);
        for (i, ch) in "RRRRRL".chars().enumerate() {
            let (z, w) = if ch == 'L' { (0.9, 0.6) } else { (0.6, 0.9) };
            s.airmass_pcc[10 + i] = z;
            s.water_pcc[10 + i] = w;
        }
        resolve_diff_class_overlaps(&mut s).unwrap();
        assert_eq!(s.airmass_clusters, vec![Cluster::new(4, 9)]);
        assert_eq!(s.water_clusters, vec![Cluster::new(10, 22)]);
        assert!(s.composite_clusters.is_empty());
    }

    #[test]
    fn even_split_creates_composite() {
        // overlap 10..=13 with residual RRLL
        let mut s = shard(30, &[(4, 13)], &[(10, 20)]);
        favour(&mut s, 10, "RRLL");
        resolve_diff_class_overlaps(&mut s).unwrap();
        assert_eq!(s.composite_clusters, vec![Cluster::new(10, 13)]);
        assert_eq!(s.water_clusters, vec![Cluster::new(4, 9)]);
        assert_eq!(s.airmass_clusters, vec![Cluster::new(14, 20)]);
    }

    #[test]
    fn resolves_several_overlaps_to_disjoint_lists() {
        let mut s = shard(60, &[(2, 10), (20, 30), (40, 50)], &[(8, 22), (28, 45)]);
        favour(&mut s, 8, "RLR");
        favour(&mut s, 20, "LRR");
        favour(&mut s, 28, "RRL");
        favour(&mut s, 40, "LRLRLR");
        resolve_diff_class_overlaps(&mut s).unwrap();
        assert!(all_disjoint(&s));
        assert!(find_overlap(&s.water_clusters, &s.airmass_clusters).is_none());
    }

    #[test]
    fn checker_reports_composite_overlap() {
        let mut s = shard(30, &[(0, 5)], &[(10, 15)]);
        s.composite_clusters.push(Cluster::new(14, 18));
        let err = check_disjoint(&s).unwrap_err();
        match err {
            TelluricError::InvariantViolation { first, second, .. } => {
                assert_eq!(first, TelluricClass::Airmass);
                assert_eq!(second, TelluricClass::Composite);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
