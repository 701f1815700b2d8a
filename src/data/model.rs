use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use crate::error::TelluricError;

/// PCC value a shard starts with before correlations are attached.
/// No physical correlation coefficient is this low.
pub const NULL_PCC: f64 = -10.0;

// ---------------------------------------------------------------------------
// TelluricClass – the chemical driver of a cluster
// ---------------------------------------------------------------------------

/// Which calibrator a telluric pixel responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TelluricClass {
    /// Correlates with the water-vapour calibrator.
    Water,
    /// Correlates with airmass.
    Airmass,
    /// Claimed by both classes without a clear winner.
    Composite,
}

impl TelluricClass {
    pub const ALL: [TelluricClass; 3] = [
        TelluricClass::Water,
        TelluricClass::Airmass,
        TelluricClass::Composite,
    ];

    /// Single-letter code used in the telluric database.
    pub fn code(self) -> &'static str {
        match self {
            TelluricClass::Water => "w",
            TelluricClass::Airmass => "z",
            TelluricClass::Composite => "c",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "w" => Some(TelluricClass::Water),
            "z" => Some(TelluricClass::Airmass),
            "c" => Some(TelluricClass::Composite),
            _ => None,
        }
    }
}

impl fmt::Display for TelluricClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelluricClass::Water => write!(f, "water"),
            TelluricClass::Airmass => write!(f, "airmass"),
            TelluricClass::Composite => write!(f, "composite"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cluster – an inclusive pixel range local to a shard
// ---------------------------------------------------------------------------

/// A contiguous run of telluric pixels, `start..=end` in shard-local indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cluster {
    pub start: usize,
    pub end: usize,
}

impl Cluster {
    pub fn new(start: usize, end: usize) -> Self {
        Cluster { start, end }
    }

    /// Number of pixels covered.
    pub fn width(&self) -> usize {
        self.end - self.start + 1
    }

    /// Two ranges are disjoint only if one ends strictly before the other begins.
    pub fn overlaps(&self, other: &Cluster) -> bool {
        !(self.end < other.start || other.end < self.start)
    }

    /// Whether `other` lies entirely inside this cluster.
    pub fn contains(&self, other: &Cluster) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn pixels(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// ShardAddr – identity of a shard
// ---------------------------------------------------------------------------

/// `(order, lo_pixel, hi_pixel)`; the pixel range is half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardAddr {
    pub order: u32,
    pub lo_pixel: usize,
    pub hi_pixel: usize,
}

impl ShardAddr {
    pub fn new(order: u32, lo_pixel: usize, hi_pixel: usize) -> Self {
        ShardAddr {
            order,
            lo_pixel,
            hi_pixel,
        }
    }

    /// Number of pixels in the shard.
    pub fn len(&self) -> usize {
        self.hi_pixel.saturating_sub(self.lo_pixel)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ShardAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.order, self.lo_pixel, self.hi_pixel)
    }
}

// ---------------------------------------------------------------------------
// ExposureSpectrum – one reference exposure inside a shard
// ---------------------------------------------------------------------------

/// Per-exposure arrays restricted to the shard's pixel range.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureSpectrum {
    /// Wavelength axis in Ångström.
    pub wavelength: Vec<f64>,
    /// Linear intensity.
    pub intensity: Vec<f64>,
    /// Log intensity (normalized upstream).
    pub log_intensity: Vec<f64>,
    pub airmass: f64,
}

impl ExposureSpectrum {
    /// Build from linear intensities, taking the natural log for the log axis.
    pub fn from_linear(wavelength: Vec<f64>, intensity: Vec<f64>, airmass: f64) -> Self {
        let log_intensity = intensity.iter().map(|v| v.ln()).collect();
        ExposureSpectrum {
            wavelength,
            intensity,
            log_intensity,
            airmass,
        }
    }
}

// ---------------------------------------------------------------------------
// LinearFit – per-pixel regression result
// ---------------------------------------------------------------------------

/// `log(depth) = slope * calibrator_value + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Linear intensity predicted for a calibrator value.
    pub fn intensity(&self, value: f64) -> f64 {
        (self.slope * value + self.intercept).exp()
    }
}

// ---------------------------------------------------------------------------
// CalibratorBundle – regression inputs shared by every shard
// ---------------------------------------------------------------------------

/// Calibrator series aligned index-for-index with `exposure_order`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibratorBundle {
    pub water_values: Vec<f64>,
    pub airmass_values: Vec<f64>,
    pub exposure_order: Vec<String>,
}

impl CalibratorBundle {
    pub fn len(&self) -> usize {
        self.exposure_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposure_order.is_empty()
    }

    /// The series a class regresses against. Composite pixels have none.
    pub fn series(&self, class: TelluricClass) -> Option<&[f64]> {
        match class {
            TelluricClass::Water => Some(&self.water_values),
            TelluricClass::Airmass => Some(&self.airmass_values),
            TelluricClass::Composite => None,
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.water_values.len() == self.exposure_order.len()
            && self.airmass_values.len() == self.exposure_order.len()
    }
}

// ---------------------------------------------------------------------------
// Shard – the unit of independent processing
// ---------------------------------------------------------------------------

/// A window of one spectral order together with everything derived from it.
#[derive(Debug, Clone)]
pub struct Shard {
    pub addr: ShardAddr,
    /// Exposure identifier → arrays. Ordered so coadding is deterministic.
    pub spectra: BTreeMap<String, ExposureSpectrum>,
    pub water_pcc: Vec<f64>,
    pub airmass_pcc: Vec<f64>,
    pub water_flag: Vec<bool>,
    pub airmass_flag: Vec<bool>,
    pub water_clusters: Vec<Cluster>,
    pub airmass_clusters: Vec<Cluster>,
    pub composite_clusters: Vec<Cluster>,
    /// Local pixel → fit against the water calibrator.
    pub water_coeffs: BTreeMap<usize, LinearFit>,
    /// Local pixel → fit against airmass.
    pub airmass_coeffs: BTreeMap<usize, LinearFit>,
}

impl Shard {
    /// An empty shard: null PCCs, no flags, no clusters.
    pub fn new(addr: ShardAddr) -> Self {
        let n = addr.len();
        Shard {
            addr,
            spectra: BTreeMap::new(),
            water_pcc: vec![NULL_PCC; n],
            airmass_pcc: vec![NULL_PCC; n],
            water_flag: vec![false; n],
            airmass_flag: vec![false; n],
            water_clusters: Vec::new(),
            airmass_clusters: Vec::new(),
            composite_clusters: Vec::new(),
            water_coeffs: BTreeMap::new(),
            airmass_coeffs: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addr.is_empty()
    }

    pub fn clusters(&self, class: TelluricClass) -> &[Cluster] {
        match class {
            TelluricClass::Water => &self.water_clusters,
            TelluricClass::Airmass => &self.airmass_clusters,
            TelluricClass::Composite => &self.composite_clusters,
        }
    }

    pub fn clusters_mut(&mut self, class: TelluricClass) -> &mut Vec<Cluster> {
        match class {
            TelluricClass::Water => &mut self.water_clusters,
            TelluricClass::Airmass => &mut self.airmass_clusters,
            TelluricClass::Composite => &mut self.composite_clusters,
        }
    }

    pub fn pcc(&self, class: TelluricClass) -> Option<&[f64]> {
        match class {
            TelluricClass::Water => Some(&self.water_pcc),
            TelluricClass::Airmass => Some(&self.airmass_pcc),
            TelluricClass::Composite => None,
        }
    }

    pub fn flags(&self, class: TelluricClass) -> Option<&[bool]> {
        match class {
            TelluricClass::Water => Some(&self.water_flag),
            TelluricClass::Airmass => Some(&self.airmass_flag),
            TelluricClass::Composite => None,
        }
    }

    pub fn coeffs(&self, class: TelluricClass) -> Option<&BTreeMap<usize, LinearFit>> {
        match class {
            TelluricClass::Water => Some(&self.water_coeffs),
            TelluricClass::Airmass => Some(&self.airmass_coeffs),
            TelluricClass::Composite => None,
        }
    }

    /// Drop every cluster and coefficient, leaving inputs untouched.
    pub fn clear_derived(&mut self) {
        self.water_clusters.clear();
        self.airmass_clusters.clear();
        self.composite_clusters.clear();
        self.water_coeffs.clear();
        self.airmass_coeffs.clear();
    }

    /// Reject shards that cannot enter the core.
    pub fn validate(&self, bundle: &CalibratorBundle) -> Result<(), TelluricError> {
        let fail = |reason: String| TelluricError::Precondition {
            addr: self.addr,
            reason,
        };
        let n = self.len();

        if n == 0 {
            return Err(fail("empty pixel range".into()));
        }
        if self.spectra.is_empty() {
            return Err(fail("no exposures".into()));
        }
        for (name, len) in [
            ("water PCC", self.water_pcc.len()),
            ("airmass PCC", self.airmass_pcc.len()),
            ("water flag", self.water_flag.len()),
            ("airmass flag", self.airmass_flag.len()),
        ] {
            if len != n {
                return Err(fail(format!("{name} array has {len} entries, expected {n}")));
            }
        }
        if let Some(i) = self
            .water_pcc
            .iter()
            .chain(&self.airmass_pcc)
            .position(|v| !v.is_finite())
        {
            return Err(fail(format!("non-finite PCC at index {}", i % n)));
        }
        for (id, sp) in &self.spectra {
            if sp.wavelength.len() != n || sp.intensity.len() != n || sp.log_intensity.len() != n {
                return Err(fail(format!("exposure '{id}' arrays do not span {n} pixels")));
            }
        }
        if !bundle.is_aligned() {
            return Err(fail(format!(
                "calibrator bundle misaligned: {} water values, {} airmass values, {} exposures",
                bundle.water_values.len(),
                bundle.airmass_values.len(),
                bundle.exposure_order.len()
            )));
        }
        if let Some(missing) = bundle
            .exposure_order
            .iter()
            .find(|id| !self.spectra.contains_key(*id))
        {
            return Err(fail(format!("exposure '{missing}' missing from shard")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_with_exposure(n: usize) -> (Shard, CalibratorBundle) {
        let mut shard = Shard::new(ShardAddr::new(3, 100, 100 + n));
        shard.spectra.insert(
            "a".into(),
            ExposureSpectrum::from_linear(vec![5000.0; n], vec![1.0; n], 1.2),
        );
        let bundle = CalibratorBundle {
            water_values: vec![0.5],
            airmass_values: vec![1.2],
            exposure_order: vec!["a".into()],
        };
        (shard, bundle)
    }

    #[test]
    fn overlap_is_inclusive() {
        let a = Cluster::new(2, 5);
        assert!(a.overlaps(&Cluster::new(5, 9)));
        assert!(a.overlaps(&Cluster::new(0, 2)));
        assert!(a.overlaps(&Cluster::new(3, 4)));
        assert!(!a.overlaps(&Cluster::new(6, 9)));
        assert!(!Cluster::new(6, 9).overlaps(&a));
    }

    #[test]
    fn containment() {
        let outer = Cluster::new(10, 20);
        assert!(outer.contains(&Cluster::new(12, 15)));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&Cluster::new(9, 15)));
        assert_eq!(outer.width(), 11);
    }

    #[test]
    fn new_shard_is_null() {
        let shard = Shard::new(ShardAddr::new(1, 10, 20));
        assert_eq!(shard.len(), 10);
        assert!(shard.water_pcc.iter().all(|&p| p == NULL_PCC));
        assert!(shard.airmass_flag.iter().all(|f| !f));
    }

    #[test]
    fn class_codes() {
        for class in TelluricClass::ALL {
            assert_eq!(TelluricClass::from_code(class.code()), Some(class));
        }
        assert_eq!(TelluricClass::from_code("x"), None);
    }

    #[test]
    fn validate_accepts_consistent_shard() {
        let (shard, bundle) = shard_with_exposure(8);
        assert!(shard.validate(&bundle).is_ok());
    }

    #[test]
    fn validate_rejects_missing_exposure() {
        let (shard, mut bundle) = shard_with_exposure(8);
        bundle.exposure_order = vec!["b".into()];
        let err = shard.validate(&bundle).unwrap_err();
        assert!(matches!(err, TelluricError::Precondition { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn validate_rejects_short_flags() {
        let (mut shard, bundle) = shard_with_exposure(8);
        shard.water_flag.pop();
        assert!(shard.validate(&bundle).is_err());
    }

    #[test]
    fn validate_rejects_nan_pcc() {
        let (mut shard, bundle) = shard_with_exposure(8);
        shard.airmass_pcc[3] = f64::NAN;
        assert!(shard.validate(&bundle).is_err());
    }
}
