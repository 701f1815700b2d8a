use crate::data::model::Shard;

/// Per-pixel average of every exposure in a shard.
#[derive(Debug, Clone, PartialEq)]
pub struct CoaddedSpectrum {
    pub wavelength: Vec<f64>,
    pub log_intensity: Vec<f64>,
}

impl CoaddedSpectrum {
    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }
}

/// Average wavelength and log intensity across the shard's exposures.
///
/// A shard without exposures coadds to zeros; validation keeps such shards
/// out of the pipeline.
pub fn coadd(shard: &Shard) -> CoaddedSpectrum {
    let n = shard.len();
    let mut wavelength = vec![0.0; n];
    let mut log_intensity = vec![0.0; n];

    for sp in shard.spectra.values() {
        for (acc, v) in wavelength.iter_mut().zip(&sp.wavelength) {
            *acc += v;
        }
        for (acc, v) in log_intensity.iter_mut().zip(&sp.log_intensity) {
            *acc += v;
        }
    }

    let count = shard.spectra.len();
    if count > 0 {
        let count = count as f64;
        wavelength.iter_mut().for_each(|v| *v /= count);
        log_intensity.iter_mut().for_each(|v| *v /= count);
    }

    CoaddedSpectrum {
        wavelength,
        log_intensity,
    }
}
