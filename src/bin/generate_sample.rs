//! Write a synthetic reference dataset: several exposures of a telluric
//! absorption spectrum at varying airmass and water column, split into shards
//! with per-pixel PCCs and significance flags.
//!
//! Produces `sample_dataset.json` and the same data in long format as
//! `sample_dataset.parquet`.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    BooleanBuilder, Float64Array, Float64Builder, Int64Array, ListBuilder, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::json;

const ORDERS: [u32; 2] = [10, 11];
const PIXELS_PER_ORDER: usize = 600;
const SHARD_WIDTH: usize = 200;
const DISPERSION: f64 = 0.05;
const N_EXPOSURES: usize = 8;
const NOISE: f64 = 0.002;
const PCC_THRESHOLD: f64 = 0.9;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Optical depth per pixel for a set of `(centre, sigma, depth)` lines.
fn optical_depth(n: usize, lines: &[(f64, f64, f64)]) -> Vec<f64> {
    (0..n)
        .map(|px| {
            lines
                .iter()
                .map(|&(mu, sigma, depth)| gaussian(px as f64, mu, sigma, depth))
                .sum()
        })
        .collect()
}

fn random_lines(rng: &mut SimpleRng, count: usize, n: usize) -> Vec<(f64, f64, f64)> {
    (0..count)
        .map(|_| {
            let centre = 10.0 + rng.next_f64() * (n as f64 - 20.0);
            let sigma = 1.2 + rng.next_f64() * 1.5;
            let depth = 0.2 + rng.next_f64() * 0.6;
            (centre, sigma, depth)
        })
        .collect()
}

/// Pearson correlation of `x` and `y`; `-10.0` when undefined.
fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    if denom > 0.0 { sxy / denom } else { -10.0 }
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

struct Exposure {
    id: String,
    airmass: f64,
    water: f64,
}

/// One exposure's slice of one shard.
struct ShardRow {
    /// Index into the shard stats.
    shard: usize,
    exposure: usize,
    wavelength: Vec<f64>,
    intensity: Vec<f64>,
}

struct ShardStats {
    order: u32,
    lo: usize,
    hi: usize,
    water_pcc: Vec<f64>,
    airmass_pcc: Vec<f64>,
    water_flag: Vec<bool>,
    airmass_flag: Vec<bool>,
}

struct SampleDataset {
    exposures: Vec<Exposure>,
    rows: Vec<ShardRow>,
    stats: Vec<ShardStats>,
}

fn main() -> Result<()> {
    let SampleDataset {
        exposures,
        rows,
        stats,
    } = generate(42);

    write_json("sample_dataset.json", &exposures, &rows, &stats)?;
    write_parquet("sample_dataset.parquet", &exposures, &rows, &stats)?;

    println!(
        "Wrote {} shards x {} exposures ({} orders of {} pixels) to sample_dataset.json / .parquet",
        stats.len(),
        exposures.len(),
        ORDERS.len(),
        PIXELS_PER_ORDER
    );
    Ok(())
}

fn generate(seed: u64) -> SampleDataset {
    let mut rng = SimpleRng::new(seed);

    let exposures: Vec<Exposure> = (0..N_EXPOSURES)
        .map(|i| Exposure {
            id: format!("exp_{i:02}.fits"),
            airmass: 1.0 + rng.next_f64() * 1.2,
            water: 0.1 + rng.next_f64() * 0.9,
        })
        .collect();

    let mut rows: Vec<ShardRow> = Vec::new();
    let mut stats: Vec<ShardStats> = Vec::new();

    for &order in &ORDERS {
        let start_wavelength = 6000.0 + f64::from(order - ORDERS[0]) * 40.0;
        let wavelength: Vec<f64> = (0..PIXELS_PER_ORDER)
            .map(|px| start_wavelength + px as f64 * DISPERSION)
            .collect();

        let water_lines = random_lines(&mut rng, 8, PIXELS_PER_ORDER);
        let mut airmass_lines = random_lines(&mut rng, 5, PIXELS_PER_ORDER);
        // One airmass line on the wing of a water line, to give the
        // resolver something to split.
        let (mu, sigma, _) = water_lines[0];
        airmass_lines.push((mu + 2.5 * sigma, 1.5, 0.4));

        let tau_water = optical_depth(PIXELS_PER_ORDER, &water_lines);
        let tau_airmass = optical_depth(PIXELS_PER_ORDER, &airmass_lines);

        // log intensity per exposure per pixel
        let log_intensity: Vec<Vec<f64>> = exposures
            .iter()
            .map(|e| {
                (0..PIXELS_PER_ORDER)
                    .map(|px| {
                        -(e.water * tau_water[px] + e.airmass * tau_airmass[px])
                            + rng.gauss(0.0, NOISE)
                    })
                    .collect()
            })
            .collect();

        let water_series: Vec<f64> = exposures.iter().map(|e| e.water).collect();
        let airmass_series: Vec<f64> = exposures.iter().map(|e| e.airmass).collect();

        for lo in (0..PIXELS_PER_ORDER).step_by(SHARD_WIDTH) {
            let hi = (lo + SHARD_WIDTH).min(PIXELS_PER_ORDER);
            let mut shard = ShardStats {
                order,
                lo,
                hi,
                water_pcc: Vec::with_capacity(hi - lo),
                airmass_pcc: Vec::with_capacity(hi - lo),
                water_flag: Vec::with_capacity(hi - lo),
                airmass_flag: Vec::with_capacity(hi - lo),
            };
            for px in lo..hi {
                let depth: Vec<f64> = log_intensity.iter().map(|s| -s[px]).collect();
                let w = pearson(&depth, &water_series);
                let z = pearson(&depth, &airmass_series);
                shard.water_pcc.push(w);
                shard.airmass_pcc.push(z);
                shard.water_flag.push(w > PCC_THRESHOLD);
                shard.airmass_flag.push(z > PCC_THRESHOLD);
            }
            let shard_index = stats.len();
            stats.push(shard);

            for (i, log_y) in log_intensity.iter().enumerate() {
                rows.push(ShardRow {
                    shard: shard_index,
                    exposure: i,
                    wavelength: wavelength[lo..hi].to_vec(),
                    intensity: log_y[lo..hi].iter().map(|v| v.exp()).collect(),
                });
            }
        }
    }

    SampleDataset {
        exposures,
        rows,
        stats,
    }
}

fn write_json(
    path: &str,
    exposures: &[Exposure],
    rows: &[ShardRow],
    stats: &[ShardStats],
) -> Result<()> {
    let shards: Vec<serde_json::Value> = stats
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let spectra: serde_json::Map<String, serde_json::Value> = rows
                .iter()
                .filter(|r| r.shard == i)
                .map(|r| {
                    (
                        exposures[r.exposure].id.clone(),
                        json!({ "wavelength": r.wavelength, "intensity": r.intensity }),
                    )
                })
                .collect();
            json!({
                "order": s.order,
                "lo_pixel": s.lo,
                "hi_pixel": s.hi,
                "spectra": spectra,
                "water_pcc": s.water_pcc,
                "airmass_pcc": s.airmass_pcc,
                "water_flag": s.water_flag,
                "airmass_flag": s.airmass_flag,
            })
        })
        .collect();

    let document = json!({
        "exposures": exposures
            .iter()
            .map(|e| json!({ "id": e.id, "airmass": e.airmass, "water_calibrator": e.water }))
            .collect::<Vec<_>>(),
        "shards": shards,
    });

    let file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
    serde_json::to_writer(std::io::BufWriter::new(file), &document).context("writing JSON")?;
    Ok(())
}

fn f64_list<'a>(values: impl Iterator<Item = &'a [f64]>) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in values {
        builder.values().append_slice(row);
        builder.append(true);
    }
    builder.finish()
}

fn bool_list<'a>(values: impl Iterator<Item = &'a [bool]>) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(BooleanBuilder::new());
    for row in values {
        builder.values().append_slice(row);
        builder.append(true);
    }
    builder.finish()
}

fn write_parquet(
    path: &str,
    exposures: &[Exposure],
    rows: &[ShardRow],
    stats: &[ShardStats],
) -> Result<()> {
    let list_of = |inner: DataType| DataType::List(Arc::new(Field::new("item", inner, true)));
    let schema = Arc::new(Schema::new(vec![
        Field::new("order", DataType::Int64, false),
        Field::new("lo_pixel", DataType::Int64, false),
        Field::new("hi_pixel", DataType::Int64, false),
        Field::new("exposure", DataType::Utf8, false),
        Field::new("airmass", DataType::Float64, false),
        Field::new("water_calibrator", DataType::Float64, false),
        Field::new("wavelength", list_of(DataType::Float64), false),
        Field::new("intensity", list_of(DataType::Float64), false),
        Field::new("water_pcc", list_of(DataType::Float64), false),
        Field::new("airmass_pcc", list_of(DataType::Float64), false),
        Field::new("water_flag", list_of(DataType::Boolean), false),
        Field::new("airmass_flag", list_of(DataType::Boolean), false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| i64::from(stats[r.shard].order)),
            )),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| stats[r.shard].lo as i64))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| stats[r.shard].hi as i64))),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| exposures[r.exposure].id.as_str()),
            )),
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| exposures[r.exposure].airmass),
            )),
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| exposures[r.exposure].water),
            )),
            Arc::new(f64_list(rows.iter().map(|r| r.wavelength.as_slice()))),
            Arc::new(f64_list(rows.iter().map(|r| r.intensity.as_slice()))),
            Arc::new(f64_list(rows.iter().map(|r| stats[r.shard].water_pcc.as_slice()))),
            Arc::new(f64_list(rows.iter().map(|r| stats[r.shard].airmass_pcc.as_slice()))),
            Arc::new(bool_list(rows.iter().map(|r| stats[r.shard].water_flag.as_slice()))),
            Arc::new(bool_list(rows.iter().map(|r| stats[r.shard].airmass_flag.as_slice()))),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {path}"))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}
