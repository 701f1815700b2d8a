use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeListArray, ListArray, StringArray,
};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};

use super::model::{CalibratorBundle, ExposureSpectrum, Shard, ShardAddr};

/// Reference spectra split into shards, plus the calibrator series.
#[derive(Debug, Clone)]
pub struct ReferenceDataset {
    pub shards: Vec<Shard>,
    pub bundle: CalibratorBundle,
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a reference dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.json`    – one document with `exposures` and `shards` (see [`DatasetFile`])
/// * `.parquet` – one row per (shard, exposure) with list columns
pub fn load_dataset(path: &Path) -> Result<ReferenceDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "json" => load_json(path),
        "parquet" | "pq" => load_parquet(path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;

    log::info!(
        "Loaded {} shards over {} exposures from {}",
        dataset.shards.len(),
        dataset.bundle.len(),
        path.display()
    );
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema:
///
/// ```json
/// {
///   "exposures": [ { "id": "a.fits", "airmass": 1.12, "water_calibrator": 0.31 } ],
///   "shards": [
///     {
///       "order": 12, "lo_pixel": 0, "hi_pixel": 400,
///       "spectra": { "a.fits": { "wavelength": [...], "intensity": [...] } },
///       "water_pcc": [...], "airmass_pcc": [...],
///       "water_flag": [...], "airmass_flag": [...]
///     }
///   ]
/// }
/// ```
///
/// The order of `exposures` is the canonical exposure order. `log_intensity`
/// may be given per spectrum; otherwise the natural log of `intensity` is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub exposures: Vec<ExposureEntry>,
    pub shards: Vec<ShardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureEntry {
    pub id: String,
    pub airmass: f64,
    pub water_calibrator: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardEntry {
    pub order: u32,
    pub lo_pixel: usize,
    pub hi_pixel: usize,
    pub spectra: BTreeMap<String, SpectrumEntry>,
    pub water_pcc: Vec<f64>,
    pub airmass_pcc: Vec<f64>,
    pub water_flag: Vec<bool>,
    pub airmass_flag: Vec<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumEntry {
    pub wavelength: Vec<f64>,
    pub intensity: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_intensity: Option<Vec<f64>>,
}

fn load_json(path: &Path) -> Result<ReferenceDataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let file: DatasetFile = serde_json::from_str(&text).context("parsing JSON")?;
    dataset_from_file(file)
}

/// Convert a parsed [`DatasetFile`] into shards and a calibrator bundle.
pub fn dataset_from_file(file: DatasetFile) -> Result<ReferenceDataset> {
    let mut airmass_by_id = HashMap::new();
    let mut bundle = CalibratorBundle::default();
    for exp in &file.exposures {
        if airmass_by_id.insert(exp.id.as_str(), exp.airmass).is_some() {
            bail!("exposure '{}' listed twice", exp.id);
        }
        bundle.exposure_order.push(exp.id.clone());
        bundle.water_values.push(exp.water_calibrator);
        bundle.airmass_values.push(exp.airmass);
    }

    let mut shards = Vec::with_capacity(file.shards.len());
    for entry in file.shards {
        let addr = shard_addr(entry.order, entry.lo_pixel, entry.hi_pixel)?;
        let mut shard = Shard::new(addr);

        for (id, sp) in entry.spectra {
            let airmass = *airmass_by_id
                .get(id.as_str())
                .with_context(|| format!("shard {addr}: exposure '{id}' not in exposure list"))?;
            shard
                .spectra
                .insert(id, exposure_spectrum(sp.wavelength, sp.intensity, sp.log_intensity, airmass));
        }
        shard.water_pcc = entry.water_pcc;
        shard.airmass_pcc = entry.airmass_pcc;
        shard.water_flag = entry.water_flag;
        shard.airmass_flag = entry.airmass_flag;
        shards.push(shard);
    }

    Ok(ReferenceDataset { shards, bundle })
}

fn shard_addr(order: u32, lo_pixel: usize, hi_pixel: usize) -> Result<ShardAddr> {
    if lo_pixel >= hi_pixel {
        bail!("shard of order {order}: lo_pixel {lo_pixel} not below hi_pixel {hi_pixel}");
    }
    Ok(ShardAddr::new(order, lo_pixel, hi_pixel))
}

fn exposure_spectrum(
    wavelength: Vec<f64>,
    intensity: Vec<f64>,
    log_intensity: Option<Vec<f64>>,
    airmass: f64,
) -> ExposureSpectrum {
    match log_intensity {
        Some(log_intensity) => ExposureSpectrum {
            wavelength,
            intensity,
            log_intensity,
            airmass,
        },
        None => ExposureSpectrum::from_linear(wavelength, intensity, airmass),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a long-format Parquet file: one row per (shard, exposure).
///
/// Expected schema:
/// - `order`, `lo_pixel`, `hi_pixel`: Int32 or Int64
/// - `exposure`: Utf8, `airmass`, `water_calibrator`: Float64
/// - `wavelength`, `intensity` and optional `log_intensity`: List<Float64>
/// - `water_pcc`, `airmass_pcc`: List<Float64>; `water_flag`, `airmass_flag`:
///   List<Boolean>. These are per shard; the first row of a shard wins.
///
/// Exposures are ordered by first appearance.
fn load_parquet(path: &Path) -> Result<ReferenceDataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut bundle = CalibratorBundle::default();
    let mut exposure_index: HashMap<String, usize> = HashMap::new();
    let mut shards: BTreeMap<ShardAddr, Shard> = BTreeMap::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;

        let order_col = named_column(&batch, "order")?;
        let lo_col = named_column(&batch, "lo_pixel")?;
        let hi_col = named_column(&batch, "hi_pixel")?;
        let exposure_col = named_column(&batch, "exposure")?;
        let airmass_col = named_column(&batch, "airmass")?;
        let water_col = named_column(&batch, "water_calibrator")?;
        let wavelength_col = named_column(&batch, "wavelength")?;
        let intensity_col = named_column(&batch, "intensity")?;
        let log_col = named_column(&batch, "log_intensity").ok();
        let water_pcc_col = named_column(&batch, "water_pcc")?;
        let airmass_pcc_col = named_column(&batch, "airmass_pcc")?;
        let water_flag_col = named_column(&batch, "water_flag")?;
        let airmass_flag_col = named_column(&batch, "airmass_flag")?;

        for row in 0..batch.num_rows() {
            let order = u32::try_from(extract_int(order_col, row)?)
                .with_context(|| format!("Row {row}: order out of range"))?;
            let lo = usize::try_from(extract_int(lo_col, row)?)
                .with_context(|| format!("Row {row}: lo_pixel out of range"))?;
            let hi = usize::try_from(extract_int(hi_col, row)?)
                .with_context(|| format!("Row {row}: hi_pixel out of range"))?;
            let addr = shard_addr(order, lo, hi)?;

            let exposure = extract_string(exposure_col, row)
                .with_context(|| format!("Row {row}: failed to read 'exposure'"))?;
            let airmass = extract_f64(airmass_col, row)
                .with_context(|| format!("Row {row}: failed to read 'airmass'"))?;
            let water = extract_f64(water_col, row)
                .with_context(|| format!("Row {row}: failed to read 'water_calibrator'"))?;

            match exposure_index.get(&exposure) {
                Some(&i) => {
                    if bundle.airmass_values[i] != airmass || bundle.water_values[i] != water {
                        bail!("Row {row}: exposure '{exposure}' has inconsistent calibrator values");
                    }
                }
                None => {
                    exposure_index.insert(exposure.clone(), bundle.len());
                    bundle.exposure_order.push(exposure.clone());
                    bundle.airmass_values.push(airmass);
                    bundle.water_values.push(water);
                }
            }

            let shard = match shards.entry(addr) {
                std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::btree_map::Entry::Vacant(e) => {
                    let mut shard = Shard::new(addr);
                    shard.water_pcc = extract_f64_list(water_pcc_col, row)
                        .with_context(|| format!("Row {row}: failed to read 'water_pcc'"))?;
                    shard.airmass_pcc = extract_f64_list(airmass_pcc_col, row)
                        .with_context(|| format!("Row {row}: failed to read 'airmass_pcc'"))?;
                    shard.water_flag = extract_bool_list(water_flag_col, row)
                        .with_context(|| format!("Row {row}: failed to read 'water_flag'"))?;
                    shard.airmass_flag = extract_bool_list(airmass_flag_col, row)
                        .with_context(|| format!("Row {row}: failed to read 'airmass_flag'"))?;
                    e.insert(shard)
                }
            };

            let wavelength = extract_f64_list(wavelength_col, row)
                .with_context(|| format!("Row {row}: failed to read 'wavelength'"))?;
            let intensity = extract_f64_list(intensity_col, row)
                .with_context(|| format!("Row {row}: failed to read 'intensity'"))?;
            let log_intensity = match log_col {
                Some(col) if !col.is_null(row) => Some(
                    extract_f64_list(col, row)
                        .with_context(|| format!("Row {row}: failed to read 'log_intensity'"))?,
                ),
                _ => None,
            };

            if shard.spectra.contains_key(&exposure) {
                bail!("Row {row}: exposure '{exposure}' repeated in shard {addr}");
            }
            shard.spectra.insert(
                exposure,
                exposure_spectrum(wavelength, intensity, log_intensity, airmass),
            );
        }
    }

    Ok(ReferenceDataset {
        shards: shards.into_values().collect(),
        bundle,
    })
}

// -- Parquet / Arrow helpers --

fn named_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Arc<dyn Array>> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Parquet file missing '{name}' column"))
}

/// Extract the values array of a List or LargeList column at the given row.
fn list_values(col: &Arc<dyn Array>, row: usize) -> Result<Arc<dyn Array>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            Ok(list_arr.value(row))
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            Ok(list_arr.value(row))
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    }
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    let values_array = list_values(col, row)?;

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract a `Vec<bool>` from a List<Boolean> column; nulls read as unflagged.
fn extract_bool_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<bool>> {
    let values_array = list_values(col, row)?;
    let bools = values_array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .with_context(|| {
            format!(
                "List inner type is {:?}, expected Boolean",
                values_array.data_type()
            )
        })?;
    Ok(bools.iter().map(|v| v.unwrap_or(false)).collect())
}

fn extract_int(col: &Arc<dyn Array>, row: usize) -> Result<i64> {
    if col.is_null(row) {
        bail!("null value in integer column");
    }
    match col.data_type() {
        DataType::Int32 => Ok(col
            .as_any()
            .downcast_ref::<Int32Array>()
            .context("expected Int32Array")?
            .value(row) as i64),
        DataType::Int64 => Ok(col
            .as_any()
            .downcast_ref::<Int64Array>()
            .context("expected Int64Array")?
            .value(row)),
        other => bail!("Expected Int32 or Int64 column, got {other:?}"),
    }
}

fn extract_f64(col: &Arc<dyn Array>, row: usize) -> Result<f64> {
    if col.is_null(row) {
        bail!("null value in float column");
    }
    match col.data_type() {
        DataType::Float32 => Ok(col
            .as_any()
            .downcast_ref::<Float32Array>()
            .context("expected Float32Array")?
            .value(row) as f64),
        DataType::Float64 => Ok(col
            .as_any()
            .downcast_ref::<Float64Array>()
            .context("expected Float64Array")?
            .value(row)),
        other => bail!("Expected Float32 or Float64 column, got {other:?}"),
    }
}

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Result<String> {
    if col.is_null(row) {
        bail!("null value in string column");
    }
    match col.data_type() {
        DataType::Utf8 => Ok(col
            .as_any()
            .downcast_ref::<StringArray>()
            .context("expected StringArray")?
            .value(row)
            .to_string()),
        DataType::LargeUtf8 => Ok(col.as_string::<i64>().value(row).to_string()),
        other => bail!("Expected Utf8 column, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BooleanBuilder, Float64Builder, ListBuilder};
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;

    fn json_fixture() -> serde_json::Value {
        serde_json::json!({
            "exposures": [
                { "id": "b", "airmass": 1.5, "water_calibrator": 0.2 },
                { "id": "a", "airmass": 1.1, "water_calibrator": 0.4 }
            ],
            "shards": [{
                "order": 9, "lo_pixel": 10, "hi_pixel": 13,
                "spectra": {
                    "a": { "wavelength": [1.0, 2.0, 3.0], "intensity": [1.0, 1.0, 1.0] },
                    "b": { "wavelength": [1.0, 2.0, 3.0], "intensity": [1.0, 1.0, 1.0],
                           "log_intensity": [0.0, -0.5, 0.0] }
                },
                "water_pcc": [0.1, 0.9, 0.1],
                "airmass_pcc": [0.2, 0.3, 0.2],
                "water_flag": [false, true, false],
                "airmass_flag": [false, false, false]
            }]
        })
    }

    #[test]
    fn json_dataset_keeps_exposure_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        std::fs::write(&path, json_fixture().to_string()).unwrap();

        let ds = load_dataset(&path).unwrap();
        assert_eq!(ds.bundle.exposure_order, vec!["b", "a"]);
        assert_eq!(ds.bundle.water_values, vec![0.2, 0.4]);
        assert_eq!(ds.bundle.airmass_values, vec![1.5, 1.1]);

        let shard = &ds.shards[0];
        assert_eq!(shard.addr, ShardAddr::new(9, 10, 13));
        assert_eq!(shard.spectra["a"].airmass, 1.1);
        assert_eq!(shard.spectra["a"].log_intensity, vec![0.0, 0.0, 0.0]);
        assert_eq!(shard.spectra["b"].log_intensity[1], -0.5);
        assert!(shard.validate(&ds.bundle).is_ok());
    }

    #[test]
    fn json_unknown_exposure_rejected() {
        let mut doc = json_fixture();
        doc["exposures"].as_array_mut().unwrap().pop();
        let file: DatasetFile = serde_json::from_value(doc).unwrap();
        assert!(dataset_from_file(file).is_err());
    }

    #[test]
    fn json_inverted_shard_rejected() {
        let mut doc = json_fixture();
        doc["shards"][0]["hi_pixel"] = serde_json::json!(10);
        let file: DatasetFile = serde_json::from_value(doc).unwrap();
        assert!(dataset_from_file(file).is_err());
    }

    fn f64_lists(rows: &[Vec<f64>]) -> ListBuilder<Float64Builder> {
        let mut builder = ListBuilder::new(Float64Builder::new());
        for row in rows {
            builder.values().append_slice(row);
            builder.append(true);
        }
        builder
    }

    fn bool_lists(rows: &[Vec<bool>]) -> ListBuilder<BooleanBuilder> {
        let mut builder = ListBuilder::new(BooleanBuilder::new());
        for row in rows {
            builder.values().append_slice(row);
            builder.append(true);
        }
        builder
    }

    /// Two exposures of one shard, then the second exposure of another shard.
    fn write_long_format(exposure: Arc<dyn Array>) -> (tempfile::TempDir, std::path::PathBuf) {
        let list = |inner: DataType| DataType::List(Arc::new(Field::new("item", inner, true)));
        let schema = Arc::new(Schema::new(vec![
            Field::new("order", DataType::Int64, false),
            Field::new("lo_pixel", DataType::Int64, false),
            Field::new("hi_pixel", DataType::Int64, false),
            Field::new("exposure", exposure.data_type().clone(), false),
            Field::new("airmass", DataType::Float64, false),
            Field::new("water_calibrator", DataType::Float64, false),
            Field::new("wavelength", list(DataType::Float64), false),
            Field::new("intensity", list(DataType::Float64), false),
            Field::new("water_pcc", list(DataType::Float64), false),
            Field::new("airmass_pcc", list(DataType::Float64), false),
            Field::new("water_flag", list(DataType::Boolean), false),
            Field::new("airmass_flag", list(DataType::Boolean), false),
        ]));

        let wl = vec![5000.0, 5000.1];
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![2, 2, 1])),
                Arc::new(Int64Array::from(vec![0, 0, 5])),
                Arc::new(Int64Array::from(vec![2, 2, 7])),
                exposure,
                Arc::new(Float64Array::from(vec![1.3, 1.0, 1.0])),
                Arc::new(Float64Array::from(vec![0.7, 0.2, 0.2])),
                Arc::new(f64_lists(&[wl.clone(), wl.clone(), wl.clone()]).finish()),
                Arc::new(f64_lists(&[vec![0.9, 1.0], vec![0.8, 1.0], vec![1.0, 1.0]]).finish()),
                Arc::new(f64_lists(&[vec![0.5, 0.6], vec![0.0, 0.0], vec![0.1, 0.1]]).finish()),
                Arc::new(f64_lists(&[vec![0.4, 0.3], vec![0.0, 0.0], vec![0.2, 0.2]]).finish()),
                Arc::new(bool_lists(&[vec![true, false], vec![false, false], vec![true, true]]).finish()),
                Arc::new(bool_lists(&[vec![false, false], vec![false, false], vec![false, true]]).finish()),
            ],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.parquet");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        (dir, path)
    }

    #[test]
    fn parquet_long_format() {
        let (_dir, path) = write_long_format(Arc::new(StringArray::from(vec!["n2", "n1", "n1"])));

        let ds = load_dataset(&path).unwrap();
        assert_eq!(ds.bundle.exposure_order, vec!["n2", "n1"]);
        assert_eq!(ds.bundle.water_values, vec![0.7, 0.2]);
        assert_eq!(ds.shards.len(), 2);

        // shards come back sorted by address
        let first = &ds.shards[0];
        assert_eq!(first.addr, ShardAddr::new(1, 5, 7));
        assert_eq!(first.airmass_flag, vec![false, true]);

        let second = &ds.shards[1];
        assert_eq!(second.spectra.len(), 2);
        assert_eq!(second.water_pcc, vec![0.5, 0.6]);
        assert!(second.validate(&ds.bundle).is_ok());
        assert!(first.validate(&ds.bundle).is_err());
    }

    #[test]
    fn parquet_large_utf8_exposure_ids() {
        let ids = arrow::array::LargeStringArray::from(vec!["n2", "n1", "n1"]);
        let (_dir, path) = write_long_format(Arc::new(ids));

        let ds = load_dataset(&path).unwrap();
        assert_eq!(ds.bundle.exposure_order, vec!["n2", "n1"]);
        assert_eq!(ds.shards[1].spectra.len(), 2);
        assert!(ds.shards[1].spectra.contains_key("n2"));
    }
}
