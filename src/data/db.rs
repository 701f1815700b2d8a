use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::model::{LinearFit, Shard, TelluricClass};
use crate::telluric::coadd;

/// Column names of the database, in file order.
pub const DB_HEADER: [&str; 8] = [
    "order",
    "px",
    "wavelength",
    "class",
    "PCC",
    "r_m",
    "r_c",
    "med_intensity",
];

// ---------------------------------------------------------------------------
// TelluricRecord – one row of the telluric database
// ---------------------------------------------------------------------------

/// One telluric pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct TelluricRecord {
    pub order: u32,
    /// Pixel number within the order (not shard-local).
    pub pixel: usize,
    /// Coadded wavelength in Ångström.
    pub wavelength: f64,
    pub class: TelluricClass,
    /// PCC with the pixel's calibrator; `None` for composite pixels.
    pub pcc: Option<f64>,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    /// Coadded log intensity, stored in the `med_intensity` column.
    pub median_intensity: f64,
}

impl TelluricRecord {
    pub fn fit(&self) -> Option<LinearFit> {
        Some(LinearFit {
            slope: self.slope?,
            intercept: self.intercept?,
        })
    }
}

// ---------------------------------------------------------------------------
// Building records from calibrated shards
// ---------------------------------------------------------------------------

/// One record per surviving telluric pixel, sorted by order then pixel.
///
/// Shards are ordered with an unstable sort on their first pixel followed by
/// a stable sort on order. Inside a shard the water, airmass and composite
/// lists are walked together, always taking the cluster that starts first.
pub fn build_records(shards: &[Shard]) -> Vec<TelluricRecord> {
    let mut ordered: Vec<&Shard> = shards.iter().collect();
    ordered.sort_unstable_by_key(|s| s.addr.lo_pixel);
    ordered.sort_by_key(|s| s.addr.order);

    let mut records = Vec::new();
    for shard in ordered {
        let coadded = coadd::coadd(shard);
        let mut next = [0usize; 3];

        loop {
            let pick = TelluricClass::ALL
                .iter()
                .enumerate()
                .filter_map(|(k, &class)| {
                    shard.clusters(class).get(next[k]).map(|c| (k, class, *c))
                })
                .min_by_key(|(_, _, c)| c.start);
            let Some((k, class, cluster)) = pick else {
                break;
            };
            next[k] += 1;

            for px in cluster.pixels() {
                let (pcc, fit) = match class {
                    TelluricClass::Composite => (None, None),
                    _ => {
                        let fit = shard.coeffs(class).and_then(|c| c.get(&px)).copied();
                        if fit.is_none() {
                            log::warn!(
                                "{}: {class} pixel {px} has no regression, not persisted",
                                shard.addr
                            );
                            continue;
                        }
                        (shard.pcc(class).map(|p| p[px]), fit)
                    }
                };
                records.push(TelluricRecord {
                    order: shard.addr.order,
                    pixel: shard.addr.lo_pixel + px,
                    wavelength: coadded.wavelength[px],
                    class,
                    pcc,
                    slope: fit.map(|f| f.slope),
                    intercept: fit.map(|f| f.intercept),
                    median_intensity: coadded.log_intensity[px],
                });
            }
        }
    }
    records
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Write the database. Dispatch by extension (`.csv`, `.parquet`/`.pq`).
pub fn write_db(path: &Path, records: &[TelluricRecord]) -> Result<()> {
    match extension(path).as_str() {
        "csv" => write_csv(path, records),
        "parquet" | "pq" => write_parquet(path, records),
        other => bail!("Unsupported database extension: .{other}"),
    }
}

/// Read a database written by [`write_db`].
pub fn read_db(path: &Path) -> Result<Vec<TelluricRecord>> {
    match extension(path).as_str() {
        "csv" => read_csv(path),
        "parquet" | "pq" => read_parquet(path),
        other => bail!("Unsupported database extension: .{other}"),
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Text fields of a record as written to CSV.
pub fn format_record(r: &TelluricRecord) -> [String; 8] {
    let optional = |v: Option<f64>, precision: usize| match v {
        Some(v) => format!("{v:.precision$}"),
        None => "-1".to_string(),
    };
    [
        format!("{:02}", r.order),
        format!("{:04}", r.pixel),
        format!("{:.2}", r.wavelength),
        r.class.code().to_string(),
        optional(r.pcc, 3),
        optional(r.slope, 5),
        optional(r.intercept, 5),
        format!("{:.4}", r.median_intensity),
    ]
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Space-delimited, `'`-quoted, one header row.
fn write_csv(path: &Path, records: &[TelluricRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b' ')
        .quote(b'\'')
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    writer.write_record(DB_HEADER).context("writing CSV header")?;
    for r in records {
        writer
            .write_record(format_record(r))
            .with_context(|| format!("writing record for order {} px {}", r.order, r.pixel))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

fn read_csv(path: &Path) -> Result<Vec<TelluricRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .quote(b'\'')
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut records = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let row = result.with_context(|| format!("CSV row {row_no}"))?;
        if row.len() != DB_HEADER.len() {
            bail!("CSV row {row_no}: {} fields, expected {}", row.len(), DB_HEADER.len());
        }
        let field = |i: usize| row.get(i).unwrap_or("");
        let number = |i: usize| -> Result<f64> {
            field(i)
                .parse::<f64>()
                .with_context(|| format!("Row {row_no}, {}: '{}' is not a number", DB_HEADER[i], field(i)))
        };

        let class = TelluricClass::from_code(field(3))
            .with_context(|| format!("Row {row_no}: unknown class '{}'", field(3)))?;
        let optional = |i: usize| -> Result<Option<f64>> {
            Ok(match class {
                TelluricClass::Composite => None,
                _ => Some(number(i)?),
            })
        };

        records.push(TelluricRecord {
            order: field(0)
                .parse()
                .with_context(|| format!("Row {row_no}: bad order '{}'", field(0)))?,
            pixel: field(1)
                .parse()
                .with_context(|| format!("Row {row_no}: bad pixel '{}'", field(1)))?,
            wavelength: number(2)?,
            class,
            pcc: optional(4)?,
            slope: optional(5)?,
            intercept: optional(6)?,
            median_intensity: number(7)?,
        });
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn db_schema() -> Schema {
    Schema::new(vec![
        Field::new("order", DataType::Int64, false),
        Field::new("px", DataType::Int64, false),
        Field::new("wavelength", DataType::Float64, false),
        Field::new("class", DataType::Utf8, false),
        Field::new("PCC", DataType::Float64, true),
        Field::new("r_m", DataType::Float64, true),
        Field::new("r_c", DataType::Float64, true),
        Field::new("med_intensity", DataType::Float64, false),
    ])
}

fn write_parquet(path: &Path, records: &[TelluricRecord]) -> Result<()> {
    let schema = Arc::new(db_schema());
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.order as i64))),
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.pixel as i64))),
            Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.wavelength))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.class.code()))),
            Arc::new(Float64Array::from(records.iter().map(|r| r.pcc).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(records.iter().map(|r| r.slope).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(records.iter().map(|r| r.intercept).collect::<Vec<_>>())),
            Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.median_intensity))),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<Vec<TelluricRecord>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?
        .build()
        .context("building parquet reader")?;

    let mut records = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;

        let order = typed_column::<Int64Array>(&batch, "order")?;
        let px = typed_column::<Int64Array>(&batch, "px")?;
        let wavelength = typed_column::<Float64Array>(&batch, "wavelength")?;
        let class = typed_column::<StringArray>(&batch, "class")?;
        let pcc = typed_column::<Float64Array>(&batch, "PCC")?;
        let slope = typed_column::<Float64Array>(&batch, "r_m")?;
        let intercept = typed_column::<Float64Array>(&batch, "r_c")?;
        let median = typed_column::<Float64Array>(&batch, "med_intensity")?;

        let nullable = |arr: &Float64Array, row: usize| (!arr.is_null(row)).then(|| arr.value(row));

        for row in 0..batch.num_rows() {
            let code = class.value(row);
            records.push(TelluricRecord {
                order: u32::try_from(order.value(row))
                    .with_context(|| format!("Row {row}: order out of range"))?,
                pixel: usize::try_from(px.value(row))
                    .with_context(|| format!("Row {row}: pixel out of range"))?,
                wavelength: wavelength.value(row),
                class: TelluricClass::from_code(code)
                    .with_context(|| format!("Row {row}: unknown class '{code}'"))?,
                pcc: nullable(pcc, row),
                slope: nullable(slope, row),
                intercept: nullable(intercept, row),
                median_intensity: median.value(row),
            });
        }
    }
    Ok(records)
}

/// Look up a column by name and downcast it.
fn typed_column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Parquet file missing '{name}' column"))?
        .as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("column '{name}' has unexpected type"))
}
