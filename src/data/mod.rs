/// Data layer: core types, dataset ingestion, the telluric database and
/// record selection.
///
/// Architecture:
/// ```text
///  dataset .json / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → shards + calibrator bundle
///   └──────────┘
///        │
///        ▼  (telluric pipeline)
///   ┌──────────┐
///   │    db     │  shards → records → .csv / .parquet
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  class / order / wavelength → record indices
///   └──────────┘
/// ```

pub mod db;
pub mod filter;
pub mod loader;
pub mod model;
