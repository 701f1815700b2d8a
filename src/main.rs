mod app;
mod color;
mod config;
mod data;
mod error;
mod state;
mod telluric;
mod ui;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use eframe::egui;

use app::RustyCrystalApp;
use config::Config;
use data::db::{self, DB_HEADER};
use data::filter::{RecordFilter, filtered_indices};
use telluric::model::{self as tmodel, ScienceSpectrum};

#[derive(Parser, Debug)]
#[command(author, version, about = "Telluric line calibration for echelle spectra")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify telluric clusters in a reference dataset and fit the database
    Calibrate {
        /// Reference dataset (.json, .parquet)
        #[arg(long)]
        dataset: PathBuf,

        /// Pipeline configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Telluric database to write (.csv, .parquet)
        #[arg(long)]
        output: PathBuf,

        /// Override the trough gradient threshold
        #[arg(long)]
        gradient_threshold: Option<f64>,

        /// Override the isolation distance in Ångström
        #[arg(long)]
        isolation_distance: Option<f64>,

        /// Process shards one at a time
        #[arg(long, default_value_t = false)]
        sequential: bool,
    },

    /// Generate a telluric spectrum for given observing conditions
    Model {
        /// Telluric database (.csv, .parquet)
        #[arg(long)]
        db: PathBuf,

        /// Water calibrator value
        #[arg(long)]
        water_value: f64,

        /// Airmass
        #[arg(long)]
        airmass: f64,

        /// Model CSV to write
        #[arg(long, required_unless_present = "science")]
        output: Option<PathBuf>,

        /// Science spectrum JSON to correct; the model is written next to it
        #[arg(long)]
        science: Option<PathBuf>,

        /// Pipeline configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print database records inside a wavelength window
    Range {
        /// Telluric database (.csv, .parquet)
        #[arg(long)]
        db: PathBuf,

        /// Start wavelength (Å)
        start: f64,

        /// End wavelength (Å)
        end: f64,
    },

    /// Open the database viewer
    View {
        /// Telluric database to open on start-up
        db: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Calibrate {
            dataset,
            config,
            output,
            gradient_threshold,
            isolation_distance,
            sequential,
        } => {
            let overrides = Overrides {
                gradient_threshold,
                isolation_distance,
                sequential,
            };
            run_calibrate(&dataset, config.as_deref(), &output, overrides)
        }
        Command::Model {
            db,
            water_value,
            airmass,
            output,
            science,
            config,
        } => run_model(
            &db,
            water_value,
            airmass,
            output.as_deref(),
            science.as_deref(),
            config.as_deref(),
        )
        .map(|()| ExitCode::SUCCESS),
        Command::Range { db, start, end } => {
            run_range(&db, start, end).map(|()| ExitCode::SUCCESS)
        }
        Command::View { db } => run_viewer(db).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// ---------------------------------------------------------------------------
// calibrate
// ---------------------------------------------------------------------------

struct Overrides {
    gradient_threshold: Option<f64>,
    isolation_distance: Option<f64>,
    sequential: bool,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p),
        None => Ok(Config::default()),
    }
}

fn run_calibrate(
    dataset_path: &Path,
    config_path: Option<&Path>,
    output: &Path,
    overrides: Overrides,
) -> Result<ExitCode> {
    let mut config = load_config(config_path)?;
    if let Some(t) = overrides.gradient_threshold {
        config.gradient_threshold = t;
    }
    if let Some(d) = overrides.isolation_distance {
        config.isolation_distance_angstrom = d;
    }
    if overrides.sequential {
        config.parallel = false;
    }
    config.validate()?;

    let mut dataset = data::loader::load_dataset(dataset_path)?;

    let outcomes = telluric::calibrate_all(&mut dataset.shards, &dataset.bundle, &config, None);

    let mut failed: BTreeSet<_> = BTreeSet::new();
    for (addr, outcome) in &outcomes {
        match outcome {
            Ok(report) => log::info!(
                "{addr}: {} water, {} airmass, {} composite clusters, {} pixels fitted, {} warnings",
                report.water_clusters,
                report.airmass_clusters,
                report.composite_clusters,
                report.fitted_pixels,
                report.warnings.len()
            ),
            Err(_) => {
                failed.insert(*addr);
            }
        }
    }

    let completed: Vec<_> = dataset
        .shards
        .into_iter()
        .filter(|s| !failed.contains(&s.addr))
        .collect();
    let records = db::build_records(&completed);
    db::write_db(output, &records)?;
    log::info!("wrote {} records to {}", records.len(), output.display());

    if failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{} of {} shards failed", failed.len(), outcomes.len());
        Ok(ExitCode::FAILURE)
    }
}

// ---------------------------------------------------------------------------
// model
// ---------------------------------------------------------------------------

fn run_model(
    db_path: &Path,
    water_value: f64,
    airmass: f64,
    output: Option<&Path>,
    science: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let records = db::read_db(db_path)?;
    let model = tmodel::generate_model(&records, water_value, airmass, config.min_model_depth);
    log::info!(
        "model for water {water_value}, airmass {airmass}: {} of {} pixels",
        model.len(),
        records.len()
    );

    let model_path = match (output, science) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(s)) => tmodel::model_path_for(s),
        (None, None) => return Err(anyhow!("either --output or --science is required")),
    };
    tmodel::write_model(&model_path, &model)?;
    log::info!("wrote model to {}", model_path.display());

    if let Some(science_path) = science {
        let mut spectrum = ScienceSpectrum::load(science_path)?;
        tmodel::apply_model(&mut spectrum, &model);
        let corrected = corrected_path_for(science_path);
        spectrum
            .save(&corrected)
            .with_context(|| format!("saving corrected spectrum for {}", science_path.display()))?;
        log::info!("wrote corrected spectrum to {}", corrected.display());
    }
    Ok(())
}

fn corrected_path_for(science: &Path) -> PathBuf {
    let stem = science
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("spectrum");
    science.with_file_name(format!("{stem}_corrected.json"))
}

// ---------------------------------------------------------------------------
// range
// ---------------------------------------------------------------------------

fn run_range(db_path: &Path, start: f64, end: f64) -> Result<()> {
    let filter = RecordFilter::default().with_wavelength_range(start, end)?;
    let records = db::read_db(db_path)?;

    println!("{}", DB_HEADER.join(" "));
    for idx in filtered_indices(&records, &filter) {
        println!("{}", db::format_record(&records[idx]).join(" "));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// view
// ---------------------------------------------------------------------------

fn run_viewer(db_path: Option<PathBuf>) -> Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Rusty Crystal – Telluric Database Viewer",
        options,
        Box::new(move |_cc| Ok(Box::new(RustyCrystalApp::new(db_path.as_deref())))),
    )
    .map_err(|e| anyhow!("viewer failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn model_needs_an_output() {
        let parsed = Cli::try_parse_from([
            "rusty-crystal",
            "model",
            "--db",
            "db.csv",
            "--water-value",
            "0.3",
            "--airmass",
            "1.2",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn corrected_spectrum_sits_next_to_input() {
        let path = corrected_path_for(Path::new("/data/night1/hd1234.json"));
        assert_eq!(path, PathBuf::from("/data/night1/hd1234_corrected.json"));
    }
}
