use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use log::info;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use phototable::PhotoTable;
use phototable::table::Axis;

#[derive(Parser)]
#[command(name = "phototable")]
#[command(about = "Inspect and combine photon detection probability tables", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sum tables produced from independent photon sets
    Merge {
        /// Output FITS file
        #[arg(short, long)]
        output: PathBuf,

        /// Input tables
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Divide by the total photon count before saving
        #[arg(long, action = ArgAction::SetTrue)]
        normalize: bool,

        /// Replace the output file if it exists
        #[arg(long, action = ArgAction::SetTrue)]
        overwrite: bool,
    },
    /// Print the shape, header and totals of a table
    Info {
        input: PathBuf,
    },
    /// Multiply a table by a constant
    Scale {
        /// Output FITS file
        #[arg(short, long)]
        output: PathBuf,

        input: PathBuf,

        #[arg(allow_negative_numbers = true)]
        factor: f64,

        /// Replace the output file if it exists
        #[arg(long, action = ArgAction::SetTrue)]
        overwrite: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Merge {
            output,
            inputs,
            normalize,
            overwrite,
        } => merge(&output, &inputs, normalize, overwrite),
        Commands::Info { input } => print_info(&input),
        Commands::Scale {
            output,
            input,
            factor,
            overwrite,
        } => scale(&output, &input, factor, overwrite),
    }
}

fn load(path: &Path) -> Result<PhotoTable> {
    PhotoTable::load(path).with_context(|| format!("Failed to load table {}", path.display()))
}

fn merge(output: &Path, inputs: &[PathBuf], normalize: bool, overwrite: bool) -> Result<()> {
    if output.exists() && !overwrite {
        bail!("{} exists, use --overwrite to replace it", output.display());
    }

    let tables = inputs
        .par_iter()
        .map(|path| load(path))
        .collect::<Result<Vec<_>>>()?;
    info!("Loaded {} tables", tables.len());

    let Some(mut merged) = PhotoTable::merge(tables)? else {
        bail!("No input tables");
    };
    info!("Merged table has {} photons", merged.n_photons());

    if normalize {
        merged.normalize()?;
    }
    merged.save(output, overwrite)?;
    info!("Saved {}", output.display());
    Ok(())
}

fn print_info(input: &Path) -> Result<()> {
    let table = load(input)?;
    let shape = table.shape();
    println!("{}", input.display());
    println!("  shape: {shape:?}");
    for axis in Axis::ALL {
        let edges = table.edges().edges(axis);
        println!(
            "  {axis:?}: {} bins in [{}, {}]",
            edges.len() - 1,
            edges[0],
            edges[edges.len() - 1]
        );
    }
    println!("  photons: {}", table.n_photons());
    println!("  normalized: {}", table.is_normalized());
    println!("  variance: {}", table.weights().is_some());
    println!("  total: {}", table.total());
    for (key, value) in table.header().to_records() {
        println!("  {key} = {value}");
    }
    Ok(())
}

fn scale(output: &Path, input: &Path, factor: f64, overwrite: bool) -> Result<()> {
    if !factor.is_finite() {
        bail!("Scale factor must be finite, got {factor}");
    }
    let mut table = load(input)?;
    table.scale(factor);
    table.save(output, overwrite)?;
    info!("Saved {} scaled by {factor}", output.display());
    Ok(())
}
