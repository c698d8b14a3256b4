//!
//! Command-line front end for parsing GeoPIXE map files.
#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]

use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use xrfmap_core::{DeadtimePolicy, PixelSeries};
use xrfmap_io::{MapSession, ParseConfig, ParseSummary};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    MapIo(#[from] xrfmap_io::Error),

    #[error("core error: {0}")]
    Core(#[from] xrfmap_core::Error),
}

/// Streaming parser for X-ray fluorescence map files.
#[derive(Parser)]
#[command(name = "xrfmap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Buffering knobs shared by every traversal command.
#[derive(Args)]
struct IoArgs {
    /// Chunk size in bytes (default: derived from system memory)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Disable background read-ahead
    #[arg(long)]
    no_prefetch: bool,

    /// The scan is known to be interrupted; report the pixel shortfall
    /// as informational instead of a warning
    #[arg(long)]
    short_run: bool,
}

impl IoArgs {
    fn to_config(&self) -> ParseConfig {
        let mut config = ParseConfig::new()
            .with_prefetch(!self.no_prefetch)
            .with_short_run(self.short_run);
        if let Some(bytes) = self.chunk_size {
            config = config.with_chunk_size_bytes(bytes);
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the header geometry and acquisition parameters of a map file
    Info {
        /// Input map file
        input: PathBuf,

        #[command(flatten)]
        io: IoArgs,
    },

    /// Index pass: locate every pixel record without decoding spectra
    Index {
        /// Input map file
        input: PathBuf,

        #[command(flatten)]
        io: IoArgs,
    },

    /// Full pass: decode spectra and derived statistics
    Parse {
        /// Input map file
        input: PathBuf,

        /// Deadtime policy: -1 keeps values as read, 999 uses the model
        /// prediction, 0..=100 forces a fixed percentage
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        deadtime: f64,

        /// Directory to write CSV statistics tables into
        #[arg(long)]
        export: Option<PathBuf>,

        #[command(flatten)]
        io: IoArgs,
    },

    /// Re-emit the map with the deadtime policy applied to every record
    Rewrite {
        /// Input map file
        input: PathBuf,

        /// Output map file
        #[arg(short, long)]
        output: PathBuf,

        /// Deadtime policy, same encoding as `parse --deadtime`
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        deadtime: f64,

        #[command(flatten)]
        io: IoArgs,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { input, io } => {
            let session = MapSession::open(&input, &io.to_config())?;
            let header = session.header();

            println!("File: {}", input.display());
            println!("Resolution: {} x {} pixels", header.xres, header.yres);
            println!(
                "Physical size: {} x {} mm",
                header.width_mm, header.height_mm
            );
            println!("Channels: {}", header.nchannels);
            println!("Gain: {} keV/channel", header.gain_kev);
            println!("Dwell: {} ms", header.dwell_ms);
            println!("Declared deadtime: {}%", header.deadtime_pct);
            println!("Detectors: {:?}", session.detectors());
            println!("First record offset: {}", session.data_start());
        }

        Commands::Index { input, io } => {
            let start = Instant::now();
            let mut session = MapSession::open(&input, &io.to_config())?;
            let outcome = session.index_pass()?;

            println!(
                "Indexed {} records in {:.2}s",
                outcome.index.entry_count(),
                start.elapsed().as_secs_f64()
            );
            print_summary(&outcome.summary);
        }

        Commands::Parse {
            input,
            deadtime,
            export,
            io,
        } => {
            let policy = DeadtimePolicy::from_modify_value(deadtime)?;
            let start = Instant::now();
            let mut session = MapSession::open(&input, &io.to_config())?;
            let outcome = session.full_pass(policy, None)?;

            println!(
                "Decoded {} records in {:.2}s",
                outcome.summary.records,
                start.elapsed().as_secs_f64()
            );
            print_summary(&outcome.summary);
            let total: u64 = outcome.series.flatsum.iter().map(|&s| u64::from(s)).sum();
            println!("Total counts: {}", total);

            if let Some(dir) = export {
                export_stats(&dir, &outcome.series)?;
                println!("Statistics written to: {}", dir.display());
            }
        }

        Commands::Rewrite {
            input,
            output,
            deadtime,
            io,
        } => {
            let policy = DeadtimePolicy::from_modify_value(deadtime)?;
            let start = Instant::now();
            let mut session = MapSession::open(&input, &io.to_config())?;
            let outcome = session.full_pass(policy, None)?;

            let out = File::create(&output)?;
            let summary = session.write_modified(&outcome.series, out)?;

            println!(
                "Rewrote {} records to {} in {:.2}s",
                summary.records,
                output.display(),
                start.elapsed().as_secs_f64()
            );
            print_summary(&summary);
        }
    }

    Ok(())
}

fn print_summary(summary: &ParseSummary) {
    println!(
        "Pixels: {} / {} expected",
        summary.pixels_found, summary.pixels_expected
    );
    if summary.truncated {
        println!("Final record truncated; partial pixel discarded");
    }
    if summary.stopped_early {
        println!("Stopped at the declared pixel count with bytes remaining");
    }
    if summary.channel_warnings > 0 {
        println!("Channel-list warnings: {}", summary.channel_warnings);
    }
    if summary.detector_order_warnings > 0 {
        println!(
            "Detector-order warnings: {}",
            summary.detector_order_warnings
        );
    }
}

/// Writes the per-record and per-pixel statistics as plain CSV tables.
fn export_stats(dir: &Path, series: &PixelSeries) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut records = BufWriter::new(File::create(dir.join("records.csv"))?);
    writeln!(records, "pixel,x,y,detector,pxlen,dt,dtmod,sum")?;
    let ndet = series.ndet();
    for pixel in 0..series.npx() {
        for det in 0..ndet {
            let cell = pixel * ndet + det;
            writeln!(
                records,
                "{},{},{},{},{},{},{},{}",
                pixel,
                series.xidx[cell],
                series.yidx[cell],
                series.det[cell],
                series.pxlen[cell],
                series.dt[cell],
                series.dtmod[cell],
                series.sum[cell]
            )?;
        }
    }
    records.flush()?;

    let mut pixels = BufWriter::new(File::create(dir.join("pixels.csv"))?);
    writeln!(pixels, "pixel,flatsum")?;
    for (pixel, flatsum) in series.flatsum.iter().enumerate() {
        writeln!(pixels, "{},{}", pixel, flatsum)?;
    }
    pixels.flush()?;
    Ok(())
}
