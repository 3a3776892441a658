use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use tracing::info_span;
use tracing_subscriber::EnvFilter;

use volume_ops::{Binarizer, MaskApplier, SeriesMerger, SeriesSplitter, SortBy, Tolerance};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for the outputs (defaults depend on the command)
    #[arg(short, long, global = true)]
    out_dir: Option<PathBuf>,

    /// Relative tolerance used when comparing affines
    #[arg(long, global = true, default_value_t = 1e-5)]
    rtol: f64,

    /// Absolute tolerance used when comparing affines
    #[arg(long, global = true, default_value_t = 1e-8)]
    atol: f64,

    /// Slice order for inputs that are DICOM series directories
    #[arg(long, global = true, value_enum, default_value_t = SortBy::ImagePositionPatient)]
    sort_by: SortBy,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Zero the voxels of an image that fall outside a mask
    ApplyMask {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long)]
        mask: PathBuf,
        /// Mask voxels strictly above this value are inside the mask
        #[arg(short, long, default_value_t = 0.5)]
        threshold: f64,
    },
    /// Threshold an image into a zeroed copy and a uint8 mask
    Binarize {
        #[arg(short, long)]
        image: PathBuf,
        /// Non-inclusive lower threshold
        #[arg(short, long, allow_negative_numbers = true)]
        thresh_low: f64,
    },
    /// Split a 4D image into 3D frames along the last axis
    Split {
        #[arg(short, long)]
        image: PathBuf,
        /// Write a 3D input as a single frame instead of failing
        #[arg(long)]
        accept_3d: bool,
    },
    /// Merge 3D (or 4D) images, in the given order, into one 4D image
    Merge {
        #[arg(short, long, num_args = 1.., required = true)]
        images: Vec<PathBuf>,
        /// Reject 4D inputs
        #[arg(long)]
        no_4d: bool,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let tolerance = Tolerance::new(cli.rtol, cli.atol);

    let written = match cli.command {
        Commands::ApplyMask {
            image,
            mask,
            threshold,
        } => {
            let mut applier = MaskApplier::new()
                .threshold(threshold)
                .tolerance(tolerance)
                .sort_by(cli.sort_by)
                .with_span(info_span!("apply_mask"));
            if let Some(dir) = cli.out_dir {
                applier = applier.out_dir(dir);
            }
            vec![applier.run(image, mask)?]
        }
        Commands::Binarize { image, thresh_low } => {
            let mut binarizer = Binarizer::new(thresh_low)
                .sort_by(cli.sort_by)
                .with_span(info_span!("binarize"));
            if let Some(dir) = cli.out_dir {
                binarizer = binarizer.out_dir(dir);
            }
            let (out_file, out_mask) = binarizer.run(image)?;
            vec![out_file, out_mask]
        }
        Commands::Split { image, accept_3d } => {
            let mut splitter = SeriesSplitter::new()
                .accept_3d(accept_3d)
                .sort_by(cli.sort_by)
                .with_span(info_span!("split_series"));
            if let Some(dir) = cli.out_dir {
                splitter = splitter.out_dir(dir);
            }
            splitter.run(image)?
        }
        Commands::Merge { images, no_4d } => {
            let mut merger = SeriesMerger::new()
                .allow_4d(!no_4d)
                .tolerance(tolerance)
                .sort_by(cli.sort_by)
                .with_span(info_span!("merge_series"));
            if let Some(dir) = cli.out_dir {
                merger = merger.out_dir(dir);
            }
            vec![merger.run(&images)?]
        }
    };

    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}
