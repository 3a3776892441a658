//! # volume-ops library
//!
//! This crate provides deterministic voxel-array transforms for 3D and 4D
//! medical imaging volumes:
//!  - Applying a mask to an image ([`MaskApplier`])
//!  - Thresholding an image into a zeroed copy and a binary mask ([`Binarizer`])
//!  - Splitting a 4D series into 3D frames ([`SeriesSplitter`])
//!  - Merging 3D (and 4D) volumes into one 4D series ([`SeriesMerger`])
//!
//! Every transform checks shapes, affines and dimensionality before it
//! produces anything. Affines are compared with an explicit [`Tolerance`]
//! (`rtol = 1e-5`, `atol = 1e-8` by default). Failures are reported as
//! [`TransformError`] values.
//!
//! Volumes are read from NIfTI files (`.nii`, `.nii.gz`) or from directories
//! of DICOM slices. DICOM slices are decoded in parallel using rayon. Outputs
//! keep the format they were read with; series read from DICOM are written as
//! gzipped NIfTI. Output file names add fixed suffixes to the input name:
//! `_masked`, `_mask`, `_idx-000`, `_merged`.
//!
//! Logging goes through `tracing`. Each transform logs under the span it was
//! given with `with_span`, falling back to the span current at construction.
//!
//! # Examples
//!
//! ## Masking a BOLD series with a brain mask
//!
//! ```no_run
//! # use volume_ops::MaskApplier;
//! let out_file = MaskApplier::new()
//!     .threshold(0.5)
//!     .out_dir("derivatives")
//!     .run("sub-01_bold.nii.gz", "sub-01_brainmask.nii.gz")
//!     .expect("image and mask should share their geometry");
//! println!("{}", out_file.display());
//! ```
//!
//! ## Splitting and merging in memory
//!
//! ```no_run
//! # use volume_ops::{io, SeriesMerger, SeriesSplitter};
//! let image = io::load("sub-01_bold.nii.gz").expect("should have loaded image");
//! let series = SeriesSplitter::new().split(image).expect("should be a 4D image");
//! let merged = SeriesMerger::new()
//!     .merge(series)
//!     .expect("frames should share their geometry");
//! assert_eq!(merged.ndim(), 4);
//! ```

pub mod enums;
pub mod error;
pub mod io;
pub mod naming;
pub mod ops;
pub mod volume;

pub use enums::{DataType, FormatKind, SortBy};
pub use error::{Error, IoError, Result, TransformError};
pub use ops::{Binarized, Binarizer, MaskApplier, SeriesMerger, SeriesSplitter};
pub use volume::{Affine, Header, ImageSeries, Mask, Tolerance, VolumetricImage};
