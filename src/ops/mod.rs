//! The four volume transforms.
//!
//! Each component is a small builder over its options. The in-memory call
//! (`apply`, `binarize`, `split`, `merge`) validates and computes without
//! touching the filesystem. The `run` driver loads its inputs, calls the
//! in-memory step and only then stages and commits every output, so a failed
//! validation never leaves a file behind.

mod binarize;
mod mask;
mod merge;
mod split;

pub use binarize::{Binarized, Binarizer};
pub use mask::MaskApplier;
pub use merge::SeriesMerger;
pub use split::SeriesSplitter;

use std::path::{Path, PathBuf};

use crate::error::IoError;

/// Directory for outputs that default to the working directory
pub(crate) fn working_dir(out_dir: Option<&Path>) -> Result<PathBuf, IoError> {
    match out_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}
