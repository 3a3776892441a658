//! Output file naming.
//!
//! Downstream consumers match on these suffixes, so they are fixed.

use std::path::{Path, PathBuf};

pub const MASKED_SUFFIX: &str = "_masked";
pub const MASK_SUFFIX: &str = "_mask";
pub const MERGED_SUFFIX: &str = "_merged";

/// Extensions that are split off as a whole
const COMPOUND_EXTENSIONS: [&str; 3] = [".nii.gz", ".tar.gz", ".niml.dset"];

/// Zero-padded position of a frame within a series
pub fn frame_label(index: usize) -> String {
    format!("{index:03}")
}

/// Suffix naming the `index`-th frame of a split series
pub fn index_suffix(index: usize) -> String {
    format!("_idx-{}", frame_label(index))
}

/// Split `path` into its directory, file stem and extension, treating
/// `.nii.gz` and similar as a single extension.
pub fn split_filename(path: &Path) -> (PathBuf, String, String) {
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let lower = name.to_ascii_lowercase();
    if let Some(ext) = COMPOUND_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext) && lower.len() > ext.len())
    {
        let (stem, ext) = name.split_at(name.len() - ext.len());
        return (dir, stem.to_string(), ext.to_string());
    }

    match name.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, ext) = name.split_at(dot);
            (dir, stem.to_string(), ext.to_string())
        }
        _ => (dir, name, String::new()),
    }
}

/// Insert `suffix` between the stem and extension of `path`.
///
/// The result is placed in `new_dir` when given, next to `path` otherwise.
/// `extension` replaces the input's extension when set.
pub fn fname_presuffix(
    path: &Path,
    suffix: &str,
    new_dir: Option<&Path>,
    extension: Option<&str>,
) -> PathBuf {
    let (dir, stem, ext) = split_filename(path);
    let dir = new_dir.map(Path::to_path_buf).unwrap_or(dir);
    let ext = extension.unwrap_or(&ext);
    dir.join(format!("{stem}{suffix}{ext}"))
}
