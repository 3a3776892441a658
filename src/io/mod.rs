//! Reading and writing volumes.
//!
//! Every format implements [`ImageFormat`]. The format is picked once, when an
//! input is opened, and travels with the image so outputs are written by the
//! same factory.

pub mod dicom;
pub mod nifti;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::enums::{FormatKind, SortBy};
use crate::error::IoError;
use crate::io::dicom::DicomSeriesFormat;
use crate::naming::{fname_presuffix, split_filename};
use crate::volume::{Affine, Header, VolumetricImage, spatial};

pub trait ImageFormat: Sync {
    fn kind(&self) -> FormatKind;

    /// Read shape, affine and header without decoding voxel data
    fn open(&self, path: &Path) -> Result<ImageHandle, IoError>;

    /// Decode the voxels behind `handle` as `f64`
    fn read(&self, handle: &ImageHandle) -> Result<VolumetricImage, IoError>;

    fn write(&self, image: &VolumetricImage, path: &Path) -> Result<(), IoError>;

    /// Extension given to derived outputs, `None` to keep the input's
    fn output_extension(&self) -> Option<&'static str>;
}

/// An opened image whose voxels have not been read yet.
#[derive(Clone, Debug)]
pub struct ImageHandle {
    path: PathBuf,
    sources: Vec<PathBuf>,
    format: FormatKind,
    shape: Vec<usize>,
    affine: Affine,
    header: Header,
}

impl ImageHandle {
    pub(crate) fn new(
        path: PathBuf,
        sources: Vec<PathBuf>,
        format: FormatKind,
        shape: Vec<usize>,
        affine: Affine,
        header: Header,
    ) -> Self {
        Self {
            path,
            sources,
            format,
            shape,
            affine,
            header,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Files holding the voxel data, in volume order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn format(&self) -> FormatKind {
        self.format
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn spatial_shape(&self) -> &[usize] {
        spatial(&self.shape)
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn load(&self) -> Result<VolumetricImage, IoError> {
        debug!(path = %self.path.display(), shape = ?self.shape, "reading voxel data");
        self.format.factory().read(self)
    }
}

pub fn open(path: impl AsRef<Path>) -> Result<ImageHandle, IoError> {
    open_with(path, SortBy::default())
}

/// Like [`open`], assembling DICOM series in `sort_by` order.
pub fn open_with(path: impl AsRef<Path>, sort_by: SortBy) -> Result<ImageHandle, IoError> {
    let path = path.as_ref();
    let dicom = DicomSeriesFormat::new(sort_by);
    let format: &dyn ImageFormat = match FormatKind::detect(path)? {
        FormatKind::DicomSeries => &dicom,
        kind => kind.factory(),
    };
    debug!(path = %path.display(), format = ?format.kind(), ?sort_by, "opening image");
    format.open(path)
}

pub fn load(path: impl AsRef<Path>) -> Result<VolumetricImage, IoError> {
    open(path)?.load()
}

pub fn load_with(path: impl AsRef<Path>, sort_by: SortBy) -> Result<VolumetricImage, IoError> {
    open_with(path, sort_by)?.load()
}

pub fn save(image: &VolumetricImage, path: impl AsRef<Path>) -> Result<(), IoError> {
    image.format().factory().write(image, path.as_ref())
}

/// Name of an output derived from `input`, in `out_dir` when given.
pub fn output_path(input: &Path, format: FormatKind, suffix: &str, out_dir: Option<&Path>) -> PathBuf {
    fname_presuffix(input, suffix, out_dir, format.factory().output_extension())
}

/// Outputs written to temporary files next to their destination and moved
/// into place together by [`StagedOutputs::commit`].
///
/// Dropping the batch without committing removes the temporary files.
#[derive(Default)]
pub struct StagedOutputs {
    staged: Vec<(NamedTempFile, PathBuf)>,
}

impl StagedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, image: &VolumetricImage, destination: PathBuf) -> Result<(), IoError> {
        let dir = match destination.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        // the writer picks compression from the extension
        let (_, _, extension) = split_filename(&destination);
        let temp = tempfile::Builder::new()
            .prefix(".staged-")
            .suffix(&extension)
            .tempfile_in(&dir)?;
        save(image, temp.path())?;

        debug!(destination = %destination.display(), "staged output");
        self.staged.push((temp, destination));
        Ok(())
    }

    pub fn commit(self) -> Result<Vec<PathBuf>, IoError> {
        let mut written = Vec::with_capacity(self.staged.len());
        for (temp, destination) in self.staged {
            temp.persist(&destination)?;
            written.push(destination);
        }
        Ok(written)
    }
}
