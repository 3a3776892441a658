use std::path::PathBuf;

use thiserror::Error;

/// Validation failures of the four volume transforms.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Image and mask sizes do not match: image {image:?}, mask {mask:?}")]
    ShapeMismatch { image: Vec<usize>, mask: Vec<usize> },

    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("Input image is {ndim}D, expected {expected}")]
    DimensionError { ndim: usize, expected: &'static str },

    #[error("No input images to merge")]
    EmptySeries,
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("Unknown image format: {0}")]
    UnknownFormat(PathBuf),

    #[error("Unsupported NIfTI datatype code {0}")]
    UnsupportedDataType(i16),

    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing DICOM attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Voxel data does not fit the declared shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("DICOM pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    #[error("Could not move staged output into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Io(#[from] IoError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
