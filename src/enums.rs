use std::path::Path;

use crate::error::IoError;
use crate::io::{ImageFormat, dicom::DicomSeriesFormat, nifti::NiftiFormat};

/// On-disk voxel type recorded in an image header.
///
/// Voxels are always held as `f64` in memory; the tag decides what they are
/// converted to when the image is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Float64,
}

/// The concrete image format an image was loaded from.
///
/// Derived images keep the format of their source, so writing an output goes
/// through the same factory that read the input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatKind {
    #[default]
    Nifti,
    DicomSeries,
}

impl FormatKind {
    /// Pick the format for `path`: directories are DICOM series, `.nii` and
    /// `.nii.gz` files are NIfTI.
    pub fn detect(path: &Path) -> Result<Self, IoError> {
        if path.is_dir() {
            return Ok(FormatKind::DicomSeries);
        }
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Ok(FormatKind::Nifti)
        } else {
            Err(IoError::UnknownFormat(path.to_path_buf()))
        }
    }

    pub fn factory(self) -> &'static dyn ImageFormat {
        match self {
            FormatKind::Nifti => &NiftiFormat,
            FormatKind::DicomSeries => &DicomSeriesFormat::DEFAULT,
        }
    }
}

/// Slice ordering used when assembling a DICOM series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SortBy {
    /// Position along the slice normal
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    /// Keep file name order
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_nifti_by_extension() {
        assert_eq!(
            FormatKind::detect(Path::new("sub-01_bold.nii.gz")).unwrap(),
            FormatKind::Nifti
        );
        assert_eq!(
            FormatKind::detect(Path::new("T1w.NII")).unwrap(),
            FormatKind::Nifti
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = FormatKind::detect(Path::new("scan.mgz")).unwrap_err();
        assert!(matches!(err, IoError::UnknownFormat(_)));
    }

    #[test]
    fn sort_order_parses_from_command_line_names() {
        use clap::ValueEnum;
        assert_eq!(
            SortBy::from_str("instance-number", true).unwrap(),
            SortBy::InstanceNumber
        );
        assert_eq!(SortBy::from_str("none", true).unwrap(), SortBy::None);
        assert_eq!(
            SortBy::from_str("image-position-patient", true).unwrap(),
            SortBy::default()
        );
    }
}
