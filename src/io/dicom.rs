//! Directories of single-frame DICOM slices read as one 3D volume.
//!
//! Slices are assumed to come from the same series and acquisition. DICOM
//! output is not produced: images loaded from a series are written as
//! gzipped NIfTI.

use std::fs;
use std::path::{Path, PathBuf};

use ::dicom::object::{DefaultDicomObject, OpenFileOptions, open_file};
use ::dicom::pixeldata::PixelDecoder;
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use tracing::debug;

use crate::enums::{DataType, FormatKind, SortBy};
use crate::error::IoError;
use crate::io::{ImageFormat, ImageHandle, nifti::NiftiFormat};
use crate::volume::{Affine, Header, VolumetricImage};

const DEFAULT_ORIENTATION: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

#[derive(Default)]
pub struct DicomSeriesFormat {
    pub sort_by: SortBy,
}

/// Header attributes of one slice
struct SliceInfo {
    path: PathBuf,
    rows: u32,
    columns: u32,
    position: Option<[f64; 3]>,
    instance_number: Option<i32>,
}

impl ImageFormat for DicomSeriesFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::DicomSeries
    }

    fn open(&self, path: &Path) -> Result<ImageHandle, IoError> {
        let paths = Self::slice_paths(path)?;

        let headers: Vec<DefaultDicomObject> = paths
            .par_iter()
            .map(|path| OpenFileOptions::new().read_until(tags::PIXEL_DATA).open_file(path))
            .collect::<Result<_, _>>()?;

        let orientation = headers
            .first()
            .and_then(|object| get_floats(object, tags::IMAGE_ORIENTATION_PATIENT))
            .filter(|values| values.len() == 6)
            .map(|values| [values[0], values[1], values[2], values[3], values[4], values[5]])
            .unwrap_or(DEFAULT_ORIENTATION);
        let row_dir = [orientation[0], orientation[1], orientation[2]];
        let col_dir = [orientation[3], orientation[4], orientation[5]];
        let normal = cross(row_dir, col_dir);

        let mut slices: Vec<SliceInfo> = paths
            .into_iter()
            .zip(&headers)
            .map(|(path, object)| Self::slice_info(path, object))
            .collect::<Result<_, _>>()?;
        Self::sort_slices(&mut slices, self.sort_by, normal);
        Self::validate_dimensions(&slices)?;

        let pixel_spacing = headers
            .first()
            .and_then(|object| get_floats(object, tags::PIXEL_SPACING))
            .filter(|values| values.len() == 2)
            .ok_or(IoError::MissingAttribute("PixelSpacing"))?;
        let slice_thickness = headers
            .first()
            .and_then(|object| object.element(tags::SLICE_THICKNESS).ok()?.to_float64().ok());

        let first = &slices[0];
        let slice_step = Self::slice_step(&slices, normal, slice_thickness)?;
        let origin = first.position.unwrap_or_default();

        let affine = Self::ras_affine(
            row_dir.map(|v| v * pixel_spacing[1]),
            col_dir.map(|v| v * pixel_spacing[0]),
            slice_step,
            origin,
        );

        let shape = vec![first.columns as usize, first.rows as usize, slices.len()];
        debug!(path = %path.display(), ?shape, "opened DICOM series");

        Ok(ImageHandle::new(
            path.to_path_buf(),
            slices.into_iter().map(|slice| slice.path).collect(),
            FormatKind::DicomSeries,
            shape,
            affine,
            Header::new(DataType::Float32),
        ))
    }

    fn read(&self, handle: &ImageHandle) -> Result<VolumetricImage, IoError> {
        let decoded: Vec<Array2<f64>> = handle
            .sources()
            .par_iter()
            .map(|path| Self::decode_slice(path))
            .collect::<Result<_, _>>()?;

        let (width, height, depth) = match handle.shape() {
            &[width, height, depth] => (width, height, depth),
            _ => return Err(IoError::InconsistentDimensions),
        };
        if decoded.len() != depth || decoded.iter().any(|slice| slice.dim() != (width, height)) {
            return Err(IoError::InconsistentDimensions);
        }

        let mut volume = Array3::<f64>::zeros((width, height, depth));
        for (k, slice) in decoded.iter().enumerate() {
            volume.slice_mut(s![.., .., k]).assign(slice);
        }

        Ok(VolumetricImage::new(
            volume.into_dyn(),
            *handle.affine(),
            handle.header().clone(),
            FormatKind::DicomSeries,
        ))
    }

    fn write(&self, image: &VolumetricImage, path: &Path) -> Result<(), IoError> {
        NiftiFormat.write(image, path)
    }

    fn output_extension(&self) -> Option<&'static str> {
        Some(".nii.gz")
    }
}

impl DicomSeriesFormat {
    pub const DEFAULT: Self = Self {
        sort_by: SortBy::ImagePositionPatient,
    };

    pub fn new(sort_by: SortBy) -> Self {
        Self { sort_by }
    }

    fn slice_paths(dir: &Path) -> Result<Vec<PathBuf>, IoError> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(IoError::NoValidImages);
        }
        paths.sort();
        Ok(paths)
    }

    fn slice_info(path: PathBuf, object: &DefaultDicomObject) -> Result<SliceInfo, IoError> {
        let rows = object
            .element(tags::ROWS)
            .ok()
            .and_then(|element| element.to_int::<u32>().ok())
            .ok_or(IoError::MissingAttribute("Rows"))?;
        let columns = object
            .element(tags::COLUMNS)
            .ok()
            .and_then(|element| element.to_int::<u32>().ok())
            .ok_or(IoError::MissingAttribute("Columns"))?;
        let position = get_floats(object, tags::IMAGE_POSITION_PATIENT)
            .filter(|values| values.len() == 3)
            .map(|values| [values[0], values[1], values[2]]);
        let instance_number = object
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|element| element.to_int::<i32>().ok());

        Ok(SliceInfo {
            path,
            rows,
            columns,
            position,
            instance_number,
        })
    }

    fn sort_slices(slices: &mut [SliceInfo], sort_by: SortBy, normal: [f64; 3]) {
        match sort_by {
            SortBy::ImagePositionPatient => slices.sort_by(|a, b| {
                let a = a.position.map(|p| dot(p, normal));
                let b = b.position.map(|p| dot(p, normal));
                a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
            }),
            SortBy::InstanceNumber => slices.sort_by_key(|slice| slice.instance_number),
            SortBy::None => {}
        }
    }

    fn validate_dimensions(slices: &[SliceInfo]) -> Result<(), IoError> {
        let first = slices.first().ok_or(IoError::NoValidImages)?;
        if slices
            .iter()
            .any(|slice| (slice.rows, slice.columns) != (first.rows, first.columns))
        {
            return Err(IoError::InconsistentDimensions);
        }
        Ok(())
    }

    /// World-space step between consecutive slices, taken from the first and
    /// last slice positions, or along the normal by the slice thickness.
    fn slice_step(
        slices: &[SliceInfo],
        normal: [f64; 3],
        slice_thickness: Option<f64>,
    ) -> Result<[f64; 3], IoError> {
        let first = slices.first().and_then(|slice| slice.position);
        let last = slices.last().and_then(|slice| slice.position);
        if let (Some(first), Some(last), true) = (first, last, slices.len() > 1) {
            let n = (slices.len() - 1) as f64;
            let step = [0, 1, 2].map(|i| (last[i] - first[i]) / n);
            if step.iter().any(|v| *v != 0.0) {
                return Ok(step);
            }
        }
        let thickness = slice_thickness.ok_or(IoError::MissingAttribute("SliceThickness"))?;
        Ok(normal.map(|v| v * thickness))
    }

    /// First frame of one slice, as (column, row)
    /// Voxel to RAS affine from the LPS columns: along a row, down a column,
    /// across slices, then the first slice's position.
    fn ras_affine(x_axis: [f64; 3], y_axis: [f64; 3], z_axis: [f64; 3], origin: [f64; 3]) -> Affine {
        let mut affine = [[0.0; 4]; 4];
        for r in 0..3 {
            affine[r] = [x_axis[r], y_axis[r], z_axis[r], origin[r]];
        }
        affine[3][3] = 1.0;
        // LPS to RAS
        for value in affine[..2].iter_mut().flatten() {
            *value = -*value;
        }
        Affine(affine)
    }

    fn decode_slice(path: &Path) -> Result<Array2<f64>, IoError> {
        let object = open_file(path)?;
        let pixel_data = object.decode_pixel_data()?;
        let pixels = pixel_data.to_ndarray::<f32>()?;
        Ok(pixels
            .slice_move(s![0, .., .., 0])
            .reversed_axes()
            .mapv(f64::from))
    }
}

fn get_floats(object: &DefaultDicomObject, tag: ::dicom::core::Tag) -> Option<Vec<f64>> {
    object.element(tag).ok()?.to_multi_float64().ok()
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
