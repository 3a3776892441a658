use std::path::Path;

use ::nifti::writer::WriterOptions;
use ::nifti::{IntoNdArray, NiftiHeader, NiftiObject, NiftiType, ReaderOptions, XForm};
use nalgebra::Matrix4;
use ndarray::ArrayD;

use crate::enums::{DataType, FormatKind};
use crate::error::IoError;
use crate::io::{ImageFormat, ImageHandle};
use crate::volume::{Affine, Header, VolumetricImage};

/// NIfTI-1 files, plain or gzipped.
pub struct NiftiFormat;

impl ImageFormat for NiftiFormat {
    fn kind(&self) -> FormatKind {
        FormatKind::Nifti
    }

    fn open(&self, path: &Path) -> Result<ImageHandle, IoError> {
        let header = NiftiHeader::from_file(path)?;
        let dtype = data_type(&header)?;
        Ok(ImageHandle::new(
            path.to_path_buf(),
            vec![path.to_path_buf()],
            FormatKind::Nifti,
            shape_of(&header),
            affine_of(&header),
            Header {
                dtype,
                nifti: Some(Box::new(header)),
            },
        ))
    }

    fn read(&self, handle: &ImageHandle) -> Result<VolumetricImage, IoError> {
        let object = ReaderOptions::new().read_file(handle.path())?;
        let data: ArrayD<f64> = object.into_volume().into_ndarray()?;
        if data.shape() != handle.shape() {
            return Err(IoError::InconsistentDimensions);
        }
        Ok(VolumetricImage::new(
            data,
            *handle.affine(),
            handle.header().clone(),
            FormatKind::Nifti,
        ))
    }

    fn write(&self, image: &VolumetricImage, path: &Path) -> Result<(), IoError> {
        let header = output_header(image);
        let options = WriterOptions::new(path).reference_header(&header);
        let data = image.data();
        match image.header().dtype {
            DataType::Uint8 => options.write_nifti(&cast::<u8>(data)),
            DataType::Int8 => options.write_nifti(&cast::<i8>(data)),
            DataType::Uint16 => options.write_nifti(&cast::<u16>(data)),
            DataType::Int16 => options.write_nifti(&cast::<i16>(data)),
            DataType::Uint32 => options.write_nifti(&cast::<u32>(data)),
            DataType::Int32 => options.write_nifti(&cast::<i32>(data)),
            DataType::Uint64 => options.write_nifti(&cast::<u64>(data)),
            DataType::Int64 => options.write_nifti(&cast::<i64>(data)),
            DataType::Float32 => options.write_nifti(&cast::<f32>(data)),
            DataType::Float64 => options.write_nifti(data),
        }?;
        Ok(())
    }

    fn output_extension(&self) -> Option<&'static str> {
        None
    }
}

fn shape_of(header: &NiftiHeader) -> Vec<usize> {
    let ndim = (header.dim[0] as usize).clamp(1, 7);
    header.dim[1..=ndim].iter().map(|&d| d as usize).collect()
}

fn data_type(header: &NiftiHeader) -> Result<DataType, IoError> {
    let dtype = match header.data_type() {
        Ok(NiftiType::Uint8) => DataType::Uint8,
        Ok(NiftiType::Int8) => DataType::Int8,
        Ok(NiftiType::Uint16) => DataType::Uint16,
        Ok(NiftiType::Int16) => DataType::Int16,
        Ok(NiftiType::Uint32) => DataType::Uint32,
        Ok(NiftiType::Int32) => DataType::Int32,
        Ok(NiftiType::Uint64) => DataType::Uint64,
        Ok(NiftiType::Int64) => DataType::Int64,
        Ok(NiftiType::Float32) => DataType::Float32,
        Ok(NiftiType::Float64) => DataType::Float64,
        _ => return Err(IoError::UnsupportedDataType(header.datatype)),
    };
    Ok(dtype)
}

/// Voxel to world transform: sform when set, then qform, then plain voxel
/// scaling.
pub(crate) fn affine_of(header: &NiftiHeader) -> Affine {
    if header.sform_code > 0 {
        let row = |r: [f32; 4]| r.map(f64::from);
        return Affine([
            row(header.srow_x),
            row(header.srow_y),
            row(header.srow_z),
            [0.0, 0.0, 0.0, 1.0],
        ]);
    }

    let dx = f64::from(header.pixdim[1]);
    let dy = f64::from(header.pixdim[2]);
    let dz = f64::from(header.pixdim[3]);

    if header.qform_code > 0 {
        let b = f64::from(header.quatern_b);
        let c = f64::from(header.quatern_c);
        let d = f64::from(header.quatern_d);
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let dz = dz * qfac;

        return Affine([
            [
                (a * a + b * b - c * c - d * d) * dx,
                2.0 * (b * c - a * d) * dy,
                2.0 * (b * d + a * c) * dz,
                f64::from(header.quatern_x),
            ],
            [
                2.0 * (b * c + a * d) * dx,
                (a * a + c * c - b * b - d * d) * dy,
                2.0 * (c * d - a * b) * dz,
                f64::from(header.quatern_y),
            ],
            [
                2.0 * (b * d - a * c) * dx,
                2.0 * (c * d + a * b) * dy,
                (a * a + d * d - b * b - c * c) * dz,
                f64::from(header.quatern_z),
            ],
            [0.0, 0.0, 0.0, 1.0],
        ]);
    }

    Affine::from_zooms([dx, dy, dz])
}

/// Header written alongside `image`: the source header (if any) with the
/// image's affine stored in both the sform and the qform. Existing xform codes
/// are kept, unset ones become scanner-anatomical.
fn output_header(image: &VolumetricImage) -> NiftiHeader {
    let mut header = image
        .header()
        .nifti
        .as_deref()
        .cloned()
        .unwrap_or_default();

    let rows = image.affine().rows();
    let affine = Matrix4::from_fn(|r, c| rows[r][c]);
    let sform_code = xform_or_scanner(header.sform());
    let qform_code = xform_or_scanner(header.qform());
    header.set_sform(&affine, sform_code);
    let zooms = image.affine().zooms();
    if zooms.iter().all(|zoom| zoom.is_finite() && *zoom > 0.0) {
        // also refreshes pixdim from the affine's zooms
        header.set_qform(&affine, qform_code);
    } else {
        header.qform_code = XForm::Unknown as i16;
        for (i, zoom) in zooms.into_iter().enumerate() {
            header.pixdim[i + 1] = zoom as f32;
        }
    }

    // voxels were already scaled on read
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    header
}

fn xform_or_scanner(code: Result<XForm, ::nifti::NiftiError>) -> XForm {
    match code {
        Ok(XForm::Unknown) | Err(_) => XForm::ScannerAnat,
        Ok(code) => code,
    }
}

trait FromVoxel: Copy {
    fn from_voxel(value: f64) -> Self;
}

macro_rules! integer_voxel {
    ($($t:ty),*) => {
        $(impl FromVoxel for $t {
            #[inline]
            fn from_voxel(value: f64) -> Self {
                // `as` saturates and maps NaN to 0
                value.round() as $t
            }
        })*
    };
}

integer_voxel!(u8, i8, u16, i16, u32, i32, u64, i64);

impl FromVoxel for f32 {
    #[inline]
    fn from_voxel(value: f64) -> Self {
        value as f32
    }
}

fn cast<T: FromVoxel>(data: &ArrayD<f64>) -> ArrayD<T> {
    data.mapv(T::from_voxel)
}
