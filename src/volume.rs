use crate::enums::{DataType, FormatKind};
use crate::error::TransformError;
use crate::naming::frame_label;

use ndarray::{ArrayD, Axis, Zip};
use nifti::NiftiHeader;

/// Numeric tolerance used whenever two affines are compared.
///
/// Two values `a` and `b` are close when `|a - b| <= atol + rtol * |b|`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: 1e-5,
            atol: 1e-8,
        }
    }
}

impl Tolerance {
    pub fn new(rtol: f64, atol: f64) -> Self {
        Self { rtol, atol }
    }

    #[inline]
    pub fn close(&self, a: f64, b: f64) -> bool {
        if a.is_finite() && b.is_finite() {
            (a - b).abs() <= self.atol + self.rtol * b.abs()
        } else {
            a == b
        }
    }
}

/// Voxel to world transform, row-major.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine(pub [[f64; 4]; 4]);

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn identity() -> Self {
        Self::from_zooms([1.0, 1.0, 1.0])
    }

    /// Diagonal affine with the given voxel sizes and no translation
    pub fn from_zooms(zooms: [f64; 3]) -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, zoom) in zooms.into_iter().enumerate() {
            m[i][i] = zoom;
        }
        m[3][3] = 1.0;
        Self(m)
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.0
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.0[0][3], self.0[1][3], self.0[2][3]]
    }

    /// Voxel sizes, the norms of the first three columns
    pub fn zooms(&self) -> [f64; 3] {
        let m = &self.0;
        [0, 1, 2].map(|col| (0..3).map(|row| m[row][col].powi(2)).sum::<f64>().sqrt())
    }

    pub fn is_close(&self, other: &Affine, tolerance: &Tolerance) -> bool {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .all(|(&a, &b)| tolerance.close(a, b))
    }

    pub fn max_abs_diff(&self, other: &Affine) -> f64 {
        self.0
            .iter()
            .flatten()
            .zip(other.0.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// Header metadata travelling with an image.
///
/// `nifti` keeps the original NIfTI header so that fields the transforms do
/// not touch (units, intent, descriptions, TR) survive a round trip.
#[derive(Clone, Debug)]
pub struct Header {
    pub dtype: DataType,
    pub nifti: Option<Box<NiftiHeader>>,
}

impl Header {
    pub fn new(dtype: DataType) -> Self {
        Self { dtype, nifti: None }
    }

    pub fn with_dtype(&self, dtype: DataType) -> Self {
        Self {
            dtype,
            nifti: self.nifti.clone(),
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new(DataType::Float64)
    }
}

#[derive(Clone, Debug)]
pub struct VolumetricImage {
    data: ArrayD<f64>,
    affine: Affine,
    header: Header,
    format: FormatKind,
}

impl VolumetricImage {
    pub fn new(data: ArrayD<f64>, affine: Affine, header: Header, format: FormatKind) -> Self {
        Self {
            data,
            affine,
            header,
            format,
        }
    }

    /// Build a new image of the same format, affine and header around `data`
    pub fn with_data(&self, data: ArrayD<f64>) -> Self {
        Self {
            data,
            affine: self.affine,
            header: self.header.clone(),
            format: self.format,
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn format(&self) -> FormatKind {
        self.format
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Sizes of the first three axes
    pub fn spatial_shape(&self) -> &[usize] {
        spatial(self.shape())
    }

    /// Drop trailing length-1 axes beyond the third.
    ///
    /// The three spatial axes are kept even when they have length 1, so the
    /// affine stays valid.
    pub fn squeeze(mut self) -> Self {
        while self.data.ndim() > 3 && self.data.shape()[self.data.ndim() - 1] == 1 {
            let last = Axis(self.data.ndim() - 1);
            self.data = self.data.index_axis_move(last, 0);
        }
        self
    }

    /// Slice a 4D image along its last axis, in index order.
    pub fn split_last_axis(&self) -> Result<ImageSeries, TransformError> {
        if self.ndim() != 4 {
            return Err(TransformError::DimensionError {
                ndim: self.ndim(),
                expected: "4",
            });
        }
        let frames = self
            .data
            .axis_iter(Axis(3))
            .map(|frame| self.with_data(frame.to_owned()))
            .collect();
        Ok(ImageSeries::new(frames))
    }
}

pub(crate) fn spatial(shape: &[usize]) -> &[usize] {
    &shape[..shape.len().min(3)]
}

/// Boolean voxel mask obtained with the strict predicate `value > threshold`.
#[derive(Clone, Debug)]
pub struct Mask {
    data: ArrayD<bool>,
    affine: Affine,
}

impl Mask {
    pub fn from_image(image: &VolumetricImage, threshold: f64) -> Self {
        Self {
            data: image.data().mapv(|value| value > threshold),
            affine: *image.affine(),
        }
    }

    pub fn data(&self) -> &ArrayD<bool> {
        &self.data
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn spatial_shape(&self) -> &[usize] {
        spatial(self.shape())
    }

    /// Number of voxels inside the mask
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&inside| inside).count()
    }

    /// Whether the mask lines up with an image of shape `target`: the mask
    /// covers exactly the spatial axes, and is repeated over at most one extra
    /// trailing axis.
    pub fn fits(&self, target: &[usize]) -> bool {
        self.shape() == spatial(target) && target.len() <= self.ndim() + 1
    }

    /// Multiply `data` by the mask, repeating the mask over a trailing axis
    /// when `data` has one more dimension. Returns `false` and leaves `data`
    /// untouched when the shapes do not line up.
    pub fn multiply(&self, data: &mut ArrayD<f64>) -> bool {
        let view = if data.ndim() == self.ndim() + 1 {
            self.data.view().insert_axis(Axis(self.ndim()))
        } else {
            self.data.view()
        };
        let Some(mask) = view.broadcast(data.raw_dim()) else {
            return false;
        };
        Zip::from(data)
            .and(&mask)
            .for_each(|value, &inside| *value *= if inside { 1.0 } else { 0.0 });
        true
    }

    /// Zero every voxel of `data` that falls outside the mask
    pub fn zero_outside(&self, data: &mut ArrayD<f64>) {
        Zip::from(data).and(&self.data).for_each(|value, &inside| {
            if !inside {
                *value = 0.0;
            }
        });
    }

    /// Encode the mask as a {0, 1} image tagged `uint8`, with `source`'s
    /// affine, header and format.
    pub fn to_image(&self, source: &VolumetricImage) -> VolumetricImage {
        let data = self.data.mapv(|inside| if inside { 1.0 } else { 0.0 });
        source
            .with_data(data)
            .with_header(source.header().with_dtype(DataType::Uint8))
    }
}

/// Ordered 3D frames, in acquisition order.
#[derive(Clone, Debug, Default)]
pub struct ImageSeries {
    frames: Vec<VolumetricImage>,
}

impl ImageSeries {
    pub fn new(frames: Vec<VolumetricImage>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[VolumetricImage] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<VolumetricImage> {
        self.frames
    }

    pub fn push(&mut self, frame: VolumetricImage) {
        self.frames.push(frame);
    }

    pub fn extend(&mut self, other: ImageSeries) {
        self.frames.extend(other.frames);
    }

    /// Frames paired with their zero-padded index labels (`000`, `001`, ...)
    pub fn labelled(&self) -> impl Iterator<Item = (String, &VolumetricImage)> {
        self.frames
            .iter()
            .enumerate()
            .map(|(index, frame)| (frame_label(index), frame))
    }

    /// Stack all frames along a new trailing axis.
    ///
    /// Every frame must have the shape and (within `tolerance`) the affine of
    /// the first one. The result takes its affine, header and format from the
    /// first frame.
    pub fn concat(&self, tolerance: &Tolerance) -> Result<VolumetricImage, TransformError> {
        let first = self.frames.first().ok_or(TransformError::EmptySeries)?;

        for (index, frame) in self.frames.iter().enumerate().skip(1) {
            if frame.shape() != first.shape() {
                return Err(TransformError::GeometryMismatch(format!(
                    "frame {} has shape {:?}, expected {:?}",
                    frame_label(index),
                    frame.shape(),
                    first.shape()
                )));
            }
            if !frame.affine().is_close(first.affine(), tolerance) {
                return Err(TransformError::GeometryMismatch(format!(
                    "frame {} affine differs from the first frame by up to {:e}",
                    frame_label(index),
                    frame.affine().max_abs_diff(first.affine())
                )));
            }
        }

        let views: Vec<_> = self.frames.iter().map(|frame| frame.data().view()).collect();
        let stacked = ndarray::stack(Axis(first.ndim()), &views)
            .map_err(|err| TransformError::GeometryMismatch(err.to_string()))?;
        Ok(first.with_data(stacked))
    }
}

impl IntoIterator for ImageSeries {
    type Item = VolumetricImage;
    type IntoIter = std::vec::IntoIter<VolumetricImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, ArrayD, IxDyn};

    fn image(shape: &[usize], fill: f64) -> VolumetricImage {
        VolumetricImage::new(
            ArrayD::from_elem(IxDyn(shape), fill),
            Affine::identity(),
            Header::default(),
            FormatKind::Nifti,
        )
    }

    #[test]
    fn tolerance_follows_relative_and_absolute_terms() {
        let tol = Tolerance::default();
        assert!(tol.close(100.0, 100.0 + 5e-4));
        assert!(!tol.close(100.0, 100.0 + 5e-3));
        assert!(tol.close(0.0, 5e-9));
        assert!(!tol.close(0.0, 5e-8));
        assert!(!tol.close(f64::NAN, f64::NAN));
        assert!(!tol.close(1.0, f64::INFINITY));
        assert!(!tol.close(f64::NEG_INFINITY, -1e300));
        assert!(tol.close(f64::INFINITY, f64::INFINITY));
    }

    #[test]
    fn affine_zooms_are_column_norms() {
        let affine = Affine::from_zooms([2.0, 3.0, 4.0]);
        assert_eq!(affine.zooms(), [2.0, 3.0, 4.0]);
        assert!(affine.is_close(&Affine::from_zooms([2.0, 3.0, 4.0]), &Tolerance::default()));
        assert!(!affine.is_close(&Affine::identity(), &Tolerance::default()));
    }

    #[test]
    fn squeeze_only_drops_trailing_axes() {
        assert_eq!(image(&[4, 5, 6, 1], 0.0).squeeze().shape(), &[4, 5, 6]);
        assert_eq!(image(&[4, 5, 6, 1, 1], 0.0).squeeze().shape(), &[4, 5, 6]);
        assert_eq!(image(&[4, 1, 1], 0.0).squeeze().shape(), &[4, 1, 1]);
        assert_eq!(image(&[4, 5, 6, 2], 0.0).squeeze().shape(), &[4, 5, 6, 2]);
    }

    #[test]
    fn split_last_axis_keeps_order() {
        let data = ArrayD::from_shape_fn(IxDyn(&[2, 2, 2, 3]), |idx| idx[3] as f64);
        let img = image(&[1, 1, 1], 0.0).with_data(data);
        let series = img.split_last_axis().unwrap();
        assert_eq!(series.len(), 3);
        for (i, frame) in series.frames().iter().enumerate() {
            assert_eq!(frame.shape(), &[2, 2, 2]);
            assert!(frame.data().iter().all(|&v| v == i as f64));
        }
        let labels: Vec<_> = series.labelled().map(|(label, _)| label).collect();
        assert_eq!(labels, ["000", "001", "002"]);
    }

    #[test]
    fn split_last_axis_rejects_3d() {
        let err = image(&[2, 2, 2], 0.0).split_last_axis().unwrap_err();
        assert!(matches!(err, TransformError::DimensionError { ndim: 3, .. }));
    }

    #[test]
    fn concat_stacks_along_new_trailing_axis() {
        let series = ImageSeries::new(vec![image(&[2, 3, 4], 1.0), image(&[2, 3, 4], 2.0)]);
        let merged = series.concat(&Tolerance::default()).unwrap();
        assert_eq!(merged.shape(), &[2, 3, 4, 2]);
        assert_eq!(merged.data()[[1, 2, 3, 0]], 1.0);
        assert_eq!(merged.data()[[1, 2, 3, 1]], 2.0);
    }

    #[test]
    fn concat_rejects_mismatched_affines() {
        let shifted = VolumetricImage::new(
            ArrayD::zeros(IxDyn(&[2, 2, 2])),
            Affine::from_zooms([1.0, 1.0, 1.5]),
            Header::default(),
            FormatKind::Nifti,
        );
        let series = ImageSeries::new(vec![image(&[2, 2, 2], 0.0), shifted]);
        let err = series.concat(&Tolerance::default()).unwrap_err();
        assert!(matches!(err, TransformError::GeometryMismatch(_)));
    }

    #[test]
    fn concat_of_nothing_is_an_error() {
        let err = ImageSeries::default().concat(&Tolerance::default()).unwrap_err();
        assert!(matches!(err, TransformError::EmptySeries));
    }

    #[test]
    fn mask_is_strict_and_encodes_as_uint8() {
        let data = Array3::from_shape_fn((2, 2, 1), |(i, j, _)| (i * 2 + j) as f64 * 0.25)
            .into_dyn();
        let img = image(&[1, 1, 1], 0.0).with_data(data);
        let mask = Mask::from_image(&img, 0.25);
        assert_eq!(mask.count(), 2);

        let encoded = mask.to_image(&img);
        assert_eq!(encoded.header().dtype, DataType::Uint8);
        assert_eq!(
            encoded.data().iter().copied().collect::<Vec<_>>(),
            vec![0.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn mask_multiplies_over_trailing_axis() {
        let mut data = ArrayD::from_elem(IxDyn(&[2, 2, 2, 3]), 4.0);
        let source = Array3::from_shape_fn((2, 2, 2), |(i, _, _)| i as f64).into_dyn();
        let mask = Mask::from_image(&image(&[1, 1, 1], 0.0).with_data(source), 0.5);

        assert!(mask.fits(&[2, 2, 2, 3]));
        assert!(!mask.fits(&[3, 2, 2]));
        assert!(!mask.fits(&[2, 2, 2, 3, 2]));
        assert!(mask.multiply(&mut data));
        assert_eq!(data[[0, 1, 1, 2]], 0.0);
        assert_eq!(data[[1, 0, 1, 2]], 4.0);
    }
}
