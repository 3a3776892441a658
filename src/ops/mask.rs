use std::path::{Path, PathBuf};

use tracing::{Span, debug, info};

use crate::enums::SortBy;
use crate::error::{Result, TransformError};
use crate::io::{self, StagedOutputs};
use crate::naming::MASKED_SUFFIX;
use crate::ops::working_dir;
use crate::volume::{Affine, Mask, Tolerance, VolumetricImage};

/// Zeroes every voxel of an image that falls outside a mask.
///
/// The mask image is binarized with `value > threshold`. A 3D mask applied to
/// a 4D image is repeated over the fourth axis.
pub struct MaskApplier {
    threshold: f64,
    tolerance: Tolerance,
    out_dir: Option<PathBuf>,
    sort_by: SortBy,
    span: Span,
}

impl Default for MaskApplier {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            tolerance: Tolerance::default(),
            out_dir: None,
            sort_by: SortBy::default(),
            span: Span::current(),
        }
    }
}

impl MaskApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Where `run` writes its output, the working directory by default
    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    /// Slice order for inputs read from DICOM series
    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Check that `mask` can be applied to an image of the given shape and
    /// affine.
    pub fn validate(&self, shape: &[usize], affine: &Affine, mask: &Mask) -> Result<(), TransformError> {
        if !mask.fits(shape) {
            return Err(TransformError::ShapeMismatch {
                image: shape.to_vec(),
                mask: mask.shape().to_vec(),
            });
        }
        if !affine.is_close(mask.affine(), &self.tolerance) {
            return Err(TransformError::GeometryMismatch(format!(
                "image and mask affines differ by up to {:e}",
                affine.max_abs_diff(mask.affine())
            )));
        }
        Ok(())
    }

    pub fn apply(&self, image: &VolumetricImage, mask: &VolumetricImage) -> Result<VolumetricImage, TransformError> {
        let _entered = self.span.enter();
        let mask = Mask::from_image(mask, self.threshold);
        self.validate(image.shape(), image.affine(), &mask)?;
        Ok(self.mask_voxels(image, &mask))
    }

    fn mask_voxels(&self, image: &VolumetricImage, mask: &Mask) -> VolumetricImage {
        let mut data = image.data().clone();
        let fits = mask.multiply(&mut data);
        debug_assert!(fits, "mask shape validated before multiplying");
        debug!(inside = mask.count(), total = mask.data().len(), "applied mask");
        image.with_data(data)
    }

    /// Mask `in_file` with `in_mask` and write `<in_file>_masked`.
    ///
    /// The image voxels are only read once the mask has been validated
    /// against the image header.
    pub fn run(&self, in_file: impl AsRef<Path>, in_mask: impl AsRef<Path>) -> Result<PathBuf> {
        let (in_file, in_mask) = (in_file.as_ref(), in_mask.as_ref());
        let _entered = self.span.enter();
        info!(image = %in_file.display(), mask = %in_mask.display(), threshold = self.threshold, "masking image");

        let handle = io::open_with(in_file, self.sort_by)?;
        let mask = Mask::from_image(&io::load_with(in_mask, self.sort_by)?, self.threshold);
        self.validate(handle.shape(), handle.affine(), &mask)?;

        let masked = self.mask_voxels(&handle.load()?, &mask);

        let out_dir = working_dir(self.out_dir.as_deref())?;
        let out_file = io::output_path(in_file, handle.format(), MASKED_SUFFIX, Some(&out_dir));
        let mut outputs = StagedOutputs::new();
        outputs.stage(&masked, out_file.clone())?;
        outputs.commit()?;
        info!(out_file = %out_file.display(), "wrote masked image");
        Ok(out_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::FormatKind;
    use crate::volume::Header;
    use ndarray::{ArrayD, IxDyn, s};

    fn volume(data: ArrayD<f64>, affine: Affine) -> VolumetricImage {
        VolumetricImage::new(data, affine, Header::default(), FormatKind::Nifti)
    }

    fn ones(shape: &[usize]) -> VolumetricImage {
        volume(ArrayD::ones(IxDyn(shape)), Affine::identity())
    }

    fn half_planes_mask() -> VolumetricImage {
        let mut data = ArrayD::zeros(IxDyn(&[10, 10, 10]));
        data.slice_mut(s![..5, .., ..]).fill(0.9);
        data.slice_mut(s![5.., .., ..]).fill(0.5);
        volume(data, Affine::identity())
    }

    #[test]
    fn zeroes_voxels_outside_first_five_planes() {
        let masked = MaskApplier::new()
            .apply(&ones(&[10, 10, 10]), &half_planes_mask())
            .unwrap();
        assert_eq!(masked.shape(), &[10, 10, 10]);
        assert!(masked.data().slice(s![..5, .., ..]).iter().all(|&v| v == 1.0));
        // 0.5 is not strictly above the threshold
        assert!(masked.data().slice(s![5.., .., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn keeps_image_values_inside_mask() {
        let image = volume(
            ArrayD::from_shape_fn(IxDyn(&[3, 3, 3]), |idx| (idx[0] * 9 + idx[1] * 3 + idx[2]) as f64),
            Affine::identity(),
        );
        let mask = volume(
            ArrayD::from_shape_fn(IxDyn(&[3, 3, 3]), |idx| idx[2] as f64),
            Affine::identity(),
        );
        let masked = MaskApplier::new().threshold(1.0).apply(&image, &mask).unwrap();
        for (idx, &value) in masked.data().indexed_iter() {
            let expected = if idx[2] > 1 { image.data()[&idx] } else { 0.0 };
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn broadcasts_3d_mask_over_4d_image() {
        let masked = MaskApplier::new()
            .apply(&ones(&[10, 10, 10, 4]), &half_planes_mask())
            .unwrap();
        assert_eq!(masked.shape(), &[10, 10, 10, 4]);
        assert_eq!(masked.data()[[4, 0, 0, 3]], 1.0);
        assert_eq!(masked.data()[[5, 0, 0, 3]], 0.0);
    }

    #[test]
    fn output_keeps_image_affine() {
        let affine = Affine::from_zooms([2.0, 2.0, 2.0]);
        let image = volume(ArrayD::ones(IxDyn(&[2, 2, 2])), affine);
        // within the default tolerance
        let mut mask_affine = affine;
        mask_affine.0[0][3] += 1e-9;
        let mask = volume(ArrayD::ones(IxDyn(&[2, 2, 2])), mask_affine);
        let masked = MaskApplier::new().apply(&image, &mask).unwrap();
        assert_eq!(masked.affine(), &affine);
    }

    #[test]
    fn spatial_shape_mismatch_is_rejected() {
        let err = MaskApplier::new()
            .apply(&ones(&[10, 10, 10]), &ones(&[10, 10, 9]))
            .unwrap_err();
        assert!(matches!(err, TransformError::ShapeMismatch { .. }));

        let err = MaskApplier::new()
            .apply(&ones(&[10, 10, 10, 2]), &ones(&[10, 10, 10, 3]))
            .unwrap_err();
        assert!(matches!(err, TransformError::ShapeMismatch { .. }));

        // a mask only ever covers the three spatial axes
        let err = MaskApplier::new()
            .apply(&ones(&[10, 10, 10, 3]), &ones(&[10, 10, 10, 3]))
            .unwrap_err();
        assert!(matches!(err, TransformError::ShapeMismatch { .. }));
    }

    #[test]
    fn affine_mismatch_is_rejected() {
        let mask = volume(ArrayD::ones(IxDyn(&[4, 4, 4])), Affine::from_zooms([1.0, 1.0, 1.1]));
        let err = MaskApplier::new().apply(&ones(&[4, 4, 4]), &mask).unwrap_err();
        assert!(matches!(err, TransformError::GeometryMismatch(_)));
    }

    #[test]
    fn looser_tolerance_accepts_small_shifts() {
        let mask = volume(ArrayD::ones(IxDyn(&[4, 4, 4])), Affine::from_zooms([1.0, 1.0, 1.01]));
        let applier = MaskApplier::new().tolerance(Tolerance::new(0.0, 0.05));
        assert!(applier.apply(&ones(&[4, 4, 4]), &mask).is_ok());
    }
}
