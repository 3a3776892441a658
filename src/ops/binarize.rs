use std::path::{Path, PathBuf};

use tracing::{Span, debug, info};

use crate::enums::SortBy;
use crate::error::Result;
use crate::io::{self, StagedOutputs};
use crate::naming::{MASK_SUFFIX, MASKED_SUFFIX};
use crate::ops::working_dir;
use crate::volume::{Mask, VolumetricImage};

/// Thresholds an image into a zeroed copy and a `uint8` mask.
pub struct Binarizer {
    thresh_low: f64,
    out_dir: Option<PathBuf>,
    sort_by: SortBy,
    span: Span,
}

/// Result of [`Binarizer::binarize`]
#[derive(Clone, Debug)]
pub struct Binarized {
    /// Input voxels above the threshold, zero elsewhere, input dtype
    pub masked: VolumetricImage,
    /// 1 above the threshold, 0 elsewhere, tagged `uint8`
    pub mask: VolumetricImage,
}

impl Binarizer {
    /// `thresh_low` is exclusive: only voxels strictly above it are kept.
    pub fn new(thresh_low: f64) -> Self {
        Self {
            thresh_low,
            out_dir: None,
            sort_by: SortBy::default(),
            span: Span::current(),
        }
    }

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

    pub fn binarize(&self, image: &VolumetricImage) -> Binarized {
        let _entered = self.span.enter();
        let mask = Mask::from_image(image, self.thresh_low);

        let mut data = image.data().clone();
        mask.zero_outside(&mut data);
        debug!(
            thresh_low = self.thresh_low,
            inside = mask.count(),
            total = data.len(),
            "binarized image"
        );

        Binarized {
            masked: image.with_data(data),
            mask: mask.to_image(image),
        }
    }

    /// Binarize `in_file`, writing `<in_file>_masked` and `<in_file>_mask`.
    ///
    /// Returns the paths of the masked image and of the mask, in that order.
    pub fn run(&self, in_file: impl AsRef<Path>) -> Result<(PathBuf, PathBuf)> {
        let in_file = in_file.as_ref();
        let _entered = self.span.enter();
        info!(image = %in_file.display(), thresh_low = self.thresh_low, "binarizing image");

        let image = io::load_with(in_file, self.sort_by)?;
        let Binarized { masked, mask } = self.binarize(&image);

        let out_dir = working_dir(self.out_dir.as_deref())?;
        let out_file = io::output_path(in_file, image.format(), MASKED_SUFFIX, Some(&out_dir));
        let out_mask = io::output_path(in_file, image.format(), MASK_SUFFIX, Some(&out_dir));

        let mut outputs = StagedOutputs::new();
        outputs.stage(&masked, out_file.clone())?;
        outputs.stage(&mask, out_mask.clone())?;
        outputs.commit()?;

        info!(out_file = %out_file.display(), out_mask = %out_mask.display(), "wrote binarized outputs");
        Ok((out_file, out_mask))
    }
}
