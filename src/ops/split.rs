use std::path::{Path, PathBuf};

use tracing::{Span, debug, info};

use crate::enums::SortBy;
use crate::error::{IoError, Result, TransformError};
use crate::io::{self, StagedOutputs};
use crate::naming::index_suffix;
use crate::volume::{ImageSeries, VolumetricImage};

/// Splits a 4D image into its 3D frames along the last axis.
pub struct SeriesSplitter {
    accept_3d: bool,
    out_dir: Option<PathBuf>,
    sort_by: SortBy,
    span: Span,
}

impl Default for SeriesSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SeriesSplitter {
    pub fn new() -> Self {
        Self {
            accept_3d: false,
            out_dir: None,
            sort_by: SortBy::default(),
            span: Span::current(),
        }
    }

    /// Pass a 3D input through as a single frame instead of failing
    pub fn accept_3d(mut self, accept: bool) -> Self {
        self.accept_3d = accept;
        self
    }

    /// Where `run` writes the frames, next to the input by default
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

    /// Frames of `image` in fourth-axis order, after dropping trailing
    /// singleton axes.
    pub fn split(&self, image: VolumetricImage) -> Result<ImageSeries, TransformError> {
        let _entered = self.span.enter();
        let image = image.squeeze();
        match image.ndim() {
            4 => {
                let series = image.split_last_axis()?;
                debug!(frames = series.len(), "split 4D image");
                Ok(series)
            }
            3 if self.accept_3d => {
                debug!("passing 3D image through as a single frame");
                Ok(ImageSeries::new(vec![image]))
            }
            ndim => Err(TransformError::DimensionError {
                ndim,
                expected: if self.accept_3d { "3 or 4" } else { "4" },
            }),
        }
    }

    /// Split `in_file` and write `<in_file>_idx-000`, `_idx-001`, ...
    ///
    /// Returns the written paths in frame order.
    pub fn run(&self, in_file: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let in_file = in_file.as_ref();
        let _entered = self.span.enter();
        info!(image = %in_file.display(), accept_3d = self.accept_3d, "splitting series");

        let image = io::load_with(in_file, self.sort_by)?;
        let format = image.format();
        let series = self.split(image)?;

        let mut outputs = StagedOutputs::new();
        for (index, frame) in series.frames().iter().enumerate() {
            let out_file = io::output_path(in_file, format, &index_suffix(index), self.out_dir.as_deref());
            let out_file = std::path::absolute(out_file).map_err(IoError::from)?;
            outputs.stage(frame, out_file)?;
        }
        let written = outputs.commit()?;

        info!(frames = written.len(), "wrote split frames");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::FormatKind;
    use crate::volume::{Affine, Header};
    use ndarray::{ArrayD, IxDyn};

    fn series_image(shape: &[usize]) -> VolumetricImage {
        let last = shape.len() - 1;
        VolumetricImage::new(
            ArrayD::from_shape_fn(IxDyn(shape), |idx| idx[last] as f64 * 10.0 + idx[0] as f64),
            Affine::from_zooms([2.0, 2.0, 2.5]),
            Header::default(),
            FormatKind::Nifti,
        )
    }

    #[test]
    fn frames_follow_fourth_axis_order() {
        let image = series_image(&[3, 2, 2, 5]);
        let series = SeriesSplitter::new().split(image.clone()).unwrap();
        assert_eq!(series.len(), 5);
        for (t, (label, frame)) in series.labelled().enumerate() {
            assert_eq!(label, format!("{t:03}"));
            assert_eq!(frame.shape(), &[3, 2, 2]);
            assert_eq!(frame.affine(), image.affine());
            assert_eq!(frame.data()[[2, 1, 1]], t as f64 * 10.0 + 2.0);
        }
    }

    #[test]
    fn rejects_3d_unless_accepted() {
        let err = SeriesSplitter::new().split(series_image(&[3, 3, 3])).unwrap_err();
        assert!(matches!(err, TransformError::DimensionError { ndim: 3, .. }));

        let series = SeriesSplitter::new()
            .accept_3d(true)
            .split(series_image(&[3, 3, 3]))
            .unwrap();
        let labels: Vec<_> = series.labelled().map(|(label, _)| label).collect();
        assert_eq!(labels, ["000"]);
        assert_eq!(series.frames()[0].shape(), &[3, 3, 3]);
    }

    #[test]
    fn squeezes_trailing_singletons_first() {
        let err = SeriesSplitter::new().split(series_image(&[3, 3, 3, 1])).unwrap_err();
        assert!(matches!(err, TransformError::DimensionError { ndim: 3, .. }));

        let series = SeriesSplitter::new().split(series_image(&[3, 3, 3, 2, 1])).unwrap();
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn rejects_other_dimensionalities() {
        let err = SeriesSplitter::new()
            .accept_3d(true)
            .split(series_image(&[3, 3, 3, 2, 2]))
            .unwrap_err();
        assert!(matches!(err, TransformError::DimensionError { ndim: 5, .. }));
    }
}
