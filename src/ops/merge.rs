use std::path::{Path, PathBuf};

use tracing::{Span, debug, info};

use crate::enums::SortBy;
use crate::error::{Result, TransformError};
use crate::io::{self, StagedOutputs};
use crate::naming::MERGED_SUFFIX;
use crate::volume::{ImageSeries, Tolerance, VolumetricImage};

/// Stacks 3D volumes (and the frames of 4D ones) into a single 4D image.
///
/// Input order is kept: frames of a 4D input are inserted where that input
/// appears, in their own fourth-axis order.
pub struct SeriesMerger {
    allow_4d: bool,
    tolerance: Tolerance,
    out_dir: Option<PathBuf>,
    sort_by: SortBy,
    span: Span,
}

impl Default for SeriesMerger {
    fn default() -> Self {
        Self {
            allow_4d: true,
            tolerance: Tolerance::default(),
            out_dir: None,
            sort_by: SortBy::default(),
            span: Span::current(),
        }
    }
}

impl SeriesMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_4d(mut self, allow: bool) -> Self {
        self.allow_4d = allow;
        self
    }

    pub fn tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Where `run` writes the merged image, next to the first input by default
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

    /// Append the frames of one input to `frames`
    fn accumulate(&self, frames: &mut ImageSeries, image: VolumetricImage) -> Result<(), TransformError> {
        let image = image.squeeze();
        match image.ndim() {
            3 => frames.push(image),
            4 if self.allow_4d => {
                let series = image.split_last_axis()?;
                debug!(frames = series.len(), "expanding 4D input");
                frames.extend(series);
            }
            ndim => {
                return Err(TransformError::DimensionError {
                    ndim,
                    expected: if self.allow_4d { "3 or 4" } else { "3" },
                });
            }
        }
        Ok(())
    }

    pub fn merge<I>(&self, images: I) -> Result<VolumetricImage, TransformError>
    where
        I: IntoIterator<Item = VolumetricImage>,
    {
        let _entered = self.span.enter();
        let mut frames = ImageSeries::default();
        for image in images {
            self.accumulate(&mut frames, image)?;
        }
        debug!(frames = frames.len(), "concatenating frames");
        frames.concat(&self.tolerance)
    }

    /// Merge `in_files` in order and write `<first input>_merged`.
    pub fn run<P: AsRef<Path>>(&self, in_files: &[P]) -> Result<PathBuf> {
        let _entered = self.span.enter();
        let first = in_files.first().ok_or(TransformError::EmptySeries)?.as_ref();
        info!(inputs = in_files.len(), first = %first.display(), allow_4d = self.allow_4d, "merging series");

        let mut frames = ImageSeries::default();
        for in_file in in_files {
            self.accumulate(&mut frames, io::load_with(in_file, self.sort_by)?)?;
        }
        let merged = frames.concat(&self.tolerance)?;

        let out_file = io::output_path(first, merged.format(), MERGED_SUFFIX, self.out_dir.as_deref());
        let mut outputs = StagedOutputs::new();
        outputs.stage(&merged, out_file.clone())?;
        outputs.commit()?;

        info!(out_file = %out_file.display(), shape = ?merged.shape(), "wrote merged image");
        Ok(out_file)
    }
}
