//! Reference descriptors for known identities, built once at startup.
//!
//! Loading is best-effort: a missing image, an undecodable image or an image
//! without a face is logged and skipped. Only a build that yields no identity
//! at all is an error.

use crate::analyzer::{AnalyzeError, FaceAnalyzer};
use crate::types::Descriptor;
use image::RgbImage;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Candidate images tried per identity (indices `1..=N`).
pub const DEFAULT_IMAGES_PER_IDENTITY: usize = 2;

#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("no reference descriptors could be extracted for any identity")]
    NoReferenceData,
    #[error("identity listed twice: {0}")]
    DuplicateIdentity(String),
    #[error("descriptor for {identity} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        identity: String,
        expected: usize,
        actual: usize,
    },
}

/// Supplies candidate reference images by `(identity, index)`.
pub trait ImageSource {
    fn load(&self, identity: &str, index: usize) -> Result<RgbImage, ImageLoadError>;
}

/// Reads `<root>/<identity>/<index>.<ext>` from disk.
#[derive(Debug, Clone)]
pub struct DirectoryImageSource {
    root: PathBuf,
    extension: String,
}

impl DirectoryImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "jpg".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, identity: &str, index: usize) -> PathBuf {
        self.root
            .join(identity)
            .join(format!("{index}.{}", self.extension))
    }
}

impl ImageSource for DirectoryImageSource {
    fn load(&self, identity: &str, index: usize) -> Result<RgbImage, ImageLoadError> {
        let path = self.path_for(identity, index);
        let display = path.display().to_string();
        if !path.is_file() {
            return Err(ImageLoadError::NotFound(display));
        }
        // The decoder and its file handle are dropped before returning.
        let decoded = image::open(&path).map_err(|source| ImageLoadError::Decode {
            path: display,
            source,
        })?;
        Ok(decoded.into_rgb8())
    }
}

/// Per-identity descriptor count, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySummary {
    pub identity: String,
    pub descriptors: usize,
}

/// Ordered, non-empty mapping from identity to its reference descriptors.
///
/// Every identity has at least one descriptor and all descriptors share one
/// dimension.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    entries: Vec<(String, Vec<Descriptor>)>,
    dimension: usize,
}

impl ReferenceSet {
    /// Build from explicit entries. Identities with no descriptors are omitted.
    pub fn new(entries: Vec<(String, Vec<Descriptor>)>) -> Result<Self, ReferenceError> {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(entries.len());
        let mut dimension = None;

        for (identity, descriptors) in entries {
            if !seen.insert(identity.clone()) {
                return Err(ReferenceError::DuplicateIdentity(identity));
            }
            if descriptors.is_empty() {
                continue;
            }
            for d in &descriptors {
                let expected = *dimension.get_or_insert(d.len());
                if d.len() != expected {
                    return Err(ReferenceError::DimensionMismatch {
                        identity,
                        expected,
                        actual: d.len(),
                    });
                }
            }
            kept.push((identity, descriptors));
        }

        match dimension {
            Some(dimension) => Ok(Self { entries: kept, dimension }),
            None => Err(ReferenceError::NoReferenceData),
        }
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptor dimension shared by every entry.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Descriptor])> {
        self.entries.iter().map(|(id, ds)| (id.as_str(), ds.as_slice()))
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn get(&self, identity: &str) -> Option<&[Descriptor]> {
        self.entries
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, ds)| ds.as_slice())
    }

    pub fn summary(&self) -> Vec<IdentitySummary> {
        self.iter()
            .map(|(identity, ds)| IdentitySummary {
                identity: identity.to_string(),
                descriptors: ds.len(),
            })
            .collect()
    }
}

/// Why one candidate image contributed no descriptor.
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error(transparent)]
    ImageLoad(#[from] ImageLoadError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("analysis failed: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("descriptor has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug)]
pub struct SkippedCandidate {
    pub identity: String,
    pub index: usize,
    pub reason: SkipReason,
}

/// Diagnostics gathered while building a [`ReferenceSet`].
#[derive(Debug, Default)]
pub struct BuildReport {
    pub skipped: Vec<SkippedCandidate>,
    /// Identities that produced no descriptor at all.
    pub omitted: Vec<String>,
    /// Identities listed more than once; only the first listing is loaded.
    pub duplicates: Vec<String>,
}

/// Folds candidate images into a [`ReferenceSet`].
#[derive(Debug, Clone)]
pub struct ReferenceSetBuilder {
    images_per_identity: usize,
}

impl Default for ReferenceSetBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGES_PER_IDENTITY)
    }
}

impl ReferenceSetBuilder {
    pub fn new(images_per_identity: usize) -> Self {
        Self { images_per_identity }
    }

    /// Try every candidate for every identity and keep what succeeds.
    ///
    /// Fails only with [`ReferenceError::NoReferenceData`].
    pub fn build<A: FaceAnalyzer + ?Sized>(
        &self,
        identities: &[String],
        source: &dyn ImageSource,
        analyzer: &mut A,
    ) -> Result<(ReferenceSet, BuildReport), ReferenceError> {
        let mut report = BuildReport::default();
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut dimension: Option<usize> = None;

        for identity in identities {
            if !seen.insert(identity.as_str()) {
                tracing::warn!(identity = %identity, "identity listed twice, ignoring repeat");
                report.duplicates.push(identity.clone());
                continue;
            }

            tracing::info!(identity = %identity, "loading reference images");
            let mut descriptors = Vec::new();

            for index in 1..=self.images_per_identity {
                let outcome = extract_candidate(source, analyzer, identity, index).and_then(|d| {
                    match dimension {
                        Some(expected) if d.len() != expected => Err(SkipReason::DimensionMismatch {
                            expected,
                            actual: d.len(),
                        }),
                        _ => Ok(d),
                    }
                });

                match outcome {
                    Ok(descriptor) => {
                        tracing::info!(identity = %identity, index, "reference descriptor extracted");
                        dimension.get_or_insert(descriptor.len());
                        descriptors.push(descriptor);
                    }
                    Err(reason) => {
                        tracing::warn!(identity = %identity, index, reason = %reason, "skipping reference image");
                        report.skipped.push(SkippedCandidate {
                            identity: identity.clone(),
                            index,
                            reason,
                        });
                    }
                }
            }

            if descriptors.is_empty() {
                tracing::warn!(identity = %identity, "no usable reference descriptors, identity omitted");
                report.omitted.push(identity.clone());
            } else {
                tracing::info!(identity = %identity, count = descriptors.len(), "identity loaded");
                entries.push((identity.clone(), descriptors));
            }
        }

        let set = ReferenceSet::new(entries).map_err(|e| match e {
            // Both are filtered above; anything else means nothing was loaded.
            ReferenceError::DuplicateIdentity(_) | ReferenceError::DimensionMismatch { .. } => {
                ReferenceError::NoReferenceData
            }
            other => other,
        })?;

        tracing::info!(
            identities = set.len(),
            skipped = report.skipped.len(),
            "reference set built"
        );
        Ok((set, report))
    }
}

/// Load, analyze and release one candidate image.
fn extract_candidate<A: FaceAnalyzer + ?Sized>(
    source: &dyn ImageSource,
    analyzer: &mut A,
    identity: &str,
    index: usize,
) -> Result<Descriptor, SkipReason> {
    let image = source.load(identity, index)?;
    tracing::debug!(identity, index, width = image.width(), height = image.height(), "analyzing reference image");
    let face = analyzer.detect_single(&image)?;
    face.map(|f| f.descriptor).ok_or(SkipReason::NoFaceDetected)
}
