//! Enrollment: turn a manifest of (name, photo) pairs into the repository.
//!
//! Each photo is decoded to grayscale and run once through the same detector
//! adapter used for live frames. Entries that fail are dropped with a
//! warning; they never abort loading of the rest.

use crate::detector::{DetectionFailure, DetectorAdapter, FaceAnalyzer};
use crate::repository::EmbeddingRepository;
use crate::types::EnrolledIdentity;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("cannot read enrollment manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid enrollment manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("identity name is empty for {0}")]
    EmptyName(PathBuf),
    #[error("cannot decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image decode task failed: {0}")]
    DecodeTask(#[from] tokio::task::JoinError),
    #[error("no face found in {0}")]
    NoFace(PathBuf),
    #[error(transparent)]
    Detection(#[from] DetectionFailure),
}

/// One manifest entry: a name and the photo to enroll it from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrollmentSource {
    pub name: String,
    pub image: PathBuf,
}

#[derive(Deserialize)]
struct ManifestFile {
    #[serde(default, rename = "identity")]
    identities: Vec<EnrollmentSource>,
}

/// Parse manifest text; relative image paths resolve against `base_dir`.
pub fn parse_manifest(text: &str, base_dir: &Path) -> Result<Vec<EnrollmentSource>, toml::de::Error> {
    let file: ManifestFile = toml::from_str(text)?;
    Ok(file
        .identities
        .into_iter()
        .map(|mut source| {
            if source.image.is_relative() {
                source.image = base_dir.join(&source.image);
            }
            source
        })
        .collect())
}

/// Read and parse the manifest at `path`.
pub fn load_manifest(path: &Path) -> Result<Vec<EnrollmentSource>, EnrollmentError> {
    let text = std::fs::read_to_string(path).map_err(|source| EnrollmentError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_manifest(&text, base_dir).map_err(|source| EnrollmentError::ManifestParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Extract the embedding for a single enrollment photo.
///
/// The most confident face wins when a photo holds several.
pub async fn enroll_source<A: FaceAnalyzer>(
    analyzer: &mut A,
    adapter: &DetectorAdapter,
    source: &EnrollmentSource,
) -> Result<EnrolledIdentity, EnrollmentError> {
    if source.name.trim().is_empty() {
        return Err(EnrollmentError::EmptyName(source.image.clone()));
    }

    let path = source.image.clone();
    let gray = tokio::task::spawn_blocking(move || {
        image::open(&path)
            .map(|img| img.to_luma8())
            .map_err(|e| EnrollmentError::Image { path, source: e })
    })
    .await??;
    let (width, height) = gray.dimensions();
    let pixels = gray.into_raw();

    let detection = adapter.detect(analyzer, &pixels, width, height).await?;
    if detection.samples.len() > 1 {
        tracing::warn!(
            name = %source.name,
            image = %source.image.display(),
            faces = detection.samples.len(),
            "enrollment photo has several faces; using the most confident"
        );
    }
    let sample = detection
        .samples
        .into_iter()
        .next()
        .ok_or_else(|| EnrollmentError::NoFace(source.image.clone()))?;

    tracing::info!(
        name = %source.name,
        image = %source.image.display(),
        confidence = sample.confidence,
        tier = ?detection.tier,
        "enrolled photo"
    );

    Ok(EnrolledIdentity { name: source.name.clone(), embedding: sample.embedding })
}

/// Enroll every source, skipping (and logging) the ones that fail.
pub async fn load_identities<A: FaceAnalyzer>(
    analyzer: &mut A,
    adapter: &DetectorAdapter,
    sources: &[EnrollmentSource],
) -> EmbeddingRepository {
    let mut identities = Vec::with_capacity(sources.len());
    for (i, source) in sources.iter().enumerate() {
        match enroll_source(analyzer, adapter, source).await {
            Ok(identity) => identities.push(identity),
            Err(err) => tracing::warn!(
                entry = i + 1,
                total = sources.len(),
                name = %source.name,
                error = %err,
                "dropping enrollment entry"
            ),
        }
    }

    tracing::info!(loaded = identities.len(), configured = sources.len(), "enrollment complete");
    EmbeddingRepository::new(identities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{AnalyzerError, DetectorConfig};
    use crate::types::{BoundingBox, EMBEDDING_DIM};

    /// Finds a face only in frames whose first pixel is bright.
    struct BrightPixelAnalyzer;

    impl FaceAnalyzer for BrightPixelAnalyzer {
        async fn detect(
            &mut self,
            frame: &[u8],
            width: u32,
            height: u32,
            _config: &DetectorConfig,
        ) -> Result<Vec<BoundingBox>, AnalyzerError> {
            if frame.first().copied().unwrap_or(0) > 128 {
                Ok(vec![BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: width as f32,
                    height: height as f32,
                    confidence: 0.9,
                    landmarks: None,
                }])
            } else {
                Ok(vec![])
            }
        }

        async fn embed(
            &mut self,
            frame: &[u8],
            _width: u32,
            _height: u32,
            _face: &BoundingBox,
        ) -> Result<Vec<f32>, AnalyzerError> {
            Ok(vec![frame[0] as f32 / 255.0; EMBEDDING_DIM])
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facegate-enroll-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_gray_png(path: &Path, value: u8) {
        image::GrayImage::from_pixel(8, 8, image::Luma([value])).save(path).unwrap();
    }

    #[test]
    fn test_parse_manifest_resolves_relative_paths() {
        let text = r#"
            [[identity]]
            name = "Alice"
            image = "alice.jpg"

            [[identity]]
            name = "Alice"
            image = "/srv/faces/alice-2.jpg"
        "#;
        let sources = parse_manifest(text, Path::new("/etc/facegate")).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].image, PathBuf::from("/etc/facegate/alice.jpg"));
        assert_eq!(sources[1].image, PathBuf::from("/srv/faces/alice-2.jpg"));
    }

    #[test]
    fn test_parse_empty_manifest() {
        assert!(parse_manifest("", Path::new(".")).unwrap().is_empty());
    }

    #[test]
    fn test_load_manifest_missing_file() {
        let err = load_manifest(Path::new("/nonexistent/facegate/enrollment.toml")).unwrap_err();
        assert!(matches!(err, EnrollmentError::ManifestRead { .. }));
    }

    #[test]
    fn test_load_manifest_invalid_toml() {
        let dir = temp_dir("badtoml");
        let path = dir.join("enrollment.toml");
        std::fs::write(&path, "[[identity]]\nname = 3\n").unwrap();
        let err = load_manifest(&path).unwrap_err();
        assert!(matches!(err, EnrollmentError::ManifestParse { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_failed_entries_are_dropped_not_fatal() {
        let dir = temp_dir("drop");
        write_gray_png(&dir.join("alice.png"), 200);
        write_gray_png(&dir.join("blank.png"), 10);

        let sources = vec![
            EnrollmentSource { name: "Alice".into(), image: dir.join("alice.png") },
            EnrollmentSource { name: "Ghost".into(), image: dir.join("missing.png") },
            EnrollmentSource { name: "Nobody".into(), image: dir.join("blank.png") },
            EnrollmentSource { name: "  ".into(), image: dir.join("alice.png") },
        ];

        let repo = load_identities(&mut BrightPixelAnalyzer, &DetectorAdapter::default(), &sources).await;
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.names(), vec!["Alice"]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_enroll_source_no_face() {
        let dir = temp_dir("noface");
        write_gray_png(&dir.join("dark.png"), 0);
        let source = EnrollmentSource { name: "Dark".into(), image: dir.join("dark.png") };

        let err = enroll_source(&mut BrightPixelAnalyzer, &DetectorAdapter::default(), &source)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::NoFace(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
