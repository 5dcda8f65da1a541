//! Video fixtures loaded once per run and shared read-only by every VU

use std::path::Path;

use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use crate::config::FixtureSettings;
use crate::error::{LoadTestError, Result};

/// Smallest payload the upload endpoint accepts as an MP4: an `ftyp` box
/// declaring `mp42` with `mp42`/`mp41` compatible brands.
const MINIMAL_MP4: [u8; 24] = [
    0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'm', b'p', b'4', b'2', 0x00, 0x00, 0x00, 0x00,
    b'm', b'p', b'4', b'2', b'm', b'p', b'4', b'1',
];

/// A binary test asset
#[derive(Debug, Clone)]
pub struct VideoFixture {
    pub filename: String,
    /// Reference-counted buffer; cloning never copies the bytes
    pub content: Bytes,
}

impl VideoFixture {
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// File name without its extension
    pub fn stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }

    /// Header-only MP4 used when no real fixture is at hand
    pub fn minimal_mp4() -> Self {
        Self {
            filename: "small_test.mp4".to_string(),
            content: Bytes::from_static(&MINIMAL_MP4),
        }
    }
}

/// Immutable set of fixtures
#[derive(Debug, Clone, Default)]
pub struct FixtureSet {
    fixtures: Vec<VideoFixture>,
}

impl FixtureSet {
    pub fn new(fixtures: Vec<VideoFixture>) -> Self {
        Self { fixtures }
    }

    /// Read every configured file. A missing or unreadable file is fatal.
    pub fn load(settings: &FixtureSettings) -> Result<Self> {
        let mut fixtures = Vec::with_capacity(settings.files.len());
        for filename in &settings.files {
            let path = settings.directory.join(filename);
            let content = std::fs::read(&path)
                .map_err(|source| LoadTestError::FixtureUnreadable { path: path.clone(), source })?;
            info!("Loaded fixture {} ({} bytes)", path.display(), content.len());
            fixtures.push(VideoFixture {
                filename: filename.clone(),
                content: Bytes::from(content),
            });
        }
        Ok(Self { fixtures })
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VideoFixture> {
        self.fixtures.iter()
    }

    /// Total bytes held
    pub fn total_size(&self) -> usize {
        self.fixtures.iter().map(VideoFixture::size).sum()
    }

    /// Uniformly chosen fixture, `None` when the set is empty
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&VideoFixture> {
        self.fixtures.choose(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video1.mp4"), vec![7u8; 1024]).unwrap();
        std::fs::write(dir.path().join("video2.mp4"), vec![9u8; 2048]).unwrap();

        let settings = FixtureSettings {
            directory: dir.path().to_path_buf(),
            files: vec!["video1.mp4".to_string(), "video2.mp4".to_string()],
        };
        let set = FixtureSet::load(&settings).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.total_size(), 3072);
        assert_eq!(set.iter().next().unwrap().stem(), "video1");
    }

    #[test]
    fn test_missing_fixture_is_fatal() {
        let settings = FixtureSettings {
            directory: PathBuf::from("/nonexistent/fixtures"),
            files: vec!["video1.mp4".to_string()],
        };
        let err = FixtureSet::load(&settings).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("video1.mp4"));
    }

    #[test]
    fn test_clones_share_buffer() {
        let set = FixtureSet::new(vec![VideoFixture::minimal_mp4()]);
        let a = set.iter().next().unwrap().content.clone();
        let b = set.iter().next().unwrap().content.clone();
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_eq!(&a[4..8], b"ftyp");
    }

    #[test]
    fn test_choose_empty() {
        let set = FixtureSet::default();
        let mut rng = rand::thread_rng();
        assert!(set.choose(&mut rng).is_none());
    }
}
