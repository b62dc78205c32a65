use std::path::Path;

use super::{sidecar_path, ChunkSourceError, SettingsReader, ThumbnailProducer};

/// Takes the pre-rendered `<base>.png` next to the locator as the thumbnail.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemThumbnailProducer;

impl ThumbnailProducer for FilesystemThumbnailProducer {
    fn produce(&self, locator: &Path) -> Result<Option<Vec<u8>>, ChunkSourceError> {
        match std::fs::read(sidecar_path(locator, ".png")) {
            Ok(png) => Ok(Some(png)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Reads the `<base>.settings.xml` viewer settings next to the locator.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemSettingsReader;

impl SettingsReader for FilesystemSettingsReader {
    fn read(&self, locator: &Path) -> Option<String> {
        let path = sidecar_path(locator, ".settings.xml");
        match std::fs::read_to_string(&path) {
            Ok(settings) => Some(settings),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not read settings");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_test_dataset;

    #[test]
    fn sidecar_present() {
        let dir = tempfile::tempdir().unwrap();
        let locator = write_test_dataset(dir.path(), "dataset");
        assert_eq!(
            FilesystemThumbnailProducer.produce(&locator).unwrap().as_deref(),
            Some(crate::test_util::TEST_PNG)
        );
        assert!(FilesystemSettingsReader
            .read(&locator)
            .unwrap()
            .contains("<Settings>"));
    }

    #[test]
    fn sidecar_absent() {
        let dir = tempfile::tempdir().unwrap();
        let locator = dir.path().join("absent.xml");
        assert!(FilesystemThumbnailProducer.produce(&locator).unwrap().is_none());
        assert!(FilesystemSettingsReader.read(&locator).is_none());
    }
}
