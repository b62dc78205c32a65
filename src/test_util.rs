//! Dataset fixtures for unit tests.

use std::path::{Path, PathBuf};

/// A PNG signature standing in for a rendered thumbnail.
pub const TEST_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub const TEST_METADATA: &str = r#"{"numSetups":1,"numTimepoints":1,"levels":[[1,1,1]],"cellDimensions":[[3,1,1]]}"#;

pub const TEST_SETTINGS: &str = "<Settings><ViewerState/></Settings>";

pub fn test_descriptor(name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SpimData version="0.2">
  <SequenceDescription>
    <ImageLoader format="bdv.hdf5">
      <hdf5 type="relative">{name}.h5</hdf5>
    </ImageLoader>
  </SequenceDescription>
</SpimData>
"#
    )
}

/// Write a complete filesystem dataset `<dir>/<stem>.*` and return its locator.
///
/// Cell `0/0/0/0` holds the samples `[1, 256, 65535]` with geometry `[3, 1, 1]`.
pub fn write_test_dataset(dir: &Path, stem: &str) -> PathBuf {
    let locator = dir.join(format!("{stem}.xml"));
    std::fs::write(&locator, test_descriptor(stem)).unwrap();
    std::fs::write(dir.join(format!("{stem}.json")), TEST_METADATA).unwrap();
    std::fs::write(dir.join(format!("{stem}.settings.xml")), TEST_SETTINGS).unwrap();
    std::fs::write(dir.join(format!("{stem}.png")), TEST_PNG).unwrap();
    let cell_dir = dir.join(format!("{stem}.cells/0/0/0"));
    std::fs::create_dir_all(&cell_dir).unwrap();
    std::fs::write(
        cell_dir.join("0.cell"),
        [0x00, 0x01, 0x01, 0x00, 0xFF, 0xFF],
    )
    .unwrap();
    locator
}

/// Write a dataset with a descriptor and metadata only.
pub fn write_minimal_dataset(dir: &Path, stem: &str) -> PathBuf {
    let locator = dir.join(format!("{stem}.xml"));
    std::fs::write(&locator, test_descriptor(stem)).unwrap();
    std::fs::write(dir.join(format!("{stem}.json")), TEST_METADATA).unwrap();
    locator
}
