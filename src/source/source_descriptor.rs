use std::path::Path;

use super::{ChunkSourceError, DescriptorBuilder};

const IMAGE_LOADER_OPEN: &str = "<ImageLoader";
const IMAGE_LOADER_CLOSE: &str = "</ImageLoader>";

/// Rewrites the image loader of a descriptor to fetch cells from this server.
///
/// The first `<ImageLoader ...>` element is replaced by
/// ```xml
/// <ImageLoader format="bdv.remote"><baseUrl>DATASET_URL</baseUrl></ImageLoader>
/// ```
/// and the rest of the document is kept as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteDescriptorBuilder;

impl RemoteDescriptorBuilder {
    /// Rewrite the descriptor document `xml`.
    ///
    /// Returns [`None`] if `xml` has no complete `ImageLoader` element.
    #[must_use]
    pub fn rewrite(xml: &str, dataset_url: &str) -> Option<String> {
        let start = find_element_start(xml)?;
        let tag_end = start + xml[start..].find('>')?;
        let end = if xml[..tag_end].ends_with('/') {
            tag_end + 1
        } else {
            tag_end + xml[tag_end..].find(IMAGE_LOADER_CLOSE)? + IMAGE_LOADER_CLOSE.len()
        };
        Some(format!(
            "{}<ImageLoader format=\"bdv.remote\"><baseUrl>{}</baseUrl></ImageLoader>{}",
            &xml[..start],
            escape_xml(dataset_url),
            &xml[end..]
        ))
    }
}

impl DescriptorBuilder for RemoteDescriptorBuilder {
    fn build(&self, locator: &Path, dataset_url: &str) -> Result<String, ChunkSourceError> {
        let xml = match std::fs::read_to_string(locator) {
            Ok(xml) => xml,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChunkSourceError::NotFound(locator.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        Self::rewrite(&xml, dataset_url).ok_or_else(|| {
            ChunkSourceError::InvalidDescriptor(
                locator.to_path_buf(),
                "missing ImageLoader element".to_string(),
            )
        })
    }
}

/// Find the start of the first `<ImageLoader` tag, skipping e.g. `<ImageLoaderX`.
fn find_element_start(xml: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(position) = xml[offset..].find(IMAGE_LOADER_OPEN) {
        let start = offset + position;
        let next = xml[start + IMAGE_LOADER_OPEN.len()..].chars().next();
        if matches!(next, Some(c) if c.is_whitespace() || c == '>' || c == '/') {
            return Some(start);
        }
        offset = start + IMAGE_LOADER_OPEN.len();
    }
    None
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
