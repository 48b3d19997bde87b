//! Output path layout: `<root>/<artist>/<album>/<title>.<ext>`

use std::path::{Path, PathBuf};

use super::metadata_resolver::{ResolvedMetadata, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_TITLE};

/// Maximum characters kept per path component
pub const MAX_COMPONENT_CHARS: usize = 100;

/// Hash characters appended when disambiguating a collision
pub const DISAMBIGUATION_HASH_LEN: usize = 8;

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Maps resolved metadata to a destination under the output root
#[derive(Debug, Clone)]
pub struct OutputPathResolver {
    root: PathBuf,
    extension: String,
}

impl OutputPathResolver {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn resolve(&self, metadata: &ResolvedMetadata) -> PathBuf {
        let artist = sanitize_component(metadata.artist_or_placeholder(), UNKNOWN_ARTIST);
        let album = sanitize_component(metadata.album_or_placeholder(), UNKNOWN_ALBUM);
        let title = sanitize_component(metadata.title_or_placeholder(), UNKNOWN_TITLE);

        self.root
            .join(artist)
            .join(album)
            .join(format!("{}.{}", title, self.extension))
    }
}

/// Make `raw` safe as a single path component on common filesystems
///
/// Strips forbidden and control characters, collapses whitespace, trims
/// dots and spaces at both ends and caps the length. Falls back to
/// `placeholder` when nothing usable is left.
pub fn sanitize_component(raw: &str, placeholder: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !c.is_control() && !FORBIDDEN_CHARS.contains(c))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut component: String = trim_edges(&collapsed)
        .chars()
        .take(MAX_COMPONENT_CHARS)
        .collect();
    component = trim_edges(&component).to_string();

    if component.is_empty() {
        return placeholder.to_string();
    }

    let stem = component.split('.').next().unwrap_or_default();
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
        component.insert(0, '_');
    }
    component
}

fn trim_edges(s: &str) -> &str {
    s.trim_matches(|c: char| c == '.' || c.is_whitespace())
}

/// Deterministic alternate for a path that already exists
///
/// Appends `-<first 8 chars of key>` to the file stem. Pure in `path` and
/// `key`, and a path already carrying the suffix is returned unchanged.
pub fn disambiguate(path: &Path, key: &str) -> PathBuf {
    let suffix: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(DISAMBIGUATION_HASH_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    let suffix = if suffix.is_empty() { "dup".to_string() } else { suffix };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.ends_with(&format!("-{}", suffix)) {
        return path.to_path_buf();
    }

    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}-{}", stem, suffix),
    };
    path.with_file_name(name)
}
