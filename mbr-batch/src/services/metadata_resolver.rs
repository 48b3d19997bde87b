//! Field-by-field metadata resolution across the record's sources

use std::path::Path;

use crate::models::{MetadataSources, ResolvedTags, TrackAttributes};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Where a field value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSourceKind {
    /// Hand-maintained metadata attached to the record
    Curated,
    /// External catalog lookup stored with the record
    Catalog,
    /// Tags read from the source file
    Embedded,
    /// Stem of the original file name (title only)
    FileName,
}

use MetadataSourceKind::{Catalog, Curated, Embedded, FileName};

pub const ARTIST_PRECEDENCE: &[MetadataSourceKind] = &[Curated, Catalog, Embedded];
pub const ALBUM_PRECEDENCE: &[MetadataSourceKind] = &[Curated, Catalog, Embedded];
pub const TITLE_PRECEDENCE: &[MetadataSourceKind] = &[Curated, Embedded, Catalog, FileName];
pub const YEAR_PRECEDENCE: &[MetadataSourceKind] = &[Curated, Catalog, Embedded];
pub const GENRE_PRECEDENCE: &[MetadataSourceKind] = &[Curated, Embedded, Catalog];

/// Best value per field; `None` when no source has one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub genre: Option<String>,
}

impl ResolvedMetadata {
    pub fn artist_or_placeholder(&self) -> &str {
        self.artist.as_deref().unwrap_or(UNKNOWN_ARTIST)
    }

    pub fn album_or_placeholder(&self) -> &str {
        self.album.as_deref().unwrap_or(UNKNOWN_ALBUM)
    }

    pub fn title_or_placeholder(&self) -> &str {
        self.title.as_deref().unwrap_or(UNKNOWN_TITLE)
    }

    /// Tag data for the encoder; placeholders are never written as tags
    pub fn to_tags(&self) -> ResolvedTags {
        ResolvedTags {
            artist: self.artist.clone(),
            title: self.title.clone(),
            album: self.album.clone(),
            year: self.year,
            genre: self.genre.clone(),
        }
    }
}

/// Resolve every field independently; first non-empty source wins
pub fn resolve_metadata(sources: &MetadataSources) -> ResolvedMetadata {
    ResolvedMetadata {
        artist: first_text(sources, ARTIST_PRECEDENCE, |a| a.artist.as_deref()),
        album: first_text(sources, ALBUM_PRECEDENCE, |a| a.album.as_deref()),
        title: first_text(sources, TITLE_PRECEDENCE, |a| a.title.as_deref()),
        year: YEAR_PRECEDENCE.iter().find_map(|kind| {
            attributes(sources, *kind)
                .and_then(|a| a.year.as_ref())
                .and_then(|y| y.as_year())
        }),
        genre: first_text(sources, GENRE_PRECEDENCE, |a| a.genre.as_deref()),
    }
}

fn attributes(sources: &MetadataSources, kind: MetadataSourceKind) -> Option<&TrackAttributes> {
    match kind {
        Curated => sources.curated.as_ref(),
        Catalog => sources.catalog.as_ref(),
        Embedded => sources.embedded.as_ref(),
        FileName => None,
    }
}

fn first_text(
    sources: &MetadataSources,
    precedence: &[MetadataSourceKind],
    field: impl Fn(&TrackAttributes) -> Option<&str>,
) -> Option<String> {
    precedence.iter().find_map(|kind| {
        let value = match kind {
            FileName => sources.file_name.as_deref().and_then(file_stem),
            other => attributes(sources, *other).and_then(&field),
        };
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn file_stem(file_name: &str) -> Option<&str> {
    Path::new(file_name).file_stem().and_then(|s| s.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::YearValue;

    fn attrs(artist: Option<&str>, title: Option<&str>, album: Option<&str>) -> TrackAttributes {
        TrackAttributes {
            artist: artist.map(str::to_string),
            title: title.map(str::to_string),
            album: album.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_fields_resolve_independently() {
        let sources = MetadataSources {
            curated: Some(attrs(None, Some("Curated Title"), None)),
            catalog: Some(attrs(Some("Catalog Artist"), Some("Catalog Title"), None)),
            embedded: Some(attrs(Some("Tag Artist"), None, Some("Tag Album"))),
            file_name: Some("song.mid".to_string()),
        };

        let resolved = resolve_metadata(&sources);
        assert_eq!(resolved.artist.as_deref(), Some("Catalog Artist"));
        assert_eq!(resolved.title.as_deref(), Some("Curated Title"));
        assert_eq!(resolved.album.as_deref(), Some("Tag Album"));
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let sources = MetadataSources {
            curated: Some(attrs(Some("   "), Some(""), None)),
            embedded: Some(attrs(Some("Tag Artist"), Some(" Tag Title "), None)),
            ..Default::default()
        };

        let resolved = resolve_metadata(&sources);
        assert_eq!(resolved.artist.as_deref(), Some("Tag Artist"));
        assert_eq!(resolved.title.as_deref(), Some("Tag Title"));
    }

    #[test]
    fn test_title_falls_back_to_file_stem() {
        let sources = MetadataSources {
            file_name: Some("dir/Moonlight Sonata.mid".to_string()),
            ..Default::default()
        };

        let resolved = resolve_metadata(&sources);
        assert_eq!(resolved.title.as_deref(), Some("Moonlight Sonata"));
        assert_eq!(resolved.artist_or_placeholder(), UNKNOWN_ARTIST);
        assert_eq!(resolved.album_or_placeholder(), UNKNOWN_ALBUM);
    }

    #[test]
    fn test_no_sources_uses_placeholders_but_not_tags() {
        let resolved = resolve_metadata(&MetadataSources::default());
        assert_eq!(resolved.title_or_placeholder(), UNKNOWN_TITLE);
        assert_eq!(resolved.to_tags(), ResolvedTags::default());
    }

    #[test]
    fn test_year_accepts_text_and_numbers() {
        let sources = MetadataSources {
            curated: Some(TrackAttributes {
                year: Some(YearValue::Text("not a year".to_string())),
                ..Default::default()
            }),
            catalog: Some(TrackAttributes {
                year: Some(YearValue::Text("1987-05-01".to_string())),
                ..Default::default()
            }),
            embedded: Some(TrackAttributes {
                year: Some(YearValue::Number(1990)),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(resolve_metadata(&sources).year, Some(1987));
    }
}
