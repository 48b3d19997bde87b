//! MP3 encoder: ffmpeg libmp3lame, then ID3v2 tags written with lofty
//!
//! The file is probed after tagging so callers get the tags and duration
//! that actually landed on disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag, TagExt, TagType};
use tracing::debug;

use super::{process, EncodedArtifact, Encoder};
use crate::config::EncodeConfig;
use crate::error::TransformError;
use crate::models::ResolvedTags;

pub struct Mp3Encoder {
    binary: PathBuf,
    bitrate_kbps: u32,
    timeout: Duration,
}

impl Mp3Encoder {
    pub fn new(config: &EncodeConfig, timeout: Duration) -> Self {
        Self {
            binary: config.ffmpeg_path.clone(),
            bitrate_kbps: config.bitrate,
            timeout,
        }
    }

    fn arguments(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-map_metadata".into(),
            "-1".into(),
            "-codec:a".into(),
            "libmp3lame".into(),
            "-b:a".into(),
            format!("{}k", self.bitrate_kbps).into(),
            "-f".into(),
            "mp3".into(),
            output.as_os_str().to_owned(),
        ]
    }
}

#[async_trait]
impl Encoder for Mp3Encoder {
    fn name(&self) -> &str {
        "ffmpeg-libmp3lame"
    }

    async fn probe(&self) -> Result<String, TransformError> {
        process::probe_version(&self.binary, "-version").await
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        tags: &ResolvedTags,
    ) -> Result<EncodedArtifact, TransformError> {
        process::run(&self.binary, self.arguments(input, output), self.timeout).await?;

        let path = output.to_path_buf();
        let tags = tags.clone();
        let artifact = tokio::task::spawn_blocking(move || {
            write_tags(&path, &tags)?;
            read_back(&path)
        })
        .await
        .map_err(|e| TransformError::Tagging(format!("tagging task failed: {}", e)))??;

        debug!(
            output = %output.display(),
            duration_seconds = artifact.duration_seconds,
            "Encoded and tagged"
        );
        Ok(artifact)
    }
}

/// Write an ID3v2 tag holding every resolved field
pub fn write_tags(path: &Path, tags: &ResolvedTags) -> Result<(), TransformError> {
    let mut tag = Tag::new(TagType::Id3v2);
    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(title) = &tags.title {
        tag.set_title(title.clone());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.clone());
    }
    if let Some(year) = tags.year {
        tag.set_year(year);
    }
    if let Some(genre) = &tags.genre {
        tag.set_genre(genre.clone());
    }

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| TransformError::Tagging(format!("write {}: {}", path.display(), e)))
}

/// Probe the encoded file for duration and the tags it carries
pub fn read_back(path: &Path) -> Result<EncodedArtifact, TransformError> {
    let tagged_file = Probe::open(path)
        .map_err(|e| TransformError::Tagging(e.to_string()))?
        .read()
        .map_err(|e| TransformError::Tagging(e.to_string()))?;

    let duration_seconds = tagged_file.properties().duration().as_secs_f64();
    if duration_seconds <= 0.0 {
        return Err(TransformError::InvalidOutput(format!(
            "encoded file {} has no audio",
            path.display()
        )));
    }

    let tags = tagged_file
        .tag(TagType::Id3v2)
        .map(|tag| ResolvedTags {
            artist: tag.artist().map(|s| s.into_owned()),
            title: tag.title().map(|s| s.into_owned()),
            album: tag.album().map(|s| s.into_owned()),
            year: tag.year(),
            genre: tag.genre().map(|s| s.into_owned()),
        })
        .unwrap_or_default();

    Ok(EncodedArtifact {
        tags,
        duration_seconds,
    })
}
