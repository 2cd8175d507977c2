use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbImage;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Whether `path` is an existing directory or an image file we can decode.
pub(super) fn handles(path: &Path) -> bool {
    path.is_dir() || (path.is_file() && is_image(path))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Still images played back in file-name order.
pub(super) struct ImageSequenceSource {
    pending: VecDeque<PathBuf>,
    decoded: u64,
    failures: u64,
}

impl ImageSequenceSource {
    pub(super) fn open(path: &Path) -> Result<Self> {
        let pending: VecDeque<PathBuf> = if path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("failed to list {}", path.display()))?
            {
                let entry_path = entry?.path();
                if entry_path.is_file() && is_image(&entry_path) {
                    files.push(entry_path);
                }
            }
            files.sort();
            files.into()
        } else {
            VecDeque::from([path.to_path_buf()])
        };
        if pending.is_empty() {
            anyhow::bail!("no images found in {}", path.display());
        }
        log::debug!("{} image(s) queued from {}", pending.len(), path.display());
        Ok(Self {
            pending,
            decoded: 0,
            failures: 0,
        })
    }

    /// Next decodable image. Undecodable files are skipped with a warning.
    pub(super) fn next_image(&mut self) -> Result<Option<RgbImage>> {
        while let Some(path) = self.pending.pop_front() {
            match image::open(&path) {
                Ok(decoded) => {
                    self.decoded += 1;
                    return Ok(Some(decoded.to_rgb8()));
                }
                Err(e) => {
                    self.failures += 1;
                    log::warn!("skipping {}: {}", path.display(), e);
                }
            }
        }
        Ok(None)
    }

    /// Unhealthy while every file tried so far has failed to decode.
    pub(super) fn is_healthy(&self) -> bool {
        self.failures == 0 || self.decoded > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_is_played_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("b.png")).unwrap();
        RgbImage::new(8, 8).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("c.jpg"), "not a jpeg").unwrap();

        assert!(handles(dir.path()));
        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.next_image().unwrap().unwrap().width(), 8);
        assert_eq!(source.next_image().unwrap().unwrap().width(), 4);
        assert!(source.next_image().unwrap().is_none());
        assert_eq!(source.failures, 1);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path()).is_err());
    }
}
