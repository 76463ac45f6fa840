use crate::config::CoverSettings;
use crate::error::SweepError;
use crate::executor::ToolInvocationError;
use crate::transcode::Transcoder;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// A cover image the sweep can embed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverSource {
    /// Unique across the sweep. Directory covers are named `<dir>/<stem>`.
    pub id: String,
    pub path: PathBuf,
    /// Already a JPEG; used as-is instead of being encoded per quality.
    pub preencoded: bool,
}

/// Resolves configured images and cover directories into cover sources.
///
/// A missing sample image is fatal: without it there is no valid trial space.
/// So is an id shared by two covers, since results and culprits are keyed by it.
pub fn discover_covers(settings: &CoverSettings) -> Result<Vec<CoverSource>, SweepError> {
    let mut covers = Vec::new();
    for image in &settings.images {
        if !image.path.is_file() {
            return Err(SweepError::MissingCover {
                id: image.id.clone(),
                path: image.path.clone(),
            });
        }
        covers.push(CoverSource {
            id: image.id.clone(),
            path: image.path.clone(),
            preencoded: false,
        });
    }

    for dir in &settings.directories {
        let dir_name = dir
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.path.to_string_lossy().into_owned());
        let entries = std::fs::read_dir(&dir.path).map_err(|e| {
            SweepError::Io(format!("failed to read cover directory {:?}: {}", dir.path, e))
        })?;
        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_jpeg = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg")
                });
            if !path.is_file() || !is_jpeg {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.push(CoverSource {
                    id: format!("{dir_name}/{stem}"),
                    path: path.clone(),
                    preencoded: true,
                });
            }
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        info!(dir = ?dir.path, count = found.len(), "discovered cover directory");
        covers.extend(found);
    }

    if covers.is_empty() {
        return Err(SweepError::NoCovers);
    }
    let mut seen = HashSet::new();
    for cover in &covers {
        if !seen.insert(cover.id.as_str()) {
            return Err(SweepError::InvalidConfig(format!(
                "cover id '{}' is used by more than one cover (second at {:?})",
                cover.id, cover.path
            )));
        }
    }
    Ok(covers)
}

type CoverSlot = Arc<OnceLock<Result<PathBuf, ToolInvocationError>>>;

/// Encoded covers keyed by `(id, quality)`, each produced at most once.
///
/// Workers asking for the same key block on that key's slot only; a failed
/// encode is remembered and replayed to later trials of the same key.
pub struct CoverCache {
    dir: PathBuf,
    slots: Mutex<HashMap<(String, u8), CoverSlot>>,
}

impl CoverCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cover_path(&self, id: &str, quality: u8) -> PathBuf {
        self.dir.join(format!("{}-{quality}.jpg", id.replace('/', "_")))
    }

    pub fn cover_at(
        &self,
        transcoder: &Transcoder,
        source: &CoverSource,
        quality: u8,
        timeout: Duration,
    ) -> Result<PathBuf, ToolInvocationError> {
        if source.preencoded {
            return Ok(source.path.clone());
        }
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots
                .entry((source.id.clone(), quality))
                .or_default()
                .clone()
        };
        slot.get_or_init(|| {
            let out = self.cover_path(&source.id, quality);
            debug!(cover = %source.id, quality, "encoding cover");
            transcoder
                .encode(&source.path, quality, &out, timeout)
                .map(|()| out)
        })
        .clone()
    }
}
