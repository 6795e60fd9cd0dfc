use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_PREFIX: &str = "motion";
pub const SNAPSHOT_EXTENSION: &str = "jpg";
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%6f";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Where annotated motion snapshots go.
pub trait SnapshotSink {
    /// Persist one snapshot and return where it went.
    fn persist(&mut self, frame: &RgbImage, captured_at: &DateTime<Local>) -> Result<PathBuf>;
}

/// Snapshot name for a capture time. Microsecond resolution keeps names distinct at any
/// practical framerate and makes lexical order match capture order.
pub fn snapshot_file_name(captured_at: &DateTime<Local>) -> String {
    format!(
        "{}_{}.{}",
        SNAPSHOT_PREFIX,
        captured_at.format(SNAPSHOT_TIME_FORMAT),
        SNAPSHOT_EXTENSION
    )
}

/// Writes JPEG snapshots into an existing directory.
pub struct DirectorySink {
    root: PathBuf,
    quality: u8,
    last_stem: Option<String>,
    repeat: u32,
}

impl DirectorySink {
    /// The directory must already exist; it is never created here.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(anyhow!(
                "snapshot directory {} doesn't exist",
                root.display()
            ));
        }
        Ok(Self {
            root,
            quality: DEFAULT_JPEG_QUALITY,
            last_stem: None,
            repeat: 0,
        })
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next free path for `captured_at`. A stamp already used in this run or already on
    /// disk (the clock stepped back, or an earlier run) gets a `_1`, `_2`, ... suffix
    /// instead of overwriting the existing snapshot.
    pub fn next_path(&mut self, captured_at: &DateTime<Local>) -> PathBuf {
        let stem = format!(
            "{}_{}",
            SNAPSHOT_PREFIX,
            captured_at.format(SNAPSHOT_TIME_FORMAT)
        );
        if self.last_stem.as_deref() == Some(stem.as_str()) {
            self.repeat += 1;
        } else {
            self.last_stem = Some(stem.clone());
            self.repeat = 0;
        }

        loop {
            let name = if self.repeat == 0 {
                format!("{}.{}", stem, SNAPSHOT_EXTENSION)
            } else {
                format!("{}_{}.{}", stem, self.repeat, SNAPSHOT_EXTENSION)
            };
            let path = self.root.join(name);
            if !path.exists() {
                return path;
            }
            self.repeat += 1;
        }
    }
}

impl SnapshotSink for DirectorySink {
    fn persist(&mut self, frame: &RgbImage, captured_at: &DateTime<Local>) -> Result<PathBuf> {
        let path = self.next_path(captured_at);

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .encode_image(frame)
            .context("encode jpeg snapshot")?;
        write_atomic(&path, &encoded)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }
}

/// Keeps snapshots in memory. Useful for dry runs and tests.
#[derive(Default)]
pub struct InMemorySnapshotSink {
    snapshots: Vec<(String, RgbImage)>,
}

impl InMemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.snapshots.iter().map(|(name, _)| name.as_str())
    }

    pub fn images(&self) -> impl Iterator<Item = &RgbImage> {
        self.snapshots.iter().map(|(_, image)| image)
    }
}

impl SnapshotSink for InMemorySnapshotSink {
    fn persist(&mut self, frame: &RgbImage, captured_at: &DateTime<Local>) -> Result<PathBuf> {
        let name = snapshot_file_name(captured_at);
        self.snapshots.push((name.clone(), frame.clone()));
        Ok(PathBuf::from(name))
    }
}

impl<K: SnapshotSink + ?Sized> SnapshotSink for Box<K> {
    fn persist(&mut self, frame: &RgbImage, captured_at: &DateTime<Local>) -> Result<PathBuf> {
        (**self).persist(frame, captured_at)
    }
}

/// Write through a sibling `.tmp` file and rename it into place. The temporary file is
/// removed if anything fails.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let written = write_and_rename(&tmp_path, path, data);
    if written.is_err() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("could not remove {}: {}", tmp_path.display(), e);
            }
        }
    }
    written
}

fn write_and_rename(tmp_path: &Path, path: &Path, data: &[u8]) -> Result<()> {
    {
        let mut file = File::create(tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
