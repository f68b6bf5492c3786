use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, info};
use thiserror::Error;

use crate::pcd::{self, PcdError};
use crate::point_cloud::{PointCloud, PointCloudError};

/// Point cloud file formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointCloudFormat {
    Pcd,
}

impl PointCloudFormat {
    pub const ALL: &'static [PointCloudFormat] = &[PointCloudFormat::Pcd];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pcd => "pcd",
        }
    }

    /// Case-insensitive lookup by file extension, without the leading dot.
    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.extension().eq_ignore_ascii_case(extension))
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or_default();
        Self::from_extension(extension).ok_or_else(|| LoadError::UnsupportedFormat {
            extension: extension.to_string(),
            supported: SupportedFormats,
        })
    }
}

/// Display helper listing every supported extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedFormats;

impl fmt::Display for SupportedFormats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = PointCloudFormat::ALL
            .iter()
            .map(|format| format.extension())
            .collect();
        f.write_str(&names.join(", "))
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unknown point cloud file format. Supported file formats are: {supported}")]
    UnsupportedFormat {
        extension: String,
        supported: SupportedFormats,
    },
    #[error("unable to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode {name}")]
    Decode {
        name: String,
        #[source]
        source: PcdError,
    },
    #[error("{name} is not a valid point cloud")]
    InvalidCloud {
        name: String,
        #[source]
        source: PointCloudError,
    },
    #[error("still loading {pending}; wait for it to finish")]
    Busy { pending: String },
    #[error("loader thread for {name} panicked")]
    WorkerPanicked { name: String },
}

/// Name a cloud gets in the scene: the file name of its path.
pub fn cloud_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Reads and decodes a point cloud file on the calling thread.
pub fn load_point_cloud(path: impl AsRef<Path>) -> Result<PointCloud, LoadError> {
    let path = path.as_ref();
    let format = PointCloudFormat::from_path(path)?;
    let name = cloud_name(path);
    let started = Instant::now();

    let data = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = match format {
        PointCloudFormat::Pcd => pcd::decode(&data).map_err(|source| LoadError::Decode {
            name: name.clone(),
            source,
        })?,
    };
    let cloud = PointCloud::from_attributes(name.clone(), decoded.positions, decoded.colors)
        .map_err(|source| LoadError::InvalidCloud {
            name: name.clone(),
            source,
        })?;

    debug!(
        "decoded {} ({} bytes, {} points) in {:?}",
        name,
        data.len(),
        cloud.point_count(),
        started.elapsed()
    );
    Ok(cloud)
}

struct PendingLoad {
    name: String,
    handle: JoinHandle<Result<PointCloud, LoadError>>,
}

/// Runs one point cloud load at a time on a background thread.
///
/// Results are only handed out once decoding has fully finished, so callers
/// never observe a partially built cloud.
#[derive(Default)]
pub struct CloudLoader {
    pending: Option<PendingLoad>,
}

impl CloudLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Name of the file currently being loaded.
    pub fn pending_name(&self) -> Option<&str> {
        self.pending.as_ref().map(|pending| pending.name.as_str())
    }

    /// Starts loading `path`. Fails immediately when another load is still
    /// running or the extension is not supported.
    pub fn request(&mut self, path: impl Into<PathBuf>) -> Result<(), LoadError> {
        if let Some(pending) = &self.pending {
            return Err(LoadError::Busy {
                pending: pending.name.clone(),
            });
        }

        let path = path.into();
        PointCloudFormat::from_path(&path)?;
        info!("loading point cloud {}", path.display());
        let job = {
            let path = path.clone();
            move || load_point_cloud(path)
        };
        self.spawn(cloud_name(&path), job)
            .map_err(|source| LoadError::Io { path, source })
    }

    fn spawn<F>(&mut self, name: String, job: F) -> io::Result<()>
    where
        F: FnOnce() -> Result<PointCloud, LoadError> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("cloud-loader".to_string())
            .spawn(job)?;
        self.pending = Some(PendingLoad { name, handle });
        Ok(())
    }

    /// Returns the finished load, if any, without blocking.
    pub fn poll(&mut self) -> Option<Result<PointCloud, LoadError>> {
        if !self.pending.as_ref()?.handle.is_finished() {
            return None;
        }
        self.pending.take().map(Self::join)
    }

    /// Blocks until the pending load finishes.
    pub fn wait(&mut self) -> Option<Result<PointCloud, LoadError>> {
        self.pending.take().map(Self::join)
    }

    fn join(pending: PendingLoad) -> Result<PointCloud, LoadError> {
        let PendingLoad { name, handle } = pending;
        handle
            .join()
            .unwrap_or(Err(LoadError::WorkerPanicked { name }))
    }
}

impl fmt::Debug for CloudLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudLoader")
            .field("pending", &self.pending_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::{Builder, NamedTempFile};

    use super::*;
    use crate::scene::SceneObject;

    const TWO_POINTS: &str = "VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 2\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS 2\nDATA ascii\n0 0 0\n2 4 -2\n";

    fn fixture(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(
            PointCloudFormat::from_extension("PCD"),
            Some(PointCloudFormat::Pcd)
        );
        assert_eq!(PointCloudFormat::from_extension("ply"), None);
    }

    #[test]
    fn unsupported_format_message_lists_formats() {
        let err = load_point_cloud("scan.las").unwrap_err();
        assert!(matches!(&err, LoadError::UnsupportedFormat { extension, .. } if extension == "las"));
        assert_eq!(
            err.to_string(),
            "Unknown point cloud file format. Supported file formats are: pcd"
        );
    }

    #[test]
    fn loads_cloud_named_after_file() {
        let file = fixture(".pcd", TWO_POINTS);
        let cloud = load_point_cloud(file.path()).unwrap();
        assert_eq!(cloud.name(), cloud_name(file.path()));
        assert_eq!(cloud.point_count(), 2);
        assert!(!cloud.has_colors());
    }

    #[test]
    fn header_only_file_is_an_invalid_cloud() {
        let header_only = "VERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 0\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS 0\nDATA ascii\n";
        let file = fixture(".pcd", header_only);
        assert!(matches!(
            load_point_cloud(file.path()),
            Err(LoadError::InvalidCloud {
                source: PointCloudError::Empty,
                ..
            })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_point_cloud(dir.path().join("absent.pcd")),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn overlapping_requests_are_rejected() {
        let file = fixture(".pcd", TWO_POINTS);
        let mut loader = CloudLoader::new();
        loader.request(file.path()).unwrap();

        let busy = loader.request(file.path()).unwrap_err();
        assert!(matches!(busy, LoadError::Busy { pending } if pending == cloud_name(file.path())));

        let cloud = loader.wait().unwrap().unwrap();
        assert_eq!(cloud.point_count(), 2);
        assert!(!loader.is_pending());
        assert!(loader.poll().is_none());
    }

    #[test]
    fn unsupported_request_fails_without_spawning() {
        let mut loader = CloudLoader::new();
        assert!(matches!(
            loader.request("scan.xyz"),
            Err(LoadError::UnsupportedFormat { .. })
        ));
        assert!(!loader.is_pending());
    }

    #[test]
    fn poll_eventually_yields_the_result() {
        let file = fixture(".pcd", &TWO_POINTS.replace("DATA ascii", "DATA lzma"));
        let mut loader = CloudLoader::new();
        loader.request(file.path()).unwrap();
        let result = loop {
            if let Some(result) = loader.poll() {
                break result;
            }
            thread::yield_now();
        };
        assert!(matches!(
            result,
            Err(LoadError::Decode {
                source: PcdError::UnsupportedEncoding(_),
                ..
            })
        ));
    }

    #[test]
    fn panicking_worker_is_reported_and_frees_the_slot() {
        let mut loader = CloudLoader::new();
        loader
            .spawn("broken.pcd".to_string(), || panic!("decoder blew up"))
            .unwrap();
        assert_eq!(loader.pending_name(), Some("broken.pcd"));

        let result = loader.wait().unwrap();
        assert!(matches!(result, Err(LoadError::WorkerPanicked { name }) if name == "broken.pcd"));
        assert!(!loader.is_pending());

        let file = fixture(".pcd", TWO_POINTS);
        loader.request(file.path()).unwrap();
        assert_eq!(loader.wait().unwrap().unwrap().point_count(), 2);
    }

    #[test]
    fn hostile_point_count_fails_the_load_without_aborting() {
        let file = fixture(
            ".pcd",
            &TWO_POINTS
                .replace("WIDTH 2", "WIDTH 100000000000")
                .replace("POINTS 2", "POINTS 100000000000"),
        );
        let mut loader = CloudLoader::new();
        loader.request(file.path()).unwrap();
        assert!(matches!(
            loader.wait().unwrap(),
            Err(LoadError::Decode {
                source: PcdError::Truncated { .. },
                ..
            })
        ));
    }
}
