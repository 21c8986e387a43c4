use std::path::{Path, PathBuf};

use crate::error::StreamError;

const MAX_CAMERA_ID_LEN: usize = 64;

/// Validate a camera id.
///
/// Ids are 1-64 chars, ASCII alphanumeric or `-`, starting alphanumeric.
/// `_` and `.` are reserved as namespace delimiters so that no camera's
/// file names can ever be a prefix match for another camera's.
pub fn validate_camera_id(camera_id: &str) -> Result<(), StreamError> {
    if camera_id.is_empty() || camera_id.len() > MAX_CAMERA_ID_LEN {
        return Err(StreamError::ConfigurationInvalid(format!(
            "camera id must be 1-{} characters",
            MAX_CAMERA_ID_LEN
        )));
    }
    if !camera_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(StreamError::ConfigurationInvalid(format!(
            "camera id '{}' may only contain letters, digits and '-'",
            camera_id
        )));
    }
    if !camera_id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(StreamError::ConfigurationInvalid(format!(
            "camera id '{}' must start with a letter or digit",
            camera_id
        )));
    }
    Ok(())
}

/// Result of removing a camera's files
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub warnings: Vec<String>,
}

/// The slice of the shared output directory owned by one camera.
///
/// Playlist: `<dir>/<prefix>_<camera>.m3u8`
/// Segments: `<dir>/<prefix>_<camera>_<NNN>.ts`
#[derive(Debug, Clone)]
pub struct OutputNamespace {
    dir: PathBuf,
    base: String,
    public_base_url: String,
}

impl OutputNamespace {
    pub fn new(dir: &Path, prefix: &str, camera_id: &str, public_base_url: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            base: format!("{}_{}", prefix, camera_id),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn playlist_name(&self) -> String {
        format!("{}.m3u8", self.base)
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.dir.join(self.playlist_name())
    }

    /// Externally routable reference to the playlist
    pub fn public_url(&self) -> String {
        format!("{}/{}", self.public_base_url, self.playlist_name())
    }

    /// Whether a file in the output directory belongs to this camera.
    ///
    /// Matches `<base>.<ext...>` and `<base>_<digits>.<ext...>`, which covers
    /// the playlist, segments and the transcoder's `.tmp` siblings.
    pub fn owns(&self, file_name: &str) -> bool {
        let Some(rest) = file_name.strip_prefix(self.base.as_str()) else {
            return false;
        };
        if let Some(ext) = rest.strip_prefix('.') {
            return !ext.is_empty();
        }
        if let Some(numbered) = rest.strip_prefix('_') {
            let digits = numbered.chars().take_while(|c| c.is_ascii_digit()).count();
            let after = &numbered[digits..];
            return digits > 0 && after.len() > 1 && after.starts_with('.');
        }
        false
    }

    /// Delete every file this camera owns.
    ///
    /// Failures are collected as warnings and never abort the sweep.
    pub async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                report
                    .warnings
                    .push(format!("cannot read {}: {}", self.dir.display(), e));
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report
                        .warnings
                        .push(format!("cannot list {}: {}", self.dir.display(), e));
                    break;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !self.owns(name) {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => report.removed += 1,
                // The transcoder rotates segments on its own
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => report.warnings.push(format!("cannot remove {}: {}", name, e)),
            }
        }

        report
    }
}
