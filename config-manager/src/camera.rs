use std::collections::BTreeMap;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;

/// Network location and credentials of a single RTSP camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub ip: String,
    #[serde(default = "default_rtsp_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub path: String,
}

fn default_rtsp_port() -> u16 {
    554
}

impl CameraConfig {
    /// Create a camera without credentials
    pub fn new(ip: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port,
            username: None,
            password: None,
            path: path.into(),
        }
    }

    /// Attach credentials (builder pattern)
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Check host, port and path before anything is spawned for this camera.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let host = self.ip.trim();
        if host.is_empty() {
            return Err(ConfigError::Invalid("camera host is empty".to_string()));
        }
        if host.len() != self.ip.len() || host.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!("camera host '{}' contains whitespace", self.ip)));
        }

        // Bracketed IPv6 literals carry colons; everything else must be a bare host.
        let bracketed = host.starts_with('[') && host.ends_with(']') && host.len() > 2;
        let forbidden: &[char] = if bracketed { &['/', '@'] } else { &['/', '@', ':', '[', ']'] };
        if host.contains(forbidden) {
            return Err(ConfigError::Invalid(format!("camera host '{}' is not a plain address", host)));
        }

        if self.port == 0 {
            return Err(ConfigError::Invalid("camera port must be between 1 and 65535".to_string()));
        }

        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "camera path '{}' must start with '/'",
                self.path
            )));
        }
        if self.path.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!("camera path '{}' contains whitespace", self.path)));
        }

        let has_user = self.username.as_deref().map(|u| !u.is_empty()).unwrap_or(false);
        if self.password.is_some() && !has_user {
            return Err(ConfigError::Invalid("camera password given without a username".to_string()));
        }

        Ok(())
    }

    /// Build `rtsp://[user:pass@]ip:port/path`.
    pub fn rtsp_url(&self) -> String {
        self.format_url(self.password.as_deref())
    }

    /// Same as [`CameraConfig::rtsp_url`] with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        self.format_url(self.password.as_ref().map(|_| "***"))
    }

    fn format_url(&self, password: Option<&str>) -> String {
        let auth = match (self.username.as_deref(), password) {
            (Some(user), Some(pass)) if !user.is_empty() => format!("{}:{}@", user, pass),
            (Some(user), None) if !user.is_empty() => format!("{}@", user),
            _ => String::new(),
        };
        format!("rtsp://{}{}:{}{}", auth, self.ip, self.port, self.path)
    }
}

/// On-disk camera entry; the password is stored base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEntry {
    pub ip: String,
    #[serde(default = "default_rtsp_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_b64: Option<String>,
    pub path: String,
    /// Quality profile used when a start request names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

impl CameraEntry {
    pub fn from_camera(camera: &CameraConfig) -> Self {
        Self {
            ip: camera.ip.clone(),
            port: camera.port,
            username: camera.username.clone(),
            password_b64: camera.password.as_deref().map(|p| STANDARD.encode(p)),
            path: camera.path.clone(),
            quality: None,
        }
    }

    /// Decode into the runtime form
    pub fn to_camera(&self) -> Result<CameraConfig, ConfigError> {
        Ok(CameraConfig {
            ip: self.ip.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password_b64.as_deref().map(decode_password).transpose()?,
            path: self.path.clone(),
        })
    }
}

/// Stored passwords are base64, which hides them from a casual glance only
fn decode_password(stored: &str) -> Result<String, ConfigError> {
    let bytes = STANDARD
        .decode(stored.trim())
        .map_err(|e| ConfigError::Credential(format!("password is not base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|_| ConfigError::Credential("password is not UTF-8".to_string()))
}

/// Camera configuration provider backed by `cameras.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraStore {
    #[serde(default)]
    cameras: BTreeMap<String, CameraEntry>,
}

impl CameraStore {
    /// Load from the default XDG location, or an empty store if none exists yet
    pub fn load() -> Result<Self, ConfigError> {
        let path = paths::cameras_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let store: Self = toml::from_str(&content)?;
        Ok(store)
    }

    /// Save with owner-only permissions; the file holds camera credentials.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        paths::write_secure(path, &content)
    }

    pub fn get(&self, camera_id: &str) -> Result<Option<CameraConfig>, ConfigError> {
        self.cameras.get(camera_id).map(CameraEntry::to_camera).transpose()
    }

    /// Preferred quality for a camera, if its entry names one
    pub fn quality(&self, camera_id: &str) -> Option<&str> {
        self.cameras.get(camera_id).and_then(|e| e.quality.as_deref())
    }

    pub fn insert(&mut self, camera_id: impl Into<String>, camera: &CameraConfig) {
        self.cameras.insert(camera_id.into(), CameraEntry::from_camera(camera));
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.cameras.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}
