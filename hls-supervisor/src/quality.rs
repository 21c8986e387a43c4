//! Named encoding presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Profile used when a requested name is unknown
pub const DEFAULT_QUALITY: &str = "medium";

/// Output frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("resolution '{}' is not WIDTHxHEIGHT", s))?;
        let width: u32 = w.parse().map_err(|_| format!("bad width in '{}'", s))?;
        let height: u32 = h.parse().map_err(|_| format!("bad height in '{}'", s))?;
        if width == 0 || height == 0 {
            return Err(format!("resolution '{}' has a zero dimension", s));
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

/// Encoding parameters for one named quality level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityProfile {
    pub name: &'static str,
    pub video_bitrate_kbps: u32,
    pub max_bitrate_kbps: u32,
    pub resolution: Resolution,
    /// HLS segment length in seconds
    pub segment_secs: u32,
    /// x264 speed preset
    pub preset: &'static str,
}

const PROFILES: &[QualityProfile] = &[
    QualityProfile {
        name: "low",
        video_bitrate_kbps: 500,
        max_bitrate_kbps: 600,
        resolution: Resolution::new(640, 480),
        segment_secs: 2,
        preset: "ultrafast",
    },
    QualityProfile {
        name: "medium",
        video_bitrate_kbps: 1000,
        max_bitrate_kbps: 1200,
        resolution: Resolution::new(1280, 720),
        segment_secs: 2,
        preset: "veryfast",
    },
    QualityProfile {
        name: "high",
        video_bitrate_kbps: 2500,
        max_bitrate_kbps: 3000,
        resolution: Resolution::new(1920, 1080),
        segment_secs: 4,
        preset: "fast",
    },
];

/// All known profiles, lowest quality first
pub fn profiles() -> &'static [QualityProfile] {
    PROFILES
}

/// Look up a profile by name (case-insensitive)
pub fn profile(name: &str) -> Option<&'static QualityProfile> {
    let name = name.trim();
    PROFILES.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Look up a profile, falling back to [`DEFAULT_QUALITY`] for unknown names
pub fn resolve(name: &str) -> &'static QualityProfile {
    // PROFILES[1] is "medium"
    profile(name).unwrap_or(&PROFILES[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_profile() {
        let low = profile("low").unwrap();
        assert_eq!(low.video_bitrate_kbps, 500);
        assert_eq!(low.max_bitrate_kbps, 600);
        assert_eq!(low.resolution.to_string(), "640x480");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(profile("HIGH").map(|p| p.name), Some("high"));
        assert!(profile("ultra").is_none());
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        assert_eq!(resolve("ultra").name, DEFAULT_QUALITY);
        assert_eq!(resolve("low").name, "low");
    }

    #[test]
    fn test_profiles_are_ordered_and_capped() {
        for pair in profiles().windows(2) {
            assert!(pair[0].video_bitrate_kbps < pair[1].video_bitrate_kbps);
        }
        for p in profiles() {
            assert!(p.max_bitrate_kbps >= p.video_bitrate_kbps);
        }
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!("1280x720".parse::<Resolution>().unwrap(), Resolution::new(1280, 720));
        assert!("1280".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());
    }
}
