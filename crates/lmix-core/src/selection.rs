//! Upload selection: the chosen file, loudness preset and processing mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Lowest accepted custom loudness target (LUFS).
pub const MIN_CUSTOM_LUFS: f64 = -30.0;
/// Highest accepted custom loudness target (LUFS).
pub const MAX_CUSTOM_LUFS: f64 = -2.0;

/// Pre-flight validation failures. These never reach the network.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Please select a file to upload")]
    NoFile,
    #[error("Could not read file '{path}': {reason}")]
    Unreadable { path: String, reason: String },
    #[error("{0}")]
    UnsupportedFileType(String),
    #[error("Please enter a valid LUFS value between -30 and -2")]
    LoudnessOutOfRange,
    #[error("Custom loudness targets are only available for Premium and Professional users")]
    CustomLoudnessNotEntitled,
    #[error("Unknown preset '{name}'{}", .suggestion.as_ref().map(|s| format!(" (did you mean '{s}'?)")).unwrap_or_default())]
    UnknownPreset {
        name: String,
        suggestion: Option<String>,
    },
    #[error("Unknown processing mode '{0}' (expected 'fast' or 'precise')")]
    UnknownMode(String),
}

/// Processing profile requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Fast,
    Precise,
}

impl ProcessingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingMode::Fast => "fast",
            ProcessingMode::Precise => "precise",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProcessingMode::Fast => "Fast Processing",
            ProcessingMode::Precise => "Precise Processing",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(ProcessingMode::Fast),
            "precise" => Ok(ProcessingMode::Precise),
            other => Err(ValidationError::UnknownMode(other.to_string())),
        }
    }
}

/// Loudness presets offered by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Dj,
    Streaming,
    Podcast,
    Broadcast,
    Custom,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Dj,
        Preset::Streaming,
        Preset::Podcast,
        Preset::Broadcast,
        Preset::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Dj => "dj",
            Preset::Streaming => "streaming",
            Preset::Podcast => "podcast",
            Preset::Broadcast => "broadcast",
            Preset::Custom => "custom",
        }
    }

    /// Name used in the completion message ("optimized for ...").
    pub fn display_name(self) -> &'static str {
        match self {
            Preset::Dj => "DJ Content",
            Preset::Streaming => "Streaming Content",
            Preset::Podcast => "Podcast Content",
            Preset::Broadcast => "Broadcast Content",
            Preset::Custom => "Custom Content",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Preset::Dj => "Loud and punchy, optimized for impact and energy.",
            Preset::Streaming => {
                "Normalized for streaming platforms like Spotify, Youtube and Apple Music."
            }
            Preset::Podcast => "Clear and consistent levels for spoken word content.",
            Preset::Broadcast => "EBU R128 standard for radio and television broadcast.",
            Preset::Custom => "Set your own target loudness level.",
        }
    }

    /// Integrated loudness target applied by the backend, `None` for custom.
    pub fn target_lufs(self) -> Option<f64> {
        match self {
            Preset::Dj => Some(-7.0),
            Preset::Streaming => Some(-14.0),
            Preset::Podcast => Some(-16.0),
            Preset::Broadcast => Some(-23.0),
            Preset::Custom => None,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Preset::ALL
            .into_iter()
            .find(|preset| preset.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownPreset {
                suggestion: suggest_preset(&wanted).map(|p| p.as_str().to_string()),
                name: s.to_string(),
            })
    }
}

/// Closest known preset name for a misspelt input.
pub fn suggest_preset(input: &str) -> Option<Preset> {
    Preset::ALL
        .into_iter()
        .map(|preset| (preset, strsim::jaro_winkler(input, preset.as_str())))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(preset, _)| preset)
}

/// Account tier as exposed by the dashboard (`data-user-tier`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserTier(pub u8);

impl UserTier {
    pub const FREE: UserTier = UserTier(0);
    pub const PREMIUM: UserTier = UserTier(2);
    pub const PROFESSIONAL: UserTier = UserTier(3);

    /// Premium and Professional accounts may pick custom targets and non-MP3 inputs.
    pub fn is_premium(self) -> bool {
        matches!(self.0, 2 | 3)
    }
}

/// A validated custom loudness target in LUFS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessTarget(f64);

impl LoudnessTarget {
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if value.is_finite() && (MIN_CUSTOM_LUFS..=MAX_CUSTOM_LUFS).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::LoudnessOutOfRange)
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl FromStr for LoudnessTarget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = s
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::LoudnessOutOfRange)?;
        LoudnessTarget::new(parsed)
    }
}

impl fmt::Display for LoudnessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing options chosen alongside the file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UploadOptions {
    pub preset: Preset,
    pub mode: ProcessingMode,
    pub custom_target: Option<LoudnessTarget>,
}

impl UploadOptions {
    /// Check the option combination against the caller's entitlements.
    ///
    /// Returns the explicit target to send with the confirmation, if any.
    pub fn resolve_target(&self, tier: UserTier) -> Result<Option<LoudnessTarget>, ValidationError> {
        if self.preset != Preset::Custom {
            return Ok(None);
        }
        if !tier.is_premium() {
            return Err(ValidationError::CustomLoudnessNotEntitled);
        }
        self.custom_target
            .map(Some)
            .ok_or(ValidationError::LoudnessOutOfRange)
    }
}

/// A user-chosen file ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSelection {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

impl UploadSelection {
    /// Inspect `path` and check that the account may upload this kind of file.
    pub fn from_path(path: impl AsRef<Path>, tier: UserTier) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|err| ValidationError::Unreadable {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        if !metadata.is_file() {
            return Err(ValidationError::Unreadable {
                path: path.display().to_string(),
                reason: "not a regular file".to_string(),
            });
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or(ValidationError::NoFile)?;

        check_file_type(&file_name, tier)?;

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            size: metadata.len(),
        })
    }

    /// Size in megabytes with two decimals, as shown next to the file name.
    pub fn size_label(&self) -> String {
        format!("{:.2} MB", self.size as f64 / (1024.0 * 1024.0))
    }
}

/// Best-effort MIME type from the file extension.
pub fn guess_mime_type(file_name: &str) -> Option<&'static str> {
    mime_guess::from_path(file_name).first_raw()
}

/// Premium accounts accept any audio file, everyone else MP3 only.
pub fn check_file_type(file_name: &str, tier: UserTier) -> Result<(), ValidationError> {
    let lower = file_name.to_ascii_lowercase();
    let mime = guess_mime_type(&lower).unwrap_or("");

    let accepted = if tier.is_premium() {
        mime.starts_with("audio/") || lower.ends_with(".mp3") || lower.ends_with(".wav")
    } else {
        mime.starts_with("audio/mpeg") || lower.ends_with(".mp3")
    };

    if accepted {
        Ok(())
    } else if tier.is_premium() {
        Err(ValidationError::UnsupportedFileType(
            "Please upload an audio file (MP3 or WAV supported)".to_string(),
        ))
    } else {
        Err(ValidationError::UnsupportedFileType(
            "Please upload an audio file (MP3 only - WAV support available with Premium)"
                .to_string(),
        ))
    }
}

/// Holds at most one active selection.
#[derive(Debug, Default)]
pub struct SelectionSlot {
    current: Option<UploadSelection>,
}

impl SelectionSlot {
    /// Replace any previous selection.
    pub fn select(&mut self, selection: UploadSelection) -> Option<UploadSelection> {
        self.current.replace(selection)
    }

    pub fn clear(&mut self) -> Option<UploadSelection> {
        self.current.take()
    }

    pub fn current(&self) -> Option<&UploadSelection> {
        self.current.as_ref()
    }

    pub fn require(&self) -> Result<&UploadSelection, ValidationError> {
        self.current.as_ref().ok_or(ValidationError::NoFile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_target_accepts_closed_interval() {
        assert!(LoudnessTarget::new(-30.0).is_ok());
        assert!(LoudnessTarget::new(-2.0).is_ok());
        assert!(LoudnessTarget::new(-14.5).is_ok());
        assert_eq!(
            LoudnessTarget::new(-31.0),
            Err(ValidationError::LoudnessOutOfRange)
        );
        assert_eq!(
            LoudnessTarget::new(-1.0),
            Err(ValidationError::LoudnessOutOfRange)
        );
        assert!(LoudnessTarget::new(f64::NAN).is_err());
    }

    #[test]
    fn custom_target_rejects_non_numeric_input() {
        assert!("loud".parse::<LoudnessTarget>().is_err());
        assert!("".parse::<LoudnessTarget>().is_err());
        assert_eq!("-9".parse::<LoudnessTarget>().unwrap().value(), -9.0);
    }

    #[test]
    fn custom_preset_requires_premium() {
        let options = UploadOptions {
            preset: Preset::Custom,
            mode: ProcessingMode::Precise,
            custom_target: Some(LoudnessTarget::new(-10.0).unwrap()),
        };
        assert_eq!(
            options.resolve_target(UserTier::FREE),
            Err(ValidationError::CustomLoudnessNotEntitled)
        );
        assert_eq!(
            options.resolve_target(UserTier::PREMIUM).unwrap().unwrap().value(),
            -10.0
        );
    }

    #[test]
    fn builtin_preset_never_sends_explicit_target() {
        let options = UploadOptions {
            preset: Preset::Podcast,
            custom_target: Some(LoudnessTarget::new(-10.0).unwrap()),
            ..UploadOptions::default()
        };
        assert_eq!(options.resolve_target(UserTier::PROFESSIONAL), Ok(None));
    }

    #[test]
    fn free_tier_is_mp3_only() {
        assert!(check_file_type("set.mp3", UserTier::FREE).is_ok());
        assert!(check_file_type("set.MP3", UserTier::FREE).is_ok());
        assert!(check_file_type("set.wav", UserTier::FREE).is_err());
        assert!(check_file_type("set.wav", UserTier::PREMIUM).is_ok());
        assert!(check_file_type("set.flac", UserTier::PREMIUM).is_ok());
        assert!(check_file_type("notes.txt", UserTier::PREMIUM).is_err());
    }

    #[test]
    fn premium_accepts_other_audio_containers() {
        for name in ["set.ogg", "set.m4a", "set.aiff", "SET.FLAC"] {
            assert!(check_file_type(name, UserTier::PREMIUM).is_ok(), "{name}");
            assert!(check_file_type(name, UserTier::FREE).is_err(), "{name}");
        }
        assert!(check_file_type("clip.mp4", UserTier::PREMIUM).is_err());
        assert!(check_file_type("set", UserTier::PREMIUM).is_err());
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(guess_mime_type("a.mp3"), Some("audio/mpeg"));
        assert_eq!(guess_mime_type("A.MP3"), Some("audio/mpeg"));
        assert!(guess_mime_type("mix.wav").is_some_and(|mime| mime.starts_with("audio/")));
        assert_eq!(guess_mime_type("no-extension"), None);
    }

    #[test]
    fn preset_parsing_suggests_close_names() {
        assert_eq!("Podcast".parse::<Preset>().unwrap(), Preset::Podcast);
        match "streamng".parse::<Preset>() {
            Err(ValidationError::UnknownPreset { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("streaming"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn selection_slot_holds_one_file() {
        let mut slot = SelectionSlot::default();
        assert_eq!(slot.require(), Err(ValidationError::NoFile));
        let first = UploadSelection {
            path: PathBuf::from("a.mp3"),
            file_name: "a.mp3".into(),
            size: 1,
        };
        let second = UploadSelection {
            path: PathBuf::from("b.mp3"),
            file_name: "b.mp3".into(),
            size: 2,
        };
        assert!(slot.select(first.clone()).is_none());
        assert_eq!(slot.select(second.clone()), Some(first));
        assert_eq!(slot.current(), Some(&second));
        slot.clear();
        assert!(slot.current().is_none());
    }

    #[test]
    fn size_label_uses_megabytes() {
        let selection = UploadSelection {
            path: PathBuf::from("a.mp3"),
            file_name: "a.mp3".into(),
            size: 5 * 1024 * 1024 + 512 * 1024,
        };
        assert_eq!(selection.size_label(), "5.50 MB");
    }
}
