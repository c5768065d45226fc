use anyhow::Context;
use common::env_opt;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_EMOJIS: [&str; 8] = ["😂", "😎", "😆", "😋", "🫡", "😊", "😜", "🤠"];
pub const DEFAULT_SETTINGS_FILE: &str = "facemark-settings.json";

fn default_emojis() -> Vec<String> {
    DEFAULT_EMOJIS.iter().map(|e| e.to_string()).collect()
}

/// Persisted emoji front-end preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmojiSettings {
    #[serde(default = "default_emojis")]
    pub emojis: Vec<String>,
    /// Outline font used to draw emojis and labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<PathBuf>,
}

impl Default for EmojiSettings {
    fn default() -> Self {
        Self {
            emojis: default_emojis(),
            font: None,
        }
    }
}

impl EmojiSettings {
    /// Settings file location, overridable with `FACEMARK_SETTINGS`.
    pub fn path() -> PathBuf {
        env_opt("FACEMARK_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }

    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        let mut settings: EmojiSettings = serde_json::from_str(&json)
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        if settings.emojis.is_empty() {
            settings.emojis = default_emojis();
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write settings {}", path.display()))?;
        tracing::info!(path = %path.display(), emojis = self.emojis.len(), "Settings saved");
        Ok(())
    }

    /// Replace the emoji list with the grapheme clusters of `text`; each
    /// emoji, with its modifiers and joiners, is one entry and whitespace is
    /// ignored. Empty text restores the default list.
    pub fn set_emojis(&mut self, text: &str) {
        let emojis: Vec<String> = text
            .graphemes(true)
            .filter(|g| !g.trim().is_empty())
            .map(str::to_string)
            .collect();
        self.emojis = if emojis.is_empty() {
            default_emojis()
        } else {
            emojis
        };
    }

    pub fn reset_emojis(&mut self) {
        self.emojis = default_emojis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EmojiSettings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, EmojiSettings::default());
        assert_eq!(settings.emojis.len(), 8);
    }

    #[test]
    fn test_round_trip_and_empty_list_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");

        let mut settings = EmojiSettings::default();
        settings.set_emojis("🙂  🙃\n🤖");
        settings.font = Some(PathBuf::from("/fonts/NotoEmoji.ttf"));
        settings.save(&path).unwrap();

        let loaded = EmojiSettings::load(&path).unwrap();
        assert_eq!(loaded.emojis, ["🙂", "🙃", "🤖"]);
        assert_eq!(loaded.font, settings.font);

        fs::write(&path, r#"{"emojis": []}"#).unwrap();
        assert_eq!(EmojiSettings::load(&path).unwrap().emojis.len(), 8);
    }

    /// Test adjacent emojis split into one entry each, keeping ZWJ sequences
    /// and skin-tone modifiers whole
    #[test]
    fn test_set_emojis_splits_graphemes() {
        let mut settings = EmojiSettings::default();
        settings.set_emojis("😂😎🤠");
        assert_eq!(settings.emojis, ["😂", "😎", "🤠"]);

        settings.set_emojis("👍🏽 👨\u{200d}👩\u{200d}👧🫡");
        assert_eq!(settings.emojis, ["👍🏽", "👨\u{200d}👩\u{200d}👧", "🫡"]);
    }

    #[test]
    fn test_set_emojis_empty_resets() {
        let mut settings = EmojiSettings::default();
        settings.set_emojis("🤖");
        assert_eq!(settings.emojis, ["🤖"]);
        settings.set_emojis("   ");
        assert_eq!(settings.emojis, EmojiSettings::default().emojis);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{").unwrap();
        assert!(EmojiSettings::load(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_settings_path_from_env() {
        unsafe { env::set_var("FACEMARK_SETTINGS", "/tmp/facemark.json") };
        assert_eq!(EmojiSettings::path(), PathBuf::from("/tmp/facemark.json"));
        unsafe { env::remove_var("FACEMARK_SETTINGS") };
        assert_eq!(EmojiSettings::path(), PathBuf::from(DEFAULT_SETTINGS_FILE));
    }
}
