//! Persisted theme preference.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceFile {
    #[serde(rename = "courseBuilderTheme", default)]
    theme: Theme,
}

/// A single-key JSON preference file.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored theme. A missing or unreadable file yields the default.
    pub async fn theme(&self) -> Theme {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => match serde_json::from_str::<PreferenceFile>(&contents) {
                Ok(file) => file.theme,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Ignoring malformed preference file");
                    Theme::default()
                }
            },
            Err(_) => Theme::default(),
        }
    }

    pub async fn set_theme(&self, theme: Theme) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(&PreferenceFile { theme })?;
        tokio::fs::write(&self.path, contents)
            .await
            .with_context(|| format!("Failed to write preferences to {:?}", self.path))
    }

    /// Flips the stored theme and returns the new value.
    pub async fn toggle_theme(&self) -> Result<Theme> {
        let theme = self.theme().await.toggled();
        self.set_theme(theme).await?;
        Ok(theme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_defaults_to_light() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("prefs.json"));
        assert_eq!(store.theme().await, Theme::Light);
    }

    #[tokio::test]
    async fn test_toggle_persists_under_single_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join("nested").join("prefs.json"));

        assert_eq!(store.toggle_theme().await.unwrap(), Theme::Dark);
        assert_eq!(store.theme().await, Theme::Dark);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"courseBuilderTheme": "dark"}));

        assert_eq!(store.toggle_theme().await.unwrap(), Theme::Light);
    }

    #[tokio::test]
    async fn test_malformed_file_defaults_to_light() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(PreferenceStore::new(path).theme().await, Theme::Light);
    }
}
