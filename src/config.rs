//! REPL configuration
//!
//! Everything the embedding host can tune: engine rates, the manifest list
//! the bootstrapper fetches, and cosmetic editor options. Loadable from TOML
//! so hosts can ship a config file instead of building the struct by hand.

use crate::editor::EditorOptions;
use serde::Deserialize;
use thiserror::Error;

/// A remote sample manifest to fetch during bootstrap.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ManifestSource {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// Engine sample rate used for offline rendering; live output follows
    /// the device.
    pub sample_rate: u32,
    /// Pattern cycles per second (2.0 = 120 BPM feel for 4-step patterns).
    pub cycles_per_second: f64,
    /// Polyphony cap for the sample scheduler.
    pub max_voices: usize,
    /// Remote manifests to fetch at bootstrap. Empty by default; see
    /// [`ReplConfig::with_standard_banks`].
    pub manifests: Vec<ManifestSource>,
    pub editor: EditorOptions,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            cycles_per_second: 2.0,
            max_voices: 64,
            manifests: Vec::new(),
            editor: EditorOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
#[error("bad repl config: {0}")]
pub struct ConfigError(#[from] toml::de::Error);

impl ReplConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// The standard bank set served next to the host application: a piano,
    /// an orchestral selection, and the classic drum machines.
    pub fn with_standard_banks(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        for name in ["piano", "vcsl", "tidal-drum-machines"] {
            self.manifests.push(ManifestSource {
                name: name.to_string(),
                url: format!("{base}/{name}.json"),
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = ReplConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert!(config.manifests.is_empty());
        assert!(config.max_voices > 0);
    }

    #[test]
    fn parses_partial_toml() {
        let config = ReplConfig::from_toml_str(
            r#"
            cycles_per_second = 1.0

            [[manifests]]
            name = "piano"
            url = "https://host.example/piano.json"

            [editor]
            font_size = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.cycles_per_second, 1.0);
        assert_eq!(config.manifests.len(), 1);
        assert_eq!(config.editor.font_size, 16);
        assert_eq!(config.sample_rate, 44100);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(ReplConfig::from_toml_str("cycles_per_second = \"fast\"").is_err());
    }

    #[test]
    fn standard_banks_resolve_against_the_host() {
        let config = ReplConfig::default().with_standard_banks("https://notes.example/assets/");
        assert_eq!(config.manifests.len(), 3);
        assert_eq!(
            config.manifests[0].url,
            "https://notes.example/assets/piano.json"
        );
    }
}
