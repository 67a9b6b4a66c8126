//! Application configuration loaded from TOML

use anyhow::{Context, Result};
use lumaflow_control::{CompositorConfig, DirectorConfig, Fixture, FixtureProfile};
use lumaflow_core::{LogConfig, PipelineConfig, SyntheticConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything the binary needs to run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub compositor: CompositorConfig,
    pub director: DirectorConfig,
    pub logging: LogConfig,
    pub simulation: SimulationConfig,
    /// Patch; a small demo rig when empty
    pub fixtures: Vec<PatchEntry>,
}

/// Built-in fixture profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    GenericDimmer,
    RgbPar,
    DimmerRgbPar,
    MovingHead,
}

/// One patched fixture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchEntry {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub universe: u16,
    pub start_address: u16,
    /// Built-in profile
    #[serde(default)]
    pub kind: Option<ProfileKind>,
    /// JSON profile file, relative to the config file
    #[serde(default)]
    pub profile: Option<PathBuf>,
}

/// A level change in the synthetic signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelStep {
    pub at_ms: u64,
    pub level: f32,
}

/// Simulated session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub synthetic: SyntheticConfig,
    pub duration_secs: f64,
    /// Pace frames at the audio rate instead of as fast as possible
    pub realtime: bool,
    /// Level changes, applied in order
    pub script: Vec<LevelStep>,
    /// Request a blackout at this time
    pub blackout_at_ms: Option<u64>,
    /// Frames buffered between the tick loop and the output task
    pub output_queue: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            synthetic: SyntheticConfig::default(),
            duration_secs: 30.0,
            realtime: false,
            script: vec![
                LevelStep { at_ms: 12_000, level: 0.95 },
                LevelStep { at_ms: 17_000, level: 0.3 },
            ],
            blackout_at_ms: None,
            output_queue: 8,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse configuration")?;
        config
            .pipeline
            .validate()
            .context("Invalid pipeline configuration")?;
        Ok(config)
    }

    /// Load from a file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let Some(path) = path else {
            return Ok((Self::default(), None));
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("Failed to load config file: {:?}", path))?;
        Ok((config, path.parent().map(Path::to_path_buf)))
    }

    /// Resolve the patch into fixtures
    pub fn fixtures(&self, base_dir: Option<&Path>) -> Result<Vec<Fixture>> {
        if self.fixtures.is_empty() {
            return Ok(demo_rig());
        }
        self.fixtures
            .iter()
            .map(|entry| {
                let profile = match (&entry.profile, entry.kind) {
                    (Some(path), _) => {
                        let path = match base_dir {
                            Some(dir) if path.is_relative() => dir.join(path),
                            _ => path.clone(),
                        };
                        FixtureProfile::load(&path).with_context(|| {
                            format!("Failed to load profile for fixture {}: {:?}", entry.id, path)
                        })?
                    }
                    (None, Some(kind)) => builtin(kind),
                    (None, None) => {
                        anyhow::bail!("Fixture {} needs a kind or a profile", entry.id)
                    }
                };
                Ok(Fixture::new(
                    entry.id,
                    entry.name.clone(),
                    profile,
                    entry.universe,
                    entry.start_address,
                ))
            })
            .collect()
    }
}

fn builtin(kind: ProfileKind) -> FixtureProfile {
    match kind {
        ProfileKind::GenericDimmer => FixtureProfile::generic_dimmer(),
        ProfileKind::RgbPar => FixtureProfile::rgb_par(),
        ProfileKind::DimmerRgbPar => FixtureProfile::dimmer_rgb_par(),
        ProfileKind::MovingHead => FixtureProfile::moving_head(),
    }
}

/// Four pars and two spots on universe 0
fn demo_rig() -> Vec<Fixture> {
    let mut fixtures: Vec<Fixture> = (0..4)
        .map(|i| {
            Fixture::new(
                i + 1,
                format!("Par {}", i + 1),
                FixtureProfile::dimmer_rgb_par(),
                0,
                1 + 4 * i as u16,
            )
        })
        .collect();
    for i in 0..2u16 {
        fixtures.push(Fixture::new(
            10 + i as u32,
            format!("Spot {}", i + 1),
            FixtureProfile::moving_head(),
            0,
            33 + 16 * i,
        ));
    }
    fixtures
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumaflow_core::HarmonyMode;
    use std::io::Write;

    #[test]
    fn test_defaults_give_demo_rig() {
        let config = AppConfig::default();
        let fixtures = config.fixtures(None).unwrap();
        assert_eq!(fixtures.len(), 6);
        assert_eq!(config.compositor.debounce_ms, 2000);
        assert_eq!(config.simulation.script.len(), 2);
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            [pipeline.driver]
            harmony_mode = "inline"

            [compositor]
            debounce_ms = 3000

            [simulation]
            duration_secs = 5.0
            script = [{ at_ms = 1000, level = 0.9 }]

            [[fixtures]]
            id = 7
            name = "Wash"
            start_address = 100
            kind = "dimmer_rgb_par"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.driver.harmony_mode, HarmonyMode::Inline);
        assert_eq!(config.compositor.max_effects, 16);
        assert_eq!(config.compositor.debounce_ms, 3000);
        assert_eq!(config.simulation.script, vec![LevelStep { at_ms: 1000, level: 0.9 }]);

        let fixtures = config.fixtures(None).unwrap();
        assert_eq!(fixtures[0].id, 7);
        assert_eq!(fixtures[0].end_address(), 103);
    }

    #[test]
    fn test_invalid_pipeline_rejected() {
        let err = AppConfig::from_toml_str("[pipeline.spectral]\nfft_size = 1000\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_profile_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut profile = std::fs::File::create(dir.path().join("wash.json")).unwrap();
        write!(
            profile,
            r#"{{"name": "Wash", "manufacturer": "Acme", "channels": [
                {{"name": "Dim", "channel_type": "Dimmer", "default_value": 0}}
            ]}}"#
        )
        .unwrap();

        let config_path = dir.path().join("show.toml");
        std::fs::write(
            &config_path,
            "[[fixtures]]\nid = 1\nname = \"Wash\"\nstart_address = 1\nprofile = \"wash.json\"\n",
        )
        .unwrap();

        let (config, base_dir) = AppConfig::load(Some(&config_path)).unwrap();
        let fixtures = config.fixtures(base_dir.as_deref()).unwrap();
        assert_eq!(fixtures[0].profile.name, "Wash");
    }

    #[test]
    fn test_missing_kind_and_profile() {
        let config = AppConfig::from_toml_str(
            "[[fixtures]]\nid = 1\nname = \"Mystery\"\nstart_address = 1\n",
        )
        .unwrap();
        assert!(config.fixtures(None).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/lumaflow.toml"))).is_err());
        assert!(AppConfig::load(None).unwrap().1.is_none());
    }
}
