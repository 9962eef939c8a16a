//! Render configuration: JSON files plus `MDREVEAL_*` environment overrides.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use md_stream::{Chunking, DEFAULT_MODULE_MIN_CHARS, DEFAULT_WINDOW};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub parser: ParserConfig,
    pub reconcile: ReconcileConfig,
    pub reveal: RevealConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Bytes re-parsed behind the last safe position
    pub window: usize,

    /// Group chunks into heading-delimited modules before parsing
    pub modules: bool,

    pub module_min_chars: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            modules: false,
            module_min_chars: DEFAULT_MODULE_MIN_CHARS,
        }
    }
}

impl ParserConfig {
    pub fn chunking(&self) -> Chunking {
        if self.modules {
            Chunking::Modules {
                min_chars: self.module_min_chars,
            }
        } else {
            Chunking::Direct
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// How many old nodes past the cursor are searched for a reusable one
    pub window: usize,

    /// How long collapsible updates are suppressed after the user touches
    /// one, in milliseconds
    pub collapsible_hold_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            window: 5,
            collapsible_hold_ms: 400,
        }
    }
}

impl ReconcileConfig {
    pub fn collapsible_hold(&self) -> Duration {
        Duration::from_millis(self.collapsible_hold_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    pub chars_per_step: usize,
    pub step_ms: u64,

    /// Extra delay after `,` `;` `:`
    pub clause_pause_ms: u64,

    /// Extra delay after `.` `!` `?` and their CJK forms
    pub sentence_pause_ms: u64,

    /// Random extra delay per step, `0..=jitter_ms`
    pub jitter_ms: u64,

    /// Stalled tasks are force-completed after this long
    pub watchdog_ms: u64,

    /// Pause between two consecutive block-level reveals
    pub element_gap_ms: u64,

    /// Speed-up applied after `resume` until the queue drains
    pub catch_up_factor: u32,

    /// Seed for the jitter; random when unset
    pub seed: Option<u64>,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            chars_per_step: 6,
            step_ms: 12,
            clause_pause_ms: 30,
            sentence_pause_ms: 80,
            jitter_ms: 4,
            watchdog_ms: 4000,
            element_gap_ms: 40,
            catch_up_factor: 10,
            seed: None,
        }
    }
}

impl RevealConfig {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn element_gap(&self) -> Duration {
        Duration::from_millis(self.element_gap_ms)
    }

    /// Deterministic pacing, handy for tests and replays.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ms = 0;
        self.seed = Some(0);
        self
    }
}

impl RenderConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: RenderConfig = serde_json::from_str(&contents)?;
        info!("loaded render config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `MDREVEAL_*` environment variables on top of this config.
    pub fn with_env_overrides(mut self) -> Result<Self, Error> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply overrides from any key/value source.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), Error> {
        override_with(&lookup, "MDREVEAL_WINDOW", &mut self.parser.window)?;
        override_with(&lookup, "MDREVEAL_MODULES", &mut self.parser.modules)?;
        override_with(
            &lookup,
            "MDREVEAL_MODULE_MIN_CHARS",
            &mut self.parser.module_min_chars,
        )?;
        override_with(&lookup, "MDREVEAL_RECONCILE_WINDOW", &mut self.reconcile.window)?;
        override_with(
            &lookup,
            "MDREVEAL_COLLAPSIBLE_HOLD_MS",
            &mut self.reconcile.collapsible_hold_ms,
        )?;
        override_with(&lookup, "MDREVEAL_CHARS_PER_STEP", &mut self.reveal.chars_per_step)?;
        override_with(&lookup, "MDREVEAL_STEP_MS", &mut self.reveal.step_ms)?;
        override_with(&lookup, "MDREVEAL_JITTER_MS", &mut self.reveal.jitter_ms)?;
        override_with(&lookup, "MDREVEAL_WATCHDOG_MS", &mut self.reveal.watchdog_ms)?;
        override_with(&lookup, "MDREVEAL_ELEMENT_GAP_MS", &mut self.reveal.element_gap_ms)?;
        override_with(&lookup, "MDREVEAL_CATCH_UP", &mut self.reveal.catch_up_factor)?;

        if let Some(seed) = lookup("MDREVEAL_SEED") {
            self.reveal.seed = Some(parse_value("MDREVEAL_SEED", &seed)?);
        }

        Ok(())
    }
}

fn override_with<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), Error> {
    if let Some(value) = lookup(key) {
        *target = parse_value(key, &value)?;
        debug!("config override {}={}", key, value);
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{key}: invalid value '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: RenderConfig =
            serde_json::from_str(r#"{ "reveal": { "chars_per_step": 3 } }"#).unwrap();
        assert_eq!(config.reveal.chars_per_step, 3);
        assert_eq!(config.reveal.step_ms, 12);
        assert_eq!(config.parser, ParserConfig::default());
    }

    #[test]
    fn test_load_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.json");

        let mut config = RenderConfig::default();
        config.parser.modules = true;
        config.reveal.seed = Some(7);
        config.save(&path).unwrap();

        assert_eq!(RenderConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RenderConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {err:?}");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MDREVEAL_CHARS_PER_STEP", "2"),
            ("MDREVEAL_MODULES", "true"),
            ("MDREVEAL_SEED", "99"),
        ]
        .into_iter()
        .collect();

        let mut config = RenderConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.reveal.chars_per_step, 2);
        assert!(config.parser.modules);
        assert_eq!(config.reveal.seed, Some(99));
        assert_eq!(
            config.parser.chunking(),
            Chunking::Modules {
                min_chars: DEFAULT_MODULE_MIN_CHARS
            }
        );
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut config = RenderConfig::default();
        let err = config
            .apply_overrides(|k| (k == "MDREVEAL_STEP_MS").then(|| "fast".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
