//! Runtime configuration, loaded from an optional JSON file: stack
//! depth, default screen size, RNG seeding, and trace verbosity.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_max_stack_depth() -> usize {
    10_000
}

fn default_screen_width() -> i64 {
    320
}

fn default_screen_height() -> i64 {
    200
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,

    #[serde(default = "default_screen_width")]
    pub default_screen_width: i64,

    #[serde(default = "default_screen_height")]
    pub default_screen_height: i64,

    /// Fixed seed for reproducible `RND`/`RNDI` output; `None` seeds
    /// from system entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Raises the effective `tracing` log level to `debug`, surfacing
    /// the compiler-finalization and VM-dispatch-error events that
    /// `warn`-level logging otherwise filters out.
    #[serde(default)]
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_stack_depth: default_max_stack_depth(),
            default_screen_width: default_screen_width(),
            default_screen_height: default_screen_height(),
            rng_seed: None,
            trace: false,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, String> {
        let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
        serde_json::from_str(&text).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let c = Config::default();
        assert_eq!(c.max_stack_depth, 10_000);
        assert_eq!(c.default_screen_width, 320);
        assert_eq!(c.rng_seed, None);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let c: Config = serde_json::from_str(r#"{"rng_seed": 42}"#).unwrap();
        assert_eq!(c.rng_seed, Some(42));
        assert_eq!(c.max_stack_depth, 10_000);
    }
}
