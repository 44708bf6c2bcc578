use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::internal::error::ConfigurationError;
use crate::internal::fixtures::FixtureDefaults;

pub const CONFIG_FILE_NAME: &str = "golden.ron";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory scanned for `*.json` case files and `*.html` documents.
    #[serde(default = "default_fixture_dir")]
    pub fixture_dir: PathBuf,
    #[serde(default = "default_baseline_dir")]
    pub baseline_dir: PathBuf,
    #[serde(default = "default_diff_dir")]
    pub diff_dir: PathBuf,
    /// Parent for per-fixture scratch directories (system temp when unset)
    pub work_dir: Option<PathBuf>,
    pub renderer: RendererConfig,
    /// Dimensions and frame for fixtures that don't specify their own
    pub defaults: FixtureDefaults,
    /// Store a baseline instead of failing when a fixture has none (verify mode)
    pub establish_missing: bool,
    /// Only run fixtures whose name matches this regex
    pub filter: Option<String>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    #[serde(default = "default_renderer_program")]
    pub program: PathBuf,
    /// Arguments placed before `headless`, e.g. `["run", "-p", "tessera", "--"]`
    pub args: Vec<String>,
    /// Kill the renderer after this many seconds. No limit when unset.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Per-module overrides, e.g. `{"tessera_golden::internal::renderer": "debug"}`
    pub module_levels: BTreeMap<String, String>,
    /// Write logs to a daily rotating file here instead of stderr
    pub log_directory: Option<String>,
}

fn default_fixture_dir() -> PathBuf {
    PathBuf::from("tests/golden/cases")
}

fn default_baseline_dir() -> PathBuf {
    PathBuf::from("tests/golden/baselines")
}

fn default_diff_dir() -> PathBuf {
    PathBuf::from("tests/golden/diffs")
}

fn default_renderer_program() -> PathBuf {
    PathBuf::from("tessera")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            fixture_dir: default_fixture_dir(),
            baseline_dir: default_baseline_dir(),
            diff_dir: default_diff_dir(),
            work_dir: None,
            renderer: RendererConfig::default(),
            defaults: FixtureDefaults::default(),
            establish_missing: false,
            filter: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: default_renderer_program(),
            args: Vec::new(),
            timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            module_levels: BTreeMap::new(),
            log_directory: None,
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive string: base level followed by module overrides.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.level.clone();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level));
        }
        filter
    }
}

impl RendererConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Result of looking for a config file without an explicit `--config`.
#[derive(Debug)]
pub struct ConfigDiscovery {
    pub config: HarnessConfig,
    /// File the config came from; `None` means defaults.
    pub source: Option<PathBuf>,
    /// Config files that were found but could not be loaded.
    pub errors: Vec<ConfigurationError>,
}

impl HarnessConfig {
    /// Look for `golden.ron` in the working directory, then next to the
    /// executable. Falls back to defaults when neither parses.
    ///
    /// Runs before logging is installed, so the outcome is returned for the
    /// caller to log once a subscriber exists.
    pub fn discover() -> ConfigDiscovery {
        let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            candidates.push(dir.join(CONFIG_FILE_NAME));
        }
        Self::discover_in(candidates)
    }

    /// First candidate that exists and parses wins. Candidates that exist but
    /// fail to load are reported in `errors`.
    pub fn discover_in(candidates: impl IntoIterator<Item = PathBuf>) -> ConfigDiscovery {
        let mut errors = Vec::new();
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from(&path) {
                Ok(config) => {
                    return ConfigDiscovery {
                        config,
                        source: Some(path),
                        errors,
                    };
                }
                Err(e) => errors.push(e),
            }
        }

        ConfigDiscovery {
            config: Self::default(),
            source: None,
            errors,
        }
    }

    /// Load an explicitly named config file. Any failure is a configuration error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidConfig {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        ron::from_str::<HarnessConfig>(&content).map_err(|e| invalid(e.to_string()))
    }
}
