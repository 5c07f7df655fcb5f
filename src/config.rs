//! Configuration for the ECMWF preprocessing run.
//!
//! The configuration is usually a YAML file shared with the other data
//! preparation steps, of which only these keys are read:
//!
//! ```yaml
//! preprocess: true
//! untar_ecmwf_dir: /data/raw/ecmwf
//! timezone_shift_hours: 8
//! processed_data_dir: /data/processed
//! destination_folder: ecmwf
//! sources:
//!   ecmwf:
//!     vars: [t2m, d2m, u10, v10, tp, r1000, r850, r500]
//!     pressure_levels: [1000, 850, 500]
//! ```
//!
//! A file with the `.toml` extension is read as TOML with the same structure.
//! Any key can be overridden by an environment variable prefixed with
//! `ECMWF_PREP_`, using `__` to separate nested keys, e.g.
//! `ECMWF_PREP_SOURCES__ECMWF__VARS="[t2m, u10]"`.
//!
//! Only `preprocess` is always needed. If it is `true`, `untar_ecmwf_dir`,
//! `processed_data_dir`, `destination_folder` and `sources.ecmwf.vars`
//! must also be given.
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml, Yaml},
    Figment,
};
use serde::Deserialize;

use crate::{levels::DEFAULT_PRESSURE_LEVELS, pipeline::PipelineSettings};

/// Prefix for environment variables that override configuration keys.
pub const ENV_PREFIX: &str = "ECMWF_PREP_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("Could not parse configuration: {0}")]
    Parsing(#[from] figment::Error),
    #[error("Configuration key '{0}' is required when preprocess is true")]
    MissingKey(&'static str),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Whether to run the preprocessing at all.
    #[serde(default)]
    pub preprocess: bool,

    /// Directory containing the `<YYYY>/<MM>` folders of extracted ERA5 files.
    #[serde(default)]
    pub untar_ecmwf_dir: Option<PathBuf>,

    /// Hours to add to every timestamp, e.g. 8 to convert UTC to AWST.
    #[serde(default)]
    pub timezone_shift_hours: i64,

    #[serde(default)]
    pub processed_data_dir: Option<PathBuf>,

    #[serde(default)]
    pub destination_folder: Option<String>,

    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub ecmwf: Option<EcmwfConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EcmwfConfig {
    /// Variables to keep in the daily files, after pressure level extraction.
    pub vars: Vec<String>,

    /// Pressure levels (hPa) to extract from the pressure level file.
    #[serde(default = "default_pressure_levels")]
    pub pressure_levels: Vec<i64>,
}

/// Helper function for serde default attributes
fn default_pressure_levels() -> Vec<i64> {
    DEFAULT_PRESSURE_LEVELS.to_vec()
}

impl Config {
    /// Load the configuration from `path` and the `ECMWF_PREP_` environment
    /// variables, the latter taking precedence.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(path, ENV_PREFIX)
    }

    fn load(path: &Path, env_prefix: &str) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let figment = if is_toml {
            Figment::new().merge(Toml::file(path))
        } else {
            Figment::new().merge(Yaml::file(path))
        };
        let config = figment
            .merge(Env::prefixed(env_prefix).split("__"))
            .extract()?;
        Ok(config)
    }

    /// The input directory and the settings for each month, checking that
    /// every key a run needs was given.
    pub fn pipeline_settings(&self) -> Result<(PathBuf, PipelineSettings), ConfigError> {
        let input_dir = self
            .untar_ecmwf_dir
            .clone()
            .ok_or(ConfigError::MissingKey("untar_ecmwf_dir"))?;
        let processed_data_dir = self
            .processed_data_dir
            .clone()
            .ok_or(ConfigError::MissingKey("processed_data_dir"))?;
        let destination_folder = self
            .destination_folder
            .clone()
            .ok_or(ConfigError::MissingKey("destination_folder"))?;
        let ecmwf = self
            .sources
            .ecmwf
            .as_ref()
            .ok_or(ConfigError::MissingKey("sources.ecmwf.vars"))?;

        let settings = PipelineSettings {
            timezone_shift_hours: self.timezone_shift_hours,
            variables: ecmwf.vars.clone(),
            pressure_levels: ecmwf.pressure_levels.clone(),
            processed_data_dir,
            destination_folder,
        };
        Ok((input_dir, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_yaml_config() {
        let (_dir, path) = write_config(
            "config.yaml",
            "
preprocess: true
untar_ecmwf_dir: /data/raw/ecmwf
timezone_shift_hours: 8
processed_data_dir: /data/processed
destination_folder: ecmwf
other_step:
  enabled: false
sources:
  ecmwf:
    vars: [t2m, u10, r850]
  silo:
    vars: [max_temp]
",
        );
        let config = Config::from_file(&path).unwrap();
        assert!(config.preprocess);
        let (input, settings) = config.pipeline_settings().unwrap();
        assert_eq!(input, PathBuf::from("/data/raw/ecmwf"));
        assert_eq!(settings.timezone_shift_hours, 8);
        assert_eq!(settings.variables, vec!["t2m", "u10", "r850"]);
        assert_eq!(settings.pressure_levels, vec![1000, 850, 500]);
        assert_eq!(settings.processed_data_dir, PathBuf::from("/data/processed"));
        assert_eq!(settings.destination_folder, "ecmwf");
    }

    #[test]
    fn test_toml_config() {
        let (_dir, path) = write_config(
            "config.toml",
            r#"
preprocess = true
untar_ecmwf_dir = "in"
processed_data_dir = "out"
destination_folder = "ecmwf"

[sources.ecmwf]
vars = ["t2m"]
pressure_levels = [925, 700]
"#,
        );
        let config = Config::from_file(&path).unwrap();
        let (_, settings) = config.pipeline_settings().unwrap();
        assert_eq!(settings.timezone_shift_hours, 0);
        assert_eq!(settings.pressure_levels, vec![925, 700]);
    }

    #[test]
    fn test_preprocess_off_needs_nothing_else() {
        let (_dir, path) = write_config("config.yml", "preprocess: false\n");
        let config = Config::from_file(&path).unwrap();
        assert!(!config.preprocess);
        assert!(matches!(
            config.pipeline_settings(),
            Err(ConfigError::MissingKey("untar_ecmwf_dir"))
        ));
    }

    #[test]
    fn test_missing_vars() {
        let (_dir, path) = write_config(
            "config.yaml",
            "preprocess: true\nuntar_ecmwf_dir: a\nprocessed_data_dir: b\ndestination_folder: c\n",
        );
        let config = Config::from_file(&path).unwrap();
        assert!(matches!(
            config.pipeline_settings(),
            Err(ConfigError::MissingKey("sources.ecmwf.vars"))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/no/such/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_env_override() {
        let (_dir, path) = write_config(
            "config.yaml",
            "preprocess: true\ntimezone_shift_hours: 8\n",
        );
        // a prefix unique to this test so other tests never see it
        let prefix = "ECMWF_PREP_TEST_ENV_OVERRIDE_";
        std::env::set_var(format!("{prefix}TIMEZONE_SHIFT_HOURS"), "10");
        let config = Config::load(&path, prefix).unwrap();
        std::env::remove_var(format!("{prefix}TIMEZONE_SHIFT_HOURS"));
        assert_eq!(config.timezone_shift_hours, 10);
    }
}
