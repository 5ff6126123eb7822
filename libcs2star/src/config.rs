use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// Structure representing the export configuration. Contains pathing and run information.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml.
///
/// A Config is built once (by the CLI or a caller) and then only ever borrowed; every
/// component receives it explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub cs_path: PathBuf,
    pub passthrough_paths: Vec<PathBuf>,
    pub project_path: PathBuf,
    pub output_path: PathBuf,
    pub star_name: String,
    pub stack_directory: String,
    pub error_log_name: String,
    pub n_threads: i32,
    pub dry_run: bool,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            cs_path: PathBuf::from("None"),
            passthrough_paths: vec![],
            project_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            star_name: String::from("particles.star"),
            stack_directory: String::from("stacks"),
            error_log_name: String::from("export_errors.log"),
            n_threads: 1,
            dry_run: false,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Check that the inputs exist and the worker count is usable.
    ///
    /// The output directory is not required to exist; it is created on the first write.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_n_threads_valid() {
            return Err(ConfigError::BadThreadCount(self.n_threads));
        }
        if !self.cs_path.exists() {
            return Err(ConfigError::BadFilePath(self.cs_path.clone()));
        }
        for path in self.passthrough_paths.iter() {
            if !path.exists() {
                return Err(ConfigError::BadFilePath(path.clone()));
            }
        }
        Ok(())
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn is_parallel(&self) -> bool {
        self.n_threads > 1
    }

    /// Get the path to the output STAR file
    pub fn get_star_file_name(&self) -> PathBuf {
        self.output_path.join(&self.star_name)
    }

    /// Get the directory which holds the output stacks
    pub fn get_stack_directory(&self) -> PathBuf {
        self.output_path.join(&self.stack_directory)
    }

    /// Get the path of one output stack
    pub fn get_stack_file_name(&self, group_name: &str) -> PathBuf {
        self.get_stack_directory().join(group_name)
    }

    /// The stack path as referenced from the STAR file (relative to the STAR file directory)
    pub fn get_stack_reference(&self, group_name: &str) -> String {
        format!("{}/{}", self.stack_directory, group_name)
    }

    /// Get the path to the error log
    pub fn get_error_log_name(&self) -> PathBuf {
        self.output_path.join(&self.error_log_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config {
            cs_path: PathBuf::from("/data/particles.cs"),
            n_threads: 4,
            dry_run: true,
            ..Default::default()
        };
        config.write_config_file(&path).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(config, read);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: Config = serde_yaml::from_str("cs_path: /x.cs\nn_threads: 2\n").unwrap();
        assert_eq!(config.n_threads, 2);
        assert_eq!(config.star_name, "particles.star");
        assert!(!config.dry_run);
    }

    #[test]
    fn test_bad_thread_count() {
        let config = Config {
            n_threads: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadThreadCount(0))
        ));
    }
}
