// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmark configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! repetitions = 1000
//! queue_pair = 0
//! worker_lcores = [1, 2]
//! pin_threads = true
//!
//! [[filelist]]
//! model = "./models/mnist.toml"
//! input = "./data/mnist.in"
//! output = "./data/mnist.out"
//! ```

use crate::BenchError;
use std::path::{Path, PathBuf};

/// One model and its I/O files.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileEntry {
    /// Model file handed to the device.
    pub model: PathBuf,
    /// Raw input file; must be exactly the model's raw input size.
    pub input: PathBuf,
    /// Where to write the dequantized output, if anywhere.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// Configuration for an inference benchmark run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BenchConfig {
    /// Rounds over the model range each enqueue worker performs.
    #[serde(default = "default_repetitions")]
    pub repetitions: u64,
    /// Device queue pair used by both workers.
    #[serde(default)]
    pub queue_pair: u16,
    /// Cores available to workers (defaults to every online core but 0).
    #[serde(default)]
    pub worker_lcores: Option<Vec<usize>>,
    /// Whether workers pin themselves to their core.
    #[serde(default = "default_true")]
    pub pin_threads: bool,
    /// Spin bound for pool/queue retries. `None` spins forever.
    #[serde(default)]
    pub max_spins: Option<u64>,
    /// NUMA socket hint, reported only.
    #[serde(default)]
    pub socket_id: i32,
    /// Models under test, indexed by filelist id.
    #[serde(default)]
    pub filelist: Vec<FileEntry>,
}

fn default_repetitions() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

impl BenchConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, BenchError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, BenchError> {
        toml::from_str(toml_str)
            .map_err(|e| BenchError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, BenchError> {
        toml::to_string_pretty(self)
            .map_err(|e| BenchError::Config(format!("TOML serialise error: {e}")))
    }

    /// Resolves the cores workers may run on.
    pub fn resolve_worker_lcores(&self) -> Vec<usize> {
        match &self.worker_lcores {
            Some(cores) => cores.clone(),
            None => {
                let online = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                (1..online).collect()
            }
        }
    }

    /// Checks that the options describe a runnable benchmark.
    ///
    /// Every model and input file must exist, `repetitions` must be
    /// non-zero, and at least two worker cores must be available.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.filelist.is_empty() {
            return Err(BenchError::Config("filelist is empty".into()));
        }

        for (fid, entry) in self.filelist.iter().enumerate() {
            for (what, path) in [("model", &entry.model), ("input", &entry.input)] {
                if !path.exists() {
                    tracing::error!("{what} file not accessible: id = {fid}, file = {}", path.display());
                    return Err(BenchError::Io {
                        what,
                        path: path.clone(),
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    });
                }
            }
        }

        if self.repetitions == 0 {
            return Err(BenchError::Config(format!(
                "invalid option, repetitions = {}",
                self.repetitions
            )));
        }

        let lcores = self.resolve_worker_lcores().len();
        if lcores < 2 {
            return Err(BenchError::Capability(format!(
                "{lcores} worker lcore(s) available, 2 required"
            )));
        }

        Ok(())
    }

    /// Logs the resolved options.
    pub fn dump(&self) {
        tracing::info!("repetitions       : {}", self.repetitions);
        tracing::info!("queue_pair        : {}", self.queue_pair);
        tracing::info!("worker_lcores     : {:?}", self.resolve_worker_lcores());
        tracing::info!("pin_threads       : {}", self.pin_threads);
        tracing::info!("socket_id         : {}", self.socket_id);
        for (fid, entry) in self.filelist.iter().enumerate() {
            tracing::info!("filelist[{fid}].model  : {}", entry.model.display());
            tracing::info!("filelist[{fid}].input  : {}", entry.input.display());
            if let Some(output) = &entry.output {
                tracing::info!("filelist[{fid}].output : {}", output.display());
            }
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            repetitions: 1,
            queue_pair: 0,
            worker_lcores: None,
            pin_threads: true,
            max_spins: None,
            socket_id: 0,
            filelist: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = BenchConfig::default();
        assert_eq!(c.repetitions, 1);
        assert!(c.pin_threads);
        assert!(c.max_spins.is_none());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
repetitions = 42
worker_lcores = [3, 5]
pin_threads = false

[[filelist]]
model = "/tmp/m.toml"
input = "/tmp/in.bin"
output = "/tmp/out.bin"

[[filelist]]
model = "/tmp/m2.toml"
input = "/tmp/in2.bin"
"#;
        let c = BenchConfig::from_toml(toml).unwrap();
        assert_eq!(c.repetitions, 42);
        assert_eq!(c.worker_lcores, Some(vec![3, 5]));
        assert!(!c.pin_threads);
        assert_eq!(c.filelist.len(), 2);
        assert_eq!(c.filelist[0].output, Some(PathBuf::from("/tmp/out.bin")));
        assert!(c.filelist[1].output.is_none());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = BenchConfig {
            repetitions: 7,
            worker_lcores: Some(vec![1, 2]),
            filelist: vec![FileEntry {
                model: "m.toml".into(),
                input: "in.bin".into(),
                output: None,
            }],
            ..Default::default()
        };
        let back = BenchConfig::from_toml(&c.to_toml().unwrap()).unwrap();
        assert_eq!(back.repetitions, 7);
        assert_eq!(back.filelist, c.filelist);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            BenchConfig::from_toml("repetitions = \"many\""),
            Err(BenchError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_lcores() {
        let c = BenchConfig {
            worker_lcores: Some(vec![4, 6]),
            ..Default::default()
        };
        assert_eq!(c.resolve_worker_lcores(), vec![4, 6]);
        assert!(!BenchConfig::default().resolve_worker_lcores().contains(&0));
    }

    #[test]
    fn test_validate() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let input = tempfile::NamedTempFile::new().unwrap();
        let mut c = BenchConfig {
            repetitions: 1,
            worker_lcores: Some(vec![1, 2]),
            filelist: vec![FileEntry {
                model: model.path().to_path_buf(),
                input: input.path().to_path_buf(),
                output: None,
            }],
            ..Default::default()
        };
        assert!(c.validate().is_ok());

        c.repetitions = 0;
        assert!(matches!(c.validate(), Err(BenchError::Config(_))));

        c.repetitions = 1;
        c.worker_lcores = Some(vec![1]);
        assert!(matches!(c.validate(), Err(BenchError::Capability(_))));

        c.worker_lcores = Some(vec![1, 2]);
        c.filelist[0].input = PathBuf::from("/nonexistent/input.bin");
        let err = c.validate().unwrap_err();
        assert_eq!(err.errno(), -2);
    }

    #[test]
    fn test_validate_empty_filelist() {
        let c = BenchConfig {
            worker_lcores: Some(vec![1, 2]),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(BenchError::Config(_))));
    }
}
