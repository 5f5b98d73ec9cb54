// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<BasaltConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static BasaltConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = BasaltConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static BasaltConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = match config_path_from_env() {
        Some(p) => BasaltConfig::load_from_file(&p)?,
        None => BasaltConfig::default(),
    };
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

fn config_path_from_env() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("BASALT_CONFIG") {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    let candidate = PathBuf::from("basalt.toml");
    if candidate.exists() {
        return Some(candidate);
    }
    None
}

#[derive(Clone, Deserialize)]
pub struct BasaltConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression. If set, this takes
    /// precedence over `log_level`.
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub exec: ExecConfig,
}

impl BasaltConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: BasaltConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.exec.chunk_size == 0 {
            return Err(anyhow!("exec.chunk_size must be positive"));
        }
        if self.exec.chunk_size > u16::MAX as usize {
            return Err(anyhow!(
                "exec.chunk_size {} exceeds the 16-bit row index limit",
                self.exec.chunk_size
            ));
        }
        if !self.exec.hash_join_bucket_count.is_power_of_two() {
            return Err(anyhow!(
                "exec.hash_join_bucket_count {} must be a power of two",
                self.exec.hash_join_bucket_count
            ));
        }
        Ok(())
    }

    pub fn effective_log_filter(&self) -> String {
        match &self.log_filter {
            Some(f) => f.clone(),
            None => self.log_level.clone(),
        }
    }
}

impl Default for BasaltConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            exec: ExecConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct ExecConfig {
    /// Process-wide vector chunk size: the row bound of every batch flowing
    /// between operators.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of hash buckets in the join hash table. Must be a power of two.
    #[serde(default = "default_hash_join_bucket_count")]
    pub hash_join_bucket_count: usize,
}

fn default_chunk_size() -> usize {
    1024
}

fn default_hash_join_bucket_count() -> usize {
    1 << 16
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            hash_join_bucket_count: default_hash_join_bucket_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = BasaltConfig::default();
        assert_eq!(cfg.exec.chunk_size, 1024);
        assert_eq!(cfg.exec.hash_join_bucket_count, 1 << 16);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let cfg: BasaltConfig = toml::from_str(
            r#"
            log_level = "debug"

            [exec]
            chunk_size = 512
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.exec.chunk_size, 512);
        assert_eq!(cfg.exec.hash_join_bucket_count, 1 << 16);
    }

    #[test]
    fn reject_non_power_of_two_buckets() {
        let cfg: BasaltConfig = toml::from_str(
            r#"
            [exec]
            hash_join_bucket_count = 1000
            "#,
        )
        .expect("parse");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn log_filter_takes_precedence() {
        let cfg: BasaltConfig = toml::from_str(
            r#"
            log_level = "info"
            log_filter = "basalt=debug"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.effective_log_filter(), "basalt=debug");
    }
}
