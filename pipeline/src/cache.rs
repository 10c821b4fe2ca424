// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Content-addressed build keys and the artifact-store boundary.

use std::{fmt, fs, io};

use benchwright_verilator::{CompileConfig, VerilatorOptions};
use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, Whatever};
use xxhash_rust::xxh3::{Xxh3, xxh3_128};

/// Identifies one compilation: the same key means the same inputs, the same
/// configuration and the same toolchain flags.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CacheKey(String);

#[derive(Debug, Snafu)]
pub enum CacheKeyError {
    #[snafu(display("Failed to read input {path} for hashing"))]
    ReadInput { path: Utf8PathBuf, source: io::Error },
    #[snafu(display("Failed to serialize the compile configuration"))]
    SerializeConfig { source: serde_json::Error },
}

impl CacheKey {
    /// XXH3-128 over the sorted input paths, the content hash of each input,
    /// and the JSON form of `config` and `options`. None of these depend on
    /// the process, so keys are stable across restarts.
    pub fn compute(
        sources: &[Utf8PathBuf],
        config: &CompileConfig,
        options: &VerilatorOptions,
    ) -> Result<Self, CacheKeyError> {
        let mut sorted = sources.iter().collect::<Vec<_>>();
        sorted.sort();
        sorted.dedup();

        let mut hasher = Xxh3::new();
        for path in sorted {
            let contents =
                fs::read(path).context(ReadInputSnafu { path: path.clone() })?;
            hasher.update(path.as_str().as_bytes());
            hasher.update(&[0]);
            hasher.update(&xxh3_128(&contents).to_le_bytes());
        }
        hasher.update(
            &serde_json::to_vec(config).context(SerializeConfigSnafu)?,
        );
        hasher.update(
            &serde_json::to_vec(options).context(SerializeConfigSnafu)?,
        );

        Ok(Self(format!("{:032x}", hasher.digest128())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The build directory for this key under `output`.
    pub fn build_directory(&self, output: &Utf8Path) -> Utf8PathBuf {
        output.join("build").join(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// A key to opaque-bytes store consulted before compiling. Absence is a miss,
/// and a failing store is only ever logged: correctness never depends on it.
pub trait ArtifactStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, Whatever>;

    fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<(), Whatever>;

    fn invalidate(&self, key: &CacheKey) -> Result<(), Whatever>;
}

/// An [`ArtifactStore`] that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<CacheKey, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArtifactStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, Whatever> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<(), Whatever> {
        self.entries.insert(key.clone(), value);
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<(), Whatever> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use snafu::{OptionExt, ResultExt, Whatever};

    use super::*;

    fn write(directory: &Utf8Path, name: &str, contents: &str) -> Utf8PathBuf {
        let path = directory.join(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    #[test]
    #[snafu::report]
    fn keys_follow_content_and_config() -> Result<(), Whatever> {
        let scratch = tempfile::tempdir().whatever_context("tempdir")?;
        let directory = Utf8Path::from_path(scratch.path())
            .whatever_context("utf8 tempdir")?;
        let a = write(directory, "a.sv", "module a; endmodule");
        let b = write(directory, "b.sv", "module b; endmodule");
        let options = VerilatorOptions::default();
        let config = CompileConfig {
            top_module: "a".into(),
            ..Default::default()
        };

        let key = |sources: &[Utf8PathBuf], config: &CompileConfig| {
            CacheKey::compute(sources, config, &options).expect("hashes")
        };

        let first = key(&[a.clone(), b.clone()], &config);
        assert_eq!(first.as_str().len(), 32);
        // order of the input list does not matter
        assert_eq!(first, key(&[b.clone(), a.clone()], &config));

        let traced = CompileConfig {
            defines: BTreeMap::from([("SIM".into(), String::new())]),
            ..config.clone()
        };
        assert_ne!(first, key(&[a.clone(), b.clone()], &traced));

        write(directory, "b.sv", "module b(input x); endmodule");
        assert_ne!(first, key(&[a, b], &config));

        Ok(())
    }

    #[test]
    fn missing_input_is_reported() {
        let result = CacheKey::compute(
            &["/nonexistent/benchwright.sv".into()],
            &CompileConfig::default(),
            &VerilatorOptions::default(),
        );
        assert!(matches!(result, Err(CacheKeyError::ReadInput { .. })));
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        let key = CacheKey("00ff".into());
        assert_eq!(store.get(&key).expect("get"), None);
        store.set(&key, b"outcome".to_vec()).expect("set");
        assert_eq!(
            store.get(&key).expect("get").as_deref(),
            Some(&b"outcome"[..])
        );
        store.invalidate(&key).expect("invalidate");
        assert!(store.is_empty());
    }
}
