// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    VerilatorOptions,
    runner::{self, RunError, RunOptions},
};

/// The first Verilator release with `--binary` and timing support.
pub const MINIMUM_BINARY_VERSION: (u32, u32) = (5, 0);

/// What one `verilator --version` call revealed about the toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainInfo {
    pub executable: String,
    /// The first line the tool printed, kept for diagnostics.
    pub banner: String,
    pub version: Option<(u32, u32)>,
    pub supports_binary: bool,
}

impl ToolchainInfo {
    /// Runs `<executable> --version` once.
    pub fn probe(options: &VerilatorOptions) -> Result<Self, RunError> {
        let run_options = RunOptions {
            timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let output =
            runner::run(&options.executable, &["--version"], &run_options)?;
        let banner = output
            .combined()
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string();
        let version = parse_version(&banner);
        if version.is_none() {
            log::warn!(
                "could not parse a version from `{}`: {banner:?}",
                options.executable
            );
        }
        log::info!("probed {}: {banner}", options.executable);
        Ok(Self {
            executable: options.executable.clone(),
            supports_binary: version
                .is_none_or(|version| version >= MINIMUM_BINARY_VERSION),
            banner,
            version,
        })
    }

    /// A description that skips probing, for callers that already know the
    /// toolchain is usable.
    pub fn assume(options: &VerilatorOptions) -> Self {
        Self {
            executable: options.executable.clone(),
            banner: String::new(),
            version: None,
            supports_binary: true,
        }
    }
}

/// Parses `Verilator 5.020 2024-01-01 rev v5.020` into `(5, 20)`.
pub fn parse_version(banner: &str) -> Option<(u32, u32)> {
    let mut words = banner.split_whitespace();
    words.find(|word| word.eq_ignore_ascii_case("verilator"))?;
    let number = words.next()?.trim_start_matches('v');
    let (major, minor) = number.split_once('.')?;
    let minor = minor
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or_default();
    Some((major.parse().ok()?, minor.parse().ok()?))
}
