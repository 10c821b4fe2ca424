// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The pipeline that turns a design module into a verdict:
//! `Idle -> ResolvingTestbench -> Compiling -> Executing -> Classifying ->
//! Done`, with `Failed` reachable from every non-terminal state.
//!
//! Each run is single-threaded. Independent runs may share an
//! [`Orchestrator`] across threads: they get disjoint run directories and
//! compilations of the same build key are serialized on a lock.

pub mod cache;
mod config;
mod error;
mod orchestrator;
mod run_dir;
mod state;

pub use cache::{ArtifactStore, CacheKey, MemoryStore};
pub use config::{
    CONFIG_FILE_NAME, ConfigError, OutputConfig, PipelineConfig, RunConfig,
    expand_patterns,
};
pub use error::{ErrorKind, Failure, Phase, PipelineError};
pub use orchestrator::{
    CompileOutcome, ExecuteOutcome, Orchestrator, PipelineResult,
    SimulateRequest,
};
pub use run_dir::RunDirectory;
pub use state::{RunState, Transition};
