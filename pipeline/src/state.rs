// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Where a simulation run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Idle,
    ResolvingTestbench,
    Compiling,
    Executing,
    Classifying,
    Done,
    /// Absorbing; reachable from every non-terminal state.
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// `Idle -> Executing` is the prebuilt-executable path, which skips both
    /// testbench resolution and compilation.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, ResolvingTestbench)
                | (Idle, Executing)
                | (ResolvingTestbench, Compiling)
                | (Compiling, Executing)
                | (Executing, Classifying)
                | (Classifying, Done)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            RunState::Idle => "idle",
            RunState::ResolvingTestbench => "resolving-testbench",
            RunState::Compiling => "compiling",
            RunState::Executing => "executing",
            RunState::Classifying => "classifying",
            RunState::Done => "done",
            RunState::Failed => "failed",
        })
    }
}

/// One recorded state change, `elapsed` measured from the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub elapsed: Duration,
}
