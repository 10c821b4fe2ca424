// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{fs, io};

use camino::{Utf8Path, Utf8PathBuf};

/// Suffix of the captured simulation output.
pub const LOG_EXTENSION: &str = "log";
/// Suffix of the coverage database the executable writes.
pub const COVERAGE_EXTENSION: &str = "dat";
/// Suffixes recognized as waveforms when resolving artifacts.
pub const WAVEFORM_EXTENSIONS: [&str; 2] = ["vcd", "fst"];

/// A directory owned by exactly one simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    path: Utf8PathBuf,
    stem: String,
}

impl RunDirectory {
    /// Claims `<output>/runs/<project>/<stem>-<n>` for the smallest `n` not
    /// yet taken. `create_dir` fails on an existing directory, so concurrent
    /// runs (in this process or another) never share one.
    pub fn create(
        output: &Utf8Path,
        project: &str,
        stem: &str,
    ) -> io::Result<Self> {
        let parent = output.join("runs").join(project);
        fs::create_dir_all(&parent)?;
        for index in 0u32.. {
            let path = parent.join(format!("{stem}-{index}"));
            match fs::create_dir(&path) {
                Ok(()) => {
                    log::debug!("claimed run directory {path}");
                    return Ok(Self {
                        path,
                        stem: stem.to_string(),
                    });
                }
                Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {}
                Err(error) => return Err(error),
            }
        }
        Err(io::Error::other(format!("no free run directory under {parent}")))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn log_path(&self) -> Utf8PathBuf {
        self.path.join(format!("{}.{LOG_EXTENSION}", self.stem))
    }

    pub fn coverage_path(&self) -> Utf8PathBuf {
        self.path.join(format!("{}.{COVERAGE_EXTENSION}", self.stem))
    }

    /// The first waveform the simulation left behind, by file name. The
    /// harness chooses the file name, so this looks by suffix.
    pub fn find_waveform(&self) -> Option<Utf8PathBuf> {
        let mut waveforms = self
            .path
            .read_dir_utf8()
            .ok()?
            .flatten()
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension().is_some_and(|extension| {
                    WAVEFORM_EXTENSIONS.contains(&extension)
                })
            })
            .collect::<Vec<_>>();
        waveforms.sort();
        waveforms.into_iter().next()
    }

    /// The coverage database, if the executable wrote one.
    pub fn find_coverage(&self) -> Option<Utf8PathBuf> {
        Some(self.coverage_path()).filter(|path| path.is_file())
    }
}

#[cfg(test)]
mod tests {
    use snafu::{OptionExt, ResultExt, Whatever};

    use super::*;

    #[test]
    #[snafu::report]
    fn runs_never_share_a_directory() -> Result<(), Whatever> {
        let scratch = tempfile::tempdir().whatever_context("tempdir")?;
        let output = Utf8Path::from_path(scratch.path())
            .whatever_context("utf8 tempdir")?;

        let first = RunDirectory::create(output, "demo", "counter")
            .whatever_context("first run")?;
        let second = RunDirectory::create(output, "demo", "counter")
            .whatever_context("second run")?;
        assert_eq!(first.path(), output.join("runs/demo/counter-0"));
        assert_eq!(second.path(), output.join("runs/demo/counter-1"));
        assert_eq!(first.log_path(), first.path().join("counter.log"));
        assert_eq!(first.coverage_path(), first.path().join("counter.dat"));

        assert_eq!(first.find_waveform(), None);
        fs::write(first.path().join("counter.vcd"), "$end")
            .whatever_context("write waveform")?;
        assert_eq!(
            first.find_waveform(),
            Some(first.path().join("counter.vcd"))
        );
        assert_eq!(first.find_coverage(), None);
        Ok(())
    }
}
