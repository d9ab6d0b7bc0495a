/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Where temporary files are created.
//!
//! Roots spool content to temporary files when a local copy is needed
//! ([`Root::input_file`](crate::root::Root::input_file)) or when a stream of unknown length
//! must be uploaded in a single request. The directory is resolved from, in order: a value
//! set with [`set_tmp_dir`], the `CONTENT_ROOTS_TMPDIR` environment variable, the `TMPDIR`
//! environment variable, and finally the platform default.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Environment variable naming the temporary directory for this crate.
pub const TMPDIR_ENV: &str = "CONTENT_ROOTS_TMPDIR";

static TMP_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// The directory temporary files are created in.
pub fn tmp_dir() -> PathBuf {
    let configured = TMP_DIR
        .read()
        .map(|dir| dir.clone())
        .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
    configured
        .or_else(|| std::env::var_os(TMPDIR_ENV).map(PathBuf::from))
        .or_else(|| std::env::var_os("TMPDIR").map(PathBuf::from))
        .unwrap_or_else(std::env::temp_dir)
}

/// Override the temporary directory for the whole process. `None` restores the default.
pub fn set_tmp_dir(dir: Option<PathBuf>) {
    let mut guard = TMP_DIR
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = dir;
}

/// Picks a temporary directory by the size of the content to be stored.
///
/// Large content can be steered to a volume with more room: the directory with the largest
/// threshold not exceeding the size is chosen, falling back to [`tmp_dir`] when no threshold
/// applies (or the size is unknown).
#[derive(Clone, Debug, Default)]
pub struct TmpDirPicker {
    // sorted by threshold
    dirs: Vec<(u64, PathBuf)>,
}

impl TmpDirPicker {
    /// Create a picker from `(minimum size, directory)` pairs.
    pub fn new(dirs: impl IntoIterator<Item = (u64, PathBuf)>) -> Self {
        let mut dirs: Vec<_> = dirs.into_iter().collect();
        dirs.sort_by_key(|(threshold, _)| *threshold);
        Self { dirs }
    }

    /// The directory to use for content of `size` bytes.
    pub fn pick(&self, size: Option<u64>) -> PathBuf {
        size.and_then(|size| self.pick_configured(size))
            .map(Path::to_path_buf)
            .unwrap_or_else(tmp_dir)
    }

    fn pick_configured(&self, size: u64) -> Option<&Path> {
        self.dirs
            .iter()
            .rev()
            .find(|(threshold, _)| *threshold <= size)
            .map(|(_, dir)| dir.as_path())
    }
}
