/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A local file holding content from a root.
///
/// Returned by [`Root::input_file`](crate::root::Root::input_file). For roots that already
/// keep content on local disk this is the content's own path. Otherwise the content was
/// copied into a private temporary directory, which is removed together with the file when
/// the `ContentFile` is dropped.
#[derive(Debug)]
pub struct ContentFile {
    path: PathBuf,
    tmp_dir_guard: Option<TempDir>,
}

impl ContentFile {
    /// A file owned by the root; nothing is removed on drop.
    pub(crate) fn borrowed(path: PathBuf) -> Self {
        Self {
            path,
            tmp_dir_guard: None,
        }
    }

    /// A file inside `tmp_dir`, removed along with the directory on drop.
    pub(crate) fn temporary(path: PathBuf, tmp_dir: TempDir) -> Self {
        Self {
            path,
            tmp_dir_guard: Some(tmp_dir),
        }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file will be removed on drop.
    pub fn is_temporary(&self) -> bool {
        self.tmp_dir_guard.is_some()
    }
}

impl AsRef<Path> for ContentFile {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_file_is_removed_on_drop() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("joe.txt");
        std::fs::write(&path, "joe\n").unwrap();
        let dir_path = tmp_dir.path().to_path_buf();

        let file = ContentFile::temporary(path.clone(), tmp_dir);
        assert!(file.is_temporary());
        assert_eq!("joe\n", std::fs::read_to_string(file.path()).unwrap());
        drop(file);
        assert!(!path.exists());
        assert!(!dir_path.exists());
    }

    #[test]
    fn test_borrowed_file_is_kept() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("joe.txt");
        std::fs::write(&path, "joe\n").unwrap();

        let file = ContentFile::borrowed(path.clone());
        assert!(!file.is_temporary());
        drop(file);
        assert!(path.exists());
    }
}
