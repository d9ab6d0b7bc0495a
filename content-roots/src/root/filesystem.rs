/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::any::Any;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use path_clean::PathClean;
use tokio::io::AsyncWriteExt;

use super::Root;
use crate::checksum::{self, DigestReader};
use crate::error::{self, Error};
use crate::io::{ContentFile, ContentStream};
use crate::key;
use crate::metadata::{Metadata, UserMetadata};
use crate::types::RootType;

/// Permissions given to content written by a [`FilesystemRoot`] (unix only).
pub const CONTENT_FILE_MODE: u32 = 0o640;

/// A root backed by a directory on the local filesystem.
///
/// Keys are paths relative to the directory. Directories are whatever the filesystem says
/// they are: [`Root::is_directory`] reflects the disk regardless of a trailing `/`, and
/// subdirectory keys are reported without one. Writes are atomic, going through a
/// temporary file next to the target that is renamed into place only after the content
/// has been verified.
///
/// Keys resolving outside the root directory, whether lexically (`..`) or through
/// symlinks, are rejected with [`ErrorKind::InvalidKey`](crate::ErrorKind::InvalidKey).
#[derive(Clone, Debug)]
pub struct FilesystemRoot {
    name: String,
    path: PathBuf,
    real_path: PathBuf,
}

impl FilesystemRoot {
    /// Create a root named `name` over the existing directory `path`.
    pub async fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().clean();
        let real_path = tokio::fs::canonicalize(&path).await?;
        if !tokio::fs::metadata(&real_path).await?.is_dir() {
            return Err(error::invalid_configuration(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        Ok(Self {
            name: name.into(),
            path,
            real_path,
        })
    }

    /// The root directory as configured.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The root directory with symlinks resolved.
    pub fn real_path(&self) -> &Path {
        &self.real_path
    }

    /// Path of `key`, which need not exist yet.
    ///
    /// The path is built on the configured root directory, not the resolved one, so it
    /// remains usable if symlinks along the root path change. Fails with
    /// [`ErrorKind::InvalidKey`](crate::ErrorKind::InvalidKey) if the key resolves to a
    /// location outside the root.
    pub async fn path_to(&self, key: &str) -> Result<PathBuf, Error> {
        let path = self.path.join(key).clean();
        if !path.starts_with(&self.path) {
            return Err(error::invalid_key(&self.name, key));
        }

        // resolve the deepest existing ancestor to catch symlinks pointing elsewhere
        let mut ancestor = path.as_path();
        loop {
            match tokio::fs::canonicalize(ancestor).await {
                Ok(real) => {
                    if !real.starts_with(&self.real_path) {
                        return Err(error::invalid_key(&self.name, key));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => return Err(error::invalid_key(&self.name, key)),
                },
                Err(err) => return Err(err.into()),
            }
        }
        Ok(path)
    }

    /// Path of `prefix_key`'s descendant `full_key` relative to `prefix_key`.
    pub async fn relative_path_from(
        &self,
        full_key: &str,
        prefix_key: &str,
    ) -> Result<String, Error> {
        let full = self.path_to(full_key).await?;
        let prefix = self.path_to(prefix_key).await?;
        let relative = full
            .strip_prefix(&prefix)
            .map_err(|_| error::invalid_key(&self.name, full_key))?;
        Ok(path_to_key(relative))
    }

    /// Key of a path below the root directory.
    fn key_for(&self, path: &Path) -> String {
        path.strip_prefix(&self.path)
            .map(path_to_key)
            .unwrap_or_default()
    }

    /// Path of existing content (not a directory) at `key`.
    async fn content_path(&self, key: &str) -> Result<PathBuf, Error> {
        let path = self.path_to(key).await?;
        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.is_dir() {
            return Err(error::invalid_key(&self.name, key));
        }
        Ok(path)
    }

    /// Path of an existing directory at `key`.
    async fn directory_path(&self, key: &str) -> Result<PathBuf, Error> {
        let path = self.path_to(key).await?;
        if !tokio::fs::metadata(&path).await?.is_dir() {
            return Err(error::invalid_directory(key));
        }
        Ok(path)
    }

    async fn children(&self, key: &str, directories: bool) -> Result<Vec<String>, Error> {
        let dir = self.directory_path(key).await?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // follow symlinks the same way path_to does
            let is_dir = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata.is_dir(),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if is_dir == directories {
                keys.push(self.key_for(&entry.path()));
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Write `stream` to the temporary file `tmp`, verify it and move it to `target`.
    async fn write_atomically(
        &self,
        tmp: &Path,
        target: &Path,
        stream: ContentStream,
        md5_sum: Option<&str>,
        mtime: Option<SystemTime>,
    ) -> Result<(), Error> {
        let mut file = tokio::fs::File::create(tmp).await?;
        let mut reader = DigestReader::new(stream);
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = md5_sum {
            checksum::verify(expected, &reader.md5_sum())?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(tmp, std::fs::Permissions::from_mode(CONTENT_FILE_MODE))
                .await?;
        }

        if let Some(mtime) = mtime {
            let tmp = tmp.to_path_buf();
            tokio::task::spawn_blocking(move || {
                std::fs::File::options()
                    .write(true)
                    .open(&tmp)?
                    .set_modified(mtime)
            })
            .await??;
        }

        tokio::fs::rename(tmp, target).await?;
        tracing::trace!(root = %self.name, path = %target.display(), written, "wrote content");
        Ok(())
    }
}

fn path_to_key(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn remove_path(path: &Path) -> Result<(), Error> {
    if tokio::fs::symlink_metadata(path).await?.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

#[async_trait]
impl Root for FilesystemRoot {
    fn name(&self) -> &str {
        &self.name
    }

    fn root_type(&self) -> RootType {
        RootType::Filesystem
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn size(&self, key: &str) -> Result<u64, Error> {
        let path = self.content_path(key).await?;
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        let path = self.path_to(key).await?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn is_directory(&self, key: &str) -> Result<bool, Error> {
        let path = self.path_to(key).await?;
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn metadata(&self, key: &str) -> Result<Metadata, Error> {
        let path = self.content_path(key).await?;
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Metadata {
            size: metadata.len(),
            mtime: metadata.modified().ok(),
            ..Default::default()
        })
    }

    async fn file_keys(&self, key: &str) -> Result<Vec<String>, Error> {
        self.children(key, false).await
    }

    async fn subdirectory_keys(&self, key: &str) -> Result<Vec<String>, Error> {
        self.children(key, true).await
    }

    async fn input_stream(&self, key: &str) -> Result<ContentStream, Error> {
        let path = self.content_path(key).await?;
        ContentStream::from_path(path).await
    }

    async fn input_file(&self, key: &str, _tmp_dir: Option<&Path>) -> Result<ContentFile, Error> {
        Ok(ContentFile::borrowed(self.content_path(key).await?))
    }

    async fn copy_stream_to(
        &self,
        key: &str,
        stream: ContentStream,
        md5_sum: Option<&str>,
        size: Option<u64>,
        metadata: UserMetadata,
    ) -> Result<(), Error> {
        if key::is_directory_key(key) {
            return Err(error::invalid_key(&self.name, key));
        }
        let target = self.path_to(key).await?;
        if self.is_directory(key).await? {
            return Err(error::invalid_key(&self.name, key));
        }
        let parent = target
            .parent()
            .ok_or_else(|| error::invalid_key(&self.name, key))?;
        tokio::fs::create_dir_all(parent).await?;
        let tmp = parent.join(format!(".{:x}.tmp", md5::compute(key)));
        tracing::debug!(root = %self.name, key, ?size, "writing content");

        let result = self
            .write_atomically(&tmp, &target, stream, md5_sum, metadata.mtime())
            .await;
        if result.is_err() {
            if let Err(err) = tokio::fs::remove_file(&tmp).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %tmp.display(), error = %err, "failed to remove temporary file");
                }
            }
        }
        result
    }

    async fn delete_content(&self, key: &str) -> Result<(), Error> {
        let path = self.content_path(key).await?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn move_content(&self, source_key: &str, target_key: &str) -> Result<(), Error> {
        let source = self.content_path(source_key).await?;
        if key::is_directory_key(target_key) || self.is_directory(target_key).await? {
            return Err(error::invalid_key(&self.name, target_key));
        }
        let target = self.path_to(target_key).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(source, target).await?;
        Ok(())
    }

    async fn delete_tree(&self, key: &str) -> Result<(), Error> {
        let path = self.path_to(key).await?;
        if !tokio::fs::metadata(&path).await?.is_dir() {
            return self.delete_content(key).await;
        }
        if path != self.path {
            tokio::fs::remove_dir_all(&path).await?;
            return Ok(());
        }
        // the root directory itself stays
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            remove_path(&entry.path()).await?;
        }
        Ok(())
    }

    async fn delete_all_content(&self) -> Result<(), Error> {
        self.delete_tree("").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    async fn root() -> (tempfile::TempDir, FilesystemRoot) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("root/child")).unwrap();
        std::fs::write(dir.path().join("root/joe.txt"), "joe\n").unwrap();
        std::fs::write(dir.path().join("outside.txt"), "outside\n").unwrap();
        let root = FilesystemRoot::new("fs", dir.path().join("root")).await.unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn test_new_requires_a_directory() {
        let (dir, _) = root().await;
        let err = FilesystemRoot::new("fs", dir.path().join("missing"))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::NotFound, err.kind());
        let err = FilesystemRoot::new("fs", dir.path().join("outside.txt"))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());
    }

    #[tokio::test]
    async fn test_path_to() {
        let (_dir, root) = root().await;
        assert_eq!(root.path().join("joe.txt"), root.path_to("joe.txt").await.unwrap());
        assert_eq!(root.path(), root.path_to("").await.unwrap());
        assert_eq!(
            root.path().join("not/yet/there.txt"),
            root.path_to("not/yet/there.txt").await.unwrap()
        );
        assert_eq!(
            root.path().join("joe.txt"),
            root.path_to("child/../joe.txt").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_path_to_rejects_escapes() {
        let (_dir, root) = root().await;
        for key in ["../outside.txt", "child/../../outside.txt", "/etc/passwd"] {
            let err = root.path_to(key).await.unwrap_err();
            assert_eq!(&ErrorKind::InvalidKey, err.kind(), "{key}");
            let details = err.invalid_key().unwrap();
            assert_eq!("fs", details.root());
            assert_eq!(key, details.key());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_path_to_rejects_symlink_escapes() {
        let (dir, root) = root().await;
        std::os::unix::fs::symlink(dir.path(), root.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(
            root.path().join("joe.txt"),
            root.path().join("child/joe-link.txt"),
        )
        .unwrap();

        let err = root.path_to("escape/outside.txt").await.unwrap_err();
        assert_eq!(&ErrorKind::InvalidKey, err.kind());
        let err = root.path_to("escape/new.txt").await.unwrap_err();
        assert_eq!(&ErrorKind::InvalidKey, err.kind());
        assert_eq!("joe\n", root.as_string("child/joe-link.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_relative_path_from() {
        let (_dir, root) = root().await;
        assert_eq!(
            "a/b.txt",
            root.relative_path_from("child/a/b.txt", "child").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_target_untouched() {
        let (_dir, root) = root().await;
        let err = root
            .copy_stream_to(
                "joe.txt",
                "corrupt".into(),
                Some(&checksum::base64_md5(b"something else")),
                Some(7),
                UserMetadata::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::IntegrityMismatch, err.kind());
        assert_eq!("joe\n", root.as_string("joe.txt").await.unwrap());
        assert_eq!(vec!["joe.txt".to_owned()], root.file_keys("").await.unwrap());
        let hidden: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(hidden.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, root) = root().await;
        root.write_bytes_to("new/fred.txt", "fred\n".into(), None)
            .await
            .unwrap();
        let mode = std::fs::metadata(root.path().join("new/fred.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(CONTENT_FILE_MODE, mode & 0o777);
    }
}
