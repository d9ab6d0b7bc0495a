/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The [`Root`] trait: content addressed by key, independent of where it is stored.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::AsyncWriteExt;

use crate::checksum::{self, DigestReader};
use crate::error::{self, Error, ErrorKind};
use crate::io::{ContentFile, ContentStream};
use crate::key;
use crate::metadata::{Metadata, UserMetadata};
use crate::types::RootType;
use crate::DEFAULT_DELETE_CONCURRENCY;

/// Filesystem backed roots
pub mod filesystem;

/// S3 backed roots
pub mod s3;

/// A location holding content addressed by hierarchical keys.
///
/// Keys are relative to the root; see [`crate::key`] for the key model. All content
/// operations are asynchronous and complete when awaited. Trees are handled by provided
/// methods built on the per-key operations, which backends override where they can do
/// better natively.
#[async_trait]
pub trait Root: Send + Sync + fmt::Debug {
    /// Name of the root, unique within a [`RootSet`](crate::registry::RootSet).
    fn name(&self) -> &str;

    /// Backend this root is bound to.
    fn root_type(&self) -> RootType;

    /// Access to the concrete root, for backend specific fast paths.
    fn as_any(&self) -> &dyn Any;

    /// Size in bytes of the content at `key`.
    async fn size(&self, key: &str) -> Result<u64, Error>;

    /// Whether content or a directory exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool, Error>;

    /// Whether `key` names a directory.
    async fn is_directory(&self, key: &str) -> Result<bool, Error>;

    /// Metadata of the content at `key`.
    async fn metadata(&self, key: &str) -> Result<Metadata, Error>;

    /// Modification time of the content at `key`, if one is recorded.
    async fn mtime(&self, key: &str) -> Result<Option<SystemTime>, Error> {
        Ok(self.metadata(key).await?.mtime)
    }

    /// Base64 MD5 of the content at `key`.
    ///
    /// Computed by reading the content unless the backend has it on record.
    async fn md5_sum(&self, key: &str) -> Result<String, Error> {
        compute_md5_sum(self, key).await
    }

    /// Hex MD5 of the content at `key`.
    async fn hex_md5_sum(&self, key: &str) -> Result<String, Error> {
        checksum::hex_from_base64(&self.md5_sum(key).await?)
    }

    /// Content keys directly below the directory `key`.
    ///
    /// Fails with [`ErrorKind::InvalidDirectory`] if `key` is not a directory.
    async fn file_keys(&self, key: &str) -> Result<Vec<String>, Error>;

    /// Directory keys directly below the directory `key`.
    ///
    /// Fails with [`ErrorKind::InvalidDirectory`] if `key` is not a directory.
    async fn subdirectory_keys(&self, key: &str) -> Result<Vec<String>, Error>;

    /// All content keys below the directory `key`, in sorted order.
    async fn subtree_keys(&self, key: &str) -> Result<Vec<String>, Error> {
        let mut files = Vec::new();
        let mut directories = VecDeque::from([key.to_owned()]);
        while let Some(directory) = directories.pop_front() {
            files.extend(self.file_keys(&directory).await?);
            directories.extend(self.subdirectory_keys(&directory).await?);
        }
        files.sort();
        Ok(files)
    }

    /// [`subtree_keys`](Root::subtree_keys) relative to `key`.
    async fn unprefixed_subtree_keys(&self, key: &str) -> Result<Vec<String>, Error> {
        let keys = self.subtree_keys(key).await?;
        Ok(keys
            .iter()
            .map(|k| key::relative_key(key, k).unwrap_or(k).to_owned())
            .collect())
    }

    /// Open the content at `key` for streaming. The stream releases its resources on drop.
    async fn input_stream(&self, key: &str) -> Result<ContentStream, Error>;

    /// A local file holding the content at `key`.
    ///
    /// Unless the content is already on local disk it is copied into a fresh directory under
    /// `tmp_dir` (the [configured temporary directory](crate::tmp_dir::tmp_dir) by default),
    /// which is removed when the returned [`ContentFile`] is dropped.
    async fn input_file(&self, key: &str, tmp_dir: Option<&Path>) -> Result<ContentFile, Error> {
        let tmp_root = tmp_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(crate::tmp_dir::tmp_dir);
        let dir = tempfile::Builder::new()
            .prefix("content-roots-")
            .tempdir_in(tmp_root)?;
        let path = dir.path().join(key::basename(key));
        let mut stream = self.input_stream(key).await?;
        let mut file = tokio::fs::File::create(&path).await?;
        tokio::io::copy(&mut stream, &mut file).await?;
        file.flush().await?;
        Ok(ContentFile::temporary(path, dir))
    }

    /// Write `stream` to `key`, replacing any existing content.
    ///
    /// When `md5_sum` is given the written content must match it, or the write fails with
    /// [`ErrorKind::IntegrityMismatch`] and no corrupt content is left at `key`. Without a
    /// checksum no check is done and none is recorded. `size` may be omitted when unknown;
    /// backends then assume the largest content they handle.
    async fn copy_stream_to(
        &self,
        key: &str,
        stream: ContentStream,
        md5_sum: Option<&str>,
        size: Option<u64>,
        metadata: UserMetadata,
    ) -> Result<(), Error>;

    /// Copy `source_key` of `source` to `key` of this root.
    ///
    /// The source's checksum, mtime and metadata fields are carried over, with `metadata`
    /// taking precedence.
    async fn copy_content_to(
        &self,
        key: &str,
        source: &dyn Root,
        source_key: &str,
        metadata: UserMetadata,
    ) -> Result<(), Error> {
        copy_content_generic(self, key, source, source_key, metadata).await
    }

    /// Copy every content key below `source_key` of `source` to the same relative key below
    /// `key` of this root.
    async fn copy_tree_to(
        &self,
        key: &str,
        source: &dyn Root,
        source_key: &str,
    ) -> Result<(), Error> {
        for relative in source.unprefixed_subtree_keys(source_key).await? {
            self.copy_content_to(
                &key::join_key(key, &relative),
                source,
                &key::join_key(source_key, &relative),
                UserMetadata::new(),
            )
            .await?;
        }
        Ok(())
    }

    /// Remove the content at `key`.
    async fn delete_content(&self, key: &str) -> Result<(), Error>;

    /// Move content within this root. Not atomic unless the backend says otherwise.
    ///
    /// Streams the content unless the backend moves or copies natively.
    async fn move_content(&self, source_key: &str, target_key: &str) -> Result<(), Error> {
        let source = self.metadata(source_key).await?;
        let metadata = source.user_metadata();
        let md5_sum = match source.md5_sum {
            Some(md5_sum) => md5_sum,
            None => self.md5_sum(source_key).await?,
        };
        let stream = self.input_stream(source_key).await?;
        self.copy_stream_to(
            target_key,
            stream,
            Some(&md5_sum),
            Some(source.size),
            metadata,
        )
        .await?;
        self.delete_content(source_key).await
    }

    /// Delete the content at a content key, or everything below a directory key.
    ///
    /// Contents of a directory are deleted concurrently; the first failure is returned.
    async fn delete_tree(&self, key: &str) -> Result<(), Error> {
        if self.is_directory(key).await? {
            delete_keys(self, self.subtree_keys(key).await?).await
        } else {
            self.delete_content(key).await
        }
    }

    /// Delete all content in this root.
    async fn delete_all_content(&self) -> Result<(), Error> {
        delete_keys(self, self.subtree_keys("").await?).await
    }

    /// The content at `key`, in memory.
    async fn as_bytes(&self, key: &str) -> Result<Bytes, Error> {
        self.input_stream(key).await?.collect().await
    }

    /// The content at `key` as UTF-8 text.
    async fn as_string(&self, key: &str) -> Result<String, Error> {
        let bytes = self.as_bytes(key).await?;
        String::from_utf8(bytes.to_vec()).map_err(error::from_kind(ErrorKind::BackendError))
    }

    /// Write `bytes` to `key` with a checksum, stamping it with `mtime` (now if absent).
    async fn write_bytes_to(
        &self,
        key: &str,
        bytes: Bytes,
        mtime: Option<SystemTime>,
    ) -> Result<(), Error> {
        let md5_sum = checksum::base64_md5(&bytes);
        let size = bytes.len() as u64;
        let metadata = UserMetadata::new().with_mtime(mtime.unwrap_or_else(SystemTime::now));
        self.copy_stream_to(key, bytes.into(), Some(&md5_sum), Some(size), metadata)
            .await
    }
}

/// Stream the content at `key` through MD5.
pub(crate) async fn compute_md5_sum<R>(root: &R, key: &str) -> Result<String, Error>
where
    R: Root + ?Sized,
{
    let stream = root.input_stream(key).await?;
    let mut reader = DigestReader::new(stream);
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(reader.md5_sum())
}

/// Copy by streaming from any root to any root.
pub(crate) async fn copy_content_generic<R>(
    target: &R,
    key: &str,
    source: &dyn Root,
    source_key: &str,
    metadata: UserMetadata,
) -> Result<(), Error>
where
    R: Root + ?Sized,
{
    let source_metadata = source.metadata(source_key).await?;
    let md5_sum = match source_metadata.md5_sum.clone() {
        Some(md5_sum) => md5_sum,
        None => source.md5_sum(source_key).await?,
    };
    let metadata = source_metadata.user_metadata().merge(metadata);
    tracing::debug!(
        source = source.name(),
        source_key,
        target = target.name(),
        key,
        "streaming copy"
    );
    let stream = source.input_stream(source_key).await?;
    target
        .copy_stream_to(
            key,
            stream,
            Some(&md5_sum),
            Some(source_metadata.size),
            metadata,
        )
        .await
}

async fn delete_keys<R>(root: &R, keys: Vec<String>) -> Result<(), Error>
where
    R: Root + ?Sized,
{
    futures_util::stream::iter(keys)
        .map(Ok::<_, Error>)
        .try_for_each_concurrent(DEFAULT_DELETE_CONCURRENCY, |key| async move {
            root.delete_content(&key).await
        })
        .await
}
