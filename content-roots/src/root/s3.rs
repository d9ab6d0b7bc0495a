/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::Root;
use crate::error::{self, Error, ErrorKind};
use crate::io::{ContentStream, RangeReader, RangeSource};
use crate::key;
use crate::metadata::{self, Metadata, UserMetadata};
use crate::object_store::{
    ListObjectsRequest, ObjectHead, ObjectIdentifier, ObjectStore, SharedObjectStore,
    MAX_DELETE_BATCH,
};
use crate::types::RootType;
use crate::{GIBIBYTE, MEBIBYTE};

mod copy;
mod upload;
mod versions;

/// Content of at least this size is uploaded (and copied) in parts.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 5 * GIBIBYTE;

/// Size of the parts of a streamed multipart upload.
pub const DEFAULT_PART_SIZE: u64 = 5 * MEBIBYTE;

/// Size of the parts of a server-side multipart copy.
pub const DEFAULT_COPY_PART_SIZE: u64 = GIBIBYTE;

/// Objects larger than this are read through a [`RangeReader`].
pub const DEFAULT_RANGE_READ_THRESHOLD: u64 = 64 * MEBIBYTE;

/// Lifetime of a presigned URL when none is requested.
pub const DEFAULT_PRESIGNED_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// largest part S3 accepts
const MAX_PART_SIZE: u64 = 5 * GIBIBYTE;

/// A root over a bucket of an S3-compatible store, optionally below a key prefix.
///
/// The prefix is added to keys on the way in and removed on the way out, so clients never
/// see it. Directories are purely syntactic: a key is a directory key iff it is empty or ends
/// in `/`, and listing a directory lists the objects below its prefix.
///
/// Checksum and modification time are kept in the `md5chksum` and `mtime` user metadata
/// headers, which makes them readable by other tools using the same convention.
///
/// `S3Root` is cheap to clone; clones share configuration and store.
#[derive(Clone, Debug)]
pub struct S3Root {
    pub(crate) handle: Arc<Handle>,
}

#[derive(Debug)]
pub(crate) struct Handle {
    pub(crate) name: String,
    pub(crate) bucket: String,
    pub(crate) prefix: String,
    pub(crate) store: SharedObjectStore,
    pub(crate) versioned: AtomicBool,
    pub(crate) copy_targets: Vec<String>,
    pub(crate) multipart_threshold: u64,
    pub(crate) part_size: u64,
    pub(crate) copy_part_size: u64,
    pub(crate) range_read_threshold: u64,
}

impl S3Root {
    /// Start configuring a new root.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Bucket holding the content.
    pub fn bucket(&self) -> &str {
        &self.handle.bucket
    }

    /// Key prefix below which the content lives. Empty or ending in `/`.
    pub fn prefix(&self) -> &str {
        &self.handle.prefix
    }

    /// The store this root talks to.
    pub fn store(&self) -> &SharedObjectStore {
        &self.handle.store
    }

    /// Whether this root is configured for a versioned bucket.
    pub fn is_versioned(&self) -> bool {
        self.handle.versioned.load(Ordering::Relaxed)
    }

    /// Whether content can be copied server-side from this root to the root named `name`.
    pub fn can_s3_copy_to(&self, name: &str) -> bool {
        self.handle.copy_targets.iter().any(|target| target == name)
    }

    /// Store key of `key`.
    pub(crate) fn full_key(&self, key: &str) -> String {
        key::add_prefix(&self.handle.prefix, key)
    }

    /// Root key of the store key `full_key`, if it is below the prefix.
    pub(crate) fn root_key<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        key::remove_prefix(&self.handle.prefix, full_key)
    }

    /// Raw `HeadObject` result for `key`.
    pub async fn head(&self, key: &str) -> Result<ObjectHead, Error> {
        self.handle
            .store
            .head_object(&self.handle.bucket, &self.full_key(key))
            .await
    }

    /// `HeadObject` of a content key; directory keys name no content.
    async fn content_head(&self, key: &str) -> Result<ObjectHead, Error> {
        if key::is_directory_key(key) {
            return Err(error::invalid_key(&self.handle.name, key));
        }
        self.head(key).await
    }

    /// `length` bytes of the content at `key`, starting at `start`.
    pub async fn get_bytes(&self, key: &str, start: u64, length: u64) -> Result<Bytes, Error> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let end = start.checked_add(length).ok_or_else(|| {
            Error::new(
                ErrorKind::OutOfRange,
                format!("range {start}+{length} overflows"),
            )
        })?;
        self.handle
            .store
            .get_object_range(&self.handle.bucket, &self.full_key(key), start..end)
            .await
    }

    /// Seekable reader over the content at `key`, fetched by ranges.
    pub fn range_reader(&self, key: &str) -> RangeReader {
        RangeReader::new(Arc::new(ObjectRange {
            store: self.handle.store.clone(),
            bucket: self.handle.bucket.clone(),
            key: self.full_key(key),
        }))
    }

    /// A URL granting temporary `GET` access to `key` without credentials.
    ///
    /// Expires after `expires_in`, or [`DEFAULT_PRESIGNED_URL_EXPIRY`] if not given.
    pub async fn presigned_get_url(
        &self,
        key: &str,
        expires_in: Option<Duration>,
    ) -> Result<String, Error> {
        self.handle
            .store
            .presigned_get_url(
                &self.handle.bucket,
                &self.full_key(key),
                expires_in.unwrap_or(DEFAULT_PRESIGNED_URL_EXPIRY),
            )
            .await
    }

    /// All pages of a listing below `prefix` (a store key).
    async fn list(&self, prefix: String, delimiter: bool) -> Result<Listing, Error> {
        let mut request = ListObjectsRequest {
            prefix,
            delimiter: delimiter.then(|| key::DELIMITER.to_string()),
            ..Default::default()
        };
        let mut listing = Listing::default();
        loop {
            let page = self
                .handle
                .store
                .list_objects(&self.handle.bucket, &request)
                .await?;
            listing
                .objects
                .extend(page.objects.into_iter().map(|object| object.key));
            listing.common_prefixes.extend(page.common_prefixes);
            match page.next_continuation_token {
                Some(token) => request.continuation_token = Some(token),
                None => break,
            }
        }
        Ok(listing)
    }

    /// Root keys of content objects below the directory `key`.
    async fn content_keys_below(&self, key: &str, delimiter: bool) -> Result<Vec<String>, Error> {
        let prefix = self.full_key(&key::ensure_directory_key(key));
        let listing = self.list(prefix, delimiter).await?;
        let mut keys: Vec<String> = listing
            .objects
            .iter()
            // directory placeholder objects are not content
            .filter(|full_key| !key::is_directory_key(full_key))
            .filter_map(|full_key| self.root_key(full_key))
            .map(str::to_owned)
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_batched(&self, keys: Vec<String>) -> Result<(), Error> {
        for batch in keys.chunks(MAX_DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier {
                    key: self.full_key(key),
                    version_id: None,
                })
                .collect();
            let failures = self
                .handle
                .store
                .delete_objects(&self.handle.bucket, objects)
                .await?;
            if let Some(failure) = failures.into_iter().next() {
                return Err(Error::new(
                    error::kind_for_code(failure.code.as_deref()),
                    format!(
                        "failed to delete {}: {}",
                        failure.key,
                        failure.message.unwrap_or_default()
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Listing {
    objects: Vec<String>,
    common_prefixes: Vec<String>,
}

/// Ranged access to one object.
#[derive(Debug)]
struct ObjectRange {
    store: SharedObjectStore,
    bucket: String,
    key: String,
}

#[async_trait]
impl RangeSource for ObjectRange {
    async fn size(&self) -> Result<u64, Error> {
        Ok(self.store.head_object(&self.bucket, &self.key).await?.size)
    }

    async fn fetch(&self, start: u64, length: u64) -> Result<Bytes, Error> {
        self.store
            .get_object_range(&self.bucket, &self.key, start..start + length)
            .await
    }
}

#[async_trait]
impl Root for S3Root {
    fn name(&self) -> &str {
        &self.handle.name
    }

    fn root_type(&self) -> RootType {
        RootType::S3
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn size(&self, key: &str) -> Result<u64, Error> {
        Ok(self.content_head(key).await?.size)
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        if key::is_directory_key(key) {
            let request = ListObjectsRequest {
                prefix: self.full_key(key),
                max_keys: Some(1),
                ..Default::default()
            };
            let page = self
                .handle
                .store
                .list_objects(&self.handle.bucket, &request)
                .await?;
            return Ok(!page.objects.is_empty() || !page.common_prefixes.is_empty());
        }
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == &ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn is_directory(&self, key: &str) -> Result<bool, Error> {
        Ok(key::is_directory_key(key))
    }

    async fn metadata(&self, key: &str) -> Result<Metadata, Error> {
        let head = self.content_head(key).await?;
        Ok(metadata::from_headers(head.size, &head.metadata))
    }

    async fn md5_sum(&self, key: &str) -> Result<String, Error> {
        match self.metadata(key).await?.md5_sum {
            Some(md5_sum) => Ok(md5_sum),
            None => super::compute_md5_sum(self, key).await,
        }
    }

    async fn file_keys(&self, key: &str) -> Result<Vec<String>, Error> {
        if !key::is_directory_key(key) {
            return Err(error::invalid_directory(key));
        }
        self.content_keys_below(key, true).await
    }

    async fn subdirectory_keys(&self, key: &str) -> Result<Vec<String>, Error> {
        if !key::is_directory_key(key) {
            return Err(error::invalid_directory(key));
        }
        let prefix = self.full_key(key);
        let listing = self.list(prefix, true).await?;
        let mut keys: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|full_key| self.root_key(full_key))
            .map(str::to_owned)
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn subtree_keys(&self, key: &str) -> Result<Vec<String>, Error> {
        self.content_keys_below(key, false).await
    }

    async fn input_stream(&self, key: &str) -> Result<ContentStream, Error> {
        let full_key = self.full_key(key);
        let size = self.size(key).await?;
        if size > self.handle.range_read_threshold {
            tracing::debug!(root = %self.handle.name, key, size, "reading by ranges");
            let reader = self.range_reader(key).with_size(size);
            return Ok(ContentStream::from_reader(reader, Some(size)));
        }
        let output = self
            .handle
            .store
            .get_object(&self.handle.bucket, &full_key)
            .await?;
        Ok(output.body)
    }

    async fn copy_stream_to(
        &self,
        key: &str,
        stream: ContentStream,
        md5_sum: Option<&str>,
        size: Option<u64>,
        metadata: UserMetadata,
    ) -> Result<(), Error> {
        upload::upload(self, key, stream, md5_sum, size, metadata).await
    }

    async fn copy_content_to(
        &self,
        key: &str,
        source: &dyn Root,
        source_key: &str,
        metadata: UserMetadata,
    ) -> Result<(), Error> {
        match source.as_any().downcast_ref::<S3Root>() {
            Some(s3_source) if s3_source.can_s3_copy_to(self.name()) => {
                copy::copy_from(self, key, s3_source, source_key, metadata).await
            }
            _ => super::copy_content_generic(self, key, source, source_key, metadata).await,
        }
    }

    async fn move_content(&self, source_key: &str, target_key: &str) -> Result<(), Error> {
        self.copy_content_to(target_key, self, source_key, UserMetadata::new())
            .await?;
        self.delete_content(source_key).await
    }

    async fn delete_content(&self, key: &str) -> Result<(), Error> {
        if key::is_directory_key(key) {
            return Err(error::invalid_key(&self.handle.name, key));
        }
        self.handle
            .store
            .delete_object(&self.handle.bucket, &self.full_key(key), None)
            .await
    }

    async fn delete_tree(&self, key: &str) -> Result<(), Error> {
        if !key::is_directory_key(key) {
            return self.delete_content(key).await;
        }
        let keys = self.subtree_keys(key).await?;
        tracing::debug!(root = %self.handle.name, key, count = keys.len(), "deleting tree");
        self.delete_batched(keys).await
    }

    async fn delete_all_content(&self) -> Result<(), Error> {
        self.delete_tree("").await
    }
}

/// Builder for [`S3Root`].
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    bucket: Option<String>,
    prefix: Option<String>,
    store: Option<SharedObjectStore>,
    versioned: bool,
    copy_targets: Option<Vec<String>>,
    multipart_threshold: Option<u64>,
    part_size: Option<u64>,
    copy_part_size: Option<u64>,
    range_read_threshold: Option<u64>,
}

impl Builder {
    /// Name of the root (required).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bucket holding the content (required).
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Key prefix below which the content lives. A trailing `/` is added if missing.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Store to talk to (required).
    pub fn store(mut self, store: impl ObjectStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Shared store to talk to.
    pub fn shared_store(mut self, store: SharedObjectStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Talk to S3 through `client`.
    pub fn client(self, client: aws_sdk_s3::Client) -> Self {
        self.store(client)
    }

    /// Mark the bucket as versioned, enabling the version operations.
    pub fn versioned(mut self, versioned: bool) -> Self {
        self.versioned = versioned;
        self
    }

    /// Names of roots this root may copy to server-side. Defaults to its own name.
    pub fn copy_targets(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.copy_targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Content at least this large, or of unknown size, is uploaded in parts.
    pub fn multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = Some(threshold);
        self
    }

    /// Part size of multipart uploads.
    pub fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    /// Part size of multipart server-side copies.
    pub fn copy_part_size(mut self, part_size: u64) -> Self {
        self.copy_part_size = Some(part_size);
        self
    }

    /// Objects larger than this are read by ranges.
    pub fn range_read_threshold(mut self, threshold: u64) -> Self {
        self.range_read_threshold = Some(threshold);
        self
    }

    /// Build the root.
    pub fn build(self) -> Result<S3Root, Error> {
        let name = self
            .name
            .ok_or_else(|| error::invalid_configuration("name is required"))?;
        let bucket = self
            .bucket
            .ok_or_else(|| error::invalid_configuration("bucket is required"))?;
        let store = self
            .store
            .ok_or_else(|| error::invalid_configuration("an object store is required"))?;
        let part_size = self.part_size.unwrap_or(DEFAULT_PART_SIZE);
        let copy_part_size = self.copy_part_size.unwrap_or(DEFAULT_COPY_PART_SIZE);
        if part_size == 0 || copy_part_size == 0 {
            return Err(error::invalid_configuration("part sizes must be non-zero"));
        }
        if part_size > MAX_PART_SIZE || copy_part_size > MAX_PART_SIZE {
            return Err(error::invalid_configuration(format!(
                "part sizes must not exceed {MAX_PART_SIZE} bytes"
            )));
        }
        let prefix = match self.prefix {
            Some(prefix) if !prefix.is_empty() => key::ensure_directory_key(&prefix),
            _ => String::new(),
        };
        let copy_targets = self.copy_targets.unwrap_or_else(|| vec![name.clone()]);

        Ok(S3Root {
            handle: Arc::new(Handle {
                name,
                bucket,
                prefix,
                store,
                versioned: AtomicBool::new(self.versioned),
                copy_targets,
                multipart_threshold: self
                    .multipart_threshold
                    .unwrap_or(DEFAULT_MULTIPART_THRESHOLD),
                part_size,
                copy_part_size,
                range_read_threshold: self
                    .range_read_threshold
                    .unwrap_or(DEFAULT_RANGE_READ_THRESHOLD),
            }),
        })
    }
}
