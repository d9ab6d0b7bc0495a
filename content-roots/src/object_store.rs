/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The object store operations [`S3Root`](crate::root::s3::S3Root) is built on.
//!
//! [`ObjectStore`] is implemented for [`aws_sdk_s3::Client`] and by [`InMemoryObjectStore`],
//! an in-process store that mimics the parts of S3 semantics roots depend on (ETags,
//! `Content-MD5` validation, pagination and versioning).

use std::collections::HashMap;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;
use crate::io::ContentStream;

pub mod in_memory;
mod sdk;

pub use in_memory::InMemoryObjectStore;

/// Largest number of keys accepted by a single `DeleteObjects` request.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Result of a `HeadObject` call.
#[derive(Clone, Debug, Default)]
pub struct ObjectHead {
    /// Content length
    pub size: u64,
    /// ETag as reported by the store, including quotes
    pub e_tag: Option<String>,
    /// Last modification time
    pub last_modified: Option<SystemTime>,
    /// User metadata headers
    pub metadata: HashMap<String, String>,
}

/// A `GetObject` response.
#[derive(Debug)]
pub struct GetObjectOutput {
    /// Object head
    pub head: ObjectHead,
    /// Object content
    pub body: ContentStream,
}

/// A `PutObject` request.
#[derive(Debug, Default)]
pub struct PutObjectRequest {
    /// Destination key
    pub key: String,
    /// Content
    pub body: ContentStream,
    /// Content length, when known
    pub content_length: Option<u64>,
    /// Base64 MD5 the store must validate the content against
    pub content_md5: Option<String>,
    /// User metadata headers
    pub metadata: HashMap<String, String>,
}

/// Object source of a server-side copy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopySource {
    /// Source bucket
    pub bucket: String,
    /// Source key
    pub key: String,
}

impl CopySource {
    /// `bucket/key`, the form the `x-amz-copy-source` header takes.
    pub fn header_value(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

/// An in-progress multipart upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultipartUpload {
    /// Destination key
    pub key: String,
    /// Store assigned upload id
    pub upload_id: String,
}

/// One uploaded part of a multipart upload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: i32,
    /// ETag returned for the part
    pub e_tag: String,
}

/// A `ListObjectsV2` request.
#[derive(Clone, Debug, Default)]
pub struct ListObjectsRequest {
    /// Key prefix
    pub prefix: String,
    /// Delimiter grouping keys into common prefixes
    pub delimiter: Option<String>,
    /// Continuation token from a previous page
    pub continuation_token: Option<String>,
    /// Upper bound on keys returned in the page
    pub max_keys: Option<i32>,
}

/// One object in a listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectSummary {
    /// Full key
    pub key: String,
    /// Content length
    pub size: u64,
    /// ETag including quotes
    pub e_tag: Option<String>,
    /// Last modification time
    pub last_modified: Option<SystemTime>,
}

/// One page of a `ListObjectsV2` response.
#[derive(Clone, Debug, Default)]
pub struct ListObjectsPage {
    /// Objects in key order
    pub objects: Vec<ObjectSummary>,
    /// Common prefixes, including the trailing delimiter
    pub common_prefixes: Vec<String>,
    /// Token for the next page, if the listing was truncated
    pub next_continuation_token: Option<String>,
}

/// A `ListObjectVersions` request.
#[derive(Clone, Debug, Default)]
pub struct ListVersionsRequest {
    /// Key prefix
    pub prefix: String,
    /// Delimiter grouping keys into common prefixes
    pub delimiter: Option<String>,
    /// Key marker from a previous page
    pub key_marker: Option<String>,
    /// Version id marker from a previous page
    pub version_id_marker: Option<String>,
}

/// One entry of a version listing. Keys are full store keys.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionEntry {
    /// Full key
    pub key: String,
    /// Version id
    pub version_id: String,
    /// True for the newest entry of the key
    pub is_latest: bool,
    /// True for delete markers
    pub is_delete_marker: bool,
    /// Creation time of the entry
    pub last_modified: Option<SystemTime>,
}

/// One page of a `ListObjectVersions` response.
#[derive(Clone, Debug, Default)]
pub struct ListVersionsPage {
    /// Versions and delete markers, grouped by key with the newest first
    pub versions: Vec<VersionEntry>,
    /// Common prefixes, including the trailing delimiter
    pub common_prefixes: Vec<String>,
    /// Key marker for the next page, if the listing was truncated
    pub next_key_marker: Option<String>,
    /// Version id marker for the next page
    pub next_version_id_marker: Option<String>,
}

/// Identifies a key, or one version of it, for deletion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectIdentifier {
    /// Full key
    pub key: String,
    /// Version to delete; the current version when absent
    pub version_id: Option<String>,
}

/// A key the store failed to delete in a batch delete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeleteFailure {
    /// Full key
    pub key: String,
    /// Version, if one was requested
    pub version_id: Option<String>,
    /// Error code
    pub code: Option<String>,
    /// Error message
    pub message: Option<String>,
}

/// Operations of an S3-compatible object store used by
/// [`S3Root`](crate::root::s3::S3Root).
///
/// Errors follow S3 error codes: a missing key, bucket or version is
/// [`ErrorKind::NotFound`](crate::error::ErrorKind::NotFound) and a rejected `Content-MD5`
/// is [`ErrorKind::IntegrityMismatch`](crate::error::ErrorKind::IntegrityMismatch).
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Metadata of the current version of `key`.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, Error>;

    /// Content and metadata of the current version of `key`.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetObjectOutput, Error>;

    /// `range` of the content of `key`.
    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
    ) -> Result<Bytes, Error>;

    /// Store an object in a single request, returning its ETag.
    async fn put_object(
        &self,
        bucket: &str,
        request: PutObjectRequest,
    ) -> Result<Option<String>, Error>;

    /// Delete `key`, or one version of it.
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(), Error>;

    /// Delete up to [`MAX_DELETE_BATCH`] objects, returning the ones that failed.
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
    ) -> Result<Vec<DeleteFailure>, Error>;

    /// Server-side copy replacing the destination metadata with `metadata`.
    async fn copy_object(
        &self,
        bucket: &str,
        key: &str,
        source: &CopySource,
        metadata: HashMap<String, String>,
    ) -> Result<(), Error>;

    /// Start a multipart upload.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<MultipartUpload, Error>;

    /// Upload one part, returning its ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, Error>;

    /// Copy `range` of an existing object as one part, returning its ETag.
    async fn upload_part_copy(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number: i32,
        source: &CopySource,
        range: Range<u64>,
    ) -> Result<String, Error>;

    /// Assemble the uploaded parts, returning the ETag of the new object.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> Result<Option<String>, Error>;

    /// Discard a multipart upload and its parts.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), Error>;

    /// One page of keys.
    async fn list_objects(
        &self,
        bucket: &str,
        request: &ListObjectsRequest,
    ) -> Result<ListObjectsPage, Error>;

    /// One page of versions.
    async fn list_object_versions(
        &self,
        bucket: &str,
        request: &ListVersionsRequest,
    ) -> Result<ListVersionsPage, Error>;

    /// Enable or suspend versioning.
    async fn put_bucket_versioning(&self, bucket: &str, enabled: bool) -> Result<(), Error>;

    /// Presigned URL for a `GetObject` of `key`.
    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, Error>;
}

/// Shared handle to a store.
pub type SharedObjectStore = Arc<dyn ObjectStore>;
