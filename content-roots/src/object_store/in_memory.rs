/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! In-memory implementation of the [`ObjectStore`] trait.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::RwLock;

use super::{
    CompletedPart, CopySource, DeleteFailure, GetObjectOutput, ListObjectsPage,
    ListObjectsRequest, ListVersionsPage, ListVersionsRequest, MultipartUpload, ObjectHead,
    ObjectIdentifier, ObjectStore, ObjectSummary, PutObjectRequest, VersionEntry,
};
use crate::checksum;
use crate::error::{self, Error};

const DEFAULT_PAGE_SIZE: usize = 1000;
const NULL_VERSION: &str = "null";

/// An in-memory object store with S3 semantics.
///
/// Buckets must be created with [`create_bucket`](Self::create_bucket) before use. Supports
/// `Content-MD5` validation, S3 style ETags (including multipart ETags), paginated listings
/// and bucket versioning. The page size is configurable so pagination can be exercised with
/// small data sets.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    state: RwLock<State>,
    page_size: usize,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    // upload-id -> pending upload
    uploads: HashMap<String, PendingUpload>,
    next_id: u64,
}

#[derive(Debug, Default)]
struct Bucket {
    versioned: bool,
    // key -> versions, newest first
    objects: BTreeMap<String, Vec<StoredVersion>>,
}

#[derive(Clone, Debug)]
struct StoredVersion {
    version_id: String,
    // `None` for delete markers
    data: Option<Bytes>,
    e_tag: String,
    metadata: HashMap<String, String>,
    last_modified: SystemTime,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    metadata: HashMap<String, String>,
    // part# -> content
    parts: BTreeMap<i32, Bytes>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limit the number of entries returned per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create (or reset the versioning of) a bucket.
    pub async fn create_bucket(&self, bucket: &str, versioned: bool) {
        let mut state = self.state.write().await;
        state.buckets.entry(bucket.to_owned()).or_default().versioned = versioned;
    }

    /// Total number of stored versions and delete markers in `bucket`.
    pub async fn version_count(&self, bucket: &str) -> usize {
        let state = self.state.read().await;
        state
            .buckets
            .get(bucket)
            .map(|b| b.objects.values().map(Vec::len).sum())
            .unwrap_or_default()
    }

    /// Number of multipart uploads neither completed nor aborted.
    pub async fn pending_upload_count(&self) -> usize {
        self.state.read().await.uploads.len()
    }
}

fn s3_error(code: &str, message: impl std::fmt::Display) -> Error {
    Error::new(
        error::kind_for_code(Some(code)),
        format!("{code}: {message}"),
    )
}

fn quoted_md5(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

impl State {
    fn bucket(&self, bucket: &str) -> Result<&Bucket, Error> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| s3_error("NoSuchBucket", bucket))
    }

    fn bucket_mut(&mut self, bucket: &str) -> Result<&mut Bucket, Error> {
        self.buckets
            .get_mut(bucket)
            .ok_or_else(|| s3_error("NoSuchBucket", bucket))
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:016x}", self.next_id)
    }

    /// Add a new current version of `key`.
    fn store(
        &mut self,
        bucket: &str,
        key: &str,
        data: Option<Bytes>,
        e_tag: String,
        metadata: HashMap<String, String>,
    ) -> Result<(), Error> {
        let versioned = self.bucket(bucket)?.versioned;
        let version_id = if versioned {
            self.next_id()
        } else {
            NULL_VERSION.to_owned()
        };
        let version = StoredVersion {
            version_id,
            data,
            e_tag,
            metadata,
            last_modified: SystemTime::now(),
        };
        let bucket = self.bucket_mut(bucket)?;
        let versions = bucket.objects.entry(key.to_owned()).or_default();
        if versioned {
            versions.insert(0, version);
        } else {
            versions.retain(|v| v.version_id != NULL_VERSION);
            versions.insert(0, version);
        }
        Ok(())
    }
}

impl Bucket {
    fn current(&self, key: &str) -> Result<(&StoredVersion, &Bytes), Error> {
        let latest = self
            .objects
            .get(key)
            .and_then(|versions| versions.first())
            .ok_or_else(|| s3_error("NoSuchKey", key))?;
        match &latest.data {
            Some(data) => Ok((latest, data)),
            None => Err(s3_error("NoSuchKey", key)),
        }
    }

    fn delete(&mut self, key: &str, version_id: Option<&str>) -> Result<Option<StoredVersion>, Error> {
        match version_id {
            Some(version_id) => {
                let versions = self
                    .objects
                    .get_mut(key)
                    .ok_or_else(|| s3_error("NoSuchVersion", version_id))?;
                let before = versions.len();
                versions.retain(|v| v.version_id != version_id);
                if versions.len() == before {
                    return Err(s3_error("NoSuchVersion", version_id));
                }
                if versions.is_empty() {
                    self.objects.remove(key);
                }
                Ok(None)
            }
            None if self.versioned => Ok(Some(StoredVersion {
                version_id: String::new(),
                data: None,
                e_tag: String::new(),
                metadata: HashMap::new(),
                last_modified: SystemTime::now(),
            })),
            None => {
                self.objects.remove(key);
                Ok(None)
            }
        }
    }
}

fn head_of(version: &StoredVersion, data: &Bytes) -> ObjectHead {
    ObjectHead {
        size: data.len() as u64,
        e_tag: Some(version.e_tag.clone()),
        last_modified: Some(version.last_modified),
        metadata: version.metadata.clone(),
    }
}

/// Collapse `key` under `prefix` to its common prefix, if `delimiter` occurs past the prefix.
fn common_prefix(prefix: &str, delimiter: Option<&str>, key: &str) -> Option<String> {
    let delimiter = delimiter.filter(|d| !d.is_empty())?;
    let rest = key.strip_prefix(prefix)?;
    let idx = rest.find(delimiter)?;
    Some(format!("{prefix}{}", &rest[..idx + delimiter.len()]))
}

enum Listed<T> {
    Item(T),
    Prefix(String),
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, Error> {
        let state = self.state.read().await;
        let (version, data) = state.bucket(bucket)?.current(key)?;
        Ok(head_of(version, data))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetObjectOutput, Error> {
        let state = self.state.read().await;
        let (version, data) = state.bucket(bucket)?.current(key)?;
        Ok(GetObjectOutput {
            head: head_of(version, data),
            body: data.clone().into(),
        })
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
    ) -> Result<Bytes, Error> {
        let state = self.state.read().await;
        let (_, data) = state.bucket(bucket)?.current(key)?;
        let len = data.len() as u64;
        if range.start >= len || range.start >= range.end {
            return Err(s3_error("InvalidRange", format!("{range:?} of {len}")));
        }
        Ok(data.slice(range.start as usize..range.end.min(len) as usize))
    }

    async fn put_object(
        &self,
        bucket: &str,
        request: PutObjectRequest,
    ) -> Result<Option<String>, Error> {
        let data = request.body.collect().await?;
        if let Some(expected) = &request.content_md5 {
            if checksum::hex_from_base64(expected).is_err() {
                return Err(s3_error("InvalidDigest", expected));
            }
            let actual = checksum::base64_md5(&data);
            if &actual != expected {
                return Err(s3_error(
                    "BadDigest",
                    format!("expected {expected}, got {actual}"),
                ));
            }
        }
        let e_tag = quoted_md5(&data);
        let mut state = self.state.write().await;
        state.store(
            bucket,
            &request.key,
            Some(data),
            e_tag.clone(),
            request.metadata,
        )?;
        Ok(Some(e_tag))
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if let Some(mut marker) = state.bucket_mut(bucket)?.delete(key, version_id)? {
            marker.version_id = state.next_id();
            let versions = state
                .bucket_mut(bucket)?
                .objects
                .entry(key.to_owned())
                .or_default();
            versions.insert(0, marker);
        }
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
    ) -> Result<Vec<DeleteFailure>, Error> {
        let mut failures = Vec::new();
        for object in objects {
            if let Err(err) = self
                .delete_object(bucket, &object.key, object.version_id.as_deref())
                .await
            {
                failures.push(DeleteFailure {
                    key: object.key,
                    version_id: object.version_id,
                    code: None,
                    message: Some(err.to_string()),
                });
            }
        }
        Ok(failures)
    }

    async fn copy_object(
        &self,
        bucket: &str,
        key: &str,
        source: &CopySource,
        metadata: HashMap<String, String>,
    ) -> Result<(), Error> {
        let mut state = self.state.write().await;
        let data = state.bucket(&source.bucket)?.current(&source.key)?.1.clone();
        let e_tag = quoted_md5(&data);
        state.store(bucket, key, Some(data), e_tag, metadata)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<MultipartUpload, Error> {
        let mut state = self.state.write().await;
        state.bucket(bucket)?;
        let upload_id = state.next_id();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                metadata,
                parts: BTreeMap::new(),
            },
        );
        Ok(MultipartUpload {
            key: key.to_owned(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, Error> {
        let mut state = self.state.write().await;
        let pending = state
            .uploads
            .get_mut(&upload.upload_id)
            .ok_or_else(|| s3_error("NoSuchUpload", &upload.upload_id))?;
        let e_tag = quoted_md5(&body);
        pending.parts.insert(part_number, body);
        Ok(e_tag)
    }

    async fn upload_part_copy(
        &self,
        _bucket: &str,
        upload: &MultipartUpload,
        part_number: i32,
        source: &CopySource,
        range: Range<u64>,
    ) -> Result<String, Error> {
        let mut state = self.state.write().await;
        let data = state.bucket(&source.bucket)?.current(&source.key)?.1.clone();
        let end = range.end.min(data.len() as u64);
        if range.start > end {
            return Err(s3_error("InvalidRange", format!("{range:?}")));
        }
        let part = data.slice(range.start as usize..end as usize);
        let pending = state
            .uploads
            .get_mut(&upload.upload_id)
            .ok_or_else(|| s3_error("NoSuchUpload", &upload.upload_id))?;
        let e_tag = quoted_md5(&part);
        pending.parts.insert(part_number, part);
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> Result<Option<String>, Error> {
        let mut state = self.state.write().await;
        let pending = state
            .uploads
            .remove(&upload.upload_id)
            .ok_or_else(|| s3_error("NoSuchUpload", &upload.upload_id))?;
        if pending.bucket != bucket {
            return Err(s3_error("NoSuchUpload", &upload.upload_id));
        }
        if parts.is_empty() {
            return Err(s3_error("MalformedXML", "no parts"));
        }

        // digests of the parts are combined exactly as S3 does
        let mut combined = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len());
        for part in &parts {
            let data = pending
                .parts
                .get(&part.part_number)
                .ok_or_else(|| s3_error("InvalidPart", part.part_number))?;
            if quoted_md5(data) != part.e_tag {
                return Err(s3_error("InvalidPart", part.part_number));
            }
            digests.extend_from_slice(&md5::compute(data).0);
            combined.extend_from_slice(data);
        }
        let e_tag = format!("\"{:x}-{}\"", md5::compute(&digests), parts.len());

        state.store(
            bucket,
            &pending.key,
            Some(combined.freeze()),
            e_tag.clone(),
            pending.metadata,
        )?;
        Ok(Some(e_tag))
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state
            .uploads
            .remove(&upload.upload_id)
            .map(|_| ())
            .ok_or_else(|| s3_error("NoSuchUpload", &upload.upload_id))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        request: &ListObjectsRequest,
    ) -> Result<ListObjectsPage, Error> {
        let state = self.state.read().await;
        let bucket = state.bucket(bucket)?;
        let prefix = request.prefix.as_str();
        let delimiter = request.delimiter.as_deref();

        let mut seen_prefixes = BTreeSet::new();
        let mut entries: Vec<(String, Listed<ObjectSummary>)> = Vec::new();
        for (key, versions) in bucket.objects.range(prefix.to_owned()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let Some(latest) = versions.first() else {
                continue;
            };
            let Some(data) = &latest.data else {
                continue;
            };
            match common_prefix(prefix, delimiter, key) {
                Some(common) => {
                    if seen_prefixes.insert(common.clone()) {
                        entries.push((common.clone(), Listed::Prefix(common)));
                    }
                }
                None => entries.push((
                    key.clone(),
                    Listed::Item(ObjectSummary {
                        key: key.clone(),
                        size: data.len() as u64,
                        e_tag: Some(latest.e_tag.clone()),
                        last_modified: Some(latest.last_modified),
                    }),
                )),
            }
        }

        let page_size = request
            .max_keys
            .map(|max| (max.max(1) as usize).min(self.page_size))
            .unwrap_or(self.page_size);
        let start = match &request.continuation_token {
            Some(token) => entries.partition_point(|(k, _)| k <= token),
            None => 0,
        };
        let end = (start + page_size).min(entries.len());
        let next_continuation_token = if end < entries.len() {
            Some(entries[end - 1].0.clone())
        } else {
            None
        };

        let mut page = ListObjectsPage {
            next_continuation_token,
            ..Default::default()
        };
        for (_, entry) in entries.drain(start..end) {
            match entry {
                Listed::Item(summary) => page.objects.push(summary),
                Listed::Prefix(common) => page.common_prefixes.push(common),
            }
        }
        Ok(page)
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        request: &ListVersionsRequest,
    ) -> Result<ListVersionsPage, Error> {
        let state = self.state.read().await;
        let bucket = state.bucket(bucket)?;
        let prefix = request.prefix.as_str();
        let delimiter = request.delimiter.as_deref();

        let mut seen_prefixes = BTreeSet::new();
        // (key, version id) -> entry
        let mut entries: Vec<((String, String), Listed<VersionEntry>)> = Vec::new();
        for (key, versions) in bucket.objects.range(prefix.to_owned()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(common) = common_prefix(prefix, delimiter, key) {
                if seen_prefixes.insert(common.clone()) {
                    entries.push(((common.clone(), String::new()), Listed::Prefix(common)));
                }
                continue;
            }
            for (idx, version) in versions.iter().enumerate() {
                entries.push((
                    (key.clone(), version.version_id.clone()),
                    Listed::Item(VersionEntry {
                        key: key.clone(),
                        version_id: version.version_id.clone(),
                        is_latest: idx == 0,
                        is_delete_marker: version.data.is_none(),
                        last_modified: Some(version.last_modified),
                    }),
                ));
            }
        }

        let start = match &request.key_marker {
            Some(key_marker) => {
                let version_marker = request.version_id_marker.clone().unwrap_or_default();
                entries
                    .iter()
                    .position(|((k, v), _)| k == key_marker && *v == version_marker)
                    .map(|idx| idx + 1)
                    .unwrap_or_else(|| entries.partition_point(|((k, _), _)| k <= key_marker))
            }
            None => 0,
        };
        let end = (start + self.page_size).min(entries.len());
        let (next_key_marker, next_version_id_marker) = if end < entries.len() {
            let ((key, version_id), _) = &entries[end - 1];
            (Some(key.clone()), Some(version_id.clone()))
        } else {
            (None, None)
        };

        let mut page = ListVersionsPage {
            next_key_marker,
            next_version_id_marker,
            ..Default::default()
        };
        for (_, entry) in entries.drain(start..end) {
            match entry {
                Listed::Item(version) => page.versions.push(version),
                Listed::Prefix(common) => page.common_prefixes.push(common),
            }
        }
        Ok(page)
    }

    async fn put_bucket_versioning(&self, bucket: &str, enabled: bool) -> Result<(), Error> {
        let mut state = self.state.write().await;
        state.bucket_mut(bucket)?.versioned = enabled;
        Ok(())
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, Error> {
        let state = self.state.read().await;
        state.bucket(bucket)?.current(key)?;
        Ok(format!(
            "memory://{bucket}/{key}?X-Amz-Expires={}",
            expires_in.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::MultipartEtag;
    use crate::error::ErrorKind;

    const BUCKET: &str = "test-bucket";

    async fn store(versioned: bool) -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new().with_page_size(2);
        store.create_bucket(BUCKET, versioned).await;
        store
    }

    fn put(key: &str, body: &'static str) -> PutObjectRequest {
        PutObjectRequest {
            key: key.to_owned(),
            body: body.into(),
            content_length: Some(body.len() as u64),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_and_get_object() {
        let store = store(false).await;
        let e_tag = store.put_object(BUCKET, put("joe.txt", "joe\n")).await.unwrap();
        assert_eq!(Some(quoted_md5(b"joe\n")), e_tag);

        let output = store.get_object(BUCKET, "joe.txt").await.unwrap();
        assert_eq!(4, output.head.size);
        assert_eq!(Bytes::from_static(b"joe\n"), output.body.collect().await.unwrap());

        let range = store.get_object_range(BUCKET, "joe.txt", 1..3).await.unwrap();
        assert_eq!(Bytes::from_static(b"oe"), range);
    }

    #[tokio::test]
    async fn test_missing_objects_and_buckets() {
        let store = store(false).await;
        let err = store.head_object(BUCKET, "nope").await.unwrap_err();
        assert_eq!(&ErrorKind::NotFound, err.kind());
        let err = store.head_object("other", "nope").await.unwrap_err();
        assert_eq!(&ErrorKind::NotFound, err.kind());
    }

    #[tokio::test]
    async fn test_content_md5_is_validated() {
        let store = store(false).await;
        let mut request = put("joe.txt", "joe\n");
        request.content_md5 = Some(checksum::base64_md5(b"pete\n"));
        let err = store.put_object(BUCKET, request).await.unwrap_err();
        assert_eq!(&ErrorKind::IntegrityMismatch, err.kind());

        let mut request = put("joe.txt", "joe\n");
        request.content_md5 = Some("%%%".to_owned());
        let err = store.put_object(BUCKET, request).await.unwrap_err();
        assert_eq!(&ErrorKind::IntegrityMismatch, err.kind());

        assert!(store.head_object(BUCKET, "joe.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_multipart_etag_matches_emulator() {
        let store = store(false).await;
        let upload = store
            .create_multipart_upload(BUCKET, "big", HashMap::new())
            .await
            .unwrap();
        let mut parts = Vec::new();
        let chunks: [&'static [u8]; 3] = [b"abcde", b"fghij", b"klm"];
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let part_number = idx as i32 + 1;
            let e_tag = store
                .upload_part(BUCKET, &upload, part_number, Bytes::from_static(chunk))
                .await
                .unwrap();
            parts.push(CompletedPart { part_number, e_tag });
        }
        let e_tag = store
            .complete_multipart_upload(BUCKET, &upload, parts)
            .await
            .unwrap();

        let mut emulator = MultipartEtag::new(5);
        emulator.update(b"abcdefghijklm");
        assert_eq!(Some(emulator.etag()), e_tag);
        let output = store.get_object(BUCKET, "big").await.unwrap();
        assert_eq!(
            Bytes::from_static(b"abcdefghijklm"),
            output.body.collect().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_list_objects_paginates_with_delimiter() {
        let store = store(false).await;
        for key in ["a/1", "a/2", "b", "c", "d/1"] {
            store.put_object(BUCKET, put(key, "x")).await.unwrap();
        }

        let mut request = ListObjectsRequest {
            delimiter: Some("/".to_owned()),
            ..Default::default()
        };
        let mut keys = Vec::new();
        let mut prefixes = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.list_objects(BUCKET, &request).await.unwrap();
            pages += 1;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            prefixes.extend(page.common_prefixes);
            match page.next_continuation_token {
                Some(token) => request.continuation_token = Some(token),
                None => break,
            }
        }
        assert_eq!(2, pages);
        assert_eq!(vec!["b", "c"], keys);
        assert_eq!(vec!["a/", "d/"], prefixes);
    }

    #[tokio::test]
    async fn test_versioned_delete_leaves_marker() {
        let store = store(true).await;
        store.put_object(BUCKET, put("joe.txt", "v1")).await.unwrap();
        store.put_object(BUCKET, put("joe.txt", "v2")).await.unwrap();
        store.delete_object(BUCKET, "joe.txt", None).await.unwrap();

        assert!(store.head_object(BUCKET, "joe.txt").await.is_err());
        let page = store
            .list_object_versions(BUCKET, &ListVersionsRequest::default())
            .await
            .unwrap();
        // page size of two
        assert_eq!(2, page.versions.len());
        assert!(page.versions[0].is_latest);
        assert!(page.versions[0].is_delete_marker);
        assert!(!page.versions[1].is_delete_marker);
        assert!(page.next_key_marker.is_some());

        let marker = page.versions[0].version_id.clone();
        store
            .delete_object(BUCKET, "joe.txt", Some(&marker))
            .await
            .unwrap();
        let output = store.get_object(BUCKET, "joe.txt").await.unwrap();
        assert_eq!(Bytes::from_static(b"v2"), output.body.collect().await.unwrap());

        let err = store
            .delete_object(BUCKET, "joe.txt", Some("missing"))
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::NotFound, err.kind());
        assert_eq!(2, store.version_count(BUCKET).await);
    }
}
