/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Operations on the object versions of a versioned bucket.

use std::sync::atomic::Ordering;

use super::S3Root;
use crate::error::{self, Error};
use crate::key;
use crate::object_store::{ListVersionsRequest, ObjectIdentifier, VersionEntry, MAX_DELETE_BATCH};
use crate::types::{DeleteMarkerFilter, ObjectVersionsFilter, Version};

impl S3Root {
    /// Fails with [`ErrorKind::UnsupportedOperation`](crate::ErrorKind::UnsupportedOperation)
    /// unless the root is versioned.
    pub fn check_versioning(&self) -> Result<(), Error> {
        if self.is_versioned() {
            Ok(())
        } else {
            Err(error::unsupported(format!(
                "root {} is not versioned",
                self.handle.name
            )))
        }
    }

    /// Enable or suspend versioning on the bucket and mark the root accordingly.
    pub async fn set_versioned(&self, enabled: bool) -> Result<(), Error> {
        self.handle
            .store
            .put_bucket_versioning(&self.handle.bucket, enabled)
            .await?;
        self.handle.versioned.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Versions and delete markers of exactly `key`, newest first.
    pub async fn versions(
        &self,
        key: &str,
        versions: ObjectVersionsFilter,
        delete_markers: DeleteMarkerFilter,
    ) -> Result<Vec<Version>, Error> {
        self.check_versioning()?;
        let full_key = self.full_key(key);
        let entries = self.list_versions(full_key.clone(), None).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.key == full_key)
            .filter_map(|entry| self.to_version(entry))
            .filter(|version| versions.matches(version) && delete_markers.matches(version))
            .collect())
    }

    /// Every version and delete marker whose key starts with `prefix`.
    ///
    /// `prefix` is used as given, not as a directory. With a `delimiter`, keys containing it
    /// past the prefix are rolled up by the store and not returned.
    pub async fn delimited_prefix_versions(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Vec<Version>, Error> {
        self.check_versioning()?;
        let entries = self
            .list_versions(self.full_key(prefix), delimiter.map(str::to_owned))
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| self.to_version(entry))
            .collect())
    }

    /// Permanently delete every version and delete marker below the directory `prefix`.
    pub async fn delete_tree_versions(&self, prefix: &str) -> Result<(), Error> {
        self.check_versioning()?;
        let full_prefix = self.full_key(&key::ensure_directory_key(prefix));
        let entries = self.list_versions(full_prefix, None).await?;
        tracing::debug!(root = %self.handle.name, prefix, count = entries.len(), "deleting versions");
        self.delete_entries(entries).await
    }

    /// Permanently delete one version (or delete marker) of `key`.
    pub async fn delete_version(&self, key: &str, version_id: &str) -> Result<(), Error> {
        self.check_versioning()?;
        self.handle
            .store
            .delete_object(&self.handle.bucket, &self.full_key(key), Some(version_id))
            .await
    }

    /// Restore deleted content below the directory `prefix`.
    ///
    /// Removes every delete marker that is the latest entry of its key, which makes the
    /// previous version current again. Keys that were not deleted are untouched.
    pub async fn undelete_tree(&self, prefix: &str) -> Result<(), Error> {
        self.check_versioning()?;
        let full_prefix = self.full_key(&key::ensure_directory_key(prefix));
        let markers: Vec<_> = self
            .list_versions(full_prefix, None)
            .await?
            .into_iter()
            .filter(|entry| entry.is_latest && entry.is_delete_marker)
            .collect();
        tracing::debug!(root = %self.handle.name, prefix, count = markers.len(), "removing delete markers");
        self.delete_entries(markers).await
    }

    /// All pages of a version listing below the store key `prefix`.
    async fn list_versions(
        &self,
        prefix: String,
        delimiter: Option<String>,
    ) -> Result<Vec<VersionEntry>, Error> {
        let mut request = ListVersionsRequest {
            prefix,
            delimiter,
            ..Default::default()
        };
        let mut entries = Vec::new();
        loop {
            let page = self
                .handle
                .store
                .list_object_versions(&self.handle.bucket, &request)
                .await?;
            entries.extend(page.versions);
            if page.next_key_marker.is_none() && page.next_version_id_marker.is_none() {
                break;
            }
            request.key_marker = page.next_key_marker;
            request.version_id_marker = page.next_version_id_marker;
        }
        Ok(entries)
    }

    async fn delete_entries(&self, entries: Vec<VersionEntry>) -> Result<(), Error> {
        for batch in entries.chunks(MAX_DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|entry| ObjectIdentifier {
                    key: entry.key.clone(),
                    version_id: Some(entry.version_id.clone()),
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
                        "failed to delete version {} of {}: {}",
                        failure.version_id.unwrap_or_default(),
                        failure.key,
                        failure.message.unwrap_or_default()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn to_version(&self, entry: VersionEntry) -> Option<Version> {
        let key = self.root_key(&entry.key)?.to_owned();
        Some(Version {
            key,
            version_id: entry.version_id,
            is_latest: entry.is_latest,
            is_delete_marker: entry.is_delete_marker,
            last_modified: entry.last_modified,
        })
    }
}
