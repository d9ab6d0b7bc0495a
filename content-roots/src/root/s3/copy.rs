/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;

use tracing::Instrument;

use super::S3Root;
use crate::error::{self, Error};
use crate::key;
use crate::metadata::{self, UserMetadata};
use crate::object_store::{CompletedPart, CopySource, MultipartUpload};

/// Server-side copy of `source_key` of `source` to `key` of `target`.
///
/// Both roots must live in the same store. The copy carries the source checksum, mtime and
/// fields with `metadata` layered on top.
pub(super) async fn copy_from(
    target: &S3Root,
    key: &str,
    source: &S3Root,
    source_key: &str,
    metadata: UserMetadata,
) -> Result<(), Error> {
    if key::is_directory_key(key) {
        return Err(error::invalid_key(&target.handle.name, key));
    }
    let head = source.head(source_key).await?;
    let source_metadata = metadata::from_headers(head.size, &head.metadata);
    let merged = source_metadata.user_metadata().merge(metadata);
    let headers = metadata::to_headers(source_metadata.md5_sum.as_deref(), &merged);
    let copy_source = CopySource {
        bucket: source.bucket().to_owned(),
        key: source.full_key(source_key),
    };
    let full_key = target.full_key(key);

    if head.size < target.handle.multipart_threshold {
        tracing::debug!(
            source = %copy_source.header_value(),
            key = %full_key,
            "server-side copy"
        );
        return target
            .handle
            .store
            .copy_object(&target.handle.bucket, &full_key, &copy_source, headers)
            .await;
    }

    let span = tracing::debug_span!(
        "multipart-copy",
        source = %copy_source.header_value(),
        key = %full_key,
        size = head.size
    );
    copy_multipart(target, &full_key, &copy_source, head.size, headers)
        .instrument(span)
        .await
}

async fn copy_multipart(
    target: &S3Root,
    full_key: &str,
    source: &CopySource,
    size: u64,
    headers: HashMap<String, String>,
) -> Result<(), Error> {
    let store = &target.handle.store;
    let bucket = &target.handle.bucket;
    let upload = store
        .create_multipart_upload(bucket, full_key, headers)
        .await?;

    let result = async {
        let parts = copy_parts(target, &upload, source, size).await?;
        store.complete_multipart_upload(bucket, &upload, parts).await
    }
    .await;

    if let Err(err) = result {
        if let Err(abort_err) = store.abort_multipart_upload(bucket, &upload).await {
            tracing::warn!(upload_id = %upload.upload_id, error = %abort_err, "failed to abort multipart copy");
        }
        return Err(err);
    }
    Ok(())
}

async fn copy_parts(
    target: &S3Root,
    upload: &MultipartUpload,
    source: &CopySource,
    size: u64,
) -> Result<Vec<CompletedPart>, Error> {
    let mut parts = Vec::new();
    for (index, range) in part_ranges(size, target.handle.copy_part_size).enumerate() {
        let part_number = index as i32 + 1;
        tracing::trace!(part_number, ?range, "copying part");
        let e_tag = target
            .handle
            .store
            .upload_part_copy(&target.handle.bucket, upload, part_number, source, range)
            .await?;
        parts.push(CompletedPart { part_number, e_tag });
    }
    Ok(parts)
}

/// Byte ranges of `size` bytes split into parts of `part_size`.
fn part_ranges(size: u64, part_size: u64) -> impl Iterator<Item = std::ops::Range<u64>> {
    (0..size.div_ceil(part_size))
        .map(move |index| index * part_size..((index + 1) * part_size).min(size))
}
