/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! [`ObjectStore`] for the AWS SDK client.
//!
//! The inherent fluent builders of [`aws_sdk_s3::Client`] share names with the trait methods
//! implemented here; inside this module `self.<op>()` always refers to the builder.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::ops::Range;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{
    BucketVersioningStatus, CompletedMultipartUpload, Delete, MetadataDirective,
    VersioningConfiguration,
};
use bytes::Bytes;
use tracing::Instrument;

use super::{
    CompletedPart, CopySource, DeleteFailure, GetObjectOutput, ListObjectsPage,
    ListObjectsRequest, ListVersionsPage, ListVersionsRequest, MultipartUpload, ObjectHead,
    ObjectIdentifier, ObjectStore, ObjectSummary, PutObjectRequest, VersionEntry,
};
use crate::error::{self, Error, ErrorKind};
use crate::io::ContentStream;

fn system_time(value: Option<&DateTime>) -> Option<SystemTime> {
    value.and_then(|dt| SystemTime::try_from(*dt).ok())
}

fn byte_range(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end.saturating_sub(1))
}

/// Percent-encode a copy source, leaving `/` intact.
fn encode_copy_source(source: &CopySource) -> String {
    let mut encoded = String::with_capacity(source.bucket.len() + source.key.len() + 1);
    for byte in source.header_value().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

fn non_empty(metadata: HashMap<String, String>) -> Option<HashMap<String, String>> {
    (!metadata.is_empty()).then_some(metadata)
}

#[async_trait]
impl ObjectStore for aws_sdk_s3::Client {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead, Error> {
        let output = self.head_object().bucket(bucket).key(key).send().await?;
        Ok(ObjectHead {
            size: output.content_length().unwrap_or_default().max(0) as u64,
            e_tag: output.e_tag().map(str::to_owned),
            last_modified: system_time(output.last_modified()),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<GetObjectOutput, Error> {
        let output = self.get_object().bucket(bucket).key(key).send().await?;
        let head = ObjectHead {
            size: output.content_length().unwrap_or_default().max(0) as u64,
            e_tag: output.e_tag().map(str::to_owned),
            last_modified: system_time(output.last_modified()),
            metadata: output.metadata().cloned().unwrap_or_default(),
        };
        let body = ContentStream::from_reader(output.body.into_async_read(), Some(head.size));
        Ok(GetObjectOutput { head, body })
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: Range<u64>,
    ) -> Result<Bytes, Error> {
        let output = self
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(byte_range(&range))
            .send()
            .instrument(tracing::trace_span!("get-object-range", start = range.start))
            .await?;
        Ok(output.body.collect().await?.into_bytes())
    }

    async fn put_object(
        &self,
        bucket: &str,
        request: PutObjectRequest,
    ) -> Result<Option<String>, Error> {
        let tmp_dir = crate::tmp_dir::tmp_dir();
        // `_spool` backs the body and must live until the request completes
        let (body, _spool) = request.body.into_byte_stream(&tmp_dir).await?;
        let output = self
            .put_object()
            .bucket(bucket)
            .key(request.key)
            .body(body)
            .set_content_length(request.content_length.map(|len| len as i64))
            .set_content_md5(request.content_md5)
            .set_metadata(non_empty(request.metadata))
            .send()
            .await?;
        Ok(output.e_tag().map(str::to_owned))
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(), Error> {
        self.delete_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_owned))
            .send()
            .await?;
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
    ) -> Result<Vec<DeleteFailure>, Error> {
        let identifiers = objects
            .into_iter()
            .map(|object| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(object.key)
                    .set_version_id(object.version_id)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()?;
        let output = self
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await?;
        Ok(output
            .errors()
            .iter()
            .map(|err| DeleteFailure {
                key: err.key().unwrap_or_default().to_owned(),
                version_id: err.version_id().map(str::to_owned),
                code: err.code().map(str::to_owned),
                message: err.message().map(str::to_owned),
            })
            .collect())
    }

    async fn copy_object(
        &self,
        bucket: &str,
        key: &str,
        source: &CopySource,
        metadata: HashMap<String, String>,
    ) -> Result<(), Error> {
        self.copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(encode_copy_source(source))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(non_empty(metadata))
            .send()
            .await?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<MultipartUpload, Error> {
        let output = self
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(non_empty(metadata))
            .send()
            .await?;
        let upload_id = output.upload_id().ok_or_else(|| {
            Error::new(
                ErrorKind::BackendError,
                "CreateMultipartUpload returned no upload id",
            )
        })?;
        Ok(MultipartUpload {
            key: key.to_owned(),
            upload_id: upload_id.to_owned(),
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, Error> {
        let output = self
            .upload_part()
            .bucket(bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body))
            .send()
            .instrument(tracing::debug_span!("send-upload-part", part_number))
            .await?;
        Ok(output.e_tag().unwrap_or_default().to_owned())
    }

    async fn upload_part_copy(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        part_number: i32,
        source: &CopySource,
        range: Range<u64>,
    ) -> Result<String, Error> {
        let output = self
            .upload_part_copy()
            .bucket(bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .copy_source(encode_copy_source(source))
            .copy_source_range(byte_range(&range))
            .send()
            .instrument(tracing::debug_span!("send-upload-part-copy", part_number))
            .await?;
        Ok(output
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .unwrap_or_default()
            .to_owned())
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> Result<Option<String>, Error> {
        let parts = parts
            .into_iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.e_tag)
                    .build()
            })
            .collect();
        let output = self
            .complete_multipart_upload()
            .bucket(bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await?;
        Ok(output.e_tag().map(str::to_owned))
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        upload: &MultipartUpload,
    ) -> Result<(), Error> {
        self.abort_multipart_upload()
            .bucket(bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .send()
            .await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        request: &ListObjectsRequest,
    ) -> Result<ListObjectsPage, Error> {
        let output = self
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix((!request.prefix.is_empty()).then(|| request.prefix.clone()))
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.continuation_token.clone())
            .set_max_keys(request.max_keys)
            .send()
            .instrument(tracing::debug_span!("send-list-objects-v2"))
            .await?;
        let is_truncated = output.is_truncated().unwrap_or(false);
        Ok(ListObjectsPage {
            objects: output
                .contents()
                .iter()
                .filter_map(|object| {
                    Some(ObjectSummary {
                        key: object.key()?.to_owned(),
                        size: object.size().unwrap_or_default().max(0) as u64,
                        e_tag: object.e_tag().map(str::to_owned),
                        last_modified: system_time(object.last_modified()),
                    })
                })
                .collect(),
            common_prefixes: output
                .common_prefixes()
                .iter()
                .filter_map(|prefix| prefix.prefix().map(str::to_owned))
                .collect(),
            next_continuation_token: output
                .next_continuation_token()
                .filter(|_| is_truncated)
                .map(str::to_owned),
        })
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        request: &ListVersionsRequest,
    ) -> Result<ListVersionsPage, Error> {
        let output = self
            .list_object_versions()
            .bucket(bucket)
            .set_prefix((!request.prefix.is_empty()).then(|| request.prefix.clone()))
            .set_delimiter(request.delimiter.clone())
            .set_key_marker(request.key_marker.clone())
            .set_version_id_marker(request.version_id_marker.clone())
            .send()
            .instrument(tracing::debug_span!("send-list-object-versions"))
            .await?;

        let versions = output.versions().iter().filter_map(|version| {
            Some(VersionEntry {
                key: version.key()?.to_owned(),
                version_id: version.version_id().unwrap_or("null").to_owned(),
                is_latest: version.is_latest().unwrap_or(false),
                is_delete_marker: false,
                last_modified: system_time(version.last_modified()),
            })
        });
        let markers = output.delete_markers().iter().filter_map(|marker| {
            Some(VersionEntry {
                key: marker.key()?.to_owned(),
                version_id: marker.version_id().unwrap_or("null").to_owned(),
                is_latest: marker.is_latest().unwrap_or(false),
                is_delete_marker: true,
                last_modified: system_time(marker.last_modified()),
            })
        });
        // versions and delete markers arrive in separate lists; restore per-key newest-first order
        let mut entries: Vec<VersionEntry> = versions.chain(markers).collect();
        entries.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| b.is_latest.cmp(&a.is_latest))
                .then_with(|| Reverse(a.last_modified).cmp(&Reverse(b.last_modified)))
        });

        let is_truncated = output.is_truncated().unwrap_or(false);
        Ok(ListVersionsPage {
            versions: entries,
            common_prefixes: output
                .common_prefixes()
                .iter()
                .filter_map(|prefix| prefix.prefix().map(str::to_owned))
                .collect(),
            next_key_marker: output
                .next_key_marker()
                .filter(|_| is_truncated)
                .map(str::to_owned),
            next_version_id_marker: output
                .next_version_id_marker()
                .filter(|_| is_truncated)
                .map(str::to_owned),
        })
    }

    async fn put_bucket_versioning(&self, bucket: &str, enabled: bool) -> Result<(), Error> {
        let status = if enabled {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };
        self.put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await?;
        Ok(())
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, Error> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(error::from_kind(ErrorKind::InvalidConfiguration))?;
        let request = self
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await?;
        Ok(request.uri().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::head_object::HeadObjectOutput;
    use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
    use aws_sdk_s3::operation::put_object::PutObjectOutput;
    use aws_sdk_s3::types::{CommonPrefix, Object};
    use aws_smithy_mocks_experimental::{mock, mock_client, RuleMode};
    use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
    use aws_smithy_runtime_api::client::orchestrator::HttpRequest;
    use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
    use aws_smithy_runtime_api::http::StatusCode;

    #[tokio::test]
    async fn test_head_object() {
        let head = mock!(aws_sdk_s3::Client::head_object)
            .match_requests(|r| r.bucket() == Some("test-bucket") && r.key() == Some("joe.txt"))
            .then_output(|| {
                HeadObjectOutput::builder()
                    .content_length(4)
                    .e_tag("\"etag\"")
                    .metadata("md5chksum", "yE9w0br5ZCB9dRm/IWAsJA==")
                    .last_modified(DateTime::from_secs(1_500_000_000))
                    .build()
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&head]);

        let head = ObjectStore::head_object(&client, "test-bucket", "joe.txt")
            .await
            .unwrap();
        assert_eq!(4, head.size);
        assert_eq!(Some("\"etag\""), head.e_tag.as_deref());
        assert_eq!("yE9w0br5ZCB9dRm/IWAsJA==", head.metadata["md5chksum"]);
        assert_eq!(
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000)),
            head.last_modified
        );
    }

    #[tokio::test]
    async fn test_head_object_not_found() {
        let head = mock!(aws_sdk_s3::Client::head_object)
            .match_requests(|r| r.key() == Some("missing"))
            .then_http_response(|| {
                HttpResponse::new(StatusCode::try_from(404).unwrap(), Bytes::new().into())
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&head], |c| {
            c.http_client(StaticReplayClient::new(vec![ReplayEvent::new(
                HttpRequest::empty(),
                HttpResponse::new(StatusCode::try_from(404).unwrap(), Bytes::new().into()),
            )]))
        });

        let err = ObjectStore::head_object(&client, "test-bucket", "missing")
            .await
            .unwrap_err();
        assert_eq!(&ErrorKind::NotFound, err.kind());
    }

    #[tokio::test]
    async fn test_put_object_sends_md5_and_metadata() {
        let put = mock!(aws_sdk_s3::Client::put_object)
            .match_requests(|r| {
                r.key() == Some("joe.txt")
                    && r.content_md5() == Some("yE9w0br5ZCB9dRm/IWAsJA==")
                    && r.metadata().and_then(|m| m.get("mtime")).map(String::as_str)
                        == Some("12")
            })
            .then_output(|| PutObjectOutput::builder().e_tag("\"etag\"").build());
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&put]);

        let request = PutObjectRequest {
            key: "joe.txt".to_owned(),
            body: "joe\n".into(),
            content_length: Some(4),
            content_md5: Some("yE9w0br5ZCB9dRm/IWAsJA==".to_owned()),
            metadata: HashMap::from([("mtime".to_owned(), "12".to_owned())]),
        };
        let e_tag = ObjectStore::put_object(&client, "test-bucket", request)
            .await
            .unwrap();
        assert_eq!(Some("\"etag\"".to_owned()), e_tag);
    }

    #[tokio::test]
    async fn test_list_objects_page() {
        let list = mock!(aws_sdk_s3::Client::list_objects_v2)
            .match_requests(|r| {
                r.prefix() == Some("child/")
                    && r.delimiter() == Some("/")
                    && r.continuation_token() == Some("token1")
            })
            .then_output(|| {
                ListObjectsV2Output::builder()
                    .is_truncated(true)
                    .next_continuation_token("token2")
                    .contents(Object::builder().key("child/fred.txt").size(5).build())
                    .common_prefixes(CommonPrefix::builder().prefix("child/grandchild-1/").build())
                    .build()
            });
        let client = mock_client!(aws_sdk_s3, RuleMode::Sequential, &[&list]);

        let request = ListObjectsRequest {
            prefix: "child/".to_owned(),
            delimiter: Some("/".to_owned()),
            continuation_token: Some("token1".to_owned()),
            max_keys: None,
        };
        let page = ObjectStore::list_objects(&client, "test-bucket", &request)
            .await
            .unwrap();
        assert_eq!(1, page.objects.len());
        assert_eq!("child/fred.txt", page.objects[0].key);
        assert_eq!(5, page.objects[0].size);
        assert_eq!(vec!["child/grandchild-1/".to_owned()], page.common_prefixes);
        assert_eq!(Some("token2"), page.next_continuation_token.as_deref());
    }

    #[test]
    fn test_encode_copy_source() {
        let source = CopySource {
            bucket: "bucket".to_owned(),
            key: "dir/a file+1.txt".to_owned(),
        };
        assert_eq!("bucket/dir/a%20file%2B1.txt", encode_copy_source(&source));
    }
}
