/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::PathBuf;

use aws_sdk_s3::config::{Credentials, Region};
use serde::Deserialize;

use crate::types::RootType;

/// Configuration of a single root, as read from a configuration file.
///
/// `type` selects the backend and defaults to `filesystem`. Filesystem roots need a
/// `path`; S3 roots need a `bucket` and take the remaining fields. Credentials, region and
/// endpoint fall back to the usual AWS environment when absent.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    /// Name of the root
    pub name: String,
    /// Backend
    #[serde(rename = "type", default)]
    pub root_type: RootType,
    /// Directory of a filesystem root
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Bucket of an S3 root
    #[serde(default)]
    pub bucket: Option<String>,
    /// AWS region
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint of an S3-compatible store
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Key prefix of an S3 root
    #[serde(default)]
    pub prefix: Option<String>,
    /// Static access key id
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    /// Static secret access key
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
    /// Address buckets by path rather than by virtual host
    #[serde(default)]
    pub force_path_style: bool,
    /// Whether the bucket is versioned
    #[serde(default)]
    pub versioned: bool,
    /// Roots an S3 root may copy to server-side; itself when absent
    #[serde(default)]
    pub copy_targets: Option<Vec<String>>,
}

impl RootConfig {
    /// Configuration of a filesystem root over `path`.
    pub fn filesystem(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_type: RootType::Filesystem,
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Configuration of an S3 root over `bucket`.
    pub fn s3(name: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_type: RootType::S3,
            bucket: Some(bucket.into()),
            ..Default::default()
        }
    }

    /// Build an S3 client from this configuration.
    pub async fn s3_client(&self) -> aws_sdk_s3::Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&self.aws_access_key_id, &self.aws_secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "content-roots",
            ));
        }
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;

        let config = aws_sdk_s3::config::Builder::from(&shared_config)
            .force_path_style(self.force_path_style)
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_defaults_to_filesystem() {
        let config: RootConfig =
            serde_json::from_str(r#"{"name": "local", "path": "/tmp/content"}"#).unwrap();
        assert_eq!(RootConfig::filesystem("local", "/tmp/content"), config);
    }

    #[test]
    fn test_s3_config() {
        let config: RootConfig = serde_json::from_str(
            r#"{
                "name": "main",
                "type": "s3",
                "bucket": "content",
                "region": "us-east-2",
                "endpoint": "http://localhost:9000",
                "prefix": "my/prefix/",
                "aws_access_key_id": "id",
                "aws_secret_access_key": "secret",
                "force_path_style": true,
                "versioned": true,
                "copy_targets": ["main", "backup"]
            }"#,
        )
        .unwrap();
        assert_eq!(RootType::S3, config.root_type);
        assert_eq!(Some("content"), config.bucket.as_deref());
        assert_eq!(Some("my/prefix/"), config.prefix.as_deref());
        assert!(config.force_path_style);
        assert!(config.versioned);
        assert_eq!(
            Some(vec!["main".to_owned(), "backup".to_owned()]),
            config.copy_targets
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result =
            serde_json::from_str::<RootConfig>(r#"{"name": "x", "type": "tape", "path": "/"}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_s3_client_uses_configured_region() {
        let mut config = RootConfig::s3("main", "content");
        config.region = Some("eu-west-1".to_owned());
        config.aws_access_key_id = Some("id".to_owned());
        config.aws_secret_access_key = Some("secret".to_owned());
        let client = config.s3_client().await;
        assert_eq!(
            Some("eu-west-1"),
            client.config().region().map(|region| region.as_ref())
        );
    }
}
