/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RootConfig;
use crate::error::{self, Error};
use crate::root::filesystem::FilesystemRoot;
use crate::root::s3::S3Root;
use crate::root::Root;
use crate::types::RootType;

/// Build the root described by `config`.
pub async fn create_root(config: &RootConfig) -> Result<Arc<dyn Root>, Error> {
    match config.root_type {
        RootType::Filesystem => {
            let path = config.path.as_ref().ok_or_else(|| {
                error::invalid_configuration(format!("filesystem root {} needs a path", config.name))
            })?;
            Ok(Arc::new(FilesystemRoot::new(&config.name, path).await?))
        }
        RootType::S3 => {
            let bucket = config.bucket.as_ref().ok_or_else(|| {
                error::invalid_configuration(format!("s3 root {} needs a bucket", config.name))
            })?;
            let mut builder = S3Root::builder()
                .name(&config.name)
                .bucket(bucket)
                .versioned(config.versioned)
                .client(config.s3_client().await);
            if let Some(prefix) = &config.prefix {
                builder = builder.prefix(prefix);
            }
            if let Some(targets) = &config.copy_targets {
                builder = builder.copy_targets(targets);
            }
            Ok(Arc::new(builder.build()?))
        }
    }
}

/// Named roots built from a list of configurations.
#[derive(Clone, Debug, Default)]
pub struct RootSet {
    roots: HashMap<String, Arc<dyn Root>>,
}

impl RootSet {
    /// Build every configured root. Fails on the first root that cannot be built, or if two
    /// roots share a name.
    pub async fn new(configs: impl IntoIterator<Item = RootConfig>) -> Result<Self, Error> {
        let mut set = Self::default();
        for config in configs {
            let root = create_root(&config).await?;
            set.insert(root)?;
        }
        Ok(set)
    }

    /// Add an already built root.
    pub fn insert(&mut self, root: Arc<dyn Root>) -> Result<(), Error> {
        let name = root.name().to_owned();
        if self.roots.contains_key(&name) {
            return Err(error::invalid_configuration(format!(
                "duplicate root name {name}"
            )));
        }
        tracing::debug!(name = %name, root_type = ?root.root_type(), "registered root");
        self.roots.insert(name, root);
        Ok(())
    }

    /// The root named `name`.
    pub fn at(&self, name: &str) -> Option<&Arc<dyn Root>> {
        self.roots.get(name)
    }

    /// Names of all roots, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// True if there are no roots.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn test_root_set() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let set = RootSet::new([
            RootConfig::filesystem("first", first.path()),
            RootConfig::filesystem("second", second.path()),
        ])
        .await
        .unwrap();
        assert_eq!(2, set.len());
        let root = set.at("second").unwrap();
        assert_eq!("second", root.name());
        assert_eq!(RootType::Filesystem, root.root_type());
        assert!(set.at("third").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = RootSet::new([
            RootConfig::filesystem("same", dir.path()),
            RootConfig::filesystem("same", dir.path()),
        ])
        .await
        .unwrap_err();
        assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());
    }

    #[tokio::test]
    async fn test_missing_required_fields() {
        let config = RootConfig {
            name: "nowhere".to_owned(),
            ..Default::default()
        };
        let err = create_root(&config).await.unwrap_err();
        assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());

        let config = RootConfig {
            name: "nobucket".to_owned(),
            root_type: RootType::S3,
            ..Default::default()
        };
        let err = create_root(&config).await.unwrap_err();
        assert_eq!(&ErrorKind::InvalidConfiguration, err.kind());
    }

    #[tokio::test]
    async fn test_create_s3_root() {
        let mut config = RootConfig::s3("main", "content");
        config.region = Some("us-east-1".to_owned());
        config.aws_access_key_id = Some("id".to_owned());
        config.aws_secret_access_key = Some("secret".to_owned());
        config.prefix = Some("my/prefix".to_owned());
        let root = create_root(&config).await.unwrap();
        assert_eq!(RootType::S3, root.root_type());
        let s3 = root.as_any().downcast_ref::<S3Root>().unwrap();
        assert_eq!("content", s3.bucket());
        assert_eq!("my/prefix/", s3.prefix());
    }
}
