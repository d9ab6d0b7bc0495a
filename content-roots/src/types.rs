/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::SystemTime;

use serde::Deserialize;

/// The storage backend a root is bound to.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RootType {
    /// A directory on the local filesystem
    #[default]
    Filesystem,
    /// A bucket (and optional key prefix) in an S3-compatible store
    S3,
}

/// One version (or delete marker) of an object in a versioned bucket.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Version {
    /// Key of the version, relative to the root
    pub key: String,
    /// Backend assigned version id
    pub version_id: String,
    /// True for the newest entry of the key
    pub is_latest: bool,
    /// True if this entry is a delete marker rather than content
    pub is_delete_marker: bool,
    /// When the version was created
    pub last_modified: Option<SystemTime>,
}

/// Which versions of an object to return.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ObjectVersionsFilter {
    /// Every version
    #[default]
    All,
    /// Only versions that are not the latest
    Old,
    /// Only the latest version
    Latest,
}

impl ObjectVersionsFilter {
    pub(crate) fn matches(&self, version: &Version) -> bool {
        match self {
            ObjectVersionsFilter::All => true,
            ObjectVersionsFilter::Old => !version.is_latest,
            ObjectVersionsFilter::Latest => version.is_latest,
        }
    }
}

/// How delete markers are treated when listing versions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeleteMarkerFilter {
    /// Return delete markers alongside content versions
    #[default]
    Include,
    /// Drop delete markers
    Exclude,
    /// Return only delete markers
    Only,
}

impl DeleteMarkerFilter {
    pub(crate) fn matches(&self, version: &Version) -> bool {
        match self {
            DeleteMarkerFilter::Include => true,
            DeleteMarkerFilter::Exclude => !version.is_delete_marker,
            DeleteMarkerFilter::Only => version.is_delete_marker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(is_latest: bool, is_delete_marker: bool) -> Version {
        Version {
            key: "joe.txt".to_owned(),
            version_id: "v".to_owned(),
            is_latest,
            is_delete_marker,
            last_modified: None,
        }
    }

    #[test]
    fn test_filters() {
        let latest_marker = version(true, true);
        let old_content = version(false, false);

        assert!(ObjectVersionsFilter::All.matches(&latest_marker));
        assert!(ObjectVersionsFilter::Latest.matches(&latest_marker));
        assert!(!ObjectVersionsFilter::Old.matches(&latest_marker));
        assert!(ObjectVersionsFilter::Old.matches(&old_content));

        assert!(DeleteMarkerFilter::Only.matches(&latest_marker));
        assert!(!DeleteMarkerFilter::Exclude.matches(&latest_marker));
        assert!(DeleteMarkerFilter::Exclude.matches(&old_content));
        assert!(DeleteMarkerFilter::Include.matches(&old_content));
    }
}
