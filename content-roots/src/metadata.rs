/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Reserved user metadata field holding the base64 MD5 of the content.
pub const MD5_FIELD: &str = "md5chksum";

/// Reserved user metadata field holding the modification time as seconds since the epoch.
pub const MTIME_FIELD: &str = "mtime";

/// Metadata describing stored content.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    /// Content length in bytes
    pub size: u64,
    /// Base64 MD5 of the content, when the backend persists one
    pub md5_sum: Option<String>,
    /// Modification time
    pub mtime: Option<SystemTime>,
    /// Free-form fields stored alongside the content
    pub fields: BTreeMap<String, String>,
}

impl Metadata {
    /// Caller-writable part of this metadata.
    pub fn user_metadata(&self) -> UserMetadata {
        UserMetadata {
            mtime: self.mtime,
            fields: self.fields.clone(),
        }
    }
}

/// Metadata supplied when writing content.
///
/// Field names [`MD5_FIELD`] and [`MTIME_FIELD`] are reserved and are ignored if passed to
/// [`with_field`](UserMetadata::with_field).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserMetadata {
    mtime: Option<SystemTime>,
    fields: BTreeMap<String, String>,
}

impl UserMetadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the modification time to record with the content.
    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Set an optional modification time.
    pub fn set_mtime(mut self, mtime: Option<SystemTime>) -> Self {
        self.mtime = mtime;
        self
    }

    /// Add a free-form field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !is_reserved(&name) {
            self.fields.insert(name, value.into());
        }
        self
    }

    /// Modification time to record.
    pub fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    /// Free-form fields.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Overlay `other` on top of `self`: its mtime (if any) and fields win.
    pub fn merge(mut self, other: UserMetadata) -> Self {
        if other.mtime.is_some() {
            self.mtime = other.mtime;
        }
        self.fields.extend(other.fields);
        self
    }
}

pub(crate) fn is_reserved(name: &str) -> bool {
    name == MD5_FIELD || name == MTIME_FIELD
}

/// Format a timestamp as seconds since the epoch, keeping sub-second precision.
pub(crate) fn format_mtime(mtime: SystemTime) -> String {
    let since_epoch = mtime.duration_since(UNIX_EPOCH).unwrap_or_default();
    if since_epoch.subsec_nanos() == 0 {
        since_epoch.as_secs().to_string()
    } else {
        format!("{:.6}", since_epoch.as_secs_f64())
    }
}

/// Parse a seconds-since-epoch timestamp. Unparseable values are treated as absent.
pub(crate) fn parse_mtime(value: &str) -> Option<SystemTime> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_secs_f64(secs))
}

/// Encode checksum, mtime and fields as S3 user metadata headers.
pub(crate) fn to_headers(md5_sum: Option<&str>, metadata: &UserMetadata) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = metadata
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(md5_sum) = md5_sum {
        headers.insert(MD5_FIELD.to_owned(), md5_sum.to_owned());
    }
    if let Some(mtime) = metadata.mtime {
        headers.insert(MTIME_FIELD.to_owned(), format_mtime(mtime));
    }
    headers
}

/// Decode S3 user metadata headers into [`Metadata`].
pub(crate) fn from_headers(size: u64, headers: &HashMap<String, String>) -> Metadata {
    let mut metadata = Metadata {
        size,
        ..Default::default()
    };
    for (name, value) in headers {
        match name.as_str() {
            MD5_FIELD => metadata.md5_sum = Some(value.clone()),
            MTIME_FIELD => metadata.mtime = parse_mtime(value),
            _ => {
                metadata.fields.insert(name.clone(), value.clone());
            }
        }
    }
    metadata
}
