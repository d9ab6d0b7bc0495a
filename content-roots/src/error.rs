/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

use aws_sdk_s3::error::ProvideErrorMetadata;

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// NOTE: Use [`aws_smithy_types::error::display::DisplayErrorContext`] or similar to display
/// the entire error cause/source chain.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
}

/// General categories of content root errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The key is malformed, escapes the root, or names a directory where content was expected
    InvalidKey,

    /// A listing operation was given a key that is not a directory
    InvalidDirectory,

    /// No content or directory exists at the key
    NotFound,

    /// Stored or transferred content does not match its expected checksum
    IntegrityMismatch,

    /// The operation is not supported by this root (e.g. versioning on an unversioned root)
    UnsupportedOperation,

    /// A seek or range request falls outside the content
    OutOfRange,

    /// Any other failure reported by the storage backend
    BackendError,

    /// Root configuration is incomplete or contradictory
    InvalidConfiguration,

    /// Some kind of internal runtime issue (e.g. task failure)
    RuntimeError,
}

impl Error {
    /// Creates a new [`Error`] from a known kind of error as well as an arbitrary error
    /// source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: err.into(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Details of an [`ErrorKind::InvalidKey`] error, if this is one.
    pub fn invalid_key(&self) -> Option<&InvalidKey> {
        self.source.downcast_ref::<InvalidKey>()
    }

    /// Details of an [`ErrorKind::InvalidDirectory`] error, if this is one.
    pub fn invalid_directory(&self) -> Option<&InvalidDirectory> {
        self.source.downcast_ref::<InvalidDirectory>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::InvalidKey => write!(f, "invalid key"),
            ErrorKind::InvalidDirectory => write!(f, "not a directory"),
            ErrorKind::NotFound => write!(f, "resource not found"),
            ErrorKind::IntegrityMismatch => write!(f, "checksum mismatch"),
            ErrorKind::UnsupportedOperation => write!(f, "unsupported operation"),
            ErrorKind::OutOfRange => write!(f, "position out of range"),
            ErrorKind::BackendError => write!(f, "storage backend error"),
            ErrorKind::InvalidConfiguration => write!(f, "invalid configuration"),
            ErrorKind::RuntimeError => write!(f, "runtime error"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// A key that cannot be used with a particular root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidKey {
    root: String,
    key: String,
}

impl InvalidKey {
    /// Name of the root the key was used with.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The offending key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key `{}` is not valid for root `{}`", self.key, self.root)
    }
}

impl std::error::Error for InvalidKey {}

/// A key that was used as a directory but is not one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidDirectory {
    key: String,
}

impl InvalidDirectory {
    /// The key that was expected to be a directory.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for InvalidDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a directory", self.key)
    }
}

impl std::error::Error for InvalidDirectory {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        let kind = match value.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::BackendError,
        };
        Self::new(kind, value)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

impl From<aws_smithy_types::error::operation::BuildError> for Error {
    fn from(value: aws_smithy_types::error::operation::BuildError) -> Self {
        Self::new(ErrorKind::BackendError, value)
    }
}

impl From<aws_smithy_types::byte_stream::error::Error> for Error {
    fn from(value: aws_smithy_types::byte_stream::error::Error) -> Self {
        Self::new(ErrorKind::BackendError, value)
    }
}

impl<E, R> From<aws_sdk_s3::error::SdkError<E, R>> for Error
where
    E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static,
    R: Send + Sync + fmt::Debug + 'static,
{
    fn from(value: aws_sdk_s3::error::SdkError<E, R>) -> Self {
        let kind = kind_for_code(value.code());
        Error::new(kind, value)
    }
}

/// Map an S3 error code onto an [`ErrorKind`].
pub(crate) fn kind_for_code(code: Option<&str>) -> ErrorKind {
    match code {
        Some("NotFound" | "NoSuchKey" | "NoSuchBucket" | "NoSuchVersion" | "NoSuchUpload") => {
            ErrorKind::NotFound
        }
        Some("BadDigest" | "InvalidDigest") => ErrorKind::IntegrityMismatch,
        _ => ErrorKind::BackendError,
    }
}

pub(crate) fn invalid_key(root: impl Into<String>, key: impl Into<String>) -> Error {
    Error::new(
        ErrorKind::InvalidKey,
        InvalidKey {
            root: root.into(),
            key: key.into(),
        },
    )
}

pub(crate) fn invalid_directory(key: impl Into<String>) -> Error {
    Error::new(
        ErrorKind::InvalidDirectory,
        InvalidDirectory { key: key.into() },
    )
}

pub(crate) fn integrity_mismatch(expected: &str, actual: &str) -> Error {
    Error::new(
        ErrorKind::IntegrityMismatch,
        format!("expected checksum {expected}, got {actual}"),
    )
}

pub(crate) fn unsupported<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::UnsupportedOperation, err)
}

pub(crate) fn invalid_configuration<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::InvalidConfiguration, err)
}

pub(crate) fn from_kind<E>(kind: ErrorKind) -> impl FnOnce(E) -> Error
where
    E: Into<BoxError>,
{
    |err| Error::new(kind, err)
}
