/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/* Automatically managed default lints */
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
/* End of automatically managed default lints */

//! Content roots
//!
//! A [`Root`](root::Root) is a location holding content addressed by hierarchical keys, such
//! as a directory on local disk ([`FilesystemRoot`](root::filesystem::FilesystemRoot)) or a
//! bucket and key prefix in an S3-compatible store ([`S3Root`](root::s3::S3Root)). Clients
//! read, write, copy, move and delete content through the trait without knowing which
//! backend holds it. Writes can be verified against an MD5 checksum, including streamed
//! multipart uploads to S3 whose ETag is checked against a local emulation.
//!
//! Roots are usually built from configuration with [`registry::create_root`] or collected
//! into a named [`registry::RootSet`].

#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

pub(crate) const MEBIBYTE: u64 = 1024 * 1024;

pub(crate) const GIBIBYTE: u64 = 1024 * MEBIBYTE;

/// Number of deletes kept in flight when deleting a tree.
pub const DEFAULT_DELETE_CONCURRENCY: usize = 10;

/// Error types emitted by `content-roots`
pub mod error;

/// Common types used by `content-roots`
pub mod types;

pub mod key;

/// Content metadata and its encoding
pub mod metadata;

pub mod checksum;

/// Types and helpers for I/O
pub mod io;

pub mod object_store;

pub mod root;

/// Root configuration
pub mod config;

/// Building roots from configuration
pub mod registry;

pub mod tmp_dir;

pub use error::{Error, ErrorKind};
pub use root::Root;
