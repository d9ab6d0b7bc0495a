/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod file;
/// Seekable reads over ranged fetches
pub mod range_reader;
mod stream;

// re-exports
pub use self::file::ContentFile;
pub use self::range_reader::{RangeReader, RangeSource};
pub use self::stream::ContentStream;
