/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::mem;

/// Computes the ETag S3 reports for an object uploaded in fixed size parts.
///
/// The ETag is the hex MD5 of the concatenated binary MD5 of each part, followed by `-` and
/// the number of parts, all wrapped in double quotes. Only the last part may be shorter than
/// `part_size`. Content can be fed in arbitrary slices; part boundaries are tracked here.
///
/// An emulator that never saw any bytes reports a single empty part, which is what S3 reports
/// after a multipart upload consisting of one zero length part.
pub struct MultipartEtag {
    part_size: u64,
    current: md5::Context,
    part_remaining: u64,
    digests: Vec<[u8; 16]>,
    total_bytes: u64,
}

impl MultipartEtag {
    /// New emulator for parts of `part_size` bytes.
    ///
    /// # Panics
    ///
    /// If `part_size` is zero.
    pub fn new(part_size: u64) -> Self {
        assert!(part_size > 0, "part size must be non-zero");
        Self {
            part_size,
            current: md5::Context::new(),
            part_remaining: part_size,
            digests: Vec::new(),
            total_bytes: 0,
        }
    }

    /// Feed the next slice of content.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = data
                .len()
                .min(usize::try_from(self.part_remaining).unwrap_or(usize::MAX));
            let (head, tail) = data.split_at(take);
            self.current.consume(head);
            self.part_remaining -= take as u64;
            self.total_bytes += take as u64;
            data = tail;

            if self.part_remaining == 0 {
                let finished = mem::replace(&mut self.current, md5::Context::new());
                self.digests.push(finished.compute().0);
                self.part_remaining = self.part_size;
            }
        }
    }

    /// Total bytes fed so far.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of parts the content fed so far spans.
    pub fn part_count(&self) -> usize {
        self.digests.len() + usize::from(self.has_open_part())
    }

    /// The quoted `"<hex>-<parts>"` ETag for the content fed so far.
    pub fn etag(&self) -> String {
        let mut combined = md5::Context::new();
        for digest in &self.digests {
            combined.consume(digest);
        }
        if self.has_open_part() {
            combined.consume(self.current.clone().compute().0);
        }
        format!("\"{:x}-{}\"", combined.compute(), self.part_count())
    }

    // a partially filled part, or the single empty part of empty content
    fn has_open_part(&self) -> bool {
        self.part_remaining < self.part_size || self.digests.is_empty()
    }
}

impl fmt::Debug for MultipartEtag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartEtag")
            .field("part_size", &self.part_size)
            .field("parts", &self.part_count())
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}
