/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fs;
use std::sync::Once;

use bytes::Bytes;
use tempfile::TempDir;

/// Content of the fixture tree, as `(key, content)` pairs in key order.
pub const FIXTURE_FILES: &[(&str, &str)] = &[
    ("child/fred.txt", "fred\n"),
    ("child/grandchild-1/dave.txt", "dave\n"),
    ("child/grandchild-1/jim.txt", "jim\n"),
    ("child/grandchild-2/mel.txt", "mel\n"),
    ("joe.txt", "joe\n"),
    ("pete.txt", "pete\n"),
];

/// Create a temporary directory holding [`FIXTURE_FILES`].
pub fn create_fixture_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (key, content) in FIXTURE_FILES {
        let path = dir.path().join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

/// Fixture keys below `prefix`, which must be empty or end in `/`.
pub fn fixture_keys_below(prefix: &str) -> Vec<String> {
    FIXTURE_FILES
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, _)| key.to_string())
        .collect()
}

/// `len` bytes of random content, the same for the same `len`.
pub fn random_bytes(len: usize) -> Bytes {
    let mut rng = fastrand::Rng::with_seed(len as u64);
    let mut data = vec![0; len];
    rng.fill(&mut data);
    data.into()
}

/// Install a tracing subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
