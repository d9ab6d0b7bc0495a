/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;

use bytes::Bytes;
use content_roots::object_store::InMemoryObjectStore;
use content_roots::root::s3::S3Root;
use content_roots::types::{DeleteMarkerFilter, ObjectVersionsFilter, Version};
use content_roots::{ErrorKind, Root};
use test_common::init_tracing;

const BUCKET: &str = "versioned";

async fn versioned_root(prefix: &str) -> (Arc<InMemoryObjectStore>, S3Root) {
    init_tracing();
    let store = Arc::new(InMemoryObjectStore::new().with_page_size(3));
    store.create_bucket(BUCKET, true).await;
    let root = S3Root::builder()
        .name("versioned")
        .bucket(BUCKET)
        .prefix(prefix)
        .shared_store(store.clone())
        .versioned(true)
        .build()
        .unwrap();
    (store, root)
}

async fn write(root: &S3Root, key: &str, content: &'static str) {
    root.write_bytes_to(key, Bytes::from_static(content.as_bytes()), None)
        .await
        .unwrap();
}

fn summary(versions: &[Version]) -> Vec<(&str, bool, bool)> {
    versions
        .iter()
        .map(|v| (v.key.as_str(), v.is_latest, v.is_delete_marker))
        .collect()
}

#[tokio::test]
async fn test_unversioned_root_rejects_version_operations() {
    init_tracing();
    let store = InMemoryObjectStore::new();
    store.create_bucket(BUCKET, false).await;
    let root = S3Root::builder()
        .name("plain")
        .bucket(BUCKET)
        .store(store)
        .build()
        .unwrap();

    let err = root.check_versioning().unwrap_err();
    assert_eq!(&ErrorKind::UnsupportedOperation, err.kind());
    let err = root
        .versions("joe.txt", ObjectVersionsFilter::All, DeleteMarkerFilter::Include)
        .await
        .unwrap_err();
    assert_eq!(&ErrorKind::UnsupportedOperation, err.kind());
    let err = root.delete_tree_versions("").await.unwrap_err();
    assert_eq!(&ErrorKind::UnsupportedOperation, err.kind());
    let err = root.undelete_tree("").await.unwrap_err();
    assert_eq!(&ErrorKind::UnsupportedOperation, err.kind());
    let err = root.delete_version("joe.txt", "v1").await.unwrap_err();
    assert_eq!(&ErrorKind::UnsupportedOperation, err.kind());
}

#[tokio::test]
async fn test_set_versioned() {
    init_tracing();
    let store = Arc::new(InMemoryObjectStore::new());
    store.create_bucket(BUCKET, false).await;
    let root = S3Root::builder()
        .name("plain")
        .bucket(BUCKET)
        .shared_store(store.clone())
        .build()
        .unwrap();
    root.set_versioned(true).await.unwrap();
    assert!(root.is_versioned());

    write(&root, "joe.txt", "joe\n").await;
    write(&root, "joe.txt", "joe again\n").await;
    assert_eq!(2, store.version_count(BUCKET).await);
}

#[tokio::test]
async fn test_versions_and_filters() {
    let (_store, root) = versioned_root("my/prefix/").await;
    write(&root, "joe.txt", "joe\n").await;
    write(&root, "joe.txt", "joe again\n").await;
    write(&root, "joe.txt.bak", "not joe\n").await;
    root.delete_content("joe.txt").await.unwrap();

    let all = root
        .versions("joe.txt", ObjectVersionsFilter::All, DeleteMarkerFilter::Include)
        .await
        .unwrap();
    assert_eq!(
        vec![
            ("joe.txt", true, true),
            ("joe.txt", false, false),
            ("joe.txt", false, false)
        ],
        summary(&all)
    );

    let latest = root
        .versions("joe.txt", ObjectVersionsFilter::Latest, DeleteMarkerFilter::Include)
        .await
        .unwrap();
    assert_eq!(vec![("joe.txt", true, true)], summary(&latest));

    let old = root
        .versions("joe.txt", ObjectVersionsFilter::Old, DeleteMarkerFilter::Include)
        .await
        .unwrap();
    assert_eq!(2, old.len());

    let content = root
        .versions("joe.txt", ObjectVersionsFilter::All, DeleteMarkerFilter::Exclude)
        .await
        .unwrap();
    assert_eq!(2, content.len());
    assert!(content.iter().all(|v| !v.is_delete_marker));

    let markers = root
        .versions("joe.txt", ObjectVersionsFilter::All, DeleteMarkerFilter::Only)
        .await
        .unwrap();
    assert_eq!(vec![("joe.txt", true, true)], summary(&markers));

    let none = root
        .versions("joe.txt", ObjectVersionsFilter::Latest, DeleteMarkerFilter::Exclude)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_delete_version_restores_previous() {
    let (_store, root) = versioned_root("").await;
    write(&root, "joe.txt", "joe\n").await;
    write(&root, "joe.txt", "joe again\n").await;
    let latest = root
        .versions("joe.txt", ObjectVersionsFilter::Latest, DeleteMarkerFilter::Exclude)
        .await
        .unwrap();
    root.delete_version("joe.txt", &latest[0].version_id)
        .await
        .unwrap();
    assert_eq!("joe\n", root.as_string("joe.txt").await.unwrap());

    let err = root
        .delete_version("joe.txt", "no-such-version")
        .await
        .unwrap_err();
    assert_eq!(&ErrorKind::NotFound, err.kind());
}

#[tokio::test]
async fn test_undelete_tree() {
    let (_store, root) = versioned_root("my/prefix/").await;
    write(&root, "child/fred.txt", "fred\n").await;
    write(&root, "child/fred.txt", "fred again\n").await;
    write(&root, "child/grandchild/dave.txt", "dave\n").await;
    write(&root, "child/kept.txt", "kept\n").await;
    write(&root, "joe.txt", "joe\n").await;
    root.delete_tree("child/").await.unwrap();
    root.delete_content("joe.txt").await.unwrap();
    write(&root, "child/kept.txt", "kept again\n").await;
    assert_eq!(vec!["child/kept.txt"], root.subtree_keys("child/").await.unwrap());

    root.undelete_tree("child").await.unwrap();
    assert_eq!(
        vec![
            "child/fred.txt",
            "child/grandchild/dave.txt",
            "child/kept.txt"
        ],
        root.subtree_keys("child/").await.unwrap()
    );
    assert_eq!("fred again\n", root.as_string("child/fred.txt").await.unwrap());
    assert_eq!("kept again\n", root.as_string("child/kept.txt").await.unwrap());
    // outside the tree
    assert!(!root.exists("joe.txt").await.unwrap());
}

#[tokio::test]
async fn test_delete_tree_versions() {
    let (store, root) = versioned_root("my/prefix/").await;
    write(&root, "child/fred.txt", "fred\n").await;
    write(&root, "child/fred.txt", "fred again\n").await;
    write(&root, "child/grandchild/dave.txt", "dave\n").await;
    write(&root, "children.txt", "not in the tree\n").await;
    root.delete_content("child/grandchild/dave.txt").await.unwrap();
    assert_eq!(5, store.version_count(BUCKET).await);

    root.delete_tree_versions("child").await.unwrap();
    assert_eq!(1, store.version_count(BUCKET).await);
    assert!(root
        .delimited_prefix_versions("child/", None)
        .await
        .unwrap()
        .is_empty());
    assert_eq!("not in the tree\n", root.as_string("children.txt").await.unwrap());
}

#[tokio::test]
async fn test_delimited_prefix_versions() {
    let (_store, root) = versioned_root("my/prefix/").await;
    write(&root, "child/fred.txt", "fred\n").await;
    write(&root, "child/fred.txt", "fred again\n").await;
    write(&root, "child/grandchild/dave.txt", "dave\n").await;
    write(&root, "children.txt", "children\n").await;

    let versions = root
        .delimited_prefix_versions("child/", Some("/"))
        .await
        .unwrap();
    assert_eq!(
        vec![("child/fred.txt", true, false), ("child/fred.txt", false, false)],
        summary(&versions)
    );

    let versions = root.delimited_prefix_versions("child", None).await.unwrap();
    let keys: Vec<_> = versions.iter().map(|v| v.key.as_str()).collect();
    assert_eq!(
        vec![
            "child/fred.txt",
            "child/fred.txt",
            "child/grandchild/dave.txt",
            "children.txt"
        ],
        keys
    );
}
