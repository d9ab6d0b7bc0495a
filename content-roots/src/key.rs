/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Keys address content relative to a root.
//!
//! A key is a `/` delimited string. The empty key names the root itself and any key ending
//! in `/` is a *directory key*; every other key is a *content key*. Behavior for keys with a
//! leading `/` or with consecutive `/` is undefined. Such keys are never normalized here,
//! though [`FilesystemRoot`](crate::root::filesystem::FilesystemRoot) rejects any key that
//! resolves outside of its directory.

/// Separator between key segments.
pub const DELIMITER: char = '/';

/// True for the empty key and for keys ending in the delimiter.
pub fn is_directory_key(key: &str) -> bool {
    key.is_empty() || key.ends_with(DELIMITER)
}

/// Returns `key` as a directory key, appending the delimiter if needed.
pub fn ensure_directory_key(key: &str) -> String {
    if is_directory_key(key) {
        key.to_owned()
    } else {
        format!("{key}{DELIMITER}")
    }
}

/// Join a (directory or bare) parent key and a child segment.
pub fn join_key(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_owned()
    } else if parent.ends_with(DELIMITER) {
        format!("{parent}{child}")
    } else {
        format!("{parent}{DELIMITER}{child}")
    }
}

/// Key of `key` relative to `prefix`.
///
/// `prefix` is treated as a directory: `relative_key("a/b", "a/b/c")` and
/// `relative_key("a/b/", "a/b/c")` are both `Some("c")`. Returns `None` when `key` is not
/// below `prefix`.
pub fn relative_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(key);
    }
    let rest = key.strip_prefix(prefix)?;
    if prefix.ends_with(DELIMITER) {
        Some(rest)
    } else {
        rest.strip_prefix(DELIMITER)
    }
}

/// The last segment of a key, ignoring a trailing delimiter.
pub fn basename(key: &str) -> &str {
    let trimmed = key.strip_suffix(DELIMITER).unwrap_or(key);
    trimmed
        .rsplit_once(DELIMITER)
        .map(|(_, name)| name)
        .unwrap_or(trimmed)
}

/// Prepend a root prefix to a key. An empty prefix leaves the key unchanged.
pub(crate) fn add_prefix(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

/// Remove a root prefix from a backend key, returning `None` if it is not below the prefix.
pub(crate) fn remove_prefix<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_keys() {
        assert!(is_directory_key(""));
        assert!(is_directory_key("child/"));
        assert!(!is_directory_key("child"));
        assert!(!is_directory_key("child/fred.txt"));
    }

    #[test]
    fn test_ensure_directory_key() {
        assert_eq!("", ensure_directory_key(""));
        assert_eq!("child/", ensure_directory_key("child"));
        assert_eq!("child/", ensure_directory_key("child/"));
    }

    #[test]
    fn test_join_key() {
        assert_eq!("joe.txt", join_key("", "joe.txt"));
        assert_eq!("child/fred.txt", join_key("child", "fred.txt"));
        assert_eq!("child/fred.txt", join_key("child/", "fred.txt"));
    }

    #[test]
    fn test_relative_key() {
        assert_eq!(Some("c/d"), relative_key("a/b", "a/b/c/d"));
        assert_eq!(Some("c/d"), relative_key("a/b/", "a/b/c/d"));
        assert_eq!(Some("a/b"), relative_key("", "a/b"));
        assert_eq!(None, relative_key("a/b", "a/bc/d"));
        assert_eq!(None, relative_key("x", "a/b"));
    }

    #[test]
    fn test_basename() {
        assert_eq!("fred.txt", basename("child/fred.txt"));
        assert_eq!("grandchild-1", basename("child/grandchild-1/"));
        assert_eq!("joe.txt", basename("joe.txt"));
        assert_eq!("", basename(""));
    }

    #[test]
    fn test_prefixes() {
        assert_eq!("my/prefix/joe.txt", add_prefix("my/prefix/", "joe.txt"));
        assert_eq!("joe.txt", add_prefix("", "joe.txt"));
        assert_eq!(Some("joe.txt"), remove_prefix("my/prefix/", "my/prefix/joe.txt"));
        assert_eq!(None, remove_prefix("my/prefix/", "other/joe.txt"));
    }
}
