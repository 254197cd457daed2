//! Device-side path derivation
// (c) 2025 Ross Younger
//!
//! The device filesystem is Unix-like regardless of the host OS, so all
//! joins here use forward slashes and never [`std::path`].

use crate::session::upload::FolderLayout;

/// Normalize a source-relative path for use on the device: backslashes
/// become forward slashes, repeated separators collapse, `./` prefixes are
/// stripped, and leading `../` segments are rejected by truncation.
pub(crate) fn normalize(p: &str) -> String {
    let mut s: String = p.replace('\\', "/");
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    if let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    while let Some(rest) = s.strip_prefix("../") {
        s = rest.to_string();
    }
    s
}

/// Join two device paths with exactly one separator
pub(crate) fn join_device(base: &str, leaf: &str) -> String {
    let base = normalize(base);
    let leaf = normalize(leaf);
    if base.is_empty() {
        return leaf;
    }
    if leaf.is_empty() {
        return base;
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        leaf.trim_start_matches('/')
    )
}

/// Final component of a device path
pub(crate) fn basename(p: &str) -> String {
    let s = normalize(p);
    s.rsplit('/').next().unwrap_or("").to_string()
}

/// Directory part of a device path, or None for a root-level file
pub(crate) fn device_dir(p: &str) -> Option<String> {
    let s = normalize(p);
    match s.rfind('/') {
        Some(i) if i > 0 => Some(s[..i].to_string()),
        _ => None,
    }
}

/// Derive the absolute destination for one source file.
///
/// `base` is the destination root prefix; empty or `/` means the
/// filesystem root.
pub(crate) fn derive_destination(source_rel: &str, layout: FolderLayout, base: &str) -> String {
    let rel = match layout {
        FolderLayout::Preserve => normalize(source_rel),
        FolderLayout::Flatten => basename(source_rel),
    };
    let base = base.trim();
    if base.is_empty() || base == "/" {
        format!("/{}", rel.trim_start_matches('/'))
    } else {
        let base = if base.starts_with('/') {
            base.to_string()
        } else {
            format!("/{base}")
        };
        join_device(&base, &rel)
    }
}
