//! Rewrites a downloaded extension package into its self-hosted variant.
//!
//! The raw package is a zip archive. Every member is copied verbatim into a
//! new archive; only the manifest member is parsed, given an update-feed
//! pointer, and re-serialized with stable key order. The original archive
//! is never touched.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{PublishError, Result};

const MANIFEST_NAME: &str = "manifest.json";

/// Details pulled out of the manifest while rewriting it.
#[derive(Debug, Clone)]
pub struct ManifestSummary {
    /// Minimum browser version declared by the extension, if any.
    pub min_browser_version: Option<String>,
}

/// Copy `src` to `dest`, pointing the manifest's gecko settings at
/// `update_feed_url`. All other members are copied byte-for-byte.
pub fn make_self_hosted(src: &Path, dest: &Path, update_feed_url: &str) -> Result<ManifestSummary> {
    let mut archive = ZipArchive::new(File::open(src)?)?;
    let mut writer = ZipWriter::new(File::create(dest)?);

    let mut summary = None;
    for index in 0..archive.len() {
        let member = archive.by_index_raw(index)?;
        if member.name() != MANIFEST_NAME {
            writer.raw_copy_file(member)?;
            continue;
        }
        drop(member);

        let mut member = archive.by_index(index)?;
        let mut raw = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut raw)?;
        drop(member);

        let (rewritten, found) = rewrite_manifest(&raw, update_feed_url)?;
        writer.start_file(MANIFEST_NAME, SimpleFileOptions::default())?;
        writer.write_all(&rewritten)?;
        summary = Some(found);
    }
    writer.finish()?;

    summary.ok_or_else(|| PublishError::MalformedArchive(format!("{MANIFEST_NAME} member missing")))
}

fn rewrite_manifest(raw: &[u8], update_feed_url: &str) -> Result<(Vec<u8>, ManifestSummary)> {
    let mut manifest: Value = serde_json::from_slice(raw)
        .map_err(|err| PublishError::MalformedArchive(format!("unparsable {MANIFEST_NAME}: {err}")))?;

    let gecko = gecko_settings(&mut manifest).ok_or_else(|| {
        PublishError::MalformedArchive(format!("no gecko settings in {MANIFEST_NAME}"))
    })?;
    let min_browser_version = gecko
        .get("strict_min_version")
        .and_then(Value::as_str)
        .map(str::to_string);
    gecko.insert(
        "update_url".to_string(),
        Value::String(update_feed_url.to_string()),
    );

    // Sorted keys and fixed indentation keep the rewrite deterministic.
    let body = serde_json::to_vec_pretty(&manifest)?;
    Ok((body, ManifestSummary { min_browser_version }))
}

// Manifest v3 keeps the gecko block under `browser_specific_settings`,
// older manifests under `applications`.
fn gecko_settings(manifest: &mut Value) -> Option<&mut serde_json::Map<String, Value>> {
    let root = manifest.as_object_mut()?;
    let block = if root.contains_key("browser_specific_settings") {
        root.get_mut("browser_specific_settings")?
    } else {
        root.get_mut("applications")?
    };
    block.get_mut("gecko")?.as_object_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn build_package(manifest: Option<&[u8]>) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("background.js", options).unwrap();
        writer.write_all(b"console.log('hi');").unwrap();
        if let Some(body) = manifest {
            writer.start_file("manifest.json", options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.start_file("rules/filters.txt", options).unwrap();
        writer.write_all(b"||example.com^").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn member_bytes(archive_path: &Path, name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(File::open(archive_path).unwrap()).unwrap();
        let mut member = archive.by_name(name).unwrap();
        let mut out = Vec::new();
        member.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn only_the_update_url_field_changes() {
        let manifest = serde_json::to_vec(&json!({
            "name": "ext",
            "version": "1.2.3",
            "applications": { "gecko": { "id": "ext@example.org" } }
        }))
        .unwrap();

        let dir = tempdir().unwrap();
        let src = dir.path().join("raw.zip");
        let dest = dir.path().join("unsigned.zip");
        std::fs::write(&src, build_package(Some(&manifest))).unwrap();
        let original = std::fs::read(&src).unwrap();

        make_self_hosted(&src, &dest, "https://example.com/updates.json").unwrap();

        // Original archive untouched.
        assert_eq!(std::fs::read(&src).unwrap(), original);

        // Non-manifest members byte-identical.
        assert_eq!(member_bytes(&dest, "background.js"), b"console.log('hi');");
        assert_eq!(member_bytes(&dest, "rules/filters.txt"), b"||example.com^");

        // Manifest differs in exactly the injected field.
        let mut rewritten: Value =
            serde_json::from_slice(&member_bytes(&dest, "manifest.json")).unwrap();
        let gecko = rewritten["applications"]["gecko"].as_object_mut().unwrap();
        assert_eq!(
            gecko.remove("update_url").unwrap(),
            json!("https://example.com/updates.json")
        );
        let input: Value = serde_json::from_slice(&manifest).unwrap();
        assert_eq!(rewritten, input);
    }

    #[test]
    fn rewrite_is_deterministic() {
        let manifest = serde_json::to_vec(&json!({
            "zeta": 1,
            "alpha": 2,
            "browser_specific_settings": {
                "gecko": { "id": "ext@example.org", "strict_min_version": "114.0" }
            }
        }))
        .unwrap();

        let dir = tempdir().unwrap();
        let src = dir.path().join("raw.zip");
        std::fs::write(&src, build_package(Some(&manifest))).unwrap();

        let first = dir.path().join("a.zip");
        let second = dir.path().join("b.zip");
        let summary = make_self_hosted(&src, &first, "https://f.example").unwrap();
        make_self_hosted(&src, &second, "https://f.example").unwrap();

        assert_eq!(summary.min_browser_version.as_deref(), Some("114.0"));
        assert_eq!(
            member_bytes(&first, "manifest.json"),
            member_bytes(&second, "manifest.json")
        );
    }

    #[test]
    fn missing_manifest_is_malformed() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("raw.zip");
        std::fs::write(&src, build_package(None)).unwrap();

        let err = make_self_hosted(&src, &dir.path().join("out.zip"), "https://f").unwrap_err();
        assert!(matches!(err, PublishError::MalformedArchive(_)));
    }

    #[test]
    fn unparsable_manifest_is_malformed() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("raw.zip");
        std::fs::write(&src, build_package(Some(b"not json"))).unwrap();

        let err = make_self_hosted(&src, &dir.path().join("out.zip"), "https://f").unwrap_err();
        assert!(matches!(err, PublishError::MalformedArchive(_)));
    }

    #[test]
    fn manifest_without_gecko_settings_is_malformed() {
        let manifest = serde_json::to_vec(&json!({ "name": "ext" })).unwrap();
        let dir = tempdir().unwrap();
        let src = dir.path().join("raw.zip");
        std::fs::write(&src, build_package(Some(&manifest))).unwrap();

        let err = make_self_hosted(&src, &dir.path().join("out.zip"), "https://f").unwrap_err();
        assert!(matches!(err, PublishError::MalformedArchive(_)));
    }
}
