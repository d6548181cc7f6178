//! Directory manifest codec.
//!
//! A manifest is a sequence of newline-delimited `hash:size:name` records.
//! Directories carry a trailing `/` on the name. The first two `:` split the
//! fields; any further `:` belongs to the name, so file names may contain
//! colons. An empty manifest encodes to zero bytes. Encoding is UTF-8.

use crate::error::{Error, Result};
use crate::types::{ContentHash, ManifestEntry};

/// Encode entries into manifest bytes.
///
/// Entries are emitted in lexicographic name order so that the same entry
/// set always produces the same bytes — and therefore the same manifest
/// hash, which keeps unchanged directories deduplicated across publishes.
pub fn encode(entries: &[ManifestEntry]) -> Vec<u8> {
    let mut sorted: Vec<&ManifestEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::new();
    for entry in sorted {
        out.push_str(entry.hash.as_str());
        out.push(':');
        out.push_str(&entry.size.to_string());
        out.push(':');
        out.push_str(&entry.name);
        if entry.is_directory {
            out.push('/');
        }
        out.push('\n');
    }
    out.into_bytes()
}

/// Decode manifest bytes into entries.
///
/// Fails with [`Error::InvalidManifest`] on malformed records. Blank lines
/// carry no record and are skipped.
pub fn decode(bytes: &[u8]) -> Result<Vec<ManifestEntry>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::InvalidManifest(format!("manifest is not UTF-8: {e}")))?;

    let mut entries = Vec::new();
    for (lineno, line) in text.split('\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        entries.push(decode_record(line).map_err(|detail| {
            Error::InvalidManifest(format!("line {}: {detail}", lineno + 1))
        })?);
    }
    Ok(entries)
}

fn decode_record(line: &str) -> std::result::Result<ManifestEntry, String> {
    let (hash, rest) = line
        .split_once(':')
        .ok_or_else(|| format!("missing ':' after hash in '{line}'"))?;
    let (size, name) = rest
        .split_once(':')
        .ok_or_else(|| format!("missing ':' after size in '{line}'"))?;

    if !ContentHash::is_well_formed(hash) {
        return Err(format!("malformed hash '{hash}'"));
    }
    let size: i64 = size
        .parse()
        .map_err(|_| format!("malformed size '{size}'"))?;
    if size < 0 {
        return Err(format!("negative size {size}"));
    }

    let (name, is_directory) = match name.strip_suffix('/') {
        Some(stripped) => (stripped, true),
        None => (name, false),
    };
    if name.is_empty() {
        return Err("empty entry name".to_string());
    }
    if name.contains('/') {
        return Err(format!("entry name '{name}' contains '/'"));
    }

    Ok(ManifestEntry {
        hash: ContentHash::new(hash),
        size,
        name: name.to_string(),
        is_directory,
    })
}
