//! Helpers for keeping uploaded names out of span attributes verbatim.

/// Returns the final component of an archive entry name.
///
/// Archive entries may carry arbitrary directory prefixes from the uploader's
/// machine; spans only ever see the leaf.
pub fn redact_entry_name(name: &str) -> String {
    let leaf = name
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("");
    if leaf.is_empty() {
        "<unnamed>".to_string()
    } else {
        leaf.to_string()
    }
}
