//! Pure label and name transform utilities.
//!
//! Everything here is a plain function over owned data; the conversion
//! pipeline composes these into its transform list.

use std::collections::BTreeMap;

/// Canonical label keys and the origin-system aliases they are promoted
/// from. Candidate order matters: the first present alias wins.
const PROMOTIONS: &[(&str, &[&str])] = &[
    ("app_id", &["app_id", "application_id", "app_guid"]),
    ("app_name", &["app_name", "application_name"]),
    ("instance_id", &["instance_id", "instance_index", "index"]),
    ("job", &["job", "job_name"]),
    ("deployment", &["deployment", "deployment_name"]),
];

/// Convert a label map into an ordered pair list.
pub fn labels_to_pairs(labels: &BTreeMap<String, String>) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Convert a pair list into a label map. Later duplicates win.
pub fn pairs_to_labels<I>(pairs: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    pairs.into_iter().collect()
}

/// Normalize a metric name for exposition: lowercase, invalid characters
/// replaced with underscores, and a leading underscore when the name
/// would otherwise start with a digit.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.chars().next().is_some_and(|ch| ch.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Strip label names that are reserved (double-underscore prefix) or
/// not expressible in the exposition format (dashes).
pub fn sanitize_labels(labels: &mut BTreeMap<String, String>) {
    labels.retain(|key, _| !key.starts_with("__") && !key.contains('-'));
}

/// Promote origin-system label aliases to their canonical keys.
///
/// For each canonical key, the first alias present supplies the value;
/// the canonical key is set even when the value arrived under an
/// alternate name. Alias keys are left in place.
pub fn promote_labels(labels: &mut BTreeMap<String, String>) {
    for (canonical, candidates) in PROMOTIONS {
        let value = candidates
            .iter()
            .find_map(|candidate| labels.get(*candidate).cloned());
        if let Some(value) = value {
            labels.insert((*canonical).to_string(), value);
        }
    }
}
