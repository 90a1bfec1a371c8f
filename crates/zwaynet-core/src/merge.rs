// ── Partial-update merger ──
//
// The gateway's incremental responses are flat documents whose top-level
// keys are dot-delimited paths into the tree, e.g.
// `devices.26.instances.0.commandClasses.49.data.1.val`. Each path is
// walked into the cached raw tree and the leaf replaced verbatim.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Merge failure. Only an unparseable or non-object document fails the
/// whole merge; individual keys fail in isolation (see [`apply_partial`]).
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("partial update is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("partial update is not a JSON object")]
    NotAnObject,
}

/// Outcome of a merge: how many keys applied, how many were skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Apply a partial-update document onto the cached raw tree.
///
/// Each top-level key is a dot path; intermediate segments must already
/// exist as objects in the cache. A key whose path cannot be walked —
/// the node was excluded between polls, or the segment is not an
/// object — is skipped with a warning and counted in the report; the
/// remaining keys still apply. Values are replaced verbatim, no type
/// coercion.
pub fn apply_partial(cache: &mut Value, document: &str) -> Result<MergeReport, MergeError> {
    let partial: Value = serde_json::from_str(document)?;
    let Value::Object(entries) = partial else {
        return Err(MergeError::NotAnObject);
    };

    let mut report = MergeReport::default();

    for (path, new_value) in entries {
        if apply_one(cache, &path, new_value) {
            report.applied += 1;
        } else {
            warn!(path, "skipping partial update for unknown path");
            report.skipped += 1;
        }
    }

    Ok(report)
}

/// Walk `path` into the cache and replace the leaf. Returns `false`
/// when any intermediate segment is missing or not an object.
fn apply_one(cache: &mut Value, path: &str, new_value: Value) -> bool {
    let mut segments = path.split('.').collect::<Vec<_>>();
    let Some(leaf) = segments.pop() else {
        return false;
    };

    let mut node = &mut *cache;
    for segment in segments {
        match node.get_mut(segment) {
            Some(child) => node = child,
            None => return false,
        }
    }

    match node.as_object_mut() {
        Some(object) => {
            object.insert(leaf.to_owned(), new_value);
            true
        }
        None => false,
    }
}
