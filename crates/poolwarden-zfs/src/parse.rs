//! Helpers for turning `zfs` and `zpool` CLI output into data structures the
//! rest of the crate can reason about.

use poolwarden_core::error::{WardenError, WardenResult};
use std::collections::BTreeMap;

/// Turn `-H -o property,value` style command output into an ordered map.
pub(crate) fn parse_property_map(output: &str) -> BTreeMap<String, String> {
    parse_tabular_pairs(output).into_iter().collect()
}

/// Turn `-H -o name,value` style command output into name/value pairs.
pub(crate) fn parse_tabular_pairs(output: &str) -> Vec<(String, String)> {
    output.lines().filter_map(parse_pair_line).collect()
}

/// Normalize a single line from the CLI into a `(name, value)` pair if possible.
fn parse_pair_line(line: &str) -> Option<(String, String)> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    if let Some((left, right)) = line.split_once('\t') {
        let name = left.trim();
        if name.is_empty() {
            return None;
        }
        return Some((name.to_string(), right.trim().to_string()));
    }

    let trimmed = line.trim();
    let (name, value) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    Some((name.to_string(), value.trim().to_string()))
}

/// Split scripted (`-H`) output into rows of exactly `columns` tab-separated fields.
pub(crate) fn parse_columns(
    command: &str,
    output: &str,
    columns: usize,
) -> WardenResult<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split('\t').map(|f| f.trim().to_string()).collect();
        if fields.len() != columns {
            return Err(WardenError::UnexpectedOutput {
                command: command.to_string(),
                line: line.to_string(),
            });
        }
        rows.push(fields);
    }
    Ok(rows)
}

/// Non-empty trimmed lines, for single-column listings.
pub(crate) fn parse_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Peel off the pool name prefix from a dataset, snapshot, or bookmark identifier.
pub(crate) fn pool_from_dataset(dataset: &str) -> Option<&str> {
    let candidate = dataset.split(['/', '@', '#']).next()?;
    if candidate.is_empty() {
        None
    } else {
        Some(candidate)
    }
}

/// Dataset part of a snapshot (`ds@snap`) or bookmark (`ds#mark`) name.
pub(crate) fn dataset_of(name: &str) -> &str {
    name.split(['@', '#']).next().unwrap_or(name)
}

/// True when `name` lives in `pool`: the pool root itself, anything below
/// `pool/`, or a snapshot/bookmark of one of those.
pub(crate) fn belongs_to_pool(name: &str, pool: &str) -> bool {
    let dataset = dataset_of(name);
    dataset == pool
        || dataset
            .strip_prefix(pool)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Qualify a bare snapshot suffix against `dataset`; full names pass through.
pub(crate) fn qualify_snapshot(dataset: &str, snapshot: &str) -> String {
    match snapshot.strip_prefix('@') {
        Some(bare) => format!("{dataset}@{bare}"),
        None if snapshot.contains('@') => snapshot.to_string(),
        None => format!("{dataset}@{snapshot}"),
    }
}
