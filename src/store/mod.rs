// src/store/mod.rs

use log::warn;

pub mod clicks;
pub mod google_raw;
pub mod party;
pub mod raw_poi;
pub mod vinfast;

/// Maps a page of fetched rows, logging and skipping any row that fails to
/// parse. A malformed row must never abort the sweep that read it.
pub(crate) fn collect_rows<R, T, E, F>(rows: &[R], label: &str, parse: F) -> Vec<T>
where
    E: std::fmt::Display,
    F: Fn(&R) -> Result<T, E>,
{
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match parse(row) {
            Ok(value) => out.push(value),
            Err(e) => warn!("Skipping malformed {} row: {}", label, e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_rows_skips_malformed() {
        let rows = vec!["1", "two", "3"];
        let parsed = collect_rows(&rows, "number", |r| r.parse::<i64>());
        assert_eq!(parsed, vec![1, 3]);
    }

    #[test]
    fn test_collect_rows_empty() {
        let rows: Vec<&str> = Vec::new();
        let parsed = collect_rows(&rows, "number", |r| r.parse::<i64>());
        assert!(parsed.is_empty());
    }
}
