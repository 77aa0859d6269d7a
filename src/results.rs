// src/results.rs

use std::time::Duration;

use crate::models::{ImportStatus, ImportStatusKind, ImportSummary};

/// Terminal state of a batch pass. Record-level failures downgrade a pass to
/// `CompletedWithErrors` but never fail it; only infrastructure errors do,
/// and those surface as `Err` from the pass itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    CompletedWithErrors,
}

impl PassOutcome {
    pub fn from_summary(summary: &ImportSummary) -> Self {
        if summary.total_error > 0 {
            PassOutcome::CompletedWithErrors
        } else {
            PassOutcome::Completed
        }
    }
}

/// Running counters a pass accumulates across pages.
#[derive(Debug, Clone, Default)]
pub struct PassStats {
    pub pages: u64,
    pub records: u64,
    pub elapsed: Duration,
}

impl PassStats {
    pub fn record_page(&mut self, records: usize, elapsed: Duration) {
        self.pages += 1;
        self.records += records as u64;
        self.elapsed += elapsed;
    }
}

/// Folds one per-record status into the summary counters.
pub fn apply_status(summary: &mut ImportSummary, status: &ImportStatus) {
    summary.total += 1;
    match status.status {
        ImportStatusKind::Success => summary.total_added_new += 1,
        ImportStatusKind::Updated => summary.total_updated += 1,
        ImportStatusKind::Ignored => summary.total_ignored += 1,
        ImportStatusKind::Error => summary.total_error += 1,
    }
}

pub fn summarize(name: &str, statuses: &[ImportStatus]) -> ImportSummary {
    let mut summary = ImportSummary::new(name);
    for status in statuses {
        apply_status(&mut summary, status);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImportErrorKind;

    #[test]
    fn test_summarize_counts_each_kind() {
        let statuses = vec![
            ImportStatus::success("a"),
            ImportStatus::success("b"),
            ImportStatus::updated("c", "existing party replaced"),
            ImportStatus {
                id: "d".to_string(),
                status: ImportStatusKind::Ignored,
                msg: String::new(),
            },
            ImportStatus::error("e", ImportErrorKind::NotFoundCategory),
        ];
        let summary = summarize("ImportMaster", &statuses);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.total_added_new, 2);
        assert_eq!(summary.total_updated, 1);
        assert_eq!(summary.total_ignored, 1);
        assert_eq!(summary.total_error, 1);
    }

    #[test]
    fn test_outcome_downgrades_on_errors() {
        let clean = summarize("x", &[ImportStatus::success("a")]);
        assert_eq!(PassOutcome::from_summary(&clean), PassOutcome::Completed);

        let dirty = summarize(
            "x",
            &[ImportStatus::error("a", ImportErrorKind::UnhandledError)],
        );
        assert_eq!(
            PassOutcome::from_summary(&dirty),
            PassOutcome::CompletedWithErrors
        );
    }

    #[test]
    fn test_pass_stats_accumulate() {
        let mut stats = PassStats::default();
        stats.record_page(100, Duration::from_millis(250));
        stats.record_page(40, Duration::from_millis(100));
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.records, 140);
        assert_eq!(stats.elapsed, Duration::from_millis(350));
    }
}
