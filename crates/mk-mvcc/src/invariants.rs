//! MVCC invariants as checkable properties.
//!
//! | Property | Description |
//! |----------|-------------|
//! | ConservedTotal | Every recorded version sums to the constant |
//! | VersionOrder | Version numbers strictly decrease newest-first |
//! | ActiveUnique | At most one active entry per participant |
//! | ActiveDrained | The active list is empty once the run has quiesced |
//!
//! `ActiveDrained` is meaningful only after [`MvccEngine::run`] returned;
//! the others hold at any moment.

use mk_core::{PropertyChecker, PropertyResult};

use crate::engine::MvccEngine;
use crate::DATA_TOTAL;

const KERNEL: &str = "mvcc";

/// Property checker for a (typically quiesced) engine.
pub struct MvccPropertyChecker<'a> {
    engine: &'a MvccEngine,
}

impl<'a> MvccPropertyChecker<'a> {
    /// Create a checker for the given engine.
    #[must_use]
    pub fn new(engine: &'a MvccEngine) -> Self {
        Self { engine }
    }

    /// Every recorded version of every participant sums to the constant.
    fn check_conserved_total(&self) -> PropertyResult {
        for (participant, history) in self.engine.histories().iter().enumerate() {
            for record in history.iter() {
                if record.a + record.b != DATA_TOTAL {
                    return PropertyResult::fail(
                        "ConservedTotal",
                        KERNEL,
                        format!(
                            "participant {participant} version {}: {} + {} != {DATA_TOTAL}",
                            record.vnum, record.a, record.b
                        ),
                    );
                }
            }
        }
        PropertyResult::pass("ConservedTotal", KERNEL)
    }

    /// Histories are append-front with a fresh number per update, so a
    /// newest-first walk must see strictly decreasing version numbers.
    fn check_version_order(&self) -> PropertyResult {
        for (participant, history) in self.engine.histories().iter().enumerate() {
            let mut previous = None;
            for record in history.iter() {
                if let Some(previous_vnum) = previous {
                    if record.vnum >= previous_vnum {
                        return PropertyResult::fail(
                            "VersionOrder",
                            KERNEL,
                            format!(
                                "participant {participant}: version {} follows {} newest-first",
                                record.vnum, previous_vnum
                            ),
                        );
                    }
                }
                previous = Some(record.vnum);
            }
        }
        PropertyResult::pass("VersionOrder", KERNEL)
    }

    /// A participant runs one update at a time, so it owns at most one
    /// active entry.
    fn check_active_unique(&self) -> PropertyResult {
        let entries = self.engine.active_entries();
        let mut seen = vec![false; self.engine.histories().len()];

        for entry in &entries {
            if seen[entry.participant] {
                return PropertyResult::fail(
                    "ActiveUnique",
                    KERNEL,
                    format!("participant {} has two active entries", entry.participant),
                );
            }
            seen[entry.participant] = true;
        }
        PropertyResult::pass("ActiveUnique", KERNEL)
    }

    /// After a drained run every update removed its entry.
    fn check_active_drained(&self) -> PropertyResult {
        let entries = self.engine.active_entries();
        if entries.is_empty() {
            PropertyResult::pass("ActiveDrained", KERNEL)
        } else {
            PropertyResult::fail(
                "ActiveDrained",
                KERNEL,
                format!("{} active entries remain after the run", entries.len()),
            )
        }
    }
}

impl PropertyChecker for MvccPropertyChecker<'_> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_conserved_total(),
            self.check_version_order(),
            self.check_active_unique(),
            self.check_active_drained(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MvccConfig;
    use std::time::Duration;

    #[test]
    fn test_fresh_engine_passes_all_properties() {
        let engine = MvccEngine::new(MvccConfig {
            participants_count: 3,
            duration: Duration::from_millis(100),
            verify: false,
            seed: 11,
        })
        .unwrap();

        let checker = MvccPropertyChecker::new(&engine);
        let summary = checker.summary();
        assert_eq!(summary.failed, 0, "{}", summary.format_report());
    }

    #[test]
    fn test_quiesced_run_passes_all_properties() {
        let engine = MvccEngine::new(MvccConfig {
            participants_count: 4,
            duration: Duration::from_millis(200),
            verify: false,
            seed: 23,
        })
        .unwrap();
        let report = engine.run();
        assert!(report.errors.is_empty());

        let checker = MvccPropertyChecker::new(&engine);
        assert!(checker.all_hold(), "{}", checker.summary().format_report());
    }
}
