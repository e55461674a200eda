//! The MVCC engine: versioned state, the UPDATE protocol, and the driver.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam_utils::CachePadded;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use mk_core::{ParticipantId, RunStats};
use mk_sync::{BakeryCell, PublishList, SeqList};

use crate::{MvccConfig, MvccError, Vnum, DATA_TOTAL};

/// One recorded version of a participant's pair. Immutable once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRecord {
    pub a: i64,
    pub b: i64,
    pub vnum: Vnum,
}

/// "Participant `participant` is running an UPDATE producing `vnum`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveEntry {
    pub participant: ParticipantId,
    pub vnum: Vnum,
}

/// Version counter and active list, guarded together by the bakery lock so
/// that number issuance and the snapshot copy are one atomic step.
struct ActiveState {
    vnum_next: Vnum,
    active: SeqList<ActiveEntry>,
}

struct EngineShared {
    active: BakeryCell<ActiveState>,
    histories: Vec<PublishList<VersionRecord>>,
    updates: Vec<CachePadded<AtomicU64>>,
    running: AtomicBool,
    verify: bool,
}

/// Outcome of a timed run.
#[derive(Debug)]
pub struct MvccReport {
    /// UPDATE count per participant.
    pub updates: Vec<u64>,
    /// Participant-fatal failures. The other participants kept running.
    pub errors: Vec<MvccError>,
    config: MvccConfig,
}

impl MvccReport {
    /// Throughput and fairness over the configured duration.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats::new(self.updates.clone(), self.config.duration)
    }
}

/// The engine: all shared state behind one context object.
pub struct MvccEngine {
    shared: EngineShared,
    config: MvccConfig,
}

impl MvccEngine {
    /// Build an engine and seed every participant with an initial version.
    pub fn new(config: MvccConfig) -> Result<Self, MvccError> {
        config.validate()?;

        let participants_count = config.participants_count;
        let mut rng = Xoshiro256StarStar::seed_from_u64(config.seed);

        let histories: Vec<PublishList<VersionRecord>> =
            (0..participants_count).map(|_| PublishList::new()).collect();

        let mut vnum_next: Vnum = 1;
        for history in &histories {
            let a = rng.gen_range(0..DATA_TOTAL);
            history.push_front(VersionRecord {
                a,
                b: DATA_TOTAL - a,
                vnum: vnum_next,
            });
            vnum_next += 1;
        }

        // One extra bakery slot for the engine's owner, used by the
        // inspection accessors below.
        let active = BakeryCell::new(
            participants_count + 1,
            ActiveState {
                vnum_next,
                active: SeqList::new(),
            },
        );

        Ok(Self {
            shared: EngineShared {
                active,
                histories,
                updates: (0..participants_count)
                    .map(|_| CachePadded::new(AtomicU64::new(0)))
                    .collect(),
                running: AtomicBool::new(false),
                verify: config.verify,
            },
            config,
        })
    }

    /// Run the timed workload: spawn one worker per participant, sleep the
    /// configured duration, raise the stop flag, and join.
    pub fn run(&self) -> MvccReport {
        let shared = &self.shared;
        shared.running.store(true, Ordering::Relaxed);

        let mut seed_rng = Xoshiro256StarStar::seed_from_u64(self.config.seed);
        let worker_seeds: Vec<u64> = (0..self.config.participants_count)
            .map(|_| seed_rng.gen())
            .collect();

        let mut errors = Vec::new();
        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(self.config.participants_count);
            for (participant, &seed) in worker_seeds.iter().enumerate() {
                workers.push(
                    thread::Builder::new()
                        .name(format!("mvcc-worker-{participant}"))
                        .spawn_scoped(scope, move || worker_loop(shared, participant, seed))
                        .expect("spawn mvcc worker"),
                );
            }

            thread::sleep(self.config.duration);
            shared.running.store(false, Ordering::Relaxed);

            for worker in workers {
                if let Err(err) = worker.join().expect("mvcc worker panicked") {
                    errors.push(err);
                }
            }
        });

        MvccReport {
            updates: self
                .shared
                .updates
                .iter()
                .map(|counter| counter.load(Ordering::Relaxed))
                .collect(),
            errors,
            config: self.config.clone(),
        }
    }

    /// Per-participant version histories, newest first.
    #[must_use]
    pub fn histories(&self) -> &[PublishList<VersionRecord>] {
        &self.shared.histories
    }

    /// Snapshot of the active list, taken under the owner's bakery slot.
    #[must_use]
    pub fn active_entries(&self) -> Vec<ActiveEntry> {
        let guard = self.shared.active.lock(self.owner_slot());
        guard.active.iter().map(|(_, &entry)| entry).collect()
    }

    /// Version number the counter will hand out next.
    #[must_use]
    pub fn vnum_next(&self) -> Vnum {
        self.shared.active.lock(self.owner_slot()).vnum_next
    }

    /// The bakery slot reserved for the engine's owner. Must not be taken
    /// from two threads at once.
    fn owner_slot(&self) -> ParticipantId {
        self.config.participants_count
    }
}

fn worker_loop(shared: &EngineShared, me: ParticipantId, seed: u64) -> Result<(), MvccError> {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);

    let initial = shared.histories[me]
        .front()
        .expect("participant seeded with an initial version");
    let mut a = initial.a;
    let mut b = initial.b;
    debug_assert!(a + b == DATA_TOTAL);

    while shared.running.load(Ordering::Relaxed) {
        let (vnum, view) = begin_update(shared, me);

        let peer = pick_peer(&mut rng, shared.histories.len(), me);
        let peer_record = match resolve_read(&shared.histories[peer], &view, peer, vnum) {
            Ok(record) => record,
            Err(err) => {
                log::error!("participant {me} update {vnum}: {err}");
                finish_update(shared, me, vnum);
                return Err(err);
            }
        };

        // The same a_j feeds both sides: a grows by it, b shrinks by it.
        // That preserves this participant's total exactly because the
        // previous (a, b) summed to the constant; no cross-participant sum
        // is maintained or claimed.
        a += peer_record.a;
        b -= peer_record.a;

        if shared.verify {
            if let Err(err) = verify_view(shared, &view, vnum) {
                log::error!("participant {me} update {vnum}: {err}");
                finish_update(shared, me, vnum);
                return Err(err);
            }
        }

        shared.histories[me].push_front(VersionRecord { a, b, vnum });
        finish_update(shared, me, vnum);
        shared.updates[me].fetch_add(1, Ordering::Relaxed);
    }

    Ok(())
}

/// Steps 1-2 of the UPDATE: under the bakery lock, take a fresh version
/// number, append the active entry, and copy the list as the read-view.
fn begin_update(shared: &EngineShared, me: ParticipantId) -> (Vnum, Vec<ActiveEntry>) {
    let mut state = shared.active.lock(me);

    let vnum = state.vnum_next;
    state.vnum_next += 1;

    state.active.push_back(ActiveEntry {
        participant: me,
        vnum,
    });

    let view: Vec<ActiveEntry> = state.active.iter().map(|(_, &entry)| entry).collect();

    debug_assert!(
        view.iter().any(|e| e.participant == me && e.vnum == vnum),
        "Read-view must contain the snapshotting participant"
    );
    debug_assert!(
        view.iter().all(|e| e.vnum <= vnum),
        "The new version number must be the largest in the read-view"
    );

    (vnum, view)
}

/// Step 8: remove this participant's active entry.
fn finish_update(shared: &EngineShared, me: ParticipantId, vnum: Vnum) {
    let mut state = shared.active.lock(me);
    let removed = state.active.remove_first(|e| e.participant == me);

    debug_assert!(
        removed.map(|e| e.vnum) == Some(vnum),
        "Active entry must match the update being finished"
    );
}

/// Pick a peer uniformly from the other participants.
fn pick_peer(rng: &mut Xoshiro256StarStar, participants_count: usize, me: ParticipantId) -> usize {
    debug_assert!(participants_count >= 2, "Peer selection needs a peer");

    let pick = rng.gen_range(0..participants_count - 1);
    if pick >= me {
        pick + 1
    } else {
        pick
    }
}

/// Resolve which version of `target` an update with read-view `view` and
/// new version `vnum` is allowed to read.
///
/// If `target` is in the view, the bound is the version it was producing at
/// snapshot time; otherwise the bound is `vnum`. The result is the newest
/// record strictly older than the bound.
pub(crate) fn resolve_read(
    history: &PublishList<VersionRecord>,
    view: &[ActiveEntry],
    target: ParticipantId,
    vnum: Vnum,
) -> Result<VersionRecord, MvccError> {
    let bound = view
        .iter()
        .find(|entry| entry.participant == target)
        .map_or(vnum, |entry| entry.vnum);

    for record in history.iter() {
        if record.vnum < bound {
            return Ok(*record);
        }
    }

    Err(MvccError::MissingVersion {
        participant: target,
        bound,
    })
}

/// Verify mode: resolve every participant under the same snapshot and
/// check the conserved total.
fn verify_view(shared: &EngineShared, view: &[ActiveEntry], vnum: Vnum) -> Result<(), MvccError> {
    for (participant, history) in shared.histories.iter().enumerate() {
        let record = resolve_read(history, view, participant, vnum)?;
        if record.a + record.b != DATA_TOTAL {
            return Err(MvccError::InvariantViolated {
                participant,
                vnum: record.vnum,
                a: record.a,
                b: record.b,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(participants_count: usize, millis: u64, verify: bool) -> MvccConfig {
        MvccConfig {
            participants_count,
            duration: Duration::from_millis(millis),
            verify,
            seed: 0x5EED,
        }
    }

    #[test]
    fn test_new_seeds_one_version_per_participant() {
        let engine = MvccEngine::new(test_config(4, 100, false)).unwrap();

        let mut vnums = Vec::new();
        for history in engine.histories() {
            let records: Vec<VersionRecord> = history.iter().copied().collect();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].a + records[0].b, DATA_TOTAL);
            vnums.push(records[0].vnum);
        }

        vnums.sort_unstable();
        vnums.dedup();
        assert_eq!(vnums.len(), 4, "Initial version numbers must be unique");
        assert_eq!(engine.vnum_next(), 5);
        assert!(engine.active_entries().is_empty());
    }

    #[test]
    fn test_rejects_single_participant() {
        assert!(MvccEngine::new(test_config(1, 100, false)).is_err());
    }

    #[test]
    fn test_resolve_read_uses_view_entry_as_bound() {
        let history = PublishList::new();
        history.push_front(VersionRecord { a: 1, b: 1023, vnum: 1 });
        history.push_front(VersionRecord { a: 5, b: 1019, vnum: 5 });
        history.push_front(VersionRecord { a: 9, b: 1015, vnum: 9 });

        // Target is active producing version 5: read its newest record
        // strictly older than 5.
        let view = [ActiveEntry { participant: 3, vnum: 5 }];
        let record = resolve_read(&history, &view, 3, 12).unwrap();
        assert_eq!(record.vnum, 1);
    }

    #[test]
    fn test_resolve_read_falls_back_to_own_vnum() {
        let history = PublishList::new();
        history.push_front(VersionRecord { a: 1, b: 1023, vnum: 1 });
        history.push_front(VersionRecord { a: 9, b: 1015, vnum: 9 });

        // Target not in view: bound is the reader's new version number.
        let record = resolve_read(&history, &[], 3, 5).unwrap();
        assert_eq!(record.vnum, 1);

        let record = resolve_read(&history, &[], 3, 10).unwrap();
        assert_eq!(record.vnum, 9);
    }

    #[test]
    fn test_resolve_read_missing_version() {
        let history = PublishList::new();
        history.push_front(VersionRecord { a: 1, b: 1023, vnum: 4 });

        let err = resolve_read(&history, &[], 2, 4).unwrap_err();
        assert_eq!(
            err,
            MvccError::MissingVersion {
                participant: 2,
                bound: 4
            }
        );
    }

    #[test]
    fn test_pick_peer_never_picks_self() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(99);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let peer = pick_peer(&mut rng, 4, 2);
            assert_ne!(peer, 2);
            seen[peer] = true;
        }
        assert!(seen[0] && seen[1] && seen[3], "All peers must be reachable");
    }

    #[test]
    fn test_short_verified_run_preserves_invariant() {
        let engine = MvccEngine::new(test_config(4, 300, true)).unwrap();
        let report = engine.run();

        assert!(report.errors.is_empty(), "verify run failed: {:?}", report.errors);
        assert!(report.updates.iter().sum::<u64>() > 0);

        for history in engine.histories() {
            for record in history.iter() {
                assert_eq!(record.a + record.b, DATA_TOTAL);
            }
        }

        // Cooperative shutdown completes in-flight updates, so the active
        // list drains before the workers are joined.
        assert!(engine.active_entries().is_empty());
    }

    #[test]
    fn test_run_with_eight_participants_under_verify() {
        let engine = MvccEngine::new(test_config(8, 300, true)).unwrap();
        let report = engine.run();

        assert!(report.errors.is_empty());
        let stats = report.stats();
        assert!(stats.fairness() > 0.0 && stats.fairness() <= 1.0 + 1e-9);
    }
}
