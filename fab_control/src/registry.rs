//! Station ownership registry.
//!
//! The registry is the only state shared between lines. Every station
//! entry sits behind one lock so a claim checks and takes a station (and
//! its sibling group) in a single step.
//!
//! | Invariant                                   |
//! |---------------------------------------------|
//! | `status == Free` ⇔ `owner == None`          |
//! | at most one owner per station group         |
//!
//! Stations sharing a `group` are modes of one physical station: when one
//! of them is taken the others turn `Blocked` for the same line.

use crate::config::StationConfig;
use fab_common::error::{FactoryError, FactoryResult};
use fab_common::station::{LineId, StationId, StationSnapshot, StationStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// The line now owns the station.
    Claimed,
    /// The station or a sibling is owned by another line.
    Rejected {
        /// Station holding up the claim.
        station: StationId,
        /// Line that owns it.
        held_by: LineId,
    },
}

impl ClaimResult {
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

#[derive(Debug, Clone, Default)]
struct Entry {
    status: StationStatus,
    owner: Option<LineId>,
    group: Option<String>,
}

impl Entry {
    fn set(&mut self, status: StationStatus, line: &LineId) {
        self.status = status;
        self.owner = status.is_held().then(|| line.clone());
    }

    fn is_available_to(&self, line: &LineId) -> bool {
        self.owner.as_ref().is_none_or(|owner| owner == line)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<StationId, Entry>,
    groups: BTreeMap<String, Vec<StationId>>,
}

impl Inner {
    fn entry(&self, station: &StationId) -> FactoryResult<&Entry> {
        self.entries
            .get(station)
            .ok_or_else(|| FactoryError::Config(format!("unknown station {station}")))
    }

    fn siblings(&self, station: &StationId) -> Vec<StationId> {
        let group = self.entries.get(station).and_then(|e| e.group.as_ref());
        group
            .and_then(|g| self.groups.get(g))
            .map(|members| members.iter().filter(|s| *s != station).cloned().collect())
            .unwrap_or_default()
    }

    /// First station of the group owned by another line.
    fn blocker(&self, station: &StationId, line: &LineId) -> FactoryResult<Option<(StationId, LineId)>> {
        let entry = self.entry(station)?;
        if let Some(owner) = entry.owner.as_ref().filter(|o| *o != line) {
            return Ok(Some((station.clone(), owner.clone())));
        }
        for sibling in self.siblings(station) {
            let e = self.entry(&sibling)?;
            if let Some(owner) = e.owner.as_ref().filter(|o| *o != line) {
                return Ok(Some((sibling, owner.clone())));
            }
        }
        Ok(None)
    }

    fn apply(&mut self, station: &StationId, status: StationStatus, line: &LineId) {
        let siblings = self.siblings(station);
        if let Some(entry) = self.entries.get_mut(station) {
            entry.set(status, line);
        }
        let cascade = if status.is_held() {
            StationStatus::Blocked
        } else {
            StationStatus::Free
        };
        for sibling in siblings {
            if let Some(e) = self.entries.get_mut(&sibling) {
                if e.is_available_to(line) {
                    e.set(cascade, line);
                }
            }
        }
    }

    fn expand_groups(&self, stations: &[StationId]) -> BTreeSet<StationId> {
        let mut out: BTreeSet<StationId> = stations.iter().cloned().collect();
        for s in stations {
            out.extend(self.siblings(s));
        }
        out
    }
}

/// Shared station registry.
#[derive(Debug, Default)]
pub struct StationRegistry {
    inner: Mutex<Inner>,
}

impl StationRegistry {
    /// Registry with every configured station `Free`.
    pub fn new(stations: &[StationConfig]) -> Self {
        let mut inner = Inner::default();
        for s in stations {
            inner.entries.insert(
                s.name.clone(),
                Entry {
                    group: s.group.clone(),
                    ..Entry::default()
                },
            );
            if let Some(group) = &s.group {
                inner
                    .groups
                    .entry(group.clone())
                    .or_default()
                    .push(s.name.clone());
            }
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn contains(&self, station: &StationId) -> bool {
        self.inner.lock().entries.contains_key(station)
    }

    /// Claim `station` for `line` with `status`, if it and its group are
    /// free or already owned by `line`.
    pub fn try_claim(
        &self,
        station: &StationId,
        line: &LineId,
        status: StationStatus,
    ) -> FactoryResult<ClaimResult> {
        let mut inner = self.inner.lock();
        if let Some((station, held_by)) = inner.blocker(station, line)? {
            debug!("{line}: {station} held by {held_by}");
            return Ok(ClaimResult::Rejected { station, held_by });
        }
        inner.apply(station, status, line);
        info!("{line}: claimed {station} ({status})");
        Ok(ClaimResult::Claimed)
    }

    /// Whether `line` could claim `station` now.
    pub fn is_claimable(&self, station: &StationId, line: &LineId) -> bool {
        matches!(self.inner.lock().blocker(station, line), Ok(None))
    }

    /// Set the status of a station owned by (or free for) `line`.
    ///
    /// `Free` clears the owner. Siblings not owned by another line follow
    /// as `Blocked` or `Free`.
    pub fn switch_status(
        &self,
        station: &StationId,
        status: StationStatus,
        line: &LineId,
    ) -> FactoryResult<()> {
        let mut inner = self.inner.lock();
        let previous = inner.entry(station)?.status;
        let blocker = if status.is_held() {
            inner.blocker(station, line)?
        } else {
            let owner = inner.entry(station)?.owner.clone();
            owner.filter(|o| o != line).map(|o| (station.clone(), o))
        };
        if let Some((held, owner)) = blocker {
            return Err(FactoryError::StationBusy {
                station: held.to_string(),
                owner: owner.to_string(),
            });
        }
        inner.apply(station, status, line);
        if previous != status {
            info!("{line}: {station} {previous} -> {status}");
        }
        Ok(())
    }

    /// Free `station` if `line` owns it.
    pub fn release(&self, station: &StationId, line: &LineId) {
        let mut inner = self.inner.lock();
        let owned = inner
            .entries
            .get(station)
            .is_some_and(|e| e.owner.as_ref() == Some(line));
        if owned {
            inner.apply(station, StationStatus::Free, line);
            info!("{line}: released {station}");
        }
    }

    /// Free every station owned by `line`, except `keep_blocked` (and
    /// their siblings), which stay owned as `Blocked`.
    pub fn release_line(&self, line: &LineId, keep_blocked: &[StationId]) {
        let mut inner = self.inner.lock();
        let keep = inner.expand_groups(keep_blocked);
        for (id, entry) in inner.entries.iter_mut() {
            if entry.owner.as_ref() != Some(line) {
                continue;
            }
            if keep.contains(id) {
                entry.set(StationStatus::Blocked, line);
            } else {
                entry.set(StationStatus::Free, line);
            }
        }
        info!(
            "{line}: released its stations, {} kept blocked",
            keep.len()
        );
    }

    pub fn status(&self, station: &StationId) -> Option<StationStatus> {
        self.inner.lock().entries.get(station).map(|e| e.status)
    }

    pub fn owner(&self, station: &StationId) -> Option<LineId> {
        self.inner
            .lock()
            .entries
            .get(station)
            .and_then(|e| e.owner.clone())
    }

    /// Stations currently owned by `line`.
    pub fn owned_by(&self, line: &LineId) -> Vec<StationId> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| e.owner.as_ref() == Some(line))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// All stations, in name order.
    pub fn snapshot(&self) -> Vec<StationSnapshot> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(id, e)| StationSnapshot {
                id: id.clone(),
                status: e.status,
                owner: e.owner.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn station(name: &str, group: Option<&str>) -> StationConfig {
        StationConfig {
            name: StationId::from(name),
            group: group.map(str::to_string),
        }
    }

    fn registry() -> StationRegistry {
        StationRegistry::new(&[
            station("CB1", None),
            station("CB3", None),
            station("GR2_TO_PM", Some("GR2")),
            station("GR2_TO_CB3", Some("GR2")),
        ])
    }

    fn id(s: &str) -> StationId {
        StationId::from(s)
    }

    #[test]
    fn claim_is_exclusive() {
        let reg = registry();
        let (a, b) = (LineId::from("left"), LineId::from("right"));
        assert!(reg.try_claim(&id("CB1"), &a, StationStatus::Running).unwrap().is_claimed());
        // Re-claiming an owned station is allowed.
        assert!(reg.try_claim(&id("CB1"), &a, StationStatus::Waiting).unwrap().is_claimed());
        assert_eq!(
            reg.try_claim(&id("CB1"), &b, StationStatus::Running).unwrap(),
            ClaimResult::Rejected {
                station: id("CB1"),
                held_by: a.clone()
            }
        );
        assert_eq!(reg.status(&id("CB1")), Some(StationStatus::Waiting));
        assert!(!reg.is_claimable(&id("CB1"), &b));
        assert!(reg.is_claimable(&id("CB3"), &b));
    }

    #[test]
    fn siblings_follow_the_claimed_station() {
        let reg = registry();
        let (a, b) = (LineId::from("left"), LineId::from("right"));
        reg.try_claim(&id("GR2_TO_PM"), &a, StationStatus::Running).unwrap();
        assert_eq!(reg.status(&id("GR2_TO_CB3")), Some(StationStatus::Blocked));
        assert_eq!(reg.owner(&id("GR2_TO_CB3")), Some(a.clone()));

        let rejected = reg
            .try_claim(&id("GR2_TO_CB3"), &b, StationStatus::Running)
            .unwrap();
        assert!(!rejected.is_claimed());

        // The owner may switch modes within the group.
        reg.try_claim(&id("GR2_TO_CB3"), &a, StationStatus::Running).unwrap();
        assert_eq!(reg.status(&id("GR2_TO_PM")), Some(StationStatus::Blocked));

        reg.release(&id("GR2_TO_CB3"), &a);
        assert_eq!(reg.status(&id("GR2_TO_PM")), Some(StationStatus::Free));
        assert!(reg.try_claim(&id("GR2_TO_PM"), &b, StationStatus::Running).unwrap().is_claimed());
    }

    #[test]
    fn switch_status_rejects_foreign_stations() {
        let reg = registry();
        let (a, b) = (LineId::from("left"), LineId::from("right"));
        reg.switch_status(&id("CB3"), StationStatus::Running, &a).unwrap();
        let err = reg
            .switch_status(&id("CB3"), StationStatus::Free, &b)
            .unwrap_err();
        assert_eq!(
            err,
            FactoryError::StationBusy {
                station: "CB3".into(),
                owner: "left".into()
            }
        );
        reg.switch_status(&id("CB3"), StationStatus::Problem, &a).unwrap();
        assert_eq!(reg.status(&id("CB3")), Some(StationStatus::Problem));
        assert!(matches!(
            reg.switch_status(&id("CB9"), StationStatus::Running, &a),
            Err(FactoryError::Config(_))
        ));
    }

    #[test]
    fn release_line_keeps_requested_groups_blocked() {
        let reg = registry();
        let (a, b) = (LineId::from("left"), LineId::from("right"));
        for s in ["CB1", "CB3", "GR2_TO_PM"] {
            reg.try_claim(&id(s), &a, StationStatus::Running).unwrap();
        }
        reg.try_claim(&id("GR2_TO_PM"), &a, StationStatus::Running).unwrap();
        reg.release(&id("GR2_TO_PM"), &b);
        assert_eq!(reg.owner(&id("GR2_TO_PM")), Some(a.clone()));

        reg.release_line(&a, &[id("GR2_TO_PM")]);
        assert_eq!(reg.status(&id("CB1")), Some(StationStatus::Free));
        assert_eq!(reg.owner(&id("CB3")), None);
        assert_eq!(reg.status(&id("GR2_TO_PM")), Some(StationStatus::Blocked));
        assert_eq!(reg.status(&id("GR2_TO_CB3")), Some(StationStatus::Blocked));
        assert_eq!(reg.owned_by(&a), vec![id("GR2_TO_CB3"), id("GR2_TO_PM")]);
        assert_eq!(reg.snapshot().len(), 4);
    }

    #[test]
    fn concurrent_claims_never_overlap() {
        let reg = Arc::new(registry());
        let holders = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = ["left", "right", "third"]
            .into_iter()
            .map(|name| {
                let reg = Arc::clone(&reg);
                let holders = Arc::clone(&holders);
                let violations = Arc::clone(&violations);
                std::thread::spawn(move || {
                    let line = LineId::from(name);
                    for _ in 0..500 {
                        let claimed = reg
                            .try_claim(&id("GR2_TO_PM"), &line, StationStatus::Running)
                            .unwrap()
                            .is_claimed();
                        if claimed {
                            if holders.fetch_add(1, Ordering::SeqCst) != 0 {
                                violations.fetch_add(1, Ordering::SeqCst);
                            }
                            std::thread::yield_now();
                            holders.fetch_sub(1, Ordering::SeqCst);
                            reg.release(&id("GR2_TO_PM"), &line);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(reg.status(&id("GR2_TO_CB3")), Some(StationStatus::Free));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Claim(usize, usize, StationStatus),
        Switch(usize, usize, StationStatus),
        Release(usize, usize),
        ReleaseLine(usize, Option<usize>),
    }

    const STATIONS: [&str; 4] = ["CB1", "CB3", "GR2_TO_PM", "GR2_TO_CB3"];
    const LINES: [&str; 3] = ["a", "b", "c"];

    fn status() -> impl Strategy<Value = StationStatus> {
        prop_oneof![
            Just(StationStatus::Free),
            Just(StationStatus::Running),
            Just(StationStatus::Blocked),
            Just(StationStatus::Waiting),
            Just(StationStatus::Problem),
            Just(StationStatus::Error),
        ]
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 0..4usize, status()).prop_map(|(l, s, st)| Op::Claim(l, s, st)),
            (0..3usize, 0..4usize, status()).prop_map(|(l, s, st)| Op::Switch(l, s, st)),
            (0..3usize, 0..4usize).prop_map(|(l, s)| Op::Release(l, s)),
            (0..3usize, proptest::option::of(0..4usize)).prop_map(|(l, k)| Op::ReleaseLine(l, k)),
        ]
    }

    proptest! {
        #[test]
        fn ownership_invariants_hold(ops in proptest::collection::vec(op(), 1..60)) {
            let reg = registry();
            for op in ops {
                match op {
                    Op::Claim(l, s, st) => {
                        reg.try_claim(&id(STATIONS[s]), &LineId::from(LINES[l]), st).unwrap();
                    }
                    Op::Switch(l, s, st) => {
                        let _ = reg.switch_status(&id(STATIONS[s]), st, &LineId::from(LINES[l]));
                    }
                    Op::Release(l, s) => reg.release(&id(STATIONS[s]), &LineId::from(LINES[l])),
                    Op::ReleaseLine(l, keep) => {
                        let keep: Vec<StationId> = keep.map(|k| id(STATIONS[k])).into_iter().collect();
                        reg.release_line(&LineId::from(LINES[l]), &keep);
                    }
                }

                let snap = reg.snapshot();
                for s in &snap {
                    prop_assert_eq!(s.status == StationStatus::Free, s.owner.is_none());
                }
                let group_owners: BTreeSet<LineId> = snap
                    .iter()
                    .filter(|s| s.id.as_str().starts_with("GR2_"))
                    .filter_map(|s| s.owner.clone())
                    .collect();
                prop_assert!(group_owners.len() <= 1);
            }
        }
    }
}
