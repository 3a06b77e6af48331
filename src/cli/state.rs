//! Shared connection list with sort and filter applied.
//!
//! The poller and the UI both mutate this state. Every mutation re-sorts
//! (when the sort spec or the master list changes) and re-filters under the
//! same write guard, so `read()` never observes a half-derived view.

use std::cmp::Ordering;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cli::types::{ConnectionRecord, SortColumn, SortDirection};

#[derive(Debug, Default)]
struct Inner {
    master: Arc<Vec<ConnectionRecord>>,
    filtered: Arc<Vec<ConnectionRecord>>,
    filter: String,
    sort_column: SortColumn,
    direction: SortDirection,
}

impl Inner {
    fn apply_sort(&mut self) {
        let column = self.sort_column;
        if column == SortColumn::None {
            return;
        }
        let direction = self.direction;
        // slice::sort_by is stable: equal keys keep their previous order.
        Arc::make_mut(&mut self.master).sort_by(|a, b| {
            let ord = compare(a, b, column);
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
    }

    fn apply_filter(&mut self) {
        let needle = self.filter.to_lowercase();
        if needle.is_empty() {
            self.filtered = Arc::clone(&self.master);
            return;
        }
        let matched = self
            .master
            .iter()
            .filter(|c| c.searchable().contains(&needle))
            .cloned()
            .collect();
        self.filtered = Arc::new(matched);
    }
}

fn compare(a: &ConnectionRecord, b: &ConnectionRecord, column: SortColumn) -> Ordering {
    match column {
        SortColumn::None => Ordering::Equal,
        SortColumn::ProcessName => a.process_name.to_lowercase().cmp(&b.process_name.to_lowercase()),
        SortColumn::Pid => a.pid.cmp(&b.pid),
        SortColumn::Status => a.status.cmp(&b.status),
        SortColumn::Family => a.family.label().cmp(b.family.label()),
        SortColumn::Kind => a.kind.label().cmp(b.kind.label()),
        SortColumn::LocalAddr => a.local_addr.cmp(&b.local_addr),
        SortColumn::RemoteAddr => a.remote_addr.cmp(&b.remote_addr),
    }
}

/// Current sort and filter settings, for rendering headers and status lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewSpec {
    pub filter: String,
    pub sort_column: SortColumn,
    pub direction: SortDirection,
    pub total: usize,
    pub visible: usize,
}

/// Canonical connection list plus its derived, filtered view.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct ViewState {
    inner: Arc<RwLock<Inner>>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec(filter: &str, column: SortColumn, direction: SortDirection) -> Self {
        let state = Self::new();
        {
            let mut w = state.write();
            w.filter = filter.to_string();
            w.sort_column = column;
            w.direction = direction;
        }
        state
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs a freshly polled master list, then re-sorts and re-filters it.
    pub fn replace_all(&self, records: Vec<ConnectionRecord>) {
        let mut w = self.write();
        w.master = Arc::new(records);
        w.apply_sort();
        w.apply_filter();
    }

    pub fn set_filter(&self, text: &str) {
        let mut w = self.write();
        w.filter = text.to_string();
        w.apply_filter();
    }

    pub fn set_sort(&self, column: SortColumn, direction: SortDirection) {
        let mut w = self.write();
        w.sort_column = column;
        w.direction = direction;
        w.apply_sort();
        w.apply_filter();
    }

    /// Advances to the next sort column and resets the direction to ascending.
    pub fn cycle_sort_column(&self) -> SortColumn {
        let mut w = self.write();
        w.sort_column = w.sort_column.next();
        w.direction = SortDirection::Ascending;
        w.apply_sort();
        w.apply_filter();
        w.sort_column
    }

    pub fn toggle_sort_direction(&self) -> SortDirection {
        let mut w = self.write();
        w.direction = w.direction.toggled();
        w.apply_sort();
        w.apply_filter();
        w.direction
    }

    /// Snapshot of the filtered view. Later mutations never change it.
    pub fn read(&self) -> Arc<Vec<ConnectionRecord>> {
        Arc::clone(&self.read_guard().filtered)
    }

    pub fn spec(&self) -> ViewSpec {
        let r = self.read_guard();
        ViewSpec {
            filter: r.filter.clone(),
            sort_column: r.sort_column,
            direction: r.direction,
            total: r.master.len(),
            visible: r.filtered.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::types::{AddressFamily, SocketKind};
    use std::thread;

    fn rec(name: &str, pid: u32) -> ConnectionRecord {
        ConnectionRecord {
            process_name: name.into(),
            pid,
            status: "ESTABLISHED".into(),
            family: AddressFamily::IPv4,
            kind: SocketKind::Tcp,
            local_addr: format!("127.0.0.1:{}", 1000 + pid),
            remote_addr: format!("10.0.0.{}:443", pid),
            ..Default::default()
        }
    }

    impl ViewState {
        fn master(&self) -> Arc<Vec<ConnectionRecord>> {
            Arc::clone(&self.read_guard().master)
        }
    }

    fn is_subsequence(sub: &[ConnectionRecord], full: &[ConnectionRecord]) -> bool {
        let mut it = full.iter();
        sub.iter().all(|s| it.any(|f| f == s))
    }

    #[test]
    fn test_sort_by_pid_then_filter_scenario() {
        let bare = |name: &str, pid: u32| ConnectionRecord { process_name: name.into(), pid, ..Default::default() };
        let state = ViewState::new();
        state.replace_all(vec![bare("a", 5), bare("b", 2)]);
        state.set_sort(SortColumn::Pid, SortDirection::Ascending);

        let pids: Vec<u32> = state.read().iter().map(|c| c.pid).collect();
        assert_eq!(pids, vec![2, 5]);

        state.set_filter("a");
        let view = state.read();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].process_name, "a");
        assert_eq!(view[0].pid, 5);
    }

    #[test]
    fn test_empty_filter_shares_master() {
        let state = ViewState::new();
        state.replace_all(vec![rec("x", 1), rec("y", 2)]);
        assert!(Arc::ptr_eq(&state.read(), &state.master()));
    }

    #[test]
    fn test_filter_is_case_insensitive_substring() {
        let state = ViewState::new();
        state.replace_all(vec![rec("Chrome", 3), rec("sshd", 22), rec("chromium", 9), rec("nginx", 80)]);
        state.set_filter("CHROM");

        let view = state.read();
        let names: Vec<&str> = view.iter().map(|c| c.process_name.as_str()).collect();
        assert_eq!(names, vec!["Chrome", "chromium"]);
        assert!(is_subsequence(&view, &state.master()));
    }

    #[test]
    fn test_filter_matches_endpoints_and_status() {
        let state = ViewState::new();
        let mut listen = rec("postgres", 7);
        listen.status = "LISTEN".into();
        state.replace_all(vec![rec("a", 1), listen]);

        state.set_filter("listen");
        assert_eq!(state.read().len(), 1);

        state.set_filter("10.0.0.1:443");
        assert_eq!(state.read()[0].pid, 1);

        state.set_filter("no-such-thing");
        assert!(state.read().is_empty());
    }

    #[test]
    fn test_set_filter_idempotent() {
        let state = ViewState::new();
        state.replace_all(vec![rec("alpha", 1), rec("beta", 2), rec("gamma", 3)]);
        state.set_filter("a");
        let first = state.read();
        state.set_filter("a");
        let second = state.read();
        assert_eq!(*first, *second);
    }

    #[test]
    fn test_stable_sort_keeps_tie_order() {
        let state = ViewState::new();
        let mut records = Vec::new();
        for (i, name) in ["same", "other", "same", "same", "other"].iter().enumerate() {
            let mut r = rec(name, 100 + i as u32);
            r.status = "ESTABLISHED".into();
            records.push(r);
        }
        state.replace_all(records);

        state.set_sort(SortColumn::ProcessName, SortDirection::Ascending);
        let pids: Vec<u32> = state.read().iter().map(|c| c.pid).collect();
        assert_eq!(pids, vec![101, 104, 100, 102, 103]);

        // All statuses are equal, so sorting by status keeps the current order.
        state.set_sort(SortColumn::Status, SortDirection::Ascending);
        let again: Vec<u32> = state.read().iter().map(|c| c.pid).collect();
        assert_eq!(again, pids);
    }

    #[test]
    fn test_descending_sort_keeps_tie_order() {
        let state = ViewState::new();
        let records = [("web", 7), ("db", 1), ("web", 3), ("cache", 9), ("db", 4), ("web", 5)]
            .iter()
            .map(|(name, pid)| rec(name, *pid))
            .collect();
        state.replace_all(records);

        state.set_sort(SortColumn::ProcessName, SortDirection::Descending);
        let order: Vec<(String, u32)> = state.read().iter().map(|c| (c.process_name.clone(), c.pid)).collect();
        let expected = [("web", 7), ("web", 3), ("web", 5), ("db", 1), ("db", 4), ("cache", 9)];
        let expected: Vec<(String, u32)> = expected.iter().map(|(n, p)| (n.to_string(), *p)).collect();
        assert_eq!(order, expected);

        // Every status is equal, so a descending status sort must not reorder anything.
        state.set_sort(SortColumn::Status, SortDirection::Descending);
        let again: Vec<(String, u32)> = state.read().iter().map(|c| (c.process_name.clone(), c.pid)).collect();
        assert_eq!(again, expected);

        // Toggling back and forth on a fully tied column is a no-op too.
        state.toggle_sort_direction();
        state.toggle_sort_direction();
        let toggled: Vec<u32> = state.read().iter().map(|c| c.pid).collect();
        assert_eq!(toggled, vec![7, 3, 5, 1, 4, 9]);
    }

    #[test]
    fn test_descending_and_toggle() {
        let state = ViewState::new();
        state.replace_all(vec![rec("a", 3), rec("b", 1), rec("c", 2)]);
        state.set_sort(SortColumn::Pid, SortDirection::Descending);
        let pids: Vec<u32> = state.read().iter().map(|c| c.pid).collect();
        assert_eq!(pids, vec![3, 2, 1]);

        assert_eq!(state.toggle_sort_direction(), SortDirection::Ascending);
        let pids: Vec<u32> = state.read().iter().map(|c| c.pid).collect();
        assert_eq!(pids, vec![1, 2, 3]);
    }

    #[test]
    fn test_process_name_sort_ignores_case() {
        let state = ViewState::new();
        state.replace_all(vec![rec("beta", 1), rec("Alpha", 2), rec("gamma", 3)]);
        state.set_sort(SortColumn::ProcessName, SortDirection::Ascending);
        let names: Vec<String> = state.read().iter().map(|c| c.process_name.clone()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_cycle_visits_eight_states_and_resets_direction() {
        let state = ViewState::new();
        let mut seen = vec![state.spec().sort_column];
        for _ in 0..8 {
            state.toggle_sort_direction();
            let col = state.cycle_sort_column();
            assert_eq!(state.spec().direction, SortDirection::Ascending);
            seen.push(col);
        }
        assert_eq!(seen[0], SortColumn::None);
        assert_eq!(seen[8], SortColumn::None);
        let distinct: std::collections::HashSet<_> = seen[..8].iter().collect();
        assert_eq!(distinct.len(), 8);
    }

    #[test]
    fn test_replace_all_reapplies_sort_and_filter() {
        let state = ViewState::with_spec("web", SortColumn::Pid, SortDirection::Descending);
        state.replace_all(vec![rec("web", 1), rec("db", 2), rec("web", 3)]);
        let pids: Vec<u32> = state.read().iter().map(|c| c.pid).collect();
        assert_eq!(pids, vec![3, 1]);

        state.replace_all(vec![rec("web", 10), rec("web", 30), rec("web", 20)]);
        let pids: Vec<u32> = state.read().iter().map(|c| c.pid).collect();
        assert_eq!(pids, vec![30, 20, 10]);

        let spec = state.spec();
        assert_eq!(spec.total, 3);
        assert_eq!(spec.visible, 3);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_mutation() {
        let state = ViewState::new();
        state.replace_all(vec![rec("b", 2), rec("a", 1)]);
        let before = state.read();
        state.set_sort(SortColumn::Pid, SortDirection::Ascending);
        state.replace_all(vec![]);
        assert_eq!(before.len(), 2);
        assert_eq!(before[0].pid, 2);
    }

    #[test]
    fn test_concurrent_writers_never_expose_unfiltered_view() {
        let state = ViewState::with_spec("keep", SortColumn::Pid, SortDirection::Ascending);
        let writer = {
            let state = state.clone();
            thread::spawn(move || {
                for round in 0..200u32 {
                    let records = (0..20).map(|i| rec(if i % 2 == 0 { "keep" } else { "drop" }, round * 100 + i)).collect();
                    state.replace_all(records);
                }
            })
        };
        let sorter = {
            let state = state.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    state.toggle_sort_direction();
                }
            })
        };
        for _ in 0..500 {
            let view = state.read();
            assert!(view.iter().all(|c| c.process_name == "keep"));
        }
        writer.join().unwrap();
        sorter.join().unwrap();
        assert_eq!(state.read().len(), 10);
    }
}
