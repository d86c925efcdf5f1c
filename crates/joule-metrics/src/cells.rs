//! Per-node gauge cells and the fixed-shape tables that hold them.
//!
//! Tables are constructed once at boot and never grow or shrink afterwards;
//! each cell carries its own interior mutability so owner strategies and the
//! API can write concurrently without touching the map itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use prometheus_client::metrics::gauge::Gauge;

/// A node's CPU utilization target (percent) plus its backing gauge.
///
/// The gauge is updated before the in-memory value so an observer scraping
/// mid-mutation sees the new target.
#[derive(Debug)]
pub struct TargetCell {
    value: RwLock<f64>,
    gauge: Gauge<f64, AtomicU64>,
}

impl TargetCell {
    pub(crate) fn new(gauge: Gauge<f64, AtomicU64>, initial: f64) -> Self {
        gauge.set(initial);
        Self {
            value: RwLock::new(initial),
            gauge,
        }
    }

    /// Sets the target, reflecting it in the exported gauge.
    pub fn set(&self, target: f64) {
        self.gauge.set(target);
        *self.value.write() = target;
    }

    /// Returns the current target percentage.
    #[must_use]
    pub fn get(&self) -> f64 {
        *self.value.read()
    }
}

/// A node's schedulable flag plus its backing 0/1 gauge.
#[derive(Debug)]
pub struct SchedulableCell {
    value: AtomicBool,
    gauge: Gauge,
}

impl SchedulableCell {
    pub(crate) fn new(gauge: Gauge, initial: bool) -> Self {
        gauge.set(i64::from(initial));
        Self {
            value: AtomicBool::new(initial),
            gauge,
        }
    }

    /// Sets the flag, reflecting it in the exported gauge.
    pub fn set(&self, schedulable: bool) {
        self.gauge.set(i64::from(schedulable));
        self.value.store(schedulable, Ordering::SeqCst);
    }

    /// Returns the current flag.
    #[must_use]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }
}

/// Per-node target cells, keyed by node name. Fixed shape after boot.
#[derive(Debug, Default)]
pub struct TargetTable {
    cells: HashMap<String, TargetCell>,
}

impl TargetTable {
    pub(crate) fn new(cells: HashMap<String, TargetCell>) -> Self {
        Self { cells }
    }

    /// Looks up the cell for a node.
    #[must_use]
    pub fn get(&self, node: &str) -> Option<&TargetCell> {
        self.cells.get(node)
    }

    /// Whether a node is known to the table.
    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        self.cells.contains_key(node)
    }

    /// Iterates over (node, cell) pairs. Iteration order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TargetCell)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over node names.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// An arbitrary node usable for percent/quantity conversions when no
    /// concrete node has been decided yet. Assumes homogeneous core counts.
    #[must_use]
    pub fn representative_node(&self) -> Option<&str> {
        self.cells.keys().next().map(String::as_str)
    }

    /// Number of configured nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Per-node schedulable cells, keyed by node name. Fixed shape after boot.
#[derive(Debug, Default)]
pub struct SchedulableTable {
    cells: HashMap<String, SchedulableCell>,
}

impl SchedulableTable {
    pub(crate) fn new(cells: HashMap<String, SchedulableCell>) -> Self {
        Self { cells }
    }

    /// Looks up the cell for a node.
    #[must_use]
    pub fn get(&self, node: &str) -> Option<&SchedulableCell> {
        self.cells.get(node)
    }

    /// Iterates over (node, cell) pairs. Iteration order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchedulableCell)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the name of the currently schedulable node, if any.
    #[must_use]
    pub fn find_schedulable(&self) -> Option<&str> {
        self.cells
            .iter()
            .find(|(_, cell)| cell.get())
            .map(|(node, _)| node.as_str())
    }

    /// Counts nodes currently marked schedulable.
    #[must_use]
    pub fn schedulable_count(&self) -> usize {
        self.cells.values().filter(|cell| cell.get()).count()
    }

    /// Sets every node's flag, e.g. to fail open when the selector stops.
    pub fn set_all(&self, schedulable: bool) {
        for cell in self.cells.values() {
            cell.set(schedulable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_cell(initial: f64) -> TargetCell {
        TargetCell::new(Gauge::<f64, AtomicU64>::default(), initial)
    }

    fn schedulable_cell(initial: bool) -> SchedulableCell {
        SchedulableCell::new(Gauge::default(), initial)
    }

    mod target_cell_tests {
        use super::*;

        #[test]
        fn set_updates_value_and_gauge() {
            let gauge = Gauge::<f64, AtomicU64>::default();
            let cell = TargetCell::new(gauge.clone(), 80.0);
            assert!((cell.get() - 80.0).abs() < f64::EPSILON);
            assert!((gauge.get() - 80.0).abs() < f64::EPSILON);

            cell.set(60.0);
            assert!((cell.get() - 60.0).abs() < f64::EPSILON);
            assert!((gauge.get() - 60.0).abs() < f64::EPSILON);
        }
    }

    mod schedulable_cell_tests {
        use super::*;

        #[test]
        fn set_updates_value_and_gauge() {
            let gauge = Gauge::default();
            let cell = SchedulableCell::new(gauge.clone(), false);
            assert!(!cell.get());
            assert_eq!(gauge.get(), 0);

            cell.set(true);
            assert!(cell.get());
            assert_eq!(gauge.get(), 1);

            cell.set(false);
            assert!(!cell.get());
            assert_eq!(gauge.get(), 0);
        }
    }

    mod table_tests {
        use super::*;

        fn make_schedulable_table(nodes: &[&str]) -> SchedulableTable {
            let cells = nodes
                .iter()
                .map(|n| ((*n).to_string(), schedulable_cell(false)))
                .collect();
            SchedulableTable::new(cells)
        }

        #[test]
        fn find_schedulable_none_when_all_false() {
            let table = make_schedulable_table(&["node-a", "node-b"]);
            assert!(table.find_schedulable().is_none());
            assert_eq!(table.schedulable_count(), 0);
        }

        #[test]
        fn find_schedulable_returns_marked_node() {
            let table = make_schedulable_table(&["node-a", "node-b"]);
            table.get("node-b").unwrap().set(true);

            assert_eq!(table.find_schedulable(), Some("node-b"));
            assert_eq!(table.schedulable_count(), 1);
        }

        #[test]
        fn set_all_flips_every_cell() {
            let table = make_schedulable_table(&["node-a", "node-b", "node-c"]);
            table.set_all(true);
            assert_eq!(table.schedulable_count(), 3);

            table.set_all(false);
            assert_eq!(table.schedulable_count(), 0);
        }

        #[test]
        fn target_table_lookup() {
            let mut cells = HashMap::new();
            cells.insert("node-a".to_string(), target_cell(80.0));
            let table = TargetTable::new(cells);

            assert!(table.contains("node-a"));
            assert!(!table.contains("node-z"));
            assert_eq!(table.representative_node(), Some("node-a"));
            assert_eq!(table.len(), 1);
        }
    }
}
