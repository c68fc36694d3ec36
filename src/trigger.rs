use std::collections::HashMap;

/// An acquisition trigger: every raw hit is read out by exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trigger {
    pub id: u64,
    /// Nanoseconds.
    pub time: u64,
}

/// Trigger identifier to trigger time lookup.
///
/// Triggers added with [`TriggerTable::insert`] are indexed. Triggers added
/// with [`TriggerTable::append`] (e.g. from a file chained after the index was
/// built) are only found by a linear scan until [`TriggerTable::build_index`]
/// is called.
#[derive(Clone, Debug, Default)]
pub struct TriggerTable {
    entries: Vec<Trigger>,
    index: HashMap<u64, usize>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds an indexed trigger. The first trigger with a given identifier
    /// wins the index slot.
    pub fn insert(&mut self, trigger: Trigger) {
        self.index.entry(trigger.id).or_insert(self.entries.len());
        self.entries.push(trigger);
    }
    /// Adds a trigger without indexing it.
    pub fn append(&mut self, trigger: Trigger) {
        self.entries.push(trigger);
    }
    /// Index every trigger in the table.
    pub fn build_index(&mut self) {
        self.index.clear();
        for (n, trigger) in self.entries.iter().enumerate() {
            self.index.entry(trigger.id).or_insert(n);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    /// Returns the time of the trigger with the given identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use evb::trigger::{Trigger, TriggerTable};
    ///
    /// let mut table = TriggerTable::new();
    /// table.append(Trigger { id: 7, time: 1000 });
    /// assert_eq!(table.find(7), Some(1000));
    /// assert_eq!(table.find(8), None);
    /// ```
    pub fn find(&self, id: u64) -> Option<u64> {
        if let Some(&n) = self.index.get(&id) {
            return Some(self.entries[n].time);
        }
        log::debug!("trigger {id} not found by index, looking up manually");

        self.entries.iter().find(|t| t.id == id).map(|t| t.time)
    }
}

impl FromIterator<Trigger> for TriggerTable {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Trigger>,
    {
        let mut table = Self::new();
        for trigger in iter {
            table.insert(trigger);
        }

        table
    }
}
