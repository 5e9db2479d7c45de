use std::collections::hash_map::{self, HashMap};
use std::hash::{Hash, Hasher};
use serde::{Serialize, Serializer};

/// Key under which timings are aggregated.
///
/// Two identities are the same metric when `name` and `scope` match; the
/// description and captured backtrace ride along with whichever identity was
/// inserted first.
#[derive(Debug, Clone, Serialize)]
pub struct MetricIdentity {
    /// Hierarchical metric name, e.g. `Controller/users/index`
    pub name: String,

    /// Name of the enclosing root metric, `None` for roots and process metrics
    pub scope: Option<String>,

    /// Free-form description supplied at the call site
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Call-site backtrace captured for slow nested frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl MetricIdentity {
    /// Unscoped identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
            description: None,
            backtrace: None,
        }
    }

    /// Identity attributed to the root metric `scope`.
    pub fn scoped(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::new(name).with_scope(Some(scope.into()))
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_backtrace(mut self, backtrace: Option<String>) -> Self {
        self.backtrace = backtrace;
        self
    }

    /// First path segment of the name (`View` for `View/users/Rendering`).
    ///
    /// Names without a `/`, or whose leading segment contains characters other
    /// than ASCII alphanumerics and `_`, have no category.
    pub fn category(&self) -> Option<&str> {
        let (head, _) = self.name.split_once('/')?;
        if head.is_empty() || !head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        Some(head)
    }
}

impl PartialEq for MetricIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.scope == other.scope
    }
}

impl Eq for MetricIdentity {}

impl Hash for MetricIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.scope.hash(state);
    }
}

/// Aggregate timing for one metric. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricStats {
    pub call_count: u64,
    pub total_call_time: f64,
    pub total_exclusive_time: f64,
    pub is_scoped: bool,
}

impl MetricStats {
    pub fn new(is_scoped: bool) -> Self {
        Self {
            is_scoped,
            ..Default::default()
        }
    }

    /// Count one more call.
    pub fn update(&mut self, call_time: f64, exclusive_time: f64) {
        self.call_count += 1;
        self.total_call_time += call_time;
        self.total_exclusive_time += exclusive_time;
    }

    /// Fold `other` into `self`. Only the numeric fields are summed.
    pub fn combine(&mut self, other: &MetricStats) -> &mut Self {
        self.call_count += other.call_count;
        self.total_call_time += other.total_call_time;
        self.total_exclusive_time += other.total_exclusive_time;
        self
    }

    /// Non-mutating form of [`combine`](Self::combine).
    pub fn combined(&self, other: &MetricStats) -> MetricStats {
        let mut out = self.clone();
        out.combine(other);
        out
    }
}

/// Mapping from metric identity to its aggregate stats.
///
/// Used both for the per-transaction scratch table and for the process-wide
/// table drained by the background worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricTable {
    entries: HashMap<MetricIdentity, MetricStats>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, identity: &MetricIdentity) -> Option<&MetricStats> {
        self.entries.get(identity)
    }

    /// Look up by name and scope without building an identity by hand.
    pub fn find(&self, name: &str, scope: Option<&str>) -> Option<&MetricStats> {
        let key = MetricIdentity::new(name).with_scope(scope.map(str::to_string));
        self.entries.get(&key)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, MetricIdentity, MetricStats> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stats slot for `identity`, created empty on first use.
    pub fn entry(&mut self, identity: MetricIdentity, is_scoped: bool) -> &mut MetricStats {
        self.entries
            .entry(identity)
            .or_insert_with(|| MetricStats::new(is_scoped))
    }

    /// Combine `stats` into the entry for `identity`, inserting it if absent.
    pub fn add(&mut self, identity: MetricIdentity, stats: MetricStats) {
        match self.entries.entry(identity) {
            hash_map::Entry::Occupied(mut slot) => {
                slot.get_mut().combine(&stats);
            }
            hash_map::Entry::Vacant(slot) => {
                slot.insert(stats);
            }
        }
    }

    /// Record a single value directly, bypassing any call stack.
    ///
    /// `exclusive` defaults to `value`.
    pub fn track(&mut self, name: &str, value: f64, scope: Option<&str>, exclusive: Option<f64>) {
        let identity = MetricIdentity::new(name).with_scope(scope.map(str::to_string));
        let is_scoped = identity.scope.is_some();
        self.entry(identity, is_scoped)
            .update(value, exclusive.unwrap_or(value));
    }

    /// Combine every entry of `incoming` into this table.
    pub fn merge(&mut self, incoming: MetricTable) {
        for (identity, stats) in incoming.entries {
            self.add(identity, stats);
        }
    }

    /// Take the contents, leaving this table empty.
    pub fn drain(&mut self) -> MetricTable {
        std::mem::take(self)
    }

    /// Merge previously unsent data in, then take the merged contents.
    ///
    /// Sinks use this to fold a report that failed to go out into the next
    /// one.
    pub fn merge_and_clear(&mut self, previous: MetricTable) -> MetricTable {
        self.merge(previous);
        self.drain()
    }
}

impl IntoIterator for MetricTable {
    type Item = (MetricIdentity, MetricStats);
    type IntoIter = hash_map::IntoIter<MetricIdentity, MetricStats>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a MetricTable {
    type Item = (&'a MetricIdentity, &'a MetricStats);
    type IntoIter = hash_map::Iter<'a, MetricIdentity, MetricStats>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(MetricIdentity, MetricStats)> for MetricTable {
    fn from_iter<I: IntoIterator<Item = (MetricIdentity, MetricStats)>>(iter: I) -> Self {
        let mut table = MetricTable::new();
        for (identity, stats) in iter {
            table.add(identity, stats);
        }
        table
    }
}

#[derive(Serialize)]
struct EntryRef<'a> {
    metric: &'a MetricIdentity,
    stats: &'a MetricStats,
}

// Struct keys can't be JSON object keys, so the table goes out as a list.
impl Serialize for MetricTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            self.entries
                .iter()
                .map(|(metric, stats)| EntryRef { metric, stats }),
        )
    }
}
