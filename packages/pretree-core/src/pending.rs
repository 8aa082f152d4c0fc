use std::cmp::Reverse;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::basic::{BasicOperation, BasicUpdates};
use crate::error::{Error, Result};
use crate::fragment::{normalize, Fragment};
use crate::ids::{NodeKind, Pre, QName, Target};
use crate::name_pool::{NameConflict, NamePool};
use crate::options::UpdateOptions;
use crate::primitive::{Effect, Location, Prepared, Primitive, PrimitiveKind, PrimitiveType};
use crate::shift::{ShiftMap, TextBoundaries};
use crate::traits::{Catalog, TreeStore};

/// Lifecycle of a [`PendingUpdates`] list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Collecting,
    Validating,
    Applying,
    Done,
}

/// Counts reported by a successful [`PendingUpdates::execute`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Node-level primitives applied.
    pub applied: usize,
    /// Node-level primitives skipped because their target was already removed.
    pub skipped: usize,
    /// Text siblings merged after the node-level phase.
    pub merged_texts: usize,
    /// Database-level operations applied.
    pub operations: usize,
    /// External resources written by puts.
    pub resources_written: usize,
}

/// Primitives of one database, keyed so that iteration yields kind groups in
/// application order and descending pre values within a group.
#[derive(Clone, Debug, Default)]
struct DataUpdates {
    primitives: BTreeMap<(PrimitiveType, Reverse<Pre>), Primitive>,
}

/// Validated primitives of one database, ready to apply.
#[derive(Debug)]
struct Plan {
    db: String,
    prepared: Vec<Prepared>,
}

#[derive(Debug, Default)]
struct PlanOutcome {
    applied: usize,
    skipped: usize,
    merged_texts: usize,
    puts: Vec<(Vec<String>, String)>,
}

/// Pending update list of one batch.
///
/// Primitives and database operations are collected against the unchanged
/// stores, validated together and then applied in one pass. Any error raised
/// before the first mutation leaves every store untouched.
#[derive(Debug)]
pub struct PendingUpdates {
    state: State,
    options: UpdateOptions,
    databases: BTreeMap<String, DataUpdates>,
    basics: BasicUpdates,
    /// Resource URIs written by queued puts.
    puts: HashSet<String>,
}

impl Default for PendingUpdates {
    fn default() -> Self {
        Self::new(UpdateOptions::default())
    }
}

impl PendingUpdates {
    pub fn new(options: UpdateOptions) -> Self {
        Self {
            state: State::Collecting,
            options,
            databases: BTreeMap::new(),
            basics: BasicUpdates::new(),
            puts: HashSet::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Number of distinct (target, kind) primitives collected so far.
    pub fn len(&self) -> usize {
        self.databases.values().map(|d| d.primitives.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.basics.is_empty()
    }

    /// Queues a node-level primitive, merging it with a queued primitive of the
    /// same kind on the same target.
    pub fn add(&mut self, primitive: Primitive) -> Result<()> {
        self.expect_collecting()?;
        let uris = match &primitive.kind {
            PrimitiveKind::Put(uris) => uris.clone(),
            _ => Vec::new(),
        };
        self.check_puts(&uris)?;
        let kind = primitive.primitive_type();
        debug!(node = %primitive.target, kind = %kind, "queueing primitive");
        let updates = self.databases.entry(primitive.target.db.clone()).or_default();
        match updates.primitives.entry((kind, Reverse(primitive.target.pre))) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(primitive)?,
            Entry::Vacant(slot) => {
                slot.insert(primitive);
            }
        }
        self.puts.extend(uris);
        Ok(())
    }

    /// Queues a database-level operation.
    pub fn add_operation(&mut self, operation: BasicOperation) -> Result<()> {
        self.expect_collecting()?;
        let uris = operation.uris().to_vec();
        self.check_puts(&uris)?;
        debug!(db = %operation.db, kind = %operation.operation_type(), "queueing database operation");
        self.basics.add(operation)?;
        self.puts.extend(uris);
        Ok(())
    }

    fn expect_collecting(&self) -> Result<()> {
        if self.state != State::Collecting {
            return Err(Error::InvalidOperation(format!(
                "cannot queue updates while {:?}",
                self.state
            )));
        }
        Ok(())
    }

    /// Rejects URIs already claimed by a queued put or repeated within `uris`.
    fn check_puts(&self, uris: &[String]) -> Result<()> {
        let mut seen = HashSet::new();
        match uris
            .iter()
            .find(|uri| self.puts.contains(*uri) || !seen.insert(uri.as_str()))
        {
            Some(uri) => Err(Error::DuplicatePut { uri: uri.clone() }),
            None => Ok(()),
        }
    }

    fn transition(&mut self, next: State) {
        info!(from = ?self.state, to = ?next, "pending update list state change");
        self.state = next;
    }

    /// Validates and applies the whole batch.
    ///
    /// Node-level primitives run first, database by database; database-level
    /// operations follow once all of them are applied. Errors detected while
    /// validating leave the catalog unchanged. Errors raised while applying
    /// abort the batch without undoing what was already applied.
    pub fn execute<C: Catalog + ?Sized>(mut self, catalog: &mut C) -> Result<ApplySummary> {
        self.expect_collecting()?;
        self.transition(State::Validating);
        let databases = std::mem::take(&mut self.databases);
        info!(
            databases = databases.len(),
            primitives = databases.values().map(|d| d.primitives.len()).sum::<usize>(),
            operations = self.basics.len(),
            "validating pending updates"
        );
        let mut plans = Vec::with_capacity(databases.len());
        for (db, updates) in databases {
            let store = catalog
                .store(&db)
                .ok_or_else(|| Error::UnknownDatabase(db.clone()))?;
            plans.push(updates.prepare(db, store)?);
        }
        self.basics.validate(catalog)?;

        self.transition(State::Applying);
        let mut summary = ApplySummary::default();
        let mut touched = Vec::with_capacity(plans.len());
        for plan in plans {
            let db = plan.db.clone();
            let store = catalog
                .store_mut(&db)
                .ok_or_else(|| Error::UnknownDatabase(db.clone()))?;
            let outcome = plan.apply(store, &self.options)?;
            summary.applied += outcome.applied;
            summary.skipped += outcome.skipped;
            summary.merged_texts += outcome.merged_texts;
            for (uris, content) in &outcome.puts {
                for uri in uris {
                    catalog.write(uri, content.as_bytes())?;
                    summary.resources_written += 1;
                }
            }
            touched.push(db);
        }
        if self.options.autoflush {
            for db in &touched {
                catalog.flush(db)?;
            }
        }

        let basics = std::mem::take(&mut self.basics);
        let basic = basics.apply(catalog)?;
        summary.operations = basic.applied;
        summary.resources_written += basic.resources_written;

        self.transition(State::Done);
        info!(
            applied = summary.applied,
            skipped = summary.skipped,
            merged_texts = summary.merged_texts,
            operations = summary.operations,
            resources_written = summary.resources_written,
            "pending updates applied"
        );
        Ok(summary)
    }
}

impl DataUpdates {
    /// Runs every check that does not mutate the store and builds the detached
    /// payloads.
    fn prepare<S: TreeStore + ?Sized>(self, db: String, store: &S) -> Result<Plan> {
        let len = store.len();
        for &(_, Reverse(pre)) in self.primitives.keys() {
            if pre >= len {
                return Err(Error::TargetOutOfRange {
                    target: Target::new(db.clone(), pre),
                    len,
                });
            }
        }
        for &(kind, Reverse(pre)) in self.primitives.keys() {
            if kind == PrimitiveType::ReplaceNode
                && self
                    .primitives
                    .contains_key(&(PrimitiveType::Rename, Reverse(pre)))
            {
                return Err(Error::ConflictingPrimitives {
                    target: Target::new(db.clone(), pre),
                    first: PrimitiveType::Rename,
                    second: PrimitiveType::ReplaceNode,
                });
            }
        }
        self.check_names(&db, store)?;
        let prepared = self
            .primitives
            .into_values()
            .map(|primitive| primitive.prepare(store))
            .collect::<Result<Vec<_>>>()?;
        debug!(db = %db, primitives = prepared.len(), "prepared primitives");
        Ok(Plan { db, prepared })
    }

    /// Replays the naming effect of all primitives on the elements they touch.
    fn check_names<S: TreeStore + ?Sized>(&self, db: &str, store: &S) -> Result<()> {
        let mut pools: BTreeMap<Pre, NamePool> = BTreeMap::new();
        let mut gone: HashSet<Pre> = HashSet::new();
        for (&(_, Reverse(pre)), primitive) in &self.primitives {
            let node_kind = store.kind(pre);
            let owner = match node_kind {
                NodeKind::Attribute => store.parent(pre, node_kind),
                NodeKind::Element => Some(pre),
                _ => None,
            };
            let Some(owner) = owner else { continue };
            let pool = pools
                .entry(owner)
                .or_insert_with(|| seeded_pool(store, owner));
            match &primitive.kind {
                PrimitiveKind::InsertAttribute(payload) if node_kind == NodeKind::Element => {
                    add_attributes(pool, payload);
                }
                PrimitiveKind::Rename(name) => {
                    pool.remove(pre);
                    pool.add(name.clone(), node_kind);
                }
                PrimitiveKind::Delete if node_kind == NodeKind::Attribute => pool.remove(pre),
                PrimitiveKind::ReplaceNode(payload) if node_kind == NodeKind::Attribute => {
                    pool.remove(pre);
                    add_attributes(pool, payload);
                }
                PrimitiveKind::Delete | PrimitiveKind::ReplaceNode(_) => {
                    gone.insert(pre);
                }
                _ => {}
            }
        }
        for (element, pool) in pools {
            if gone.contains(&element) {
                continue;
            }
            pool.check().map_err(|conflict| {
                let target = Target::new(db, element);
                match conflict {
                    NameConflict::DuplicateAttribute(name) => {
                        Error::DuplicateAttribute { target, name }
                    }
                    NameConflict::Namespace {
                        prefix,
                        first,
                        second,
                    } => Error::NamespaceConflict {
                        target,
                        prefix,
                        first,
                        second,
                    },
                }
            })?;
        }
        Ok(())
    }
}

fn seeded_pool<S: TreeStore + ?Sized>(store: &S, element: Pre) -> NamePool {
    let mut pool = NamePool::new();
    let name = |pre: Pre, kind: NodeKind| store.name(pre, kind).cloned().unwrap_or_else(|| QName::new(""));
    pool.add_node(element, name(element, NodeKind::Element), NodeKind::Element);
    for att in element + 1..element + store.att_size(element, NodeKind::Element) {
        pool.add_node(att, name(att, NodeKind::Attribute), NodeKind::Attribute);
    }
    pool
}

fn add_attributes(pool: &mut NamePool, payload: &[Fragment]) {
    for fragment in normalize(payload) {
        if let Fragment::Attribute { name, .. } = fragment {
            pool.add(name, NodeKind::Attribute);
        }
    }
}

impl Plan {
    fn apply<S: TreeStore + ?Sized>(self, store: &mut S, options: &UpdateOptions) -> Result<PlanOutcome> {
        let db = self.db;
        let mut shifts = ShiftMap::with_boundaries(self.prepared.iter().flat_map(|prepared| {
            let pre = prepared.target().pre;
            let node = prepared.node();
            [pre, pre + 1, pre + node.att_size, pre + node.size]
        }));
        let mut boundaries = TextBoundaries::new();
        let mut outcome = PlanOutcome::default();
        for prepared in self.prepared {
            let kind = prepared.primitive_type();
            let original = prepared.target().pre;
            let Some(location) = locate(&prepared, store, &shifts) else {
                warn!(db = %db, kind = %kind, pre = original, "skipping primitive on a removed node");
                outcome.skipped += 1;
                continue;
            };
            debug!(db = %db, kind = %kind, pre = original, resolved = location.pre, "applying primitive");
            let effect = prepared.apply(store, location)?;
            record(&prepared, &effect, &mut shifts, &mut boundaries);
            if let Effect::Serialized(content) = effect {
                outcome.puts.push((prepared.uris().to_vec(), content));
            }
            outcome.applied += 1;
        }
        if options.merge_texts {
            outcome.merged_texts = boundaries.resolve(store, &shifts)?;
        }
        // Adjacent texts are legal when merging is off.
        if options.check_invariants && options.merge_texts {
            store.validate()?;
        }
        Ok(outcome)
    }
}

/// Current location of a prepared primitive, `None` when its target is gone.
fn locate<S: TreeStore + ?Sized>(prepared: &Prepared, store: &S, shifts: &ShiftMap) -> Option<Location> {
    let original = prepared.target().pre;
    if prepared.primitive_type() == PrimitiveType::InsertBefore {
        let pre = shifts
            .resolve(original)
            .or_else(|| shifts.anchor(original))?;
        let parent = match prepared.node().parent {
            Some(parent) => Some(shifts.resolve(parent)?),
            None => None,
        };
        return Some(Location { pre, parent });
    }
    let pre = shifts.resolve(original)?;
    Some(Location {
        pre,
        parent: store.parent(pre, store.kind(pre)),
    })
}

/// Feeds the effect of one applied primitive into the position bookkeeping.
fn record(prepared: &Prepared, effect: &Effect, shifts: &mut ShiftMap, boundaries: &mut TextBoundaries) {
    let pre = prepared.target().pre;
    let node = prepared.node();
    let end = pre + node.size;
    match *effect {
        Effect::None | Effect::Serialized(_) => {}
        Effect::Inserted { count, .. } => {
            let boundary = match prepared.primitive_type() {
                PrimitiveType::InsertBefore => pre,
                PrimitiveType::InsertAttribute => pre + 1,
                PrimitiveType::InsertIntoFirst => pre + node.att_size,
                _ => end,
            };
            shifts.shift(boundary, count as isize);
            boundaries.inserted(boundary, count);
        }
        Effect::Removed { count, .. } => {
            shifts.remove(pre, end, true);
            shifts.shift(end, -(count as isize));
            boundaries.removed(end);
        }
        Effect::Replaced { inserted, .. } => {
            if prepared.primitive_type() == PrimitiveType::ReplaceElementContent {
                shifts.remove(pre + node.att_size, end, false);
            } else {
                shifts.remove(pre, end, true);
            }
            shifts.shift(end, effect.shift());
            boundaries.removed(end);
            boundaries.inserted(end, inserted);
        }
    }
}
