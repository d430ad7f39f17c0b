//! Versioned in-memory document collection.
//!
//! Every record carries a revision and the list of revisions it descends from, which is
//! enough to replicate documents between queues in either direction without locking:
//! a foreign copy either fast-forwards the local one, is already known, or diverged and
//! is kept as a conflict branch until [`DocumentStore::resolve`] merges the branches.

use super::types::{Branch, Document, Revision};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

/// Oldest ancestors are dropped past this many; replicas that far behind re-conflict
/// instead of fast-forwarding, which the resolver handles anyway.
pub const MAX_ANCESTORS: usize = 1000;

/// Result of applying a replicated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The document was unknown locally and has been created.
    Inserted,
    /// The foreign revision descends from the local one and replaced it.
    FastForward,
    /// Same or older revision, nothing to do.
    Unchanged,
    /// Divergent histories; both branches are kept.
    Conflict,
    /// The document was unknown locally and inserting was not allowed.
    Skipped,
}

pub struct DocumentStore<K, V> {
    /// Structure: `Key -> Document`. `DashMap` gives per-key locking for
    /// read-modify-write updates.
    docs: Arc<DashMap<K, Document<V>>>,
    name: String,
}

impl<K, V> DocumentStore<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Send + Sync,
{
    pub fn new(name: &str) -> Self {
        Self {
            docs: Arc::new(DashMap::new()),
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores a value under a fresh first revision, or as a new revision when the key
    /// already exists.
    pub fn insert(&self, key: K, value: V) -> Revision {
        match self.docs.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let doc = occupied.get_mut();
                doc.value = value;
                bump(doc)
            }
            Entry::Vacant(vacant) => {
                let rev = Revision::first();
                vacant.insert(Document {
                    id: key.to_string(),
                    rev: rev.clone(),
                    ancestors: Vec::new(),
                    value,
                    conflicts: Vec::new(),
                });
                tracing::trace!("{}: created {} at {}", self.name, key.to_string(), rev);
                rev
            }
        }
    }

    /// Applies an in-place modification and records a new revision.
    ///
    /// Returns `None` when the key does not exist.
    pub fn update<F>(&self, key: &K, modify: F) -> Option<Revision>
    where
        F: FnOnce(&mut V),
    {
        let mut doc = self.docs.get_mut(key)?;
        modify(&mut doc.value);
        Some(bump(&mut doc))
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.docs.get(key).map(|doc| doc.value.clone())
    }

    pub fn get_document(&self, key: &K) -> Option<Document<V>> {
        self.docs.get(key).map(|doc| doc.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.docs.contains_key(key)
    }

    pub fn filter<F>(&self, predicate: F) -> Vec<V>
    where
        F: Fn(&V) -> bool,
    {
        self.docs
            .iter()
            .filter(|entry| predicate(&entry.value().value))
            .map(|entry| entry.value().value.clone())
            .collect()
    }

    pub fn filter_documents<F>(&self, predicate: F) -> Vec<Document<V>>
    where
        F: Fn(&V) -> bool,
    {
        self.docs
            .iter()
            .filter(|entry| predicate(&entry.value().value))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.docs.remove(key).map(|(_, doc)| doc.value)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Dumps every document, revisions included (used by replication).
    pub fn dump(&self) -> Vec<Document<V>> {
        self.docs.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Applies a document received from another replica.
    ///
    /// Safe to repeat: applying a state that is already known is a no-op.
    pub fn apply_replicated(&self, incoming: Document<V>, insert_missing: bool) -> ApplyOutcome {
        let key: K = match incoming.id.parse() {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("{}: ignoring document with bad id {}: {}", self.name, incoming.id, e);
                return ApplyOutcome::Skipped;
            }
        };

        match self.docs.entry(key) {
            Entry::Vacant(vacant) => {
                if !insert_missing {
                    return ApplyOutcome::Skipped;
                }
                vacant.insert(incoming);
                ApplyOutcome::Inserted
            }
            Entry::Occupied(mut occupied) => {
                let local = occupied.get_mut();

                if local.rev == incoming.rev {
                    return ApplyOutcome::Unchanged;
                }

                if incoming.descends_from(&local.rev) {
                    let mut incoming = incoming;
                    let retained: Vec<Branch<V>> = std::mem::take(&mut local.conflicts)
                        .into_iter()
                        .filter(|branch| {
                            branch.rev != incoming.rev
                                && !incoming.descends_from(&branch.rev)
                                && !incoming.conflicts.iter().any(|c| c.rev == branch.rev)
                        })
                        .collect();
                    incoming.conflicts.extend(retained);
                    *local = incoming;
                    return ApplyOutcome::FastForward;
                }

                if local.descends_from(&incoming.rev) || knows_branch(local, &incoming.rev) {
                    return ApplyOutcome::Unchanged;
                }

                let Document {
                    id,
                    rev,
                    ancestors,
                    value,
                    conflicts,
                } = incoming;

                for branch in conflicts {
                    if branch.rev != local.rev
                        && !local.descends_from(&branch.rev)
                        && !knows_branch(local, &branch.rev)
                    {
                        local.conflicts.push(branch);
                    }
                }

                let branch = Branch {
                    rev,
                    ancestors,
                    value,
                };

                // Highest revision stays current on every replica.
                if branch.rev > local.rev {
                    let previous = Branch {
                        rev: std::mem::replace(&mut local.rev, branch.rev),
                        ancestors: std::mem::replace(&mut local.ancestors, branch.ancestors),
                        value: std::mem::replace(&mut local.value, branch.value),
                    };
                    local.conflicts.push(previous);
                } else {
                    local.conflicts.push(branch);
                }

                tracing::debug!(
                    "{}: conflict on {} ({} branches)",
                    self.name,
                    id,
                    local.conflicts.len() + 1
                );
                ApplyOutcome::Conflict
            }
        }
    }

    /// Bulk version of [`apply_replicated`](Self::apply_replicated).
    pub fn apply_entries(
        &self,
        documents: Vec<Document<V>>,
        insert_missing: bool,
    ) -> Vec<(String, ApplyOutcome)> {
        documents
            .into_iter()
            .map(|doc| {
                let id = doc.id.clone();
                (id, self.apply_replicated(doc, insert_missing))
            })
            .collect()
    }

    pub fn conflicted_keys(&self) -> Vec<K> {
        self.docs
            .iter()
            .filter(|entry| entry.value().has_conflicts())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Collapses all branches of a conflicted document into a single new revision.
    ///
    /// The merged revision descends from every branch, so it fast-forwards any replica
    /// holding one of them. Returns `None` if the document has no conflicts.
    pub fn resolve<F>(&self, key: &K, merge: F) -> Option<Revision>
    where
        F: FnOnce(&V, &[&V]) -> V,
    {
        let mut doc = self.docs.get_mut(key)?;
        if doc.conflicts.is_empty() {
            return None;
        }

        let branches = std::mem::take(&mut doc.conflicts);
        let others: Vec<&V> = branches.iter().map(|branch| &branch.value).collect();
        let merged = merge(&doc.value, &others);

        let generation = branches
            .iter()
            .map(|branch| branch.rev.generation)
            .chain(std::iter::once(doc.rev.generation))
            .max()
            .unwrap_or(doc.rev.generation);

        let mut seen: HashSet<Revision> = HashSet::new();
        let mut ancestors = Vec::new();
        let lineage = doc
            .ancestors
            .iter()
            .chain(std::iter::once(&doc.rev))
            .chain(
                branches
                    .iter()
                    .flat_map(|branch| branch.ancestors.iter().chain(std::iter::once(&branch.rev))),
            );
        for rev in lineage {
            if seen.insert(rev.clone()) {
                ancestors.push(rev.clone());
            }
        }
        trim(&mut ancestors);

        let rev = Revision {
            generation: generation + 1,
            tag: uuid::Uuid::new_v4().simple().to_string(),
        };
        doc.rev = rev.clone();
        doc.ancestors = ancestors;
        doc.value = merged;

        tracing::debug!("{}: resolved conflict on {} as {}", self.name, doc.id, rev);
        Some(rev)
    }
}

fn bump<V>(doc: &mut Document<V>) -> Revision {
    let next = doc.rev.next();
    let previous = std::mem::replace(&mut doc.rev, next.clone());
    doc.ancestors.push(previous);
    trim(&mut doc.ancestors);
    next
}

fn trim(ancestors: &mut Vec<Revision>) {
    if ancestors.len() > MAX_ANCESTORS {
        let excess = ancestors.len() - MAX_ANCESTORS;
        ancestors.drain(..excess);
    }
}

fn knows_branch<V>(doc: &Document<V>, rev: &Revision) -> bool {
    doc.conflicts
        .iter()
        .any(|branch| &branch.rev == rev || branch.ancestors.contains(rev))
}
