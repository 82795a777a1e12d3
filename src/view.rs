//! Node views: live projections of one location of a document's tree.
//!
//! A view caches the value at `parent + key`. Edits are applied to the cache
//! first, then pushed up through every ancestor view into the document root,
//! after which overlapping views are brought back in line:
//!
//! ```text
//! Clean --edit--> Dirty --propagate--> Committing --> Clean
//! Clean --external change--> Stale --refresh--> Clean
//! any   --node removed--> Detached (terminal)
//! ```

use crate::codec;
use crate::coerce;
use crate::document::{Document, DuplicateKeyPolicy};
use crate::error::{CodecError, EditError};
use crate::present::{self, Row};
use crate::value::{Value, ValueKind, format_path, parse_index};
use std::fmt;
use tracing::{debug, warn};

/// Handle to a view registered with a [`Document`].
///
/// Slots of closed views are reused, so a handle also carries the serial of
/// the view it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId {
    index: usize,
    serial: u64,
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.serial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// The cache matches the committed tree.
    Clean,
    /// A local edit has not reached the document yet.
    Dirty,
    Committing,
    /// The file changed underneath; refresh before editing.
    Stale,
    /// The node is gone. Terminal.
    Detached,
}

#[derive(Debug, Clone)]
pub(crate) struct ViewSlot {
    parent: Option<ViewId>,
    key: Option<String>,
    cached: Value,
    state: ViewState,
}

/// Arena of open views with a free list of closed slots.
#[derive(Debug, Default)]
pub(crate) struct ViewTable {
    /// Serial of the latest occupant and the slot, `None` once closed.
    slots: Vec<(u64, Option<ViewSlot>)>,
    free: Vec<usize>,
    opened: u64,
}

impl ViewTable {
    fn insert(&mut self, slot: ViewSlot) -> ViewId {
        self.opened += 1;
        let serial = self.opened;
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = (serial, Some(slot));
                index
            }
            None => {
                self.slots.push((serial, Some(slot)));
                self.slots.len() - 1
            }
        };
        ViewId { index, serial }
    }

    fn get(&self, id: ViewId) -> Option<&ViewSlot> {
        match self.slots.get(id.index)? {
            (serial, Some(slot)) if *serial == id.serial => Some(slot),
            _ => None,
        }
    }

    fn get_mut(&mut self, id: ViewId) -> Option<&mut ViewSlot> {
        match self.slots.get_mut(id.index)? {
            (serial, Some(slot)) if *serial == id.serial => Some(slot),
            _ => None,
        }
    }

    fn remove(&mut self, id: ViewId) {
        if self.get(id).is_some() {
            self.slots[id.index].1 = None;
            self.free.push(id.index);
        }
    }

    /// Open views, oldest first.
    fn ids(&self) -> Vec<ViewId> {
        let mut ids: Vec<ViewId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, (_, slot))| slot.is_some())
            .map(|(index, (serial, _))| ViewId { index, serial: *serial })
            .collect();
        ids.sort_by_key(|id| id.serial);
        ids
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

/// How an edit moved the children of the edited node, so that child views
/// keep pointing at the same element.
#[derive(Debug, Clone, PartialEq)]
enum ChildEffect {
    Replaced,
    InsertedIndex(usize),
    RemovedIndex(usize),
    RemovedKey(String),
    Renamed { from: String, to: String },
    Moved { from: usize, to: usize },
}

impl Document {
    /// Registers a view on the root value.
    pub fn open_root_view(&mut self) -> Result<ViewId, EditError> {
        self.ensure_open()?;
        let cached = self.root().clone();
        Ok(self.register(ViewSlot {
            parent: None,
            key: None,
            cached,
            state: ViewState::Clean,
        }))
    }

    /// Registers a view on the child `key` of `parent`'s value.
    pub fn open_child_view(&mut self, parent: ViewId, key: &str) -> Result<ViewId, EditError> {
        self.ensure_open()?;
        let slot = self.editable(parent)?;
        let (key, cached) = match &slot.cached {
            Value::Object(map) => {
                let child = map
                    .get(key)
                    .ok_or_else(|| EditError::KeyNotFound(key.to_string()))?;
                (key.to_string(), child.clone())
            }
            Value::Array(values) => {
                let index = parse_index(key, values.len())?;
                (index.to_string(), values[index].clone())
            }
            other => return Err(EditError::NotAContainer(other.kind())),
        };
        Ok(self.register(ViewSlot {
            parent: Some(parent),
            key: Some(key),
            cached,
            state: ViewState::Clean,
        }))
    }

    /// Opens a root view and one child view per key of `path`, returning the last.
    pub fn open_path<S: AsRef<str>>(&mut self, path: &[S]) -> Result<ViewId, EditError> {
        let mut id = self.open_root_view()?;
        for key in path {
            match self.open_child_view(id, key.as_ref()) {
                Ok(child) => id = child,
                Err(err) => {
                    let root = self.root_of(id)?;
                    self.close_view(root)?;
                    return Err(err);
                }
            }
        }
        Ok(id)
    }

    /// Unsubscribes a view together with every view opened beneath it.
    pub fn close_view(&mut self, id: ViewId) -> Result<(), EditError> {
        self.slot(id)?;
        let mut doomed = vec![id];
        loop {
            let below: Vec<ViewId> = self
                .views
                .ids()
                .into_iter()
                .filter(|view| !doomed.contains(view))
                .filter(|view| {
                    self.views
                        .get(*view)
                        .and_then(|slot| slot.parent)
                        .is_some_and(|parent| doomed.contains(&parent))
                })
                .collect();
            if below.is_empty() {
                break;
            }
            doomed.extend(below);
        }
        for view in doomed {
            self.views.remove(view);
            debug!(view = %view, "view closed");
        }
        Ok(())
    }

    /// Ids of all registered views, in creation order.
    pub fn views(&self) -> Vec<ViewId> {
        self.views.ids()
    }

    pub fn view_state(&self, id: ViewId) -> Result<ViewState, EditError> {
        Ok(self.slot(id)?.state)
    }

    /// The view's cached value. Stale views still answer with what they last saw.
    pub fn value(&self, id: ViewId) -> Result<&Value, EditError> {
        let slot = self.slot(id)?;
        if slot.state == ViewState::Detached {
            return Err(EditError::DetachedView);
        }
        Ok(&slot.cached)
    }

    pub fn view_key(&self, id: ViewId) -> Result<Option<&str>, EditError> {
        Ok(self.slot(id)?.key.as_deref())
    }

    pub fn view_parent(&self, id: ViewId) -> Result<Option<ViewId>, EditError> {
        Ok(self.slot(id)?.parent)
    }

    /// Keys from the document root down to this view.
    pub fn view_path(&self, id: ViewId) -> Result<Vec<String>, EditError> {
        let mut keys = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let slot = self.slot(cur)?;
            if slot.state == ViewState::Detached {
                return Err(EditError::DetachedView);
            }
            if let Some(key) = &slot.key {
                keys.push(key.clone());
            }
            current = slot.parent;
        }
        keys.reverse();
        Ok(keys)
    }

    /// Presentation rows for the view's container.
    pub fn rows(&self, id: ViewId) -> Result<Vec<Row>, EditError> {
        Ok(present::rows(self.value(id)?))
    }

    /// The view's value as source text in the document's format.
    pub fn source_text(&self, id: ViewId) -> Result<String, EditError> {
        Ok(codec::to_source(self.value(id)?, self.format())?)
    }

    /// Parses `text` in the document's format and replaces the view's value.
    pub fn set_source_text(&mut self, id: ViewId, text: &str) -> Result<(), EditError> {
        let value = codec::from_source(text, self.format())?;
        self.set_value(id, value)
    }

    /// Replaces the view's own value.
    pub fn set_value(&mut self, id: ViewId, value: Value) -> Result<(), EditError> {
        self.edit(id, |node, _| {
            *node = value;
            Ok(ChildEffect::Replaced)
        })
    }

    /// Replaces the view's value locally without committing it. The view
    /// stays `Dirty` until [`Document::commit`]; an external change meanwhile
    /// does not overwrite it.
    pub fn stage_value(&mut self, id: ViewId, value: Value) -> Result<(), EditError> {
        self.apply_local(id, |node, _| {
            *node = value;
            Ok(ChildEffect::Replaced)
        })
    }

    /// Replaces an existing child of the view's container.
    pub fn set_child(&mut self, id: ViewId, key: &str, value: Value) -> Result<(), EditError> {
        self.edit(id, |node, _| {
            let kind = node.kind();
            match node {
                Value::Object(map) => {
                    let slot = map
                        .get_mut(key)
                        .ok_or_else(|| EditError::KeyNotFound(key.to_string()))?;
                    *slot = value;
                }
                Value::Array(values) => {
                    let index = parse_index(key, values.len())?;
                    values[index] = value;
                }
                _ => return Err(EditError::NotAContainer(kind)),
            }
            Ok(ChildEffect::Replaced)
        })
    }

    /// Adds a child. Dictionaries need a non-empty key; an existing key is
    /// handled by the document's [`DuplicateKeyPolicy`]. Arrays append when
    /// `key` is `None`, otherwise insert at that index (`0..=len`).
    pub fn insert_child(&mut self, id: ViewId, key: Option<&str>, value: Value) -> Result<(), EditError> {
        self.edit(id, |node, policy| {
            let kind = node.kind();
            match node {
                Value::Object(map) => {
                    let key = key.filter(|k| !k.is_empty()).ok_or(EditError::KeyRequired)?;
                    if map.contains_key(key) && policy == DuplicateKeyPolicy::Reject {
                        return Err(EditError::DuplicateKey(key.to_string()));
                    }
                    map.insert(key.to_string(), value);
                    Ok(ChildEffect::Replaced)
                }
                Value::Array(values) => {
                    let len = values.len();
                    let index = match key {
                        Some(k) => parse_index(k, len + 1).map_err(|err| match err {
                            EditError::IndexOutOfBounds { index, .. } => EditError::IndexOutOfBounds { index, len },
                            other => other,
                        })?,
                        None => len,
                    };
                    values.insert(index, value);
                    Ok(ChildEffect::InsertedIndex(index))
                }
                _ => Err(EditError::NotAContainer(kind)),
            }
        })
    }

    /// Adds a child holding the default value of `kind`.
    pub fn add_item(&mut self, id: ViewId, key: Option<&str>, kind: ValueKind) -> Result<(), EditError> {
        self.insert_child(id, key, coerce::default_for(kind))
    }

    pub fn remove_child(&mut self, id: ViewId, key: &str) -> Result<(), EditError> {
        self.edit(id, |node, _| {
            let kind = node.kind();
            match node {
                Value::Object(map) => {
                    map.shift_remove(key)
                        .ok_or_else(|| EditError::KeyNotFound(key.to_string()))?;
                    Ok(ChildEffect::RemovedKey(key.to_string()))
                }
                Value::Array(values) => {
                    let index = parse_index(key, values.len())?;
                    values.remove(index);
                    Ok(ChildEffect::RemovedIndex(index))
                }
                _ => Err(EditError::NotAContainer(kind)),
            }
        })
    }

    /// Removes the view's own node from its parent. The view becomes detached.
    pub fn delete(&mut self, id: ViewId) -> Result<(), EditError> {
        let slot = self.slot(id)?;
        let (Some(parent), Some(key)) = (slot.parent, slot.key.clone()) else {
            return Err(EditError::RootCannotBeRemoved);
        };
        self.remove_child(parent, &key)
    }

    /// Renames a dictionary key in place, keeping its position.
    pub fn rename_key(&mut self, id: ViewId, from: &str, to: &str) -> Result<(), EditError> {
        self.edit(id, |node, policy| {
            let kind = node.kind();
            let Value::Object(map) = node else {
                return Err(EditError::UnsupportedOperation { operation: "rename", kind });
            };
            if to.is_empty() {
                return Err(EditError::KeyRequired);
            }
            if !map.contains_key(from) {
                return Err(EditError::KeyNotFound(from.to_string()));
            }
            if from == to {
                return Ok(ChildEffect::Replaced);
            }
            if map.contains_key(to) {
                if policy == DuplicateKeyPolicy::Reject {
                    return Err(EditError::DuplicateKey(to.to_string()));
                }
                map.shift_remove(to);
            }
            if let Some((index, _, value)) = map.shift_remove_full(from) {
                map.shift_insert(index, to.to_string(), value);
            }
            Ok(ChildEffect::Renamed {
                from: from.to_string(),
                to: to.to_string(),
            })
        })
    }

    /// Moves an array element from one index to another.
    pub fn move_element(&mut self, id: ViewId, from: usize, to: usize) -> Result<(), EditError> {
        self.edit(id, |node, _| {
            let kind = node.kind();
            let Value::Array(values) = node else {
                return Err(EditError::UnsupportedOperation { operation: "move", kind });
            };
            let len = values.len();
            for index in [from, to] {
                if index >= len {
                    return Err(EditError::IndexOutOfBounds { index, len });
                }
            }
            let item = values.remove(from);
            values.insert(to, item);
            Ok(ChildEffect::Moved { from, to })
        })
    }

    /// Coerces the view's own value to `kind`.
    pub fn retype(&mut self, id: ViewId, kind: ValueKind) -> Result<(), EditError> {
        self.edit(id, |node, _| {
            *node = coerce::coerce(node, kind);
            Ok(ChildEffect::Replaced)
        })
    }

    /// Coerces one child of the view's container to `kind`.
    pub fn retype_child(&mut self, id: ViewId, key: &str, kind: ValueKind) -> Result<(), EditError> {
        self.edit(id, |node, _| {
            let node_kind = node.kind();
            let child = node.child_mut(key).ok_or_else(|| match node_kind {
                ValueKind::Array | ValueKind::Object => EditError::KeyNotFound(key.to_string()),
                other => EditError::NotAContainer(other),
            })?;
            *child = coerce::coerce(child, kind);
            Ok(ChildEffect::Replaced)
        })
    }

    /// Re-reads a stale (or dirty) view from the document, discarding its cache.
    pub fn refresh(&mut self, id: ViewId) -> Result<(), EditError> {
        self.ensure_open()?;
        let path = self.view_path(id)?;
        let fresh = self.root().get_path(&path).cloned();
        let slot = self.slot_mut(id)?;
        match fresh {
            Some(value) => {
                slot.cached = value;
                slot.state = ViewState::Clean;
                Ok(())
            }
            None => {
                slot.state = ViewState::Detached;
                Err(EditError::DetachedView)
            }
        }
    }

    /// Retries propagation of a dirty view.
    pub fn commit(&mut self, id: ViewId) -> Result<(), EditError> {
        self.ensure_open()?;
        match self.slot(id)?.state {
            ViewState::Dirty => self.propagate(id),
            ViewState::Stale => Err(EditError::StaleView),
            ViewState::Detached => Err(EditError::DetachedView),
            ViewState::Clean | ViewState::Committing => Ok(()),
        }
    }

    fn edit<F>(&mut self, id: ViewId, f: F) -> Result<(), EditError>
    where
        F: FnOnce(&mut Value, DuplicateKeyPolicy) -> Result<ChildEffect, EditError>,
    {
        self.apply_local(id, f)?;
        self.propagate(id)
    }

    /// Applies an edit to the view's cache only, leaving it `Dirty`.
    fn apply_local<F>(&mut self, id: ViewId, f: F) -> Result<(), EditError>
    where
        F: FnOnce(&mut Value, DuplicateKeyPolicy) -> Result<ChildEffect, EditError>,
    {
        self.ensure_open()?;
        let policy = self.options().duplicate_keys;
        let slot = self.editable(id)?;
        let is_root = slot.parent.is_none();
        let mut next = slot.cached.clone();
        let effect = f(&mut next, policy)?;
        if is_root && !next.is_container() {
            return Err(CodecError::UnsupportedRoot(next.kind()).into());
        }
        next.truncate_dates();

        let slot = self.slot_mut(id)?;
        slot.cached = next;
        slot.state = ViewState::Dirty;
        self.apply_child_effect(id, &effect);
        Ok(())
    }

    /// Writes the view's value into the document root and every ancestor cache.
    fn propagate(&mut self, id: ViewId) -> Result<(), EditError> {
        let path = self.view_path(id)?;
        let slot = self.slot_mut(id)?;
        slot.state = ViewState::Committing;
        let value = slot.cached.clone();

        if let Err(err) = self.root_mut().replace_at(&path, value) {
            warn!(view = %id, path = %format_path(&path), error = %err, "edit could not be committed");
            self.slot_mut(id)?.state = ViewState::Dirty;
            return Err(err);
        }
        self.slot_mut(id)?.state = ViewState::Clean;
        self.reconcile(id, &path);
        self.note_commit(&path);
        debug!(view = %id, path = %format_path(&path), generation = self.generation(), "committed edit");
        Ok(())
    }

    /// Brings every other view in line with a commit at `changed`.
    fn reconcile(&mut self, origin: ViewId, changed: &[String]) {
        let paths = self.all_paths();
        let new_value = self.root().get_path(changed).cloned();
        for (id, path) in &paths {
            if *id == origin {
                continue;
            }
            let root = self.root().clone_at(path.as_deref());
            let Some(slot) = self.views.get_mut(*id) else {
                continue;
            };
            if slot.state == ViewState::Detached {
                continue;
            }
            let Some(path) = path else {
                slot.state = ViewState::Detached;
                continue;
            };

            if path.len() < changed.len() && changed.starts_with(path) {
                // Ancestor: patch the edited subtree into its cache.
                if let Some(value) = &new_value {
                    if slot.cached.replace_at(&changed[path.len()..], value.clone()).is_err() {
                        debug!(view = %id, "ancestor cache diverged from the tree");
                    }
                }
            } else if path.starts_with(changed) {
                // Same node or a descendant: re-resolve against the new tree.
                match root {
                    None => {
                        debug!(view = %id, path = %format_path(path), "view detached");
                        slot.state = ViewState::Detached;
                    }
                    Some(value) => {
                        if slot.state == ViewState::Clean {
                            slot.cached = value;
                        }
                    }
                }
            }
        }
    }

    /// Rekeys or detaches the child views of `id` after a structural edit.
    fn apply_child_effect(&mut self, id: ViewId, effect: &ChildEffect) {
        if *effect == ChildEffect::Replaced {
            return;
        }
        let Some(origin) = self.path_of(id) else {
            return;
        };
        let children: Vec<ViewId> = self
            .views
            .ids()
            .into_iter()
            .filter(|child| {
                self.views
                    .get(*child)
                    .and_then(|slot| slot.parent)
                    .and_then(|parent| self.path_of(parent))
                    .is_some_and(|p| p == origin)
            })
            .collect();
        for child in children {
            let Some(slot) = self.views.get_mut(child) else {
                continue;
            };
            if slot.state == ViewState::Detached {
                continue;
            }
            let Some(key) = slot.key.clone() else {
                continue;
            };
            match remap_key(&key, effect) {
                Some(new_key) => slot.key = Some(new_key),
                None => {
                    debug!(view = %child, key = %key, "child view detached");
                    slot.state = ViewState::Detached;
                }
            }
        }
    }

    /// Clean views whose node differs in `new_root` become stale.
    pub(crate) fn mark_stale_views(&mut self, new_root: &Value) -> Vec<ViewId> {
        let paths = self.all_paths();
        let mut stale = Vec::new();
        for (id, path) in paths {
            let Some(path) = path else {
                continue;
            };
            let unchanged = self.root().get_path(&path) == new_root.get_path(&path);
            let Some(slot) = self.views.get_mut(id) else {
                continue;
            };
            if unchanged {
                continue;
            }
            match slot.state {
                ViewState::Clean => {
                    slot.state = ViewState::Stale;
                    stale.push(id);
                }
                ViewState::Dirty => {
                    debug!(view = %id, "external change overlaps a local edit; local edit wins");
                }
                _ => {}
            }
        }
        if !stale.is_empty() {
            warn!(count = stale.len(), "views invalidated by external change");
        }
        stale
    }

    /// Commits views whose local edits survived an external change.
    pub(crate) fn replay_dirty_views(&mut self) {
        let dirty: Vec<ViewId> = self
            .views()
            .into_iter()
            .filter(|id| self.view_state(*id) == Ok(ViewState::Dirty))
            .collect();
        for id in dirty {
            if let Err(err) = self.propagate(id) {
                warn!(view = %id, error = %err, "local edit could not be replayed");
            }
        }
    }

    /// Path of every open view, `None` for detached chains.
    fn all_paths(&self) -> Vec<(ViewId, Option<Vec<String>>)> {
        self.views
            .ids()
            .into_iter()
            .map(|id| (id, self.path_of(id)))
            .collect()
    }

    /// Keys from the root to `id`, or `None` if the chain is closed or detached.
    fn path_of(&self, id: ViewId) -> Option<Vec<String>> {
        let mut keys = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let slot = self.views.get(cur)?;
            if slot.state == ViewState::Detached {
                return None;
            }
            if slot.parent.is_some() {
                keys.push(slot.key.clone()?);
            }
            current = slot.parent;
        }
        keys.reverse();
        Some(keys)
    }

    fn root_of(&self, id: ViewId) -> Result<ViewId, EditError> {
        let mut current = id;
        while let Some(parent) = self.slot(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    fn register(&mut self, slot: ViewSlot) -> ViewId {
        let id = self.views.insert(slot);
        debug!(view = %id, "view opened");
        id
    }

    fn ensure_open(&self) -> Result<(), EditError> {
        if self.is_closed() {
            Err(EditError::Closed)
        } else {
            Ok(())
        }
    }

    fn slot(&self, id: ViewId) -> Result<&ViewSlot, EditError> {
        self.views.get(id).ok_or(EditError::UnknownView)
    }

    fn slot_mut(&mut self, id: ViewId) -> Result<&mut ViewSlot, EditError> {
        self.views.get_mut(id).ok_or(EditError::UnknownView)
    }

    fn editable(&self, id: ViewId) -> Result<&ViewSlot, EditError> {
        let slot = self.slot(id)?;
        match slot.state {
            ViewState::Stale => {
                warn!(view = %id, "edit rejected on stale view");
                Err(EditError::StaleView)
            }
            ViewState::Detached => Err(EditError::DetachedView),
            _ => Ok(slot),
        }
    }
}

impl Value {
    fn clone_at(&self, path: Option<&[String]>) -> Option<Value> {
        path.and_then(|p| self.get_path(p)).cloned()
    }
}

/// New key of a child view after `effect`, or `None` if its node is gone.
fn remap_key(key: &str, effect: &ChildEffect) -> Option<String> {
    let index = key.parse::<usize>().ok();
    match (effect, index) {
        (ChildEffect::Replaced, _) => Some(key.to_string()),
        (ChildEffect::RemovedKey(removed), _) => (key != removed).then(|| key.to_string()),
        (ChildEffect::Renamed { from, to }, _) => {
            if key == from {
                Some(to.clone())
            } else if key == to {
                None
            } else {
                Some(key.to_string())
            }
        }
        (ChildEffect::InsertedIndex(at), Some(i)) => Some(if i >= *at { i + 1 } else { i }.to_string()),
        (ChildEffect::RemovedIndex(at), Some(i)) => match i.cmp(at) {
            std::cmp::Ordering::Less => Some(i.to_string()),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some((i - 1).to_string()),
        },
        (ChildEffect::Moved { from, to }, Some(i)) => {
            let moved = if i == *from {
                *to
            } else if from < to && i > *from && i <= *to {
                i - 1
            } else if to < from && i >= *to && i < *from {
                i + 1
            } else {
                i
            };
            Some(moved.to_string())
        }
        (_, None) => Some(key.to_string()),
    }
}
