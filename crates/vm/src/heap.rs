//! The object heap and graph collector.
//!
//! Objects live in a slab of slots addressed by stable handles. Each object
//! doubles as a node of the object graph: it carries an outgoing-edge
//! multiset (child handle -> count) and a root flag. Member and array writes
//! keep the edges balanced: storing an object adds one edge from the parent,
//! overwriting or removing one takes it away. Collection marks everything
//! reachable from the roots over positive-count edges and destroys the rest,
//! which is what lets reference counts break cycles.

use hashbrown::HashSet;
use indexmap::IndexMap;

use jv_core::{Entity, ObjHandle, Symbol};

use crate::class::ClassId;
use crate::object::{NativeDeleteFn, Object, Payload};

/// The object heap of one process.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<Object>>,
    free: Vec<usize>,
}

impl Heap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Heap::default()
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Allocates an object of `class` with the given payload and delete
    /// hook. The new node has no edges and is not a root.
    pub fn new_object_full(
        &mut self,
        class: ClassId,
        payload: Payload,
        delete_hook: Option<NativeDeleteFn>,
    ) -> ObjHandle {
        let object = Object {
            class,
            payload,
            members: IndexMap::new(),
            out_edges: Default::default(),
            is_root: false,
            delete_hook,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(object);
                ObjHandle::from_index(index)
            }
            None => {
                self.slots.push(Some(object));
                ObjHandle::from_index(self.slots.len() - 1)
            }
        }
    }

    /// Allocates an object of `class` with the given payload.
    pub fn new_object(&mut self, class: ClassId, payload: Payload) -> ObjHandle {
        self.new_object_full(class, payload, None)
    }

    /// Returns the object behind `handle`.
    ///
    /// Panics if the handle is dangling; handles only dangle after a
    /// collection freed the object, and collected objects are by definition
    /// unreachable from running code.
    pub fn get(&self, handle: ObjHandle) -> &Object {
        self.slots[handle.index()]
            .as_ref()
            .expect("dangling object handle")
    }

    /// Mutable access to the object behind `handle`.
    pub fn get_mut(&mut self, handle: ObjHandle) -> &mut Object {
        self.slots[handle.index()]
            .as_mut()
            .expect("dangling object handle")
    }

    /// True when `handle` still refers to a live object.
    pub fn is_live(&self, handle: ObjHandle) -> bool {
        self.slots
            .get(handle.index())
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Marks `handle` as a collection root. Multiple roots are allowed.
    pub fn make_root(&mut self, handle: ObjHandle) {
        self.get_mut(handle).is_root = true;
    }

    /// Clears the root flag on `handle`.
    pub fn clear_root(&mut self, handle: ObjHandle) {
        self.get_mut(handle).is_root = false;
    }

    /// Bumps the edge multiplicity parent -> child.
    pub fn inc_edge(&mut self, parent: ObjHandle, child: ObjHandle) {
        *self.get_mut(parent).out_edges.entry(child).or_insert(0) += 1;
    }

    /// The current multiplicity of the edge parent -> child.
    pub fn edge_count(&self, parent: ObjHandle, child: ObjHandle) -> u32 {
        self.get(parent).out_edges.get(&child).copied().unwrap_or(0)
    }

    /// Drops one count from the edge parent -> child, removing the edge at
    /// zero. Unbalanced decrements are ignored.
    pub fn dec_edge(&mut self, parent: ObjHandle, child: ObjHandle) {
        let edges = &mut self.get_mut(parent).out_edges;
        if let Some(count) = edges.get_mut(&child) {
            *count -= 1;
            if *count == 0 {
                edges.remove(&child);
            }
        }
    }

    /// Writes `parent.key = value`, balancing edges: the previous object
    /// entry (if any) loses an edge, a new object value gains one.
    pub fn set_member(&mut self, parent: ObjHandle, key: Symbol, value: Entity) {
        let previous = self.get_mut(parent).members.insert(key, value);
        if let Some(Entity::Object(old)) = previous {
            self.dec_edge(parent, old);
        }
        if let Entity::Object(child) = value {
            self.inc_edge(parent, child);
        }
    }

    /// Writes `parent.key = child` for an object value.
    pub fn set_member_obj(&mut self, parent: ObjHandle, key: Symbol, child: ObjHandle) {
        self.set_member(parent, key, Entity::Object(child));
    }

    /// Removes a member, balancing edges.
    pub fn remove_member(&mut self, parent: ObjHandle, key: Symbol) -> Option<Entity> {
        let previous = self.get_mut(parent).members.shift_remove(&key);
        if let Some(Entity::Object(old)) = previous {
            self.dec_edge(parent, old);
        }
        previous
    }

    /// Appends to an array object, adding an edge for object values.
    pub fn array_add(&mut self, array: ObjHandle, value: Entity) {
        if let Payload::Array(items) = &mut self.get_mut(array).payload {
            items.push(value);
        }
        if let Entity::Object(child) = value {
            self.inc_edge(array, child);
        }
    }

    /// Writes one array slot, balancing edges. Arrays grow to fit; new slots
    /// fill with nil.
    pub fn array_set(&mut self, array: ObjHandle, index: usize, value: Entity) {
        let previous = match &mut self.get_mut(array).payload {
            Payload::Array(items) => {
                if index >= items.len() {
                    items.resize(index + 1, Entity::Nil);
                }
                std::mem::replace(&mut items[index], value)
            }
            _ => return,
        };
        if let Entity::Object(old) = previous {
            self.dec_edge(array, old);
        }
        if let Entity::Object(child) = value {
            self.inc_edge(array, child);
        }
    }

    /// Removes one array slot, balancing edges.
    pub fn array_remove(&mut self, array: ObjHandle, index: usize) -> Entity {
        let removed = match &mut self.get_mut(array).payload {
            Payload::Array(items) if index < items.len() => items.remove(index),
            _ => return Entity::Nil,
        };
        if let Entity::Object(old) = removed {
            self.dec_edge(array, old);
        }
        removed
    }

    /// Writes one tuple slot at creation time, adding an edge for object
    /// values. Tuples are fixed length and never overwritten.
    pub fn tuple_set(&mut self, tuple: ObjHandle, index: usize, value: Entity) {
        if let Payload::Tuple(items) = &mut self.get_mut(tuple).payload {
            if index < items.len() {
                items[index] = value;
            }
        }
        if let Entity::Object(child) = value {
            self.inc_edge(tuple, child);
        }
    }

    /// Frees every object unreachable from the roots over positive-count
    /// edges, returning the number of nodes destroyed. Delete hooks run
    /// before member maps are dropped; destruction order within an
    /// unreachable component is unspecified.
    pub fn collect_garbage(&mut self) -> u32 {
        let mut reachable: HashSet<usize> = HashSet::new();
        let mut frontier: Vec<usize> = Vec::new();

        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(object) = slot {
                if object.is_root {
                    reachable.insert(index);
                    frontier.push(index);
                }
            }
        }

        while let Some(index) = frontier.pop() {
            let Some(object) = &self.slots[index] else {
                continue;
            };
            for (child, count) in &object.out_edges {
                if *count > 0 && !reachable.contains(&child.index()) {
                    reachable.insert(child.index());
                    frontier.push(child.index());
                }
            }
        }

        let mut freed = 0u32;
        for index in 0..self.slots.len() {
            if self.slots[index].is_none() || reachable.contains(&index) {
                continue;
            }
            let mut object = self.slots[index].take().expect("checked above");
            if let Some(hook) = object.delete_hook {
                hook(&mut object);
            }
            drop(object);
            self.free.push(index);
            freed += 1;
        }
        if freed > 0 {
            log::debug!(
                "collect_garbage freed {freed} objects, {} live",
                self.live_count()
            );
        }
        freed
    }
}
