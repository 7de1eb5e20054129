/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! The desired flow table and its two indices.

use openflow::flow::Match;

use std::collections::{hash_map, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

/// A flow's identity: `(table_id, priority, match)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowKey {
    pub table_id: u8,
    pub priority: u16,
    pub match_: Match,
}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ((u32::from(self.table_id) << 16) | u32::from(self.priority)).hash(state);
        self.match_.hash(state);
    }
}

/// An OpenFlow flow: a key, an opaque encoded action list, and the id of
/// the logical source that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flow {
    pub key: FlowKey,
    pub ofpacts: Vec<u8>,
    pub owner: Uuid,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "table_id={}, priority={}, {}, actions={}",
            self.key.table_id,
            self.key.priority,
            self.key.match_,
            ofpacts_to_string(&self.ofpacts)
        )
    }
}

pub fn ofpacts_to_string(ofpacts: &[u8]) -> String {
    let mut s = String::with_capacity(2 * ofpacts.len().max(2));
    for byte in ofpacts {
        s.push_str(&format!("{:02x}", byte));
    }
    if s.is_empty() {
        s.push_str("drop");
    }
    s
}

/// What [`FlowTable::insert`] did with a new flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    /// The same owner already had this key with byte-identical actions;
    /// the new flow was dropped.
    Duplicate,
    /// The same owner already had this key with different actions; the
    /// existing flow's actions were replaced by the newer ones.
    ReplacedActions,
}

/// The desired flow set, indexed by match key and by owner.
///
/// Multiple owners may produce flows with the same key; the reconciler picks
/// a single winner per key.  Within one owner, a key appears at most once,
/// which `insert` enforces.
#[derive(Debug, Default)]
pub struct FlowTable {
    by_match: HashMap<FlowKey, Vec<Flow>>,
    by_owner: HashMap<Uuid, HashSet<FlowKey>>,
}

impl FlowTable {
    pub fn new() -> FlowTable {
        FlowTable::default()
    }

    pub fn insert(&mut self, flow: Flow) -> InsertOutcome {
        let flows = self.by_match.entry(flow.key.clone()).or_default();
        for existing in flows.iter_mut() {
            if existing.owner == flow.owner {
                if existing.ofpacts == flow.ofpacts {
                    return InsertOutcome::Duplicate;
                }
                // The newer actions are the more likely to be correct.
                existing.ofpacts = flow.ofpacts;
                return InsertOutcome::ReplacedActions;
            }
        }
        self.by_owner
            .entry(flow.owner)
            .or_default()
            .insert(flow.key.clone());
        flows.push(flow);
        InsertOutcome::Added
    }

    /// Removes every flow produced by `owner`.
    pub fn remove_owner(&mut self, owner: Uuid) {
        let keys = match self.by_owner.remove(&owner) {
            Some(keys) => keys,
            None => return,
        };
        for key in keys {
            if let hash_map::Entry::Occupied(mut entry) = self.by_match.entry(key) {
                entry.get_mut().retain(|flow| flow.owner != owner);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_match.clear();
        self.by_owner.clear();
    }

    /// All desired flows sharing `key`.
    pub fn get(&self, key: &FlowKey) -> &[Flow] {
        self.by_match.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &[Flow])> {
        self.by_match
            .iter()
            .map(|(key, flows)| (key, flows.as_slice()))
    }

    pub fn flow_count(&self) -> usize {
        self.by_match.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_match.is_empty()
    }

    /// Picks the winner among desired flows sharing a key: the one with the
    /// least owner id.  Ties cannot occur because `(owner, key)` is unique,
    /// so the choice depends only on the set of flows, not their order.
    pub fn select(flows: &[Flow]) -> Option<&Flow> {
        flows.iter().min_by(|a, b| a.owner.cmp(&b.owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(priority: u16, actions: &[u8], owner: u128) -> Flow {
        Flow {
            key: FlowKey {
                table_id: 0,
                priority,
                match_: Match::catchall(),
            },
            ofpacts: actions.to_vec(),
            owner: Uuid::from_u128(owner),
        }
    }

    #[test]
    fn duplicate_same_actions_is_dropped() {
        let mut table = FlowTable::new();
        assert_eq!(table.insert(flow(1, b"a", 1)), InsertOutcome::Added);
        assert_eq!(table.insert(flow(1, b"a", 1)), InsertOutcome::Duplicate);
        assert_eq!(table.flow_count(), 1);
    }

    #[test]
    fn duplicate_new_actions_win() {
        let mut table = FlowTable::new();
        table.insert(flow(1, b"old", 1));
        assert_eq!(
            table.insert(flow(1, b"new", 1)),
            InsertOutcome::ReplacedActions
        );
        let key = flow(1, b"", 1).key;
        assert_eq!(table.get(&key)[0].ofpacts, b"new");
        assert_eq!(table.flow_count(), 1);
    }

    #[test]
    fn cross_owner_collision_keeps_both() {
        let mut table = FlowTable::new();
        table.insert(flow(1, b"a", 2));
        table.insert(flow(1, b"b", 1));
        let key = flow(1, b"", 1).key;
        assert_eq!(table.get(&key).len(), 2);
        let winner = FlowTable::select(table.get(&key)).unwrap();
        assert_eq!(winner.owner, Uuid::from_u128(1));
        assert_eq!(winner.ofpacts, b"b");
    }

    #[test]
    fn remove_owner_leaves_other_owners() {
        let mut table = FlowTable::new();
        table.insert(flow(1, b"a", 1));
        table.insert(flow(2, b"b", 1));
        table.insert(flow(1, b"c", 2));
        table.remove_owner(Uuid::from_u128(1));
        assert_eq!(table.flow_count(), 1);
        let key = flow(1, b"", 2).key;
        assert_eq!(table.get(&key)[0].owner, Uuid::from_u128(2));
        // Removing an unknown owner is a no-op.
        table.remove_owner(Uuid::from_u128(9));
        assert_eq!(table.flow_count(), 1);
    }

    #[test]
    fn clear_empties_both_indices() {
        let mut table = FlowTable::new();
        table.insert(flow(1, b"a", 1));
        table.insert(flow(2, b"b", 2));
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.flow_count(), 0);
        table.insert(flow(1, b"a", 1));
        assert_eq!(table.flow_count(), 1);
    }
}
