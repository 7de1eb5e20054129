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

//! The group table: what producers want installed and what the reconciler
//! believes is installed, plus the group-id allocation bitmap.

use bitvec::prelude::*;

use std::collections::HashMap;

/// Group ids the bitmap can allocate.
pub const MAX_GROUPS: usize = 65536;

/// One group: its id and its textual descriptor (buckets and all, without
/// the `group_id=` prefix).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupInfo {
    pub group_id: u32,
    pub group: String,
}

/// Paired desired/existing group sets.  Producers fill `desired` each tick;
/// the reconciler converges `existing` to it and drains `desired`.
pub struct GroupTable {
    desired: HashMap<u32, GroupInfo>,
    existing: HashMap<u32, GroupInfo>,
    group_ids: BitVec,
}

impl GroupTable {
    pub fn new() -> GroupTable {
        GroupTable {
            desired: HashMap::new(),
            existing: HashMap::new(),
            group_ids: bitvec![0; MAX_GROUPS],
        }
    }

    /// Claims the lowest free group id.
    pub fn allocate_id(&mut self) -> Option<u32> {
        let id = self.group_ids.iter_zeros().next()?;
        self.group_ids.set(id, true);
        Some(id as u32)
    }

    pub fn release_id(&mut self, group_id: u32) {
        if let Some(mut bit) = self.group_ids.get_mut(group_id as usize) {
            *bit = false;
        }
    }

    pub fn id_allocated(&self, group_id: u32) -> bool {
        self.group_ids
            .get(group_id as usize)
            .map_or(false, |bit| *bit)
    }

    /// Adds a group to the desired set, claiming its id.  A second desired
    /// group with the same id replaces the first.
    pub fn insert_desired(&mut self, group_id: u32, group: String) {
        if (group_id as usize) < MAX_GROUPS {
            self.group_ids.set(group_id as usize, true);
        }
        self.desired.insert(group_id, GroupInfo { group_id, group });
    }

    pub fn desired(&self) -> impl Iterator<Item = &GroupInfo> {
        self.desired.values()
    }

    pub fn desired_contains(&self, group_id: u32) -> bool {
        self.desired.contains_key(&group_id)
    }

    pub fn desired_is_empty(&self) -> bool {
        self.desired.is_empty()
    }

    pub fn existing(&self) -> impl Iterator<Item = &GroupInfo> {
        self.existing.values()
    }

    pub fn existing_contains(&self, group_id: u32) -> bool {
        self.existing.contains_key(&group_id)
    }

    pub fn existing_ids(&self) -> Vec<u32> {
        self.existing.keys().copied().collect()
    }

    /// Removes one group from the existing set, releasing its id.
    pub fn remove_existing(&mut self, group_id: u32) {
        self.existing.remove(&group_id);
        self.release_id(group_id);
    }

    /// Drops every desired group, releasing their ids.
    pub fn clear_desired(&mut self) {
        for (_, group) in self.desired.drain() {
            if let Some(mut bit) = self.group_ids.get_mut(group.group_id as usize) {
                *bit = false;
            }
        }
    }

    /// Drops every existing group, releasing their ids.
    pub fn clear_existing(&mut self) {
        for (_, group) in self.existing.drain() {
            if let Some(mut bit) = self.group_ids.get_mut(group.group_id as usize) {
                *bit = false;
            }
        }
    }

    /// Moves the desired set into the existing set.  A desired entry whose
    /// id is already in the existing set is dropped: a group for that id is
    /// already installed.
    pub fn promote_desired(&mut self) {
        for (group_id, group) in self.desired.drain() {
            self.existing.entry(group_id).or_insert(group);
        }
    }
}

impl Default for GroupTable {
    fn default() -> GroupTable {
        GroupTable::new()
    }
}
