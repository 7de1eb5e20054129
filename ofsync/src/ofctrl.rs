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

//! The switch-side synchronization engine.
//!
//! A five-state machine drives each connection: negotiate a tunnel-metadata
//! option slot, clear the switch to a known baseline, then keep the switch
//! converged on the desired flow and group tables with incremental
//! modifications.  The engine never blocks; the embedder ticks it with
//! [`Ofctrl::run`] and reconciles with [`Ofctrl::put`].

use crate::flow_table::{ofpacts_to_string, Flow, FlowKey, FlowTable, InsertOutcome};
use crate::group_table::GroupTable;
use crate::rate_limit::RateLimit;
use crate::swconn::SwitchLink;

use openflow::errors::OfpErr;
use openflow::flow::{self, FlowMod, FlowModCommand, Match};
use openflow::group::{self, GroupMod, GroupModCommand, GroupType};
use openflow::msgs::{self, OfpType};
use openflow::protocol::{Protocol, Version};
use openflow::rconn::{Rconn, DSCP_DEFAULT};
use openflow::tlv::{TlvMap, TlvTableMod, TlvTableReply, NXTTMC_ADD};

use std::cell::RefCell;
use std::collections::HashMap;
use std::env;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use uuid::Uuid;

/// An `MFF_*` metadata field id, as exposed to flow producers.
pub type MfFieldId = u32;

/// Field id of the first tunnel-metadata slot; slot `n` maps to
/// `MFF_TUN_METADATA0 + n`.
pub const MFF_TUN_METADATA0: MfFieldId = 41;

/// Tunnel-metadata slots a switch can expose.
pub const TUN_METADATA_NUM_OPTS: u16 = 64;

/// The Geneve option this engine negotiates: the triple that carries the
/// logical datapath metadata in encapsulated traffic.
pub const TUN_OPT_CLASS: u16 = 0x0102;
pub const TUN_OPT_TYPE: u8 = 0x80;
pub const TUN_OPT_LEN: u8 = 4;

const OFP_VERSION: Version = Version::OFP13;
const OFP_PROTOCOL: Protocol = Protocol::OF13_OXM;

/// Inbound messages consumed per tick.  Draining stops early when the state
/// changes, because later messages must be interpreted in the new state.
const MAX_RECV_PER_RUN: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Fresh connection; sends the TLV table request.
    New,
    /// Waiting for the TLV table reply.
    TlvTableRequested,
    /// Sent a TLV table modification plus a barrier; waiting for either the
    /// barrier reply or an error.
    TlvTableModSent,
    /// Clears the switch's flows and groups, then moves on.  One-shot.
    ClearFlows,
    /// Steady state: reconciliation is enabled.  Terminal while connected.
    UpdateFlows,
}

/// The synchronization engine.  One instance per switch; all state that the
/// engine needs across ticks lives here.  Dropping it closes the connection
/// and frees the tables.
pub struct Ofctrl<L: SwitchLink = Rconn> {
    swconn: L,

    /// Last seen connection sequence number.  When this differs from
    /// `swconn.connection_seqno()`, the connection was re-established and
    /// the switch has forgotten everything.
    seqno: u64,

    state: State,

    /// Transaction ids for requests in flight to the switch.
    xid: u32,
    xid2: u32,

    /// The tunnel-metadata field we negotiated.  In `TlvTableModSent` this
    /// is the option we requested (we don't know whether we obtained it
    /// yet); in `ClearFlows` and `UpdateFlows` it's the option we have.
    /// `None` means tunnel metadata is unavailable.
    mff_tun_metadata: Option<MfFieldId>,

    desired_flows: FlowTable,

    /// What we believe the switch has installed: at most one flow per key,
    /// touched only by the reconciler and the clear state.
    installed_flows: HashMap<FlowKey, Flow>,

    /// The group table handed to the first `put`, retained so the clear
    /// state can reset its existing set after a reconnect.
    groups: Option<Rc<RefCell<GroupTable>>>,

    rl_error: RateLimit,
    rl_ignored: RateLimit,
    rl_duplicate: RateLimit,
    rl_duplicate_mod: RateLimit,
    rl_group: RateLimit,
}

impl Ofctrl {
    /// Creates an engine connected to nothing, with the production switch
    /// connection (5 s inactivity probe, 5 s maximum reconnection backoff,
    /// default DSCP, OpenFlow 1.3).
    pub fn new() -> Ofctrl {
        Ofctrl::with_link(Rconn::new(5, 5, DSCP_DEFAULT, OFP_VERSION.into()))
    }
}

impl Default for Ofctrl {
    fn default() -> Ofctrl {
        Ofctrl::new()
    }
}

impl<L: SwitchLink> Ofctrl<L> {
    /// Creates an engine over an arbitrary switch link.  This is how tests
    /// substitute a mock switch.
    pub fn with_link(swconn: L) -> Ofctrl<L> {
        Ofctrl {
            swconn,
            seqno: 0,
            state: State::New,
            xid: 0,
            xid2: 0,
            mff_tun_metadata: None,
            desired_flows: FlowTable::new(),
            installed_flows: HashMap::new(),
            groups: None,
            rl_error: RateLimit::new(30, Duration::from_secs(300)),
            rl_ignored: RateLimit::new(30, Duration::from_secs(300)),
            rl_duplicate: RateLimit::new(5, Duration::from_secs(1)),
            rl_duplicate_mod: RateLimit::new(5, Duration::from_secs(1)),
            rl_group: RateLimit::new(5, Duration::from_secs(1)),
        }
    }

    /// Drives one tick of the state machine against the bridge named
    /// `br_int`, or disconnects if `br_int` is `None`.  Returns the
    /// negotiated tunnel-metadata field id once the engine has one and the
    /// connection has reached the flow-updating states, otherwise `None`.
    pub fn run(&mut self, br_int: Option<&str>) -> Option<MfFieldId> {
        match br_int {
            Some(name) => {
                let target = switch_target(name);
                if self.swconn.target() != target {
                    info!("{}: connecting to switch", target);
                    self.swconn.connect(&target);
                }
            }
            None => self.swconn.disconnect(),
        }

        self.swconn.run();

        if !self.swconn.is_connected() {
            return None;
        }
        if self.seqno != self.swconn.connection_seqno() {
            self.seqno = self.swconn.connection_seqno();
            self.state = State::New;
        }

        let mut old_state;
        loop {
            old_state = self.state;
            match self.state {
                State::New => self.run_new(),
                // Waiting for a reply; nothing to do until it arrives.
                State::TlvTableRequested | State::TlvTableModSent => (),
                State::ClearFlows => self.run_clear_flows(),
                // Terminal while connected.  Being here enables put().
                State::UpdateFlows => (),
            }
            if self.state == old_state {
                break;
            }
        }

        for _ in 0..MAX_RECV_PER_RUN {
            if self.state != old_state {
                break;
            }
            let msg = match self.swconn.recv() {
                Some(msg) => msg,
                None => break,
            };
            match OfpType::decode(&msg) {
                Ok(type_) => self.recv_state(&msg, type_),
                Err(error) => {
                    warn!("could not decode OpenFlow message ({}): {:02x?}", error, msg)
                }
            }
        }

        match self.state {
            State::ClearFlows | State::UpdateFlows => self.mff_tun_metadata,
            _ => None,
        }
    }

    /// Registers the engine's wakeups with the poll loop.
    pub fn wait(&self) {
        self.swconn.run_wait();
        self.swconn.recv_wait();
    }

    fn run_new(&mut self) {
        self.xid = queue_msg(&mut self.swconn, openflow::tlv::encode_tlv_table_request());
        self.state = State::TlvTableRequested;
    }

    fn run_clear_flows(&mut self) {
        queue_flow_mod(
            &mut self.swconn,
            FlowMod {
                table_id: flow::OFPTT_ALL,
                match_: Match::catchall(),
                command: FlowModCommand::Delete { strict: false },
                ..Default::default()
            },
        );
        debug!("clearing all flows");

        queue_group_mod(
            &mut self.swconn,
            &GroupMod {
                command: GroupModCommand::Delete,
                type_: GroupType::All,
                group_id: group::OFPG_ALL,
                command_bucket_id: group::OFPG15_BUCKET_ALL,
                buckets: Vec::new(),
            },
        );

        // Empty the in-memory picture of the switch to match its state.
        self.installed_flows.clear();
        if let Some(groups) = &self.groups {
            groups.borrow_mut().clear_existing();
        }

        self.state = State::UpdateFlows;
    }

    fn recv_state(&mut self, msg: &[u8], type_: OfpType) {
        match self.state {
            // run_new() leaves New synchronously, before any message is
            // consumed.
            State::New => unreachable!("message consumed in state New"),
            State::TlvTableRequested => self.recv_tlv_table_requested(msg, type_),
            State::TlvTableModSent => self.recv_tlv_table_mod_sent(msg, type_),
            State::ClearFlows | State::UpdateFlows => self.recv_other(msg, type_),
        }
    }

    fn recv_tlv_table_requested(&mut self, msg: &[u8], type_: OfpType) {
        if msgs::xid_of(msg) != self.xid {
            return self.recv_other(msg, type_);
        }
        match type_ {
            OfpType::TlvTableReply => {
                let reply = match TlvTableReply::decode(msg) {
                    Ok(reply) => reply,
                    Err(error) => {
                        error!("failed to decode TLV table reply ({})", error);
                        return self.disable_tun_metadata();
                    }
                };

                let mut md_free = u64::MAX;
                for map in &reply.mappings {
                    if map.option_class == TUN_OPT_CLASS
                        && map.option_type == TUN_OPT_TYPE
                        && map.option_len == TUN_OPT_LEN
                    {
                        if map.index >= TUN_METADATA_NUM_OPTS {
                            error!(
                                "desired tunnel option 0x{:x},{},{} already in use \
                                 with unsupported index {}",
                                map.option_class, map.option_type, map.option_len, map.index
                            );
                            return self.disable_tun_metadata();
                        }
                        self.mff_tun_metadata =
                            Some(MFF_TUN_METADATA0 + MfFieldId::from(map.index));
                        self.state = State::ClearFlows;
                        return;
                    }
                    if map.index < TUN_METADATA_NUM_OPTS {
                        md_free &= !(1u64 << map.index);
                    }
                }

                debug!("tunnel metadata option not found");
                if md_free == 0 {
                    error!("no tunnel metadata options free for our use");
                    return self.disable_tun_metadata();
                }

                let index = md_free.trailing_zeros() as u16;
                self.mff_tun_metadata = Some(MFF_TUN_METADATA0 + MfFieldId::from(index));
                let ttm = TlvTableMod {
                    command: NXTTMC_ADD,
                    mappings: vec![TlvMap {
                        option_class: TUN_OPT_CLASS,
                        option_type: TUN_OPT_TYPE,
                        option_len: TUN_OPT_LEN,
                        index,
                    }],
                };
                self.xid = queue_msg(&mut self.swconn, ttm.encode(OFP_VERSION));
                self.xid2 = queue_msg(&mut self.swconn, msgs::encode_barrier_request());
                self.state = State::TlvTableModSent;
            }
            OfpType::Error => {
                error!(
                    "switch refused to allocate tunnel option ({})",
                    OfpErr::decode_msg(msg)
                );
                self.disable_tun_metadata();
            }
            _ => {
                error!("unexpected reply to TLV table request ({})", type_);
                self.disable_tun_metadata();
            }
        }
    }

    fn recv_tlv_table_mod_sent(&mut self, msg: &[u8], type_: OfpType) {
        let xid = msgs::xid_of(msg);
        if xid != self.xid && xid != self.xid2 {
            return self.recv_other(msg, type_);
        }
        if xid == self.xid2 && type_ == OfpType::BarrierReply {
            // The modification went through; mff_tun_metadata already holds
            // the slot we requested.
            self.state = State::ClearFlows;
        } else if xid == self.xid && type_ == OfpType::Error {
            let error = OfpErr::decode_msg(msg);
            match error {
                OfpErr::TlvAlreadyMapped | OfpErr::TlvDupEntry => {
                    info!(
                        "raced with another controller adding tunnel option ({}); \
                         trying again",
                        error
                    );
                    self.state = State::New;
                }
                _ => {
                    error!("error adding tunnel option ({})", error);
                    self.disable_tun_metadata();
                }
            }
        } else {
            error!(
                "unexpected reply to tunnel option allocation request ({})",
                type_
            );
            self.state = State::ClearFlows;
        }
    }

    fn disable_tun_metadata(&mut self) {
        self.mff_tun_metadata = None;
        self.state = State::ClearFlows;
    }

    /// Handles a message unrelated to any request the current state is
    /// waiting on.
    fn recv_other(&mut self, msg: &[u8], type_: OfpType) {
        match type_ {
            OfpType::EchoRequest => {
                queue_msg(&mut self.swconn, msgs::make_echo_reply(msg));
            }
            OfpType::Error => {
                if !self.rl_error.should_drop() {
                    info!("OpenFlow error: {}", OfpErr::decode_msg(msg));
                }
            }
            OfpType::EchoReply
            | OfpType::BarrierReply
            | OfpType::PacketIn
            | OfpType::PortStatus
            | OfpType::FlowRemoved => (),
            _ => {
                if !self.rl_ignored.should_drop() {
                    debug!("OpenFlow packet ignored: {}", type_);
                }
            }
        }
    }

    /// Adds a flow to the desired set on behalf of `owner`.
    ///
    /// Any number of flows may share an owner, but `(owner, table_id,
    /// priority, match)` must be unique.  A duplicate indicates a bug in the
    /// producer: with identical actions the new flow is quietly dropped,
    /// with different actions the newer actions replace the old ones.
    ///
    /// This only assembles the desired table in memory; nothing reaches the
    /// switch until the next [`Ofctrl::put`].
    pub fn add_flow(
        &mut self,
        table_id: u8,
        priority: u16,
        match_: &Match,
        actions: &[u8],
        owner: Uuid,
    ) {
        let flow = Flow {
            key: FlowKey {
                table_id,
                priority,
                match_: match_.clone(),
            },
            ofpacts: actions.to_vec(),
            owner,
        };
        match self.desired_flows.insert(flow) {
            InsertOutcome::Added => (),
            InsertOutcome::Duplicate => {
                if !self.rl_duplicate.should_drop() {
                    info!(
                        "duplicate flow for parent {}: table_id={}, priority={}, {}, actions={}",
                        owner,
                        table_id,
                        priority,
                        match_,
                        ofpacts_to_string(actions)
                    );
                }
            }
            InsertOutcome::ReplacedActions => {
                if !self.rl_duplicate_mod.should_drop() {
                    warn!(
                        "duplicate flow with modified action for parent {}: \
                         table_id={}, priority={}, {}, actions={}",
                        owner,
                        table_id,
                        priority,
                        match_,
                        ofpacts_to_string(actions)
                    );
                }
            }
        }
    }

    /// Removes every desired flow owned by `owner`.
    pub fn remove_flows(&mut self, owner: Uuid) {
        self.desired_flows.remove_owner(owner);
    }

    /// Removes every desired flow owned by `owner` — all of them, not just
    /// the one matching the key — then adds the given flow.
    pub fn set_flow(
        &mut self,
        table_id: u8,
        priority: u16,
        match_: &Match,
        actions: &[u8],
        owner: Uuid,
    ) {
        self.remove_flows(owner);
        self.add_flow(table_id, priority, match_, actions, owner);
    }

    /// Drops the entire desired flow set.
    pub fn flow_table_clear(&mut self) {
        self.desired_flows.clear();
    }

    /// Reconciles the switch toward the desired flow set and
    /// `group_table`'s desired groups.
    ///
    /// Whether or not anything can be sent, this drains
    /// `group_table.desired`; producers repopulate it every tick.  The
    /// table handed to the first call is retained until the engine is
    /// dropped.
    ///
    /// Call after [`Ofctrl::run`] within the same tick.
    pub fn put(&mut self, group_table: &Rc<RefCell<GroupTable>>) {
        if self.groups.is_none() {
            self.groups = Some(Rc::clone(group_table));
        }

        let Ofctrl {
            swconn,
            state,
            desired_flows,
            installed_flows,
            rl_group,
            ..
        } = self;
        let mut groups = group_table.borrow_mut();

        // The flow table can be updated if the connection is in the right
        // state and not backlogged with previous modifications.
        if *state != State::UpdateFlows || swconn.in_flight() > 0 {
            groups.clear_desired();
            return;
        }

        // Install new groups before any flow that might reference them.
        for desired in groups.desired() {
            if !groups.existing_contains(desired.group_id) {
                let group_string = format!("group_id={},{}", desired.group_id, desired.group);
                match GroupMod::parse(GroupModCommand::Add, &group_string) {
                    Ok(gm) => queue_group_mod(swconn, &gm),
                    Err(error) => {
                        if !rl_group.should_drop() {
                            error!("new group {} {}", error, group_string);
                        }
                    }
                }
            }
        }

        // Compare the installed flows against the desired ones.  Installed
        // flows that are no longer desired get deleted; installed flows
        // whose winning desired counterpart has different actions get
        // modified in place.
        let mut stale = Vec::new();
        for (key, installed) in installed_flows.iter_mut() {
            match FlowTable::select(desired_flows.get(key)) {
                None => {
                    queue_flow_mod(
                        swconn,
                        FlowMod {
                            table_id: key.table_id,
                            priority: key.priority,
                            match_: key.match_.clone(),
                            command: FlowModCommand::Delete { strict: true },
                            ..Default::default()
                        },
                    );
                    debug!("removing installed flow: {}", installed);
                    stale.push(key.clone());
                }
                Some(desired) => {
                    if installed.owner != desired.owner {
                        // The previous winner went away; adopt the new one.
                        installed.owner = desired.owner;
                    }
                    if installed.ofpacts != desired.ofpacts {
                        queue_flow_mod(
                            swconn,
                            FlowMod {
                                table_id: key.table_id,
                                priority: key.priority,
                                match_: key.match_.clone(),
                                ofpacts: desired.ofpacts.clone(),
                                command: FlowModCommand::Modify { strict: true },
                                ..Default::default()
                            },
                        );
                        debug!("updating installed flow: {}", installed);
                        installed.ofpacts = desired.ofpacts.clone();
                    }
                }
            }
        }
        for key in stale {
            installed_flows.remove(&key);
        }

        // Add desired flows whose key has nothing installed yet.
        for (key, candidates) in desired_flows.iter() {
            if installed_flows.contains_key(key) {
                continue;
            }
            if let Some(desired) = FlowTable::select(candidates) {
                queue_flow_mod(
                    swconn,
                    FlowMod {
                        table_id: key.table_id,
                        priority: key.priority,
                        match_: key.match_.clone(),
                        ofpacts: desired.ofpacts.clone(),
                        command: FlowModCommand::Add,
                        ..Default::default()
                    },
                );
                debug!("adding installed flow: {}", desired);
                installed_flows.insert(key.clone(), desired.clone());
            }
        }

        // Delete groups that are installed but no longer desired.  This
        // runs after the flow changes so no flow still references them.
        for group_id in groups.existing_ids() {
            if !groups.desired_contains(group_id) {
                let group_string = format!("group_id={}", group_id);
                match GroupMod::parse(GroupModCommand::Delete, &group_string) {
                    Ok(gm) => queue_group_mod(swconn, &gm),
                    Err(error) => {
                        if !rl_group.should_drop() {
                            error!("error deleting group {}: {}", group_id, error);
                        }
                    }
                }
                groups.remove_existing(group_id);
            }
        }

        // What was desired is now, as far as we know, existing.
        groups.promote_desired();
    }
}

/// Queues `msg` on the link and returns its transaction id.
fn queue_msg<L: SwitchLink>(swconn: &mut L, msg: Vec<u8>) -> u32 {
    let xid = msgs::xid_of(&msg);
    if let Err(error) = swconn.send(msg) {
        debug!("failed to queue OpenFlow message ({})", error);
    }
    xid
}

fn queue_flow_mod<L: SwitchLink>(swconn: &mut L, mut fm: FlowMod) {
    fm.buffer_id = flow::OFP_NO_BUFFER;
    fm.out_port = flow::OFPP_ANY;
    fm.out_group = flow::OFPG_ANY;
    queue_msg(swconn, fm.encode(OFP_PROTOCOL));
}

fn queue_group_mod<L: SwitchLink>(swconn: &mut L, gm: &GroupMod) {
    queue_msg(swconn, gm.encode(OFP_VERSION));
}

/// The management socket for a bridge: `unix:<rundir>/<bridge>.mgmt`.
fn switch_target(br_name: &str) -> String {
    let rundir =
        env::var("OVS_RUNDIR").unwrap_or_else(|_| String::from("/var/run/openvswitch"));
    format!("unix:{}/{}.mgmt", rundir, br_name)
}
