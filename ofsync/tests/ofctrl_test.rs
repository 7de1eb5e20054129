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

//! End-to-end scenarios against a scripted switch.

mod common;

use common::{
    mock_engine, reply_barrier, reply_tlv, sent_types, settle, xid_of_sent, ModelSwitch, BRIDGE,
};

use ofsync::{GroupTable, MFF_TUN_METADATA0};

use openflow::errors::OfpErr;
use openflow::flow::{FlowMod, FlowModCommand, Match, OFPTT_ALL};
use openflow::group::{GroupMod, GroupModCommand, OFPG_ALL};
use openflow::msgs::{self, OfpType};
use openflow::tlv::{TlvMap, TlvTableMod, NXTTMC_ADD};

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use uuid::Uuid;

fn tun_map(index: u16) -> TlvMap {
    TlvMap {
        option_class: ofsync::TUN_OPT_CLASS,
        option_type: ofsync::TUN_OPT_TYPE,
        option_len: ofsync::TUN_OPT_LEN,
        index,
    }
}

fn group_table() -> Rc<RefCell<GroupTable>> {
    Rc::new(RefCell::new(GroupTable::new()))
}

fn match1() -> Match {
    Match::from_oxm(vec![0x11, 0x22, 0x33])
}

/// Fresh negotiation against an empty TLV table: the engine claims slot 0,
/// clears the switch, and installs the one desired flow.
#[test]
fn fresh_negotiation_claims_slot_zero() -> Result<()> {
    let (mut engine, state) = mock_engine();
    let owner = Uuid::from_u128(1);

    assert!(engine.run(Some(BRIDGE)).is_none());
    assert_eq!(
        sent_types(&state.borrow().sent),
        vec![OfpType::TlvTableRequest]
    );

    reply_tlv(&state, Vec::new());
    state.borrow_mut().drain_sent();
    assert!(engine.run(Some(BRIDGE)).is_none());
    {
        let state = state.borrow();
        assert_eq!(
            sent_types(&state.sent),
            vec![OfpType::TlvTableMod, OfpType::BarrierRequest]
        );
        let ttm = TlvTableMod::decode(&state.sent[0])?;
        assert_eq!(ttm.command, NXTTMC_ADD);
        assert_eq!(ttm.mappings, vec![tun_map(0)]);
    }

    reply_barrier(&state);
    state.borrow_mut().drain_sent();
    assert_eq!(engine.run(Some(BRIDGE)), Some(MFF_TUN_METADATA0));

    // The clear-everything cluster goes out before any reconciliation.
    assert_eq!(engine.run(Some(BRIDGE)), Some(MFF_TUN_METADATA0));
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::FlowMod, OfpType::GroupMod]);
    let clear_flows = FlowMod::decode(&sent[0])?;
    assert_eq!(clear_flows.table_id, OFPTT_ALL);
    assert_eq!(clear_flows.command, FlowModCommand::Delete { strict: false });
    assert!(clear_flows.match_.is_catchall());
    let clear_groups = GroupMod::decode(&sent[1])?;
    assert_eq!(clear_groups.command, GroupModCommand::Delete);
    assert_eq!(clear_groups.group_id, OFPG_ALL);

    engine.add_flow(0, 100, &match1(), b"actions1", owner);
    let groups = group_table();
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::FlowMod]);
    let add = FlowMod::decode(&sent[0])?;
    assert_eq!(add.command, FlowModCommand::Add);
    assert_eq!(add.table_id, 0);
    assert_eq!(add.priority, 100);
    assert_eq!(add.match_, match1());
    assert_eq!(add.ofpacts, b"actions1");
    Ok(())
}

/// The desired option is already mapped, at slot 3: adopt it without
/// sending any modification.
#[test]
fn adopts_existing_mapping() -> Result<()> {
    let (mut engine, state) = mock_engine();

    assert!(engine.run(Some(BRIDGE)).is_none());
    reply_tlv(&state, vec![tun_map(3)]);
    state.borrow_mut().drain_sent();
    assert_eq!(engine.run(Some(BRIDGE)), Some(MFF_TUN_METADATA0 + 3));
    let sent = state.borrow_mut().drain_sent();
    assert!(!sent_types(&sent).contains(&OfpType::TlvTableMod));
    Ok(())
}

/// The free-slot scan skips slots claimed by other options.
#[test]
fn claims_lowest_free_slot() -> Result<()> {
    let (mut engine, state) = mock_engine();

    assert!(engine.run(Some(BRIDGE)).is_none());
    let other = TlvMap {
        option_class: 0xffff,
        option_type: 1,
        option_len: 8,
        index: 0,
    };
    reply_tlv(&state, vec![other]);
    state.borrow_mut().drain_sent();
    assert!(engine.run(Some(BRIDGE)).is_none());
    let sent = state.borrow_mut().drain_sent();
    let ttm = TlvTableMod::decode(&sent[0])?;
    assert_eq!(ttm.mappings, vec![tun_map(1)]);
    Ok(())
}

/// Racing with another controller: the modification fails with "already
/// mapped", and the engine rescans instead of giving up.
#[test]
fn allocation_race_rescans() -> Result<()> {
    let (mut engine, state) = mock_engine();

    assert!(engine.run(Some(BRIDGE)).is_none());
    reply_tlv(&state, Vec::new());
    state.borrow_mut().sent.clear();
    assert!(engine.run(Some(BRIDGE)).is_none());

    let sent = state.borrow().sent.clone();
    let mod_xid = xid_of_sent(&sent, OfpType::TlvTableMod);
    state.borrow_mut().drain_sent();
    state
        .borrow_mut()
        .rx
        .push_back(OfpErr::TlvAlreadyMapped.encode_msg(mod_xid));

    // The error sends the machine back to the start...
    assert!(engine.run(Some(BRIDGE)).is_none());
    assert!(engine.run(Some(BRIDGE)).is_none());
    let sent = state.borrow().sent.clone();
    assert_eq!(sent_types(&sent), vec![OfpType::TlvTableRequest]);

    // ...and the rescan finds the slot the other controller claimed.
    reply_tlv(&state, vec![tun_map(0)]);
    state.borrow_mut().drain_sent();
    assert_eq!(engine.run(Some(BRIDGE)), Some(MFF_TUN_METADATA0));
    Ok(())
}

/// A full TLV table disables tunnel metadata but flow updates proceed.
#[test]
fn full_table_disables_tunnel_metadata() -> Result<()> {
    let (mut engine, state) = mock_engine();

    assert!(engine.run(Some(BRIDGE)).is_none());
    let full: Vec<TlvMap> = (0..64u16)
        .map(|index| TlvMap {
            option_class: 0xffff,
            option_type: 1,
            option_len: 8,
            index,
        })
        .collect();
    reply_tlv(&state, full);
    // Tunnel metadata is off (run reports no field id), but the machine
    // still reaches the clear state and sends the clear cluster.
    assert!(engine.run(Some(BRIDGE)).is_none());
    assert!(engine.run(Some(BRIDGE)).is_none());
    let sent = state.borrow_mut().drain_sent();
    assert!(sent_types(&sent).ends_with(&[OfpType::FlowMod, OfpType::GroupMod]));
    Ok(())
}

/// Duplicate producer flows: identical actions collapse to one desired
/// flow, modified actions replace the old ones.
#[test]
fn duplicate_flows_collapse() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);
    let owner = Uuid::from_u128(1);

    engine.add_flow(0, 100, &match1(), b"actions1", owner);
    engine.add_flow(0, 100, &match1(), b"actions1", owner);
    let groups = group_table();
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::FlowMod]);
    assert_eq!(FlowMod::decode(&sent[0])?.ofpacts, b"actions1");
    Ok(())
}

#[test]
fn duplicate_flow_newer_actions_win() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);
    let owner = Uuid::from_u128(1);

    engine.add_flow(0, 100, &match1(), b"actions1", owner);
    engine.add_flow(0, 100, &match1(), b"actions2", owner);
    let groups = group_table();
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::FlowMod]);
    assert_eq!(FlowMod::decode(&sent[0])?.ofpacts, b"actions2");
    Ok(())
}

/// Two owners collide on one key: the smaller owner id wins,
/// deterministically.
#[test]
fn cross_owner_collision_picks_least_uuid() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);

    engine.add_flow(0, 100, &match1(), b"actions2", Uuid::from_u128(2));
    engine.add_flow(0, 100, &match1(), b"actions1", Uuid::from_u128(1));
    let groups = group_table();
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::FlowMod]);
    let add = FlowMod::decode(&sent[0])?;
    assert_eq!(add.command, FlowModCommand::Add);
    assert_eq!(add.ofpacts, b"actions1");

    // The loser's removal changes the winner: a strict modify, no delete.
    engine.remove_flows(Uuid::from_u128(1));
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::FlowMod]);
    let modify = FlowMod::decode(&sent[0])?;
    assert_eq!(modify.command, FlowModCommand::Modify { strict: true });
    assert_eq!(modify.ofpacts, b"actions2");
    Ok(())
}

/// Removing the only owner of an installed flow deletes exactly that flow.
#[test]
fn remove_flows_deletes_strictly() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);
    let owner = Uuid::from_u128(1);
    let groups = group_table();

    engine.add_flow(0, 100, &match1(), b"actions1", owner);
    engine.put(&groups);
    state.borrow_mut().drain_sent();

    engine.remove_flows(owner);
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::FlowMod]);
    let delete = FlowMod::decode(&sent[0])?;
    assert_eq!(delete.command, FlowModCommand::Delete { strict: true });
    assert_eq!(delete.table_id, 0);
    assert_eq!(delete.priority, 100);
    assert_eq!(delete.match_, match1());
    Ok(())
}

/// Reconcile is idempotent: a second put with no flow producer activity
/// emits nothing.  Desired groups are drained per put, so a steady-state
/// producer re-declares them every tick; that too must converge to silence.
#[test]
fn put_is_idempotent() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);
    let groups = group_table();

    engine.add_flow(0, 100, &match1(), b"actions1", Uuid::from_u128(1));
    groups
        .borrow_mut()
        .insert_desired(9, "type=all,bucket=actions=output:2".into());
    engine.put(&groups);
    assert!(!state.borrow().sent.is_empty());
    state.borrow_mut().drain_sent();

    groups
        .borrow_mut()
        .insert_desired(9, "type=all,bucket=actions=output:2".into());
    engine.put(&groups);
    assert!(state.borrow().sent.is_empty());
    Ok(())
}

/// Group ordering within one put: adds go out before flow changes, deletes
/// after them.
#[test]
fn group_ordering_brackets_flow_changes() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);
    let groups = group_table();

    groups
        .borrow_mut()
        .insert_desired(7, "type=all,bucket=actions=output:1".into());
    engine.put(&groups);
    state.borrow_mut().drain_sent();

    // Next tick: group 7 is no longer desired, group 8 and a flow are.
    groups
        .borrow_mut()
        .insert_desired(8, "type=all,bucket=actions=output:2".into());
    engine.add_flow(0, 10, &match1(), b"actions1", Uuid::from_u128(1));
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(
        sent_types(&sent),
        vec![OfpType::GroupMod, OfpType::FlowMod, OfpType::GroupMod]
    );
    let add = GroupMod::decode(&sent[0])?;
    assert_eq!(add.command, GroupModCommand::Add);
    assert_eq!(add.group_id, 8);
    assert_eq!(add.buckets.len(), 1);
    let delete = GroupMod::decode(&sent[2])?;
    assert_eq!(delete.command, GroupModCommand::Delete);
    assert_eq!(delete.group_id, 7);

    let groups = groups.borrow();
    assert!(groups.desired_is_empty());
    assert!(groups.existing_contains(8));
    assert!(!groups.existing_contains(7));
    assert!(!groups.id_allocated(7));
    Ok(())
}

/// An unparseable group descriptor is skipped; the rest of the put
/// proceeds.
#[test]
fn bad_group_descriptor_is_skipped() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);
    let groups = group_table();

    groups.borrow_mut().insert_desired(1, "garbage".into());
    groups
        .borrow_mut()
        .insert_desired(2, "type=all,bucket=actions=drop".into());
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::GroupMod]);
    assert_eq!(GroupMod::decode(&sent[0])?.group_id, 2);
    Ok(())
}

/// Backpressure: with messages still in flight, put sends nothing and
/// drains the desired groups, leaving installed state alone.
#[test]
fn backpressure_drains_desired_groups() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);
    let groups = group_table();

    engine.add_flow(0, 100, &match1(), b"actions1", Uuid::from_u128(1));
    engine.put(&groups);
    state.borrow_mut().drain_sent();

    state.borrow_mut().in_flight = 1;
    groups
        .borrow_mut()
        .insert_desired(3, "type=all,bucket=actions=drop".into());
    engine.put(&groups);
    assert!(state.borrow().sent.is_empty());
    assert!(groups.borrow().desired_is_empty());

    // Once the backlog clears, the installed flow is still known: nothing
    // to re-add, and the drained group stays gone until re-declared.
    state.borrow_mut().in_flight = 0;
    engine.put(&groups);
    assert!(state.borrow().sent.is_empty());
    Ok(())
}

/// Reconnect: the machine renegotiates and emits exactly one clear cluster
/// before any reconciliation output, and reinstalls the desired flows.
#[test]
fn reconnect_clears_then_reinstalls() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);
    let groups = group_table();
    let owner = Uuid::from_u128(1);

    engine.add_flow(0, 100, &match1(), b"actions1", owner);
    groups
        .borrow_mut()
        .insert_desired(4, "type=all,bucket=actions=drop".into());
    engine.put(&groups);
    let mut model = ModelSwitch::default();
    model.apply(&state.borrow_mut().drain_sent());
    assert_eq!(model.flows.len(), 1);

    state.borrow_mut().reconnect();
    let mff = settle(&mut engine, &state);
    assert_eq!(mff, Some(MFF_TUN_METADATA0));

    // The old existing set was dropped with the switch's state.
    assert!(!groups.borrow().existing_contains(4));

    // Producers re-add their state; exactly one flow comes back.
    engine.add_flow(0, 100, &match1(), b"actions1", owner);
    engine.put(&groups);
    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::FlowMod]);
    assert_eq!(FlowMod::decode(&sent[0])?.command, FlowModCommand::Add);
    Ok(())
}

/// Echo requests get answered in the steady state; other unsolicited
/// messages are dropped without upsetting the machine.
#[test]
fn echo_request_answered_in_steady_state() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);

    let echo = msgs::encode_msg_with_xid(msgs::OFPT_ECHO_REQUEST, 77, b"ka");
    state.borrow_mut().rx.push_back(echo);
    let packet_in = msgs::encode_msg(msgs::OFPT_PACKET_IN, b"payload");
    state.borrow_mut().rx.push_back(packet_in);
    assert_eq!(engine.run(Some(BRIDGE)), Some(MFF_TUN_METADATA0));

    let sent = state.borrow_mut().drain_sent();
    assert_eq!(sent_types(&sent), vec![OfpType::EchoReply]);
    assert_eq!(msgs::xid_of(&sent[0]), 77);
    assert_eq!(&sent[0][msgs::OFP_HEADER_LEN..], b"ka");
    Ok(())
}

/// Passing no bridge disconnects and reports tunnel metadata unavailable.
#[test]
fn null_bridge_disconnects() -> Result<()> {
    let (mut engine, state) = mock_engine();
    settle(&mut engine, &state);

    assert!(engine.run(None).is_none());
    assert!(!state.borrow().connected);
    Ok(())
}
