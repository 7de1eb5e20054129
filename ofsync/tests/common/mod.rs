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

#![allow(dead_code)]

//! A scripted switch for driving the engine without a socket.

use ofsync::{Ofctrl, SwitchLink};

use openflow::flow::{FlowMod, FlowModCommand, Match};
use openflow::msgs::{self, OfpType};
use openflow::tlv::{TlvMap, TlvTableReply};

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind};
use std::rc::Rc;

#[derive(Default)]
pub struct MockState {
    pub connected: bool,
    pub seqno: u64,
    pub in_flight: usize,
    pub sent: Vec<Vec<u8>>,
    pub rx: VecDeque<Vec<u8>>,
}

impl MockState {
    /// Takes everything the engine has sent since the last call.
    pub fn drain_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }

    /// Simulates a connection drop and re-establishment.
    pub fn reconnect(&mut self) {
        self.seqno += 1;
    }
}

pub struct MockSwitch {
    pub state: Rc<RefCell<MockState>>,
    target: String,
}

impl SwitchLink for MockSwitch {
    fn connect(&mut self, target: &str) {
        self.target = target.to_string();
        let mut state = self.state.borrow_mut();
        if !state.connected {
            state.connected = true;
            state.seqno += 1;
        }
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn run(&mut self) {}
    fn run_wait(&self) {}

    fn recv(&mut self) -> Option<Vec<u8>> {
        self.state.borrow_mut().rx.pop_front()
    }
    fn recv_wait(&self) {}

    fn send(&mut self, msg: Vec<u8>) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(io::Error::from(ErrorKind::NotConnected));
        }
        state.sent.push(msg);
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.state.borrow().in_flight
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn connection_seqno(&self) -> u64 {
        self.state.borrow().seqno
    }

    fn target(&self) -> &str {
        &self.target
    }
}

pub const BRIDGE: &str = "br-int";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn mock_engine() -> (Ofctrl<MockSwitch>, Rc<RefCell<MockState>>) {
    init_tracing();
    let state = Rc::new(RefCell::new(MockState::default()));
    let swconn = MockSwitch {
        state: Rc::clone(&state),
        target: String::new(),
    };
    (Ofctrl::with_link(swconn), state)
}

pub fn sent_types(sent: &[Vec<u8>]) -> Vec<OfpType> {
    sent.iter().map(|msg| OfpType::decode(msg).unwrap()).collect()
}

/// Finds the one sent message of the given type and returns its xid.
pub fn xid_of_sent(sent: &[Vec<u8>], wanted: OfpType) -> u32 {
    let mut found = sent
        .iter()
        .filter(|msg| OfpType::decode(msg).unwrap() == wanted);
    let msg = found.next().expect("no message of wanted type");
    assert!(found.next().is_none(), "more than one {wanted}");
    msgs::xid_of(msg)
}

/// Queues a TLV table reply listing `mappings`, answering the TLV request
/// the engine sent last tick.
pub fn reply_tlv(state: &Rc<RefCell<MockState>>, mappings: Vec<TlvMap>) {
    let mut state = state.borrow_mut();
    let xid = {
        let mut requests = state
            .sent
            .iter()
            .filter(|msg| OfpType::decode(msg).unwrap() == OfpType::TlvTableRequest);
        let request = requests.next_back().expect("no TLV request sent");
        msgs::xid_of(request)
    };
    let reply = TlvTableReply {
        max_option_space: 256,
        max_fields: 64,
        mappings,
    };
    state.rx.push_back(reply.encode(xid));
}

/// Queues the barrier reply for the barrier request the engine sent last
/// tick.
pub fn reply_barrier(state: &Rc<RefCell<MockState>>) {
    let mut state = state.borrow_mut();
    let xid = {
        let mut barriers = state
            .sent
            .iter()
            .filter(|msg| OfpType::decode(msg).unwrap() == OfpType::BarrierRequest);
        let barrier = barriers.next_back().expect("no barrier request sent");
        msgs::xid_of(barrier)
    };
    state.rx.push_back(msgs::encode_barrier_reply(xid));
}

/// Drives the engine from scratch through a fresh negotiation with an empty
/// TLV table, leaving it in the flow-updating state with the wire trace
/// drained.  Returns the tunnel-metadata field id `run` settled on.
pub fn settle(engine: &mut Ofctrl<MockSwitch>, state: &Rc<RefCell<MockState>>) -> Option<u32> {
    assert!(engine.run(Some(BRIDGE)).is_none()); // sends the TLV request
    reply_tlv(state, Vec::new());
    assert!(engine.run(Some(BRIDGE)).is_none()); // sends TLV mod + barrier
    reply_barrier(state);
    engine.run(Some(BRIDGE)); // consumes the barrier reply
    let mff = engine.run(Some(BRIDGE)); // clears flows and groups
    state.borrow_mut().drain_sent();
    mff
}

/// A model of the switch's flow table: applies the engine's flow mods the
/// way a real switch would.
#[derive(Default)]
pub struct ModelSwitch {
    pub flows: HashMap<(u8, u16, Match), Vec<u8>>,
}

impl ModelSwitch {
    pub fn apply(&mut self, msgs: &[Vec<u8>]) {
        for msg in msgs {
            match OfpType::decode(msg).unwrap() {
                OfpType::FlowMod => {
                    let fm = FlowMod::decode(msg).unwrap();
                    let key = (fm.table_id, fm.priority, fm.match_.clone());
                    match fm.command {
                        FlowModCommand::Add => {
                            self.flows.insert(key, fm.ofpacts);
                        }
                        FlowModCommand::Modify { strict: true } => {
                            if let Some(actions) = self.flows.get_mut(&key) {
                                *actions = fm.ofpacts;
                            }
                        }
                        FlowModCommand::Delete { strict: true } => {
                            self.flows.remove(&key);
                        }
                        FlowModCommand::Delete { strict: false } => {
                            // Only the clear-all form is ever sent non-strict.
                            assert_eq!(fm.table_id, openflow::flow::OFPTT_ALL);
                            self.flows.clear();
                        }
                        command => panic!("unexpected flow mod {command:?}"),
                    }
                }
                OfpType::GroupMod => (),
                other => panic!("unexpected message {other}"),
            }
        }
    }
}
