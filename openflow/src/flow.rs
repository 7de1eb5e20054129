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

//! Flow matches and flow modification messages.

use crate::errors::OfpErr;
use crate::msgs::{self, Header, OFPT_FLOW_MOD, OFP_HEADER_LEN};
use crate::protocol::Protocol;

use byteorder::{ByteOrder, NetworkEndian};

use std::fmt;

use anyhow::Result;

pub const OFPTT_ALL: u8 = 0xff;
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;
pub const OFPP_ANY: u32 = 0xffff_ffff;
pub const OFPG_ANY: u32 = 0xffff_ffff;

const OFPMT_OXM: u16 = 1;

/// A match over packet header fields and metadata, kept as its canonical OXM
/// encoding.  Two matches are equal iff their OXM encodings are equal; the
/// empty encoding matches every packet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Match {
    oxm: Vec<u8>,
}

impl Match {
    pub fn catchall() -> Match {
        Match::default()
    }

    pub fn from_oxm(oxm: Vec<u8>) -> Match {
        Match { oxm }
    }

    pub fn as_oxm(&self) -> &[u8] {
        &self.oxm
    }

    pub fn is_catchall(&self) -> bool {
        self.oxm.is_empty()
    }

    fn encode(&self, msg: &mut Vec<u8>) {
        let len = 4 + self.oxm.len();
        msg.extend_from_slice(&OFPMT_OXM.to_be_bytes());
        msg.extend_from_slice(&(len as u16).to_be_bytes());
        msg.extend_from_slice(&self.oxm);
        while msg.len() % 8 != 0 {
            msg.push(0);
        }
    }

    /// Decodes a match starting at `buf`, returning it and the number of
    /// bytes consumed including padding.
    fn decode(buf: &[u8]) -> Result<(Match, usize)> {
        if buf.len() < 4 {
            Err(OfpErr::BadLen)?
        }
        if NetworkEndian::read_u16(&buf[0..2]) != OFPMT_OXM {
            Err(OfpErr::BadType)?
        }
        let len = NetworkEndian::read_u16(&buf[2..4]) as usize;
        let padded = (len + 7) / 8 * 8;
        if len < 4 || buf.len() < padded {
            Err(OfpErr::BadLen)?
        }
        Ok((Match::from_oxm(buf[4..len].to_vec()), padded))
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_catchall() {
            write!(f, "match=any")
        } else {
            write!(f, "match=0x")?;
            for byte in &self.oxm {
                write!(f, "{:02x}", byte)?;
            }
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowModCommand {
    Add,
    Modify { strict: bool },
    Delete { strict: bool },
}

const OFPFC_ADD: u8 = 0;
const OFPFC_MODIFY: u8 = 1;
const OFPFC_MODIFY_STRICT: u8 = 2;
const OFPFC_DELETE: u8 = 3;
const OFPFC_DELETE_STRICT: u8 = 4;

impl FlowModCommand {
    fn to_openflow(self) -> u8 {
        match self {
            FlowModCommand::Add => OFPFC_ADD,
            FlowModCommand::Modify { strict: false } => OFPFC_MODIFY,
            FlowModCommand::Modify { strict: true } => OFPFC_MODIFY_STRICT,
            FlowModCommand::Delete { strict: false } => OFPFC_DELETE,
            FlowModCommand::Delete { strict: true } => OFPFC_DELETE_STRICT,
        }
    }

    fn from_openflow(command: u8) -> Result<FlowModCommand> {
        Ok(match command {
            OFPFC_ADD => FlowModCommand::Add,
            OFPFC_MODIFY => FlowModCommand::Modify { strict: false },
            OFPFC_MODIFY_STRICT => FlowModCommand::Modify { strict: true },
            OFPFC_DELETE => FlowModCommand::Delete { strict: false },
            OFPFC_DELETE_STRICT => FlowModCommand::Delete { strict: true },
            _ => Err(OfpErr::BadType)?,
        })
    }
}

/// A flow table modification.  The action list is carried as an opaque byte
/// string after the match; composing and interpreting actions is the
/// caller's concern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub table_id: u8,
    pub priority: u16,
    pub match_: Match,
    pub ofpacts: Vec<u8>,
    pub command: FlowModCommand,
    pub buffer_id: u32,
    pub out_port: u32,
    pub out_group: u32,
}

impl Default for FlowMod {
    fn default() -> FlowMod {
        FlowMod {
            table_id: 0,
            priority: 0,
            match_: Match::catchall(),
            ofpacts: Vec::new(),
            command: FlowModCommand::Add,
            buffer_id: OFP_NO_BUFFER,
            out_port: OFPP_ANY,
            out_group: OFPG_ANY,
        }
    }
}

impl FlowMod {
    pub fn encode(&self, protocol: Protocol) -> Vec<u8> {
        let mut body = Vec::with_capacity(40 + self.match_.as_oxm().len() + self.ofpacts.len());
        body.extend_from_slice(&0u64.to_be_bytes()); // cookie
        body.extend_from_slice(&0u64.to_be_bytes()); // cookie_mask
        body.push(self.table_id);
        body.push(self.command.to_openflow());
        body.extend_from_slice(&0u16.to_be_bytes()); // idle_timeout
        body.extend_from_slice(&0u16.to_be_bytes()); // hard_timeout
        body.extend_from_slice(&self.priority.to_be_bytes());
        body.extend_from_slice(&self.buffer_id.to_be_bytes());
        body.extend_from_slice(&self.out_port.to_be_bytes());
        body.extend_from_slice(&self.out_group.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes()); // flags
        body.extend_from_slice(&[0; 2]);
        self.match_.encode(&mut body);
        body.extend_from_slice(&self.ofpacts);

        let mut msg = msgs::encode_msg(OFPT_FLOW_MOD, &body);
        msg[0] = protocol.version().as_wire();
        msg
    }

    pub fn decode(msg: &[u8]) -> Result<FlowMod> {
        let header = Header::decode(msg)?;
        if header.type_ != OFPT_FLOW_MOD {
            Err(OfpErr::BadType)?
        }
        let body = &msg[OFP_HEADER_LEN..];
        if body.len() < 40 {
            Err(OfpErr::BadLen)?
        }
        let table_id = body[16];
        let command = FlowModCommand::from_openflow(body[17])?;
        let priority = NetworkEndian::read_u16(&body[22..24]);
        let buffer_id = NetworkEndian::read_u32(&body[24..28]);
        let out_port = NetworkEndian::read_u32(&body[28..32]);
        let out_group = NetworkEndian::read_u32(&body[32..36]);
        let (match_, match_len) = Match::decode(&body[40..])?;
        let ofpacts = body[40 + match_len..].to_vec();
        Ok(FlowMod {
            table_id,
            priority,
            match_,
            ofpacts,
            command,
            buffer_id,
            out_port,
            out_group,
        })
    }
}
