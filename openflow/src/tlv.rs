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

//! Tunnel-metadata TLV table messages.
//!
//! A switch exposes a table of numbered slots, each binding a
//! `(class, type, length)` option triple to a tunnel-metadata field.  A
//! controller queries the table with a request, learns the current bindings
//! from the reply, and claims a slot with a modification.

use crate::errors::OfpErr;
use crate::msgs::{self, NXT_TLV_TABLE_MOD, NXT_TLV_TABLE_REPLY, NXT_TLV_TABLE_REQUEST};
use crate::protocol::Version;

use byteorder::{ByteOrder, NetworkEndian};

use anyhow::Result;

pub const NXTTMC_ADD: u16 = 0;
pub const NXTTMC_DELETE: u16 = 1;
pub const NXTTMC_CLEAR: u16 = 2;

/// One slot binding in the TLV table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlvMap {
    pub option_class: u16,
    pub option_type: u8,
    pub option_len: u8,
    pub index: u16,
}

impl TlvMap {
    fn encode(&self, body: &mut Vec<u8>) {
        body.extend_from_slice(&self.option_class.to_be_bytes());
        body.push(self.option_type);
        body.push(self.option_len);
        body.extend_from_slice(&self.index.to_be_bytes());
        body.extend_from_slice(&[0; 2]);
    }

    fn decode(buf: &[u8]) -> TlvMap {
        TlvMap {
            option_class: NetworkEndian::read_u16(&buf[0..2]),
            option_type: buf[2],
            option_len: buf[3],
            index: NetworkEndian::read_u16(&buf[4..6]),
        }
    }
}

fn decode_mappings(buf: &[u8]) -> Result<Vec<TlvMap>> {
    if buf.len() % 8 != 0 {
        Err(OfpErr::BadLen)?
    }
    Ok(buf.chunks_exact(8).map(TlvMap::decode).collect())
}

pub fn encode_tlv_table_request() -> Vec<u8> {
    msgs::encode_experimenter(NXT_TLV_TABLE_REQUEST, &[])
}

/// A TLV table modification request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlvTableMod {
    pub command: u16,
    pub mappings: Vec<TlvMap>,
}

impl TlvTableMod {
    pub fn encode(&self, version: Version) -> Vec<u8> {
        let mut body = Vec::with_capacity(8 + self.mappings.len() * 8);
        body.extend_from_slice(&self.command.to_be_bytes());
        body.extend_from_slice(&[0; 6]);
        for map in &self.mappings {
            map.encode(&mut body);
        }
        let mut msg = msgs::encode_experimenter(NXT_TLV_TABLE_MOD, &body);
        msg[0] = version.as_wire();
        msg
    }

    pub fn decode(msg: &[u8]) -> Result<TlvTableMod> {
        let body = msgs::experimenter_body(msg)?;
        if body.len() < 8 {
            Err(OfpErr::BadLen)?
        }
        Ok(TlvTableMod {
            command: NetworkEndian::read_u16(&body[0..2]),
            mappings: decode_mappings(&body[8..])?,
        })
    }
}

/// A TLV table reply: the switch's current slot bindings plus its capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlvTableReply {
    pub max_option_space: u32,
    pub max_fields: u16,
    pub mappings: Vec<TlvMap>,
}

impl TlvTableReply {
    /// Encodes the reply to a table request, stamped with the request's
    /// `xid`.  Switch side of the exchange.
    pub fn encode(&self, xid: u32) -> Vec<u8> {
        let mut body = Vec::with_capacity(16 + self.mappings.len() * 8);
        body.extend_from_slice(&msgs::NX_VENDOR_ID.to_be_bytes());
        body.extend_from_slice(&NXT_TLV_TABLE_REPLY.to_be_bytes());
        body.extend_from_slice(&self.max_option_space.to_be_bytes());
        body.extend_from_slice(&self.max_fields.to_be_bytes());
        body.extend_from_slice(&[0; 2]);
        for map in &self.mappings {
            map.encode(&mut body);
        }
        msgs::encode_msg_with_xid(msgs::OFPT_EXPERIMENTER, xid, &body)
    }

    pub fn decode(msg: &[u8]) -> Result<TlvTableReply> {
        let body = msgs::experimenter_body(msg)?;
        if body.len() < 8 {
            Err(OfpErr::BadLen)?
        }
        Ok(TlvTableReply {
            max_option_space: NetworkEndian::read_u32(&body[0..4]),
            max_fields: NetworkEndian::read_u16(&body[4..6]),
            mappings: decode_mappings(&body[8..])?,
        })
    }
}
