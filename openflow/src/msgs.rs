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

//! OpenFlow message framing and type demultiplexing.
//!
//! Every OpenFlow message starts with the same 8-byte header.  Vendor
//! extension messages (`OFPT_EXPERIMENTER`) carry a vendor id and a subtype
//! after the header; the TLV table messages are Nicira subtypes.

use crate::errors::OfpErr;

use byteorder::{ByteOrder, NetworkEndian};

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;

pub const OFP13_VERSION: u8 = 0x04;
pub const OFP_HEADER_LEN: usize = 8;

pub const OFPT_HELLO: u8 = 0;
pub const OFPT_ERROR: u8 = 1;
pub const OFPT_ECHO_REQUEST: u8 = 2;
pub const OFPT_ECHO_REPLY: u8 = 3;
pub const OFPT_EXPERIMENTER: u8 = 4;
pub const OFPT_PACKET_IN: u8 = 10;
pub const OFPT_FLOW_REMOVED: u8 = 11;
pub const OFPT_PORT_STATUS: u8 = 12;
pub const OFPT_FLOW_MOD: u8 = 14;
pub const OFPT_GROUP_MOD: u8 = 15;
pub const OFPT_BARRIER_REQUEST: u8 = 20;
pub const OFPT_BARRIER_REPLY: u8 = 21;

pub const NX_VENDOR_ID: u32 = 0x0000_2320;
pub const NXT_TLV_TABLE_MOD: u32 = 29;
pub const NXT_TLV_TABLE_REQUEST: u32 = 30;
pub const NXT_TLV_TABLE_REPLY: u32 = 31;

/// The common OpenFlow message header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub version: u8,
    pub type_: u8,
    pub length: u16,
    pub xid: u32,
}

impl Header {
    pub fn decode(oh: &[u8]) -> Result<Header> {
        if oh.len() < OFP_HEADER_LEN {
            Err(OfpErr::BadLen)?
        }
        Ok(Header {
            version: oh[0],
            type_: oh[1],
            length: NetworkEndian::read_u16(&oh[2..4]),
            xid: NetworkEndian::read_u32(&oh[4..8]),
        })
    }
}

/// A decoded OpenFlow message kind, covering the messages the engine sends
/// or reacts to.  Anything else fails to decode and is logged by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OfpType {
    Hello,
    Error,
    EchoRequest,
    EchoReply,
    PacketIn,
    FlowRemoved,
    PortStatus,
    FlowMod,
    GroupMod,
    BarrierRequest,
    BarrierReply,
    TlvTableMod,
    TlvTableRequest,
    TlvTableReply,
}

impl OfpType {
    pub fn decode(oh: &[u8]) -> Result<OfpType> {
        let header = Header::decode(oh)?;
        Ok(match header.type_ {
            OFPT_HELLO => OfpType::Hello,
            OFPT_ERROR => OfpType::Error,
            OFPT_ECHO_REQUEST => OfpType::EchoRequest,
            OFPT_ECHO_REPLY => OfpType::EchoReply,
            OFPT_PACKET_IN => OfpType::PacketIn,
            OFPT_FLOW_REMOVED => OfpType::FlowRemoved,
            OFPT_PORT_STATUS => OfpType::PortStatus,
            OFPT_FLOW_MOD => OfpType::FlowMod,
            OFPT_GROUP_MOD => OfpType::GroupMod,
            OFPT_BARRIER_REQUEST => OfpType::BarrierRequest,
            OFPT_BARRIER_REPLY => OfpType::BarrierReply,
            OFPT_EXPERIMENTER => {
                if oh.len() < OFP_HEADER_LEN + 8 {
                    Err(OfpErr::BadLen)?
                }
                let vendor = NetworkEndian::read_u32(&oh[8..12]);
                let subtype = NetworkEndian::read_u32(&oh[12..16]);
                match (vendor, subtype) {
                    (NX_VENDOR_ID, NXT_TLV_TABLE_MOD) => OfpType::TlvTableMod,
                    (NX_VENDOR_ID, NXT_TLV_TABLE_REQUEST) => OfpType::TlvTableRequest,
                    (NX_VENDOR_ID, NXT_TLV_TABLE_REPLY) => OfpType::TlvTableReply,
                    _ => Err(OfpErr::BadType)?,
                }
            }
            _ => Err(OfpErr::BadType)?,
        })
    }
}

impl fmt::Display for OfpType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OfpType::Hello => "OFPT_HELLO",
            OfpType::Error => "OFPT_ERROR",
            OfpType::EchoRequest => "OFPT_ECHO_REQUEST",
            OfpType::EchoReply => "OFPT_ECHO_REPLY",
            OfpType::PacketIn => "OFPT_PACKET_IN",
            OfpType::FlowRemoved => "OFPT_FLOW_REMOVED",
            OfpType::PortStatus => "OFPT_PORT_STATUS",
            OfpType::FlowMod => "OFPT_FLOW_MOD",
            OfpType::GroupMod => "OFPT_GROUP_MOD",
            OfpType::BarrierRequest => "OFPT_BARRIER_REQUEST",
            OfpType::BarrierReply => "OFPT_BARRIER_REPLY",
            OfpType::TlvTableMod => "NXT_TLV_TABLE_MOD",
            OfpType::TlvTableRequest => "NXT_TLV_TABLE_REQUEST",
            OfpType::TlvTableReply => "NXT_TLV_TABLE_REPLY",
        };
        write!(f, "{}", name)
    }
}

/// Allocates a transaction id.  Transaction id 0 is never handed out, so it
/// can stand in for "no request outstanding".
pub fn alloc_xid() -> u32 {
    static NEXT_XID: AtomicU32 = AtomicU32::new(1);
    loop {
        let xid = NEXT_XID.fetch_add(1, Ordering::Relaxed);
        if xid != 0 {
            return xid;
        }
    }
}

/// Returns the transaction id of an encoded message, or 0 if the buffer is
/// too short to carry a header.
pub fn xid_of(msg: &[u8]) -> u32 {
    match Header::decode(msg) {
        Ok(header) => header.xid,
        Err(_) => 0,
    }
}

pub fn encode_msg_with_xid(type_: u8, xid: u32, body: &[u8]) -> Vec<u8> {
    let length = OFP_HEADER_LEN + body.len();
    let mut msg = Vec::with_capacity(length);
    msg.push(OFP13_VERSION);
    msg.push(type_);
    msg.extend_from_slice(&(length as u16).to_be_bytes());
    msg.extend_from_slice(&xid.to_be_bytes());
    msg.extend_from_slice(body);
    msg
}

/// Encodes a message of the given type with a freshly allocated xid.
pub fn encode_msg(type_: u8, body: &[u8]) -> Vec<u8> {
    encode_msg_with_xid(type_, alloc_xid(), body)
}

/// Encodes a Nicira vendor extension message.
pub fn encode_experimenter(subtype: u32, body: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(8 + body.len());
    full.extend_from_slice(&NX_VENDOR_ID.to_be_bytes());
    full.extend_from_slice(&subtype.to_be_bytes());
    full.extend_from_slice(body);
    encode_msg(OFPT_EXPERIMENTER, &full)
}

/// Returns the payload of a vendor extension message, after the vendor id
/// and subtype.
pub fn experimenter_body(msg: &[u8]) -> Result<&[u8]> {
    if msg.len() < OFP_HEADER_LEN + 8 {
        Err(OfpErr::BadLen)?
    }
    Ok(&msg[OFP_HEADER_LEN + 8..])
}

pub fn encode_hello(version: u8) -> Vec<u8> {
    let mut msg = encode_msg(OFPT_HELLO, &[]);
    msg[0] = version;
    msg
}

pub fn encode_echo_request() -> Vec<u8> {
    encode_msg(OFPT_ECHO_REQUEST, &[])
}

pub fn encode_barrier_request() -> Vec<u8> {
    encode_msg(OFPT_BARRIER_REQUEST, &[])
}

/// Encodes the reply to a barrier request.  Switch side of the exchange.
pub fn encode_barrier_reply(xid: u32) -> Vec<u8> {
    encode_msg_with_xid(OFPT_BARRIER_REPLY, xid, &[])
}

/// Builds the echo reply for `request`: same payload, same xid.
pub fn make_echo_reply(request: &[u8]) -> Vec<u8> {
    let payload = if request.len() > OFP_HEADER_LEN {
        &request[OFP_HEADER_LEN..]
    } else {
        &[]
    };
    encode_msg_with_xid(OFPT_ECHO_REPLY, xid_of(request), payload)
}
