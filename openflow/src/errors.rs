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

//! OpenFlow error messages.
//!
//! Standard errors are `(type, code)` pairs.  Vendor extension errors, which
//! include the tunnel-metadata allocation failures, travel as
//! `OFPET_EXPERIMENTER` with a vendor id and a vendor-assigned code.

use crate::msgs::{self, Header, NX_VENDOR_ID, OFPT_ERROR, OFP_HEADER_LEN};

use byteorder::{ByteOrder, NetworkEndian};

use thiserror::Error;

pub const OFPET_BAD_REQUEST: u16 = 1;
pub const OFPET_EXPERIMENTER: u16 = 0xffff;

pub const OFPBRC_BAD_TYPE: u16 = 1;
pub const OFPBRC_BAD_LEN: u16 = 6;

/// Vendor error codes for TLV table modification failures.
pub const NXTTMFC_ALREADY_MAPPED: u16 = 0;
pub const NXTTMFC_DUP_ENTRY: u16 = 1;
pub const NXTTMFC_TABLE_FULL: u16 = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum OfpErr {
    #[error("OFPERR_OFPBRC_BAD_TYPE")]
    BadType,
    #[error("OFPERR_OFPBRC_BAD_LEN")]
    BadLen,
    #[error("OFPERR_NXTTMFC_ALREADY_MAPPED")]
    TlvAlreadyMapped,
    #[error("OFPERR_NXTTMFC_DUP_ENTRY")]
    TlvDupEntry,
    #[error("OFPERR_NXTTMFC_TABLE_FULL")]
    TlvTableFull,
    #[error("<unknown ofperr type={0} code={1}>")]
    Unknown(u16, u16),
}

impl OfpErr {
    fn to_wire(self) -> (u16, u16) {
        match self {
            OfpErr::BadType => (OFPET_BAD_REQUEST, OFPBRC_BAD_TYPE),
            OfpErr::BadLen => (OFPET_BAD_REQUEST, OFPBRC_BAD_LEN),
            OfpErr::TlvAlreadyMapped => (OFPET_EXPERIMENTER, NXTTMFC_ALREADY_MAPPED),
            OfpErr::TlvDupEntry => (OFPET_EXPERIMENTER, NXTTMFC_DUP_ENTRY),
            OfpErr::TlvTableFull => (OFPET_EXPERIMENTER, NXTTMFC_TABLE_FULL),
            OfpErr::Unknown(type_, code) => (type_, code),
        }
    }

    fn from_wire(type_: u16, code: u16, experimenter: Option<u32>) -> OfpErr {
        match (type_, code, experimenter) {
            (OFPET_BAD_REQUEST, OFPBRC_BAD_TYPE, _) => OfpErr::BadType,
            (OFPET_BAD_REQUEST, OFPBRC_BAD_LEN, _) => OfpErr::BadLen,
            (OFPET_EXPERIMENTER, NXTTMFC_ALREADY_MAPPED, Some(NX_VENDOR_ID)) => {
                OfpErr::TlvAlreadyMapped
            }
            (OFPET_EXPERIMENTER, NXTTMFC_DUP_ENTRY, Some(NX_VENDOR_ID)) => OfpErr::TlvDupEntry,
            (OFPET_EXPERIMENTER, NXTTMFC_TABLE_FULL, Some(NX_VENDOR_ID)) => OfpErr::TlvTableFull,
            _ => OfpErr::Unknown(type_, code),
        }
    }

    /// Encodes an `OFPT_ERROR` reply carrying this error, stamped with the
    /// `xid` of the offending request.  This is the switch side of the error
    /// exchange; the engine only ever decodes errors.
    pub fn encode_msg(self, xid: u32) -> Vec<u8> {
        let (type_, code) = self.to_wire();
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&type_.to_be_bytes());
        body.extend_from_slice(&code.to_be_bytes());
        if type_ == OFPET_EXPERIMENTER {
            body.extend_from_slice(&NX_VENDOR_ID.to_be_bytes());
        }
        msgs::encode_msg_with_xid(OFPT_ERROR, xid, &body)
    }

    /// Decodes the error carried by an `OFPT_ERROR` message.  Malformed
    /// error messages decode as `Unknown`; the caller only logs them.
    pub fn decode_msg(msg: &[u8]) -> OfpErr {
        if Header::decode(msg).is_err() || msg.len() < OFP_HEADER_LEN + 4 {
            return OfpErr::Unknown(0, 0);
        }
        let body = &msg[OFP_HEADER_LEN..];
        let type_ = NetworkEndian::read_u16(&body[0..2]);
        let code = NetworkEndian::read_u16(&body[2..4]);
        let experimenter = if type_ == OFPET_EXPERIMENTER && body.len() >= 8 {
            Some(NetworkEndian::read_u32(&body[4..8]))
        } else {
            None
        };
        OfpErr::from_wire(type_, code, experimenter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codec() {
        for error in [
            OfpErr::BadType,
            OfpErr::BadLen,
            OfpErr::TlvAlreadyMapped,
            OfpErr::TlvDupEntry,
            OfpErr::TlvTableFull,
        ] {
            let msg = error.encode_msg(0x1234);
            assert_eq!(msgs::xid_of(&msg), 0x1234);
            assert_eq!(OfpErr::decode_msg(&msg), error);
        }
    }

    #[test]
    fn truncated_error_is_unknown() {
        let msg = OfpErr::BadLen.encode_msg(1);
        assert_eq!(OfpErr::decode_msg(&msg[..9]), OfpErr::Unknown(0, 0));
    }
}
