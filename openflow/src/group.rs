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

//! Group table modification messages and their textual descriptor form.
//!
//! Producers describe groups as text, e.g.
//! `"group_id=13,type=select,bucket=actions=output:1,bucket=actions=output:2"`.
//! A bucket body extends to the next `bucket=` keyword or the end of the
//! string, since bucket bodies themselves contain commas.

use crate::errors::OfpErr;
use crate::flow::{OFPG_ANY, OFPP_ANY};
use crate::msgs::{self, Header, OFPT_GROUP_MOD, OFP_HEADER_LEN};
use crate::protocol::Version;

use byteorder::{ByteOrder, NetworkEndian};

use std::error;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;

pub const OFPG_ALL: u32 = 0xffff_fffc;
pub const OFPG15_BUCKET_ALL: u32 = 0xffff_ffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupModCommand {
    Add,
    Modify,
    Delete,
}

impl GroupModCommand {
    fn to_openflow(self) -> u16 {
        match self {
            GroupModCommand::Add => 0,
            GroupModCommand::Modify => 1,
            GroupModCommand::Delete => 2,
        }
    }

    fn from_openflow(command: u16) -> Result<GroupModCommand> {
        Ok(match command {
            0 => GroupModCommand::Add,
            1 => GroupModCommand::Modify,
            2 => GroupModCommand::Delete,
            _ => Err(OfpErr::BadType)?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupType {
    All,
    Select,
    Indirect,
    FastFailover,
}

impl GroupType {
    fn to_openflow(self) -> u8 {
        match self {
            GroupType::All => 0,
            GroupType::Select => 1,
            GroupType::Indirect => 2,
            GroupType::FastFailover => 3,
        }
    }

    fn from_openflow(type_: u8) -> Result<GroupType> {
        Ok(match type_ {
            0 => GroupType::All,
            1 => GroupType::Select,
            2 => GroupType::Indirect,
            3 => GroupType::FastFailover,
            _ => Err(OfpErr::BadType)?,
        })
    }
}

impl FromStr for GroupType {
    type Err = GroupParseError;

    fn from_str(s: &str) -> std::result::Result<GroupType, GroupParseError> {
        match s {
            "all" => Ok(GroupType::All),
            "select" => Ok(GroupType::Select),
            "indirect" => Ok(GroupType::Indirect),
            "ff" | "fast_failover" => Ok(GroupType::FastFailover),
            _ => Err(GroupParseError(format!("invalid group type {}", s))),
        }
    }
}

#[derive(Debug)]
pub struct GroupParseError(pub String);

impl fmt::Display for GroupParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl error::Error for GroupParseError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    pub weight: u16,
    pub watch_port: u32,
    pub watch_group: u32,
    pub actions: Vec<u8>,
}

impl Bucket {
    fn new(actions: Vec<u8>) -> Bucket {
        Bucket {
            weight: 0,
            watch_port: OFPP_ANY,
            watch_group: OFPG_ANY,
            actions,
        }
    }
}

/// A group table modification.  As with flow mods, bucket action lists are
/// opaque byte strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupMod {
    pub command: GroupModCommand,
    pub type_: GroupType,
    pub group_id: u32,
    /// Which buckets a selective-bucket command operates on.  OpenFlow 1.5
    /// only; carried for completeness but not encoded for earlier versions.
    pub command_bucket_id: u32,
    pub buckets: Vec<Bucket>,
}

impl GroupMod {
    /// Parses the textual descriptor form, e.g.
    /// `"group_id=13,type=all,bucket=actions=output:1"`.  Delete descriptors
    /// may be a bare `"group_id=13"`.
    pub fn parse(command: GroupModCommand, s: &str) -> Result<GroupMod> {
        let (props, bucket_specs) = match s.find("bucket=") {
            Some(start) => (&s[..start], Some(&s[start..])),
            None => (s, None),
        };

        let mut group_id = None;
        let mut type_ = None;
        for field in props.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let (key, value) = match field.split_once('=') {
                Some(kv) => kv,
                None => Err(GroupParseError(format!("{}: missing `=`", field)))?,
            };
            match key {
                "group_id" => {
                    if group_id.is_some() {
                        Err(GroupParseError("group_id specified twice".into()))?
                    }
                    group_id = Some(value.parse::<u32>().map_err(|_| {
                        GroupParseError(format!("invalid group id {}", value))
                    })?);
                }
                "type" => {
                    if type_.is_some() {
                        Err(GroupParseError("type specified twice".into()))?
                    }
                    type_ = Some(value.parse::<GroupType>()?);
                }
                _ => Err(GroupParseError(format!("unknown keyword {}", key)))?,
            }
        }
        let group_id = match group_id {
            Some(group_id) => group_id,
            None => Err(GroupParseError("group_id must be specified".into()))?,
        };
        if command == GroupModCommand::Add && type_.is_none() {
            Err(GroupParseError("type must be specified".into()))?
        }

        let mut buckets = Vec::new();
        if let Some(specs) = bucket_specs {
            // `specs` starts with "bucket=", so the first split element is
            // always empty.
            for spec in specs.split("bucket=").skip(1) {
                let body = spec.trim_end_matches(',').trim();
                if body.is_empty() {
                    Err(GroupParseError("bucket specification is empty".into()))?
                }
                buckets.push(Bucket::new(body.as_bytes().to_vec()));
            }
        }

        Ok(GroupMod {
            command,
            type_: type_.unwrap_or(GroupType::All),
            group_id,
            command_bucket_id: OFPG15_BUCKET_ALL,
            buckets,
        })
    }

    pub fn encode(&self, version: Version) -> Vec<u8> {
        let mut body = Vec::with_capacity(8 + self.buckets.len() * 16);
        body.extend_from_slice(&self.command.to_openflow().to_be_bytes());
        body.push(self.type_.to_openflow());
        body.push(0);
        body.extend_from_slice(&self.group_id.to_be_bytes());
        for bucket in &self.buckets {
            let len = 16 + bucket.actions.len();
            body.extend_from_slice(&(len as u16).to_be_bytes());
            body.extend_from_slice(&bucket.weight.to_be_bytes());
            body.extend_from_slice(&bucket.watch_port.to_be_bytes());
            body.extend_from_slice(&bucket.watch_group.to_be_bytes());
            body.extend_from_slice(&[0; 4]);
            body.extend_from_slice(&bucket.actions);
        }

        let mut msg = msgs::encode_msg(OFPT_GROUP_MOD, &body);
        msg[0] = version.as_wire();
        msg
    }

    pub fn decode(msg: &[u8]) -> Result<GroupMod> {
        let header = Header::decode(msg)?;
        if header.type_ != OFPT_GROUP_MOD {
            Err(OfpErr::BadType)?
        }
        let body = &msg[OFP_HEADER_LEN..];
        if body.len() < 8 {
            Err(OfpErr::BadLen)?
        }
        let command = GroupModCommand::from_openflow(NetworkEndian::read_u16(&body[0..2]))?;
        let type_ = GroupType::from_openflow(body[2])?;
        let group_id = NetworkEndian::read_u32(&body[4..8]);

        let mut buckets = Vec::new();
        let mut rest = &body[8..];
        while !rest.is_empty() {
            if rest.len() < 16 {
                Err(OfpErr::BadLen)?
            }
            let len = NetworkEndian::read_u16(&rest[0..2]) as usize;
            if len < 16 || rest.len() < len {
                Err(OfpErr::BadLen)?
            }
            buckets.push(Bucket {
                weight: NetworkEndian::read_u16(&rest[2..4]),
                watch_port: NetworkEndian::read_u32(&rest[4..8]),
                watch_group: NetworkEndian::read_u32(&rest[8..12]),
                actions: rest[16..len].to_vec(),
            });
            rest = &rest[len..];
        }

        Ok(GroupMod {
            command,
            type_,
            group_id,
            command_bucket_id: OFPG15_BUCKET_ALL,
            buckets,
        })
    }
}
