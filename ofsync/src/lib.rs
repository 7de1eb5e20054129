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

//! `ofsync` keeps a software switch's forwarding state synchronized with a
//! controller's desired state.  It negotiates a tunnel-metadata option slot
//! on the switch, clears the switch down to a known-good baseline, and then
//! continuously reconciles the desired flow and group tables against what is
//! installed, emitting incremental OpenFlow add/modify/delete messages over
//! a reliable connection.
//!
//! The embedder drives the engine from its main loop: call [`Ofctrl::run`]
//! once per tick, update the desired state through the producer API, then
//! call [`Ofctrl::put`] to reconcile.  [`Ofctrl::wait`] registers the
//! engine's wakeups with the cooperative poll loop.

pub mod flow_table;
pub mod group_table;
pub mod ofctrl;
pub mod rate_limit;
pub mod swconn;

pub use flow_table::{Flow, FlowKey, FlowTable};
pub use group_table::{GroupInfo, GroupTable, MAX_GROUPS};
pub use ofctrl::{
    MfFieldId, Ofctrl, MFF_TUN_METADATA0, TUN_METADATA_NUM_OPTS, TUN_OPT_CLASS, TUN_OPT_LEN,
    TUN_OPT_TYPE,
};
pub use swconn::SwitchLink;
