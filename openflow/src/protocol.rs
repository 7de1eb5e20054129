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

use bitflags::bitflags;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Version {
    OFP10 = 0x01,
    OFP11 = 0x02,
    OFP12 = 0x03,
    OFP13 = 0x04,
    OFP14 = 0x05,
    OFP15 = 0x06,
}

impl Version {
    pub fn as_wire(self) -> u8 {
        self as u8
    }
}

bitflags! {
    pub struct Versions: u32 {
        const OFP10 = 1 << 0x01;
        const OFP11 = 1 << 0x02;
        const OFP12 = 1 << 0x03;
        const OFP13 = 1 << 0x04;
        const OFP14 = 1 << 0x05;
        const OFP15 = 1 << 0x06;

        /* Bitmaps of OpenFlow versions that this library supports, and that
         * it enables by default. */
        const SUPPORTED = (Self::OFP10.bits |
                           Self::OFP11.bits |
                           Self::OFP12.bits |
                           Self::OFP13.bits |
                           Self::OFP14.bits |
                           Self::OFP15.bits);
        const DEFAULT = Self::SUPPORTED.bits;
    }
}

impl From<Version> for Versions {
    fn from(v: Version) -> Versions {
        Versions { bits: 1 << (v as u32) }
    }
}

impl Versions {
    /// Returns the newest version enabled in this set.
    pub fn max_version(self) -> Option<Version> {
        [
            Version::OFP15,
            Version::OFP14,
            Version::OFP13,
            Version::OFP12,
            Version::OFP11,
            Version::OFP10,
        ]
        .into_iter()
        .find(|&v| self.contains(v.into()))
    }
}

/* OpenFlow 1.0 supports the standard flow format and the Nicira Extensible
 * Match (NXM) flow format.  OpenFlow 1.2 and later use the standard OpenFlow
 * Extensible Match (OXM) flow format, one variant per version. */
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    OF10_STD,
    OF10_NXM,
    OF11_STD,
    OF12_OXM,
    OF13_OXM,
    OF14_OXM,
    OF15_OXM,
}

impl Protocol {
    pub fn version(self) -> Version {
        match self {
            Protocol::OF10_STD | Protocol::OF10_NXM => Version::OFP10,
            Protocol::OF11_STD => Version::OFP11,
            Protocol::OF12_OXM => Version::OFP12,
            Protocol::OF13_OXM => Version::OFP13,
            Protocol::OF14_OXM => Version::OFP14,
            Protocol::OF15_OXM => Version::OFP15,
        }
    }
}
