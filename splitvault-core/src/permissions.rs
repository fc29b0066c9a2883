//! Capability flags decoded from the packed three-digit permission code.
//!
//! The hundreds digit covers files, the tens digit nodes and the units digit
//! users. Within a digit, 1, 2 and 4 are independent bits; a digit above 7
//! grants nothing.

use serde::{Deserialize, Serialize};

const BIT_1: u16 = 1;
const BIT_2: u16 = 2;
const BIT_4: u16 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCapabilities {
    pub download: bool,
    pub upload: bool,
    pub delete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub edit: bool,
    pub add: bool,
    pub delete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCapabilities {
    pub edit: bool,
    pub delete: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub file: FileCapabilities,
    pub node: NodeCapabilities,
    pub user: UserCapabilities,
}

impl Permissions {
    pub const ALL: u16 = 777;

    pub fn decode(code: u16) -> Self {
        let file = digit_bits(code / 100 % 10);
        let node = digit_bits(code / 10 % 10);
        let user = digit_bits(code % 10);

        Self {
            file: FileCapabilities {
                download: file & BIT_1 != 0,
                upload: file & BIT_2 != 0,
                delete: file & BIT_4 != 0,
            },
            node: NodeCapabilities {
                edit: node & BIT_1 != 0,
                add: node & BIT_2 != 0,
                delete: node & BIT_4 != 0,
            },
            user: UserCapabilities {
                edit: user & BIT_1 != 0,
                delete: user & BIT_4 != 0,
            },
        }
    }

    pub fn encode(&self) -> u16 {
        let file = flag(self.file.download, BIT_1)
            | flag(self.file.upload, BIT_2)
            | flag(self.file.delete, BIT_4);
        let node = flag(self.node.edit, BIT_1)
            | flag(self.node.add, BIT_2)
            | flag(self.node.delete, BIT_4);
        let user = flag(self.user.edit, BIT_1) | flag(self.user.delete, BIT_4);

        file * 100 + node * 10 + user
    }
}

fn digit_bits(digit: u16) -> u16 {
    if digit > 7 { 0 } else { digit }
}

fn flag(set: bool, bit: u16) -> u16 {
    if set { bit } else { 0 }
}
