//! Logical unwinding (LUSH) metadata carried by dynamic nodes.
//!
//! A managed or virtualized runtime can map several physical frames onto one
//! logical frame or the other way round. The association records which way
//! the mapping goes and how long the physical path is; a logical instruction
//! pointer, when valid, replaces the physical load module and ip.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::dyn_node::{LoadModuleId, Vma};

/// Physical-to-logical frame association.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LushAssoc {
    #[default]
    Null,
    OneToZero,
    ManyToZero,
    OneToOne,
    ManyToOne,
    OneToMany,
    ZeroToZero,
}

const CLASS_A_TO_0: u8 = 0b001;
const CLASS_A_TO_1: u8 = 0b010;
const CLASS_1_TO_A: u8 = 0b100;

impl LushAssoc {
    pub const fn code(self) -> u8 {
        match self {
            Self::Null => 0,
            Self::OneToZero => 1,
            Self::ManyToZero => 2,
            Self::OneToOne => 3,
            Self::ManyToOne => 4,
            Self::OneToMany => 5,
            Self::ZeroToZero => 6,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Null,
            1 => Self::OneToZero,
            2 => Self::ManyToZero,
            3 => Self::OneToOne,
            4 => Self::ManyToOne,
            5 => Self::OneToMany,
            6 => Self::ZeroToZero,
            _ => return None,
        })
    }

    // 1-to-1 sits in both the a-to-1 and 1-to-a classes.
    const fn classes(self) -> u8 {
        match self {
            Self::OneToZero | Self::ManyToZero => CLASS_A_TO_0,
            Self::OneToOne => CLASS_A_TO_1 | CLASS_1_TO_A,
            Self::ManyToOne => CLASS_A_TO_1,
            Self::OneToMany => CLASS_1_TO_A,
            Self::Null | Self::ZeroToZero => 0,
        }
    }

    /// Same association, or two associations sharing a class.
    pub const fn class_eq(self, other: Self) -> bool {
        self.code() == other.code() || (self.classes() & other.classes()) != 0
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::OneToZero => "1-to-0",
            Self::ManyToZero => "M-to-0",
            Self::OneToOne => "1-to-1",
            Self::ManyToOne => "M-to-1",
            Self::OneToMany => "1-to-M",
            Self::ZeroToZero => "0-to-0",
        }
    }
}

impl fmt::Display for LushAssoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PATH_LEN_MASK: u32 = 0x00ff_ffff;

/// Association plus the length of the physical path it covers.
///
/// Packs into one 32-bit word: association code in the low byte, path length
/// in the upper 24 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "AssocInfoFields")]
pub struct AssocInfo {
    assoc: LushAssoc,
    path_len: u32,
}

#[derive(Deserialize)]
struct AssocInfoFields {
    assoc: LushAssoc,
    path_len: u32,
}

impl From<AssocInfoFields> for AssocInfo {
    fn from(f: AssocInfoFields) -> Self {
        Self::new(f.assoc, f.path_len)
    }
}

impl AssocInfo {
    pub const NULL: AssocInfo = AssocInfo {
        assoc: LushAssoc::Null,
        path_len: 0,
    };

    /// `path_len` is truncated to 24 bits.
    pub const fn new(assoc: LushAssoc, path_len: u32) -> Self {
        Self {
            assoc,
            path_len: path_len & PATH_LEN_MASK,
        }
    }

    pub const fn assoc(self) -> LushAssoc {
        self.assoc
    }

    pub const fn path_len(self) -> u32 {
        self.path_len
    }

    pub const fn path_len_eq(self, other: Self) -> bool {
        self.path_len == other.path_len
    }

    pub const fn to_raw(self) -> u32 {
        (self.path_len << 8) | self.assoc.code() as u32
    }

    /// `None` when the low byte is not a known association code.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match LushAssoc::from_code((raw & 0xff) as u8) {
            Some(assoc) => Some(Self {
                assoc,
                path_len: raw >> 8,
            }),
            None => None,
        }
    }
}

impl fmt::Display for AssocInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.assoc, self.path_len)
    }
}

/// Logical instruction pointer.
///
/// Only authoritative when its load-module id is non-zero; see
/// [`LogicalIp::is_valid`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalIp {
    pub lm_id: LoadModuleId,
    pub ip: Vma,
}

impl LogicalIp {
    pub const fn new(lm_id: LoadModuleId, ip: Vma) -> Self {
        Self { lm_id, ip }
    }

    pub const fn is_valid(&self) -> bool {
        self.lm_id != 0
    }
}

impl fmt::Display for LogicalIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.lm_id, self.ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialized_path_len_is_masked() {
        let info: AssocInfo =
            serde_json::from_str(r#"{ "assoc": "OneToOne", "path_len": 16777218 }"#)
                .expect("valid assoc info");
        assert_eq!(info, AssocInfo::new(LushAssoc::OneToOne, 2));
        assert_eq!(info.path_len(), 2);

        let json = serde_json::to_string(&info).expect("serializable");
        let back: AssocInfo = serde_json::from_str(&json).expect("round trip");
        assert_eq!(back, info);
    }

    #[test]
    fn class_equality() {
        assert!(LushAssoc::OneToOne.class_eq(LushAssoc::ManyToOne));
        assert!(LushAssoc::OneToOne.class_eq(LushAssoc::OneToMany));
        assert!(!LushAssoc::ManyToOne.class_eq(LushAssoc::OneToMany));
        assert!(LushAssoc::OneToZero.class_eq(LushAssoc::ManyToZero));
        assert!(LushAssoc::Null.class_eq(LushAssoc::Null));
        assert!(!LushAssoc::Null.class_eq(LushAssoc::ZeroToZero));
        assert!(!LushAssoc::OneToZero.class_eq(LushAssoc::OneToOne));
    }

    #[test]
    fn assoc_info_packs_into_one_word() {
        let info = AssocInfo::new(LushAssoc::OneToMany, 3);
        let raw = info.to_raw();
        assert_eq!(raw & 0xff, u32::from(LushAssoc::OneToMany.code()));
        assert_eq!(raw >> 8, 3);
        assert_eq!(AssocInfo::from_raw(raw), Some(info));
        assert_eq!(AssocInfo::from_raw(0xff), None);
    }

    #[test]
    fn path_len_is_truncated_to_24_bits() {
        let info = AssocInfo::new(LushAssoc::OneToOne, 0x0100_0002);
        assert_eq!(info.path_len(), 2);
    }

    #[test]
    fn logical_ip_validity_and_text() {
        assert!(!LogicalIp::new(0, 0x40).is_valid());
        let lip = LogicalIp::new(2, 0x40);
        assert!(lip.is_valid());
        assert_eq!(lip.to_string(), "2:0x40");
        assert_eq!(AssocInfo::new(LushAssoc::OneToMany, 3).to_string(), "1-to-M (3)");
    }
}
