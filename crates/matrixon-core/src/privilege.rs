// =============================================================================
// Matrixon Homeserver Core - Administrative Privilege Bitset
// =============================================================================
//
// Project: Matrixon - a federated Matrix homeserver core
// Author: arkSong (arksong2018@gmail.com)
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha (file-backed object store core)
// License: Apache 2.0 / MIT
//
// Description:
//   The Privileges newtype over a u32 bitset of administrative capabilities, 
//   with an ALL flag that implies every other flag.
//
// Performance Targets:
//   • Bitwise operations only: no allocation
//
// Architecture:
//   • Custom Serialize/Deserialize encode the set as a name array, not an integer
// =============================================================================

//! The administrative privilege bitset (§3).

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// A set of administrative capabilities granted to a user or a
/// registration token. `ALL` implies every other flag; callers should
/// test with [`Privileges::has`] rather than comparing bits directly so
/// that implication is always honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Privileges(u32);

impl Privileges {
    pub const NONE: Privileges = Privileges(0);
    pub const DEACTIVATE: Privileges = Privileges(1 << 0);
    pub const ISSUE_TOKEN: Privileges = Privileges(1 << 1);
    pub const GRANT_PRIVILEGES: Privileges = Privileges(1 << 2);
    pub const PROC_CONTROL: Privileges = Privileges(1 << 3);
    pub const ALIAS: Privileges = Privileges(1 << 4);
    pub const CONFIG: Privileges = Privileges(1 << 5);
    pub const ALL: Privileges = Privileges(
        Self::DEACTIVATE.0
            | Self::ISSUE_TOKEN.0
            | Self::GRANT_PRIVILEGES.0
            | Self::PROC_CONTROL.0
            | Self::ALIAS.0
            | Self::CONFIG.0,
    );

    fn contains(self, flag: Privileges) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// True if this set grants `flag`, accounting for `ALL` implying
    /// every individual flag.
    pub fn has(self, flag: Privileges) -> bool {
        self.contains(Privileges::ALL) || self.contains(flag)
    }

    /// Clear `flag` from this set. `ALL` is expanded to its individual
    /// flags first so removing one flag from `ALL` doesn't remove
    /// every flag.
    pub fn without(self, flag: Privileges) -> Privileges {
        let base = if self.contains(Privileges::ALL) {
            Privileges::ALL
        } else {
            self
        };
        Privileges(base.0 & !flag.0)
    }

    const NAMES: &'static [(Privileges, &'static str)] = &[
        (Privileges::ALL, "ALL"),
        (Privileges::DEACTIVATE, "DEACTIVATE"),
        (Privileges::ISSUE_TOKEN, "ISSUE_TOKEN"),
        (Privileges::GRANT_PRIVILEGES, "GRANT_PRIVILEGES"),
        (Privileges::PROC_CONTROL, "PROC_CONTROL"),
        (Privileges::ALIAS, "ALIAS"),
        (Privileges::CONFIG, "CONFIG"),
    ];

    /// Encode as the sequence of flag names set, `ALL` taking
    /// precedence over listing the individual flags it implies.
    pub fn encode(self) -> Vec<&'static str> {
        if self.contains(Privileges::ALL) {
            return vec!["ALL"];
        }
        Self::NAMES
            .iter()
            .filter(|(flag, name)| *name != "ALL" && self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Decode from a sequence of flag names, ignoring names it doesn't
    /// recognize (forward compatibility, matching the JSON Schema
    /// Layer's "unknown fields are ignored" rule).
    pub fn decode<'a>(names: impl IntoIterator<Item = &'a str>) -> Privileges {
        let mut set = Privileges::NONE;
        for name in names {
            if let Some((flag, _)) = Self::NAMES.iter().find(|(_, n)| *n == name) {
                set |= *flag;
            }
        }
        set
    }
}

impl BitOr for Privileges {
    type Output = Privileges;

    fn bitor(self, rhs: Privileges) -> Privileges {
        Privileges(self.0 | rhs.0)
    }
}

impl BitOrAssign for Privileges {
    fn bitor_assign(&mut self, rhs: Privileges) {
        self.0 |= rhs.0;
    }
}

impl Serialize for Privileges {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.encode().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Privileges {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let names: Vec<String> = Vec::deserialize(deserializer)?;
        Ok(Privileges::decode(names.iter().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_implies_every_other_flag() {
        let all = Privileges::ALL;
        assert!(all.has(Privileges::PROC_CONTROL));
        assert!(all.has(Privileges::CONFIG));
    }

    #[test]
    fn encode_collapses_to_all_when_every_flag_is_set() {
        let set = Privileges::DEACTIVATE
            | Privileges::ISSUE_TOKEN
            | Privileges::GRANT_PRIVILEGES
            | Privileges::PROC_CONTROL
            | Privileges::ALIAS
            | Privileges::CONFIG;
        assert_eq!(set.encode(), vec!["ALL"]);
    }

    #[test]
    fn encode_decode_round_trips_a_partial_set() {
        let set = Privileges::DEACTIVATE | Privileges::ALIAS;
        let names = set.encode();
        let decoded = Privileges::decode(names.iter().copied());
        assert_eq!(decoded, set);
        assert!(!decoded.has(Privileges::PROC_CONTROL));
    }

    #[test]
    fn decode_ignores_unknown_names() {
        let decoded = Privileges::decode(["ALIAS", "NOT_A_REAL_FLAG"]);
        assert_eq!(decoded, Privileges::ALIAS);
    }

    #[test]
    fn without_clears_a_single_flag() {
        let set = Privileges::DEACTIVATE | Privileges::ALIAS;
        let cleared = set.without(Privileges::ALIAS);
        assert!(cleared.has(Privileges::DEACTIVATE));
        assert!(!cleared.has(Privileges::ALIAS));
    }

    #[test]
    fn without_expands_all_before_clearing() {
        let cleared = Privileges::ALL.without(Privileges::PROC_CONTROL);
        assert!(cleared.has(Privileges::CONFIG));
        assert!(!cleared.has(Privileges::PROC_CONTROL));
    }

    #[test]
    fn json_round_trips_through_serde() {
        let set = Privileges::ISSUE_TOKEN | Privileges::CONFIG;
        let json = serde_json::to_value(set).unwrap();
        let back: Privileges = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }
}
