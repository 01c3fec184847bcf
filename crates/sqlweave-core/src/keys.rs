//! Key registry: a case-insensitive, insertion-ordered index for all keys.
//!
//! Keys occupy a dense index space with five banks in registration order:
//! dynamic-projection columns, bare comment flags, ordinary variables,
//! special-handler variables, base-handler variables. Within each bank the
//! first appearance wins; a name used in several roles resolves to the
//! strongest one (projection column sticks; handler variables beat plain
//! variables; special beats base; every variable role beats a bare flag).

use std::collections::HashMap;

use crate::error::CompileError;

/// The role a key occurrence claims during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyRole {
    /// Dynamic-projection column.
    Select,
    /// Bare comment flag `/*Name*/`.
    Flag,
    /// Ordinary variable `@Name`.
    Variable,
    /// Variable with a special (binding) handler.
    Special,
    /// Variable with a base (text) handler.
    Base,
}

const SEEN_SELECT: u8 = 1 << 0;
const SEEN_FLAG: u8 = 1 << 1;
const SEEN_VARIABLE: u8 = 1 << 2;
const SEEN_SPECIAL: u8 = 1 << 3;
const SEEN_BASE: u8 = 1 << 4;

struct KeyEntry {
    /// Name as first written in the template.
    name: String,
    /// All roles this name was seen in.
    roles: u8,
    /// Offset of the first `/*@Name*/` reference, if any.
    ref_offset: Option<usize>,
}

impl KeyEntry {
    /// Resolves the winning bank: 0 selects, 1 flags, 2 variables,
    /// 3 special, 4 base.
    fn bank(&self) -> usize {
        if self.roles & SEEN_SELECT != 0 {
            0
        } else if self.roles & SEEN_SPECIAL != 0 {
            3
        } else if self.roles & SEEN_BASE != 0 {
            4
        } else if self.roles & SEEN_VARIABLE != 0 {
            2
        } else {
            1
        }
    }
}

/// Mutable key table used while compiling. Hands out provisional ids in
/// first-appearance order; [`KeyTable::freeze`] assigns final bank-ordered
/// indices and returns the remap.
pub(crate) struct KeyTable {
    entries: Vec<KeyEntry>,
    index: HashMap<String, usize>,
}

impl KeyTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn fold(name: &str) -> String {
        if name.is_ascii() {
            name.to_ascii_lowercase()
        } else {
            name.to_lowercase()
        }
    }

    fn entry_id(&mut self, name: &str) -> usize {
        let folded = Self::fold(name);
        if let Some(&id) = self.index.get(&folded) {
            return id;
        }
        let id = self.entries.len();
        self.entries.push(KeyEntry {
            name: String::from(name),
            roles: 0,
            ref_offset: None,
        });
        self.index.insert(folded, id);
        id
    }

    /// Registers an occurrence of `name` in `role`, returning its
    /// provisional id.
    pub(crate) fn register(&mut self, name: &str, role: KeyRole) -> usize {
        let id = self.entry_id(name);
        self.entries[id].roles |= match role {
            KeyRole::Select => SEEN_SELECT,
            KeyRole::Flag => SEEN_FLAG,
            KeyRole::Variable => SEEN_VARIABLE,
            KeyRole::Special => SEEN_SPECIAL,
            KeyRole::Base => SEEN_BASE,
        };
        id
    }

    /// Records a `/*@Name*/` marker reference; the name must also occur as a
    /// variable somewhere in the template, checked at freeze time.
    pub(crate) fn reference_variable(&mut self, name: &str, offset: usize) -> usize {
        let id = self.entry_id(name);
        if self.entries[id].ref_offset.is_none() {
            self.entries[id].ref_offset = Some(offset);
        }
        id
    }

    /// Assigns final bank-ordered indices.
    ///
    /// Returns the frozen registry and the provisional-to-final remap.
    ///
    /// # Errors
    ///
    /// Fails when a marker referenced `@Name` but no variable named `Name`
    /// exists in the template.
    pub(crate) fn freeze(self) -> Result<(KeyRegistry, Vec<usize>), CompileError> {
        for entry in &self.entries {
            if let Some(offset) = entry.ref_offset {
                let is_variable =
                    entry.roles & (SEEN_VARIABLE | SEEN_SPECIAL | SEEN_BASE | SEEN_SELECT) != 0;
                if !is_variable {
                    return Err(CompileError::UnknownVariable {
                        name: entry.name.clone(),
                        offset,
                    });
                }
            }
        }

        let mut remap = vec![0_usize; self.entries.len()];
        let mut names = Vec::with_capacity(self.entries.len());
        let mut index = HashMap::with_capacity(self.entries.len());
        let mut bounds = [0_usize; 2];

        for bank in 0..5 {
            for (id, entry) in self.entries.iter().enumerate() {
                if entry.bank() != bank {
                    continue;
                }
                remap[id] = names.len();
                index.insert(Self::fold(&entry.name), names.len());
                names.push(entry.name.clone());
            }
            if bank == 0 {
                bounds[0] = names.len();
            }
            if bank == 1 {
                bounds[1] = names.len();
            }
        }

        Ok((
            KeyRegistry {
                names,
                index,
                end_selects: bounds[0],
                start_variables: bounds[1],
            },
            remap,
        ))
    }
}

/// The frozen, immutable key registry of a blueprint.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyRegistry {
    names: Vec<String>,
    index: HashMap<String, usize>,
    end_selects: usize,
    start_variables: usize,
}

impl KeyRegistry {
    /// Number of distinct keys.
    #[must_use]
    pub fn count(&self) -> usize {
        self.names.len()
    }

    /// Name of the key at `idx`, as first written in the template.
    #[must_use]
    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// Case-insensitive lookup of a key index.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(&KeyTable::fold(name)).copied()
    }

    /// End of the projection-column bank.
    #[must_use]
    pub fn end_selects(&self) -> usize {
        self.end_selects
    }

    /// Start of the value-carrying banks (variables and handler variables).
    #[must_use]
    pub fn start_variables(&self) -> usize {
        self.start_variables
    }

    /// True for slots that only hold a used-marker (projection columns and
    /// flags).
    #[must_use]
    pub fn is_reserved(&self, idx: usize) -> bool {
        idx < self.start_variables
    }

    /// True for projection-column slots.
    #[must_use]
    pub fn is_select(&self, idx: usize) -> bool {
        idx < self.end_selects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_dedupe() {
        let mut table = KeyTable::new();
        let a = table.register("Name", KeyRole::Variable);
        let b = table.register("NAME", KeyRole::Variable);
        let c = table.register("name", KeyRole::Variable);
        assert_eq!(a, b);
        assert_eq!(b, c);
        let (reg, _) = table.freeze().unwrap();
        assert_eq!(reg.count(), 1);
        // First spelling wins.
        assert_eq!(reg.name(0), "Name");
        assert_eq!(reg.index_of("nAmE"), Some(0));
    }

    #[test]
    fn test_bank_ordering_and_bounds() {
        let mut table = KeyTable::new();
        table.register("Email", KeyRole::Variable);
        table.register("WithOrder", KeyRole::Flag);
        table.register("ID", KeyRole::Select);
        table.register("Cats", KeyRole::Special);
        table.register("Skip", KeyRole::Base);
        let (reg, _) = table.freeze().unwrap();

        assert_eq!(reg.count(), 5);
        assert_eq!(reg.name(0), "ID");
        assert_eq!(reg.name(1), "WithOrder");
        assert_eq!(reg.name(2), "Email");
        assert_eq!(reg.name(3), "Cats");
        assert_eq!(reg.name(4), "Skip");
        assert_eq!(reg.end_selects(), 1);
        assert_eq!(reg.start_variables(), 2);
        assert!(reg.is_reserved(0));
        assert!(reg.is_reserved(1));
        assert!(!reg.is_reserved(2));
        assert!(reg.is_select(0));
        assert!(!reg.is_select(1));
    }

    #[test]
    fn test_role_precedence() {
        // A flag occurrence followed by a variable occurrence upgrades the
        // key into the variable bank.
        let mut table = KeyTable::new();
        table.register("Name", KeyRole::Flag);
        table.register("Name", KeyRole::Variable);
        table.register("Cats", KeyRole::Variable);
        table.register("Cats", KeyRole::Special);
        let (reg, _) = table.freeze().unwrap();
        assert_eq!(reg.start_variables(), 0);
        assert!(!reg.is_reserved(reg.index_of("Name").unwrap()));
    }

    #[test]
    fn test_remap_tracks_reordering() {
        let mut table = KeyTable::new();
        let v = table.register("Var", KeyRole::Variable);
        let f = table.register("Flag", KeyRole::Flag);
        let s = table.register("Col", KeyRole::Select);
        let (reg, remap) = table.freeze().unwrap();
        assert_eq!(reg.name(remap[v]), "Var");
        assert_eq!(reg.name(remap[f]), "Flag");
        assert_eq!(reg.name(remap[s]), "Col");
        assert_eq!(remap[s], 0);
        assert_eq!(remap[f], 1);
        assert_eq!(remap[v], 2);
    }

    #[test]
    fn test_unresolved_variable_reference() {
        let mut table = KeyTable::new();
        table.reference_variable("Ghost", 7);
        let err = table.freeze().unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnknownVariable { name, offset: 7 } if name == "Ghost"
        ));
    }

    #[test]
    fn test_referenced_flag_still_fails() {
        // `/*@Name*/` plus a bare `/*Name*/` flag is not enough: a real
        // variable is required.
        let mut table = KeyTable::new();
        table.register("Name", KeyRole::Flag);
        table.reference_variable("Name", 3);
        assert!(table.freeze().is_err());
    }
}
