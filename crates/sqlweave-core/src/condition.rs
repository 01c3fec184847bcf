//! Condition expressions and the `/*…*/` marker-body compiler.
//!
//! A marker body is a linear, left-to-right sequence of atoms combined with
//! `|` and `&` without precedence: `A|B&C` evaluates as `((A|B)&C)`. The
//! empty expression is TRUE. Multiple condition sources landing in the same
//! segment combine as AND across groups.

use crate::error::CompileError;
use crate::keys::{KeyRole, KeyTable};

/// Binary combinator between condition atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoolOp {
    And,
    Or,
}

/// A key reference inside a condition group. The first atom's `op` is
/// ignored during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CondAtom {
    /// Combinator with the accumulated result so far.
    pub op: BoolOp,
    /// Key index.
    pub key: usize,
}

/// One linear chain of atoms, evaluated left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CondGroup {
    /// The atoms in source order.
    pub atoms: Vec<CondAtom>,
}

impl CondGroup {
    /// A group with a single key atom.
    #[must_use]
    pub fn single(key: usize) -> Self {
        Self {
            atoms: vec![CondAtom {
                op: BoolOp::And,
                key,
            }],
        }
    }

    /// Appends a key OR'd with the chain so far (dynamic-projection joins).
    pub fn push_or(&mut self, key: usize) {
        self.atoms.push(CondAtom {
            op: BoolOp::Or,
            key,
        });
    }

    fn eval(&self, active: &dyn Fn(usize) -> bool) -> bool {
        let mut iter = self.atoms.iter();
        let mut acc = match iter.next() {
            Some(atom) => active(atom.key),
            None => return true,
        };
        for atom in iter {
            let rhs = active(atom.key);
            acc = match atom.op {
                BoolOp::And => acc && rhs,
                BoolOp::Or => acc || rhs,
            };
        }
        acc
    }

    fn remap(&mut self, map: &[usize]) {
        for atom in &mut self.atoms {
            atom.key = map[atom.key];
        }
    }
}

/// The retention condition of a segment: AND of groups; empty is TRUE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CondExpr {
    /// Groups combined with AND.
    pub groups: Vec<CondGroup>,
}

impl CondExpr {
    /// True when the expression has no groups (always retained).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Adds a group (implicit AND with the existing ones).
    pub fn push_group(&mut self, group: CondGroup) {
        self.groups.push(group);
    }

    /// Adds all groups of another expression.
    pub fn merge(&mut self, other: CondExpr) {
        self.groups.extend(other.groups);
    }

    /// Evaluates the expression against a slot-activity predicate.
    #[must_use]
    pub fn eval(&self, active: &dyn Fn(usize) -> bool) -> bool {
        self.groups.iter().all(|g| g.eval(active))
    }

    /// Rewrites provisional key ids into final registry indices.
    pub(crate) fn remap(&mut self, map: &[usize]) {
        for group in &mut self.groups {
            group.remap(map);
        }
    }
}

/// Compiles a marker body into a condition group, registering its atoms.
///
/// Bare atoms register as flags (unless the name is already known in a
/// stronger role); atoms prefixed with the variable prefix must resolve to a
/// variable somewhere in the template, which is verified when the key table
/// freezes.
///
/// # Errors
///
/// Returns a syntax error for an empty body, a dangling combinator, or an
/// unexpected character; offsets are absolute template offsets.
pub(crate) fn compile_marker(
    body: &str,
    base_offset: usize,
    prefix: char,
    keys: &mut KeyTable,
) -> Result<CondGroup, CompileError> {
    let mut group = CondGroup::default();
    let mut chars = body.char_indices().peekable();
    let mut pending_op = BoolOp::And;
    let mut expect_atom = true;

    let syntax = |message: &str, at: usize| CompileError::Syntax {
        message: String::from(message),
        offset: base_offset + at,
    };

    while let Some(&(at, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '|' || c == '&' {
            if expect_atom {
                return Err(syntax("expected a condition atom", at));
            }
            pending_op = if c == '|' { BoolOp::Or } else { BoolOp::And };
            expect_atom = true;
            chars.next();
            continue;
        }

        if !expect_atom {
            return Err(syntax("expected '&' or '|' between atoms", at));
        }

        let referenced = c == prefix;
        if referenced {
            chars.next();
        }
        let name_start = chars.peek().map(|&(i, _)| i).unwrap_or(body.len());
        while chars
            .peek()
            .is_some_and(|&(_, c)| c.is_alphanumeric() || c == '_')
        {
            chars.next();
        }
        let name_end = chars.peek().map(|&(i, _)| i).unwrap_or(body.len());
        let name = &body[name_start..name_end];
        if name.is_empty() {
            return Err(syntax("expected a condition atom", at));
        }

        let key = if referenced {
            keys.reference_variable(name, base_offset + at)
        } else {
            keys.register(name, KeyRole::Flag)
        };
        group.atoms.push(CondAtom {
            op: pending_op,
            key,
        });
        expect_atom = false;
    }

    if group.atoms.is_empty() {
        return Err(syntax("empty condition marker", 0));
    }
    if expect_atom {
        return Err(syntax("dangling combinator in condition", body.len()));
    }
    Ok(group)
}
