//! The parameter-binding plan and the row-mapper contract.
//!
//! The engine does not map rows to user types; it only hands the mapper the
//! final SQL and the binding plan and expects a signature to cache prepared
//! shapes against.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::value::Value;

/// How a binding entered the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRole {
    /// An ordinary `@Var` occurrence retained in the output. The engine
    /// records the name and whatever value the builder carries (possibly
    /// `Null`); conversion is the driver's concern.
    Parameter,
    /// A parameter produced by the special handler with this letter.
    Expanded(char),
}

/// One entry of the parameter-binding plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Parameter name, without the prefix character.
    pub name: String,
    /// The bound value.
    pub value: Value,
    /// Origin of the binding.
    pub role: BindingRole,
}

/// Sink receiving bindings during a single render call, in output order.
pub trait BindingSink {
    /// Registers one binding.
    fn bind(&mut self, name: &str, value: Value, role: BindingRole);
}

impl BindingSink for Vec<Binding> {
    fn bind(&mut self, name: &str, value: Value, role: BindingRole) {
        self.push(Binding {
            name: String::from(name),
            value,
            role,
        });
    }
}

/// A cacheable fingerprint of a rendered statement shape: the final SQL plus
/// the names and roles of its bindings (values excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaSignature(u64);

impl SchemaSignature {
    /// Computes the signature for a rendered statement.
    #[must_use]
    pub fn compute(sql: &str, bindings: &[Binding]) -> Self {
        let mut hasher = DefaultHasher::new();
        sql.hash(&mut hasher);
        for binding in bindings {
            binding.name.hash(&mut hasher);
            match binding.role {
                BindingRole::Parameter => 0_u8.hash(&mut hasher),
                BindingRole::Expanded(letter) => {
                    1_u8.hash(&mut hasher);
                    letter.hash(&mut hasher);
                }
            }
        }
        Self(hasher.finish())
    }

    /// The raw signature value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Contract for the external row mapper.
///
/// Implementations receive each rendered statement and return the signature
/// they cache materialisation plans against; the default derives it from the
/// statement shape alone.
pub trait RowMapper {
    /// Returns the cache signature for a rendered statement.
    fn schema_signature(&self, sql: &str, bindings: &[Binding]) -> SchemaSignature {
        SchemaSignature::compute(sql, bindings)
    }
}
