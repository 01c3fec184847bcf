//! Value handlers: per-letter rules applied to handled variables.
//!
//! Base handlers turn a value into text spliced at the variable's position.
//! Special handlers additionally register parameter bindings. A process-wide
//! default registry holds the reference handlers; blueprints snapshot
//! handler references at compile time, so later registry mutation does not
//! affect already-compiled templates.

use std::sync::{Arc, OnceLock, RwLock};

use crate::error::RenderError;
use crate::mapper::{BindingRole, BindingSink};
use crate::value::Value;

/// A handler that produces text only.
pub trait BaseHandler: Send + Sync {
    /// Formats `value` for splicing into the statement text.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError::HandlerType`] when the value's type is not
    /// acceptable.
    fn emit_text(&self, name: &str, value: &Value) -> Result<String, RenderError>;
}

/// A handler that produces text and registers parameter bindings.
pub trait SpecialHandler: Send + Sync {
    /// Formats the splice text for `value`.
    ///
    /// # Errors
    ///
    /// Returns a render error when the value's type or shape is rejected.
    fn emit_text(&self, name: &str, prefix: char, value: &Value) -> Result<String, RenderError>;

    /// Registers the bindings this placement contributes, in splice order.
    ///
    /// # Errors
    ///
    /// Returns a render error when the value's type or shape is rejected.
    fn bind_params(
        &self,
        name: &str,
        value: &Value,
        sink: &mut dyn BindingSink,
    ) -> Result<(), RenderError>;
}

/// Whether a placement uses a base or a special handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HandlerKind {
    Base,
    Special,
}

/// A resolved handler reference, as snapshot into a blueprint.
#[derive(Clone)]
pub enum Handler {
    Base(Arc<dyn BaseHandler>),
    Special(Arc<dyn SpecialHandler>),
}

impl Handler {
    /// The placement kind this handler serves.
    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        match self {
            Self::Base(_) => HandlerKind::Base,
            Self::Special(_) => HandlerKind::Special,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base(_) => f.write_str("Handler::Base(..)"),
            Self::Special(_) => f.write_str("Handler::Special(..)"),
        }
    }
}

fn letter_slot(letter: char) -> Option<usize> {
    letter
        .is_ascii_alphabetic()
        .then(|| (letter.to_ascii_uppercase() as u8 - b'A') as usize)
}

/// Letter-indexed handler tables (A–Z, case-insensitive).
///
/// Intended for startup-time mutation; safe to share. When a letter carries
/// both a base and a special registration, the special one wins resolution.
pub struct HandlerRegistry {
    base: RwLock<[Option<Arc<dyn BaseHandler>>; 26]>,
    special: RwLock<[Option<Arc<dyn SpecialHandler>>; 26]>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: RwLock::new(std::array::from_fn(|_| None)),
            special: RwLock::new(std::array::from_fn(|_| None)),
        }
    }

    /// Creates a registry with the reference handlers `N`, `S`, `R` and `X`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.set_base('N', Arc::new(NumberHandler));
        registry.set_base('S', Arc::new(QuotedStringHandler));
        registry.set_base('R', Arc::new(RawTextHandler));
        registry.set_special('X', Arc::new(SpreadHandler));
        registry
    }

    /// Registers a base handler for `letter` (case-insensitive).
    pub fn set_base(&self, letter: char, handler: Arc<dyn BaseHandler>) {
        if let Some(slot) = letter_slot(letter) {
            self.base.write().expect("handler table poisoned")[slot] = Some(handler);
        }
    }

    /// Registers a special handler for `letter` (case-insensitive).
    pub fn set_special(&self, letter: char, handler: Arc<dyn SpecialHandler>) {
        if let Some(slot) = letter_slot(letter) {
            self.special.write().expect("handler table poisoned")[slot] = Some(handler);
        }
    }

    /// Resolves a letter to a handler reference.
    #[must_use]
    pub fn resolve(&self, letter: char) -> Option<Handler> {
        let slot = letter_slot(letter)?;
        if let Some(h) = &self.special.read().expect("handler table poisoned")[slot] {
            return Some(Handler::Special(Arc::clone(h)));
        }
        self.base.read().expect("handler table poisoned")[slot]
            .as_ref()
            .map(|h| Handler::Base(Arc::clone(h)))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide default registry, created on first use with the
/// reference handlers installed.
pub fn default_registry() -> &'static HandlerRegistry {
    static REGISTRY: OnceLock<HandlerRegistry> = OnceLock::new();
    REGISTRY.get_or_init(HandlerRegistry::with_defaults)
}

/// `N`: formats a numeric value as its decimal representation.
pub struct NumberHandler;

impl BaseHandler for NumberHandler {
    fn emit_text(&self, name: &str, value: &Value) -> Result<String, RenderError> {
        value
            .as_number_literal()
            .ok_or_else(|| RenderError::HandlerType {
                letter: 'N',
                name: String::from(name),
                message: String::from("expected a numeric value"),
            })
    }
}

/// `S`: formats a string as a single-quoted SQL literal with `'` doubled.
pub struct QuotedStringHandler;

impl BaseHandler for QuotedStringHandler {
    fn emit_text(&self, name: &str, value: &Value) -> Result<String, RenderError> {
        let text = value.as_text().ok_or_else(|| RenderError::HandlerType {
            letter: 'S',
            name: String::from(name),
            message: String::from("expected a string value"),
        })?;
        let escaped = text.replace('\'', "''");
        Ok(format!("'{escaped}'"))
    }
}

/// `R`: splices the raw string value verbatim, with no escaping.
pub struct RawTextHandler;

impl BaseHandler for RawTextHandler {
    fn emit_text(&self, name: &str, value: &Value) -> Result<String, RenderError> {
        value
            .as_text()
            .map(String::from)
            .ok_or_else(|| RenderError::HandlerType {
                letter: 'R',
                name: String::from(name),
                message: String::from("expected a string value"),
            })
    }
}

/// `X`: spreads a collection as `@Var_1, @Var_2, …` and registers one
/// binding per element.
pub struct SpreadHandler;

impl SpreadHandler {
    fn items<'v>(name: &str, value: &'v Value) -> Result<&'v [Value], RenderError> {
        let items = value.as_list().ok_or_else(|| RenderError::HandlerType {
            letter: 'X',
            name: String::from(name),
            message: String::from("expected a collection"),
        })?;
        if items.is_empty() {
            return Err(RenderError::EmptyExpansion {
                name: String::from(name),
            });
        }
        Ok(items)
    }
}

impl SpecialHandler for SpreadHandler {
    fn emit_text(&self, name: &str, prefix: char, value: &Value) -> Result<String, RenderError> {
        let items = Self::items(name, value)?;
        let mut out = String::new();
        for i in 1..=items.len() {
            if i > 1 {
                out.push_str(", ");
            }
            out.push(prefix);
            out.push_str(name);
            out.push('_');
            out.push_str(&i.to_string());
        }
        Ok(out)
    }

    fn bind_params(
        &self,
        name: &str,
        value: &Value,
        sink: &mut dyn BindingSink,
    ) -> Result<(), RenderError> {
        let items = Self::items(name, value)?;
        for (i, item) in items.iter().enumerate() {
            sink.bind(
                &format!("{name}_{}", i + 1),
                item.clone(),
                BindingRole::Expanded('X'),
            );
        }
        Ok(())
    }
}
