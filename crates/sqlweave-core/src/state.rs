//! Per-call builder state: the dense key → value vector.

use crate::compile::Blueprint;
use crate::error::{RenderError, StateError};
use crate::mapper::{Binding, BindingSink};
use crate::pool::{BufferPool, PooledBuf};
use crate::value::Value;

/// One slot of the state vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Slot {
    /// No value; the slot does not activate conditions.
    #[default]
    Empty,
    /// Marked used. Activates projection-column and flag slots; on a
    /// variable slot it is equivalent to `Empty` (a variable must carry a
    /// value to be active).
    Used,
    /// A carried value.
    Value(Value),
}

/// The result of one render call.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// The final SQL text.
    pub sql: String,
    /// The parameter-binding plan, in output order.
    pub bindings: Vec<Binding>,
}

/// A single-owner builder holding the per-call state vector for one
/// blueprint. Builders are cheap to create and reusable across renders.
#[derive(Debug, Clone)]
pub struct Builder<'bp> {
    blueprint: &'bp Blueprint,
    slots: Vec<Slot>,
}

impl<'bp> Builder<'bp> {
    pub(crate) fn new(blueprint: &'bp Blueprint) -> Self {
        Self {
            blueprint,
            slots: vec![Slot::Empty; blueprint.keys().count()],
        }
    }

    /// The blueprint this builder renders.
    #[must_use]
    pub fn blueprint(&self) -> &'bp Blueprint {
        self.blueprint
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    fn resolve(&self, name: &str) -> Result<usize, StateError> {
        self.blueprint
            .keys()
            .index_of(name)
            .ok_or_else(|| StateError::UnknownKey {
                name: String::from(name),
            })
    }

    /// Marks a projection-column or flag key as used.
    ///
    /// # Errors
    ///
    /// Fails on an unknown name or a variable slot (variables carry values;
    /// use [`Builder::bind`]).
    pub fn mark(&mut self, name: &str) -> Result<&mut Self, StateError> {
        let idx = self.resolve(name)?;
        if !self.blueprint.keys().is_reserved(idx) {
            return Err(StateError::ReservedSlot {
                name: String::from(name),
                message: String::from("variable slots take values, not marks"),
            });
        }
        self.slots[idx] = Slot::Used;
        Ok(self)
    }

    /// Binds a value to a variable slot.
    ///
    /// Booleans are activation signals on every slot kind: `true` marks the
    /// slot used, `false` clears it. Any other value on a projection-column
    /// or flag slot is an error.
    ///
    /// # Errors
    ///
    /// Fails on an unknown name or a non-boolean value for a reserved slot.
    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self, StateError> {
        let idx = self.resolve(name)?;
        let value = value.into();
        let reserved = self.blueprint.keys().is_reserved(idx);
        self.slots[idx] = match value {
            Value::Bool(true) => Slot::Used,
            Value::Bool(false) => Slot::Empty,
            _ if reserved => {
                return Err(StateError::ReservedSlot {
                    name: String::from(name),
                    message: String::from("flag slots accept only boolean activation"),
                });
            }
            value => Slot::Value(value),
        };
        Ok(self)
    }

    /// Resets one slot to empty.
    ///
    /// # Errors
    ///
    /// Fails on an unknown name.
    pub fn unset(&mut self, name: &str) -> Result<&mut Self, StateError> {
        let idx = self.resolve(name)?;
        self.slots[idx] = Slot::Empty;
        Ok(self)
    }

    /// Clears the whole state vector.
    pub fn reset(&mut self) {
        self.slots.fill(Slot::Empty);
    }

    /// Clears only the projection-column slots.
    pub fn reset_selects(&mut self) {
        let end = self.blueprint.keys().end_selects();
        for slot in &mut self.slots[..end] {
            *slot = Slot::Empty;
        }
    }

    /// Renders into a fresh string.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`]; the builder and blueprint stay reusable.
    pub fn render(&self) -> Result<Rendered, RenderError> {
        let mut sql = String::with_capacity(self.blueprint.template().len() + 16);
        let bindings = self.render_into(&mut sql)?;
        Ok(Rendered { sql, bindings })
    }

    /// Renders into a caller-provided buffer (cleared first) and returns
    /// the binding plan. This is the hot path: pass a pooled buffer to
    /// avoid per-call allocation.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`]; the builder and blueprint stay reusable.
    pub fn render_into(&self, buf: &mut String) -> Result<Vec<Binding>, RenderError> {
        let mut bindings = Vec::new();
        self.render_with_sink(buf, &mut bindings)?;
        Ok(bindings)
    }

    /// Renders into a caller-provided buffer and binding sink.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`]; the builder and blueprint stay reusable.
    pub fn render_with_sink(
        &self,
        buf: &mut String,
        sink: &mut dyn BindingSink,
    ) -> Result<(), RenderError> {
        buf.clear();
        crate::render::render(self.blueprint, &self.slots, buf, sink)
    }

    /// Renders into a buffer borrowed from `pool`, returning the guard.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`]; the builder and blueprint stay reusable.
    pub fn render_pooled<'p>(
        &self,
        pool: &'p BufferPool,
    ) -> Result<(PooledBuf<'p>, Vec<Binding>), RenderError> {
        let mut buf = pool.acquire();
        let bindings = self.render_into(&mut buf)?;
        Ok((buf, bindings))
    }
}
