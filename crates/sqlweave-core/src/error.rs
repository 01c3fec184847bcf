//! Error types for template compilation, rendering and builder state.

/// Errors raised while compiling a template into a blueprint.
///
/// Compile errors are fatal to blueprint construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Malformed token, unterminated string/comment, unbalanced parens,
    /// dangling `&`, or an all-conditional static SELECT list.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Error description.
        message: String,
        /// Byte offset in the template.
        offset: usize,
    },

    /// A variable uses a handler letter with no registered handler.
    #[error("no handler registered for letter '{letter}' (variable '{name}' at offset {offset})")]
    UnknownHandler {
        /// The unregistered letter.
        letter: char,
        /// The variable using it.
        name: String,
        /// Byte offset of the variable.
        offset: usize,
    },

    /// A `/*@Var*/` marker references a name that never appears as a
    /// variable in the template.
    #[error("marker references unknown variable '{name}' at offset {offset}")]
    UnknownVariable {
        /// The referenced name.
        name: String,
        /// Byte offset of the marker atom.
        offset: usize,
    },
}

/// Errors raised while rendering a blueprint with a state vector.
///
/// Render errors are fatal to the current render only; the blueprint and the
/// builder remain reusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// A dynamic projection ended up with zero active columns.
    #[error("dynamic projection has no active columns")]
    EmptyProjection,

    /// A retained, non-optional handler variable has no value.
    #[error("handler variable '{name}' has no value")]
    MissingHandlerValue {
        /// The variable name.
        name: String,
    },

    /// A handler rejected the value's type.
    #[error("handler '{letter}' cannot format '{name}': {message}")]
    HandlerType {
        /// The handler letter.
        letter: char,
        /// The variable name.
        name: String,
        /// What the handler expected.
        message: String,
    },

    /// A retained, non-optional spread handler was given an empty collection.
    #[error("spread variable '{name}' expanded to an empty collection")]
    EmptyExpansion {
        /// The variable name.
        name: String,
    },
}

/// Errors raised by builder state mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// `mark` on a variable slot, or a non-boolean value on a flag or
    /// projection-column slot.
    #[error("slot '{name}' does not accept this operation: {message}")]
    ReservedSlot {
        /// The key name.
        name: String,
        /// Why the operation is rejected.
        message: String,
    },

    /// The name does not resolve to any registered key.
    #[error("unknown key '{name}'")]
    UnknownKey {
        /// The requested name.
        name: String,
    },
}
