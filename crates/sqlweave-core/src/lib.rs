//! # sqlweave-core
//!
//! A SQL template engine. A parameterised SQL string compiles once into an
//! immutable [`Blueprint`]; each call then prunes conditional fragments and
//! injects value-driven substitutions to produce the final SQL together
//! with a parameter-binding plan.
//!
//! The template syntax layers on top of plain SQL:
//!
//! | Token | Meaning |
//! |---|---|
//! | `@Name` | Ordinary variable: passes through, name recorded in the plan |
//! | `?@Name` | Optional variable: its segment is pruned when unset |
//! | `@Name_L` | Variable formatted by the handler registered for letter `L` |
//! | `/*Expr*/` | Condition marker: retains its segment when `Expr` holds |
//! | `/*~text*/` | Literal hint: emitted as plain text |
//! | `???` | Forced segment boundary |
//! | `&AND` `&OR` `&,` | Context join: merges adjacent segments |
//! | `?SELECT` | Dynamic projection: per-column retention |
//!
//! ## Optional fragments
//!
//! ```rust
//! use sqlweave_core::Blueprint;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let blueprint = Blueprint::compile(
//!     "SELECT * FROM Users WHERE IsActive = 1 AND Name = ?@Name",
//! )?;
//!
//! let mut query = blueprint.builder();
//! query.bind("Name", "Alice")?;
//! assert_eq!(
//!     query.render()?.sql,
//!     "SELECT * FROM Users WHERE IsActive = 1 AND Name = @Name",
//! );
//!
//! // Unset variables prune their whole segment, operators included.
//! query.unset("Name")?;
//! assert_eq!(
//!     query.render()?.sql,
//!     "SELECT * FROM Users WHERE IsActive = 1",
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Spread handlers
//!
//! The special handler `X` expands a collection into numbered parameters
//! and registers one binding per element:
//!
//! ```rust
//! use sqlweave_core::Blueprint;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let blueprint = Blueprint::compile(
//!     "SELECT * FROM Tasks WHERE CategoryID IN (?@Cats_X)",
//! )?;
//! let mut query = blueprint.builder();
//! query.bind("Cats", vec![10_i64, 20, 30])?;
//!
//! let out = query.render()?;
//! assert_eq!(
//!     out.sql,
//!     "SELECT * FROM Tasks WHERE CategoryID IN (@Cats_1, @Cats_2, @Cats_3)",
//! );
//! assert_eq!(out.bindings.len(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Dynamic projection
//!
//! ```rust
//! use sqlweave_core::Blueprint;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let blueprint = Blueprint::compile("?SELECT ID, Name, Email FROM Users")?;
//! let mut query = blueprint.builder();
//! query.mark("Name")?.mark("Email")?;
//! assert_eq!(query.render()?.sql, "SELECT Name, Email FROM Users");
//! # Ok(())
//! # }
//! ```
//!
//! Blueprints are immutable and thread-safe; builders are single-owner and
//! reusable. Handler registries are process-wide, mutated at startup and
//! snapshot into blueprints at compile time.

pub mod compile;
pub mod condition;
pub mod error;
pub mod handler;
pub mod keys;
pub mod lexer;
pub mod mapper;
pub mod pool;
mod render;
pub mod state;
pub mod value;

pub use compile::{default_prefix, set_default_prefix, Blueprint, CompileOptions};
pub use error::{CompileError, RenderError, StateError};
pub use handler::{
    BaseHandler, Handler, HandlerKind, HandlerRegistry, SpecialHandler, default_registry,
};
pub use keys::KeyRegistry;
pub use mapper::{Binding, BindingRole, BindingSink, RowMapper, SchemaSignature};
pub use pool::{BufferPool, PooledBuf};
pub use state::{Builder, Rendered, Slot};
pub use value::Value;
