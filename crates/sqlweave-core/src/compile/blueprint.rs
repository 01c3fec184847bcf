//! The immutable compiled blueprint.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::error::CompileError;
use crate::handler::{default_registry, Handler, HandlerRegistry};
use crate::keys::KeyRegistry;
use crate::state::Builder;

use super::builder::build;
use super::segment::{Placement, Projection, Segment};

static DEFAULT_PREFIX: AtomicU32 = AtomicU32::new('@' as u32);

/// Sets the process-wide default variable prefix.
///
/// Affects only templates compiled afterwards; existing blueprints keep the
/// prefix they were compiled with.
pub fn set_default_prefix(prefix: char) {
    DEFAULT_PREFIX.store(prefix as u32, Ordering::Relaxed);
}

/// The process-wide default variable prefix (initially `@`).
#[must_use]
pub fn default_prefix() -> char {
    char::from_u32(DEFAULT_PREFIX.load(Ordering::Relaxed)).unwrap_or('@')
}

/// Per-compilation overrides.
#[derive(Default, Clone, Copy)]
pub struct CompileOptions<'r> {
    /// Variable prefix for this template (defaults to the global one).
    pub prefix: Option<char>,
    /// Handler registry to snapshot from (defaults to the global one).
    pub registry: Option<&'r HandlerRegistry>,
}

/// An immutable compiled template.
///
/// Blueprints are thread-safe after construction: any number of builders
/// may render against one concurrently. Handler references are snapshot at
/// compile time; later registry mutation does not affect existing
/// blueprints.
#[derive(Debug)]
pub struct Blueprint {
    template: String,
    prefix: char,
    registry: KeyRegistry,
    segments: Vec<Segment>,
    placements: Vec<Placement>,
    handlers: Vec<Handler>,
    projections: Vec<Projection>,
    children: Vec<Vec<usize>>,
}

impl Blueprint {
    /// Compiles a template with the global prefix and handler registry.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] for lexical or structural template
    /// defects; the blueprint is not constructed.
    pub fn compile(template: &str) -> Result<Self, CompileError> {
        Self::compile_with(template, &CompileOptions::default())
    }

    /// Compiles a template with explicit options.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] for lexical or structural template
    /// defects; the blueprint is not constructed.
    pub fn compile_with(template: &str, options: &CompileOptions<'_>) -> Result<Self, CompileError> {
        let prefix = options.prefix.unwrap_or_else(default_prefix);
        let registry = options.registry.unwrap_or(default_registry());
        let parts = build(template, prefix, registry)?;

        let mut children = vec![Vec::new(); parts.segments.len()];
        for (i, seg) in parts.segments.iter().enumerate() {
            if let Some(parent) = seg.parent {
                children[parent].push(i);
            }
        }

        debug!(
            segments = parts.segments.len(),
            keys = parts.registry.count(),
            placements = parts.placements.len(),
            projections = parts.projections.len(),
            "compiled template blueprint"
        );

        Ok(Self {
            template: String::from(template),
            prefix,
            registry: parts.registry,
            segments: parts.segments,
            placements: parts.placements,
            handlers: parts.handlers,
            projections: parts.projections,
            children,
        })
    }

    /// Creates a fresh builder with an empty state vector.
    #[must_use]
    pub fn builder(&self) -> Builder<'_> {
        Builder::new(self)
    }

    /// The original template text.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The variable prefix this blueprint was compiled with.
    #[must_use]
    pub fn prefix(&self) -> char {
        self.prefix
    }

    /// The frozen key registry.
    #[must_use]
    pub fn keys(&self) -> &KeyRegistry {
        &self.registry
    }

    /// The compiled segments, parents first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The dynamic projections of the template.
    #[must_use]
    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    /// Handler placements, in template order.
    #[must_use]
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub(crate) fn handler(&self, placement: usize) -> &Handler {
        &self.handlers[placement]
    }

    pub(crate) fn children(&self, segment: usize) -> &[usize] {
        &self.children[segment]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blueprint_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Blueprint>();
    }

    #[test]
    fn test_compile_captures_prefix() {
        let options = CompileOptions {
            prefix: Some(':'),
            registry: None,
        };
        let bp = Blueprint::compile_with("SELECT * FROM T WHERE a = :A", &options).unwrap();
        assert_eq!(bp.prefix(), ':');
        assert!(bp.keys().index_of("A").is_some());
    }

    #[test]
    fn test_children_mirror_parents() {
        let bp = Blueprint::compile("SELECT a FROM T WHERE b = ?@B").unwrap();
        for (i, seg) in bp.segments().iter().enumerate() {
            if let Some(parent) = seg.parent {
                assert!(bp.children(parent).contains(&i));
                assert!(parent < i, "parents precede children");
            }
        }
    }
}
