//! Template compilation: segment building and the immutable blueprint.

mod blueprint;
mod builder;
mod segment;

pub use blueprint::{default_prefix, set_default_prefix, Blueprint, CompileOptions};
pub use segment::{Chunk, Placement, Projection, Segment, SegmentKind};
