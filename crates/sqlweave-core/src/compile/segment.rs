//! Segment records: the structural blueprint of a template.

use crate::condition::CondExpr;
use crate::handler::HandlerKind;
use crate::lexer::{SectionKeyword, Span};

/// What a segment is, structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SegmentKind {
    /// The whole template.
    Root,
    /// A clause: an optional lead keyword plus items. `lead` is `None` for
    /// the implicit clause before the first keyword; `dynamic` marks a
    /// `?SELECT` projection.
    Clause {
        lead: Option<SectionKeyword>,
        dynamic: bool,
    },
    /// One item between operator/keyword anchors.
    Item,
    /// A parenthesised sub-query; footprints inside never escape it.
    Subquery,
    /// A functional (expression/argument) paren group; optional-variable
    /// conditions grow through it.
    Func,
    /// A first-level INSERT column or VALUES list; never growth-eligible,
    /// parens stripped with the list.
    InsertList,
    /// An inline `CASE … END` expression.
    Case,
}

/// One element of a segment's emission plan. Chunks cover the segment's
/// range except for condition markers and forced boundaries, which never
/// emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Chunk {
    /// Raw template text.
    Lit(Span),
    /// A clause keyword (or `CASE`/`END`): emitted with spacing repair when
    /// the preceding segment was dropped.
    Keyword(Span),
    /// A plain variable occurrence: emits the template text and records a
    /// pass-through parameter binding.
    Param { key: usize, span: Span },
    /// A handler placement, by index into the placement table.
    Handler(usize),
    /// A child segment, by index into the segment list.
    Child(usize),
}

/// A handled variable's placement inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Placement {
    /// Key index of the variable.
    pub key: usize,
    /// Handler letter (upper case).
    pub letter: char,
    /// Base or special.
    pub kind: HandlerKind,
    /// Whether the variable was written optional (`?@Name_L`).
    pub optional: bool,
    /// The variable's span in the template.
    pub span: Span,
}

/// A compiled segment: a half-open range of the template plus retention
/// metadata. Segments form a tree partitioning the template; the list is
/// ordered parents first.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    /// Structural kind.
    pub kind: SegmentKind,
    /// Covered range, swallowed trailing operator included.
    pub range: Span,
    /// Trailing excess: the whitespace-plus-operator tail to strip when
    /// this segment is the last active one in its cleanup scope.
    pub excess: Option<Span>,
    /// Retention condition; empty is always retained.
    pub condition: CondExpr,
    /// Parent segment index (`None` for the root).
    pub parent: Option<usize>,
    /// Emission plan.
    pub chunks: Vec<Chunk>,
    /// Whether the segment owns any non-whitespace text of its own. An item
    /// whose only content is a suppressed child list emits nothing, which
    /// lets the enclosing clause keyword be stripped with it.
    pub has_text: bool,
}

/// A dynamic projection: the column segments of one `?SELECT` and their key
/// grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Projection {
    /// Segment index of the dynamic clause.
    pub clause: usize,
    /// Column key indices, in template order.
    pub columns: Vec<usize>,
    /// Segment indices of the column items.
    pub column_segments: Vec<usize>,
    /// Key groups joined with `&,` (OR semantics).
    pub joined_or_groups: Vec<Vec<usize>>,
}
