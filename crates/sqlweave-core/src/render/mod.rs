//! The renderer: walks the segment tree with a state vector and emits the
//! final SQL plus the parameter-binding plan.
//!
//! Rendering is three passes over the segment list: a parents-first
//! activity pass (condition AND inherited activity), a children-first
//! emission-eligibility pass (clause suppression, empty sub-query
//! cascade), and a single emission walk applying excess cleanup.

use std::collections::HashSet;

use tracing::warn;

use crate::compile::{Blueprint, Chunk, SegmentKind};
use crate::error::RenderError;
use crate::handler::Handler;
use crate::lexer::{SectionKeyword, Span};
use crate::mapper::{BindingRole, BindingSink};
use crate::state::Slot;
use crate::value::Value;

/// Renders `blueprint` under `slots` into `buf`, feeding `sink`.
pub(crate) fn render(
    blueprint: &Blueprint,
    slots: &[Slot],
    buf: &mut String,
    sink: &mut dyn BindingSink,
) -> Result<(), RenderError> {
    let segments = blueprint.segments();
    let keys = blueprint.keys();

    // Pass 1: activity, parents first.
    let slot_active = |idx: usize| match &slots[idx] {
        Slot::Empty => false,
        Slot::Used => keys.is_reserved(idx),
        Slot::Value(v) => v.activates(),
    };
    let mut active = vec![false; segments.len()];
    for (i, seg) in segments.iter().enumerate() {
        let own = seg.condition.eval(&slot_active);
        let inherited = seg.parent.map_or(true, |p| active[p]);
        active[i] = own && inherited;
    }

    // Pass 2: emission eligibility, children first.
    let mut emits = vec![false; segments.len()];
    for i in (0..segments.len()).rev() {
        let seg = &segments[i];
        let kids = blueprint.children(i);
        emits[i] = match seg.kind {
            SegmentKind::Root => true,
            SegmentKind::Clause { .. } | SegmentKind::InsertList => {
                active[i] && kids.iter().any(|&c| emits[c])
            }
            SegmentKind::Subquery => {
                active[i] && (kids.is_empty() || kids.iter().any(|&c| emits[c]))
            }
            SegmentKind::Case | SegmentKind::Func => active[i],
            SegmentKind::Item => {
                let killed = kids.iter().any(|&c| {
                    segments[c].kind == SegmentKind::Subquery
                        && active[c]
                        && !blueprint.children(c).is_empty()
                        && !blueprint.children(c).iter().any(|&g| emits[g])
                });
                active[i]
                    && !killed
                    && (seg.has_text || kids.is_empty() || kids.iter().any(|&c| emits[c]))
            }
        };
    }

    // A dynamic projection whose clause is retained must keep a column.
    for projection in blueprint.projections() {
        if active[projection.clause]
            && !projection.column_segments.iter().any(|&s| emits[s])
        {
            return Err(RenderError::EmptyProjection);
        }
    }

    // Pass 3: emission.
    let mut emitter = Emitter {
        blueprint,
        slots,
        emits: &emits,
        buf,
        sink,
        dropped: false,
        bound: HashSet::new(),
    };
    emitter.emit_segment(0, false)?;

    // Right/left-trim the final text in place.
    let end = buf.trim_end().len();
    buf.truncate(end);
    let start = buf.len() - buf.trim_start().len();
    if start > 0 {
        buf.drain(..start);
    }
    Ok(())
}

struct Emitter<'a> {
    blueprint: &'a Blueprint,
    slots: &'a [Slot],
    emits: &'a [bool],
    buf: &'a mut String,
    sink: &'a mut dyn BindingSink,
    /// A segment was skipped since the last emitted text; enables the
    /// spacing repairs around dropped content.
    dropped: bool,
    /// Keys whose pass-through parameter binding is already recorded.
    bound: HashSet<usize>,
}

impl Emitter<'_> {
    fn emit_segment(&mut self, seg_idx: usize, strip: bool) -> Result<(), RenderError> {
        let seg = &self.blueprint.segments()[seg_idx];
        let src = self.blueprint.template();
        let last_emitting = self
            .blueprint
            .children(seg_idx)
            .iter()
            .copied()
            .filter(|&c| self.emits[c])
            .last();
        let is_case = seg.kind == SegmentKind::Case;
        let mut last_when_emitted: Option<bool> = None;

        for chunk in &seg.chunks {
            match *chunk {
                Chunk::Lit(span) => {
                    let clipped = self.clip(span, strip, seg.excess);
                    if let Some(span) = clipped {
                        self.push_text(span.text(src));
                    }
                }
                Chunk::Keyword(span) => {
                    self.push_keyword(span.text(src));
                }
                Chunk::Param { key, span } => {
                    if self.bound.insert(key) {
                        let value = match &self.slots[key] {
                            Slot::Value(v) => v.clone(),
                            _ => Value::Null,
                        };
                        self.sink
                            .bind(self.blueprint.keys().name(key), value, BindingRole::Parameter);
                    }
                    self.push_text(span.text(src));
                }
                Chunk::Handler(placement) => {
                    self.emit_handler(placement)?;
                }
                Chunk::Child(child) => {
                    if is_case {
                        self.note_case_branch(child, &mut last_when_emitted);
                    }
                    if self.emits[child] {
                        self.emit_segment(child, Some(child) == last_emitting)?;
                    } else {
                        self.dropped = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Tracks `WHEN`/`THEN` pairing inside a `CASE`. A retained `THEN`
    /// whose `WHEN` was pruned is an authoring error: it is logged and
    /// emitted verbatim, with no implicit repair.
    fn note_case_branch(&self, child: usize, last_when_emitted: &mut Option<bool>) {
        let SegmentKind::Clause { lead: Some(kw), .. } = self.blueprint.segments()[child].kind
        else {
            return;
        };
        match kw {
            SectionKeyword::When => *last_when_emitted = Some(self.emits[child]),
            SectionKeyword::Then => {
                if self.emits[child] && *last_when_emitted == Some(false) {
                    warn!("CASE keeps a THEN whose WHEN was pruned; emitting verbatim");
                }
            }
            _ => {}
        }
    }

    /// Clips a literal span against the segment's trailing excess when this
    /// segment is the last active one in its cleanup scope.
    fn clip(&mut self, span: Span, strip: bool, excess: Option<Span>) -> Option<Span> {
        if !strip {
            return Some(span);
        }
        let Some(excess) = excess else {
            return Some(span);
        };
        if span.start >= excess.start {
            self.dropped = true;
            return None;
        }
        if span.end > excess.start {
            return Some(Span::new(span.start, excess.start));
        }
        Some(span)
    }

    fn emit_handler(&mut self, placement_idx: usize) -> Result<(), RenderError> {
        let placement = &self.blueprint.placements()[placement_idx];
        let name = self.blueprint.keys().name(placement.key);
        let value = match &self.slots[placement.key] {
            Slot::Value(v) => v,
            _ => {
                if placement.optional {
                    self.dropped = true;
                    return Ok(());
                }
                return Err(RenderError::MissingHandlerValue {
                    name: String::from(name),
                });
            }
        };
        match self.blueprint.handler(placement_idx) {
            Handler::Base(h) => {
                let text = h.emit_text(name, value)?;
                self.push_text(&text);
            }
            Handler::Special(h) => {
                let text = h.emit_text(name, self.blueprint.prefix(), value)?;
                h.bind_params(name, value, self.sink)?;
                self.push_text(&text);
            }
        }
        Ok(())
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.dropped
            && text.starts_with(')')
            && self.buf.ends_with(|c: char| c.is_whitespace())
        {
            let end = self.buf.trim_end().len();
            self.buf.truncate(end);
        }
        self.buf.push_str(text);
        if !text.chars().all(char::is_whitespace) {
            self.dropped = false;
        }
    }

    /// Emits a clause keyword, restoring the single separating space when
    /// the preceding segment was dropped together with its whitespace.
    fn push_keyword(&mut self, text: &str) {
        if !self.buf.is_empty()
            && !self.buf.ends_with(|c: char| c.is_whitespace() || c == '(')
        {
            self.buf.push(' ');
        }
        self.buf.push_str(text);
        self.dropped = false;
    }
}

#[cfg(test)]
mod tests {
    use crate::compile::Blueprint;
    use crate::error::RenderError;
    use crate::mapper::BindingRole;
    use crate::value::Value;

    fn sql(template: &str, setup: impl FnOnce(&mut crate::state::Builder<'_>)) -> String {
        let bp = Blueprint::compile(template).expect("compile failure");
        let mut b = bp.builder();
        setup(&mut b);
        b.render().expect("render failure").sql
    }

    #[test]
    fn test_full_template_passthrough() {
        let out = sql("SELECT * FROM Users WHERE IsActive = 1", |_| {});
        assert_eq!(out, "SELECT * FROM Users WHERE IsActive = 1");
    }

    #[test]
    fn test_trailing_operator_stripped() {
        let out = sql("SELECT * FROM U WHERE a = 1 AND b = ?@B", |_| {});
        assert_eq!(out, "SELECT * FROM U WHERE a = 1");
    }

    #[test]
    fn test_clause_keyword_stripped() {
        let out = sql("SELECT * FROM U WHERE b = ?@B ORDER BY a", |_| {});
        assert_eq!(out, "SELECT * FROM U ORDER BY a");
    }

    #[test]
    fn test_middle_item_dropped() {
        let out = sql("UPDATE U SET a = 1, b = ?@B, c = 2 WHERE id = 3", |_| {});
        assert_eq!(out, "UPDATE U SET a = 1, c = 2 WHERE id = 3");
    }

    #[test]
    fn test_first_item_dropped() {
        let out = sql("SELECT * FROM U WHERE a = ?@A OR b = 2", |_| {});
        assert_eq!(out, "SELECT * FROM U WHERE b = 2");
    }

    #[test]
    fn test_literal_hint_passthrough() {
        let out = sql("SELECT * FROM U /*~ WITH (NOLOCK) */ WHERE a = 1", |_| {});
        assert_eq!(out, "SELECT * FROM U  WITH (NOLOCK)  WHERE a = 1");
    }

    #[test]
    fn test_marker_whitespace_collapsed() {
        let out = sql("SELECT * FROM U WHERE /*Always*/ a = 1", |b| {
            b.mark("Always").unwrap();
        });
        assert_eq!(out, "SELECT * FROM U WHERE a = 1");
    }

    #[test]
    fn test_empty_subquery_drops_host() {
        let out = sql("SELECT * FROM T WHERE CategoryID IN (?@Cats_X)", |_| {});
        assert_eq!(out, "SELECT * FROM T");
    }

    #[test]
    fn test_subquery_clause_dropped_keeps_parens_tight() {
        let out = sql(
            "SELECT * FROM T WHERE id IN (SELECT id FROM U WHERE a = ?@A)",
            |_| {},
        );
        assert_eq!(out, "SELECT * FROM T WHERE id IN (SELECT id FROM U)");
    }

    #[test]
    fn test_case_when_then_mismatch_emits_verbatim() {
        let out = sql(
            "SELECT CASE /*C*/ WHEN a = 1 THEN 'x' ELSE 'y' END FROM T",
            |_| {},
        );
        // The WHEN is pruned, the THEN stays: logged, not repaired.
        assert_eq!(out, "SELECT CASE THEN 'x' ELSE 'y' END FROM T");
    }

    #[test]
    fn test_case_conditional_branch_pair() {
        let out = sql(
            "SELECT CASE /*C*/ WHEN a = 1 /*C*/ THEN 'x' ELSE 'y' END FROM T",
            |_| {},
        );
        assert_eq!(out, "SELECT CASE ELSE 'y' END FROM T");
    }

    #[test]
    fn test_insert_list_cleanup() {
        let out = sql("INSERT INTO U (a, ?@B) VALUES (1, ?@B)", |_| {});
        assert_eq!(out, "INSERT INTO U (a) VALUES (1)");
    }

    #[test]
    fn test_insert_lists_dropped_entirely() {
        let out = sql("INSERT INTO U (?@B) VALUES (?@B)", |_| {});
        assert_eq!(out, "INSERT INTO U");
    }

    #[test]
    fn test_empty_projection_error() {
        let bp = Blueprint::compile("?SELECT a, b FROM T").unwrap();
        let err = bp.builder().render().unwrap_err();
        assert!(matches!(err, RenderError::EmptyProjection));
    }

    #[test]
    fn test_missing_handler_value() {
        let bp = Blueprint::compile("SELECT * FROM T OFFSET @Skip_N ROWS").unwrap();
        let err = bp.builder().render().unwrap_err();
        assert!(matches!(
            err,
            RenderError::MissingHandlerValue { name } if name == "Skip"
        ));
    }

    #[test]
    fn test_param_bindings_deduped_and_ordered() {
        let bp =
            Blueprint::compile("SELECT * FROM T WHERE a = @A AND b = @B AND c = @A").unwrap();
        let mut b = bp.builder();
        b.bind("B", 2_i64).unwrap();
        let out = b.render().unwrap();
        let names: Vec<_> = out.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(out.bindings[0].value, Value::Null);
        assert_eq!(out.bindings[1].value, Value::Int(2));
        assert!(out
            .bindings
            .iter()
            .all(|b| b.role == BindingRole::Parameter));
    }

    #[test]
    fn test_render_is_idempotent() {
        let bp = Blueprint::compile("SELECT * FROM U WHERE a = ?@A AND b = 1").unwrap();
        let mut b = bp.builder();
        b.bind("A", 5_i64).unwrap();
        let first = b.render().unwrap();
        let second = b.render().unwrap();
        assert_eq!(first, second);
    }
}
