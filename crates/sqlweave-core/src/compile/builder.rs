//! The segment builder: fragments the token stream into a segment tree.
//!
//! The builder walks the tokens left to right with a stack of contexts
//! (statement level, clause, sub-query paren, functional paren, INSERT list,
//! CASE branch) and produces segments whose endpoints are anchor positions:
//! a segment swallows a trailing logical operator or separator, and ends
//! exclusively before a section keyword or a closing paren.

use crate::condition::{compile_marker, CondExpr, CondGroup};
use crate::error::CompileError;
use crate::handler::{Handler, HandlerKind, HandlerRegistry};
use crate::keys::{KeyRegistry, KeyRole, KeyTable};
use crate::lexer::{ContextOp, Lexer, LogicalOp, SectionKeyword, Span, Token, TokenKind};

use super::segment::{Chunk, Placement, Projection, Segment, SegmentKind};

/// Everything the segment builder produces for a template.
#[derive(Debug)]
pub(crate) struct CompiledTemplate {
    pub registry: KeyRegistry,
    pub segments: Vec<Segment>,
    pub placements: Vec<Placement>,
    pub handlers: Vec<Handler>,
    pub projections: Vec<Projection>,
}

/// Compiles `src` into segments, keys, placements and projections.
pub(crate) fn build(
    src: &str,
    prefix: char,
    registry: &HandlerRegistry,
) -> Result<CompiledTemplate, CompileError> {
    let tokens = Lexer::new(src, prefix).tokenize()?;
    let mut compiler = Compiler {
        src,
        tokens,
        pos: 0,
        prefix,
        registry,
        keys: KeyTable::new(),
        segments: Vec::new(),
        placements: Vec::new(),
        handlers: Vec::new(),
        projections: Vec::new(),
    };

    let root = compiler.new_segment(SegmentKind::Root, None);
    compiler.segments[root].range = Span::new(0, src.len());
    compiler.parse_statement_scope(root, false)?;

    if let TokenKind::ParenClose = compiler.cur().kind {
        return Err(CompileError::Syntax {
            message: String::from("unbalanced ')'"),
            offset: compiler.cur().span.start,
        });
    }

    compiler.check_static_select_lists()?;
    compiler.finish()
}

/// How an item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemEnd {
    /// Swallowed a logical operator or separator.
    Op,
    /// Hit a forced boundary `???`.
    Boundary,
    /// Stopped before a section keyword.
    Keyword,
    /// Stopped before a closing paren or end of input.
    ScopeEnd,
}

/// Context flags for item parsing.
#[derive(Debug, Clone, Copy, Default)]
struct ItemCtx {
    /// Inside a functional paren: `?@` conditions hoist outward.
    in_func: bool,
    /// Inside paren content: section keywords are plain text.
    paren_content: bool,
    /// Directly inside an INSERT `INTO`/`VALUES` clause: first-level parens
    /// are column/values lists.
    insert_ctx: bool,
    /// Inside a dynamic projection: items become keyed column segments.
    dynamic: bool,
}

/// Result of parsing one item.
#[derive(Default)]
struct ItemOutcome {
    seg: Option<usize>,
    ended: Option<ItemEnd>,
    /// Condition groups from markers immediately preceding a section
    /// keyword: they promote the following clause instead of this item.
    pending: Vec<CondGroup>,
    /// `?@` condition groups escaping through functional parens.
    hoist: Vec<CondGroup>,
    /// Last bare identifier seen, for dynamic column keys.
    last_ident: Option<String>,
    /// Column keys accumulated through `&,` joins.
    or_keys: Vec<usize>,
    /// A `???` occurred inside this item (blocks functional-paren growth).
    boundary_inside: bool,
}

impl ItemOutcome {
    fn ended(&self) -> ItemEnd {
        self.ended.unwrap_or(ItemEnd::ScopeEnd)
    }
}

struct Compiler<'t, 'r> {
    src: &'t str,
    tokens: Vec<Token>,
    pos: usize,
    prefix: char,
    registry: &'r HandlerRegistry,
    keys: KeyTable,
    segments: Vec<Segment>,
    placements: Vec<Placement>,
    handlers: Vec<Handler>,
    projections: Vec<Projection>,
}

impl<'t, 'r> Compiler<'t, 'r> {
    fn cur(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if !tok.is_eof() {
            self.pos += 1;
        }
        tok
    }

    /// Index of the next non-whitespace token at or after `from`.
    fn meaningful_at(&self, from: usize) -> usize {
        let mut i = from;
        while matches!(self.tokens[i].kind, TokenKind::Whitespace) {
            i += 1;
        }
        i
    }

    fn new_segment(&mut self, kind: SegmentKind, parent: Option<usize>) -> usize {
        let idx = self.segments.len();
        self.segments.push(Segment {
            kind,
            range: Span::default(),
            excess: None,
            condition: CondExpr::default(),
            parent,
            chunks: Vec::new(),
            has_text: false,
        });
        idx
    }

    fn push_lit(&mut self, seg: usize, span: Span) {
        if span.is_empty() {
            return;
        }
        if !span.text(self.src).chars().all(char::is_whitespace) {
            self.segments[seg].has_text = true;
        }
        self.segments[seg].chunks.push(Chunk::Lit(span));
    }

    fn span_is_ws(&self, span: Span) -> bool {
        span.text(self.src).chars().all(char::is_whitespace)
    }

    // ------------------------------------------------------------------
    // Statement level
    // ------------------------------------------------------------------

    /// Parses a sequence of clauses until end of input (root) or the
    /// closing paren of a sub-query (left unconsumed).
    fn parse_statement_scope(&mut self, parent: usize, in_subquery: bool) -> Result<(), CompileError> {
        let mut pending: Vec<CondGroup> = Vec::new();
        let mut insert_stmt = false;

        loop {
            let la = self.meaningful_at(self.pos);
            match &self.tokens[la].kind {
                TokenKind::Eof => {
                    self.own_trailing_ws(parent, &mut pending)?;
                    return Ok(());
                }
                TokenKind::ParenClose if in_subquery => {
                    self.own_trailing_ws(parent, &mut pending)?;
                    return Ok(());
                }
                TokenKind::ParenClose => {
                    return Err(CompileError::Syntax {
                        message: String::from("unbalanced ')'"),
                        offset: self.tokens[la].span.start,
                    });
                }
                TokenKind::Section(kw) if *kw != SectionKeyword::Case => {
                    let kw = *kw;
                    let pre_ws = self.consume_ws();
                    let lead_tok = self.bump();
                    match kw {
                        SectionKeyword::Insert => insert_stmt = true,
                        kw if kw.is_set_operator() => insert_stmt = false,
                        SectionKeyword::Select
                        | SectionKeyword::Update
                        | SectionKeyword::Delete
                        | SectionKeyword::With => insert_stmt = false,
                        _ => {}
                    }
                    let insert_ctx = insert_stmt
                        && matches!(kw, SectionKeyword::Into | SectionKeyword::Values);
                    let out = self.parse_clause(
                        parent,
                        Some((kw, lead_tok.span)),
                        false,
                        pre_ws,
                        std::mem::take(&mut pending),
                        insert_ctx,
                    )?;
                    pending = out;
                }
                TokenKind::DynamicSelect => {
                    let pre_ws = self.consume_ws();
                    let lead_tok = self.bump();
                    insert_stmt = false;
                    let lead_span = Span::new(lead_tok.span.start + 1, lead_tok.span.end);
                    let out = self.parse_clause(
                        parent,
                        Some((SectionKeyword::Select, lead_span)),
                        true,
                        pre_ws,
                        std::mem::take(&mut pending),
                        false,
                    )?;
                    pending = out;
                }
                _ => {
                    let out = self.parse_clause(
                        parent,
                        None,
                        false,
                        Vec::new(),
                        std::mem::take(&mut pending),
                        false,
                    )?;
                    pending = out;
                }
            }
        }
    }

    /// Consumes a run of whitespace tokens, returning their spans.
    fn consume_ws(&mut self) -> Vec<Span> {
        let mut spans = Vec::new();
        while matches!(self.cur().kind, TokenKind::Whitespace) {
            spans.push(self.bump().span);
        }
        spans
    }

    /// Owns whitespace left before a scope end by wrapping it in an
    /// implicit clause.
    fn own_trailing_ws(
        &mut self,
        parent: usize,
        pending: &mut Vec<CondGroup>,
    ) -> Result<(), CompileError> {
        if matches!(self.cur().kind, TokenKind::Whitespace) {
            self.parse_clause(parent, None, false, Vec::new(), std::mem::take(pending), false)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clauses
    // ------------------------------------------------------------------

    /// Parses one clause: optional lead keyword plus items. Returns the
    /// condition groups of markers that promote the *next* clause.
    fn parse_clause(
        &mut self,
        parent: usize,
        lead: Option<(SectionKeyword, Span)>,
        dynamic: bool,
        pre_ws: Vec<Span>,
        pending: Vec<CondGroup>,
        insert_ctx: bool,
    ) -> Result<Vec<CondGroup>, CompileError> {
        let start = pre_ws
            .first()
            .map(|s| s.start)
            .or_else(|| lead.map(|(_, s)| s.start))
            .unwrap_or_else(|| self.cur().span.start);

        let clause = self.new_segment(
            SegmentKind::Clause {
                lead: lead.map(|(kw, _)| kw),
                dynamic,
            },
            Some(parent),
        );
        self.segments[clause].condition = CondExpr { groups: pending };
        self.segments[parent].chunks.push(Chunk::Child(clause));
        for ws in pre_ws {
            self.segments[clause].chunks.push(Chunk::Lit(ws));
        }
        if let Some((_, span)) = lead {
            self.segments[clause].chunks.push(Chunk::Keyword(span));
            self.segments[clause].has_text = true;
        }

        let projection = dynamic.then(|| {
            self.projections.push(Projection {
                clause,
                columns: Vec::new(),
                column_segments: Vec::new(),
                joined_or_groups: Vec::new(),
            });
            self.projections.len() - 1
        });

        let ctx = ItemCtx {
            insert_ctx,
            dynamic,
            ..ItemCtx::default()
        };
        let mut pending_out = Vec::new();

        loop {
            match &self.cur().kind {
                TokenKind::Eof | TokenKind::ParenClose | TokenKind::DynamicSelect => break,
                TokenKind::Section(kw) if *kw != SectionKeyword::Case => break,
                _ => {}
            }
            let out = self.parse_item(clause, ctx)?;
            if let Some(pi) = projection {
                self.assign_column_key(pi, &out);
            }
            let ended = out.ended();
            if !out.pending.is_empty() {
                pending_out = out.pending;
            }
            match ended {
                ItemEnd::Op => {}
                ItemEnd::Boundary => self.skip_boundary_ws(),
                ItemEnd::Keyword | ItemEnd::ScopeEnd => break,
            }
        }

        self.segments[clause].range = Span::new(start, self.cur().span.start);
        Ok(pending_out)
    }

    /// After a `???` ends an item, the separating whitespace run is not
    /// owned by either side; drop it so the join is seamless.
    fn skip_boundary_ws(&mut self) {
        if matches!(self.cur().kind, TokenKind::Whitespace) {
            self.pos += 1;
        }
    }

    /// Registers the automatic column key of a dynamic-projection item.
    fn assign_column_key(&mut self, projection: usize, out: &ItemOutcome) {
        let Some(seg) = out.seg else { return };
        if out.ended() == ItemEnd::Boundary {
            // Items closed by `???` are modifier segments (DISTINCT, …).
            return;
        }
        let mut keys = out.or_keys.clone();
        if let Some(name) = &out.last_ident {
            keys.push(self.keys.register(name, KeyRole::Select));
        }
        if keys.is_empty() {
            return;
        }
        let mut group = CondGroup::single(keys[0]);
        for &k in &keys[1..] {
            group.push_or(k);
        }
        self.segments[seg].condition.push_group(group);
        let proj = &mut self.projections[projection];
        proj.columns.extend(keys.iter().copied());
        proj.column_segments.push(seg);
        if keys.len() > 1 {
            proj.joined_or_groups.push(keys);
        }
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    /// Parses one item of a clause, functional paren or list scope.
    #[allow(clippy::too_many_lines)]
    fn parse_item(&mut self, parent: usize, ctx: ItemCtx) -> Result<ItemOutcome, CompileError> {
        let item = self.new_segment(SegmentKind::Item, Some(parent));
        self.segments[parent].chunks.push(Chunk::Child(item));

        let item_start = self.cur().span.start;
        let mut content_end = item_start;
        let mut end_pos = item_start;
        let mut out = ItemOutcome {
            seg: Some(item),
            ..ItemOutcome::default()
        };

        loop {
            let kind = self.cur().kind.clone();
            let span = self.cur().span;
            match kind {
                TokenKind::Eof | TokenKind::ParenClose => {
                    out.ended = Some(ItemEnd::ScopeEnd);
                    end_pos = span.start;
                    break;
                }
                TokenKind::Section(SectionKeyword::Case) => {
                    let case = self.parse_case(item)?;
                    content_end = self.segments[case].range.end;
                    end_pos = content_end;
                }
                TokenKind::Section(_) | TokenKind::DynamicSelect if !ctx.paren_content => {
                    out.ended = Some(ItemEnd::Keyword);
                    end_pos = span.start;
                    break;
                }
                TokenKind::Section(_) | TokenKind::DynamicSelect => {
                    // Inside paren content keywords are plain text
                    // (`SUBSTRING(x FROM 1)`).
                    self.push_lit(item, span);
                    content_end = span.end;
                    end_pos = span.end;
                    self.bump();
                }
                TokenKind::Whitespace => {
                    self.push_lit(item, span);
                    end_pos = span.end;
                    self.bump();
                }
                TokenKind::Text => {
                    self.push_lit(item, span);
                    if let Some(ident) = self.ident_of(span) {
                        out.last_ident = Some(ident);
                    }
                    content_end = span.end;
                    end_pos = span.end;
                    self.bump();
                }
                TokenKind::StringLit | TokenKind::Relational | TokenKind::Word(_) => {
                    self.push_lit(item, span);
                    content_end = span.end;
                    end_pos = span.end;
                    self.bump();
                }
                TokenKind::Logical(LogicalOp::Not) => {
                    self.push_lit(item, span);
                    content_end = span.end;
                    end_pos = span.end;
                    self.bump();
                }
                TokenKind::Logical(LogicalOp::And | LogicalOp::Or) | TokenKind::Separator => {
                    if content_end > item_start {
                        self.segments[item].excess = Some(Span::new(content_end, span.end));
                        self.push_lit(item, span);
                        end_pos = span.end;
                        self.bump();
                        out.ended = Some(ItemEnd::Op);
                        break;
                    }
                    // A leading operator with no content yet stays text.
                    self.push_lit(item, span);
                    content_end = span.end;
                    end_pos = span.end;
                    self.bump();
                }
                TokenKind::ContextJoin(op) => {
                    if op == ContextOp::Comma {
                        if ctx.dynamic {
                            if let Some(name) = out.last_ident.take() {
                                out.or_keys.push(self.keys.register(&name, KeyRole::Select));
                            }
                        }
                        // A comma never follows a space; drop the blank
                        // written before the `&,`.
                        if matches!(
                            self.segments[item].chunks.last(),
                            Some(Chunk::Lit(s)) if self.span_is_ws(*s)
                        ) {
                            self.segments[item].chunks.pop();
                        }
                    }
                    // Emit the operator without the `&`.
                    self.push_lit(item, Span::new(span.start + 1, span.end));
                    content_end = span.end;
                    end_pos = span.end;
                    self.bump();
                }
                TokenKind::ForcedBoundary => {
                    self.bump();
                    out.ended = Some(ItemEnd::Boundary);
                    out.boundary_inside = true;
                    end_pos = span.start;
                    break;
                }
                TokenKind::Marker { body } => {
                    self.bump();
                    let group = compile_marker(
                        body.text(self.src),
                        body.start,
                        self.prefix,
                        &mut self.keys,
                    )?;
                    if self.marker_promotes(ctx) {
                        out.pending.push(group);
                    } else {
                        self.segments[item].condition.push_group(group);
                    }
                    self.collapse_marker_ws(item);
                    end_pos = span.end;
                }
                TokenKind::LiteralText { inner } => {
                    self.push_lit(item, inner);
                    content_end = span.end;
                    end_pos = span.end;
                    self.bump();
                }
                TokenKind::Variable {
                    name,
                    optional,
                    handler,
                } => {
                    self.bump();
                    self.handle_variable(item, &name, optional, handler, span, ctx, &mut out)?;
                    content_end = span.end;
                    end_pos = span.end;
                }
                TokenKind::ParenOpen => {
                    let child = if ctx.insert_ctx {
                        self.parse_insert_list(item)?
                    } else if self.paren_is_subquery() {
                        self.parse_subquery(item)?
                    } else {
                        let (func, hoist) = self.parse_func(item)?;
                        if ctx.in_func {
                            out.hoist.extend(hoist);
                        } else {
                            for group in hoist {
                                self.segments[item].condition.push_group(group);
                            }
                        }
                        func
                    };
                    content_end = self.segments[child].range.end;
                    end_pos = content_end;
                }
            }
        }

        self.segments[item].range = Span::new(item_start, end_pos);

        // Drop an item that never materialised (immediate terminator).
        let seg = &self.segments[item];
        if seg.chunks.is_empty() && seg.condition.is_empty() && seg.range.is_empty() {
            debug_assert_eq!(item, self.segments.len() - 1);
            self.segments.pop();
            if let Some(Chunk::Child(last)) = self.segments[parent].chunks.last().copied() {
                if last == item {
                    self.segments[parent].chunks.pop();
                }
            }
            out.seg = None;
        }
        Ok(out)
    }

    /// Extracts an identifier from a text token, unwrapping quoted names.
    fn ident_of(&self, span: Span) -> Option<String> {
        let text = span.text(self.src);
        let first = text.chars().next()?;
        if first.is_alphabetic() || first == '_' {
            return Some(String::from(text));
        }
        if (first == '"' || first == '`') && text.len() >= 2 {
            return Some(String::from(&text[1..text.len() - 1]));
        }
        None
    }

    /// True when the marker just consumed sits immediately before a section
    /// keyword it should promote (clause-conditional segment). Whitespace
    /// and further markers may sit between the two.
    fn marker_promotes(&self, ctx: ItemCtx) -> bool {
        if ctx.paren_content {
            return false;
        }
        let mut la = self.pos;
        loop {
            match &self.tokens[la].kind {
                TokenKind::Whitespace | TokenKind::Marker { .. } => la += 1,
                TokenKind::Section(kw) => {
                    return !matches!(*kw, SectionKeyword::Case | SectionKeyword::End)
                }
                TokenKind::DynamicSelect => return true,
                _ => return false,
            }
        }
    }

    /// Collapses the duplicate whitespace a removed marker leaves behind:
    /// the run following the marker when both sides are blank, or the run
    /// preceding it when the marker sits against a closing delimiter.
    fn collapse_marker_ws(&mut self, item: usize) {
        let last_is_ws = matches!(
            self.segments[item].chunks.last(),
            Some(Chunk::Lit(s)) if self.span_is_ws(*s)
        );
        if !last_is_ws {
            return;
        }
        match self.cur().kind {
            TokenKind::Whitespace => {
                self.pos += 1;
            }
            TokenKind::ParenClose | TokenKind::Separator | TokenKind::Eof => {
                self.segments[item].chunks.pop();
            }
            _ => {}
        }
    }

    /// Registers a variable occurrence: key role, optional condition,
    /// handler placement or pass-through parameter chunk.
    fn handle_variable(
        &mut self,
        item: usize,
        name: &str,
        optional: bool,
        handler: Option<char>,
        span: Span,
        ctx: ItemCtx,
        out: &mut ItemOutcome,
    ) -> Result<(), CompileError> {
        let key = match handler {
            Some(letter) => {
                let resolved =
                    self.registry
                        .resolve(letter)
                        .ok_or_else(|| CompileError::UnknownHandler {
                            letter,
                            name: String::from(name),
                            offset: span.start,
                        })?;
                let role = match resolved.kind() {
                    HandlerKind::Special => KeyRole::Special,
                    HandlerKind::Base => KeyRole::Base,
                };
                let key = self.keys.register(name, role);
                let placement = self.placements.len();
                self.placements.push(Placement {
                    key,
                    letter,
                    kind: resolved.kind(),
                    optional,
                    span,
                });
                self.handlers.push(resolved);
                self.segments[item].chunks.push(Chunk::Handler(placement));
                self.segments[item].has_text = true;
                key
            }
            None => {
                let key = self.keys.register(name, KeyRole::Variable);
                let text = if optional {
                    Span::new(span.start + 1, span.end)
                } else {
                    span
                };
                self.segments[item].chunks.push(Chunk::Param { key, span: text });
                self.segments[item].has_text = true;
                key
            }
        };
        out.last_ident = Some(String::from(name));

        if optional {
            let group = CondGroup::single(key);
            if ctx.in_func {
                out.hoist.push(group);
            } else {
                self.segments[item].condition.push_group(group);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Parenthesised scopes
    // ------------------------------------------------------------------

    /// Classifies the paren at the cursor: sub-query when preceded by `IN`,
    /// `EXISTS`, `ANY`, `ALL`, a relational operator or a sub-query
    /// introducing keyword, or when the first token inside is a `SELECT`.
    fn paren_is_subquery(&self) -> bool {
        let mut i = self.pos;
        while i > 0 {
            i -= 1;
            match &self.tokens[i].kind {
                TokenKind::Whitespace
                | TokenKind::Marker { .. }
                | TokenKind::LiteralText { .. } => continue,
                TokenKind::Word(w) => {
                    use crate::lexer::Word;
                    return matches!(*w, Word::In | Word::Exists | Word::Any | Word::All)
                        || self.first_inside_is_select();
                }
                TokenKind::Relational => return true,
                TokenKind::Section(kw) => {
                    return kw.introduces_subquery() || self.first_inside_is_select()
                }
                _ => return self.first_inside_is_select(),
            }
        }
        self.first_inside_is_select()
    }

    fn first_inside_is_select(&self) -> bool {
        let la = self.meaningful_at(self.pos + 1);
        matches!(
            self.tokens[la].kind,
            TokenKind::Section(SectionKeyword::Select) | TokenKind::DynamicSelect
        )
    }

    /// Parses `( … )` as a sub-query: a nested statement scope whose
    /// footprints never escape the parens.
    fn parse_subquery(&mut self, parent: usize) -> Result<usize, CompileError> {
        let open = self.bump();
        let sub = self.new_segment(SegmentKind::Subquery, Some(parent));
        self.segments[parent].chunks.push(Chunk::Child(sub));
        self.push_lit(sub, open.span);

        self.parse_statement_scope(sub, true)?;

        if !matches!(self.cur().kind, TokenKind::ParenClose) {
            return Err(CompileError::Syntax {
                message: String::from("unbalanced '('"),
                offset: open.span.start,
            });
        }
        let close = self.bump();
        self.push_lit(sub, close.span);
        self.segments[sub].range = Span::new(open.span.start, close.span.end);
        Ok(sub)
    }

    /// Parses `( … )` as a functional group. Returns the hoisted `?@`
    /// condition groups, unless a forced boundary blocked growth, in which
    /// case the groups bind to the items they came from.
    fn parse_func(&mut self, parent: usize) -> Result<(usize, Vec<CondGroup>), CompileError> {
        let open = self.bump();
        let func = self.new_segment(SegmentKind::Func, Some(parent));
        self.segments[parent].chunks.push(Chunk::Child(func));
        self.push_lit(func, open.span);

        let ctx = ItemCtx {
            in_func: true,
            paren_content: true,
            ..ItemCtx::default()
        };
        let mut collected: Vec<(Option<usize>, Vec<CondGroup>)> = Vec::new();
        let mut blocked = false;

        loop {
            match self.cur().kind {
                TokenKind::ParenClose => break,
                TokenKind::Eof => {
                    return Err(CompileError::Syntax {
                        message: String::from("unbalanced '('"),
                        offset: open.span.start,
                    });
                }
                _ => {}
            }
            let out = self.parse_item(func, ctx)?;
            blocked |= out.boundary_inside;
            let ended = out.ended();
            collected.push((out.seg, out.hoist));
            if ended == ItemEnd::Boundary {
                self.skip_boundary_ws();
            }
        }

        let close = self.bump();
        self.push_lit(func, close.span);
        self.segments[func].range = Span::new(open.span.start, close.span.end);

        let mut hoist = Vec::new();
        for (seg, groups) in collected {
            if blocked {
                if let Some(seg) = seg {
                    for group in groups {
                        self.segments[seg].condition.push_group(group);
                    }
                }
            } else {
                hoist.extend(groups);
            }
        }
        Ok((func, hoist))
    }

    /// Parses a first-level INSERT column or VALUES list: items separated
    /// by commas, no growth, parens stripped with the list.
    fn parse_insert_list(&mut self, parent: usize) -> Result<usize, CompileError> {
        let open = self.bump();
        let list = self.new_segment(SegmentKind::InsertList, Some(parent));
        self.segments[parent].chunks.push(Chunk::Child(list));
        self.segments[list].chunks.push(Chunk::Lit(open.span));

        let ctx = ItemCtx {
            paren_content: true,
            ..ItemCtx::default()
        };
        loop {
            match self.cur().kind {
                TokenKind::ParenClose => break,
                TokenKind::Eof => {
                    return Err(CompileError::Syntax {
                        message: String::from("unbalanced '('"),
                        offset: open.span.start,
                    });
                }
                _ => {}
            }
            let out = self.parse_item(list, ctx)?;
            if out.ended() == ItemEnd::Boundary {
                self.skip_boundary_ws();
            }
        }

        let close = self.bump();
        self.segments[list].chunks.push(Chunk::Lit(close.span));
        self.segments[list].range = Span::new(open.span.start, close.span.end);
        Ok(list)
    }

    /// Parses an inline `CASE … END` expression: `WHEN`/`THEN`/`ELSE` head
    /// independent mini-clauses, with no automatic pairing.
    fn parse_case(&mut self, parent: usize) -> Result<usize, CompileError> {
        let case_tok = self.bump();
        let case = self.new_segment(SegmentKind::Case, Some(parent));
        self.segments[parent].chunks.push(Chunk::Child(case));
        self.segments[case].chunks.push(Chunk::Keyword(case_tok.span));
        self.segments[case].has_text = true;

        let mut pending: Vec<CondGroup> = Vec::new();
        loop {
            let la = self.meaningful_at(self.pos);
            match &self.tokens[la].kind {
                TokenKind::Eof | TokenKind::ParenClose => {
                    return Err(CompileError::Syntax {
                        message: String::from("CASE without matching END"),
                        offset: case_tok.span.start,
                    });
                }
                TokenKind::Section(SectionKeyword::End) => {
                    for ws in self.consume_ws() {
                        self.segments[case].chunks.push(Chunk::Lit(ws));
                    }
                    let end_tok = self.bump();
                    self.segments[case].chunks.push(Chunk::Keyword(end_tok.span));
                    self.segments[case].range =
                        Span::new(case_tok.span.start, end_tok.span.end);
                    return Ok(case);
                }
                TokenKind::Section(kw) if *kw != SectionKeyword::Case => {
                    let kw = *kw;
                    let pre_ws = self.consume_ws();
                    let lead_tok = self.bump();
                    let out = self.parse_clause(
                        case,
                        Some((kw, lead_tok.span)),
                        false,
                        pre_ws,
                        std::mem::take(&mut pending),
                        false,
                    )?;
                    pending = out;
                }
                TokenKind::DynamicSelect => {
                    let pre_ws = self.consume_ws();
                    let lead_tok = self.bump();
                    let lead_span = Span::new(lead_tok.span.start + 1, lead_tok.span.end);
                    let out = self.parse_clause(
                        case,
                        Some((SectionKeyword::Select, lead_span)),
                        true,
                        pre_ws,
                        std::mem::take(&mut pending),
                        false,
                    )?;
                    pending = out;
                }
                _ => {
                    let out = self.parse_clause(
                        case,
                        None,
                        false,
                        Vec::new(),
                        std::mem::take(&mut pending),
                        false,
                    )?;
                    pending = out;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Validation and freezing
    // ------------------------------------------------------------------

    /// A static SELECT list must keep at least one column unconditionally.
    fn check_static_select_lists(&self) -> Result<(), CompileError> {
        for (i, seg) in self.segments.iter().enumerate() {
            let SegmentKind::Clause {
                lead: Some(SectionKeyword::Select),
                dynamic: false,
            } = seg.kind
            else {
                continue;
            };
            let items: Vec<_> = self
                .segments
                .iter()
                .enumerate()
                .filter(|(_, s)| s.parent == Some(i) && s.kind == SegmentKind::Item)
                .collect();
            if !items.is_empty() && items.iter().all(|(_, s)| !s.condition.is_empty()) {
                return Err(CompileError::Syntax {
                    message: String::from("SELECT list cannot be entirely conditional"),
                    offset: seg.range.start,
                });
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<CompiledTemplate, CompileError> {
        let Compiler {
            keys,
            mut segments,
            mut placements,
            handlers,
            mut projections,
            ..
        } = self;

        let (registry, remap) = keys.freeze()?;

        for seg in &mut segments {
            seg.condition.remap(&remap);
            for chunk in &mut seg.chunks {
                if let Chunk::Param { key, .. } = chunk {
                    *key = remap[*key];
                }
            }
        }
        for placement in &mut placements {
            placement.key = remap[placement.key];
        }
        for proj in &mut projections {
            for key in &mut proj.columns {
                *key = remap[*key];
            }
            for group in &mut proj.joined_or_groups {
                for key in group {
                    *key = remap[*key];
                }
            }
        }

        Ok(CompiledTemplate {
            registry,
            segments,
            placements,
            handlers,
            projections,
        })
    }
}
