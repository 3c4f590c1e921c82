//! Length-bounded insertion.
//!
//! Every text insertion funnels through [`insert_text_intercepted`]: with no
//! maximum configured it passes straight to the structural insert, otherwise
//! it computes the remaining capacity, truncates to fit, and emits
//! `max-length-reached` when anything was cut (or nothing fit at all).
//!
//! IME composition cannot be intercepted this way: the host commits the
//! composed string into the tree before the end-of-composition event fires.
//! The correction path ([`snapshot_composition`] at composition start,
//! [`correct_after_composition`] at composition end) therefore rolls the
//! edited node back to its pre-composition state and re-inserts only the
//! slice that fits.

use core_config::Options;
use core_dom::{Document, EmojiCatalog, NodeId};
use core_events::{Emitter, EngineEvent};
use core_position::current_range;
use tracing::{debug, trace};
use unicode_segmentation::UnicodeSegmentation;

/// Document length under the configured counting rule.
pub fn current_length(doc: &Document, opts: &Options) -> usize {
    doc.char_len(opts.is_line_break_count)
}

fn count_graphemes(s: &str) -> usize {
    s.graphemes(true).count()
}

fn count_without_breaks(s: &str) -> usize {
    s.graphemes(true).filter(|g| *g != "\n").count()
}

/// First `n` grapheme clusters of `s` (the original string, breaks
/// included; the counting rule only affects the truncation decision).
pub fn slice_graphemes(s: &str, n: usize) -> &str {
    let end = core_position::grapheme_byte_offset(s, n);
    &s[..end]
}

/// Structural insert with the one permitted retry: an invalid position is
/// amended to the last line's trailing content and the insert re-runs once.
pub fn insert_with_amend(
    doc: &mut Document,
    emoji: &EmojiCatalog,
    content: &str,
    show_cursor: bool,
) -> bool {
    let range = match current_range(doc) {
        Some(range) => range,
        None => {
            if !core_position::amend_position(doc) {
                return false;
            }
            match current_range(doc) {
                Some(range) => range,
                None => return false,
            }
        }
    };
    if core_edit::insert_text(doc, emoji, content, &range, show_cursor) {
        return true;
    }
    trace!(target: "limit", "insert position invalid; amending and retrying once");
    if !core_position::amend_position(doc) {
        return false;
    }
    match current_range(doc) {
        Some(range) => core_edit::insert_text(doc, emoji, content, &range, show_cursor),
        None => false,
    }
}

/// Length-guarded text insertion. Returns `true` when anything was
/// inserted; a full document fails fast with the `max-length-reached`
/// notification and no mutation.
pub fn insert_text_intercepted(
    doc: &mut Document,
    emoji: &EmojiCatalog,
    opts: &Options,
    emitter: &mut Emitter,
    content: &str,
    show_cursor: bool,
) -> bool {
    if content.is_empty() {
        return false;
    }
    let Some(max) = opts.max_length else {
        return insert_with_amend(doc, emoji, content, show_cursor);
    };
    let used = current_length(doc, opts);
    let remaining = max.saturating_sub(used);
    if remaining == 0 {
        debug!(target: "limit", max, used, "insert rejected at capacity");
        emitter.emit(&EngineEvent::MaxLengthReached { limit: max });
        return false;
    }
    let counted = if opts.is_line_break_count {
        count_graphemes(content)
    } else {
        count_without_breaks(content)
    };
    if counted <= remaining {
        return insert_with_amend(doc, emoji, content, show_cursor);
    }
    let slice = slice_graphemes(content, remaining);
    debug!(target: "limit", max, wanted = counted, kept = remaining, "insert truncated");
    let inserted = !slice.is_empty() && insert_with_amend(doc, emoji, slice, show_cursor);
    emitter.emit(&EngineEvent::MaxLengthReached { limit: max });
    inserted
}

/// Where the cursor sat when composition started, with enough state to roll
/// the host's over-length commit back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionAnchor {
    /// Composing inside (or at the edge of) an existing text run; the
    /// pre-composition buffer is retained verbatim.
    TextRun {
        node: NodeId,
        text: String,
        offset: usize,
    },
    /// Composing at an element position (e.g. right after an atomic).
    Element { container: NodeId, offset: usize },
    /// Composing on an empty line whose only child was the break marker;
    /// restoring means putting a literal break element back.
    BareBreak { line: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionSnapshot {
    pub anchor: CompositionAnchor,
}

/// Capture the selection state at composition start.
pub fn snapshot_composition(doc: &Document) -> Option<CompositionSnapshot> {
    let range = current_range(doc)?;
    let pos = range.start;
    let anchor = if doc.is_text_run(pos.container) {
        CompositionAnchor::TextRun {
            node: pos.container,
            text: doc.text(pos.container)?.to_string(),
            offset: pos.offset,
        }
    } else if doc.is_break(pos.anchor) {
        let line = doc.enclosing_line(pos.anchor)?;
        CompositionAnchor::BareBreak { line }
    } else {
        CompositionAnchor::Element {
            container: pos.container,
            offset: pos.offset,
        }
    };
    Some(CompositionSnapshot { anchor })
}

fn restore_bare_break(doc: &mut Document, line: NodeId) {
    let marker = doc.create_break();
    doc.insert_child_at(line, 0, marker);
    let others: Vec<NodeId> = doc
        .children(line)
        .iter()
        .copied()
        .filter(|&c| c != marker)
        .collect();
    for other in others {
        doc.remove_subtree(other);
    }
    core_position::set_cursor(doc, marker, core_position::Edge::Before);
}

/// Composition-aware correction, run synchronously at composition end:
/// after the host has already committed `committed` into the tree, but
/// before any subsequent keystroke is processed. When the commit fits,
/// nothing happens. When it overflows, the edited node rolls back to the
/// snapshot, the cursor returns to the pre-composition anchor, and only the
/// slice that fits is re-inserted.
pub fn correct_after_composition(
    doc: &mut Document,
    emoji: &EmojiCatalog,
    opts: &Options,
    emitter: &mut Emitter,
    snapshot: &CompositionSnapshot,
    committed: &str,
) -> bool {
    let Some(max) = opts.max_length else {
        return true;
    };
    let used = current_length(doc, opts);
    if used <= max {
        return true;
    }
    debug!(target: "limit", max, used, "composition overflowed; rolling back");

    // The node the host edited is whatever currently holds the cursor.
    let edited = current_range(doc).map(|r| r.start);

    match &snapshot.anchor {
        CompositionAnchor::TextRun { node, text, offset } => {
            if doc.is_alive(*node) {
                // Same-node commit: the run holds pre-text plus the
                // composed string; restore the buffer.
                doc.set_node_text(*node, text.clone());
                // Different-node commit: the host may also have created a
                // fresh run for the composed text; drop it.
                if let Some(edited) = edited
                    && edited.container != *node
                    && doc.is_text_run(edited.container)
                {
                    doc.remove_subtree(edited.container);
                }
                core_position::set_cursor_offsets(doc, *node, *offset, None);
            } else if let Some(edited) = edited
                && doc.is_text_run(edited.container)
            {
                // Original run replaced outright: restore its text into the
                // survivor.
                doc.set_node_text(edited.container, text.clone());
                core_position::set_cursor_offsets(doc, edited.container, *offset, None);
            }
        }
        CompositionAnchor::BareBreak { line } => {
            if doc.is_alive(*line) {
                restore_bare_break(doc, *line);
            }
        }
        CompositionAnchor::Element { container, offset } => {
            if let Some(edited) = edited
                && doc.is_text_run(edited.container)
            {
                doc.remove_subtree(edited.container);
            }
            if doc.is_alive(*container) {
                core_position::set_cursor_offsets(doc, *container, *offset, None);
            } else {
                core_position::amend_position(doc);
            }
        }
    }

    // Re-insert only what fits, through the normal interceptor path.
    insert_text_intercepted(doc, emoji, opts, emitter, committed, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::EngineEventKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fixture(max: Option<usize>) -> (Document, EmojiCatalog, Options, Emitter) {
        let mut opts = Options::default();
        opts.max_length = max;
        (Document::new(), EmojiCatalog::new(), opts, Emitter::new())
    }

    fn limit_counter(emitter: &mut Emitter) -> Rc<RefCell<usize>> {
        let hits = Rc::new(RefCell::new(0));
        let hits2 = hits.clone();
        emitter.on(EngineEventKind::MaxLengthReached, move |_| {
            *hits2.borrow_mut() += 1
        });
        hits
    }

    #[test]
    fn unlimited_inserts_directly() {
        let (mut doc, emoji, opts, mut emitter) = fixture(None);
        assert!(insert_text_intercepted(
            &mut doc, &emoji, &opts, &mut emitter, "hello", true
        ));
        assert_eq!(doc.to_text(false), "hello");
    }

    #[test]
    fn truncates_to_capacity_and_notifies() {
        let (mut doc, emoji, opts, mut emitter) = fixture(Some(3));
        let hits = limit_counter(&mut emitter);
        assert!(insert_text_intercepted(
            &mut doc, &emoji, &opts, &mut emitter, "hello", true
        ));
        assert_eq!(doc.to_text(false), "hel");
        assert_eq!(current_length(&doc, &Options::default().with_max_length(3)), 3);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn fails_fast_when_already_full() {
        let (mut doc, emoji, opts, mut emitter) = fixture(Some(2));
        let hits = limit_counter(&mut emitter);
        assert!(insert_text_intercepted(
            &mut doc, &emoji, &opts, &mut emitter, "ab", true
        ));
        assert!(!insert_text_intercepted(
            &mut doc, &emoji, &opts, &mut emitter, "c", true
        ));
        assert_eq!(doc.to_text(false), "ab");
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn newline_exempt_counting_still_slices_original() {
        let (mut doc, emoji, mut opts, mut emitter) = fixture(Some(4));
        opts.is_line_break_count = false;
        // Six graphemes counted without the break; only four fit, and the
        // slice keeps the literal newline.
        assert!(insert_text_intercepted(
            &mut doc, &emoji, &opts, &mut emitter, "ab\ncdef", true
        ));
        assert_eq!(doc.to_text(false), "ab\nc");
        assert_eq!(current_length(&doc, &opts), 3);
    }

    #[test]
    fn grapheme_true_truncation() {
        let (mut doc, emoji, opts, mut emitter) = fixture(Some(2));
        assert!(insert_text_intercepted(
            &mut doc, &emoji, &opts, &mut emitter, "é😀x", true
        ));
        assert_eq!(doc.to_text(false), "é😀");
    }

    #[test]
    fn composition_within_capacity_is_untouched() {
        let (mut doc, emoji, opts, mut emitter) = fixture(Some(10));
        let snap = snapshot_composition(&doc).unwrap();
        insert_with_amend(&mut doc, &emoji, "你好", true);
        assert!(correct_after_composition(
            &mut doc, &emoji, &opts, &mut emitter, &snap, "你好"
        ));
        assert_eq!(doc.to_text(false), "你好");
    }

    #[test]
    fn composition_overflow_rolls_back_same_node() {
        let (mut doc, emoji, opts, mut emitter) = fixture(Some(4));
        insert_with_amend(&mut doc, &emoji, "abc", true);
        let snap = snapshot_composition(&doc).unwrap();
        // Host commits the full composed string even though only one
        // character fits.
        insert_with_amend(&mut doc, &emoji, "汉字文", true);
        assert_eq!(doc.to_text(false), "abc汉字文");
        correct_after_composition(&mut doc, &emoji, &opts, &mut emitter, &snap, "汉字文");
        assert_eq!(doc.to_text(false), "abc汉");
    }

    #[test]
    fn composition_overflow_on_bare_break_restores_marker() {
        let (mut doc, emoji, opts, mut emitter) = fixture(Some(0));
        let snap = snapshot_composition(&doc).unwrap();
        assert!(matches!(
            snap.anchor,
            CompositionAnchor::BareBreak { .. }
        ));
        insert_with_amend(&mut doc, &emoji, "多余", true);
        correct_after_composition(&mut doc, &emoji, &opts, &mut emitter, &snap, "多余");
        assert!(doc.is_canonical_empty());
    }
}
