//! Structural edit operations over the document tree.
//!
//! Every operation here follows the same lifecycle: validate (is there a
//! range? an enclosing Line?), mutate, place the cursor, return a boolean.
//! A validation failure short-circuits before any mutation; once mutation
//! starts it always runs to completion before control returns, so callers
//! never observe a half-edited tree. Failures are reported through the
//! return value; the caller decides whether to amend the position and
//! retry (insert-text allows exactly one retry).
//!
//! The minimum-one-child-per-Line invariant is honored at every
//! intermediate step: break markers are inserted before the last content
//! node of a Line is removed, never after.

use core_dom::{Document, NodeId};

mod delete;
mod insert;
mod linefeed;

pub use delete::{backspace, delete_range};
pub use insert::{insert_nodes, insert_text};
pub use linefeed::line_feed;

/// Place a collapsed caret immediately after a node: at its trailing
/// character offset for text runs, past it for anything else.
pub(crate) fn place_caret_after(doc: &mut Document, node: NodeId) -> bool {
    if doc.is_text_run(node) {
        let len = doc.text_char_len(node);
        core_position::set_cursor_offsets(doc, node, len, None)
    } else {
        core_position::set_cursor(doc, node, core_position::Edge::After)
    }
}

/// Place a collapsed caret immediately before a node.
pub(crate) fn place_caret_before(doc: &mut Document, node: NodeId) -> bool {
    if doc.is_text_run(node) {
        core_position::set_cursor_offsets(doc, node, 0, None)
    } else {
        core_position::set_cursor(doc, node, core_position::Edge::Before)
    }
}

/// Collapse a Line back to its canonical shape (exactly one break marker)
/// and park the caret before the marker.
pub(crate) fn reset_line_to_break(doc: &mut Document, line: NodeId) {
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

/// Drop the grapheme cluster ending at `offset` from a text run's buffer.
/// Returns the new text; `None` when there is nothing before the offset.
pub(crate) fn text_without_grapheme_before(text: &str, offset: usize) -> Option<String> {
    if offset == 0 {
        return None;
    }
    let start = core_position::grapheme_byte_offset(text, offset - 1);
    let end = core_position::grapheme_byte_offset(text, offset);
    if start >= end {
        return None;
    }
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..start]);
    out.push_str(&text[end..]);
    Some(out)
}
