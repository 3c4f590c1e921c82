//! Line splitting (Enter / Ctrl+Enter).

use core_dom::Document;
use core_position::{Range, current_range, surrounding_nodes};
use tracing::trace;

use crate::place_caret_before;

/// Split the current line at the cursor: a new Line is created immediately
/// after the current one, the content following the cursor moves into it
/// (or a break marker when nothing follows), and the cursor lands at the
/// start of the new line's first child.
///
/// Reentrancy is the caller's concern: the input controller holds a
/// line-feed latch because async completions can re-trigger this while the
/// tree is still settling.
pub fn line_feed(doc: &mut Document) -> bool {
    let Some(range) = current_range(doc) else {
        return false;
    };
    let Some(line) = doc
        .enclosing_line(range.start.anchor)
        .or_else(|| doc.enclosing_line(range.start.container))
    else {
        return false;
    };
    let Some((_, after)) = surrounding_nodes(doc, &Range::caret(range.start)) else {
        return false;
    };

    let new_line = doc.create_line(true);
    if after.is_empty() {
        let marker = doc.create_break();
        doc.append_child(new_line, marker);
    } else {
        for &node in &after {
            doc.append_child(new_line, node); // append detaches from the old line
        }
    }
    doc.ensure_line_populated(line);
    doc.strip_redundant_breaks(line);
    doc.insert_after(line, new_line);
    trace!(target: "edit", op = "line_feed", moved = after.len(), "split");

    if let Some(&first) = doc.children(new_line).first() {
        place_caret_before(doc, first);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_dom::{EmojiCatalog, RawPoint};

    #[test]
    fn enter_mid_line_splits_content() {
        let mut doc = Document::new();
        let emoji = EmojiCatalog::new();
        let range = current_range(&doc).unwrap();
        crate::insert_text(&mut doc, &emoji, "ab", &range, true);
        let run = doc.children(doc.first_line().unwrap())[0];
        doc.collapse_selection_to(RawPoint {
            node: run,
            offset: 1,
        })
        .unwrap();
        assert!(line_feed(&mut doc));
        assert_eq!(doc.lines().len(), 2);
        assert_eq!(doc.to_text(false), "a\nb");
        assert_eq!(doc.to_proto_html(), "<p>a</p><p>b</p>");
        // Caret at the start of the new line's content.
        let r = current_range(&doc).unwrap();
        assert_eq!(doc.text(r.start.container), Some("b"));
        assert_eq!(r.start.offset, 0);
    }

    #[test]
    fn enter_at_line_end_creates_marker_line() {
        let mut doc = Document::new();
        let emoji = EmojiCatalog::new();
        let range = current_range(&doc).unwrap();
        crate::insert_text(&mut doc, &emoji, "ab", &range, true);
        assert!(line_feed(&mut doc));
        assert_eq!(doc.lines().len(), 2);
        assert_eq!(doc.to_proto_html(), "<p>ab</p><p><br></p>");
        let second = doc.lines()[1];
        let sel = doc.selection().unwrap();
        assert_eq!(sel.anchor.node, second);
        assert_eq!(sel.anchor.offset, 0);
    }

    #[test]
    fn enter_at_line_start_keeps_marker_in_original() {
        let mut doc = Document::new();
        let emoji = EmojiCatalog::new();
        let range = current_range(&doc).unwrap();
        crate::insert_text(&mut doc, &emoji, "ab", &range, true);
        let run = doc.children(doc.first_line().unwrap())[0];
        doc.collapse_selection_to(RawPoint {
            node: run,
            offset: 0,
        })
        .unwrap();
        assert!(line_feed(&mut doc));
        assert_eq!(doc.lines().len(), 2);
        assert_eq!(doc.to_proto_html(), "<p><br></p><p>ab</p>");
    }

    #[test]
    fn enter_on_empty_document_stacks_marker_lines() {
        let mut doc = Document::new();
        assert!(line_feed(&mut doc));
        assert_eq!(doc.lines().len(), 2);
        assert_eq!(doc.to_proto_html(), "<p><br></p><p><br></p>");
    }
}
