//! Text and node insertion.

use core_dom::{AtomicPayload, Document, EmojiCatalog, NodeId, Piece};
use core_position::{Range, surrounding_nodes};
use tracing::trace;

use crate::{place_caret_after, place_caret_before};

/// Convert one line of content into inline nodes: literal text runs plus
/// atomic emoji nodes for recognized `[name]` tokens. An empty line yields
/// an empty fragment (the caller decides whether a break marker is needed).
fn build_fragment(doc: &mut Document, emoji: &EmojiCatalog, line_text: &str) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    for piece in emoji.segment(line_text) {
        match piece {
            Piece::Text(text) => {
                if !text.is_empty() {
                    nodes.push(doc.create_text(text));
                }
            }
            Piece::Emoji { name, src } => {
                nodes.push(doc.create_atomic(AtomicPayload::Emoji {
                    name: name.to_string(),
                    src: src.to_string(),
                }));
            }
        }
    }
    nodes
}

/// Splice a fragment into a Line relative to the computed surroundings:
/// wholesale replacement when the line is semantically empty, otherwise
/// after the nearest preceding node, before the nearest following node, or
/// appended when neither exists.
fn splice_fragment(
    doc: &mut Document,
    line: NodeId,
    fragment: &[NodeId],
    before: &[NodeId],
    after: &[NodeId],
) {
    if fragment.is_empty() {
        return;
    }
    if doc.is_semantically_empty_line(line) {
        let old = doc.take_children(line);
        for &node in fragment {
            doc.append_child(line, node);
        }
        for stale in old {
            doc.remove_subtree(stale);
        }
        return;
    }
    if let Some(&prev) = before.first() {
        let mut anchor = prev;
        for &node in fragment {
            doc.insert_after(anchor, node);
            anchor = node;
        }
    } else if let Some(&next) = after.first() {
        for &node in fragment {
            doc.insert_before(next, node);
        }
    } else {
        for &node in fragment {
            doc.append_child(line, node);
        }
    }
}

/// Insert (possibly multi-line) text content at a range. Emoji tokens are
/// converted to atomic nodes; newline characters split the content into
/// Line fragments that chain after the current Line, with the trailing
/// fragment absorbing the content that followed the cursor.
///
/// Returns `false` without mutating when the position has no enclosing
/// Line; the caller is expected to amend the position and retry once.
pub fn insert_text(
    doc: &mut Document,
    emoji: &EmojiCatalog,
    content: &str,
    range: &Range,
    show_cursor: bool,
) -> bool {
    let Some(line) = doc
        .enclosing_line(range.start.anchor)
        .or_else(|| doc.enclosing_line(range.start.container))
    else {
        return false;
    };
    let Some((before, after)) = surrounding_nodes(doc, range) else {
        return false;
    };

    let parts: Vec<&str> = content.split('\n').collect();
    trace!(target: "edit", op = "insert_text", lines = parts.len(), chars = content.len(), "insert");

    if parts.len() == 1 {
        let fragment = build_fragment(doc, emoji, parts[0]);
        let last = fragment.last().copied();
        splice_fragment(doc, line, &fragment, &before, &after);
        doc.strip_redundant_breaks(line);
        if show_cursor && let Some(last) = last {
            place_caret_after(doc, last);
        }
        return true;
    }

    // Multi-line: the first fragment merges into the current line, the
    // nodes after the cursor move to the trailing fragment's line.
    let first_fragment = build_fragment(doc, emoji, parts[0]);
    splice_fragment(doc, line, &first_fragment, &before, &after);

    for &moved in &after {
        doc.detach(moved);
    }
    doc.ensure_line_populated(line);
    doc.strip_redundant_breaks(line);

    let mut previous_line = line;
    let mut caret_target: Option<NodeId> = None;
    let last_index = parts.len() - 1;
    for (i, part) in parts.iter().enumerate().skip(1) {
        let new_line = doc.create_line(true);
        let fragment = build_fragment(doc, emoji, part);
        for &node in &fragment {
            doc.append_child(new_line, node);
        }
        if i == last_index {
            caret_target = fragment.last().copied();
            for &moved in &after {
                doc.append_child(new_line, moved);
            }
        }
        doc.ensure_line_populated(new_line);
        doc.strip_redundant_breaks(new_line);
        doc.insert_after(previous_line, new_line);
        previous_line = new_line;
    }

    if show_cursor {
        match caret_target {
            Some(node) => {
                place_caret_after(doc, node);
            }
            None => {
                // Trailing fragment was empty: caret lands at the start of
                // the last inserted line.
                if let Some(&first_child) = doc.children(previous_line).first() {
                    place_caret_before(doc, first_child);
                }
            }
        }
    }
    true
}

/// Insert already-built inline nodes (emoji from the picker, images from
/// the paste pipeline) at a range.
///
/// Returns `false` when the position has no enclosing Line; no retry is
/// attempted here; the caller decides whether to amend first.
pub fn insert_nodes(doc: &mut Document, nodes: &[NodeId], range: &Range) -> bool {
    if nodes.is_empty() {
        return false;
    }
    let Some(line) = doc
        .enclosing_line(range.start.anchor)
        .or_else(|| doc.enclosing_line(range.start.container))
    else {
        return false;
    };
    let Some((before, after)) = surrounding_nodes(doc, range) else {
        return false;
    };
    trace!(target: "edit", op = "insert_nodes", count = nodes.len(), "insert");

    if before.is_empty() && after.is_empty() {
        for &node in nodes {
            doc.append_child(line, node);
        }
    } else if let Some(&prev) = before.first() {
        let mut anchor = prev;
        for &node in nodes {
            doc.insert_after(anchor, node);
            anchor = node;
        }
    } else if let Some(&next) = after.first() {
        for &node in nodes {
            doc.insert_before(next, node);
        }
    }
    doc.strip_redundant_breaks(line);

    let last = *nodes.last().expect("nodes checked non-empty");
    if doc.is_atomic(last) {
        core_position::set_cursor(doc, last, core_position::Edge::After);
    } else {
        // Legacy container-wrapped atomics: step one offset inside.
        core_position::set_cursor_offsets(doc, last, 1, None);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_dom::RawPoint;
    use core_position::current_range;

    fn emoji_catalog() -> EmojiCatalog {
        let mut c = EmojiCatalog::new();
        c.register("smile", "https://cdn/smile.png");
        c
    }

    fn caret_in_empty(doc: &Document) -> Range {
        current_range(doc).expect("fresh document has a caret")
    }

    #[test]
    fn insert_into_empty_line_replaces_marker() {
        let mut doc = Document::new();
        let emoji = emoji_catalog();
        let range = caret_in_empty(&doc);
        assert!(insert_text(&mut doc, &emoji, "hello", &range, true));
        assert_eq!(doc.to_text(false), "hello");
        assert!(!doc.is_canonical_empty());
        let line = doc.first_line().unwrap();
        assert_eq!(doc.child_count(line), 1);
        // Caret sits at the end of the inserted run.
        let r = current_range(&doc).unwrap();
        assert_eq!(r.start.offset, 5);
    }

    #[test]
    fn insert_converts_emoji_tokens() {
        let mut doc = Document::new();
        let emoji = emoji_catalog();
        let range = caret_in_empty(&doc);
        assert!(insert_text(&mut doc, &emoji, "hi [smile]", &range, true));
        let line = doc.first_line().unwrap();
        assert_eq!(doc.child_count(line), 2);
        assert!(doc.is_emoji(doc.children(line)[1]));
        assert_eq!(doc.to_text(false), "hi [smile]");
    }

    #[test]
    fn insert_mid_run_splices_after_split() {
        let mut doc = Document::new();
        let emoji = emoji_catalog();
        let line = doc.first_line().unwrap();
        let run = doc.create_text("ad");
        doc.append_child(line, run);
        doc.strip_redundant_breaks(line);
        doc.collapse_selection_to(RawPoint {
            node: run,
            offset: 1,
        })
        .unwrap();
        let range = current_range(&doc).unwrap();
        assert!(insert_text(&mut doc, &emoji, "bc", &range, true));
        assert_eq!(doc.to_text(false), "abcd");
    }

    #[test]
    fn multi_line_insert_chains_fragments() {
        let mut doc = Document::new();
        let emoji = emoji_catalog();
        let range = caret_in_empty(&doc);
        assert!(insert_text(&mut doc, &emoji, "one\ntwo\nthree", &range, true));
        assert_eq!(doc.lines().len(), 3);
        assert_eq!(doc.to_text(false), "one\ntwo\nthree");
        let r = current_range(&doc).unwrap();
        assert_eq!(r.start.offset, 5); // end of "three"
    }

    #[test]
    fn multi_line_insert_trailing_fragment_absorbs_tail() {
        let mut doc = Document::new();
        let emoji = emoji_catalog();
        let line = doc.first_line().unwrap();
        let run = doc.create_text("ab");
        doc.append_child(line, run);
        doc.strip_redundant_breaks(line);
        doc.collapse_selection_to(RawPoint {
            node: run,
            offset: 1,
        })
        .unwrap();
        let range = current_range(&doc).unwrap();
        assert!(insert_text(&mut doc, &emoji, "x\ny", &range, true));
        assert_eq!(doc.to_text(false), "ax\nyb");
    }

    #[test]
    fn insert_fails_without_enclosing_line() {
        let mut doc = Document::new();
        let emoji = emoji_catalog();
        let root = doc.root();
        let range = Range::caret(core_position::Position {
            container: root,
            offset: 0,
            anchor: root,
        });
        assert!(!insert_text(&mut doc, &emoji, "x", &range, true));
        assert!(doc.is_canonical_empty());
    }

    #[test]
    fn insert_nodes_appends_in_empty_line() {
        let mut doc = Document::new();
        let atom = doc.create_atomic(AtomicPayload::Emoji {
            name: "smile".into(),
            src: "u".into(),
        });
        let range = caret_in_empty(&doc);
        assert!(insert_nodes(&mut doc, &[atom], &range));
        let line = doc.first_line().unwrap();
        assert_eq!(doc.children(line), &[atom]);
        let sel = doc.selection().unwrap();
        assert_eq!(sel.anchor.node, line);
        assert_eq!(sel.anchor.offset, 1);
    }

    #[test]
    fn insert_nodes_lands_after_preceding_content() {
        let mut doc = Document::new();
        let emoji = emoji_catalog();
        let range = caret_in_empty(&doc);
        insert_text(&mut doc, &emoji, "ab", &range, true);
        let atom = doc.create_atomic(AtomicPayload::Image {
            handle: "img-1".into(),
        });
        let range = current_range(&doc).unwrap();
        assert!(insert_nodes(&mut doc, &[atom], &range));
        let line = doc.first_line().unwrap();
        assert_eq!(doc.child_count(line), 2);
        assert!(doc.is_image(doc.children(line)[1]));
    }
}
