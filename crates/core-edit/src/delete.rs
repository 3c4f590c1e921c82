//! Range-bounded deletion, line merging, and backspace.

use core_dom::{Document, NodeId};
use core_position::{Range, current_range, surrounding_nodes};
use tracing::trace;

use crate::{place_caret_after, place_caret_before, reset_line_to_break, text_without_grapheme_before};

fn is_content(doc: &Document, id: NodeId) -> bool {
    !doc.is_break(id) && !(doc.is_text_run(id) && doc.text_char_len(id) == 0)
}

/// Cursor placement shared by the deletion paths: after the surviving
/// predecessor, else before the surviving successor, else canonical reset.
fn settle_cursor(doc: &mut Document, line: NodeId, prev: Option<NodeId>, next: Option<NodeId>) {
    if doc.is_semantically_empty_line(line) {
        reset_line_to_break(doc, line);
        return;
    }
    doc.strip_redundant_breaks(line);
    if let Some(prev) = prev.filter(|&n| doc.is_alive(n)) {
        place_caret_after(doc, prev);
    } else if let Some(next) = next.filter(|&n| doc.is_alive(n)) {
        place_caret_before(doc, next);
    } else {
        core_position::amend_position(doc);
    }
}

/// Delete everything covered by a non-collapsed range.
///
/// Same-line deletion intersects the nodes after the start with the nodes
/// before the end; the end is re-read from the live selection after the
/// start-side split, because splitting at the start invalidates a stale end
/// offset. Cross-line deletion additionally removes every whole Line
/// strictly between the endpoints and merges the end line's remainder into
/// the start line.
pub fn delete_range(doc: &mut Document, range: &Range) -> bool {
    if range.collapsed {
        return false;
    }
    let Some(start_line) = doc
        .enclosing_line(range.start.anchor)
        .or_else(|| doc.enclosing_line(range.start.container))
    else {
        return false;
    };
    let Some(end_line) = doc
        .enclosing_line(range.end.anchor)
        .or_else(|| doc.enclosing_line(range.end.container))
    else {
        return false;
    };

    if start_line == end_line {
        let Some((start_before, start_after)) =
            surrounding_nodes(doc, &Range::caret(range.start))
        else {
            return false;
        };
        // Mandatory recomputation: the start-side split moved any in-run
        // end offset into the clone, and the selection was remapped with it.
        let end_pos = match current_range(doc) {
            Some(refreshed) => refreshed.end,
            None => range.end,
        };
        let Some((end_before, end_after)) = surrounding_nodes(doc, &Range::caret(end_pos)) else {
            return false;
        };
        let doomed: Vec<NodeId> = start_after
            .iter()
            .copied()
            .filter(|id| end_before.contains(id))
            .collect();
        trace!(target: "edit", op = "delete_range", scope = "same_line", doomed = doomed.len(), "delete");
        for node in &doomed {
            doc.remove_subtree(*node);
        }
        settle_cursor(
            doc,
            start_line,
            start_before.first().copied(),
            end_after.first().copied(),
        );
        doc.repair_root();
        return true;
    }

    // Cross-line: whole lines strictly between the endpoints go first.
    let lines = doc.lines().to_vec();
    let (Some(start_idx), Some(end_idx)) = (
        lines.iter().position(|&l| l == start_line),
        lines.iter().position(|&l| l == end_line),
    ) else {
        return false;
    };
    let (start_idx, end_idx) = if start_idx <= end_idx {
        (start_idx, end_idx)
    } else {
        (end_idx, start_idx)
    };
    let middle: Vec<NodeId> = lines[start_idx + 1..end_idx].to_vec();
    trace!(target: "edit", op = "delete_range", scope = "cross_line", middle = middle.len(), "delete");
    for line in middle {
        doc.remove_subtree(line);
    }

    let Some((start_before, start_after)) = surrounding_nodes(doc, &Range::caret(range.start))
    else {
        return false;
    };
    let Some((end_before, end_after)) = surrounding_nodes(doc, &Range::caret(range.end)) else {
        return false;
    };
    for node in start_after {
        doc.remove_subtree(node);
    }
    for node in end_before {
        doc.remove_subtree(node);
    }

    let survivors: Vec<NodeId> = end_after
        .into_iter()
        .filter(|&n| doc.is_alive(n))
        .collect();
    if survivors.is_empty() {
        doc.ensure_line_populated(start_line);
        doc.remove_subtree(end_line);
    } else {
        for &node in &survivors {
            doc.append_child(start_line, node);
        }
        doc.remove_subtree(end_line);
        doc.strip_redundant_breaks(start_line);
    }
    doc.ensure_line_populated(start_line);
    settle_cursor(
        doc,
        start_line,
        start_before.first().copied(),
        survivors.first().copied(),
    );
    doc.repair_root();
    true
}

/// Merge a Line into its predecessor: the tail of a backspace at line
/// start. The predecessor's break marker is cleared when real content
/// arrives; the merged-away Line is destroyed.
fn merge_with_previous_line(doc: &mut Document, line: NodeId) -> bool {
    let Some(prev_line) = doc.prev_sibling(line).filter(|&l| doc.is_line(l)) else {
        return false;
    };
    let junction = doc
        .children(prev_line)
        .iter()
        .rev()
        .copied()
        .find(|&c| is_content(doc, c));
    let moving = doc.take_children(line);
    doc.remove_subtree(line);
    for node in moving {
        doc.append_child(prev_line, node);
    }
    doc.strip_redundant_breaks(prev_line);
    doc.ensure_line_populated(prev_line);
    trace!(target: "edit", op = "merge_lines", "delete");

    match junction {
        Some(node) => {
            place_caret_after(doc, node);
        }
        None => {
            if doc.is_semantically_empty_line(prev_line) {
                reset_line_to_break(doc, prev_line);
            } else if let Some(&first) = doc.children(prev_line).first() {
                place_caret_before(doc, first);
            }
        }
    }
    doc.repair_root();
    true
}

/// Delete backwards from a collapsed cursor: a character inside a run, the
/// nearest preceding inline unit, or, at line start, a merge with the
/// previous Line. A non-collapsed selection routes through
/// [`delete_range`].
pub fn backspace(doc: &mut Document) -> bool {
    let Some(range) = current_range(doc) else {
        return false;
    };
    if !range.collapsed {
        return delete_range(doc, &range);
    }
    let pos = range.start;

    if doc.is_text_run(pos.container) && pos.offset > 0 {
        let text = doc
            .text(pos.container)
            .map(str::to_string)
            .unwrap_or_default();
        if let Some(new_text) = text_without_grapheme_before(&text, pos.offset) {
            if new_text.is_empty() {
                let line = doc.enclosing_line(pos.container);
                let prev = doc.prev_sibling(pos.container);
                let next = doc.next_sibling(pos.container);
                doc.remove_subtree(pos.container);
                if let Some(line) = line {
                    settle_cursor(doc, line, prev, next);
                }
            } else {
                doc.set_node_text(pos.container, new_text);
                core_position::set_cursor_offsets(doc, pos.container, pos.offset - 1, None);
            }
            return true;
        }
        return false;
    }

    let Some((before, after)) = surrounding_nodes(doc, &Range::caret(pos)) else {
        return false;
    };
    if let Some(&prev) = before.first() {
        let Some(line) = doc.enclosing_line(prev) else {
            return false;
        };
        if doc.is_text_run(prev) {
            let text = doc.text(prev).map(str::to_string).unwrap_or_default();
            let len = doc.text_char_len(prev);
            match text_without_grapheme_before(&text, len) {
                Some(new_text) if !new_text.is_empty() => {
                    doc.set_node_text(prev, new_text);
                    core_position::set_cursor_offsets(doc, prev, len - 1, None);
                }
                _ => {
                    let earlier = doc.prev_sibling(prev);
                    doc.remove_subtree(prev);
                    settle_cursor(doc, line, earlier, after.first().copied());
                }
            }
        } else {
            // Atomic (or stray foreign wrapper): deleted as a unit.
            let earlier = doc.prev_sibling(prev);
            doc.remove_subtree(prev);
            settle_cursor(doc, line, earlier, after.first().copied());
        }
        return true;
    }

    let Some(line) = doc
        .enclosing_line(pos.anchor)
        .or_else(|| doc.enclosing_line(pos.container))
    else {
        return false;
    };
    merge_with_previous_line(doc, line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_dom::{AtomicPayload, EmojiCatalog, RawPoint, RawSelection};
    use core_position::select_all;

    fn doc_with_line(text: &str) -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_text(text);
        doc.append_child(line, run);
        doc.strip_redundant_breaks(line);
        (doc, line, run)
    }

    #[test]
    fn same_line_mid_run_deletion() {
        let (mut doc, _line, run) = doc_with_line("abcd");
        doc.set_selection(RawSelection {
            anchor: RawPoint {
                node: run,
                offset: 1,
            },
            focus: RawPoint {
                node: run,
                offset: 3,
            },
        })
        .unwrap();
        let range = current_range(&doc).unwrap();
        assert!(delete_range(&mut doc, &range));
        assert_eq!(doc.to_text(false), "ad");
    }

    #[test]
    fn select_all_delete_resets_to_canonical_empty() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let a = doc.create_text("a");
        doc.append_child(line, a);
        let img = doc.create_atomic(AtomicPayload::Image {
            handle: "img-1".into(),
        });
        doc.append_child(line, img);
        let b = doc.create_text("b");
        doc.append_child(line, b);
        doc.strip_redundant_breaks(line);
        assert!(select_all(&mut doc));
        let range = current_range(&doc).unwrap();
        assert!(delete_range(&mut doc, &range));
        assert!(doc.is_canonical_empty());
        assert_eq!(doc.to_proto_html(), "<p><br></p>");
    }

    #[test]
    fn cross_line_deletion_merges_remainders() {
        let mut doc = Document::new();
        let emoji = EmojiCatalog::new();
        let range = current_range(&doc).unwrap();
        crate::insert_text(&mut doc, &emoji, "first\nmiddle\nlast", &range, true);
        let lines = doc.lines().to_vec();
        let first_run = doc.children(lines[0])[0];
        let last_run = doc.children(lines[2])[0];
        doc.set_selection(RawSelection {
            anchor: RawPoint {
                node: first_run,
                offset: 2,
            },
            focus: RawPoint {
                node: last_run,
                offset: 2,
            },
        })
        .unwrap();
        let range = current_range(&doc).unwrap();
        assert!(delete_range(&mut doc, &range));
        assert_eq!(doc.to_text(false), "fist");
        assert_eq!(doc.lines().len(), 1);
    }

    #[test]
    fn cross_line_deletion_drops_emptied_end_line() {
        let mut doc = Document::new();
        let emoji = EmojiCatalog::new();
        let range = current_range(&doc).unwrap();
        crate::insert_text(&mut doc, &emoji, "keep\ngone", &range, true);
        let lines = doc.lines().to_vec();
        let keep_run = doc.children(lines[0])[0];
        let gone_run = doc.children(lines[1])[0];
        doc.set_selection(RawSelection {
            anchor: RawPoint {
                node: keep_run,
                offset: 4,
            },
            focus: RawPoint {
                node: gone_run,
                offset: 4,
            },
        })
        .unwrap();
        let range = current_range(&doc).unwrap();
        assert!(delete_range(&mut doc, &range));
        assert_eq!(doc.to_text(false), "keep");
        assert_eq!(doc.lines().len(), 1);
    }

    #[test]
    fn backspace_removes_character_and_keeps_cursor() {
        let (mut doc, _line, run) = doc_with_line("hey");
        doc.collapse_selection_to(RawPoint {
            node: run,
            offset: 2,
        })
        .unwrap();
        assert!(backspace(&mut doc));
        assert_eq!(doc.to_text(false), "hy");
        let r = current_range(&doc).unwrap();
        assert_eq!(r.start.offset, 1);
    }

    #[test]
    fn backspace_at_line_start_merges_lines() {
        let mut doc = Document::new();
        let emoji = EmojiCatalog::new();
        let range = current_range(&doc).unwrap();
        crate::insert_text(&mut doc, &emoji, "foo\nbar", &range, true);
        let lines = doc.lines().to_vec();
        let bar_run = doc.children(lines[1])[0];
        doc.collapse_selection_to(RawPoint {
            node: bar_run,
            offset: 0,
        })
        .unwrap();
        assert!(backspace(&mut doc));
        assert_eq!(doc.lines().len(), 1);
        assert_eq!(doc.to_text(false), "foobar");
        // Caret sits at the junction, after "foo".
        let r = current_range(&doc).unwrap();
        assert_eq!(doc.text(r.start.container), Some("foo"));
        assert_eq!(r.start.offset, 3);
    }

    #[test]
    fn backspace_deletes_atomic_as_a_unit() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_text("a");
        doc.append_child(line, run);
        let emojinode = doc.create_atomic(AtomicPayload::Emoji {
            name: "smile".into(),
            src: "u".into(),
        });
        doc.append_child(line, emojinode);
        doc.strip_redundant_breaks(line);
        core_position::set_cursor(&mut doc, emojinode, core_position::Edge::After);
        assert!(backspace(&mut doc));
        assert!(!doc.is_alive(emojinode));
        assert_eq!(doc.to_text(false), "a");
    }

    #[test]
    fn backspace_on_first_line_start_is_a_no_op() {
        let (mut doc, _line, run) = doc_with_line("x");
        doc.collapse_selection_to(RawPoint {
            node: run,
            offset: 0,
        })
        .unwrap();
        assert!(!backspace(&mut doc));
        assert_eq!(doc.to_text(false), "x");
    }

    #[test]
    fn emptied_line_keeps_exactly_one_marker() {
        let (mut doc, line, run) = doc_with_line("a");
        doc.collapse_selection_to(RawPoint {
            node: run,
            offset: 1,
        })
        .unwrap();
        assert!(backspace(&mut doc));
        assert!(doc.is_canonical_empty());
        assert_eq!(doc.child_count(line), 1);
        // Caret parked before the marker so typing resumes correctly.
        let sel = doc.selection().unwrap();
        assert_eq!(sel.anchor.node, line);
        assert_eq!(sel.anchor.offset, 0);
    }
}
