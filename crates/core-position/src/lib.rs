//! Cursor addressing over the document tree.
//!
//! A [`Position`] is a normalized `(container, offset)` pair plus the
//! resolved leaf (`anchor`): the container is either a text run whose offset
//! counts characters, or a structural node whose offset indexes children.
//! Raw selections reported by the host surface frequently address a
//! container where a leaf was meant; [`current_range`] runs the walk-down
//! loop that repairs this before any structural operation sees the range.
//!
//! Placement primitives ([`set_cursor`], [`set_cursor_offsets`]) are
//! idempotent and clear any existing range first. [`amend_position`]
//! relocates an invalid position (no enclosing Line) to the last Line's
//! trailing content.

use core_dom::{Document, MAX_ANCESTOR_DEPTH, NodeId, RawPoint, RawSelection};
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

pub mod split;

/// Normalized cursor point. `container` is a text run (character offset) or
/// a structural node (child-index offset); `anchor` is the resolved leaf the
/// point touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub container: NodeId,
    pub offset: usize,
    pub anchor: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
    pub collapsed: bool,
}

impl Range {
    pub fn caret(pos: Position) -> Self {
        Self {
            start: pos,
            end: pos,
            collapsed: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Before,
    After,
}

/// Resolve a raw host point down to a normalized position. Walks through
/// container children at the given offset until a leaf or an out-of-range
/// terminal is reached.
pub fn normalize_point(doc: &Document, point: RawPoint) -> Option<Position> {
    if !doc.is_alive(point.node) {
        return None;
    }
    let mut node = point.node;
    let mut offset = point.offset.min(doc.offset_len(point.node));
    loop {
        if doc.is_text_run(node) {
            let len = doc.text_char_len(node);
            return Some(Position {
                container: node,
                offset: offset.min(len),
                anchor: node,
            });
        }
        if doc.is_container(node) {
            let children = doc.children(node);
            if children.is_empty() {
                return Some(Position {
                    container: node,
                    offset: 0,
                    anchor: node,
                });
            }
            if offset < children.len() {
                let child = children[offset];
                if doc.is_text_run(child) || doc.is_container(child) {
                    node = child;
                    offset = 0;
                    continue;
                }
                // Atomic or break leaf: the structural parent stays the
                // container, offset indexes the leaf.
                return Some(Position {
                    container: node,
                    offset,
                    anchor: child,
                });
            }
            // Offset at or past the end: terminal is the last child's end.
            let child = *children.last().expect("non-empty checked above");
            if doc.is_text_run(child) {
                let len = doc.text_char_len(child);
                return Some(Position {
                    container: child,
                    offset: len,
                    anchor: child,
                });
            }
            if doc.is_container(child) {
                offset = doc.child_count(child);
                node = child;
                continue;
            }
            return Some(Position {
                container: node,
                offset: children.len(),
                anchor: child,
            });
        }
        // A raw point directly on an atomic/break: express it through the
        // parent so the container invariant holds.
        let parent = doc.parent(node)?;
        let idx = doc.index_in_parent(node)?;
        return Some(Position {
            container: parent,
            offset: idx + offset.min(1),
            anchor: node,
        });
    }
}

/// Read the host selection and normalize both endpoints, ordering them into
/// document order. Returns `None` when there is no selection or an endpoint
/// is stale.
pub fn current_range(doc: &Document) -> Option<Range> {
    let sel = doc.selection()?;
    let a = normalize_point(doc, sel.anchor)?;
    let b = normalize_point(doc, sel.focus)?;
    let (start, end) = if position_path(doc, &a) <= position_path(doc, &b) {
        (a, b)
    } else {
        (b, a)
    };
    let collapsed = start.container == end.container && start.offset == end.offset;
    Some(Range {
        start,
        end,
        collapsed,
    })
}

/// Structural comparison path: child indices from the root down to the
/// container, with the in-container offset appended. Lexicographic order on
/// these paths is document order.
pub fn position_path(doc: &Document, pos: &Position) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut cur = pos.container;
    while let Some(parent) = doc.parent(cur) {
        if let Some(idx) = doc.index_in_parent(cur) {
            indices.push(idx);
        }
        cur = parent;
    }
    indices.reverse();
    indices.push(pos.offset);
    indices
}

/// Place a collapsed cursor immediately before or after a node. Clears any
/// existing range first; calling twice with the same arguments is a no-op
/// with the same result.
pub fn set_cursor(doc: &mut Document, node: NodeId, edge: Edge) -> bool {
    if !doc.is_alive(node) {
        return false;
    }
    let Some(parent) = doc.parent(node) else {
        return false;
    };
    let Some(idx) = doc.index_in_parent(node) else {
        return false;
    };
    let offset = match edge {
        Edge::Before => idx,
        Edge::After => idx + 1,
    };
    doc.clear_selection();
    doc.collapse_selection_to(RawPoint {
        node: parent,
        offset,
    })
    .is_ok()
}

/// Place the cursor (or a range) at character/child offsets inside a node.
pub fn set_cursor_offsets(
    doc: &mut Document,
    node: NodeId,
    start: usize,
    end: Option<usize>,
) -> bool {
    if !doc.is_alive(node) {
        return false;
    }
    let len = doc.offset_len(node);
    let start = start.min(len);
    let end = end.unwrap_or(start).min(len);
    doc.clear_selection();
    doc.set_selection(RawSelection {
        anchor: RawPoint {
            node,
            offset: start,
        },
        focus: RawPoint { node, offset: end },
    })
    .is_ok()
}

/// Relocate the cursor to the last Line's trailing content: before a break
/// marker (so the next character insertion lands correctly), after any
/// other leaf. Used when a computed position has no enclosing Line.
///
/// A root with no children at all is an invariant violation: logged, no-op.
pub fn amend_position(doc: &mut Document) -> bool {
    let Some(line) = doc.last_line() else {
        warn!(target: "position", "amend failed: document has no line children");
        return false;
    };
    let Some(mut leaf) = doc.children(line).last().copied() else {
        // Line invariant broken too; repopulate and park before the marker.
        doc.ensure_line_populated(line);
        let marker = doc.children(line)[0];
        return set_cursor(doc, marker, Edge::Before);
    };
    // Trailing leaf may sit inside a foreign wrapper.
    let mut depth = 0;
    while doc.is_container(leaf) && !doc.children(leaf).is_empty() && depth < MAX_ANCESTOR_DEPTH {
        leaf = *doc.children(leaf).last().expect("non-empty checked");
        depth += 1;
    }
    if doc.is_break(leaf) {
        set_cursor(doc, leaf, Edge::Before)
    } else if doc.is_text_run(leaf) {
        let len = doc.text_char_len(leaf);
        set_cursor_offsets(doc, leaf, len, None)
    } else {
        set_cursor(doc, leaf, Edge::After)
    }
}

/// Sibling content strictly before and after a position, scoped to the
/// enclosing Line: the pivot text run is split at the offset first, then
/// both lists walk outward through non-Line ancestors. Empty fragments and
/// bare break markers are filtered. `before` and `after` are nearest-first,
/// so `before.first()` is the node immediately preceding the cursor.
pub fn surrounding_nodes(doc: &mut Document, range: &Range) -> Option<(Vec<NodeId>, Vec<NodeId>)> {
    let pos = range.start;
    let mut before: Vec<NodeId> = Vec::new();
    let mut after: Vec<NodeId> = Vec::new();

    // Seed from the container, establishing the climb origin.
    let climb_from: NodeId;
    if doc.is_text_run(pos.container) {
        let parent = doc.parent(pos.container)?;
        let idx = doc.index_in_parent(pos.container)?;
        let len = doc.text_char_len(pos.container);
        let (head_end, tail_start) = if pos.offset == 0 {
            (idx, idx) // whole run follows the cursor
        } else if pos.offset >= len {
            (idx + 1, idx + 1) // whole run precedes the cursor
        } else {
            split::split_text_run(doc, &pos)?;
            (idx + 1, idx + 1) // head at idx, clone at idx + 1
        };
        let children = doc.children(parent).to_vec();
        before.extend(children[..head_end].iter().rev());
        after.extend(&children[tail_start..]);
        climb_from = parent;
    } else {
        let children = doc.children(pos.container).to_vec();
        let offset = pos.offset.min(children.len());
        before.extend(children[..offset].iter().rev());
        after.extend(&children[offset..]);
        climb_from = pos.container;
    }

    // Walk outward while the ancestor is not itself a Line so the lists stay
    // scoped to the current line.
    let mut cur = climb_from;
    let mut depth = 0;
    while !doc.is_line(cur) {
        let parent = doc.parent(cur)?;
        let idx = doc.index_in_parent(cur)?;
        let siblings = doc.children(parent).to_vec();
        before.extend(siblings[..idx].iter().rev());
        after.extend(&siblings[idx + 1..]);
        cur = parent;
        depth += 1;
        if depth > MAX_ANCESTOR_DEPTH {
            return None;
        }
    }

    let keep = |doc: &Document, id: NodeId| {
        !doc.is_break(id) && !(doc.is_text_run(id) && doc.text_char_len(id) == 0)
    };
    before.retain(|&id| keep(doc, id));
    after.retain(|&id| keep(doc, id));
    Some((before, after))
}

/// Select the whole document: anchor at the first leaf's start, focus at
/// the last leaf's end.
pub fn select_all(doc: &mut Document) -> bool {
    let Some(first) = doc.first_leaf() else {
        return false;
    };
    let Some(last) = doc.last_leaf() else {
        return false;
    };
    let anchor = if doc.is_text_run(first) {
        RawPoint {
            node: first,
            offset: 0,
        }
    } else {
        match (doc.parent(first), doc.index_in_parent(first)) {
            (Some(parent), Some(idx)) => RawPoint {
                node: parent,
                offset: idx,
            },
            _ => return false,
        }
    };
    let focus = if doc.is_text_run(last) {
        RawPoint {
            node: last,
            offset: doc.text_char_len(last),
        }
    } else {
        match (doc.parent(last), doc.index_in_parent(last)) {
            (Some(parent), Some(idx)) => RawPoint {
                node: parent,
                offset: idx + 1,
            },
            _ => return false,
        }
    };
    doc.clear_selection();
    doc.set_selection(RawSelection { anchor, focus }).is_ok()
}

/// Structural index path for history restoration: line index, child index,
/// and the character offset within the child (zero for non-text anchors).
pub fn line_child_path(doc: &Document, pos: &Position) -> Option<(usize, usize, usize)> {
    let line = doc.enclosing_line(pos.anchor).or_else(|| doc.enclosing_line(pos.container))?;
    let line_idx = doc.lines().iter().position(|&l| l == line)?;
    if doc.is_text_run(pos.container) {
        // The container may be nested; track the top-level child it lives in.
        let mut top = pos.container;
        while doc.parent(top)? != line {
            top = doc.parent(top)?;
        }
        let child_idx = doc.index_in_parent(top)?;
        Some((line_idx, child_idx, pos.offset))
    } else {
        let child_idx = pos.offset.min(doc.child_count(pos.container).saturating_sub(1));
        Some((line_idx, child_idx, 0))
    }
}

/// Byte offset of the `n`th grapheme boundary in `s` (clamped).
pub fn grapheme_byte_offset(s: &str, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    s.grapheme_indices(true)
        .nth(n)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_dom::AtomicPayload;

    fn doc_with_text(text: &str) -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_text(text);
        doc.append_child(line, run);
        doc.strip_redundant_breaks(line);
        (doc, line, run)
    }

    #[test]
    fn normalize_descends_container_point_to_text_leaf() {
        let (doc, line, run) = doc_with_text("hello");
        let pos = normalize_point(
            &doc,
            RawPoint {
                node: line,
                offset: 0,
            },
        )
        .unwrap();
        assert_eq!(pos.container, run);
        assert_eq!(pos.offset, 0);
        assert_eq!(pos.anchor, run);
    }

    #[test]
    fn normalize_past_end_lands_at_text_end() {
        let (doc, line, run) = doc_with_text("hello");
        let pos = normalize_point(
            &doc,
            RawPoint {
                node: line,
                offset: 9,
            },
        )
        .unwrap();
        assert_eq!(pos.container, run);
        assert_eq!(pos.offset, 5);
    }

    #[test]
    fn normalize_keeps_structural_container_for_atomic() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let emoji = doc.create_atomic(AtomicPayload::Emoji {
            name: "smile".into(),
            src: "u".into(),
        });
        doc.append_child(line, emoji);
        doc.strip_redundant_breaks(line);
        let pos = normalize_point(
            &doc,
            RawPoint {
                node: line,
                offset: 0,
            },
        )
        .unwrap();
        assert_eq!(pos.container, line);
        assert_eq!(pos.offset, 0);
        assert_eq!(pos.anchor, emoji);
    }

    #[test]
    fn current_range_orders_backwards_selection() {
        let (mut doc, _line, run) = doc_with_text("hello");
        doc.set_selection(RawSelection {
            anchor: RawPoint {
                node: run,
                offset: 4,
            },
            focus: RawPoint {
                node: run,
                offset: 1,
            },
        })
        .unwrap();
        let range = current_range(&doc).unwrap();
        assert_eq!(range.start.offset, 1);
        assert_eq!(range.end.offset, 4);
        assert!(!range.collapsed);
    }

    #[test]
    fn set_cursor_is_idempotent() {
        let (mut doc, _line, run) = doc_with_text("hello");
        assert!(set_cursor(&mut doc, run, Edge::After));
        let first = doc.selection().unwrap();
        assert!(set_cursor(&mut doc, run, Edge::After));
        assert_eq!(doc.selection().unwrap(), first);
    }

    #[test]
    fn amend_position_parks_before_trailing_break() {
        let mut doc = Document::new();
        assert!(amend_position(&mut doc));
        let sel = doc.selection().unwrap();
        let line = doc.first_line().unwrap();
        assert_eq!(sel.anchor.node, line);
        assert_eq!(sel.anchor.offset, 0);
    }

    #[test]
    fn amend_position_continues_trailing_run() {
        let (mut doc, _line, run) = doc_with_text("hey");
        assert!(amend_position(&mut doc));
        let range = current_range(&doc).unwrap();
        assert_eq!(range.start.container, run);
        assert_eq!(range.start.offset, 3);
    }

    #[test]
    fn surrounding_splits_run_and_scopes_to_line() {
        let (mut doc, line, run) = doc_with_text("abcd");
        let pos = Position {
            container: run,
            offset: 2,
            anchor: run,
        };
        let (before, after) = surrounding_nodes(&mut doc, &Range::caret(pos)).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 1);
        assert_eq!(doc.text(before[0]), Some("ab"));
        assert_eq!(doc.text(after[0]), Some("cd"));
        assert_eq!(doc.child_count(line), 2);
    }

    #[test]
    fn surrounding_filters_breaks_and_empties() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let pos = normalize_point(
            &doc,
            RawPoint {
                node: line,
                offset: 0,
            },
        )
        .unwrap();
        let (before, after) = surrounding_nodes(&mut doc, &Range::caret(pos)).unwrap();
        assert!(before.is_empty());
        assert!(after.is_empty());
    }

    #[test]
    fn surrounding_at_run_start_keeps_whole_run_after() {
        let (mut doc, _line, run) = doc_with_text("abcd");
        let pos = Position {
            container: run,
            offset: 0,
            anchor: run,
        };
        let (before, after) = surrounding_nodes(&mut doc, &Range::caret(pos)).unwrap();
        assert!(before.is_empty());
        assert_eq!(after, vec![run]);
    }

    #[test]
    fn line_child_path_tracks_top_level_index() {
        let (mut doc, line, run) = doc_with_text("hello");
        let emoji = doc.create_atomic(AtomicPayload::Emoji {
            name: "smile".into(),
            src: "u".into(),
        });
        doc.append_child(line, emoji);
        let pos = Position {
            container: run,
            offset: 3,
            anchor: run,
        };
        assert_eq!(line_child_path(&doc, &pos), Some((0, 0, 3)));
    }
}
