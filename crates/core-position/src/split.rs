//! Text-run splitting at a character offset.
//!
//! Used when a line feed or a deletion lands inside a (possibly styled)
//! run: the style is cloned onto a new run, trailing content moves into the
//! clone, and the clone lands immediately after the original. The clone's
//! sibling index is returned so callers can derive path-based offsets.

use core_dom::{Document, NodeId, RawSelection, TextStyle};

use crate::{Position, grapheme_byte_offset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitOutcome {
    pub head: NodeId,
    pub clone: NodeId,
    pub clone_index: usize,
}

/// Split `pos.container` (a text run) at `pos.offset` graphemes. Returns
/// `None` when the position is not inside a run (offset at either edge, or
/// a non-text container); no mutation happens in that case.
pub fn split_text_run(doc: &mut Document, pos: &Position) -> Option<SplitOutcome> {
    let run = pos.container;
    let text = doc.text(run)?.to_string();
    let len = doc.text_char_len(run);
    if pos.offset == 0 || pos.offset >= len {
        return None;
    }
    let byte = grapheme_byte_offset(&text, pos.offset);
    let (head_text, tail_text) = text.split_at(byte);
    let head_text = head_text.to_string();
    let tail_text = tail_text.to_string();

    let style: Option<TextStyle> = doc.text_style(run).cloned();
    doc.set_node_text(run, head_text);
    let clone = match style {
        Some(style) => doc.create_styled_text(tail_text, style),
        None => doc.create_text(tail_text),
    };
    if !doc.insert_after(run, clone) {
        return None;
    }
    let clone_index = doc.index_in_parent(clone)?;

    // Selection points past the split boundary now belong to the clone.
    if let Some(mut sel) = doc.selection() {
        let mut changed = false;
        for point in [&mut sel.anchor, &mut sel.focus] {
            if point.node == run && point.offset > pos.offset {
                point.node = clone;
                point.offset -= pos.offset;
                changed = true;
            }
        }
        if changed {
            let _ = doc.set_selection(RawSelection {
                anchor: sel.anchor,
                focus: sel.focus,
            });
        }
    }

    Some(SplitOutcome {
        head: run,
        clone,
        clone_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_dom::RawPoint;

    #[test]
    fn split_preserves_style_on_clone() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_styled_text(
            "colored",
            TextStyle {
                color: Some("#ff0000".into()),
            },
        );
        doc.append_child(line, run);
        doc.strip_redundant_breaks(line);
        let out = split_text_run(
            &mut doc,
            &Position {
                container: run,
                offset: 3,
                anchor: run,
            },
        )
        .unwrap();
        assert_eq!(doc.text(out.head), Some("col"));
        assert_eq!(doc.text(out.clone), Some("ored"));
        assert_eq!(
            doc.text_style(out.clone).and_then(|s| s.color.as_deref()),
            Some("#ff0000")
        );
        assert_eq!(out.clone_index, 1);
    }

    #[test]
    fn split_at_edges_is_a_no_op() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_text("abc");
        doc.append_child(line, run);
        for offset in [0, 3] {
            assert!(
                split_text_run(
                    &mut doc,
                    &Position {
                        container: run,
                        offset,
                        anchor: run,
                    },
                )
                .is_none()
            );
        }
        assert_eq!(doc.text(run), Some("abc"));
    }

    #[test]
    fn split_remaps_selection_into_clone() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_text("abcdef");
        doc.append_child(line, run);
        doc.strip_redundant_breaks(line);
        doc.collapse_selection_to(RawPoint {
            node: run,
            offset: 5,
        })
        .unwrap();
        let out = split_text_run(
            &mut doc,
            &Position {
                container: run,
                offset: 2,
                anchor: run,
            },
        )
        .unwrap();
        let sel = doc.selection().unwrap();
        assert_eq!(sel.anchor.node, out.clone);
        assert_eq!(sel.anchor.offset, 3);
    }

    #[test]
    fn split_is_grapheme_aware() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_text("aé😀b");
        doc.append_child(line, run);
        doc.strip_redundant_breaks(line);
        let out = split_text_run(
            &mut doc,
            &Position {
                container: run,
                offset: 2,
                anchor: run,
            },
        )
        .unwrap();
        assert_eq!(doc.text(out.head), Some("aé"));
        assert_eq!(doc.text(out.clone), Some("😀b"));
    }
}
