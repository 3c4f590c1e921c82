//! Snapshot-based undo/redo.
//!
//! Every committed change serializes the whole tree into the delta schema
//! (a line-per-entry list of `{type: text|image|br}` nodes) together with
//! the cursor as a structural path (line index, child index, character
//! offset) so the cursor survives a full tree replacement where node
//! identities do not. Consecutive changes inside the debounce window
//! collapse into one undo entry; a bounded FIFO evicts the oldest entry
//! once the stack overflows.
//!
//! Replay never reuses old nodes: the document's children are rebuilt from
//! the delta wholesale. The `ignore_change` latch keeps the replay's own
//! change notification from re-recording.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use core_config::HistoryConfig;
use core_dom::{AtomicPayload, Document, NodeKind, TextStyle};
use core_position::current_range;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    Text,
    Image,
    Br,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaAttrs {
    /// Emoji name for decorative atoms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Source URL (emoji) or content handle (pasted image).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Marks a pasted image as opposed to an emoji.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaNode {
    #[serde(rename = "type")]
    pub kind: DeltaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<DeltaAttrs>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub delta: Vec<Vec<DeltaNode>>,
    /// Structural cursor path: line index, then child index.
    pub cursor_path: Vec<usize>,
    /// Character offset within the addressed child (text runs only).
    pub end_offset: usize,
}

impl HistoryEntry {
    /// Bootstrap/clear entries carry no content, only break markers.
    pub fn is_empty_delta(&self) -> bool {
        self.delta
            .iter()
            .all(|line| line.iter().all(|n| matches!(n.kind, DeltaKind::Br)))
    }
}

pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    ignore_change: bool,
    last_record: Option<Instant>,
    config: HistoryConfig,
}

impl History {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            ignore_change: false,
            last_record: None,
            config,
        }
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    /// True while a replay is applying; the commit path must skip
    /// recording.
    pub fn is_replaying(&self) -> bool {
        self.ignore_change
    }

    /// Serialize the current tree and cursor into an entry.
    pub fn capture(doc: &Document) -> HistoryEntry {
        let mut delta = Vec::new();
        for &line in doc.lines() {
            if !doc.is_line(line) {
                continue;
            }
            let mut nodes = Vec::new();
            for &child in doc.children(line) {
                match doc.kind(child) {
                    NodeKind::Text { text, style } => {
                        if text.is_empty() {
                            continue;
                        }
                        nodes.push(DeltaNode {
                            kind: DeltaKind::Text,
                            text: Some(text.clone()),
                            attrs: style.as_ref().and_then(|s| {
                                s.color.as_ref().map(|c| DeltaAttrs {
                                    color: Some(c.clone()),
                                    ..DeltaAttrs::default()
                                })
                            }),
                        });
                    }
                    NodeKind::Atomic(AtomicPayload::Emoji { name, src }) => {
                        nodes.push(DeltaNode {
                            kind: DeltaKind::Image,
                            text: None,
                            attrs: Some(DeltaAttrs {
                                name: Some(name.clone()),
                                src: Some(src.clone()),
                                ..DeltaAttrs::default()
                            }),
                        });
                    }
                    NodeKind::Atomic(AtomicPayload::Image { handle }) => {
                        nodes.push(DeltaNode {
                            kind: DeltaKind::Image,
                            text: None,
                            attrs: Some(DeltaAttrs {
                                src: Some(handle.clone()),
                                image: true,
                                ..DeltaAttrs::default()
                            }),
                        });
                    }
                    NodeKind::Break => nodes.push(DeltaNode {
                        kind: DeltaKind::Br,
                        text: None,
                        attrs: None,
                    }),
                    // Foreign wrappers are transient sanitizer input and
                    // never recorded.
                    _ => {}
                }
            }
            delta.push(nodes);
        }
        let (cursor_path, end_offset) = current_range(doc)
            .and_then(|range| core_position::line_child_path(doc, &range.start))
            .map(|(line, child, offset)| (vec![line, child], offset))
            .unwrap_or((vec![0, 0], 0));
        HistoryEntry {
            delta,
            cursor_path,
            end_offset,
        }
    }

    /// Record a committed change. Returns `false` while replaying or when
    /// the change was coalesced into the previous entry.
    pub fn record(&mut self, doc: &Document, now: Instant) -> bool {
        if self.ignore_change {
            return false;
        }
        let entry = Self::capture(doc);
        if self.undo.back() == Some(&entry) {
            trace!(target: "history", depth = self.undo.len(), "record_dedupe_skip");
            return false;
        }
        let window = Duration::from_millis(self.config.debounce_ms);
        let coalesce = self
            .last_record
            .is_some_and(|last| now.duration_since(last) < window)
            && self.undo.len() > 1;
        self.redo.clear();
        self.last_record = Some(now);
        if coalesce {
            if let Some(top) = self.undo.back_mut() {
                *top = entry;
                trace!(target: "history", depth = self.undo.len(), "record_coalesced");
                return false;
            }
        }
        self.undo.push_back(entry);
        if self.undo.len() > self.config.max_depth {
            self.undo.pop_front();
            trace!(target: "history", "undo_stack_trimmed");
        }
        trace!(target: "history", depth = self.undo.len(), "record_push");
        true
    }

    /// Record the bootstrap (empty) state; exempt from debouncing so the
    /// first real edit never coalesces into it.
    pub fn record_initial(&mut self, doc: &Document) {
        if self.undo.is_empty() {
            self.undo.push_back(Self::capture(doc));
        }
    }

    /// Pop to the previous entry and replay it. Returns `false` when
    /// nothing is left to undo.
    pub fn undo(&mut self, doc: &mut Document) -> bool {
        if self.undo.len() <= 1 {
            return false;
        }
        let current = self.undo.pop_back().expect("len checked");
        self.redo.push(current);
        let target = self.undo.back().expect("len checked").clone();
        trace!(target: "history", undo_depth = self.undo.len(), redo_depth = self.redo.len(), "undo_pop");
        self.replay(doc, &target);
        true
    }

    /// Re-apply the most recently undone entry.
    pub fn redo(&mut self, doc: &mut Document) -> bool {
        let Some(entry) = self.redo.pop() else {
            return false;
        };
        trace!(target: "history", undo_depth = self.undo.len(), redo_depth = self.redo.len(), "redo_pop");
        self.replay(doc, &entry);
        self.undo.push_back(entry);
        true
    }

    fn replay(&mut self, doc: &mut Document, entry: &HistoryEntry) {
        self.ignore_change = true;
        if entry.is_empty_delta() {
            // Bootstrap/clear state: reset and focus rather than rebuild.
            doc.clear();
            doc.focus();
            self.ignore_change = false;
            return;
        }
        let old = doc.take_children(doc.root());
        for line in old {
            doc.remove_subtree(line);
        }
        let root = doc.root();
        for line_nodes in &entry.delta {
            let line = doc.create_line(true);
            for node in line_nodes {
                let built = match node.kind {
                    DeltaKind::Text => {
                        let text = node.text.clone().unwrap_or_default();
                        match node.attrs.as_ref().and_then(|a| a.color.clone()) {
                            Some(color) => doc.create_styled_text(
                                text,
                                TextStyle { color: Some(color) },
                            ),
                            None => doc.create_text(text),
                        }
                    }
                    DeltaKind::Image => {
                        let attrs = node.attrs.clone().unwrap_or_default();
                        if attrs.image {
                            doc.create_atomic(AtomicPayload::Image {
                                handle: attrs.src.unwrap_or_default(),
                            })
                        } else {
                            doc.create_atomic(AtomicPayload::Emoji {
                                name: attrs.name.unwrap_or_default(),
                                src: attrs.src.unwrap_or_default(),
                            })
                        }
                    }
                    DeltaKind::Br => doc.create_break(),
                };
                doc.append_child(line, built);
            }
            doc.ensure_line_populated(line);
            doc.append_child(root, line);
        }
        doc.repair_root();
        self.restore_cursor(doc, entry);
        self.ignore_change = false;
    }

    fn restore_cursor(&self, doc: &mut Document, entry: &HistoryEntry) {
        let line_idx = entry.cursor_path.first().copied().unwrap_or(0);
        let child_idx = entry.cursor_path.get(1).copied().unwrap_or(0);
        let lines = doc.lines().to_vec();
        let Some(&line) = lines.get(line_idx.min(lines.len().saturating_sub(1))) else {
            return;
        };
        let children = doc.children(line).to_vec();
        let Some(&child) = children.get(child_idx.min(children.len().saturating_sub(1))) else {
            return;
        };
        if doc.is_text_run(child) {
            core_position::set_cursor_offsets(doc, child, entry.end_offset, None);
        } else if doc.is_break(child) {
            core_position::set_cursor(doc, child, core_position::Edge::Before);
        } else {
            core_position::set_cursor(doc, child, core_position::Edge::After);
        }
    }
}
