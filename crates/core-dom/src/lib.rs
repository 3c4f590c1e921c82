//! Arena-backed document tree for the chat input engine.
//!
//! The document is a two-level structure: a root whose children are Line
//! nodes, each Line owning an ordered run of inline children (text runs,
//! atomic emoji/image nodes, break markers). Node kinds are a tagged union
//! discriminated by [`NodeKind`]; classification everywhere goes through the
//! predicates on [`Document`] rather than matching in callers, so the same
//! primitive (an image) can act as a pasted image or a decorative emoji
//! depending on its payload tag.
//!
//! Invariants maintained (and opportunistically repaired) here:
//! * the root always has at least one Line child, and its first child is a
//!   Line (never a stray inline node);
//! * every Line has at least one child; an empty Line carries a single
//!   break marker;
//! * removed nodes are tombstoned, never reused, so stale `NodeId`s held by
//!   a selection or a history path are detectable via [`Document::is_alive`].
//!
//! The document also owns the pieces of host-surface state the engine cannot
//! abstract away: the live selection register (anchor/focus raw points) and
//! the off-tree encoding side-map keyed by image handles.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

pub mod emoji;
pub mod serialize;

pub use emoji::{EmojiCatalog, Piece};

/// Bound on upward parent walks. Foreign markup pasted into the tree can be
/// unexpectedly deep; the walk gives up past this many levels instead of
/// scanning to the root.
pub const MAX_ANCESTOR_DEPTH: usize = 5;

/// Opaque handle into the document arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Style attributes preserved through paste sanitization on text runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextStyle {
    pub color: Option<String>,
}

impl TextStyle {
    pub fn is_plain(&self) -> bool {
        self.color.is_none()
    }
}

/// Payload of an indivisible inline unit. The cursor can never land inside
/// one of these; placement always resolves to before or after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicPayload {
    /// Decorative emoji with a stable name and a direct source URL.
    Emoji { name: String, src: String },
    /// User-pasted image carrying a content handle; the handle resolves to a
    /// persisted encoding through the document's side-map.
    Image { handle: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Line,
    Text {
        text: String,
        style: Option<TextStyle>,
    },
    Atomic(AtomicPayload),
    /// Placeholder break marker keeping an otherwise-empty Line addressable.
    Break,
    /// Untagged wrapper introduced by host auto-merge or foreign paste
    /// markup. Stripped by the keyup sanitizer.
    Foreign { tag: String },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    node: Node,
    alive: bool,
}

/// A raw selection endpoint as the host surface reports it: a container node
/// and an offset (character offset for text runs, child index otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPoint {
    pub node: NodeId,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSelection {
    pub anchor: RawPoint,
    pub focus: RawPoint,
}

impl RawSelection {
    pub fn caret(point: RawPoint) -> Self {
        Self {
            anchor: point,
            focus: point,
        }
    }

    pub fn is_caret(&self) -> bool {
        self.anchor == self.focus
    }
}

#[derive(Debug, Error)]
pub enum DomError {
    #[error("node is no longer part of the document")]
    DeadNode,
    #[error("offset {offset} out of bounds for node")]
    OffsetOutOfBounds { offset: usize },
}

/// The document tree plus the host-surface state it carries.
pub struct Document {
    slots: Vec<Slot>,
    root: NodeId,
    selection: Option<RawSelection>,
    encodings: HashMap<String, String>,
    focused: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A fresh document in the canonical empty state: one Line holding one
    /// break marker, caret parked before the marker.
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            root: NodeId(0),
            selection: None,
            encodings: HashMap::new(),
            focused: false,
        };
        let root = doc.alloc(NodeKind::Root);
        doc.root = root;
        let line = doc.create_line(false);
        doc.append_child(root, line);
        doc.selection = Some(RawSelection::caret(RawPoint {
            node: line,
            offset: 0,
        }));
        doc
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Slot {
            node: Node {
                kind,
                parent: None,
                children: Vec::new(),
            },
            alive: true,
        });
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        debug_assert!(self.slots[id.index()].alive, "access to tombstoned node");
        &self.slots[id.index()].node
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        debug_assert!(self.slots[id.index()].alive, "access to tombstoned node");
        &mut self.slots[id.index()].node
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        id.index() < self.slots.len() && self.slots[id.index()].alive
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.node(id).children.len()
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.node(id).parent?;
        self.node(parent).children.iter().position(|&c| c == id)
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        let idx = self.index_in_parent(id)?;
        let parent = self.parent(id)?;
        if idx == 0 {
            None
        } else {
            Some(self.children(parent)[idx - 1])
        }
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let idx = self.index_in_parent(id)?;
        let parent = self.parent(id)?;
        self.children(parent).get(idx + 1).copied()
    }

    // ---------------------------------------------------------------------
    // Constructors
    // ---------------------------------------------------------------------

    /// Create a Line. `empty = false` yields the normal shape with a single
    /// break marker; `empty = true` yields a childless Line the caller must
    /// populate before the operation returns (used mid-algorithm to avoid
    /// double markers).
    pub fn create_line(&mut self, empty: bool) -> NodeId {
        let line = self.alloc(NodeKind::Line);
        if !empty {
            let marker = self.alloc(NodeKind::Break);
            self.append_child(line, marker);
        }
        line
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Text {
            text: text.into(),
            style: None,
        })
    }

    pub fn create_styled_text(&mut self, text: impl Into<String>, style: TextStyle) -> NodeId {
        self.alloc(NodeKind::Text {
            text: text.into(),
            style: Some(style),
        })
    }

    pub fn create_atomic(&mut self, payload: AtomicPayload) -> NodeId {
        self.alloc(NodeKind::Atomic(payload))
    }

    pub fn create_break(&mut self) -> NodeId {
        self.alloc(NodeKind::Break)
    }

    pub fn create_foreign(&mut self, tag: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Foreign { tag: tag.into() })
    }

    // ---------------------------------------------------------------------
    // Classification predicates
    // ---------------------------------------------------------------------

    pub fn is_line(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Line)
    }

    pub fn is_text_run(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Text { .. })
    }

    pub fn is_atomic(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Atomic(_))
    }

    pub fn is_emoji(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Atomic(AtomicPayload::Emoji { .. }))
    }

    pub fn is_image(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Atomic(AtomicPayload::Image { .. }))
    }

    pub fn is_break(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Break)
    }

    pub fn is_foreign(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Foreign { .. })
    }

    /// True for nodes whose offset indexes children rather than characters.
    pub fn is_container(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Root | NodeKind::Line | NodeKind::Foreign { .. })
    }

    /// Bounded upward walk to the nearest enclosing Line. Positions whose
    /// walk fails are invalid and must be amended before use.
    pub fn enclosing_line(&self, id: NodeId) -> Option<NodeId> {
        if !self.is_alive(id) {
            return None;
        }
        let mut current = id;
        for _ in 0..=MAX_ANCESTOR_DEPTH {
            if self.is_line(current) {
                return Some(current);
            }
            current = self.parent(current)?;
        }
        None
    }

    // ---------------------------------------------------------------------
    // Text access
    // ---------------------------------------------------------------------

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn set_node_text(&mut self, id: NodeId, new_text: impl Into<String>) {
        if let NodeKind::Text { text, .. } = &mut self.node_mut(id).kind {
            *text = new_text.into();
        }
    }

    pub fn text_style(&self, id: NodeId) -> Option<&TextStyle> {
        match self.kind(id) {
            NodeKind::Text { style, .. } => style.as_ref(),
            _ => None,
        }
    }

    /// Character count of a text run, in extended grapheme clusters.
    pub fn text_char_len(&self, id: NodeId) -> usize {
        self.text(id).map(|t| t.graphemes(true).count()).unwrap_or(0)
    }

    /// Offset length used by selection clamping: characters for text runs,
    /// child count for containers, zero for atomics and breaks.
    pub fn offset_len(&self, id: NodeId) -> usize {
        match self.kind(id) {
            NodeKind::Text { .. } => self.text_char_len(id),
            NodeKind::Root | NodeKind::Line | NodeKind::Foreign { .. } => self.child_count(id),
            NodeKind::Atomic(_) | NodeKind::Break => 0,
        }
    }

    // ---------------------------------------------------------------------
    // Tree mutation
    // ---------------------------------------------------------------------

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    pub fn insert_child_at(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        let children = &mut self.node_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    pub fn insert_before(&mut self, reference: NodeId, child: NodeId) -> bool {
        let Some(parent) = self.parent(reference) else {
            return false;
        };
        let Some(idx) = self.index_in_parent(reference) else {
            return false;
        };
        self.insert_child_at(parent, idx, child);
        true
    }

    pub fn insert_after(&mut self, reference: NodeId, child: NodeId) -> bool {
        let Some(parent) = self.parent(reference) else {
            return false;
        };
        let Some(idx) = self.index_in_parent(reference) else {
            return false;
        };
        self.insert_child_at(parent, idx + 1, child);
        true
    }

    /// Unlink a node from its parent without destroying it. The node stays
    /// alive and can be re-attached elsewhere (line merges, history replay).
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            let children = &mut self.node_mut(parent).children;
            children.retain(|&c| c != id);
            self.node_mut(id).parent = None;
        }
    }

    /// Detach and tombstone a whole subtree. Selection endpoints pointing
    /// into the subtree are dropped so later reads see no stale range.
    pub fn remove_subtree(&mut self, id: NodeId) {
        self.detach(id);
        self.tombstone(id);
        self.sanitize_selection();
    }

    fn tombstone(&mut self, id: NodeId) {
        let children = self.node(id).children.clone();
        for child in children {
            self.tombstone(child);
        }
        self.slots[id.index()].alive = false;
    }

    /// Detach every child of `parent` and return them in order, alive.
    pub fn take_children(&mut self, parent: NodeId) -> Vec<NodeId> {
        let children = self.node(parent).children.clone();
        for &child in &children {
            self.node_mut(child).parent = None;
        }
        self.node_mut(parent).children.clear();
        children
    }

    /// Reset to the canonical empty state, sweeping the encoding side-map.
    pub fn clear(&mut self) {
        let old = self.take_children(self.root);
        for child in old {
            self.tombstone(child);
        }
        let line = self.create_line(false);
        let root = self.root;
        self.append_child(root, line);
        self.selection = Some(RawSelection::caret(RawPoint {
            node: line,
            offset: 0,
        }));
        self.sweep_encodings();
    }

    // ---------------------------------------------------------------------
    // Line-level queries
    // ---------------------------------------------------------------------

    pub fn lines(&self) -> &[NodeId] {
        self.children(self.root)
    }

    pub fn first_line(&self) -> Option<NodeId> {
        self.lines().iter().copied().find(|&l| self.is_line(l))
    }

    pub fn last_line(&self) -> Option<NodeId> {
        self.lines().iter().rev().copied().find(|&l| self.is_line(l))
    }

    /// A Line is semantically empty when it carries no text characters and
    /// no atomic nodes, only break markers and empty runs.
    pub fn is_semantically_empty_line(&self, line: NodeId) -> bool {
        self.children(line).iter().all(|&c| match self.kind(c) {
            NodeKind::Break => true,
            NodeKind::Text { text, .. } => text.is_empty(),
            NodeKind::Atomic(_) => false,
            NodeKind::Line | NodeKind::Root => false,
            NodeKind::Foreign { .. } => self.is_semantically_empty_line(c),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.lines().iter().all(|&l| self.is_semantically_empty_line(l))
    }

    /// Exactly the `<p><br></p>` shape: one Line child holding one break.
    pub fn is_canonical_empty(&self) -> bool {
        let lines = self.lines();
        lines.len() == 1
            && self.is_line(lines[0])
            && self.children(lines[0]).len() == 1
            && self.is_break(self.children(lines[0])[0])
    }

    /// Total character length: text graphemes plus one per atomic node,
    /// plus one per line boundary when `count_line_breaks` is set.
    pub fn char_len(&self, count_line_breaks: bool) -> usize {
        let mut total = 0;
        let mut line_count = 0;
        for &line in self.lines() {
            if !self.is_line(line) {
                continue;
            }
            line_count += 1;
            for &child in self.children(line) {
                match self.kind(child) {
                    NodeKind::Text { .. } => total += self.text_char_len(child),
                    NodeKind::Atomic(_) => total += 1,
                    _ => {}
                }
            }
        }
        if count_line_breaks && line_count > 1 {
            total += line_count - 1;
        }
        total
    }

    pub fn emoji_count(&self) -> usize {
        let mut n = 0;
        for &line in self.lines() {
            for &child in self.children(line) {
                if self.is_emoji(child) {
                    n += 1;
                }
            }
        }
        n
    }

    /// First addressable leaf in document order.
    pub fn first_leaf(&self) -> Option<NodeId> {
        let line = self.first_line()?;
        self.children(line).first().copied()
    }

    /// Last addressable leaf in document order.
    pub fn last_leaf(&self) -> Option<NodeId> {
        let line = self.last_line()?;
        self.children(line).last().copied()
    }

    // ---------------------------------------------------------------------
    // Invariant repair
    // ---------------------------------------------------------------------

    /// Repair the root-level shape after a risky operation: ensure at least
    /// one Line exists and that no inline node sits directly under the root.
    pub fn repair_root(&mut self) {
        let root = self.root;
        if self.children(root).is_empty() {
            warn!(target: "dom", "root emptied; restoring canonical line");
            let line = self.create_line(false);
            self.append_child(root, line);
            self.selection = Some(RawSelection::caret(RawPoint {
                node: line,
                offset: 0,
            }));
            return;
        }
        // Gather leading/stray inline nodes into a Line so the first child
        // is always a Line.
        let strays: Vec<NodeId> = self
            .children(root)
            .iter()
            .copied()
            .filter(|&c| !self.is_line(c))
            .collect();
        if strays.is_empty() {
            return;
        }
        warn!(target: "dom", count = strays.len(), "inline nodes directly under root; rewrapping");
        let line = self.create_line(true);
        let first_stray_idx = self
            .children(root)
            .iter()
            .position(|&c| !self.is_line(c))
            .unwrap_or(0);
        self.insert_child_at(root, first_stray_idx, line);
        for stray in strays {
            self.append_child(line, stray);
        }
        if self.children(line).is_empty() {
            let marker = self.create_break();
            self.append_child(line, marker);
        }
    }

    /// Guarantee a Line keeps at least one child, appending a break marker
    /// if it was left bare.
    pub fn ensure_line_populated(&mut self, line: NodeId) {
        if self.children(line).is_empty() {
            let marker = self.create_break();
            self.append_child(line, marker);
        }
    }

    /// Drop break markers from a Line that also holds real content.
    pub fn strip_redundant_breaks(&mut self, line: NodeId) {
        if self.child_count(line) <= 1 {
            return;
        }
        let has_content = self
            .children(line)
            .iter()
            .any(|&c| !self.is_break(c) && !(self.is_text_run(c) && self.text_char_len(c) == 0));
        if !has_content {
            return;
        }
        let breaks: Vec<NodeId> = self
            .children(line)
            .iter()
            .copied()
            .filter(|&c| self.is_break(c))
            .collect();
        for b in breaks {
            self.remove_subtree(b);
        }
    }

    // ---------------------------------------------------------------------
    // Selection register (host native-selection analogue)
    // ---------------------------------------------------------------------

    pub fn selection(&self) -> Option<RawSelection> {
        self.selection
    }

    /// Replace the selection. Any prior range is cleared first; endpoints on
    /// dead nodes or out-of-range offsets are rejected.
    pub fn set_selection(&mut self, sel: RawSelection) -> Result<(), DomError> {
        self.selection = None;
        for point in [sel.anchor, sel.focus] {
            if !self.is_alive(point.node) {
                return Err(DomError::DeadNode);
            }
            if point.offset > self.offset_len(point.node) {
                return Err(DomError::OffsetOutOfBounds {
                    offset: point.offset,
                });
            }
        }
        self.selection = Some(sel);
        Ok(())
    }

    pub fn collapse_selection_to(&mut self, point: RawPoint) -> Result<(), DomError> {
        self.set_selection(RawSelection::caret(point))
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Select a whole node as a unit (used when an atomic is clicked so a
    /// following delete treats it as one object).
    pub fn select_node(&mut self, id: NodeId) -> Result<(), DomError> {
        if !self.is_alive(id) {
            return Err(DomError::DeadNode);
        }
        let Some(parent) = self.parent(id) else {
            return Err(DomError::DeadNode);
        };
        let Some(idx) = self.index_in_parent(id) else {
            return Err(DomError::DeadNode);
        };
        self.set_selection(RawSelection {
            anchor: RawPoint {
                node: parent,
                offset: idx,
            },
            focus: RawPoint {
                node: parent,
                offset: idx + 1,
            },
        })
    }

    fn sanitize_selection(&mut self) {
        if let Some(sel) = self.selection
            && (!self.is_alive(sel.anchor.node) || !self.is_alive(sel.focus.node))
        {
            self.selection = None;
        }
    }

    pub fn focus(&mut self) {
        self.focused = true;
    }

    pub fn blur(&mut self) {
        self.focused = false;
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    // ---------------------------------------------------------------------
    // Encoding side-map
    // ---------------------------------------------------------------------

    pub fn register_encoding(&mut self, handle: impl Into<String>, data: impl Into<String>) {
        self.encodings.insert(handle.into(), data.into());
    }

    pub fn encoding(&self, handle: &str) -> Option<&str> {
        self.encodings.get(handle).map(String::as_str)
    }

    pub fn encoding_count(&self) -> usize {
        self.encodings.len()
    }

    /// Drop cached encodings whose handle no longer appears in the tree;
    /// an empty document drops the whole map. Must only run after a change
    /// is fully committed, never while a paste is mid-flight.
    pub fn sweep_encodings(&mut self) {
        if self.encodings.is_empty() {
            return;
        }
        if self.is_empty() {
            let dropped = self.encodings.len();
            self.encodings.clear();
            tracing::trace!(target: "dom", dropped, "encoding_sweep_all");
            return;
        }
        let mut live: Vec<String> = Vec::new();
        for &line in self.lines() {
            for &child in self.children(line) {
                if let NodeKind::Atomic(AtomicPayload::Image { handle }) = self.kind(child) {
                    live.push(handle.clone());
                }
            }
        }
        let before = self.encodings.len();
        self.encodings.retain(|handle, _| live.iter().any(|h| h == handle));
        let dropped = before - self.encodings.len();
        if dropped > 0 {
            tracing::trace!(target: "dom", dropped, "encoding_sweep_orphans");
        }
    }
}
