//! Input/composition controller.
//!
//! Turns raw host events (keys, IME composition phases, clipboard
//! commands, mouse hits) into structural edit operations, enforcing the
//! ordering rules that keep the tree coherent:
//!
//! * composition suspension always wins: no insertion is dispatched while
//!   the IME is composing (the one exception being the length
//!   interceptor's correction, which runs synchronously inside the
//!   composition-end handler);
//! * line feeds and pastes are mutually exclusive with themselves via
//!   single-writer latches; a re-entrant attempt is dropped, not queued;
//! * backspace and select-all are suppressed while the document sits in
//!   its canonical one-empty-line state, protecting the mandatory break
//!   marker.
//!
//! The keyup pass sanitizes damage the host can introduce behind the
//! engine's back: untagged wrapper nodes from native auto-merge, stray
//! break markers on populated lines, and inline nodes that escaped their
//! Line.

use core_config::Options;
use core_dom::{Document, EmojiCatalog, NodeId};
use core_events::{
    COMPOSITION_SUPPRESSED, Emitter, EngineEvent, InputEvent, KeyCode, KeyEvent, KeyModifiers,
    LOCK_REJECTIONS,
};
use core_limit::CompositionSnapshot;
use core_position::current_range;
use std::sync::atomic::Ordering;
use tracing::{debug, trace};

/// Single-writer activity latches. Composing excludes every insertion
/// path; pasting and line-feeding each exclude only their own re-entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Latches {
    pub composing: bool,
    pub pasting: bool,
    pub line_feeding: bool,
}

/// What the controller did with an event; the facade turns `Changed` into a
/// commit (history record + change notification).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Event consumed without touching the document.
    Ignored,
    /// The tree changed; the caller must commit.
    Changed,
    /// Event deliberately swallowed (guard or latch).
    Suppressed,
    /// Selection serialized for the host clipboard.
    Copied(String),
    /// Selection serialized and deleted.
    Cut(String),
    UndoRequested,
    RedoRequested,
}

#[derive(Default)]
pub struct Controller {
    latches: Latches,
    composition: Option<CompositionSnapshot>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latches(&self) -> Latches {
        self.latches
    }

    pub fn is_composing(&self) -> bool {
        self.latches.composing
    }

    /// Acquire the paste lock; a second paste while one is in flight is
    /// dropped, not queued.
    pub fn begin_paste(&mut self) -> bool {
        if self.latches.pasting {
            LOCK_REJECTIONS.fetch_add(1, Ordering::Relaxed);
            debug!(target: "input", "paste dropped: lock held");
            return false;
        }
        self.latches.pasting = true;
        true
    }

    pub fn end_paste(&mut self) {
        self.latches.pasting = false;
    }

    pub fn handle(
        &mut self,
        doc: &mut Document,
        emoji: &EmojiCatalog,
        opts: &Options,
        emitter: &mut Emitter,
        event: InputEvent,
    ) -> Outcome {
        match event {
            InputEvent::KeyDown(key) => self.on_key_down(doc, emoji, opts, emitter, key),
            InputEvent::KeyUp(_) => {
                if sanitize_tree(doc) {
                    Outcome::Changed
                } else {
                    Outcome::Ignored
                }
            }
            InputEvent::BeforeInput { .. } => {
                if self.latches.composing {
                    COMPOSITION_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
                    Outcome::Suppressed
                } else {
                    Outcome::Ignored
                }
            }
            InputEvent::Input { text } => {
                if self.latches.composing {
                    COMPOSITION_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
                    return Outcome::Suppressed;
                }
                replace_selection_first(doc);
                if core_limit::insert_text_intercepted(doc, emoji, opts, emitter, &text, true) {
                    Outcome::Changed
                } else {
                    Outcome::Ignored
                }
            }
            InputEvent::CompositionStart => {
                self.latches.composing = true;
                self.composition = core_limit::snapshot_composition(doc);
                trace!(target: "input", "composition_start");
                Outcome::Ignored
            }
            InputEvent::CompositionUpdate { .. } => Outcome::Ignored,
            InputEvent::CompositionEnd { committed } => {
                self.latches.composing = false;
                trace!(target: "input", committed_len = committed.len(), "composition_end");
                if committed.is_empty() {
                    self.composition = None;
                    return Outcome::Ignored;
                }
                // The host IME has already decided on the committed string;
                // mirror its commit, then run the length correction
                // synchronously before any further keystroke.
                replace_selection_first(doc);
                core_limit::insert_with_amend(doc, emoji, &committed, true);
                if let Some(snapshot) = self.composition.take() {
                    core_limit::correct_after_composition(
                        doc, emoji, opts, emitter, &snapshot, &committed,
                    );
                }
                Outcome::Changed
            }
            InputEvent::Copy => Outcome::Copied(selection_text(doc)),
            InputEvent::Cut => {
                let text = selection_text(doc);
                let changed = current_range(doc)
                    .map(|range| core_edit::delete_range(doc, &range))
                    .unwrap_or(false);
                if changed {
                    Outcome::Cut(text)
                } else {
                    Outcome::Ignored
                }
            }
            InputEvent::MouseDown { target } | InputEvent::Click { target } => {
                // Clicking an atomic selects it whole so deletion treats it
                // as a unit; text runs never need this.
                if doc.is_alive(target) && doc.is_atomic(target) {
                    let _ = doc.select_node(target);
                }
                Outcome::Ignored
            }
            InputEvent::FocusGained => {
                doc.focus();
                Outcome::Ignored
            }
            InputEvent::FocusLost => {
                doc.blur();
                Outcome::Ignored
            }
        }
    }

    fn on_key_down(
        &mut self,
        doc: &mut Document,
        emoji: &EmojiCatalog,
        opts: &Options,
        emitter: &mut Emitter,
        key: KeyEvent,
    ) -> Outcome {
        match key.code {
            KeyCode::Enter => {
                if self.latches.composing {
                    COMPOSITION_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
                    return Outcome::Suppressed;
                }
                if self.latches.line_feeding {
                    LOCK_REJECTIONS.fetch_add(1, Ordering::Relaxed);
                    debug!(target: "input", "line feed dropped: lock held");
                    return Outcome::Suppressed;
                }
                self.latches.line_feeding = true;
                let ok = core_edit::line_feed(doc);
                self.latches.line_feeding = false;
                if !key.mods.contains(KeyModifiers::CTRL) {
                    emitter.emit(&EngineEvent::EnterDown);
                }
                if ok { Outcome::Changed } else { Outcome::Ignored }
            }
            KeyCode::Backspace => {
                if self.latches.composing {
                    COMPOSITION_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
                    return Outcome::Suppressed;
                }
                if canonical_empty_caret(doc) {
                    trace!(target: "input", "backspace suppressed in canonical empty state");
                    return Outcome::Suppressed;
                }
                if core_edit::backspace(doc) {
                    Outcome::Changed
                } else {
                    Outcome::Ignored
                }
            }
            KeyCode::Char(c) => {
                if key.mods.contains(KeyModifiers::CTRL) {
                    return match c.to_ascii_lowercase() {
                        'a' => {
                            if canonical_empty_caret(doc) {
                                trace!(target: "input", "select-all suppressed in canonical empty state");
                                Outcome::Suppressed
                            } else {
                                core_position::select_all(doc);
                                Outcome::Ignored
                            }
                        }
                        'z' => Outcome::UndoRequested,
                        'y' => Outcome::RedoRequested,
                        _ => Outcome::Ignored,
                    };
                }
                if self.latches.composing {
                    COMPOSITION_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
                    return Outcome::Suppressed;
                }
                replace_selection_first(doc);
                let mut buf = [0u8; 4];
                let text: &str = c.encode_utf8(&mut buf);
                if core_limit::insert_text_intercepted(doc, emoji, opts, emitter, text, true) {
                    Outcome::Changed
                } else {
                    Outcome::Ignored
                }
            }
            KeyCode::Delete | KeyCode::Tab | KeyCode::Esc => Outcome::Ignored,
        }
    }
}

/// Typing over an active selection replaces it; mirror the host default by
/// deleting the range before the insertion runs.
fn replace_selection_first(doc: &mut Document) {
    if let Some(range) = current_range(doc)
        && !range.collapsed
    {
        core_edit::delete_range(doc, &range);
    }
}

/// Backspace/select-all guard: true when the document is in its canonical
/// `<p><br></p>` state with nothing selected.
fn canonical_empty_caret(doc: &Document) -> bool {
    doc.is_canonical_empty()
        && current_range(doc).map(|r| r.collapsed).unwrap_or(true)
}

/// Post-hoc tree sanitation run on keyup: unwrap untagged foreign nodes the
/// host's native auto-merge introduced, drop stray break markers from lines
/// that also carry content, and re-wrap inline nodes that escaped their
/// Line. Returns true when anything was repaired.
pub fn sanitize_tree(doc: &mut Document) -> bool {
    let mut changed = false;

    // Unwrap foreign wrappers until none remain (unwrapping can surface
    // nested ones).
    loop {
        let Some(wrapper) = find_foreign(doc) else {
            break;
        };
        let Some(parent) = doc.parent(wrapper) else {
            break;
        };
        let Some(idx) = doc.index_in_parent(wrapper) else {
            break;
        };
        let kids = doc.take_children(wrapper);
        for (i, kid) in kids.into_iter().enumerate() {
            doc.insert_child_at(parent, idx + i, kid);
        }
        doc.remove_subtree(wrapper);
        changed = true;
        debug!(target: "input", "foreign wrapper unwrapped");
    }

    // Stray break markers next to real content.
    for line in doc.lines().to_vec() {
        if !doc.is_line(line) {
            continue;
        }
        let before = doc.child_count(line);
        if before > 1 {
            doc.strip_redundant_breaks(line);
            if doc.child_count(line) != before {
                changed = true;
            }
        }
        doc.ensure_line_populated(line);
    }

    // Missing leading Line / stray inline nodes under the root.
    let had_stray = doc
        .lines()
        .iter()
        .any(|&c| !doc.is_line(c));
    if had_stray || doc.lines().is_empty() {
        doc.repair_root();
        changed = true;
    }
    changed
}

fn find_foreign(doc: &Document) -> Option<NodeId> {
    for &line in doc.lines() {
        if let Some(found) = find_foreign_in(doc, line) {
            return Some(found);
        }
    }
    None
}

fn find_foreign_in(doc: &Document, node: NodeId) -> Option<NodeId> {
    for &child in doc.children(node) {
        if doc.is_foreign(child) {
            return Some(child);
        }
        if doc.is_container(child)
            && let Some(found) = find_foreign_in(doc, child)
        {
            return Some(found);
        }
    }
    None
}

/// Plain-text form of the current selection (emoji as their token form),
/// used by copy/cut.
pub fn selection_text(doc: &Document) -> String {
    let Some(range) = current_range(doc) else {
        return String::new();
    };
    if range.collapsed {
        return String::new();
    }
    let Some(start) = core_position::line_child_path(doc, &range.start) else {
        return String::new();
    };
    let Some(end) = core_position::line_child_path(doc, &range.end) else {
        return String::new();
    };
    let mut out = String::new();
    let lines = doc.lines();
    for (line_idx, &line) in lines.iter().enumerate().skip(start.0) {
        if line_idx > end.0 {
            break;
        }
        if line_idx > start.0 {
            out.push('\n');
        }
        for (child_idx, &child) in doc.children(line).iter().enumerate() {
            let at_start_edge = line_idx == start.0 && child_idx < start.1;
            let at_end_edge = line_idx == end.0 && child_idx > end.1;
            if at_start_edge || at_end_edge {
                continue;
            }
            if let Some(text) = doc.text(child) {
                let from = if line_idx == start.0 && child_idx == start.1 {
                    core_position::grapheme_byte_offset(text, start.2)
                } else {
                    0
                };
                let to = if line_idx == end.0 && child_idx == end.1 {
                    core_position::grapheme_byte_offset(text, end.2)
                } else {
                    text.len()
                };
                if from < to {
                    out.push_str(&text[from..to]);
                }
            } else if doc.is_emoji(child)
                && let core_dom::NodeKind::Atomic(core_dom::AtomicPayload::Emoji { name, .. }) =
                    doc.kind(child)
            {
                out.push('[');
                out.push_str(name);
                out.push(']');
            }
        }
    }
    out
}
