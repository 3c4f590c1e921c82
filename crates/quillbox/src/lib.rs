//! Quillbox: an embeddable rich-text chat input engine.
//!
//! [`Editor`] wires the document tree, the input controller, the length
//! interceptor, the paste pipeline, and the history engine together
//! behind the operations a UI layer consumes: text/HTML
//! extraction, programmatic insertion, clearing, length queries, event
//! subscription, undo/redo, and the host event entry point.
//!
//! Control flow: host events → [`Editor::handle_event`] → controller →
//! (interceptor) → structural edits → tree mutation → [`Editor`] commit,
//! which sweeps the encoding cache, re-checks sensitive words, records a
//! history snapshot, and notifies `change` listeners. Deferred work
//! (cursor scrolling after a history replay) lands in a task queue the
//! host drains after the current batch, mirroring animation-frame timing.

use std::time::Instant;

use core_dom::{AtomicPayload, Document, EmojiCatalog};
use core_events::{
    Emitter, EngineEvent, EngineEventKind, InputEvent, ListenerId, PastePayload,
};
use core_history::History;
use core_input::{Controller, Outcome};
use core_paste::{PasteClass, PreparedImage, UploadPipeline};
use core_position::current_range;
use regex::Regex;
use tracing::{debug, warn};

pub use core_config::{HistoryConfig, Options, discover as discover_options, load_from as load_options};
pub use core_dom::serialize::escape_html;
pub use core_events::{KeyCode, KeyEvent, KeyModifiers, PastedFile};
pub use core_input::Outcome as InputOutcome;
pub use core_paste::BeforeUploadHook;

/// Work deferred past the current mutation batch (the engine's stand-in
/// for animation-frame scheduling). The host drains these after each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    ScrollCursorIntoView,
    Focus,
}

pub struct Editor {
    doc: Document,
    opts: Options,
    emoji: EmojiCatalog,
    emitter: Emitter,
    controller: Controller,
    history: History,
    pipeline: UploadPipeline,
    deferred: Vec<DeferredTask>,
    words: Option<Regex>,
    rechecking: bool,
}

impl Editor {
    pub fn new(opts: Options) -> Self {
        let words = compile_word_list(&opts.match_words_list);
        let doc = Document::new();
        let mut history = History::new(opts.history.clone());
        history.record_initial(&doc);
        Self {
            doc,
            opts,
            emoji: EmojiCatalog::new(),
            emitter: Emitter::new(),
            controller: Controller::new(),
            history,
            pipeline: UploadPipeline::new(),
            deferred: Vec::new(),
            words,
            rechecking: false,
        }
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn emoji_catalog_mut(&mut self) -> &mut EmojiCatalog {
        &mut self.emoji
    }

    pub fn set_before_upload(&mut self, hook: BeforeUploadHook) {
        self.pipeline.set_before_upload(hook);
    }

    // ---------------------------------------------------------------------
    // Event surface
    // ---------------------------------------------------------------------

    pub fn on<F>(&mut self, kind: EngineEventKind, callback: F) -> ListenerId
    where
        F: FnMut(&EngineEvent) + 'static,
    {
        self.emitter.on(kind, callback)
    }

    pub fn once<F>(&mut self, kind: EngineEventKind, callback: F) -> ListenerId
    where
        F: FnMut(&EngineEvent) + 'static,
    {
        self.emitter.once(kind, callback)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.emitter.off(id)
    }

    /// Entry point for host events. Returns what the controller did;
    /// `Changed` outcomes have already been committed by the time this
    /// returns.
    pub fn handle_event(&mut self, event: InputEvent) -> Outcome {
        let outcome = self.controller.handle(
            &mut self.doc,
            &self.emoji,
            &self.opts,
            &mut self.emitter,
            event,
        );
        match &outcome {
            Outcome::Changed | Outcome::Cut(_) => self.commit(),
            Outcome::UndoRequested => {
                self.undo();
            }
            Outcome::RedoRequested => {
                self.redo();
            }
            _ => {}
        }
        outcome
    }

    /// Paste entry point. Overlapping pastes are serialized by the
    /// controller's lock; a second paste while one is in flight is
    /// dropped and reported as `false`.
    pub async fn paste(&mut self, payload: PastePayload) -> bool {
        if payload.is_empty() {
            debug!(target: "engine", "paste ignored: empty payload");
            return false;
        }
        if !self.controller.begin_paste() {
            return false;
        }
        let changed = match core_paste::classify(&payload, self.opts.image_paste_max) {
            PasteClass::Images(files) => {
                let current = self.image_count();
                let prepared = self.pipeline.prepare(files, current).await;
                match prepared {
                    Ok(prepared) => self.apply_prepared_images(prepared),
                    Err(err) => {
                        warn!(target: "engine", error = %err, "paste batch failed");
                        false
                    }
                }
            }
            PasteClass::Text(text) => {
                self.delete_selection_if_any();
                core_limit::insert_text_intercepted(
                    &mut self.doc,
                    &self.emoji,
                    &self.opts,
                    &mut self.emitter,
                    &text,
                    true,
                )
            }
            PasteClass::Empty => {
                debug!(target: "engine", "paste ignored: unsupported payload");
                false
            }
        };
        // Release before committing: the sweep in commit must never run
        // inside the lock window.
        self.controller.end_paste();
        if changed {
            self.commit();
        }
        changed
    }

    fn apply_prepared_images(&mut self, prepared: Vec<PreparedImage>) -> bool {
        if prepared.is_empty() {
            return false;
        }
        self.delete_selection_if_any();
        let mut nodes = Vec::with_capacity(prepared.len());
        for image in prepared {
            self.doc.register_encoding(&image.handle, &image.encoding);
            nodes.push(self.doc.create_atomic(AtomicPayload::Image {
                handle: image.handle,
            }));
        }
        let range = match current_range(&self.doc) {
            Some(range) => range,
            None => {
                if !core_position::amend_position(&mut self.doc) {
                    return false;
                }
                match current_range(&self.doc) {
                    Some(range) => range,
                    None => return false,
                }
            }
        };
        core_edit::insert_nodes(&mut self.doc, &nodes, &range)
    }

    fn delete_selection_if_any(&mut self) {
        if let Some(range) = current_range(&self.doc)
            && !range.collapsed
        {
            core_edit::delete_range(&mut self.doc, &range);
        }
    }

    fn image_count(&self) -> usize {
        self.doc
            .lines()
            .iter()
            .flat_map(|&line| self.doc.children(line))
            .filter(|&&child| self.doc.is_image(child))
            .count()
    }

    // ---------------------------------------------------------------------
    // Public operations
    // ---------------------------------------------------------------------

    pub fn get_text(&self, pure: bool) -> String {
        self.doc.to_text(pure)
    }

    pub fn get_proto_html(&self) -> String {
        self.doc.to_proto_html()
    }

    pub fn get_semantic_html(&self) -> String {
        self.doc.to_semantic_html()
    }

    /// Replace (`clear = true`) or extend the document with `content`,
    /// routed through the length interceptor.
    pub fn set_text(&mut self, content: &str, clear: bool) {
        if clear {
            self.doc.clear();
        }
        core_limit::insert_text_intercepted(
            &mut self.doc,
            &self.emoji,
            &self.opts,
            &mut self.emitter,
            content,
            true,
        );
        self.commit();
    }

    /// Insert a decorative emoji by catalog name at the cursor. Refused
    /// past the configured emoji cap.
    pub fn insert_emoji(&mut self, name: &str) -> bool {
        let Some(src) = self.emoji.find(name).map(str::to_string) else {
            warn!(target: "engine", name, "emoji not in catalog");
            return false;
        };
        if self.doc.emoji_count() >= self.opts.emoji_max_count {
            warn!(target: "engine", cap = self.opts.emoji_max_count, "emoji cap reached");
            return false;
        }
        let node = self.doc.create_atomic(AtomicPayload::Emoji {
            name: name.to_string(),
            src,
        });
        let range = match current_range(&self.doc) {
            Some(range) => range,
            None => {
                if !core_position::amend_position(&mut self.doc) {
                    return false;
                }
                match current_range(&self.doc) {
                    Some(range) => range,
                    None => return false,
                }
            }
        };
        let ok = core_edit::insert_nodes(&mut self.doc, &[node], &range);
        if ok {
            self.commit();
        }
        ok
    }

    pub fn clear(&mut self) {
        self.doc.clear();
        self.commit();
    }

    pub fn is_empty(&self) -> bool {
        self.doc.is_empty()
    }

    pub fn get_length(&self) -> usize {
        self.doc.char_len(self.opts.is_line_break_count)
    }

    pub fn placeholder_visible(&self) -> bool {
        self.doc.is_empty()
    }

    /// Suggested content height for the host, clamped to the configured
    /// bounds.
    pub fn height_hint(&self, line_height: u32) -> u32 {
        let rows = self.doc.lines().len().max(1) as u32;
        (rows * line_height)
            .max(self.opts.min_height)
            .min(self.opts.max_height)
    }

    pub fn focus(&mut self) {
        self.doc.focus();
    }

    pub fn blur(&mut self) {
        self.doc.blur();
    }

    pub fn is_focused(&self) -> bool {
        self.doc.is_focused()
    }

    pub fn undo(&mut self) -> bool {
        let ok = self.history.undo(&mut self.doc);
        if ok {
            self.after_replay();
        }
        ok
    }

    pub fn redo(&mut self) -> bool {
        let ok = self.history.redo(&mut self.doc);
        if ok {
            self.after_replay();
        }
        ok
    }

    /// Drain the deferred task queue (the host calls this on its next
    /// frame).
    pub fn take_deferred(&mut self) -> Vec<DeferredTask> {
        std::mem::take(&mut self.deferred)
    }

    /// Direct read access for tests and advanced embedders.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Mutable access to the host surface. The embedding layer owns the
    /// rendered tree and may reposition the selection between events; the
    /// engine re-normalizes whatever it finds on the next operation.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    // ---------------------------------------------------------------------
    // Commit path
    // ---------------------------------------------------------------------

    /// Runs after every completed mutation batch: sweep the encoding
    /// side-map, re-check sensitive words, record history, notify
    /// listeners.
    fn commit(&mut self) {
        if self.history.is_replaying() {
            return;
        }
        self.doc.sweep_encodings();
        self.recheck_sensitive_words();
        self.history.record(&self.doc, Instant::now());
        let is_empty = self.doc.is_empty();
        self.emitter.emit(&EngineEvent::Change {
            is_empty,
            placeholder_visible: is_empty,
        });
    }

    fn after_replay(&mut self) {
        self.doc.sweep_encodings();
        self.deferred.push(DeferredTask::ScrollCursorIntoView);
        let is_empty = self.doc.is_empty();
        self.emitter.emit(&EngineEvent::Change {
            is_empty,
            placeholder_visible: is_empty,
        });
    }

    /// Mask configured sensitive words and re-set the document when any
    /// match. Guarded against recursing through the nested commit.
    fn recheck_sensitive_words(&mut self) {
        let Some(words) = self.words.clone() else {
            return;
        };
        if self.rechecking {
            return;
        }
        let text = self.doc.to_text(false);
        if !words.is_match(&text) {
            return;
        }
        let masked = words
            .replace_all(&text, |caps: &regex::Captures<'_>| {
                "*".repeat(caps[0].chars().count())
            })
            .into_owned();
        debug!(target: "engine", "sensitive words masked");
        self.rechecking = true;
        self.set_text(&masked, true);
        self.rechecking = false;
    }
}

fn compile_word_list(words: &[String]) -> Option<Regex> {
    if words.is_empty() {
        return None;
    }
    let alternation = words
        .iter()
        .filter(|w| !w.is_empty())
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    if alternation.is_empty() {
        return None;
    }
    match Regex::new(&alternation) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(target: "engine", error = %err, "sensitive word list failed to compile");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(editor: &mut Editor, s: &str) {
        for c in s.chars() {
            editor.handle_event(InputEvent::KeyDown(KeyEvent::plain(KeyCode::Char(c))));
        }
    }

    #[test]
    fn clear_is_idempotent() {
        let mut editor = Editor::new(Options::default());
        type_str(&mut editor, "hello");
        editor.clear();
        assert_eq!(editor.get_proto_html(), "<p><br></p>");
        editor.clear();
        assert_eq!(editor.get_proto_html(), "<p><br></p>");
        assert!(editor.is_empty());
    }

    #[test]
    fn sensitive_words_masked_after_change() {
        let mut opts = Options::default();
        opts.match_words_list = vec!["badword".into()];
        let mut editor = Editor::new(opts);
        editor.set_text("so badword here", true);
        assert_eq!(editor.get_text(false), "so ******* here");
    }

    #[test]
    fn insert_emoji_respects_cap() {
        let mut opts = Options::default();
        opts.emoji_max_count = 1;
        let mut editor = Editor::new(opts);
        editor
            .emoji_catalog_mut()
            .register("smile", "https://cdn/smile.png");
        assert!(editor.insert_emoji("smile"));
        assert!(!editor.insert_emoji("smile"));
        assert_eq!(editor.get_text(false), "[smile]");
    }

    #[test]
    fn unknown_emoji_is_refused() {
        let mut editor = Editor::new(Options::default());
        assert!(!editor.insert_emoji("ghost"));
        assert!(editor.is_empty());
    }

    #[test]
    fn height_hint_clamps_to_bounds() {
        let mut opts = Options::default();
        opts.min_height = 40;
        opts.max_height = 100;
        let mut editor = Editor::new(opts);
        assert_eq!(editor.height_hint(24), 40);
        for _ in 0..10 {
            editor.handle_event(InputEvent::KeyDown(KeyEvent::plain(KeyCode::Enter)));
        }
        assert_eq!(editor.height_hint(24), 100);
    }

    #[test]
    fn undo_redo_surface_deferred_scroll() {
        let mut editor = Editor::new(Options::default());
        type_str(&mut editor, "x");
        assert!(editor.undo());
        assert!(editor
            .take_deferred()
            .contains(&DeferredTask::ScrollCursorIntoView));
        assert!(editor.redo());
        assert_eq!(editor.get_text(false), "x");
    }
}
