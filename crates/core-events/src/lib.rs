//! Event types and the listener registry for the chat input engine.
//!
//! Two event families live here. [`InputEvent`] is what the host surface
//! feeds *into* the engine: keys, IME composition phases, clipboard
//! payloads, mouse hits on nodes. [`EngineEvent`] is what the engine emits
//! *out* to the embedding layer through the [`Emitter`] (`change`,
//! `enter-down`, `max-length-reached`).
//!
//! The emitter is a plain single-threaded callback registry (`on` / `off` /
//! `once`); the engine has no cross-thread event loop, so interleaving only
//! happens at promise-like boundaries in the paste pipeline.

use std::sync::atomic::AtomicU64;

use core_dom::NodeId;

// -------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------
// Minimal atomic counters (fetch_add relaxed, no locking). Inspectable in
// tests or logged periodically by the embedding layer.
pub static PASTE_SESSIONS: AtomicU64 = AtomicU64::new(0);
pub static PASTE_BYTES: AtomicU64 = AtomicU64::new(0);
/// Paste or line-feed attempts dropped because the matching lock was held.
pub static LOCK_REJECTIONS: AtomicU64 = AtomicU64::new(0);
/// Insertions suppressed because composition was in progress.
pub static COMPOSITION_SUPPRESSED: AtomicU64 = AtomicU64::new(0);

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct KeyModifiers: u8 {
        const CTRL  = 1;
        const ALT   = 2;
        const SHIFT = 4;
        const META  = 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Char(char),
    Enter,
    Backspace,
    Delete,
    Tab,
    Esc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub mods: KeyModifiers,
}

impl KeyEvent {
    pub fn plain(code: KeyCode) -> Self {
        Self {
            code,
            mods: KeyModifiers::empty(),
        }
    }

    pub fn ctrl(code: KeyCode) -> Self {
        Self {
            code,
            mods: KeyModifiers::CTRL,
        }
    }
}

/// A file lifted off the clipboard. Only image mime types are accepted by
/// the paste pipeline; everything else is ignored and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl PastedFile {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// Raw clipboard payload as handed over by the host: files win over text
/// when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PastePayload {
    pub files: Vec<PastedFile>,
    pub text: Option<String>,
}

impl PastePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            files: Vec::new(),
            text: Some(content.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.text.as_deref().is_none_or(str::is_empty)
    }
}

/// Host-surface events fed into the input controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
    /// Pending text about to be committed by the host (no-op while
    /// composing).
    BeforeInput { text: String },
    /// Committed host text input (a typed character or an autocomplete
    /// expansion).
    Input { text: String },
    CompositionStart,
    CompositionUpdate { preedit: String },
    /// IME session finished; `committed` is the final composed string the
    /// host has already decided on.
    CompositionEnd { committed: String },
    Copy,
    Cut,
    /// Mouse press on a node; atomic targets get unit-selected so a
    /// following delete removes them whole.
    MouseDown { target: NodeId },
    Click { target: NodeId },
    FocusGained,
    FocusLost,
}

/// Events the engine emits to the embedding layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Change {
        is_empty: bool,
        placeholder_visible: bool,
    },
    EnterDown,
    MaxLengthReached {
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEventKind {
    Change,
    EnterDown,
    MaxLengthReached,
}

impl EngineEvent {
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::Change { .. } => EngineEventKind::Change,
            EngineEvent::EnterDown => EngineEventKind::EnterDown,
            EngineEvent::MaxLengthReached { .. } => EngineEventKind::MaxLengthReached,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    kind: EngineEventKind,
    once: bool,
    callback: Box<dyn FnMut(&EngineEvent)>,
}

/// Callback registry backing the public `on` / `off` / `once` surface.
#[derive(Default)]
pub struct Emitter {
    next_id: u64,
    listeners: Vec<Listener>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, kind: EngineEventKind, callback: F) -> ListenerId
    where
        F: FnMut(&EngineEvent) + 'static,
    {
        self.register(kind, false, Box::new(callback))
    }

    pub fn once<F>(&mut self, kind: EngineEventKind, callback: F) -> ListenerId
    where
        F: FnMut(&EngineEvent) + 'static,
    {
        self.register(kind, true, Box::new(callback))
    }

    fn register(
        &mut self,
        kind: EngineEventKind,
        once: bool,
        callback: Box<dyn FnMut(&EngineEvent)>,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push(Listener {
            id,
            kind,
            once,
            callback,
        });
        id
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        before != self.listeners.len()
    }

    pub fn listener_count(&self, kind: EngineEventKind) -> usize {
        self.listeners.iter().filter(|l| l.kind == kind).count()
    }

    pub fn emit(&mut self, event: &EngineEvent) {
        let kind = event.kind();
        for listener in &mut self.listeners {
            if listener.kind == kind {
                (listener.callback)(event);
            }
        }
        self.listeners.retain(|l| !(l.once && l.kind == kind));
    }
}
