//! Paste/upload pipeline: clipboard classification and asynchronous
//! file-to-encoding conversion.
//!
//! A clipboard payload is either a batch of files (images only, first K
//! accepted) or plain text; files win when both are present. Accepted files
//! pass through an optional async before-upload hook that may filter or
//! replace the batch; a hook error fails the whole batch closed. Each
//! surviving file is converted to a `(content handle, data-URL encoding)`
//! pair on a fan-out join: individual conversion failures are logged and
//! skipped without aborting the rest.
//!
//! The pipeline only produces [`PreparedImage`]s; inserting them (and
//! registering their encodings in the document side-map) happens back on
//! the engine side, synchronously, so no tree mutation ever straddles an
//! await point.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;

use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use core_events::{PASTE_BYTES, PASTE_SESSIONS, PastePayload, PastedFile};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What a clipboard payload turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasteClass {
    Images(Vec<PastedFile>),
    Text(String),
    Empty,
}

/// Classify a payload: image files first (capped at `image_max`), then
/// plain text. Non-image files are dropped here.
pub fn classify(payload: &PastePayload, image_max: usize) -> PasteClass {
    let images: Vec<PastedFile> = payload
        .files
        .iter()
        .filter(|f| f.is_image())
        .take(image_max)
        .cloned()
        .collect();
    if !images.is_empty() {
        let skipped = payload.files.len() - images.len();
        if skipped > 0 {
            debug!(target: "paste", accepted = images.len(), skipped, "image batch capped/filtered");
        }
        return PasteClass::Images(images);
    }
    match payload.text.as_deref() {
        Some(text) if !text.is_empty() => PasteClass::Text(text.to_string()),
        _ => PasteClass::Empty,
    }
}

/// An image ready for insertion: the handle goes into the atomic node, the
/// encoding into the document's side-map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub handle: String,
    pub encoding: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum PasteError {
    #[error("unsupported or empty clipboard payload")]
    Unsupported,
    #[error("before-upload hook failed: {0}")]
    HookFailed(String),
    #[error("no file in the batch could be converted")]
    NothingConverted,
}

/// User-supplied async filter over the accepted file batch. Receives the
/// files and the number of images already in the document; may shrink,
/// reorder, or replace the batch.
pub type BeforeUploadHook = Box<
    dyn Fn(Vec<PastedFile>, usize) -> Pin<Box<dyn Future<Output = Result<Vec<PastedFile>>> + Send>>
        + Send
        + Sync,
>;

#[derive(Default)]
pub struct UploadPipeline {
    before_upload: Option<BeforeUploadHook>,
    seq: u64,
}

impl UploadPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_before_upload(&mut self, hook: BeforeUploadHook) {
        self.before_upload = Some(hook);
    }

    /// Run the hook and the conversion fan-out for an accepted image batch.
    /// The returned images preserve batch order even though conversions
    /// settle out of order.
    pub async fn prepare(
        &mut self,
        files: Vec<PastedFile>,
        current_amount: usize,
    ) -> Result<Vec<PreparedImage>, PasteError> {
        if files.is_empty() {
            return Err(PasteError::Unsupported);
        }
        PASTE_SESSIONS.fetch_add(1, Ordering::Relaxed);
        let total_bytes: usize = files.iter().map(|f| f.bytes.len()).sum();
        PASTE_BYTES.fetch_add(total_bytes as u64, Ordering::Relaxed);

        let files = match &self.before_upload {
            Some(hook) => hook(files, current_amount)
                .await
                .map_err(|e| PasteError::HookFailed(e.to_string()))?,
            None => files,
        };
        if files.is_empty() {
            return Err(PasteError::Unsupported);
        }

        let mut joins: JoinSet<(usize, Result<PreparedImage, String>)> = JoinSet::new();
        for (index, file) in files.into_iter().enumerate() {
            self.seq += 1;
            let handle = format!("paste-{}", self.seq);
            joins.spawn(async move { (index, convert(handle, file)) });
        }

        // Settle-all join: one bad file must not abort the batch.
        let mut settled: Vec<(usize, PreparedImage)> = Vec::new();
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok((index, Ok(prepared))) => settled.push((index, prepared)),
                Ok((index, Err(reason))) => {
                    warn!(target: "paste", index, %reason, "file conversion failed; skipping");
                }
                Err(join_err) => {
                    warn!(target: "paste", error = %join_err, "conversion task failed; skipping");
                }
            }
        }
        if settled.is_empty() {
            return Err(PasteError::NothingConverted);
        }
        settled.sort_by_key(|(index, _)| *index);
        Ok(settled.into_iter().map(|(_, prepared)| prepared).collect())
    }
}

fn convert(handle: String, file: PastedFile) -> Result<PreparedImage, String> {
    if file.bytes.is_empty() {
        return Err(format!("empty file body: {}", file.name));
    }
    let encoding = format!(
        "data:{};base64,{}",
        file.mime,
        STANDARD.encode(&file.bytes)
    );
    Ok(PreparedImage {
        handle,
        encoding,
        name: file.name,
    })
}
