//! Plain-text extraction and HTML serialization.
//!
//! The transport format is a sequence of `<p>…</p>` blocks. Inline atoms
//! serialize as `<img>` tags carrying either `data-emoji-name` (decorative
//! emoji, source left as the live URL) or `data-image` (pasted image, source
//! resolved through the encoding side-map in semantic mode). A fully empty
//! document serializes as exactly `<p><br></p>`, the canonical empty
//! sentinel the rest of the engine checks against.

use crate::{AtomicPayload, Document, NodeId, NodeKind};

/// Escape the HTML-significant character set.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

impl Document {
    /// Plain text, lines joined with `\n`. `pure` drops atom placeholders
    /// entirely; otherwise emoji contribute their `[name]` token form so the
    /// text round-trips through token conversion on re-insertion.
    pub fn to_text(&self, pure: bool) -> String {
        let mut lines_out: Vec<String> = Vec::new();
        for &line in self.lines() {
            if !self.is_line(line) {
                continue;
            }
            let mut buf = String::new();
            self.collect_text(line, pure, &mut buf);
            lines_out.push(buf);
        }
        lines_out.join("\n")
    }

    fn collect_text(&self, node: NodeId, pure: bool, buf: &mut String) {
        for &child in self.children(node) {
            match self.kind(child) {
                NodeKind::Text { text, .. } => buf.push_str(text),
                NodeKind::Atomic(AtomicPayload::Emoji { name, .. }) => {
                    if !pure {
                        buf.push('[');
                        buf.push_str(name);
                        buf.push(']');
                    }
                }
                NodeKind::Atomic(AtomicPayload::Image { .. }) | NodeKind::Break => {}
                NodeKind::Foreign { .. } => self.collect_text(child, pure, buf),
                NodeKind::Line | NodeKind::Root => {}
            }
        }
    }

    /// HTML with image sources left as live references (content handles).
    pub fn to_proto_html(&self) -> String {
        self.to_html(false)
    }

    /// HTML with image sources resolved to their persisted encodings.
    pub fn to_semantic_html(&self) -> String {
        self.to_html(true)
    }

    fn to_html(&self, resolve: bool) -> String {
        let mut out = String::new();
        for &line in self.lines() {
            if !self.is_line(line) {
                continue;
            }
            out.push_str("<p>");
            if self.is_semantically_empty_line(line) {
                out.push_str("<br>");
            } else {
                self.line_html(line, resolve, &mut out);
            }
            out.push_str("</p>");
        }
        out
    }

    fn line_html(&self, node: NodeId, resolve: bool, out: &mut String) {
        for &child in self.children(node) {
            match self.kind(child) {
                NodeKind::Text { text, style } => {
                    if text.is_empty() {
                        continue;
                    }
                    match style.as_ref().and_then(|s| s.color.as_deref()) {
                        Some(color) => {
                            out.push_str(&format!(
                                "<span style=\"color:{}\">{}</span>",
                                escape_html(color),
                                escape_html(text)
                            ));
                        }
                        None => out.push_str(&escape_html(text)),
                    }
                }
                NodeKind::Atomic(AtomicPayload::Emoji { name, src }) => {
                    out.push_str(&format!(
                        "<img src=\"{}\" data-emoji-name=\"{}\">",
                        escape_html(src),
                        escape_html(name)
                    ));
                }
                NodeKind::Atomic(AtomicPayload::Image { handle }) => {
                    let src = if resolve {
                        self.encoding(handle).unwrap_or(handle.as_str())
                    } else {
                        handle.as_str()
                    };
                    out.push_str(&format!("<img src=\"{}\" data-image>", escape_html(src)));
                }
                NodeKind::Break => {}
                NodeKind::Foreign { .. } => self.line_html(child, resolve, out),
                NodeKind::Line | NodeKind::Root => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{AtomicPayload, Document};

    #[test]
    fn empty_document_serializes_to_sentinel() {
        let doc = Document::new();
        assert_eq!(doc.to_proto_html(), "<p><br></p>");
        assert_eq!(doc.to_semantic_html(), "<p><br></p>");
        assert_eq!(doc.to_text(false), "");
    }

    #[test]
    fn text_is_escaped_in_html_but_raw_in_text() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_text("a<b>&\"c\"");
        doc.append_child(line, run);
        doc.strip_redundant_breaks(line);
        assert_eq!(doc.to_text(true), "a<b>&\"c\"");
        assert_eq!(doc.to_proto_html(), "<p>a&lt;b&gt;&amp;&quot;c&quot;</p>");
    }

    #[test]
    fn semantic_html_resolves_image_handles() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let image = doc.create_atomic(AtomicPayload::Image {
            handle: "img-7".into(),
        });
        doc.append_child(line, image);
        doc.strip_redundant_breaks(line);
        doc.register_encoding("img-7", "data:image/png;base64,QUJD");
        assert_eq!(doc.to_proto_html(), "<p><img src=\"img-7\" data-image></p>");
        assert_eq!(
            doc.to_semantic_html(),
            "<p><img src=\"data:image/png;base64,QUJD\" data-image></p>"
        );
    }

    #[test]
    fn emoji_token_form_survives_text_extraction() {
        let mut doc = Document::new();
        let line = doc.first_line().unwrap();
        let run = doc.create_text("hi ");
        doc.append_child(line, run);
        let emoji = doc.create_atomic(AtomicPayload::Emoji {
            name: "smile".into(),
            src: "https://cdn/smile.png".into(),
        });
        doc.append_child(line, emoji);
        doc.strip_redundant_breaks(line);
        assert_eq!(doc.to_text(false), "hi [smile]");
        assert_eq!(doc.to_text(true), "hi ");
    }

    #[test]
    fn multi_line_joins_with_newline() {
        let mut doc = Document::new();
        let root = doc.root();
        let line1 = doc.first_line().unwrap();
        let r1 = doc.create_text("foo");
        doc.append_child(line1, r1);
        doc.strip_redundant_breaks(line1);
        let line2 = doc.create_line(true);
        doc.append_child(root, line2);
        let r2 = doc.create_text("bar");
        doc.append_child(line2, r2);
        assert_eq!(doc.to_text(false), "foo\nbar");
        assert_eq!(doc.to_proto_html(), "<p>foo</p><p>bar</p>");
    }
}
