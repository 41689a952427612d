use crate::transcode::dom::{Dom, Element, NodeData, NodeId};
use crate::transcode::rules;
use std::fmt::Write;
use std::ops::ControlFlow;

pub struct Serialized {
    pub html: String,
    pub truncated: bool,
}

/// Appended at the cut point when the byte cap truncates the document.
pub(crate) const TRUNCATION_NOTICE: &str = "<BR><I>[Page truncated]</I>";

/// Renders the rewritten tree as the Xiino HTML subset: uppercase tags,
/// escaped text, void elements unclosed. Output never exceeds `limit`
/// bytes; when the document is larger, emission stops at an element
/// boundary, the truncation notice goes in at the cut, and the ancestors
/// still close properly.
pub fn serialize(dom: &Dom, limit: usize) -> Serialized {
    let mut emitter = Emitter {
        dom,
        out: String::new(),
        limit,
        pending_close: 0,
        truncated: false,
    };
    let _ = emitter.children(dom.root());
    Serialized {
        html: emitter.out,
        truncated: emitter.truncated,
    }
}

struct Emitter<'a> {
    dom: &'a Dom,
    out: String,
    limit: usize,
    /// Bytes already committed to closing the currently-open ancestors.
    /// Every admission check reserves these, so the close-tag flush after
    /// a cut can never push the output past the limit, no matter how
    /// deeply a malformed page nests.
    pending_close: usize,
    truncated: bool,
}

impl Emitter<'_> {
    fn children(&mut self, id: NodeId) -> ControlFlow<()> {
        for &child in self.dom.children(id) {
            self.node(child)?;
        }
        ControlFlow::Continue(())
    }

    fn node(&mut self, id: NodeId) -> ControlFlow<()> {
        match self.dom.data(id) {
            NodeData::Root => self.children(id),
            NodeData::Text(text) => {
                let escaped = escape_text(text);
                self.push(&escaped)
            }
            NodeData::Element(element) => {
                let open = open_tag(element);
                if rules::is_void(&element.tag) {
                    return self.push(&open);
                }

                // The closing tag is reserved before the element may open,
                // so an element is admitted whole or not at all.
                let close = format!("</{}>", element.tag.to_uppercase());
                self.pending_close += close.len();
                if self.push(&open).is_break() {
                    self.pending_close -= close.len();
                    return ControlFlow::Break(());
                }

                let flow = self.children(id);
                self.pending_close -= close.len();
                self.out.push_str(&close);
                flow
            }
        }
    }

    /// Emits a chunk whole or not at all, always leaving room for the open
    /// ancestors' closing tags and the truncation notice. The first
    /// rejected chunk places the notice.
    fn push(&mut self, chunk: &str) -> ControlFlow<()> {
        if self.out.len() + chunk.len() + self.pending_close + TRUNCATION_NOTICE.len() > self.limit {
            if !self.truncated {
                self.truncated = true;
                if self.out.len() + TRUNCATION_NOTICE.len() + self.pending_close <= self.limit {
                    self.out.push_str(TRUNCATION_NOTICE);
                }
            }
            return ControlFlow::Break(());
        }
        self.out.push_str(chunk);
        ControlFlow::Continue(())
    }
}

fn open_tag(element: &Element) -> String {
    let mut out = String::from("<");
    out.push_str(&element.tag.to_uppercase());
    for (name, value) in &element.attrs {
        out.push(' ');
        out.push_str(&name.to_uppercase());
        if !value.is_empty() {
            let _ = write!(out, "=\"{}\"", escape_attr(value));
        }
    }
    out.push('>');
    out
}

pub(crate) fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
