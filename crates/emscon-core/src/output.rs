use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Command,
    Output,
    Error,
    Prompt,
    Comment,
    /// Untagged text, in practice line breaks between tagged segments.
    Plain,
}

impl SegmentKind {
    pub fn css_class(self) -> Option<&'static str> {
        match self {
            SegmentKind::Command => Some("terminal-command"),
            SegmentKind::Output => Some("terminal-output"),
            SegmentKind::Error => Some("terminal-error"),
            SegmentKind::Prompt => Some("terminal-prompt"),
            SegmentKind::Comment => Some("terminal-comment"),
            SegmentKind::Plain => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

/// Append-only styled transcript. Only `clear` shrinks it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputLog {
    segments: Vec<Segment>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: SegmentKind, text: impl Into<String>) {
        self.segments.push(Segment {
            kind,
            text: text.into(),
        });
    }

    pub fn line_break(&mut self) {
        self.push(SegmentKind::Plain, "\n");
    }

    pub fn prompt(&mut self, directory: &str) {
        self.push(SegmentKind::Prompt, prompt_text(directory));
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segments with a semantic tag, skipping plain text.
    pub fn tagged(&self) -> impl Iterator<Item = &Segment> {
        self.segments
            .iter()
            .filter(|s| s.kind != SegmentKind::Plain)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn render_plain(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn render_html(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            let text = escape_html(&segment.text);
            match segment.kind.css_class() {
                Some(class) => {
                    out.push_str("<span class=\"");
                    out.push_str(class);
                    out.push_str("\">");
                    out.push_str(&text);
                    out.push_str("</span>");
                }
                None => out.push_str(&text),
            }
        }
        out
    }
}

pub fn prompt_text(directory: &str) -> String {
    format!("{directory}$ ")
}

fn escape_html(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}
