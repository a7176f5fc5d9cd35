use anyhow::anyhow;

use crate::docx::styles::StyleProps;
use crate::docx::xml::{find_attr, XmlEvent};

pub type SpanId = usize;

/// One inline node of a paragraph. Runs are leaf spans carrying text and a
/// style; containers (hyperlinks) carry child spans; everything the model
/// does not understand is kept opaque and written back verbatim.
#[derive(Clone, Debug)]
pub enum SpanKind {
    Run {
        run_attrs: Vec<(String, String)>,
        /// Full `w:rPr` subtree including the wrapping events, empty when
        /// the run has none. Reserialized untouched.
        rpr: Vec<XmlEvent>,
        /// `w:rStyle` reference, if any.
        named_style: Option<String>,
        /// Tracked attributes set directly in the run's `w:rPr`.
        props: StyleProps,
    },
    Container {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Opaque {
        events: Vec<XmlEvent>,
    },
}

#[derive(Clone, Debug)]
pub struct SpanNode {
    pub kind: SpanKind,
    /// Literal text of the span itself (runs; containers rarely).
    pub text: String,
    pub children: Vec<SpanId>,
    /// Untagged text following this span, owned by the parent context.
    pub tail: String,
}

impl SpanNode {
    pub fn run(props: StyleProps, text: impl Into<String>) -> SpanNode {
        SpanNode {
            kind: SpanKind::Run {
                run_attrs: Vec::new(),
                rpr: Vec::new(),
                named_style: None,
                props,
            },
            text: text.into(),
            children: Vec::new(),
            tail: String::new(),
        }
    }

    pub fn container(name: impl Into<String>) -> SpanNode {
        SpanNode {
            kind: SpanKind::Container {
                name: name.into(),
                attrs: Vec::new(),
            },
            text: String::new(),
            children: Vec::new(),
            tail: String::new(),
        }
    }

    pub fn is_run(&self) -> bool {
        matches!(self.kind, SpanKind::Run { .. })
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self.kind, SpanKind::Opaque { .. })
    }
}

/// A paragraph parsed into an arena of span nodes. Child lists hold stable
/// ids, so structural edits never invalidate an iteration index.
#[derive(Clone, Debug)]
pub struct SpanTree {
    pub nodes: Vec<SpanNode>,
    pub root: SpanId,
    pub para_attrs: Vec<(String, String)>,
    /// `w:pPr` subtree, reserialized verbatim ahead of the spans.
    pub ppr: Vec<XmlEvent>,
    pub para_style: Option<String>,
    /// Tracked attributes from `w:pPr/w:rPr` (paragraph mark run props).
    pub para_props: StyleProps,
}

impl SpanTree {
    pub fn new() -> SpanTree {
        SpanTree {
            nodes: vec![SpanNode::container("w:p")],
            root: 0,
            para_attrs: Vec::new(),
            ppr: Vec::new(),
            para_style: None,
            para_props: StyleProps::default(),
        }
    }

    pub fn add(&mut self, node: SpanNode) -> SpanId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn add_child(&mut self, parent: SpanId, node: SpanNode) -> SpanId {
        let id = self.add(node);
        self.nodes[parent].children.push(id);
        id
    }

    pub fn node(&self, id: SpanId) -> &SpanNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: SpanId) -> &mut SpanNode {
        &mut self.nodes[id]
    }

    /// Ids of the top-level spans of the paragraph.
    pub fn top_spans(&self) -> Vec<SpanId> {
        self.nodes[self.root].children.clone()
    }

    /// Concatenated visible text in document order: span text, children,
    /// then each tail. Opaque nodes contribute nothing of their own.
    pub fn visible_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(self.root, &mut out);
        out
    }

    fn collect_text(&self, id: SpanId, out: &mut String) {
        let node = &self.nodes[id];
        out.push_str(&node.text);
        for &child in &node.children {
            self.collect_text(child, out);
            out.push_str(&self.nodes[child].tail);
        }
    }

    /// Parse one `w:p` element (events `[Start .. End]` inclusive).
    pub fn parse(events: &[XmlEvent]) -> anyhow::Result<SpanTree> {
        let mut tree = SpanTree::new();
        let Some(XmlEvent::Start { name, attrs }) = events.first() else {
            return Err(anyhow!("paragraph does not begin with a start tag"));
        };
        if name != "w:p" {
            return Err(anyhow!("expected w:p, found {name}"));
        }
        tree.para_attrs = attrs.clone();

        let inner = &events[1..events.len().saturating_sub(1)];
        let root = tree.root;
        tree.parse_children(root, inner, true);
        Ok(tree)
    }

    fn parse_children(&mut self, parent: SpanId, inner: &[XmlEvent], at_top: bool) {
        let mut i = 0usize;
        while i < inner.len() {
            match &inner[i] {
                XmlEvent::Start { name, .. } => {
                    let (sub, next) = subtree(inner, i);
                    match name.as_str() {
                        "w:pPr" if at_top && self.ppr.is_empty() => {
                            self.para_style = ppr_style(&sub);
                            self.para_props = ppr_run_props(&sub);
                            self.ppr = sub;
                        }
                        "w:r" => {
                            let node = parse_run(&sub);
                            self.add_child(parent, node);
                        }
                        "w:hyperlink" => {
                            let XmlEvent::Start { name, attrs } = &sub[0] else {
                                unreachable!()
                            };
                            let mut node = SpanNode::container(name.clone());
                            if let SpanKind::Container { attrs: a, .. } = &mut node.kind {
                                *a = attrs.clone();
                            }
                            let cid = self.add_child(parent, node);
                            let sub_inner = &sub[1..sub.len().saturating_sub(1)];
                            self.parse_children(cid, sub_inner, false);
                        }
                        _ => {
                            self.add_child(parent, opaque(sub));
                        }
                    }
                    i = next;
                }
                XmlEvent::Empty { .. } => {
                    self.add_child(parent, opaque(vec![inner[i].clone()]));
                    i += 1;
                }
                XmlEvent::Text { text } => {
                    // Untagged text: the preceding sibling's tail, or the
                    // container's own leading text when no sibling exists.
                    // Whitespace-only pretty-printing before the first span
                    // is dropped.
                    if let Some(&last) = self.nodes[parent].children.last() {
                        self.nodes[last].tail.push_str(text);
                    } else if !text.trim().is_empty() {
                        self.nodes[parent].text.push_str(text);
                    }
                    i += 1;
                }
                _ => {
                    self.add_child(parent, opaque(vec![inner[i].clone()]));
                    i += 1;
                }
            }
        }
    }

    /// Serialize back to a `w:p` event range.
    pub fn to_events(&self) -> Vec<XmlEvent> {
        let mut out = Vec::new();
        out.push(XmlEvent::Start {
            name: "w:p".to_string(),
            attrs: self.para_attrs.clone(),
        });
        out.extend(self.ppr.iter().cloned());
        for &child in &self.nodes[self.root].children {
            self.write_node(child, &mut out);
        }
        out.push(XmlEvent::End {
            name: "w:p".to_string(),
        });
        out
    }

    fn write_node(&self, id: SpanId, out: &mut Vec<XmlEvent>) {
        let node = &self.nodes[id];
        match &node.kind {
            SpanKind::Run { run_attrs, rpr, .. } => {
                out.push(XmlEvent::Start {
                    name: "w:r".to_string(),
                    attrs: run_attrs.clone(),
                });
                out.extend(rpr.iter().cloned());
                push_run_text(out, &node.text);
                out.push(XmlEvent::End {
                    name: "w:r".to_string(),
                });
            }
            SpanKind::Container { name, attrs } => {
                out.push(XmlEvent::Start {
                    name: name.clone(),
                    attrs: attrs.clone(),
                });
                for &child in &node.children {
                    self.write_node(child, out);
                }
                out.push(XmlEvent::End { name: name.clone() });
            }
            SpanKind::Opaque { events } => out.extend(events.iter().cloned()),
        }
        if !node.tail.is_empty() {
            out.push(XmlEvent::Text {
                text: node.tail.clone(),
            });
        }
    }
}

impl Default for SpanTree {
    fn default() -> Self {
        SpanTree::new()
    }
}

fn opaque(events: Vec<XmlEvent>) -> SpanNode {
    SpanNode {
        kind: SpanKind::Opaque { events },
        text: String::new(),
        children: Vec::new(),
        tail: String::new(),
    }
}

/// Collect the subtree starting at `start` (a Start event); returns the
/// events inclusive of the matching End and the index just past it.
fn subtree(events: &[XmlEvent], start: usize) -> (Vec<XmlEvent>, usize) {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut i = start;
    while i < events.len() {
        match &events[i] {
            XmlEvent::Start { .. } => depth += 1,
            XmlEvent::End { .. } => depth -= 1,
            _ => {}
        }
        out.push(events[i].clone());
        i += 1;
        if depth == 0 {
            break;
        }
    }
    (out, i)
}

fn ppr_style(ppr: &[XmlEvent]) -> Option<String> {
    for ev in ppr {
        if let XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } = ev {
            if name == "w:pStyle" {
                return find_attr(attrs, "w:val")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
            }
        }
    }
    None
}

fn ppr_run_props(ppr: &[XmlEvent]) -> StyleProps {
    // Only the w:rPr nested directly under w:pPr counts.
    let mut depth = 0i32;
    for (i, ev) in ppr.iter().enumerate() {
        match ev {
            XmlEvent::Start { name, .. } => {
                depth += 1;
                if name == "w:rPr" && depth == 2 {
                    let (sub, _) = subtree(&ppr[i..], 0);
                    return StyleProps::from_rpr_events(&sub[1..sub.len().saturating_sub(1)]);
                }
            }
            XmlEvent::End { .. } => depth -= 1,
            _ => {}
        }
    }
    StyleProps::default()
}

/// Model a `w:r` subtree as a leaf span. Runs containing anything beyond
/// `w:rPr`, `w:t`, and simple control glyphs stay opaque so nothing is lost.
fn parse_run(events: &[XmlEvent]) -> SpanNode {
    match try_parse_run(events) {
        Ok(node) => node,
        Err(_) => opaque(events.to_vec()),
    }
}

fn try_parse_run(events: &[XmlEvent]) -> anyhow::Result<SpanNode> {
    let Some(XmlEvent::Start { attrs, .. }) = events.first() else {
        return Err(anyhow!("not a run"));
    };
    let run_attrs = attrs.clone();
    let inner = &events[1..events.len().saturating_sub(1)];

    let mut rpr: Vec<XmlEvent> = Vec::new();
    let mut named_style: Option<String> = None;
    let mut text = String::new();

    let mut i = 0usize;
    while i < inner.len() {
        match &inner[i] {
            XmlEvent::Start { name, .. } if name == "w:rPr" && rpr.is_empty() => {
                let (sub, next) = subtree(inner, i);
                named_style = rpr_named_style(&sub);
                rpr = sub;
                i = next;
            }
            XmlEvent::Start { name, .. } if name == "w:t" => {
                let (sub, next) = subtree(inner, i);
                for ev in &sub[1..sub.len().saturating_sub(1)] {
                    match ev {
                        XmlEvent::Text { text: t } => text.push_str(t),
                        _ => return Err(anyhow!("markup inside w:t")),
                    }
                }
                i = next;
            }
            XmlEvent::Empty { name, attrs } => {
                match name.as_str() {
                    // lastRenderedPageBreak is a stale rendering hint; Word
                    // recomputes it, so dropping it on rebuild is safe.
                    "w:t" | "w:rPr" | "w:softHyphen" | "w:lastRenderedPageBreak" => {}
                    "w:tab" | "w:ptab" => text.push('\t'),
                    "w:cr" => text.push('\n'),
                    "w:br" => {
                        if find_attr(attrs, "w:type").unwrap_or("textWrapping") != "textWrapping" {
                            return Err(anyhow!("non-text break"));
                        }
                        text.push('\n');
                    }
                    "w:noBreakHyphen" => text.push('-'),
                    _ => return Err(anyhow!("unmodeled run child: {name}")),
                }
                i += 1;
            }
            XmlEvent::Text { text: t } if t.trim().is_empty() => i += 1,
            other => return Err(anyhow!("unmodeled run content: {other:?}")),
        }
    }

    let props = if rpr.is_empty() {
        StyleProps::default()
    } else {
        StyleProps::from_rpr_events(&rpr[1..rpr.len().saturating_sub(1)])
    };

    Ok(SpanNode {
        kind: SpanKind::Run {
            run_attrs,
            rpr,
            named_style,
            props,
        },
        text,
        children: Vec::new(),
        tail: String::new(),
    })
}

fn rpr_named_style(rpr: &[XmlEvent]) -> Option<String> {
    for ev in rpr {
        if let XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } = ev {
            if name == "w:rStyle" {
                return find_attr(attrs, "w:val")
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
            }
        }
    }
    None
}

/// Emit run text as `w:t`/`w:tab`/`w:br` events, restoring tabs and breaks
/// to their element forms.
pub fn push_run_text(out: &mut Vec<XmlEvent>, text: &str) {
    fn flush(buf: &mut String, out: &mut Vec<XmlEvent>) {
        if buf.is_empty() {
            return;
        }
        let mut attrs = Vec::new();
        if buf.starts_with(|c: char| c.is_whitespace()) || buf.ends_with(|c: char| c.is_whitespace())
        {
            attrs.push(("xml:space".to_string(), "preserve".to_string()));
        }
        out.push(XmlEvent::Start {
            name: "w:t".to_string(),
            attrs,
        });
        out.push(XmlEvent::Text {
            text: std::mem::take(buf),
        });
        out.push(XmlEvent::End {
            name: "w:t".to_string(),
        });
    }

    let mut buf = String::new();
    for ch in text.chars() {
        match ch {
            '\t' => {
                flush(&mut buf, out);
                out.push(XmlEvent::Empty {
                    name: "w:tab".to_string(),
                    attrs: Vec::new(),
                });
            }
            '\n' => {
                flush(&mut buf, out);
                out.push(XmlEvent::Empty {
                    name: "w:br".to_string(),
                    attrs: Vec::new(),
                });
            }
            _ => buf.push(ch),
        }
    }
    flush(&mut buf, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::styles::StyleAttr;
    use crate::docx::xml::parse_part;

    fn para_events(xml: &str) -> Vec<XmlEvent> {
        let part = parse_part("test.xml", xml.as_bytes()).expect("parse xml");
        part.events
    }

    #[test]
    fn parses_runs_and_visible_text() {
        let events = para_events(
            r#"<w:p><w:pPr><w:pStyle w:val="Body"/></w:pPr><w:r><w:rPr><w:b/></w:rPr><w:t>Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>"#,
        );
        let tree = SpanTree::parse(&events).expect("parse paragraph");
        assert_eq!(tree.para_style.as_deref(), Some("Body"));
        assert_eq!(tree.visible_text(), "Hello world");
        let tops = tree.top_spans();
        assert_eq!(tops.len(), 2);
        let SpanKind::Run { props, .. } = &tree.node(tops[0]).kind else {
            panic!("expected run");
        };
        assert_eq!(props.get(StyleAttr::Bold), Some("1"));
    }

    #[test]
    fn tabs_and_breaks_roundtrip_as_elements() {
        let events =
            para_events(r#"<w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p>"#);
        let tree = SpanTree::parse(&events).expect("parse paragraph");
        assert_eq!(tree.visible_text(), "a\tb\nc");
        let back = tree.to_events();
        let tabs = back
            .iter()
            .filter(|e| matches!(e, XmlEvent::Empty { name, .. } if name == "w:tab"))
            .count();
        let brs = back
            .iter()
            .filter(|e| matches!(e, XmlEvent::Empty { name, .. } if name == "w:br"))
            .count();
        assert_eq!((tabs, brs), (1, 1));
    }

    #[test]
    fn hyperlink_becomes_container_with_run_children() {
        let events = para_events(
            r#"<w:p><w:hyperlink r:id="rId4"><w:r><w:t>link</w:t></w:r></w:hyperlink><w:r><w:t> after</w:t></w:r></w:p>"#,
        );
        let tree = SpanTree::parse(&events).expect("parse paragraph");
        let tops = tree.top_spans();
        assert_eq!(tops.len(), 2);
        let SpanKind::Container { name, attrs } = &tree.node(tops[0]).kind else {
            panic!("expected container");
        };
        assert_eq!(name, "w:hyperlink");
        assert_eq!(find_attr(attrs, "r:id"), Some("rId4"));
        assert_eq!(tree.node(tops[0]).children.len(), 1);
        assert_eq!(tree.visible_text(), "link after");
    }

    #[test]
    fn unknown_run_content_is_kept_opaque() {
        let events = para_events(
            r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:footnoteReference w:id="2"/></w:r><w:r><w:t>x</w:t></w:r></w:p>"#,
        );
        let tree = SpanTree::parse(&events).expect("parse paragraph");
        let tops = tree.top_spans();
        assert!(tree.node(tops[0]).is_opaque());
        assert_eq!(tree.visible_text(), "x");
        // Opaque events survive serialization byte-for-byte.
        let back = tree.to_events();
        assert!(back
            .iter()
            .any(|e| matches!(e, XmlEvent::Empty { name, .. } if name == "w:footnoteReference")));
    }

    #[test]
    fn merged_whitespace_edges_get_space_preserve() {
        let mut out = Vec::new();
        push_run_text(&mut out, " padded ");
        let XmlEvent::Start { attrs, .. } = &out[0] else {
            panic!("expected w:t start");
        };
        assert_eq!(find_attr(attrs, "xml:space"), Some("preserve"));
    }
}
