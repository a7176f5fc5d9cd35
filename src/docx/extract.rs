use crate::docx::span::{SpanKind, SpanTree};
use crate::docx::xml::XmlEvent;

/// Raw formatting captured from a run, reapplied verbatim to rebuilt runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapturedFormat {
    pub run_attrs: Vec<(String, String)>,
    pub rpr: Vec<XmlEvent>,
}

/// One paragraph flattened to a single translatable string. Runs whose
/// formatting diverges from the first run's are wrapped in
/// `<run id='K'>…</run>` markers; the first run's format is the fallback
/// for unmarked text.
#[derive(Clone, Debug, Default)]
pub struct ExtractedSegment {
    pub text: String,
    pub base: Option<CapturedFormat>,
    pub marked: Vec<CapturedFormat>,
}

impl ExtractedSegment {
    pub fn format_for(&self, marker: Option<usize>) -> CapturedFormat {
        marker
            .and_then(|id| self.marked.get(id).cloned())
            .or_else(|| self.base.clone())
            .unwrap_or_default()
    }
}

/// Flatten the paragraph's top-level runs into marked segment text.
/// Containers and opaque islands contribute nothing here; their content is
/// handled run-by-run by the orchestrator.
pub fn extract_segment(tree: &SpanTree) -> ExtractedSegment {
    let mut seg = ExtractedSegment::default();
    for id in tree.top_spans() {
        let node = tree.node(id);
        let SpanKind::Run { run_attrs, rpr, .. } = &node.kind else {
            continue;
        };
        let format = CapturedFormat {
            run_attrs: run_attrs.clone(),
            rpr: rpr.clone(),
        };
        match &seg.base {
            None => {
                seg.base = Some(format);
                seg.text.push_str(&node.text);
            }
            Some(base) if base.rpr == format.rpr => seg.text.push_str(&node.text),
            Some(_) => {
                let marker = seg.marked.len();
                seg.text.push_str(&format!("<run id='{marker}'>"));
                seg.text.push_str(&node.text);
                seg.text.push_str("</run>");
                seg.marked.push(format);
            }
        }
    }
    seg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::span::SpanNode;
    use crate::docx::styles::{StyleAttr, StyleProps};

    fn run_with_rpr(text: &str, rpr_child: Option<&str>) -> SpanNode {
        let mut props = StyleProps::default();
        let mut rpr = Vec::new();
        if let Some(name) = rpr_child {
            props.set(StyleAttr::Bold, "1");
            rpr.push(XmlEvent::Start {
                name: "w:rPr".to_string(),
                attrs: Vec::new(),
            });
            rpr.push(XmlEvent::Empty {
                name: name.to_string(),
                attrs: Vec::new(),
            });
            rpr.push(XmlEvent::End {
                name: "w:rPr".to_string(),
            });
        }
        let mut node = SpanNode::run(props, text);
        if let SpanKind::Run { rpr: r, .. } = &mut node.kind {
            *r = rpr;
        }
        node
    }

    #[test]
    fn uniform_paragraph_has_no_markers() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        tree.add_child(root, run_with_rpr("Hello ", None));
        tree.add_child(root, run_with_rpr("world", None));
        let seg = extract_segment(&tree);
        assert_eq!(seg.text, "Hello world");
        assert!(seg.marked.is_empty());
        assert!(seg.base.is_some());
    }

    #[test]
    fn divergent_runs_are_marked_in_order() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        tree.add_child(root, run_with_rpr("plain ", None));
        tree.add_child(root, run_with_rpr("bold", Some("w:b")));
        tree.add_child(root, run_with_rpr(" and ", None));
        tree.add_child(root, run_with_rpr("italic", Some("w:i")));
        let seg = extract_segment(&tree);
        assert_eq!(
            seg.text,
            "plain <run id='0'>bold</run> and <run id='1'>italic</run>"
        );
        assert_eq!(seg.marked.len(), 2);
    }

    #[test]
    fn format_for_falls_back_to_first_run() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        tree.add_child(root, run_with_rpr("a", Some("w:b")));
        tree.add_child(root, run_with_rpr("b", Some("w:i")));
        let seg = extract_segment(&tree);
        assert_eq!(seg.format_for(None), seg.base.clone().expect("base"));
        assert_eq!(seg.format_for(Some(0)), seg.marked[0]);
        // Out-of-range markers degrade to the base format.
        assert_eq!(seg.format_for(Some(9)), seg.base.clone().expect("base"));
    }
}
