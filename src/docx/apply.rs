use once_cell::sync::Lazy;
use regex::Regex;

use crate::docx::extract::ExtractedSegment;
use crate::docx::span::{SpanId, SpanKind, SpanNode, SpanTree};

static RUN_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<run id='([0-9]+)'>(.*?)</run>").expect("run marker regex"));

/// A slice of translated text bound to the format of a marked run, or to
/// the paragraph's base format when unmarked.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkedChunk {
    pub marker: Option<usize>,
    pub text: String,
}

/// Split a translated marked string back into chunks. Markers the MT
/// mangled beyond recognition are simply not matched; their text survives
/// as unmarked content carrying the base format.
pub fn parse_marked(text: &str) -> Vec<MarkedChunk> {
    let mut chunks = Vec::new();
    let mut pos = 0usize;
    for caps in RUN_MARKER_RE.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        if whole.start() > pos {
            chunks.push(MarkedChunk {
                marker: None,
                text: text[pos..whole.start()].to_string(),
            });
        }
        let marker = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<usize>().ok());
        chunks.push(MarkedChunk {
            marker,
            text: caps.get(2).map(|m| m.as_str()).unwrap_or_default().to_string(),
        });
        pos = whole.end();
    }
    if pos < text.len() {
        chunks.push(MarkedChunk {
            marker: None,
            text: text[pos..].to_string(),
        });
    }
    chunks
}

/// Replace the paragraph's top-level runs with runs rebuilt from the
/// translated chunks. Opaque islands and containers keep their positions;
/// the new runs take the place of the first original run.
pub fn rebuild_paragraph(tree: &mut SpanTree, translated: &str, seg: &ExtractedSegment) {
    let mut new_runs: Vec<SpanId> = Vec::new();
    for chunk in parse_marked(translated) {
        if chunk.text.is_empty() {
            continue;
        }
        let format = seg.format_for(chunk.marker);
        let node = SpanNode {
            kind: SpanKind::Run {
                run_attrs: format.run_attrs,
                rpr: format.rpr,
                named_style: None,
                props: Default::default(),
            },
            text: chunk.text,
            children: Vec::new(),
            tail: String::new(),
        };
        new_runs.push(tree.add(node));
    }

    let old = tree.top_spans();
    let insert_at = old.iter().position(|&id| tree.node(id).is_run());
    let mut rebuilt: Vec<SpanId> = Vec::new();
    for (i, id) in old.iter().enumerate() {
        if Some(i) == insert_at {
            rebuilt.extend(new_runs.iter().copied());
        }
        if !tree.node(*id).is_run() {
            rebuilt.push(*id);
        }
    }
    if insert_at.is_none() {
        rebuilt.extend(new_runs.iter().copied());
    }
    let root = tree.root;
    tree.node_mut(root).children = rebuilt;
}
