use std::collections::BTreeMap;

use thiserror::Error;

use crate::docx::span::{SpanId, SpanKind, SpanTree};
use crate::docx::styles::{
    resolve, values_equal, InheritedContext, StyleAttr, StyleProps, StyleSheet,
};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("visible text changed during normalization (before={before:?}, after={after:?})")]
    InvariantViolation { before: String, after: String },
}

#[derive(Clone, Debug)]
pub struct NormalizeOptions {
    /// Merge whitespace-only spans into the preceding span regardless of
    /// style. Off by default; both behaviors exist in the wild.
    pub merge_whitespace_only: bool,
    pub tracked: Vec<StyleAttr>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            merge_whitespace_only: false,
            tracked: StyleAttr::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NormalizeOutcome {
    pub stripped: usize,
    pub merged: usize,
}

/// How a span's own sources resolve, before the inherited context fills the
/// gaps. `Unresolvable` marks a dangling named-style reference; such spans
/// are left exactly as found.
enum SpanResolution {
    Resolved(StyleProps),
    Unresolvable,
}

fn span_resolution(tree: &SpanTree, id: SpanId, sheet: &StyleSheet, tracked: &[StyleAttr]) -> SpanResolution {
    let SpanKind::Run {
        named_style, props, ..
    } = &tree.node(id).kind
    else {
        return SpanResolution::Resolved(StyleProps::default());
    };
    let mut chain: Vec<&StyleProps> = vec![props];
    if let Some(style_id) = named_style.as_deref() {
        match sheet.named_chain(style_id) {
            Some(mut named) => chain.append(&mut named),
            None => return SpanResolution::Unresolvable,
        }
    }
    let mut resolved = StyleProps::default();
    for &attr in tracked {
        if let Some(v) = resolve(attr, &chain) {
            resolved.set(attr, v);
        }
    }
    SpanResolution::Resolved(resolved)
}

/// Inherited context at the paragraph level: paragraph mark run properties,
/// the paragraph's named style chain, then the document defaults.
pub fn paragraph_context(tree: &SpanTree, sheet: &StyleSheet, tracked: &[StyleAttr]) -> InheritedContext {
    let mut chain: Vec<&StyleProps> = vec![&tree.para_props];
    if let Some(style_id) = tree.para_style.as_deref() {
        if let Some(mut named) = sheet.named_chain(style_id) {
            chain.append(&mut named);
        }
    }
    chain.push(&sheet.doc_defaults);
    InheritedContext::from_chain(tracked, &chain)
}

/// Normalize one paragraph: strip spans indistinguishable from their
/// inherited context, then merge visually identical siblings. The visible
/// text (whitespace-insensitive) is verified unchanged; on violation the
/// caller keeps the original paragraph.
pub fn normalize_paragraph(
    tree: &mut SpanTree,
    sheet: &StyleSheet,
    opts: &NormalizeOptions,
) -> Result<NormalizeOutcome, NormalizeError> {
    let before = tree.visible_text();
    let ctx = paragraph_context(tree, sheet, &opts.tracked);

    let root = tree.root;
    let mut outcome = NormalizeOutcome::default();
    strip_pass(tree, sheet, root, &ctx, &mut outcome.stripped);
    merge_pass(tree, sheet, root, &ctx, opts, &mut outcome.merged);

    let after = tree.visible_text();
    if !text_equal_ignoring_whitespace(&before, &after) {
        return Err(NormalizeError::InvariantViolation { before, after });
    }
    Ok(outcome)
}

pub fn text_equal_ignoring_whitespace(a: &str, b: &str) -> bool {
    let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    squash(a) == squash(b)
}

/// Pass A. Children are flattened depth-first before the decision at the
/// current level. In the run model "discarding the wrapping" clears the
/// run's property set; the text carrier stays in place.
fn strip_pass(
    tree: &mut SpanTree,
    sheet: &StyleSheet,
    parent: SpanId,
    ctx: &InheritedContext,
    stripped: &mut usize,
) {
    let children = tree.node(parent).children.clone();
    for child in children {
        let resolution = span_resolution(tree, child, sheet, ctx.tracked());
        let resolved = match resolution {
            SpanResolution::Resolved(p) => p,
            SpanResolution::Unresolvable => continue,
        };

        if matches!(tree.node(child).kind, SpanKind::Container { .. }) {
            let child_ctx = ctx.overridden_by(&resolved);
            strip_pass(tree, sheet, child, &child_ctx, stripped);
            continue;
        }

        let carries_style = match &tree.node(child).kind {
            SpanKind::Run {
                rpr, named_style, ..
            } => !rpr.is_empty() || named_style.is_some(),
            _ => false,
        };
        if !carries_style {
            continue;
        }

        let invisible = resolved
            .iter()
            .all(|(attr, value)| values_equal(attr, value, ctx.get(attr)));
        if invisible {
            if let SpanKind::Run {
                rpr,
                named_style,
                props,
                ..
            } = &mut tree.node_mut(child).kind
            {
                rpr.clear();
                *named_style = None;
                *props = StyleProps::default();
                *stripped += 1;
            }
        }
    }
}

/// Effective per-attribute values of a run under `ctx`: attributes the span
/// resolves win, the context fills the rest. Indexed font variants collapse
/// onto the inherited face. `None` marks an unresolvable span.
fn effective_values(
    tree: &SpanTree,
    id: SpanId,
    sheet: &StyleSheet,
    ctx: &InheritedContext,
) -> Option<BTreeMap<StyleAttr, String>> {
    let resolved = match span_resolution(tree, id, sheet, ctx.tracked()) {
        SpanResolution::Resolved(p) => p,
        SpanResolution::Unresolvable => return None,
    };
    let mut values = BTreeMap::new();
    for &attr in ctx.tracked() {
        let inherited = ctx.get(attr);
        let v = match resolved.get(attr) {
            Some(own) if !values_equal(attr, own, inherited) => own,
            _ => inherited,
        };
        values.insert(attr, v.to_string());
    }
    Some(values)
}

/// The accumulator for left-to-right merging.
enum MergeWindow {
    Closed,
    Run(SpanId, BTreeMap<StyleAttr, String>),
    Container(SpanId),
}

/// Pass B. Two sibling variants: leaf runs concatenate text; containers of
/// identical element and attributes splice child lists. A non-empty tail on
/// either side blocks the merge; an absorbed tail transfers and closes the
/// window.
fn merge_pass(
    tree: &mut SpanTree,
    sheet: &StyleSheet,
    parent: SpanId,
    ctx: &InheritedContext,
    opts: &NormalizeOptions,
    merged: &mut usize,
) {
    let mut window = MergeWindow::Closed;
    let mut keep: Vec<SpanId> = Vec::new();
    for child in tree.node(parent).children.clone() {
        match &tree.node(child).kind {
            SpanKind::Opaque { .. } => {
                window = MergeWindow::Closed;
                keep.push(child);
            }
            SpanKind::Container { name, attrs } => {
                let candidate = match &window {
                    MergeWindow::Container(prev) => {
                        let prev_node = tree.node(*prev);
                        let same = match &prev_node.kind {
                            SpanKind::Container {
                                name: pname,
                                attrs: pattrs,
                            } => pname == name && pattrs == attrs,
                            _ => false,
                        };
                        (same && prev_node.tail.is_empty()).then_some(*prev)
                    }
                    _ => None,
                };
                if let Some(prev) = candidate {
                    let absorbed = tree.node(child).children.clone();
                    let tail = std::mem::take(&mut tree.node_mut(child).tail);
                    tree.node_mut(prev).children.extend(absorbed);
                    *merged += 1;
                    if tail.is_empty() {
                        window = MergeWindow::Container(prev);
                    } else {
                        tree.node_mut(prev).tail = tail;
                        window = MergeWindow::Closed;
                    }
                } else {
                    window = if tree.node(child).tail.is_empty() {
                        MergeWindow::Container(child)
                    } else {
                        MergeWindow::Closed
                    };
                    keep.push(child);
                }
            }
            SpanKind::Run { .. } => {
                let node = tree.node(child);
                let whitespace_only =
                    opts.merge_whitespace_only && node.text.trim().is_empty();
                let eff = effective_values(tree, child, sheet, ctx);

                let absorber = match (&window, &eff) {
                    (MergeWindow::Run(prev, prev_eff), Some(cur_eff)) => {
                        (tree.node(*prev).tail.is_empty()
                            && (whitespace_only || prev_eff == cur_eff))
                            .then_some(*prev)
                    }
                    (MergeWindow::Run(prev, _), None) if whitespace_only => {
                        tree.node(*prev).tail.is_empty().then_some(*prev)
                    }
                    _ => None,
                };

                match (absorber, eff) {
                    (Some(prev), _) => {
                        let text = std::mem::take(&mut tree.node_mut(child).text);
                        let tail = std::mem::take(&mut tree.node_mut(child).tail);
                        tree.node_mut(prev).text.push_str(&text);
                        *merged += 1;
                        if !tail.is_empty() {
                            tree.node_mut(prev).tail = tail;
                            window = MergeWindow::Closed;
                        }
                    }
                    (None, Some(cur_eff)) => {
                        window = if tree.node(child).tail.is_empty() {
                            MergeWindow::Run(child, cur_eff)
                        } else {
                            MergeWindow::Closed
                        };
                        keep.push(child);
                    }
                    (None, None) => {
                        // Unresolvable style: left as found, breaks adjacency.
                        window = MergeWindow::Closed;
                        keep.push(child);
                    }
                }
            }
        }
    }
    tree.node_mut(parent).children = keep.clone();

    // Recurse after the sibling walk so children spliced from an absorbed
    // container get their own merge round (keeps the pass idempotent).
    for child in keep {
        if matches!(tree.node(child).kind, SpanKind::Container { .. }) {
            merge_pass(tree, sheet, child, ctx, opts, merged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::span::SpanNode;

    fn props(pairs: &[(StyleAttr, &str)]) -> StyleProps {
        let mut p = StyleProps::default();
        for (a, v) in pairs {
            p.set(*a, *v);
        }
        p
    }

    fn styled_run(pairs: &[(StyleAttr, &str)], text: &str) -> SpanNode {
        let mut node = SpanNode::run(props(pairs), text);
        if let SpanKind::Run { rpr, .. } = &mut node.kind {
            // A non-empty rPr marks the run as carrying a style of its own.
            rpr.push(crate::docx::xml::XmlEvent::Start {
                name: "w:rPr".to_string(),
                attrs: Vec::new(),
            });
            rpr.push(crate::docx::xml::XmlEvent::End {
                name: "w:rPr".to_string(),
            });
        }
        node
    }

    fn run_texts(tree: &SpanTree) -> Vec<String> {
        tree.top_spans()
            .iter()
            .map(|&id| tree.node(id).text.clone())
            .collect()
    }

    #[test]
    fn redundant_explicit_attr_is_stripped_then_merged() {
        // Two adjacent bold runs; one also sets highlight to the inherited
        // default. The explicit highlight is redundant, so both merge.
        let mut tree = SpanTree::new();
        let root = tree.root;
        tree.add_child(
            root,
            styled_run(&[(StyleAttr::Bold, "1"), (StyleAttr::Highlight, "none")], "Hello "),
        );
        tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "world"));

        let sheet = StyleSheet::default();
        let out = normalize_paragraph(&mut tree, &sheet, &NormalizeOptions::default())
            .expect("normalize");
        assert_eq!(out.merged, 1);
        assert_eq!(run_texts(&tree), vec!["Hello world"]);
        assert_eq!(tree.visible_text(), "Hello world");
    }

    #[test]
    fn strip_clears_context_identical_formatting() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        // Everything this run sets equals the policy defaults.
        tree.add_child(
            root,
            styled_run(&[(StyleAttr::Bold, "0"), (StyleAttr::Highlight, "none")], "plain"),
        );
        let sheet = StyleSheet::default();
        let out = normalize_paragraph(&mut tree, &sheet, &NormalizeOptions::default())
            .expect("normalize");
        assert_eq!(out.stripped, 1);
        let id = tree.top_spans()[0];
        let SpanKind::Run { rpr, props, .. } = &tree.node(id).kind else {
            panic!("expected run");
        };
        assert!(rpr.is_empty());
        assert!(props.is_empty());
    }

    #[test]
    fn divergent_formatting_does_not_merge() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "bold"));
        tree.add_child(root, styled_run(&[(StyleAttr::Italic, "1")], "italic"));
        let sheet = StyleSheet::default();
        let out = normalize_paragraph(&mut tree, &sheet, &NormalizeOptions::default())
            .expect("normalize");
        assert_eq!(out.merged, 0);
        assert_eq!(run_texts(&tree).len(), 2);
    }

    #[test]
    fn tail_blocks_merge_and_transfers_on_absorb() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        let a = tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "a"));
        let b = tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "b"));
        tree.node_mut(b).tail = " between ".to_string();
        tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "c"));

        let sheet = StyleSheet::default();
        let out = normalize_paragraph(&mut tree, &sheet, &NormalizeOptions::default())
            .expect("normalize");
        // b is absorbed into a, its tail transfers and closes the window, so
        // c stays separate.
        assert_eq!(out.merged, 1);
        assert_eq!(run_texts(&tree), vec!["ab", "c"]);
        assert_eq!(tree.node(a).tail, " between ");
        assert_eq!(tree.visible_text(), "ab between c");
    }

    #[test]
    fn whitespace_only_span_merges_when_policy_enabled() {
        let build = || {
            let mut tree = SpanTree::new();
            let root = tree.root;
            tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "a"));
            tree.add_child(root, styled_run(&[(StyleAttr::Italic, "1")], " "));
            tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "b"));
            tree
        };
        let sheet = StyleSheet::default();

        let mut strict = build();
        let out = normalize_paragraph(&mut strict, &sheet, &NormalizeOptions::default())
            .expect("normalize");
        assert_eq!(out.merged, 0);

        let mut lax = build();
        let opts = NormalizeOptions {
            merge_whitespace_only: true,
            ..NormalizeOptions::default()
        };
        let out = normalize_paragraph(&mut lax, &sheet, &opts).expect("normalize");
        // The italic space folds into "a"; the window keeps the bold values,
        // so "b" merges too.
        assert_eq!(out.merged, 2);
        assert_eq!(run_texts(&lax), vec!["a b"]);
    }

    #[test]
    fn unresolvable_style_is_left_alone_and_breaks_adjacency() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "a"));
        let mut dangling = styled_run(&[(StyleAttr::Bold, "1")], "x");
        if let SpanKind::Run { named_style, .. } = &mut dangling.kind {
            *named_style = Some("Ghost".to_string());
        }
        tree.add_child(root, dangling);
        tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "b"));

        let sheet = StyleSheet::default();
        let out = normalize_paragraph(&mut tree, &sheet, &NormalizeOptions::default())
            .expect("normalize");
        assert_eq!(out.merged, 0);
        assert_eq!(run_texts(&tree), vec!["a", "x", "b"]);
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        tree.add_child(
            root,
            styled_run(&[(StyleAttr::Bold, "1"), (StyleAttr::Highlight, "none")], "one "),
        );
        tree.add_child(root, styled_run(&[(StyleAttr::Bold, "1")], "two "));
        tree.add_child(root, styled_run(&[(StyleAttr::Italic, "1")], "three"));

        let sheet = StyleSheet::default();
        let opts = NormalizeOptions::default();
        normalize_paragraph(&mut tree, &sheet, &opts).expect("first pass");
        let snapshot = run_texts(&tree);
        let out = normalize_paragraph(&mut tree, &sheet, &opts).expect("second pass");
        assert_eq!(out.merged, 0);
        assert_eq!(out.stripped, 0);
        assert_eq!(run_texts(&tree), snapshot);
    }

    #[test]
    fn identical_containers_splice_children() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        let c1 = tree.add_child(root, SpanNode::container("w:hyperlink"));
        tree.add_child(c1, styled_run(&[], "click"));
        let c2 = tree.add_child(root, SpanNode::container("w:hyperlink"));
        tree.add_child(c2, styled_run(&[], " here"));

        let sheet = StyleSheet::default();
        let out = normalize_paragraph(&mut tree, &sheet, &NormalizeOptions::default())
            .expect("normalize");
        assert!(out.merged >= 1);
        assert_eq!(tree.top_spans().len(), 1);
        // The spliced children then merge among themselves.
        assert_eq!(tree.node(tree.top_spans()[0]).children.len(), 1);
        assert_eq!(tree.visible_text(), "click here");
    }

    #[test]
    fn visible_text_is_preserved_across_normalization() {
        let mut tree = SpanTree::new();
        let root = tree.root;
        for (i, word) in ["alpha ", "beta ", "gamma"].iter().enumerate() {
            let style: &[(StyleAttr, &str)] = if i % 2 == 0 {
                &[(StyleAttr::Bold, "1")]
            } else {
                &[(StyleAttr::Bold, "1"), (StyleAttr::Highlight, "none")]
            };
            tree.add_child(root, styled_run(style, word));
        }
        let before = tree.visible_text();
        let sheet = StyleSheet::default();
        normalize_paragraph(&mut tree, &sheet, &NormalizeOptions::default()).expect("normalize");
        assert_eq!(tree.visible_text(), before);
    }
}
