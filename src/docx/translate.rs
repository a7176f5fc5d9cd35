use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Context;

use crate::backend::SegmentTranslator;
use crate::docx::apply::rebuild_paragraph;
use crate::docx::extract::extract_segment;
use crate::docx::normalize::{normalize_paragraph, NormalizeError, NormalizeOptions};
use crate::docx::package::DocPackage;
use crate::docx::span::{SpanId, SpanKind, SpanTree};
use crate::docx::styles::StyleSheet;
use crate::docx::xml::{find_attr, parse_part, write_part, XmlEvent, XmlPart};
use crate::progress::ConsoleProgress;
use crate::protect::{
    protect, repair_spacing, restore, split_tag_chunks, Chunk, StripStrictness, DEFAULT_DELIMITERS,
};

/// How segments are carved out of a paragraph.
///
/// `Segments` sends one marked string per paragraph, so the backend sees
/// sentence context; `Chunks` translates each run (and each non-tag chunk
/// within it) separately, so the backend never sees markup at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    #[default]
    Segments,
    Chunks,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Strategy> {
        match name {
            "segments" => Some(Strategy::Segments),
            "chunks" => Some(Strategy::Chunks),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TranslateOptions {
    pub strategy: Strategy,
    pub strictness: StripStrictness,
    pub normalize: NormalizeOptions,
    pub delimiters: Vec<char>,
    pub translate_tables: bool,
    pub translate_headers: bool,
    pub translate_footers: bool,
    pub translate_footnotes: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        TranslateOptions {
            strategy: Strategy::default(),
            strictness: StripStrictness::default(),
            normalize: NormalizeOptions::default(),
            delimiters: DEFAULT_DELIMITERS.to_vec(),
            translate_tables: true,
            translate_headers: true,
            translate_footers: true,
            translate_footnotes: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TranslateStats {
    pub paragraphs: usize,
    pub segments: usize,
    pub failed_segments: usize,
    pub stripped_spans: usize,
    pub merged_spans: usize,
    pub untouched_paragraphs: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParaContainer {
    Body,
    Table,
    Header,
    Footer,
    Footnote,
}

#[derive(Clone, Copy, Debug)]
struct ParaRange {
    start: usize,
    /// One past the closing `w:p` event.
    end: usize,
    container: ParaContainer,
}

/// Drives normalize → protect → translate → restore across a document,
/// paragraph by paragraph, in a fixed global order: body, tables, headers,
/// footers, footnotes. Backend failures are per-segment and never abort the
/// run.
pub struct DocTranslator<'a, T: SegmentTranslator> {
    backend: &'a T,
    opts: TranslateOptions,
    progress: &'a ConsoleProgress,
}

impl<'a, T: SegmentTranslator> DocTranslator<'a, T> {
    pub fn new(backend: &'a T, opts: TranslateOptions, progress: &'a ConsoleProgress) -> Self {
        DocTranslator {
            backend,
            opts,
            progress,
        }
    }

    pub fn translate_docx(&self, input: &Path, output: &Path) -> anyhow::Result<TranslateStats> {
        self.run(input, output, true)
    }

    /// Normalization-only rewrite: merge tag soup, translate nothing.
    pub fn clean_docx(&self, input: &Path, output: &Path) -> anyhow::Result<TranslateStats> {
        self.run(input, output, false)
    }

    fn run(&self, input: &Path, output: &Path, translate: bool) -> anyhow::Result<TranslateStats> {
        let pkg = DocPackage::read(input)?;
        let sheet = match pkg.entry("word/styles.xml") {
            Some(ent) if !ent.data.is_empty() => {
                let part = parse_part(&ent.name, &ent.data).context("parse word/styles.xml")?;
                StyleSheet::parse(&part)
            }
            _ => StyleSheet::default(),
        };

        let mut stats = TranslateStats::default();
        let mut replacements: HashMap<String, Vec<u8>> = HashMap::new();

        let doc = match pkg.entry("word/document.xml") {
            Some(ent) if !ent.data.is_empty() => {
                let mut part = parse_part(&ent.name, &ent.data).context("parse word/document.xml")?;
                let header_footer = referenced_header_footer_parts(&pkg, &part);
                self.process_part(&mut part, &sheet, ParaContainer::Body, translate, &mut stats);
                replacements.insert(part.name.clone(), write_part(&part));
                Some(header_footer)
            }
            _ => None,
        };

        if let Some((headers, footers)) = doc {
            if self.opts.translate_headers {
                for name in headers {
                    self.process_named_part(
                        &pkg,
                        &name,
                        &sheet,
                        ParaContainer::Header,
                        translate,
                        &mut stats,
                        &mut replacements,
                    );
                }
            }
            if self.opts.translate_footers {
                for name in footers {
                    self.process_named_part(
                        &pkg,
                        &name,
                        &sheet,
                        ParaContainer::Footer,
                        translate,
                        &mut stats,
                        &mut replacements,
                    );
                }
            }
        }

        if self.opts.translate_footnotes {
            self.process_named_part(
                &pkg,
                "word/footnotes.xml",
                &sheet,
                ParaContainer::Footnote,
                translate,
                &mut stats,
                &mut replacements,
            );
        }

        pkg.write(output, &replacements)?;
        self.progress.info(format!(
            "done: {} paragraphs, {} segments ({} failed), {} spans stripped, {} merged",
            stats.paragraphs,
            stats.segments,
            stats.failed_segments,
            stats.stripped_spans,
            stats.merged_spans
        ));
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_named_part(
        &self,
        pkg: &DocPackage,
        name: &str,
        sheet: &StyleSheet,
        container: ParaContainer,
        translate: bool,
        stats: &mut TranslateStats,
        replacements: &mut HashMap<String, Vec<u8>>,
    ) {
        let Some(ent) = pkg.entry(name) else {
            return;
        };
        if ent.data.is_empty() {
            return;
        }
        let mut part = match parse_part(&ent.name, &ent.data) {
            Ok(p) => p,
            Err(e) => {
                self.progress.warn(format!("skipping {name}: {e}"));
                return;
            }
        };
        self.process_part(&mut part, sheet, container, translate, stats);
        replacements.insert(part.name.clone(), write_part(&part));
    }

    fn process_part(
        &self,
        part: &mut XmlPart,
        sheet: &StyleSheet,
        default_container: ParaContainer,
        translate: bool,
        stats: &mut TranslateStats,
    ) {
        let ranges = scan_paragraphs(part, default_container);
        let total = ranges.len();
        self.progress.info(format!("{}: {} paragraphs", part.name, total));

        // Body paragraphs before table paragraphs; everything else keeps
        // document order. Replacements splice from the back so earlier
        // ranges stay valid.
        let mut ordered: Vec<ParaRange> = Vec::with_capacity(ranges.len());
        ordered.extend(ranges.iter().filter(|r| r.container == ParaContainer::Body).copied());
        ordered.extend(ranges.iter().filter(|r| r.container == ParaContainer::Table).copied());
        ordered.extend(
            ranges
                .iter()
                .filter(|r| !matches!(r.container, ParaContainer::Body | ParaContainer::Table))
                .copied(),
        );

        let mut repls: Vec<(ParaRange, Vec<XmlEvent>)> = Vec::new();
        for (done, range) in ordered.into_iter().enumerate() {
            if range.container == ParaContainer::Table && !self.opts.translate_tables {
                continue;
            }
            stats.paragraphs += 1;
            let events = &part.events[range.start..range.end];
            if let Some(new_events) = self.process_paragraph(events, sheet, translate, stats) {
                repls.push((range, new_events));
            } else {
                stats.untouched_paragraphs += 1;
            }
            if total >= 20 && (done + 1) % 10 == 0 {
                self.progress.progress(&part.name, done + 1, total);
            }
        }

        repls.sort_by(|a, b| b.0.start.cmp(&a.0.start));
        for (range, new_events) in repls {
            part.events.splice(range.start..range.end, new_events);
        }
    }

    fn process_paragraph(
        &self,
        events: &[XmlEvent],
        sheet: &StyleSheet,
        translate: bool,
        stats: &mut TranslateStats,
    ) -> Option<Vec<XmlEvent>> {
        if paragraph_has_drawing(events) {
            return None;
        }
        let mut tree = SpanTree::parse(events).ok()?;
        if tree.visible_text().trim().is_empty() {
            return None;
        }

        match normalize_paragraph(&mut tree, sheet, &self.opts.normalize) {
            Ok(outcome) => {
                stats.stripped_spans += outcome.stripped;
                stats.merged_spans += outcome.merged;
            }
            Err(NormalizeError::InvariantViolation { .. }) => {
                // Keep the paragraph as it was; translation still proceeds
                // on the unnormalized tree.
                self.progress
                    .warn("normalization discarded for one paragraph (text invariant)");
                tree = SpanTree::parse(events).ok()?;
            }
        }

        if translate {
            match self.opts.strategy {
                Strategy::Segments => self.translate_segments(&mut tree, stats),
                Strategy::Chunks => self.translate_runs(&mut tree, stats),
            }
        }
        Some(tree.to_events())
    }

    fn translate_segments(&self, tree: &mut SpanTree, stats: &mut TranslateStats) {
        let seg = extract_segment(tree);
        if !seg.text.trim().is_empty() {
            let translated = self.translate_text(&seg.text, stats);
            rebuild_paragraph(tree, &translated, &seg);
        }
        // Container (hyperlink) content is translated run-by-run so the
        // link element survives untouched.
        for top in tree.top_spans() {
            if matches!(tree.node(top).kind, SpanKind::Container { .. }) {
                self.translate_runs_under(tree, top, stats);
            }
        }
    }

    fn translate_runs(&self, tree: &mut SpanTree, stats: &mut TranslateStats) {
        let root = tree.root;
        self.translate_runs_under(tree, root, stats);
    }

    fn translate_runs_under(&self, tree: &mut SpanTree, parent: SpanId, stats: &mut TranslateStats) {
        for child in tree.node(parent).children.clone() {
            match &tree.node(child).kind {
                SpanKind::Run { .. } => {
                    let text = tree.node(child).text.clone();
                    if text.trim().is_empty() {
                        continue;
                    }
                    let translated = self.translate_text(&text, stats);
                    tree.node_mut(child).text = translated;
                }
                SpanKind::Container { .. } => self.translate_runs_under(tree, child, stats),
                SpanKind::Opaque { .. } => {}
            }
        }
    }

    /// Protect, translate, restore, repair one string. A backend failure
    /// logs and passes the source through unchanged.
    fn translate_text(&self, source: &str, stats: &mut TranslateStats) -> String {
        let p = protect(source, self.opts.strictness);

        let translated_core = if p.core.trim().is_empty() {
            p.core.clone()
        } else {
            match self.opts.strategy {
                Strategy::Segments => {
                    stats.segments += 1;
                    match self.backend.translate_segment(&p.core) {
                        Ok(t) => t,
                        Err(e) => {
                            stats.failed_segments += 1;
                            self.progress.warn(format!("segment translation failed: {e}"));
                            return source.to_string();
                        }
                    }
                }
                Strategy::Chunks => {
                    let mut out = String::new();
                    for chunk in split_tag_chunks(&p.core) {
                        match chunk {
                            Chunk::Tag(tag) => out.push_str(&tag),
                            Chunk::Text(text) => {
                                if text.trim().is_empty() {
                                    out.push_str(&text);
                                    continue;
                                }
                                stats.segments += 1;
                                match self.backend.translate_segment(&text) {
                                    Ok(t) => out.push_str(&t),
                                    Err(e) => {
                                        stats.failed_segments += 1;
                                        self.progress
                                            .warn(format!("chunk translation failed: {e}"));
                                        out.push_str(&text);
                                    }
                                }
                            }
                        }
                    }
                    out
                }
            }
        };

        let restored = restore(&p, &translated_core);
        repair_spacing(source, &restored, &self.opts.delimiters)
    }
}

fn paragraph_has_drawing(events: &[XmlEvent]) -> bool {
    events.iter().any(|ev| match ev {
        XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } => {
            name == "w:drawing" || name == "w:object" || name.starts_with("pic:") || name == "w:pict"
        }
        _ => false,
    })
}

/// Top-level paragraph ranges of a part. Inside `word/document.xml`,
/// paragraphs under a table ancestor classify as `Table`; elsewhere the
/// part's own container kind applies.
fn scan_paragraphs(part: &XmlPart, default_container: ParaContainer) -> Vec<ParaRange> {
    let mut ranges = Vec::new();
    let mut stack: Vec<&str> = Vec::new();
    let mut tbl_depth = 0usize;
    let mut open: Option<(usize, usize, ParaContainer)> = None; // (start, depth, container)

    for (i, ev) in part.events.iter().enumerate() {
        match ev {
            XmlEvent::Start { name, .. } => {
                if name == "w:tbl" {
                    tbl_depth += 1;
                }
                if name == "w:p" && open.is_none() {
                    let container = if default_container == ParaContainer::Body && tbl_depth > 0 {
                        ParaContainer::Table
                    } else {
                        default_container
                    };
                    open = Some((i, stack.len(), container));
                }
                stack.push(name);
            }
            XmlEvent::End { name } => {
                stack.pop();
                if name == "w:tbl" {
                    tbl_depth = tbl_depth.saturating_sub(1);
                }
                if name == "w:p" {
                    if let Some((start, depth, container)) = open {
                        if depth == stack.len() {
                            ranges.push(ParaRange {
                                start,
                                end: i + 1,
                                container,
                            });
                            open = None;
                        }
                    }
                }
            }
            _ => {}
        }
    }
    ranges
}

fn normalize_rel_target(target: &str) -> String {
    let mut t = target.replace('\\', "/");
    while t.starts_with('/') {
        t.remove(0);
    }
    while t.starts_with("../") {
        t = t.trim_start_matches("../").to_string();
    }
    if t.starts_with("word/") {
        t
    } else {
        format!("word/{t}")
    }
}

/// Header and footer part names referenced from the document's section
/// properties (default type only), in reference order.
fn referenced_header_footer_parts(pkg: &DocPackage, doc: &XmlPart) -> (Vec<String>, Vec<String>) {
    let mut rels: HashMap<String, String> = HashMap::new();
    if let Some(ent) = pkg.entry("word/_rels/document.xml.rels") {
        if let Ok(part) = parse_part(&ent.name, &ent.data) {
            for ev in &part.events {
                if let XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } = ev {
                    if name != "Relationship" {
                        continue;
                    }
                    let id = find_attr(attrs, "Id").unwrap_or("").trim();
                    let target = find_attr(attrs, "Target").unwrap_or("").trim();
                    if !id.is_empty() && !target.is_empty() {
                        rels.insert(id.to_string(), normalize_rel_target(target));
                    }
                }
            }
        }
    }

    let mut headers: Vec<String> = Vec::new();
    let mut footers: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for ev in &doc.events {
        if let XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } = ev {
            if name != "w:headerReference" && name != "w:footerReference" {
                continue;
            }
            if find_attr(attrs, "w:type").unwrap_or("default") != "default" {
                continue;
            }
            let Some(rid) = find_attr(attrs, "r:id").map(|s| s.trim()) else {
                continue;
            };
            let Some(part_name) = rels.get(rid) else {
                continue;
            };
            if !seen.insert(part_name.clone()) {
                continue;
            }
            if name == "w:headerReference" {
                headers.push(part_name.clone());
            } else {
                footers.push(part_name.clone());
            }
        }
    }
    (headers, footers)
}
