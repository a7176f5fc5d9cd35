use once_cell::sync::Lazy;
use regex::Regex;

/// Default delimiter set for spacing repair around tags.
pub const DEFAULT_DELIMITERS: [char; 7] = [' ', '.', ',', ':', ';', '?', '!'];

static ANGLE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[^<>]+>").expect("angle tag regex"));
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[0-9]+\}").expect("placeholder regex"));
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?tag[0-9]+>").expect("token regex"));
static LEADING_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:</?tag[0-9]+>)+").expect("leading run regex"));
static TRAILING_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:</?tag[0-9]+>)+$").expect("trailing run regex"));

/// How aggressively anchor runs are stripped before translation.
///
/// `Conservative` never strips a token whose pairing state is ambiguous; it
/// only removes tokens that are provably unpaired or whose partner sits in
/// the opposite anchor run. `Standard` additionally strips any closing token
/// at the very start and any opening token at the very end, the way the
/// legacy pipeline did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StripStrictness {
    #[default]
    Conservative,
    Standard,
}

/// One placeholder bound to one occurrence of an original inline tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagToken {
    pub token: String,
    pub original: String,
}

/// Output of `protect`: the translatable core, anchor tokens removed from
/// each end, and the per-occurrence token map for restoration.
#[derive(Clone, Debug, Default)]
pub struct ProtectedSegment {
    pub core: String,
    pub leading: Vec<String>,
    pub trailing: Vec<String>,
    pub tokens: Vec<TagToken>,
}

pub fn has_tags(segment: &str) -> bool {
    ANGLE_TAG_RE.is_match(segment) || PLACEHOLDER_RE.is_match(segment)
}

/// All tag occurrences (angle tags and bare numeric placeholders) in order
/// of appearance.
pub fn find_tags(segment: &str) -> Vec<String> {
    tag_occurrences(segment)
        .into_iter()
        .map(|(_, _, text)| text)
        .collect()
}

fn tag_occurrences(segment: &str) -> Vec<(usize, usize, String)> {
    let mut occ: Vec<(usize, usize, String)> = ANGLE_TAG_RE
        .find_iter(segment)
        .chain(PLACEHOLDER_RE.find_iter(segment))
        .map(|m| (m.start(), m.end(), m.as_str().to_string()))
        .collect();
    occ.sort_by_key(|(start, _, _)| *start);
    occ
}

fn is_closing(tag: &str) -> bool {
    tag.starts_with("</")
}

fn is_opening(tag: &str) -> bool {
    tag.starts_with('<') && !tag.starts_with("</") && !tag.ends_with("/>")
}

fn angle_tag_name(tag: &str) -> &str {
    let inner = tag
        .trim_start_matches('<')
        .trim_start_matches('/')
        .trim_end_matches('>')
        .trim_end_matches('/');
    inner.split_whitespace().next().unwrap_or(inner)
}

fn closing_token_for(token: &str) -> String {
    debug_assert!(token.starts_with("<tag"));
    format!("</{}", &token[1..])
}

fn opening_token_for(token: &str) -> String {
    debug_assert!(token.starts_with("</tag"));
    format!("<{}", &token[2..])
}

/// Replace every tag occurrence with a fresh `<tagK>`/`</tagK>` token. The
/// occurrence whose literal text matches an opener's generated closer is
/// claimed by it and shares its index; replacement is strictly positional,
/// so repeated identical tag text stays distinguishable.
pub fn protect(segment: &str, strictness: StripStrictness) -> ProtectedSegment {
    let occ = tag_occurrences(segment);
    if occ.is_empty() {
        return ProtectedSegment {
            core: segment.to_string(),
            ..ProtectedSegment::default()
        };
    }

    let mut assigned: Vec<Option<String>> = vec![None; occ.len()];
    let mut k = 0usize;
    for i in 0..occ.len() {
        if assigned[i].is_some() {
            continue;
        }
        let text = occ[i].2.as_str();
        if is_closing(text) {
            // Unmatched closer: tokenized on its own, pairing unknown.
            assigned[i] = Some(format!("</tag{k}>"));
        } else {
            assigned[i] = Some(format!("<tag{k}>"));
            if is_opening(text) {
                let close = format!("</{}>", angle_tag_name(text));
                if let Some(j) = (i + 1..occ.len()).find(|&j| assigned[j].is_none() && occ[j].2 == close)
                {
                    assigned[j] = Some(format!("</tag{k}>"));
                }
            }
        }
        k += 1;
    }

    let mut tokenized = String::with_capacity(segment.len());
    let mut tokens = Vec::with_capacity(occ.len());
    let mut pos = 0usize;
    for (i, (start, end, text)) in occ.iter().enumerate() {
        tokenized.push_str(&segment[pos..*start]);
        let token = assigned[i].clone().unwrap_or_default();
        tokenized.push_str(&token);
        tokens.push(TagToken {
            token,
            original: text.clone(),
        });
        pos = *end;
    }
    tokenized.push_str(&segment[pos..]);

    let (core, leading, trailing) = strip_anchor_runs(&tokenized, &tokens, strictness);
    ProtectedSegment {
        core,
        leading,
        trailing,
        tokens,
    }
}

fn run_tokens(run: &str) -> Vec<String> {
    TOKEN_RE.find_iter(run).map(|m| m.as_str().to_string()).collect()
}

/// True when another occurrence carries the same textual tag name in the
/// requested direction (opening or closing). Such a counterpart makes the
/// pairing of an unmatched token ambiguous; bare placeholders have no name
/// and are never ambiguous.
fn same_name_elsewhere(tokens: &[TagToken], token: &str, want_opening: bool) -> bool {
    let Some(original) = tokens
        .iter()
        .find(|t| t.token == token)
        .map(|t| t.original.as_str())
    else {
        return false;
    };
    if !original.starts_with('<') {
        return false;
    }
    let name = angle_tag_name(original);
    tokens.iter().any(|t| {
        t.token != token
            && (if want_opening {
                is_opening(&t.original)
            } else {
                is_closing(&t.original)
            })
            && angle_tag_name(&t.original) == name
    })
}

/// Strip qualifying anchor tokens from both ends, outside in, until neither
/// outermost token qualifies.
fn strip_anchor_runs(
    tokenized: &str,
    tokens: &[TagToken],
    strictness: StripStrictness,
) -> (String, Vec<String>, Vec<String>) {
    let mut core = tokenized.to_string();
    let mut leading: Vec<String> = Vec::new();
    let mut trailing_rev: Vec<String> = Vec::new();

    loop {
        let lead = LEADING_RUN_RE
            .find(&core)
            .and_then(|m| run_tokens(m.as_str()).first().cloned());
        let mut trail = TRAILING_RUN_RE
            .find(&core)
            .and_then(|m| run_tokens(m.as_str()).last().cloned());

        // A single token making up the whole core must not be claimed twice.
        if let (Some(l), Some(t)) = (&lead, &trail) {
            if l.len() + t.len() > core.len() {
                trail = None;
            }
        }

        let middle = {
            let start = lead.as_ref().map(|l| l.len()).unwrap_or(0);
            let end = core.len() - trail.as_ref().map(|t| t.len()).unwrap_or(0);
            core[start..end].to_string()
        };

        let strip_lead = match &lead {
            Some(l) if is_closing(l) => match strictness {
                StripStrictness::Standard => true,
                StripStrictness::Conservative => !same_name_elsewhere(tokens, l, true),
            },
            Some(l) => {
                let close = closing_token_for(l);
                if trail.as_deref() == Some(close.as_str()) {
                    true
                } else if middle.contains(&close) {
                    false
                } else {
                    match strictness {
                        StripStrictness::Standard => true,
                        StripStrictness::Conservative => !same_name_elsewhere(tokens, l, false),
                    }
                }
            }
            None => false,
        };
        let strip_trail = match &trail {
            Some(t) if is_closing(t) => {
                let open = opening_token_for(t);
                if lead.as_deref() == Some(open.as_str()) {
                    true
                } else if middle.contains(&open) {
                    false
                } else {
                    match strictness {
                        StripStrictness::Standard => true,
                        StripStrictness::Conservative => !same_name_elsewhere(tokens, t, true),
                    }
                }
            }
            Some(t) => match strictness {
                StripStrictness::Standard => true,
                StripStrictness::Conservative => !same_name_elsewhere(tokens, t, false),
            },
            None => false,
        };

        let mut progressed = false;
        if strip_trail {
            if let Some(t) = trail {
                core.truncate(core.len() - t.len());
                trailing_rev.push(t);
                progressed = true;
            }
        }
        if strip_lead {
            if let Some(l) = lead {
                core = core[l.len()..].to_string();
                leading.push(l);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    trailing_rev.reverse();
    (core, leading, trailing_rev)
}

/// Reattach stripped anchors around the translated core and substitute the
/// original tag text back, one occurrence per token in creation order.
pub fn restore(protected: &ProtectedSegment, translated_core: &str) -> String {
    let mut out = String::new();
    for l in &protected.leading {
        out.push_str(l);
    }
    out.push_str(translated_core);
    for t in &protected.trailing {
        out.push_str(t);
    }
    for tok in &protected.tokens {
        out = out.replacen(tok.token.as_str(), tok.original.as_str(), 1);
    }
    out
}

/// Alternating tag/text chunks of a protected core, original order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    Tag(String),
    Text(String),
}

pub fn split_tag_chunks(segment: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut pos = 0usize;
    for m in ANGLE_TAG_RE.find_iter(segment) {
        if m.start() > pos {
            chunks.push(Chunk::Text(segment[pos..m.start()].to_string()));
        }
        chunks.push(Chunk::Tag(m.as_str().to_string()));
        pos = m.end();
    }
    if pos < segment.len() {
        chunks.push(Chunk::Text(segment[pos..].to_string()));
    }
    chunks
}

fn prev_char(s: &str, idx: usize) -> Option<char> {
    s[..idx].chars().next_back()
}

fn next_char(s: &str, idx: usize) -> Option<char> {
    s[idx..].chars().next()
}

/// Repair whitespace adjacent to tags the translation kept: where the source
/// had a delimiter next to a tag and the translation lost it (or invented
/// one), insert or drop a single space. Best-effort; tags the MT dropped are
/// skipped.
pub fn repair_spacing(original: &str, translated: &str, delimiters: &[char]) -> String {
    let mut out = translated.to_string();
    for tag in common_tags(original, &out) {
        let Some(o_idx) = original.find(tag.as_str()) else {
            continue;
        };
        let Some(t_idx) = out.find(tag.as_str()) else {
            continue;
        };

        let src_before = prev_char(original, o_idx).map(|c| delimiters.contains(&c));
        let tgt_before_ch = prev_char(&out, t_idx);
        let tgt_before = tgt_before_ch.map(|c| delimiters.contains(&c));
        if src_before == Some(true) && tgt_before == Some(false) {
            out.insert(t_idx, ' ');
        } else if src_before == Some(false) && tgt_before_ch == Some(' ') {
            out.remove(t_idx - 1);
        }

        let Some(t_idx) = out.find(tag.as_str()) else {
            continue;
        };
        let o_after = o_idx + tag.len();
        let t_after = t_idx + tag.len();
        let src_after = next_char(original, o_after).map(|c| delimiters.contains(&c));
        let tgt_after_ch = next_char(&out, t_after);
        let tgt_after = tgt_after_ch.map(|c| delimiters.contains(&c));
        if src_after == Some(true) && tgt_after == Some(false) {
            out.insert(t_after, ' ');
        } else if src_after == Some(false) && tgt_after_ch == Some(' ') {
            out.remove(t_after);
        }

        out = out.replacen(&format!("  {tag}"), &format!(" {tag}"), 1);
        out = out.replacen(&format!("{tag}  "), &format!("{tag} "), 1);
    }
    out
}

/// Multiset intersection of the tags in both segments, source order.
fn common_tags(original: &str, translated: &str) -> Vec<String> {
    let mut remaining: Vec<String> = find_tags(translated);
    let mut common = Vec::new();
    for tag in find_tags(original) {
        if let Some(pos) = remaining.iter().position(|t| *t == tag) {
            remaining.swap_remove(pos);
            common.push(tag);
        }
    }
    common
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_wrap_is_not_stripped() {
        // The pair wraps only "Hello"; the trailing text has no tag, so the
        // whole tokenized string stays in the core.
        let p = protect("<b>Hello</b> world", StripStrictness::Conservative);
        assert_eq!(p.core, "<tag0>Hello</tag0> world");
        assert!(p.leading.is_empty());
        assert!(p.trailing.is_empty());
        assert_eq!(p.tokens.len(), 2);
    }

    #[test]
    fn bare_placeholders_at_both_ends_are_stripped() {
        let p = protect("{1}Hello world{2}", StripStrictness::Conservative);
        assert_eq!(p.core, "Hello world");
        assert_eq!(p.leading, vec!["<tag0>".to_string()]);
        assert_eq!(p.trailing, vec!["<tag1>".to_string()]);
        assert_eq!(restore(&p, "Hola mundo"), "{1}Hola mundo{2}");
    }

    #[test]
    fn whole_segment_pair_is_stripped() {
        let p = protect("<b>Hello world</b>", StripStrictness::Conservative);
        assert_eq!(p.core, "Hello world");
        assert_eq!(p.leading, vec!["<tag0>".to_string()]);
        assert_eq!(p.trailing, vec!["</tag0>".to_string()]);
        assert_eq!(restore(&p, "Hello world"), "<b>Hello world</b>");
    }

    #[test]
    fn identity_translation_roundtrips_exactly() {
        for segment in [
            "<b>Hello</b> world",
            "{1}Hello world{2}",
            "<i>a</i> and <i>b</i>",
            "plain text, no tags",
            "<x href='u'>link</x> tail",
        ] {
            let p = protect(segment, StripStrictness::Conservative);
            assert_eq!(restore(&p, &p.core), segment, "roundtrip of {segment:?}");
        }
    }

    #[test]
    fn repeated_identical_tags_get_distinct_tokens() {
        let p = protect("<b>x</b> mid <b>y</b>", StripStrictness::Conservative);
        let toks: Vec<&str> = p.tokens.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(toks, vec!["<tag0>", "</tag0>", "<tag1>", "</tag1>"]);
        // No two occurrences share a token string.
        let mut sorted = toks.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), toks.len());
    }

    #[test]
    fn matched_pair_shares_an_index() {
        let p = protect("a <b>c</b> d", StripStrictness::Conservative);
        assert_eq!(p.tokens[0].token, "<tag0>");
        assert_eq!(p.tokens[0].original, "<b>");
        assert_eq!(p.tokens[1].token, "</tag0>");
        assert_eq!(p.tokens[1].original, "</b>");
    }

    #[test]
    fn unmatched_closer_is_tokenized_but_conservatively_kept_when_ambiguous() {
        // "</i>" has a later opener: pairing is ambiguous, conservative
        // keeps it, standard strips it.
        let seg = "</i>x<i>";
        let cons = protect(seg, StripStrictness::Conservative);
        assert!(cons.leading.is_empty());
        let std_ = protect(seg, StripStrictness::Standard);
        assert_eq!(std_.leading, vec!["</tag0>".to_string()]);
    }

    #[test]
    fn unpaired_closer_at_start_is_stripped() {
        let p = protect("</i>Hello", StripStrictness::Conservative);
        assert_eq!(p.core, "Hello");
        assert_eq!(p.leading, vec!["</tag0>".to_string()]);
        assert_eq!(restore(&p, "Hola"), "</i>Hola");
    }

    #[test]
    fn strip_reattach_preserves_anchors_for_any_core() {
        let p = protect("{1}Hello world{2}", StripStrictness::Conservative);
        for core in ["", "x", "totally different text"] {
            let restored = restore(&p, core);
            assert!(restored.starts_with("{1}"));
            assert!(restored.ends_with("{2}"));
        }
    }

    #[test]
    fn chunks_alternate_and_preserve_order() {
        let chunks = split_tag_chunks("a<tag0>b</tag0>");
        assert_eq!(
            chunks,
            vec![
                Chunk::Text("a".to_string()),
                Chunk::Tag("<tag0>".to_string()),
                Chunk::Text("b".to_string()),
                Chunk::Tag("</tag0>".to_string()),
            ]
        );
    }

    #[test]
    fn spacing_repair_inserts_lost_delimiter() {
        // Source has a space before the tag, translation glued it.
        let repaired = repair_spacing("word <b>x</b>", "palabra<b>x</b>", &DEFAULT_DELIMITERS);
        assert_eq!(repaired, "palabra <b>x</b>");
    }

    #[test]
    fn spacing_repair_drops_invented_space() {
        let repaired = repair_spacing("word<b>x</b>", "palabra <b>x</b>", &DEFAULT_DELIMITERS);
        assert_eq!(repaired, "palabra<b>x</b>");
    }

    #[test]
    fn spacing_repair_skips_tags_missing_from_translation() {
        let repaired = repair_spacing("word <b>x</b>", "palabra x", &DEFAULT_DELIMITERS);
        assert_eq!(repaired, "palabra x");
    }

    #[test]
    fn spacing_repair_collapses_doubled_space() {
        let repaired = repair_spacing("word <b>x</b>", "palabra  <b>x</b>", &DEFAULT_DELIMITERS);
        assert_eq!(repaired, "palabra <b>x</b>");
    }
}
