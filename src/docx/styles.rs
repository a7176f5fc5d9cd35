use std::collections::{BTreeMap, HashMap, HashSet};

use crate::docx::xml::{find_attr, XmlEvent, XmlPart};

/// Visual run attributes tracked by the cleaner. Everything else a run
/// carries (kerning, spacing, language hints) is ignored for identity
/// decisions but preserved verbatim on write-back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StyleAttr {
    FontName,
    FontSize,
    Bold,
    Italic,
    Underline,
    Strike,
    Color,
    Highlight,
    VertAlign,
}

impl StyleAttr {
    pub const ALL: [StyleAttr; 9] = [
        StyleAttr::FontName,
        StyleAttr::FontSize,
        StyleAttr::Bold,
        StyleAttr::Italic,
        StyleAttr::Underline,
        StyleAttr::Strike,
        StyleAttr::Color,
        StyleAttr::Highlight,
        StyleAttr::VertAlign,
    ];

    pub fn key(self) -> &'static str {
        match self {
            StyleAttr::FontName => "font_name",
            StyleAttr::FontSize => "font_size",
            StyleAttr::Bold => "bold",
            StyleAttr::Italic => "italic",
            StyleAttr::Underline => "underline",
            StyleAttr::Strike => "strike",
            StyleAttr::Color => "color",
            StyleAttr::Highlight => "highlight",
            StyleAttr::VertAlign => "vert_align",
        }
    }

    pub fn from_key(key: &str) -> Option<StyleAttr> {
        StyleAttr::ALL.into_iter().find(|a| a.key() == key)
    }

    /// Value an unset attribute compares as. Word renders absence of a
    /// toggle as off, no underline/highlight as "none", color as "auto".
    pub fn policy_default(self) -> &'static str {
        match self {
            StyleAttr::FontName | StyleAttr::FontSize => "",
            StyleAttr::Bold | StyleAttr::Italic | StyleAttr::Strike => "0",
            StyleAttr::Underline | StyleAttr::Highlight => "none",
            StyleAttr::Color => "auto",
            StyleAttr::VertAlign => "baseline",
        }
    }
}

/// One source of style values. Absence of a key is meaningful and distinct
/// from an explicit "none"/"0" entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StyleProps {
    values: BTreeMap<StyleAttr, String>,
}

impl StyleProps {
    pub fn get(&self, attr: StyleAttr) -> Option<&str> {
        self.values.get(&attr).map(|s| s.as_str())
    }

    pub fn set(&mut self, attr: StyleAttr, value: impl Into<String>) {
        self.values.insert(attr, value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StyleAttr, &str)> {
        self.values.iter().map(|(a, v)| (*a, v.as_str()))
    }

    /// Collect tracked attributes from the events inside a `w:rPr` element
    /// (the wrapping Start/End excluded).
    pub fn from_rpr_events(events: &[XmlEvent]) -> StyleProps {
        let mut props = StyleProps::default();
        for ev in events {
            let (name, attrs) = match ev {
                XmlEvent::Start { name, attrs } | XmlEvent::Empty { name, attrs } => {
                    (name.as_str(), attrs.as_slice())
                }
                _ => continue,
            };
            match name {
                "w:rFonts" => {
                    if let Some(v) = find_attr(attrs, "w:ascii").or_else(|| find_attr(attrs, "w:hAnsi")) {
                        props.set(StyleAttr::FontName, v);
                    }
                }
                "w:sz" => {
                    if let Some(v) = find_attr(attrs, "w:val") {
                        props.set(StyleAttr::FontSize, v);
                    }
                }
                "w:b" => props.set(StyleAttr::Bold, toggle_value(attrs)),
                "w:i" => props.set(StyleAttr::Italic, toggle_value(attrs)),
                "w:strike" => props.set(StyleAttr::Strike, toggle_value(attrs)),
                "w:u" => {
                    props.set(StyleAttr::Underline, find_attr(attrs, "w:val").unwrap_or("single"));
                }
                "w:color" => {
                    if let Some(v) = find_attr(attrs, "w:val") {
                        props.set(StyleAttr::Color, v);
                    }
                }
                "w:highlight" => {
                    if let Some(v) = find_attr(attrs, "w:val") {
                        props.set(StyleAttr::Highlight, v);
                    }
                }
                "w:vertAlign" => {
                    if let Some(v) = find_attr(attrs, "w:val") {
                        props.set(StyleAttr::VertAlign, v);
                    }
                }
                _ => {}
            }
        }
        props
    }
}

fn toggle_value(attrs: &[(String, String)]) -> &'static str {
    match find_attr(attrs, "w:val") {
        Some("0") | Some("false") | Some("none") => "0",
        _ => "1",
    }
}

#[derive(Clone, Debug, Default)]
pub struct NamedStyle {
    pub props: StyleProps,
    pub based_on: Option<String>,
}

/// Parsed `word/styles.xml`: named styles with parent linkage plus the
/// document default run properties.
#[derive(Clone, Debug, Default)]
pub struct StyleSheet {
    styles: HashMap<String, NamedStyle>,
    pub doc_defaults: StyleProps,
}

impl StyleSheet {
    pub fn parse(part: &XmlPart) -> StyleSheet {
        let mut sheet = StyleSheet::default();
        let mut stack: Vec<String> = Vec::new();

        let mut cur_style_id: Option<String> = None;
        let mut cur_based_on: Option<String> = None;
        let mut rpr_events: Vec<XmlEvent> = Vec::new();
        let mut rpr_depth: Option<usize> = None;
        let mut rpr_target: RprTarget = RprTarget::None;

        for ev in &part.events {
            match ev {
                XmlEvent::Start { name, attrs } => {
                    if rpr_depth.is_some() {
                        rpr_events.push(ev.clone());
                    } else if name == "w:style" && stack.last().map(|s| s.as_str()) == Some("w:styles") {
                        cur_style_id = find_attr(attrs, "w:styleId").map(|s| s.to_string());
                        cur_based_on = None;
                    } else if name == "w:rPr" {
                        match stack.last().map(|s| s.as_str()) {
                            Some("w:style") if cur_style_id.is_some() => {
                                rpr_depth = Some(stack.len() + 1);
                                rpr_target = RprTarget::Style;
                            }
                            Some("w:rPrDefault") => {
                                rpr_depth = Some(stack.len() + 1);
                                rpr_target = RprTarget::DocDefault;
                            }
                            _ => {}
                        }
                    }
                    stack.push(name.clone());
                }
                XmlEvent::Empty { name, attrs } => {
                    if rpr_depth.is_some() {
                        rpr_events.push(ev.clone());
                    } else if name == "w:style" && stack.last().map(|s| s.as_str()) == Some("w:styles")
                    {
                        if let Some(id) = find_attr(attrs, "w:styleId") {
                            sheet.styles.entry(id.to_string()).or_default();
                        }
                    } else if name == "w:basedOn"
                        && stack.last().map(|s| s.as_str()) == Some("w:style")
                        && cur_style_id.is_some()
                    {
                        cur_based_on = find_attr(attrs, "w:val").map(|s| s.to_string());
                    }
                }
                XmlEvent::End { name } => {
                    if rpr_depth == Some(stack.len()) && name == "w:rPr" {
                        let props = StyleProps::from_rpr_events(&rpr_events);
                        match rpr_target {
                            RprTarget::Style => {
                                if let Some(id) = cur_style_id.as_ref() {
                                    let entry = sheet.styles.entry(id.clone()).or_default();
                                    entry.props = props;
                                }
                            }
                            RprTarget::DocDefault => sheet.doc_defaults = props,
                            RprTarget::None => {}
                        }
                        rpr_events.clear();
                        rpr_depth = None;
                        rpr_target = RprTarget::None;
                    } else if rpr_depth.is_some() {
                        rpr_events.push(ev.clone());
                    } else if name == "w:style" {
                        if let Some(id) = cur_style_id.take() {
                            let entry = sheet.styles.entry(id).or_default();
                            entry.based_on = cur_based_on.take();
                        }
                    }
                    stack.pop();
                }
                _ => {
                    if rpr_depth.is_some() {
                        rpr_events.push(ev.clone());
                    }
                }
            }
        }
        sheet
    }

    pub fn contains(&self, style_id: &str) -> bool {
        self.styles.contains_key(style_id)
    }

    pub fn insert(&mut self, id: impl Into<String>, style: NamedStyle) {
        self.styles.insert(id.into(), style);
    }

    /// Property sources for a named style: the style itself, then its
    /// `basedOn` ancestors, closest first. `None` when the id is unknown
    /// (the caller treats the referencing span as unresolvable).
    pub fn named_chain(&self, style_id: &str) -> Option<Vec<&StyleProps>> {
        let mut chain = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut cur = self.styles.get(style_id)?;
        let mut cur_id = style_id;
        loop {
            if !seen.insert(cur_id) {
                break;
            }
            chain.push(&cur.props);
            match cur.based_on.as_deref() {
                Some(parent) => match self.styles.get(parent) {
                    Some(next) => {
                        cur_id = parent;
                        cur = next;
                    }
                    None => break,
                },
                None => break,
            }
        }
        Some(chain)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum RprTarget {
    None,
    Style,
    DocDefault,
}

/// First source in the chain that defines `attr` wins.
pub fn resolve<'a>(attr: StyleAttr, chain: &[&'a StyleProps]) -> Option<&'a str> {
    chain.iter().find_map(|src| src.get(attr))
}

/// Auto-indexed font variants ("Calibri2") render identically to their base
/// face; trailing digits are ignored for comparison only.
pub fn fonts_equivalent(a: &str, b: &str) -> bool {
    a.trim_end_matches(|c: char| c.is_ascii_digit()) == b.trim_end_matches(|c: char| c.is_ascii_digit())
}

pub fn values_equal(attr: StyleAttr, a: &str, b: &str) -> bool {
    if attr == StyleAttr::FontName {
        fonts_equivalent(a, b)
    } else {
        a == b
    }
}

/// Fully resolved values for every tracked attribute, threaded top-down
/// through recursive normalization. Attributes no source defines take their
/// policy default.
#[derive(Clone, Debug, PartialEq)]
pub struct InheritedContext {
    tracked: Vec<StyleAttr>,
    values: BTreeMap<StyleAttr, String>,
}

impl InheritedContext {
    pub fn from_chain(tracked: &[StyleAttr], chain: &[&StyleProps]) -> InheritedContext {
        let mut values = BTreeMap::new();
        for &attr in tracked {
            let v = resolve(attr, chain).unwrap_or(attr.policy_default());
            values.insert(attr, v.to_string());
        }
        InheritedContext {
            tracked: tracked.to_vec(),
            values,
        }
    }

    pub fn tracked(&self) -> &[StyleAttr] {
        &self.tracked
    }

    pub fn get(&self, attr: StyleAttr) -> &str {
        self.values
            .get(&attr)
            .map(|s| s.as_str())
            .unwrap_or(attr.policy_default())
    }

    /// Context for recursing into a span: only attributes the span resolves
    /// to a different value are overridden.
    pub fn overridden_by(&self, resolved: &StyleProps) -> InheritedContext {
        let mut child = self.clone();
        for (attr, value) in resolved.iter() {
            if !values_equal(attr, value, child.get(attr)) {
                child.values.insert(attr, value.to_string());
            }
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(StyleAttr, &str)]) -> StyleProps {
        let mut p = StyleProps::default();
        for (a, v) in pairs {
            p.set(*a, *v);
        }
        p
    }

    #[test]
    fn first_defined_source_wins() {
        let direct = props(&[(StyleAttr::Bold, "1")]);
        let named = props(&[(StyleAttr::Bold, "0"), (StyleAttr::Italic, "1")]);
        let defaults = props(&[(StyleAttr::FontSize, "22")]);
        let chain: Vec<&StyleProps> = vec![&direct, &named, &defaults];

        assert_eq!(resolve(StyleAttr::Bold, &chain), Some("1"));
        assert_eq!(resolve(StyleAttr::Italic, &chain), Some("1"));
        assert_eq!(resolve(StyleAttr::FontSize, &chain), Some("22"));
        assert_eq!(resolve(StyleAttr::Strike, &chain), None);
    }

    #[test]
    fn unset_is_distinct_from_explicit_off() {
        let explicit = props(&[(StyleAttr::Bold, "0")]);
        let chain: Vec<&StyleProps> = vec![&explicit];
        assert_eq!(resolve(StyleAttr::Bold, &chain), Some("0"));
        let empty = StyleProps::default();
        let chain: Vec<&StyleProps> = vec![&empty];
        assert_eq!(resolve(StyleAttr::Bold, &chain), None);
    }

    #[test]
    fn font_suffix_comparison() {
        assert!(fonts_equivalent("Calibri2", "Calibri"));
        assert!(fonts_equivalent("Calibri", "Calibri1234567890"));
        assert!(!fonts_equivalent("Calibri2", "Arial"));
        // Comparison only strips; stored values keep their suffix.
        let p = props(&[(StyleAttr::FontName, "Calibri2")]);
        assert_eq!(p.get(StyleAttr::FontName), Some("Calibri2"));
    }

    #[test]
    fn based_on_chain_walks_to_root_and_guards_cycles() {
        let mut sheet = StyleSheet::default();
        sheet.insert(
            "A",
            NamedStyle {
                props: props(&[(StyleAttr::Bold, "1")]),
                based_on: Some("B".to_string()),
            },
        );
        sheet.insert(
            "B",
            NamedStyle {
                props: props(&[(StyleAttr::Italic, "1")]),
                based_on: Some("A".to_string()),
            },
        );
        let chain = sheet.named_chain("A").expect("chain");
        assert_eq!(chain.len(), 2);
        assert!(sheet.named_chain("missing").is_none());
    }

    #[test]
    fn inherited_context_applies_policy_defaults() {
        let ctx = InheritedContext::from_chain(&StyleAttr::ALL, &[]);
        assert_eq!(ctx.get(StyleAttr::Bold), "0");
        assert_eq!(ctx.get(StyleAttr::Highlight), "none");
        assert_eq!(ctx.get(StyleAttr::Color), "auto");
    }

    #[test]
    fn child_context_overrides_only_divergent_attrs() {
        let base = props(&[(StyleAttr::FontName, "Calibri")]);
        let ctx = InheritedContext::from_chain(&StyleAttr::ALL, &[&base]);
        let span = props(&[(StyleAttr::FontName, "Calibri3"), (StyleAttr::Bold, "1")]);
        let child = ctx.overridden_by(&span);
        // Indexed font variant counts as the inherited font.
        assert_eq!(child.get(StyleAttr::FontName), "Calibri");
        assert_eq!(child.get(StyleAttr::Bold), "1");
    }

    #[test]
    fn parses_styles_part() {
        let xml = br#"<?xml version="1.0"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri"/><w:sz w:val="22"/></w:rPr></w:rPrDefault></w:docDefaults>
  <w:style w:type="character" w:styleId="Emphasis">
    <w:basedOn w:val="DefaultParagraphFont"/>
    <w:rPr><w:i/><w:color w:val="FF0000"/></w:rPr>
  </w:style>
  <w:style w:type="character" w:styleId="DefaultParagraphFont"/>
</w:styles>"#;
        let part = crate::docx::xml::parse_part("word/styles.xml", xml).expect("parse");
        let sheet = StyleSheet::parse(&part);

        assert_eq!(sheet.doc_defaults.get(StyleAttr::FontName), Some("Calibri"));
        assert_eq!(sheet.doc_defaults.get(StyleAttr::FontSize), Some("22"));
        let chain = sheet.named_chain("Emphasis").expect("chain");
        assert_eq!(resolve(StyleAttr::Italic, &chain), Some("1"));
        assert_eq!(resolve(StyleAttr::Color, &chain), Some("FF0000"));
        assert!(sheet.contains("DefaultParagraphFont"));
    }
}
