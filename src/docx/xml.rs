use anyhow::Context;
use quick_xml::events::Event;
use quick_xml::Reader;

/// One lossless XML event. A part parses to a flat `Vec<XmlEvent>` and
/// serializes back byte-compatibly (modulo attribute quoting).
#[derive(Clone, Debug, PartialEq)]
pub enum XmlEvent {
    Decl {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
    PI {
        content: String,
    },
    DocType {
        text: String,
    },
}

#[derive(Clone)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
}

pub fn find_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn lossy(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

fn read_attrs(s: &quick_xml::events::BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for a in s.attributes() {
        let a = a.context("attr")?;
        // Attribute values stay as the raw escaped bytes. Unescaping character
        // references such as `&#13;&#10;` (VML gfxdata) and re-escaping on
        // write would let XML attribute-value normalization turn them into
        // spaces and corrupt embedded objects.
        attrs.push((lossy(a.key.as_ref()), lossy(a.value.as_ref())));
    }
    Ok(attrs)
}

pub fn parse_part(name: &str, xml: &[u8]) -> anyhow::Result<XmlPart> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut events = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read xml event")? {
            Event::Eof => break,
            Event::Decl(d) => {
                let version = lossy(d.version().context("decl version")?);
                let encoding = d.encoding().map(|r| r.map(lossy)).transpose().unwrap_or(None);
                let standalone = d
                    .standalone()
                    .map(|r| r.map(lossy))
                    .transpose()
                    .unwrap_or(None);
                events.push(XmlEvent::Decl {
                    version,
                    encoding,
                    standalone,
                });
            }
            Event::Start(s) => events.push(XmlEvent::Start {
                name: lossy(s.name().as_ref()),
                attrs: read_attrs(&s)?,
            }),
            Event::Empty(s) => events.push(XmlEvent::Empty {
                name: lossy(s.name().as_ref()),
                attrs: read_attrs(&s)?,
            }),
            Event::End(e) => events.push(XmlEvent::End {
                name: lossy(e.name().as_ref()),
            }),
            Event::Text(t) => events.push(XmlEvent::Text {
                text: t.unescape().context("unescape text")?.into_owned(),
            }),
            Event::CData(t) => events.push(XmlEvent::CData {
                text: lossy(t.into_inner()),
            }),
            Event::Comment(t) => events.push(XmlEvent::Comment {
                text: lossy(t.into_inner()),
            }),
            Event::PI(t) => events.push(XmlEvent::PI {
                content: format!("{}{}", lossy(t.target()), lossy(t.content())),
            }),
            Event::DocType(t) => events.push(XmlEvent::DocType {
                text: lossy(t.into_inner()),
            }),
        }
    }

    Ok(XmlPart {
        name: name.to_string(),
        events,
    })
}

fn push_escaped_text(out: &mut Vec<u8>, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

fn push_tag(out: &mut Vec<u8>, name: &str, attrs: &[(String, String)], empty: bool) {
    out.push(b'<');
    out.extend_from_slice(name.as_bytes());
    // Attribute values are raw escaped bytes; write them through verbatim.
    for (k, v) in attrs {
        out.push(b' ');
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(b"=\"");
        out.extend_from_slice(v.as_bytes());
        out.push(b'"');
    }
    if empty {
        out.extend_from_slice(b"/>");
    } else {
        out.push(b'>');
    }
}

pub fn write_part(part: &XmlPart) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    for ev in &part.events {
        match ev {
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                out.extend_from_slice(b"<?xml version=\"");
                out.extend_from_slice(version.as_bytes());
                out.push(b'"');
                if let Some(e) = encoding {
                    out.extend_from_slice(b" encoding=\"");
                    out.extend_from_slice(e.as_bytes());
                    out.push(b'"');
                }
                if let Some(s) = standalone {
                    out.extend_from_slice(b" standalone=\"");
                    out.extend_from_slice(s.as_bytes());
                    out.push(b'"');
                }
                out.extend_from_slice(b"?>");
            }
            XmlEvent::Start { name, attrs } => push_tag(&mut out, name, attrs, false),
            XmlEvent::Empty { name, attrs } => push_tag(&mut out, name, attrs, true),
            XmlEvent::End { name } => {
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.push(b'>');
            }
            XmlEvent::Text { text } => push_escaped_text(&mut out, text),
            XmlEvent::CData { text } => {
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            XmlEvent::Comment { text } => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            XmlEvent::PI { content } => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            XmlEvent::DocType { text } => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.push(b'>');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{parse_part, write_part};

    #[test]
    fn roundtrip_preserves_attr_entity_refs() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?><root xmlns:o="urn:test" o:gfxdata="A&#xD;&#xA;B"/>"#;
        let part = parse_part("test.xml", xml).expect("parse xml");
        let s = String::from_utf8(write_part(&part)).expect("utf8");

        assert!(s.contains(r#"o:gfxdata="A&#xD;&#xA;B""#));
        assert!(!s.contains(r#"o:gfxdata="A&amp;#xD;"#));
    }

    #[test]
    fn roundtrip_escapes_text_but_not_cdata() {
        let xml = b"<r><t>a &lt; b</t><!--c--><![CDATA[x<y]]></r>";
        let part = parse_part("test.xml", xml).expect("parse xml");
        let s = String::from_utf8(write_part(&part)).expect("utf8");
        assert_eq!(s, "<r><t>a &lt; b</t><!--c--><![CDATA[x<y]]></r>");
    }
}
