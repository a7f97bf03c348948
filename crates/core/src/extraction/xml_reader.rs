use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{RawItem, RawRecord, RawValue};
use crate::error::ExtractError;
use crate::unit::UnitType;

/// Minimal element tree; attributes are not used by any mapping.
#[derive(Debug, Default)]
struct Element {
    name: String,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Default::default()
        }
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<(), ExtractError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None if root.is_some() => {
            return Err(ExtractError::Xml("more than one root element".into()));
        }
        None => *root = Some(el),
    }
    Ok(())
}

fn parse_tree<R: BufRead>(input: R) -> Result<Element, ExtractError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(Element::named(e.local_name().as_ref())),
            Event::Empty(e) => {
                let el = Element::named(e.local_name().as_ref());
                attach(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| ExtractError::Xml("unbalanced end tag".into()))?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(ExtractError::Xml("unexpected end of document".into()));
    }
    root.ok_or_else(|| ExtractError::Xml("document has no root element".into()))
}

fn is_unit_tag(name: &str) -> bool {
    UnitType::from_str(name).is_some()
}

/// Sub-record of one repeated-group item. A bare leaf item
/// (`<Country>KG</Country>`) becomes a one-field record keyed by its tag.
fn item_fields(el: Element) -> RawRecord {
    if el.children.is_empty() {
        let mut record = RawRecord::new();
        record.push(el.name, RawValue::Scalar(el.text.trim().to_string()));
        record
    } else {
        element_record(el)
    }
}

fn element_record(el: Element) -> RawRecord {
    let mut record = RawRecord::new();
    for child in el.children {
        if child.children.is_empty() {
            let text = child.text.trim().to_string();
            record.insert(child.name, RawValue::Scalar(text));
        } else {
            let items = child
                .children
                .into_iter()
                .map(|item| RawItem {
                    tag: item.name.clone(),
                    fields: item_fields(item),
                })
                .collect();
            record.insert(child.name, RawValue::Group(items));
        }
    }
    record
}

/// Parse an XML document into one raw record per unit element.
///
/// Single-child wrapper elements (SOAP envelopes, response wrappers) are
/// descended until a level is reached whose elements all carry a unit type
/// name. Namespaces are ignored.
pub fn read_xml<R: BufRead>(input: R) -> Result<Vec<RawRecord>, ExtractError> {
    let root = parse_tree(input)?;
    let mut level = vec![root];

    loop {
        if level.is_empty() {
            return Ok(Vec::new());
        }
        if level.iter().all(|el| is_unit_tag(&el.name)) {
            break;
        }
        if level.len() > 1 {
            let names: Vec<&str> = level.iter().map(|el| el.name.as_str()).collect();
            return Err(ExtractError::Xml(format!(
                "expected unit elements, found <{}>",
                names.join(">, <")
            )));
        }
        level = level.pop().map(|el| el.children).unwrap_or_default();
    }

    Ok(level.into_iter().map(element_record).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const LEGAL_UNITS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
        <soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
          <soap:Body>
            <GetLegalUnits xmlns="http://sti.gov.kg/">
              <LegalUnit>
                <StatId>920951287</StatId>
                <Name>LAST FRIDAY INVEST AS</Name>
                <Activities>
                  <Activity>
                    <ActivityYear>2019</ActivityYear>
                    <CategoryCode>62.020</CategoryCode>
                  </Activity>
                  <Activity>
                    <CategoryCode>70.220</CategoryCode>
                  </Activity>
                </Activities>
              </LegalUnit>
              <LegalUnit>
                <StatId>913123</StatId>
                <Name>Tom &amp; Co</Name>
              </LegalUnit>
            </GetLegalUnits>
          </soap:Body>
        </soap:Envelope>"#;

    #[test]
    fn descends_wrappers_to_unit_elements() {
        let records = read_xml(LEGAL_UNITS.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].scalar("StatId"), Some("920951287"));
        assert_eq!(records[1].scalar("Name"), Some("Tom & Co"));
    }

    #[test]
    fn repeated_groups_become_items() {
        let records = read_xml(LEGAL_UNITS.as_bytes()).unwrap();
        let Some(RawValue::Group(items)) = records[0].get("Activities") else {
            panic!("Activities should be a group");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].tag, "Activity");
        assert_eq!(items[0].fields.scalar("ActivityYear"), Some("2019"));
        assert_eq!(items[1].fields.scalar("CategoryCode"), Some("70.220"));
        assert_eq!(items[1].fields.scalar("ActivityYear"), None);
    }

    #[test]
    fn bare_leaf_items_keep_their_tag() {
        let xml = "<LocalUnit><Countries><Country>KG</Country><Country>KZ</Country></Countries></LocalUnit>";
        let records = read_xml(xml.as_bytes()).unwrap();
        let Some(RawValue::Group(items)) = records[0].get("Countries") else {
            panic!("Countries should be a group");
        };
        assert_eq!(items[1].fields.scalar("Country"), Some("KZ"));
    }

    #[test]
    fn empty_wrapper_yields_no_records() {
        assert!(read_xml("<Response><Result/></Response>".as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn ambiguous_level_is_rejected() {
        let xml = "<Root><Header/><LegalUnit><StatId>1</StatId></LegalUnit></Root>";
        assert_matches!(read_xml(xml.as_bytes()), Err(ExtractError::Xml(_)));
    }

    #[test]
    fn malformed_document_fails() {
        let xml = "<GetLegalUnits><LegalUnit><StatId>1</StatId></GetLegalUnits>";
        assert_matches!(read_xml(xml.as_bytes()), Err(ExtractError::Xml(_)));
    }
}
