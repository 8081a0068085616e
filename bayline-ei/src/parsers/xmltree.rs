//! Generic attribute-preserving XML tree
//!
//! The BMS dialects share ancestry but disagree on element placement, so
//! extraction works over a uniform owned tree instead of vendor-specific
//! static types. Lookups match local names case-insensitively and ignore
//! namespace prefixes; `first_text` is the ordered-candidate combinator
//! the fallback chains are built from.

use crate::error::ParseError;
use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    /// Local element name (namespace prefix stripped)
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    /// Concatenated trimmed text content
    pub text: String,
}

/// Case-insensitive local-name comparison
pub fn eq_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl XmlNode {
    /// Build a tree from an XML string.
    ///
    /// Fails only for well-formedness problems (mismatched tags, truncated
    /// or rootless documents); unknown elements are preserved as ordinary
    /// nodes for the caller to inspect.
    pub fn parse(xml: &str) -> Result<XmlNode, ParseError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    stack.push(node_from_tag(&e));
                }
                Event::Empty(e) => {
                    let node = node_from_tag(&e);
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| ParseError::Structure("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(t) => {
                    if let Some(parent) = stack.last_mut() {
                        let text = t.unescape()?;
                        append_text(parent, &text);
                    }
                }
                Event::CData(t) => {
                    if let Some(parent) = stack.last_mut() {
                        let bytes = t.into_inner();
                        let text = String::from_utf8_lossy(&bytes);
                        append_text(parent, &text);
                    }
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions, doctypes
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(ParseError::Structure("truncated document".to_string()));
        }
        root.ok_or_else(|| ParseError::Structure("no root element".to_string()))
    }

    /// First child with the given local name
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| eq_name(&c.name, name))
    }

    /// All children with the given local name, in document order
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| eq_name(&c.name, name))
    }

    /// Descend through a path of child names
    pub fn at(&self, path: &[&str]) -> Option<&XmlNode> {
        let mut node = self;
        for name in path {
            node = node.child(name)?;
        }
        Some(node)
    }

    /// Non-empty text at a path
    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        self.at(path).map(|n| n.text.as_str()).filter(|t| !t.is_empty())
    }

    /// First node found among candidate paths
    pub fn first_at(&self, paths: &[&[&str]]) -> Option<&XmlNode> {
        paths.iter().find_map(|path| self.at(path))
    }

    /// First non-empty text found among candidate paths.
    ///
    /// This is the per-field fallback primitive: callers list source paths
    /// in priority order and take the first dialect that populated one.
    pub fn first_text(&self, paths: &[&[&str]]) -> Option<&str> {
        paths.iter().find_map(|path| self.text_at(path))
    }

    /// Attribute value by local name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| eq_name(k, name))
            .map(|(_, v)| v.as_str())
    }
}

fn node_from_tag(e: &quick_xml::events::BytesStart<'_>) -> XmlNode {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    // Malformed attributes are dropped rather than failing the parse
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attributes.push((key, value));
    }
    XmlNode {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    }
}

fn append_text(parent: &mut XmlNode, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if !parent.text.is_empty() {
        parent.text.push(' ');
    }
    parent.text.push_str(trimmed);
}

fn attach(stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>, node: XmlNode) -> Result<(), ParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        *root = Some(node);
    } else {
        return Err(ParseError::Structure("multiple root elements".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tree_with_attributes_and_text() {
        let root = XmlNode::parse(
            r#"<Estimate version="2.1">
                <Customer>
                    <FirstName>Dana</FirstName>
                    <LastName>Whitfield</LastName>
                </Customer>
            </Estimate>"#,
        )
        .unwrap();

        assert_eq!(root.name, "Estimate");
        assert_eq!(root.attr("version"), Some("2.1"));
        assert_eq!(root.text_at(&["Customer", "FirstName"]), Some("Dana"));
        assert_eq!(root.text_at(&["Customer", "Missing"]), None);
    }

    #[test]
    fn lookup_ignores_case_and_namespace_prefix() {
        let root = XmlNode::parse(
            r#"<bms:Estimate xmlns:bms="http://example.com/bms">
                <bms:Customer><bms:FirstName>Ray</bms:FirstName></bms:Customer>
            </bms:Estimate>"#,
        )
        .unwrap();

        assert_eq!(root.name, "Estimate");
        assert_eq!(root.text_at(&["customer", "firstname"]), Some("Ray"));
    }

    #[test]
    fn first_text_takes_candidates_in_priority_order() {
        let root = XmlNode::parse(
            "<VehInfo><ModelYear>2021</ModelYear><Year>1999</Year><Make></Make><MakeDesc>Toyota</MakeDesc></VehInfo>",
        )
        .unwrap();

        assert_eq!(root.first_text(&[&["ModelYear"], &["Year"]]), Some("2021"));
        // Empty elements are skipped, later candidates win
        assert_eq!(root.first_text(&[&["Make"], &["MakeDesc"]]), Some("Toyota"));
        assert_eq!(root.first_text(&[&["Nope"], &["AlsoNope"]]), None);
    }

    #[test]
    fn entities_and_cdata_are_decoded() {
        let root =
            XmlNode::parse("<Memo><Note>Jones &amp; Sons</Note><Raw><![CDATA[RO: 4521]]></Raw></Memo>")
                .unwrap();
        assert_eq!(root.text_at(&["Note"]), Some("Jones & Sons"));
        assert_eq!(root.text_at(&["Raw"]), Some("RO: 4521"));
    }

    #[test]
    fn empty_elements_become_childless_nodes() {
        let root = XmlNode::parse("<Estimate><VIN/><Claim></Claim></Estimate>").unwrap();
        assert!(root.child("VIN").is_some());
        assert_eq!(root.text_at(&["VIN"]), None);
        assert_eq!(root.text_at(&["Claim"]), None);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(XmlNode::parse("<Estimate><Open></Estimate>").is_err());
        assert!(XmlNode::parse("<Estimate>").is_err());
        assert!(XmlNode::parse("just text, no elements").is_err());
    }

    #[test]
    fn repeated_children_preserve_document_order() {
        let root = XmlNode::parse(
            "<Rq><DamageLineInfo><LineNum>1</LineNum></DamageLineInfo><DamageLineInfo><LineNum>2</LineNum></DamageLineInfo></Rq>",
        )
        .unwrap();
        let nums: Vec<_> = root
            .children_named("DamageLineInfo")
            .filter_map(|l| l.text_at(&["LineNum"]))
            .collect();
        assert_eq!(nums, vec!["1", "2"]);
    }
}
