//! Rule evaluation against the markup form of a structured report.
//!
//! Every rule expression is an XPath 1.0 query. Results must be text: a plain
//! string, or a node-set of text/attribute nodes whose string values are
//! joined with the rule's `concat_string`. Anything else is a fatal
//! configuration/document mismatch.
use crate::config::Rule;
use crate::error::ReportError;
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use std::fs;
use std::path::Path;
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element, Text};
use sxd_document::Package;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context as XPathContext, Factory, Value};

/// Rule name to final text, in rule order.
pub type TemplateData = IndexMap<String, String>;

/// Parsed markup tree queried by the rules.
pub struct MarkupDocument {
    package: Package,
}

impl MarkupDocument {
    /// Parse and normalize: the parser keeps every entity reference as its own
    /// text node, so adjacent text siblings are merged back into one.
    pub fn parse(xml: &str) -> Result<Self> {
        let package =
            sxd_document::parser::parse(xml).map_err(|err| anyhow!("parse markup XML: {err:?}"))?;
        {
            let doc = package.as_document();
            for child in doc.root().children() {
                if let ChildOfRoot::Element(element) = child {
                    merge_adjacent_text(element);
                }
            }
        }
        Ok(Self { package })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::parse(&xml).with_context(|| format!("load markup {}", path.display()))
    }
}

fn merge_adjacent_text(element: Element<'_>) {
    let mut run_head: Option<Text<'_>> = None;
    for child in element.children() {
        match child {
            ChildOfElement::Text(text) => match run_head {
                Some(head) => {
                    let merged = format!("{}{}", head.text(), text.text());
                    head.set_text(&merged);
                    element.remove_child(text);
                }
                None => run_head = Some(text),
            },
            ChildOfElement::Element(nested) => {
                run_head = None;
                merge_adjacent_text(nested);
            }
            _ => run_head = None,
        }
    }
}

/// Evaluate every rule in order and assemble its text.
pub fn extract(document: &MarkupDocument, rules: &[Rule]) -> Result<TemplateData> {
    let doc = document.package.as_document();
    let factory = Factory::new();
    let context = XPathContext::new();
    let mut data = TemplateData::new();

    for rule in rules {
        let mut text = String::new();
        for (idx, expression) in rule.expressions.iter().enumerate() {
            let index = idx + 1;
            let xpath = factory
                .build(expression)
                .map_err(|err| {
                    anyhow!(
                        "rule {:?} expression {index}: invalid XPath {expression:?}: {err}",
                        rule.name
                    )
                })?
                .ok_or_else(|| {
                    anyhow!(
                        "rule {:?} expression {index}: XPath {expression:?} is empty",
                        rule.name
                    )
                })?;
            let value = xpath.evaluate(&context, doc.root()).map_err(|err| {
                anyhow!(
                    "rule {:?} expression {index}: evaluate {expression:?}: {err}",
                    rule.name
                )
            })?;
            let fragment = value_to_text(value, &rule.concat_string).map_err(|found| {
                ReportError::ExtractionType {
                    rule: rule.name.clone(),
                    index,
                    expression: expression.clone(),
                    found,
                }
            })?;

            if fragment.is_empty() {
                tracing::warn!(
                    rule = %rule.name,
                    index,
                    expression = %expression,
                    "expression yielded empty text"
                );
                continue;
            }

            let fragment = apply_replacements(fragment, &rule.replacements);
            if !text.is_empty() {
                text.push_str(&rule.concat_string);
            }
            text.push_str(&fragment);
        }

        tracing::debug!(rule = %rule.name, chars = text.chars().count(), "rule extracted");
        if data.insert(rule.name.clone(), text).is_some() {
            tracing::warn!(rule = %rule.name, "duplicate rule name replaced an earlier result");
        }
    }
    Ok(data)
}

/// Reduce an XPath value to text, or describe what was found instead.
fn value_to_text(value: Value<'_>, concat_string: &str) -> Result<String, String> {
    match value {
        Value::String(text) => Ok(text),
        Value::Nodeset(nodes) => {
            let mut fragments = Vec::new();
            for node in nodes.document_order() {
                match node {
                    Node::Text(_) | Node::Attribute(_) => fragments.push(node.string_value()),
                    other => {
                        return Err(format!(
                            "a node-set containing {} nodes",
                            node_kind(&other)
                        ))
                    }
                }
            }
            Ok(fragments.join(concat_string))
        }
        Value::Number(number) => Err(format!("number {number}")),
        Value::Boolean(flag) => Err(format!("boolean {flag}")),
    }
}

fn node_kind(node: &Node<'_>) -> &'static str {
    match node {
        Node::Root(_) => "root",
        Node::Element(_) => "element",
        Node::Attribute(_) => "attribute",
        Node::Text(_) => "text",
        Node::Comment(_) => "comment",
        Node::Namespace(_) => "namespace",
        Node::ProcessingInstruction(_) => "processing-instruction",
    }
}

fn apply_replacements(mut fragment: String, replacements: &IndexMap<String, String>) -> String {
    for (search, replace) in replacements {
        if search.is_empty() {
            continue;
        }
        fragment = fragment.replace(search.as_str(), replace);
    }
    fragment
}
