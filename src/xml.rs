//! XML parsing, XPath helpers and exclusive canonicalization.
//!
//! The authority's wire format is ISO-8859-1, so alongside the plain
//! canonical form this module exposes [`canonicalize_latin1`], which
//! transcodes the canonical bytes into that charset and can restrict
//! canonicalization to the first node matched by an XPath selector.
use libxml::{
    parser::Parser,
    tree::{c14n, Document, Node},
    xpath,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors emitted by the XML engine.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),

    #[error("XPath error: {0}")]
    XPath(String),

    #[error("no node matched selector '{selector}'")]
    NodeNotFound { selector: String },

    #[error("canonicalization failed: {0}")]
    Canonicalize(String),

    #[error("character U+{codepoint:04X} cannot be represented in ISO-8859-1")]
    Encoding { codepoint: u32 },

    #[error("failed to read '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse an XML document from a string.
pub fn parse(xml: &str) -> Result<Document, XmlError> {
    Parser::default()
        .parse_string(xml)
        .map_err(|e| XmlError::Parse(format!("{e:?}")))
}

/// Parse an XML document from a file.
pub fn parse_file(path: &Path) -> Result<Document, XmlError> {
    let xml = std::fs::read_to_string(path).map_err(|e| XmlError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse(&xml)
}

fn c14n_options() -> c14n::CanonicalizationOptions {
    c14n::CanonicalizationOptions {
        mode: c14n::CanonicalizationMode::ExclusiveCanonical1_0,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    }
}

/// Exclusive C14N of a whole document, without comments or declaration.
///
/// Output depends only on the logical content of the tree: attribute
/// order and namespace-prefix bookkeeping never change the bytes, and
/// re-canonicalizing an already canonical document is a no-op.
pub fn canonicalize(doc: &Document) -> Result<String, XmlError> {
    doc.canonicalize(c14n_options(), None)
        .map_err(|_| XmlError::Canonicalize("document canonicalization failed".to_string()))
}

/// Exclusive C14N of a string of XML.
pub fn canonicalize_str(xml: &str) -> Result<String, XmlError> {
    canonicalize(&parse(xml)?)
}

/// Exclusive C14N of a single subtree, in place.
///
/// The node stays attached to its document, so namespace declarations
/// inherited from ancestors are rendered on the subtree root when they
/// are visibly utilized.
pub fn canonicalize_node(node: &Node) -> Result<String, XmlError> {
    let mut node = node.clone();
    node.canonicalize(c14n_options())
        .map_err(|_| XmlError::Canonicalize("node canonicalization failed".to_string()))
}

/// Canonical form transcoded to the legacy ISO-8859-1 wire encoding.
///
/// With a selector, only the first matching node is canonicalized;
/// [`XmlError::NodeNotFound`] is returned when nothing matches.
pub fn canonicalize_latin1(doc: &Document, selector: Option<&str>) -> Result<Vec<u8>, XmlError> {
    let canonical = match selector {
        None => canonicalize(doc)?,
        Some(expr) => {
            let ctx = context(doc)?;
            let node = first_matching_node(&ctx, expr)?.ok_or_else(|| XmlError::NodeNotFound {
                selector: expr.to_string(),
            })?;
            canonicalize_node(&node)?
        }
    };
    to_latin1(&canonical)
}

/// Transcode UTF-8 text into ISO-8859-1 bytes.
///
/// Scalar values up to U+00FF are the byte encoding; anything above is
/// not representable and surfaces as [`XmlError::Encoding`].
pub fn to_latin1(text: &str) -> Result<Vec<u8>, XmlError> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let cp = ch as u32;
        if cp > 0xFF {
            return Err(XmlError::Encoding { codepoint: cp });
        }
        out.push(cp as u8);
    }
    Ok(out)
}

pub(crate) fn context(doc: &Document) -> Result<xpath::Context, XmlError> {
    xpath::Context::new(doc).map_err(|e| XmlError::XPath(format!("{e:?}")))
}

pub(crate) fn register_namespace(
    ctx: &xpath::Context,
    prefix: &str,
    href: &str,
) -> Result<(), XmlError> {
    ctx.register_namespace(prefix, href)
        .map_err(|e| XmlError::XPath(format!("{e:?}")))
}

pub(crate) fn first_matching_node(
    ctx: &xpath::Context,
    expr: &str,
) -> Result<Option<Node>, XmlError> {
    let nodes = ctx
        .evaluate(expr)
        .map_err(|e| XmlError::XPath(format!("{e:?}")))?
        .get_nodes_as_vec();
    Ok(nodes.into_iter().next())
}

pub(crate) fn matching_nodes(ctx: &xpath::Context, expr: &str) -> Result<Vec<Node>, XmlError> {
    Ok(ctx
        .evaluate(expr)
        .map_err(|e| XmlError::XPath(format!("{e:?}")))?
        .get_nodes_as_vec())
}

pub(crate) fn xpath_text_optional(
    ctx: &xpath::Context,
    expr: &str,
) -> Result<Option<String>, XmlError> {
    let nodes = ctx
        .evaluate(expr)
        .map_err(|e| XmlError::XPath(format!("{e:?}")))?
        .get_nodes_as_vec();
    let node = match nodes.first() {
        Some(node) => node,
        None => return Ok(None),
    };
    let value = node.get_content().trim().to_string();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(value))
}

/// Parse a fragment and import its root into `doc`, returning the
/// imported node, still unlinked.
pub(crate) fn import_fragment(doc: &mut Document, xml: &str) -> Result<Node, XmlError> {
    let fragment = parse(xml)?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| XmlError::Parse("fragment has no root element".to_string()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| XmlError::Parse("failed to import fragment".to_string()))
}
