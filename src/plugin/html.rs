//! HTML parsing behind the sandbox's `cheerio` module
//!
//! Documents are parsed with `scraper` and kept in an arena owned by the
//! plugin's runtime. JavaScript only ever sees numeric handles: a document
//! handle plus node handles, which are preorder positions in that document,
//! so sorting handles yields document order.

use anyhow::{anyhow, Result};
use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::{BTreeSet, HashMap};

pub type DocumentHandle = u32;
pub type NodeHandle = u32;

/// Handle of the document node itself
pub const ROOT: NodeHandle = 0;

struct HtmlDocument {
    html: Html,
    nodes: Vec<NodeId>,
    index: HashMap<NodeId, NodeHandle>,
}

impl HtmlDocument {
    fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let nodes: Vec<NodeId> = html.tree.root().descendants().map(|node| node.id()).collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position as NodeHandle))
            .collect();
        Self { html, nodes, index }
    }

    fn node(&self, handle: NodeHandle) -> Option<NodeRef<'_, Node>> {
        let id = self.nodes.get(handle as usize)?;
        self.html.tree.get(*id)
    }

    fn element(&self, handle: NodeHandle) -> Option<ElementRef<'_>> {
        self.node(handle).and_then(ElementRef::wrap)
    }

    fn handle(&self, node: NodeRef<'_, Node>) -> Option<NodeHandle> {
        self.index.get(&node.id()).copied()
    }
}

/// Parsed documents of one plugin runtime
#[derive(Default)]
pub struct HtmlArena {
    documents: Vec<HtmlDocument>,
}

impl HtmlArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, markup: &str) -> DocumentHandle {
        self.documents.push(HtmlDocument::parse(markup));
        (self.documents.len() - 1) as DocumentHandle
    }

    /// Drop every parsed document
    pub fn clear(&mut self) {
        self.documents.clear();
    }

    fn document(&self, doc: DocumentHandle) -> Result<&HtmlDocument> {
        self.documents
            .get(doc as usize)
            .ok_or_else(|| anyhow!("Stale HTML document handle {}", doc))
    }

    /// Elements matching `selector` below any node of `scope`, in document order
    pub fn select(&self, doc: DocumentHandle, scope: &[NodeHandle], selector: &str) -> Result<Vec<NodeHandle>> {
        let document = self.document(doc)?;
        let selector = parse_selector(selector)?;
        let mut found = BTreeSet::new();

        for &handle in scope {
            if handle == ROOT {
                found.extend(document.html.select(&selector).filter_map(|el| document.handle(*el)));
            } else if let Some(element) = document.element(handle) {
                found.extend(element.select(&selector).filter_map(|el| document.handle(*el)));
            }
        }
        Ok(found.into_iter().collect())
    }

    /// Element children of `nodes`, optionally filtered by `selector`
    pub fn children(
        &self,
        doc: DocumentHandle,
        nodes: &[NodeHandle],
        selector: Option<&str>,
    ) -> Result<Vec<NodeHandle>> {
        let document = self.document(doc)?;
        let selector = selector.map(parse_selector).transpose()?;
        let mut found = BTreeSet::new();

        for &handle in nodes {
            let Some(node) = document.node(handle) else { continue };
            for child in node.children() {
                let Some(element) = ElementRef::wrap(child) else { continue };
                if selector.as_ref().map_or(true, |s| s.matches(&element)) {
                    found.extend(document.handle(child));
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    /// Parent elements of `nodes`, deduplicated
    pub fn parent(&self, doc: DocumentHandle, nodes: &[NodeHandle]) -> Result<Vec<NodeHandle>> {
        let document = self.document(doc)?;
        let parents: BTreeSet<_> = nodes
            .iter()
            .filter_map(|&handle| document.node(handle)?.parent())
            .filter(|parent| ElementRef::wrap(*parent).is_some())
            .filter_map(|parent| document.handle(parent))
            .collect();
        Ok(parents.into_iter().collect())
    }

    /// Concatenated text of all `nodes`
    pub fn text(&self, doc: DocumentHandle, nodes: &[NodeHandle]) -> Result<String> {
        let document = self.document(doc)?;
        let mut text = String::new();
        for &handle in nodes {
            if let Some(node) = document.node(handle) {
                for descendant in node.descendants() {
                    if let Node::Text(chunk) = descendant.value() {
                        text.push_str(chunk);
                    }
                }
            }
        }
        Ok(text)
    }

    pub fn inner_html(&self, doc: DocumentHandle, node: NodeHandle) -> Result<Option<String>> {
        let document = self.document(doc)?;
        if node == ROOT {
            return Ok(Some(document.html.html()));
        }
        Ok(document.element(node).map(|el| el.inner_html()))
    }

    pub fn outer_html(&self, doc: DocumentHandle, node: NodeHandle) -> Result<Option<String>> {
        let document = self.document(doc)?;
        if node == ROOT {
            return Ok(Some(document.html.html()));
        }
        Ok(document.element(node).map(|el| el.html()))
    }

    pub fn attr(&self, doc: DocumentHandle, node: NodeHandle, name: &str) -> Result<Option<String>> {
        let document = self.document(doc)?;
        Ok(document
            .element(node)
            .and_then(|el| el.value().attr(name))
            .map(str::to_string))
    }

    pub fn attrs(&self, doc: DocumentHandle, node: NodeHandle) -> Result<HashMap<String, String>> {
        let document = self.document(doc)?;
        Ok(document
            .element(node)
            .map(|el| {
                el.value()
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn tag_name(&self, doc: DocumentHandle, node: NodeHandle) -> Result<Option<String>> {
        let document = self.document(doc)?;
        Ok(document.element(node).map(|el| el.value().name().to_string()))
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("Invalid selector '{}': {}", selector, e))
}
