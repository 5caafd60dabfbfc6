use std::borrow::Cow;
use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use ego_tree::NodeId;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Document, Element};
use sxd_document::Package;
use sxd_xpath::{nodeset, Context, Factory, Value};
use tracing::debug;

use super::{BrowserConfig, Page, PageFactory, WaitUntil};
use crate::config::Locator;
use crate::error::PageError;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "head", "title"];

/// Handle to an element: its pre-order position among the document's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtmlNode(usize);

/// A parsed document plus the element index handles resolve through.
struct Loaded {
    html: Html,
    source: String,
    elements: Vec<NodeId>,
    positions: HashMap<NodeId, usize>,
    // Second DOM for XPath, built on first use.
    xml: OnceCell<Package>,
}

impl Loaded {
    fn parse(source: String) -> Self {
        let html = Html::parse_document(&source);
        let elements: Vec<NodeId> = html
            .tree
            .root()
            .descendants()
            .filter(|n| n.value().is_element())
            .map(|n| n.id())
            .collect();
        let positions = elements.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Loaded {
            html,
            source,
            elements,
            positions,
            xml: OnceCell::new(),
        }
    }

    fn element(&self, node: &HtmlNode) -> Result<ElementRef<'_>, PageError> {
        self.elements
            .get(node.0)
            .and_then(|id| self.html.tree.get(*id))
            .and_then(ElementRef::wrap)
            .ok_or(PageError::StaleNode)
    }

    /// Map matched elements back to handles in document order.
    fn handles<'a>(&self, matches: impl Iterator<Item = ElementRef<'a>>) -> Vec<HtmlNode> {
        let mut out: Vec<usize> = matches
            .filter_map(|e| self.positions.get(&e.id()).copied())
            .collect();
        out.sort_unstable();
        out.dedup();
        out.into_iter().map(HtmlNode).collect()
    }

    fn locate(&self, scope: Option<&HtmlNode>, locator: &Locator) -> Result<Vec<HtmlNode>, PageError> {
        let scope_el = scope.map(|n| self.element(n)).transpose()?;
        match locator {
            Locator::Css(sel) => {
                let selector =
                    Selector::parse(sel).map_err(|_| PageError::InvalidSelector(sel.clone()))?;
                Ok(match scope_el {
                    Some(el) => self.handles(el.select(&selector)),
                    None => self.handles(self.html.select(&selector)),
                })
            }
            Locator::Xpath(expr) => self.xpath(scope, expr),
            Locator::Text(needle) => {
                let needle = normalize(needle);
                if needle.is_empty() {
                    return Ok(Vec::new());
                }
                let root = scope_el.unwrap_or_else(|| self.html.root_element());
                let mut hits = Vec::new();
                deepest_text_matches(root, &needle, &mut hits);
                Ok(self.handles(hits.into_iter()))
            }
        }
    }

    /// Evaluate XPath on an XML view of the same source, then map the element
    /// results back by pre-order position.
    fn xpath(&self, scope: Option<&HtmlNode>, expr: &str) -> Result<Vec<HtmlNode>, PageError> {
        let package = self.xml.get_or_init(|| sxd_html::parse_html(&self.source));
        let document = package.as_document();
        let xml_elements = preorder_elements(&document);
        if xml_elements.len() != self.elements.len() {
            return Err(PageError::Unsupported("xpath on a document with diverging element trees"));
        }

        let (context_node, expr): (nodeset::Node, Cow<str>) = match scope {
            Some(handle) => {
                let el = *xml_elements.get(handle.0).ok_or(PageError::StaleNode)?;
                // Scoped lookups stay inside the scope element.
                let expr = if expr.starts_with('/') {
                    Cow::Owned(format!(".{}", expr))
                } else {
                    Cow::Borrowed(expr)
                };
                (el.into(), expr)
            }
            None => (document.root().into(), Cow::Borrowed(expr)),
        };

        let invalid = |e: &dyn std::fmt::Display| PageError::InvalidSelector(format!("{} ({})", expr, e));
        let xpath = Factory::new()
            .build(&expr)
            .map_err(|e| invalid(&e))?
            .ok_or_else(|| invalid(&"empty expression"))?;
        let value = xpath
            .evaluate(&Context::new(), context_node)
            .map_err(|e| invalid(&e))?;
        let Value::Nodeset(nodes) = value else {
            return Err(invalid(&"does not select nodes"));
        };

        let index: HashMap<nodeset::Node, usize> = xml_elements
            .iter()
            .enumerate()
            .map(|(i, e)| ((*e).into(), i))
            .collect();
        let mut out = Vec::new();
        for node in nodes.document_order() {
            let nodeset::Node::Element(e) = node else { continue };
            let Some(&pos) = index.get(&node) else { continue };
            let html_el = self.element(&HtmlNode(pos))?;
            if !html_el.value().name().eq_ignore_ascii_case(e.name().local_part()) {
                return Err(PageError::Unsupported("xpath on a document with diverging element trees"));
            }
            out.push(HtmlNode(pos));
        }
        Ok(out)
    }
}

fn preorder_elements<'d>(document: &Document<'d>) -> Vec<Element<'d>> {
    let mut stack: Vec<Element<'d>> = document
        .root()
        .children()
        .into_iter()
        .rev()
        .filter_map(|c| match c {
            ChildOfRoot::Element(e) => Some(e),
            _ => None,
        })
        .collect();
    let mut out = Vec::new();
    while let Some(el) = stack.pop() {
        out.push(el);
        stack.extend(el.children().into_iter().rev().filter_map(|c| match c {
            ChildOfElement::Element(e) => Some(e),
            _ => None,
        }));
    }
    out
}

fn normalize(s: &str) -> String {
    WS_RE.replace_all(s.trim(), " ").to_lowercase()
}

/// Concatenated text of an element, leaving out script/style-like subtrees.
fn visible_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            if !SKIP_TAGS.contains(&child_el.value().name()) {
                visible_text(child_el, out);
            }
        }
    }
}

/// Collect the deepest elements whose visible text contains `needle`. A child's
/// text is a substring of its parent's, so non-matching subtrees are pruned.
fn deepest_text_matches<'a>(el: ElementRef<'a>, needle: &str, hits: &mut Vec<ElementRef<'a>>) -> bool {
    if SKIP_TAGS.contains(&el.value().name()) {
        return false;
    }
    let mut text = String::new();
    visible_text(el, &mut text);
    if !normalize(&text).contains(needle) {
        return false;
    }
    let mut child_hit = false;
    for child in el.children().filter_map(ElementRef::wrap) {
        child_hit |= deepest_text_matches(child, needle, hits);
    }
    if !child_hit {
        hits.push(el);
    }
    true
}

/// Static DOM page: fetches the document over HTTP (or reads a `file://` URL) and
/// queries it with CSS, XPath and text locators. No script execution, so
/// screenshots are unsupported.
pub struct HtmlPage {
    client: reqwest::Client,
    doc: RefCell<Option<Loaded>>,
}

impl HtmlPage {
    pub fn new(client: reqwest::Client) -> Self {
        HtmlPage {
            client,
            doc: RefCell::new(None),
        }
    }

    #[cfg(test)]
    pub fn from_html(html: &str) -> Self {
        let page = HtmlPage::new(reqwest::Client::new());
        page.load_html(html);
        page
    }

    /// Replace the current document, as if navigated to a page with this HTML.
    pub fn load_html(&self, html: &str) {
        *self.doc.borrow_mut() = Some(Loaded::parse(html.to_string()));
    }

    fn with_doc<T>(&self, f: impl FnOnce(&Loaded) -> Result<T, PageError>) -> Result<T, PageError> {
        let guard = self.doc.borrow();
        let doc = guard.as_ref().ok_or(PageError::NotLoaded)?;
        f(doc)
    }

    async fn fetch(&self, url: &str) -> Result<String, PageError> {
        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|e| PageError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
        }
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PageError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait(?Send)]
impl Page for HtmlPage {
    type Node = HtmlNode;

    async fn navigate(&self, url: &str, wait: WaitUntil, timeout: Duration) -> Result<(), PageError> {
        debug!("goto: {} ({:?})", url, wait);
        let body = match tokio::time::timeout(timeout, self.fetch(url)).await {
            Ok(Ok(body)) => body,
            Ok(Err(PageError::Http(e))) => {
                return Err(PageError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PageError::Timeout(timeout.as_millis() as u64)),
        };
        *self.doc.borrow_mut() = Some(Loaded::parse(body));
        Ok(())
    }

    async fn settle(&self, _idle: Duration) {
        // Static documents have no pending network activity.
    }

    async fn locate(
        &self,
        scope: Option<&HtmlNode>,
        locator: &Locator,
    ) -> Result<Vec<HtmlNode>, PageError> {
        self.with_doc(|doc| doc.locate(scope, locator))
    }

    async fn ancestor_or_self(
        &self,
        node: &HtmlNode,
        tag: &str,
    ) -> Result<Option<HtmlNode>, PageError> {
        self.with_doc(|doc| {
            let el = doc.element(node)?;
            let found = std::iter::once(el)
                .chain(el.ancestors().filter_map(ElementRef::wrap))
                .find(|e| e.value().name().eq_ignore_ascii_case(tag));
            Ok(found.and_then(|e| doc.handles(std::iter::once(e)).into_iter().next()))
        })
    }

    async fn inner_text(&self, node: &HtmlNode) -> Result<String, PageError> {
        self.with_doc(|doc| Ok(doc.element(node)?.text().collect()))
    }

    async fn attribute(&self, node: &HtmlNode, name: &str) -> Result<Option<String>, PageError> {
        self.with_doc(|doc| Ok(doc.element(node)?.value().attr(name).map(str::to_string)))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        Err(PageError::Unsupported("screenshots"))
    }

    async fn content(&self) -> Result<String, PageError> {
        self.with_doc(|doc| Ok(doc.html.html()))
    }

    async fn close(&self) {
        self.doc.borrow_mut().take();
    }
}

/// Opens [`HtmlPage`]s with the profile's user agent and optional proxy.
#[derive(Default)]
pub struct HttpPageFactory {
    opened: AtomicUsize,
}

impl HttpPageFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl PageFactory for HttpPageFactory {
    type Page = HtmlPage;

    async fn open(&self, config: &BrowserConfig) -> Result<HtmlPage, PageError> {
        let nth = self.opened.fetch_add(1, Ordering::Relaxed);
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent(nth));
        if let Some(proxy) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        let preset = config.profile.preset();
        debug!(
            "[{}] viewport {}x{} @{}x mobile={} touch={} headless={}",
            config.profile,
            preset.viewport.0,
            preset.viewport.1,
            preset.device_scale_factor,
            preset.is_mobile,
            preset.has_touch,
            config.headless
        );
        if config.tracing {
            debug!("[{}] tracing requested; static pages record no trace", config.profile);
        }
        Ok(HtmlPage::new(builder.build()?))
    }
}

// ── Tests ──
