//! In-memory page document.
//!
//! A small retained element tree standing in for the browser page: elements
//! with class lists and attributes, text nodes, per-node event listeners,
//! layout geometry written by the front end, a viewport and a title. Node
//! ids are arena indices and are only meaningful for the document that
//! created them. Removed subtrees go back to a free list, so an id must not
//! be used after its node was removed.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

pub type SharedDocument = Rc<RefCell<Document>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element(String),
    Text(String),
}

/// Box in document coordinates (rows and columns for the terminal front end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub top: i32,
    pub left: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(top: i32, left: i32, width: i32, height: i32) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub scroll_top: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    MouseOver,
    MouseOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub target: NodeId,
    /// 0 is the primary button.
    pub button: u8,
    pub shift: bool,
    pub ctrl: bool,
    pub meta: bool,
}

impl Event {
    pub fn new(kind: EventKind, target: NodeId) -> Self {
        Self {
            kind,
            target,
            button: 0,
            shift: false,
            ctrl: false,
            meta: false,
        }
    }

    pub fn is_plain_primary(&self) -> bool {
        self.button == 0 && !self.shift && !self.ctrl && !self.meta
    }
}

/// Identity of a bound handler. Adding the same key twice for one
/// node/event pair is a no-op, removing it detaches that handler only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

pub type Listener = Rc<dyn Fn(&Event)>;

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    classes: Vec<String>,
    attrs: BTreeMap<String, String>,
    inner_html: Option<String>,
    rect: Option<Rect>,
    live: bool,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            inner_html: None,
            rect: None,
            live: true,
        }
    }

    fn vacant() -> Self {
        Self {
            live: false,
            ..Self::new(NodeKind::Text(String::new()))
        }
    }
}

pub struct Document {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    listeners: HashMap<(NodeId, EventKind), Vec<(ListenerKey, Listener)>>,
    next_listener: u64,
    title: String,
    viewport: Viewport,
    scroll_height: i32,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Element("body".into()))],
            free: Vec::new(),
            root: NodeId(0),
            listeners: HashMap::new(),
            next_listener: 1,
            title: String::new(),
            viewport: Viewport::default(),
            scroll_height: 0,
        }
    }

    pub fn shared(self) -> SharedDocument {
        Rc::new(RefCell::new(self))
    }

    pub fn body(&self) -> NodeId {
        self.root
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(Node::new(NodeKind::Element(tag.to_string())))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(Node::new(NodeKind::Text(text.to_string())))
    }

    fn push(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = node;
            return id;
        }
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Slots in the arena, live or free.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn kind(&self, node: NodeId) -> &NodeKind {
        &self.nodes[node.0].kind
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Element(tag) => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.tag(node).is_some()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].children.first().copied()
    }

    pub fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].children.last().copied()
    }

    pub fn last_element_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0]
            .children
            .iter()
            .rev()
            .copied()
            .find(|child| self.is_element(*child))
    }

    /// Whether `node` is reachable from the document body.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Inserts `child` before `reference`, or appends when `reference` is
    /// `None` or not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.detach(child);
        let index = reference.and_then(|reference| {
            self.nodes[parent.0]
                .children
                .iter()
                .position(|id| *id == reference)
        });
        self.nodes[child.0].parent = Some(parent);
        match index {
            Some(index) => self.nodes[parent.0].children.insert(index, child),
            None => self.nodes[parent.0].children.push(child),
        }
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|id| *id != node);
        }
    }

    /// Detaches `node` and frees its subtree along with its listeners.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
        self.release(node);
    }

    pub fn clear_children(&mut self, node: NodeId) {
        let children = std::mem::take(&mut self.nodes[node.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
            self.release(child);
        }
    }

    fn release(&mut self, node: NodeId) {
        if node == self.root {
            return;
        }
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if !self.nodes[id.0].live {
                continue;
            }
            self.listeners.retain(|(target, _), _| *target != id);
            let slot = std::mem::replace(&mut self.nodes[id.0], Node::vacant());
            stack.extend(slot.children);
            self.free.push(id);
        }
    }

    pub fn add_class(&mut self, node: NodeId, class: &str) {
        let classes = &mut self.nodes[node.0].classes;
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
        }
    }

    pub fn remove_class(&mut self, node: NodeId, class: &str) {
        self.nodes[node.0].classes.retain(|c| c != class);
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.nodes[node.0].classes.iter().any(|c| c == class)
    }

    pub fn classes(&self, node: NodeId) -> &[String] {
        &self.nodes[node.0].classes
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: impl Into<String>) {
        self.nodes[node.0].attrs.insert(name.to_string(), value.into());
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes[node.0].attrs.get(name).map(String::as_str)
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        self.nodes[node.0].attrs.remove(name);
    }

    /// `data-*` attribute lookup, `data("filewidth")` reads `data-filewidth`.
    pub fn data(&self, node: NodeId, key: &str) -> Option<&str> {
        self.attr(node, &format!("data-{key}"))
    }

    pub fn set_data(&mut self, node: NodeId, key: &str, value: impl Into<String>) {
        self.set_attr(node, &format!("data-{key}"), value);
    }

    pub fn element_id(&self, node: NodeId) -> Option<&str> {
        self.attr(node, "id")
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.find_first(self.root, |doc, node| doc.element_id(node) == Some(id))
    }

    /// Markup source carried by an element (the post body as the server
    /// rendered it). Children are built separately by the renderer.
    pub fn inner_html(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].inner_html.as_deref()
    }

    pub fn set_inner_html(&mut self, node: NodeId, html: impl Into<String>) {
        self.nodes[node.0].inner_html = Some(html.into());
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(_) => {
                for child in &self.nodes[node.0].children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        if let NodeKind::Text(existing) = &mut self.nodes[node.0].kind {
            *existing = text.to_string();
            return;
        }
        if let &[child] = self.nodes[node.0].children.as_slice() {
            if let NodeKind::Text(existing) = &mut self.nodes[child.0].kind {
                existing.clear();
                existing.push_str(text);
                return;
            }
        }
        self.clear_children(node);
        let child = self.create_text(text);
        self.append_child(node, child);
    }

    /// Depth-first search below `root`; `root` itself is not tested.
    pub fn find_first(
        &self,
        root: NodeId,
        pred: impl Fn(&Document, NodeId) -> bool,
    ) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.nodes[root.0].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if pred(self, id) {
                return Some(id);
            }
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        None
    }

    pub fn find_all(&self, root: NodeId, pred: impl Fn(&Document, NodeId) -> bool) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[root.0].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if pred(self, id) {
                found.push(id);
            }
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        found
    }

    pub fn first_by_class(&self, root: NodeId, class: &str) -> Option<NodeId> {
        self.find_first(root, |doc, node| doc.has_class(node, class))
    }

    pub fn all_by_class(&self, root: NodeId, class: &str) -> Vec<NodeId> {
        self.find_all(root, |doc, node| doc.has_class(node, class))
    }

    pub fn first_by_tag(&self, root: NodeId, tag: &str) -> Option<NodeId> {
        self.find_first(root, |doc, node| doc.tag(node) == Some(tag))
    }

    pub fn first_by_tag_class(&self, root: NodeId, tag: &str, class: &str) -> Option<NodeId> {
        self.find_first(root, |doc, node| {
            doc.tag(node) == Some(tag) && doc.has_class(node, class)
        })
    }

    pub fn all_by_tag_class(&self, root: NodeId, tag: &str, class: &str) -> Vec<NodeId> {
        self.find_all(root, |doc, node| {
            doc.tag(node) == Some(tag) && doc.has_class(node, class)
        })
    }

    pub fn new_listener_key(&mut self) -> ListenerKey {
        let key = ListenerKey(self.next_listener);
        self.next_listener += 1;
        key
    }

    pub fn add_event_listener(
        &mut self,
        node: NodeId,
        kind: EventKind,
        key: ListenerKey,
        listener: Listener,
    ) {
        let entry = self.listeners.entry((node, kind)).or_default();
        if !entry.iter().any(|(existing, _)| *existing == key) {
            entry.push((key, listener));
        }
    }

    pub fn remove_event_listener(&mut self, node: NodeId, kind: EventKind, key: ListenerKey) {
        if let Some(entry) = self.listeners.get_mut(&(node, kind)) {
            entry.retain(|(existing, _)| *existing != key);
            if entry.is_empty() {
                self.listeners.remove(&(node, kind));
            }
        }
    }

    pub fn listener_count(&self, node: NodeId, kind: EventKind) -> usize {
        self.listeners
            .get(&(node, kind))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Listeners for `event`, target first then each ancestor.
    fn listeners_for(&self, event: &Event) -> Vec<Listener> {
        let mut out = Vec::new();
        let mut current = Some(event.target);
        while let Some(id) = current {
            if let Some(entry) = self.listeners.get(&(id, event.kind)) {
                out.extend(entry.iter().map(|(_, listener)| listener.clone()));
            }
            current = self.nodes[id.0].parent;
        }
        out
    }

    pub fn rect(&self, node: NodeId) -> Option<Rect> {
        self.nodes[node.0].rect
    }

    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        self.nodes[node.0].rect = Some(rect);
    }

    pub fn clear_rect(&mut self, node: NodeId) {
        self.nodes[node.0].rect = None;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport_size(&mut self, width: i32, height: i32) {
        self.viewport.width = width;
        self.viewport.height = height;
        self.clamp_scroll();
    }

    pub fn scroll_height(&self) -> i32 {
        self.scroll_height
    }

    pub fn set_scroll_height(&mut self, height: i32) {
        self.scroll_height = height;
        self.clamp_scroll();
    }

    pub fn scroll_to(&mut self, top: i32) {
        self.viewport.scroll_top = top;
        self.clamp_scroll();
    }

    pub fn scroll_by(&mut self, delta: i32) {
        self.scroll_to(self.viewport.scroll_top + delta);
    }

    fn clamp_scroll(&mut self) {
        let max = (self.scroll_height - self.viewport.height).max(0);
        self.viewport.scroll_top = self.viewport.scroll_top.clamp(0, max);
    }

    pub fn scroll_into_view(&mut self, node: NodeId) {
        if let Some(rect) = self.rect(node) {
            self.scroll_to(rect.top);
        }
    }

    /// Whether the node's box lies entirely inside the viewport.
    pub fn is_in_viewport(&self, node: NodeId) -> bool {
        let Some(rect) = self.rect(node) else {
            return false;
        };
        let top = rect.top - self.viewport.scroll_top;
        let bottom = rect.bottom() - self.viewport.scroll_top;
        top >= 0 && bottom < self.viewport.height
    }

    pub fn is_scrolled_to_bottom(&self) -> bool {
        self.viewport.height + self.viewport.scroll_top + 1 > self.scroll_height
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.live_count())
            .field("title", &self.title)
            .field("viewport", &self.viewport)
            .finish()
    }
}

/// Runs the listeners for `event` with the document unborrowed, so
/// handlers are free to mutate it.
pub fn dispatch(document: &SharedDocument, event: Event) {
    let listeners = document.borrow().listeners_for(&event);
    for listener in listeners {
        listener(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sample() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let posts = doc.create_element("div");
        doc.add_class(posts, "posts");
        let body = doc.body();
        doc.append_child(body, posts);
        let first = doc.create_element("div");
        doc.add_class(first, "post");
        doc.set_attr(first, "id", "p1");
        doc.append_child(posts, first);
        let link = doc.create_element("a");
        doc.add_class(link, "refno");
        let text = doc.create_text("#1");
        doc.append_child(link, text);
        doc.append_child(first, link);
        (doc, posts, first, link)
    }

    #[test]
    fn queries_walk_in_document_order() {
        let (mut doc, posts, first, link) = sample();
        let second = doc.create_element("div");
        doc.add_class(second, "post");
        doc.append_child(posts, second);

        assert_eq!(doc.all_by_class(posts, "post"), vec![first, second]);
        assert_eq!(doc.first_by_tag_class(posts, "a", "refno"), Some(link));
        assert_eq!(doc.get_element_by_id("p1"), Some(first));
        assert_eq!(doc.text_content(first), "#1");
        assert_eq!(doc.last_element_child(posts), Some(second));
    }

    #[test]
    fn insert_before_and_remove() {
        let (mut doc, posts, first, _) = sample();
        let marker = doc.create_element("div");
        doc.insert_before(posts, marker, doc.first_child(posts));
        assert_eq!(doc.children(posts), &[marker, first]);
        doc.remove(marker);
        assert_eq!(doc.children(posts), &[first]);
        assert!(!doc.is_connected(marker));
        assert!(doc.is_connected(first));
    }

    #[test]
    fn same_listener_key_is_attached_once() {
        let (mut doc, _, _, link) = sample();
        let key = doc.new_listener_key();
        let hits = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            doc.remove_event_listener(link, EventKind::Click, key);
            doc.add_event_listener(
                link,
                EventKind::Click,
                key,
                Rc::new(move |_| hits.set(hits.get() + 1)),
            );
        }
        assert_eq!(doc.listener_count(link, EventKind::Click), 1);

        let doc = doc.shared();
        dispatch(&doc, Event::new(EventKind::Click, link));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn events_bubble_to_ancestors() {
        let (mut doc, posts, _, link) = sample();
        let key = doc.new_listener_key();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        doc.add_event_listener(
            posts,
            EventKind::Click,
            key,
            Rc::new(move |event| {
                assert_eq!(event.kind, EventKind::Click);
                counter.set(counter.get() + 1);
            }),
        );
        let doc = doc.shared();
        dispatch(&doc, Event::new(EventKind::Click, link));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn clearing_children_drops_their_listeners() {
        let (mut doc, _, first, link) = sample();
        let key = doc.new_listener_key();
        doc.add_event_listener(link, EventKind::MouseOver, key, Rc::new(|_| {}));
        doc.clear_children(first);
        assert_eq!(doc.listener_count(link, EventKind::MouseOver), 0);
    }

    #[test]
    fn rewriting_text_reuses_the_text_node() {
        let (mut doc, _, _, link) = sample();
        let before = doc.arena_len();
        for second in 0..3600 {
            doc.set_text(link, &second.to_string());
        }
        assert_eq!(doc.arena_len(), before);
        assert_eq!(doc.children(link).len(), 1);
        assert_eq!(doc.text_content(link), "3599");
    }

    #[test]
    fn removed_subtrees_are_recycled() {
        let (mut doc, posts, first, link) = sample();
        let key = doc.new_listener_key();
        doc.add_event_listener(link, EventKind::Click, key, Rc::new(|_| {}));
        let before = doc.arena_len();

        doc.remove(first);
        doc.remove(first);
        assert_eq!(doc.live_count(), before - 3);
        assert_eq!(doc.listener_count(link, EventKind::Click), 0);

        for _ in 0..100 {
            let div = doc.create_element("div");
            let text = doc.create_text("again");
            doc.append_child(div, text);
            doc.append_child(posts, div);
            doc.remove(div);
        }
        assert_eq!(doc.arena_len(), before);
        assert!(doc.children(posts).is_empty());
    }

    #[test]
    fn viewport_geometry() {
        let (mut doc, _, first, _) = sample();
        doc.set_viewport_size(80, 20);
        doc.set_scroll_height(100);
        doc.set_rect(first, Rect::new(30, 0, 80, 5));
        assert!(!doc.is_in_viewport(first));
        doc.scroll_into_view(first);
        assert_eq!(doc.viewport().scroll_top, 30);
        assert!(doc.is_in_viewport(first));
        assert!(!doc.is_scrolled_to_bottom());
        doc.scroll_to(500);
        assert_eq!(doc.viewport().scroll_top, 80);
        assert!(doc.is_scrolled_to_bottom());
    }
}
