use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;
use std::str::FromStr;

use crate::api::{RemoteFile, RemotePost, RemoteThread};
use crate::dom::{Document, NodeId};
use crate::markup;
use crate::observer::{Observers, Subscription};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFile {
    pub location: String,
    pub thumbnail_location: String,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub name: String,
}

impl From<&RemoteFile> for PostFile {
    fn from(remote: &RemoteFile) -> Self {
        Self {
            location: remote.location.clone(),
            thumbnail_location: remote.thumbnail_location.clone(),
            thumbnail_width: remote.thumbnail_width,
            thumbnail_height: remote.thumbnail_height,
            width: remote.width,
            height: remote.height,
            size: remote.size,
            name: remote.name.clone(),
        }
    }
}

/// One post of a thread.
///
/// Identity and content are fixed once the post is built. `referenced_by`
/// is recomputed by the owning [`Thread`] after every merge, and the list of
/// document nodes currently rendering the post is kept by the view layer.
#[derive(Debug, Default)]
pub struct Post {
    pub id: u64,
    pub refno: u64,
    /// Epoch milliseconds.
    pub date: i64,
    pub html: Option<String>,
    pub name: Option<String>,
    pub mod_code: Option<String>,
    pub subject: Option<String>,
    pub files: Vec<PostFile>,
    references: Vec<u64>,
    referenced_by: RefCell<Vec<u64>>,
    observers: Observers<Post>,
    views: RefCell<Vec<NodeId>>,
}

impl Post {
    pub fn new(id: u64, refno: u64, date: i64) -> Self {
        Self {
            id,
            refno,
            date,
            ..Self::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = non_empty(Some(html.into()));
        self
    }

    /// Builds a post from a poll record. Records without an id or refno
    /// cannot be placed in the thread and yield `None`.
    pub fn from_remote(remote: &RemotePost) -> Option<Self> {
        let (id, refno) = (remote.id?, remote.refno?);
        Some(Self {
            id,
            refno,
            date: remote.date.unwrap_or_default(),
            html: non_empty(remote.html.clone()),
            name: non_empty(remote.name.clone()),
            mod_code: non_empty(remote.mod_code.clone()),
            subject: non_empty(remote.subject.clone()),
            files: remote
                .files
                .iter()
                .flatten()
                .map(PostFile::from)
                .collect(),
            ..Self::default()
        })
    }

    /// Extracts the quote references from the body. Runs once, before the
    /// post joins a thread.
    pub fn resolve(&mut self) {
        self.references = self
            .html
            .as_deref()
            .map(markup::quoted_refnos)
            .unwrap_or_default();
    }

    pub fn references(&self) -> &[u64] {
        &self.references
    }

    pub fn referenced_by(&self) -> Vec<u64> {
        self.referenced_by.borrow().clone()
    }

    pub fn quotes(&self, refno: u64) -> bool {
        self.references.contains(&refno)
    }

    /// Recomputes the backrefs from `posts`; notifies observers only when
    /// the set changed. Returns whether it did.
    pub fn resolve_backrefs(&self, posts: &[Rc<Post>]) -> bool {
        let fresh: Vec<u64> = posts
            .iter()
            .filter(|post| post.quotes(self.refno))
            .map(|post| post.refno)
            .collect();

        let changed = *self.referenced_by.borrow() != fresh;
        if changed {
            *self.referenced_by.borrow_mut() = fresh;
            self.notify();
        }
        changed
    }

    pub fn observe(&self, callback: impl Fn(&Post) + 'static) -> Subscription {
        self.observers.subscribe(callback)
    }

    pub fn unobserve(&self, handle: Subscription) -> bool {
        self.observers.unsubscribe(handle)
    }

    pub fn is_observing(&self, handle: Subscription) -> bool {
        self.observers.is_subscribed(handle)
    }

    pub fn notify(&self) {
        self.observers.notify(self);
    }

    /// Records that `node` currently renders this post. The post does not
    /// own the node; the binder must call [`Post::unregister_view`] on
    /// teardown.
    pub fn register_view(&self, node: NodeId) {
        let mut views = self.views.borrow_mut();
        if !views.contains(&node) {
            views.push(node);
        }
    }

    pub fn unregister_view(&self, node: NodeId) {
        self.views.borrow_mut().retain(|view| *view != node);
    }

    pub fn views(&self) -> Vec<NodeId> {
        self.views.borrow().clone()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadMeta {
    pub refno: Option<u64>,
    pub last_modified: Option<i64>,
    pub locked: bool,
    pub sticky: bool,
}

impl ThreadMeta {
    pub fn from_remote(remote: &RemoteThread, fallback_refno: Option<u64>) -> Self {
        Self {
            refno: remote.refno.or(fallback_refno),
            last_modified: remote.last_modified,
            locked: remote.locked,
            sticky: remote.sticky,
        }
    }
}

/// Append-only list of posts with one notification per merged batch.
#[derive(Debug, Default)]
pub struct Thread {
    posts: RefCell<Vec<Rc<Post>>>,
    meta: Cell<ThreadMeta>,
    observers: Observers<Thread>,
}

impl Thread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> Vec<Rc<Post>> {
        self.posts.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.posts.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.borrow().is_empty()
    }

    pub fn post(&self, index: usize) -> Option<Rc<Post>> {
        self.posts.borrow().get(index).cloned()
    }

    pub fn meta(&self) -> ThreadMeta {
        self.meta.get()
    }

    pub fn set_meta(&self, meta: ThreadMeta) {
        self.meta.set(meta);
    }

    pub fn has_id(&self, id: u64) -> bool {
        self.posts.borrow().iter().any(|post| post.id == id)
    }

    pub fn find_by_refno(&self, refno: u64) -> Option<Rc<Post>> {
        self.posts
            .borrow()
            .iter()
            .find(|post| post.refno == refno)
            .cloned()
    }

    pub fn observe(&self, callback: impl Fn(&Thread) + 'static) -> Subscription {
        self.observers.subscribe(callback)
    }

    pub fn unobserve(&self, handle: Subscription) -> bool {
        self.observers.unsubscribe(handle)
    }

    fn notify(&self) {
        self.observers.notify(self);
    }

    fn resolve_all_backrefs(&self) {
        let snapshot = self.posts();
        for post in &snapshot {
            post.resolve_backrefs(&snapshot);
        }
    }

    /// Merges a poll response and returns how many posts were added.
    ///
    /// Unknown ids are appended in arrival order, backrefs are recomputed
    /// for every post, then thread observers are told once.
    pub fn update(&self, remote: &RemoteThread) -> usize {
        self.meta.set(ThreadMeta::from_remote(remote, self.meta.get().refno));

        let mut known: HashSet<u64> = self.posts.borrow().iter().map(|post| post.id).collect();
        let mut fresh = Vec::new();
        for record in &remote.posts {
            let Some(mut post) = Post::from_remote(record) else {
                tracing::warn!(id = ?record.id, refno = ?record.refno, "skipping post record without identity");
                continue;
            };
            if !known.insert(post.id) {
                continue;
            }
            post.resolve();
            fresh.push(Rc::new(post));
        }

        let added = fresh.len();
        self.posts.borrow_mut().extend(fresh);
        self.resolve_all_backrefs();

        tracing::debug!(added, total = self.len(), "thread merged");
        self.notify();
        added
    }

    /// Reads the posts already present in the page below `container`.
    ///
    /// Expects the server-rendered shape: `.post` elements with an id of
    /// `p<refno>`, a `data-date`, an id checkbox, a `.header` and optional
    /// `.styled-text` and `.file` blocks. Elements that do not fit are
    /// skipped. Observers are not notified.
    pub fn load_from_post_elements(&self, document: &Document, container: NodeId) -> usize {
        let mut known: HashSet<u64> = self.posts.borrow().iter().map(|post| post.id).collect();
        let mut loaded = 0;
        for element in document.all_by_class(container, "post") {
            match post_from_element(document, element) {
                Some(post) if !known.insert(post.id) => {
                    tracing::debug!(id = post.id, "duplicate post element, skipped");
                }
                Some(mut post) => {
                    post.resolve();
                    self.posts.borrow_mut().push(Rc::new(post));
                    loaded += 1;
                }
                None => {
                    tracing::warn!(?element, "post element without id or refno, skipped");
                }
            }
        }
        self.resolve_all_backrefs();
        loaded
    }
}

fn post_from_element(document: &Document, element: NodeId) -> Option<Post> {
    let checkbox = document.find_first(element, |doc, node| {
        doc.tag(node) == Some("input") && doc.attr(node, "type") == Some("checkbox")
    })?;
    let id = document.attr(checkbox, "value")?.trim().parse().ok()?;
    let refno = document
        .element_id(element)?
        .trim_start_matches('p')
        .trim_start_matches('#')
        .parse()
        .ok()?;
    let date = document
        .data(element, "date")
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or_default();

    let mut post = Post::new(id, refno, date);

    if let Some(text) = document.first_by_class(element, "styled-text") {
        let html = document
            .inner_html(text)
            .map(str::to_string)
            .unwrap_or_else(|| markup::escape(&document.text_content(text)));
        post.html = non_empty(Some(html.trim().to_string()));
    }

    if let Some(header) = document.first_by_class(element, "header") {
        let text_of = |class: &str| {
            document
                .first_by_class(header, class)
                .map(|node| document.text_content(node).trim().to_string())
                .filter(|text| !text.is_empty())
        };
        post.name = text_of("name");
        post.mod_code = text_of("modcode");
        post.subject = text_of("subject");
    }

    for file in document.all_by_class(element, "file") {
        let Some(link) = document.first_by_tag_class(file, "a", "file-link") else {
            continue;
        };
        let image = document.first_by_tag(file, "img");
        post.files.push(PostFile {
            location: document.attr(link, "href").unwrap_or_default().to_string(),
            thumbnail_location: image
                .and_then(|img| document.attr(img, "src"))
                .unwrap_or_default()
                .to_string(),
            thumbnail_width: image.map(|img| number(document, img, "width")).unwrap_or_default(),
            thumbnail_height: image.map(|img| number(document, img, "height")).unwrap_or_default(),
            width: number(document, link, "data-filewidth"),
            height: number(document, link, "data-fileheight"),
            size: number(document, link, "data-filesize"),
            name: document.data(link, "filename").unwrap_or_default().to_string(),
        });
    }

    Some(post)
}

/// Numeric attribute; missing or out-of-range values read as zero.
fn number<T: FromStr + Default>(document: &Document, node: NodeId, name: &str) -> T {
    document
        .attr(node, name)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or_default()
}
