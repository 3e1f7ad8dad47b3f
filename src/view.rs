use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use chrono::{TimeZone, Utc};

use crate::dom::{Document, Event, EventKind, Listener, ListenerKey, NodeId, SharedDocument};
use crate::markup::{self, Segment};
use crate::observer::Subscription;
use crate::thread::{Post, PostFile, Thread};

/// Columns between the hovered reference and a floating preview.
pub const HOVER_LEFT_PADDING: i32 = 2;

const FILE_SIZE_PREFIXES: [&str; 4] = ["kB", "MB", "GB", "TB"];

pub trait ThreadViewCallback {
    /// Returns whether the click was handled.
    fn on_refno_clicked(&self, post: &Rc<Post>) -> bool;

    fn on_image_clicked(&self, document: &SharedDocument, file: &PostFile, file_container: NodeId);
}

pub struct ThreadView {
    me: Weak<ThreadView>,
    document: SharedDocument,
    thread: Rc<Thread>,
    container: NodeId,
    hover_container: NodeId,
    views: RefCell<Vec<Rc<PostView>>>,
    hovering: RefCell<Option<Rc<PostView>>>,
    highlighted: Cell<Option<NodeId>>,
    callback: Rc<dyn ThreadViewCallback>,
    subscription: Cell<Option<Subscription>>,
}

impl ThreadView {
    pub fn new(
        document: SharedDocument,
        container: NodeId,
        thread: Rc<Thread>,
        callback: Rc<dyn ThreadViewCallback>,
    ) -> Rc<Self> {
        let hover_container = {
            let mut doc = document.borrow_mut();
            let hover = doc.create_element("div");
            doc.set_attr(hover, "id", "hovering-post-container");
            let first = doc.first_child(container);
            doc.insert_before(container, hover, first);
            hover
        };

        let view = Rc::new_cyclic(|me| ThreadView {
            me: me.clone(),
            document,
            thread: thread.clone(),
            container,
            hover_container,
            views: RefCell::new(Vec::new()),
            hovering: RefCell::new(None),
            highlighted: Cell::new(None),
            callback,
            subscription: Cell::new(None),
        });

        let weak = Rc::downgrade(&view);
        let handle = thread.observe(move |thread| {
            if let Some(view) = weak.upgrade() {
                view.thread_updated(thread);
            }
        });
        view.subscription.set(Some(handle));
        view
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn thread(&self) -> &Rc<Thread> {
        &self.thread
    }

    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn hover_container(&self) -> NodeId {
        self.hover_container
    }

    pub fn views(&self) -> Vec<Rc<PostView>> {
        self.views.borrow().clone()
    }

    pub fn highlighted(&self) -> Option<NodeId> {
        self.highlighted.get()
    }

    pub fn hovering(&self) -> Option<NodeId> {
        self.hovering.borrow().as_ref().map(|view| view.element())
    }

    /// Pairs the `.post` nodes already in the container with the thread's
    /// posts, in order.
    pub fn bind_views(&self) {
        let posts = self.thread.posts();
        let elements: Vec<NodeId> = {
            let doc = self.document.borrow();
            doc.all_by_class(self.container, "post")
                .into_iter()
                .filter(|node| !doc.has_class(*node, "post-hover"))
                .collect()
        };

        for (post, element) in posts.into_iter().zip(elements) {
            let view = self.bind_post_view(post, element);
            self.views.borrow_mut().push(view);
        }
    }

    fn thread_updated(&self, thread: &Thread) {
        let start = self.views.borrow().len();
        let posts = thread.posts();
        for post in posts.into_iter().skip(start) {
            let element = build_post_element(&mut self.document.borrow_mut(), &post);
            let view = self.bind_post_view(post, element);
            self.views.borrow_mut().push(view);

            let mut doc = self.document.borrow_mut();
            if let Some(last) = doc.last_element_child(self.container) {
                if last != self.hover_container {
                    doc.add_class(last, "divider");
                }
            }
            doc.append_child(self.container, element);
        }
    }

    fn bind_post_view(&self, post: Rc<Post>, element: NodeId) -> Rc<PostView> {
        post.register_view(element);
        PostView::bind(self, post, element, true)
    }

    fn refno_clicked(&self, post: &Rc<Post>) {
        self.callback.on_refno_clicked(post);
    }

    fn image_clicked(&self, file: &PostFile, file_container: NodeId) {
        self.callback
            .on_image_clicked(&self.document, file, file_container);
    }

    pub fn quote_hover(&self, quote: NodeId, refno: u64, mouse_in: bool) {
        self.highlight_or_hover(quote, refno, mouse_in);
    }

    pub fn backref_hover(&self, backref: NodeId, refno: u64, mouse_in: bool) {
        self.highlight_or_hover(backref, refno, mouse_in);
    }

    fn clear_hover(&self) {
        let hovering = self.hovering.borrow_mut().take();
        if let Some(view) = hovering {
            view.unbind();
            self.document.borrow_mut().remove(view.element());
        }
        if let Some(node) = self.highlighted.take() {
            self.document.borrow_mut().remove_class(node, "highlight");
        }
    }

    // At most one of highlight and preview is active.
    fn highlight_or_hover(&self, reference: NodeId, refno: u64, mouse_in: bool) {
        self.clear_hover();
        if !mouse_in {
            return;
        }
        let Some(post) = self.thread.find_by_refno(refno) else {
            return;
        };

        let on_screen = {
            let doc = self.document.borrow();
            post.views()
                .into_iter()
                .find(|node| doc.is_connected(*node) && doc.is_in_viewport(*node))
        };

        if let Some(node) = on_screen {
            self.document.borrow_mut().add_class(node, "highlight");
            self.highlighted.set(Some(node));
            return;
        }

        let element = {
            let mut doc = self.document.borrow_mut();
            let element = build_post_element(&mut doc, &post);
            doc.add_class(element, "post-hover");
            if let Some(anchor) = doc.rect(reference) {
                doc.set_data(element, "anchor-row", (anchor.top + anchor.height / 2).to_string());
                doc.set_data(element, "anchor-col", (anchor.right() + HOVER_LEFT_PADDING).to_string());
            }
            element
        };
        let view = PostView::bind(self, post, element, false);
        self.document
            .borrow_mut()
            .append_child(self.hover_container, element);
        *self.hovering.borrow_mut() = Some(view);
    }

    pub fn quote_clicked(&self, refno: u64) {
        let Some(post) = self.thread.find_by_refno(refno) else {
            return;
        };
        let mut doc = self.document.borrow_mut();
        for node in post.views() {
            if doc.is_connected(node) {
                doc.scroll_into_view(node);
            }
        }
    }

    pub fn unbind(&self) {
        self.clear_hover();
        if let Some(handle) = self.subscription.take() {
            self.thread.unobserve(handle);
        }
        for view in self.views.borrow_mut().drain(..) {
            view.unbind();
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ListenerKeys {
    refno: ListenerKey,
    image: ListenerKey,
    quote: ListenerKey,
    backref: ListenerKey,
}

pub struct PostView {
    me: Weak<PostView>,
    thread_view: Weak<ThreadView>,
    post: Rc<Post>,
    element: NodeId,
    refno_element: Option<NodeId>,
    file_elements: Vec<NodeId>,
    quotes: Vec<NodeId>,
    backref_container: NodeId,
    keys: ListenerKeys,
    registered: bool,
    subscription: Cell<Option<Subscription>>,
}

impl PostView {
    fn bind(owner: &ThreadView, post: Rc<Post>, element: NodeId, registered: bool) -> Rc<PostView> {
        let (refno_element, file_elements, quotes, backref_container, keys) = {
            let mut doc = owner.document.borrow_mut();
            let refno_element = doc.first_by_tag_class(element, "a", "refno");
            let file_elements = doc.all_by_class(element, "file");
            let quotes = doc
                .first_by_class(element, "text")
                .map(|text| doc.all_by_tag_class(text, "a", "rquote"))
                .unwrap_or_default();

            let backref_container = doc.create_element("span");
            doc.add_class(backref_container, "backref-container");
            match doc.first_by_class(element, "header") {
                Some(header) => {
                    let last = doc.last_child(header);
                    doc.insert_before(header, backref_container, last);
                }
                None => doc.append_child(element, backref_container),
            }

            let keys = ListenerKeys {
                refno: doc.new_listener_key(),
                image: doc.new_listener_key(),
                quote: doc.new_listener_key(),
                backref: doc.new_listener_key(),
            };
            (refno_element, file_elements, quotes, backref_container, keys)
        };

        let view = Rc::new_cyclic(|me| PostView {
            me: me.clone(),
            thread_view: owner.me.clone(),
            post: post.clone(),
            element,
            refno_element,
            file_elements,
            quotes,
            backref_container,
            keys,
            registered,
            subscription: Cell::new(None),
        });

        let weak = Rc::downgrade(&view);
        let handle = post.observe(move |_| {
            if let Some(view) = weak.upgrade() {
                view.post_updated();
            }
        });
        view.subscription.set(Some(handle));
        view.post_updated();
        view
    }

    pub fn post(&self) -> &Rc<Post> {
        &self.post
    }

    pub fn element(&self) -> NodeId {
        self.element
    }

    pub fn quotes(&self) -> &[NodeId] {
        &self.quotes
    }

    pub fn backref_container(&self) -> NodeId {
        self.backref_container
    }

    fn handler(&self, action: fn(&PostView, &Event)) -> Listener {
        let me = self.me.clone();
        Rc::new(move |event: &Event| {
            if let Some(view) = me.upgrade() {
                action(&view, event);
            }
        })
    }

    fn rebind(&self, doc: &mut Document, node: NodeId, kind: EventKind, key: ListenerKey, listener: &Listener) {
        doc.remove_event_listener(node, kind, key);
        doc.add_event_listener(node, kind, key, listener.clone());
    }

    fn post_updated(&self) {
        let Some(owner) = self.thread_view.upgrade() else {
            return;
        };
        let refno_listener = self.handler(PostView::refno_event);
        let image_listener = self.handler(PostView::image_event);
        let quote_listener = self.handler(PostView::quote_event);
        let backref_listener = self.handler(PostView::backref_event);

        let mut doc = owner.document.borrow_mut();

        if let Some(refno) = self.refno_element {
            self.rebind(&mut doc, refno, EventKind::Click, self.keys.refno, &refno_listener);
        }

        for container in &self.file_elements {
            if let Some(image) = doc.first_by_tag(*container, "img") {
                self.rebind(&mut doc, image, EventKind::Click, self.keys.image, &image_listener);
            }
        }

        for quote in &self.quotes {
            for kind in [EventKind::MouseOver, EventKind::MouseOut, EventKind::Click] {
                self.rebind(&mut doc, *quote, kind, self.keys.quote, &quote_listener);
            }
        }

        doc.clear_children(self.backref_container);
        for refno in self.post.referenced_by() {
            let anchor = doc.create_element("a");
            doc.add_class(anchor, "backref");
            doc.set_attr(anchor, "href", format!("#p{refno}"));
            doc.set_text(anchor, &format!(">>{refno}"));
            for kind in [EventKind::MouseOver, EventKind::MouseOut, EventKind::Click] {
                doc.add_event_listener(anchor, kind, self.keys.backref, backref_listener.clone());
            }
            doc.append_child(self.backref_container, anchor);
            let space = doc.create_text(" ");
            doc.append_child(self.backref_container, space);
        }
    }

    fn refno_event(&self, _event: &Event) {
        if let Some(owner) = self.thread_view.upgrade() {
            owner.refno_clicked(&self.post);
        }
    }

    fn image_event(&self, event: &Event) {
        if !event.is_plain_primary() {
            return;
        }
        let Some(owner) = self.thread_view.upgrade() else {
            return;
        };
        let hit = {
            let doc = owner.document.borrow();
            self.file_elements
                .iter()
                .enumerate()
                .find(|(_, container)| doc.first_by_tag(**container, "img") == Some(event.target))
                .map(|(index, container)| (index, *container))
        };
        if let Some((index, container)) = hit {
            if let Some(file) = self.post.files.get(index) {
                owner.image_clicked(file, container);
            }
        }
    }

    fn quote_event(&self, event: &Event) {
        let Some(owner) = self.thread_view.upgrade() else {
            return;
        };
        let Some(refno) = anchor_refno(&owner.document.borrow(), event.target) else {
            return;
        };
        match event.kind {
            EventKind::MouseOver => owner.quote_hover(event.target, refno, true),
            EventKind::MouseOut => owner.quote_hover(event.target, refno, false),
            EventKind::Click => owner.quote_clicked(refno),
        }
    }

    fn backref_event(&self, event: &Event) {
        let Some(owner) = self.thread_view.upgrade() else {
            return;
        };
        let Some(refno) = anchor_refno(&owner.document.borrow(), event.target) else {
            return;
        };
        match event.kind {
            EventKind::MouseOver => owner.backref_hover(event.target, refno, true),
            EventKind::MouseOut => owner.backref_hover(event.target, refno, false),
            EventKind::Click => owner.quote_clicked(refno),
        }
    }

    pub fn unbind(&self) {
        if let Some(handle) = self.subscription.take() {
            self.post.unobserve(handle);
        }
        if self.registered {
            self.post.unregister_view(self.element);
        }
        let Some(owner) = self.thread_view.upgrade() else {
            return;
        };
        let mut doc = owner.document.borrow_mut();
        if let Some(refno) = self.refno_element {
            doc.remove_event_listener(refno, EventKind::Click, self.keys.refno);
        }
        for container in &self.file_elements {
            if let Some(image) = doc.first_by_tag(*container, "img") {
                doc.remove_event_listener(image, EventKind::Click, self.keys.image);
            }
        }
        for quote in &self.quotes {
            for kind in [EventKind::MouseOver, EventKind::MouseOut, EventKind::Click] {
                doc.remove_event_listener(*quote, kind, self.keys.quote);
            }
        }
        doc.clear_children(self.backref_container);
    }
}

fn anchor_refno(doc: &Document, anchor: NodeId) -> Option<u64> {
    doc.text_content(anchor)
        .trim()
        .trim_start_matches('>')
        .parse()
        .ok()
}

pub fn build_post_element(doc: &mut Document, post: &Post) -> NodeId {
    let element = doc.create_element("div");
    doc.add_class(element, "post");
    doc.set_attr(element, "id", format!("p{}", post.refno));
    doc.set_data(element, "date", post.date.to_string());

    let header = doc.create_element("div");
    doc.add_class(header, "header");
    doc.append_child(element, header);

    if let Some(subject) = &post.subject {
        let node = span(doc, "subject", subject);
        doc.append_child(header, node);
        let br = doc.create_element("br");
        doc.append_child(header, br);
    }

    let refno = doc.create_element("a");
    doc.add_class(refno, "refno");
    doc.set_attr(refno, "href", format!("#p{}", post.refno));
    doc.set_text(refno, &format!("#{}", post.refno));
    doc.append_child(header, refno);
    append_text(doc, header, " ");

    let name = name_element(doc, post.name.as_deref().unwrap_or_default());
    doc.append_child(header, name);
    append_text(doc, header, " ");

    if let Some(mod_code) = &post.mod_code {
        let node = span(doc, "modcode", mod_code);
        doc.append_child(header, node);
        append_text(doc, header, " ");
    }

    let date = span(doc, "date", &date_text(post.date));
    doc.append_child(header, date);
    append_text(doc, header, " ");

    let manage = doc.create_element("span");
    doc.add_class(manage, "manage");
    let checkbox = doc.create_element("input");
    doc.set_attr(checkbox, "type", "checkbox");
    doc.set_attr(checkbox, "name", "post_id");
    doc.set_attr(checkbox, "value", post.id.to_string());
    doc.append_child(manage, checkbox);

    for file in &post.files {
        let br = doc.create_element("br");
        doc.append_child(header, br);
        append_text(doc, header, "File: ");
        let link = doc.create_element("a");
        doc.set_attr(link, "href", file.location.clone());
        doc.set_text(link, &file.name);
        doc.append_child(header, link);
        append_text(
            doc,
            header,
            &format!(" ({}, {}x{})", file_size_text(file.size), file.width, file.height),
        );
    }
    doc.append_child(header, manage);

    if let Some(html) = &post.html {
        let text = doc.create_element("div");
        doc.add_class(text, "text");
        doc.add_class(text, "styled-text");
        doc.set_inner_html(text, html.clone());
        append_body(doc, text, html);
        doc.append_child(element, text);
    }

    for file in &post.files {
        let container = doc.create_element("div");
        doc.add_class(container, "file");
        let link = doc.create_element("a");
        doc.add_class(link, "file-link");
        doc.set_attr(link, "href", file.location.clone());
        doc.set_data(link, "filewidth", file.width.to_string());
        doc.set_data(link, "fileheight", file.height.to_string());
        doc.set_data(link, "filename", file.name.clone());
        doc.set_data(link, "filesize", file.size.to_string());
        let image = doc.create_element("img");
        doc.set_attr(image, "src", file.thumbnail_location.clone());
        doc.set_attr(image, "width", file.thumbnail_width.to_string());
        doc.set_attr(image, "height", file.thumbnail_height.to_string());
        doc.append_child(link, image);
        doc.append_child(container, link);
        doc.append_child(element, container);
    }

    element
}

pub fn append_body(doc: &mut Document, text: NodeId, html: &str) {
    for segment in markup::segments(html) {
        match segment {
            Segment::Text(content) => append_text(doc, text, &content),
            Segment::Quote { refno, text: label } => {
                let anchor = doc.create_element("a");
                doc.add_class(anchor, "rquote");
                doc.set_attr(anchor, "href", format!("#p{refno}"));
                doc.set_text(anchor, &label);
                doc.append_child(text, anchor);
            }
            Segment::LineBreak => {
                let br = doc.create_element("br");
                doc.append_child(text, br);
            }
        }
    }
}

fn append_text(doc: &mut Document, parent: NodeId, text: &str) {
    let node = doc.create_text(text);
    doc.append_child(parent, node);
}

fn span(doc: &mut Document, class: &str, text: &str) -> NodeId {
    let node = doc.create_element("span");
    doc.add_class(node, class);
    doc.set_text(node, text);
    node
}

/// `.name` span; everything from the first `!` on is the tripcode.
fn name_element(doc: &mut Document, name: &str) -> NodeId {
    let node = doc.create_element("span");
    doc.add_class(node, "name");
    match name.find('!') {
        Some(index) => {
            append_text(doc, node, &name[..index]);
            let trip = span(doc, "trip", &name[index..]);
            doc.append_child(node, trip);
        }
        None => append_text(doc, node, name),
    }
    node
}

pub fn file_size_text(bytes: u64) -> String {
    if bytes == 1 {
        return "1 Byte".to_string();
    }
    if bytes < 1000 {
        return format!("{bytes} Bytes");
    }
    let mut unit = 1000f64;
    for prefix in FILE_SIZE_PREFIXES {
        unit *= 1000.0;
        if (bytes as f64) < unit || prefix == "TB" {
            let value = (1000.0 * bytes as f64 / unit * 10.0).round() / 10.0;
            return format!("{} {}", value, prefix);
        }
    }
    format!("{bytes} Bytes")
}

pub fn date_text(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(date) => date.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RemotePost, RemoteThread};
    use crate::dom::{dispatch, Rect};

    #[derive(Default)]
    struct Recorder {
        refnos: RefCell<Vec<u64>>,
        images: RefCell<Vec<String>>,
    }

    impl ThreadViewCallback for Recorder {
        fn on_refno_clicked(&self, post: &Rc<Post>) -> bool {
            self.refnos.borrow_mut().push(post.refno);
            true
        }

        fn on_image_clicked(&self, _document: &SharedDocument, file: &PostFile, _container: NodeId) {
            self.images.borrow_mut().push(file.name.clone());
        }
    }

    fn record(id: u64, html: Option<&str>) -> RemotePost {
        RemotePost {
            id: Some(id),
            refno: Some(id),
            date: Some(0),
            html: html.map(str::to_string),
            ..RemotePost::default()
        }
    }

    fn setup() -> (SharedDocument, Rc<Thread>, Rc<ThreadView>, Rc<Recorder>) {
        let document = Document::new().shared();
        let container = {
            let mut doc = document.borrow_mut();
            let container = doc.create_element("div");
            doc.add_class(container, "posts");
            let body = doc.body();
            doc.append_child(body, container);
            doc.set_viewport_size(80, 20);
            container
        };
        let thread = Rc::new(Thread::new());
        let recorder = Rc::new(Recorder::default());
        let view = ThreadView::new(document.clone(), container, thread.clone(), recorder.clone());
        view.bind_views();
        (document, thread, view, recorder)
    }

    fn update(thread: &Thread, posts: Vec<RemotePost>) {
        thread.update(&RemoteThread {
            posts,
            ..RemoteThread::default()
        });
    }

    #[test]
    fn new_posts_are_appended_with_divider() {
        let (document, thread, view, _) = setup();
        update(&thread, vec![record(1, None)]);
        update(&thread, vec![record(2, Some(">>1"))]);

        let doc = document.borrow();
        let posts = doc.all_by_class(view.container(), "post");
        assert_eq!(posts.len(), 2);
        assert!(doc.has_class(posts[0], "divider"));
        assert!(!doc.has_class(posts[1], "divider"));
        assert_eq!(doc.first_child(view.container()), Some(view.hover_container()));
        assert_eq!(view.views().len(), 2);
    }

    #[test]
    fn backrefs_are_rebuilt_without_duplicate_listeners() {
        let (document, thread, view, _) = setup();
        update(&thread, vec![record(1, None), record(2, Some(">>1"))]);
        update(&thread, vec![record(3, Some(">>1"))]);

        let doc = document.borrow();
        let first = view.views()[0].clone();
        let backrefs = doc.all_by_tag_class(first.backref_container(), "a", "backref");
        assert_eq!(backrefs.len(), 2);
        assert_eq!(doc.text_content(backrefs[1]), ">>3");
        for anchor in backrefs {
            assert_eq!(doc.listener_count(anchor, EventKind::MouseOver), 1);
        }
        let refno = doc.first_by_tag_class(first.element(), "a", "refno").unwrap();
        assert_eq!(doc.listener_count(refno, EventKind::Click), 1);
    }

    #[test]
    fn hover_highlights_on_screen_post() {
        let (document, thread, view, _) = setup();
        update(&thread, vec![record(1, None), record(2, Some(">>1"))]);
        let target = view.views()[0].element();
        let quote = view.views()[1].quotes()[0];
        {
            let mut doc = document.borrow_mut();
            doc.set_scroll_height(40);
            doc.set_rect(target, Rect::new(0, 0, 80, 4));
            doc.set_rect(quote, Rect::new(6, 0, 3, 1));
        }

        dispatch(&document, Event::new(EventKind::MouseOver, quote));
        assert_eq!(view.highlighted(), Some(target));
        assert!(document.borrow().has_class(target, "highlight"));
        assert_eq!(view.hovering(), None);

        dispatch(&document, Event::new(EventKind::MouseOut, quote));
        assert_eq!(view.highlighted(), None);
        assert!(!document.borrow().has_class(target, "highlight"));
    }

    #[test]
    fn hover_floats_preview_for_off_screen_post() {
        let (document, thread, view, _) = setup();
        update(&thread, vec![record(1, None), record(2, Some(">>1"))]);
        let target = view.views()[0].element();
        let quote = view.views()[1].quotes()[0];
        {
            let mut doc = document.borrow_mut();
            doc.set_scroll_height(100);
            doc.set_rect(target, Rect::new(0, 0, 80, 4));
            doc.set_rect(quote, Rect::new(50, 4, 3, 1));
            doc.scroll_to(45);
        }

        dispatch(&document, Event::new(EventKind::MouseOver, quote));
        let preview = view.hovering().expect("preview shown");
        {
            let doc = document.borrow();
            assert!(doc.has_class(preview, "post-hover"));
            assert_eq!(doc.parent(preview), Some(view.hover_container()));
            assert_eq!(doc.data(preview, "anchor-col"), Some("9"));
        }
        assert_eq!(view.highlighted(), None);
        assert_eq!(thread.find_by_refno(1).unwrap().views(), vec![target]);

        let backref = {
            let doc = document.borrow();
            doc.first_by_tag_class(view.views()[0].backref_container(), "a", "backref")
                .unwrap()
        };
        dispatch(&document, Event::new(EventKind::MouseOver, backref));
        {
            let doc = document.borrow();
            let shown = doc.children(view.hover_container());
            assert_eq!(shown.len(), 1);
            assert_eq!(doc.element_id(shown[0]), Some("p2"));
        }

        dispatch(&document, Event::new(EventKind::MouseOut, backref));
        assert_eq!(view.hovering(), None);
        assert_eq!(view.highlighted(), None);
    }

    #[test]
    fn repeated_hover_reuses_preview_nodes() {
        let (document, thread, view, _) = setup();
        update(&thread, vec![record(1, None), record(2, Some(">>1"))]);
        let quote = view.views()[1].quotes()[0];

        dispatch(&document, Event::new(EventKind::MouseOver, quote));
        dispatch(&document, Event::new(EventKind::MouseOut, quote));
        let settled = document.borrow().arena_len();
        let live = document.borrow().live_count();

        for _ in 0..1000 {
            dispatch(&document, Event::new(EventKind::MouseOver, quote));
            assert!(view.hovering().is_some());
            dispatch(&document, Event::new(EventKind::MouseOut, quote));
        }
        let doc = document.borrow();
        assert_eq!(doc.arena_len(), settled);
        assert_eq!(doc.live_count(), live);
        assert!(doc.children(view.hover_container()).is_empty());
    }

    #[test]
    fn quote_click_scrolls_target_into_view() {
        let (document, thread, view, _) = setup();
        update(&thread, vec![record(1, None), record(2, Some(">>1"))]);
        let target = view.views()[0].element();
        let quote = view.views()[1].quotes()[0];
        {
            let mut doc = document.borrow_mut();
            doc.set_scroll_height(100);
            doc.set_rect(target, Rect::new(12, 0, 80, 4));
            doc.scroll_to(60);
        }
        dispatch(&document, Event::new(EventKind::Click, quote));
        assert_eq!(document.borrow().viewport().scroll_top, 12);
    }

    #[test]
    fn refno_and_image_clicks_reach_callback() {
        let (document, thread, view, recorder) = setup();
        let mut with_file = record(1, None);
        with_file.files = Some(vec![crate::api::RemoteFile {
            name: "cat.png".into(),
            width: 800,
            height: 600,
            ..Default::default()
        }]);
        update(&thread, vec![with_file]);

        let element = view.views()[0].element();
        let (refno, image) = {
            let doc = document.borrow();
            (
                doc.first_by_tag_class(element, "a", "refno").unwrap(),
                doc.first_by_tag(element, "img").unwrap(),
            )
        };
        dispatch(&document, Event::new(EventKind::Click, refno));
        let mut shifted = Event::new(EventKind::Click, image);
        shifted.shift = true;
        dispatch(&document, shifted);
        dispatch(&document, Event::new(EventKind::Click, image));

        assert_eq!(*recorder.refnos.borrow(), vec![1]);
        assert_eq!(*recorder.images.borrow(), vec!["cat.png".to_string()]);
    }

    #[test]
    fn rendered_post_round_trips_through_bootstrap() {
        let mut doc = Document::new();
        let container = doc.create_element("div");
        let mut post = Post::new(7, 3, 1_700_000_000_000).with_html(r##"<a href="#p1">&gt;&gt;1</a> yes"##);
        post.name = Some("anon!trip".into());
        post.subject = Some("hello".into());
        post.files.push(PostFile {
            location: "/f.png".into(),
            name: "f.png".into(),
            size: 2048,
            width: 10,
            height: 20,
            ..PostFile::default()
        });
        let element = build_post_element(&mut doc, &post);
        doc.append_child(container, element);

        let thread = Thread::new();
        thread.load_from_post_elements(&doc, container);
        let loaded = thread.post(0).unwrap();
        assert_eq!(loaded.id, 7);
        assert_eq!(loaded.refno, 3);
        assert_eq!(loaded.date, 1_700_000_000_000);
        assert_eq!(loaded.name.as_deref(), Some("anon!trip"));
        assert_eq!(loaded.subject.as_deref(), Some("hello"));
        assert_eq!(loaded.references(), &[1]);
        assert_eq!(loaded.files, post.files);
        let trip = doc.first_by_class(element, "trip").unwrap();
        assert_eq!(doc.text_content(trip), "!trip");
    }

    #[test]
    fn unbind_releases_registrations() {
        let (_document, thread, view, _) = setup();
        update(&thread, vec![record(1, None)]);
        let post = thread.find_by_refno(1).unwrap();
        assert_eq!(post.views().len(), 1);
        view.unbind();
        assert!(post.views().is_empty());
        update(&thread, vec![record(2, None)]);
        assert!(view.views().is_empty());
    }

    #[test]
    fn file_sizes_and_dates() {
        assert_eq!(file_size_text(1), "1 Byte");
        assert_eq!(file_size_text(999), "999 Bytes");
        assert_eq!(file_size_text(2000), "2 kB");
        assert_eq!(file_size_text(34_567), "34.6 kB");
        assert_eq!(file_size_text(1_500_000), "1.5 MB");
        assert_eq!(date_text(0), "1970-01-01 00:00:00");
        assert_eq!(date_text(1_700_000_000_000), "2023-11-14 22:13:20");
    }
}
