use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::dom::{NodeId, SharedDocument};
use crate::expansion::ImageExpansion;
use crate::thread::{Post, PostFile, Thread};
use crate::view::ThreadViewCallback;
use crate::visibility::Visibility;

/// The reply form, owned outside this crate's concerns. Only the two hooks
/// the thread page needs are modelled.
pub trait Composer {
    fn show(&self);
    fn add_refno(&self, refno: u64);
}

/// Page-level state built once at startup and handed to the components
/// that need it.
pub struct AppContext {
    pub board_name: String,
    pub thread_refno: u64,
    pub locked: bool,
    pub thread: Rc<Thread>,
    pub document: SharedDocument,
    pub visibility: Rc<Visibility>,
    pub composer: Option<Rc<dyn Composer>>,
}

impl AppContext {
    pub fn new(board_name: impl Into<String>, thread_refno: u64, document: SharedDocument) -> Self {
        Self {
            board_name: board_name.into(),
            thread_refno,
            locked: false,
            thread: Rc::new(Thread::new()),
            document,
            visibility: Rc::new(Visibility::default()),
            composer: None,
        }
    }

    /// Locked threads take no new posts, so they are not polled.
    pub fn should_watch(&self) -> bool {
        !self.locked
    }

    pub fn callback(&self) -> Rc<PageCallback> {
        Rc::new(PageCallback {
            composer: self.composer.clone(),
            expansion: ImageExpansion::new(),
        })
    }
}

/// Thread page reactions: refno clicks feed the composer, thumbnail clicks
/// toggle expansion.
pub struct PageCallback {
    composer: Option<Rc<dyn Composer>>,
    expansion: ImageExpansion,
}

impl ThreadViewCallback for PageCallback {
    fn on_refno_clicked(&self, post: &Rc<Post>) -> bool {
        match &self.composer {
            Some(composer) => {
                composer.show();
                composer.add_refno(post.refno);
                true
            }
            None => false,
        }
    }

    fn on_image_clicked(&self, document: &SharedDocument, _file: &PostFile, file_container: NodeId) {
        let expanded = self
            .expansion
            .toggle(&mut document.borrow_mut(), file_container);
        tracing::debug!(expanded, "image toggled");
    }
}

/// Reply text collected in the terminal front end.
#[derive(Debug, Default)]
pub struct DraftComposer {
    visible: Cell<bool>,
    text: RefCell<String>,
}

impl DraftComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn hide(&self) {
        self.visible.set(false);
    }

    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    pub fn clear(&self) {
        self.text.borrow_mut().clear();
    }
}

impl Composer for DraftComposer {
    fn show(&self) {
        self.visible.set(true);
    }

    fn add_refno(&self, refno: u64) {
        self.text.borrow_mut().push_str(&format!(">>{refno}\n"));
    }
}
