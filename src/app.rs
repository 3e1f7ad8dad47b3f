use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{self, BackgroundFetcher, Fetcher, RemoteThread, ThreadSource};
use crate::config::{self, Config};
use crate::context::{AppContext, DraftComposer};
use crate::dom::{Document, NodeId};
use crate::logging::{self, LogTarget};
use crate::markup;
use crate::thread::{Post, Thread, ThreadMeta};
use crate::ui;
use crate::view::{build_post_element, date_text, ThreadView};
use crate::watcher::{SharedWatcher, SystemClock, Watcher, WatcherSettings};

const ONCE_WRAP_WIDTH: usize = 76;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub board: String,
    pub thread_refno: u64,
    pub config_file: Option<PathBuf>,
    pub once: bool,
    pub log_stderr: bool,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("app: load config")?;
    logging::init(&cfg.log, &LogTarget::resolve(&cfg.log, options.log_stderr || options.once))
        .context("app: init logging")?;

    let client: Arc<dyn ThreadSource> = Arc::new(client_for(&cfg).context("app: build api client")?);
    let remote = client
        .fetch_thread(&options.board, options.thread_refno)
        .with_context(|| format!("app: fetch thread /{}/{}", options.board, options.thread_refno))?;

    if options.once {
        let thread = Thread::new();
        thread.update(&remote);
        print!("{}", format_thread(&thread));
        return Ok(());
    }

    tracing::info!(board = %options.board, refno = options.thread_refno, "opening thread");
    let page = Page::bootstrap(
        &options.board,
        options.thread_refno,
        &remote,
        Box::new(BackgroundFetcher::new(client)),
        cfg.watcher.settings(),
    );
    let mut model = ui::Model::new(page);
    model.run()
}

fn client_for(cfg: &Config) -> Result<api::Client> {
    api::Client::new(api::ClientConfig {
        base_url: cfg.server.base_url.clone(),
        user_agent: cfg.server.user_agent.clone(),
        timeout: Some(cfg.server.request_timeout),
        http_client: None,
    })
}

/// The thread page: document, model, binder and, for open threads, the
/// watcher.
pub struct Page {
    pub context: AppContext,
    pub thread_view: Rc<ThreadView>,
    pub watcher: Option<SharedWatcher>,
    pub draft: Rc<DraftComposer>,
    pub container: NodeId,
    pub status: NodeId,
    pub update_link: NodeId,
}

impl Page {
    /// Renders the first payload the way the server would, reads it back
    /// into the model and binds views over it.
    pub fn bootstrap(
        board: &str,
        thread_refno: u64,
        remote: &RemoteThread,
        fetcher: Box<dyn Fetcher>,
        settings: WatcherSettings,
    ) -> Page {
        let document = Document::new().shared();
        let (container, status, update_link) = {
            let mut doc = document.borrow_mut();
            render_server_page(&mut doc, board, thread_refno, remote)
        };

        let mut context = AppContext::new(board, thread_refno, document.clone());
        let draft = Rc::new(DraftComposer::new());
        context.composer = Some(draft.clone());
        context.locked = remote.locked;

        let loaded = context
            .thread
            .load_from_post_elements(&document.borrow(), container);
        context
            .thread
            .set_meta(ThreadMeta::from_remote(remote, Some(thread_refno)));
        tracing::info!(loaded, locked = remote.locked, "thread page loaded");

        let thread_view = ThreadView::new(
            document.clone(),
            container,
            context.thread.clone(),
            context.callback(),
        );
        thread_view.bind_views();

        let watcher = if context.should_watch() {
            let watcher = Watcher::start(
                &context,
                fetcher,
                settings,
                vec![status],
                Rc::new(SystemClock),
            );
            Watcher::add_update_listener(&watcher, update_link);
            Some(watcher)
        } else {
            document.borrow_mut().set_text(status, "Locked");
            None
        };

        Page {
            context,
            thread_view,
            watcher,
            draft,
            container,
            status,
            update_link,
        }
    }

    pub fn document(&self) -> &crate::dom::SharedDocument {
        &self.context.document
    }

    pub fn meta(&self) -> ThreadMeta {
        self.context.thread.meta()
    }
}

/// Builds the page shell and one server-shaped node tree per post. Returns
/// the posts container, the status element and the update link.
fn render_server_page(
    doc: &mut Document,
    board: &str,
    thread_refno: u64,
    remote: &RemoteThread,
) -> (NodeId, NodeId, NodeId) {
    let subject = remote
        .posts
        .first()
        .and_then(|post| post.subject.clone())
        .filter(|subject| !subject.is_empty())
        .unwrap_or_else(|| thread_refno.to_string());
    doc.set_title(format!("/{board}/ - {subject}"));

    let body = doc.body();
    let container = doc.create_element("div");
    doc.add_class(container, "posts");
    doc.append_child(body, container);

    let mut previous: Option<NodeId> = None;
    let mut rendered = HashSet::new();
    for record in &remote.posts {
        let Some(post) = Post::from_remote(record) else {
            continue;
        };
        if !rendered.insert(post.id) {
            continue;
        }
        let element = build_post_element(doc, &post);
        if let Some(previous) = previous {
            doc.add_class(previous, "divider");
        }
        doc.append_child(container, element);
        previous = Some(element);
    }

    let controls = doc.create_element("div");
    doc.add_class(controls, "thread-controls");
    let open = doc.create_text("[");
    doc.append_child(controls, open);
    let update_link = doc.create_element("a");
    doc.add_class(update_link, "watch-update");
    doc.set_text(update_link, "Update");
    doc.append_child(controls, update_link);
    let close = doc.create_text("] ");
    doc.append_child(controls, close);
    let status = doc.create_element("span");
    doc.add_class(status, "watch-status");
    doc.append_child(controls, status);
    doc.append_child(body, controls);

    (container, status, update_link)
}

/// Plain-text dump used by `--once`.
pub fn format_thread(thread: &Thread) -> String {
    let mut out = String::new();
    let meta = thread.meta();
    if meta.locked || meta.sticky {
        let flags: Vec<&str> = [(meta.locked, "locked"), (meta.sticky, "sticky")]
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, label)| *label)
            .collect();
        let _ = writeln!(out, "[{}]", flags.join(", "));
    }
    for post in thread.posts() {
        let _ = write!(out, "#{}", post.refno);
        if let Some(subject) = &post.subject {
            let _ = write!(out, " {subject}");
        }
        let _ = write!(out, " {}", post.name.as_deref().unwrap_or("Anonymous"));
        if let Some(mod_code) = &post.mod_code {
            let _ = write!(out, " {mod_code}");
        }
        let _ = writeln!(out, " {}", date_text(post.date));

        for file in &post.files {
            let _ = writeln!(
                out,
                "  File: {} ({}, {}x{})",
                file.name,
                crate::view::file_size_text(file.size),
                file.width,
                file.height
            );
        }
        if let Some(html) = &post.html {
            for line in markup::plain_text(html).lines() {
                for piece in textwrap::wrap(line, ONCE_WRAP_WIDTH) {
                    let _ = writeln!(out, "  {piece}");
                }
            }
        }
        if !post.references().is_empty() {
            let _ = writeln!(out, "  quotes: {}", refnos(post.references()));
        }
        let backrefs = post.referenced_by();
        if !backrefs.is_empty() {
            let _ = writeln!(out, "  replies: {}", refnos(&backrefs));
        }
        out.push('\n');
    }
    out
}

fn refnos(values: &[u64]) -> String {
    values
        .iter()
        .map(|refno| format!(">>{refno}"))
        .collect::<Vec<_>>()
        .join(" ")
}
