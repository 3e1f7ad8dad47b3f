use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};

use crate::api::{FetchError, FetchResult, Fetcher};
use crate::context::AppContext;
use crate::dom::{EventKind, NodeId, SharedDocument};
use crate::observer::Subscription;
use crate::thread::Thread;
use crate::visibility::Visibility;

pub const DEFAULT_DELAYS: [u64; 11] = [10, 15, 20, 30, 60, 90, 120, 180, 240, 300, 600];

pub type SharedWatcher = Rc<RefCell<Watcher>>;

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSettings {
    pub delays: Vec<u64>,
    pub hidden_floor: Duration,
    pub status_tick: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            delays: DEFAULT_DELAYS.to_vec(),
            hidden_floor: Duration::from_secs(60),
            status_tick: Duration::from_secs(1),
        }
    }
}

pub struct Watcher {
    board: String,
    thread_refno: u64,
    thread: Rc<Thread>,
    document: SharedDocument,
    visibility: Rc<Visibility>,
    fetcher: Box<dyn Fetcher>,
    clock: Rc<dyn Clock>,
    settings: WatcherSettings,
    status_elements: Vec<NodeId>,

    pending: Option<Receiver<FetchResult>>,
    error: bool,
    current_delay: usize,
    poll_deadline: Option<Instant>,
    status_deadline: Option<Instant>,
    target_time: Instant,
    last_delay: Option<Duration>,

    document_title: String,
    total_new_posts: usize,
    visibility_subscription: Option<Subscription>,
}

impl Watcher {
    pub fn start(
        context: &AppContext,
        fetcher: Box<dyn Fetcher>,
        settings: WatcherSettings,
        status_elements: Vec<NodeId>,
        clock: Rc<dyn Clock>,
    ) -> SharedWatcher {
        let now = clock.now();
        let document_title = context.document.borrow().title().to_string();
        let watcher = Rc::new(RefCell::new(Watcher {
            board: context.board_name.clone(),
            thread_refno: context.thread_refno,
            thread: context.thread.clone(),
            document: context.document.clone(),
            visibility: context.visibility.clone(),
            fetcher,
            clock,
            settings,
            status_elements,
            pending: None,
            error: false,
            current_delay: 0,
            poll_deadline: None,
            status_deadline: None,
            target_time: now,
            last_delay: None,
            document_title,
            total_new_posts: 0,
            visibility_subscription: None,
        }));

        let weak = Rc::downgrade(&watcher);
        let handle = context.visibility.add_listener(move |visible| {
            if let Some(watcher) = weak.upgrade() {
                if let Ok(mut watcher) = watcher.try_borrow_mut() {
                    watcher.page_visibility_changed(*visible);
                }
            }
        });

        {
            let mut inner = watcher.borrow_mut();
            inner.visibility_subscription = Some(handle);
            let first = inner.ladder_entry(0);
            inner.update_timer_state(first);
            inner.update_status();
        }
        watcher
    }

    /// Makes clicks on `element` force an immediate update.
    pub fn add_update_listener(watcher: &SharedWatcher, element: NodeId) {
        let weak: Weak<RefCell<Watcher>> = Rc::downgrade(watcher);
        let document = watcher.borrow().document.clone();
        let mut doc = document.borrow_mut();
        let key = doc.new_listener_key();
        doc.add_event_listener(
            element,
            EventKind::Click,
            key,
            Rc::new(move |_| {
                if let Some(watcher) = weak.upgrade() {
                    if let Ok(mut watcher) = watcher.try_borrow_mut() {
                        watcher.force_update();
                    }
                }
            }),
        );
    }

    pub fn is_requesting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn total_new_posts(&self) -> usize {
        self.total_new_posts
    }

    pub fn current_delay_index(&self) -> usize {
        self.current_delay
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    pub fn poll_deadline(&self) -> Option<Instant> {
        self.poll_deadline
    }

    pub fn status_deadline(&self) -> Option<Instant> {
        self.status_deadline
    }

    /// Earliest pending deadline, for the front end's event wait.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.poll_deadline, self.status_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn ladder_entry(&self, index: usize) -> Duration {
        let seconds = self
            .settings
            .delays
            .get(index)
            .or(self.settings.delays.last())
            .copied()
            .unwrap_or(DEFAULT_DELAYS[0]);
        Duration::from_secs(seconds)
    }

    pub fn tick(&mut self) {
        self.poll_responses();

        let now = self.clock.now();
        if self.poll_deadline.is_some_and(|deadline| now >= deadline) {
            self.poll_deadline = None;
            self.timer_fired();
        }
        if self.status_deadline.is_some_and(|deadline| now >= deadline) {
            self.status_deadline = None;
            self.update_status();
        }
    }

    pub fn poll_responses(&mut self) {
        let Some(receiver) = &self.pending else {
            return;
        };
        let result = match receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err(FetchError::Disconnected),
        };
        self.pending = None;
        self.on_response(result);
    }

    fn timer_fired(&mut self) {
        self.update();
        self.update_status();
    }

    pub fn update(&mut self) {
        if self.pending.is_some() {
            tracing::debug!("watcher: request already in flight");
            return;
        }
        tracing::debug!(board = %self.board, refno = self.thread_refno, "watcher: requesting thread");
        self.pending = Some(self.fetcher.start(&self.board, self.thread_refno));
        self.update_status();
    }

    pub fn force_update(&mut self) {
        self.current_delay = 0;
        self.update();
    }

    /// Called by the composer once a reply went through.
    pub fn after_post(&mut self) {
        self.force_update();
    }

    fn on_response(&mut self, result: FetchResult) {
        match result {
            Ok(remote) => {
                self.error = false;
                let before = self.thread.len();
                self.thread.update(&remote);
                let delta = self.thread.len().saturating_sub(before);
                tracing::info!(delta, total = self.thread.len(), "watcher: thread updated");
                self.reset_timer(delta);
            }
            Err(err) => {
                tracing::warn!(error = %err, "watcher: update failed");
                self.error = true;
                self.reset_timer(0);
            }
        }
        self.update_status();
    }

    pub fn reset_timer(&mut self, new_posts: usize) {
        self.total_new_posts += new_posts;

        let mut delay = if new_posts == 0 {
            let delay = self.ladder_entry(self.current_delay);
            if self.current_delay + 1 < self.settings.delays.len() {
                self.current_delay += 1;
            }
            delay
        } else {
            self.current_delay = 0;
            self.ladder_entry(0)
        };

        if !self.visibility.is_visible() {
            delay = delay.max(self.settings.hidden_floor);
        }
        tracing::debug!(delay = ?delay, index = self.current_delay, "watcher: next poll scheduled");
        self.last_delay = Some(delay);
        self.update_timer_state(delay);
    }

    fn update_timer_state(&mut self, delay: Duration) {
        let now = self.clock.now();
        self.poll_deadline = Some(now + delay);
        self.target_time = now + delay;
    }

    pub fn page_visibility_changed(&mut self, visible: bool) {
        if visible {
            self.update_status();
        }
    }

    pub fn on_scroll(&mut self) {
        if self.document.borrow().is_scrolled_to_bottom() {
            self.total_new_posts = 0;
            self.update_status();
        }
    }

    /// Status line text and whether it is the live countdown.
    pub fn status_text(&self) -> (String, bool) {
        if self.error {
            return ("Error".to_string(), false);
        }
        if self.pending.is_some() {
            return ("Updating...".to_string(), false);
        }
        if self.total_new_posts > 0 {
            let plural = if self.total_new_posts == 1 { "" } else { "s" };
            return (format!("{} new post{}", self.total_new_posts, plural), false);
        }
        let remaining = self.target_time.saturating_duration_since(self.clock.now());
        let seconds = remaining.as_millis().div_ceil(1000);
        (seconds.to_string(), true)
    }

    pub fn title(&self) -> String {
        if self.total_new_posts > 0 {
            format!("({}) {}", self.total_new_posts, self.document_title)
        } else {
            self.document_title.clone()
        }
    }

    pub fn update_status(&mut self) {
        let (status, countdown) = self.status_text();
        let title = self.title();
        {
            let mut doc = self.document.borrow_mut();
            for element in &self.status_elements {
                doc.set_text(*element, &status);
            }
            if doc.title() != title {
                doc.set_title(title);
            }
        }

        if countdown && self.visibility.is_visible() {
            self.status_deadline = Some(self.clock.now() + self.settings.status_tick);
        }
    }

    /// A response still in flight is dropped with its channel.
    pub fn stop(&mut self) {
        if let Some(handle) = self.visibility_subscription.take() {
            self.visibility.remove_listener(handle);
        }
        self.pending = None;
        self.poll_deadline = None;
        self.status_deadline = None;
    }
}
