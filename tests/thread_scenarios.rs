use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use proptest::prelude::*;
use thread_watch::api::{FetchError, FetchResult, Fetcher, RemotePost, RemoteThread};
use thread_watch::context::AppContext;
use thread_watch::dom::Document;
use thread_watch::thread::Thread;
use thread_watch::watcher::{Clock, SharedWatcher, Watcher, WatcherSettings};

fn record(id: u64, html: &str) -> RemotePost {
    RemotePost {
        id: Some(id),
        refno: Some(id),
        date: Some(0),
        html: Some(html.to_string()),
        ..RemotePost::default()
    }
}

fn payload(posts: Vec<RemotePost>) -> RemoteThread {
    RemoteThread {
        refno: Some(1),
        posts,
        ..RemoteThread::default()
    }
}

struct TestClock(Cell<Instant>);

impl TestClock {
    fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.0.get()
    }
}

struct Script(RefCell<VecDeque<FetchResult>>);

impl Fetcher for Script {
    fn start(&self, _board: &str, _thread_refno: u64) -> Receiver<FetchResult> {
        let (tx, rx) = bounded(1);
        let next = self
            .0
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(payload(Vec::new())));
        let _ = tx.send(next);
        rx
    }
}

fn watch(responses: Vec<FetchResult>) -> (AppContext, Rc<TestClock>, SharedWatcher) {
    let document = Document::new().shared();
    document.borrow_mut().set_title("/g/ - cats");
    let context = AppContext::new("g", 1, document);
    let clock = Rc::new(TestClock(Cell::new(Instant::now())));
    let watcher = Watcher::start(
        &context,
        Box::new(Script(RefCell::new(responses.into()))),
        WatcherSettings::default(),
        Vec::new(),
        clock.clone(),
    );
    (context, clock, watcher)
}

/// Lets the armed poll fire and returns the delay chosen afterwards.
fn fire(clock: &TestClock, watcher: &SharedWatcher) -> Duration {
    let deadline = watcher.borrow().poll_deadline().expect("poll armed");
    let now = clock.now();
    if deadline > now {
        clock.advance(deadline - now);
    }
    let mut watcher = watcher.borrow_mut();
    watcher.tick();
    watcher.poll_responses();
    watcher.last_delay().expect("delay chosen")
}

#[test]
fn poll_merges_new_reply_and_links_it() {
    let thread = Thread::new();
    thread.update(&payload(vec![record(1, "op"), record(2, "&gt;&gt;1 hi")]));

    let post1 = thread.find_by_refno(1).unwrap();
    let post2 = thread.find_by_refno(2).unwrap();
    assert_eq!(post2.references(), &[1]);
    assert_eq!(post1.referenced_by(), vec![2]);

    let notified = Rc::new(Cell::new(0));
    let seen = notified.clone();
    thread.observe(move |_| seen.set(seen.get() + 1));

    thread.update(&payload(vec![
        record(1, "op"),
        record(2, "&gt;&gt;1 hi"),
        record(3, ">>2 thanks"),
    ]));

    assert_eq!(thread.len(), 3);
    assert_eq!(post2.referenced_by(), vec![3]);
    assert_eq!(post1.referenced_by(), vec![2]);
    assert_eq!(notified.get(), 1);
}

#[test]
fn merging_the_same_payload_twice_adds_nothing() {
    let thread = Thread::new();
    let body = payload(vec![record(1, "op"), record(2, "&gt;&gt;1")]);
    assert_eq!(thread.update(&body), 2);
    assert_eq!(thread.update(&body), 0);
    assert_eq!(thread.len(), 2);
    let refnos: Vec<u64> = thread.posts().iter().map(|post| post.refno).collect();
    assert_eq!(refnos, vec![1, 2]);
}

#[test]
fn post_observers_fire_only_when_backrefs_change() {
    let thread = Thread::new();
    thread.update(&payload(vec![record(1, "op"), record(2, "reply")]));
    let post1 = thread.find_by_refno(1).unwrap();
    let post2 = thread.find_by_refno(2).unwrap();

    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));
    let (a, b) = (first.clone(), second.clone());
    post1.observe(move |_| a.set(a.get() + 1));
    post2.observe(move |_| b.set(b.get() + 1));

    thread.update(&payload(vec![record(3, "&gt;&gt;1")]));
    assert_eq!(first.get(), 1);
    assert_eq!(second.get(), 0);

    thread.update(&payload(vec![record(4, "nothing quoted")]));
    assert_eq!(first.get(), 1);
    assert_eq!(second.get(), 0);
}

#[test]
fn quiet_thread_walks_the_delay_ladder() {
    let (_context, clock, watcher) = watch(Vec::new());
    assert_eq!(watcher.borrow().poll_deadline(), Some(clock.now() + Duration::from_secs(10)));

    let delays: Vec<u64> = (0..12).map(|_| fire(&clock, &watcher).as_secs()).collect();
    assert_eq!(delays, vec![10, 15, 20, 30, 60, 90, 120, 180, 240, 300, 600, 600]);
}

#[test]
fn new_posts_reset_the_ladder_and_count_up() {
    let (context, clock, watcher) = watch(vec![
        Ok(payload(Vec::new())),
        Ok(payload(Vec::new())),
        Ok(payload(vec![record(1, "op"), record(2, "hi")])),
    ]);
    fire(&clock, &watcher);
    fire(&clock, &watcher);
    assert_eq!(fire(&clock, &watcher), Duration::from_secs(10));
    assert_eq!(watcher.borrow().current_delay_index(), 0);
    assert_eq!(watcher.borrow().total_new_posts(), 2);
    assert_eq!(watcher.borrow().status_text().0, "2 new posts");
    assert_eq!(context.document.borrow().title(), "(2) /g/ - cats");
}

#[test]
fn reply_sent_forces_poll_from_the_top_of_the_ladder() {
    let (_context, clock, watcher) = watch(Vec::new());
    for _ in 0..4 {
        fire(&clock, &watcher);
    }
    assert_eq!(watcher.borrow().current_delay_index(), 4);

    let mut watcher = watcher.borrow_mut();
    watcher.after_post();
    assert!(watcher.is_requesting());
    watcher.poll_responses();
    assert_eq!(watcher.last_delay(), Some(Duration::from_secs(10)));
    assert_eq!(watcher.current_delay_index(), 1);
}

#[test]
fn hidden_page_polls_no_faster_than_the_floor() {
    let (context, clock, watcher) = watch(vec![Ok(payload(vec![record(1, "op")]))]);
    context.visibility.set_visible(false);
    assert_eq!(fire(&clock, &watcher), Duration::from_secs(60));

    context.visibility.set_visible(true);
    assert_eq!(fire(&clock, &watcher), Duration::from_secs(10));
}

#[test]
fn failed_poll_shows_error_and_rearms() {
    let (_context, clock, watcher) = watch(vec![Err(FetchError::Disconnected)]);
    fire(&clock, &watcher);
    let watcher = watcher.borrow();
    assert!(watcher.has_error());
    assert_eq!(watcher.status_text(), ("Error".to_string(), false));
    assert!(watcher.poll_deadline().is_some());
}

proptest! {
    #[test]
    fn backrefs_mirror_references(quotes in prop::collection::vec(prop::collection::vec(1u64..12, 0..4), 1..12)) {
        let posts: Vec<RemotePost> = quotes
            .iter()
            .enumerate()
            .map(|(index, targets)| {
                let body: Vec<String> = targets.iter().map(|t| format!("&gt;&gt;{t}")).collect();
                record(index as u64 + 1, &body.join(" "))
            })
            .collect();
        let thread = Thread::new();
        thread.update(&payload(posts));

        for post in thread.posts() {
            for other in thread.posts() {
                let quoted = other.references().contains(&post.refno);
                prop_assert_eq!(post.referenced_by().contains(&other.refno), quoted);
            }
        }
    }
}
