use std::cell::Cell;

use crate::observer::{Observers, Subscription};

/// Whether the page is currently shown to the user.
///
/// The terminal front end flips this on focus gained/lost events. Listeners
/// are only told about actual changes.
#[derive(Debug)]
pub struct Visibility {
    visible: Cell<bool>,
    listeners: Observers<bool>,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Visibility {
    pub fn new(visible: bool) -> Self {
        Self {
            visible: Cell::new(visible),
            listeners: Observers::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn set_visible(&self, visible: bool) {
        if self.visible.replace(visible) != visible {
            tracing::debug!(visible, "page visibility changed");
            self.listeners.notify(&visible);
        }
    }

    pub fn add_listener(&self, listener: impl Fn(&bool) + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    pub fn remove_listener(&self, handle: Subscription) -> bool {
        self.listeners.unsubscribe(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn broadcasts_only_on_change() {
        let visibility = Visibility::new(true);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        visibility.add_listener(move |visible| sink.borrow_mut().push(*visible));

        visibility.set_visible(true);
        visibility.set_visible(false);
        visibility.set_visible(false);
        visibility.set_visible(true);

        assert_eq!(*seen.borrow(), vec![false, true]);
        assert!(visibility.is_visible());
    }

    #[test]
    fn removed_listener_is_silent() {
        let visibility = Visibility::default();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let handle = visibility.add_listener(move |_| counter.set(counter.get() + 1));
        assert!(visibility.remove_listener(handle));
        visibility.set_visible(false);
        assert_eq!(hits.get(), 0);
    }
}
