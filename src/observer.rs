use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Callback<T> = Rc<dyn Fn(&T)>;

pub struct Observers<T: ?Sized> {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(Subscription, Callback<T>)>>,
}

impl<T: ?Sized> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: Cell::new(1),
            entries: RefCell::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Observers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let handle = Subscription(id);
        self.entries.borrow_mut().push((handle, Rc::new(callback)));
        handle
    }

    /// Returns `false` when the handle was not (or no longer) registered.
    pub fn unsubscribe(&self, handle: Subscription) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|(id, _)| *id == handle) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, handle: Subscription) -> bool {
        self.entries.borrow().iter().any(|(id, _)| *id == handle)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn notify(&self, value: &T) {
        // Callbacks may subscribe or unsubscribe while the round runs.
        let snapshot: Vec<Callback<T>> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_in_registration_order() {
        let observers: Observers<u32> = Observers::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            observers.subscribe(move |value: &u32| seen.borrow_mut().push(format!("{tag}{value}")));
        }
        observers.notify(&7);
        assert_eq!(*seen.borrow(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handle() {
        let observers: Observers<u32> = Observers::new();
        let count = Rc::new(Cell::new(0));
        let first = {
            let count = count.clone();
            observers.subscribe(move |_| count.set(count.get() + 1))
        };
        let _second = {
            let count = count.clone();
            observers.subscribe(move |_| count.set(count.get() + 10))
        };
        assert!(observers.unsubscribe(first));
        assert!(!observers.unsubscribe(first));
        observers.notify(&0);
        assert_eq!(count.get(), 10);
    }

    #[test]
    fn callback_may_unsubscribe_during_notify() {
        let observers: Rc<Observers<u32>> = Rc::new(Observers::new());
        let handle = Rc::new(Cell::new(None));
        let calls = Rc::new(Cell::new(0));
        let sub = {
            let inner = observers.clone();
            let handle = handle.clone();
            let calls = calls.clone();
            observers.subscribe(move |_| {
                calls.set(calls.get() + 1);
                if let Some(own) = handle.get() {
                    inner.unsubscribe(own);
                }
            })
        };
        handle.set(Some(sub));
        observers.notify(&1);
        observers.notify(&2);
        assert_eq!(calls.get(), 1);
        assert!(observers.is_empty());
    }
}
