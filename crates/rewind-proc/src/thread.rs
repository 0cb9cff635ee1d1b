use indexmap::IndexMap;

/// Trait providing functions for working with threads of a target.
///
/// The core only needs to identify threads. Backends are free to carry more
/// state (e.g., the instruction address of a stopped thread).
pub trait Thread {
    /// Returns the thread's ID.
    fn id(&self) -> u64;
}

/// Threads of a target, indexed by their ID.
///
/// Threads are listed in the order they were registered, so iterating over
/// the registry is deterministic.
#[derive(Debug)]
pub struct ThreadRegistry<T> {
    threads: IndexMap<u64, T>,

    /// ID of the thread operations like single-stepping apply to.
    current: Option<u64>,
}

impl<T> Default for ThreadRegistry<T> {
    fn default() -> Self {
        Self {
            threads: IndexMap::new(),
            current: None,
        }
    }
}

impl<T: Thread> ThreadRegistry<T> {
    /// Creates an empty thread registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a thread, replacing any previous thread with the same ID.
    ///
    /// The first registered thread becomes the current thread.
    pub fn insert(&mut self, thread: T) {
        let id = thread.id();

        self.threads.insert(id, thread);
        self.current.get_or_insert(id);
    }

    /// Unregisters a thread (e.g., it has exited).
    ///
    /// If it was the current thread, the first remaining thread becomes the
    /// current one.
    pub fn remove(&mut self, thread_id: u64) -> Option<T> {
        let thread = self.threads.shift_remove(&thread_id)?;

        if self.current == Some(thread_id) {
            self.current = self.threads.keys().next().copied();
        }

        Some(thread)
    }

    /// Unregisters every thread.
    pub fn clear(&mut self) {
        self.threads.clear();
        self.current = None;
    }

    /// Looks up a thread by its ID.
    pub fn find(&self, thread_id: u64) -> Option<&T> {
        self.threads.get(&thread_id)
    }

    /// Looks up a thread by its ID.
    pub fn find_mut(&mut self, thread_id: u64) -> Option<&mut T> {
        self.threads.get_mut(&thread_id)
    }

    /// Returns a snapshot of all known threads.
    pub fn list(&self) -> Vec<&T> {
        self.threads.values().collect()
    }

    /// Returns the IDs of all known threads.
    pub fn ids(&self) -> Vec<u64> {
        self.threads.keys().copied().collect()
    }

    /// Returns the current thread, if any.
    pub fn current(&self) -> Option<&T> {
        self.current.and_then(|id| self.threads.get(&id))
    }

    /// Returns the ID of the current thread, if any.
    pub const fn current_id(&self) -> Option<u64> {
        self.current
    }

    /// Makes the thread with the given ID the current thread.
    pub fn set_current(&mut self, thread_id: u64) -> crate::Result<()> {
        if !self.threads.contains_key(&thread_id) {
            return Err(crate::Error::UnknownThread(thread_id));
        }

        self.current = Some(thread_id);

        Ok(())
    }

    /// Returns the number of known threads.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Returns whether no thread is known.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Thread, ThreadRegistry};

    #[derive(Debug, PartialEq)]
    struct TestThread(u64);

    impl Thread for TestThread {
        fn id(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn lookup_and_ordering() {
        let mut threads = ThreadRegistry::new();

        threads.insert(TestThread(30));
        threads.insert(TestThread(10));
        threads.insert(TestThread(20));

        assert_eq!(threads.ids(), [30, 10, 20]);
        assert_eq!(threads.find(10), Some(&TestThread(10)));
        assert_eq!(threads.find(40), None);
        assert_eq!(threads.current_id(), Some(30));

        threads.remove(10);
        assert_eq!(threads.ids(), [30, 20]);
        assert_eq!(threads.find(10), None);
    }

    #[test]
    fn current_thread_follows_removal() {
        let mut threads = ThreadRegistry::new();

        threads.insert(TestThread(1));
        threads.insert(TestThread(2));

        threads.set_current(2).unwrap();
        assert_eq!(threads.current(), Some(&TestThread(2)));

        assert!(threads.set_current(3).is_err());
        assert_eq!(threads.current_id(), Some(2));

        threads.remove(2);
        assert_eq!(threads.current_id(), Some(1));

        threads.remove(1);
        assert_eq!(threads.current_id(), None);
        assert!(threads.is_empty());
    }
}
