use std::fmt;

use crate::executor::{ExecutionMode, Executor};

/// A one-shot close, complete or destroy listener.
pub struct Listener {
    mode: ExecutionMode,
    f: Box<dyn FnOnce() + Send + 'static>,
}

impl Listener {
    pub fn new<F: FnOnce() + Send + 'static>(mode: ExecutionMode, f: F) -> Self {
        Self { mode, f: Box::new(f) }
    }

    pub(crate) fn run(self, executor: &dyn Executor) {
        executor.execute(self.mode, self.f)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("mode", &self.mode).finish()
    }
}

/// Listeners of one event, which fires at most once.
///
/// The owner keeps this behind its lock and runs the returned listeners
/// after releasing it.
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    fired: bool,
    pending: Vec<Listener>,
}

impl Listeners {
    /// Registers a listener. Once the event has fired the listener is handed
    /// back to be run right away.
    pub(crate) fn add(&mut self, listener: Listener) -> Option<Listener> {
        if self.fired {
            Some(listener)
        } else {
            self.pending.push(listener);
            None
        }
    }

    /// Marks the event as fired and returns the listeners to run, empty on
    /// every call but the first.
    pub(crate) fn fire(&mut self) -> Vec<Listener> {
        if self.fired {
            return Vec::new();
        }
        self.fired = true;
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired
    }
}

pub(crate) fn run_all(listeners: Vec<Listener>, executor: &dyn Executor) {
    for listener in listeners {
        listener.run(executor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Listener::new(ExecutionMode::Unsynchronized, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fires_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();
        assert!(listeners.add(counting(&counter)).is_none());
        assert!(listeners.add(counting(&counter)).is_none());

        run_all(listeners.fire(), &InlineExecutor);
        run_all(listeners.fire(), &InlineExecutor);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(listeners.has_fired());
    }

    #[test]
    fn late_listener_is_handed_back() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::default();
        listeners.fire();

        let late = listeners.add(counting(&counter)).unwrap();
        late.run(&InlineExecutor);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
