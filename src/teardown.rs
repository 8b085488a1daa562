//! Ordered release of acquired vendor resources
//!
//! Each vendor handle acquired during initialization is pushed onto a
//! [`ReleaseStack`] together with the function that releases it. Unwinding
//! runs the release functions in reverse acquisition order, so a failed
//! initialization and a normal termination share the same cleanup path.

use crate::error::PlatformResult;

type ReleaseFn = Box<dyn FnOnce() -> PlatformResult<()> + Send>;

struct Acquired {
    label: &'static str,
    release: ReleaseFn,
}

/// Stack of acquired resources, released last-in first-out
#[derive(Default)]
pub struct ReleaseStack {
    entries: Vec<Acquired>,
}

impl ReleaseStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resource together with its release function
    pub fn push<F>(&mut self, label: &'static str, release: F)
    where
        F: FnOnce() -> PlatformResult<()> + Send + 'static,
    {
        tracing::trace!("ReleaseStack: acquired {}", label);
        self.entries.push(Acquired {
            label,
            release: Box::new(release),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in acquisition order
    pub fn labels(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.label).collect()
    }

    /// Release everything in reverse acquisition order.
    ///
    /// Every entry is attempted even if an earlier release fails; the first
    /// failure is returned. Calling this on an empty stack is a no-op.
    pub fn release_all(&mut self) -> PlatformResult<()> {
        let mut first_err = None;
        while let Some(entry) = self.entries.pop() {
            tracing::debug!("ReleaseStack: releasing {}", entry.label);
            if let Err(e) = (entry.release)() {
                tracing::error!("ReleaseStack: failed to release {}: {}", entry.label, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ReleaseStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let _ = self.release_all();
        }
    }
}

impl std::fmt::Debug for ReleaseStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseStack")
            .field("entries", &self.labels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, ReleaseStack) {
        (Arc::new(Mutex::new(Vec::new())), ReleaseStack::new())
    }

    #[test]
    fn test_release_in_reverse_order() {
        let (log, mut stack) = recorder();
        for label in ["context", "queue", "program", "kernel"] {
            let log = log.clone();
            stack.push(label, move || {
                log.lock().unwrap().push(label);
                Ok(())
            });
        }
        assert_eq!(stack.labels(), vec!["context", "queue", "program", "kernel"]);

        stack.release_all().unwrap();
        assert!(stack.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["kernel", "program", "queue", "context"]
        );
    }

    #[test]
    fn test_release_continues_after_failure() {
        let (log, mut stack) = recorder();
        let l1 = log.clone();
        stack.push("context", move || {
            l1.lock().unwrap().push("context");
            Ok(())
        });
        stack.push("queue", || Err(PlatformError::QueueCreationFailed("busy".to_string())));
        let l3 = log.clone();
        stack.push("program", move || {
            l3.lock().unwrap().push("program");
            Ok(())
        });

        let err = stack.release_all().unwrap_err();
        assert!(matches!(err, PlatformError::QueueCreationFailed(_)));
        assert_eq!(*log.lock().unwrap(), vec!["program", "context"]);
    }

    #[test]
    fn test_release_twice_is_noop() {
        let (log, mut stack) = recorder();
        let l = log.clone();
        stack.push("context", move || {
            l.lock().unwrap().push("context");
            Ok(())
        });
        stack.release_all().unwrap();
        stack.release_all().unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_releases_remaining() {
        let (log, mut stack) = recorder();
        let l = log.clone();
        stack.push("context", move || {
            l.lock().unwrap().push("context");
            Ok(())
        });
        drop(stack);
        assert_eq!(*log.lock().unwrap(), vec!["context"]);
    }
}
