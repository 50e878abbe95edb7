//! Routing context
//!
//! A stack of routing keys scoped to the current unit of execution. Inside
//! [`scope`] the stack is task-local, so it follows the future across worker
//! threads and concurrent tasks never see each other's keys. Outside of any
//! scope the stack is thread-local, which serves synchronous callers that use
//! [`enter`] or raw [`push`]/[`pop`].
//!
//! An empty key means "no preference": the registry falls back to primary.

use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static TASK_KEYS: RefCell<Vec<String>>;
}

thread_local! {
    static THREAD_KEYS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Task,
    Thread,
}

fn active_storage() -> Storage {
    if TASK_KEYS.try_with(|_| ()).is_ok() {
        Storage::Task
    } else {
        Storage::Thread
    }
}

fn with_storage<R>(storage: Storage, f: impl FnOnce(&mut Vec<String>) -> R) -> R {
    match storage {
        Storage::Task => TASK_KEYS.with(|keys| f(&mut keys.borrow_mut())),
        Storage::Thread => THREAD_KEYS.with(|keys| f(&mut keys.borrow_mut())),
    }
}

/// Push a key onto the current stack
pub fn push(key: impl Into<String>) {
    let key = key.into();
    with_storage(active_storage(), |keys| keys.push(key));
}

/// Top of the current stack, or `""` when empty
pub fn peek() -> String {
    with_storage(active_storage(), |keys| keys.last().cloned().unwrap_or_default())
}

/// Remove the top of the current stack; no-op when empty
pub fn pop() {
    with_storage(active_storage(), |keys| {
        if keys.pop().is_none() {
            tracing::trace!("Routing context pop on empty stack");
        }
    });
}

/// Number of keys on the current stack
pub fn depth() -> usize {
    with_storage(active_storage(), |keys| keys.len())
}

/// Copy of the current stack, bottom first
pub fn snapshot() -> Vec<String> {
    with_storage(active_storage(), |keys| keys.clone())
}

/// Push `key` and pop it again when the returned guard drops
///
/// Meant for synchronous scopes. Holding the guard across an `.await`
/// outside of [`scope`] ties the key to whichever thread resumes the task;
/// use [`scope`] for async code.
#[must_use = "the key is popped as soon as the guard is dropped"]
pub fn enter(key: impl Into<String>) -> RoutingGuard {
    let storage = active_storage();
    let key = key.into();
    with_storage(storage, |keys| keys.push(key));
    RoutingGuard { storage }
}

/// Pops the key pushed by [`enter`]
#[derive(Debug)]
pub struct RoutingGuard {
    storage: Storage,
}

impl Drop for RoutingGuard {
    fn drop(&mut self) {
        match self.storage {
            Storage::Thread => THREAD_KEYS.with(|keys| {
                keys.borrow_mut().pop();
            }),
            Storage::Task => {
                let popped = TASK_KEYS.try_with(|keys| {
                    keys.borrow_mut().pop();
                });
                if popped.is_err() {
                    tracing::debug!("Routing guard dropped outside of its task scope");
                }
            }
        }
    }
}

/// Run `future` with `key` on top of the routing stack
///
/// The future gets its own stack seeded with the enclosing keys, so the
/// enclosing stack is untouched whatever way the future ends: completion,
/// error, panic or cancellation.
pub async fn scope<F>(key: impl Into<String>, future: F) -> F::Output
where
    F: Future,
{
    let mut keys = snapshot();
    keys.push(key.into());
    TASK_KEYS.scope(RefCell::new(keys), future).await
}

/// Synchronous counterpart of [`scope`]
pub fn sync_scope<R>(key: impl Into<String>, f: impl FnOnce() -> R) -> R {
    let _guard = enter(key);
    f()
}
