use parking_lot::Mutex;
use std::sync::Arc;

/// State shared between the MQTT listener, the HTTP handlers and run tasks.
/// Locks are short and never held across an `.await`.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Clone the current value out of the lock.
pub fn snapshot<T: Clone>(state: &Shared<T>) -> T {
    state.lock().clone()
}
