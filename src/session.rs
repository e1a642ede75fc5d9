use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

static NEXT_SESSION_ID: AtomicI64 = AtomicI64::new(1);

thread_local! {
    static SESSION_PARAMETERS: RefCell<HashMap<String, String>> =
        RefCell::new(HashMap::new());
    /// Assigned the first time a thread asks for its id; also used to
    /// namespace external-sort temp files.
    static SESSION_ID: i64 = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
}

pub fn set_session_parameter(key: &str, value: &str) {
    SESSION_PARAMETERS.with(|p| {
        p.borrow_mut().insert(key.to_string(), value.to_string());
    });
}

pub fn get_session_parameter(key: &str) -> Option<String> {
    SESSION_PARAMETERS.with(|p| p.borrow().get(key).cloned())
}

pub fn reset_session_parameter(key: &str) {
    SESSION_PARAMETERS.with(|p| {
        p.borrow_mut().remove(key);
    });
}

pub fn current_session_id() -> i64 {
    SESSION_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_parameters() {
        set_session_parameter("user", "postgres");
        assert_eq!(get_session_parameter("user").as_deref(), Some("postgres"));
        reset_session_parameter("user");
        assert_eq!(get_session_parameter("user"), None);
    }

    #[test]
    fn test_session_ids_differ_between_threads() {
        let here = current_session_id();
        assert_eq!(here, current_session_id());
        let there = std::thread::spawn(current_session_id).join().unwrap();
        assert_ne!(here, there);
    }
}
