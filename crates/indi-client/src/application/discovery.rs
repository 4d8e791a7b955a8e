//! Blocking discovery: wait until a device or property has been defined.
//!
//! These helpers poll the shared engine every [`POLL_INTERVAL`] and block
//! the calling thread in between.  Never call them from the connection's own
//! read loop: that loop is what fills the registry, so it would wait on
//! itself until `max_wait` runs out.

use std::sync::{PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use indi_core::{Device, Property};

use crate::application::sync_engine::ClientEngine;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Calls `lookup` until it finds something or `max_wait` has passed.  A
/// `max_wait` too large to add to the current instant never expires.
fn poll<T>(max_wait: Duration, mut lookup: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now().checked_add(max_wait);
    loop {
        if let Some(found) = lookup() {
            return Some(found);
        }
        let pause = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                remaining.min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };
        thread::sleep(pause);
    }
}

/// Waits up to `max_wait` for `device` to appear; returns a snapshot of it.
pub fn wait_for_device(
    engine: &RwLock<ClientEngine>,
    device: &str,
    max_wait: Duration,
) -> Option<Device> {
    poll(max_wait, || {
        let engine = engine.read().unwrap_or_else(PoisonError::into_inner);
        engine.device(device).cloned()
    })
}

/// Waits up to `max_wait` for `device.property` to appear.
pub fn wait_for_property(
    engine: &RwLock<ClientEngine>,
    device: &str,
    property: &str,
    max_wait: Duration,
) -> Option<Property> {
    poll(max_wait, || {
        let engine = engine.read().unwrap_or_else(PoisonError::into_inner);
        engine.property(device, property).cloned()
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::sync_engine::{ClientError, Outbox};
    use indi_core::protocol::messages::{DefElement, DefVector};
    use indi_core::{IndiMessage, PropertyKind};
    use std::sync::Arc;

    struct NullOutbox;

    impl Outbox for NullOutbox {
        fn send(&self, _message: IndiMessage) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn text_def(device: &str, name: &str) -> DefVector {
        let mut def = DefVector::new(PropertyKind::Text, device, name, "Idle");
        def.perm = Some("ro".to_string());
        def.elements.push(DefElement::new("VALUE", "v1.0"));
        def
    }

    #[test]
    fn test_wait_for_device_returns_immediately_when_present() {
        // Arrange
        let engine = RwLock::new(ClientEngine::new(Arc::new(NullOutbox)));
        engine.write().unwrap().process_def(&text_def("CCD", "DRIVER_INFO"));
        let started = Instant::now();

        // Act
        let found = wait_for_device(&engine, "CCD", Duration::from_secs(5));

        // Assert
        assert_eq!(found.unwrap().name(), "CCD");
        assert!(started.elapsed() < POLL_INTERVAL);
    }

    #[test]
    fn test_wait_for_device_accepts_the_largest_duration() {
        // Arrange
        let engine = RwLock::new(ClientEngine::new(Arc::new(NullOutbox)));
        engine.write().unwrap().process_def(&text_def("CCD", "DRIVER_INFO"));

        // Act
        let found = wait_for_device(&engine, "CCD", Duration::MAX);

        // Assert
        assert_eq!(found.unwrap().name(), "CCD");
    }

    #[test]
    fn test_wait_without_deadline_keeps_polling_until_found() {
        // Arrange
        let engine = Arc::new(RwLock::new(ClientEngine::new(Arc::new(NullOutbox))));
        let writer = Arc::clone(&engine);

        // Act
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            writer.write().unwrap().process_def(&text_def("CCD", "DRIVER_INFO"));
        });
        let found = wait_for_property(&engine, "CCD", "DRIVER_INFO", Duration::MAX);
        handle.join().unwrap();

        // Assert
        assert!(found.is_some());
    }

    #[test]
    fn test_wait_for_property_gives_up_after_max_wait() {
        let engine = RwLock::new(ClientEngine::new(Arc::new(NullOutbox)));
        let started = Instant::now();

        let found = wait_for_property(&engine, "CCD", "DRIVER_INFO", Duration::from_millis(120));

        assert!(found.is_none());
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_wait_for_property_sees_definition_from_another_thread() {
        // Arrange
        let engine = Arc::new(RwLock::new(ClientEngine::new(Arc::new(NullOutbox))));
        let writer = Arc::clone(&engine);

        // Act
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            writer.write().unwrap().process_def(&text_def("CCD", "DRIVER_INFO"));
        });
        let found = wait_for_property(&engine, "CCD", "DRIVER_INFO", Duration::from_secs(5));
        handle.join().unwrap();

        // Assert
        assert_eq!(found.unwrap().element("VALUE").unwrap().value_string(), "v1.0");
    }
}
