//! Process-wide panic hook
//!
//! A panic inside one spawned task would otherwise only surface when its
//! `JoinHandle` is awaited. The hook logs location and payload through
//! `tracing` the moment it happens, then defers to the default hook.
//!
//! ```no_run
//! use feedslot_core::resilience::install_panic_handler;
//!
//! install_panic_handler();
//! ```

use std::panic;
use tracing::error;

/// Install the logging panic hook
///
/// Safe to call more than once; each call wraps the previously installed hook.
pub fn install_panic_handler() {
    let previous = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "<unknown location>".to_string());

        let message = payload_message(info.payload());

        error!(
            location = %location,
            message = %message,
            thread = std::thread::current().name().unwrap_or("<unnamed>"),
            "PANIC"
        );

        previous(info);
    }));
}

fn payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<no message>".to_string()
    }
}
