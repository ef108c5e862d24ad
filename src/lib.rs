//! Unified text-generation relay in front of AWS Bedrock
//!
//! A single `{model, prompt, stream, options}` request is routed to the
//! provider adapter for the model, sent to Bedrock, and the provider's reply
//! is normalized into one chunk shape delivered as JSON or server-sent events.

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fallback;
pub mod logger;
pub mod normalize;
pub mod relay;
pub mod server;
pub mod types;
pub mod upstream;

/// Route panics into the log store as well as stderr.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic payload".to_string()
        };

        let location = match panic_info.location() {
            Some(location) => format!("{}:{}:{}", location.file(), location.line(), location.column()),
            None => "Unknown location".to_string(),
        };

        crate::logger::error(
            "panic",
            &format!("PANIC occurred: message='{}', location='{}'", message, location),
        );
        eprintln!("FATAL PANIC: {} at {}", message, location);
    }));
}
