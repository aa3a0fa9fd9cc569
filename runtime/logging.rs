//! Logging for the coder runtime.
//!
//! Table construction and extension caching happen once per type,
//! so those are the only events worth logging; the size and encode paths never log.
//! Every event is tagged with the full name of the message type it concerns
//! so logs can be filtered per schema.

/// The most basic requirements for emitting a log:
/// - Log level.
/// - Message type: the full name of the type the event concerns.
/// - Arguments: optional structured fields followed by a literal message.
macro_rules! log {
    ($level:expr, message: $message:expr, $($arg:tt)+) => {{
        // Check the type of `$message` by moving the reference.
        let message_type: &str = $message;
        ::tracing::event!($level, message_type = message_type, $($arg)+);
    }};
}

macro_rules! log_error {
    (message: $message:expr, $($arg:tt)+) => {
        log!(::tracing::Level::ERROR, message: $message, $($arg)+)
    };
}

macro_rules! log_debug {
    (message: $message:expr, $($arg:tt)+) => {
        log!(::tracing::Level::DEBUG, message: $message, $($arg)+)
    };
}
