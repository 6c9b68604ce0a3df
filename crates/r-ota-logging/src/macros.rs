//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Structured logging adapters for update module lifecycle events."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
#[doc(hidden)]
#[macro_export]
macro_rules! __ota_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            module = ctx.module.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            vendor_version = ctx.vendor_version.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with module context.
#[macro_export]
macro_rules! ota_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__ota_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__ota_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with module context.
#[macro_export]
macro_rules! ota_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__ota_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__ota_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with module context.
#[macro_export]
macro_rules! ota_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__ota_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__ota_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with module context.
#[macro_export]
macro_rules! ota_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__ota_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__ota_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
