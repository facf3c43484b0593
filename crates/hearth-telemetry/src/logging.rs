//! Structured log helpers with the kernel's standard fields.
//!
//! Every command log line carries `correlation_id`, every ownership log line
//! carries `resource`, so log shippers can join them without parsing text.

/// Log a command-scoped line with its correlation id.
#[macro_export]
macro_rules! log_command {
    ($level:ident, $correlation_id:expr, $command:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::tracing::$level!(
            correlation_id = %$correlation_id,
            command = $command,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a resource-scoped line (role changes, remounts, routes).
#[macro_export]
macro_rules! log_resource_event {
    ($level:ident, $resource:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::tracing::$level!(
            resource = %$resource,
            $($($field)*,)?
            $msg
        )
    };
}
