//! Metrics emission.
//!
//! Events are recorded through the `metrics` facade. Nothing is exported
//! until the host installs a recorder, so emission is cheap when unused.

pub mod events;

/// Macro for emitting metric events.
///
/// Calls `InternalEvent::emit()` on the given event.
///
/// # Example
///
/// ```ignore
/// use sifter_core::metrics::events::RowsProcessed;
///
/// emit!(RowsProcessed { count: 100, job: "customers".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
