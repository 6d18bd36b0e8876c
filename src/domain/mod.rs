//! Domain layer for audit-forwarder.
//!
//! Contains the canonical types shared across all modules:
//! - `AuditEvent`: the pipeline's unit of work
//! - `AuditEventType`: integer-tagged event classification
//! - `SessionContext`: actor/machine/session identity stamped onto events

pub mod context;
pub mod event;

pub use context::SessionContext;
pub use event::{AuditEvent, AuditEventType, UnknownEventType};
