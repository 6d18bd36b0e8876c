use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown audit event type: {0}")]
pub struct UnknownEventType(pub u8);

/// Classification of a captured occurrence.
///
/// Serialized as its integer discriminant on the wire; the collector stores
/// the same numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AuditEventType {
    // Workbook events
    WorkbookNew = 0,
    WorkbookOpen = 1,
    WorkbookClose = 2,
    WorkbookSave = 3,
    WorkbookActivate = 4,
    WorkbookDeactivate = 5,

    // Cell/sheet events
    CellChange = 6,
    SelectionChange = 7,
    SheetAdd = 8,
    SheetDelete = 9,
    SheetRename = 10,
    SheetActivate = 11,

    // System events
    SessionStart = 12,
    SessionEnd = 13,
    AddinLoad = 14,
    AddinUnload = 15,
    Error = 16,
}

impl From<AuditEventType> for u8 {
    fn from(kind: AuditEventType) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for AuditEventType {
    type Error = UnknownEventType;

    fn try_from(value: u8) -> Result<Self, UnknownEventType> {
        use AuditEventType::*;
        let kind = match value {
            0 => WorkbookNew,
            1 => WorkbookOpen,
            2 => WorkbookClose,
            3 => WorkbookSave,
            4 => WorkbookActivate,
            5 => WorkbookDeactivate,
            6 => CellChange,
            7 => SelectionChange,
            8 => SheetAdd,
            9 => SheetDelete,
            10 => SheetRename,
            11 => SheetActivate,
            12 => SessionStart,
            13 => SessionEnd,
            14 => AddinLoad,
            15 => AddinUnload,
            16 => Error,
            other => return Err(UnknownEventType(other)),
        };
        Ok(kind)
    }
}

/// One captured change/occurrence record, the pipeline's unit of work.
///
/// Created by the producer at the moment of observation and immutable from
/// the pipeline's point of view afterwards: the queue, spool and publisher
/// only read and serialize it. `event_id` doubles as the idempotency key
/// downstream, so replaying a spool file after a partial delivery cannot
/// duplicate stored rows.
///
/// Field names follow the collector's wire schema (camelCase JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,

    // Actor identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    // Origin document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workbook_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workbook_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,

    // Location and values within the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,

    // Structured extras
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditEvent {
    /// Creates a new event with a fresh id and the current UTC timestamp.
    /// All contextual fields start empty; the producer fills in what it knows.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            user_name: None,
            machine_name: None,
            user_domain: None,
            session_id: None,
            workbook_name: None,
            workbook_path: None,
            sheet_name: None,
            cell_address: None,
            cell_count: None,
            old_value: None,
            new_value: None,
            formula: None,
            details: None,
            error_message: None,
            correlation_id: None,
        }
    }
}
