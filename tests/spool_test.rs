use audit_forwarder::domain::{AuditEvent, AuditEventType};
use audit_forwarder::reliability::{EventSpool, SpoolConfig};
use tempfile::TempDir;

fn make_spool(dir: &TempDir, max_file_size: u64) -> EventSpool {
    EventSpool::new(SpoolConfig {
        path: dir.path().join("events.ndjson"),
        max_file_size,
    })
    .unwrap()
}

fn make_events(labels: &[&str]) -> Vec<AuditEvent> {
    labels
        .iter()
        .map(|label| {
            let mut event = AuditEvent::new(AuditEventType::CellChange);
            event.workbook_name = Some((*label).to_string());
            event
        })
        .collect()
}

#[tokio::test]
async fn test_append_and_read_round_trip() {
    let dir = TempDir::new().unwrap();
    let spool = make_spool(&dir, 1024 * 1024);

    let events = make_events(&["a", "b", "c"]);
    spool.append_events(&events).await.unwrap();

    assert!(spool.has_events().await);
    assert!(spool.size().await > 0);

    let read = spool.read_events().await.unwrap();
    assert_eq!(read.len(), 3);
    for (original, restored) in events.iter().zip(&read) {
        assert_eq!(original.event_id, restored.event_id);
        assert_eq!(original.workbook_name, restored.workbook_name);
    }

    spool.clear().await.unwrap();
    assert!(!spool.has_events().await);
    assert!(spool.read_events().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_file_reads_as_empty() {
    let dir = TempDir::new().unwrap();
    let spool = make_spool(&dir, 1024 * 1024);

    assert!(spool.read_events().await.unwrap().is_empty());
    assert!(!spool.has_events().await);
    assert_eq!(spool.size().await, 0);

    // Clearing a file that never existed is not an error.
    spool.clear().await.unwrap();
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let spool = make_spool(&dir, 1024 * 1024);

    spool.append_events(&make_events(&["a"])).await.unwrap();

    // Corrupt the file: garbage line plus a blank line between valid ones.
    let path = dir.path().join("events.ndjson");
    let mut content = std::fs::read_to_string(&path).unwrap();
    content.push_str("{not json at all\n\n");
    std::fs::write(&path, content).unwrap();

    spool.append_events(&make_events(&["b"])).await.unwrap();

    let read = spool.read_events().await.unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read[0].workbook_name.as_deref(), Some("a"));
    assert_eq!(read[1].workbook_name.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_rotation_preserves_all_events() {
    let dir = TempDir::new().unwrap();
    // Threshold small enough that the first batch fills the active file.
    let spool = make_spool(&dir, 64);

    let first = make_events(&["old-1", "old-2"]);
    spool.append_events(&first).await.unwrap();

    let second = make_events(&["new-1"]);
    spool.append_events(&second).await.unwrap();

    let rotated = spool.rotated_files().await.unwrap();
    assert_eq!(rotated.len(), 1);

    let rotated_events = spool.read_events_from_file(&rotated[0]).await.unwrap();
    assert_eq!(rotated_events.len(), 2);
    assert_eq!(rotated_events[0].workbook_name.as_deref(), Some("old-1"));

    let active_events = spool.read_events().await.unwrap();
    assert_eq!(active_events.len(), 1);
    assert_eq!(active_events[0].workbook_name.as_deref(), Some("new-1"));

    // Size covers both files; deleting the rotated file shrinks it.
    let total = spool.size().await;
    spool.delete_file(&rotated[0]).await.unwrap();
    assert!(spool.size().await < total);
    assert!(spool.rotated_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rotate_for_read_moves_active_aside() {
    let dir = TempDir::new().unwrap();
    let spool = make_spool(&dir, 1024 * 1024);

    // Nothing to snapshot yet.
    assert!(spool.rotate_for_read().await.unwrap().is_none());

    spool.append_events(&make_events(&["old"])).await.unwrap();
    let snapshot = spool.rotate_for_read().await.unwrap().unwrap();

    // The active file is gone; later appends start a fresh one.
    assert!(spool.read_events().await.unwrap().is_empty());
    spool.append_events(&make_events(&["new"])).await.unwrap();

    let snapshot_events = spool.read_events_from_file(&snapshot).await.unwrap();
    assert_eq!(snapshot_events.len(), 1);
    assert_eq!(snapshot_events[0].workbook_name.as_deref(), Some("old"));

    let active_events = spool.read_events().await.unwrap();
    assert_eq!(active_events.len(), 1);
    assert_eq!(active_events[0].workbook_name.as_deref(), Some("new"));

    assert_eq!(spool.rotated_files().await.unwrap(), vec![snapshot]);
}

#[tokio::test]
async fn test_delete_missing_file_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let spool = make_spool(&dir, 1024 * 1024);

    let ghost = dir.path().join("events_20990101T000000000Z.ndjson");
    spool.delete_file(&ghost).await.unwrap();
}
