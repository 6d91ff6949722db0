//! File-backed store behaviour across reopen

use chrono::{Duration, Utc};
use herald_common::{Channel, Content, NotificationKind, Recipient};
use herald_store::{
    ChannelPreferences, FilePreferenceStore, FileStore, NewScheduledNotification, NotificationId,
    PreferenceStore, PreferencesUpdate, ScheduleStatus, ScheduledStore, StoreError,
    backends::file::PREFERENCES_FILE,
};
use pretty_assertions::assert_eq;

fn request(user: &str, offset_secs: i64) -> NewScheduledNotification {
    NewScheduledNotification::new(
        user,
        NotificationKind::Custom("reminder".to_string()),
        Channel::Email,
        Recipient::new("ada@example.com").with_name("Ada"),
        Content::new("See you soon").with_subject("Reminder"),
        Utc::now() + Duration::seconds(offset_secs),
    )
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");

    let (kept, cancelled) = {
        let store = FileStore::open(dir.path()).await.expect("open");
        let kept = store.create(request("u1", -5)).await.expect("create");
        let cancelled = store.create(request("u1", -5)).await.expect("create");
        store.cancel(&cancelled.id).await.expect("cancel");
        (kept, cancelled)
    };

    let reopened = FileStore::open(dir.path()).await.expect("reopen");
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.get(&kept.id).await.expect("get"), kept);
    assert_eq!(
        reopened.get(&cancelled.id).await.expect("get").status,
        ScheduleStatus::Cancelled
    );

    let due = reopened.find_due(Utc::now(), 100).await.expect("find_due");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, kept.id);
}

#[tokio::test]
async fn test_open_ignores_foreign_files_and_removes_temporaries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let orphan = dir.path().join(".tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin");
    std::fs::write(&orphan, b"partial").expect("write orphan");
    std::fs::write(dir.path().join("README.txt"), b"not a record").expect("write");

    let store = FileStore::open(dir.path()).await.expect("open");

    assert!(store.is_empty());
    assert!(!orphan.exists());
    assert!(dir.path().join("README.txt").exists());
}

#[tokio::test]
async fn test_open_rejects_file_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"").expect("write");

    assert!(matches!(
        FileStore::open(&file).await,
        Err(StoreError::Io(_))
    ));
}

#[tokio::test]
async fn test_conditional_update_and_reschedule_persist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(dir.path()).await.expect("open");

    let record = store.create(request("u1", -1)).await.expect("create");
    store
        .update_status(&record.id, ScheduleStatus::Pending, ScheduleStatus::Failed, 3)
        .await
        .expect("fail");

    let conflict = store
        .update_status(&record.id, ScheduleStatus::Pending, ScheduleStatus::Sent, 3)
        .await;
    assert!(matches!(conflict, Err(StoreError::Conflict { .. })));

    let when = Utc::now() + Duration::hours(2);
    store.reschedule(&record.id, when).await.expect("reschedule");

    let reopened = FileStore::open(dir.path()).await.expect("reopen");
    let read = reopened.get(&record.id).await.expect("get");
    assert_eq!(read.status, ScheduleStatus::Pending);
    assert_eq!(read.retry_count, 0);
    assert_eq!(read.scheduled_for, when);
}

#[tokio::test]
async fn test_bulk_create_and_listings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(dir.path()).await.expect("open");

    let created = store
        .create_many(vec![request("u1", 600), request("u1", 60), request("u2", 60)])
        .await
        .expect("bulk");
    assert_eq!(created.len(), 3);

    let pending: Vec<NotificationId> = store
        .pending_for_user("u1")
        .await
        .expect("pending")
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(pending, vec![created[1].id.clone(), created[0].id.clone()]);

    store
        .update_status(&created[0].id, ScheduleStatus::Pending, ScheduleStatus::Failed, 3)
        .await
        .expect("fail");
    store
        .update_status(&created[1].id, ScheduleStatus::Pending, ScheduleStatus::Failed, 3)
        .await
        .expect("fail");

    let failed = store.failed_for_user("u1").await.expect("failed");
    assert_eq!(failed.len(), 2);
    assert!(failed[0].updated_at >= failed[1].updated_at);
}

#[tokio::test]
async fn test_preferences_survive_reopen_beside_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(PREFERENCES_FILE);

    {
        let preferences = FilePreferenceStore::open(&path).await.expect("open");
        let update = PreferencesUpdate {
            email: Some(ChannelPreferences {
                marketing: true,
                ..ChannelPreferences::default()
            }),
            ..PreferencesUpdate::default()
        };
        preferences.upsert("u1", &update).await.expect("upsert");

        let outcome = preferences
            .upsert_many(&["u1".to_string(), "u2".to_string()], &PreferencesUpdate::default())
            .await
            .expect("bulk");
        assert_eq!((outcome.modified, outcome.upserted), (1, 1));
    }

    let records = FileStore::open(dir.path()).await.expect("records");
    assert!(records.is_empty());

    let reopened = FilePreferenceStore::open(&path).await.expect("reopen");
    let u1 = reopened.get("u1").await.expect("get").expect("stored");
    assert!(u1.email.marketing);
    assert!(!u1.sms.marketing);
    assert!(reopened.get("u2").await.expect("get").is_some());
    assert!(reopened.get("u3").await.expect("get").is_none());
}

#[tokio::test]
async fn test_rejected_preferences_leave_file_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(PREFERENCES_FILE);

    let preferences = FilePreferenceStore::open(&path).await.expect("open");
    let update = PreferencesUpdate {
        language: Some(String::new()),
        ..PreferencesUpdate::default()
    };

    let result = preferences.upsert("u1", &update).await;
    assert!(matches!(result, Err(StoreError::InvalidPreferences(_))));
    assert!(!path.exists());
}
