use std::cell::RefCell;

use decopres_db::prelude::*;
use decopres_db::sqlite::backup::PROBE_STEP_PAGES;
use tempfile::tempdir;

fn seeded(rows: i64) -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    conn.execute("CREATE TABLE blobs (id INTEGER PRIMARY KEY, body TEXT NOT NULL)")?;
    conn.immediate(|c| {
        let mut insert = c.prepare("INSERT INTO blobs (id, body) VALUES (?, ?)")?;
        for id in 0..rows {
            insert.run(vec![Value::from(id), Value::from("x".repeat(400))])?;
        }
        Ok::<_, DbError>(())
    })?;
    Ok(conn)
}

fn page_count(conn: &Connection) -> Result<i64, DbError> {
    conn.pragma_value("page_count")?
        .and_then(|v| v.as_int())
        .ok_or_else(|| DbError::ExecutionError("page_count returned nothing".into()))
}

fn all_rows(conn: &Connection) -> Result<Vec<(i64, String)>, DbError> {
    conn.prepare("SELECT id, body FROM blobs ORDER BY id")?
        .all(())?
        .iter()
        .map(|row| Ok((row.get::<i64>("id")?, row.get::<String>("body")?)))
        .collect()
}

#[tokio::test]
async fn backup_copies_every_page_in_steps() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(2000)?;
    let total = page_count(&source)?;
    assert!(total > i64::from(PROBE_STEP_PAGES) + 100);

    let dir = tempdir()?;
    let dest = dir.path().join("copy.db");
    let seen = RefCell::new(Vec::new());
    let options = BackupOptions::new().on_progress(|progress| {
        seen.borrow_mut().push(*progress);
        None
    });
    let done = source.backup_to(&dest, options).await?;

    assert!(done.is_complete());
    assert_eq!(i64::from(done.total_pages), total);
    let seen = seen.into_inner();
    assert_eq!(seen.first().map(BackupProgress::copied_pages), Some(16));
    assert_eq!(seen.iter().filter(|p| p.is_complete()).count(), 1);
    assert!(seen.last().is_some_and(BackupProgress::is_complete));
    for pair in seen.windows(2) {
        assert!(pair[1].remaining_pages < pair[0].remaining_pages);
    }

    let copy = Connection::open(dest.as_path(), OpenOptions::default())?;
    assert_eq!(all_rows(&copy)?, all_rows(&source)?);
    Ok(())
}

#[tokio::test]
async fn queries_run_between_backup_steps() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(500)?;
    let dir = tempdir()?;
    let events = RefCell::new(Vec::new());
    let options = BackupOptions::new().step_pages(10).on_progress(|_| {
        events.borrow_mut().push("step");
        None
    });
    let reader = async {
        let mut counts = Vec::new();
        for _ in 0..3 {
            let row = source.prepare("SELECT count(*) AS n FROM blobs")?.get(())?;
            counts.push(row.map(|r| r.get::<i64>("n")).transpose()?);
            events.borrow_mut().push("query");
            tokio::task::yield_now().await;
        }
        Ok::<_, DbError>(counts)
    };

    let (done, counts) = tokio::join!(source.backup_to(dir.path().join("busy.db"), options), reader);
    assert!(done?.is_complete());
    assert_eq!(counts?, vec![Some(500); 3]);

    let events = events.borrow().clone();
    assert!(events.iter().filter(|e| **e == "step").count() > 3);
    let first_query = events.iter().position(|e| *e == "query");
    let last_step = events.iter().rposition(|e| *e == "step");
    assert!(first_query < last_step, "events: {events:?}");
    Ok(())
}

#[tokio::test]
async fn callback_can_change_the_step_size() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(500)?;
    let dir = tempdir()?;
    let steps = RefCell::new(0_u32);
    let options = BackupOptions::new().on_progress(|_| {
        *steps.borrow_mut() += 1;
        Some(0)
    });
    source.backup_to(dir.path().join("fast.db"), options).await?;
    // probe step, then everything that is left
    assert_eq!(steps.into_inner(), 2);
    Ok(())
}

#[tokio::test]
async fn invalid_step_size_from_callback_fails() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(500)?;
    let dir = tempdir()?;
    let options = BackupOptions::new().on_progress(|_| Some(-1));
    let err = source
        .backup_to(dir.path().join("bad.db"), options)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ProgressCallbackError(_)));
    Ok(())
}

#[tokio::test]
async fn missing_directory_creates_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(3)?;
    let dir = tempdir()?;
    let missing = dir.path().join("nope");
    let dest = missing.join("copy.db");
    let err = source
        .backup_to(&dest, BackupOptions::default())
        .await
        .unwrap_err();
    match err {
        DbError::DirectoryNotFound(path) => assert_eq!(path, missing),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!dest.exists());
    assert!(!missing.exists());
    Ok(())
}

#[tokio::test]
async fn memory_destination_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(1)?;
    let err = source
        .backup_to(":memory:", BackupOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidTarget(_)));
    Ok(())
}

#[tokio::test]
async fn unknown_attachment_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(1)?;
    let dir = tempdir()?;
    let dest = dir.path().join("x.db");
    let err = source
        .backup_to(&dest, BackupOptions::new().attachment("archive"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ConfigError(_)));
    let err = source
        .backup_to(&dest, BackupOptions::new().attachment(""))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ConfigError(_)));
    assert!(!dest.exists());
    Ok(())
}

#[tokio::test]
async fn attached_database_can_be_backed_up() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let archive = dir.path().join("archive.db");
    let conn = Connection::open_in_memory()?;
    conn.execute(&format!(
        "ATTACH DATABASE '{}' AS archive;
         CREATE TABLE archive.old (v TEXT);
         INSERT INTO archive.old VALUES ('kept');",
        archive.display()
    ))?;
    let dest = dir.path().join("archive-copy.db");
    conn.backup_to(&dest, BackupOptions::new().attachment("archive").step_pages(1))
        .await?;

    let copy = Connection::open(dest.as_path(), OpenOptions::default())?;
    let row = copy.prepare("SELECT v FROM old")?.get(())?.expect("row");
    assert_eq!(row.get::<String>("v")?, "kept");
    Ok(())
}

#[tokio::test]
async fn backup_overwrites_existing_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let dest = dir.path().join("existing.db");
    {
        let old = Connection::open(dest.as_path(), OpenOptions::default())?;
        old.execute("CREATE TABLE stale (v INTEGER)")?;
    }
    let source = seeded(2)?;
    source.backup_to(&dest, BackupOptions::default()).await?;

    let copy = Connection::open(dest.as_path(), OpenOptions::default())?;
    assert_eq!(all_rows(&copy)?.len(), 2);
    assert!(copy.prepare("SELECT * FROM stale").is_err());
    Ok(())
}

#[test]
fn serialize_round_trips_through_a_file() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(10)?;
    let bytes = source.serialize("main")?;
    assert_eq!(bytes.len() as i64, page_count(&source)? * 4096);

    let dir = tempdir()?;
    let path = dir.path().join("snapshot.db");
    std::fs::write(&path, &bytes)?;
    let copy = Connection::open(path.as_path(), OpenOptions::default())?;
    assert_eq!(all_rows(&copy)?, all_rows(&source)?);
    Ok(())
}

#[test]
fn serialized_image_loads_into_memory() -> Result<(), Box<dyn std::error::Error>> {
    let source = seeded(10)?;
    let bytes = source.serialize("main")?;
    let copy = Connection::from_serialized(&bytes)?;
    assert!(copy.is_in_memory());
    assert_eq!(all_rows(&copy)?, all_rows(&source)?);

    copy.execute("DELETE FROM blobs")?;
    assert_eq!(all_rows(&source)?.len(), 10);
    Ok(())
}
