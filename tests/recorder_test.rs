//! Record and playback tests for sqidem
//!
//! A recorder in record mode runs queries against the in-memory database and
//! writes a fixture file on close; a recorder in play mode answers the same
//! queries from that file alone.

mod helpers;

use std::fs;

use helpers::{create_temp_dir, write_file};
use sqidem::error::SqidemError;
use sqidem::memdb::{DatabaseSpec, MemoryConnectionFactory};
use sqidem::recorder::{Recorder, RecorderMode};
use sqidem::result_set::JdbcType;

const SQL: &str = "select k, v, '' as e, 'a,\"b\"' as q from t order by k";

#[test]
fn test_record_then_play() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = create_temp_dir()?;
    let csv = write_file(temp_dir.path(), "t.csv", "k,v\n1,\n2,two\n");
    let fixture_path = temp_dir.path().join("fixtures.txt");

    let factory = MemoryConnectionFactory::new()
        .with_database(DatabaseSpec::new("db").with_table(&format!("t={}", csv.display())));
    let mut recorder = Recorder::builder()
        .mode(RecorderMode::Record)
        .file(&fixture_path)
        .factory(Box::new(factory))
        .build()?;
    let recorded = recorder.execute_query("db", "t_rows", SQL)?;
    assert_eq!(recorded.row_count(), 2);
    recorder.close()?;

    let text = fs::read_to_string(&fixture_path)?;
    assert!(text.starts_with("# StartTest: t_rows\n!use db\n"));
    assert!(text.contains("k:INTEGER,v:VARCHAR,e:VARCHAR,q:VARCHAR\n"));
    assert!(text.contains("1,,\"\",\"a,\"\"b\"\"\"\n"));
    assert!(text.ends_with("!ok\n# EndTest: t_rows\n"));

    // Playback needs no database at all
    let mut player = Recorder::builder()
        .mode(RecorderMode::Play)
        .file(&fixture_path)
        .build()?;
    assert_eq!(player.fixtures().len(), 1);
    let replayed = player.execute_query("db", "t_rows", &format!("  {} ;", SQL))?;
    assert_eq!(replayed.rows(), recorded.rows());
    assert_eq!(replayed.rows()[0][1], None);
    assert_eq!(replayed.rows()[0][2], Some(String::new()));
    let types: Vec<JdbcType> = replayed.columns().iter().map(|c| c.jdbc_type).collect();
    assert_eq!(
        types,
        vec![
            JdbcType::Integer,
            JdbcType::Varchar,
            JdbcType::Varchar,
            JdbcType::Varchar
        ]
    );
    Ok(())
}

#[test]
fn test_play_unknown_query() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = create_temp_dir()?;
    let fixture_path = write_file(
        temp_dir.path(),
        "fixtures.txt",
        "# StartTest: one\n!use db\nselect 1;\nX:INTEGER\n1\n!ok\n# EndTest: one\n",
    );
    let mut player = Recorder::builder()
        .mode(RecorderMode::Play)
        .file(&fixture_path)
        .build()?;

    let result = player.execute_query("db", "one", "select 1")?;
    assert_eq!(result.rows(), &[vec![Some("1".to_string())]]);

    let err = player.execute_query("db", "two", "select 2").unwrap_err();
    assert!(matches!(err, SqidemError::FixtureNotFound { .. }));
    let err = player.execute_query("other", "one", "select 1").unwrap_err();
    assert!(matches!(err, SqidemError::FixtureNotFound { .. }));
    Ok(())
}

#[test]
fn test_malformed_fixture_names_the_line() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = create_temp_dir()?;
    let fixture_path = write_file(
        temp_dir.path(),
        "fixtures.txt",
        "# StartTest: one\n!use db\nselect 1;\nX:NOSUCHTYPE\n!ok\n# EndTest: one\n",
    );
    let err = Recorder::builder()
        .mode(RecorderMode::Play)
        .file(&fixture_path)
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SqidemError::Fixture { line: 4, .. }));
    Ok(())
}
