//! Test helpers for sqidem integration tests
//!
//! This module provides sample data files and small constructors for
//! engines backed by the in-memory database.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use sqidem::config::RunConfig;
use sqidem::engine::Engine;
use sqidem::env::Env;
use sqidem::memdb::{DatabaseSpec, MemoryConnectionFactory};
use tempfile::TempDir;

pub const DEPT_CSV: &str = "deptno,dname\n10,ACCOUNTING\n20,RESEARCH\n30,SALES\n";

pub const EMP_CSV: &str = "empno,ename,deptno\n\
1,SMITH,20\n\
2,ALLEN,30\n\
3,WARD,30\n\
4,JONES,20\n\
5,MARTIN,30\n\
6,BLAKE,\n";

/// Create a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir, Box<dyn std::error::Error>> {
    Ok(TempDir::new()?)
}

/// Write `content` to `name` inside `dir`
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Write dept.csv and emp.csv and declare them as database `scott`
pub fn scott_spec(dir: &Path, reference: bool) -> DatabaseSpec {
    let dept = write_file(dir, "dept.csv", DEPT_CSV);
    let emp = write_file(dir, "emp.csv", EMP_CSV);
    DatabaseSpec::new("scott")
        .with_table(&format!("dept={}", dept.display()))
        .with_table(&format!("emp={}", emp.display()))
        .with_reference(reference)
}

/// An engine serving database `scott`
pub fn scott_engine(dir: &Path, reference: bool) -> Engine {
    let factory = MemoryConnectionFactory::new().with_database(scott_spec(dir, reference));
    Engine::new(RunConfig::default()).with_connection_factory(Box::new(factory))
}

/// An engine serving database `scott` with caller variables
pub fn scott_engine_with_env(dir: &Path, env: Env) -> Engine {
    scott_engine(dir, false).with_env(env)
}

/// Join lines into script text, one trailing newline per line
pub fn script(lines: &[&str]) -> String {
    lines.iter().map(|line| format!("{}\n", line)).collect()
}
