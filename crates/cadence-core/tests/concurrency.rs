//! Concurrency tests: key allocation and rank computation under
//! contention, against an on-disk store shared by multiple connections.

use std::collections::HashSet;
use std::thread;

use cadence_core::db::{open_store, query};
use cadence_core::lifecycle::{self, CreateItem, CreateProject, MoveTo};
use cadence_core::model::Status;

const WRITERS: usize = 4;
const ITEMS_PER_WRITER: usize = 10;

#[test]
fn concurrent_creates_yield_distinct_contiguous_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cadence.sqlite3");

    let project = {
        let mut conn = open_store(&path).expect("open store");
        lifecycle::create_project(
            &mut conn,
            &CreateProject {
                key_prefix: "PROJ".to_string(),
                name: "Project".to_string(),
            },
        )
        .expect("create project")
    };

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let path = path.clone();
            let project_id = project.id.clone();
            thread::spawn(move || {
                let mut conn = open_store(&path).expect("open store in writer");
                let mut keys = Vec::new();
                for i in 0..ITEMS_PER_WRITER {
                    let item = lifecycle::create_item(
                        &mut conn,
                        &CreateItem {
                            project_id: project_id.clone(),
                            title: format!("writer {writer} item {i}"),
                            ..CreateItem::default()
                        },
                        "writer",
                    )
                    .expect("create under contention");
                    keys.push(item.key);
                }
                keys
            })
        })
        .collect();

    let mut all_keys = Vec::new();
    for handle in handles {
        all_keys.extend(handle.join().expect("writer thread"));
    }

    let total = WRITERS * ITEMS_PER_WRITER;
    assert_eq!(all_keys.len(), total);

    let distinct: HashSet<&String> = all_keys.iter().collect();
    assert_eq!(distinct.len(), total, "duplicate keys under contention");

    // No aborts happened, so the numbers are contiguous from 1.
    let mut numbers: Vec<u64> = all_keys
        .iter()
        .map(|key| {
            key.strip_prefix("PROJ-")
                .expect("key prefix")
                .parse()
                .expect("numeric suffix")
        })
        .collect();
    numbers.sort_unstable();
    let expected: Vec<u64> = (1..=total as u64).collect();
    assert_eq!(numbers, expected);
}

#[test]
fn concurrent_moves_keep_ranks_distinct() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cadence.sqlite3");

    let (project, item_ids) = {
        let mut conn = open_store(&path).expect("open store");
        let project = lifecycle::create_project(
            &mut conn,
            &CreateProject {
                key_prefix: "PROJ".to_string(),
                name: "Project".to_string(),
            },
        )
        .expect("create project");

        let ids: Vec<String> = (0..WRITERS * 2)
            .map(|i| {
                lifecycle::create_item(
                    &mut conn,
                    &CreateItem {
                        project_id: project.id.clone(),
                        title: format!("item {i}"),
                        ..CreateItem::default()
                    },
                    "setup",
                )
                .expect("create item")
                .id
            })
            .collect();
        (project, ids)
    };

    // Every writer shuffles its two items to the front of the todo column.
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let path = path.clone();
            let ids = vec![
                item_ids[writer * 2].clone(),
                item_ids[writer * 2 + 1].clone(),
            ];
            thread::spawn(move || {
                let mut conn = open_store(&path).expect("open store in writer");
                for id in &ids {
                    lifecycle::move_item(&mut conn, id, &MoveTo::end_of(Status::Todo), "writer")
                        .expect("move under contention");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("mover thread");
    }

    let conn = open_store(&path).expect("open store for verification");
    let ranks = query::column_ranks(&conn, &project.id, Status::Todo).expect("ranks");
    assert_eq!(ranks.len(), WRITERS * 2);

    let distinct: HashSet<&str> = ranks.iter().map(|(_, rank)| rank.as_str()).collect();
    assert_eq!(distinct.len(), ranks.len(), "duplicate ranks under contention");
}
