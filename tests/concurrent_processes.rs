// Separate processes writing disjoint keys to one state file

use assert_fs::prelude::*;
use std::process::Command;

use bedtime_shield::store::{FileStore, KeyValueStore};

const WRITER_PATH_ENV: &str = "BEDTIME_SHIELD_TEST_WRITER_PATH";
const WRITER_PREFIX_ENV: &str = "BEDTIME_SHIELD_TEST_WRITER_PREFIX";
const WRITES: usize = 100;

/// Body of a child writer process; a no-op in a normal test run
#[test]
fn writer_process() {
    let (Ok(path), Ok(prefix)) = (
        std::env::var(WRITER_PATH_ENV),
        std::env::var(WRITER_PREFIX_ENV),
    ) else {
        return;
    };

    let store = FileStore::new(path);
    for i in 0..WRITES {
        store.set(&format!("{}.{}", prefix, i), "x").unwrap();
    }
}

#[test]
fn processes_keep_each_others_keys() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    let exe = std::env::current_exe().unwrap();

    let children: Vec<_> = ["unlock", "clock"]
        .into_iter()
        .map(|prefix| {
            Command::new(&exe)
                .args(["writer_process", "--exact", "--test-threads=1"])
                .env(WRITER_PATH_ENV, state.path())
                .env(WRITER_PREFIX_ENV, prefix)
                .spawn()
                .unwrap()
        })
        .collect();

    for mut child in children {
        assert!(child.wait().unwrap().success());
    }

    let store = FileStore::new(state.path());
    let mut lost = Vec::new();
    for prefix in ["unlock", "clock"] {
        for i in 0..WRITES {
            let key = format!("{}.{}", prefix, i);
            if store.get(&key).unwrap().is_none() {
                lost.push(key);
            }
        }
    }
    assert!(lost.is_empty(), "lost {} keys: {:?}", lost.len(), lost);
}
