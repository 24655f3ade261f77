mod support;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::{Map, Value};
use taskdesk::config::Config;
use taskdesk::storage::Storage;
use taskdesk::store::{DocumentStore, LocalStore, Query};

use support::TestEnv;

const WRITERS: usize = 4;
const WRITES_PER_WRITER: usize = 15;

fn open_store(root: &std::path::Path) -> LocalStore {
    let config = Config::default();
    let storage = Storage::for_root(root.to_path_buf(), &config);
    LocalStore::open(storage, &config.store).expect("open store")
}

#[test]
fn independent_store_handles_do_not_lose_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let root = dir.path().to_path_buf();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Each handle has its own in-memory state, like a separate process.
                let store = open_store(&root);
                barrier.wait();
                for n in 0..WRITES_PER_WRITER {
                    let mut fields = Map::new();
                    fields.insert("title".to_string(), Value::String(format!("w{writer}-{n}")));
                    store.add_document("tasks", fields).expect("add");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let docs = open_store(dir.path())
        .query(&Query::collection("tasks"))
        .expect("query");
    assert_eq!(docs.len(), WRITERS * WRITES_PER_WRITER);
    let titles: HashSet<String> = docs
        .iter()
        .filter_map(|doc| doc.get_str("title").map(str::to_string))
        .collect();
    assert_eq!(titles.len(), WRITERS * WRITES_PER_WRITER);
}

#[test]
fn concurrent_cli_creates_are_all_persisted() {
    let env = TestEnv::new();
    env.signup("alice@example.com", "user");

    let handles: Vec<_> = (0..WRITERS)
        .map(|n| {
            let mut cmd = env.cmd();
            cmd.args(["task", "new", &format!("parallel {n}"), "-d", "race"]);
            thread::spawn(move || {
                cmd.assert().success();
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("cli thread");
    }

    let value = env.json(&["task", "list"]);
    assert_eq!(value["data"]["total"], WRITERS);
}
