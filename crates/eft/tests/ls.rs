//! Integration tests for listing trees

mod common;

use eft::item::ItemInfo;

#[test]
fn test_ls_empty() {
    let (store, _temp) = common::setup_test_env();
    assert!(store.list().unwrap().is_empty());
    assert!(store.snapshots().unwrap().is_empty());
}

#[test]
fn test_ls_sorted_by_path() {
    let (store, _temp) = common::setup_test_env();
    for path in ["/zeta", "/alpha/b", "/alpha", "/m.txt"] {
        common::put_bytes(&store, path, path.as_bytes());
    }
    let paths: Vec<String> = store.list().unwrap().into_iter().map(|i| i.path).collect();
    assert_eq!(paths, vec!["/alpha", "/alpha/b", "/m.txt", "/zeta"]);
}

#[test]
fn test_ls_other_snapshot() {
    let (store, _temp) = common::setup_test_env();
    common::put_bytes(&store, "/kept", b"1");
    let old = store.snapshot("main").unwrap().unwrap();
    store
        .transact(|tx| tx.set_root("before-edit", old))
        .unwrap();
    common::put_bytes(&store, "/added", b"2");

    let old_paths: Vec<String> = store.list_root(&old).unwrap().into_iter().map(|i| i.path).collect();
    assert_eq!(old_paths, vec!["/kept"]);
    assert_eq!(store.list().unwrap().len(), 2);
    assert_eq!(
        store.snapshots().unwrap().keys().cloned().collect::<Vec<_>>(),
        vec!["before-edit", "main"]
    );
}

#[test]
fn test_ls_in_transaction() {
    let (store, _temp) = common::setup_test_env();
    store
        .transact(|tx| {
            tx.put(&ItemInfo::file("/a", 1), &b"a"[..])?;
            tx.put(&ItemInfo::file("/b", 1), &b"b"[..])?;
            assert_eq!(tx.list()?.len(), 2);
            assert_eq!(tx.info("/b")?.size, 1);
            Ok(())
        })
        .unwrap();
    assert_eq!(store.list().unwrap().len(), 2);
}
