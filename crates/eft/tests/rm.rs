//! Integration tests for removing items

mod common;

use eft::item::ItemType;

#[test]
fn test_rm() {
    let (store, _temp) = common::setup_test_env();
    common::put_bytes(&store, "/file1.txt", b"data1");
    common::put_bytes(&store, "/file2.txt", b"data2");
    assert_eq!(store.list().unwrap().len(), 2);

    let removed = store.del("/file1.txt").unwrap();
    assert_eq!(removed.path, "/file1.txt");
    assert_eq!(removed.size, 5);

    let items = store.list().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].path, "/file2.txt");
    assert!(store.get("/file1.txt", &mut Vec::new()).unwrap_err().is_not_found());
}

#[test]
fn test_rm_hi_makes_its_block_dead() {
    let (store, _temp) = common::setup_test_env();
    common::put_bytes(&store, "/hi.txt", b"hai there");
    common::put_bytes(&store, "/big.bin", &vec![0u8; 10 * 1024 * 1024]);
    let hi = common::item_hash(&store, "/hi.txt");
    let info = store.info("/hi.txt").unwrap();
    assert_eq!(info.size, 9);
    assert_eq!(info.item_type, ItemType::File);
    assert_eq!(common::cat(&store, "/hi.txt"), b"hai there");

    store.del("/hi.txt").unwrap();
    assert!(store.get("/hi.txt", &mut Vec::new()).unwrap_err().is_not_found());

    let report = common::assert_gc_exact(&store);
    assert!(report.dead.contains(&hi));
    let checkpoint = store.checkpoint().unwrap();
    assert!(checkpoint.dead().unwrap().contains(&hi));
    assert!(!checkpoint.added().unwrap().contains(&hi));

    assert_eq!(common::cat(&store, "/big.bin"), vec![0u8; 10 * 1024 * 1024]);
}

#[test]
fn test_rm_missing() {
    let (store, _temp) = common::setup_test_env();
    // no tree at all yet
    assert!(store.del("/nothing").unwrap_err().is_not_found());

    common::put_bytes(&store, "/something", b"x");
    let before = store.snapshot("main").unwrap();
    assert!(store.del("/nothing").unwrap_err().is_not_found());
    // the failed delete changed nothing
    assert_eq!(store.snapshot("main").unwrap(), before);
}

#[test]
fn test_rm_last_item_leaves_empty_tree() {
    let (store, _temp) = common::setup_test_env();
    common::put_bytes(&store, "/only", b"x");
    store.del("/only").unwrap();
    assert!(store.list().unwrap().is_empty());
    common::put_bytes(&store, "/again", b"y");
    assert_eq!(common::cat(&store, "/again"), b"y");
}

#[test]
fn test_rm_many() {
    let (store, _temp) = common::setup_test_env();
    let paths: Vec<String> = (0..300).map(|i| format!("/dir/file-{:03}", i)).collect();
    store
        .transact(|tx| {
            for path in &paths {
                tx.put(&eft::item::ItemInfo::file(path.as_str(), 3), &b"abc"[..])?;
            }
            Ok(())
        })
        .unwrap();
    store
        .transact(|tx| {
            for path in paths.iter().step_by(2) {
                tx.del(path)?;
            }
            Ok(())
        })
        .unwrap();

    let left: Vec<String> = store.list().unwrap().into_iter().map(|i| i.path).collect();
    let expected: Vec<String> = paths.iter().skip(1).step_by(2).cloned().collect();
    assert_eq!(left, expected);
    common::assert_gc_exact(&store);
}
