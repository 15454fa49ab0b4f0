use std::io::{self, Read};
use std::sync::Arc;

use camino::Utf8PathBuf;
use object_store::memory::InMemory;

use icon_mirror::s3::ObjectStorage;
use icon_mirror::store::{LocalStore, Storage, read_bytes, write_bytes};

fn local_store() -> (tempfile::TempDir, LocalStore) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("root")).unwrap();
    let store = LocalStore::new(root).unwrap();
    (temp, store)
}

fn memory_store() -> ObjectStorage {
    ObjectStorage::with_store("test-bucket".to_string(), Arc::new(InMemory::new())).unwrap()
}

fn exercise(store: &dyn Storage) {
    assert!(!store.exists("icon-d2/20240101/00/t_2m/a.grib2").unwrap());

    let chunks: Vec<io::Result<Vec<u8>>> =
        vec![Ok(b"GRIB".to_vec()), Ok(Vec::new()), Ok(b"7777".to_vec())];
    let mut chunks = chunks.into_iter();
    store
        .write_stream("icon-d2/20240101/00/t_2m/a.grib2", &mut chunks)
        .unwrap();
    write_bytes(store, "icon-d2/20240101/00/t_2m/a.grib2.json", b"{}").unwrap();
    write_bytes(store, "icon-d2/metadata.json", b"{}").unwrap();
    write_bytes(store, "icon-eu/metadata.json", b"{}").unwrap();

    assert!(store.exists("icon-d2/20240101/00/t_2m/a.grib2").unwrap());
    assert_eq!(
        read_bytes(store, "icon-d2/20240101/00/t_2m/a.grib2").unwrap(),
        b"GRIB7777".to_vec()
    );
    assert_eq!(
        store.list("icon-d2/20240101/").unwrap(),
        vec![
            "icon-d2/20240101/00/t_2m/a.grib2".to_string(),
            "icon-d2/20240101/00/t_2m/a.grib2.json".to_string(),
        ]
    );
    assert_eq!(store.list("icon-").unwrap().len(), 4);
    assert_eq!(
        store.list("icon-d2/meta").unwrap(),
        vec!["icon-d2/metadata.json".to_string()]
    );
}

fn failing_stream(store: &dyn Storage) {
    let chunks: Vec<io::Result<Vec<u8>>> = vec![
        Ok(b"partial".to_vec()),
        Err(io::Error::other("upstream reset")),
    ];
    let mut chunks = chunks.into_iter();
    assert!(store.write_stream("ds/broken.bin", &mut chunks).is_err());
    assert!(!store.exists("ds/broken.bin").unwrap());
}

#[test]
fn local_store_round_trip() {
    let (_temp, store) = local_store();
    exercise(&store);
}

#[test]
fn local_store_failed_stream_leaves_nothing() {
    let (_temp, store) = local_store();
    failing_stream(&store);
    assert!(store.list("ds/").unwrap().is_empty());
}

#[test]
fn local_store_creates_nested_directories() {
    let (_temp, store) = local_store();
    write_bytes(&store, "a/b/c/d.bin", b"x").unwrap();
    assert!(store.root().join("a/b/c/d.bin").as_std_path().is_file());
}

#[test]
fn local_store_open_missing_key_fails() {
    let (_temp, store) = local_store();
    assert!(store.open_read("nope.bin").is_err());
}

#[test]
fn object_storage_round_trip() {
    let store = memory_store();
    exercise(&store);
    assert_eq!(store.describe(), "s3://test-bucket");
}

#[test]
fn object_storage_failed_stream_leaves_nothing() {
    let store = memory_store();
    failing_stream(&store);
}

#[test]
fn object_storage_reads_in_pieces() {
    let store = memory_store();
    let payload = (0..=255u8).cycle().take(10_000).collect::<Vec<_>>();
    write_bytes(&store, "ds/blob", &payload).unwrap();

    let mut reader = store.open_read("ds/blob").unwrap();
    let mut buf = [0u8; 333];
    let mut collected = Vec::new();
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    assert_eq!(collected, payload);
}
