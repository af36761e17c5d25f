//! Exercises a real mount end to end: a throwaway SQLite metadata database,
//! a stub object store, and a temporary mountpoint. Needs `/dev/fuse`
//! access (the `fuse` group, or root) and is skipped otherwise, the way a
//! CI runner without that capability would need to skip it too.
mod support;

use std::path::Path;

use g8ufs::engine::Options;

fn fuse_available() -> bool {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/fuse")
        .is_ok()
}

fn options(backend: &Path) -> Options {
    use clap::Parser;
    Options::parse_from(["g8ufs", "--backend", backend.to_str().unwrap(), "--read-only"])
}

#[tokio::test]
async fn reads_file_content_and_lists_directory() {
    if !fuse_available() {
        eprintln!("skipping: /dev/fuse not accessible in this environment");
        return;
    }

    let plaintext = b"hello from a lazily fetched block store".repeat(10);
    let file = support::make_file(&plaintext, 4096);

    let mut tree = support::TreeBuilder::new();
    tree.add_file("", "greeting.txt", &file);
    let sub = tree.add_dir("", "sub");
    tree.add_symlink(&sub, "link", "../greeting.txt");

    let (_meta_dir, meta_path) = support::build_sqlite_store(&tree);

    let store_addr = support::spawn_block_store(file.store_entries.clone()).await;
    let router_yaml = support::router_yaml_for(store_addr);

    let work_dir = tempfile::tempdir().unwrap();
    let router_path = work_dir.path().join("router.yaml");
    std::fs::write(&router_path, router_yaml).unwrap();

    let backend = work_dir.path().join("backend");
    let mountpoint = work_dir.path().join("mnt");
    std::fs::create_dir_all(&mountpoint).unwrap();

    let mut opts = options(&backend);
    opts.local_router = Some(router_path);

    let fs = g8ufs::mount(&meta_path, &mountpoint, opts)
        .await
        .expect("mount");

    let content = tokio::fs::read(mountpoint.join("greeting.txt")).await.unwrap();
    assert_eq!(content, plaintext);

    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&mountpoint).await.unwrap();
    while let Some(entry) = read_dir.next_entry().await.unwrap() {
        entries.push(entry.file_name().to_string_lossy().to_string());
    }
    entries.sort();
    assert_eq!(entries, vec!["greeting.txt", "sub"]);

    let target = tokio::fs::read_link(mountpoint.join("sub/link")).await.unwrap();
    assert_eq!(target, Path::new("../greeting.txt"));

    fs.unmount().unwrap();
}

#[tokio::test]
async fn read_only_mount_rejects_writes() {
    if !fuse_available() {
        eprintln!("skipping: /dev/fuse not accessible in this environment");
        return;
    }

    let file = support::make_file(b"immutable", 4096);
    let mut tree = support::TreeBuilder::new();
    tree.add_file("", "only.txt", &file);
    let (_meta_dir, meta_path) = support::build_sqlite_store(&tree);

    let store_addr = support::spawn_block_store(file.store_entries.clone()).await;
    let work_dir = tempfile::tempdir().unwrap();
    let router_path = work_dir.path().join("router.yaml");
    std::fs::write(&router_path, support::router_yaml_for(store_addr)).unwrap();

    let backend = work_dir.path().join("backend");
    let mountpoint = work_dir.path().join("mnt");
    std::fs::create_dir_all(&mountpoint).unwrap();

    let mut opts = options(&backend);
    opts.local_router = Some(router_path);

    let fs = g8ufs::mount(&meta_path, &mountpoint, opts)
        .await
        .expect("mount");

    let result = tokio::fs::write(mountpoint.join("new_file"), b"nope").await;
    assert!(result.is_err());

    fs.unmount().unwrap();
}
