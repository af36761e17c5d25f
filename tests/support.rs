//! Fixtures shared by the mount integration tests: a throwaway SQLite
//! metadata database and a minimal RESP2 object-store stand-in, since
//! `g8ufs::storage::Client` only speaks to a real `redis`-protocol server.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use g8ufs::testutil::{encode_dir, ChildSpec};
use g8ufs::utils::blake2b128;
use rusqlite::Connection;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One file's plaintext content plus the block metadata a `Dir` record
/// needs to reference it, and the store key/value pair to seed the object
/// store with.
pub struct FileFixture {
    pub size: u64,
    pub block_size: u32,
    pub blocks: Vec<(Vec<u8>, Vec<u8>)>,
    pub store_entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Build the on-the-wire representation of one block: compressed and
/// encrypted the same way [`g8ufs::pipeline`] expects to undo it, keyed by
/// `blake2b128(plaintext)` (both the cipher key and the integrity hash).
pub fn seal_block(plaintext: &[u8]) -> (Vec<u8> /* storage_key */, Vec<u8> /* cipher_key */, Vec<u8> /* stored blob */) {
    let cipher_key = blake2b128(plaintext).to_vec();
    let mut encoder = snap::raw::Encoder::new();
    let compressed = encoder.compress_vec(plaintext).expect("snappy compress");
    let blob = xxtea::encrypt(&compressed, &cipher_key);
    // The storage key just needs to be unique; reuse the cipher key's hex
    // encoding so fixtures don't need a separate counter.
    let storage_key = cipher_key.clone();
    (storage_key, cipher_key, blob)
}

/// Split `plaintext` into `block_size`-sized chunks, seal each, and return
/// the block refs plus the store entries (key = hex(storage_key)) a stub
/// object store should be seeded with.
pub fn make_file(plaintext: &[u8], block_size: u32) -> FileFixture {
    let mut blocks = Vec::new();
    let mut store_entries = Vec::new();
    for chunk in plaintext.chunks(block_size as usize) {
        let (storage_key, cipher_key, blob) = seal_block(chunk);
        // The router looks blocks up by the hex encoding of the storage
        // key, not the raw bytes (see `pipeline::fetch_block`).
        store_entries.push((hex::encode(&storage_key).into_bytes(), blob));
        blocks.push((storage_key, cipher_key));
    }
    FileFixture {
        size: plaintext.len() as u64,
        block_size,
        blocks,
        store_entries,
    }
}

/// A directory tree to encode into a fresh SQLite metadata database:
/// `dirs` maps a directory's path (`""` for root) to its children.
pub struct TreeBuilder {
    dirs: HashMap<String, Vec<ChildSpec>>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            dirs: HashMap::from([(String::new(), Vec::new())]),
        }
    }

    /// Add a subdirectory named `name` under `parent` (`""` for root),
    /// itself initially empty, and return its full path.
    pub fn add_dir(&mut self, parent: &str, name: &str) -> String {
        let path = join(parent, name);
        let key = dir_key(&path);
        self.dirs
            .entry(parent.to_string())
            .or_default()
            .push(ChildSpec::SubDir {
                name: name.to_string(),
                key,
            });
        self.dirs.entry(path.clone()).or_default();
        path
    }

    pub fn add_file(&mut self, parent: &str, name: &str, file: &FileFixture) {
        self.dirs
            .entry(parent.to_string())
            .or_default()
            .push(ChildSpec::File {
                name: name.to_string(),
                size: file.size,
                block_size_bytes: file.block_size,
                blocks: file.blocks.clone(),
            });
    }

    pub fn add_symlink(&mut self, parent: &str, name: &str, target: &str) {
        self.dirs
            .entry(parent.to_string())
            .or_default()
            .push(ChildSpec::Link {
                name: name.to_string(),
                target: target.to_string(),
                size: target.len() as u64,
            });
    }

    /// Write every directory record into a fresh SQLite database at
    /// `path`, keyed the way [`g8ufs::meta::SqliteStore`] expects: a
    /// directory's key is `blake2b128_hex` of its own path.
    pub fn write(&self, path: &Path) {
        let conn = Connection::open(path).expect("open fixture db");
        conn.execute(
            "CREATE TABLE entries (key TEXT PRIMARY KEY, value BLOB NOT NULL)",
            [],
        )
        .expect("create entries table");
        for (dir_path, children) in &self.dirs {
            let name = dir_path.rsplit('/').next().unwrap_or_default();
            let bytes = encode_dir(name, children);
            conn.execute(
                "INSERT INTO entries (key, value) VALUES (?1, ?2)",
                rusqlite::params![dir_key(dir_path), bytes],
            )
            .expect("insert dir record");
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn dir_key(path: &str) -> String {
    hex::encode(blake2b128(path.as_bytes()))
}

/// Build a metadata database under a fresh temp dir and return its path.
pub fn build_sqlite_store(tree: &TreeBuilder) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("meta.db");
    tree.write(&db_path);
    (dir, db_path)
}

/// Spawn a minimal RESP2 object store backed by `entries`, speaking just
/// enough of the protocol for `g8ufs::storage::Client` (`GET`/`SET`/`PING`).
pub async fn spawn_block_store(entries: Vec<(Vec<u8>, Vec<u8>)>) -> SocketAddr {
    let store: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>> =
        Arc::new(Mutex::new(entries.into_iter().collect()));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub store");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let store = store.clone();
            tokio::spawn(serve_connection(socket, store));
        }
    });

    addr
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    store: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return,
        };
        buf.extend_from_slice(&chunk[..n]);

        while let Some((command, consumed)) = parse_command(&buf) {
            buf.drain(..consumed);
            let reply = handle_command(&command, &store);
            if socket.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

/// Parse one RESP array-of-bulk-strings command from the front of `buf`.
/// Returns the parsed arguments and how many bytes were consumed, or
/// `None` if `buf` doesn't yet hold a full command.
fn parse_command(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let mut pos = 0;
    if buf.first() != Some(&b'*') {
        return None;
    }
    let (count, next) = read_line(buf, pos + 1)?;
    pos = next;
    let count: usize = std::str::from_utf8(count).ok()?.parse().ok()?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.get(pos) != Some(&b'$') {
            return None;
        }
        let (len_bytes, next) = read_line(buf, pos + 1)?;
        pos = next;
        let len: usize = std::str::from_utf8(len_bytes).ok()?.parse().ok()?;
        if buf.len() < pos + len + 2 {
            return None;
        }
        args.push(buf[pos..pos + len].to_vec());
        pos += len + 2;
    }
    Some((args, pos))
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], start + idx + 2))
}

fn handle_command(args: &[Vec<u8>], store: &Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>) -> Vec<u8> {
    let Some(cmd) = args.first() else {
        return b"-ERR empty command\r\n".to_vec();
    };
    let cmd = String::from_utf8_lossy(cmd).to_ascii_uppercase();
    match cmd.as_str() {
        "PING" => b"+PONG\r\n".to_vec(),
        "GET" => {
            let key = args.get(1).cloned().unwrap_or_default();
            match store.lock().unwrap().get(&key) {
                Some(value) => bulk_string(value),
                None => b"$-1\r\n".to_vec(),
            }
        }
        "SET" => {
            let key = args.get(1).cloned().unwrap_or_default();
            let value = args.get(2).cloned().unwrap_or_default();
            store.lock().unwrap().insert(key, value);
            b"+OK\r\n".to_vec()
        }
        _ => b"-ERR unknown command\r\n".to_vec(),
    }
}

fn bulk_string(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// A `router.yaml` with a single pool covering the whole key space, pointed
/// at a stub object store.
pub fn router_yaml_for(addr: SocketAddr) -> String {
    format!(
        "pools:\n  local:\n    \"00:FF\": \"redis://{}:{}\"\nlookup: [local]\n",
        addr.ip(),
        addr.port()
    )
}
