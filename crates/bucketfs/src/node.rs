use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::Session;

/// Type bits of [`Meta::mode`], per POSIX.
pub const S_IFMT: u32 = libc::S_IFMT as u32;
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
pub const S_IFREG: u32 = libc::S_IFREG as u32;
pub const S_IFLNK: u32 = libc::S_IFLNK as u32;

/// Key-derivation context for the password-derived root key.
const ROOT_KEY_CONTEXT: &str = "bucketfs 2025-06-14 root key";

/// Bucket-side name of a stored blob.
///
/// Three flavors share this type: the password-derived root key (32 hex
/// chars), the UUIDv4 assigned to nodes at creation, and the SHA-256
/// content keys of extents (64 hex chars). All are ASCII and at least 16
/// bytes long, which the cipher relies on for IV derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Root key for a password. Stable per password, so each password
    /// owns its own filesystem namespace in the bucket.
    pub fn root(password: &str) -> Self {
        let digest = blake3::derive_key(ROOT_KEY_CONTEXT, password.as_bytes());
        ObjectKey(hex::encode(&digest[..16]))
    }

    /// Fresh key for a newly created node.
    pub fn generate() -> Self {
        ObjectKey(Uuid::new_v4().to_string())
    }

    /// Content key of an extent body.
    pub fn content(body: &[u8]) -> Self {
        ObjectKey(hex::encode(Sha256::digest(body)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable inode number for kernel-facing listings.
    pub fn inode(&self) -> u64 {
        let hash = blake3::hash(self.0.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(word)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ObjectKey {
    fn from(s: String) -> Self {
        ObjectKey(s)
    }
}

impl From<&str> for ObjectKey {
    fn from(s: &str) -> Self {
        ObjectKey(s.to_string())
    }
}

/// Identity of the kernel caller, carried into node creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerContext {
    pub uid: u32,
    pub gid: u32,
}

/// Metadata embedded in every node. `mode` carries the node type in its
/// top bits and the POSIX permissions in its low bits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub size: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

impl Meta {
    pub fn new(mode: u32, ctx: &CallerContext) -> Self {
        let now = Utc::now();
        Self {
            size: 0,
            mode,
            uid: ctx.uid,
            gid: ctx.gid,
            atime: now,
            ctime: now,
            mtime: now,
        }
    }

    pub fn kind(&self) -> Result<NodeKind> {
        match self.mode & S_IFMT {
            S_IFDIR => Ok(NodeKind::Directory),
            S_IFREG => Ok(NodeKind::File),
            S_IFLNK => Ok(NodeKind::SymLink),
            _ => Err(Error::UnknownNodeKind { mode: self.mode }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
    SymLink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directory {
    pub key: ObjectKey,
    pub parent: ObjectKey,
    pub meta: Meta,
    pub children: HashMap<String, ObjectKey>,
}

impl Directory {
    pub async fn save(&self, sess: &Session) -> Result<()> {
        sess.store(&self.key, &serde_json::to_vec(self)?).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub key: ObjectKey,
    pub parent: ObjectKey,
    pub meta: Meta,
    /// Bytes per extent; chosen from config at creation and never
    /// changed afterwards.
    pub extent_size: i64,
    /// Sparse map from extent index to extent. A missing index inside
    /// the file's logical range is a hole and reads as zeros.
    #[serde(default)]
    pub extent: HashMap<i64, Extent>,
}

/// One fixed-size slice of file content, stored under its content hash.
/// Identical bodies collapse to a single blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extent {
    pub key: ObjectKey,
    /// In-memory body; empty until a fill or a write populates it.
    #[serde(skip)]
    pub body: Vec<u8>,
    #[serde(skip)]
    pub dirty: bool,
}

impl Extent {
    /// A zero-filled extent of the given size, keyed by its content.
    pub fn zeroed(size: i64) -> Self {
        let body = vec![0u8; size as usize];
        Extent {
            key: ObjectKey::content(&body),
            body,
            dirty: false,
        }
    }

    /// Recompute the content key from the current body.
    pub fn rekey(&mut self) {
        self.key = ObjectKey::content(&self.body);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymLink {
    pub key: ObjectKey,
    pub parent: ObjectKey,
    pub meta: Meta,
    pub link_to: String,
}

impl SymLink {
    pub async fn save(&self, sess: &Session) -> Result<()> {
        sess.store(&self.key, &serde_json::to_vec(self)?).await
    }
}

/// A typed node, discriminated by the `S_IFMT` bits of its mode.
#[derive(Debug, Clone)]
pub enum Node {
    Directory(Directory),
    File(File),
    SymLink(SymLink),
}

impl Node {
    pub fn key(&self) -> &ObjectKey {
        match self {
            Node::Directory(d) => &d.key,
            Node::File(f) => &f.key,
            Node::SymLink(l) => &l.key,
        }
    }

    pub fn meta(&self) -> &Meta {
        match self {
            Node::Directory(d) => &d.meta,
            Node::File(f) => &f.meta,
            Node::SymLink(l) => &l.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut Meta {
        match self {
            Node::Directory(d) => &mut d.meta,
            Node::File(f) => &mut f.meta,
            Node::SymLink(l) => &mut l.meta,
        }
    }

    pub async fn save(&mut self, sess: &Session) -> Result<()> {
        match self {
            Node::Directory(d) => d.save(sess).await,
            Node::File(f) => f.save(sess).await,
            Node::SymLink(l) => l.save(sess).await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_root_key_is_stable_and_hex() {
        let a = ObjectKey::root("hunter2");
        let b = ObjectKey::root("hunter2");
        let c = ObjectKey::root("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_key_matches_sha256() {
        let key = ObjectKey::content(b"hello world");
        assert_eq!(
            key.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_generated_keys_are_long_enough_for_iv() {
        for key in [ObjectKey::generate(), ObjectKey::root("p"), ObjectKey::content(b"")] {
            assert!(key.as_str().len() >= 16);
        }
    }

    #[test]
    fn test_meta_kind_from_mode() {
        let ctx = CallerContext::default();
        assert_eq!(
            Meta::new(S_IFDIR | 0o755, &ctx).kind().unwrap(),
            NodeKind::Directory
        );
        assert_eq!(
            Meta::new(S_IFREG | 0o644, &ctx).kind().unwrap(),
            NodeKind::File
        );
        assert_eq!(
            Meta::new(S_IFLNK | 0o777, &ctx).kind().unwrap(),
            NodeKind::SymLink
        );
        assert!(Meta::new(0o644, &ctx).kind().is_err());
    }

    #[test]
    fn test_file_json_shape() {
        let ctx = CallerContext { uid: 1000, gid: 1000 };
        let mut file = File {
            key: ObjectKey::from("2b5e7f1c-9f63-4a56-a1ec-6e4bdbabc9ea"),
            parent: ObjectKey::from("parent-key-0000-0000-000000000000"),
            meta: Meta::new(S_IFREG | 0o644, &ctx),
            extent_size: 65536,
            extent: HashMap::new(),
        };
        file.meta.size = 5;
        let mut extent = Extent::zeroed(65536);
        extent.body[..5].copy_from_slice(b"hello");
        extent.rekey();
        file.extent.insert(0, extent);

        let value: serde_json::Value = serde_json::from_slice(&serde_json::to_vec(&file).unwrap()).unwrap();
        assert_eq!(value["meta"]["size"], 5);
        assert_eq!(value["meta"]["mode"], S_IFREG | 0o644);
        assert_eq!(value["extent_size"], 65536);
        // extent indices serialize as decimal strings; bodies stay out of
        // the document
        let entry = &value["extent"]["0"];
        assert!(entry["key"].is_string());
        assert!(entry.get("body").is_none());
        assert!(value["meta"]["mtime"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_node_json_ignores_unknown_fields() {
        let json = r#"{
            "key": "2b5e7f1c-9f63-4a56-a1ec-6e4bdbabc9ea",
            "parent": "2b5e7f1c-9f63-4a56-a1ec-6e4bdbabc9ea",
            "meta": {
                "size": 0, "mode": 16877, "uid": 0, "gid": 0,
                "atime": "2025-06-14T12:00:00.000000001Z",
                "ctime": "2025-06-14T12:00:00.000000001Z",
                "mtime": "2025-06-14T12:00:00.000000001Z"
            },
            "children": {},
            "some_future_field": 42
        }"#;
        let dir: Directory = serde_json::from_str(json).unwrap();
        assert!(dir.children.is_empty());
        assert_eq!(dir.meta.atime.timestamp_subsec_nanos(), 1);
    }

    #[test]
    fn test_extent_rekey_tracks_body() {
        let mut extent = Extent::zeroed(8);
        let zero_key = extent.key.clone();
        extent.body[0] = b'x';
        extent.rekey();
        assert_ne!(extent.key, zero_key);
        assert_eq!(extent.key, ObjectKey::content(&extent.body));
    }
}
