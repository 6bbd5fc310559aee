//! Kernel-facing façade: one method per filesystem callback.
//!
//! Every method resolves its path through the session, performs the
//! operation on typed nodes, saves whatever it mutated, and reports a
//! POSIX-style status code. The kernel bridge owns threading and handle
//! lifetimes; nothing here serializes callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::handle::FileHandle;
use crate::node::{CallerContext, Directory, Meta, Node, ObjectKey, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use crate::session::Session;

/// Status code reported back to the kernel bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NoEntry,
    NotDirectory,
    AccessDenied,
    Io,
    BadHandle,
    NoData,
}

impl Status {
    /// The errno value for the kernel reply.
    pub fn errno(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::NoEntry => libc::ENOENT,
            Status::NotDirectory => libc::ENOTDIR,
            Status::AccessDenied => libc::EACCES,
            Status::Io => libc::EIO,
            Status::BadHandle => libc::EBADF,
            Status::NoData => libc::ENODATA,
        }
    }
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        match err {
            Error::KeyNotFound(_) => Status::NoEntry,
            Error::NotDirectory(_) => Status::NotDirectory,
            Error::BadKey { .. } | Error::UnknownNodeKind { .. } => Status::AccessDenied,
            Error::BadHandle => Status::BadHandle,
            Error::EndOfData => Status::NoData,
            Error::Store(_)
            | Error::Io(_)
            | Error::Encode(_)
            | Error::InvalidArgument(_)
            | Error::Other(_) => Status::Io,
        }
    }
}

pub type FsResult<T> = std::result::Result<T, Status>;

/// Attributes of one node, as the kernel wants them.
#[derive(Debug, Clone)]
pub struct FileAttr {
    pub ino: u64,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

fn attr_of(key: &ObjectKey, meta: &Meta) -> FileAttr {
    FileAttr {
        ino: key.inode(),
        size: meta.size.max(0) as u64,
        mode: meta.mode,
        uid: meta.uid,
        gid: meta.gid,
        nlink: 1,
        atime: meta.atime,
        mtime: meta.mtime,
        ctime: meta.ctime,
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
}

/// Split a path into its parent directory and final component.
fn split_path(path: &str) -> Result<(&str, &str)> {
    let path = path.trim_matches('/');
    if path.is_empty() || path == "." {
        return Err(Error::InvalidArgument("cannot operate on the root"));
    }
    Ok(match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    })
}

pub struct BucketFs {
    session: Arc<Session>,
}

impl BucketFs {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn reply<T>(op: &'static str, path: &str, result: Result<T>) -> FsResult<T> {
        result.map_err(|err| {
            let status = Status::from(&err);
            match status {
                Status::NoEntry | Status::NoData => {
                    tracing::debug!(op, path, %err, "not found")
                }
                _ => tracing::warn!(op, path, %err, ?status, "operation failed"),
            }
            status
        })
    }

    /// Load a directory node, rejecting every other kind.
    async fn load_dir(&self, key: &ObjectKey) -> Result<Directory> {
        match self.session.node(key).await? {
            Node::Directory(dir) => Ok(dir),
            other => Err(Error::NotDirectory(other.key().to_string())),
        }
    }

    async fn load_dir_at(&self, path: &str) -> Result<Directory> {
        let key = self.session.path_walk(path).await?;
        self.load_dir(&key).await
    }

    pub async fn getattr(&self, path: &str) -> FsResult<FileAttr> {
        tracing::debug!(path, "getattr");
        let result = async {
            let key = self.session.path_walk(path).await?;
            let node = self.session.node(&key).await?;
            Ok(attr_of(&key, node.meta()))
        }
        .await;
        Self::reply("getattr", path, result)
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        tracing::debug!(path, "readdir");
        let result = async {
            let dir = self.load_dir_at(path).await?;
            Ok(dir
                .children
                .iter()
                .map(|(name, key)| DirEntry {
                    name: name.clone(),
                    ino: key.inode(),
                })
                .collect())
        }
        .await;
        Self::reply("readdir", path, result)
    }

    pub async fn open(&self, path: &str) -> FsResult<FileHandle> {
        tracing::debug!(path, "open");
        let result = async {
            let key = self.session.path_walk(path).await?;
            let file = self.session.file(&key).await?;
            Ok(FileHandle::new(file))
        }
        .await;
        Self::reply("open", path, result)
    }

    /// Create a regular file and return an open handle on it.
    pub async fn create(&self, path: &str, mode: u32, ctx: &CallerContext) -> FsResult<FileHandle> {
        tracing::debug!(path, mode, "create");
        let result = async {
            let (parent_path, name) = split_path(path)?;
            let mut parent = self.load_dir_at(parent_path).await?;

            let key = ObjectKey::generate();
            let mut file = self.session.create_file(
                key.clone(),
                parent.key.clone(),
                S_IFREG | (mode & !S_IFMT),
                ctx,
            );
            file.save(&self.session).await?;

            parent.children.insert(name.to_string(), key);
            parent.save(&self.session).await?;
            Ok(FileHandle::new(file))
        }
        .await;
        Self::reply("create", path, result)
    }

    pub async fn mkdir(&self, path: &str, mode: u32, ctx: &CallerContext) -> FsResult<()> {
        tracing::debug!(path, mode, "mkdir");
        let result = async {
            let (parent_path, name) = split_path(path)?;
            let mut parent = self.load_dir_at(parent_path).await?;

            let key = ObjectKey::generate();
            let dir = self.session.create_directory(
                key.clone(),
                parent.key.clone(),
                S_IFDIR | (mode & !S_IFMT),
                ctx,
            );
            dir.save(&self.session).await?;

            parent.children.insert(name.to_string(), key);
            parent.save(&self.session).await
        }
        .await;
        Self::reply("mkdir", path, result)
    }

    pub async fn symlink(&self, target: &str, link_path: &str, ctx: &CallerContext) -> FsResult<()> {
        tracing::debug!(target, link_path, "symlink");
        let result = async {
            let (parent_path, name) = split_path(link_path)?;
            let mut parent = self.load_dir_at(parent_path).await?;

            let key = ObjectKey::generate();
            let link = self.session.create_symlink(
                key.clone(),
                parent.key.clone(),
                S_IFLNK | 0o777,
                target.to_string(),
                ctx,
            );
            link.save(&self.session).await?;

            parent.children.insert(name.to_string(), key);
            parent.save(&self.session).await
        }
        .await;
        Self::reply("symlink", link_path, result)
    }

    pub async fn readlink(&self, path: &str) -> FsResult<String> {
        tracing::debug!(path, "readlink");
        let result = async {
            let key = self.session.path_walk(path).await?;
            let link = self.session.symlink(&key).await?;
            Ok(link.link_to)
        }
        .await;
        Self::reply("readlink", path, result)
    }

    /// Move a child entry between (possibly equal) parent directories.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        tracing::debug!(old_path, new_path, "rename");
        let result = async {
            let (old_parent_path, old_name) = split_path(old_path)?;
            let (new_parent_path, new_name) = split_path(new_path)?;

            let old_parent_key = self.session.path_walk(old_parent_path).await?;
            let new_parent_key = self.session.path_walk(new_parent_path).await?;

            let mut old_parent = self.load_dir(&old_parent_key).await?;
            let child = old_parent
                .children
                .remove(old_name)
                .ok_or_else(|| Error::KeyNotFound(ObjectKey::from(old_name)))?;

            if old_parent_key == new_parent_key {
                old_parent.children.insert(new_name.to_string(), child);
                old_parent.save(&self.session).await
            } else {
                let mut new_parent = self.load_dir(&new_parent_key).await?;
                new_parent.children.insert(new_name.to_string(), child);
                new_parent.save(&self.session).await?;
                old_parent.save(&self.session).await
            }
        }
        .await;
        Self::reply("rename", old_path, result)
    }

    /// Drop the parent's entry for `path`. The node's blobs stay in the
    /// bucket; the core never deletes objects.
    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        tracing::debug!(path, "unlink");
        let result = async {
            let (parent_path, name) = split_path(path)?;
            let mut parent = self.load_dir_at(parent_path).await?;
            parent
                .children
                .remove(name)
                .ok_or_else(|| Error::KeyNotFound(ObjectKey::from(name)))?;
            parent.save(&self.session).await
        }
        .await;
        Self::reply("unlink", path, result)
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        self.unlink(path).await
    }

    pub async fn truncate(&self, path: &str, size: i64) -> FsResult<()> {
        tracing::debug!(path, size, "truncate");
        let result = async {
            let key = self.session.path_walk(path).await?;
            let mut file = self.session.file(&key).await?;
            file.truncate(size);
            file.save(&self.session).await
        }
        .await;
        Self::reply("truncate", path, result)
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        tracing::debug!(path, mode, "chmod");
        let result = async {
            let key = self.session.path_walk(path).await?;
            let mut node = self.session.node(&key).await?;
            let meta = node.meta_mut();
            meta.mode = (meta.mode & S_IFMT) | (mode & !S_IFMT);
            meta.ctime = Utc::now();
            node.save(&self.session).await
        }
        .await;
        Self::reply("chmod", path, result)
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        tracing::debug!(path, uid, gid, "chown");
        let result = async {
            let key = self.session.path_walk(path).await?;
            let mut node = self.session.node(&key).await?;
            let meta = node.meta_mut();
            meta.uid = uid;
            meta.gid = gid;
            meta.ctime = Utc::now();
            node.save(&self.session).await
        }
        .await;
        Self::reply("chown", path, result)
    }

    pub async fn utimens(
        &self,
        path: &str,
        atime: DateTime<Utc>,
        mtime: DateTime<Utc>,
    ) -> FsResult<()> {
        tracing::debug!(path, "utimens");
        let result = async {
            let key = self.session.path_walk(path).await?;
            let mut node = self.session.node(&key).await?;
            let meta = node.meta_mut();
            meta.atime = atime;
            meta.mtime = mtime;
            meta.ctime = Utc::now();
            node.save(&self.session).await
        }
        .await;
        Self::reply("utimens", path, result)
    }

    /// Permission probe; always OK.
    pub async fn access(&self, path: &str) -> Status {
        tracing::debug!(path, "access");
        Status::Ok
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::BucketClient;
    use crate::config::Config;
    use crate::session::test::{test_config, EXTENT_SIZE};

    async fn mount() -> BucketFs {
        let session = Session::open(test_config(), BucketClient::memory())
            .await
            .unwrap();
        BucketFs::new(Arc::new(session))
    }

    fn ctx() -> CallerContext {
        CallerContext { uid: 1000, gid: 1000 }
    }

    #[tokio::test]
    async fn test_mkdir_create_write_read() {
        let fs = mount().await;
        fs.mkdir("/d", 0o755, &ctx()).await.unwrap();
        let mut handle = fs.create("/d/f", 0o644, &ctx()).await.unwrap();

        let sess = fs.session().clone();
        let n = handle.write(b"hello world", 0, &sess).await.unwrap();
        assert_eq!(n, 11);
        handle.flush(&sess).await.unwrap();

        let mut dest = vec![0u8; 11];
        let n = handle.read(&mut dest, 0, &sess).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(&dest, b"hello world");

        let attr = fs.getattr("/d/f").await.unwrap();
        assert_eq!(attr.size, 11);
        assert_eq!(attr.mode, S_IFREG | 0o644);
        assert_eq!((attr.uid, attr.gid), (1000, 1000));
    }

    #[tokio::test]
    async fn test_identical_files_share_extent_blobs() {
        let client = BucketClient::memory();
        let session = Session::open(test_config(), client.clone()).await.unwrap();
        let fs = BucketFs::new(Arc::new(session));
        let sess = fs.session().clone();

        let body = b"0123456789012345"; // two extents of 8 bytes
        for path in ["/a", "/b"] {
            let mut handle = fs.create(path, 0o644, &ctx()).await.unwrap();
            handle.write(body, 0, &sess).await.unwrap();
            handle.release(&sess).await.unwrap();
        }

        let a = sess.file(&sess.path_walk("/a").await.unwrap()).await.unwrap();
        let b = sess.file(&sess.path_walk("/b").await.unwrap()).await.unwrap();
        assert_ne!(a.key, b.key);
        for index in [0, 1] {
            assert_eq!(a.extent[&index].key, b.extent[&index].key);
        }

        // Bucket holds the root, two file nodes, and exactly two shared
        // extent blobs.
        assert_eq!(client.object_count().await, 5);
    }

    #[tokio::test]
    async fn test_sparse_file_scenario() {
        let fs = mount().await;
        let sess = fs.session().clone();

        let mut handle = fs.create("/s", 0o644, &ctx()).await.unwrap();
        handle.write(b"x", 17, &sess).await.unwrap();
        handle.release(&sess).await.unwrap();

        let attr = fs.getattr("/s").await.unwrap();
        assert_eq!(attr.size, 18);

        let file = sess.file(&sess.path_walk("/s").await.unwrap()).await.unwrap();
        let indices: Vec<i64> = file.extent.keys().copied().collect();
        assert_eq!(indices, vec![2]);

        let handle = fs.open("/s").await.unwrap();
        let mut dest = vec![0xffu8; 18];
        let n = handle.read(&mut dest, 0, &sess).await.unwrap();
        assert_eq!(n, 18);
        assert!(dest[..17].iter().all(|b| *b == 0));
        assert_eq!(dest[17], b'x');
    }

    #[tokio::test]
    async fn test_rename_across_directories() {
        let fs = mount().await;
        fs.mkdir("/a", 0o755, &ctx()).await.unwrap();
        fs.mkdir("/b", 0o755, &ctx()).await.unwrap();
        let handle = fs.create("/a/f", 0o644, &ctx()).await.unwrap();
        let original_key = handle.file().key.clone();

        fs.rename("/a/f", "/b/g").await.unwrap();

        assert_eq!(fs.getattr("/a/f").await.unwrap_err(), Status::NoEntry);
        let sess = fs.session();
        assert_eq!(sess.path_walk("/b/g").await.unwrap(), original_key);
    }

    #[tokio::test]
    async fn test_rename_round_trip_restores_directories() {
        let fs = mount().await;
        fs.mkdir("/a", 0o755, &ctx()).await.unwrap();
        fs.mkdir("/b", 0o755, &ctx()).await.unwrap();
        fs.create("/a/f", 0o644, &ctx()).await.unwrap();
        fs.create("/b/g", 0o644, &ctx()).await.unwrap();

        let sess = fs.session().clone();
        let before_a = sess.directory(&sess.path_walk("/a").await.unwrap()).await.unwrap();
        let before_b = sess.directory(&sess.path_walk("/b").await.unwrap()).await.unwrap();

        fs.rename("/a/f", "/b/f").await.unwrap();
        fs.rename("/b/f", "/a/f").await.unwrap();

        let after_a = sess.directory(&before_a.key).await.unwrap();
        let after_b = sess.directory(&before_b.key).await.unwrap();
        assert_eq!(before_a.children, after_a.children);
        assert_eq!(before_b.children, after_b.children);
    }

    #[tokio::test]
    async fn test_symlink_and_readlink() {
        let fs = mount().await;
        fs.symlink("/target", "/l", &ctx()).await.unwrap();
        assert_eq!(fs.readlink("/l").await.unwrap(), "/target");

        let attr = fs.getattr("/l").await.unwrap();
        assert_eq!(attr.mode & S_IFMT, S_IFLNK);
    }

    #[tokio::test]
    async fn test_wrong_password_sees_empty_namespace() {
        let client = BucketClient::memory();
        let config = Config {
            encryption: true,
            compression: true,
            ..test_config()
        };
        let session = Session::open(config.clone(), client.clone()).await.unwrap();
        let fs = BucketFs::new(Arc::new(session));
        let sess = fs.session().clone();

        let mut handle = fs.create("/f", 0o644, &ctx()).await.unwrap();
        handle.write(b"top secret", 0, &sess).await.unwrap();
        handle.release(&sess).await.unwrap();
        let original_root = sess.root_key().clone();
        drop(fs);

        // Remount against the same bucket with another password: a
        // different root key, so the filesystem looks freshly created.
        let other = Config {
            password: "wrong-horse-battery".into(),
            ..config
        };
        let session = Session::open(other, client).await.unwrap();
        assert_ne!(*session.root_key(), original_root);
        let fs = BucketFs::new(Arc::new(session));
        assert!(fs.readdir("/").await.unwrap().is_empty());

        // Reaching for the original root through the new session cannot
        // decode it.
        let err = fs.session().node(&original_root).await.unwrap_err();
        assert!(matches!(err, Error::BadKey { .. }));
    }

    #[tokio::test]
    async fn test_readdir_lists_children() {
        let fs = mount().await;
        fs.mkdir("/d", 0o755, &ctx()).await.unwrap();
        fs.create("/f", 0o644, &ctx()).await.unwrap();
        fs.symlink("/t", "/l", &ctx()).await.unwrap();

        let mut names: Vec<String> = fs
            .readdir("/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, ["d", "f", "l"]);

        assert_eq!(fs.readdir("/f").await.unwrap_err(), Status::NotDirectory);
    }

    #[tokio::test]
    async fn test_unlink_and_rmdir_remove_entries() {
        let fs = mount().await;
        fs.mkdir("/d", 0o755, &ctx()).await.unwrap();
        fs.create("/d/f", 0o644, &ctx()).await.unwrap();

        fs.unlink("/d/f").await.unwrap();
        assert_eq!(fs.getattr("/d/f").await.unwrap_err(), Status::NoEntry);

        fs.rmdir("/d").await.unwrap();
        assert_eq!(fs.getattr("/d").await.unwrap_err(), Status::NoEntry);
        assert_eq!(fs.unlink("/d").await.unwrap_err(), Status::NoEntry);
    }

    #[tokio::test]
    async fn test_path_truncate_persists() {
        let fs = mount().await;
        let sess = fs.session().clone();
        let mut handle = fs.create("/f", 0o644, &ctx()).await.unwrap();
        let data: Vec<u8> = (0..32u8).collect();
        handle.write(&data, 0, &sess).await.unwrap();
        handle.release(&sess).await.unwrap();

        fs.truncate("/f", EXTENT_SIZE + 1).await.unwrap();

        let file = sess.file(&sess.path_walk("/f").await.unwrap()).await.unwrap();
        assert_eq!(file.meta.size, EXTENT_SIZE + 1);
        let mut indices: Vec<i64> = file.extent.keys().copied().collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_metadata_operations_touch_ctime() {
        let fs = mount().await;
        fs.create("/f", 0o644, &ctx()).await.unwrap();
        let before = fs.getattr("/f").await.unwrap();

        fs.chmod("/f", 0o600).await.unwrap();
        let attr = fs.getattr("/f").await.unwrap();
        assert_eq!(attr.mode, S_IFREG | 0o600);
        assert!(attr.ctime >= before.ctime);

        fs.chown("/f", 42, 43).await.unwrap();
        let attr = fs.getattr("/f").await.unwrap();
        assert_eq!((attr.uid, attr.gid), (42, 43));

        let stamp = "2024-01-02T03:04:05.000000006Z"
            .parse::<DateTime<Utc>>()
            .unwrap();
        fs.utimens("/f", stamp, stamp).await.unwrap();
        let attr = fs.getattr("/f").await.unwrap();
        assert_eq!(attr.atime, stamp);
        assert_eq!(attr.mtime, stamp);
        assert_ne!(attr.ctime, stamp);
    }

    #[tokio::test]
    async fn test_access_and_missing_paths() {
        let fs = mount().await;
        assert_eq!(fs.access("/").await, Status::Ok);
        assert_eq!(fs.access("/nope").await, Status::Ok);
        assert_eq!(fs.getattr("/nope").await.unwrap_err(), Status::NoEntry);
        assert_eq!(fs.open("/nope").await.unwrap_err(), Status::NoEntry);
        assert_eq!(fs.readlink("/nope").await.unwrap_err(), Status::NoEntry);
    }

    #[tokio::test]
    async fn test_open_on_directory_is_denied() {
        let fs = mount().await;
        fs.mkdir("/d", 0o755, &ctx()).await.unwrap();
        assert_eq!(fs.open("/d").await.unwrap_err(), Status::AccessDenied);
        assert_eq!(fs.readlink("/d").await.unwrap_err(), Status::AccessDenied);
    }

    #[tokio::test]
    async fn test_create_under_file_is_not_directory() {
        let fs = mount().await;
        fs.create("/f", 0o644, &ctx()).await.unwrap();
        assert_eq!(
            fs.create("/f/child", 0o644, &ctx()).await.unwrap_err(),
            Status::NotDirectory
        );
        assert_eq!(
            fs.getattr("/f/child/deeper").await.unwrap_err(),
            Status::NotDirectory
        );
    }

    #[tokio::test]
    async fn test_status_errno_values() {
        assert_eq!(Status::Ok.errno(), 0);
        assert_eq!(Status::NoEntry.errno(), libc::ENOENT);
        assert_eq!(Status::NotDirectory.errno(), libc::ENOTDIR);
        assert_eq!(Status::AccessDenied.errno(), libc::EACCES);
        assert_eq!(Status::Io.errno(), libc::EIO);
        assert_eq!(Status::BadHandle.errno(), libc::EBADF);
        assert_eq!(Status::NoData.errno(), libc::ENODATA);
    }
}
