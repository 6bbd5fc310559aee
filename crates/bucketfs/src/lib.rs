/**
 * Bounded LRU over downloaded blobs, shared by every operation of a
 * mount.
 */
pub mod cache;
/**
 * Deterministic AES-256-CTR stream cipher; the IV of each blob comes
 * from its object key.
 */
pub mod cipher;
/**
 * Bucket client for blob GET/PUT/HEAD over S3-compatible stores,
 * with an in-memory backend for tests.
 */
pub mod client;
/**
 * Compression and encryption stages wrapped around every blob read
 * and write.
 */
pub mod codec;
/**
 * Mount configuration, loaded from YAML by the front-end.
 */
pub mod config;
/**
 * Error kinds shared across the core.
 */
pub mod error;
/**
 * Kernel-facing façade: one method per filesystem callback, each
 * reporting a POSIX-style status code.
 */
pub mod fs;
/**
 * Open-file engine: byte-range reads and writes over sparse,
 * content-addressed extents.
 */
pub mod handle;
/**
 * Logging bootstrap (tracing subscriber, optional file sink).
 */
pub mod logger;
/**
 * On-bucket data model: typed JSON nodes and fixed-size extents.
 */
pub mod node;
/**
 * Mount session: client + cache + codec, root bootstrap, path
 * resolution, node factories.
 */
pub mod session;

pub mod prelude {
    pub use crate::client::BucketClient;
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fs::{BucketFs, FileAttr, Status};
    pub use crate::handle::FileHandle;
    pub use crate::node::{CallerContext, Node, ObjectKey};
    pub use crate::session::Session;
}
