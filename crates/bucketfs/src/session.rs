//! Mount session: the bucket client, blob cache, and codec, plus the
//! object-graph bootstrap and path resolution.
//!
//! Nodes never hold a session pointer; operations that fetch or persist
//! take `&Session` as a parameter, so ownership flows strictly from the
//! session to the nodes it returns.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::cache::BlobCache;
use crate::client::BucketClient;
use crate::codec::Codec;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::{
    CallerContext, Directory, Extent, File, Meta, Node, NodeKind, ObjectKey, SymLink, S_IFDIR,
};

pub struct Session {
    config: Config,
    client: BucketClient,
    cache: BlobCache,
    codec: Codec,
    root_key: ObjectKey,
}

/// Minimal view of a node document, enough to pick the concrete kind.
#[derive(serde::Deserialize)]
struct MetaProbe {
    meta: Meta,
}

fn decode_json<T: DeserializeOwned>(key: &ObjectKey, raw: &[u8]) -> Result<T> {
    serde_json::from_slice(raw).map_err(|err| Error::BadKey {
        key: key.clone(),
        reason: format!("node decode: {err}"),
    })
}

impl Session {
    /// Connect to the configured S3 bucket.
    pub async fn new(config: Config) -> Result<Self> {
        let client = BucketClient::s3(&config)?;
        Self::open(config, client).await
    }

    /// Build a session over an explicit client; tests pass the in-memory
    /// one.
    pub async fn open(config: Config, client: BucketClient) -> Result<Self> {
        config.validate()?;
        let root_key = ObjectKey::root(&config.password);
        let session = Self {
            cache: BlobCache::new(config.cache_size),
            codec: Codec::new(&config),
            root_key,
            config,
            client,
        };
        session.bootstrap_root().await?;
        Ok(session)
    }

    /// Create the root directory on first mount of this password's
    /// namespace. A root that exists but fails to load afterwards is a
    /// hard error, never silently replaced.
    async fn bootstrap_root(&self) -> Result<()> {
        if self.client.exists(&self.root_key).await {
            return Ok(());
        }
        tracing::info!(root = %self.root_key, "initializing empty filesystem root");
        let root = self.create_directory(
            self.root_key.clone(),
            self.root_key.clone(),
            S_IFDIR | 0o755,
            &CallerContext::default(),
        );
        root.save(self).await
    }

    pub fn root_key(&self) -> &ObjectKey {
        &self.root_key
    }

    pub fn extent_size(&self) -> i64 {
        self.config.extent_size
    }

    /// Download (through the cache) and decode the blob at `key`. The
    /// cache holds encoded bytes exactly as the bucket stores them.
    pub async fn fetch(&self, key: &ObjectKey) -> Result<Vec<u8>> {
        let encoded = match self.cache.get(key) {
            Some(bytes) => bytes,
            None => {
                let bytes = self.client.download(key).await?;
                self.cache.add(key.clone(), bytes.clone());
                bytes
            }
        };
        self.codec.decode(key, &encoded)
    }

    /// Encode and upload a blob, keeping the encoded bytes warm in the
    /// cache.
    pub async fn store(&self, key: &ObjectKey, plaintext: &[u8]) -> Result<()> {
        let encoded = Bytes::from(self.codec.encode(key, plaintext)?);
        self.client.upload(key, encoded.clone()).await?;
        self.cache.add(key.clone(), encoded);
        Ok(())
    }

    pub async fn exists(&self, key: &ObjectKey) -> bool {
        self.client.exists(key).await
    }

    /// Resolve a relative path to the object key of its final segment.
    ///
    /// `""` and `"."` name the root. The final segment is not loaded;
    /// callers that need the node follow up with a typed load.
    pub async fn path_walk(&self, rel_path: &str) -> Result<ObjectKey> {
        let rel_path = rel_path.trim_matches('/');
        if rel_path.is_empty() || rel_path == "." {
            return Ok(self.root_key.clone());
        }
        tracing::debug!(path = rel_path, "path walk");

        let (parents, last) = match rel_path.rsplit_once('/') {
            Some((parents, last)) => (parents, last),
            None => ("", rel_path),
        };

        let mut current = self.directory(&self.root_key).await?;
        for segment in parents.split('/').filter(|s| !s.is_empty()) {
            let key = current
                .children
                .get(segment)
                .cloned()
                .ok_or_else(|| Error::KeyNotFound(ObjectKey::from(segment)))?;
            current = match self.node(&key).await? {
                Node::Directory(dir) => dir,
                _ => return Err(Error::NotDirectory(segment.to_string())),
            };
        }

        current
            .children
            .get(last)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(ObjectKey::from(last)))
    }

    pub async fn directory(&self, key: &ObjectKey) -> Result<Directory> {
        let raw = self.fetch(key).await?;
        decode_json(key, &raw)
    }

    pub async fn file(&self, key: &ObjectKey) -> Result<File> {
        let raw = self.fetch(key).await?;
        decode_json(key, &raw)
    }

    pub async fn symlink(&self, key: &ObjectKey) -> Result<SymLink> {
        let raw = self.fetch(key).await?;
        decode_json(key, &raw)
    }

    /// Load a node, discovering its kind from the mode bits.
    pub async fn node(&self, key: &ObjectKey) -> Result<Node> {
        let raw = self.fetch(key).await?;
        let probe: MetaProbe = decode_json(key, &raw)?;
        match probe.meta.kind()? {
            NodeKind::Directory => Ok(Node::Directory(decode_json(key, &raw)?)),
            NodeKind::File => Ok(Node::File(decode_json(key, &raw)?)),
            NodeKind::SymLink => Ok(Node::SymLink(decode_json(key, &raw)?)),
        }
    }

    /// In-memory construction only; the caller saves.
    pub fn create_directory(
        &self,
        key: ObjectKey,
        parent: ObjectKey,
        mode: u32,
        ctx: &CallerContext,
    ) -> Directory {
        Directory {
            key,
            parent,
            meta: Meta::new(mode, ctx),
            children: Default::default(),
        }
    }

    pub fn create_file(
        &self,
        key: ObjectKey,
        parent: ObjectKey,
        mode: u32,
        ctx: &CallerContext,
    ) -> File {
        File {
            key,
            parent,
            meta: Meta::new(mode, ctx),
            extent_size: self.config.extent_size,
            extent: Default::default(),
        }
    }

    pub fn create_symlink(
        &self,
        key: ObjectKey,
        parent: ObjectKey,
        mode: u32,
        link_to: String,
        ctx: &CallerContext,
    ) -> SymLink {
        SymLink {
            key,
            parent,
            meta: Meta::new(mode, ctx),
            link_to,
        }
    }

    pub fn create_extent(&self, size: i64) -> Extent {
        Extent::zeroed(size)
    }
}
