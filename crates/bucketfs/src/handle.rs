//! Open-file engine: byte-range reads and writes over the sparse extent
//! map of a file node.
//!
//! The kernel serializes operations per open handle, so methods borrow
//! the handle mutably and need no further locking. Extent transfers fan
//! out over the session concurrently.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::thread;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};

use crate::error::{Error, Result};
use crate::node::{Extent, File, Meta, ObjectKey, S_IFMT};
use crate::session::Session;

/// Upper bound on concurrent extent transfers for one operation.
fn fan_out(jobs: usize) -> usize {
    let cap = thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(16);
    jobs.clamp(1, cap)
}

enum ExtentSource {
    /// Missing index inside the logical range: all zeros.
    Hole,
    /// Unsaved in-memory body; reads on this handle must observe it.
    Resident(Bytes),
    /// Stored blob, fetched by content key.
    Stored(ObjectKey),
}

impl Extent {
    /// Populate the body from the bucket unless it is already resident.
    /// Every failure here is an I/O failure of the owning file operation,
    /// whatever the underlying cause.
    pub(crate) async fn fill(&mut self, sess: &Session) -> Result<()> {
        if !self.body.is_empty() {
            return Ok(());
        }
        self.body = sess
            .fetch(&self.key)
            .await
            .map_err(|err| Error::Other(anyhow::anyhow!("extent {} fetch: {err}", self.key)))?;
        Ok(())
    }
}

impl File {
    /// Upload every dirty extent, then the file node itself. Extents are
    /// deduplicated by content key before upload, and a key that already
    /// exists in the bucket is skipped entirely. The first extent error
    /// aborts the batch; dirty flags are cleared only after the whole
    /// batch succeeds, so a failed save can be retried.
    pub async fn save(&mut self, sess: &Session) -> Result<()> {
        let mut pending: HashMap<ObjectKey, Bytes> = HashMap::new();
        for extent in self.extent.values().filter(|e| e.dirty) {
            pending
                .entry(extent.key.clone())
                .or_insert_with(|| Bytes::copy_from_slice(&extent.body));
        }

        if !pending.is_empty() {
            tracing::debug!(key = %self.key, extents = pending.len(), "saving dirty extents");
            let limit = fan_out(pending.len());
            stream::iter(pending.into_iter().map(|(key, body)| async move {
                if sess.exists(&key).await {
                    tracing::debug!(%key, "extent blob already stored");
                    return Ok(());
                }
                sess.store(&key, &body).await
            }))
            .buffer_unordered(limit)
            .try_collect::<Vec<()>>()
            .await?;

            for extent in self.extent.values_mut() {
                extent.dirty = false;
            }
        }

        sess.store(&self.key, &serde_json::to_vec(&*self)?).await
    }

    /// Shrink or grow the logical size. Extents that start at or past
    /// the new size are dropped so stale references cannot survive a
    /// later save.
    pub fn truncate(&mut self, size: i64) {
        self.meta.size = size;
        let extent_size = self.extent_size;
        self.extent.retain(|index, _| index * extent_size < size);
    }
}

/// An open file: the in-memory file node plus dirty bookkeeping.
///
/// The extent map of the held node is the source of truth between a
/// write and the next save; reads on this handle observe unsaved bodies.
#[derive(Debug)]
pub struct FileHandle {
    file: File,
    dirty: bool,
    open: bool,
}

impl FileHandle {
    pub fn new(file: File) -> Self {
        Self {
            file,
            dirty: false,
            open: true,
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Read up to `dest.len()` bytes at `offset`, returning the number
    /// of bytes copied: `min(dest.len(), size - offset)`.
    pub async fn read(&self, dest: &mut [u8], offset: i64, sess: &Session) -> Result<usize> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        if offset >= self.file.meta.size {
            return Err(Error::EndOfData);
        }

        let extent_size = self.file.extent_size;
        let want = dest.len().min((self.file.meta.size - offset) as usize);
        if want == 0 {
            return Ok(0);
        }

        let first = offset / extent_size;
        let last = (offset + want as i64 - 1) / extent_size;
        let start_in_first = (offset - first * extent_size) as usize;
        tracing::debug!(first, last, start_in_first, want, "read");

        let fetches = (first..=last).map(|index| {
            let source = match self.file.extent.get(&index) {
                None => ExtentSource::Hole,
                Some(e) if !e.body.is_empty() => {
                    ExtentSource::Resident(Bytes::copy_from_slice(&e.body))
                }
                Some(e) => ExtentSource::Stored(e.key.clone()),
            };
            async move {
                match source {
                    ExtentSource::Hole => Ok(Bytes::from(vec![0u8; extent_size as usize])),
                    ExtentSource::Resident(body) => Ok(body),
                    ExtentSource::Stored(key) => sess
                        .fetch(&key)
                        .await
                        .map(Bytes::from)
                        .map_err(|err| {
                            Error::Other(anyhow::anyhow!("extent {key} fetch: {err}"))
                        }),
                }
            }
        });
        let limit = fan_out((last - first + 1) as usize);
        let buffers: Vec<Bytes> = stream::iter(fetches).buffered(limit).try_collect().await?;

        for (i, buffer) in buffers.iter().enumerate() {
            if buffer.len() != extent_size as usize {
                return Err(anyhow::anyhow!(
                    "extent {} body is {} bytes, expected {extent_size}",
                    first + i as i64,
                    buffer.len(),
                )
                .into());
            }
        }

        let mut copied = 0;
        for (i, buffer) in buffers.iter().enumerate() {
            let begin = if i == 0 { start_in_first } else { 0 };
            let take = (buffer.len() - begin).min(want - copied);
            dest[copied..copied + take].copy_from_slice(&buffer[begin..begin + take]);
            copied += take;
            if copied == want {
                break;
            }
        }
        Ok(copied)
    }

    /// Buffer `data` at `offset`, spanning as many extents as needed.
    /// Never a short write: the full slice is consumed or an error is
    /// returned.
    pub async fn write(&mut self, data: &[u8], offset: i64, sess: &Session) -> Result<usize> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        self.dirty = true;

        let extent_size = self.file.extent_size;
        let first = offset / extent_size;
        let start_in_first = (offset - first * extent_size) as usize;
        tracing::debug!(len = data.len(), offset, first, start_in_first, "write");

        let mut pos = 0;
        let mut index = first;
        while pos < data.len() {
            let extent = match self.file.extent.entry(index) {
                MapEntry::Occupied(entry) => {
                    let extent = entry.into_mut();
                    extent.fill(sess).await?;
                    extent
                }
                MapEntry::Vacant(entry) => entry.insert(sess.create_extent(extent_size)),
            };
            if extent.body.len() != extent_size as usize {
                return Err(anyhow::anyhow!(
                    "filled extent {index} is {} bytes, expected {extent_size}",
                    extent.body.len(),
                )
                .into());
            }
            let begin = if index == first { start_in_first } else { 0 };
            let n = (extent_size as usize - begin).min(data.len() - pos);
            extent.body[begin..begin + n].copy_from_slice(&data[pos..pos + n]);
            extent.dirty = true;
            extent.rekey();
            pos += n;
            index += 1;
        }

        if self.file.meta.size < offset + data.len() as i64 {
            self.file.meta.size = offset + data.len() as i64;
        }
        Ok(data.len())
    }

    pub async fn flush(&mut self, sess: &Session) -> Result<()> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        self.save_if_dirty(sess).await
    }

    pub async fn fsync(&mut self, sess: &Session) -> Result<()> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        self.save_if_dirty(sess).await
    }

    /// Persist outstanding writes and close the handle. Further
    /// operations fail with a bad-handle error.
    pub async fn release(&mut self, sess: &Session) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.save_if_dirty(sess).await?;
        self.open = false;
        Ok(())
    }

    pub fn truncate(&mut self, size: i64) -> Result<()> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        self.file.truncate(size);
        self.dirty = true;
        Ok(())
    }

    pub fn getattr(&self) -> Result<&Meta> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        Ok(&self.file.meta)
    }

    pub fn chmod(&mut self, perms: u32) -> Result<()> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        let meta = &mut self.file.meta;
        meta.mode = (meta.mode & S_IFMT) | (perms & !S_IFMT);
        meta.ctime = Utc::now();
        self.dirty = true;
        Ok(())
    }

    pub fn chown(&mut self, uid: u32, gid: u32) -> Result<()> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        self.file.meta.uid = uid;
        self.file.meta.gid = gid;
        self.file.meta.ctime = Utc::now();
        self.dirty = true;
        Ok(())
    }

    pub fn utimens(&mut self, atime: DateTime<Utc>, mtime: DateTime<Utc>) -> Result<()> {
        if !self.open {
            return Err(Error::BadHandle);
        }
        self.file.meta.atime = atime;
        self.file.meta.mtime = mtime;
        self.file.meta.ctime = Utc::now();
        self.dirty = true;
        Ok(())
    }

    async fn save_if_dirty(&mut self, sess: &Session) -> Result<()> {
        if self.dirty {
            self.file.save(sess).await?;
            self.dirty = false;
        }
        Ok(())
    }
}
