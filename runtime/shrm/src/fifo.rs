//! Ring buffer engine
//!
//! A [`FifoWriter`] and a [`FifoReader`] sit on opposite ends of one
//! [`SharedFifo`]. Each keeps its own local pointer plus a mirror of the
//! other side's last published pointer:
//!
//! - the writer copies bytes at its local write pointer and only makes
//!   them visible on [`FifoWriter::commit`];
//! - the reader consumes from its local read pointer and only releases
//!   space on [`FifoReader::commit_read`].
//!
//! One slot is always kept free so that `write == read` means empty and
//! a full FIFO holds `capacity - 1` bytes.
//!
//! Neither handle is `Sync`-shared; the owner serialises access (the
//! context keeps each writer behind its FIFO update lock).

use std::sync::Arc;

use log::trace;

use crate::layout::{distance, FifoId, SharedFifo, SharedSegment};
use crate::{Result, ShrmError};

/// A fully copied, not yet published frame
///
/// Only produced once every byte of a frame sits in the FIFO, and only
/// consumed by [`FifoWriter::commit`], so a half-written frame can never
/// be published.
#[derive(Debug)]
#[must_use = "a pending frame is invisible to the consumer until committed"]
pub struct PendingFrame {
    len: usize,
}

impl PendingFrame {
    /// Bytes in the frame, header included
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Producer end of a FIFO
pub struct FifoWriter {
    segment: Arc<SharedSegment>,
    id: FifoId,
    local_wptr: usize,
    committed_wptr: usize,
    remote_rptr: usize,
}

impl FifoWriter {
    /// Attach to a FIFO, picking up whatever pointers are currently published
    pub fn new(segment: Arc<SharedSegment>, id: FifoId) -> Self {
        let fifo = segment.fifo(id);
        let wptr = fifo.shared_write_ptr();
        let rptr = fifo.shared_read_ptr();
        Self {
            segment,
            id,
            local_wptr: wptr,
            committed_wptr: wptr,
            remote_rptr: rptr,
        }
    }

    fn fifo(&self) -> &SharedFifo {
        self.segment.fifo(self.id)
    }

    pub fn id(&self) -> FifoId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.fifo().capacity()
    }

    /// Local write pointer, including uncommitted bytes
    pub fn local_write_ptr(&self) -> usize {
        self.local_wptr
    }

    /// Space left according to the local mirror of the read pointer
    pub fn available_to_write(&self) -> usize {
        let used = distance(self.remote_rptr, self.local_wptr, self.capacity());
        self.capacity() - 1 - used
    }

    /// Bytes written locally but not yet published
    pub fn uncommitted(&self) -> usize {
        distance(self.committed_wptr, self.local_wptr, self.capacity())
    }

    /// Refresh the mirror of the consumer's read pointer
    ///
    /// Returns the number of bytes the consumer released since the last sync.
    pub fn sync_remote(&mut self) -> usize {
        let rptr = self.fifo().shared_read_ptr();
        let freed = distance(self.remote_rptr, rptr, self.capacity());
        self.remote_rptr = rptr;
        freed
    }

    /// Make sure `needed` bytes fit, re-reading the shared read pointer once
    /// before giving up
    pub fn ensure_space(&mut self, needed: usize) -> Result<()> {
        if self.available_to_write() < needed {
            self.sync_remote();
        }
        let available = self.available_to_write();
        if available < needed {
            return Err(ShrmError::InsufficientSpace {
                fifo: self.id,
                needed,
                available,
            });
        }
        Ok(())
    }

    /// Copy bytes at the local write pointer, wrapping at the end of the FIFO
    ///
    /// Nothing is published; fails without side effects if the data does
    /// not fit.
    pub(crate) fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_space(data.len())?;

        let capacity = self.capacity();
        let mut offset = self.local_wptr;
        let fifo = self.segment.fifo(self.id);
        for &byte in data {
            fifo.store(offset, byte);
            offset += 1;
            if offset == capacity {
                offset = 0;
            }
        }
        self.local_wptr = offset;
        Ok(())
    }

    /// Seal the uncommitted bytes as one frame of `len` bytes
    pub(crate) fn seal(&self, len: usize) -> PendingFrame {
        debug_assert_eq!(self.uncommitted(), len, "sealed frame length mismatch");
        PendingFrame { len }
    }

    /// Publish the local write pointer to the shared write pointer
    pub(crate) fn commit_write(&mut self) -> usize {
        let published = self.uncommitted();
        self.fifo().publish_write_ptr(self.local_wptr);
        self.committed_wptr = self.local_wptr;
        trace!(
            "{:?}: committed {} bytes, wptr={}",
            self.id,
            published,
            self.local_wptr
        );
        published
    }

    /// Publish a frame that has been completely copied
    pub fn commit(&mut self, frame: PendingFrame) -> usize {
        let published = self.commit_write();
        debug_assert_eq!(published, frame.len, "commit does not match frame");
        published
    }

    /// Drop uncommitted bytes
    pub fn rollback(&mut self) {
        self.local_wptr = self.committed_wptr;
    }

    /// Forget all local state and start from zeroed shared pointers
    pub(crate) fn reset(&mut self) {
        self.local_wptr = 0;
        self.committed_wptr = 0;
        self.remote_rptr = 0;
    }
}

impl core::fmt::Debug for FifoWriter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FifoWriter")
            .field("id", &self.id)
            .field("local_wptr", &self.local_wptr)
            .field("committed_wptr", &self.committed_wptr)
            .field("remote_rptr", &self.remote_rptr)
            .finish()
    }
}

/// Consumer end of a FIFO
pub struct FifoReader {
    segment: Arc<SharedSegment>,
    id: FifoId,
    local_rptr: usize,
    committed_rptr: usize,
    remote_wptr: usize,
}

impl FifoReader {
    pub fn new(segment: Arc<SharedSegment>, id: FifoId) -> Self {
        let fifo = segment.fifo(id);
        let rptr = fifo.shared_read_ptr();
        let wptr = fifo.shared_write_ptr();
        Self {
            segment,
            id,
            local_rptr: rptr,
            committed_rptr: rptr,
            remote_wptr: wptr,
        }
    }

    fn fifo(&self) -> &SharedFifo {
        self.segment.fifo(self.id)
    }

    pub fn id(&self) -> FifoId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.fifo().capacity()
    }

    pub fn local_read_ptr(&self) -> usize {
        self.local_rptr
    }

    /// Unread bytes according to the local mirror of the write pointer
    pub fn available_to_read(&self) -> usize {
        distance(self.local_rptr, self.remote_wptr, self.capacity())
    }

    /// Refresh the mirror of the producer's write pointer
    ///
    /// Returns the number of newly published bytes.
    pub fn sync_remote(&mut self) -> usize {
        let wptr = self.fifo().shared_write_ptr();
        let added = distance(self.remote_wptr, wptr, self.capacity());
        self.remote_wptr = wptr;
        added
    }

    fn ensure_data(&mut self, needed: usize) -> Result<()> {
        if self.available_to_read() < needed {
            self.sync_remote();
        }
        let available = self.available_to_read();
        if available < needed {
            return Err(ShrmError::InsufficientData {
                fifo: self.id,
                needed,
                available,
            });
        }
        Ok(())
    }

    /// Copy bytes from the local read pointer without consuming them
    pub fn peek_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_data(buf.len())?;
        self.copy_out(self.local_rptr, buf);
        Ok(())
    }

    /// Consume `buf.len()` bytes, wrapping at the end of the FIFO
    ///
    /// The space is not released to the producer until [`commit_read`].
    ///
    /// [`commit_read`]: FifoReader::commit_read
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_data(buf.len())?;
        self.local_rptr = self.copy_out(self.local_rptr, buf);
        Ok(())
    }

    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    fn copy_out(&self, start: usize, buf: &mut [u8]) -> usize {
        let capacity = self.capacity();
        let fifo = self.fifo();
        let mut offset = start;
        for slot in buf.iter_mut() {
            *slot = fifo.load(offset);
            offset += 1;
            if offset == capacity {
                offset = 0;
            }
        }
        offset
    }

    /// Bytes consumed locally but not yet released
    pub fn uncommitted(&self) -> usize {
        distance(self.committed_rptr, self.local_rptr, self.capacity())
    }

    /// Publish the local read pointer, releasing consumed space
    pub fn commit_read(&mut self) -> usize {
        let released = self.uncommitted();
        self.fifo().publish_read_ptr(self.local_rptr);
        self.committed_rptr = self.local_rptr;
        trace!(
            "{:?}: released {} bytes, rptr={}",
            self.id,
            released,
            self.local_rptr
        );
        released
    }

    /// Un-consume everything since the last commit
    pub fn rollback(&mut self) {
        self.local_rptr = self.committed_rptr;
    }

    pub(crate) fn reset(&mut self) {
        self.local_rptr = 0;
        self.committed_rptr = 0;
        self.remote_wptr = 0;
    }
}

impl core::fmt::Debug for FifoReader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FifoReader")
            .field("id", &self.id)
            .field("local_rptr", &self.local_rptr)
            .field("committed_rptr", &self.committed_rptr)
            .field("remote_wptr", &self.remote_wptr)
            .finish()
    }
}
