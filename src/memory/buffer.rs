//! Owning byte buffers that can move into shared memory in place

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
    time::SystemTime,
};

use crate::error::{Result, ShmArrayError};

use super::{handle::SegmentHandle, segment::SharedSegment};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-local identity of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Where a buffer's bytes physically live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Ordinary host memory, eligible for promotion
    Host,
    /// Accelerator memory that other processes cannot map
    Device { ordinal: u32 },
}

impl StorageKind {
    pub fn is_host_addressable(&self) -> bool {
        matches!(self, StorageKind::Host)
    }

    pub fn name(&self) -> String {
        match self {
            StorageKind::Host => "host".to_string(),
            StorageKind::Device { ordinal } => format!("device:{}", ordinal),
        }
    }
}

/// Public snapshot of a buffer's sharing state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharingState {
    Private,
    Shared(SegmentHandle),
}

/// Outcome of a sharing transition request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The buffer was already shared; nothing was copied
    AlreadyShared(SegmentHandle),
    /// The bytes were copied into a new segment by this call
    Promoted(SegmentHandle),
}

impl Transition {
    pub fn handle(&self) -> &SegmentHandle {
        match self {
            Transition::AlreadyShared(handle) | Transition::Promoted(handle) => handle,
        }
    }

    pub fn into_handle(self) -> SegmentHandle {
        match self {
            Transition::AlreadyShared(handle) | Transition::Promoted(handle) => handle,
        }
    }
}

#[derive(Debug)]
enum BufferState {
    Private(Vec<u8>),
    Shared(SharedSegment),
}

impl BufferState {
    fn bytes(&self) -> &[u8] {
        match self {
            BufferState::Private(bytes) => bytes,
            BufferState::Shared(segment) => segment.as_slice(),
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            BufferState::Private(bytes) => bytes,
            BufferState::Shared(segment) => segment.as_mut_slice(),
        }
    }
}

/// A contiguous byte region owned by one allocation root
///
/// The lock around the state is the per-buffer promotion lock: the
/// private-to-shared transition happens entirely under the write guard.
#[derive(Debug)]
pub struct MemoryBuffer {
    id: BufferId,
    len: usize,
    storage: StorageKind,
    state: RwLock<BufferState>,
    created_at: SystemTime,
}

impl MemoryBuffer {
    /// Take ownership of host bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::with_storage(bytes, StorageKind::Host)
    }

    /// Allocate `len` zeroed host bytes
    pub fn zeroed(len: usize) -> Self {
        Self::from_bytes(vec![0u8; len])
    }

    /// Bytes resident on an accelerator; never promotable
    pub fn on_device(bytes: Vec<u8>, ordinal: u32) -> Self {
        Self::with_storage(bytes, StorageKind::Device { ordinal })
    }

    /// Wrap an already-mapped shared segment
    pub fn from_segment(segment: SharedSegment) -> Self {
        Self {
            id: BufferId::next(),
            len: segment.size(),
            storage: StorageKind::Host,
            state: RwLock::new(BufferState::Shared(segment)),
            created_at: SystemTime::now(),
        }
    }

    fn with_storage(bytes: Vec<u8>, storage: StorageKind) -> Self {
        Self {
            id: BufferId::next(),
            len: bytes.len(),
            storage,
            state: RwLock::new(BufferState::Private(bytes)),
            created_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn storage(&self) -> StorageKind {
        self.storage
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Current sharing state
    pub fn sharing_state(&self) -> Result<SharingState> {
        let state = self.state.read()?;
        Ok(match &*state {
            BufferState::Private(_) => SharingState::Private,
            BufferState::Shared(segment) => SharingState::Shared(segment.handle().clone()),
        })
    }

    /// Handle of the backing segment, if the buffer has been shared
    pub fn shared_handle(&self) -> Result<Option<SegmentHandle>> {
        Ok(match self.sharing_state()? {
            SharingState::Private => None,
            SharingState::Shared(handle) => Some(handle),
        })
    }

    /// Whether the bytes live in a shared segment
    ///
    /// A poisoned state lock reads as not shared; use
    /// [`MemoryBuffer::sharing_state`] to see the error.
    pub fn is_shared(&self) -> bool {
        matches!(self.sharing_state(), Ok(SharingState::Shared(_)))
    }

    /// Run `f` over the buffer bytes under the read lock
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let state = self.state.read()?;
        Ok(f(state.bytes()))
    }

    /// Run `f` over the mutable buffer bytes under the write lock
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut state = self.state.write()?;
        Ok(f(state.bytes_mut()))
    }

    /// Copy `len` bytes starting at `offset`
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let end = offset.checked_add(len).filter(|&end| end <= self.len);
        let end = end.ok_or_else(|| {
            ShmArrayError::invalid_parameter(
                "range",
                format!("{}..+{} exceeds buffer length {}", offset, len, self.len),
            )
        })?;
        self.with_bytes(|bytes| bytes[offset..end].to_vec())
    }

    /// Overwrite bytes starting at `offset`
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset.checked_add(data.len()).filter(|&end| end <= self.len);
        let end = end.ok_or_else(|| {
            ShmArrayError::invalid_parameter(
                "range",
                format!(
                    "{}..+{} exceeds buffer length {}",
                    offset,
                    data.len(),
                    self.len
                ),
            )
        })?;
        self.with_bytes_mut(|bytes| bytes[offset..end].copy_from_slice(data))
    }

    /// Move the buffer into shared memory unless it already lives there
    ///
    /// `create` receives the private bytes and must return a segment holding
    /// a copy of them. It runs at most once per buffer, under the write lock.
    pub(crate) fn transition_to_shared<F>(&self, create: F) -> Result<Transition>
    where
        F: FnOnce(&[u8]) -> Result<SharedSegment>,
    {
        if !self.storage.is_host_addressable() {
            return Err(ShmArrayError::promotion_unsupported(self.storage.name()));
        }

        let mut state = self.state.write()?;
        let segment = match &*state {
            BufferState::Shared(segment) => {
                return Ok(Transition::AlreadyShared(segment.handle().clone()))
            }
            BufferState::Private(bytes) => create(bytes)?,
        };

        if segment.size() != self.len {
            return Err(ShmArrayError::memory(format!(
                "segment of {} bytes cannot back a {} byte buffer",
                segment.size(),
                self.len
            )));
        }

        let handle = segment.handle().clone();
        *state = BufferState::Shared(segment);
        Ok(Transition::Promoted(handle))
    }
}
