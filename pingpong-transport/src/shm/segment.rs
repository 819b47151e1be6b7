//! The 8-byte shared segment.
//!
//! Layout, fixed and never resized:
//!
//! | Offset | Size | Meaning                  |
//! |--------|------|--------------------------|
//! | 0      | 2    | Owner-side lock state    |
//! | 2      | 2    | Attacher-side lock state |
//! | 4      | 4    | Data buffer              |
//!
//! The segment is a file (under `/dev/shm` on Linux) mapped by both processes.
//! All offset arithmetic stays in this module: callers get the two lock flags
//! as [`EventLock`]s and the data buffer as whole payloads, never raw bytes.

use super::event::{EventLock, WaitStrategy};
use crate::error::TransportError;
use memmap2::{MmapMut, MmapOptions};
use pingpong_core::{PAYLOAD_LEN, Payload};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

/// Total segment size in bytes.
pub const SEGMENT_SIZE: usize = 8;

const OWNER_FLAG_OFFSET: usize = 0;
const ATTACHER_FLAG_OFFSET: usize = 2;
const DATA_OFFSET: usize = 4;

const _: () = assert!(DATA_OFFSET + PAYLOAD_LEN == SEGMENT_SIZE);
const _: () = assert!(OWNER_FLAG_OFFSET % align_of::<AtomicU16>() == 0);
const _: () = assert!(ATTACHER_FLAG_OFFSET % align_of::<AtomicU16>() == 0);
const _: () = assert!(DATA_OFFSET % align_of::<AtomicU32>() == 0);

static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(0);

/// Which end of the segment a mapping belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Created the segment and removes it on drop.
    Owner,
    /// Mapped an existing segment by handle.
    Attacher,
}

impl Side {
    /// Returns the other side.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Owner => Self::Attacher,
            Self::Attacher => Self::Owner,
        }
    }

    const fn flag_offset(self) -> usize {
        match self {
            Self::Owner => OWNER_FLAG_OFFSET,
            Self::Attacher => ATTACHER_FLAG_OFFSET,
        }
    }
}

/// Opaque name a second process uses to map the segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHandle(PathBuf);

impl SegmentHandle {
    /// Wraps a backing file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<String> for SegmentHandle {
    fn from(value: String) -> Self {
        Self(PathBuf::from(value))
    }
}

/// Returns the directory segments are created in by default.
///
/// `/dev/shm` is memory-backed on Linux; elsewhere the temp dir is used.
#[must_use]
pub fn default_segment_dir() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// One mapping of the shared segment.
pub struct Segment {
    mmap: MmapMut,
    base: *mut u8,
    handle: SegmentHandle,
    side: Side,
}

// SAFETY: the mapping is only ever accessed through atomics, and `base` stays
// valid for as long as `mmap` is alive.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Creates a new segment in `dir` and initialises it.
    ///
    /// Both lock flags start `Clear` and the data buffer is zeroed.
    ///
    /// # Errors
    /// Returns [`TransportError::Resource`] if the backing file cannot be
    /// created, sized or mapped.
    pub fn create(dir: &Path) -> Result<Self, TransportError> {
        let name = format!(
            "pingpong-{}-{}",
            std::process::id(),
            NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed)
        );
        let path = dir.join(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                TransportError::resource(format!("create segment {}: {e}", path.display()))
            })?;

        let handle = SegmentHandle::new(path);
        let map = file.set_len(SEGMENT_SIZE as u64).and_then(|()| {
            // SAFETY: the file was created by us just above and is only shared
            // with the attacher, which never truncates it.
            unsafe { MmapOptions::new().len(SEGMENT_SIZE).map_mut(&file) }
        });
        let mmap = match map {
            Ok(mmap) => mmap,
            Err(e) => {
                std::fs::remove_file(handle.path()).ok();
                return Err(TransportError::resource(format!(
                    "map segment {handle}: {e}"
                )));
            }
        };

        let segment = Self::from_mmap(mmap, handle, Side::Owner)?;
        segment.flag(Side::Owner).store(0, Ordering::Relaxed);
        segment.flag(Side::Attacher).store(0, Ordering::Relaxed);
        segment.data().store(0, Ordering::Release);

        tracing::debug!(handle = %segment.handle, "created shared segment");
        Ok(segment)
    }

    /// Maps an existing segment by handle.
    ///
    /// Never creates or resizes the backing file.
    ///
    /// # Errors
    /// Returns [`TransportError::Resource`] if the handle does not name an
    /// accessible file of exactly [`SEGMENT_SIZE`] bytes.
    pub fn open(handle: &SegmentHandle) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(handle.path())
            .map_err(|e| TransportError::resource(format!("open segment {handle}: {e}")))?;

        let len = file
            .metadata()
            .map_err(|e| TransportError::resource(format!("stat segment {handle}: {e}")))?
            .len();
        if len != SEGMENT_SIZE as u64 {
            return Err(TransportError::resource(format!(
                "segment {handle} is {len} bytes, expected {SEGMENT_SIZE}"
            )));
        }

        // SAFETY: the size was checked above and the owner never resizes it.
        let mmap = unsafe { MmapOptions::new().len(SEGMENT_SIZE).map_mut(&file) }
            .map_err(|e| TransportError::resource(format!("map segment {handle}: {e}")))?;

        tracing::debug!(%handle, "attached shared segment");
        Self::from_mmap(mmap, handle.clone(), Side::Attacher)
    }

    fn from_mmap(
        mut mmap: MmapMut,
        handle: SegmentHandle,
        side: Side,
    ) -> Result<Self, TransportError> {
        if mmap.len() < SEGMENT_SIZE {
            return Err(TransportError::resource(format!(
                "segment {handle} mapped {} bytes, expected {SEGMENT_SIZE}",
                mmap.len()
            )));
        }
        let base = mmap.as_mut_ptr();
        Ok(Self {
            mmap,
            base,
            handle,
            side,
        })
    }

    /// Returns the handle the peer opens this segment with.
    #[must_use]
    pub fn handle(&self) -> &SegmentHandle {
        &self.handle
    }

    /// Returns which end this mapping is.
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Returns the event lock over the flag belonging to `side`.
    #[must_use]
    pub fn lock(&self, side: Side, strategy: WaitStrategy) -> EventLock<'_> {
        EventLock::new(self.flag(side), strategy)
    }

    pub(crate) fn flag(&self, side: Side) -> &AtomicU16 {
        // SAFETY: in bounds and 2-byte aligned (checked at compile time, and
        // mappings are page aligned); only accessed atomically.
        unsafe { &*self.base.add(side.flag_offset()).cast::<AtomicU16>() }
    }

    fn data(&self) -> &AtomicU32 {
        // SAFETY: in bounds and 4-byte aligned; only accessed atomically.
        unsafe { &*self.base.add(DATA_OFFSET).cast::<AtomicU32>() }
    }

    /// Writes a payload into the data buffer.
    ///
    /// Ordering against the reader comes from the writer's lock flag, not from
    /// this store.
    pub fn write_data(&self, payload: &Payload) {
        self.data()
            .store(u32::from_ne_bytes(*payload), Ordering::Relaxed);
    }

    /// Reads the payload currently in the data buffer.
    #[must_use]
    pub fn read_data(&self) -> Payload {
        self.data().load(Ordering::Relaxed).to_ne_bytes()
    }

}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("handle", &self.handle)
            .field("side", &self.side)
            .field("len", &self.mmap.len())
            .finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.side == Side::Owner {
            if let Err(e) = std::fs::remove_file(self.handle.path()) {
                tracing::debug!(handle = %self.handle, error = %e, "failed to remove segment");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_side_peer() {
        assert_eq!(Side::Owner.peer(), Side::Attacher);
        assert_eq!(Side::Attacher.peer(), Side::Owner);
    }

    #[test]
    fn test_create_initialises_segment() {
        let dir = tempdir().unwrap();
        let segment = Segment::create(dir.path()).unwrap();

        assert_eq!(segment.side(), Side::Owner);
        assert_eq!(segment.flag(Side::Owner).load(Ordering::Relaxed), 0);
        assert_eq!(segment.flag(Side::Attacher).load(Ordering::Relaxed), 0);
        assert_eq!(segment.read_data(), [0u8; 4]);
        assert_eq!(
            std::fs::metadata(segment.handle().path()).unwrap().len(),
            SEGMENT_SIZE as u64
        );
    }

    #[test]
    fn test_create_gives_unique_handles() {
        let dir = tempdir().unwrap();
        let a = Segment::create(dir.path()).unwrap();
        let b = Segment::create(dir.path()).unwrap();
        assert_ne!(a.handle(), b.handle());
    }

    #[test]
    fn test_open_shares_memory() {
        let dir = tempdir().unwrap();
        let owner = Segment::create(dir.path()).unwrap();
        let attacher = Segment::open(owner.handle()).unwrap();
        assert_eq!(attacher.side(), Side::Attacher);

        owner.write_data(b"ping");
        assert_eq!(&attacher.read_data(), b"ping");

        attacher.flag(Side::Attacher).store(1, Ordering::Release);
        assert_eq!(owner.flag(Side::Attacher).load(Ordering::Acquire), 1);
        assert_eq!(owner.flag(Side::Owner).load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_flags_do_not_overlap_data() {
        let dir = tempdir().unwrap();
        let owner = Segment::create(dir.path()).unwrap();

        owner.flag(Side::Owner).store(u16::MAX, Ordering::Relaxed);
        owner.flag(Side::Attacher).store(u16::MAX, Ordering::Relaxed);
        assert_eq!(owner.read_data(), [0u8; 4]);

        owner.write_data(b"pong");
        assert_eq!(owner.flag(Side::Owner).load(Ordering::Relaxed), u16::MAX);
        assert_eq!(owner.flag(Side::Attacher).load(Ordering::Relaxed), u16::MAX);
    }

    #[test]
    fn test_open_missing_handle() {
        let dir = tempdir().unwrap();
        let handle = SegmentHandle::new(dir.path().join("missing"));
        let err = Segment::open(&handle).unwrap_err();
        assert!(matches!(err, TransportError::Resource { .. }));
        assert!(!handle.path().exists());
    }

    #[test]
    fn test_open_rejects_wrong_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("too_big");
        std::fs::write(&path, [0u8; 4096]).unwrap();

        let err = Segment::open(&SegmentHandle::new(&path)).unwrap_err();
        assert!(err.to_string().contains("4096 bytes"));
    }

    #[test]
    fn test_owner_drop_removes_file() {
        let dir = tempdir().unwrap();
        let owner = Segment::create(dir.path()).unwrap();
        let path = owner.handle().path().to_path_buf();

        let attacher = Segment::open(owner.handle()).unwrap();
        drop(attacher);
        assert!(path.exists());

        drop(owner);
        assert!(!path.exists());
    }

    #[test]
    fn test_handle_display_roundtrip() {
        let handle = SegmentHandle::new("/dev/shm/pingpong-1-0");
        let parsed = SegmentHandle::from(handle.to_string());
        assert_eq!(handle, parsed);
    }

    #[test]
    fn test_lock_views_shared_flag() {
        use crate::shm::event::EventState;

        let dir = tempdir().unwrap();
        let owner = Segment::create(dir.path()).unwrap();
        let attacher = Segment::open(owner.handle()).unwrap();

        let mine = attacher.lock(Side::Attacher, WaitStrategy::Spin);
        let seen_by_owner = owner.lock(Side::Attacher, WaitStrategy::Spin);
        assert_eq!(seen_by_owner.state(), EventState::Clear);

        mine.set(EventState::Signaled);
        assert_eq!(seen_by_owner.state(), EventState::Signaled);
        assert_eq!(owner.lock(Side::Owner, WaitStrategy::Spin).state(), EventState::Clear);
    }
}
