use std::{fs, io::Write as _, mem, path::Path};

use crate::flat::Flat;

// version byte + little-endian payload length
const HEADER_SIZE: usize = 1 + mem::size_of::<u64>();

/// Outcome of probing a cache artifact file.
pub enum ArtifactProbe<T> {
    /// The artifact matched the expected version and parsed cleanly.
    Fresh(T),
    /// The artifact exists but is not usable: wrong version, truncated,
    /// or structurally inconsistent. The caller deletes it and reprocesses.
    Stale,
    /// No artifact at this path yet.
    Missing,
}

struct AlignedBuf {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuf {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(mem::size_of::<u64>())],
            len,
        }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::new(bytes.len());
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.ptr(), bytes.len());
        }
        buf
    }

    fn ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr() as *mut u8
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }
}

/// Write a versioned artifact to a fresh file handle.
///
/// The file only becomes observable as a complete write: it is created anew
/// and closed before the function returns.
pub fn write_artifact<T: Flat>(path: &Path, version: u8, payload: &T) -> Result<(), crate::Error> {
    assert!(T::ALIGNMENT <= mem::align_of::<u64>());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let payload_len = payload.size();
    let mut scratch = AlignedBuf::new(payload_len);
    unsafe { payload.write(scratch.ptr()) };

    let mut file = fs::File::create(path)?;
    file.write_all(&[version])?;
    file.write_all(&(payload_len as u64).to_le_bytes())?;
    file.write_all(scratch.bytes())?;
    Ok(())
}

/// Probe a cache artifact, rejecting anything that does not carry the
/// expected version byte or whose payload is inconsistent with its own
/// recorded length.
pub fn read_artifact<T: Flat>(path: &Path, expected_version: u8) -> ArtifactProbe<T> {
    assert!(T::ALIGNMENT <= mem::align_of::<u64>());
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ArtifactProbe::Missing,
        Err(_) => return ArtifactProbe::Stale,
    };
    if bytes.len() < HEADER_SIZE {
        return ArtifactProbe::Stale;
    }
    if bytes[0] != expected_version {
        return ArtifactProbe::Stale;
    }
    let payload_len = u64::from_le_bytes(bytes[1..HEADER_SIZE].try_into().unwrap()) as usize;
    if bytes.len() - HEADER_SIZE != payload_len {
        return ArtifactProbe::Stale;
    }
    let mut scratch = AlignedBuf::from_bytes(&bytes[HEADER_SIZE..]);
    let value = unsafe { T::read(scratch.ptr()) };
    if value.size() != payload_len {
        return ArtifactProbe::Stale;
    }
    ArtifactProbe::Fresh(value)
}
