//! Append and indexed read of authenticated shares in the per-party
//! transactions file
//!
//! The file is a bare concatenation of packed shares, `pack(a) || pack(mac)`
//! each. Writes only ever append; reads are positional, returning the next
//! byte offset or the end-of-file sentinel. The parent directory is expected
//! to exist.

use std::{
    fs::OpenOptions,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{
    algebra::{FieldElement, Share},
    error::EngineError,
    PartyId,
};

/// The position sentinel for a read that hit end of file
pub const EOF_POSITION: i64 = -1;
/// The position sentinel the processor writes when the file does not exist
pub const MISSING_FILE_POSITION: i64 = -2;

/// The per-party transactions file under a persistence directory
pub fn transactions_path(dir: &Path, my_num: PartyId) -> PathBuf {
    dir.join(format!("Transactions-P{my_num}.data"))
}

/// Append shares to the end of the file, creating it on first write
pub fn append_shares<T: FieldElement>(
    path: &Path,
    shares: &[Share<T>],
) -> Result<(), EngineError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| EngineError::FileIoFailed(format!("{}: {e}", path.display())))?;

    let mut bytes = Vec::with_capacity(shares.len() * 2 * T::byte_size());
    for share in shares {
        bytes.extend(share.to_bytes());
    }

    file.write_all(&bytes)
        .map_err(|e| EngineError::FileIoFailed(format!("{}: {e}", path.display())))
}

/// Read up to `count` shares starting at byte offset `start_posn`
///
/// Returns the shares and the next byte offset, or [`EOF_POSITION`] when the
/// file ran out before `count` shares were available; the unread tail of the
/// result is zero shares in that case. A missing file is surfaced as
/// [`EngineError::PersistenceFileMissing`] for the caller to map to its
/// sentinel.
pub fn read_shares<T: FieldElement>(
    path: &Path,
    start_posn: i64,
    count: usize,
) -> Result<(Vec<Share<T>>, i64), EngineError> {
    if !path.exists() {
        return Err(EngineError::PersistenceFileMissing(path.to_path_buf()));
    }

    let mut file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| EngineError::FileIoFailed(format!("{}: {e}", path.display())))?;
    let file_len = file
        .metadata()
        .map_err(|e| EngineError::FileIoFailed(format!("{}: {e}", path.display())))?
        .len() as i64;

    let share_bytes = (2 * T::byte_size()) as i64;
    let start = start_posn.max(0);
    let available = ((file_len - start).max(0) / share_bytes) as usize;
    let to_read = available.min(count);

    file.seek(SeekFrom::Start(start as u64))
        .map_err(|e| EngineError::FileIoFailed(format!("{}: {e}", path.display())))?;

    let mut bytes = vec![0u8; to_read * share_bytes as usize];
    file.read_exact(&mut bytes)
        .map_err(|e| EngineError::FileIoFailed(format!("{}: {e}", path.display())))?;

    let mut shares = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(share_bytes as usize) {
        shares.push(Share::from_bytes(chunk)?);
    }
    shares.resize(count, Share::default());

    let end_posn =
        if to_read == count { start + (count as i64) * share_bytes } else { EOF_POSITION };
    Ok((shares, end_posn))
}
