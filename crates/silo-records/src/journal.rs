use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RecordError, RecordResult};
use crate::table::{Change, TableSnapshot};

/// One journal record.
///
/// On-disk framing:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized JournalEntry)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// The change-set of one committed transaction.
    Commit(Vec<Change>),
    /// Full table contents; replaces everything before it.
    Snapshot(TableSnapshot),
}

/// Flush/sync strategy for journal appends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every commit.
    #[default]
    EveryWrite,
    /// Flush to the OS and let the page cache decide.
    OsDefault,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct JournalWriter {
    file: File,
    /// End of the last acknowledged frame. Bytes past it are garbage.
    offset: u64,
}

impl JournalWriter {
    /// Write one frame at `offset`, first cutting away anything a failed
    /// append left behind.
    fn write_frame(&mut self, frame: &[u8], sync_mode: SyncMode) -> io::Result<()> {
        if self.file.metadata()?.len() != self.offset {
            self.file.set_len(self.offset)?;
        }
        self.file.write_all(frame)?;
        if sync_mode == SyncMode::EveryWrite {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

/// Append-only, crash-recoverable commit journal.
///
/// On recovery the file is read front to back. Entries that fail the CRC
/// check are skipped; a torn tail (length running past end of file) stops
/// recovery, since nothing after it was acknowledged.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    sync_mode: SyncMode,
}

impl Journal {
    /// Open (or create) the journal at `path`.
    pub fn open(path: &Path, sync_mode: SyncMode) -> RecordResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter { file, offset }),
            sync_mode,
        })
    }

    /// Append one entry. Returns its byte offset.
    ///
    /// Frames go straight to the file, unbuffered. A failed append is cut
    /// back off the file, so a commit reported as failed can never be
    /// replayed and cannot shadow the frames written after it.
    pub fn append(&self, entry: &JournalEntry) -> RecordResult<u64> {
        let frame = encode_frame(entry)?;
        let mut w = self.writer.lock().map_err(|_| RecordError::Poisoned)?;
        let entry_offset = w.offset;

        if let Err(e) = w.write_frame(&frame, self.sync_mode) {
            warn!(offset = entry_offset, error = %e, "journal append failed; truncating");
            if let Err(trunc) = w.file.set_len(entry_offset) {
                // The next append retries the cut before writing.
                warn!(offset = entry_offset, error = %trunc, "journal truncation failed");
            }
            return Err(e.into());
        }
        w.offset += frame.len() as u64;

        debug!(offset = entry_offset, len = frame.len(), "journal append");
        Ok(entry_offset)
    }

    /// Read back every valid entry, oldest first.
    ///
    /// A torn tail is cut off so later appends follow the last whole frame.
    pub fn recover(&self) -> RecordResult<Vec<JournalEntry>> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut entries = Vec::new();
        let mut offset: u64 = 0;
        let mut torn_at = None;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
                warn!(offset, length, file_len, "torn journal tail; stopping recovery");
                torn_at = Some(offset);
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated journal entry; stopping recovery");
                    torn_at = Some(offset);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            offset += HEADER_SIZE as u64 + length as u64;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "journal CRC mismatch; skipping entry"
                );
                continue;
            }
            match bincode::deserialize::<JournalEntry>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(offset, error = %e, "undecodable journal entry; skipping"),
            }
        }

        // A header fragment shorter than HEADER_SIZE is torn as well.
        if torn_at.is_none() && offset < file_len {
            torn_at = Some(offset);
        }
        if let Some(end) = torn_at {
            let mut w = self.writer.lock().map_err(|_| RecordError::Poisoned)?;
            w.file.set_len(end)?;
            w.offset = end;
        }

        debug!(recovered = entries.len(), "journal recovery complete");
        Ok(entries)
    }

    /// Atomically replace the whole journal with a single entry.
    ///
    /// The new contents are written to a sibling temp file and renamed over
    /// the journal, so a crash leaves either the old or the new file.
    pub fn rewrite(&self, entry: &JournalEntry) -> RecordResult<()> {
        let frame = encode_frame(entry)?;
        let mut w = self.writer.lock().map_err(|_| RecordError::Poisoned)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(&frame)?;
        staged.flush()?;
        staged.as_file().sync_all()?;
        staged
            .persist(&self.path)
            .map_err(|e| RecordError::Io(e.error))?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        w.offset = file.metadata()?.len();
        w.file = file;

        debug!(len = frame.len(), "journal rewritten");
        Ok(())
    }

    /// Current end-of-journal offset.
    pub fn offset(&self) -> RecordResult<u64> {
        Ok(self.writer.lock().map_err(|_| RecordError::Poisoned)?.offset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}

fn encode_frame(entry: &JournalEntry) -> RecordResult<Vec<u8>> {
    let payload =
        bincode::serialize(entry).map_err(|e| RecordError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| RecordError::Serialization("journal entry exceeds 4 GiB".into()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_types::FileId;

    fn entry() -> JournalEntry {
        JournalEntry::Commit(vec![Change::DeleteFile(FileId::new())])
    }

    #[test]
    fn append_and_recover_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(&dir.path().join("records.journal"), SyncMode::EveryWrite)
            .unwrap();
        let (a, b) = (entry(), entry());
        journal.append(&a).unwrap();
        journal.append(&b).unwrap();
        assert_eq!(journal.recover().unwrap(), vec![a, b]);
    }

    #[test]
    fn recover_empty_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal =
            Journal::open(&dir.path().join("nested/empty.journal"), SyncMode::OsDefault).unwrap();
        assert!(journal.recover().unwrap().is_empty());
        assert_eq!(journal.offset().unwrap(), 0);
    }

    #[test]
    fn crc_mismatch_skips_only_that_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.journal");
        let journal = Journal::open(&path, SyncMode::EveryWrite).unwrap();
        journal.append(&entry()).unwrap();
        let survivor = entry();
        journal.append(&survivor).unwrap();
        drop(journal);

        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0xFF;
        file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
        file.write_all(&byte).unwrap();
        file.sync_all().unwrap();

        let journal = Journal::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(journal.recover().unwrap(), vec![survivor]);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.journal");
        let journal = Journal::open(&path, SyncMode::EveryWrite).unwrap();
        let kept = entry();
        journal.append(&kept).unwrap();
        journal.append(&entry()).unwrap();
        let len = fs::metadata(&path).unwrap().len();
        drop(journal);

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let journal = Journal::open(&path, SyncMode::EveryWrite).unwrap();
        assert_eq!(journal.recover().unwrap(), vec![kept.clone()]);

        let next = entry();
        journal.append(&next).unwrap();
        assert_eq!(journal.recover().unwrap(), vec![kept, next]);
    }

    #[test]
    fn leftovers_of_a_failed_append_are_cut_before_the_next_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.journal");
        let journal = Journal::open(&path, SyncMode::EveryWrite).unwrap();
        let first = entry();
        journal.append(&first).unwrap();
        let acknowledged = journal.offset().unwrap();

        // Half a frame from an append that errored out after a short write.
        let aborted = encode_frame(&entry()).unwrap();
        let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(&aborted[..aborted.len() / 2]).unwrap();
        drop(raw);

        let second = entry();
        assert_eq!(journal.append(&second).unwrap(), acknowledged);
        assert_eq!(journal.recover().unwrap(), vec![first, second]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_append_is_not_acknowledged() {
        let journal = Journal::open(Path::new("/dev/full"), SyncMode::OsDefault).unwrap();
        let err = journal.append(&entry()).unwrap_err();
        assert!(matches!(err, RecordError::Io(_)));
        assert_eq!(journal.offset().unwrap(), 0);
        assert!(journal.recover().unwrap().is_empty());
    }

    #[test]
    fn rewrite_replaces_contents_and_keeps_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.journal");
        let journal = Journal::open(&path, SyncMode::EveryWrite).unwrap();
        for _ in 0..5 {
            journal.append(&entry()).unwrap();
        }
        let snapshot = JournalEntry::Snapshot(TableSnapshot::default());
        journal.rewrite(&snapshot).unwrap();
        let after = entry();
        journal.append(&after).unwrap();

        assert_eq!(journal.recover().unwrap(), vec![snapshot, after]);
    }
}
