use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// One durable unit: every event in it is replayed, or none are.
pub type Commit = Vec<Event>;

/// Encode a single commit to `[len][bincode][crc32]` format.
fn encode_commit(writer: &mut impl Write, commit: &[Event]) -> io::Result<()> {
    let payload =
        bincode::serialize(commit).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "commit too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one framed commit and its on-disk size. `Ok(None)` means clean end of log or a
/// torn/corrupt tail.
fn decode_commit(reader: &mut impl Read) -> io::Result<Option<(Commit, u64)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut crc_buf = [0u8; 4];
    match reader.read_exact(&mut crc_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    let frame_len = 8 + len as u64;
    Ok(bincode::deserialize::<Commit>(&payload)
        .ok()
        .map(|commit| (commit, frame_len)))
}

/// Intact commits of a log plus the byte length they occupy.
struct Scan {
    commits: Vec<Commit>,
    intact_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                commits: Vec::new(),
                intact_len: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut commits = Vec::new();
    let mut intact_len = 0u64;
    while let Some((commit, frame_len)) = decode_commit(&mut reader)? {
        commits.push(commit);
        intact_len += frame_len;
    }
    Ok(Scan {
        commits,
        intact_len,
    })
}

/// Cut a torn or corrupt tail off the log so new commits land right after the last
/// intact one.
fn truncate_tail(path: &Path, intact_len: u64) -> io::Result<()> {
    let file = match OpenOptions::new().write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let on_disk = file.metadata()?.len();
    if on_disk > intact_len {
        tracing::warn!(
            path = %path.display(),
            discarded = on_disk - intact_len,
            "truncating torn WAL tail"
        );
        file.set_len(intact_len)?;
        file.sync_all()?;
    }
    Ok(())
}

/// Append-only write-ahead log of commits.
///
/// Format per entry: `[u32: len][bincode: Vec<Event>][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) fails the length or CRC check and is dropped
///   whole, so a multi-event commit is never half-replayed.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay the log at `path`, drop any torn tail, and open it for appends.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Commit>)> {
        let Scan {
            commits,
            intact_len,
        } = scan(path)?;
        truncate_tail(path, intact_len)?;
        Ok((Self::open_append(path)?, commits))
    }

    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    fn open_append(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one commit and fsync. Production goes through `append_buffered` +
    /// `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, commit: &[Event]) -> io::Result<()> {
        self.append_buffered(commit)?;
        self.flush_sync()
    }

    /// Buffer a commit without flushing. `flush_sync()` makes the batch durable.
    pub fn append_buffered(&mut self, commit: &[Event]) -> io::Result<()> {
        encode_commit(&mut self.writer, commit)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot as a single commit to a temp file and fsync.
    pub fn write_compact_file(path: &Path, snapshot: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        encode_commit(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the WAL and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, snapshot: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, snapshot)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay every intact commit in order. Stops at the first torn or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Vec<Commit>> {
        scan(path).map(|s| s.commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReservationStatus, Span, UserId};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomhold_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room_created(name: &str) -> Event {
        Event::RoomCreated {
            id: Ulid::new(),
            name: name.into(),
            description: None,
            at: 1_800_000_000_000,
        }
    }

    #[test]
    fn multi_event_commit_replays_as_one_unit() {
        let path = tmp_path("multi_event.wal");
        let room_id = Ulid::new();
        let bulk: Commit = (0..3)
            .map(|i| Event::TimeSlotCreated {
                id: Ulid::new(),
                room_id,
                span: Span::new(i * 100, i * 100 + 50),
                at: 1_800_000_000_000,
            })
            .collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&[room_created("Attic")]).unwrap();
            wal.append(&bulk).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[1], bulk);
    }

    #[test]
    fn torn_tail_drops_whole_commit() {
        let path = tmp_path("torn_tail.wal");
        let first = vec![room_created("Cellar")];

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        // Simulate a crash midway through writing the next commit.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&200u32.to_le_bytes()).unwrap();
            f.write_all(&[7u8; 30]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![first]);
    }

    #[test]
    fn append_after_torn_tail_survives_restart() {
        let path = tmp_path("torn_then_append.wal");
        let first = vec![room_created("Cellar")];
        let second = vec![room_created("Attic")];

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&200u32.to_le_bytes()).unwrap();
            f.write_all(&[7u8; 30]).unwrap();
        }

        // Restart: recover, then keep writing.
        {
            let (mut wal, replayed) = Wal::recover(&path).unwrap();
            assert_eq!(replayed, vec![first.clone()]);
            wal.append(&second).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn recover_keeps_intact_log_untouched() {
        let path = tmp_path("recover_intact.wal");
        let commits: Vec<Commit> = (0..3).map(|i| vec![room_created(&format!("r{i}"))]).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for c in &commits {
                wal.append(c).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();
        let (_, replayed) = Wal::recover(&path).unwrap();
        assert_eq!(replayed, commits);
        assert_eq!(fs::metadata(&path).unwrap().len(), before);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        let commit = vec![Event::ReservationStatusChanged {
            id: Ulid::new(),
            time_slot_id: Ulid::new(),
            status: ReservationStatus::Expired,
            at: 1_800_000_000_000,
        }];
        {
            let payload = bincode::serialize(&commit).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let slot_id = Ulid::new();
        let reservation_id = Ulid::new();
        let placed = Event::ReservationPlaced {
            id: reservation_id,
            user_id: UserId::parse("alice").unwrap(),
            time_slot_id: slot_id,
            at: 1_800_000_000_000,
        };
        let confirmed = Event::ReservationStatusChanged {
            id: reservation_id,
            time_slot_id: slot_id,
            status: ReservationStatus::Confirmed,
            at: 1_800_000_001_000,
        };

        let snapshot = vec![room_created("Loft"), placed.clone()];
        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..20 {
                wal.append(&[room_created("churn")]).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            let after = fs::metadata(&path).unwrap().len();
            assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
            wal.append(&[confirmed.clone()]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![snapshot, vec![confirmed]]);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let commits: Vec<Commit> = (0..5).map(|i| vec![room_created(&format!("r{i}"))]).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for c in &commits {
                wal.append_buffered(c).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), commits);
    }
}
