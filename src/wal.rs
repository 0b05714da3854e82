use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one framed event. `Ok(None)` on a clean end of file, a torn tail, or a bad checksum.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    let mut crc_buf = [0u8; 4];
    for buf in [&mut payload[..], &mut crc_buf[..]] {
        match reader.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload).ok())
}

/// Append-only booking log. A torn final entry after a crash is dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// Events buffered since the last successful `flush_sync`.
    unsynced: u64,
    /// File length as of the last successful `flush_sync`.
    synced_len: u64,
    #[cfg(test)]
    pub(crate) fail_next_flush: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            unsynced: 0,
            synced_len,
            #[cfg(test)]
            fail_next_flush: Default::default(),
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing. `flush_sync` commits the whole batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.unsynced += 1;
        encode_event(&mut self.writer, event)
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if self
            .fail_next_flush
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(io::Error::other("injected flush failure"));
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact += self.unsynced;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop everything appended since the last successful `flush_sync`: the buffered bytes
    /// and any of them that already reached the file.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.synced_len)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the buffer without writing it out
        let (_file, _buffered) = stale.into_parts();
        self.unsynced = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a snapshot to `<path>.wal.tmp` and fsync it, then rename it over the live log.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.unsynced = 0;
        Ok(())
    }

    /// All intact events in file order. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = decode_event(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{NaiveDate, Utc};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomlet_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn admitted(room_id: Ulid) -> Event {
        let now = Utc::now();
        let check_in = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let check_out = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        Event::BookingAdmitted {
            booking: Booking {
                id: Ulid::new(),
                room_id,
                customer_id: Ulid::new(),
                owner_id: Ulid::new(),
                stay: StayRange::new(check_in, check_out),
                total_price: 200,
                status: BookingStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        }
    }

    fn status_changed(id: Ulid, room_id: Ulid, status: BookingStatus) -> Event {
        Event::BookingStatusChanged { id, room_id, status, at: Utc::now() }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let room = Ulid::new();
        let first = admitted(room);
        let Event::BookingAdmitted { ref booking } = first else { unreachable!() };
        let events = vec![
            first.clone(),
            status_changed(booking.id, room, BookingStatus::Confirmed),
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = admitted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            // length prefix promising 200 bytes, then only 3
            f.write_all(&200u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn discard_unsynced_drops_the_failed_batch() {
        let path = tmp_path("discard_unsynced.wal");
        let room = Ulid::new();
        let kept = admitted(room);
        let failed = admitted(room);
        let next = admitted(room);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();

            wal.append_buffered(&failed).unwrap();
            wal.fail_next_flush.store(true, std::sync::atomic::Ordering::SeqCst);
            assert!(wal.flush_sync().is_err());
            wal.discard_unsynced().unwrap();

            wal.append(&next).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, next]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn discard_unsynced_cuts_bytes_already_on_disk() {
        let path = tmp_path("discard_on_disk.wal");
        let room = Ulid::new();
        let kept = admitted(room);

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        // more than the writer buffers, so part of it reaches the file before any flush
        for _ in 0..200 {
            wal.append_buffered(&admitted(room)).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() > wal.synced_len);
        wal.discard_unsynced().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), wal.synced_len);
        assert_eq!(wal.appends_since_compact(), 1);
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("bad_crc.wal");
        let good = admitted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&admitted(Ulid::new())).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_replaces_history_with_snapshot() {
        let path = tmp_path("compact.wal");
        let room = Ulid::new();
        let mut snapshot = Vec::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            for _ in 0..10 {
                let event = admitted(room);
                let Event::BookingAdmitted { booking } = &event else { unreachable!() };
                wal.append(&event).unwrap();
                wal.append(&status_changed(booking.id, room, BookingStatus::Cancelled))
                    .unwrap();
                let mut settled = booking.clone();
                settled.status = BookingStatus::Cancelled;
                snapshot.push(Event::BookingAdmitted { booking: settled });
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), snapshot);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_after_compact_lands_in_new_file() {
        let path = tmp_path("compact_then_append.wal");
        let seed = admitted(Ulid::new());
        let later = admitted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&seed).unwrap();
            wal.compact(std::slice::from_ref(&seed)).unwrap();
            wal.append(&later).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![seed, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_need_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|_| admitted(Ulid::new())).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
