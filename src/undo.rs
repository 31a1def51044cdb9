//! The save log: a packed stream of reversible records kept in a sibling
//! buffer, walked backwards by undo.
//!
//! Each record is `header | payload | trailer`. The header carries the
//! operation, its extent and the owner's `modified` flag from before the
//! mutation; `Delete` and `Write` records carry the overwritten bytes as
//! payload. The trailer repeats the payload size so the stream can be
//! walked from its end: read the trailer, step over the payload and header,
//! and the previous record's end is right there.
//!
//! The log buffer itself is `SYSTEM`-flagged and never logs its own
//! mutations, which is what keeps recording from recursing.

use crate::buffer::{Buffer, BufferFlags, LogOp};
use crate::error::Error;

/// Upper bound on the number of records kept in a save log. Appending past
/// the bound evicts the oldest record first.
pub const LOG_MAX: usize = 50;

pub(crate) const HEADER_SIZE: usize = 18;
pub(crate) const TRAILER_SIZE: usize = 8;

struct Record {
    op: LogOp,
    offset: usize,
    size: usize,
    was_modified: bool,
}

impl Record {
    /// Total encoded length, header and trailer included.
    fn total_len(&self) -> usize {
        let payload = match self.op {
            LogOp::Insert => 0,
            LogOp::Delete | LogOp::Write => self.size,
        };
        HEADER_SIZE + payload + TRAILER_SIZE
    }
}

fn encode_header(op: LogOp, offset: usize, size: usize, was_modified: bool) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0] = op as u8;
    buf[1] = was_modified as u8;
    buf[2..10].copy_from_slice(&(offset as u64).to_le_bytes());
    buf[10..18].copy_from_slice(&(size as u64).to_le_bytes());
    buf
}

fn decode_header(buf: &[u8; HEADER_SIZE]) -> Record {
    let op = match buf[0] {
        0 => LogOp::Insert,
        1 => LogOp::Delete,
        2 => LogOp::Write,
        _ => unreachable!("corrupt save-log record"),
    };
    let mut quad = [0u8; 8];
    quad.copy_from_slice(&buf[2..10]);
    let offset = u64::from_le_bytes(quad) as usize;
    quad.copy_from_slice(&buf[10..18]);
    let size = u64::from_le_bytes(quad) as usize;
    Record {
        op,
        offset,
        size,
        was_modified: buf[1] != 0,
    }
}

/// Appends one record to `owner`'s save log, creating the log buffer on
/// first use and evicting the oldest record when the ring is full.
///
/// `Delete`/`Write` payloads are read from `owner` itself, so this must run
/// before the mutation touches the bytes.
pub(crate) fn append_record(
    owner: &mut Buffer,
    op: LogOp,
    offset: usize,
    size: usize,
    was_modified: bool,
) {
    if owner.log_buffer.is_none() {
        let name = format!("*log <{}>*", owner.name);
        owner.log_buffer = Some(Box::new(Buffer::new(name, BufferFlags::SYSTEM)));
    }
    let mut log = owner.log_buffer.take().unwrap();

    if owner.log_count >= LOG_MAX - 1 {
        let mut head = [0u8; HEADER_SIZE];
        log.read(0, &mut head);
        let len = decode_header(&head).total_len();
        log.delete(0, len);
        owner.log_new_index -= len;
        if owner.log_current > len {
            owner.log_current -= len;
        } else if owner.log_current != 0 {
            // the undo cursor pointed into the evicted record
            owner.log_current = 0;
        }
        owner.log_count -= 1;
        log::trace!("save log of {:?} evicted its oldest record ({} bytes)", owner.name, len);
    }

    log.write(owner.log_new_index, &encode_header(op, offset, size, was_modified));
    owner.log_new_index += HEADER_SIZE;

    let payload = match op {
        LogOp::Insert => 0,
        LogOp::Delete | LogOp::Write => size,
    };
    if payload > 0 {
        let index = owner.log_new_index;
        log.insert_from(index, owner, offset, payload);
        owner.log_new_index += payload;
    }

    log.write(owner.log_new_index, &(payload as u64).to_le_bytes());
    owner.log_new_index += TRAILER_SIZE;
    owner.log_count += 1;
    owner.log_buffer = Some(log);
}

impl Buffer {
    /// Reverses the most recent mutation still in the save log.
    ///
    /// Consecutive calls keep stepping backwards through the log; any fresh
    /// edit in between restarts the walk from the newest record. Replaying
    /// also appends the inverse record, so an interrupted undo run can
    /// itself be undone.
    ///
    /// Returns a cursor hint: the offset just past the restored bytes.
    pub fn undo(&mut self) -> Result<usize, Error> {
        if self.log_buffer.is_none() {
            return Err(Error::NoUndoInfo);
        }
        let log_index = if self.log_current == 0 {
            self.log_new_index
        } else {
            self.log_current - 1
        };
        if log_index == 0 {
            return Err(Error::NoUndoInfo);
        }
        let mut log = self.log_buffer.take().unwrap();

        // walk one record backwards through its trailer
        let mut trailer = [0u8; TRAILER_SIZE];
        log.read(log_index - TRAILER_SIZE, &mut trailer);
        let payload = u64::from_le_bytes(trailer) as usize;
        let start = log_index - TRAILER_SIZE - payload - HEADER_SIZE;
        self.log_current = start + 1;

        let mut header = [0u8; HEADER_SIZE];
        log.read(start, &mut header);
        let record = decode_header(&header);
        let data_index = start + HEADER_SIZE;
        log::debug!(
            "undo {:?}: {:?} at {} ({} bytes)",
            self.name,
            record.op,
            record.offset,
            record.size
        );

        self.undoing = true;
        let cursor = match record.op {
            LogOp::Write => {
                // restore the overwritten span without logging the two
                // halves, then record one symmetric write
                let saved = self.save_log;
                self.save_log = false;
                self.delete(record.offset, record.size);
                self.insert_from(record.offset, &mut log, data_index, record.size);
                self.save_log = saved;
                self.log_buffer = Some(log);
                self.append_symmetric(LogOp::Write, record.offset, record.size);
                record.offset + record.size
            }
            LogOp::Delete => {
                // the log buffer must not record the payload copy before it
                // is taken, hence the same bracketing
                let saved = self.save_log;
                self.save_log = false;
                self.insert_from(record.offset, &mut log, data_index, record.size);
                self.save_log = saved;
                self.log_buffer = Some(log);
                self.append_symmetric(LogOp::Insert, record.offset, record.size);
                record.offset + record.size
            }
            LogOp::Insert => {
                self.log_buffer = Some(log);
                // the delete records its own inverse entry
                self.delete(record.offset, record.size);
                record.offset
            }
        };
        self.undoing = false;
        self.modified = record.was_modified;
        Ok(cursor)
    }

    /// Appends a replay record without re-notifying callbacks; the replayed
    /// mutation already fanned out once.
    fn append_symmetric(&mut self, op: LogOp, offset: usize, size: usize) {
        if !self.save_log {
            return;
        }
        let was_modified = self.modified;
        self.modified = true;
        append_record(self, op, offset, size, was_modified);
    }

    /// Drops the whole undo history and clears the modified flag.
    pub fn log_reset(&mut self) {
        if self.log_buffer.is_some() {
            log::debug!("resetting save log of {:?}", self.name);
            self.log_buffer = None;
            self.log_new_index = 0;
            self.log_current = 0;
            self.log_count = 0;
        }
        self.modified = false;
    }
}
