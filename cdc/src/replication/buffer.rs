use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::CdcResult;
use crate::types::RowChangeRecord;

/// Records spilled to disk, oldest first, one JSON document per line.
#[derive(Debug)]
struct Overflow {
    file: NamedTempFile,
    writer: Option<BufWriter<File>>,
    reader: Option<BufReader<File>>,
    pending: usize,
}

impl Overflow {
    fn new() -> CdcResult<Self> {
        let file = NamedTempFile::new()?;
        let writer = BufWriter::new(file.reopen()?);

        Ok(Self {
            file,
            writer: Some(writer),
            reader: None,
            pending: 0,
        })
    }

    fn write(&mut self, record: &RowChangeRecord) -> CdcResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
            self.pending += 1;
        }

        Ok(())
    }

    fn read(&mut self) -> CdcResult<Option<RowChangeRecord>> {
        if self.pending == 0 {
            return Ok(None);
        }

        if self.reader.is_none() {
            if let Some(mut writer) = self.writer.take() {
                writer.flush()?;
            }
            self.reader = Some(BufReader::new(self.file.reopen()?));
        }

        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut line = String::new();
        reader.read_line(&mut line)?;
        self.pending -= 1;

        Ok(Some(serde_json::from_str(&line)?))
    }

    fn is_writable(&self) -> bool {
        self.writer.is_some()
    }
}

/// Ordered records of one transaction.
///
/// Up to `max_in_memory` records are kept in memory; older records spill to a temporary file so
/// that very large transactions do not exhaust memory. The transaction-wide attributes, only
/// known once the transaction is complete, are stamped on each record as it is removed.
#[derive(Debug)]
pub struct RecordBuffer {
    memory: VecDeque<RowChangeRecord>,
    overflow: Option<Overflow>,
    max_in_memory: usize,
    xid: Option<u64>,
    server_id: Option<u64>,
    thread_id: Option<u64>,
    schema_id: Option<u64>,
}

impl RecordBuffer {
    pub fn new(max_in_memory: usize) -> Self {
        Self {
            memory: VecDeque::new(),
            overflow: None,
            max_in_memory: max_in_memory.max(1),
            xid: None,
            server_id: None,
            thread_id: None,
            schema_id: None,
        }
    }

    pub fn add(&mut self, record: RowChangeRecord) -> CdcResult<()> {
        self.memory.push_back(record);

        let can_spill = self
            .overflow
            .as_ref()
            .is_none_or(|overflow| overflow.is_writable());
        if self.memory.len() > self.max_in_memory && can_spill {
            if self.overflow.is_none() {
                debug!(
                    max_in_memory = self.max_in_memory,
                    "transaction exceeds in-memory limit, spilling records to disk"
                );
                self.overflow = Some(Overflow::new()?);
            }

            while self.memory.len() > self.max_in_memory {
                let (Some(oldest), Some(overflow)) =
                    (self.memory.pop_front(), self.overflow.as_mut())
                else {
                    break;
                };
                overflow.write(&oldest)?;
            }
        }

        Ok(())
    }

    /// Removes the oldest record, stamped with the transaction-wide attributes.
    pub fn remove_first(&mut self) -> CdcResult<Option<RowChangeRecord>> {
        let spilled = match self.overflow.as_mut() {
            Some(overflow) => overflow.read()?,
            None => None,
        };

        let Some(mut record) = spilled.or_else(|| self.memory.pop_front()) else {
            return Ok(None);
        };

        record.xid = self.xid;
        record.server_id = self.server_id;
        record.thread_id = self.thread_id;
        // Records decoded from a schema change carry their own version.
        if record.schema_id.is_none() {
            record.schema_id = self.schema_id;
        }

        Ok(Some(record))
    }

    /// The newest record, always held in memory.
    pub fn last_mut(&mut self) -> Option<&mut RowChangeRecord> {
        self.memory.back_mut()
    }

    pub fn last(&self) -> Option<&RowChangeRecord> {
        self.memory.back()
    }

    pub fn len(&self) -> usize {
        self.memory.len() + self.overflow.as_ref().map_or(0, |overflow| overflow.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_spilled(&self) -> bool {
        self.overflow.is_some()
    }

    pub fn set_xid(&mut self, xid: u64) {
        self.xid = Some(xid);
    }

    pub fn set_server_id(&mut self, server_id: u64) {
        self.server_id = Some(server_id);
    }

    pub fn set_thread_id(&mut self, thread_id: u64) {
        self.thread_id = Some(thread_id);
    }

    pub fn set_schema_id(&mut self, schema_id: u64) {
        self.schema_id = Some(schema_id);
    }
}
