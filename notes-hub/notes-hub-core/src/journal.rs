//! Propagation journal.
//!
//! Append-only log of subtree propagations. A job is recorded as `Scheduled`
//! before it is handed to the worker and as `Finished` once every descendant
//! has been written, so a restart can pick up whatever was still in flight.
//! Each record is length-prefixed and CRC-checked; a torn tail left by a
//! crash is ignored on read.

use anyhow::{anyhow, bail, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::tree::SubtreeChange;

const MAGIC: &[u8] = b"NHJRNL01";
const FILE_NAME: &str = "propagation.log";
/// Upper bound on a frame's payload + CRC; anything larger is corruption.
const MAX_RECORD_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    Scheduled(PendingJob),
    Finished { job: Uuid },
}

/// A propagation that was scheduled and has not been marked finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub job: Uuid,
    pub user_id: String,
    pub root: Uuid,
    pub change: SubtreeChange,
}

pub struct PropagationJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl PropagationJournal {
    /// Open the journal in `dir`, dropping records of finished jobs.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(FILE_NAME);
        let file = Self::open_file(&path)?;
        let journal = Self {
            path,
            file: Mutex::new(file),
        };
        journal.compact()?;
        Ok(journal)
    }

    fn open_file(path: &Path) -> Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(MAGIC)?;
            file.sync_data()?;
        }
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and flush it to disk before returning.
    pub fn append(&self, record: &JournalRecord) -> Result<()> {
        let encoded = Self::encode(record);
        if encoded.len() - 4 > MAX_RECORD_LEN {
            bail!("journal record of {} bytes exceeds limit", encoded.len());
        }
        let mut file = self.file.lock();
        file.write_all(&encoded)?;
        file.sync_data()?;
        Ok(())
    }

    /// Every intact record, in append order.
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            bail!("invalid journal header in {}", self.path.display());
        }
        let mut records = Vec::new();
        while let Ok(record) = Self::decode(&mut reader) {
            records.push(record);
        }
        Ok(records)
    }

    /// Scheduled jobs without a matching `Finished`, in schedule order. Only
    /// the latest job per `(user, root)` is kept: a later job on the same
    /// root supersedes an unfinished earlier one.
    pub fn pending(&self) -> Result<Vec<PendingJob>> {
        let records = self.read_all()?;
        let mut finished = HashSet::new();
        let mut latest: HashMap<(String, Uuid), Uuid> = HashMap::new();
        for record in &records {
            match record {
                JournalRecord::Finished { job } => {
                    finished.insert(*job);
                }
                JournalRecord::Scheduled(job) => {
                    latest.insert((job.user_id.clone(), job.root), job.job);
                }
            }
        }
        Ok(records
            .into_iter()
            .filter_map(|r| match r {
                JournalRecord::Scheduled(job)
                    if !finished.contains(&job.job)
                        && latest.get(&(job.user_id.clone(), job.root)) == Some(&job.job) =>
                {
                    Some(job)
                }
                _ => None,
            })
            .collect())
    }

    /// Rewrite the journal so that it only holds pending jobs, which also
    /// discards any torn tail. Returns the number of records dropped.
    pub fn compact(&self) -> Result<usize> {
        let mut file = self.file.lock();
        let before = self.read_all()?.len();
        let pending = self.pending()?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            out.write_all(MAGIC)?;
            for job in &pending {
                out.write_all(&Self::encode(&JournalRecord::Scheduled(job.clone())))?;
            }
            out.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        *file = Self::open_file(&self.path)?;

        let dropped = before - pending.len();
        debug!(path = %self.path.display(), dropped, pending = pending.len(), "journal compacted");
        Ok(dropped)
    }

    fn encode(record: &JournalRecord) -> Vec<u8> {
        let mut buf = BytesMut::new();
        match record {
            JournalRecord::Scheduled(job) => {
                buf.put_u8(1);
                buf.put_slice(job.job.as_bytes());
                buf.put_slice(job.root.as_bytes());
                buf.put_u8(job.change.as_u8());
                buf.put_u32(job.user_id.len() as u32);
                buf.put(job.user_id.as_bytes());
            }
            JournalRecord::Finished { job } => {
                buf.put_u8(2);
                buf.put_slice(job.as_bytes());
            }
        }

        let data = buf.freeze();
        let mut hasher = Hasher::new();
        hasher.update(&data);
        let crc = hasher.finalize();

        let mut framed = BytesMut::with_capacity(data.len() + 8);
        framed.put_u32(data.len() as u32 + 4); // includes the CRC
        framed.put(data);
        framed.put_u32(crc);
        framed.to_vec()
    }

    fn decode<R: Read>(reader: &mut R) -> Result<JournalRecord> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len < 5 {
            bail!("journal record too short");
        }
        if len > MAX_RECORD_LEN {
            bail!("journal record length {} exceeds limit", len);
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        let (data, crc_bytes) = buf.split_at(len - 4);
        let crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut hasher = Hasher::new();
        hasher.update(data);
        if hasher.finalize() != crc {
            bail!("CRC mismatch");
        }

        let mut cursor = data;
        let tag = cursor.get_u8();
        match tag {
            1 => {
                ensure_remaining(&cursor, 16 + 16 + 1 + 4)?;
                let job = read_uuid(&mut cursor);
                let root = read_uuid(&mut cursor);
                let change = SubtreeChange::from_u8(cursor.get_u8())
                    .ok_or_else(|| anyhow!("unknown subtree change"))?;
                let user_len = cursor.get_u32() as usize;
                ensure_remaining(&cursor, user_len)?;
                let mut user = vec![0u8; user_len];
                cursor.copy_to_slice(&mut user);
                Ok(JournalRecord::Scheduled(PendingJob {
                    job,
                    user_id: String::from_utf8(user)?,
                    root,
                    change,
                }))
            }
            2 => {
                ensure_remaining(&cursor, 16)?;
                Ok(JournalRecord::Finished {
                    job: read_uuid(&mut cursor),
                })
            }
            _ => Err(anyhow!("unknown journal record type {}", tag)),
        }
    }
}

fn ensure_remaining(cursor: &&[u8], n: usize) -> Result<()> {
    if cursor.remaining() < n {
        bail!("truncated journal record");
    }
    Ok(())
}

fn read_uuid(cursor: &mut &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    cursor.copy_to_slice(&mut bytes);
    Uuid::from_bytes(bytes)
}
