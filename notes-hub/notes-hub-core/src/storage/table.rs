//! Filesystem-backed document table. Each record lives in its own JSON file
//! and is loaded at startup; the secondary indexes are rebuilt in memory.

use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::document::{Document, DocumentPatch, NewDocument};

type ParentKey = (String, Option<Uuid>);
/// Ordering key; the id breaks ties between records sharing a sequence.
type SeqKey = (u64, Uuid);

pub struct DocumentTable {
    dir: PathBuf,
    docs: HashMap<Uuid, Document>,
    by_user_parent: HashMap<ParentKey, BTreeSet<SeqKey>>,
    by_user: HashMap<String, BTreeSet<SeqKey>>,
    next_seq: u64,
}

impl DocumentTable {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut table = Self {
            dir,
            docs: HashMap::new(),
            by_user_parent: HashMap::new(),
            by_user: HashMap::new(),
            next_seq: 0,
        };

        let mut seen_seqs = HashSet::new();
        for entry in std::fs::read_dir(&table.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            match Self::load(&path) {
                Ok(doc) if doc.id == id => {
                    if !seen_seqs.insert(doc.creation_seq) {
                        warn!(file = %path.display(), seq = doc.creation_seq, "duplicate creation sequence, ordering falls back to id");
                    }
                    table.next_seq = table.next_seq.max(doc.creation_seq + 1);
                    table.index(&doc);
                    table.docs.insert(id, doc);
                }
                Ok(doc) => warn!(file = %path.display(), record = %doc.id, "record id does not match file name, skipping"),
                Err(e) => warn!(file = %path.display(), error = %e, "unreadable record, skipping"),
            }
        }
        debug!(dir = %table.dir.display(), records = table.docs.len(), "document table opened");
        Ok(table)
    }

    fn load(path: &Path) -> Result<Document> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Directory where records are persisted.
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Document> {
        self.docs.get(&id)
    }

    pub fn insert(&mut self, new: NewDocument) -> Result<Document> {
        let id = Uuid::new_v4();
        let doc = Document::from_new(id, self.next_seq, new);
        self.persist(&doc)?;
        self.next_seq += 1;
        self.index(&doc);
        self.docs.insert(id, doc.clone());
        Ok(doc)
    }

    /// Apply a patch to a single record. Returns `None` when the record does
    /// not exist. Unchanged records are not rewritten.
    pub fn patch(&mut self, id: Uuid, patch: DocumentPatch) -> Result<Option<Document>> {
        let Some(current) = self.docs.get(&id) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        if !updated.apply(patch) {
            return Ok(Some(updated));
        }
        self.persist(&updated)?;
        if let Some(old) = self.docs.insert(id, updated.clone()) {
            if old.parent_document != updated.parent_document {
                self.unindex(&old);
                self.index(&updated);
            }
        }
        Ok(Some(updated))
    }

    /// Hard delete of exactly one record.
    pub fn delete(&mut self, id: Uuid) -> Result<Option<Document>> {
        if !self.docs.contains_key(&id) {
            return Ok(None);
        }
        let path = self.path(id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let doc = self
            .docs
            .remove(&id)
            .ok_or_else(|| anyhow!("record {} vanished during delete", id))?;
        self.unindex(&doc);
        Ok(Some(doc))
    }

    /// Records owned by `user` whose parent is `parent` (roots when `None`),
    /// in insertion order.
    pub fn by_user_parent(&self, user: &str, parent: Option<Uuid>) -> Vec<&Document> {
        self.by_user_parent
            .get(&(user.to_string(), parent))
            .map(|ids| self.resolve(ids))
            .unwrap_or_default()
    }

    /// Every record owned by `user`, in insertion order.
    pub fn by_user(&self, user: &str) -> Vec<&Document> {
        self.by_user
            .get(user)
            .map(|ids| self.resolve(ids))
            .unwrap_or_default()
    }

    /// Every record in the table, in insertion order.
    pub fn all(&self) -> Vec<&Document> {
        let mut docs: Vec<&Document> = self.docs.values().collect();
        docs.sort_by_key(|d| (d.creation_seq, d.id));
        docs
    }

    fn resolve(&self, ids: &BTreeSet<SeqKey>) -> Vec<&Document> {
        ids.iter().filter_map(|(_, id)| self.docs.get(id)).collect()
    }

    fn path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    // temp file + rename: a record file on disk is always complete
    fn persist(&self, doc: &Document) -> Result<()> {
        let path = self.path(doc.id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn index(&mut self, doc: &Document) {
        self.by_user_parent
            .entry((doc.user_id.clone(), doc.parent_document))
            .or_default()
            .insert((doc.creation_seq, doc.id));
        self.by_user
            .entry(doc.user_id.clone())
            .or_default()
            .insert((doc.creation_seq, doc.id));
    }

    fn unindex(&mut self, doc: &Document) {
        let key = (doc.user_id.clone(), doc.parent_document);
        if let Some(ids) = self.by_user_parent.get_mut(&key) {
            ids.remove(&(doc.creation_seq, doc.id));
            if ids.is_empty() {
                self.by_user_parent.remove(&key);
            }
        }
        if let Some(ids) = self.by_user.get_mut(&doc.user_id) {
            ids.remove(&(doc.creation_seq, doc.id));
            if ids.is_empty() {
                self.by_user.remove(&doc.user_id);
            }
        }
    }
}
