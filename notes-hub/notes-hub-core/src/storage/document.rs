use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in a user's document forest, as persisted in the table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub user_id: String,
    /// Back-reference to the parent. May dangle after a hard delete.
    #[serde(default)]
    pub parent_document: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default, alias = "isArchieved")]
    pub is_archived: bool,
    #[serde(default)]
    pub is_published: bool,
    /// Insertion order within the table. Listings sort on this, newest first.
    pub creation_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when inserting a record.
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub user_id: String,
    pub title: String,
    pub parent_document: Option<Uuid>,
}

/// Partial update of a record. `None` leaves the field untouched; the nested
/// options on `icon` and `parent_document` allow clearing them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub cover_image: Option<String>,
    pub icon: Option<Option<String>>,
    pub parent_document: Option<Option<Uuid>>,
    pub is_archived: Option<bool>,
    pub is_published: Option<bool>,
}

impl DocumentPatch {
    pub fn archived(flag: bool) -> Self {
        Self {
            is_archived: Some(flag),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Document {
    pub(crate) fn from_new(id: Uuid, seq: u64, new: NewDocument) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: new.user_id,
            parent_document: new.parent_document,
            title: new.title,
            content: None,
            cover_image: None,
            icon: None,
            is_archived: false,
            is_published: false,
            creation_seq: seq,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `patch` in place. Returns whether any field actually changed;
    /// `updated_at` only moves when something did.
    pub fn apply(&mut self, patch: DocumentPatch) -> bool {
        let mut changed = false;
        if let Some(title) = patch.title {
            changed |= replace(&mut self.title, title);
        }
        if let Some(content) = patch.content {
            changed |= replace(&mut self.content, Some(content));
        }
        if let Some(cover) = patch.cover_image {
            changed |= replace(&mut self.cover_image, Some(cover));
        }
        if let Some(icon) = patch.icon {
            changed |= replace(&mut self.icon, icon);
        }
        if let Some(parent) = patch.parent_document {
            changed |= replace(&mut self.parent_document, parent);
        }
        if let Some(flag) = patch.is_archived {
            changed |= replace(&mut self.is_archived, flag);
        }
        if let Some(flag) = patch.is_published {
            changed |= replace(&mut self.is_published, flag);
        }
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
