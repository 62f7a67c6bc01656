//! Public operation surface for documents.
//!
//! Every call takes an explicit [`RequestContext`]; identity is resolved at
//! the start of the call and nothing is read from ambient state.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{IdentityResolver, RequestContext, UserId};
use crate::config::HubConfig;
use crate::error::{DocError, DocResult};
use crate::events::{Event, EventBus};
use crate::journal::PropagationJournal;
use crate::propagation::{PropagationQueue, PropagationTicket};
use crate::query;
use crate::storage::{Document, DocumentPatch, DocumentTable, NewDocument};
use crate::tree::{self, SubtreeChange};

/// Fields accepted by [`DocumentService::update`]. Absent fields are left
/// untouched.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocument {
    pub title: Option<String>,
    pub content: Option<String>,
    pub cover_image: Option<String>,
    pub icon: Option<String>,
    pub is_published: Option<bool>,
}

impl From<UpdateDocument> for DocumentPatch {
    fn from(update: UpdateDocument) -> Self {
        DocumentPatch {
            title: update.title,
            content: update.content,
            cover_image: update.cover_image,
            icon: update.icon.map(Some),
            is_published: update.is_published,
            ..DocumentPatch::default()
        }
    }
}

/// Result of archive/restore: the patched target, plus a ticket for the
/// subtree propagation that is still running in the background.
pub struct Mutation {
    pub document: Document,
    pub propagation: PropagationTicket,
}

pub struct DocumentService {
    table: Arc<RwLock<DocumentTable>>,
    identity: Arc<dyn IdentityResolver>,
    propagation: PropagationQueue,
    events: EventBus,
}

impl DocumentService {
    /// Open the table and journal named by `config` and start the
    /// propagation worker, resuming any unfinished propagations.
    pub async fn open(config: &HubConfig, identity: Arc<dyn IdentityResolver>) -> anyhow::Result<Self> {
        let table = Arc::new(RwLock::new(DocumentTable::open(&config.data_dir)?));
        let journal = Arc::new(PropagationJournal::open(&config.journal_dir)?);
        let events = EventBus::new();
        let propagation = PropagationQueue::start(
            table.clone(),
            journal,
            events.clone(),
            config.max_tree_depth,
        )?;
        info!(data_dir = %config.data_dir.display(), "document service ready");
        Ok(Self {
            table,
            identity,
            propagation,
            events,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn table(&self) -> Arc<RwLock<DocumentTable>> {
        self.table.clone()
    }

    /// Tickets for propagations resumed from the journal when the service
    /// was opened.
    pub fn take_recovered(&mut self) -> Vec<PropagationTicket> {
        self.propagation.take_recovered()
    }

    /// Wait for queued propagations and stop the worker.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.propagation.shutdown().await
    }

    async fn require_user(&self, ctx: &RequestContext) -> DocResult<UserId> {
        self.identity
            .resolve(ctx)
            .await
            .ok_or(DocError::Unauthenticated)
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        title: &str,
        parent_document: Option<Uuid>,
    ) -> DocResult<Document> {
        let user = self.require_user(ctx).await?;
        let mut table = self.table.write().await;
        if let Some(parent) = parent_document {
            query::owned(&table, parent, &user)?;
        }
        let doc = table.insert(NewDocument {
            user_id: user.clone(),
            title: title.to_string(),
            parent_document,
        })?;
        drop(table);

        info!(id = %doc.id, %user, parent = ?parent_document, "document created");
        self.events.send(Event::Created {
            id: doc.id,
            user_id: user,
        });
        Ok(doc)
    }

    /// Every document in the table, whoever owns it. Authentication only.
    pub async fn get(&self, ctx: &RequestContext) -> DocResult<Vec<Document>> {
        let user = self.require_user(ctx).await?;
        debug!(%user, "unscoped document listing");
        Ok(query::all(&*self.table.read().await))
    }

    pub async fn get_sidebar(
        &self,
        ctx: &RequestContext,
        parent_document: Option<Uuid>,
    ) -> DocResult<Vec<Document>> {
        let user = self.require_user(ctx).await?;
        Ok(query::sidebar(&*self.table.read().await, &user, parent_document))
    }

    pub async fn get_trash(&self, ctx: &RequestContext) -> DocResult<Vec<Document>> {
        let user = self.require_user(ctx).await?;
        Ok(query::trash(&*self.table.read().await, &user))
    }

    pub async fn get_search(&self, ctx: &RequestContext) -> DocResult<Vec<Document>> {
        let user = self.require_user(ctx).await?;
        Ok(query::search(&*self.table.read().await, &user))
    }

    /// Published, unarchived documents are readable without identity.
    pub async fn get_by_id(&self, ctx: &RequestContext, id: Uuid) -> DocResult<Document> {
        let caller = self.identity.resolve(ctx).await;
        let table = self.table.read().await;
        let doc = table.get(id).ok_or(DocError::NotFound(id))?;
        query::check_read(doc, caller.as_deref())?;
        Ok(doc.clone())
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: UpdateDocument,
    ) -> DocResult<Document> {
        let doc = self.patch_owned(ctx, id, update.into()).await?;
        info!(%id, "document updated");
        self.events.send(Event::Updated { id });
        Ok(doc)
    }

    pub async fn remove_icon(&self, ctx: &RequestContext, id: Uuid) -> DocResult<Document> {
        let patch = DocumentPatch {
            icon: Some(None),
            ..DocumentPatch::default()
        };
        let doc = self.patch_owned(ctx, id, patch).await?;
        self.events.send(Event::Updated { id });
        Ok(doc)
    }

    /// Hard delete of one document. Children are not touched and keep
    /// pointing at the removed id.
    pub async fn remove(&self, ctx: &RequestContext, id: Uuid) -> DocResult<Document> {
        let user = self.require_user(ctx).await?;
        let mut table = self.table.write().await;
        query::owned(&table, id, &user)?;
        let doc = table.delete(id)?.ok_or(DocError::NotFound(id))?;
        drop(table);

        info!(%id, %user, "document removed");
        self.events.send(Event::Removed { id });
        Ok(doc)
    }

    pub async fn archive(&self, ctx: &RequestContext, id: Uuid) -> DocResult<Mutation> {
        let user = self.require_user(ctx).await?;
        let mut table = self.table.write().await;
        query::owned(&table, id, &user)?;
        // journaled before the root changes; if the root patch then fails,
        // the worker finds the root unchanged and skips the job
        let propagation = self.propagation.schedule(&user, id, SubtreeChange::Archive)?;
        let document = tree::archive_root(&mut table, id, &user)?;
        drop(table);

        info!(%id, %user, job = %propagation.job_id(), "document archived");
        self.events.send(Event::Archived { id });
        Ok(Mutation {
            document,
            propagation,
        })
    }

    pub async fn restore(&self, ctx: &RequestContext, id: Uuid) -> DocResult<Mutation> {
        let user = self.require_user(ctx).await?;
        let mut table = self.table.write().await;
        query::owned(&table, id, &user)?;
        let propagation = self.propagation.schedule(&user, id, SubtreeChange::Restore)?;
        let restored = tree::restore_root(&mut table, id, &user)?;
        drop(table);

        info!(%id, %user, detached = restored.detached, job = %propagation.job_id(), "document restored");
        self.events.send(Event::Restored {
            id,
            detached: restored.detached,
        });
        Ok(Mutation {
            document: restored.document,
            propagation,
        })
    }

    async fn patch_owned(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        patch: DocumentPatch,
    ) -> DocResult<Document> {
        let user = self.require_user(ctx).await?;
        let mut table = self.table.write().await;
        query::owned(&table, id, &user)?;
        table.patch(id, patch)?.ok_or(DocError::NotFound(id))
    }
}
