//! Read-only projections over the document table. Listings are returned
//! newest first.

use uuid::Uuid;

use crate::error::{DocError, DocResult};
use crate::storage::{Document, DocumentTable};

/// Fetch a record and check that `user` owns it.
pub fn owned<'a>(table: &'a DocumentTable, id: Uuid, user: &str) -> DocResult<&'a Document> {
    let doc = table.get(id).ok_or(DocError::NotFound(id))?;
    if doc.user_id != user {
        return Err(DocError::Unauthorized);
    }
    Ok(doc)
}

/// Visibility rule for single-document reads: published, unarchived
/// documents are public; everything else is owner-only.
pub fn check_read(doc: &Document, caller: Option<&str>) -> DocResult<()> {
    if doc.is_published && !doc.is_archived {
        return Ok(());
    }
    match caller {
        None => Err(DocError::Unauthenticated),
        Some(user) if user != doc.user_id => Err(DocError::Unauthorized),
        Some(_) => Ok(()),
    }
}

/// Direct, unarchived children of `parent` (roots when `None`).
pub fn sidebar(table: &DocumentTable, user: &str, parent: Option<Uuid>) -> Vec<Document> {
    newest_first(table.by_user_parent(user, parent), |d| !d.is_archived)
}

pub fn trash(table: &DocumentTable, user: &str) -> Vec<Document> {
    newest_first(table.by_user(user), |d| d.is_archived)
}

pub fn search(table: &DocumentTable, user: &str) -> Vec<Document> {
    newest_first(table.by_user(user), |d| !d.is_archived)
}

/// Every record regardless of owner.
pub fn all(table: &DocumentTable) -> Vec<Document> {
    newest_first(table.all(), |_| true)
}

fn newest_first(docs: Vec<&Document>, keep: impl Fn(&Document) -> bool) -> Vec<Document> {
    docs.into_iter()
        .rev()
        .filter(|d| keep(d))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocumentPatch, NewDocument};

    fn add(table: &mut DocumentTable, user: &str, title: &str, parent: Option<Uuid>) -> Uuid {
        table
            .insert(NewDocument {
                user_id: user.to_string(),
                title: title.to_string(),
                parent_document: parent,
            })
            .unwrap()
            .id
    }

    fn titles(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.title.as_str()).collect()
    }

    #[test]
    fn listings_filter_and_order() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut table = DocumentTable::open(tempdir.path()).unwrap();
        let first = add(&mut table, "user1", "first", None);
        add(&mut table, "user1", "second", None);
        add(&mut table, "user1", "child", Some(first));
        let gone = add(&mut table, "user1", "gone", None);
        add(&mut table, "user2", "theirs", None);
        table.patch(gone, DocumentPatch::archived(true)).unwrap();

        assert_eq!(titles(&sidebar(&table, "user1", None)), vec!["second", "first"]);
        assert_eq!(titles(&sidebar(&table, "user1", Some(first))), vec!["child"]);
        assert_eq!(titles(&trash(&table, "user1")), vec!["gone"]);
        assert_eq!(
            titles(&search(&table, "user1")),
            vec!["child", "second", "first"]
        );
        assert_eq!(all(&table).len(), 5);
        assert_eq!(all(&table)[0].title, "theirs");
    }

    #[test]
    fn owned_checks_existence_then_owner() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut table = DocumentTable::open(tempdir.path()).unwrap();
        let id = add(&mut table, "user1", "mine", None);
        assert!(owned(&table, id, "user1").is_ok());
        assert!(matches!(owned(&table, id, "user2"), Err(DocError::Unauthorized)));
        let missing = Uuid::new_v4();
        assert!(matches!(
            owned(&table, missing, "user1"),
            Err(DocError::NotFound(m)) if m == missing
        ));
    }

    #[test]
    fn read_rule_for_published_documents() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut table = DocumentTable::open(tempdir.path()).unwrap();
        let id = add(&mut table, "user1", "page", None);

        let private = table.get(id).unwrap().clone();
        assert!(matches!(check_read(&private, None), Err(DocError::Unauthenticated)));
        assert!(matches!(
            check_read(&private, Some("user2")),
            Err(DocError::Unauthorized)
        ));
        assert!(check_read(&private, Some("user1")).is_ok());

        let published = table
            .patch(
                id,
                DocumentPatch {
                    is_published: Some(true),
                    ..DocumentPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(check_read(&published, None).is_ok());
        assert!(check_read(&published, Some("user2")).is_ok());

        let archived = table.patch(id, DocumentPatch::archived(true)).unwrap().unwrap();
        assert!(matches!(check_read(&archived, None), Err(DocError::Unauthenticated)));
        assert!(check_read(&archived, Some("user1")).is_ok());
    }
}
