use super::{StoreError, StoreResult, like_pattern, now_ms};
use anyhow::Context;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Reserved root folders, part of the stable contract: id 1 is the
/// bookmarks bar, id 2 the overflow folder.
pub const BOOKMARKS_BAR_ID: i64 = 1;
pub const OTHER_BOOKMARKS_ID: i64 = 2;

const CREATE_FOLDERS: &str = r#"
CREATE TABLE IF NOT EXISTS bookmark_folders (
  id        INTEGER PRIMARY KEY AUTOINCREMENT,
  name      TEXT NOT NULL,
  parentId  INTEGER,
  position  INTEGER NOT NULL DEFAULT 0,
  dateAdded INTEGER NOT NULL,
  FOREIGN KEY(parentId) REFERENCES bookmark_folders(id)
);
"#;

const CREATE_BOOKMARKS: &str = r#"
CREATE TABLE IF NOT EXISTS bookmarks (
  id        INTEGER PRIMARY KEY AUTOINCREMENT,
  title     TEXT NOT NULL,
  url       TEXT NOT NULL,
  favicon   TEXT,
  folderId  INTEGER,
  position  INTEGER NOT NULL DEFAULT 0,
  dateAdded INTEGER NOT NULL,
  tags      TEXT,
  FOREIGN KEY(folderId) REFERENCES bookmark_folders(id)
);
"#;

const INDEX_BOOKMARK_FOLDER: &str =
    "CREATE INDEX IF NOT EXISTS idx_bookmark_folder ON bookmarks(folderId);";

const INDEX_BOOKMARK_URL: &str = "CREATE INDEX IF NOT EXISTS idx_bookmark_url ON bookmarks(url);";

const INDEX_FOLDER_PARENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_folder_parent ON bookmark_folders(parentId);";

pub fn schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_FOLDERS,
        CREATE_BOOKMARKS,
        INDEX_BOOKMARK_FOLDER,
        INDEX_BOOKMARK_URL,
        INDEX_FOLDER_PARENT,
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRow {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub position: i64,
    pub date_added: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRow {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub favicon: Option<String>,
    pub folder_id: Option<i64>,
    pub position: i64,
    pub date_added: i64,
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFolder {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub folder_id: Option<i64>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub tags: Option<String>,
}

/// Partial update: only fields present in the payload are written. Nullable
/// columns use a double `Option` so "absent" and "set to null" stay
/// distinguishable. Identity and creation-time fields are never writable.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookmarkPatch {
    pub title: Option<String>,
    pub url: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub favicon: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub folder_id: Option<Option<i64>>,
    pub position: Option<i64>,
    #[serde(deserialize_with = "double_option")]
    pub tags: Option<Option<String>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderPatch {
    pub name: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub parent_id: Option<Option<i64>>,
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub folders: Vec<FolderRow>,
    pub bookmarks: Vec<BookmarkRow>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportPayload {
    pub folders: Option<Vec<ImportFolder>>,
    pub bookmarks: Option<Vec<ImportBookmark>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFolder {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBookmark {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub folder_id: Option<i64>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub tags: Option<String>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Bookmark tree: a forest of folders rooted at the two reserved folders,
/// each folder holding position-ordered bookmark entries.
pub struct BookmarkStore {
    conn: Connection,
}

impl BookmarkStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open bookmarks DB: {}", path.display()))?;
        conn.pragma_update(None, "foreign_keys", true)
            .context("Failed to enable foreign key enforcement")?;

        let store = Self { conn };
        store.init_schema()?;
        store.ensure_root_folders()?;

        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        schema_statements().iter().try_for_each(|statement| {
            self.conn
                .execute(statement, [])
                .map(|_| ())
                .map_err(StoreError::from)
        })
    }

    fn ensure_root_folders(&self) -> StoreResult<()> {
        for (id, name, position) in [
            (BOOKMARKS_BAR_ID, "Bookmarks Bar", 0),
            (OTHER_BOOKMARKS_ID, "Other Bookmarks", 1),
        ] {
            self.conn.execute(
                "INSERT OR IGNORE INTO bookmark_folders (id, name, parentId, position, dateAdded)
                 VALUES (?1, ?2, NULL, ?3, ?4)",
                params![id, name, position, now_ms()],
            )?;
        }

        Ok(())
    }

    pub fn add_folder(&self, folder: &NewFolder) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO bookmark_folders (name, parentId, position, dateAdded)
             VALUES (?1, ?2, ?3, ?4)",
            params![folder.name, folder.parent_id, folder.position, now_ms()],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_bookmark(&self, bookmark: &NewBookmark) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO bookmarks (title, url, favicon, folderId, position, dateAdded, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                bookmark.title,
                bookmark.url,
                bookmark.favicon,
                bookmark.folder_id,
                bookmark.position,
                now_ms(),
                bookmark.tags
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Bookmarks whose folder key equals the filter. `None` selects rows at
    /// the root, never "any folder".
    pub fn bookmarks_in(&self, folder_id: Option<i64>) -> StoreResult<Vec<BookmarkRow>> {
        self.query_bookmarks(
            "SELECT id, title, url, favicon, folderId, position, dateAdded, tags
             FROM bookmarks
             WHERE folderId IS ?1
             ORDER BY position ASC",
            params![folder_id],
        )
    }

    pub fn folders_in(&self, parent_id: Option<i64>) -> StoreResult<Vec<FolderRow>> {
        self.query_folders(
            "SELECT id, name, parentId, position, dateAdded
             FROM bookmark_folders
             WHERE parentId IS ?1
             ORDER BY position ASC",
            params![parent_id],
        )
    }

    pub fn all_bookmarks(&self) -> StoreResult<Vec<BookmarkRow>> {
        self.query_bookmarks(
            "SELECT id, title, url, favicon, folderId, position, dateAdded, tags
             FROM bookmarks
             ORDER BY dateAdded DESC, id DESC",
            [],
        )
    }

    pub fn all_folders(&self) -> StoreResult<Vec<FolderRow>> {
        self.query_folders(
            "SELECT id, name, parentId, position, dateAdded
             FROM bookmark_folders
             ORDER BY position ASC, id ASC",
            [],
        )
    }

    pub fn search(&self, query: &str) -> StoreResult<Vec<BookmarkRow>> {
        let pattern = like_pattern(query);
        self.query_bookmarks(
            "SELECT id, title, url, favicon, folderId, position, dateAdded, tags
             FROM bookmarks
             WHERE title LIKE ?1 ESCAPE '\\'
                OR url LIKE ?1 ESCAPE '\\'
                OR tags LIKE ?1 ESCAPE '\\'
             ORDER BY dateAdded DESC, id DESC",
            params![pattern],
        )
    }

    pub fn update_bookmark(&self, id: i64, patch: &BookmarkPatch) -> StoreResult<()> {
        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(title) = &patch.title {
            columns.push("title = ?");
            values.push(SqlValue::Text(title.clone()));
        }
        if let Some(url) = &patch.url {
            columns.push("url = ?");
            values.push(SqlValue::Text(url.clone()));
        }
        if let Some(favicon) = &patch.favicon {
            columns.push("favicon = ?");
            values.push(optional_text(favicon.clone()));
        }
        if let Some(folder_id) = &patch.folder_id {
            columns.push("folderId = ?");
            values.push(optional_integer(*folder_id));
        }
        if let Some(position) = patch.position {
            columns.push("position = ?");
            values.push(SqlValue::Integer(position));
        }
        if let Some(tags) = &patch.tags {
            columns.push("tags = ?");
            values.push(optional_text(tags.clone()));
        }

        // Empty patch is a deliberate no-op.
        if columns.is_empty() {
            return Ok(());
        }

        values.push(SqlValue::Integer(id));
        let sql = format!("UPDATE bookmarks SET {} WHERE id = ?", columns.join(", "));
        self.conn.execute(&sql, params_from_iter(values))?;

        Ok(())
    }

    pub fn update_folder(&self, id: i64, patch: &FolderPatch) -> StoreResult<()> {
        if let Some(Some(new_parent)) = patch.parent_id {
            self.reject_cycle(id, new_parent)?;
        }

        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(name) = &patch.name {
            columns.push("name = ?");
            values.push(SqlValue::Text(name.clone()));
        }
        if let Some(parent_id) = &patch.parent_id {
            columns.push("parentId = ?");
            values.push(optional_integer(*parent_id));
        }
        if let Some(position) = patch.position {
            columns.push("position = ?");
            values.push(SqlValue::Integer(position));
        }

        if columns.is_empty() {
            return Ok(());
        }

        values.push(SqlValue::Integer(id));
        let sql = format!(
            "UPDATE bookmark_folders SET {} WHERE id = ?",
            columns.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(values))?;

        Ok(())
    }

    pub fn move_bookmark(
        &self,
        id: i64,
        new_folder_id: Option<i64>,
        new_position: i64,
    ) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE bookmarks SET folderId = ?1, position = ?2 WHERE id = ?3",
            params![new_folder_id, new_position, id],
        )?;

        Ok(())
    }

    pub fn delete_bookmark(&self, id: i64) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM bookmarks WHERE id = ?1", params![id])?;

        Ok(())
    }

    /// Deletes a folder and everything transitively inside it: descendant
    /// folders and all bookmarks they contain, as one transaction. Sibling
    /// subtrees are untouched. The subtree is collected with a recursive
    /// CTE instead of relying on native cascading foreign keys.
    pub fn delete_folder(&mut self, id: i64) -> StoreResult<()> {
        let transaction = self
            .conn
            .transaction()
            .context("Failed to start cascade delete transaction")?;

        // Folder rows reference their parent, so checks must wait for commit.
        transaction
            .pragma_update(None, "defer_foreign_keys", true)
            .context("Failed to defer foreign key checks")?;

        transaction.execute(
            "WITH RECURSIVE subtree(id) AS (
               SELECT id FROM bookmark_folders WHERE id = ?1
               UNION ALL
               SELECT f.id FROM bookmark_folders f JOIN subtree s ON f.parentId = s.id
             )
             DELETE FROM bookmarks WHERE folderId IN (SELECT id FROM subtree)",
            params![id],
        )?;

        transaction.execute(
            "WITH RECURSIVE subtree(id) AS (
               SELECT id FROM bookmark_folders WHERE id = ?1
               UNION ALL
               SELECT f.id FROM bookmark_folders f JOIN subtree s ON f.parentId = s.id
             )
             DELETE FROM bookmark_folders WHERE id IN (SELECT id FROM subtree)",
            params![id],
        )?;

        transaction
            .commit()
            .context("Failed to commit cascade delete")?;

        Ok(())
    }

    pub fn export_all(&self) -> StoreResult<Snapshot> {
        Ok(Snapshot {
            folders: self.all_folders()?,
            bookmarks: self.all_bookmarks()?,
        })
    }

    /// Inserts all given folders, then all given bookmarks, inside one
    /// transaction; any failure discards the whole call. Folder ids from the
    /// payload are remapped onto freshly assigned ids (parents before
    /// children); payload ids 1 and 2 alias the reserved roots.
    pub fn import_all(&mut self, payload: &ImportPayload) -> StoreResult<()> {
        let transaction = self
            .conn
            .transaction()
            .context("Failed to start import transaction")?;

        let mut id_map: HashMap<i64, i64> = HashMap::new();

        if let Some(folders) = &payload.folders {
            let payload_ids: std::collections::HashSet<i64> =
                folders.iter().filter_map(|folder| folder.id).collect();
            let mut pending: Vec<&ImportFolder> = folders.iter().collect();

            while !pending.is_empty() {
                let mut deferred: Vec<&ImportFolder> = Vec::new();
                let mut progressed = false;

                for folder in pending {
                    if let Some(id) = folder.id {
                        if id == BOOKMARKS_BAR_ID || id == OTHER_BOOKMARKS_ID {
                            id_map.insert(id, id);
                            progressed = true;
                            continue;
                        }
                    }

                    let parent = match folder.parent_id {
                        None => None,
                        Some(old_parent) => match id_map.get(&old_parent) {
                            Some(mapped) => Some(*mapped),
                            // A parent named by the payload must be imported
                            // first; anything else must already exist.
                            None if payload_ids.contains(&old_parent) => {
                                deferred.push(folder);
                                continue;
                            }
                            None if folder_exists(&transaction, old_parent)? => Some(old_parent),
                            None => {
                                return Err(StoreError::Constraint(format!(
                                    "imported folder references unknown parent {old_parent}"
                                )));
                            }
                        },
                    };

                    transaction.execute(
                        "INSERT INTO bookmark_folders (name, parentId, position, dateAdded)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![folder.name, parent, folder.position, now_ms()],
                    )?;

                    if let Some(old_id) = folder.id {
                        id_map.insert(old_id, transaction.last_insert_rowid());
                    }
                    progressed = true;
                }

                if !progressed {
                    return Err(StoreError::Constraint(
                        "import contains folders with unresolved parent references".to_string(),
                    ));
                }
                pending = deferred;
            }
        }

        if let Some(bookmarks) = &payload.bookmarks {
            for bookmark in bookmarks {
                let folder = match bookmark.folder_id {
                    None => None,
                    Some(old_folder) => match id_map.get(&old_folder) {
                        Some(mapped) => Some(*mapped),
                        None if folder_exists(&transaction, old_folder)? => Some(old_folder),
                        None => {
                            return Err(StoreError::Constraint(format!(
                                "imported bookmark references unknown folder {old_folder}"
                            )));
                        }
                    },
                };

                transaction.execute(
                    "INSERT INTO bookmarks (title, url, favicon, folderId, position, dateAdded, tags)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        bookmark.title,
                        bookmark.url,
                        bookmark.favicon,
                        folder,
                        bookmark.position,
                        now_ms(),
                        bookmark.tags
                    ],
                )?;
            }
        }

        transaction.commit().context("Failed to commit import")?;

        Ok(())
    }

    pub fn total_bookmarks(&self) -> StoreResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM bookmarks", [], |row| row.get(0))?;

        Ok(count)
    }

    pub fn total_folders(&self) -> StoreResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM bookmark_folders", [], |row| row.get(0))?;

        Ok(count)
    }

    pub fn close(self) -> StoreResult<()> {
        self.conn.close().map_err(|(_, error)| StoreError::from(error))
    }

    fn reject_cycle(&self, folder_id: i64, new_parent: i64) -> StoreResult<()> {
        if new_parent == folder_id {
            return Err(StoreError::Constraint(
                "a folder cannot be its own parent".to_string(),
            ));
        }

        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            if current == folder_id {
                return Err(StoreError::Constraint(
                    "a folder cannot be moved under its own descendant".to_string(),
                ));
            }
            cursor = self
                .conn
                .query_row(
                    "SELECT parentId FROM bookmark_folders WHERE id = ?1",
                    params![current],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten();
        }

        Ok(())
    }

    fn query_bookmarks(
        &self,
        sql: &str,
        parameters: impl rusqlite::Params,
    ) -> StoreResult<Vec<BookmarkRow>> {
        let mut statement = self.conn.prepare(sql)?;

        let rows = statement
            .query_map(parameters, |row| {
                Ok(BookmarkRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    url: row.get(2)?,
                    favicon: row.get(3)?,
                    folder_id: row.get(4)?,
                    position: row.get(5)?,
                    date_added: row.get(6)?,
                    tags: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn query_folders(
        &self,
        sql: &str,
        parameters: impl rusqlite::Params,
    ) -> StoreResult<Vec<FolderRow>> {
        let mut statement = self.conn.prepare(sql)?;

        let rows = statement
            .query_map(parameters, |row| {
                Ok(FolderRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent_id: row.get(2)?,
                    position: row.get(3)?,
                    date_added: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

fn folder_exists(conn: &Connection, id: i64) -> StoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM bookmark_folders WHERE id = ?1",
            params![id],
            |_| Ok(()),
        )
        .optional()?;

    Ok(found.is_some())
}

fn optional_text(value: Option<String>) -> SqlValue {
    value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

fn optional_integer(value: Option<i64>) -> SqlValue {
    value.map(SqlValue::Integer).unwrap_or(SqlValue::Null)
}

#[cfg(test)]
mod tests {
    use super::{
        BOOKMARKS_BAR_ID, BookmarkPatch, BookmarkStore, FolderPatch, ImportBookmark, ImportFolder,
        ImportPayload, NewBookmark, NewFolder,
    };
    use crate::store::StoreError;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> BookmarkStore {
        BookmarkStore::open(&dir.path().join("bookmarks.db")).expect("open bookmark store")
    }

    fn folder(name: &str, parent_id: Option<i64>, position: i64) -> NewFolder {
        NewFolder {
            name: name.to_string(),
            parent_id,
            position,
        }
    }

    fn bookmark(title: &str, folder_id: Option<i64>, position: i64) -> NewBookmark {
        NewBookmark {
            title: title.to_string(),
            url: format!("https://example.com/{title}"),
            favicon: None,
            folder_id,
            position,
            tags: None,
        }
    }

    #[test]
    fn root_folders_exist_after_reopen() {
        let dir = TempDir::new().expect("temp dir");
        {
            let store = open_store(&dir);
            store.close().expect("close");
        }
        let store = open_store(&dir);

        let roots = store.folders_in(None).expect("root folders");
        let names = roots.iter().map(|row| row.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Bookmarks Bar", "Other Bookmarks"]);
        assert_eq!(roots[0].id, 1);
        assert_eq!(roots[1].id, 2);
    }

    #[test]
    fn bookmark_into_missing_folder_is_a_constraint_failure() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir);

        let error = store
            .add_bookmark(&bookmark("dangling", Some(999), 0))
            .expect_err("missing folder rejected");
        assert!(matches!(error, StoreError::Constraint(_)));
    }

    #[test]
    fn null_folder_filter_returns_only_root_rows() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir);

        store
            .add_bookmark(&bookmark("rooted", None, 0))
            .expect("root bookmark");
        store
            .add_bookmark(&bookmark("in-bar", Some(BOOKMARKS_BAR_ID), 0))
            .expect("bar bookmark");

        let at_root = store.bookmarks_in(None).expect("root filter");
        assert_eq!(at_root.len(), 1);
        assert_eq!(at_root[0].title, "rooted");

        let in_bar = store.bookmarks_in(Some(BOOKMARKS_BAR_ID)).expect("bar filter");
        assert_eq!(in_bar.len(), 1);
        assert_eq!(in_bar[0].title, "in-bar");
    }

    #[test]
    fn deleting_a_folder_cascades_but_spares_siblings() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = open_store(&dir);

        let f = store.add_folder(&folder("F", None, 0)).expect("add F");
        let g = store.add_folder(&folder("G", Some(f), 0)).expect("add G");
        let h = store.add_folder(&folder("H", None, 1)).expect("add H");
        store.add_bookmark(&bookmark("B", Some(g), 0)).expect("add B");
        store.add_bookmark(&bookmark("kept", Some(h), 0)).expect("add kept");

        store.delete_folder(f).expect("cascade delete");

        let folders = store.all_folders().expect("folders");
        assert!(folders.iter().all(|row| row.id != f && row.id != g));
        assert!(folders.iter().any(|row| row.id == h));

        let bookmarks = store.all_bookmarks().expect("bookmarks");
        assert_eq!(bookmarks.len(), 1);
        assert_eq!(bookmarks[0].title, "kept");
    }

    #[test]
    fn patch_writes_only_present_fields() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir);

        let id = store
            .add_bookmark(&NewBookmark {
                title: "old title".to_string(),
                url: "https://example.com/".to_string(),
                favicon: Some("icon.png".to_string()),
                folder_id: Some(BOOKMARKS_BAR_ID),
                position: 3,
                tags: Some("reading".to_string()),
            })
            .expect("add");

        let patch: BookmarkPatch =
            serde_json::from_str(r#"{"title": "new title", "favicon": null}"#)
                .expect("parse patch");
        store.update_bookmark(id, &patch).expect("patch");

        let rows = store.bookmarks_in(Some(BOOKMARKS_BAR_ID)).expect("read back");
        assert_eq!(rows[0].title, "new title");
        assert_eq!(rows[0].url, "https://example.com/");
        assert_eq!(rows[0].favicon, None);
        assert_eq!(rows[0].tags.as_deref(), Some("reading"));

        // Empty patch leaves the row untouched.
        store
            .update_bookmark(id, &BookmarkPatch::default())
            .expect("empty patch is a no-op");
        let rows = store.bookmarks_in(Some(BOOKMARKS_BAR_ID)).expect("read back");
        assert_eq!(rows[0].title, "new title");
    }

    #[test]
    fn patch_ignores_identity_fields_in_payload() {
        let patch: BookmarkPatch =
            serde_json::from_str(r#"{"id": 99, "dateAdded": 5, "position": 7}"#)
                .expect("parse patch");
        assert_eq!(patch.position, Some(7));
        assert!(patch.title.is_none());
    }

    #[test]
    fn reparenting_under_a_descendant_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir);

        let f = store.add_folder(&folder("F", None, 0)).expect("add F");
        let g = store.add_folder(&folder("G", Some(f), 0)).expect("add G");

        let patch = FolderPatch {
            parent_id: Some(Some(g)),
            ..FolderPatch::default()
        };
        let error = store.update_folder(f, &patch).expect_err("cycle rejected");
        assert!(matches!(error, StoreError::Constraint(_)));

        let self_patch = FolderPatch {
            parent_id: Some(Some(f)),
            ..FolderPatch::default()
        };
        assert!(store.update_folder(f, &self_patch).is_err());
    }

    #[test]
    fn move_reassigns_folder_and_position_together() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir);

        let id = store
            .add_bookmark(&bookmark("mover", None, 0))
            .expect("add");
        store
            .move_bookmark(id, Some(BOOKMARKS_BAR_ID), 5)
            .expect("move");

        let rows = store.bookmarks_in(Some(BOOKMARKS_BAR_ID)).expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].position, 5);
        assert!(store.bookmarks_in(None).expect("root").is_empty());
    }

    #[test]
    fn failed_import_rolls_back_everything() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = open_store(&dir);

        let payload = ImportPayload {
            folders: Some(vec![ImportFolder {
                id: Some(10),
                name: "Imported".to_string(),
                parent_id: None,
                position: 0,
            }]),
            bookmarks: Some(vec![ImportBookmark {
                title: "bad".to_string(),
                url: "https://example.com/".to_string(),
                favicon: None,
                folder_id: Some(777),
                position: 0,
                tags: None,
            }]),
        };

        let error = store.import_all(&payload).expect_err("import fails");
        assert!(matches!(error, StoreError::Constraint(_)));

        // Only the reserved roots remain.
        assert_eq!(store.all_folders().expect("folders").len(), 2);
        assert!(store.all_bookmarks().expect("bookmarks").is_empty());
    }

    #[test]
    fn export_import_round_trip_preserves_structure() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir);

        let work = store
            .add_folder(&folder("Work", Some(BOOKMARKS_BAR_ID), 0))
            .expect("add Work");
        let projects = store
            .add_folder(&folder("Projects", Some(work), 0))
            .expect("add Projects");
        store
            .add_bookmark(&bookmark("tracker", Some(projects), 0))
            .expect("add tracker");
        store
            .add_bookmark(&bookmark("news", Some(BOOKMARKS_BAR_ID), 1))
            .expect("add news");

        let snapshot = store.export_all().expect("export");
        let as_json = serde_json::to_value(&snapshot).expect("serialize snapshot");
        let payload: ImportPayload = serde_json::from_value(as_json).expect("parse payload");

        let other_dir = TempDir::new().expect("temp dir");
        let mut other = BookmarkStore::open(&other_dir.path().join("bookmarks.db"))
            .expect("open second store");
        other.import_all(&payload).expect("import");

        let folders = other.all_folders().expect("folders");
        let work_copy = folders
            .iter()
            .find(|row| row.name == "Work")
            .expect("Work imported");
        assert_eq!(work_copy.parent_id, Some(BOOKMARKS_BAR_ID));

        let projects_copy = folders
            .iter()
            .find(|row| row.name == "Projects")
            .expect("Projects imported");
        assert_eq!(projects_copy.parent_id, Some(work_copy.id));

        let in_projects = other
            .bookmarks_in(Some(projects_copy.id))
            .expect("bookmarks in Projects");
        assert_eq!(in_projects.len(), 1);
        assert_eq!(in_projects[0].title, "tracker");

        let in_bar = other
            .bookmarks_in(Some(BOOKMARKS_BAR_ID))
            .expect("bookmarks in bar");
        assert_eq!(in_bar.len(), 1);
        assert_eq!(in_bar[0].title, "news");
    }

    #[test]
    fn search_matches_title_url_and_tags() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir);

        store
            .add_bookmark(&NewBookmark {
                title: "Rust Book".to_string(),
                url: "https://doc.rust-lang.org/book/".to_string(),
                favicon: None,
                folder_id: None,
                position: 0,
                tags: Some("learning".to_string()),
            })
            .expect("add");
        store
            .add_bookmark(&bookmark("unrelated", None, 1))
            .expect("add");

        assert_eq!(store.search("rust").expect("by title").len(), 1);
        assert_eq!(store.search("LEARNING").expect("by tags").len(), 1);
        assert_eq!(store.search("doc.rust-lang").expect("by url").len(), 1);
        assert!(store.search("missing").expect("no match").is_empty());
    }
}
