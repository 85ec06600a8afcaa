use crate::config::Config;
use crate::store::StoreError;
use crate::store::bookmarks::{
    BookmarkPatch, BookmarkStore, FolderPatch, ImportPayload, NewBookmark, NewFolder,
};
use crate::store::history::{
    DEFAULT_LIST_LIMIT, DEFAULT_SEARCH_HISTORY_LIMIT, DEFAULT_SEARCH_LIMIT,
    DEFAULT_TOP_VISITED_LIMIT, HistoryStore,
};
use crate::store::preferences::PreferenceStore;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandFailure>,
}

impl CommandResponse {
    fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(error: CommandFailure) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// For transports that fail to decode a request body before it reaches
    /// the dispatcher.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::failure(CommandFailure::dispatch(message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Validation,
    Constraint,
    Storage,
    Dispatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl CommandFailure {
    /// Release builds reduce the message to a per-category generic string so
    /// internal state never leaks across the boundary.
    fn new(category: FailureCategory, message: String) -> Self {
        let message = if cfg!(debug_assertions) {
            message
        } else {
            match category {
                FailureCategory::Validation => "invalid argument".to_string(),
                FailureCategory::Constraint => "operation violates a storage constraint".to_string(),
                FailureCategory::Storage => "storage engine failure".to_string(),
                FailureCategory::Dispatch => "unknown or malformed command".to_string(),
            }
        };

        Self { category, message }
    }

    fn dispatch(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Dispatch, message.into())
    }
}

impl From<StoreError> for CommandFailure {
    fn from(error: StoreError) -> Self {
        let category = match &error {
            StoreError::Validation(_) => FailureCategory::Validation,
            StoreError::Constraint(_) => FailureCategory::Constraint,
            StoreError::Storage(_) => FailureCategory::Storage,
        };

        Self::new(category, error.to_string())
    }
}

/// Row counts across the disk-backed stores, for status surfaces.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub visit_rows: i64,
    pub bookmark_rows: i64,
    pub folder_rows: i64,
}

/// Routes named commands onto the three stores. Owns the only instance of
/// each for the process lifetime; a store failure becomes a tagged failure
/// response, never a crash.
pub struct Dispatcher {
    history: HistoryStore,
    bookmarks: BookmarkStore,
    preferences: PreferenceStore,
}

impl Dispatcher {
    pub fn open(config: &Config) -> Result<Self> {
        let history = HistoryStore::open(&config.history_db_path)
            .context("Failed to open the visit log store")?;
        let bookmarks = BookmarkStore::open(&config.bookmarks_db_path)
            .context("Failed to open the bookmark store")?;
        let mut preferences = PreferenceStore::open(&config.preferences_path)
            .context("Failed to open the preference store")?;

        preferences.on_any_change(|key, _value| {
            info!(key = %key, "preference updated");
        });

        info!(
            history_db = %config.history_db_path.display(),
            bookmarks_db = %config.bookmarks_db_path.display(),
            "storage dispatcher ready"
        );

        Ok(Self {
            history,
            bookmarks,
            preferences,
        })
    }

    pub fn dispatch(&mut self, request: &CommandRequest) -> CommandResponse {
        debug!(command = %request.command, "dispatching storage command");

        match self.execute(request) {
            Ok(result) => CommandResponse::success(result),
            Err(failure) => CommandResponse::failure(failure),
        }
    }

    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            visit_rows: self
                .history
                .total_visits()
                .map_err(anyhow::Error::from)
                .context("Failed to count visit rows")?,
            bookmark_rows: self
                .bookmarks
                .total_bookmarks()
                .map_err(anyhow::Error::from)
                .context("Failed to count bookmark rows")?,
            folder_rows: self
                .bookmarks
                .total_folders()
                .map_err(anyhow::Error::from)
                .context("Failed to count folder rows")?,
        })
    }

    /// Flushes and closes the two disk-backed stores. The preference store
    /// has no handle to close because every set commits synchronously.
    pub fn shutdown(self) -> Result<()> {
        self.history
            .close()
            .map_err(anyhow::Error::from)
            .context("Failed to close the visit log store")?;
        self.bookmarks
            .close()
            .map_err(anyhow::Error::from)
            .context("Failed to close the bookmark store")?;

        info!("storage dispatcher shut down");
        Ok(())
    }

    fn execute(&mut self, request: &CommandRequest) -> Result<Value, CommandFailure> {
        let args = request.args.as_slice();

        match request.command.as_str() {
            "history:add" => {
                let url: String = required_arg(args, 0, "url")?;
                let title: String = required_arg(args, 1, "title")?;
                let favicon: Option<String> = optional_arg(args, 2, "favicon")?;
                self.history
                    .record_visit(&url, &title, favicon.as_deref())?;
                Ok(Value::Null)
            }
            "history:get" => {
                let limit = optional_arg(args, 0, "limit")?.unwrap_or(DEFAULT_LIST_LIMIT);
                let offset = optional_arg(args, 1, "offset")?.unwrap_or(0);
                encode(self.history.list(limit, offset)?)
            }
            "history:search" => {
                let query: String = required_arg(args, 0, "query")?;
                let limit = optional_arg(args, 1, "limit")?.unwrap_or(DEFAULT_SEARCH_LIMIT);
                encode(self.history.search(&query, limit)?)
            }
            "history:getByDate" => {
                let start: i64 = required_arg(args, 0, "start")?;
                let end: i64 = required_arg(args, 1, "end")?;
                encode(self.history.by_date_range(start, end)?)
            }
            "history:delete" => {
                let url: String = required_arg(args, 0, "url")?;
                self.history.delete(&url)?;
                Ok(Value::Null)
            }
            "history:clear" => {
                let older_than: Option<i64> = optional_arg(args, 0, "olderThan")?;
                self.history.clear(older_than)?;
                Ok(Value::Null)
            }
            "history:getTopVisited" => {
                let limit = optional_arg(args, 0, "limit")?.unwrap_or(DEFAULT_TOP_VISITED_LIMIT);
                encode(self.history.top_visited(limit)?)
            }
            "history:updateDuration" => {
                let url: String = required_arg(args, 0, "url")?;
                let duration: i64 = required_arg(args, 1, "duration")?;
                self.history.update_duration(&url, duration)?;
                Ok(Value::Null)
            }
            "history:addSearch" => {
                let query: String = required_arg(args, 0, "query")?;
                let result_url: Option<String> = optional_arg(args, 1, "resultUrl")?;
                self.history
                    .add_search_query(&query, result_url.as_deref())?;
                Ok(Value::Null)
            }
            "history:getSearchHistory" => {
                let limit = optional_arg(args, 0, "limit")?.unwrap_or(DEFAULT_SEARCH_HISTORY_LIMIT);
                encode(self.history.search_history(limit)?)
            }
            "bookmarks:add" => {
                let bookmark: NewBookmark = required_arg(args, 0, "bookmark")?;
                let id = self.bookmarks.add_bookmark(&bookmark)?;
                Ok(Value::from(id))
            }
            "bookmarks:get" => {
                let folder_id: Option<i64> = optional_arg(args, 0, "folderId")?;
                encode(self.bookmarks.bookmarks_in(folder_id)?)
            }
            "bookmarks:getAll" => encode(self.bookmarks.all_bookmarks()?),
            "bookmarks:search" => {
                let query: String = required_arg(args, 0, "query")?;
                encode(self.bookmarks.search(&query)?)
            }
            "bookmarks:update" => {
                let id: i64 = required_arg(args, 0, "id")?;
                let patch: BookmarkPatch = required_arg(args, 1, "updates")?;
                self.bookmarks.update_bookmark(id, &patch)?;
                Ok(Value::Null)
            }
            "bookmarks:delete" => {
                let id: i64 = required_arg(args, 0, "id")?;
                self.bookmarks.delete_bookmark(id)?;
                Ok(Value::Null)
            }
            "bookmarks:move" => {
                let id: i64 = required_arg(args, 0, "id")?;
                let folder_id: Option<i64> = optional_arg(args, 1, "folderId")?;
                let position: i64 = required_arg(args, 2, "position")?;
                self.bookmarks.move_bookmark(id, folder_id, position)?;
                Ok(Value::Null)
            }
            "bookmarks:addFolder" => {
                let folder: NewFolder = required_arg(args, 0, "folder")?;
                let id = self.bookmarks.add_folder(&folder)?;
                Ok(Value::from(id))
            }
            "bookmarks:getFolders" => {
                let parent_id: Option<i64> = optional_arg(args, 0, "parentId")?;
                encode(self.bookmarks.folders_in(parent_id)?)
            }
            "bookmarks:getAllFolders" => encode(self.bookmarks.all_folders()?),
            "bookmarks:updateFolder" => {
                let id: i64 = required_arg(args, 0, "id")?;
                let patch: FolderPatch = required_arg(args, 1, "updates")?;
                self.bookmarks.update_folder(id, &patch)?;
                Ok(Value::Null)
            }
            "bookmarks:deleteFolder" => {
                let id: i64 = required_arg(args, 0, "id")?;
                self.bookmarks.delete_folder(id)?;
                Ok(Value::Null)
            }
            "bookmarks:export" => encode(self.bookmarks.export_all()?),
            "bookmarks:import" => {
                let payload: ImportPayload = required_arg(args, 0, "data")?;
                self.bookmarks.import_all(&payload)?;
                Ok(Value::Null)
            }
            "preferences:get" => {
                let key: String = required_arg(args, 0, "key")?;
                Ok(self.preferences.get(&key)?)
            }
            "preferences:set" => {
                let key: String = required_arg(args, 0, "key")?;
                let value = args.get(1).cloned().ok_or_else(|| {
                    CommandFailure::dispatch("missing required argument: value")
                })?;
                self.preferences.set(&key, value)?;
                Ok(Value::Null)
            }
            "preferences:getAll" => encode(self.preferences.get_all()),
            "preferences:setAll" => {
                let partial: Map<String, Value> = required_arg(args, 0, "preferences")?;
                self.preferences.set_all(&partial)?;
                Ok(Value::Null)
            }
            "preferences:reset" => {
                self.preferences.reset()?;
                Ok(Value::Null)
            }
            "preferences:export" => encode(self.preferences.export()),
            "preferences:import" => {
                let partial: Map<String, Value> = required_arg(args, 0, "preferences")?;
                self.preferences.import(&partial)?;
                Ok(Value::Null)
            }
            other => Err(CommandFailure::dispatch(format!(
                "unknown command: {other}"
            ))),
        }
    }
}

fn required_arg<T: DeserializeOwned>(
    args: &[Value],
    index: usize,
    name: &str,
) -> Result<T, CommandFailure> {
    let value = args
        .get(index)
        .filter(|value| !value.is_null())
        .ok_or_else(|| CommandFailure::dispatch(format!("missing required argument: {name}")))?;

    serde_json::from_value(value.clone())
        .map_err(|error| CommandFailure::dispatch(format!("malformed argument {name}: {error}")))
}

/// Absent and explicit-null positional arguments both decode to `None`.
fn optional_arg<T: DeserializeOwned>(
    args: &[Value],
    index: usize,
    name: &str,
) -> Result<Option<T>, CommandFailure> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|error| {
            CommandFailure::dispatch(format!("malformed argument {name}: {error}"))
        }),
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, CommandFailure> {
    serde_json::to_value(value)
        .map_err(|error| CommandFailure::dispatch(format!("failed to encode result: {error}")))
}
