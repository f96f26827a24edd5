//! Neuron persistence gateway contract and SQLite implementation.
//!
//! # Responsibility
//! - Durably store and retrieve a neuron's full annotation graph.
//! - Store workspace-level rows (name, source, session flags).
//! - Keep SQL and document encoding inside the repository boundary.
//!
//! # Invariants
//! - A neuron is always written as one whole document; partial node writes
//!   are never issued.
//! - `commit` applies every save and delete of one logical edit in a single
//!   transaction, or none of them.
//! - Read paths reject malformed documents instead of masking them.

use crate::db::migrations::latest_version;
use crate::db::{schema_version, DbError, REQUIRED_TABLES};
use crate::model::annotation::{Annotation, AnnotationId, NeuronId};
use crate::model::neuron::{AnchoredPath, Neuron, NeuronColor};
use crate::model::workspace::{ModelSource, Workspace, WorkspaceId};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by neuron repository operations.
pub type NeuronRepoResult<T> = Result<T, NeuronRepoError>;

/// Errors from neuron repository operations.
#[derive(Debug)]
pub enum NeuronRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Workspace row does not exist.
    WorkspaceNotFound(WorkspaceId),
    /// Neuron row does not exist in the workspace.
    NeuronNotFound(NeuronId),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Neuron document could not be encoded or decoded.
    Document(serde_json::Error),
    /// Persisted data cannot be converted to a valid model.
    InvalidData(String),
    /// Injected or transport-level failure reported by a non-SQLite gateway.
    Unavailable(String),
}

impl Display for NeuronRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::WorkspaceNotFound(id) => write!(f, "workspace not found: {id}"),
            Self::NeuronNotFound(id) => write!(f, "neuron not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "neuron repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "neuron repository requires table `{table}`")
            }
            Self::Document(err) => write!(f, "neuron document error: {err}"),
            Self::InvalidData(message) => write!(f, "invalid neuron data: {message}"),
            Self::Unavailable(message) => write!(f, "persistence unavailable: {message}"),
        }
    }
}

impl Error for NeuronRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Document(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for NeuronRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for NeuronRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for NeuronRepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Document(value)
    }
}

/// Persistence gateway for workspaces and neuron graphs.
///
/// Callers treat any error as total failure of the logical operation.
pub trait NeuronRepository {
    /// Inserts or updates the workspace row (name, source, flags).
    fn save_workspace(&self, workspace: &Workspace) -> NeuronRepoResult<()>;
    /// Loads a workspace with every stored neuron.
    fn load_workspace(&self, workspace_id: WorkspaceId) -> NeuronRepoResult<Option<Workspace>>;
    /// Loads one neuron document.
    fn load_neuron(
        &self,
        workspace_id: WorkspaceId,
        neuron_id: NeuronId,
    ) -> NeuronRepoResult<Option<Neuron>>;
    /// Saves `saves` and deletes `deletes` atomically.
    fn commit(
        &self,
        workspace_id: WorkspaceId,
        saves: &[&Neuron],
        deletes: &[NeuronId],
    ) -> NeuronRepoResult<()>;

    /// Saves one neuron document.
    fn save_neuron(&self, workspace_id: WorkspaceId, neuron: &Neuron) -> NeuronRepoResult<()> {
        self.commit(workspace_id, &[neuron], &[])
    }

    /// Deletes one neuron row.
    fn delete_neuron(&self, workspace_id: WorkspaceId, neuron_id: NeuronId) -> NeuronRepoResult<()> {
        self.commit(workspace_id, &[], &[neuron_id])
    }
}

impl<R: NeuronRepository + ?Sized> NeuronRepository for &R {
    fn save_workspace(&self, workspace: &Workspace) -> NeuronRepoResult<()> {
        (**self).save_workspace(workspace)
    }

    fn load_workspace(&self, workspace_id: WorkspaceId) -> NeuronRepoResult<Option<Workspace>> {
        (**self).load_workspace(workspace_id)
    }

    fn load_neuron(
        &self,
        workspace_id: WorkspaceId,
        neuron_id: NeuronId,
    ) -> NeuronRepoResult<Option<Neuron>> {
        (**self).load_neuron(workspace_id, neuron_id)
    }

    fn commit(
        &self,
        workspace_id: WorkspaceId,
        saves: &[&Neuron],
        deletes: &[NeuronId],
    ) -> NeuronRepoResult<()> {
        (**self).commit(workspace_id, saves, deletes)
    }
}

/// JSON document stored in `neurons.data`.
#[derive(Debug, Serialize, Deserialize)]
struct NeuronDocument {
    color: NeuronColor,
    root_ids: Vec<AnnotationId>,
    annotations: Vec<Annotation>,
    anchored_paths: Vec<AnchoredPath>,
    notes: BTreeMap<AnnotationId, String>,
}

impl NeuronDocument {
    fn from_neuron(neuron: &Neuron) -> Self {
        let mut annotations: Vec<Annotation> = neuron.nodes.values().cloned().collect();
        annotations.sort_by_key(|ann| ann.id);
        let mut anchored_paths: Vec<AnchoredPath> =
            neuron.anchored_paths.values().cloned().collect();
        anchored_paths.sort_by_key(|path| path.endpoints);
        Self {
            color: neuron.color,
            root_ids: neuron.root_ids.clone(),
            annotations,
            anchored_paths,
            notes: neuron.notes.clone(),
        }
    }

    fn into_neuron(self, id: NeuronId, name: String, visible: bool) -> NeuronRepoResult<Neuron> {
        if let Some(stray) = self.annotations.iter().find(|ann| ann.neuron_id != id) {
            return Err(NeuronRepoError::InvalidData(format!(
                "annotation {} claims neuron {} inside neuron {id}",
                stray.id, stray.neuron_id
            )));
        }
        Ok(Neuron {
            id,
            name,
            color: self.color,
            visible,
            nodes: self
                .annotations
                .into_iter()
                .map(|ann| (ann.id, ann))
                .collect(),
            root_ids: self.root_ids,
            anchored_paths: self
                .anchored_paths
                .into_iter()
                .map(|path| (path.endpoints, path))
                .collect(),
            notes: self.notes,
        })
    }
}

/// SQLite-backed neuron repository.
pub struct SqliteNeuronRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNeuronRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> NeuronRepoResult<Self> {
        ensure_neuron_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl NeuronRepository for SqliteNeuronRepository<'_> {
    fn save_workspace(&self, workspace: &Workspace) -> NeuronRepoResult<()> {
        self.conn.execute(
            "INSERT INTO workspaces (
                workspace_uuid,
                name,
                source,
                auto_tracing,
                auto_refine_point
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (workspace_uuid) DO UPDATE SET
                name = excluded.name,
                source = excluded.source,
                auto_tracing = excluded.auto_tracing,
                auto_refine_point = excluded.auto_refine_point,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                workspace.id.to_string(),
                workspace.name.as_str(),
                workspace.source.as_str(),
                bool_to_int(workspace.auto_tracing),
                bool_to_int(workspace.auto_refine_point),
            ],
        )?;
        Ok(())
    }

    fn load_workspace(&self, workspace_id: WorkspaceId) -> NeuronRepoResult<Option<Workspace>> {
        let row: Option<(String, String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT name, source, auto_tracing, auto_refine_point
                 FROM workspaces
                 WHERE workspace_uuid = ?1;",
                [workspace_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let Some((name, source_text, auto_tracing, auto_refine_point)) = row else {
            return Ok(None);
        };

        let source = ModelSource::parse(&source_text).ok_or_else(|| {
            NeuronRepoError::InvalidData(format!(
                "invalid model source `{source_text}` in workspaces.source"
            ))
        })?;
        let mut workspace = Workspace::with_id(workspace_id, name, source);
        workspace.auto_tracing = int_to_bool(auto_tracing, "workspaces.auto_tracing")?;
        workspace.auto_refine_point =
            int_to_bool(auto_refine_point, "workspaces.auto_refine_point")?;

        let mut stmt = self.conn.prepare(
            "SELECT neuron_id, name, visible, data
             FROM neurons
             WHERE workspace_uuid = ?1
             ORDER BY neuron_id ASC;",
        )?;
        let mut rows = stmt.query([workspace_id.to_string()])?;
        while let Some(row) = rows.next()? {
            let neuron = decode_neuron(
                row.get::<_, i64>(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get::<_, String>(3)?.as_str(),
            )?;
            workspace.insert_neuron(neuron);
        }
        Ok(Some(workspace))
    }

    fn load_neuron(
        &self,
        workspace_id: WorkspaceId,
        neuron_id: NeuronId,
    ) -> NeuronRepoResult<Option<Neuron>> {
        let row: Option<(i64, String, i64, String)> = self
            .conn
            .query_row(
                "SELECT neuron_id, name, visible, data
                 FROM neurons
                 WHERE workspace_uuid = ?1
                   AND neuron_id = ?2;",
                params![workspace_id.to_string(), neuron_id_to_db(neuron_id)?],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(|(id, name, visible, data)| decode_neuron(id, name, visible, data.as_str()))
            .transpose()
    }

    fn commit(
        &self,
        workspace_id: WorkspaceId,
        saves: &[&Neuron],
        deletes: &[NeuronId],
    ) -> NeuronRepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_workspace_exists(&tx, workspace_id)?;

        for neuron in saves {
            let data = serde_json::to_string(&NeuronDocument::from_neuron(neuron))?;
            tx.execute(
                "INSERT INTO neurons (
                    workspace_uuid,
                    neuron_id,
                    name,
                    visible,
                    data
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (workspace_uuid, neuron_id) DO UPDATE SET
                    name = excluded.name,
                    visible = excluded.visible,
                    data = excluded.data,
                    updated_at = (strftime('%s', 'now') * 1000);",
                params![
                    workspace_id.to_string(),
                    neuron_id_to_db(neuron.id)?,
                    neuron.name.as_str(),
                    bool_to_int(neuron.visible),
                    data,
                ],
            )?;
        }

        for neuron_id in deletes {
            let changed = tx.execute(
                "DELETE FROM neurons
                 WHERE workspace_uuid = ?1
                   AND neuron_id = ?2;",
                params![workspace_id.to_string(), neuron_id_to_db(*neuron_id)?],
            )?;
            if changed == 0 {
                return Err(NeuronRepoError::NeuronNotFound(*neuron_id));
            }
        }

        tx.commit()?;
        Ok(())
    }
}

fn decode_neuron(id: i64, name: String, visible: i64, data: &str) -> NeuronRepoResult<Neuron> {
    let neuron_id = NeuronId::try_from(id).map_err(|_| {
        NeuronRepoError::InvalidData(format!("invalid neuron id `{id}` in neurons.neuron_id"))
    })?;
    let document: NeuronDocument = serde_json::from_str(data)?;
    let neuron = document.into_neuron(
        neuron_id,
        name,
        int_to_bool(visible, "neurons.visible")?,
    )?;
    if let Some(ann) = neuron.annotations().find(|ann| ann.id == AnnotationId::MAX) {
        return Err(NeuronRepoError::InvalidData(format!(
            "annotation id {} in neuron {neuron_id} leaves no room for new ids",
            ann.id
        )));
    }
    neuron
        .check_integrity()
        .map_err(|err| NeuronRepoError::InvalidData(err.to_string()))?;
    Ok(neuron)
}

fn ensure_workspace_exists(conn: &Connection, workspace_id: WorkspaceId) -> NeuronRepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM workspaces
            WHERE workspace_uuid = ?1
        );",
        [workspace_id.to_string()],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(NeuronRepoError::WorkspaceNotFound(workspace_id))
    }
}

fn neuron_id_to_db(id: NeuronId) -> NeuronRepoResult<i64> {
    i64::try_from(id)
        .map_err(|_| NeuronRepoError::InvalidData(format!("neuron id {id} exceeds storage range")))
}

fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

fn int_to_bool(value: i64, column: &'static str) -> NeuronRepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(NeuronRepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

fn ensure_neuron_connection_ready(conn: &Connection) -> NeuronRepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(NeuronRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(NeuronRepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> NeuronRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

#[cfg(test)]
mod tests {
    use super::{NeuronDocument, NeuronRepoError};
    use crate::model::annotation::{Annotation, Vec3};
    use crate::model::neuron::Neuron;
    use uuid::Uuid;

    #[test]
    fn document_rejects_annotation_owned_by_other_neuron() {
        let mut neuron = Neuron::new(3, "n");
        neuron.insert_node(Annotation::new(1, 9, Vec3::default(), None, None));
        neuron.push_root(1);
        let document = NeuronDocument::from_neuron(&neuron);
        let err = document
            .into_neuron(3, "n".to_string(), true)
            .expect_err("foreign annotation must be rejected");
        assert!(matches!(err, NeuronRepoError::InvalidData(_)));
    }

    #[test]
    fn workspace_not_found_display_names_id() {
        let id = Uuid::nil();
        let text = NeuronRepoError::WorkspaceNotFound(id).to_string();
        assert!(text.contains(&id.to_string()));
    }
}
