//! SQLite-backed device and model store.

use super::Includes;
use crate::config::StoreConfig;
use crate::error::{FleetError, Result};
use crate::models::{Device, DeviceClass, DeviceModel, DeviceTag, Label};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// SQLite store for devices, device models and their owned rows.
///
/// Uses WAL mode so the portal can read while a job commits, and
/// `Arc<Mutex<Connection>>` for thread safety within a process. The lock is
/// only held for the duration of a single call.
#[derive(Clone)]
pub struct FleetStore {
    conn: Arc<Mutex<Connection>>,
}

const DEVICE_COLUMNS: &str = "id, class, name, device_model_id, version, synced_at";
const MODEL_COLUMNS: &str = "id, class, name, description, external_identifier, synced_at";

/// Raw device row before class parsing.
type DeviceRow = (String, String, String, Option<String>, i64, String);
/// Raw model row before class parsing.
type ModelRow = (String, String, String, Option<String>, Option<String>, String);

impl FleetStore {
    /// Open the store at a specific path.
    ///
    /// Creates the database and parent directories if they don't exist.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| FleetError::Io {
                    message: format!("Failed to create store directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| FleetError::Database {
            message: format!("Failed to open store {}: {}", db_path.display(), e),
            source: Some(e),
        })?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;\n\
             PRAGMA foreign_keys=ON;",
            StoreConfig::BUSY_TIMEOUT_MS,
        ))?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS device_models (
                id TEXT PRIMARY KEY,
                class TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                external_identifier TEXT,
                synced_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_models_class_name
                ON device_models(class, name);

            CREATE UNIQUE INDEX IF NOT EXISTS idx_models_external
                ON device_models(class, external_identifier)
                WHERE external_identifier IS NOT NULL;

            CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                class TEXT NOT NULL,
                name TEXT NOT NULL,
                device_model_id TEXT REFERENCES device_models(id) ON DELETE SET NULL,
                version INTEGER NOT NULL,
                synced_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_devices_class
                ON devices(class);

            -- Owned child rows, removed with their device
            CREATE TABLE IF NOT EXISTS device_tags (
                device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (device_id, position)
            );

            CREATE TABLE IF NOT EXISTS device_labels (
                device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                color TEXT NOT NULL,
                PRIMARY KEY (device_id, name)
            );
            "#,
        )
        .map_err(|e| FleetError::Database {
            message: format!("Failed to initialize store schema: {}", e),
            source: Some(e),
        })?;
        Ok(())
    }

    pub(crate) fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| FleetError::Database {
            message: "Failed to acquire store connection lock".to_string(),
            source: None,
        })
    }

    // ========================================
    // Devices
    // ========================================

    /// Get a device by id, eager-loading the requested associations.
    pub fn device(&self, id: &str, includes: Includes) -> Result<Option<Device>> {
        let conn = self.lock_conn()?;
        let row: Option<DeviceRow> = conn
            .query_row(
                &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
                params![id],
                device_row,
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(load_device(&conn, row, includes)?)),
            None => Ok(None),
        }
    }

    /// All devices of a class matching `predicate`, ordered by id.
    pub fn find_devices(
        &self,
        class: DeviceClass,
        includes: Includes,
        predicate: impl Fn(&Device) -> bool,
    ) -> Result<Vec<Device>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM devices WHERE class = ?1 ORDER BY id",
            DEVICE_COLUMNS
        ))?;
        let rows: Vec<DeviceRow> = stmt
            .query_map(params![class.as_str()], device_row)?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        let mut devices = Vec::new();
        for row in rows {
            let device = load_device(&conn, row, includes)?;
            if predicate(&device) {
                devices.push(device);
            }
        }
        Ok(devices)
    }

    /// Number of tag rows owned by a device.
    pub fn tag_count(&self, device_id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM device_tags WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of label rows owned by a device.
    pub fn label_count(&self, device_id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM device_labels WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========================================
    // Models
    // ========================================

    pub fn model(&self, id: &str) -> Result<Option<DeviceModel>> {
        self.query_model(&format!("SELECT {} FROM device_models WHERE id = ?1", MODEL_COLUMNS), &[&id])
    }

    /// Look up a model of a class by its display name.
    ///
    /// When several models share the name (two deployments with the same
    /// name), the one with the lowest external identifier wins, so the choice
    /// is stable across runs even though edge model ids are random.
    pub fn model_by_name(&self, class: DeviceClass, name: &str) -> Result<Option<DeviceModel>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM device_models WHERE class = ?1 AND name = ?2 \
             ORDER BY external_identifier IS NULL, external_identifier, id LIMIT 2",
            MODEL_COLUMNS
        ))?;
        let rows: Vec<ModelRow> = stmt
            .query_map(params![class.as_str(), name], model_row)?
            .collect::<std::result::Result<_, _>>()?;

        if rows.len() > 1 {
            warn!(
                "Several {} models are named '{}', using the one with external id {:?}",
                class, name, rows[0].4
            );
        }
        rows.into_iter().next().map(into_model).transpose()
    }

    /// Look up a model of a class by its vendor-side identifier.
    pub fn model_by_external_id(
        &self,
        class: DeviceClass,
        external_identifier: &str,
    ) -> Result<Option<DeviceModel>> {
        self.query_model(
            &format!(
                "SELECT {} FROM device_models WHERE class = ?1 AND external_identifier = ?2",
                MODEL_COLUMNS
            ),
            &[&class.as_str(), &external_identifier],
        )
    }

    /// All models of a class matching `predicate`, ordered by id.
    pub fn find_models(
        &self,
        class: DeviceClass,
        predicate: impl Fn(&DeviceModel) -> bool,
    ) -> Result<Vec<DeviceModel>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM device_models WHERE class = ?1 ORDER BY id",
            MODEL_COLUMNS
        ))?;
        let rows: Vec<ModelRow> = stmt
            .query_map(params![class.as_str()], model_row)?
            .collect::<std::result::Result<_, _>>()?;

        let mut models = Vec::new();
        for row in rows {
            let model = into_model(row)?;
            if predicate(&model) {
                models.push(model);
            }
        }
        Ok(models)
    }

    fn query_model(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<DeviceModel>> {
        let conn = self.lock_conn()?;
        let row: Option<ModelRow> = conn.query_row(sql, args, model_row).optional()?;
        row.map(into_model).transpose()
    }
}

fn device_row(row: &Row<'_>) -> rusqlite::Result<DeviceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn model_row(row: &Row<'_>) -> rusqlite::Result<ModelRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn parse_class(raw: &str) -> Result<DeviceClass> {
    DeviceClass::from_str(raw).ok_or_else(|| FleetError::Database {
        message: format!("Unknown device class in store: {}", raw),
        source: None,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            debug!("Unparsable synced_at '{}', using now", raw);
            Utc::now()
        })
}

fn into_model(row: ModelRow) -> Result<DeviceModel> {
    let (id, class, name, description, external_identifier, synced_at) = row;
    Ok(DeviceModel {
        id,
        class: parse_class(&class)?,
        name,
        description,
        external_identifier,
        synced_at: parse_timestamp(&synced_at),
    })
}

fn load_device(conn: &Connection, row: DeviceRow, includes: Includes) -> Result<Device> {
    let (id, class, name, device_model_id, version, synced_at) = row;

    let tags = if includes.tags {
        let mut stmt = conn.prepare(
            "SELECT name, value FROM device_tags WHERE device_id = ?1 ORDER BY position",
        )?;
        let tags = stmt
            .query_map(params![id], |row| Ok(DeviceTag::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tags
    } else {
        Vec::new()
    };

    let labels = if includes.labels {
        let mut stmt =
            conn.prepare("SELECT name, color FROM device_labels WHERE device_id = ?1 ORDER BY name")?;
        let labels = stmt
            .query_map(params![id], |row| {
                Ok(Label {
                    name: row.get(0)?,
                    color: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        labels
    } else {
        Vec::new()
    };

    Ok(Device {
        class: parse_class(&class)?,
        id,
        name,
        device_model_id,
        version,
        tags,
        labels,
        synced_at: parse_timestamp(&synced_at),
    })
}
