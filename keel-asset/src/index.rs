use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::UNIX_EPOCH,
};

use rusqlite::{params, Connection, OptionalExtension as _};
use uuid::Uuid;

/// Which cache table an entry lives in. Also names the artifact
/// subdirectory under the cache root.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheKind {
    Image,
    Mesh,
    Skybox,
}

impl CacheKind {
    fn table(&self) -> &'static str {
        match *self {
            Self::Image => "Image",
            Self::Mesh => "Mesh",
            Self::Skybox => "Skybox",
        }
    }

    fn subdir(&self) -> &'static str {
        match *self {
            Self::Image => "image",
            Self::Mesh => "mesh",
            Self::Skybox => "skybox",
        }
    }
}

/// Maps a source file identity `(path, modification time, discriminator)`
/// to a stable GUID and the derived cache artifact path.
///
/// The GUID is anchored on `(path, discriminator)`: touching the source file
/// refreshes the stored modification time and deletes the stale artifact,
/// but the identity survives.
pub struct CacheIndex {
    conn: Mutex<Connection>,
    cache_root: PathBuf,
}

fn last_write_time_millis(path: &Path) -> Result<i64, crate::Error> {
    let metadata =
        fs::metadata(path).map_err(|_| crate::Error::SourceNotFound(path.to_path_buf()))?;
    let modified = metadata
        .modified()
        .map_err(|_| crate::Error::SourceNotFound(path.to_path_buf()))?;
    let millis = match modified.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    };
    Ok(millis)
}

impl CacheIndex {
    pub fn open(cache_root: &Path) -> Result<Self, crate::Error> {
        fs::create_dir_all(cache_root)?;
        let conn = Connection::open(cache_root.join("cache_database.sqlite"))?;
        for table in ["Image", "Mesh", "Skybox"] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table}\
                 (\
                    guid BLOB NOT NULL PRIMARY KEY,\
                    path TEXT NOT NULL,\
                    lastWriteTime INTEGER NOT NULL,\
                    discriminator INTEGER NOT NULL,\
                    UNIQUE(path, lastWriteTime, discriminator)\
                 ) WITHOUT ROWID;"
            ))?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            cache_root: cache_root.to_path_buf(),
        })
    }

    fn artifact_path(&self, kind: CacheKind, guid: Uuid) -> PathBuf {
        self.cache_root
            .join(kind.subdir())
            .join(format!("{}.cache", guid.simple()))
    }

    /// Resolve the cache artifact path for a source file.
    ///
    /// The returned path is only an address: the artifact may not exist yet,
    /// and even an existing artifact must still pass its own version check.
    #[profiling::function]
    pub fn resolve(
        &self,
        kind: CacheKind,
        source_path: &Path,
        discriminator: u32,
    ) -> Result<PathBuf, crate::Error> {
        let current_time = last_write_time_millis(source_path)?;
        let path_text = source_path.to_string_lossy();
        let conn = self.conn.lock().unwrap();

        let existing = conn
            .query_row(
                &format!(
                    "SELECT guid, lastWriteTime FROM {} WHERE path = ?1 AND discriminator = ?2;",
                    kind.table()
                ),
                params![path_text.as_ref(), discriminator],
                |row| {
                    let guid: Vec<u8> = row.get(0)?;
                    let time: i64 = row.get(1)?;
                    Ok((guid, time))
                },
            )
            .optional()?;

        let guid = match existing {
            None => {
                let guid = Uuid::new_v4();
                conn.execute(
                    &format!("INSERT INTO {} VALUES(?1, ?2, ?3, ?4);", kind.table()),
                    params![guid.as_bytes().as_slice(), path_text.as_ref(), current_time, discriminator],
                )?;
                guid
            }
            Some((blob, stored_time)) => {
                let bytes: [u8; 16] = blob
                    .try_into()
                    .map_err(|_| crate::Error::CorruptCacheRecord(path_text.to_string()))?;
                let guid = Uuid::from_bytes(bytes);
                if stored_time != current_time {
                    let artifact = self.artifact_path(kind, guid);
                    if artifact.is_file() {
                        log::warn!(
                            "Source '{}' changed on disk, dropping cached artifact",
                            path_text
                        );
                        fs::remove_file(&artifact)?;
                    }
                    conn.execute(
                        &format!(
                            "UPDATE {} SET lastWriteTime = ?1 WHERE guid = ?2;",
                            kind.table()
                        ),
                        params![current_time, guid.as_bytes().as_slice()],
                    )?;
                }
                guid
            }
        };

        Ok(self.artifact_path(kind, guid))
    }
}
