use camino::Utf8Path;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};
use serde::{Deserialize, Serialize};

use crate::error::PrepError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySample {
    pub study_id: String,
    pub study_name: String,
    pub run_id: String,
    pub sample_id: String,
    pub sample_name: String,
    pub manual_qc: bool,
}

pub trait SampleRegistry: Send + Sync {
    fn samples_for_sponsor(&self, sponsor: &str) -> Result<Vec<RegistrySample>, PrepError>;

    fn close(&self) -> Result<(), PrepError>;
}

const SAMPLES_FOR_SPONSOR: &str = r"
SELECT DISTINCT
  CAST(st.id_study_lims AS TEXT),
  st.name,
  CAST(r.id_run AS TEXT),
  sa.sanger_sample_id,
  sa.supplier_name,
  fc.manual_qc
FROM iseq_flowcell fc
JOIN study st ON st.id_study_tmp = fc.id_study_tmp
JOIN iseq_run r ON r.id_flowcell_lims = fc.id_flowcell_lims
JOIN sample sa ON sa.id_sample_tmp = fc.id_sample_tmp
WHERE st.faculty_sponsor = ?1 AND fc.manual_qc IN (0, 1)
ORDER BY r.id_run, sa.sanger_sample_id
";

pub struct SqliteRegistry {
    conn: Mutex<Option<Connection>>,
}

impl SqliteRegistry {
    pub fn open(path: &Utf8Path) -> Result<Self, PrepError> {
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| PrepError::Registry(format!("open {path}: {err}")))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }
}

impl SampleRegistry for SqliteRegistry {
    fn samples_for_sponsor(&self, sponsor: &str) -> Result<Vec<RegistrySample>, PrepError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(PrepError::RegistryClosed)?;

        let mut stmt = conn
            .prepare_cached(SAMPLES_FOR_SPONSOR)
            .map_err(|err| PrepError::Registry(err.to_string()))?;
        let rows = stmt
            .query_map(params![sponsor], |row| {
                Ok(RegistrySample {
                    study_id: row.get(0)?,
                    study_name: row.get(1)?,
                    run_id: row.get(2)?,
                    sample_id: row.get(3)?,
                    sample_name: row.get(4)?,
                    manual_qc: row.get::<_, i64>(5)? == 1,
                })
            })
            .map_err(|err| PrepError::Registry(err.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|err| PrepError::Registry(err.to_string()))
    }

    fn close(&self) -> Result<(), PrepError> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        conn.close()
            .map_err(|(_, err)| PrepError::Registry(err.to_string()))
    }
}
