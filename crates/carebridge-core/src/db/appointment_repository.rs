//! Appointment repository implementation

use crate::error::Result;
use crate::models::{Appointment, AppointmentId};
use libsql::Connection;

/// Trait for appointment storage operations (async)
#[allow(async_fn_in_trait)]
pub trait AppointmentRepository {
    /// Persist a new appointment
    async fn create(&self, appointment: &Appointment) -> Result<()>;

    /// Fetch an appointment by id
    async fn get(&self, id: &AppointmentId) -> Result<Option<Appointment>>;

    /// Record the downstream-assigned identifier on the appointment.
    ///
    /// Returns `false` when the appointment doesn't exist. The sync worker
    /// calls this best-effort after a successful propagation.
    async fn set_external_id(&self, id: &AppointmentId, external_id: &str) -> Result<bool>;
}

/// libSQL implementation of `AppointmentRepository`
pub struct LibSqlAppointmentRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlAppointmentRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an appointment from a database row
    fn parse_appointment(row: &libsql::Row) -> Result<Appointment> {
        let id: String = row.get(0)?;
        let id = id
            .parse()
            .map_err(|_| crate::error::Error::Storage(format!("invalid appointment id: {id}")))?;

        Ok(Appointment {
            id,
            client_name: row.get(1)?,
            starts_at: row.get(2)?,
            external_id: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl AppointmentRepository for LibSqlAppointmentRepository<'_> {
    async fn create(&self, appointment: &Appointment) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO appointments (id, client_name, starts_at, external_id, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    appointment.id.as_str(),
                    appointment.client_name.clone(),
                    appointment.starts_at,
                    appointment.external_id.clone(),
                    appointment.created_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &AppointmentId) -> Result<Option<Appointment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, client_name, starts_at, external_id, created_at
                 FROM appointments WHERE id = ?",
                libsql::params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_appointment(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_external_id(&self, id: &AppointmentId, external_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE appointments SET external_id = ? WHERE id = ?",
                libsql::params![external_id, id.as_str()],
            )
            .await?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_and_get() {
        let db = setup().await;
        let repo = LibSqlAppointmentRepository::new(db.connection());

        let appointment = Appointment::new("Dana Reyes", 1_700_000_000_000);
        repo.create(&appointment).await.unwrap();

        let fetched = repo.get(&appointment.id).await.unwrap().unwrap();
        assert_eq!(fetched, appointment);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_missing_returns_none() {
        let db = setup().await;
        let repo = LibSqlAppointmentRepository::new(db.connection());

        let fetched = repo.get(&AppointmentId::new()).await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_external_id() {
        let db = setup().await;
        let repo = LibSqlAppointmentRepository::new(db.connection());

        let appointment = Appointment::new("Dana Reyes", 1_700_000_000_000);
        repo.create(&appointment).await.unwrap();

        assert!(repo
            .set_external_id(&appointment.id, "pms-4711")
            .await
            .unwrap());

        let fetched = repo.get(&appointment.id).await.unwrap().unwrap();
        assert_eq!(fetched.external_id.as_deref(), Some("pms-4711"));

        // Unknown appointment: reported, not an error
        assert!(!repo
            .set_external_id(&AppointmentId::new(), "pms-0")
            .await
            .unwrap());
    }
}
