//! Client and appointment database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use super::{classify, fmt_ts, parse_ts, Database, DbError, DbResult};
use crate::models::{Appointment, AppointmentStatus, Client};

impl Database {
    /// Insert a new client.
    pub fn insert_client(&self, client: &Client) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO clients (id, first_name, last_name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![client.id, client.first_name, client.last_name, client.created_at],
        )?;
        Ok(())
    }

    /// Get a client by ID.
    pub fn get_client(&self, client_id: &str) -> DbResult<Option<Client>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, first_name, last_name, created_at FROM clients WHERE id = ?",
                [client_id],
                |row| {
                    Ok(Client {
                        id: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    /// Insert a new appointment.
    pub fn insert_appointment(&self, appointment: &Appointment) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO appointments (id, client_id, clinician_id, appointment_date, status)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    appointment.id,
                    appointment.client_id,
                    appointment.clinician_id,
                    fmt_ts(&appointment.appointment_date),
                    appointment.status.as_str(),
                ],
            )
            .map_err(|e| classify(e, "Client or clinician"))?;
        Ok(())
    }

    /// Get an appointment by ID.
    pub fn get_appointment(&self, appointment_id: &str) -> DbResult<Option<Appointment>> {
        self.conn
            .query_row(
                r#"
                SELECT id, client_id, clinician_id, appointment_date, status
                FROM appointments WHERE id = ?
                "#,
                [appointment_id],
                read_appointment_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Update an appointment's status.
    pub fn set_appointment_status(
        &self,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE appointments SET status = ?2 WHERE id = ?1",
            params![appointment_id, status.as_str()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Completed appointments before `before` that have no note at all.
    ///
    /// `clinician_ids = None` means every clinician.
    pub fn list_appointments_without_notes(
        &self,
        clinician_ids: Option<&[String]>,
        before: &DateTime<Utc>,
    ) -> DbResult<Vec<Appointment>> {
        let mut sql = String::from(
            r#"
            SELECT a.id, a.client_id, a.clinician_id, a.appointment_date, a.status
            FROM appointments a
            WHERE a.status = 'COMPLETED'
              AND a.appointment_date < ?
              AND NOT EXISTS (SELECT 1 FROM clinical_notes n WHERE n.appointment_id = a.id)
            "#,
        );
        let mut args = vec![fmt_ts(before)];
        if let Some(ids) = clinician_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND a.clinician_id IN ({})", placeholders(ids.len())));
            args.extend(ids.iter().cloned());
        }
        sql.push_str(" ORDER BY a.appointment_date ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), read_appointment_row)?;

        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?.try_into()?);
        }
        Ok(appointments)
    }
}

/// `?, ?, ?` for an IN clause.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Intermediate row struct for database mapping.
struct AppointmentRow {
    id: String,
    client_id: String,
    clinician_id: String,
    appointment_date: String,
    status: String,
}

fn read_appointment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppointmentRow> {
    Ok(AppointmentRow {
        id: row.get(0)?,
        client_id: row.get(1)?,
        clinician_id: row.get(2)?,
        appointment_date: row.get(3)?,
        status: row.get(4)?,
    })
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DbError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let status = AppointmentStatus::parse(&row.status).ok_or_else(|| {
            DbError::Constraint(format!("Unknown appointment status: {}", row.status))
        })?;

        Ok(Appointment {
            id: row.id,
            client_id: row.client_id,
            clinician_id: row.clinician_id,
            appointment_date: parse_ts(&row.appointment_date)?,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, User};
    use chrono::Duration;

    fn setup() -> (Database, User, Client) {
        let db = Database::open_in_memory().unwrap();
        let user = User::new("Dr A".into(), "a@x.org".into(), vec![Role::Clinician]);
        db.insert_user(&user).unwrap();
        let client = Client::new("Jo".into(), "Doe".into());
        db.insert_client(&client).unwrap();
        (db, user, client)
    }

    #[test]
    fn test_appointment_roundtrip() {
        let (db, user, client) = setup();
        let appt = Appointment::new(client.id.clone(), user.id.clone(), Utc::now());
        db.insert_appointment(&appt).unwrap();

        let got = db.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(got.client_id, client.id);
        assert_eq!(got.status, AppointmentStatus::Scheduled);

        db.set_appointment_status(&appt.id, AppointmentStatus::Completed).unwrap();
        let got = db.get_appointment(&appt.id).unwrap().unwrap();
        assert_eq!(got.status, AppointmentStatus::Completed);
    }

    #[test]
    fn test_appointment_for_unknown_client() {
        let (db, user, _) = setup();
        let appt = Appointment::new("ghost".into(), user.id, Utc::now());
        assert!(matches!(db.insert_appointment(&appt), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_appointments_without_notes_scoped() {
        let (db, user, client) = setup();
        let now = Utc::now();
        let mut past = Appointment::new(client.id.clone(), user.id.clone(), now - Duration::days(2));
        past.status = AppointmentStatus::Completed;
        db.insert_appointment(&past).unwrap();
        let future = Appointment::new(client.id.clone(), user.id.clone(), now + Duration::days(2));
        db.insert_appointment(&future).unwrap();

        let all = db.list_appointments_without_notes(None, &now).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, past.id);

        let other = vec!["someone-else".to_string()];
        assert!(db
            .list_appointments_without_notes(Some(&other), &now)
            .unwrap()
            .is_empty());
    }
}
