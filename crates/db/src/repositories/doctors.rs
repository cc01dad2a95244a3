use sqlx::{sqlite::SqliteRow, Row};

use recepta_core::domain::doctor::{Doctor, DoctorId};

use super::{DoctorRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDoctorRepository {
    pool: DbPool,
}

impl SqlDoctorRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn list_active(&self) -> Result<Vec<Doctor>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, calendar_id, contact_number, procedures, insurances,
                    available_weekdays, working_hours, slot_minutes, active
             FROM doctors
             WHERE active = 1
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(doctor_from_row).collect()
    }
}

#[async_trait::async_trait]
impl DoctorRepository for SqlDoctorRepository {
    async fn find(&self, id: &DoctorId) -> Result<Option<Doctor>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, calendar_id, contact_number, procedures, insurances,
                    available_weekdays, working_hours, slot_minutes, active
             FROM doctors
             WHERE id = ? AND active = 1",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(doctor_from_row).transpose()
    }

    async fn find_by_calendar(&self, calendar_id: &str) -> Result<Option<Doctor>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, calendar_id, contact_number, procedures, insurances,
                    available_weekdays, working_hours, slot_minutes, active
             FROM doctors
             WHERE calendar_id = ? AND active = 1",
        )
        .bind(calendar_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(doctor_from_row).transpose()
    }

    async fn list_available(
        &self,
        procedure: &str,
        insurance: Option<&str>,
    ) -> Result<Vec<Doctor>, RepositoryError> {
        // JSON-array columns are filtered here rather than in SQL; the
        // roster is small and the matching is case-insensitive.
        let doctors = self.list_active().await?;
        Ok(doctors
            .into_iter()
            .filter(|doctor| doctor.offers_procedure(procedure))
            .filter(|doctor| insurance.map_or(true, |plan| doctor.accepts_insurance(plan)))
            .collect())
    }

    async fn save(&self, doctor: &Doctor) -> Result<(), RepositoryError> {
        let procedures = encode_json("procedures", &doctor.procedures)?;
        let insurances = encode_json("insurances", &doctor.insurances)?;
        let weekdays = encode_json("available_weekdays", &doctor.available_weekdays)?;
        let hours = encode_json("working_hours", &doctor.working_hours)?;

        sqlx::query(
            "INSERT INTO doctors (
                id, name, calendar_id, contact_number, procedures, insurances,
                available_weekdays, working_hours, slot_minutes, active
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                calendar_id = excluded.calendar_id,
                contact_number = excluded.contact_number,
                procedures = excluded.procedures,
                insurances = excluded.insurances,
                available_weekdays = excluded.available_weekdays,
                working_hours = excluded.working_hours,
                slot_minutes = excluded.slot_minutes,
                active = excluded.active",
        )
        .bind(&doctor.id.0)
        .bind(&doctor.name)
        .bind(&doctor.calendar_id)
        .bind(doctor.contact_number.as_deref())
        .bind(procedures)
        .bind(insurances)
        .bind(weekdays)
        .bind(hours)
        .bind(i64::from(doctor.slot_minutes))
        .bind(i64::from(doctor.active))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn encode_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("`{column}` encode failed: {error}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: String,
) -> Result<T, RepositoryError> {
    serde_json::from_str(&raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid `{column}` json: {error}")))
}

fn doctor_from_row(row: SqliteRow) -> Result<Doctor, RepositoryError> {
    Ok(Doctor {
        id: DoctorId(row.try_get("id")?),
        name: row.try_get("name")?,
        calendar_id: row.try_get("calendar_id")?,
        contact_number: row.try_get("contact_number")?,
        procedures: decode_json("procedures", row.try_get("procedures")?)?,
        insurances: decode_json("insurances", row.try_get("insurances")?)?,
        available_weekdays: decode_json("available_weekdays", row.try_get("available_weekdays")?)?,
        working_hours: decode_json("working_hours", row.try_get("working_hours")?)?,
        slot_minutes: u32::try_from(row.try_get::<i64, _>("slot_minutes")?)
            .map_err(|_| RepositoryError::Decode("negative slot_minutes".to_owned()))?,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}

#[cfg(test)]
mod tests {
    use recepta_core::domain::doctor::{Doctor, DoctorId, HoursBlock};

    use super::SqlDoctorRepository;
    use crate::migrations;
    use crate::repositories::DoctorRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool(name: &str) -> DbPool {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        let pool = connect_with_settings(&url, 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn doctor(id: &str, name: &str, procedures: &[&str], insurances: &[&str]) -> Doctor {
        Doctor {
            id: DoctorId(id.to_owned()),
            name: name.to_owned(),
            calendar_id: format!("{id}@calendar"),
            contact_number: Some("5599000000001".to_owned()),
            procedures: procedures.iter().map(|p| (*p).to_owned()).collect(),
            insurances: insurances.iter().map(|i| (*i).to_owned()).collect(),
            available_weekdays: vec![1, 2, 3, 4, 5],
            working_hours: vec![HoursBlock {
                label: "morning".to_owned(),
                start: "08:00".to_owned(),
                end: "12:00".to_owned(),
            }],
            slot_minutes: 60,
            active: true,
        }
    }

    #[tokio::test]
    async fn listing_filters_by_procedure_and_insurance() {
        let pool = setup_pool("doctors_filter").await;
        let repo = SqlDoctorRepository::new(pool.clone());

        repo.save(&doctor("dr-1", "Dra. Rosa", &["cleaning", "whitening"], &["unimed"]))
            .await
            .expect("save dr-1");
        repo.save(&doctor("dr-2", "Dr. Lima", &["root canal"], &["bradesco"]))
            .await
            .expect("save dr-2");

        let cleaning = repo.list_available("cleaning", None).await.expect("list cleaning");
        assert_eq!(cleaning.len(), 1);
        assert_eq!(cleaning[0].name, "Dra. Rosa");

        let with_insurance =
            repo.list_available("cleaning", Some("bradesco")).await.expect("list with insurance");
        assert!(with_insurance.is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn inactive_doctors_are_invisible() {
        let pool = setup_pool("doctors_inactive").await;
        let repo = SqlDoctorRepository::new(pool.clone());

        let mut retired = doctor("dr-3", "Dr. Prado", &["cleaning"], &[]);
        retired.active = false;
        repo.save(&retired).await.expect("save");

        assert!(repo.find(&retired.id).await.expect("find").is_none());
        assert!(repo.list_available("cleaning", None).await.expect("list").is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn calendar_lookup_returns_full_record() {
        let pool = setup_pool("doctors_calendar").await;
        let repo = SqlDoctorRepository::new(pool.clone());

        let expected = doctor("dr-4", "Dra. Nunes", &["whitening"], &["unimed"]);
        repo.save(&expected).await.expect("save");

        let found = repo
            .find_by_calendar("dr-4@calendar")
            .await
            .expect("find by calendar")
            .expect("doctor exists");
        assert_eq!(found, expected);

        pool.close().await;
    }
}
