use sqlx::{sqlite::SqliteRow, Row};

use recepta_core::domain::booking::Booking;
use recepta_core::domain::user::SessionId;

use super::users::parse_timestamp;
use super::{BookingRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn save(&self, booking: &Booking) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO bookings (
                session_id, event_id, summary, procedure, doctor_name,
                starts_at, ends_at, description, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, event_id) DO UPDATE SET
                summary = excluded.summary,
                procedure = excluded.procedure,
                doctor_name = excluded.doctor_name,
                starts_at = excluded.starts_at,
                ends_at = excluded.ends_at,
                description = excluded.description",
        )
        .bind(&booking.session_id.0)
        .bind(&booking.event_id)
        .bind(&booking.summary)
        .bind(&booking.procedure)
        .bind(&booking.doctor_name)
        .bind(booking.starts_at.to_rfc3339())
        .bind(booking.ends_at.to_rfc3339())
        .bind(&booking.description)
        .bind(booking.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_session(
        &self,
        session: &SessionId,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT session_id, event_id, summary, procedure, doctor_name,
                    starts_at, ends_at, description, created_at
             FROM bookings
             WHERE session_id = ?
             ORDER BY starts_at ASC",
        )
        .bind(&session.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(booking_from_row).collect()
    }

    async fn delete(&self, session: &SessionId, event_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM bookings WHERE session_id = ? AND event_id = ?")
            .bind(&session.0)
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn booking_from_row(row: SqliteRow) -> Result<Booking, RepositoryError> {
    Ok(Booking {
        session_id: SessionId(row.try_get("session_id")?),
        event_id: row.try_get("event_id")?,
        summary: row.try_get("summary")?,
        procedure: row.try_get("procedure")?,
        doctor_name: row.try_get("doctor_name")?,
        starts_at: parse_timestamp("starts_at", row.try_get("starts_at")?)?,
        ends_at: parse_timestamp("ends_at", row.try_get("ends_at")?)?,
        description: row.try_get("description")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use recepta_core::domain::booking::Booking;
    use recepta_core::domain::user::SessionId;

    use super::SqlBookingRepository;
    use crate::migrations;
    use crate::repositories::BookingRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool(name: &str) -> DbPool {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        let pool = connect_with_settings(&url, 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn booking(session: &SessionId, event_id: &str, starts_at: &str) -> Booking {
        Booking {
            session_id: session.clone(),
            event_id: event_id.to_owned(),
            summary: "Consultation".to_owned(),
            procedure: "cleaning".to_owned(),
            doctor_name: "Dra. Rosa".to_owned(),
            starts_at: parse_ts(starts_at),
            ends_at: parse_ts(starts_at) + chrono::Duration::hours(1),
            description: "first visit".to_owned(),
            created_at: parse_ts("2026-08-01T09:00:00Z"),
        }
    }

    #[tokio::test]
    async fn bookings_round_trip_ordered_by_start() {
        let pool = setup_pool("bookings_round_trip").await;
        let repo = SqlBookingRepository::new(pool.clone());
        let session = SessionId("5599444440001".to_owned());

        let later = booking(&session, "evt-2", "2026-08-20T14:00:00Z");
        let earlier = booking(&session, "evt-1", "2026-08-10T14:00:00Z");
        repo.save(&later).await.expect("save later");
        repo.save(&earlier).await.expect("save earlier");

        let listed = repo.list_for_session(&session).await.expect("list");
        assert_eq!(listed, vec![earlier, later]);

        pool.close().await;
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_was_removed() {
        let pool = setup_pool("bookings_delete").await;
        let repo = SqlBookingRepository::new(pool.clone());
        let session = SessionId("5599444440002".to_owned());

        repo.save(&booking(&session, "evt-1", "2026-08-10T14:00:00Z")).await.expect("save");

        assert!(repo.delete(&session, "evt-1").await.expect("delete"));
        assert!(!repo.delete(&session, "evt-1").await.expect("delete again"));
        assert!(repo.list_for_session(&session).await.expect("list").is_empty());

        pool.close().await;
    }
}
