use sqlx::{sqlite::SqliteRow, Row};

use recepta_core::domain::knowledge::StoredFile;

use super::{FileRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFileRepository {
    pool: DbPool,
}

impl SqlFileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FileRepository for SqlFileRepository {
    async fn find_by_category(
        &self,
        category: &str,
    ) -> Result<Option<StoredFile>, RepositoryError> {
        let pattern = format!("%{}%", category.trim());
        let row = sqlx::query(
            "SELECT category, file_name, media_type, location
             FROM stored_file
             WHERE category LIKE ?
             LIMIT 1",
        )
        .bind(pattern)
        .fetch_optional(&self.pool)
        .await?;

        row.map(file_from_row).transpose()
    }

    async fn save(&self, file: &StoredFile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO stored_file (category, file_name, media_type, location)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(category) DO UPDATE SET
                file_name = excluded.file_name,
                media_type = excluded.media_type,
                location = excluded.location",
        )
        .bind(&file.category)
        .bind(&file.file_name)
        .bind(&file.media_type)
        .bind(&file.location)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn file_from_row(row: SqliteRow) -> Result<StoredFile, RepositoryError> {
    Ok(StoredFile {
        category: row.try_get("category")?,
        file_name: row.try_get("file_name")?,
        media_type: row.try_get("media_type")?,
        location: row.try_get("location")?,
    })
}
