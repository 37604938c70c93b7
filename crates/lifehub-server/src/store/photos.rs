use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lifehub_core::{ContentHash, Photo, normalize_labels};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::Store;

const PHOTO_COLUMNS: &str =
    "id, file_id, name, unique_name, description, image_url, content_hash, created_at";

/// A photo row about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPhoto {
    pub file_id: String,
    pub name: String,
    pub unique_name: Option<String>,
    pub description: Option<String>,
    pub image_url: String,
    pub content_hash: Option<ContentHash>,
}

impl NewPhoto {
    /// A photo found in Drive, without upload metadata.
    pub fn imported(file_id: impl Into<String>, name: impl Into<String>) -> Self {
        let file_id = file_id.into();
        Self {
            image_url: lifehub_core::drive_download_url(&file_id),
            file_id,
            name: name.into(),
            unique_name: None,
            description: None,
            content_hash: None,
        }
    }
}

fn photo_from_row(row: &SqliteRow) -> sqlx::Result<Photo> {
    Ok(Photo {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        name: row.try_get("name")?,
        unique_name: row.try_get("unique_name")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        content_hash: row.try_get("content_hash")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        labels: Vec::new(),
    })
}

impl Store {
    /// All photos with their labels, newest first.
    pub async fn list_photos(&self) -> sqlx::Result<Vec<Photo>> {
        let rows = sqlx::query(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos ORDER BY id DESC"
        ))
        .fetch_all(self.pool())
        .await?;
        let mut photos = rows
            .iter()
            .map(photo_from_row)
            .collect::<sqlx::Result<Vec<_>>>()?;

        let label_rows = sqlx::query("SELECT photo_id, label FROM photo_labels ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        let mut labels: HashMap<i64, Vec<String>> = HashMap::new();
        for row in &label_rows {
            labels
                .entry(row.try_get("photo_id")?)
                .or_default()
                .push(row.try_get("label")?);
        }

        for photo in &mut photos {
            if let Some(found) = labels.remove(&photo.id) {
                photo.labels = found;
            }
        }
        Ok(photos)
    }

    pub async fn photo_exists(&self, file_id: &str) -> sqlx::Result<bool> {
        let row = sqlx::query("SELECT 1 FROM photos WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    /// The photo previously uploaded with the same content, if any.
    pub async fn find_by_content_hash(&self, hash: &ContentHash) -> sqlx::Result<Option<Photo>> {
        let row = sqlx::query(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos WHERE content_hash = ? ORDER BY id LIMIT 1"
        ))
        .bind(hash.as_str())
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut photo = photo_from_row(&row)?;
        photo.labels = self.photo_labels(photo.id).await?;
        Ok(Some(photo))
    }

    pub async fn photo_labels(&self, photo_id: i64) -> sqlx::Result<Vec<String>> {
        sqlx::query_scalar("SELECT label FROM photo_labels WHERE photo_id = ? ORDER BY id")
            .bind(photo_id)
            .fetch_all(self.pool())
            .await
    }

    /// Inserts a photo and its labels in one transaction.
    ///
    /// Returns the new row id, or `None` when a photo with the same Drive
    /// file id already exists; labels are only written for a new row.
    pub async fn insert_photo(&self, photo: &NewPhoto, labels: &[String]) -> sqlx::Result<Option<i64>> {
        let mut tx = self.pool().begin().await?;

        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO photos (file_id, name, unique_name, description, image_url, content_hash, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (file_id) DO NOTHING \
             RETURNING id",
        )
        .bind(&photo.file_id)
        .bind(&photo.name)
        .bind(&photo.unique_name)
        .bind(&photo.description)
        .bind(&photo.image_url)
        .bind(photo.content_hash.as_ref().map(ContentHash::as_str))
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = id {
            for label in normalize_labels(labels) {
                sqlx::query("INSERT INTO photo_labels (photo_id, label) VALUES (?, ?)")
                    .bind(id)
                    .bind(label)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(id)
    }

    /// Deletes a photo; its labels go with it. Returns whether a row existed.
    pub async fn delete_photo(&self, id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM photos WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replaces every label of a photo.
    ///
    /// Labels are trimmed and empty ones dropped. Returns the stored labels,
    /// or `None` when the photo does not exist.
    pub async fn replace_labels(&self, photo_id: i64, labels: &[String]) -> sqlx::Result<Option<Vec<String>>> {
        let labels = normalize_labels(labels);
        let mut tx = self.pool().begin().await?;

        let exists = sqlx::query("SELECT 1 FROM photos WHERE id = ?")
            .bind(photo_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Ok(None);
        }

        sqlx::query("DELETE FROM photo_labels WHERE photo_id = ?")
            .bind(photo_id)
            .execute(&mut *tx)
            .await?;
        for label in &labels {
            sqlx::query("INSERT INTO photo_labels (photo_id, label) VALUES (?, ?)")
                .bind(photo_id)
                .bind(label)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(labels))
    }
}
