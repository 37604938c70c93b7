use chrono::Utc;
use lifehub_core::{CalendarEvent, EventType, NewCalendarEvent, Priority};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::Store;

fn event_from_row(row: &SqliteRow) -> sqlx::Result<CalendarEvent> {
    let event_type: String = row.try_get("type")?;
    let priority: String = row.try_get("priority")?;

    Ok(CalendarEvent {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        date_time: row.try_get("date_time")?,
        event_type: event_type
            .parse::<EventType>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        priority: priority
            .parse::<Priority>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        category: row.try_get("category")?,
        location: row.try_get("location")?,
        is_all_day: row.try_get("is_all_day")?,
        reminder_minutes: row.try_get("reminder_minutes")?,
        recurrence_pattern: row.try_get("recurrence_pattern")?,
        recurrence_end_date: row.try_get("recurrence_end_date")?,
        is_completed: row.try_get("is_completed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    /// Every event, earliest first.
    pub async fn list_events(&self) -> sqlx::Result<Vec<CalendarEvent>> {
        let rows = sqlx::query("SELECT * FROM calendar_events ORDER BY date_time ASC, id ASC")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    pub async fn get_event(&self, id: i64) -> sqlx::Result<Option<CalendarEvent>> {
        let row = sqlx::query("SELECT * FROM calendar_events WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    pub async fn create_event(&self, event: &NewCalendarEvent) -> sqlx::Result<CalendarEvent> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO calendar_events (title, description, date_time, type, priority, category, \
             location, is_all_day, reminder_minutes, recurrence_pattern, recurrence_end_date, \
             is_completed, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING *",
        )
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date_time)
        .bind(event.event_type.as_str())
        .bind(event.priority.as_str())
        .bind(&event.category)
        .bind(&event.location)
        .bind(event.is_all_day)
        .bind(event.reminder_minutes)
        .bind(&event.recurrence_pattern)
        .bind(event.recurrence_end_date)
        .bind(event.is_completed)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;
        event_from_row(&row)
    }

    /// Replaces an event's fields. Returns `None` when it does not exist.
    pub async fn update_event(
        &self,
        id: i64,
        event: &NewCalendarEvent,
    ) -> sqlx::Result<Option<CalendarEvent>> {
        let row = sqlx::query(
            "UPDATE calendar_events SET title = ?, description = ?, date_time = ?, type = ?, \
             priority = ?, category = ?, location = ?, is_all_day = ?, reminder_minutes = ?, \
             recurrence_pattern = ?, recurrence_end_date = ?, is_completed = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING *",
        )
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date_time)
        .bind(event.event_type.as_str())
        .bind(event.priority.as_str())
        .bind(&event.category)
        .bind(&event.location)
        .bind(event.is_all_day)
        .bind(event.reminder_minutes)
        .bind(&event.recurrence_pattern)
        .bind(event.recurrence_end_date)
        .bind(event.is_completed)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    /// Deletes an event. Returns whether it existed.
    pub async fn delete_event(&self, id: i64) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM calendar_events WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn create_fills_ids_and_timestamps() {
        let store = Store::in_memory().await.unwrap();
        let mut new = NewCalendarEvent::new("Dentist", at(9), EventType::Event, Priority::High);
        new.location = Some("Main St".to_string());
        new.reminder_minutes = Some(30);

        let event = store.create_event(&new).await.unwrap();
        assert!(event.id > 0);
        assert_eq!(event.title, "Dentist");
        assert_eq!(event.date_time, at(9));
        assert_eq!(event.event_type, EventType::Event);
        assert_eq!(event.priority, Priority::High);
        assert_eq!(event.location.as_deref(), Some("Main St"));
        assert_eq!(event.reminder_minutes, Some(30));
        assert!(!event.is_completed);
        assert_eq!(event.created_at, event.updated_at);

        assert_eq!(store.get_event(event.id).await.unwrap(), Some(event));
    }

    #[tokio::test]
    async fn list_is_ordered_by_date() {
        let store = Store::in_memory().await.unwrap();
        for (title, hour) in [("late", 18), ("early", 7), ("noon", 12)] {
            store
                .create_event(&NewCalendarEvent::new(title, at(hour), EventType::Task, Priority::Low))
                .await
                .unwrap();
        }

        let titles: Vec<String> = store
            .list_events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["early", "noon", "late"]);
    }

    #[tokio::test]
    async fn update_replaces_fields() {
        let store = Store::in_memory().await.unwrap();
        let created = store
            .create_event(&NewCalendarEvent::new("Draft", at(8), EventType::Task, Priority::Low))
            .await
            .unwrap();

        let mut changes = NewCalendarEvent::new("Final", at(10), EventType::Milestone, Priority::Medium);
        changes.is_completed = true;
        changes.recurrence_pattern = Some("weekly".to_string());
        changes.recurrence_end_date = Some(at(10) + Duration::days(30));

        let updated = store.update_event(created.id, &changes).await.unwrap().unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.event_type, EventType::Milestone);
        assert!(updated.is_completed);
        assert_eq!(updated.recurrence_pattern.as_deref(), Some("weekly"));
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);

        assert!(store.update_event(created.id + 1, &changes).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = Store::in_memory().await.unwrap();
        let created = store
            .create_event(&NewCalendarEvent::new("Gone", at(8), EventType::Event, Priority::Low))
            .await
            .unwrap();

        assert!(store.delete_event(created.id).await.unwrap());
        assert!(!store.delete_event(created.id).await.unwrap());
        assert!(store.get_event(created.id).await.unwrap().is_none());
    }
}
