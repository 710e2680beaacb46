//! Singleton settings row (id = 1) read by both background pipelines.

use rusqlite::{params, OptionalExtension};

use salesloop_core::error::{Result, SalesloopError};
use salesloop_core::types::Settings;

use crate::{now_text, Store};

impl Store {
    /// Current settings, or defaults when the row was never written.
    pub fn get_settings(&self) -> Result<Settings> {
        let conn = self.lock()?;
        let settings = conn
            .query_row(
                "SELECT admin_email, automation_required_grade, automation_followup_days
                 FROM settings WHERE id = 1",
                [],
                |row| {
                    Ok(Settings {
                        admin_email: row.get(0)?,
                        automation_required_grade: row.get(1)?,
                        automation_followup_days: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| SalesloopError::Store(format!("query settings: {e}")))?;
        Ok(settings.unwrap_or_default())
    }

    pub fn update_settings(&self, settings: &Settings) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (id, admin_email, automation_required_grade,
                                   automation_followup_days, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                admin_email = excluded.admin_email,
                automation_required_grade = excluded.automation_required_grade,
                automation_followup_days = excluded.automation_followup_days,
                updated_at = excluded.updated_at",
            params![
                settings.admin_email.trim(),
                settings.automation_required_grade.trim(),
                settings.automation_followup_days,
                now_text()
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("update settings: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_row_yields_defaults() {
        let store = Store::open_in_memory().unwrap();
        let settings = store.get_settings().unwrap();
        assert_eq!(settings.admin_email, "");
        assert_eq!(settings.automation_required_grade, "A");
        assert_eq!(settings.automation_followup_days, 3);
    }

    #[test]
    fn upsert_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store
            .update_settings(&Settings {
                admin_email: "ops@example.test".into(),
                automation_required_grade: "B".into(),
                automation_followup_days: 7,
            })
            .unwrap();
        store
            .update_settings(&Settings {
                admin_email: "ops@example.test".into(),
                automation_required_grade: "C".into(),
                automation_followup_days: 5,
            })
            .unwrap();

        let settings = store.get_settings().unwrap();
        assert_eq!(settings.automation_required_grade, "C");
        assert_eq!(settings.automation_followup_days, 5);
    }
}
