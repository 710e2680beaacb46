//! Customer, contact, email, and follow-up bookkeeping the background
//! pipelines read and write.

use rusqlite::{params, OptionalExtension};

use salesloop_core::error::{Result, SalesloopError};
use salesloop_core::types::{Contact, EmailDraft, EmailRecord};

use crate::{now_text, parse_ts_opt, Store};

impl Store {
    pub fn create_customer(&self, name: &str) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SalesloopError::Validation("customer name is empty".into()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO customers (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![name, now_text()],
        )
        .map_err(|e| SalesloopError::Store(format!("create customer: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_contact(&self, customer_id: i64, contact: &Contact) -> Result<i64> {
        if customer_id <= 0 {
            return Err(SalesloopError::Validation("invalid customer id".into()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO contacts (customer_id, name, title, email, phone, is_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                customer_id,
                contact.name,
                contact.title,
                contact.email,
                contact.phone,
                contact.is_key as i64,
                now_text()
            ],
        )
        .map_err(|e| SalesloopError::Store(format!("add contact: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// All contacts for a customer, key contacts first.
    pub fn list_contacts(&self, customer_id: i64) -> Result<Vec<Contact>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT name, title, email, phone, is_key FROM contacts
                 WHERE customer_id = ?1 ORDER BY is_key DESC, id ASC",
            )
            .map_err(|e| SalesloopError::Store(format!("list contacts: {e}")))?;
        let contacts = stmt
            .query_map(params![customer_id], |row| {
                Ok(Contact {
                    name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    email: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    phone: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    is_key: row.get::<_, i64>(4)? != 0,
                })
            })
            .map_err(|e| SalesloopError::Store(format!("list contacts: {e}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| SalesloopError::Store(format!("scan contacts: {e}")))?;
        Ok(contacts)
    }

    /// Persist a generated email. `kind` is `initial` or `followup`.
    pub fn insert_email_draft(
        &self,
        customer_id: i64,
        kind: &str,
        draft: &EmailDraft,
        status: &str,
    ) -> Result<i64> {
        if customer_id <= 0 {
            return Err(SalesloopError::Validation("invalid customer id".into()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO emails (customer_id, type, subject, body, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![customer_id, kind, draft.subject, draft.body, status, now_text()],
        )
        .map_err(|e| SalesloopError::Store(format!("insert email: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_email(&self, email_id: i64) -> Result<EmailRecord> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, customer_id, type, subject, body, status, provider_message_id, sent_at
             FROM emails WHERE id = ?1",
            params![email_id],
            |row| {
                Ok(EmailRecord {
                    id: row.get(0)?,
                    customer_id: row.get(1)?,
                    kind: row.get(2)?,
                    subject: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    body: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    status: row.get(5)?,
                    provider_message_id: row.get(6)?,
                    sent_at: parse_ts_opt(row.get(7)?),
                })
            },
        )
        .optional()
        .map_err(|e| SalesloopError::Store(format!("query email: {e}")))?
        .ok_or_else(|| SalesloopError::NotFound(format!("email {email_id}")))
    }

    /// Mark an email as delivered and keep the provider's message id.
    pub fn update_email_sent(&self, email_id: i64, provider_message_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = now_text();
        conn.execute(
            "UPDATE emails
             SET status = 'sent', provider_message_id = ?1, sent_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![provider_message_id, now, email_id],
        )
        .map_err(|e| SalesloopError::Store(format!("update email sent: {e}")))?;
        Ok(())
    }

    /// Record that the automation pipeline set up follow-up tracking for a
    /// customer off a given initial email.
    pub fn save_initial_followup(
        &self,
        customer_id: i64,
        initial_email_id: i64,
        notes: &str,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO followups (customer_id, initial_email_id, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![customer_id, initial_email_id, notes, now_text()],
        )
        .map_err(|e| SalesloopError::Store(format!("save followup: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest follow-up record for a customer, if one exists.
    pub fn latest_followup_id(&self, customer_id: i64) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT id FROM followups WHERE customer_id = ?1 ORDER BY id DESC LIMIT 1",
                params![customer_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SalesloopError::Store(format!("query followup: {e}")))?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_customer_rejects_blank_name() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.create_customer("  "),
            Err(SalesloopError::Validation(_))
        ));
    }

    #[test]
    fn contacts_list_key_first() {
        let store = Store::open_in_memory().unwrap();
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        store
            .add_contact(
                customer_id,
                &Contact {
                    name: "Bob".into(),
                    email: "bob@acme.test".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .add_contact(
                customer_id,
                &Contact {
                    name: "Alice".into(),
                    email: "alice@acme.test".into(),
                    is_key: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let contacts = store.list_contacts(customer_id).unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].name, "Alice");
        assert!(contacts[0].is_key);
    }

    #[test]
    fn email_draft_to_sent_transition() {
        let store = Store::open_in_memory().unwrap();
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        let email_id = store
            .insert_email_draft(
                customer_id,
                "followup",
                &EmailDraft {
                    subject: "Checking in".into(),
                    body: "Any thoughts?".into(),
                },
                "draft",
            )
            .unwrap();

        let email = store.get_email(email_id).unwrap();
        assert_eq!(email.kind, "followup");
        assert_eq!(email.status, "draft");
        assert!(email.sent_at.is_none());

        store.update_email_sent(email_id, "msg-42").unwrap();
        let email = store.get_email(email_id).unwrap();
        assert_eq!(email.status, "sent");
        assert_eq!(email.provider_message_id.as_deref(), Some("msg-42"));
        assert!(email.sent_at.is_some());
    }

    #[test]
    fn followup_bookkeeping_is_per_customer() {
        let store = Store::open_in_memory().unwrap();
        let customer_id = store.create_customer("Acme Gmbh").unwrap();
        assert_eq!(store.latest_followup_id(customer_id).unwrap(), None);

        let email_id = store
            .insert_email_draft(
                customer_id,
                "initial",
                &EmailDraft {
                    subject: "Hi".into(),
                    body: "Intro".into(),
                },
                "sent",
            )
            .unwrap();
        let followup_id = store
            .save_initial_followup(customer_id, email_id, "scheduled by automation")
            .unwrap();
        assert_eq!(
            store.latest_followup_id(customer_id).unwrap(),
            Some(followup_id)
        );

        let other = store.create_customer("Other Ltd").unwrap();
        assert_eq!(store.latest_followup_id(other).unwrap(), None);
    }
}
