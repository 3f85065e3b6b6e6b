/// Entry and exit recording
///
/// Both transitions are decided by a conditional update that runs before any
/// read in its transaction, so concurrent submissions queue on the SQLite
/// write lock. The loser's update affects no rows and is refused with a
/// conflict.
use super::{
    clean_optional, normalize_code, EntryListingRow, ExitOutcome, VisitEvent, VisitorEntry,
    VisitorTokenManager, ENTRY_SELECT, TOKEN_COLUMNS,
};
use crate::{
    db::models::{VisitorEntryRow, VisitorTokenRow},
    error::{EstateError, EstateResult},
    metrics,
};
use chrono::{DateTime, Duration, Utc};

/// Identifies the visit to close
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitTarget {
    Entry(i64),
    Code(String),
}

const ENTRY_COLUMNS: &str = "e.id, e.token_id, e.visitor_name, e.visitor_phone, e.issuer_id,
    e.guard_id, e.entered_at, e.exited_at, e.exit_guard_id, e.entry_note, e.exit_note";

impl VisitorTokenManager {
    /// Admit the visitor holding `code`. Only legal while the token is unused
    /// and unexpired.
    pub async fn grant_entry(
        &self,
        code: &str,
        guard_id: &str,
        note: Option<String>,
    ) -> EstateResult<VisitorEntry> {
        let code = normalize_code(code);
        let note = clean_optional(note);
        let now = Utc::now();

        let mut tx = self.db.begin().await?;

        // The claim must be the first statement; a read first would pin a
        // snapshot that cannot be upgraded once another grant commits
        let claimed: Option<VisitorTokenRow> = sqlx::query_as(&format!(
            "UPDATE visitor_tokens SET used = 1
             WHERE code = ?1 AND used = 0 AND expires_at > ?2
             RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(&code)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let token = match claimed {
            Some(token) => token,
            None => {
                tx.rollback().await?;
                return Err(self.grant_refusal(&code, now).await?);
            }
        };

        sqlx::query(
            r#"
            INSERT INTO visitor_entries
                (token_id, visitor_name, visitor_phone, issuer_id, guard_id, entered_at, entry_note)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(token.id)
        .bind(&token.visitor_name)
        .bind(&token.visitor_phone)
        .bind(&token.issuer_id)
        .bind(guard_id)
        .bind(now)
        .bind(&note)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                EstateError::Conflict("Token has already been used".to_string())
            }
            other => EstateError::Database(other),
        })?;

        tx.commit().await?;

        tracing::info!(token_code = %code, guard_id, "Granted visitor entry");
        metrics::ENTRIES_GRANTED_TOTAL.inc();

        let entry = self
            .entry_for_token(token.id)
            .await?
            .ok_or_else(|| EstateError::Internal("Recorded entry not found".to_string()))?;

        self.notify_issuer(
            &token.issuer_id,
            VisitEvent::Arrived {
                visitor_name: entry.visitor_name.clone(),
                entered_at: entry.entered_at,
            },
        )
        .await;

        Ok(entry)
    }

    /// Explain why a claim matched no token
    async fn grant_refusal(&self, code: &str, now: DateTime<Utc>) -> EstateResult<EstateError> {
        let error = match self.find_token(code).await? {
            None => EstateError::NotFound("Invalid token code".to_string()),
            Some(token) if token.used => {
                EstateError::Conflict("Token has already been used".to_string())
            }
            Some(token) if now >= token.expires_at => {
                EstateError::Expired("Token has expired".to_string())
            }
            Some(_) => EstateError::Conflict("Token has already been used".to_string()),
        };

        Ok(error)
    }

    /// Close an open visit. Only legal once entry was granted and before any
    /// exit was recorded.
    pub async fn record_exit(
        &self,
        target: ExitTarget,
        guard_id: &str,
        note: Option<String>,
    ) -> EstateResult<ExitOutcome> {
        let note = clean_optional(note);
        let entry = self.open_entry(&target).await?;

        if entry.exited_at.is_some() {
            return Err(EstateError::Conflict("Visitor has already exited".to_string()));
        }

        // exited_at must be strictly after entered_at
        let now = Utc::now();
        let exited_at = if now > entry.entered_at {
            now
        } else {
            entry.entered_at + Duration::seconds(1)
        };

        // Single statement; a concurrent exit waits for the write lock and
        // then matches no row
        let closed = sqlx::query(
            "UPDATE visitor_entries SET exited_at = ?1, exit_guard_id = ?2, exit_note = ?3
             WHERE id = ?4 AND exited_at IS NULL",
        )
        .bind(exited_at)
        .bind(guard_id)
        .bind(&note)
        .bind(entry.id)
        .execute(&self.db)
        .await?;

        if closed.rows_affected() == 0 {
            return Err(EstateError::Conflict("Visitor has already exited".to_string()));
        }

        let duration_minutes = (exited_at - entry.entered_at).num_minutes();
        tracing::info!(entry_id = entry.id, guard_id, duration_minutes, "Recorded visitor exit");
        metrics::EXITS_RECORDED_TOTAL.inc();

        let closed_entry = self
            .entry_for_token(entry.token_id)
            .await?
            .ok_or_else(|| EstateError::Internal("Recorded entry not found".to_string()))?;

        self.notify_issuer(
            &entry.issuer_id,
            VisitEvent::Departed {
                visitor_name: entry.visitor_name.clone(),
                exited_at,
                duration_minutes,
            },
        )
        .await;

        Ok(ExitOutcome {
            entry: closed_entry,
            duration_minutes,
        })
    }

    /// Resolve an exit target to its visit row
    async fn open_entry(&self, target: &ExitTarget) -> EstateResult<VisitorEntryRow> {
        let entry: Option<VisitorEntryRow> = match target {
            ExitTarget::Entry(id) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM visitor_entries e WHERE e.id = ?1",
                    ENTRY_COLUMNS
                ))
                .bind(id)
                .fetch_optional(&self.db)
                .await?
            }
            ExitTarget::Code(code) => {
                let code = normalize_code(code);
                let token_id: Option<i64> =
                    sqlx::query_scalar("SELECT id FROM visitor_tokens WHERE code = ?1")
                        .bind(&code)
                        .fetch_optional(&self.db)
                        .await?;
                let token_id = token_id
                    .ok_or_else(|| EstateError::NotFound("Invalid token code".to_string()))?;

                sqlx::query_as(&format!(
                    "SELECT {} FROM visitor_entries e WHERE e.token_id = ?1",
                    ENTRY_COLUMNS
                ))
                .bind(token_id)
                .fetch_optional(&self.db)
                .await?
            }
        };

        match (entry, target) {
            (Some(entry), _) => Ok(entry),
            (None, ExitTarget::Code(_)) => Err(EstateError::Validation(
                "Visitor has not been granted entry".to_string(),
            )),
            (None, ExitTarget::Entry(_)) => {
                Err(EstateError::NotFound("Visitor entry not found".to_string()))
            }
        }
    }

    /// Visitors currently on premises, earliest arrival first
    pub async fn active_entries(&self) -> EstateResult<Vec<VisitorEntry>> {
        let rows: Vec<EntryListingRow> = sqlx::query_as(&format!(
            "{} WHERE e.exited_at IS NULL ORDER BY e.entered_at ASC",
            ENTRY_SELECT
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(VisitorEntry::from).collect())
    }

    /// Visit history, newest first
    pub async fn all_entries(&self, limit: i64, offset: i64) -> EstateResult<Vec<VisitorEntry>> {
        let rows: Vec<EntryListingRow> = sqlx::query_as(&format!(
            "{} ORDER BY e.entered_at DESC, e.id DESC LIMIT ?1 OFFSET ?2",
            ENTRY_SELECT
        ))
        .bind(limit.clamp(1, 500))
        .bind(offset.max(0))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(VisitorEntry::from).collect())
    }

    /// Deliver a visit event; failures are logged and swallowed
    async fn notify_issuer(&self, issuer_id: &str, event: VisitEvent) {
        let issuer = match self.issuer_info(issuer_id).await {
            Ok(Some(issuer)) => issuer,
            Ok(None) => {
                tracing::warn!(issuer_id, "Token issuer no longer exists, skipping notification");
                return;
            }
            Err(e) => {
                tracing::warn!(issuer_id, "Failed to load issuer for notification: {}", e);
                return;
            }
        };

        if let Err(e) = self.notifier.notify(&issuer, event).await {
            tracing::warn!(issuer_id, "Failed to deliver visit notification: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{backdate_token, fixture, fixture_on, fixture_with, short_visit};
    use super::*;
    use crate::account::Role;
    use crate::db::file_pool;
    use std::collections::HashMap;

    /// Issue `count` tokens on a file-backed pool with real parallel connections
    async fn file_fixture_with_tokens(
        dir: &std::path::Path,
        count: usize,
    ) -> (super::super::tests::Fixture, Vec<String>) {
        let f = fixture_on(file_pool(dir).await, false).await;
        let mut codes = Vec::with_capacity(count);
        for i in 0..count {
            let token = f
                .manager
                .generate_token(&f.resident, Role::Resident, short_visit(&format!("Guest {}", i), 2))
                .await
                .unwrap();
            codes.push(token.code);
        }
        (f, codes)
    }

    #[tokio::test]
    async fn test_grant_then_exit() {
        let f = fixture().await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Chidi", 2))
            .await
            .unwrap();

        let entry = f
            .manager
            .grant_entry(&token.code, &f.guard, Some("Blue car".to_string()))
            .await
            .unwrap();
        assert_eq!(entry.token_code, token.code);
        assert_eq!(entry.guard_id, f.guard);
        assert_eq!(entry.entry_note.as_deref(), Some("Blue car"));
        assert!(entry.exited_at.is_none());

        let used: bool = sqlx::query_scalar("SELECT used FROM visitor_tokens WHERE id = ?1")
            .bind(token.id)
            .fetch_one(&f.db)
            .await
            .unwrap();
        assert!(used);

        let outcome = f
            .manager
            .record_exit(ExitTarget::Entry(entry.id), &f.guard, Some("Left on foot".to_string()))
            .await
            .unwrap();
        let exited_at = outcome.entry.exited_at.unwrap();
        assert!(exited_at > outcome.entry.entered_at);
        assert_eq!(outcome.entry.exit_note.as_deref(), Some("Left on foot"));
        assert_eq!(outcome.entry.exit_guard_id.as_deref(), Some(f.guard.as_str()));
    }

    #[tokio::test]
    async fn test_example_visit_timeline() {
        // Short token for 2 hours, granted one hour in, exit thirty minutes later
        let f = fixture().await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Timeline", 2))
            .await
            .unwrap();
        assert_eq!(token.expires_at - token.created_at, Duration::hours(2));

        backdate_token(&f.db, &token.code, Duration::hours(1)).await;
        let entry = f.manager.grant_entry(&token.code, &f.guard, None).await.unwrap();

        sqlx::query("UPDATE visitor_entries SET entered_at = ?1 WHERE id = ?2")
            .bind(entry.entered_at - Duration::minutes(30))
            .bind(entry.id)
            .execute(&f.db)
            .await
            .unwrap();

        let outcome = f
            .manager
            .record_exit(ExitTarget::Code(token.code.clone()), &f.guard, None)
            .await
            .unwrap();
        assert!((30..=31).contains(&outcome.duration_minutes));
        assert_eq!(outcome.entry.duration_minutes, Some(outcome.duration_minutes));

        let again = f.manager.grant_entry(&token.code, &f.guard, None).await;
        match again {
            Err(EstateError::Conflict(message)) => assert!(message.contains("already been used")),
            other => panic!("expected conflict, got {:?}", other.map(|e| e.id)),
        }
    }

    #[tokio::test]
    async fn test_grant_twice_fails() {
        let f = fixture().await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Twice", 1))
            .await
            .unwrap();

        f.manager.grant_entry(&token.code, &f.guard, None).await.unwrap();
        assert!(matches!(
            f.manager.grant_entry(&token.code, &f.guard, None).await,
            Err(EstateError::Conflict(_))
        ));

        let (_, on_premises) = f.manager.stats().await.unwrap();
        assert_eq!(on_premises, 1);
    }

    #[tokio::test]
    async fn test_concurrent_grants_admit_once() {
        let f = fixture().await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Racer", 1))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            f.manager.grant_entry(&token.code, &f.guard, None),
            f.manager.grant_entry(&token.code, &f.guard, None)
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_grants_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let (f, codes) = file_fixture_with_tokens(dir.path(), 10).await;

        let mut handles = Vec::new();
        for code in &codes {
            for _ in 0..4 {
                let manager = f.manager.clone();
                let guard = f.guard.clone();
                let code = code.clone();
                handles.push(tokio::spawn(async move {
                    let result = manager.grant_entry(&code, &guard, None).await;
                    (code, result)
                }));
            }
        }

        let mut admitted: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            let (code, result) = handle.await.unwrap();
            match result {
                Ok(_) => *admitted.entry(code).or_default() += 1,
                Err(EstateError::Conflict(_)) => {}
                Err(other) => panic!("losing grant must be a conflict, got {:?}", other),
            }
        }

        for code in &codes {
            assert_eq!(admitted.get(code), Some(&1), "code {} admitted once", code);
        }
        let (_, on_premises) = f.manager.stats().await.unwrap();
        assert_eq!(on_premises, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_exits_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let (f, codes) = file_fixture_with_tokens(dir.path(), 10).await;
        for code in &codes {
            f.manager.grant_entry(code, &f.guard, None).await.unwrap();
        }

        let mut handles = Vec::new();
        for code in &codes {
            for _ in 0..4 {
                let manager = f.manager.clone();
                let guard = f.guard.clone();
                let code = code.clone();
                handles.push(tokio::spawn(async move {
                    let result = manager
                        .record_exit(ExitTarget::Code(code.clone()), &guard, None)
                        .await;
                    (code, result)
                }));
            }
        }

        let mut closed: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            let (code, result) = handle.await.unwrap();
            match result {
                Ok(outcome) => {
                    assert!(outcome.entry.exited_at.is_some());
                    *closed.entry(code).or_default() += 1;
                }
                Err(EstateError::Conflict(_)) => {}
                Err(other) => panic!("losing exit must be a conflict, got {:?}", other),
            }
        }

        for code in &codes {
            assert_eq!(closed.get(code), Some(&1), "code {} closed once", code);
        }
        let (_, on_premises) = f.manager.stats().await.unwrap();
        assert_eq!(on_premises, 0);
    }

    #[tokio::test]
    async fn test_grant_expired_token_fails() {
        let f = fixture().await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Late", 1))
            .await
            .unwrap();
        backdate_token(&f.db, &token.code, Duration::hours(2)).await;

        assert!(matches!(
            f.manager.grant_entry(&token.code, &f.guard, None).await,
            Err(EstateError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_exit_before_grant_fails() {
        let f = fixture().await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Early", 1))
            .await
            .unwrap();

        assert!(matches!(
            f.manager
                .record_exit(ExitTarget::Code(token.code.clone()), &f.guard, None)
                .await,
            Err(EstateError::Validation(_))
        ));
        assert!(matches!(
            f.manager.record_exit(ExitTarget::Entry(9999), &f.guard, None).await,
            Err(EstateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_exit_twice_fails() {
        let f = fixture().await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Double", 1))
            .await
            .unwrap();
        let entry = f.manager.grant_entry(&token.code, &f.guard, None).await.unwrap();

        f.manager
            .record_exit(ExitTarget::Entry(entry.id), &f.guard, None)
            .await
            .unwrap();
        assert!(matches!(
            f.manager.record_exit(ExitTarget::Entry(entry.id), &f.guard, None).await,
            Err(EstateError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_exit_is_strictly_after_entry_even_with_clock_skew() {
        let f = fixture().await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Skew", 1))
            .await
            .unwrap();
        let entry = f.manager.grant_entry(&token.code, &f.guard, None).await.unwrap();

        // Entry recorded "in the future" relative to the exit clock
        sqlx::query("UPDATE visitor_entries SET entered_at = ?1 WHERE id = ?2")
            .bind(Utc::now() + Duration::minutes(5))
            .bind(entry.id)
            .execute(&f.db)
            .await
            .unwrap();

        let outcome = f
            .manager
            .record_exit(ExitTarget::Entry(entry.id), &f.guard, None)
            .await
            .unwrap();
        assert!(outcome.entry.exited_at.unwrap() > outcome.entry.entered_at);
    }

    #[tokio::test]
    async fn test_notifications_are_best_effort() {
        let f = fixture_with(true).await;
        let token = f
            .manager
            .generate_token(&f.resident, Role::Resident, short_visit("Quiet", 1))
            .await
            .unwrap();

        let entry = f.manager.grant_entry(&token.code, &f.guard, None).await.unwrap();
        f.manager
            .record_exit(ExitTarget::Entry(entry.id), &f.guard, None)
            .await
            .unwrap();

        let events = f.notifier.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], VisitEvent::Arrived { .. }));
        assert!(matches!(events[1], VisitEvent::Departed { .. }));
    }

    #[tokio::test]
    async fn test_entry_listings() {
        let f = fixture().await;
        let mut entries = Vec::new();
        for name in ["One", "Two", "Three"] {
            let token = f
                .manager
                .generate_token(&f.resident, Role::Resident, short_visit(name, 1))
                .await
                .unwrap();
            entries.push(f.manager.grant_entry(&token.code, &f.guard, None).await.unwrap());
        }
        f.manager
            .record_exit(ExitTarget::Entry(entries[1].id), &f.guard, None)
            .await
            .unwrap();

        let active = f.manager.active_entries().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|e| e.exited_at.is_none()));
        assert_eq!(active[0].issuer_name.as_deref(), Some("resident user"));

        let all = f.manager.all_entries(10, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        let page = f.manager.all_entries(2, 2).await.unwrap();
        assert_eq!(page.len(), 1);
    }
}
