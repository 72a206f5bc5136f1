//! Reconnect state machine against a scripted driver

use async_trait::async_trait;
use dbapi::core::database::Database;
use dbapi::prelude::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Step {
    Lost,
    GoneAway,
    Deadlock,
    Syntax,
}

impl Step {
    fn error(self) -> DatabaseError {
        match self {
            Step::Lost => DatabaseError::connection_lost("socket closed"),
            Step::GoneAway => DatabaseError::query("MySQL server has gone away"),
            Step::Deadlock => DatabaseError::query("Deadlock found when trying to get lock"),
            Step::Syntax => DatabaseError::query("You have an error in your SQL syntax"),
        }
    }
}

#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<Step>>,
    statements: AtomicUsize,
    connects: AtomicUsize,
    fail_connect: AtomicBool,
}

impl Script {
    fn push(&self, steps: &[Step]) {
        self.steps.lock().extend(steps.iter().copied());
    }

    fn next(&self) -> Result<()> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        match self.steps.lock().pop_front() {
            Some(step) => Err(step.error()),
            None => Ok(()),
        }
    }
}

struct ScriptedDriver {
    script: Arc<Script>,
    connected: AtomicBool,
    in_transaction: AtomicBool,
}

#[async_trait]
impl Database for ScriptedDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    async fn connect(&self, _connection_string: &str) -> Result<()> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(DatabaseError::connection("Access denied for user"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, _query: &str) -> Result<u64> {
        self.script.next().map(|_| 1)
    }

    async fn query(&self, _query: &str) -> Result<DatabaseResult> {
        self.script.next()?;
        let row: DatabaseRow = [("Count".to_string(), DatabaseValue::Long(7))]
            .into_iter()
            .collect();
        Ok(vec![row])
    }

    async fn query_with_params(
        &self,
        query: &str,
        _params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        self.query(query).await
    }

    async fn execute_with_params(&self, query: &str, _params: &[DatabaseValue]) -> Result<u64> {
        self.execute(query).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Option<String>> {
        Ok(Some("42".to_string()))
    }
}

fn scripted(policy: RetryPolicy) -> (DbApi, Arc<Script>) {
    let script = Arc::new(Script::default());
    let driver = ScriptedDriver {
        script: Arc::clone(&script),
        connected: AtomicBool::new(false),
        in_transaction: AtomicBool::new(false),
    };
    let descriptor = ConnectionDescriptor::new(DatabaseType::Mysql, "app")
        .host("127.0.0.1")
        .username("root");
    (
        DbApi::with_policy(descriptor, Box::new(driver), policy),
        script,
    )
}

fn by_id() -> Where {
    Where::new().eq("Id", 1)
}

#[tokio::test]
async fn test_connection_lost_is_retried() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::default());
    script.push(&[Step::Lost]);

    assert_eq!(db.delete("Users", &by_id()).await?, 1);
    assert_eq!(db.reconnect_count(), 1);
    assert_eq!(db.query_count(), 2);
    assert_eq!(script.connects.load(Ordering::SeqCst), 2);
    assert_eq!(db.state(), ConnectionState::Connected);
    Ok(())
}

#[tokio::test]
async fn test_error_text_signature_is_retried() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::default());
    script.push(&[Step::GoneAway, Step::GoneAway]);

    assert_eq!(db.count("Users", &Where::new()).await?, 7);
    assert_eq!(db.reconnect_count(), 2);
    assert_eq!(script.statements.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_budget_exhaustion() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::default());
    script.push(&[Step::Lost, Step::Lost, Step::Lost, Step::Lost]);

    let err = db.delete("Users", &by_id()).await.unwrap_err();
    assert!(matches!(err, DatabaseError::ConnectionLost(_)));
    assert_eq!(db.reconnect_count(), 3);
    assert_eq!(script.statements.load(Ordering::SeqCst), 4);
    assert_eq!(db.state(), ConnectionState::Exhausted);

    // A new operation starts with a fresh budget and a fresh connection
    assert_eq!(db.delete("Users", &by_id()).await?, 1);
    assert_eq!(db.state(), ConnectionState::Connected);
    assert_eq!(db.reconnect_count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_retry_counter_resets_per_operation() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::default().with_max_retries(1));

    script.push(&[Step::Lost]);
    db.insert("Users", &Values::new().set("Name", "A")).await?;

    script.push(&[Step::Lost]);
    db.update("Users", &Values::new().set("Name", "B"), &by_id())
        .await?;

    assert_eq!(db.reconnect_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_zero_budget_exhausts_immediately() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::default().with_max_retries(0));
    script.push(&[Step::Lost]);

    assert!(db.delete("Users", &by_id()).await.is_err());
    assert_eq!(db.reconnect_count(), 0);
    assert_eq!(db.state(), ConnectionState::Exhausted);
    Ok(())
}

#[tokio::test]
async fn test_other_errors_propagate_without_retry() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::default());
    script.push(&[Step::Syntax]);

    let err = db
        .query("SELEC 1", Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::QueryError(_)));
    assert_eq!(db.reconnect_count(), 0);
    assert_eq!(script.statements.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_no_retry_inside_transaction() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::default());

    assert!(db.begin_transaction().await?);
    script.push(&[Step::Lost]);

    assert!(db.delete("Users", &by_id()).await.is_err());
    assert_eq!(db.reconnect_count(), 0);
    assert!(db.in_transaction());
    assert!(db.rollback().await?);
    Ok(())
}

#[tokio::test]
async fn test_disabled_policy_never_reconnects() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::disabled());
    script.push(&[Step::Lost]);

    assert!(db.delete("Users", &by_id()).await.is_err());
    assert_eq!(db.reconnect_count(), 0);
    assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_custom_signatures() -> Result<()> {
    let policy = RetryPolicy {
        transient_signatures: vec!["deadlock found".to_string()],
        ..RetryPolicy::default()
    };
    let (db, script) = scripted(policy);
    script.push(&[Step::Deadlock, Step::GoneAway]);

    // The custom list replaces the defaults, so the second failure is final
    let err = db.delete("Users", &by_id()).await.unwrap_err();
    assert!(err.to_string().contains("gone away"));
    assert_eq!(db.reconnect_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_connect_failure_propagates() -> Result<()> {
    let (db, script) = scripted(RetryPolicy::default());
    script.fail_connect.store(true, Ordering::SeqCst);

    let err = db.count("Users", &Where::new()).await.unwrap_err();
    assert!(matches!(err, DatabaseError::ConnectionError(_)));
    assert_eq!(db.state(), ConnectionState::Disconnected);
    assert_eq!(db.query_count(), 0);

    script.fail_connect.store(false, Ordering::SeqCst);
    assert_eq!(db.count("Users", &Where::new()).await?, 7);
    assert_eq!(db.state(), ConnectionState::Connected);
    Ok(())
}

#[tokio::test]
async fn test_last_insert_id_delegates_when_connected() -> Result<()> {
    let (db, _script) = scripted(RetryPolicy::default());
    assert_eq!(db.last_insert_id(None).await?, None);

    db.insert("Users", &Values::new().set("Name", "A")).await?;
    assert_eq!(db.last_insert_id(None).await?, Some("42".to_string()));

    db.close().await?;
    assert_eq!(db.state(), ConnectionState::Disconnected);
    Ok(())
}
