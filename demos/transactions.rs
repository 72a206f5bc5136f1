//! Transaction example
//!
//! This example demonstrates:
//! - Beginning, committing and rolling back transactions
//! - Rolling back when a statement inside the transaction fails
//! - Begin/commit/rollback reporting whether there was anything to do
//!
//! Run with: cargo run --example transactions

use dbapi::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== dbapi - Transaction Example ===\n");

    let db = DbApi::new(
        ConnectionDescriptor::sqlite_memory(),
        Box::new(SqliteDatabase::new()),
    );

    println!("1. Setting up accounts table...");
    db.query(
        "CREATE TABLE Accounts (
            Id INTEGER PRIMARY KEY,
            Name TEXT NOT NULL,
            Balance INTEGER NOT NULL CHECK(Balance >= 0)
        )",
        Params::new(),
    )
    .await?;

    db.insert_multi(
        "Accounts",
        &[
            Values::new().set("Id", 1).set("Name", "Alice").set("Balance", 1000),
            Values::new().set("Id", 2).set("Name", "Bob").set("Balance", 500),
            Values::new().set("Id", 3).set("Name", "Charlie").set("Balance", 750),
        ],
    )
    .await?;
    println!("   ✓ Accounts created\n");
    print_balances(&db).await?;

    println!("\n2. Successful transfer (Alice -> Bob: 100)");
    run_transfer(&db, 1, 2, 100).await?;
    print_balances(&db).await?;

    println!("\n3. Failed transfer (Bob -> Alice: 1000, insufficient funds)");
    run_transfer(&db, 2, 1, 1000).await?;
    print_balances(&db).await?;

    println!("\n4. Explicit rollback");
    db.begin_transaction().await?;
    db.delete("Accounts", &Where::new().eq("Name", "Charlie")).await?;
    println!(
        "   Accounts inside the transaction: {}",
        db.count("Accounts", &Where::new()).await?
    );
    db.rollback().await?;
    println!(
        "   Accounts after rollback: {}",
        db.count("Accounts", &Where::new()).await?
    );

    println!("\n5. Nothing to commit");
    println!("   commit() without a transaction: {}", db.commit().await?);

    println!("\n=== Example completed successfully ===");
    Ok(())
}

async fn run_transfer(db: &DbApi, from: i64, to: i64, amount: i64) -> Result<()> {
    db.begin_transaction().await?;
    println!("   ✓ Transaction started");

    match transfer(db, from, to, amount).await {
        Ok(()) => {
            db.commit().await?;
            println!("   ✓ Transaction committed");
        }
        Err(e) => {
            db.rollback().await?;
            println!("   ✗ Transaction rolled back: {}", e);
        }
    }
    Ok(())
}

async fn transfer(db: &DbApi, from: i64, to: i64, amount: i64) -> Result<()> {
    let sql = "UPDATE Accounts SET Balance = Balance + :delta WHERE Id = :id";

    db.query(
        sql,
        Params::new()
            .bind("delta", Param::typed(-amount, ParamType::Int))
            .bind("id", from),
    )
    .await?;
    db.query(
        sql,
        Params::new()
            .bind("delta", Param::typed(amount, ParamType::Int))
            .bind("id", to),
    )
    .await?;
    Ok(())
}

async fn print_balances(db: &DbApi) -> Result<()> {
    let rows = db
        .query("SELECT Name, Balance FROM Accounts ORDER BY Id", Params::new())
        .await?
        .into_rows();

    println!("   Current balances:");
    for row in &rows {
        let name = row.get("Name").map(DatabaseValue::as_string).unwrap_or_default();
        let balance = row.get("Balance").and_then(DatabaseValue::as_long).unwrap_or(0);
        println!("   - {:<8} {:>6}", name, balance);
    }
    Ok(())
}
