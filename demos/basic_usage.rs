//! Basic usage example
//!
//! This example demonstrates:
//! - Lazy connection on first use
//! - Structured INSERT, SELECT, COUNT, UPDATE and DELETE
//! - Raw queries with named parameters and list expansion
//!
//! Run with: cargo run --example basic_usage

use dbapi::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== dbapi - Basic Usage Example ===\n");

    let db = DbApi::new(
        ConnectionDescriptor::sqlite_memory(),
        Box::new(SqliteDatabase::new()),
    );

    println!("1. Creating table...");
    db.query(
        "CREATE TABLE Users (
            Id INTEGER PRIMARY KEY AUTOINCREMENT,
            Name TEXT NOT NULL,
            Email TEXT,
            Age INTEGER,
            Active INTEGER DEFAULT 1
        )",
        Params::new(),
    )
    .await?;
    println!("   ✓ Table created ({:?})\n", db.state());

    println!("2. Inserting data...");
    let users = [
        ("alice", Some("alice@example.com"), 30, true),
        ("bob", None, 25, false),
        ("charlie", Some("charlie@example.com"), 35, true),
    ];
    for (name, email, age, active) in users {
        db.insert(
            "Users",
            &Values::new()
                .set("Name", name)
                .set("Email", email)
                .set("Age", age)
                .set("Active", Param::typed(active, ParamType::Bool)),
        )
        .await?;
        let id = db.last_insert_id(None).await?.unwrap_or_default();
        println!("   ✓ Inserted {} with id {}", name, id);
    }

    let added = db
        .insert_multi(
            "Users",
            &[
                Values::new().set("Name", "diana").set("Age", 28),
                Values::new().set("Name", "eve").set("Age", 19),
            ],
        )
        .await?;
    println!("   ✓ Multi-row insert: {}\n", added);

    println!("3. Selecting active adults...");
    let adults = Where::new()
        .eq("Active", 1)
        .compare("Age", Operator::Ge, 21);
    let rows = db.select("Users", &["Id", "Name", "Email"], &adults).await?;
    for row in &rows {
        let name = row
            .get("Name")
            .ok_or_else(|| DatabaseError::ColumnNotFound("Name".to_string()))?;
        let email = row.get("Email").map(DatabaseValue::as_string).unwrap_or_default();
        println!("   - {} <{}>", name.as_string(), email);
    }
    println!();

    println!("4. Counting...");
    let total = db.count("Users", &Where::new()).await?;
    let without_email = db.count("Users", &Where::new().is_null("Email")).await?;
    println!("   Total: {}, without email: {}\n", total, without_email);

    println!("5. Updating and deleting...");
    let updated = db
        .update(
            "Users",
            &Values::new().set("Active", 0),
            &Where::new().compare("Age", Operator::Lt, 21),
        )
        .await?;
    println!("   ✓ Deactivated {} user(s)", updated);

    let deleted = db
        .delete("Users", &Where::new().is_in("Name", ["bob", "eve"]))
        .await?;
    println!("   ✓ Deleted {} user(s)\n", deleted);

    println!("6. Raw query with a list parameter...");
    let rows = db
        .query(
            "SELECT Name, Age FROM Users WHERE Age IN :ages ORDER BY Age",
            Params::new().bind("ages", Param::list_typed([28, 30, 35], ParamType::Int)),
        )
        .await?
        .into_rows();
    for row in &rows {
        println!(
            "   {}",
            serde_json::to_string(row).map_err(|e| DatabaseError::other(e.to_string()))?
        );
    }

    println!("\n   Statements executed: {}", db.query_count());
    db.close().await?;

    println!("\n=== Example completed successfully ===");
    Ok(())
}
