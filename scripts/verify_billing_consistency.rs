#!/usr/bin/env rust-script
//! Billing Consistency Verification Script
//!
//! Detects subscription-state drift for the Slotwise billing core.
//!
//! ## Usage
//! ```bash
//! cargo run --bin verify_billing_consistency > drift_report.txt
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string
//!
//! ## Output
//! Per-check report of tenants whose stored state is internally inconsistent.

use std::env;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Slotwise Billing Consistency Verification");
    println!("==========================================\n");

    // Load environment variables
    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    // Initialize database connection
    let pool = sqlx::postgres::PgPool::connect(&database_url).await?;

    println!("✓ Connected to database\n");

    // ========================================================================
    // Check 1: Tenant suspension flag matches subscription status
    // ========================================================================
    println!("Check 1: Verifying suspension flags match subscription status...");

    let mismatched: Vec<(uuid::Uuid, String, bool)> = sqlx::query_as(
        r#"
        SELECT t.id, s.status, t.suspended
        FROM tenants t
        JOIN subscriptions s ON s.tenant_id = t.id
        WHERE t.suspended != (s.status IN ('suspended', 'cancelled'))
        "#
    )
    .fetch_all(&pool)
    .await?;

    if mismatched.is_empty() {
        println!("  ✓ All suspension flags agree with subscription status");
    } else {
        println!("  ⚠ Found {} tenants with mismatched suspension flags", mismatched.len());
        for (tenant_id, status, suspended) in &mismatched {
            println!("    - {}: status={}, suspended={}", tenant_id, status, suspended);
        }
    }

    // ========================================================================
    // Check 2: Period and trial boundaries are ordered
    // ========================================================================
    println!("\nCheck 2: Verifying period and trial boundaries...");

    let bad_periods: Vec<(uuid::Uuid,)> = sqlx::query_as(
        r#"
        SELECT tenant_id
        FROM subscriptions
        WHERE current_period_end <= current_period_start
           OR (trial_start IS NOT NULL AND trial_end IS NOT NULL AND trial_end <= trial_start)
        "#
    )
    .fetch_all(&pool)
    .await?;

    if bad_periods.is_empty() {
        println!("  ✓ All period and trial boundaries are ordered");
    } else {
        println!("  ⚠ Found {} subscriptions with inverted boundaries", bad_periods.len());
        for (tenant_id,) in &bad_periods {
            println!("    - {}", tenant_id);
        }
    }

    // ========================================================================
    // Check 3: PAST_DUE records carry a grace clock
    // ========================================================================
    println!("\nCheck 3: Verifying PAST_DUE records have a grace clock...");

    let missing_grace: Vec<(uuid::Uuid,)> = sqlx::query_as(
        r#"
        SELECT tenant_id
        FROM subscriptions
        WHERE status = 'past_due' AND grace_started_at IS NULL
        "#
    )
    .fetch_all(&pool)
    .await?;

    if missing_grace.is_empty() {
        println!("  ✓ Every PAST_DUE record has a grace clock");
    } else {
        println!("  ⚠ Found {} PAST_DUE records without a grace clock", missing_grace.len());
        for (tenant_id,) in &missing_grace {
            println!("    - {}", tenant_id);
        }
    }

    // ========================================================================
    // Check 4: Webhook events stuck in processing
    // ========================================================================
    println!("\nCheck 4: Verifying no webhook events stuck in processing...");

    let stuck: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT provider_event_id, event_type
        FROM provider_webhook_events
        WHERE processing_result = 'processing'
          AND processing_started_at < NOW() - INTERVAL '30 minutes'
        "#
    )
    .fetch_all(&pool)
    .await?;

    if stuck.is_empty() {
        println!("  ✓ No webhook events stuck in processing");
    } else {
        println!("  ⚠ Found {} webhook events stuck in processing", stuck.len());
        for (event_id, event_type) in &stuck {
            println!("    - {} ({})", event_id, event_type);
        }
    }

    println!("\nDone.");
    Ok(())
}
