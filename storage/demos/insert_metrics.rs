use chrono::Duration;
use rig_telemetry_store::{
    Deadline, DeviceId, NewMetricPoint, NewStatusSnapshot, StatusPayload, StorageConfig,
    StorageEngine, Timestamp,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    rig_telemetry_store::init_tracing();

    println!("=== Telemetry Insertion Example ===\n");

    let path = std::env::var("RIG_TELEMETRY_DB").unwrap_or_else(|_| "rig-telemetry-demo.db".to_string());
    let config = StorageConfig::with_path(&path);
    println!("Database: {}", config.database.path.display());

    let storage = StorageEngine::open(config).await?;
    println!("Opened store ({})\n", storage.pool_status());

    let deadline = || Deadline::after(std::time::Duration::from_secs(5));

    // Example 1: Register devices
    println!("1. Registering devices...");
    for (id, name) in [(1, "rig-01"), (2, "rig-02"), (3, "rig-03")] {
        storage.register_device(DeviceId(id), Some(name), deadline()).await?;
    }
    println!("   ✓ Registered 3 devices\n");

    // Example 2: Insert single point
    println!("2. Inserting single point...");
    let point = NewMetricPoint::at(DeviceId(1), Timestamp::now(), "hashrate", 98.4).with_unit("TH/s");
    let id = storage.write_point(point, deadline()).await?;
    println!("   ✓ Inserted hashrate point with id {}\n", id.0);

    // Example 3: Batch insert an hour of samples
    println!("3. Batch inserting 60 temperature samples...");
    let now = Timestamp::now();
    let mut batch = Vec::new();
    for minute in 0..60 {
        let at = now.checked_sub(Duration::minutes(minute))?;
        let value = 62.0 + (minute % 7) as f64;
        batch.push(NewMetricPoint::at(DeviceId(1), at, "temperature", value).with_unit("C"));
    }
    let ids = storage.write_points_batch(batch, deadline()).await?;
    println!("   ✓ Inserted {} points atomically\n", ids.len());

    // Example 4: Buffered ingestion from several pollers
    println!("4. Buffering points for devices 2 and 3...");
    for device in [2, 3] {
        for (metric, value) in [("hashrate", 101.2), ("power", 3250.0), ("fan_rpm", 4800.0)] {
            storage
                .buffer_point(NewMetricPoint::at(DeviceId(device), Timestamp::now(), metric, value))
                .await?;
        }
    }
    let flushed = storage.flush_buffer(deadline()).await?;
    println!("   ✓ Flushed {} buffered points\n", flushed);

    // Example 5: Status snapshot
    println!("5. Writing status snapshot...");
    let payload = StatusPayload::from_value(json!({
        "firmware": "2024.05.1",
        "pool": "stratum+tcp://pool.example:3333",
        "boards": [{ "chain": 0, "chips": 126 }, { "chain": 1, "chips": 126 }],
        "overheated": false
    }))?;
    let snapshot = NewStatusSnapshot::new(DeviceId(1), now.to_canonical(), payload);
    let snapshot_id = storage.write_snapshot(snapshot, deadline()).await?;
    println!("   ✓ Inserted snapshot with id {}\n", snapshot_id.0);

    // Example 6: Rejected input
    println!("6. Writing a point for an unregistered device...");
    let orphan = NewMetricPoint::at(DeviceId(99), Timestamp::now(), "hashrate", 1.0);
    match storage.write_point(orphan, deadline()).await {
        Ok(_) => println!("   ✗ Unexpectedly accepted\n"),
        Err(e) => println!("   ✓ Rejected: {}\n", e),
    }

    let stats = storage.storage_stats().await?;
    println!(
        "Store holds {} points and {} snapshots ({:.2} MB)",
        stats.points_count,
        stats.snapshots_count,
        stats.total_size_mb()
    );

    storage.close().await;

    println!("\n=== Example Complete ===");

    Ok(())
}
