use chrono::Duration;
use futures_util::TryStreamExt;
use rig_telemetry_store::{
    BucketGranularity, Deadline, DeviceId, MetricType, StorageConfig, StorageEngine, Timestamp,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    rig_telemetry_store::init_tracing();

    println!("=== Telemetry Query Example ===\n");

    let path = std::env::var("RIG_TELEMETRY_DB").unwrap_or_else(|_| "rig-telemetry-demo.db".to_string());
    let storage = StorageEngine::open(StorageConfig::with_path(&path)).await?;
    println!("Opened {}\n", path);

    let device = DeviceId(1);
    let deadline = || Deadline::after(std::time::Duration::from_secs(5));
    let end = Timestamp::now();
    let start = end.checked_sub(Duration::hours(1))?;

    // Example 1: Latest points across all metric types
    println!("1. Latest 5 points for device {}...", device);
    for point in storage.latest_points(device, 5, deadline()).await? {
        println!("   {} {} = {}", point.timestamp, point.metric_type, point.value);
    }
    println!();

    // Example 2: Stream a range through a lazy cursor
    println!("2. Temperature over the last hour...");
    let temperature = MetricType::new("temperature")?;
    let cursor = storage.range_points(device, Some(&temperature), start, end, deadline())?;
    let points: Vec<_> = cursor.into_stream().try_collect().await?;
    println!("   Found {} points", points.len());
    if let Some(last) = points.last() {
        println!("   Newest: {} at {}", last.value, last.timestamp);
    }
    println!();

    // Example 3: Aggregate into 15 minute buckets
    println!("3. Temperature in 15-minute buckets...");
    let buckets = storage
        .aggregate(
            device,
            &temperature,
            start,
            end,
            BucketGranularity::Custom(std::time::Duration::from_secs(15 * 60)),
            deadline(),
        )
        .await?;
    for bucket in &buckets {
        println!(
            "   {} avg={:.2} min={:.2} max={:.2} n={}",
            bucket.bucket_start, bucket.avg, bucket.min, bucket.max, bucket.count
        );
    }
    println!();

    // Example 4: Current values per metric type
    println!("4. Current values...");
    for point in storage.latest_values(device, deadline()).await? {
        let unit = point.unit.as_deref().unwrap_or("");
        println!("   {} = {} {}", point.metric_type, point.value, unit);
    }
    println!();

    // Example 5: Latest status snapshot
    println!("5. Latest status snapshot...");
    match storage.latest_snapshot(device, deadline()).await {
        Ok(snapshot) => println!(
            "   {} firmware={}",
            snapshot.timestamp,
            snapshot.payload.get("firmware").cloned().unwrap_or_default()
        ),
        Err(e) => println!("   none: {}", e),
    }
    println!();

    // Example 6: Storage statistics
    println!("6. Storage statistics...");
    let stats = storage.storage_stats().await?;
    println!("   Devices: {}", stats.devices_count);
    println!("   Points: {}", stats.points_count);
    println!("   Snapshots: {}", stats.snapshots_count);
    println!("   Size: {:.2} MB", stats.total_size_mb());

    storage.close().await;

    println!("\n=== Example Complete ===");

    Ok(())
}
