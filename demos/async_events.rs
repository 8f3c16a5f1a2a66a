//! Awaiting command events from a tokio runtime.

use cldispatch::prelude::*;
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Async Events Example ===\n");

    let config = Config::default();
    let device = Enumerator::with_config(&config)?.first_device(DeviceTypeFilter::ALL)?;
    let context = Context::new(&[device], &config)?;
    let queue = context.create_queue(&context.devices()[0], QueueOrdering::OutOfOrder)?;

    let gate = context.create_user_event()?;
    let buffer = context.create_buffer(AccessMode::ReadWrite, 1024 * 4)?;
    let fill = queue.enqueue_fill_buffer(&buffer, 42u32, 0, 1024 * 4, &[gate.event()])?;
    let read = queue.enqueue_read_buffer::<u32>(&buffer, 0, 1024, &[fill.clone()])?;

    let opener = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        println!("  opening gate");
        gate.complete()
    });

    println!("  waiting for fill...");
    fill.wait_async().await?;
    println!("  fill done: {:?}", fill.status());

    read.event().wait_async().await?;
    let data = read.wait()?;
    println!("  read {} words, all 42: {}", data.len(), data.iter().all(|&x| x == 42));

    opener.await.map_err(|e| Error::config(e.to_string()))??;
    println!("\n=== Example Complete ===");
    Ok(())
}
