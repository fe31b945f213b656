// Run with:
// `OPS_PER_CLIENT=200 cargo test --features benchmark test_random_read_write_storm`
#[cfg(feature = "benchmark")]
#[tokio::test]
async fn test_random_read_write_storm() {
    use std::{env, sync::Arc, time::Instant};

    use log::info;
    use rand::Rng;
    use small_dsm::MemoryRegistry;

    use crate::test_utils::{seed_pages, setup, start_client, start_primary_cm};

    setup();

    let ops_per_client = env::var("OPS_PER_CLIENT")
        .map(|v| v.parse::<usize>().unwrap())
        .unwrap_or(50);
    let client_count = 3;

    let registry = Arc::new(MemoryRegistry::new());
    let (_cm, _cm_serve) = start_primary_cm(&registry).await;

    let mut clients = Vec::new();
    let mut serves = Vec::new();
    for _ in 0..client_count {
        let (client, serve) = start_client(&registry).await;
        clients.push(client);
        serves.push(serve);
    }

    seed_pages(&clients[0], 10).await;

    let start = Instant::now();

    let mut workers = Vec::new();
    for client in &clients {
        let client = Arc::clone(client);
        workers.push(tokio::spawn(async move {
            for _ in 0..ops_per_client {
                let page_no = format!("P{}", rand::thread_rng().gen_range(1, 11));

                if rand::thread_rng().gen_range(0, 2) == 0 {
                    let content = format!("content by client {}", client.id);
                    let _ = client.write(&page_no, &content).await;
                } else {
                    let _ = client.read(&page_no).await;
                }
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    let duration = start.elapsed();
    let total_ops = client_count * ops_per_client;
    info!(
        "{} requests over {} clients took: {:?}",
        total_ops, client_count, duration
    );
    info!("ms:{:?}", duration.as_millis());
}
