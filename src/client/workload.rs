//! Random read/write workload driver for a client.

use crate::utils::DsmError;
use crate::client::DsmClient;

use rand::Rng;

use statistical::{mean, standard_deviation};

use tokio::time::{self, Duration, Instant};

/// Workload parameters struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    /// Pages touched are `P1` through `P<num_pages>`.
    pub num_pages: u64,

    /// Number of requests `run_random` issues.
    pub num_requests: u64,

    /// Percentage of write requests.
    pub write_ratio: u8,

    /// Gap between two consecutive requests in millisecs.
    pub interval_ms: u64,

    /// Idle time before the first request in millisecs.
    pub warmup_ms: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            num_pages: 10,
            num_requests: 10,
            write_ratio: 50,
            interval_ms: 1000,
            warmup_ms: 0,
        }
    }
}

impl WorkloadConfig {
    /// Parses workload parameters from a TOML string, defaults filled in.
    pub fn from_config_str(config_str: Option<&str>) -> Result<Self, DsmError> {
        let config = parsed_config!(config_str => WorkloadConfig;
                                    num_pages, num_requests, write_ratio,
                                    interval_ms, warmup_ms)?;
        if config.num_pages == 0 {
            return logged_err!("workload"; "invalid params.num_pages '{}'",
                                           config.num_pages);
        }
        if config.write_ratio > 100 {
            return logged_err!("workload"; "invalid params.write_ratio '{}'",
                                           config.write_ratio);
        }
        Ok(config)
    }
}

/// Summary of one `run_random` run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadStats {
    /// Requests issued.
    pub total: u64,

    /// Requests acknowledged.
    pub acked: u64,

    /// Wall time of the run, warmup excluded.
    pub elapsed: Duration,

    /// Mean request latency in millisecs.
    pub mean_ms: f64,

    /// Standard deviation of request latency in millisecs.
    pub stdev_ms: f64,
}

fn page_name(idx: u64) -> String {
    format!("P{}", idx)
}

fn client_content(client: &DsmClient) -> String {
    format!("Content by Client {}", client.id())
}

/// Writes pages `P1` through `P<num_pages>`, returning how many were acked.
pub async fn seed_pages(client: &DsmClient, num_pages: u64) -> u64 {
    let content = client_content(client);
    let mut acked = 0;
    for idx in 1..=num_pages {
        if client.send_write_request(&page_name(idx), &content).await {
            acked += 1;
        }
    }
    pf_info!(client.tag; "seeded {}/{} pages", acked, num_pages);
    acked
}

/// Issues random reads and writes over the configured pages.
pub async fn run_random(
    client: &DsmClient,
    config: &WorkloadConfig,
) -> WorkloadStats {
    if config.warmup_ms > 0 {
        time::sleep(Duration::from_millis(config.warmup_ms)).await;
    }

    let content = client_content(client);
    let mut latencies = Vec::with_capacity(config.num_requests as usize);
    let mut acked = 0;
    let start = Instant::now();

    for i in 0..config.num_requests {
        if i > 0 && config.interval_ms > 0 {
            time::sleep(Duration::from_millis(config.interval_ms)).await;
        }

        // decide op and page before awaiting; ThreadRng is not Send
        let (is_write, page_id) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0..100) < config.write_ratio,
                page_name(rng.gen_range(1..=config.num_pages)),
            )
        };

        let issued = Instant::now();
        let ok = if is_write {
            client.send_write_request(&page_id, &content).await
        } else {
            client.send_read_request(&page_id).await
        };
        latencies.push(issued.elapsed().as_secs_f64() * 1000.0);
        if ok {
            acked += 1;
        }
    }

    let elapsed = start.elapsed();
    let mean_ms = if latencies.is_empty() {
        0.0
    } else {
        mean(&latencies)
    };
    let stdev_ms = if latencies.len() < 2 {
        0.0
    } else {
        standard_deviation(&latencies, Some(mean_ms))
    };

    pf_info!(client.tag; "ran {} requests ({} acked) in {:?}",
                         config.num_requests, acked, elapsed);
    WorkloadStats {
        total: config.num_requests,
        acked,
        elapsed,
        mean_ms,
        stdev_ms,
    }
}

#[cfg(test)]
mod workload_tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use crate::protocol::{ClientPointer, Message, NodeKind, Reply};
    use crate::transport::{LocalTransport, MessageHandler};
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingCoordinator {
        reads: Mutex<u64>,
        writes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for CountingCoordinator {
        fn kind(&self) -> NodeKind {
            NodeKind::Coordinator
        }

        async fn handle_msg(&self, msg: Message) -> Reply {
            match msg {
                Message::ReadRequest { .. } => *self.reads.lock().unwrap() += 1,
                Message::WriteRequest { page_id, .. } => {
                    self.writes.lock().unwrap().push(page_id)
                }
                _ => return Reply::nack(),
            }
            Reply::ack()
        }
    }

    fn setup() -> (Arc<CountingCoordinator>, DsmClient) {
        let cm_addr: SocketAddr = "127.0.0.1:52000".parse().unwrap();
        let transport = Arc::new(LocalTransport::new());
        let coordinator = Arc::new(CountingCoordinator::default());
        transport.register(cm_addr, coordinator.clone());
        let me = ClientPointer::new(3, "127.0.0.1:52003".parse().unwrap());
        (coordinator, DsmClient::new(me, cm_addr, transport))
    }

    #[test]
    fn parse_workload_config() -> Result<(), DsmError> {
        assert_eq!(
            WorkloadConfig::from_config_str(None)?,
            WorkloadConfig::default()
        );
        let config = WorkloadConfig::from_config_str(Some(
            "num_pages = 3\nwrite_ratio = 100",
        ))?;
        assert_eq!(config.num_pages, 3);
        assert_eq!(config.write_ratio, 100);
        assert_eq!(config.num_requests, 10);
        assert!(WorkloadConfig::from_config_str(Some("write_ratio = 101"))
            .is_err());
        assert!(WorkloadConfig::from_config_str(Some("num_pages = 0")).is_err());
        assert!(WorkloadConfig::from_config_str(Some("pages = 3")).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn seed_writes_every_page() {
        let (coordinator, client) = setup();
        assert_eq!(seed_pages(&client, 4).await, 4);
        assert_eq!(
            *coordinator.writes.lock().unwrap(),
            vec!["P1", "P2", "P3", "P4"]
        );
    }

    #[tokio::test]
    async fn run_respects_ratio_and_range() {
        let (coordinator, client) = setup();
        let config = WorkloadConfig {
            num_pages: 2,
            num_requests: 20,
            write_ratio: 100,
            interval_ms: 0,
            warmup_ms: 0,
        };
        let stats = run_random(&client, &config).await;
        assert_eq!(stats.total, 20);
        assert_eq!(stats.acked, 20);
        assert!(stats.mean_ms >= 0.0);
        assert_eq!(*coordinator.reads.lock().unwrap(), 0);
        let writes = coordinator.writes.lock().unwrap();
        assert_eq!(writes.len(), 20);
        assert!(writes.iter().all(|p| p == "P1" || p == "P2"));

        drop(writes);
        let config = WorkloadConfig {
            write_ratio: 0,
            ..config
        };
        run_random(&client, &config).await;
        assert_eq!(*coordinator.reads.lock().unwrap(), 20);
    }
}
