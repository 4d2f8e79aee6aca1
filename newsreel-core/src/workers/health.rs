//! Health sampler: verifies article availability for releases that have
//! never been checked.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::info;

use newsreel_model::{HealthStatus, ReleaseRecord};

use crate::error::Result;
use crate::indexer::IndexerClient;
use crate::nntp::{NntpConnection, NntpError, SegmentStatus};
use crate::store::PostgresStore;

/// Probe seam over one NNTP connection.
#[async_trait]
pub trait SegmentProbe: Send {
    async fn probe(&mut self, message_id: &str) -> std::result::Result<SegmentStatus, NntpError>;
}

#[async_trait]
impl SegmentProbe for NntpConnection {
    async fn probe(&mut self, message_id: &str) -> std::result::Result<SegmentStatus, NntpError> {
        self.stat(message_id).await
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SampleCounts {
    pub success: i64,
    pub failure: i64,
}

pub fn verdict(counts: &SampleCounts) -> HealthStatus {
    if counts.failure > 0 {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Healthy
    }
}

/// Check every segment exactly once across the pool. Connections claim
/// segments from one shared cursor until it runs past the end; a
/// missing article is an expected failure, anything else aborts the
/// whole pass.
pub async fn check_segments<C: SegmentProbe>(
    probes: &mut [C],
    segments: &[String],
) -> std::result::Result<SampleCounts, NntpError> {
    let cursor = AtomicUsize::new(0);
    let success = AtomicI64::new(0);
    let failure = AtomicI64::new(0);

    try_join_all(probes.iter_mut().map(|probe| {
        let cursor = &cursor;
        let success = &success;
        let failure = &failure;
        async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(segment) = segments.get(index) else {
                    return Ok::<(), NntpError>(());
                };
                match probe.probe(segment).await? {
                    SegmentStatus::Present => {
                        success.fetch_add(1, Ordering::Relaxed);
                    }
                    SegmentStatus::Missing => {
                        failure.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }))
    .await?;

    Ok(SampleCounts {
        success: success.into_inner(),
        failure: failure.into_inner(),
    })
}

/// NNTP endpoint and pool sizing.
#[derive(Debug, Clone)]
pub struct NntpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub connections: usize,
}

#[derive(Debug)]
pub struct HealthSampler<'a> {
    store: &'a PostgresStore,
    indexer: &'a IndexerClient,
    nntp: NntpSettings,
    delay: Duration,
}

impl<'a> HealthSampler<'a> {
    pub fn new(
        store: &'a PostgresStore,
        indexer: &'a IndexerClient,
        nntp: NntpSettings,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            indexer,
            nntp,
            delay,
        }
    }

    /// Sample unverified releases one at a time until none remain.
    pub async fn run(&self) -> Result<()> {
        loop {
            let Some(candidate) = self.store.next_health_candidate().await? else {
                info!("no unverified releases left");
                return Ok(());
            };
            self.sample(&candidate).await?;
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn sample(&self, record: &ReleaseRecord) -> Result<()> {
        info!(release = %record.release_id, "sampling release health");
        let segments = self.indexer.manifest_segments(&record.release_id).await?;

        let pool_size = self.nntp.connections.min(segments.len()).max(1);
        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            connections.push(
                NntpConnection::connect(
                    &self.nntp.host,
                    self.nntp.port,
                    &self.nntp.username,
                    &self.nntp.password,
                )
                .await?,
            );
        }

        let counts = check_segments(&mut connections, &segments).await?;
        for connection in connections {
            let _ = connection.quit().await;
        }

        let status = verdict(&counts);
        info!(
            release = %record.release_id,
            total = segments.len(),
            success = counts.success,
            failure = counts.failure,
            status = status.as_str(),
            "health verdict"
        );
        self.store
            .update_health(&record.release_id, status, counts.success, counts.failure)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct ScriptedProbe {
        responses: HashMap<String, SegmentStatus>,
        fatal_on: Option<String>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SegmentProbe for ScriptedProbe {
        async fn probe(
            &mut self,
            message_id: &str,
        ) -> std::result::Result<SegmentStatus, NntpError> {
            self.seen.lock().unwrap().push(message_id.to_string());
            if self.fatal_on.as_deref() == Some(message_id) {
                return Err(NntpError::Protocol("scripted failure".to_string()));
            }
            Ok(*self
                .responses
                .get(message_id)
                .unwrap_or(&SegmentStatus::Present))
        }
    }

    fn segments(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn each_segment_is_checked_exactly_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut probes: Vec<ScriptedProbe> = (0..3)
            .map(|_| ScriptedProbe {
                responses: HashMap::new(),
                fatal_on: None,
                seen: seen.clone(),
            })
            .collect();
        let segs = segments(&["a", "b", "c", "d", "e"]);
        let counts = check_segments(&mut probes, &segs).await.unwrap();
        assert_eq!(counts, SampleCounts { success: 5, failure: 0 });

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn missing_articles_count_as_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut probes = vec![ScriptedProbe {
            responses: HashMap::from([
                ("a".to_string(), SegmentStatus::Present),
                ("b".to_string(), SegmentStatus::Missing),
                ("c".to_string(), SegmentStatus::Missing),
            ]),
            fatal_on: None,
            seen,
        }];
        let segs = segments(&["a", "b", "c"]);
        let counts = check_segments(&mut probes, &segs).await.unwrap();
        assert_eq!(counts, SampleCounts { success: 1, failure: 2 });
        assert_eq!(verdict(&counts), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn unexpected_errors_abort_the_pass() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut probes = vec![ScriptedProbe {
            responses: HashMap::new(),
            fatal_on: Some("b".to_string()),
            seen,
        }];
        let segs = segments(&["a", "b", "c"]);
        assert!(check_segments(&mut probes, &segs).await.is_err());
    }

    #[test]
    fn clean_sample_is_healthy() {
        assert_eq!(
            verdict(&SampleCounts { success: 10, failure: 0 }),
            HealthStatus::Healthy
        );
    }
}
