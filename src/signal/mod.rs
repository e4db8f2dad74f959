//! # Signal Channel
//!
//! Carries sized opportunities from discovery to execution with
//! at-least-once delivery: the publisher tries the broker first and falls
//! back to a durable file spool; the consumer drains both and enforces
//! exactly-once *processing* by deduplicating on opportunity id within a
//! TTL window sized past the longest plausible expiry.

mod broker;
mod spool;

pub use broker::{InProcessBroker, SignalBroker};
pub use spool::FileSpool;

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SignalSettings;
use crate::errors::SignalError;
use crate::metrics;
use crate::types::{Opportunity, SignalEnvelope, SIGNAL_SCHEMA_VERSION};

/// Publisher side: broker first, spool on failure. Duplicate delivery is
/// acceptable; silent loss is not.
pub struct SignalPublisher {
    broker: Arc<dyn SignalBroker>,
    spool: Arc<FileSpool>,
}

impl SignalPublisher {
    pub fn new(broker: Arc<dyn SignalBroker>, spool: Arc<FileSpool>) -> Self {
        Self { broker, spool }
    }

    pub async fn publish(&self, opportunity: Opportunity) -> Result<(), SignalError> {
        let id = opportunity.id;
        let envelope = SignalEnvelope::new(opportunity);
        match self.broker.publish(envelope.clone()).await {
            Ok(()) => {
                metrics::SIGNALS_PUBLISHED.with_label_values(&["broker"]).inc();
                debug!(target: "signal", %id, "published via broker");
                Ok(())
            }
            Err(e) => {
                warn!(target: "signal", %id, error = %e, "broker publish failed, spooling");
                self.spool.enqueue(&envelope).await?;
                metrics::SIGNALS_PUBLISHED.with_label_values(&["spool"]).inc();
                Ok(())
            }
        }
    }
}

/// Consumer side: merges broker and spool, validates the schema version,
/// and suppresses redeliveries.
pub struct SignalConsumer {
    broker: Arc<dyn SignalBroker>,
    spool: Arc<FileSpool>,
    seen: Cache<Uuid, ()>,
    spool_poll_interval: Duration,
}

impl SignalConsumer {
    pub fn new(
        broker: Arc<dyn SignalBroker>,
        spool: Arc<FileSpool>,
        settings: &SignalSettings,
    ) -> Self {
        Self {
            broker,
            spool,
            seen: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(Duration::from_secs(settings.dedupe_ttl_secs))
                .build(),
            spool_poll_interval: Duration::from_millis(settings.spool_poll_interval_ms),
        }
    }

    /// Next deduplicated opportunity. Blocks, polling broker then spool,
    /// until one arrives.
    pub async fn recv(&self) -> Result<Opportunity, SignalError> {
        loop {
            if let Some(opp) = self.poll_once().await? {
                return Ok(opp);
            }
            tokio::time::sleep(self.spool_poll_interval).await;
        }
    }

    /// One non-blocking pass over broker and spool. `Ok(None)` when both
    /// are empty or everything seen was a duplicate.
    pub async fn poll_once(&self) -> Result<Option<Opportunity>, SignalError> {
        while let Some(envelope) = self.broker.try_recv().await? {
            if let Some(opp) = self.accept(envelope).await? {
                return Ok(Some(opp));
            }
        }
        loop {
            match self.spool.drain_oldest().await {
                Ok(Some(envelope)) => {
                    if let Some(opp) = self.accept(envelope).await? {
                        return Ok(Some(opp));
                    }
                }
                Ok(None) => return Ok(None),
                // A corrupt spool file was discarded; keep draining.
                Err(SignalError::Decode(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn accept(&self, envelope: SignalEnvelope) -> Result<Option<Opportunity>, SignalError> {
        if envelope.version != SIGNAL_SCHEMA_VERSION {
            metrics::SIGNALS_REJECTED
                .with_label_values(&["bad_version"])
                .inc();
            return Err(SignalError::UnsupportedVersion(envelope.version));
        }
        let id = envelope.opportunity.id;
        if self.seen.contains_key(&id) {
            metrics::SIGNALS_REJECTED
                .with_label_values(&["duplicate"])
                .inc();
            debug!(target: "signal", %id, "suppressed duplicate delivery");
            return Ok(None);
        }
        self.seen.insert(id, ()).await;
        Ok(Some(envelope.opportunity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SignalError;
    use async_trait::async_trait;
    use chrono::Utc;
    use ethers::types::{Address, U256};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn opportunity() -> Opportunity {
        Opportunity {
            id: Uuid::new_v4(),
            origin_chain_id: 1,
            loan_asset: Address::from_low_u64_be(1),
            loan_amount: U256::from(1_000u64),
            loan_amount_usd: 1_000.0,
            expected_net_profit_usd: 25.0,
            output_rate: 1.03,
            min_acceptable_output: U256::from(1_010u64),
            slippage_budget_bps: 50,
            priority_fee_hint_gwei: None,
            hops: vec![],
            expiry: Utc::now() + chrono::Duration::seconds(12),
            created_at: Utc::now(),
        }
    }

    fn settings() -> SignalSettings {
        SignalSettings {
            spool_dir: String::new(),
            spool_retention: 100,
            spool_poll_interval_ms: 10,
            dedupe_ttl_secs: 60,
        }
    }

    /// Broker that refuses publishes while `down` is set but still delivers
    /// what it previously accepted.
    struct FlakyBroker {
        inner: InProcessBroker,
        down: AtomicBool,
    }

    #[async_trait]
    impl SignalBroker for FlakyBroker {
        async fn publish(&self, envelope: SignalEnvelope) -> Result<(), SignalError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SignalError::BrokerUnavailable("flaky".into()));
            }
            self.inner.publish(envelope).await
        }
        async fn try_recv(&self) -> Result<Option<SignalEnvelope>, SignalError> {
            self.inner.try_recv().await
        }
    }

    #[tokio::test]
    async fn broker_outage_falls_back_to_spool_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Arc::new(FileSpool::new(dir.path(), 100).await.unwrap());
        let broker = Arc::new(FlakyBroker {
            inner: InProcessBroker::new(),
            down: AtomicBool::new(true),
        });
        let publisher = SignalPublisher::new(broker.clone(), spool.clone());
        let consumer = SignalConsumer::new(broker.clone(), spool.clone(), &settings());

        let spooled = opportunity();
        publisher.publish(spooled.clone()).await.unwrap();
        assert_eq!(spool.len().await, 1);

        broker.down.store(false, Ordering::SeqCst);
        let direct = opportunity();
        publisher.publish(direct.clone()).await.unwrap();

        // Broker path drains first, then the spooled signal surfaces.
        let first = consumer.poll_once().await.unwrap().unwrap();
        assert_eq!(first.id, direct.id);
        let second = consumer.poll_once().await.unwrap().unwrap();
        assert_eq!(second.id, spooled.id);
        assert_eq!(spool.len().await, 0);
    }

    #[tokio::test]
    async fn duplicate_deliveries_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Arc::new(FileSpool::new(dir.path(), 100).await.unwrap());
        let broker = Arc::new(InProcessBroker::new());
        let consumer = SignalConsumer::new(broker.clone(), spool.clone(), &settings());

        let opp = opportunity();
        broker.publish(SignalEnvelope::new(opp.clone())).await.unwrap();
        broker.publish(SignalEnvelope::new(opp.clone())).await.unwrap();
        broker.publish(SignalEnvelope::new(opp.clone())).await.unwrap();

        let got = consumer.poll_once().await.unwrap().unwrap();
        assert_eq!(got.id, opp.id);
        assert!(consumer.poll_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Arc::new(FileSpool::new(dir.path(), 100).await.unwrap());
        let broker = Arc::new(InProcessBroker::new());
        let consumer = SignalConsumer::new(broker.clone(), spool.clone(), &settings());

        let mut envelope = SignalEnvelope::new(opportunity());
        envelope.version = 99;
        broker.publish(envelope).await.unwrap();
        assert!(matches!(
            consumer.poll_once().await,
            Err(SignalError::UnsupportedVersion(99))
        ));
    }

    #[tokio::test]
    async fn undecodable_spool_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let spool = FileSpool::new(dir.path(), 100).await.unwrap();
        let bad = dir.path().join("0_garbage.json");
        tokio::fs::write(&bad, b"not a signal").await.unwrap();

        assert!(matches!(
            spool.drain_oldest().await,
            Err(SignalError::Decode(_))
        ));
        // Moved aside, not deleted, and no longer visible to the poller.
        assert!(!bad.exists());
        assert!(dir.path().join("quarantine/0_garbage.json").exists());
        assert_eq!(spool.len().await, 0);
        assert!(spool.drain_oldest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn spool_retention_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let spool = FileSpool::new(dir.path(), 3).await.unwrap();
        for _ in 0..5 {
            spool.enqueue(&SignalEnvelope::new(opportunity())).await.unwrap();
            // Millisecond name prefix must advance for deterministic order.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(spool.len().await, 3);
    }
}
