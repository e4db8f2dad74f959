//! # Nonce Allocator
//!
//! Owns the nonce sequence for every sender address the engine signs with.
//! Allocation is strictly monotonic per sender and reconciled against the
//! chain's observed counter on every call, so transactions sent outside the
//! engine are absorbed instead of colliding. All state is per-sender: a
//! resync or a held lock for one sender never delays any other.

use dashmap::DashMap;
use ethers::types::Address;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::blockchain::ChainStateProvider;
use crate::errors::NonceError;
use crate::metrics;

#[derive(Default)]
struct SenderNonces {
    /// Next nonce to hand out. `None` until first seeded from chain.
    next: Option<u64>,
    /// Reservations not yet released.
    in_flight: BTreeSet<u64>,
}

pub struct NonceAllocator {
    chain_state: Arc<dyn ChainStateProvider>,
    senders: DashMap<(u64, Address), Arc<Mutex<SenderNonces>>>,
}

impl NonceAllocator {
    pub fn new(chain_state: Arc<dyn ChainStateProvider>) -> Self {
        Self {
            chain_state,
            senders: DashMap::new(),
        }
    }

    fn entry(&self, chain_id: u64, sender: Address) -> Arc<Mutex<SenderNonces>> {
        self.senders
            .entry((chain_id, sender))
            .or_default()
            .clone()
    }

    /// Reserve the next nonce for `sender` on `chain_id`. The reservation
    /// must be released exactly once, with `consumed` reflecting whether a
    /// transaction carrying it landed on chain.
    pub async fn allocate(&self, chain_id: u64, sender: Address) -> Result<u64, NonceError> {
        let entry = self.entry(chain_id, sender);
        let mut state = entry.lock().await;
        let chain_nonce = self.chain_state.sender_nonce(chain_id, sender).await?;
        let mut nonce = state.next.unwrap_or(0).max(chain_nonce);
        while state.in_flight.contains(&nonce) {
            nonce += 1;
        }
        state.in_flight.insert(nonce);
        state.next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Release a reservation. An unconsumed nonce below the cached counter
    /// rewinds it, so the gap is filled by the next allocation rather than
    /// stalling every later transaction behind a hole.
    pub async fn release(&self, chain_id: u64, sender: Address, nonce: u64, consumed: bool) {
        let entry = self.entry(chain_id, sender);
        let mut state = entry.lock().await;
        state.in_flight.remove(&nonce);
        if !consumed {
            if let Some(next) = state.next {
                if nonce < next {
                    state.next = Some(nonce);
                }
            }
        }
    }

    /// Full resync after a nonce conflict: drop every in-flight reservation
    /// for the sender and re-seed from the chain. Attempts holding dropped
    /// reservations must re-allocate before submitting.
    pub async fn resync(&self, chain_id: u64, sender: Address) -> Result<u64, NonceError> {
        let entry = self.entry(chain_id, sender);
        let mut state = entry.lock().await;
        let discarded = state.in_flight.len();
        state.in_flight.clear();
        let chain_nonce = self.chain_state.sender_nonce(chain_id, sender).await?;
        state.next = Some(chain_nonce);
        metrics::NONCE_RESYNCS.inc();
        if discarded > 0 {
            warn!(
                target: "executor::nonce",
                chain_id,
                sender = %sender,
                discarded,
                chain_nonce,
                "nonce resync discarded in-flight reservations"
            );
        } else {
            info!(target: "executor::nonce", chain_id, sender = %sender, chain_nonce, "nonce resync");
        }
        Ok(chain_nonce)
    }

    /// Number of live reservations, for metrics and shutdown draining.
    pub async fn in_flight(&self, chain_id: u64, sender: Address) -> usize {
        let entry = self.entry(chain_id, sender);
        let state = entry.lock().await;
        state.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers::types::U256;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::errors::GasError;

    struct MockChainState {
        nonce: AtomicU64,
    }

    impl MockChainState {
        fn at(n: u64) -> Arc<Self> {
            Arc::new(Self {
                nonce: AtomicU64::new(n),
            })
        }
    }

    #[async_trait]
    impl ChainStateProvider for MockChainState {
        async fn sender_nonce(&self, _: u64, _: Address) -> Result<u64, NonceError> {
            Ok(self.nonce.load(Ordering::SeqCst))
        }
        async fn base_fee(&self, _: u64) -> Result<U256, GasError> {
            Ok(U256::zero())
        }
        async fn recent_tips(&self, _: u64) -> Result<Vec<U256>, GasError> {
            Ok(vec![])
        }
        async fn native_usd_price(&self, _: u64) -> Result<f64, GasError> {
            Ok(0.0)
        }
    }

    fn sender(tag: u64) -> Address {
        Address::from_low_u64_be(tag)
    }

    #[tokio::test]
    async fn concurrent_allocations_are_unique_and_gapless() {
        let alloc = Arc::new(NonceAllocator::new(MockChainState::at(100)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let alloc = alloc.clone();
            handles.push(tokio::spawn(async move {
                alloc.allocate(1, sender(1)).await.unwrap()
            }));
        }
        let mut nonces = Vec::new();
        for h in handles {
            nonces.push(h.await.unwrap());
        }
        nonces.sort_unstable();
        let expected: Vec<u64> = (100..116).collect();
        assert_eq!(nonces, expected);
    }

    #[tokio::test]
    async fn released_unconsumed_nonce_is_reused() {
        let alloc = NonceAllocator::new(MockChainState::at(5));
        let a = alloc.allocate(1, sender(1)).await.unwrap();
        let b = alloc.allocate(1, sender(1)).await.unwrap();
        assert_eq!((a, b), (5, 6));
        // First tx failed before submission; its nonce must come back.
        alloc.release(1, sender(1), a, false).await;
        // Nonce 6 is still in flight, so 5 is handed out again and the
        // next allocation after that skips to 7.
        let c = alloc.allocate(1, sender(1)).await.unwrap();
        assert_eq!(c, 5);
        let d = alloc.allocate(1, sender(1)).await.unwrap();
        assert_eq!(d, 7);
    }

    #[tokio::test]
    async fn resync_discards_reservations_and_reseeds() {
        let chain = MockChainState::at(10);
        let alloc = NonceAllocator::new(chain.clone());
        alloc.allocate(1, sender(1)).await.unwrap();
        alloc.allocate(1, sender(1)).await.unwrap();
        assert_eq!(alloc.in_flight(1, sender(1)).await, 2);

        // Someone sent from this account outside the engine.
        chain.nonce.store(25, Ordering::SeqCst);
        let resumed = alloc.resync(1, sender(1)).await.unwrap();
        assert_eq!(resumed, 25);
        assert_eq!(alloc.in_flight(1, sender(1)).await, 0);
        assert_eq!(alloc.allocate(1, sender(1)).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn chain_counter_advances_are_absorbed() {
        let chain = MockChainState::at(0);
        let alloc = NonceAllocator::new(chain.clone());
        assert_eq!(alloc.allocate(1, sender(1)).await.unwrap(), 0);
        chain.nonce.store(40, Ordering::SeqCst);
        assert_eq!(alloc.allocate(1, sender(1)).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn senders_are_independent() {
        let alloc = NonceAllocator::new(MockChainState::at(0));
        let a1 = alloc.allocate(1, sender(1)).await.unwrap();
        let b1 = alloc.allocate(1, sender(2)).await.unwrap();
        alloc.resync(1, sender(1)).await.unwrap();
        let b2 = alloc.allocate(1, sender(2)).await.unwrap();
        assert_eq!((a1, b1, b2), (0, 0, 1));
    }
}
