//! # Traffic-Switching Pool Provider
//!
//! Canary migration between two [`V3PoolProvider`]s. Each `get_pools` call is served by either
//! the current or the target provider, chosen by a [`TrafficDecision`]. Independently, a second
//! decision picks calls to replay against a trusted source of truth in a background task; the
//! replay result is compared with what was served and only reported through telemetry.
//!
//! The shadow replay never changes the returned value, never adds latency to the caller and
//! never surfaces its errors. Failures of the serving provider propagate unchanged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::{TRAFFIC_SWITCH_LATENCY_MS, TRAFFIC_SWITCH_SAMPLE, TRAFFIC_SWITCH_SELECTED};
use crate::pool_provider::{PoolAccessor, ProviderConfig, TokenPairWithFee, V3PoolProvider};
use crate::pools::{FeeAmount, PoolAddress};
use crate::telemetry::TelemetrySink;
use crate::tokens::Token;

/// Default upper bound on a shadow comparison.
pub const DEFAULT_SHADOW_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-call yes/no decision (switch traffic, sample traffic).
pub trait TrafficDecision: Send + Sync {
    fn decide(&self) -> bool;
}

/// Says yes for `percent`% of calls.
#[derive(Debug, Clone, Copy)]
pub struct RolloutPercentage {
    percent: f64,
}

impl RolloutPercentage {
    /// `percent` is clamped to `0..=100`; NaN counts as 0.
    pub fn new(percent: f64) -> Self {
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        Self { percent }
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }
}

impl TrafficDecision for RolloutPercentage {
    fn decide(&self) -> bool {
        if self.percent <= 0.0 {
            return false;
        }
        if self.percent >= 100.0 {
            return true;
        }
        rand::thread_rng().gen_bool(self.percent / 100.0)
    }
}

/// Always the same answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticDecision(pub bool);

impl TrafficDecision for StaticDecision {
    fn decide(&self) -> bool {
        self.0
    }
}

/// The three providers a traffic switch is built from.
pub struct TrafficSwitchProviders {
    pub current: Arc<dyn V3PoolProvider>,
    pub target: Arc<dyn V3PoolProvider>,
    pub source_of_truth: Arc<dyn V3PoolProvider>,
}

pub struct TrafficSwitchV3PoolProvider {
    name: String,
    providers: TrafficSwitchProviders,
    should_switch: Arc<dyn TrafficDecision>,
    should_sample: Arc<dyn TrafficDecision>,
    telemetry: Arc<dyn TelemetrySink>,
    shadow_timeout: Duration,
}

impl TrafficSwitchV3PoolProvider {
    pub fn new(
        providers: TrafficSwitchProviders,
        should_switch: Arc<dyn TrafficDecision>,
        should_sample: Arc<dyn TrafficDecision>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let name = format!(
            "TrafficSwitch({} -> {})",
            providers.current.name(),
            providers.target.name()
        );
        Self {
            name,
            providers,
            should_switch,
            should_sample,
            telemetry,
            shadow_timeout: DEFAULT_SHADOW_TIMEOUT,
        }
    }

    pub fn with_shadow_timeout(mut self, shadow_timeout: Duration) -> Self {
        self.shadow_timeout = shadow_timeout;
        self
    }

    fn spawn_shadow_comparison(
        &self,
        served_by: &'static str,
        token_pairs: &[TokenPairWithFee],
        config: &ProviderConfig,
        served: PoolAccessor,
    ) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("[{}] No async runtime available, skipping shadow comparison", self.name);
                return;
            }
        };

        let source_of_truth = Arc::clone(&self.providers.source_of_truth);
        let telemetry = Arc::clone(&self.telemetry);
        let timeout = self.shadow_timeout;
        let token_pairs = token_pairs.to_vec();
        let config = config.clone();

        handle.spawn(async move {
            let truth =
                tokio::time::timeout(timeout, source_of_truth.get_pools(&token_pairs, &config))
                    .await;

            let result = match truth {
                Ok(Ok(truth)) => {
                    let mismatched = served.mismatched_addresses(&truth);
                    if mismatched.is_empty() {
                        debug!(
                            "Shadow comparison matched {} ({} pools, served by {})",
                            source_of_truth.name(),
                            served.len(),
                            served_by
                        );
                        "match"
                    } else {
                        warn!(
                            "Shadow comparison mismatch against {}: {} of {} pools differ \
                             (served by {}): {:?}",
                            source_of_truth.name(),
                            mismatched.len(),
                            served.len().max(truth.len()),
                            served_by,
                            mismatched
                        );
                        "mismatch"
                    }
                }
                Ok(Err(e)) => {
                    warn!("Shadow call to {} failed: {:#}", source_of_truth.name(), e);
                    "error"
                }
                Err(_) => {
                    warn!(
                        "Shadow call to {} timed out after {:?}",
                        source_of_truth.name(),
                        timeout
                    );
                    "timeout"
                }
            };

            telemetry.count(
                TRAFFIC_SWITCH_SAMPLE,
                1,
                &[("result", result), ("provider", served_by)],
            );
        });
    }
}

#[async_trait]
impl V3PoolProvider for TrafficSwitchV3PoolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_pools(
        &self,
        token_pairs: &[TokenPairWithFee],
        config: &ProviderConfig,
    ) -> Result<PoolAccessor> {
        let (role, provider) = if self.should_switch.decide() {
            ("target", &self.providers.target)
        } else {
            ("current", &self.providers.current)
        };
        self.telemetry.count(TRAFFIC_SWITCH_SELECTED, 1, &[("provider", role)]);

        let start = Instant::now();
        let result = provider.get_pools(token_pairs, config).await;
        self.telemetry
            .latency(TRAFFIC_SWITCH_LATENCY_MS, start.elapsed(), &[("provider", role)]);

        let accessor =
            result.with_context(|| format!("{} pool provider {} failed", role, provider.name()))?;

        if self.should_sample.decide() {
            self.spawn_shadow_comparison(role, token_pairs, config, accessor.clone());
        }

        Ok(accessor)
    }

    fn get_pool_address(&self, token_a: &Token, token_b: &Token, fee: FeeAmount) -> PoolAddress {
        self.providers.current.get_pool_address(token_a, token_b, fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool_provider::StaticV3PoolProvider;
    use crate::routes::fixtures::{usdc, v3_pool, weth};
    use crate::telemetry::RecordingSink;
    use ethers::types::{Address, H256};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed accessor (or error) after an optional delay and counts its calls.
    struct FixedProvider {
        name: &'static str,
        result: std::result::Result<PoolAccessor, &'static str>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FixedProvider {
        fn ok(name: &'static str, accessor: PoolAccessor) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(accessor),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Err("rpc unavailable"),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(name: &'static str, accessor: PoolAccessor, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(accessor),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl V3PoolProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn get_pools(
            &self,
            _token_pairs: &[TokenPairWithFee],
            _config: &ProviderConfig,
        ) -> Result<PoolAccessor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone().map_err(|e| anyhow::anyhow!(e))
        }

        fn get_pool_address(
            &self,
            token_a: &Token,
            token_b: &Token,
            fee: FeeAmount,
        ) -> PoolAddress {
            let (factory, init_code_hash) = (Address::zero(), H256::zero());
            crate::pools::compute_v3_pool_address(factory, init_code_hash, token_a, token_b, fee)
        }
    }

    fn pairs() -> Vec<TokenPairWithFee> {
        vec![TokenPairWithFee::new(usdc(), weth(), FeeAmount::Low)]
    }

    fn served() -> PoolAccessor {
        PoolAccessor::new(vec![v3_pool()])
    }

    fn drifted() -> PoolAccessor {
        let mut pool = v3_pool();
        pool.liquidity = pool.liquidity + 1;
        PoolAccessor::new(vec![pool])
    }

    fn switch(
        current: Arc<dyn V3PoolProvider>,
        target: Arc<dyn V3PoolProvider>,
        source_of_truth: Arc<dyn V3PoolProvider>,
        switch_traffic: bool,
        sample_traffic: bool,
        sink: &RecordingSink,
    ) -> TrafficSwitchV3PoolProvider {
        TrafficSwitchV3PoolProvider::new(
            TrafficSwitchProviders {
                current,
                target,
                source_of_truth,
            },
            Arc::new(StaticDecision(switch_traffic)),
            Arc::new(StaticDecision(sample_traffic)),
            Arc::new(sink.clone()),
        )
    }

    /// Waits for the background comparison to report.
    async fn wait_for_sample(sink: &RecordingSink) {
        for _ in 0..200 {
            if sink.counter_total(TRAFFIC_SWITCH_SAMPLE, &[]) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("shadow comparison never reported");
    }

    #[tokio::test]
    async fn test_serves_current_when_not_switched() {
        let sink = RecordingSink::new();
        let current = FixedProvider::ok("current", served());
        let target = FixedProvider::ok("target", drifted());
        let truth = FixedProvider::ok("truth", served());
        let provider = switch(current.clone(), target.clone(), truth.clone(), false, false, &sink);

        let accessor = provider.get_pools(&pairs(), &ProviderConfig::default()).await.unwrap();

        assert_eq!(accessor, served());
        assert_eq!((current.calls(), target.calls(), truth.calls()), (1, 0, 0));
        assert_eq!(sink.counter_total(TRAFFIC_SWITCH_SELECTED, &[("provider", "current")]), 1);
    }

    #[tokio::test]
    async fn test_serves_target_when_switched() {
        let sink = RecordingSink::new();
        let current = FixedProvider::ok("current", served());
        let target = FixedProvider::ok("target", drifted());
        let truth = FixedProvider::ok("truth", served());
        let provider = switch(current.clone(), target.clone(), truth, true, false, &sink);

        let accessor = provider.get_pools(&pairs(), &ProviderConfig::default()).await.unwrap();

        assert_eq!(accessor, drifted());
        assert_eq!(current.calls(), 0);
        assert_eq!(sink.counter_total(TRAFFIC_SWITCH_SELECTED, &[("provider", "target")]), 1);
    }

    #[tokio::test]
    async fn test_failing_source_of_truth_is_isolated() {
        let sink = RecordingSink::new();
        let provider = switch(
            FixedProvider::ok("current", served()),
            FixedProvider::ok("target", served()),
            FixedProvider::failing("truth"),
            false,
            true,
            &sink,
        );

        let accessor = provider.get_pools(&pairs(), &ProviderConfig::default()).await.unwrap();
        assert_eq!(accessor, served());

        wait_for_sample(&sink).await;
        assert_eq!(sink.counter_total(TRAFFIC_SWITCH_SAMPLE, &[("result", "error")]), 1);
    }

    #[tokio::test]
    async fn test_sample_reports_match_and_mismatch() {
        let sink = RecordingSink::new();
        let provider = switch(
            FixedProvider::ok("current", served()),
            FixedProvider::ok("target", drifted()),
            FixedProvider::ok("truth", served()),
            false,
            true,
            &sink,
        );
        provider.get_pools(&pairs(), &ProviderConfig::default()).await.unwrap();
        wait_for_sample(&sink).await;
        assert_eq!(sink.counter_total(TRAFFIC_SWITCH_SAMPLE, &[("result", "match")]), 1);

        let sink = RecordingSink::new();
        let provider = switch(
            FixedProvider::ok("current", served()),
            FixedProvider::ok("target", drifted()),
            FixedProvider::ok("truth", served()),
            true,
            true,
            &sink,
        );
        let served = provider.get_pools(&pairs(), &ProviderConfig::default()).await.unwrap();
        assert_eq!(served, drifted());
        wait_for_sample(&sink).await;
        assert_eq!(
            sink.counter_total(
                TRAFFIC_SWITCH_SAMPLE,
                &[("result", "mismatch"), ("provider", "target")]
            ),
            1
        );
    }

    #[tokio::test]
    async fn test_slow_source_of_truth_adds_no_latency() {
        let sink = RecordingSink::new();
        let provider = switch(
            FixedProvider::ok("current", served()),
            FixedProvider::ok("target", served()),
            FixedProvider::slow("truth", served(), Duration::from_secs(5)),
            false,
            true,
            &sink,
        )
        .with_shadow_timeout(Duration::from_millis(50));

        let start = Instant::now();
        let accessor = provider.get_pools(&pairs(), &ProviderConfig::default()).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(accessor, served());

        wait_for_sample(&sink).await;
        assert_eq!(sink.counter_total(TRAFFIC_SWITCH_SAMPLE, &[("result", "timeout")]), 1);
    }

    #[tokio::test]
    async fn test_primary_failure_propagates_without_sampling() {
        let sink = RecordingSink::new();
        let truth = FixedProvider::ok("truth", served());
        let provider = switch(
            FixedProvider::failing("current"),
            FixedProvider::ok("target", served()),
            truth.clone(),
            false,
            true,
            &sink,
        );

        let err = provider.get_pools(&pairs(), &ProviderConfig::default()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("rpc unavailable"));
        assert_eq!(truth.calls(), 0);
    }

    #[tokio::test]
    async fn test_pool_address_comes_from_current_provider() {
        let sink = RecordingSink::new();
        let current = Arc::new(StaticV3PoolProvider::uniswap_v3("current").unwrap());
        let provider = switch(
            current.clone(),
            FixedProvider::ok("target", served()),
            FixedProvider::ok("truth", served()),
            true,
            false,
            &sink,
        );

        let location = provider.get_pool_address(&usdc(), &weth(), FeeAmount::Low);
        assert_eq!(location, current.get_pool_address(&usdc(), &weth(), FeeAmount::Low));
        assert_eq!(location.address, v3_pool().address);
    }

    #[test]
    fn test_rollout_percentage_extremes() {
        let never = RolloutPercentage::new(-5.0);
        let always = RolloutPercentage::new(250.0);
        assert_eq!(never.percent(), 0.0);
        assert_eq!(always.percent(), 100.0);
        assert!((0..1000).all(|_| !never.decide()));
        assert!((0..1000).all(|_| always.decide()));
        assert!(!RolloutPercentage::new(f64::NAN).decide());
    }
}
