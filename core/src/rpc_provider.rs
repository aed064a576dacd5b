use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

// ── Circuit breaker ───────────────────────────────────────────────────────────

/// Consecutive failures that take an endpoint out of rotation.
const TRIP_AFTER_FAILURES: u64 = 3;

/// How long a tripped endpoint sits out before it is offered again.
const TRIP_COOLDOWN: Duration = Duration::from_secs(5 * 60);

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// An Ethereum JSON-RPC endpoint, optionally behind an API key header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcProvider {
    pub name: String,
    pub url: String,
    pub auth_header: Option<String>,
    pub auth_value: Option<String>,
}

impl RpcProvider {
    /// Attach the provider's auth header, if any, to a request.
    pub fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth_header, &self.auth_value) {
            (Some(header), Some(value)) => req.header(header.as_str(), value.as_str()),
            _ => req,
        }
    }
}

#[derive(Debug)]
struct Endpoint {
    provider: RpcProvider,
    failures: AtomicU64,
    tripped_at: RwLock<Option<Instant>>,
}

impl Endpoint {
    fn new(provider: RpcProvider) -> Self {
        Self {
            provider,
            failures: AtomicU64::new(0),
            tripped_at: RwLock::new(None),
        }
    }

    async fn is_available(&self) -> bool {
        match *self.tripped_at.read().await {
            None => true,
            Some(at) => at.elapsed() >= TRIP_COOLDOWN,
        }
    }

    async fn mark_healthy(&self) {
        self.failures.store(0, Ordering::Relaxed);
        *self.tripped_at.write().await = None;
    }

    /// Count one failure and trip the breaker at the threshold. Returns the
    /// consecutive failure count.
    async fn mark_failed(&self, source: &'static str) -> u64 {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= TRIP_AFTER_FAILURES {
            let mut tripped = self.tripped_at.write().await;
            if tripped.is_none() {
                tracing::warn!(
                    provider = %self.provider.name,
                    url = %self.provider.url,
                    failures,
                    source,
                    cooldown_secs = TRIP_COOLDOWN.as_secs(),
                    "Provider tripped, excluded from balance reads"
                );
            }
            *tripped = Some(Instant::now());
        }
        failures
    }
}

/// Prioritised JSON-RPC endpoints with a circuit breaker per endpoint.
///
/// Balance reads ask for `preferred()` and report back how the call went;
/// the optional background prober does the same on a timer.
pub struct ProviderRegistry {
    endpoints: Vec<Endpoint>,
    client: Client,
}

impl ProviderRegistry {
    /// The first provider is preferred whenever it is not tripped.
    pub fn new(providers: Vec<RpcProvider>) -> Arc<Self> {
        Arc::new(Self {
            endpoints: providers.into_iter().map(Endpoint::new).collect(),
            client: Client::new(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn preferred(&self) -> Option<RpcProvider> {
        for endpoint in &self.endpoints {
            if endpoint.is_available().await {
                return Some(endpoint.provider.clone());
            }
        }
        None
    }

    pub async fn report_success(&self, url: &str) {
        if let Some(endpoint) = self.endpoint(url) {
            endpoint.mark_healthy().await;
        }
    }

    pub async fn report_failure(&self, url: &str) {
        if let Some(endpoint) = self.endpoint(url) {
            endpoint.mark_failed("balance read").await;
        }
    }

    /// 429 and 5xx are the endpoint's fault; other statuses are about the
    /// request and leave its health alone.
    pub fn is_provider_fault(status: u16) -> bool {
        status == 429 || status >= 500
    }

    /// Probe every endpoint with `eth_blockNumber` on a fixed interval, so a
    /// tripped endpoint comes back as soon as it answers again.
    pub fn spawn_health_checker(
        self: &Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.probe_all().await;
            }
        })
    }

    async fn probe_all(&self) {
        for endpoint in &self.endpoints {
            match self.probe(endpoint).await {
                Ok(block) => {
                    endpoint.mark_healthy().await;
                    tracing::debug!(provider = %endpoint.provider.name, block, "Provider probe OK");
                }
                Err(e) => {
                    let failures = endpoint.mark_failed("health probe").await;
                    tracing::warn!(
                        provider = %endpoint.provider.name,
                        failures,
                        error = %e,
                        "Provider probe failed"
                    );
                }
            }
        }
    }

    /// Returns the block height the endpoint reports.
    async fn probe(&self, endpoint: &Endpoint) -> Result<u64, String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_blockNumber",
            "params": []
        });
        let req = endpoint
            .provider
            .authorize(self.client.post(&endpoint.provider.url).json(&body));

        let response = tokio::time::timeout(PROBE_TIMEOUT, req.send())
            .await
            .map_err(|_| "timeout".to_string())?
            .map_err(|e| format!("request error: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status().as_u16()));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("parse error: {e}"))?;
        json["result"]
            .as_str()
            .and_then(parse_hex_quantity)
            .ok_or_else(|| "missing block number in response".to_string())
    }

    fn endpoint(&self, url: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.provider.url == url)
    }
}

#[cfg(test)]
impl ProviderRegistry {
    async fn available_count(&self) -> usize {
        let mut count = 0;
        for endpoint in &self.endpoints {
            if endpoint.is_available().await {
                count += 1;
            }
        }
        count
    }
}

/// Parse a JSON-RPC quantity such as `"0x1b4"`.
fn parse_hex_quantity(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: &str = "http://primary.test";
    const BACKUP: &str = "http://backup.test";

    fn endpoint(name: &str, url: &str) -> RpcProvider {
        RpcProvider {
            name: name.to_string(),
            url: url.to_string(),
            auth_header: None,
            auth_value: None,
        }
    }

    fn primary_and_backup() -> Arc<ProviderRegistry> {
        ProviderRegistry::new(vec![endpoint("primary", PRIMARY), endpoint("backup", BACKUP)])
    }

    async fn fail(registry: &ProviderRegistry, url: &str, times: u64) {
        for _ in 0..times {
            registry.report_failure(url).await;
        }
    }

    #[tokio::test]
    async fn test_preferred_follows_priority() {
        let registry = primary_and_backup();
        assert_eq!(registry.available_count().await, 2);
        assert_eq!(registry.preferred().await.unwrap().name, "primary");
    }

    #[tokio::test]
    async fn test_tripped_primary_falls_back() {
        let registry = primary_and_backup();
        fail(&registry, PRIMARY, TRIP_AFTER_FAILURES - 1).await;
        assert_eq!(registry.preferred().await.unwrap().url, PRIMARY);

        fail(&registry, PRIMARY, 1).await;
        assert_eq!(registry.available_count().await, 1);
        assert_eq!(registry.preferred().await.unwrap().url, BACKUP);
    }

    #[tokio::test]
    async fn test_failures_must_be_consecutive() {
        let registry = primary_and_backup();
        fail(&registry, PRIMARY, TRIP_AFTER_FAILURES - 1).await;
        registry.report_success(PRIMARY).await;
        fail(&registry, PRIMARY, TRIP_AFTER_FAILURES - 1).await;
        assert_eq!(registry.preferred().await.unwrap().url, PRIMARY);
    }

    #[tokio::test]
    async fn test_success_reinstates_tripped_endpoint() {
        let registry = ProviderRegistry::new(vec![endpoint("only", PRIMARY)]);
        fail(&registry, PRIMARY, TRIP_AFTER_FAILURES).await;
        assert!(registry.preferred().await.is_none());

        registry.report_success(PRIMARY).await;
        assert_eq!(registry.preferred().await.unwrap().url, PRIMARY);
    }

    #[tokio::test]
    async fn test_reports_for_unknown_url_ignored() {
        let registry = primary_and_backup();
        fail(&registry, "http://elsewhere.test", TRIP_AFTER_FAILURES).await;
        assert_eq!(registry.available_count().await, 2);
    }

    #[test]
    fn test_is_provider_fault() {
        assert!(ProviderRegistry::is_provider_fault(429));
        assert!(ProviderRegistry::is_provider_fault(502));
        assert!(!ProviderRegistry::is_provider_fault(200));
        assert!(!ProviderRegistry::is_provider_fault(404));
    }

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity("0x1b4"), Some(436));
        assert_eq!(parse_hex_quantity("0x0"), Some(0));
        assert_eq!(parse_hex_quantity("1b4"), None);
        assert_eq!(parse_hex_quantity("0xzz"), None);
    }
}
