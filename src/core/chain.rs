//! Ordered provider fallback chains.
//!
//! A chain tries its providers strictly in order. The first provider that
//! succeeds wins and its cost is recorded in the spend ledger; providers after
//! it are never touched. Providers missing a credential (or otherwise not
//! ready) are skipped without being invoked and without cost.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::Backend;
use crate::config::Credentials;
use crate::domain::{Capability, CapabilityRequest, Pricing, ProviderKind, ProviderOutput};
use crate::error::{EngineError, ProviderFailure};

use super::ledger::SpendLedger;

/// Default per-call timeout
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);

/// One entry in a provider chain
#[derive(Clone)]
pub struct ProviderSpec {
    /// Unique name within the chain
    pub name: String,

    /// Ledger operation the provider is priced and recorded under
    pub operation: String,

    pub pricing: Pricing,

    /// Credential variable; the provider is skipped when it is unset
    pub credential: Option<String>,

    /// Per-call timeout; expiry counts as a provider failure
    pub timeout: Duration,

    /// Provider-specific defaults, overridden by the request's own config
    pub config: Map<String, Value>,

    backend: Arc<dyn Backend>,
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("name", &self.name)
            .field("operation", &self.operation)
            .field("credential", &self.credential)
            .field("timeout", &self.timeout)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl ProviderSpec {
    /// A per-call provider with no credential
    pub fn new(
        name: impl Into<String>,
        operation: impl Into<String>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
            pricing: Pricing::PerCall,
            credential: None,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            config: Map::new(),
            backend,
        }
    }

    /// A spec carrying a built-in provider's name, pricing and credential
    pub fn for_kind(kind: ProviderKind, backend: Arc<dyn Backend>) -> Self {
        let spec = Self::new(kind.name(), kind.operation(), backend).with_pricing(kind.pricing());
        match kind.credential() {
            Some(var) => spec.with_credential(var),
            None => spec,
        }
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_credential(mut self, var: impl Into<String>) -> Self {
        self.credential = Some(var.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Would-be cost of handling this request
    pub fn estimate(&self, ledger: &SpendLedger, request: &CapabilityRequest) -> f64 {
        let units = self.pricing.units(request.prompt().chars().count());
        ledger.estimate(&self.operation, units)
    }

    /// Why the provider cannot be tried right now, if it cannot
    fn unavailable_reason(&self, credentials: &Credentials) -> Option<String> {
        if let Some(ref var) = self.credential {
            if credentials.get(var).is_none() {
                return Some(format!("missing {}", var));
            }
        }
        if !self.backend.is_ready() {
            return Some("not configured".to_string());
        }
        None
    }

    /// The request with provider defaults filled in underneath
    fn prepare(&self, request: &CapabilityRequest) -> CapabilityRequest {
        let mut prepared = request.clone();
        for (key, value) in &self.config {
            prepared
                .config
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        prepared
    }
}

/// A provider that produced a result
#[derive(Debug, Clone, Serialize)]
pub struct ChainSuccess {
    pub capability: Capability,

    /// Provider that succeeded
    pub provider: String,

    pub operation: String,

    /// Cost written to the ledger
    pub cost: f64,

    pub output: ProviderOutput,

    /// Providers that failed or were skipped before the winner
    pub failures: Vec<ProviderFailure>,
}

/// Dry-run view of one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedProvider {
    pub name: String,
    pub operation: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub estimated_cost: f64,
}

/// Dry-run view of a whole chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainPlan {
    pub capability: Capability,
    pub providers: Vec<PlannedProvider>,

    /// Provider that would be tried first
    pub first_available: Option<String>,

    /// Cost of the first available provider (0 when none is available)
    pub estimated_cost: f64,
}

/// Ordered, name-unique list of providers for one capability
#[derive(Debug, Clone)]
pub struct ProviderChain {
    capability: Capability,
    providers: Vec<ProviderSpec>,
}

impl ProviderChain {
    /// Create a chain; provider names must be unique
    pub fn new(capability: Capability, providers: Vec<ProviderSpec>) -> Result<Self, EngineError> {
        let mut seen = HashSet::new();
        for spec in &providers {
            if !seen.insert(spec.name.as_str()) {
                return Err(EngineError::DuplicateProvider {
                    name: spec.name.clone(),
                    capability,
                });
            }
        }

        Ok(Self {
            capability,
            providers,
        })
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn providers(&self) -> &[ProviderSpec] {
        &self.providers
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Single-element chain holding only the named provider
    pub fn pinned(&self, name: &str) -> Result<Self, EngineError> {
        let spec = self
            .providers
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| EngineError::UnknownProvider {
                name: name.to_string(),
                capability: self.capability,
                available: self.names(),
            })?;

        Ok(Self {
            capability: self.capability,
            providers: vec![spec.clone()],
        })
    }

    /// Describe what `invoke` would do without invoking anything
    pub fn plan(
        &self,
        request: &CapabilityRequest,
        ledger: &SpendLedger,
        credentials: &Credentials,
    ) -> ChainPlan {
        let providers: Vec<PlannedProvider> = self
            .providers
            .iter()
            .map(|spec| {
                let reason = spec.unavailable_reason(credentials);
                PlannedProvider {
                    name: spec.name.clone(),
                    operation: spec.operation.clone(),
                    available: reason.is_none(),
                    reason,
                    estimated_cost: spec.estimate(ledger, request),
                }
            })
            .collect();

        let first = providers.iter().find(|p| p.available);

        ChainPlan {
            capability: self.capability,
            first_available: first.map(|p| p.name.clone()),
            estimated_cost: first.map(|p| p.estimated_cost).unwrap_or(0.0),
            providers,
        }
    }

    /// Try each provider in order until one succeeds
    #[instrument(skip(self, request, ledger, credentials), fields(capability = %self.capability))]
    pub async fn invoke(
        &self,
        request: &CapabilityRequest,
        ledger: &SpendLedger,
        credentials: &Credentials,
    ) -> Result<ChainSuccess, EngineError> {
        let mut failures = Vec::new();

        for spec in &self.providers {
            if let Some(reason) = spec.unavailable_reason(credentials) {
                warn!(provider = %spec.name, %reason, "Skipping provider");
                failures.push(ProviderFailure::skipped(&spec.name, reason));
                continue;
            }

            let prepared = spec.prepare(request);
            let secret = spec.credential.as_deref().and_then(|var| credentials.get(var));
            debug!(provider = %spec.name, "Invoking provider");

            match timeout(spec.timeout, spec.backend.invoke(&prepared, secret)).await {
                Ok(Ok(output)) => {
                    let cost = output
                        .cost
                        .filter(|c| c.is_finite() && *c >= 0.0)
                        .unwrap_or_else(|| spec.estimate(ledger, &prepared));

                    ledger
                        .record(&spec.operation, cost, prepared.summary())
                        .await?;

                    info!(provider = %spec.name, cost, "Provider succeeded");
                    return Ok(ChainSuccess {
                        capability: self.capability,
                        provider: spec.name.clone(),
                        operation: spec.operation.clone(),
                        cost,
                        output,
                        failures,
                    });
                }
                Ok(Err(e)) => {
                    warn!(provider = %spec.name, error = %e, "Provider failed");
                    failures.push(ProviderFailure::failed(&spec.name, format!("{:#}", e)));
                }
                Err(_) => {
                    warn!(provider = %spec.name, timeout = ?spec.timeout, "Provider timed out");
                    failures.push(ProviderFailure::failed(
                        &spec.name,
                        format!("timed out after {:?}", spec.timeout),
                    ));
                }
            }
        }

        error!(attempts = failures.len(), "All providers failed");
        Err(EngineError::ChainExhausted {
            capability: self.capability,
            failures,
        })
    }
}

/// One chain per capability
#[derive(Debug, Clone, Default)]
pub struct ChainSet {
    chains: HashMap<Capability, ProviderChain>,
}

impl ChainSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the chain for its capability
    pub fn insert(&mut self, chain: ProviderChain) {
        self.chains.insert(chain.capability(), chain);
    }

    pub fn with(mut self, chain: ProviderChain) -> Self {
        self.insert(chain);
        self
    }

    pub fn get(&self, capability: Capability) -> Option<&ProviderChain> {
        self.chains.get(&capability)
    }

    /// The capability's chain, or an empty one when none is registered
    pub fn chain_for(&self, capability: Capability) -> ProviderChain {
        self.get(capability).cloned().unwrap_or(ProviderChain {
            capability,
            providers: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Fixed(&'static str);

    #[async_trait]
    impl Backend for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn invoke(&self, request: &CapabilityRequest, _secret: Option<&str>) -> Result<ProviderOutput> {
            Ok(ProviderOutput::text(format!("{}:{}", self.0, request.prompt()))
                .with_raw(Value::Object(request.config.clone())))
        }
    }

    fn spec(name: &'static str) -> ProviderSpec {
        ProviderSpec::new(name, "pexels", Arc::new(Fixed(name)))
    }

    async fn ledger() -> (SpendLedger, TempDir) {
        let temp = TempDir::new().unwrap();
        let ledger = SpendLedger::open(temp.path().join("cost_log.jsonl")).await.unwrap();
        (ledger, temp)
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ProviderChain::new(Capability::Image, vec![spec("a"), spec("a")]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateProvider { .. }));
    }

    #[test]
    fn test_pinned_unknown_provider_lists_alternatives() {
        let chain = ProviderChain::new(Capability::Image, vec![spec("a"), spec("b")]).unwrap();
        assert_eq!(chain.pinned("b").unwrap().names(), ["b"]);

        match chain.pinned("z").unwrap_err() {
            EngineError::UnknownProvider { available, .. } => assert_eq!(available, ["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_credential_is_skipped() {
        let (ledger, _temp) = ledger().await;
        let chain = ProviderChain::new(
            Capability::Image,
            vec![spec("keyed").with_credential("PEXELS_API_KEY"), spec("free")],
        )
        .unwrap();

        let request = CapabilityRequest::new(Capability::Image, "cafe");
        let success = chain
            .invoke(&request, &ledger, &Credentials::default())
            .await
            .unwrap();

        assert_eq!(success.provider, "free");
        assert_eq!(success.failures.len(), 1);
        assert!(success.failures[0].skipped);
        assert_eq!(success.failures[0].reason, "missing PEXELS_API_KEY");
    }

    #[tokio::test]
    async fn test_provider_config_is_a_default() {
        let (ledger, _temp) = ledger().await;
        let chain = ProviderChain::new(
            Capability::Image,
            vec![spec("a").with_config("quality", "hd").with_config("style", "flat")],
        )
        .unwrap();

        let request = CapabilityRequest::new(Capability::Image, "cafe").with_config("style", "hero");
        let success = chain
            .invoke(&request, &ledger, &Credentials::default())
            .await
            .unwrap();

        assert_eq!(success.output.raw["quality"], "hd");
        assert_eq!(success.output.raw["style"], "hero");
    }

    #[tokio::test]
    async fn test_empty_chain_plan_is_truthful() {
        let (ledger, _temp) = ledger().await;
        let chain = ProviderChain::new(Capability::Video, Vec::new()).unwrap();
        let request = CapabilityRequest::new(Capability::Video, "waves");

        let plan = chain.plan(&request, &ledger, &Credentials::default());
        assert!(plan.providers.is_empty());
        assert_eq!(plan.first_available, None);
        assert_eq!(plan.estimated_cost, 0.0);

        let err = chain
            .invoke(&request, &ledger, &Credentials::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no providers configured"));
    }

    #[test]
    fn test_chain_set_falls_back_to_empty_chain() {
        let set = ChainSet::new();
        let chain = set.chain_for(Capability::Montage);
        assert!(chain.is_empty());
        assert_eq!(chain.capability(), Capability::Montage);
    }
}
