//! Shared test helpers: a scripted backend that counts its invocations.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use capflow::adapters::Backend;
use capflow::core::{ProviderSpec, SpendLedger};
use capflow::domain::{CapabilityRequest, ProviderOutput};

/// What a scripted backend does when invoked
#[derive(Clone)]
pub enum Script {
    /// Return the prompt, prefixed with the backend name
    Echo,
    /// Return fixed text with a reported cost
    Text(&'static str, f64),
    /// Fail with a reason
    Fail(&'static str),
    /// Sleep longer than any sensible timeout
    Hang(Duration),
}

pub struct ScriptedBackend {
    name: String,
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(name: &str, script: Script) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(Self {
            name: name.to_string(),
            script,
            calls: Arc::clone(&calls),
        });
        (backend, calls)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &CapabilityRequest, _secret: Option<&str>) -> Result<ProviderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Echo => Ok(ProviderOutput::text(format!("{}: {}", self.name, request.prompt()))),
            Script::Text(text, cost) => Ok(ProviderOutput::text(*text).with_cost(*cost)),
            Script::Fail(reason) => anyhow::bail!("{}", reason),
            Script::Hang(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(ProviderOutput::text("too late"))
            }
        }
    }
}

/// Provider spec around a scripted backend, plus its call counter
pub fn scripted(name: &str, operation: &str, script: Script) -> (ProviderSpec, Arc<AtomicUsize>) {
    let (backend, calls) = ScriptedBackend::new(name, script);
    (ProviderSpec::new(name, operation, backend), calls)
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Fresh ledger in a temporary directory
pub async fn temp_ledger() -> (SpendLedger, TempDir) {
    let temp = TempDir::new().unwrap();
    let ledger = SpendLedger::open(temp.path().join("cost_log.jsonl"))
        .await
        .unwrap();
    (ledger, temp)
}
