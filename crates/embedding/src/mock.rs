//! Scriptable backend and factory for tests (enable the `mock` feature).

use archrule_common::{ArchRuleError, BackendKind, EmbeddingConfig, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::EmbeddingBackend;
use crate::factory::BackendFactory;
use crate::text::normalize_text;

/// In-memory backend with configurable failures
///
/// Texts without a scripted vector get a deterministic non-zero vector
/// derived from their bytes.
#[derive(Debug)]
pub struct MockBackend {
    kind: BackendKind,
    dimensions: usize,
    available: bool,
    native_batch: bool,
    max_batch_size: usize,
    batch_fails: bool,
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    probe_delay: Option<Duration>,
    probes: AtomicUsize,
    batch_calls: AtomicUsize,
    item_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(kind: BackendKind, dimensions: usize) -> Self {
        Self {
            kind,
            dimensions,
            available: true,
            native_batch: false,
            max_batch_size: 1,
            batch_fails: false,
            vectors: HashMap::new(),
            failing: HashSet::new(),
            delay: None,
            probe_delay: None,
            probes: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            item_calls: AtomicUsize::new(0),
        }
    }

    /// Probe fails
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Accept native batches of up to `max_batch_size` texts
    pub fn with_native_batch(mut self, max_batch_size: usize) -> Self {
        self.native_batch = true;
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    /// Every native batch call fails as a whole
    pub fn failing_batches(mut self) -> Self {
        self.batch_fails = true;
        self
    }

    /// Single calls for this text fail (batches containing it fail too)
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(normalize_text(text));
        self
    }

    /// Fixed vector for a text
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(normalize_text(text), vector);
        self
    }

    /// Sleep before answering every embed call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep inside the probe
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn item_calls(&self) -> usize {
        self.item_calls.load(Ordering::SeqCst)
    }

    /// The vector `embed` returns for `text` when it succeeds
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let text = normalize_text(text);
        if let Some(v) = self.vectors.get(&text) {
            return v.clone();
        }
        let seed: u32 = text.bytes().map(u32::from).sum();
        (0..self.dimensions)
            .map(|i| ((seed + i as u32 * 31) % 97) as f32 / 97.0 + 0.01)
            .collect()
    }

    fn check(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.contains(&normalize_text(text)) {
            return Err(ArchRuleError::embedding(format!("scripted failure for '{}'", text)));
        }
        Ok(self.vector_for(text))
    }
}

#[async_trait]
impl EmbeddingBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn probe(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
        if self.available {
            Ok(())
        } else {
            Err(ArchRuleError::backend_unavailable(format!("{} mock is offline", self.kind)))
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.check(text)
    }

    fn supports_batch(&self) -> bool {
        self.native_batch
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.native_batch || self.batch_fails {
            return Err(ArchRuleError::batch_embedding("scripted batch failure"));
        }
        texts
            .iter()
            .map(|t| self.check(t))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| ArchRuleError::batch_embedding(e.to_string()))
    }
}

/// Factory handing out pre-built mock backends
#[derive(Debug, Default)]
pub struct MockFactory {
    backends: HashMap<BackendKind, Arc<MockBackend>>,
    creations: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: Arc<MockBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    /// Number of `create` calls so far
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }
}

impl BackendFactory for MockFactory {
    fn create(&self, kind: BackendKind, _config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
        self.creations.fetch_add(1, Ordering::SeqCst);
        self.backends
            .get(&kind)
            .cloned()
            .map(|b| b as Arc<dyn EmbeddingBackend>)
            .ok_or_else(|| ArchRuleError::backend_unavailable(format!("no {} client configured", kind)))
    }
}
