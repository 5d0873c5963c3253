//! Service discovery and selection, per spec §4.2.
//!
//! Explicit construction, no singleton: per spec §9's design note, the
//! source's double-checked-init singleton is unnecessary once the registry
//! is constructed once at program start and threaded through components.

pub mod probe;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{MateError, Result};

/// The kind of service a component provides, per spec's GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Stt,
    Tts,
    Llm,
    WakeWord,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::Stt => "STT",
            Capability::Tts => "TTS",
            Capability::Llm => "LLM",
            Capability::WakeWord => "WAKEWORD",
        };
        write!(f, "{s}")
    }
}

/// One entry of the YAML service manifest, per spec §6. `base_class` names
/// the adapter shape; everything else is adapter-specific or passed
/// through verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDef {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub base_class: String,
    pub endpoint: Option<String>,
    pub ollama_model: Option<String>,
    pub voice: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(rename = "LLM", default)]
    llm: Vec<ServiceDef>,
    #[serde(rename = "STT", default)]
    stt: Vec<ServiceDef>,
    #[serde(rename = "TTS", default)]
    tts: Vec<ServiceDef>,
}

/// `(name, capability, priority, instance, available, endpoint)`, per
/// spec §3. `instance` is the manifest definition; concrete adapters are
/// constructed from it in `services::`.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub name: String,
    pub capability: Capability,
    pub priority: i32,
    pub def: ServiceDef,
    pub available: bool,
    /// Insertion order, used as the tie-break per spec §3.
    pub order: usize,
}

/// Service discovery and selection fabric, per spec §4.2.
pub struct Registry {
    records: Mutex<Vec<ServiceRecord>>,
    client: reqwest::Client,
    probe_interval: Duration,
    probe_timeout: Duration,
    cancel: CancellationToken,
    scanner: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Registry {
    /// Load the YAML manifest at `config.manifest_path` and build the
    /// initial (unprobed, `available = false`) record set.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::Config`] if the manifest cannot be read or
    /// parsed.
    pub fn load(config: &RegistryConfig) -> Result<Self> {
        let text = std::fs::read_to_string(&config.manifest_path).map_err(|e| {
            MateError::Config(format!("reading manifest {}: {e}", config.manifest_path))
        })?;
        let manifest: Manifest = serde_yaml::from_str(&text)
            .map_err(|e| MateError::Config(format!("parsing manifest: {e}")))?;

        let mut records = Vec::new();
        let mut order = 0;
        for def in manifest.llm {
            records.push(new_record(Capability::Llm, def, order));
            order += 1;
        }
        for def in manifest.stt {
            records.push(new_record(Capability::Stt, def, order));
            order += 1;
        }
        for def in manifest.tts {
            records.push(new_record(Capability::Tts, def, order));
            order += 1;
        }

        Ok(Self {
            records: Mutex::new(records),
            client: reqwest::Client::new(),
            probe_interval: Duration::from_secs(config.probe_interval_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            cancel: CancellationToken::new(),
            scanner: AsyncMutex::new(None),
        })
    }

    /// Run one synchronous probe round, then launch the background
    /// scanner that re-probes every `probe_interval`, per spec §4.2.
    pub async fn start(self: &std::sync::Arc<Self>) {
        self.probe_round().await;

        let registry = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = registry.cancel.cancelled() => break,
                    () = tokio::time::sleep(registry.probe_interval) => {
                        registry.probe_round().await;
                    }
                }
            }
        });
        *self.scanner.lock().await = Some(handle);
    }

    /// Signal the scanner and await its exit, per spec §4.2.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.scanner.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Run every probe concurrently, then apply results with one atomic
    /// write per service, per spec §4.2/§5.
    async fn probe_round(&self) {
        let defs: Vec<(usize, Capability, Option<String>, Option<String>)> = {
            let records = self.records.lock().expect("registry lock poisoned");
            records
                .iter()
                .map(|r| {
                    (
                        r.order,
                        r.capability,
                        r.def.endpoint.clone(),
                        r.def.ollama_model.clone(),
                    )
                })
                .collect()
        };

        let probes = defs.into_iter().map(|(order, capability, endpoint, model)| {
            let client = self.client.clone();
            let timeout_secs = self.probe_timeout.as_secs();
            async move {
                let available = probe::probe_capability(
                    &client,
                    capability,
                    endpoint.as_deref(),
                    model.as_deref(),
                    timeout_secs,
                )
                .await;
                (order, available)
            }
        });

        let results = futures_util::future::join_all(probes).await;

        let mut records = self.records.lock().expect("registry lock poisoned");
        for (order, available) in results {
            if let Some(record) = records.iter_mut().find(|r| r.order == order) {
                if record.available != available {
                    info!(
                        "service '{}' ({}) availability changed: {} -> {}",
                        record.name, record.capability, record.available, available
                    );
                }
                record.available = available;
            }
        }
    }

    /// Return the highest-priority available record for `capability`,
    /// ties broken by insertion order, per spec §4.2/§8 property 8.
    ///
    /// # Errors
    ///
    /// Returns [`MateError::NoProvider`] if none is available; callers
    /// should treat this as fatal per spec §4.2/§7 and print
    /// [`Registry::status_table`] before terminating.
    pub fn best(&self, capability: Capability) -> Result<ServiceRecord> {
        let records = self.records.lock().expect("registry lock poisoned");
        records
            .iter()
            .filter(|r| r.capability == capability && r.available)
            .max_by_key(|r| (r.priority, std::cmp::Reverse(r.order)))
            .cloned()
            .ok_or_else(|| {
                warn!("no available provider for {capability}");
                MateError::NoProvider(capability.to_string())
            })
    }

    /// Render the current status table, grouped by capability, for the
    /// fatal-no-provider diagnostic in spec §4.2/§7.
    #[must_use]
    pub fn status_table(&self) -> String {
        let records = self.records.lock().expect("registry lock poisoned");
        let mut by_capability: BTreeMap<String, Vec<&ServiceRecord>> = BTreeMap::new();
        for record in records.iter() {
            by_capability
                .entry(record.capability.to_string())
                .or_default()
                .push(record);
        }

        let mut out = String::from("Service status:\n");
        for (capability, mut group) in by_capability {
            group.sort_by_key(|r| std::cmp::Reverse(r.priority));
            out.push_str(&format!("  {capability}:\n"));
            for record in group {
                out.push_str(&format!(
                    "    - {} (priority {}): {}\n",
                    record.name,
                    record.priority,
                    if record.available { "available" } else { "unavailable" }
                ));
            }
        }
        out.push_str("No available provider for a required capability. Bring up local services and retry.\n");
        out
    }
}

fn new_record(capability: Capability, def: ServiceDef, order: usize) -> ServiceRecord {
    debug!("registering {capability} service '{}' (priority {})", def.name, def.priority);
    ServiceRecord {
        name: def.name.clone(),
        capability,
        priority: def.priority,
        def,
        available: false,
        order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manifest_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(contents.as_bytes()).expect("write manifest");
        f
    }

    fn registry_with(contents: &str) -> Registry {
        let file = manifest_file(contents);
        let config = RegistryConfig {
            manifest_path: file.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        Registry::load(&config).expect("manifest should parse")
    }

    #[test]
    fn loads_services_from_each_top_level_key() {
        let registry = registry_with(
            r#"
LLM:
  - name: primary-llm
    priority: 100
    base_class: ollama
    endpoint: http://localhost:11434
    ollama_model: llama3
STT:
  - name: primary-stt
    priority: 100
    base_class: whisper
    endpoint: ws://localhost:9000
TTS:
  - name: primary-tts
    priority: 100
    base_class: openedai
    endpoint: http://localhost:8001
    voice: alloy
"#,
        );
        let records = registry.records.lock().unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn best_selects_highest_priority_available() {
        let registry = registry_with(
            r#"
LLM:
  - name: low
    priority: 0
    endpoint: http://a
  - name: high
    priority: 100
    endpoint: http://b
"#,
        );
        {
            let mut records = registry.records.lock().unwrap();
            for r in records.iter_mut() {
                r.available = true;
            }
        }
        let best = registry.best(Capability::Llm).expect("should find a record");
        assert_eq!(best.name, "high");
    }

    #[test]
    fn best_breaks_ties_by_insertion_order() {
        let registry = registry_with(
            r#"
LLM:
  - name: first
    priority: 50
    endpoint: http://a
  - name: second
    priority: 50
    endpoint: http://b
"#,
        );
        {
            let mut records = registry.records.lock().unwrap();
            for r in records.iter_mut() {
                r.available = true;
            }
        }
        let best = registry.best(Capability::Llm).expect("should find a record");
        assert_eq!(best.name, "first");
    }

    #[test]
    fn best_fails_when_nothing_available() {
        let registry = registry_with(
            r#"
LLM:
  - name: only
    priority: 0
    endpoint: http://a
"#,
        );
        let err = registry.best(Capability::Llm).unwrap_err();
        assert!(matches!(err, MateError::NoProvider(_)));
    }

    #[test]
    fn status_table_mentions_every_service() {
        let registry = registry_with(
            r#"
LLM:
  - name: alpha
    priority: 0
    endpoint: http://a
"#,
        );
        let table = registry.status_table();
        assert!(table.contains("alpha"));
        assert!(table.contains("LLM"));
    }
}
