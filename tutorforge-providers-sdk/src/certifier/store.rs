//! Certification persistence.
//!
//! One JSON document per certified provider under a configured directory,
//! fronted by an in-memory index. Lookups of expired certifications
//! return "not certified"; the document stays on disk for audit until the
//! next save overwrites it.

use super::Certification;
use crate::error::CertificationError;
use chrono::Utc;
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory-backed certification store.
pub struct CertificationStore {
    dir: PathBuf,
    index: DashMap<String, Certification>,
}

impl CertificationStore {
    /// Open (and create if missing) a store rooted at `dir`, loading any
    /// existing certification documents into the index.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CertificationError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let index = DashMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_certification(&path) {
                Ok(certification) => {
                    index.insert(certification.provider.clone(), certification);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable certification document");
                }
            }
        }

        Ok(Self { dir, index })
    }

    /// Persist a certification, replacing any previous one for the same
    /// provider.
    pub fn save(&self, certification: &Certification) -> Result<(), CertificationError> {
        let path = self.document_path(&certification.provider);
        let json = serde_json::to_string_pretty(certification)?;
        fs::write(&path, json)?;
        self.index
            .insert(certification.provider.clone(), certification.clone());
        Ok(())
    }

    /// The current certification for a provider, or `None` when absent or
    /// expired.
    pub fn lookup(&self, provider: &str) -> Option<Certification> {
        let certification = self.index.get(provider)?;
        if certification.is_current(Utc::now()) {
            Some(certification.clone())
        } else {
            None
        }
    }

    /// Like [`CertificationStore::lookup`], but an absent or expired
    /// certification is an error. For callers that require a certified
    /// provider.
    pub fn require(&self, provider: &str) -> Result<Certification, CertificationError> {
        self.lookup(provider)
            .ok_or_else(|| CertificationError::Expired {
                provider: provider.to_string(),
            })
    }

    /// Providers holding a current certification.
    pub fn certified_providers(&self) -> Vec<String> {
        let now = Utc::now();
        self.index
            .iter()
            .filter(|entry| entry.value().is_current(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove a provider's certification document and index entry.
    pub fn remove(&self, provider: &str) -> Result<(), CertificationError> {
        self.index.remove(provider);
        let path = self.document_path(provider);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn document_path(&self, provider: &str) -> PathBuf {
        // Keep file names tame regardless of the provider name
        let safe: String = provider
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

fn load_certification(path: &Path) -> Result<Certification, CertificationError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certifier::{CertificationTier, SlaMetrics, TestCategory};
    use std::collections::BTreeMap;

    fn certification(provider: &str, expires_in_secs: i64) -> Certification {
        let issued_at = Utc::now();
        Certification {
            provider: provider.to_string(),
            tier: CertificationTier::Silver,
            overall_score: 91.25,
            category_scores: BTreeMap::from([
                (TestCategory::Accuracy, 92.0),
                (TestCategory::Latency, 97.0),
                (TestCategory::Reliability, 96.0),
            ]),
            sla: SlaMetrics {
                uptime_pct: 100.0,
                avg_response_time_ms: 2500.0,
                error_rate: 0.0,
                rate_limit_violations: 0,
                service_interruptions: 0,
            },
            issued_at,
            expires_at: issued_at + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn save_then_lookup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificationStore::open(dir.path()).unwrap();

        let cert = certification("claude", 3600);
        store.save(&cert).unwrap();

        let loaded = store.lookup("claude").unwrap();
        assert_eq!(loaded, cert);
    }

    #[test]
    fn serialization_is_byte_stable() {
        let cert = certification("claude", 3600);
        let first = serde_json::to_string_pretty(&cert).unwrap();
        let reparsed: Certification = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string_pretty(&reparsed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn expired_certification_reads_as_not_certified() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificationStore::open(dir.path()).unwrap();

        store.save(&certification("stale", -10)).unwrap();
        assert!(store.lookup("stale").is_none());
        assert!(matches!(
            store.require("stale"),
            Err(CertificationError::Expired { .. })
        ));
        assert!(store.certified_providers().is_empty());

        // The document itself stays on disk for audit
        assert!(dir.path().join("stale.json").exists());
    }

    #[test]
    fn reopen_reloads_documents() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CertificationStore::open(dir.path()).unwrap();
            store.save(&certification("claude", 3600)).unwrap();
            store.save(&certification("gpt4", 3600)).unwrap();
        }

        let reopened = CertificationStore::open(dir.path()).unwrap();
        let mut providers = reopened.certified_providers();
        providers.sort();
        assert_eq!(providers, vec!["claude", "gpt4"]);
    }

    #[test]
    fn remove_deletes_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificationStore::open(dir.path()).unwrap();
        store.save(&certification("claude", 3600)).unwrap();
        store.remove("claude").unwrap();
        assert!(store.lookup("claude").is_none());
        assert!(!dir.path().join("claude.json").exists());
    }
}
