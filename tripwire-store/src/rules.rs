//! Directory-backed rule store.
//!
//! One JSON document per file. On load every document is normalized
//! (id, cooldown floor, version) and, if that changed anything, written
//! back, so the next load reads exactly what the engine runs. Documents
//! that fail to parse or validate are reported and left out of the
//! active set; they never stop the others from loading.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use tripwire_domain::{Rule, RuleStatus};

use crate::error::{StoreError, StoreResult};

// =============================================================================
// Repository port
// =============================================================================

/// Storage interface for rule documents.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Load every document, separating valid rules from rejected files.
    async fn load_all(&self) -> StoreResult<LoadReport>;

    /// Normalize, validate and persist a rule. Returns the stored form.
    async fn save(&self, rule: Rule) -> StoreResult<Rule>;

    /// Find a rule by id.
    async fn get(&self, rule_id: &str) -> StoreResult<Option<Rule>>;

    /// Delete a rule document.
    async fn remove(&self, rule_id: &str) -> StoreResult<()>;

    /// Change the status of a stored rule.
    async fn set_status(&self, rule_id: &str, status: RuleStatus) -> StoreResult<Rule>;
}

/// Outcome of a directory load.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Valid rules, ordered by rule id
    pub rules: Vec<Rule>,
    /// Files that were skipped and why
    pub rejected: Vec<RejectedRule>,
}

/// A document excluded from the active set.
#[derive(Debug, Clone)]
pub struct RejectedRule {
    pub path: PathBuf,
    pub reason: String,
}

// =============================================================================
// File store
// =============================================================================

/// Rule documents stored as `<dir>/<rule_id>.json`.
pub struct FileRuleStore {
    dir: PathBuf,
    owner: String,
}

impl FileRuleStore {
    /// `owner` seeds derived rule ids.
    pub fn new(dir: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            owner: owner.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, rule_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", rule_id))
    }

    /// Every `*.json` file in the directory, sorted by name.
    async fn documents(&self) -> StoreResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Parse, normalize (rewriting when defaults were filled) and validate.
    async fn read_document(&self, path: &Path) -> Result<Rule, String> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("read failed: {}", e))?;
        let mut rule: Rule =
            serde_json::from_str(&raw).map_err(|e| format!("parse failed: {}", e))?;

        if rule.normalize(&self.owner) {
            debug!(path = %path.display(), rule_id = %rule.rule_id, "Rule normalized, rewriting");
            write_json(path, &rule)
                .await
                .map_err(|e| format!("rewrite failed: {}", e))?;
        }

        rule.validate().map_err(|e| e.to_string())?;
        Ok(rule)
    }

    /// Locate the file holding `rule_id`, whatever its file name.
    async fn find(&self, rule_id: &str) -> StoreResult<Option<(PathBuf, Rule)>> {
        let direct = self.path_for(rule_id);
        for path in std::iter::once(direct.clone()).chain(self.documents().await?) {
            if !tokio::fs::try_exists(&path).await? {
                continue;
            }
            if let Ok(rule) = self.read_document(&path).await {
                if rule.rule_id == rule_id {
                    return Ok(Some((path, rule)));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RuleRepository for FileRuleStore {
    async fn load_all(&self) -> StoreResult<LoadReport> {
        let mut report = LoadReport::default();
        let mut seen = HashSet::new();

        for path in self.documents().await? {
            match self.read_document(&path).await {
                Ok(rule) if !seen.insert(rule.rule_id.clone()) => {
                    warn!(path = %path.display(), rule_id = %rule.rule_id, "Duplicate rule id, skipped");
                    report.rejected.push(RejectedRule {
                        path,
                        reason: StoreError::duplicate("rule", &rule.rule_id).to_string(),
                    });
                }
                Ok(rule) => report.rules.push(rule),
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "Rule rejected");
                    report.rejected.push(RejectedRule { path, reason });
                }
            }
        }

        report.rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        info!(
            dir = %self.dir.display(),
            loaded = report.rules.len(),
            rejected = report.rejected.len(),
            "Rules loaded"
        );
        Ok(report)
    }

    async fn save(&self, mut rule: Rule) -> StoreResult<Rule> {
        rule.normalize(&self.owner);
        rule.validate()?;

        tokio::fs::create_dir_all(&self.dir).await?;

        // Keep one file per id even when the existing file has another name
        if let Some((existing, _)) = self.find(&rule.rule_id).await? {
            if existing != self.path_for(&rule.rule_id) {
                tokio::fs::remove_file(&existing).await?;
            }
        }

        write_json(&self.path_for(&rule.rule_id), &rule).await?;
        info!(rule_id = %rule.rule_id, name = %rule.name, "Rule saved");
        Ok(rule)
    }

    async fn get(&self, rule_id: &str) -> StoreResult<Option<Rule>> {
        Ok(self.find(rule_id).await?.map(|(_, rule)| rule))
    }

    async fn remove(&self, rule_id: &str) -> StoreResult<()> {
        let (path, _) = self
            .find(rule_id)
            .await?
            .ok_or_else(|| StoreError::not_found("rule", rule_id))?;

        tokio::fs::remove_file(&path).await?;
        info!(%rule_id, "Rule removed");
        Ok(())
    }

    async fn set_status(&self, rule_id: &str, status: RuleStatus) -> StoreResult<Rule> {
        let (path, mut rule) = self
            .find(rule_id)
            .await?
            .ok_or_else(|| StoreError::not_found("rule", rule_id))?;

        rule.status = status;
        write_json(&path, &rule).await?;
        info!(%rule_id, %status, "Rule status changed");
        Ok(rule)
    }
}

/// Write pretty JSON via a temporary file and rename.
pub(crate) async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
