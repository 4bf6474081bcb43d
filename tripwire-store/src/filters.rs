//! Position filter document store.
//!
//! A single JSON file per profile. A missing file means "copy-trade off".

use std::path::{Path, PathBuf};
use tracing::info;

use tripwire_domain::PositionFilter;

use crate::error::StoreResult;
use crate::rules::write_json;

pub struct FilterStore {
    path: PathBuf,
}

impl FilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the filter; the disabled default when absent.
    pub async fn load(&self) -> StoreResult<PositionFilter> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(PositionFilter::default());
        }

        let raw = tokio::fs::read_to_string(&self.path).await?;
        let filter: PositionFilter = serde_json::from_str(&raw)?;
        filter.validate()?;
        Ok(filter)
    }

    /// Validate and persist.
    pub async fn save(&self, filter: &PositionFilter) -> StoreResult<()> {
        filter.validate()?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_json(&self.path, filter).await?;
        info!(path = %self.path.display(), enabled = filter.enabled, "Position filter saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_missing_file_is_disabled_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilterStore::new(dir.path().join("filter.json"));

        let filter = store.load().await.unwrap();
        assert!(!filter.enabled);
        assert_eq!(filter.scale_factor, dec!(1));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilterStore::new(dir.path().join("profile").join("filter.json"));

        let filter = PositionFilter {
            enabled: true,
            underlyings: vec!["SPY".to_string()],
            min_delta: Some(0.2),
            max_delta: Some(0.6),
            scale_factor: dec!(0.5),
            ..PositionFilter::default()
        };
        store.save(&filter).await.unwrap();

        assert_eq!(store.load().await.unwrap(), filter);
    }

    #[tokio::test]
    async fn test_invalid_filter_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilterStore::new(dir.path().join("filter.json"));
        tokio::fs::write(store.path(), r#"{ "enabled": true, "scale_factor": 0 }"#)
            .await
            .unwrap();

        assert!(matches!(store.load().await, Err(StoreError::Domain(_))));
    }
}
