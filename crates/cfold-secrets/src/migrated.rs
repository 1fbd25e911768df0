//! Folders already upgraded to authenticated metadata
//!
//! Persisted as a JSON array of integers. Membership is what turns an empty
//! checksum from "old metadata" into a downgrade.

use std::collections::BTreeSet;

use cfold_core::{CfoldError, CfoldResult, FolderId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigratedFolderSet {
    ids: BTreeSet<FolderId>,
}

impl MigratedFolderSet {
    pub fn from_json(json: &str) -> CfoldResult<Self> {
        let ids: Vec<FolderId> = serde_json::from_str(json)
            .map_err(|e| CfoldError::Format(format!("migrated folder ids: {e}")))?;
        Ok(Self {
            ids: ids.into_iter().collect(),
        })
    }

    pub fn to_json(&self) -> String {
        let ids: Vec<FolderId> = self.ids.iter().copied().collect();
        serde_json::Value::from(ids).to_string()
    }

    pub fn contains(&self, folder_id: FolderId) -> bool {
        self.ids.contains(&folder_id)
    }

    /// Returns false if the folder was already present.
    pub fn insert(&mut self, folder_id: FolderId) -> bool {
        self.ids.insert(folder_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
