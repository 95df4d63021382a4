// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::constants::IMAGE_KEY_BACKUP_RESTORE;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use warden_common::{WardenError, WardenResult};

const DEFAULT_IMAGE_VECTOR: &str = include_str!("../resources/images.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repository: Option<String>,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ImageSource {
    /// `repository:tag`, or just the repository when no tag is pinned.
    pub fn full_name(&self) -> String {
        match self.tag.as_deref().filter(|t| !t.is_empty()) {
            Some(tag) => format!("{}:{}", self.repository, tag),
            None => self.repository.clone(),
        }
    }
}

/// Images the controller is allowed to run, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImageVector {
    #[serde(default)]
    pub images: Vec<ImageSource>,
}

impl ImageVector {
    pub fn from_str(s: &str) -> WardenResult<Self> {
        let vector: ImageVector = serde_yaml::from_str(s)?;
        Ok(vector)
    }

    pub fn from_file(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        debug!("load image vector from {}", path.display());
        Self::from_str(&content)
    }

    /// The image vector shipped with the controller.
    pub fn embedded() -> WardenResult<Self> {
        Self::from_str(DEFAULT_IMAGE_VECTOR)
    }

    /// Load from `path` when set, otherwise fall back to the embedded vector.
    pub fn load(path: Option<&str>) -> WardenResult<Self> {
        match path.filter(|p| !p.is_empty()) {
            Some(p) => Self::from_file(p),
            None => Self::embedded(),
        }
    }

    pub fn find_image(&self, name: &str) -> WardenResult<&ImageSource> {
        self.images
            .iter()
            .find(|x| x.name == name)
            .ok_or_else(|| WardenError::ImageNotFound(name.to_string()))
    }

    pub fn backup_restore_image(&self) -> WardenResult<String> {
        self.find_image(IMAGE_KEY_BACKUP_RESTORE)
            .map(|x| x.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded() {
        let vector = ImageVector::embedded().unwrap();
        let image = vector.backup_restore_image().unwrap();
        assert!(image.starts_with("ghcr.io/kv-warden/backup-restore:"));
    }

    #[test]
    fn test_find_image() {
        let yaml = r#"
images:
  - name: etcd-backup-restore
    repository: registry.local/backup
  - name: other
    repository: registry.local/other
    tag: "1.0"
"#;
        let vector = ImageVector::from_str(yaml).unwrap();
        assert_eq!(
            vector.backup_restore_image().unwrap(),
            "registry.local/backup"
        );
        assert_eq!(
            vector.find_image("other").unwrap().full_name(),
            "registry.local/other:1.0"
        );

        let err = vector.find_image("missing").unwrap_err();
        assert!(matches!(err, WardenError::ImageNotFound(ref n) if n == "missing"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ImageVector::load(Some("/nonexistent/images.yaml")).unwrap_err();
        assert!(matches!(err, WardenError::Io(_)));
        assert!(ImageVector::load(None).is_ok());
    }
}
