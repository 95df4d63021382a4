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

use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use warden_common::state::{
    LABEL_APP_NAME_KEY, LABEL_MANAGED_BY_KEY, LABEL_MANAGED_BY_VALUE, LABEL_PART_OF_KEY,
};
use warden_common::utils::CommonUtils;
use warden_common::{WardenError, WardenResult};

pub const KIND_ETCD: &str = "Etcd";
pub const ETCD_API_VERSION: &str = "warden.io/v1alpha1";

/// The parts of a store cluster definition the samples need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdSample {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub replicas: u32,
}

impl EtcdSample {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, replicas: u32) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: format!("uid-{}", replicas),
            replicas,
        }
    }

    pub fn default_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                LABEL_MANAGED_BY_KEY.to_string(),
                LABEL_MANAGED_BY_VALUE.to_string(),
            ),
            (LABEL_PART_OF_KEY.to_string(), self.name.clone()),
        ])
    }

    /// `<name>-0` .. `<name>-(replicas - 1)`
    pub fn member_lease_names(&self) -> Vec<String> {
        (0..self.replicas)
            .map(|i| format!("{}-{}", self.name, i))
            .collect()
    }

    pub fn as_owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: ETCD_API_VERSION.to_string(),
            kind: KIND_ETCD.to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Member leases for the first `num_leases` members of `etcd`.
pub fn new_member_leases(
    etcd: &EtcdSample,
    num_leases: usize,
    additional_labels: Option<&BTreeMap<String, String>>,
) -> WardenResult<Vec<Lease>> {
    if num_leases > etcd.replicas as usize {
        return Err(WardenError::InvalidSpec(format!(
            "number of requested leases {} is greater than the etcd replicas {}",
            num_leases, etcd.replicas
        )));
    }

    let default_labels = etcd.default_labels();
    let leases = etcd
        .member_lease_names()
        .into_iter()
        .take(num_leases)
        .map(|name| {
            let mut labels = CommonUtils::merge_maps(&[Some(&default_labels), additional_labels])
                .unwrap_or_default();
            labels.insert(LABEL_APP_NAME_KEY.to_string(), name.clone());
            Lease {
                metadata: ObjectMeta {
                    name: Some(name),
                    namespace: Some(etcd.namespace.clone()),
                    labels: Some(labels),
                    owner_references: Some(vec![etcd.as_owner_reference()]),
                    ..Default::default()
                },
                spec: None,
            }
        })
        .collect();

    Ok(leases)
}
