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

// infrastructure provider identifiers
pub const INFRA_AWS: &str = "aws";
pub const INFRA_AZURE: &str = "azure";
pub const INFRA_GCP: &str = "gcp";
pub const INFRA_OPENSTACK: &str = "openstack";
pub const INFRA_ALICLOUD: &str = "alicloud";
pub const INFRA_OPENSHIFT: &str = "openshift";

// credential env vars, one per storage backend
pub const ENV_AWS_APPLICATION_CREDENTIALS: &str = "AWS_APPLICATION_CREDENTIALS";
pub const ENV_AZURE_APPLICATION_CREDENTIALS: &str = "AZURE_APPLICATION_CREDENTIALS";
pub const ENV_GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_OPENSTACK_APPLICATION_CREDENTIALS: &str = "OPENSTACK_APPLICATION_CREDENTIALS";
pub const ENV_ALICLOUD_APPLICATION_CREDENTIALS: &str = "ALICLOUD_APPLICATION_CREDENTIALS";
pub const ENV_OPENSHIFT_APPLICATION_CREDENTIALS: &str = "OPENSHIFT_APPLICATION_CREDENTIALS";

pub const ENV_STORAGE_CONTAINER: &str = "STORAGE_CONTAINER";
pub const ENV_SOURCE_STORAGE_CONTAINER: &str = "SOURCE_STORAGE_CONTAINER";

pub const VOLUME_NAME_PROVIDER_BACKUP_SECRET: &str = "etcd-backup-secret";

// 0640
pub const MODE_OWNER_READ_WRITE_GROUP_READ: i32 = 0o640;

pub const IMAGE_KEY_BACKUP_RESTORE: &str = "etcd-backup-restore";

pub const CONTAINER_NAME_COPY_BACKUPS: &str = "copy-backups";
pub const COPY_COMMAND: &str = "copy";
pub const SNAPSTORE_TEMP_DIR: &str = "/home/nonroot/data/tmp";

pub const RESTART_POLICY_ON_FAILURE: &str = "OnFailure";
pub const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";

// side prefixes: target uses none
pub const SOURCE_FLAG_PREFIX: &str = "source-";
pub const SOURCE_ENV_PREFIX: &str = "SOURCE_";
pub const SOURCE_VOLUME_PREFIX: &str = "source-";
