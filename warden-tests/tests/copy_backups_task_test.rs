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

use k8s_openapi::api::batch::v1::{Job, JobStatus};
use std::collections::BTreeMap;
use warden_common::state::{
    ConditionStatus, ConditionType, CopyBackupsTask, COMPONENT_COPY_BACKUPS_JOB,
    LABEL_APP_NAME_KEY, LABEL_COMPONENT_KEY, LABEL_MANAGED_BY_KEY, LABEL_MANAGED_BY_VALUE,
    LABEL_PART_OF_KEY,
};
use warden_common::WardenResult;
use warden_controller::store::{
    has_finalizer, remove_finalizer, DeletionPropagation, ObjectStore,
    FINALIZER_FOREGROUND_DELETION,
};
use warden_store::StorageProvider;
use warden_tests::{Testing, TEST_NAMESPACE};

fn code_of(provider: &str) -> String {
    StorageProvider::from_infra(Some(provider))
        .unwrap()
        .map(|p| p.code().to_string())
        .unwrap_or_default()
}

fn expected_args(task: &CopyBackupsTask, source: &str, target: &str) -> Vec<String> {
    let spec = &task.spec;
    let mut args = vec![
        "copy".to_string(),
        "--snapstore-temp-directory=/home/nonroot/data/tmp".to_string(),
    ];
    if !target.is_empty() {
        args.push(format!("--storage-provider={}", target));
    }
    if !spec.target_store.prefix.is_empty() {
        args.push(format!("--store-prefix={}", spec.target_store.prefix));
    }
    if let Some(c) = spec.target_store.container() {
        args.push(format!("--store-container={}", c));
    }
    if !source.is_empty() {
        args.push(format!("--source-storage-provider={}", source));
    }
    if !spec.source_store.prefix.is_empty() {
        args.push(format!("--source-store-prefix={}", spec.source_store.prefix));
    }
    if let Some(c) = spec.source_store.container() {
        args.push(format!("--source-store-container={}", c));
    }
    if let Some(age) = spec.max_backup_age.filter(|x| *x != 0) {
        args.push(format!("--max-backup-age={}", age));
    }
    if let Some(max) = spec.max_backups.filter(|x| *x != 0) {
        args.push(format!("--max-backups-to-copy={}", max));
    }
    if let Some(wait) = spec.wait_for_final_snapshot.as_ref().filter(|w| w.enabled) {
        args.push("--wait-for-final-snapshot=true".to_string());
        if wait.timeout.as_deref() == Some("10m") {
            args.push("--wait-for-final-snapshot-timeout=10m0s".to_string());
        }
    }
    args
}

fn expected_provider_env(
    code: &str,
    env_prefix: &str,
    volume_prefix: &str,
) -> Option<(String, String)> {
    let name = match code {
        "S3" => "AWS_APPLICATION_CREDENTIALS",
        "ABS" => "AZURE_APPLICATION_CREDENTIALS",
        "GCS" => "GOOGLE_APPLICATION_CREDENTIALS",
        "Swift" => "OPENSTACK_APPLICATION_CREDENTIALS",
        "OSS" => "ALICLOUD_APPLICATION_CREDENTIALS",
        "OCS" => "OPENSHIFT_APPLICATION_CREDENTIALS",
        _ => return None,
    };
    let value = if code == "GCS" {
        format!("/var/.{}gcp/serviceaccount.json", volume_prefix)
    } else {
        format!("/var/{}etcd-backup", volume_prefix)
    };
    Some((format!("{}{}", env_prefix, name), value))
}

fn check_job(testing: &Testing, task: &CopyBackupsTask, job: &Job) {
    let source = code_of(task.spec.source_store.provider.as_deref().unwrap_or_default());
    let target = code_of(task.spec.target_store.provider.as_deref().unwrap_or_default());

    let job_name = format!("{}-worker", task.name());
    assert_eq!(job.metadata.name.as_deref(), Some(job_name.as_str()));
    assert_eq!(job.metadata.namespace.as_deref(), Some(task.namespace()));

    let expected_labels = BTreeMap::from([
        (
            LABEL_COMPONENT_KEY.to_string(),
            COMPONENT_COPY_BACKUPS_JOB.to_string(),
        ),
        (LABEL_PART_OF_KEY.to_string(), task.name().to_string()),
        (
            LABEL_MANAGED_BY_KEY.to_string(),
            LABEL_MANAGED_BY_VALUE.to_string(),
        ),
        (LABEL_APP_NAME_KEY.to_string(), task.job_name()),
    ]);
    assert_eq!(job.metadata.labels.as_ref(), Some(&expected_labels));

    let owners = job.metadata.owner_references.as_ref().unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].api_version, "warden.io/v1alpha1");
    assert_eq!(owners[0].kind, "CopyBackupsTask");
    assert_eq!(owners[0].name, task.name());
    assert_eq!(owners[0].uid, task.uid());
    assert_eq!(owners[0].controller, Some(true));
    assert_eq!(owners[0].block_owner_deletion, Some(true));

    let template = &job.spec.as_ref().unwrap().template;
    assert_eq!(
        template.metadata.as_ref().unwrap().labels.as_ref(),
        Some(&expected_labels)
    );
    let pod = template.spec.as_ref().unwrap();
    assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
    assert_eq!(pod.containers.len(), 1);

    let container = &pod.containers[0];
    assert_eq!(container.name, "copy-backups");
    assert_eq!(
        container.image.as_deref(),
        Some(testing.backup_restore_image().unwrap().as_str())
    );
    assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
    assert_eq!(
        container.args.as_ref().unwrap(),
        &expected_args(task, &source, &target)
    );

    let env: BTreeMap<String, String> = container
        .env
        .as_ref()
        .unwrap()
        .iter()
        .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
        .collect();
    if let Some(c) = task.spec.target_store.container() {
        assert_eq!(env.get("STORAGE_CONTAINER").map(String::as_str), Some(c));
    }
    if let Some(c) = task.spec.source_store.container() {
        assert_eq!(
            env.get("SOURCE_STORAGE_CONTAINER").map(String::as_str),
            Some(c)
        );
    }
    let mut expected_volumes = 0;
    let sides = [(&target, "", ""), (&source, "SOURCE_", "source-")];
    for (code, env_prefix, volume_prefix) in sides {
        if let Some((name, value)) = expected_provider_env(code, env_prefix, volume_prefix) {
            assert_eq!(env.get(&name), Some(&value), "{}", name);
            expected_volumes += 1;
        }
    }

    let volumes = pod.volumes.as_ref().unwrap();
    let mounts = container.volume_mounts.as_ref().unwrap();
    assert_eq!(volumes.len(), expected_volumes);
    assert_eq!(mounts.len(), expected_volumes);
    if target == "GCS" {
        let volume = volumes.iter().find(|v| v.name == "etcd-backup-secret").unwrap();
        let secret = volume.secret.as_ref().unwrap();
        assert_eq!(
            secret.secret_name.as_deref(),
            task.spec.target_store.secret_name()
        );
        assert_eq!(secret.default_mode, Some(0o640));
        let mount = mounts.iter().find(|m| m.name == "etcd-backup-secret").unwrap();
        assert_eq!(mount.mount_path, "/var/.gcp/");
    }
    if source == "GCS" {
        let mount = mounts
            .iter()
            .find(|m| m.name == "source-etcd-backup-secret")
            .unwrap();
        assert_eq!(mount.mount_path, "/var/.source-gcp/");
    }
}

async fn create_and_delete(
    name: &str,
    source_provider: &str,
    target_provider: &str,
    with_optional_fields: bool,
    job_status: JobStatus,
    use_gc: bool,
) -> WardenResult<()> {
    let testing = Testing::start()?;
    let task = Testing::new_task(
        name,
        TEST_NAMESPACE,
        source_provider,
        target_provider,
        with_optional_fields,
    );

    testing
        .create_secrets(
            TEST_NAMESPACE,
            &[
                task.spec.source_store.secret_name().unwrap(),
                task.spec.target_store.secret_name().unwrap(),
            ],
        )
        .await?;
    let task = testing.create_task(&task).await?;
    let task_key = task.key();

    // the job is created with the task's identity
    let job: Job = testing.wait_for_object(&task.job_key()).await?;
    check_job(&testing, &task, &job);

    // its outcome lands in the task status
    let expected = job_status.conditions.as_ref().unwrap()[0].clone();
    let expected_type = match expected.type_.as_str() {
        "Complete" => ConditionType::Succeeded,
        _ => ConditionType::Failed,
    };
    testing.set_job_status(&task.job_key(), job_status).await?;
    let stored: Job = testing.wait_for_object(&task.job_key()).await?;
    let stored = stored.status.unwrap().conditions.unwrap().remove(0);

    let store = testing.store.clone();
    let updated = testing
        .wait_for("task status", || {
            let store = store.clone();
            let key = task_key.clone();
            async move {
                let task: Option<CopyBackupsTask> = store.get(&key).await?;
                Ok(task.filter(|t| t.condition(expected_type).is_some()))
            }
        })
        .await?;
    assert_eq!(updated.conditions().len(), 1);
    let condition = updated.condition(expected_type).unwrap();
    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.reason, expected.reason.clone().unwrap_or_default());
    assert_eq!(condition.message, expected.message.clone().unwrap_or_default());
    assert_eq!(
        Some(condition.last_transition_time),
        stored.last_transition_time.map(|t| t.0)
    );
    assert_eq!(
        Some(condition.last_update_time),
        stored.last_probe_time.map(|t| t.0)
    );
    assert_eq!(updated.observed_generation(), Some(updated.generation()));

    // deleting the task first takes its job down in the foreground
    testing
        .store
        .delete::<CopyBackupsTask>(&task_key, DeletionPropagation::Background)
        .await?;

    let job_key = task.job_key();
    let job = testing
        .wait_for("foreground deletion of the job", || {
            let store = store.clone();
            let key = job_key.clone();
            async move {
                let job: Option<Job> = store.get(&key).await?;
                Ok(job.filter(|j| {
                    has_finalizer(&j.metadata, FINALIZER_FOREGROUND_DELETION)
                }))
            }
        })
        .await?;
    assert!(job.metadata.deletion_timestamp.is_some());

    // the task waits for the job
    assert!(testing
        .store
        .get::<CopyBackupsTask>(&task_key)
        .await?
        .is_some());

    if use_gc {
        testing.store.collect_garbage()?;
    } else {
        remove_finalizer(testing.store.as_ref(), &job, FINALIZER_FOREGROUND_DELETION).await?;
    }

    testing.wait_for_deleted::<Job>(&job_key).await?;
    testing.wait_for_deleted::<CopyBackupsTask>(&task_key).await?;

    testing.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completed_local() -> WardenResult<()> {
    create_and_delete(
        "foo01",
        "Local",
        "Local",
        true,
        Testing::job_status("Complete", "", ""),
        false,
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_failed_local() -> WardenResult<()> {
    create_and_delete(
        "foo02",
        "Local",
        "Local",
        false,
        Testing::job_status("Failed", "test reason", "test message"),
        false,
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completed_aws() -> WardenResult<()> {
    create_and_delete(
        "foo03",
        "aws",
        "aws",
        false,
        Testing::job_status("Complete", "", ""),
        false,
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completed_azure() -> WardenResult<()> {
    create_and_delete(
        "foo04",
        "azure",
        "azure",
        false,
        Testing::job_status("Complete", "", ""),
        false,
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completed_gcp() -> WardenResult<()> {
    create_and_delete(
        "foo05",
        "gcp",
        "gcp",
        false,
        Testing::job_status("Complete", "", ""),
        true,
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completed_openstack() -> WardenResult<()> {
    create_and_delete(
        "foo06",
        "openstack",
        "openstack",
        false,
        Testing::job_status("Complete", "", ""),
        false,
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completed_alicloud() -> WardenResult<()> {
    create_and_delete(
        "foo07",
        "alicloud",
        "alicloud",
        false,
        Testing::job_status("Complete", "", ""),
        false,
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completed_local_to_aws() -> WardenResult<()> {
    create_and_delete(
        "foo08",
        "Local",
        "aws",
        true,
        Testing::job_status("Complete", "", ""),
        true,
    )
    .await
}

// numeric names with a leading zero must survive the owner reference round trip
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn numeric_name_with_leading_zero() -> WardenResult<()> {
    create_and_delete(
        "01234",
        "Local",
        "Local",
        true,
        Testing::job_status("Complete", "", ""),
        true,
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsupported_provider_blocks_task() -> WardenResult<()> {
    let testing = Testing::start()?;
    let task = Testing::new_task("bad", TEST_NAMESPACE, "Local", "dell", false);
    let task = testing.create_task(&task).await?;
    let key = task.key();

    let store = testing.store.clone();
    let blocked = testing
        .wait_for("blocked task", || {
            let store = store.clone();
            let key = key.clone();
            async move {
                let task: Option<CopyBackupsTask> = store.get(&key).await?;
                Ok(task.filter(|t| t.condition(ConditionType::Blocked).is_some()))
            }
        })
        .await?;
    let condition = blocked.condition(ConditionType::Blocked).unwrap();
    assert_eq!(condition.reason, "InvalidSpec");
    assert!(condition.message.contains("dell"));
    assert!(testing.store.get::<Job>(&task.job_key()).await?.is_none());

    testing.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_secret_is_retried() -> WardenResult<()> {
    let testing = Testing::start()?;
    let task = Testing::new_task("nosecret", TEST_NAMESPACE, "Local", "aws", false);
    let task = testing.create_task(&task).await?;
    let key = task.key();

    let store = testing.store.clone();
    let blocked = testing
        .wait_for("blocked task", || {
            let store = store.clone();
            let key = key.clone();
            async move {
                let task: Option<CopyBackupsTask> = store.get(&key).await?;
                Ok(task.filter(|t| t.condition(ConditionType::Blocked).is_some()))
            }
        })
        .await?;
    assert_eq!(
        blocked.condition(ConditionType::Blocked).unwrap().reason,
        "SecretNotFound"
    );
    assert!(testing.store.get::<Job>(&task.job_key()).await?.is_none());

    // the secret shows up later, the backoff retry picks it up
    testing
        .create_secrets(TEST_NAMESPACE, &["target-etcd-backup"])
        .await?;
    let _job: Job = testing.wait_for_object(&task.job_key()).await?;

    let unblocked = testing
        .wait_for("unblocked task", || {
            let store = store.clone();
            let key = key.clone();
            async move {
                let task: Option<CopyBackupsTask> = store.get(&key).await?;
                Ok(task.filter(|t| t.condition(ConditionType::Blocked).is_none()))
            }
        })
        .await?;
    assert!(unblocked.conditions().is_empty());

    testing.stop().await;
    Ok(())
}
