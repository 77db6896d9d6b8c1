//! Update orchestration for Bottlerocket container instances.
//!
//! The run walks the cluster in phases: list the active container
//! instances, keep the Bottlerocket ones, probe them all for their current
//! OS version, then update one instance at a time. Per-instance failures
//! are logged and the run moves on; the fleet-level phases abort the run
//! only when nothing at all could be learned.
//!
//! The orchestrator keeps no state of its own. Everything authoritative
//! lives in the cluster scheduler and on the nodes, so a failed run is
//! corrected by the next scheduled one.

use std::sync::Arc;

use aws_sdk_ecs::operation::update_container_instances_state::UpdateContainerInstancesStateOutput;
use aws_sdk_ecs::types::{ContainerInstanceStatus, Failure};
use futures::future::join_all;
use tracing::{error, info, instrument, warn};

use crate::check::{CheckOutput, UpdateState};
use crate::ec2::Ec2Ops;
use crate::ecs::EcsOps;
use crate::error::{Error, Result};
use crate::ssm::SsmOps;

/// Attribute name marking a container instance as running Bottlerocket.
/// Presence alone qualifies the instance; the value is deliberately not
/// inspected.
const VARIANT_ATTRIBUTE: &str = "bottlerocket.variant";

/// `started_by` prefix of tasks placed by an ECS service.
const SERVICE_STARTED_BY_PREFIX: &str = "ecs-svc";

/// Maximum container instances per describe call.
const DESCRIBE_BATCH_SIZE: usize = 100;

/// One container instance selected for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// EC2 instance id, used for commands and status checks
    pub instance_id: String,
    /// Container instance ARN, used for scheduler operations
    pub container_instance_id: String,
    /// OS version of the active partition when the run started
    pub current_version: Option<String>,
}

/// Run-scoped configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Name or ARN of the cluster to update
    pub cluster: String,
    /// Document that reports a node's update status
    pub check_document: String,
    /// Document that downloads and stages an update
    pub apply_document: String,
    /// Document that reboots a node into its staged update
    pub reboot_document: String,
}

/// Drives one update run across a cluster.
pub struct Updater {
    settings: Settings,
    ecs: Arc<dyn EcsOps>,
    ssm: Arc<dyn SsmOps>,
    ec2: Arc<dyn Ec2Ops>,
}

impl Updater {
    pub fn new(
        settings: Settings,
        ecs: Arc<dyn EcsOps>,
        ssm: Arc<dyn SsmOps>,
        ec2: Arc<dyn Ec2Ops>,
    ) -> Self {
        Self {
            settings,
            ecs,
            ssm,
            ec2,
        }
    }

    /// Update every eligible Bottlerocket instance in the cluster, one at a
    /// time.
    ///
    /// Returns an error only when the run could not get as far as
    /// per-instance processing; individual instance failures are logged and
    /// skipped.
    pub async fn run(&self) -> Result<()> {
        let arns = self.list_container_instances().await?;
        if arns.is_empty() {
            info!(cluster = %self.settings.cluster, "cluster has no active container instances");
            return Ok(());
        }

        let instances = self.filter_bottlerocket_instances(arns).await?;
        if instances.is_empty() {
            info!(cluster = %self.settings.cluster, "no Bottlerocket container instances found");
            return Ok(());
        }
        info!(count = instances.len(), "found Bottlerocket container instances");

        let candidates = self.check_instances(instances).await?;
        let mut failures = 0usize;
        for instance in &candidates {
            if let Err(err) = self.process_instance(instance).await {
                failures += 1;
                error!(
                    instance_id = %instance.instance_id,
                    error = %err,
                    "instance update failed; continuing with remaining instances"
                );
            }
        }
        info!(
            attempted = candidates.len(),
            failed = failures,
            "update run complete"
        );
        Ok(())
    }

    /// Gate, drain, drive and verify a single instance, always returning it
    /// to service once it was drained.
    async fn process_instance(&self, instance: &Instance) -> Result<()> {
        if !self.eligible(&instance.container_instance_id).await? {
            info!(
                container_instance_id = %instance.container_instance_id,
                "instance is running tasks not started by a service; skipping"
            );
            return Ok(());
        }

        self.drain_instance(&instance.container_instance_id).await?;

        let outcome = match self.update_instance(instance).await {
            Ok(()) => self.verify_update(instance).await.map(|ok| {
                if ok {
                    info!(instance_id = %instance.instance_id, "update verified");
                } else {
                    warn!(
                        instance_id = %instance.instance_id,
                        "active partition version is unchanged; update did not take effect"
                    );
                }
            }),
            Err(err) => Err(err),
        };

        // The instance is draining at this point no matter how the update
        // went; put it back in service before reporting the outcome.
        if let Err(err) = self.activate_instance(&instance.container_instance_id).await {
            warn!(
                container_instance_id = %instance.container_instance_id,
                error = %err,
                "failed to return instance to ACTIVE"
            );
        }

        outcome
    }

    /// Collect the ARNs of every ACTIVE container instance in the cluster.
    async fn list_container_instances(&self) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut next_token = None;
        loop {
            let page = self
                .ecs
                .list_container_instances(
                    &self.settings.cluster,
                    ContainerInstanceStatus::Active,
                    next_token,
                )
                .await
                .map_err(|source| Error::ListInstances {
                    source: Box::new(source),
                })?;
            arns.extend(page.container_instance_arns().iter().cloned());
            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(arns);
            }
        }
    }

    /// Keep the container instances carrying the Bottlerocket variant
    /// attribute.
    ///
    /// Describes run in batches. A failed batch costs this run those
    /// instances and nothing more; they are picked up again next run. Only
    /// when every batch fails is nothing known and the run aborts.
    async fn filter_bottlerocket_instances(&self, arns: Vec<String>) -> Result<Vec<Instance>> {
        let batches = arns.len().div_ceil(DESCRIBE_BATCH_SIZE);
        let mut failed_batches = 0usize;
        let mut instances = Vec::new();

        for batch in arns.chunks(DESCRIBE_BATCH_SIZE) {
            let described = match self
                .ecs
                .describe_container_instances(&self.settings.cluster, batch.to_vec())
                .await
            {
                Ok(out) => out,
                Err(err) => {
                    failed_batches += 1;
                    warn!(
                        batch_size = batch.len(),
                        error = %err,
                        "dropping container instance batch from this run"
                    );
                    continue;
                }
            };

            for ci in described.container_instances() {
                let is_bottlerocket = ci
                    .attributes()
                    .iter()
                    .any(|attribute| attribute.name() == VARIANT_ATTRIBUTE);
                if !is_bottlerocket {
                    continue;
                }
                let (Some(instance_id), Some(container_instance_id)) =
                    (ci.ec2_instance_id(), ci.container_instance_arn())
                else {
                    continue;
                };
                instances.push(Instance {
                    instance_id: instance_id.to_string(),
                    container_instance_id: container_instance_id.to_string(),
                    current_version: None,
                });
            }
        }

        if batches > 0 && failed_batches == batches {
            return Err(Error::NoInstancesDescribed);
        }
        Ok(instances)
    }

    /// Probe every instance for its update status in one fleet-wide command,
    /// recording each node's current OS version.
    ///
    /// Instances whose report cannot be fetched or parsed are dropped from
    /// the run with a warning.
    async fn check_instances(&self, instances: Vec<Instance>) -> Result<Vec<Instance>> {
        let instance_ids = instances
            .iter()
            .map(|instance| instance.instance_id.clone())
            .collect();
        let command_id = self
            .send_command(instance_ids, &self.settings.check_document)
            .await?;

        let mut candidates = Vec::new();
        for mut instance in instances {
            match self
                .invocation_report(&command_id, &instance.instance_id)
                .await
            {
                Ok(report) => {
                    instance.current_version = Some(report.active_partition.image.version);
                    candidates.push(instance);
                }
                Err(err) => {
                    warn!(
                        instance_id = %instance.instance_id,
                        error = %err,
                        "could not read update status; dropping instance from this run"
                    );
                }
            }
        }
        Ok(candidates)
    }

    /// An instance is safe to disturb only when everything on it was placed
    /// by a service and will be rescheduled elsewhere. An empty instance is
    /// eligible.
    async fn eligible(&self, container_instance_id: &str) -> Result<bool> {
        let tasks = self
            .ecs
            .list_tasks(&self.settings.cluster, container_instance_id)
            .await?;
        let task_arns = tasks.task_arns().to_vec();
        if task_arns.is_empty() {
            return Ok(true);
        }

        let described = self
            .ecs
            .describe_tasks(&self.settings.cluster, task_arns)
            .await?;
        Ok(described.tasks().iter().all(|task| {
            task.started_by()
                .is_some_and(|started_by| started_by.starts_with(SERVICE_STARTED_BY_PREFIX))
        }))
    }

    /// Drain an instance and wait for its tasks to stop.
    ///
    /// Once the DRAINING transition has been accepted, any later failure
    /// puts the instance back to ACTIVE before the error is surfaced, so a
    /// failed run never strands instances out of service.
    #[instrument(skip(self))]
    async fn drain_instance(&self, container_instance_id: &str) -> Result<()> {
        let out = self
            .change_state(container_instance_id, ContainerInstanceStatus::Draining)
            .await?;
        if !out.failures().is_empty() {
            let rejected = Error::StateChangeRejected {
                reasons: format_failures(out.failures()),
            };
            self.restore_active(container_instance_id).await;
            return Err(rejected);
        }

        if let Err(err) = self.await_task_drain(container_instance_id).await {
            self.restore_active(container_instance_id).await;
            return Err(err);
        }
        Ok(())
    }

    async fn await_task_drain(&self, container_instance_id: &str) -> Result<()> {
        let tasks = self
            .ecs
            .list_tasks(&self.settings.cluster, container_instance_id)
            .await?;
        let task_arns = tasks.task_arns().to_vec();
        if task_arns.is_empty() {
            return Ok(());
        }
        info!(
            container_instance_id = %container_instance_id,
            tasks = task_arns.len(),
            "waiting for tasks to stop"
        );
        self.ecs
            .wait_until_tasks_stopped(&self.settings.cluster, task_arns)
            .await
    }

    /// Return an instance to ACTIVE, surfacing scheduler-reported failures.
    async fn activate_instance(&self, container_instance_id: &str) -> Result<()> {
        let out = self
            .change_state(container_instance_id, ContainerInstanceStatus::Active)
            .await?;
        if !out.failures().is_empty() {
            return Err(Error::StateChangeRejected {
                reasons: format_failures(out.failures()),
            });
        }
        Ok(())
    }

    /// Best-effort compensation used on drain error paths.
    async fn restore_active(&self, container_instance_id: &str) {
        if let Err(err) = self.activate_instance(container_instance_id).await {
            warn!(
                container_instance_id = %container_instance_id,
                error = %err,
                "failed to restore instance to ACTIVE"
            );
        }
    }

    async fn change_state(
        &self,
        container_instance_id: &str,
        status: ContainerInstanceStatus,
    ) -> Result<UpdateContainerInstancesStateOutput> {
        self.ecs
            .update_container_instances_state(
                &self.settings.cluster,
                vec![container_instance_id.to_string()],
                status,
            )
            .await
    }

    /// Send one document to a set of instances and wait for it to execute.
    ///
    /// Execution is awaited per instance in parallel. One instance
    /// reporting completion is enough to consider the dispatch useful; the
    /// command id is returned and stragglers are logged. Only when every
    /// waiter fails is the dispatch considered lost.
    async fn send_command(&self, instance_ids: Vec<String>, document: &str) -> Result<String> {
        let sent = self
            .ssm
            .send_command(document, instance_ids.clone())
            .await
            .map_err(|source| Error::SendCommand {
                source: Box::new(source),
            })?;
        let command_id = sent
            .command()
            .and_then(|command| command.command_id())
            .unwrap_or_default()
            .to_string();

        let waiters = instance_ids.iter().map(|instance_id| {
            let command_id = command_id.clone();
            async move {
                self.ssm
                    .wait_until_command_executed(&command_id, instance_id)
                    .await
            }
        });

        let mut completed = 0usize;
        let mut last_error = None;
        for (instance_id, result) in instance_ids.iter().zip(join_all(waiters).await) {
            match result {
                Ok(()) => completed += 1,
                Err(err) => {
                    warn!(
                        instance_id = %instance_id,
                        command_id = %command_id,
                        error = %err,
                        "instance did not finish executing document"
                    );
                    last_error = Some(err);
                }
            }
        }

        if completed == 0 {
            if let Some(source) = last_error {
                return Err(Error::AwaitDocumentExecution {
                    source: Box::new(source),
                });
            }
        }
        Ok(command_id)
    }

    /// Run the check document against one instance and parse its report.
    async fn check_instance(&self, instance_id: &str) -> Result<CheckOutput> {
        let command_id = self
            .send_command(
                vec![instance_id.to_string()],
                &self.settings.check_document,
            )
            .await?;
        self.invocation_report(&command_id, instance_id).await
    }

    async fn invocation_report(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<CheckOutput> {
        let invocation = self
            .ssm
            .get_command_invocation(command_id, instance_id)
            .await?;
        CheckOutput::parse(invocation.standard_output_content().unwrap_or_default())
    }

    /// Drive one instance through its update.
    ///
    /// The node's reported state decides how much work is left: a fresh
    /// update is applied and booted, an already staged one is booted, an
    /// idle node needs nothing. Anything else has no defined transition and
    /// skips the instance.
    #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id))]
    async fn update_instance(&self, instance: &Instance) -> Result<()> {
        let report = self.check_instance(&instance.instance_id).await?;
        match report.update_state {
            UpdateState::Available => {
                info!("update available; applying");
                self.send_command(
                    vec![instance.instance_id.clone()],
                    &self.settings.apply_document,
                )
                .await?;
                self.reboot_and_wait(&instance.instance_id).await
            }
            UpdateState::Ready => {
                info!("update already staged; rebooting");
                self.reboot_and_wait(&instance.instance_id).await
            }
            UpdateState::Idle => {
                info!("no update in progress");
                Ok(())
            }
            state => Err(Error::UnexpectedUpdateState {
                state: state.to_string(),
            }),
        }
    }

    async fn reboot_and_wait(&self, instance_id: &str) -> Result<()> {
        self.send_command(
            vec![instance_id.to_string()],
            &self.settings.reboot_document,
        )
        .await?;
        self.ec2
            .wait_until_instance_status_ok(vec![instance_id.to_string()])
            .await
    }

    /// Confirm the update took effect.
    ///
    /// The authoritative signal is the version delta: the node booted into
    /// a different active partition than it started the run with. The
    /// reported update state is informational only; a node that already
    /// sees the next update is still a success for this run.
    async fn verify_update(&self, instance: &Instance) -> Result<bool> {
        let report = self.check_instance(&instance.instance_id).await?;
        let reported = report.active_partition.image.version;
        if report.update_state == UpdateState::Available {
            info!(
                instance_id = %instance.instance_id,
                "another update is already available; left for the next run"
            );
        }
        Ok(instance.current_version.as_deref() != Some(reported.as_str()))
    }
}

fn format_failures(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(|failure| {
            format!(
                "{} ({})",
                failure.reason().unwrap_or("unknown reason"),
                failure.arn().unwrap_or("unknown resource")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
