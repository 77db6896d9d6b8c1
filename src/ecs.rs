//! Cluster-scheduler adapter
//!
//! Thin facade over the ECS control plane. The trait carries exactly the
//! operations the orchestration core calls, so tests can inject
//! per-operation behavior; batching and failure policy live in the core,
//! not here.

use async_trait::async_trait;
use aws_sdk_ecs::operation::describe_container_instances::DescribeContainerInstancesOutput;
use aws_sdk_ecs::operation::describe_tasks::DescribeTasksOutput;
use aws_sdk_ecs::operation::list_container_instances::ListContainerInstancesOutput;
use aws_sdk_ecs::operation::list_tasks::ListTasksOutput;
use aws_sdk_ecs::operation::update_container_instances_state::UpdateContainerInstancesStateOutput;
use aws_sdk_ecs::types::ContainerInstanceStatus;

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};
use crate::wait;

/// Operations the orchestrator needs from the cluster scheduler.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EcsOps: Send + Sync {
    /// Fetch one page of container instance ARNs with the given status.
    async fn list_container_instances(
        &self,
        cluster: &str,
        status: ContainerInstanceStatus,
        next_token: Option<String>,
    ) -> Result<ListContainerInstancesOutput>;

    /// Describe up to one batch of container instances.
    async fn describe_container_instances(
        &self,
        cluster: &str,
        container_instances: Vec<String>,
    ) -> Result<DescribeContainerInstancesOutput>;

    /// List tasks placed on one container instance.
    async fn list_tasks(&self, cluster: &str, container_instance: &str)
        -> Result<ListTasksOutput>;

    /// Describe the given tasks.
    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: Vec<String>,
    ) -> Result<DescribeTasksOutput>;

    /// Transition container instances to the given status.
    async fn update_container_instances_state(
        &self,
        cluster: &str,
        container_instances: Vec<String>,
        status: ContainerInstanceStatus,
    ) -> Result<UpdateContainerInstancesStateOutput>;

    /// Block until every given task has stopped.
    async fn wait_until_tasks_stopped(&self, cluster: &str, task_arns: Vec<String>) -> Result<()>;
}

/// Production adapter over the ECS SDK client.
pub struct EcsClient {
    client: aws_sdk_ecs::Client,
}

impl EcsClient {
    pub fn new(client: aws_sdk_ecs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EcsOps for EcsClient {
    async fn list_container_instances(
        &self,
        cluster: &str,
        status: ContainerInstanceStatus,
        next_token: Option<String>,
    ) -> Result<ListContainerInstancesOutput> {
        self.client
            .list_container_instances()
            .cluster(cluster)
            .status(status)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| Error::api("ecs", "ListContainerInstances", e))
    }

    async fn describe_container_instances(
        &self,
        cluster: &str,
        container_instances: Vec<String>,
    ) -> Result<DescribeContainerInstancesOutput> {
        self.client
            .describe_container_instances()
            .cluster(cluster)
            .set_container_instances(Some(container_instances))
            .send()
            .await
            .map_err(|e| Error::api("ecs", "DescribeContainerInstances", e))
    }

    async fn list_tasks(
        &self,
        cluster: &str,
        container_instance: &str,
    ) -> Result<ListTasksOutput> {
        self.client
            .list_tasks()
            .cluster(cluster)
            .container_instance(container_instance)
            .send()
            .await
            .map_err(|e| Error::api("ecs", "ListTasks", e))
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: Vec<String>,
    ) -> Result<DescribeTasksOutput> {
        self.client
            .describe_tasks()
            .cluster(cluster)
            .set_tasks(Some(task_arns))
            .send()
            .await
            .map_err(|e| Error::api("ecs", "DescribeTasks", e))
    }

    async fn update_container_instances_state(
        &self,
        cluster: &str,
        container_instances: Vec<String>,
        status: ContainerInstanceStatus,
    ) -> Result<UpdateContainerInstancesStateOutput> {
        self.client
            .update_container_instances_state()
            .cluster(cluster)
            .set_container_instances(Some(container_instances))
            .status(status)
            .send()
            .await
            .map_err(|e| Error::api("ecs", "UpdateContainerInstancesState", e))
    }

    async fn wait_until_tasks_stopped(&self, cluster: &str, task_arns: Vec<String>) -> Result<()> {
        wait::poll_until(&wait::TASKS_STOPPED, || {
            let task_arns = task_arns.clone();
            async move {
                let out = self.describe_tasks(cluster, task_arns).await?;
                Ok(out
                    .tasks()
                    .iter()
                    .all(|task| task.last_status() == Some("STOPPED")))
            }
        })
        .await
    }
}
