//! Node-status adapter

use async_trait::async_trait;
use aws_sdk_ec2::types::SummaryStatus;

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};
use crate::wait;

/// Operations the orchestrator needs from the compute substrate.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Ec2Ops: Send + Sync {
    /// Block until every given instance passes both status checks.
    async fn wait_until_instance_status_ok(&self, instance_ids: Vec<String>) -> Result<()>;
}

/// Production adapter over the EC2 SDK client.
pub struct Ec2Client {
    client: aws_sdk_ec2::Client,
}

impl Ec2Client {
    pub fn new(client: aws_sdk_ec2::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Ec2Ops for Ec2Client {
    async fn wait_until_instance_status_ok(&self, instance_ids: Vec<String>) -> Result<()> {
        wait::poll_until(&wait::INSTANCE_STATUS_OK, || {
            let instance_ids = instance_ids.clone();
            async move {
                let expected = instance_ids.len();
                let out = self
                    .client
                    .describe_instance_status()
                    .set_instance_ids(Some(instance_ids))
                    .include_all_instances(true)
                    .send()
                    .await
                    .map_err(|e| Error::api("ec2", "DescribeInstanceStatus", e))?;

                let statuses = out.instance_statuses();
                let all_ok = statuses.iter().all(|status| {
                    let instance_ok = status
                        .instance_status()
                        .and_then(|s| s.status())
                        .is_some_and(|s| *s == SummaryStatus::Ok);
                    let system_ok = status
                        .system_status()
                        .and_then(|s| s.status())
                        .is_some_and(|s| *s == SummaryStatus::Ok);
                    instance_ok && system_ok
                });
                Ok(statuses.len() == expected && all_ok)
            }
        })
        .await
    }
}
