//! Remote-command adapter
//!
//! Commands are dispatched as SSM documents at their `$DEFAULT` version.
//! Execution is asynchronous on the node; the waiter polls the invocation
//! until it reaches a terminal status.

use async_trait::async_trait;
use aws_sdk_ssm::operation::get_command_invocation::GetCommandInvocationOutput;
use aws_sdk_ssm::operation::send_command::SendCommandOutput;
use aws_sdk_ssm::types::CommandInvocationStatus;

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};
use crate::wait;

/// Operations the orchestrator needs from the command service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SsmOps: Send + Sync {
    /// Dispatch a document to a set of instances.
    async fn send_command(
        &self,
        document: &str,
        instance_ids: Vec<String>,
    ) -> Result<SendCommandOutput>;

    /// Block until the command finished executing on one instance.
    async fn wait_until_command_executed(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<()>;

    /// Fetch the result of a command invocation on one instance.
    async fn get_command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<GetCommandInvocationOutput>;
}

/// Production adapter over the SSM SDK client.
pub struct SsmClient {
    client: aws_sdk_ssm::Client,
}

impl SsmClient {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SsmOps for SsmClient {
    async fn send_command(
        &self,
        document: &str,
        instance_ids: Vec<String>,
    ) -> Result<SendCommandOutput> {
        self.client
            .send_command()
            .document_name(document)
            .document_version("$DEFAULT")
            .set_instance_ids(Some(instance_ids))
            .send()
            .await
            .map_err(|e| Error::api("ssm", "SendCommand", e))
    }

    async fn wait_until_command_executed(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        wait::poll_until(&wait::COMMAND_EXECUTED, || async move {
            // The invocation is not observable immediately after send;
            // treat that as still pending.
            let invocation = match self
                .client
                .get_command_invocation()
                .command_id(command_id)
                .instance_id(instance_id)
                .send()
                .await
            {
                Ok(invocation) => invocation,
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|e| e.is_invocation_does_not_exist()) =>
                {
                    return Ok(false);
                }
                Err(err) => return Err(Error::api("ssm", "GetCommandInvocation", err)),
            };

            match invocation.status() {
                Some(CommandInvocationStatus::Success) => Ok(true),
                Some(
                    CommandInvocationStatus::Pending
                    | CommandInvocationStatus::InProgress
                    | CommandInvocationStatus::Delayed,
                )
                | None => Ok(false),
                Some(status) => Err(Error::command_failed(
                    command_id,
                    instance_id,
                    status.as_str(),
                )),
            }
        })
        .await
    }

    async fn get_command_invocation(
        &self,
        command_id: &str,
        instance_id: &str,
    ) -> Result<GetCommandInvocationOutput> {
        self.client
            .get_command_invocation()
            .command_id(command_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| Error::api("ssm", "GetCommandInvocation", e))
    }
}
