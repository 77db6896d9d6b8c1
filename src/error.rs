//! Error types for the updater
//!
//! A single crate-level enum keeps the orchestration code free of ad-hoc
//! string errors while preserving the underlying cause of every failure, so
//! callers (and tests) can match on what actually went wrong rather than on
//! formatted messages.

use thiserror::Error;

/// Crate-wide Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause for errors surfaced by the AWS service adapters
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while orchestrating an update run
#[derive(Debug, Error)]
pub enum Error {
    /// Low-level failure from an AWS service call
    #[error("{service} {operation} failed: {source}")]
    Api {
        /// Service the call was issued against (ecs, ssm, ec2)
        service: &'static str,
        /// Operation name as the service knows it
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// The paginated container-instance listing aborted
    #[error("failed to list container instances: {source}")]
    ListInstances {
        #[source]
        source: Box<Error>,
    },

    /// Every describe batch failed; nothing is known about the fleet
    #[error("failed to describe any container instances")]
    NoInstancesDescribed,

    /// The state-change call succeeded but the response carried failures
    #[error("container instance state change rejected: {reasons}")]
    StateChangeRejected {
        /// Failure reasons reported by the cluster scheduler
        reasons: String,
    },

    /// The send-command call itself failed; nothing was dispatched
    #[error("send command failed: {source}")]
    SendCommand {
        #[source]
        source: Box<Error>,
    },

    /// Every per-instance execution waiter failed
    #[error("too many failures while awaiting document execution: {source}")]
    AwaitDocumentExecution {
        /// Last waiter error observed
        #[source]
        source: Box<Error>,
    },

    /// A bounded poll ran out of attempts
    #[error("exceeded max attempts waiting for {description}")]
    WaitExhausted {
        /// What was being waited on
        description: String,
    },

    /// A command invocation reached a terminal state other than success
    #[error("command {command_id} ended with status {status} on instance {instance_id}")]
    CommandFailed {
        command_id: String,
        instance_id: String,
        status: String,
    },

    /// The check document's stdout was missing or not the expected JSON
    #[error("failed to parse command output {output}, manual verification required")]
    ParseCommandOutput {
        /// The stdout content as received
        output: String,
        #[source]
        source: serde_json::Error,
    },

    /// The node reported an update state with no defined transition
    #[error("unexpected update state \"{state}\"; skipping instance")]
    UnexpectedUpdateState { state: String },
}

impl Error {
    /// Wrap a low-level AWS SDK error with the operation that produced it
    pub fn api(
        service: &'static str,
        operation: &'static str,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::Api {
            service,
            operation,
            source: source.into(),
        }
    }

    pub fn wait_exhausted(description: impl Into<String>) -> Self {
        Error::WaitExhausted {
            description: description.into(),
        }
    }

    pub fn command_failed(
        command_id: impl Into<String>,
        instance_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Error::CommandFailed {
            command_id: command_id.into(),
            instance_id: instance_id.into(),
            status: status.into(),
        }
    }
}
