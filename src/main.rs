//! Bottlerocket ECS updater
//!
//! Single-run batch tool: one invocation walks the cluster once and exits.
//! Scheduling recurring runs is the deployment's concern.

use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bottlerocket_ecs_updater::ec2::Ec2Client;
use bottlerocket_ecs_updater::ecs::EcsClient;
use bottlerocket_ecs_updater::ssm::SsmClient;
use bottlerocket_ecs_updater::{Result, Settings, Updater};

/// Drives in-place Bottlerocket OS updates across an ECS cluster
#[derive(Parser, Debug)]
#[command(name = "bottlerocket-ecs-updater", version, about, long_about = None)]
struct Cli {
    /// Name or ARN of the ECS cluster to update
    #[arg(long)]
    cluster: String,

    /// AWS region; the default region chain applies when unset
    #[arg(long)]
    region: Option<String>,

    /// SSM document that reports a node's update status
    #[arg(long)]
    check_document: String,

    /// SSM document that downloads and stages an update
    #[arg(long)]
    apply_document: String,

    /// SSM document that reboots a node into its staged update
    #[arg(long)]
    reboot_document: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = cli.region.clone() {
        loader = loader.region(Region::new(region));
    }
    let aws_config = loader.load().await;

    let ecs = Arc::new(EcsClient::new(aws_sdk_ecs::Client::new(&aws_config)));
    let ssm = Arc::new(SsmClient::new(aws_sdk_ssm::Client::new(&aws_config)));
    let ec2 = Arc::new(Ec2Client::new(aws_sdk_ec2::Client::new(&aws_config)));

    let settings = Settings {
        cluster: cli.cluster,
        check_document: cli.check_document,
        apply_document: cli.apply_document,
        reboot_document: cli.reboot_document,
    };
    info!(cluster = %settings.cluster, "starting update run");

    Updater::new(settings, ecs, ssm, ec2).run().await
}
