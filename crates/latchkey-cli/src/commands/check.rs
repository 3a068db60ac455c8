//! `latchkey check`: a dry run against in-memory collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use latchkey_access::{
    AccessRequestCoordinator, AccessRequestParams, InMemoryAuditSink, InMemoryDeviceDirectory,
    StaticIdentityContext,
};
use latchkey_config::LatchkeyConfig;
use latchkey_types::SubjectId;
use tracing::debug;

use super::{parse_pair, read_policies};

pub struct CheckArgs {
    pub policies: PathBuf,
    pub subject: String,
    pub device: String,
    pub resource: String,
    pub action: String,
    pub attributes: Vec<String>,
    pub facts: Vec<String>,
    pub owner: bool,
    pub validity: u64,
    pub dir: PathBuf,
}

pub fn run(args: &CheckArgs) -> Result<()> {
    let config = LatchkeyConfig::load_from_dir(&args.dir).context("Failed to load configuration")?;

    let devices = Arc::new(InMemoryDeviceDirectory::new());
    let owner = args.owner.then(|| SubjectId::new(args.subject.as_str()));
    devices.register(args.device.as_str(), owner);

    let identity = Arc::new(StaticIdentityContext::new());
    for raw in &args.facts {
        let (name, value) = parse_pair(raw)?;
        identity.set_fact(args.subject.as_str(), name, value);
    }

    let coordinator = AccessRequestCoordinator::builder(devices, identity, Arc::new(InMemoryAuditSink::new()))
        .with_config(config)
        .build();
    for policy in read_policies(&args.policies)? {
        let id = policy.id.clone();
        coordinator
            .create_policy(policy)
            .with_context(|| format!("Failed to load policy {id}"))?;
    }
    debug!(policies = coordinator.policies().len(), "Policies loaded");

    let mut params = AccessRequestParams::new(
        args.subject.as_str(),
        args.device.as_str(),
        args.resource.as_str(),
        args.action.as_str(),
    )
    .with_validity_secs(args.validity);
    for raw in &args.attributes {
        let (name, value) = parse_pair(raw)?;
        params = params.with_attribute(name, value);
    }

    let outcome = coordinator
        .request_access(params)
        .context("Request rejected")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
