//! Deactivation: restore every variable recorded by the activation snapshot.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::activation::{ShellContext, ACTIVATED_KEY_VAR, ENVIRONMENT_NAME_VAR};
use crate::environment::{Fragment, Mutation};
use crate::error::DevEnvError;
use crate::fragment;
use crate::repository::{Wrapper, DEFAULT_ENVIRONMENT_NAME};

#[derive(Debug, Clone)]
pub struct DeactivationPlan {
    pub key: String,
    /// The snapshot file, removed by the last mutation
    pub snapshot: PathBuf,
    pub mutations: Vec<Mutation>,
}

/// Build the mutations that undo the active session
pub fn plan(context: &ShellContext) -> Result<DeactivationPlan> {
    let environment = context
        .var(ENVIRONMENT_NAME_VAR)
        .unwrap_or(DEFAULT_ENVIRONMENT_NAME);
    context.require_sourced(Wrapper::Deactivate, environment)?;

    let key = context
        .var(ACTIVATED_KEY_VAR)
        .ok_or(DevEnvError::NoActiveEnvironment)?
        .to_string();

    let store = context.snapshots();
    let snapshot = store.load(&key)?;
    let path = store.path_for(&key);

    let mut mutations = snapshot.restore_mutations(ACTIVATED_KEY_VAR);
    mutations.push(Mutation::RemoveFile(path.clone()));

    Ok(DeactivationPlan {
        key,
        snapshot: path,
        mutations,
    })
}

/// Plan the deactivation and write its fragment, returning the fragment path
pub fn run(context: &ShellContext) -> Result<PathBuf> {
    let plan = plan(context).context("Deactivation failed")?;
    tracing::debug!("deactivating session {}", plan.key);

    fragment::write_fragment(
        &context.fragment_dir,
        &Fragment::new(context.shell, plan.mutations),
    )
}
