use std::path::Path;

use ethers::solc::{Project, ProjectPathsConfig, Solc};

use crate::{
    config::ProjectConfig,
    error::{DeployError, Result},
};

/// Compile the project sources into its artifacts directory with the solc
/// binary at `solc_path`. The binary must be exactly the configured version.
pub fn compile_project(config: &ProjectConfig, solc_path: impl AsRef<Path>) -> Result<()> {
    let solc_path = solc_path.as_ref();
    let solc = Solc::new(solc_path.to_path_buf());

    let version = solc.version().map_err(|e| {
        DeployError::Compilation(format!("could not run solc at {}: {e}", solc_path.display()))
    })?;
    let found = format!("{}.{}.{}", version.major, version.minor, version.patch);
    if found != config.solidity_version {
        return Err(DeployError::Compilation(format!(
            "solc at {} is version {found}, but the project is configured for {}",
            solc_path.display(),
            config.solidity_version
        )));
    }

    let paths = ProjectPathsConfig::builder()
        .root(config.root.clone())
        .sources(config.sources.clone())
        .artifacts(config.artifacts.clone())
        .build()
        .map_err(|e| DeployError::Compilation(e.to_string()))?;

    let project = Project::builder()
        .paths(paths)
        .solc(solc)
        .set_auto_detect(false)
        .build()
        .map_err(|e| DeployError::Compilation(e.to_string()))?;

    tracing::info!(version = %found, sources = %config.sources.display(), "compiling contracts");
    let output = project
        .compile()
        .map_err(|e| DeployError::Compilation(e.to_string()))?;

    if output.has_compiler_errors() {
        return Err(DeployError::Compilation(output.to_string()));
    }

    tracing::info!(artifacts = %config.artifacts.display(), "compilation finished");
    Ok(())
}
