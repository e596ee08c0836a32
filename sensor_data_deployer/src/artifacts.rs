use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use ethers::{abi::Abi, types::Bytes};
use serde::Deserialize;

use crate::error::{DeployError, Result};

const BUILD_INFO_DIR: &str = "build-info";
const DBG_SUFFIX: &str = ".dbg.json";

/// A compiled contract ready to be turned into a deployment transaction.
#[derive(Clone, Debug)]
pub struct ContractArtifact {
    pub contract_name: String,
    pub source_name: Option<String>,
    pub path: PathBuf,
    pub abi: Abi,
    /// Creation bytecode, fully linked.
    pub bytecode: Bytes,
    /// Compiler version recorded alongside the artifact, if any.
    pub solc_version: Option<String>,
}

impl ContractArtifact {
    /// Fails when the artifact records a compiler version other than
    /// `expected`. Artifacts without a recorded version pass with a warning.
    pub fn ensure_compiler_version(&self, expected: &str) -> Result<()> {
        match &self.solc_version {
            Some(found) if strip_build_metadata(found) == expected => Ok(()),
            Some(found) => Err(DeployError::resolution(
                &self.contract_name,
                format!("compiled with solc {found}, but the project is configured for {expected}"),
            )),
            None => {
                tracing::warn!(
                    contract = %self.contract_name,
                    path = %self.path.display(),
                    "artifact carries no compiler version, skipping version check"
                );
                Ok(())
            }
        }
    }
}

/// Directory of compiled artifacts, laid out as `**/<Source>.sol/<Name>.json`.
pub struct ArtifactStore {
    dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    #[serde(default)]
    source_name: Option<String>,
    abi: Abi,
    bytecode: RawBytecode,
    #[serde(default)]
    link_references: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object {
        object: String,
        #[serde(default, rename = "linkReferences")]
        link_references: BTreeMap<String, serde_json::Value>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    solc_version: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve a contract by bare name (`SensorData`) or fully qualified name
    /// (`contracts/SensorData.sol:SensorData`).
    pub fn resolve(&self, name: &str) -> Result<ContractArtifact> {
        let (source, contract_name) = match name.rsplit_once(':') {
            Some((source, contract_name)) => (Some(Path::new(source)), contract_name),
            None => (None, name),
        };

        if !self.dir.is_dir() {
            return Err(DeployError::resolution(
                name,
                format!(
                    "artifacts directory {} does not exist, has the project been compiled?",
                    self.dir.display()
                ),
            ));
        }

        let file_name = format!("{contract_name}.json");
        let mut candidates = Vec::new();
        collect_artifact_paths(&self.dir, &file_name, &mut candidates)
            .map_err(|e| DeployError::resolution(name, e.to_string()))?;

        if let Some(source) = source {
            candidates.retain(|path| {
                path.parent()
                    .and_then(|parent| parent.strip_prefix(&self.dir).ok())
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(|parent| parent.ends_with(source) || source.ends_with(parent))
                    .unwrap_or(false)
            });
        }

        let path = match candidates.as_slice() {
            [] => {
                return Err(DeployError::resolution(
                    name,
                    format!("no artifact found in {}", self.dir.display()),
                ))
            }
            [path] => path.clone(),
            paths => {
                let paths: Vec<_> = paths.iter().map(|p| p.display().to_string()).collect();
                return Err(DeployError::resolution(
                    name,
                    format!(
                        "multiple artifacts match, use a fully qualified name: {}",
                        paths.join(", ")
                    ),
                ));
            }
        };

        tracing::debug!(contract = name, path = %path.display(), "resolved artifact");
        load_artifact(contract_name, &path)
    }
}

fn collect_artifact_paths(dir: &Path, file_name: &str, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().map_or(false, |n| n == BUILD_INFO_DIR) {
                continue;
            }
            collect_artifact_paths(&path, file_name, found)?;
        } else if path.file_name().map_or(false, |n| n == file_name) {
            found.push(path);
        }
    }
    found.sort();
    Ok(())
}

fn load_artifact(contract_name: &str, path: &Path) -> Result<ContractArtifact> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DeployError::resolution(contract_name, format!("{}: {e}", path.display())))?;
    let raw: RawArtifact = serde_json::from_str(&contents).map_err(|e| {
        DeployError::resolution(contract_name, format!("malformed artifact {}: {e}", path.display()))
    })?;

    let (hex_code, link_references) = match raw.bytecode {
        RawBytecode::Hex(code) => (code, raw.link_references),
        RawBytecode::Object {
            object,
            link_references,
        } => (object, link_references),
    };

    let hex_code = hex_code.trim_start_matches("0x");
    if !link_references.is_empty() || hex_code.contains("__") {
        return Err(DeployError::resolution(
            contract_name,
            "bytecode requires library linking, which is not supported",
        ));
    }
    if hex_code.is_empty() {
        return Err(DeployError::resolution(
            contract_name,
            "contract is abstract or an interface and cannot be deployed",
        ));
    }
    let bytecode = hex::decode(hex_code)
        .map_err(|e| DeployError::resolution(contract_name, format!("invalid bytecode: {e}")))?;

    let solc_version = match raw.metadata.as_ref().and_then(metadata_compiler_version) {
        Some(version) => Some(version),
        None => build_info_solc_version(path),
    };

    Ok(ContractArtifact {
        contract_name: contract_name.to_owned(),
        source_name: raw.source_name,
        path: path.to_path_buf(),
        abi: raw.abi,
        bytecode: bytecode.into(),
        solc_version,
    })
}

/// solc metadata is either an object or the same object serialized as a string.
fn metadata_compiler_version(metadata: &serde_json::Value) -> Option<String> {
    let parsed;
    let metadata = match metadata {
        serde_json::Value::String(s) => {
            parsed = serde_json::from_str::<serde_json::Value>(s).ok()?;
            &parsed
        }
        other => other,
    };
    metadata
        .pointer("/compiler/version")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

/// Follow `<Name>.dbg.json` to the build-info file that produced the artifact.
fn build_info_solc_version(artifact_path: &Path) -> Option<String> {
    let stem = artifact_path.file_name()?.to_str()?.strip_suffix(".json")?;
    let dbg_path = artifact_path.with_file_name(format!("{stem}{DBG_SUFFIX}"));
    let dbg: DebugFile = serde_json::from_str(&std::fs::read_to_string(dbg_path).ok()?).ok()?;

    let build_info_path = artifact_path.parent()?.join(dbg.build_info);
    let contents = match std::fs::read_to_string(&build_info_path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(path = %build_info_path.display(), "could not read build info: {e}");
            return None;
        }
    };
    let build_info: BuildInfo = serde_json::from_str(&contents).ok()?;
    Some(build_info.solc_version)
}

fn strip_build_metadata(version: &str) -> &str {
    version.split('+').next().unwrap_or(version)
}
