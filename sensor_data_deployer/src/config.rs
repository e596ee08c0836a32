use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use serde_with::{serde_as, MapPreventDuplicates};
use url::Url;

use crate::error::{DeployError, Result};

pub const DEFAULT_SOURCES_DIR: &str = "contracts";
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

const REMOTE_ACCOUNTS: &str = "remote";

/// Project configuration: one global compiler version plus a table of named
/// networks. Built once at start-up and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectConfig {
    /// Directory the config file lives in. Relative paths resolve against it.
    pub root: PathBuf,
    pub solidity_version: String,
    pub default_network: Option<String>,
    pub networks: BTreeMap<String, NetworkConfig>,
    pub sources: PathBuf,
    pub artifacts: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NetworkConfig {
    pub name: String,
    pub url: Url,
    pub accounts: Accounts,
    pub chain_id: Option<u64>,
    /// How long to wait for the deployment receipt. Not an RPC request timeout.
    pub confirmation_timeout: Option<Duration>,
}

/// Credentials used to sign the deployment.
#[derive(Clone, PartialEq)]
pub enum Accounts {
    /// Ordered private keys; the first one deploys.
    PrivateKeys(Vec<String>),
    Mnemonic {
        phrase: String,
        derivation_path: Option<String>,
        initial_index: u32,
    },
    /// Use the node's first unlocked account.
    Remote,
}

// keys never end up in logs
impl fmt::Debug for Accounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accounts::PrivateKeys(keys) => write!(f, "PrivateKeys(<{} redacted>)", keys.len()),
            Accounts::Mnemonic {
                derivation_path,
                initial_index,
                ..
            } => f
                .debug_struct("Mnemonic")
                .field("phrase", &"<redacted>")
                .field("derivation_path", derivation_path)
                .field("initial_index", initial_index)
                .finish(),
            Accounts::Remote => write!(f, "Remote"),
        }
    }
}

#[serde_as]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProjectConfig {
    solidity: RawSolidityConfig,
    #[serde(default)]
    default_network: Option<String>,
    #[serde_as(as = "MapPreventDuplicates<_, _>")]
    networks: BTreeMap<String, RawNetworkConfig>,
    #[serde(default)]
    paths: RawPathsConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSolidityConfig {
    Version(String),
    Detailed { version: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNetworkConfig {
    url: String,
    #[serde(default)]
    accounts: Option<RawAccounts>,
    #[serde(default)]
    chain_id: Option<u64>,
    /// milliseconds
    #[serde(default)]
    confirmation_timeout: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAccounts {
    Named(String),
    PrivateKeys(Vec<String>),
    Mnemonic(RawHdAccounts),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHdAccounts {
    mnemonic: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    initial_index: u32,
}

#[derive(Default, Deserialize)]
struct RawPathsConfig {
    sources: Option<PathBuf>,
    artifacts: Option<PathBuf>,
}

impl ProjectConfig {
    /// Load a config file, resolving `${VAR}` credentials from the process
    /// environment (and a `.env` file if one exists).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // a .env beside the config wins over one found from the working directory
        dotenv::from_path(root.join(".env")).ok();
        dotenv::dotenv().ok();

        let config = Self::from_json_str(&contents, root)?;
        tracing::debug!(path = %path.display(), networks = ?config.network_names(), "loaded config");
        Ok(config)
    }

    pub fn from_json_str(json: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let raw: RawProjectConfig =
            serde_json::from_str(json).map_err(|e| DeployError::Config(e.to_string()))?;
        let root = root.into();

        if raw.networks.is_empty() {
            return Err(DeployError::Config("no networks configured".into()));
        }

        let networks = raw
            .networks
            .into_iter()
            .map(|(name, network)| {
                let network = network.into_network_config(&name)?;
                Ok((name, network))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let solidity_version = match raw.solidity {
            RawSolidityConfig::Version(version) => version,
            RawSolidityConfig::Detailed { version } => version,
        };

        Ok(Self {
            sources: root.join(
                raw.paths
                    .sources
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCES_DIR)),
            ),
            artifacts: root.join(
                raw.paths
                    .artifacts
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS_DIR)),
            ),
            root,
            solidity_version,
            default_network: raw.default_network,
            networks,
        })
    }

    pub fn network_names(&self) -> Vec<&str> {
        self.networks.keys().map(String::as_str).collect()
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        self.networks.get(name).ok_or_else(|| {
            DeployError::Config(format!(
                "unknown network {name:?}, expected one of: {}",
                self.network_names().join(", ")
            ))
        })
    }

    /// The explicitly requested network, else `defaultNetwork`.
    pub fn select_network(&self, requested: Option<&str>) -> Result<&NetworkConfig> {
        match requested.or(self.default_network.as_deref()) {
            Some(name) => self.network(name),
            None => Err(DeployError::Config(
                "no network selected and no defaultNetwork configured".into(),
            )),
        }
    }
}

impl RawNetworkConfig {
    fn into_network_config(self, name: &str) -> Result<NetworkConfig> {
        let url = Url::parse(&self.url)
            .map_err(|e| DeployError::Config(format!("network {name}: bad url {}: {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeployError::Config(format!(
                "network {name}: unsupported url scheme {}",
                url.scheme()
            )));
        }

        let accounts = match self.accounts {
            None => Accounts::Remote,
            Some(RawAccounts::Named(s)) if s == REMOTE_ACCOUNTS => Accounts::Remote,
            Some(RawAccounts::Named(s)) => {
                return Err(DeployError::Config(format!(
                    "network {name}: accounts must be \"{REMOTE_ACCOUNTS}\", a list of keys or an HD config, got {s:?}"
                )))
            }
            Some(RawAccounts::PrivateKeys(keys)) => Accounts::PrivateKeys(
                keys.into_iter()
                    .map(|key| resolve_secret(name, key))
                    .collect::<Result<_>>()?,
            ),
            Some(RawAccounts::Mnemonic(hd)) => Accounts::Mnemonic {
                phrase: resolve_secret(name, hd.mnemonic)?,
                derivation_path: hd.path,
                initial_index: hd.initial_index,
            },
        };

        Ok(NetworkConfig {
            name: name.to_owned(),
            url,
            accounts,
            chain_id: self.chain_id,
            confirmation_timeout: self.confirmation_timeout.map(Duration::from_millis),
        })
    }
}

/// `${VAR}` is looked up in the environment, anything else is taken literally.
fn resolve_secret(network: &str, value: String) -> Result<String> {
    let Some(var) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) else {
        tracing::warn!(network, "credential is embedded in the config file, prefer a ${{VAR}} reference");
        return Ok(value);
    };

    std::env::var(var).map_err(|_| {
        DeployError::Config(format!(
            "network {network}: environment variable {var} is not set"
        ))
    })
}
