use std::{fmt, sync::Arc, time::Duration};

use ethers::{
    providers::Middleware,
    types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U64},
    utils::to_checksum,
};

use crate::{
    artifacts::{ArtifactStore, ContractArtifact},
    config::{NetworkConfig, ProjectConfig},
    error::{DeployError, Result},
    ethers_client::{get_deployer_client, DeployerClient, DEFAULT_POLLING_INTERVAL},
};

pub const SENSOR_DATA_CONTRACT: &str = "SensorData";

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct DeployOptions {
    /// Overrides the network's `confirmationTimeout` when set.
    pub confirmation_timeout: Option<Duration>,
    pub polling_interval: Duration,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            confirmation_timeout: None,
            polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }
}

impl DeployOptions {
    fn confirmation_timeout_for(&self, network: &NetworkConfig) -> Duration {
        self.confirmation_timeout
            .or(network.confirmation_timeout)
            .unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentStatus {
    Unstarted,
    Deploying,
    Deployed,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }

    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Unstarted, Deploying) | (Unstarted, Failed) | (Deploying, Deployed) | (Deploying, Failed)
        )
    }
}

/// A confirmed deployment. Lives for the rest of the run only.
#[derive(Clone, Debug, PartialEq)]
pub struct Deployment {
    pub contract: String,
    pub address: Address,
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    pub chain_id: u64,
    pub deployer: Address,
}

impl Deployment {
    /// EIP-55 checksummed address.
    pub fn checksummed_address(&self) -> String {
        to_checksum(&self.address, None)
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Contract deployed to: {}", self.checksummed_address())
    }
}

/// Creation code plus encoded constructor arguments. Only argument-less
/// constructors are supported.
pub fn deployment_data(artifact: &ContractArtifact) -> Result<Bytes> {
    match artifact.abi.constructor() {
        Some(constructor) if !constructor.inputs.is_empty() => Err(DeployError::Deployment(format!(
            "{} constructor expects {} argument(s), none were given",
            artifact.contract_name,
            constructor.inputs.len()
        ))),
        Some(constructor) => constructor
            .encode_input(artifact.bytecode.to_vec(), &[])
            .map(Bytes::from)
            .map_err(|e| DeployError::Deployment(e.to_string())),
        None => Ok(artifact.bytecode.clone()),
    }
}

struct DeploymentRun<'a> {
    contract: &'a str,
    network: &'a str,
    status: DeploymentStatus,
}

impl DeploymentRun<'_> {
    fn transition(&mut self, next: DeploymentStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.status
        );
        tracing::debug!(contract = self.contract, network = self.network, from = ?self.status, to = ?next, "status");
        self.status = next;
    }
}

/// Deploy `SensorData` to `network` with no constructor arguments.
pub async fn deploy_sensor_data(
    config: &ProjectConfig,
    network: &NetworkConfig,
    options: &DeployOptions,
) -> Result<Deployment> {
    deploy_contract(config, network, SENSOR_DATA_CONTRACT, options).await
}

pub async fn deploy_contract(
    config: &ProjectConfig,
    network: &NetworkConfig,
    contract: &str,
    options: &DeployOptions,
) -> Result<Deployment> {
    let mut run = DeploymentRun {
        contract,
        network: &network.name,
        status: DeploymentStatus::Unstarted,
    };

    let result = try_deploy(&mut run, config, network, options).await;
    match &result {
        Ok(deployment) => {
            run.transition(DeploymentStatus::Deployed);
            tracing::info!(
                contract,
                address = %deployment.checksummed_address(),
                tx_hash = ?deployment.transaction_hash,
                block = ?deployment.block_number,
                "deployed"
            );
        }
        Err(e) => {
            run.transition(DeploymentStatus::Failed);
            tracing::debug!(contract, network = %network.name, error = %e, "run ended in failure");
        }
    }
    result
}

async fn try_deploy(
    run: &mut DeploymentRun<'_>,
    config: &ProjectConfig,
    network: &NetworkConfig,
    options: &DeployOptions,
) -> Result<Deployment> {
    let contract = run.contract;

    // 1. resolve the factory
    let artifact = ArtifactStore::new(&config.artifacts).resolve(contract)?;
    artifact.ensure_compiler_version(&config.solidity_version)?;

    run.transition(DeploymentStatus::Deploying);
    tracing::info!(contract, network = %network.name, url = %network.url, "deploying");

    // 2. deploy
    let data = deployment_data(&artifact)?;
    let (client, chain_id) = get_deployer_client(network).await?;
    let timeout = options.confirmation_timeout_for(network);

    // 3. confirm
    let (receipt, address) = match client {
        DeployerClient::Local(signer) => {
            send_and_confirm(signer, data, timeout, options.polling_interval).await?
        }
        DeployerClient::Remote(provider) => {
            send_and_confirm(provider, data, timeout, options.polling_interval).await?
        }
    };

    // 4. report
    Ok(Deployment {
        contract: contract.to_owned(),
        address,
        transaction_hash: receipt.transaction_hash,
        block_number: receipt.block_number.map(|n| n.as_u64()),
        chain_id,
        deployer: receipt.from,
    })
}

async fn send_and_confirm<M: Middleware>(
    client: Arc<M>,
    data: Bytes,
    timeout: Duration,
    polling_interval: Duration,
) -> Result<(TransactionReceipt, Address)> {
    let tx = TransactionRequest::new().data(data);

    let pending = client
        .send_transaction(tx, None)
        .await
        .map_err(|e| DeployError::Deployment(e.to_string()))?
        .interval(polling_interval);
    let tx_hash = pending.tx_hash();
    tracing::info!(?tx_hash, "deployment transaction sent, awaiting receipt");

    let receipt = match tokio::time::timeout(timeout, pending).await {
        Err(_) => {
            return Err(DeployError::ConfirmationTimeout {
                tx_hash: format!("{tx_hash:?}"),
                reason: format!("no receipt after {timeout:?}"),
            })
        }
        Ok(Err(e)) => return Err(DeployError::Deployment(e.to_string())),
        Ok(Ok(None)) => {
            return Err(DeployError::ConfirmationTimeout {
                tx_hash: format!("{tx_hash:?}"),
                reason: "transaction was dropped".into(),
            })
        }
        Ok(Ok(Some(receipt))) => receipt,
    };

    check_receipt(&receipt)?;
    let address = receipt.contract_address.ok_or_else(|| {
        DeployError::Deployment(format!("receipt for {tx_hash:?} has no contract address"))
    })?;

    let code = client
        .get_code(address, None)
        .await
        .map_err(|e| DeployError::Deployment(e.to_string()))?;
    if code.is_empty() {
        return Err(DeployError::Deployment(format!(
            "no code at {address:?} after deployment"
        )));
    }

    Ok((receipt, address))
}

fn check_receipt(receipt: &TransactionReceipt) -> Result<()> {
    if receipt.status == Some(U64::zero()) {
        return Err(DeployError::Deployment(format!(
            "deployment transaction {:?} reverted",
            receipt.transaction_hash
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use ethers::abi::Abi;

    use super::*;
    use crate::artifacts::test_utils::{
        write_build_info, write_hardhat_artifact, SENSOR_DATA_ABI, TEST_BYTECODE,
    };

    fn test_artifact(abi: &str) -> ContractArtifact {
        ContractArtifact {
            contract_name: SENSOR_DATA_CONTRACT.to_owned(),
            source_name: None,
            path: "SensorData.json".into(),
            abi: serde_json::from_str::<Abi>(abi).unwrap(),
            bytecode: hex::decode(&TEST_BYTECODE[2..]).unwrap().into(),
            solc_version: None,
        }
    }

    fn unreachable_project(dir: &Path) -> ProjectConfig {
        ProjectConfig::from_json_str(
            r#"{
                "solidity": "0.8.28",
                "networks": {
                    "ganache": {
                        "url": "http://127.0.0.1:1",
                        "accounts": ["0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"]
                    }
                }
            }"#,
            dir,
        )
        .unwrap()
    }

    #[test]
    fn test_deployment_data_without_constructor() {
        let artifact = test_artifact(SENSOR_DATA_ABI);
        assert_eq!(deployment_data(&artifact).unwrap(), artifact.bytecode);

        let artifact = test_artifact(r#"[{"type":"constructor","stateMutability":"nonpayable","inputs":[]}]"#);
        assert_eq!(deployment_data(&artifact).unwrap(), artifact.bytecode);
    }

    #[test]
    fn test_constructor_arguments_are_rejected() {
        let artifact = test_artifact(
            r#"[{"type":"constructor","stateMutability":"nonpayable",
                 "inputs":[{"name":"owner","type":"address"}]}]"#,
        );
        let err = deployment_data(&artifact).unwrap_err();
        assert!(matches!(err, DeployError::Deployment(_)), "{err:?}");
    }

    #[test]
    fn test_status_transitions_are_linear() {
        use DeploymentStatus::*;

        assert!(Unstarted.can_transition_to(Deploying));
        assert!(Unstarted.can_transition_to(Failed));
        assert!(Deploying.can_transition_to(Deployed));
        assert!(Deploying.can_transition_to(Failed));

        assert!(!Unstarted.can_transition_to(Deployed));
        assert!(!Deploying.can_transition_to(Unstarted));
        for terminal in [Deployed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Unstarted, Deploying, Deployed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_result_line() {
        let deployment = Deployment {
            contract: SENSOR_DATA_CONTRACT.to_owned(),
            address: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse().unwrap(),
            transaction_hash: H256::zero(),
            block_number: Some(1),
            chain_id: 1337,
            deployer: Address::zero(),
        };

        let line = deployment.to_string();
        assert_eq!(
            line,
            "Contract deployed to: 0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );

        let address = line.strip_prefix("Contract deployed to: 0x").unwrap();
        assert_eq!(address.len(), 40);
        assert!(address.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_confirmation_timeout_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = unreachable_project(dir.path());
        let mut network = config.network("ganache").unwrap().clone();

        let options = DeployOptions::default();
        assert_eq!(options.confirmation_timeout_for(&network), DEFAULT_CONFIRMATION_TIMEOUT);

        network.confirmation_timeout = Some(Duration::from_secs(5));
        assert_eq!(options.confirmation_timeout_for(&network), Duration::from_secs(5));

        let options = DeployOptions {
            confirmation_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        assert_eq!(options.confirmation_timeout_for(&network), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_artifact_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = unreachable_project(dir.path());
        let network = config.network("ganache").unwrap();

        let err = deploy_sensor_data(&config, network, &DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Resolution { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_compiler_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = unreachable_project(dir.path());
        write_hardhat_artifact(
            &config.artifacts,
            "contracts/SensorData.sol",
            "SensorData",
            SENSOR_DATA_ABI,
            TEST_BYTECODE,
        );
        write_build_info(&config.artifacts, "contracts/SensorData.sol", "SensorData", "0.8.19");

        let err = deploy_sensor_data(&config, config.network("ganache").unwrap(), &DeployOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("0.8.19"), "{err}");
    }

    #[tokio::test]
    async fn test_unreachable_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = unreachable_project(dir.path());
        write_hardhat_artifact(
            &config.artifacts,
            "contracts/SensorData.sol",
            "SensorData",
            SENSOR_DATA_ABI,
            TEST_BYTECODE,
        );
        write_build_info(&config.artifacts, "contracts/SensorData.sol", "SensorData", "0.8.28");

        let err = deploy_sensor_data(&config, config.network("ganache").unwrap(), &DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Deployment(_)), "{err:?}");
    }
}
