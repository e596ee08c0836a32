use std::{sync::Arc, time::Duration};

use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{coins_bip39::English, LocalWallet, MnemonicBuilder, Signer},
    types::Address,
};

use crate::{
    config::{Accounts, NetworkConfig},
    error::{DeployError, Result},
};

pub type EtherSigner = SignerMiddleware<Provider<Http>, LocalWallet>;

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(500);

const DEFAULT_HD_PATH: &str = "m/44'/60'/0'/0";

/// The account that signs the deployment.
pub enum DeployerClient {
    /// Signed locally with a configured key.
    Local(Arc<EtherSigner>),
    /// Signed by the node with one of its unlocked accounts.
    Remote(Arc<Provider<Http>>),
}

impl DeployerClient {
    pub fn address(&self) -> Option<Address> {
        match self {
            DeployerClient::Local(signer) => Some(signer.address()),
            DeployerClient::Remote(provider) => provider.default_sender(),
        }
    }
}

pub fn get_provider(network: &NetworkConfig) -> Result<Provider<Http>> {
    let provider = Provider::<Http>::try_from(network.url.as_str())
        .map_err(|e| DeployError::Config(format!("network {}: {e}", network.name)))?;
    Ok(provider.interval(DEFAULT_POLLING_INTERVAL))
}

/// Ask the node for its chain id, checking it against the pinned one if set.
pub async fn get_chain_id(provider: &Provider<Http>, network: &NetworkConfig) -> Result<u64> {
    let chain_id = provider
        .get_chainid()
        .await
        .map_err(|e| {
            DeployError::Deployment(format!(
                "could not reach network {} at {}: {e}",
                network.name, network.url
            ))
        })?
        .as_u64();

    match network.chain_id {
        Some(expected) if expected != chain_id => Err(DeployError::Deployment(format!(
            "network {} is configured with chain id {expected}, but the node reports {chain_id}",
            network.name
        ))),
        _ => Ok(chain_id),
    }
}

/// Build the wallet for locally signed accounts. `None` means the node signs.
pub fn get_local_wallet(network: &NetworkConfig, chain_id: u64) -> Result<Option<LocalWallet>> {
    let wallet = match &network.accounts {
        Accounts::Remote => return Ok(None),
        Accounts::PrivateKeys(keys) => {
            let key = keys.first().ok_or_else(|| {
                DeployError::Config(format!("network {} has no accounts", network.name))
            })?;
            key.trim_start_matches("0x")
                .parse::<LocalWallet>()
                .map_err(|e| {
                    DeployError::Config(format!("network {}: invalid private key: {e}", network.name))
                })?
        }
        Accounts::Mnemonic {
            phrase,
            derivation_path,
            initial_index,
        } => {
            let base = derivation_path.as_deref().unwrap_or(DEFAULT_HD_PATH);
            let path = format!("{}/{initial_index}", base.trim_end_matches('/'));
            MnemonicBuilder::<English>::default()
                .phrase(phrase.as_str())
                .derivation_path(&path)
                .and_then(|builder| builder.build())
                .map_err(|e| {
                    DeployError::Config(format!("network {}: invalid mnemonic: {e}", network.name))
                })?
        }
    };

    Ok(Some(wallet.with_chain_id(chain_id)))
}

/// Connect to the network and set up the deploying account.
pub async fn get_deployer_client(network: &NetworkConfig) -> Result<(DeployerClient, u64)> {
    let provider = get_provider(network)?;
    let chain_id = get_chain_id(&provider, network).await?;

    let client = match get_local_wallet(network, chain_id)? {
        Some(wallet) => DeployerClient::Local(Arc::new(SignerMiddleware::new(provider, wallet))),
        None => {
            let accounts = provider
                .get_accounts()
                .await
                .map_err(|e| DeployError::Deployment(format!("could not list node accounts: {e}")))?;
            let sender = accounts.first().copied().ok_or_else(|| {
                DeployError::Deployment(format!(
                    "network {} has no configured accounts and the node exposes none",
                    network.name
                ))
            })?;
            DeployerClient::Remote(Arc::new(provider.with_sender(sender)))
        }
    };

    tracing::info!(
        network = %network.name,
        chain_id,
        deployer = ?client.address(),
        "connected"
    );
    Ok((client, chain_id))
}


#[cfg(test)]
mod tests {
    use super::*;

    const HARDHAT_KEY_0: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const HARDHAT_ADDRESS_0: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn network(accounts: Accounts) -> NetworkConfig {
        NetworkConfig {
            name: "local".to_owned(),
            url: "http://127.0.0.1:8545".parse().unwrap(),
            accounts,
            chain_id: None,
            confirmation_timeout: None,
        }
    }

    #[test]
    fn test_private_key_wallet() {
        let network = network(Accounts::PrivateKeys(vec![
            HARDHAT_KEY_0.to_owned(),
            "0x01".to_owned(),
        ]));
        let wallet = get_local_wallet(&network, 1337).unwrap().unwrap();

        assert_eq!(wallet.address(), HARDHAT_ADDRESS_0.parse::<Address>().unwrap());
        assert_eq!(wallet.chain_id(), 1337);
    }

    #[test]
    fn test_mnemonic_wallet() {
        let network = network(Accounts::Mnemonic {
            phrase: TEST_MNEMONIC.to_owned(),
            derivation_path: None,
            initial_index: 0,
        });
        let wallet = get_local_wallet(&network, 31337).unwrap().unwrap();

        assert_eq!(wallet.address(), HARDHAT_ADDRESS_0.parse::<Address>().unwrap());
    }

    #[test]
    fn test_invalid_and_remote_accounts() {
        assert!(get_local_wallet(&network(Accounts::Remote), 1).unwrap().is_none());

        let err = get_local_wallet(&network(Accounts::PrivateKeys(vec![])), 1).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)), "{err:?}");

        let err =
            get_local_wallet(&network(Accounts::PrivateKeys(vec!["0xnothex".to_owned()])), 1)
                .unwrap_err();
        assert!(matches!(err, DeployError::Config(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_network() {
        let mut network = network(Accounts::Remote);
        network.url = "http://127.0.0.1:1".parse().unwrap();

        let err = get_deployer_client(&network).await.err().unwrap();
        assert!(matches!(err, DeployError::Deployment(_)), "{err:?}");
    }
}
