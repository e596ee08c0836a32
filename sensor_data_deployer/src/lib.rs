pub mod artifacts;
pub mod compile;
pub mod config;
pub mod deployer;
pub mod error;
pub mod ethers_client;

pub use deployer::{deploy_sensor_data, DeployOptions, Deployment, SENSOR_DATA_CONTRACT};
pub use error::{DeployError, Result};
