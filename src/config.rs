//! Controller configuration
//!
//! Every setting can be given as a flag or through the environment, which is
//! how the controller Deployment configures it.

use std::path::PathBuf;

use clap::{Args, Command, FromArgMatches};

use crate::import::{
    ImageResolver, DEFAULT_REGISTRATION_IMAGE, DEFAULT_WORK_IMAGE, REGISTRATION_COMPONENT,
    WORK_COMPONENT,
};

/// Settings shared by the controller and the offline renderer
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Hub API server URL written into bootstrap kubeconfigs
    ///
    /// When unset, the server recorded on the bootstrap token secret is used.
    #[arg(long, env = "HUB_API_SERVER")]
    pub hub_api_server: Option<String>,

    /// PEM bundle trusted by agents when contacting the hub
    #[arg(long, env = "HUB_CA_FILE")]
    pub hub_ca_file: Option<PathBuf>,

    /// Default registration agent image
    #[arg(long, env = "REGISTRATION_IMAGE", default_value = DEFAULT_REGISTRATION_IMAGE)]
    pub registration_image: String,

    /// Default work agent image
    #[arg(long, env = "WORK_IMAGE", default_value = DEFAULT_WORK_IMAGE)]
    pub work_image: String,
}

impl ControllerConfig {
    /// Load the configuration from the environment alone
    ///
    /// Used when the binary runs without a subcommand.
    pub fn from_env() -> Result<Self, clap::Error> {
        let matches = Self::augment_args(Command::new("cluster-import"))
            .try_get_matches_from(["cluster-import"])?;
        Self::from_arg_matches(&matches)
    }

    /// Image resolver seeded with the configured defaults
    pub fn image_resolver(&self) -> ImageResolver {
        ImageResolver::new()
            .with_default(REGISTRATION_COMPONENT, self.registration_image.clone())
            .with_default(WORK_COMPONENT, self.work_image.clone())
    }

    /// Read the hub CA bundle, if one was configured
    pub fn load_hub_ca(&self) -> std::io::Result<Option<Vec<u8>>> {
        self.hub_ca_file.as_ref().map(std::fs::read).transpose()
    }
}
