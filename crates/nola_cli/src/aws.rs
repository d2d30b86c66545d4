use aws_config::{BehaviorVersion, Region, SdkConfig};
use nola_core::config::Config;
use tracing::debug;

/// One SDK configuration per command invocation, shared by every client.
pub async fn load_sdk_config(config: &Config) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
    if let Some(profile) = &config.profile {
        loader = loader.profile_name(profile);
    }
    debug!(region = %config.region, profile = ?config.profile, "loading AWS configuration");
    loader.load().await
}
