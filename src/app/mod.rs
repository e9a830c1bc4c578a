// Wiring: builds the production adapters from configuration.

use crate::adapters::{Credentials, FileLayerSource, PortalClient, ZipTilePackager};
use crate::config::PublishConfig;
use crate::core::batch::PublishBatch;
use crate::core::orchestrator::ReplacementOrchestrator;
use crate::utils::error::Result;

pub type PortalBatch = PublishBatch<FileLayerSource, ZipTilePackager, PortalClient>;

pub fn layer_source(config: &PublishConfig) -> FileLayerSource {
    FileLayerSource::new(
        &config.project.layer_root,
        config.layer_extension(),
        &config.project.spatial_reference_layer,
        config.spatial_reference_wkid(),
    )
}

pub fn portal_client(config: &PublishConfig) -> Result<PortalClient> {
    let client = PortalClient::new(
        &config.portal.url,
        Credentials {
            username: config.portal.username.clone(),
            password: config.portal.password.clone(),
        },
        config.portal.owner.clone(),
    )?
    .with_timeout(config.timeout())?
    .with_folder(config.portal.folder_id.clone())
    .with_publish_polling(config.publish_poll_interval(), config.publish_max_polls());
    Ok(client)
}

pub fn build_batch(config: &PublishConfig, monitor_enabled: bool) -> Result<PortalBatch> {
    let orchestrator = ReplacementOrchestrator::new(
        layer_source(config),
        ZipTilePackager::new(),
        portal_client(config)?,
        config.output_dir(),
        config.sharing_policy(),
    );
    Ok(PublishBatch::new(orchestrator).with_monitoring(monitor_enabled))
}
