//! `conexus start`: run the gateway in the foreground.

use anyhow::Context;
use conexus_kernel::{GatewayKernel, KernelConfig};
use tracing::info;

pub fn cmd_start(mut config: KernelConfig, listen: Option<String>) -> anyhow::Result<()> {
    if let Some(addr) = listen {
        config.gateway.listen_addr = addr;
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    rt.block_on(async move {
        let kernel = GatewayKernel::boot(config).context("Kernel boot failed")?;
        let addr = kernel.start().await.context("Gateway failed to start")?;

        println!("Conexus gateway listening on {addr}");
        println!("Gateway identity: {}", kernel.identity().did());
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Ctrl+C received, shutting down");

        kernel.shutdown().await;
        let metrics = kernel.metrics();
        info!(
            registrations = metrics.registrations,
            delivered = metrics.delivered,
            rejected = metrics.rejected,
            evictions = metrics.evictions,
            "final gateway metrics"
        );
        Ok(())
    })
}
