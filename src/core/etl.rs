use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self) -> Result<String> {
        let name = self.pipeline.name();
        tracing::info!("🚀 Starting {} pipeline", name);
        self.monitor.log_stats("start");

        tracing::info!("📥 Loading input...");
        let extracted = self.pipeline.extract().await?;
        self.monitor.log_stats("extract");

        tracing::info!("🔄 Processing...");
        let transformed = self.pipeline.transform(extracted).await?;
        self.monitor.log_stats("transform");

        tracing::info!("💾 Writing output...");
        let output_path = self.pipeline.load(transformed).await?;
        self.monitor.log_stats("load");
        self.monitor.log_final_stats();

        tracing::info!("✅ {} pipeline finished: {}", name, output_path);
        Ok(output_path)
    }
}
