use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub output_path: String,
    pub contacts: usize,
    pub messages: usize,
    pub conversations: usize,
    pub malformed_entries: usize,
}

/// 依序執行 extract → transform → load
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
        Ok(self.run_with_report().await?.output_path)
    }

    pub async fn run_with_report(&self) -> Result<RunReport> {
        tracing::info!("🚀 Starting ETL process");
        self.monitor.log_stats("Start");

        tracing::info!("📥 Extracting contacts and transcripts");
        let batch = self.pipeline.extract().await?;
        let contacts: usize = batch.contact_files.iter().map(|(_, r)| r.len()).sum();
        tracing::info!(
            "✅ Extracted {} contacts and {} transcripts",
            contacts,
            batch.transcripts.len()
        );
        self.monitor.log_stats("Extract");

        tracing::info!("🔄 Transforming");
        let result = self.pipeline.transform(batch).await?;
        let report = RunReport {
            output_path: String::new(),
            contacts: result.contacts.len(),
            messages: result.messages.len(),
            conversations: result.summary.len(),
            malformed_entries: result.malformed_entries,
        };
        tracing::info!(
            "✅ Transformed {} messages into {} conversation summaries",
            report.messages,
            report.conversations
        );
        self.monitor.log_stats("Transform");

        tracing::info!("💾 Loading results");
        let output_path = self.pipeline.load(result).await?;
        self.monitor.log_stats("Load");
        self.monitor.log_final_stats();

        tracing::info!("📁 Output saved to: {}", output_path);
        Ok(RunReport {
            output_path,
            ..report
        })
    }
}
