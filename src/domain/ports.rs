use crate::domain::model::{ExtractedBatch, Record, TimeWindow, TransformResult};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn output_path(&self) -> &str;
    fn output_prefix(&self) -> &str;
    fn filetype(&self) -> &str;
    fn interaction_type(&self) -> &str;
    /// Inclusive day range; `None` means yesterday.
    fn date_range(&self) -> Option<(NaiveDate, NaiveDate)>;
    fn chunk_size(&self) -> usize;
    fn system_timezone(&self) -> Tz;
    fn api_timezone(&self) -> Tz;
    /// Storage prefix for untouched API payloads.
    fn raw_prefix(&self) -> &str;
    /// Column that identifies a conversation.
    fn group_key(&self) -> &str;
}

/// Supplies raw contacts and transcripts; transport is up to the implementation.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_contacts(&self, interaction_type: &str, window: &TimeWindow)
        -> Result<Vec<Record>>;
    async fn fetch_transcripts(&self, contact_ids: &[i64]) -> Result<Vec<serde_json::Value>>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<ExtractedBatch>;
    async fn transform(&self, data: ExtractedBatch) -> Result<TransformResult>;
    async fn load(&self, result: TransformResult) -> Result<String>;
}
