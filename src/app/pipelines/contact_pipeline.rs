use crate::config::transforms_config::TransformsConfig;
use crate::core::persist::{
    contacts_file_name, join_key, object_key, transcript_file_name, write_json, write_table, FileType,
};
use crate::core::transcript::TranscriptParser;
use crate::core::transformer::Transformer;
use crate::core::{ConfigProvider, Pipeline, Record, RecordSource, Storage, TransformResult};
use crate::domain::{ExtractedBatch, RawTranscript, Table, TimeWindow, Value};
use crate::utils::error::{EtlError, Result};
use crate::utils::time::{day_windows, yesterday, TimeNormalizer};
use std::collections::HashSet;

/// 聯絡中心管道：下載聯絡人與對話紀錄，解析後執行宣告式轉換
pub struct ContactPipeline<S: Storage, R: RecordSource, C: ConfigProvider> {
    storage: S,
    source: R,
    config: C,
    transforms: TransformsConfig,
    #[cfg(feature = "warehouse")]
    warehouse: Option<crate::adapters::warehouse::PostgresSink>,
}

impl<S: Storage, R: RecordSource, C: ConfigProvider> ContactPipeline<S, R, C> {
    pub fn new(storage: S, source: R, config: C, transforms: TransformsConfig) -> Self {
        Self {
            storage,
            source,
            config,
            transforms,
            #[cfg(feature = "warehouse")]
            warehouse: None,
        }
    }

    /// Also inserts the result tables into Postgres.
    #[cfg(feature = "warehouse")]
    pub fn with_warehouse(mut self, sink: crate::adapters::warehouse::PostgresSink) -> Self {
        self.warehouse = Some(sink);
        self
    }

    /// Days to request; defaults to yesterday in the system timezone.
    pub fn windows(&self) -> Result<Vec<TimeWindow>> {
        let system = self.config.system_timezone();
        let (start, end) = self.config.date_range().unwrap_or_else(|| {
            let today = chrono::Utc::now().with_timezone(&system).date_naive();
            let day = yesterday(today);
            (day, day)
        });
        day_windows(start, end, system, self.config.api_timezone())
    }

    fn raw_key(&self, name: &str) -> String {
        join_key(self.config.raw_prefix(), name)
    }

    fn filetype(&self) -> Result<FileType> {
        self.config.filetype().parse()
    }

    async fn download_transcripts(&self, ids: &[i64]) -> Result<Vec<RawTranscript>> {
        let chunk_size = self.config.chunk_size().max(1);
        let mut transcripts = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(chunk_size) {
            let payloads = self.source.fetch_transcripts(chunk).await?;
            if payloads.len() < chunk.len() {
                return Err(EtlError::ProcessingError {
                    message: format!(
                        "Requested {} transcripts but received {}",
                        chunk.len(),
                        payloads.len()
                    ),
                });
            }

            for (id, payload) in chunk.iter().zip(payloads) {
                write_json(&self.storage, &self.raw_key(&transcript_file_name(*id)), &payload)
                    .await?;
                transcripts.push(RawTranscript {
                    contact_id: *id,
                    payload,
                });
            }
            tracing::debug!("Downloaded {} / {} transcripts", transcripts.len(), ids.len());
        }
        Ok(transcripts)
    }
}

/// Contact id of a mapped (or raw) contact record.
fn contact_id(record: &Record) -> Option<i64> {
    let raw = record
        .data
        .get("contact_id")
        .or_else(|| record.data.get("ContactID"))?;
    match raw {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Contacts nobody handled have no transcript to download.
fn was_handled(record: &Record) -> bool {
    record
        .data
        .get("agent_id")
        .map(|agent| !agent.is_null())
        .unwrap_or(true)
}

#[async_trait::async_trait]
impl<S: Storage, R: RecordSource, C: ConfigProvider> Pipeline for ContactPipeline<S, R, C> {
    async fn extract(&self) -> Result<ExtractedBatch> {
        let interaction_type = self.config.interaction_type();
        let mut batch = ExtractedBatch::default();
        let mut ids = Vec::new();

        for window in self.windows()? {
            let raw = self.source.fetch_contacts(interaction_type, &window).await?;
            let file_name = contacts_file_name(interaction_type, window.day);
            write_json(&self.storage, &self.raw_key(&file_name), &raw).await?;

            let mapped = self.transforms.contacts.map_all(&raw);
            for record in &mapped {
                match contact_id(record) {
                    Some(id) if was_handled(record) => ids.push(id),
                    Some(_) => {}
                    None => tracing::warn!("⚠️ Contact without an id in {}", file_name),
                }
            }
            tracing::info!("📥 {} contacts on {}", mapped.len(), window.day);
            batch.contact_files.push((file_name, mapped));
        }

        tracing::info!("📡 Downloading {} transcripts", ids.len());
        batch.transcripts = self.download_transcripts(&ids).await?;
        Ok(batch)
    }

    async fn transform(&self, data: ExtractedBatch) -> Result<TransformResult> {
        let system = self.config.system_timezone();
        let parser = TranscriptParser::new(TimeNormalizer::new(Some(system)));
        let downloaded: HashSet<i64> = data.transcripts.iter().map(|t| t.contact_id).collect();

        let mut contacts = Vec::new();
        for (file_name, records) in data.contact_files {
            for mut record in records {
                let has_transcript = contact_id(&record)
                    .map(|id| downloaded.contains(&id))
                    .unwrap_or(false);
                record.data.insert(
                    "interaction_type".to_string(),
                    self.config.interaction_type().into(),
                );
                record
                    .data
                    .insert("transcript_downloaded".to_string(), has_transcript.into());
                record
                    .data
                    .insert("load_file".to_string(), file_name.clone().into());
                contacts.push(record);
            }
        }

        let mut malformed = 0;
        let mut parts = Vec::with_capacity(data.transcripts.len());
        for raw in &data.transcripts {
            let parsed = parser
                .parse(&raw.payload)
                .with_default_contact(Value::Int(raw.contact_id));
            malformed += parsed.warnings.len();
            parts.push(parsed.to_table());
        }
        let messages = Table::concat(&parts);
        tracing::info!(
            "💬 Parsed {} messages from {} transcripts",
            messages.len(),
            data.transcripts.len()
        );

        let (messages, summary) = if messages.is_empty() {
            tracing::info!("No messages to transform");
            (messages, Table::new())
        } else {
            let group_key = self.config.group_key();
            let primary = Transformer::new(self.transforms.transcript.clone())
                .with_group_key(group_key)
                .with_timezone(Some(system));
            let meta = Transformer::new(self.transforms.transcript_meta.clone())
                .with_group_key(group_key)
                .with_timezone(Some(system));

            let messages = primary.run_transforms(&messages)?;
            let summary = meta.run_meta_transforms(&messages)?;
            (messages, summary)
        };

        if malformed > 0 {
            tracing::warn!("⚠️ Skipped {} malformed transcript entries", malformed);
        }

        Ok(TransformResult {
            contacts: Table::from_records(&contacts),
            messages,
            summary,
            malformed_entries: malformed,
        })
    }

    async fn load(&self, result: TransformResult) -> Result<String> {
        let filetype = self.filetype()?;
        let prefix = self.config.output_prefix();

        for (name, table) in [
            ("contacts", &result.contacts),
            ("messages", &result.messages),
            ("summary", &result.summary),
        ] {
            let key = object_key(prefix, name, filetype);
            write_table(&self.storage, &key, name, table, filetype).await?;
            tracing::info!("💾 Saved {} ({} rows)", key, table.len());

            #[cfg(feature = "warehouse")]
            if let Some(sink) = &self.warehouse {
                sink.insert_table(name, table).await?;
            }
        }

        Ok(join_key(self.config.output_path(), prefix))
    }
}
