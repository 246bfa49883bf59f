use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client as S3Client;
use contact_etl::config::lambda::{LambdaConfig, S3Storage};
use contact_etl::config::transforms_config::TransformsConfig;
use contact_etl::core::Storage;
use contact_etl::utils::error::EtlError;
use contact_etl::utils::logger;
use contact_etl::utils::validation::Validate;
use contact_etl::{ContactPipeline, EtlEngine, IcescapeClient};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};

/// Event fields override the matching environment variables.
#[derive(Deserialize)]
pub struct Request {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub interaction_type: Option<String>,
    pub s3_prefix: Option<String>,
}

#[derive(Serialize)]
pub struct Response {
    pub message: String,
    pub output_path: String,
    pub contacts: usize,
    pub messages: usize,
    pub conversations: usize,
    pub malformed_entries: usize,
}

fn boxed(e: EtlError) -> Error {
    tracing::error!("❌ {} (Severity: {:?})", e, e.severity());
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    Box::new(e)
}

async fn function_handler(event: LambdaEvent<Request>) -> Result<Response, Error> {
    tracing::info!("🚀 Starting contact-etl Lambda function");

    let overrides = [
        ("START_DATE", event.payload.start_date),
        ("END_DATE", event.payload.end_date),
        ("INTERACTION_TYPE", event.payload.interaction_type),
        ("S3_PREFIX", event.payload.s3_prefix),
    ];
    let lambda_config = LambdaConfig::from_lookup(|name| {
        overrides
            .iter()
            .find(|(key, _)| *key == name)
            .and_then(|(_, value)| value.clone())
            .or_else(|| std::env::var(name).ok())
    })
    .map_err(boxed)?;
    lambda_config.validate().map_err(boxed)?;

    // 創建AWS配置和S3客戶端
    let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let config = aws_sdk_s3::config::Builder::from(&config)
        .region(Region::new(lambda_config.s3_region.clone()))
        .force_path_style(true)
        .build();
    let storage = S3Storage::new(S3Client::from_conf(config), lambda_config.s3_bucket.clone());

    let transforms_yaml = storage
        .read_file(&lambda_config.transforms_key)
        .await
        .map_err(boxed)?;
    let transforms = TransformsConfig::from_yaml_bytes(&transforms_yaml).map_err(boxed)?;

    let source = match &lambda_config.source {
        Some(source) => IcescapeClient::connect(source.clone()).await.map_err(boxed)?,
        None => {
            return Err(boxed(EtlError::MissingConfigError {
                field: "ICESCAPE_LOGIN_URL".to_string(),
            }))
        }
    };

    let pipeline = ContactPipeline::new(storage, source, lambda_config, transforms);
    let report = EtlEngine::new(pipeline)
        .run_with_report()
        .await
        .map_err(boxed)?;

    tracing::info!("✅ ETL Lambda function completed successfully");
    Ok(Response {
        message: "ETL process completed successfully".to_string(),
        output_path: report.output_path,
        contacts: report.contacts,
        messages: report.messages,
        conversations: report.conversations,
        malformed_entries: report.malformed_entries,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();
    run(service_fn(function_handler)).await
}
