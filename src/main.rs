use clap::Parser;
use contact_etl::config::toml_config::TomlConfig;
use contact_etl::config::transforms_config::TransformsConfig;
use contact_etl::core::etl::RunReport;
use contact_etl::core::persist::{object_key, FileType};
use contact_etl::core::{ConfigProvider, RecordSource};
use contact_etl::utils::error::{ErrorSeverity, EtlError, Result};
use contact_etl::utils::time::{day_windows, yesterday};
use contact_etl::utils::{logger, validation::Validate};
use contact_etl::{
    CliConfig, ContactPipeline, EtlEngine, IcescapeClient, LocalStorage, ReplaySource,
};

#[tokio::main]
async fn main() {
    let args = CliConfig::parse();

    // 載入 TOML 配置
    let mut config = match TomlConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 初始化日誌
    let log_level = config.monitoring.as_ref().and_then(|m| m.log_level.clone());
    logger::init_cli_logger(args.verbose, log_level.as_deref());
    tracing::info!("🚀 Starting contact-etl");
    tracing::info!("📁 Configuration loaded from: {}", args.config);

    args.apply_overrides(&mut config);

    match execute(&args, &config).await {
        Ok(Some(report)) => {
            tracing::info!("✅ ETL process completed successfully!");
            println!("✅ ETL process completed successfully!");
            println!("📁 Output saved to: {}", report.output_path);
            println!(
                "📊 {} contacts, {} messages, {} conversations",
                report.contacts, report.messages, report.conversations
            );
            if report.malformed_entries > 0 {
                println!(
                    "⚠️ {} malformed transcript entries were skipped",
                    report.malformed_entries
                );
            }
        }
        Ok(None) => {}
        Err(e) => exit_with(e),
    }
}

async fn execute(args: &CliConfig, config: &TomlConfig) -> Result<Option<RunReport>> {
    config.validate()?;
    let transforms = TransformsConfig::from_file(&config.transform.transforms_file)?;
    tracing::info!("✅ Configuration loaded and validated successfully");

    display_config_summary(config, &transforms, args);
    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No actual processing will occur");
        perform_dry_run(config, &transforms)?;
        return Ok(None);
    }

    let monitor_enabled = args.monitor || config.monitoring_enabled();
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let report = match &args.offline {
        Some(dir) => {
            tracing::info!("📂 Offline mode, replaying raw files from {}", dir);
            let source = ReplaySource::new(LocalStorage::new(dir.as_str()), "");
            run(source, config, transforms, monitor_enabled).await?
        }
        None => {
            let source = config
                .source
                .clone()
                .ok_or_else(|| EtlError::MissingConfigError {
                    field: "source".to_string(),
                })?;
            let client = IcescapeClient::connect(source).await?;
            run(client, config, transforms, monitor_enabled).await?
        }
    };
    Ok(Some(report))
}

async fn run<R: RecordSource>(
    source: R,
    config: &TomlConfig,
    transforms: TransformsConfig,
    monitor_enabled: bool,
) -> Result<RunReport> {
    let storage = LocalStorage::new(config.output_path());
    let pipeline = ContactPipeline::new(storage, source, config.clone(), transforms);

    #[cfg(feature = "warehouse")]
    let pipeline = match &config.load.warehouse_url {
        Some(url) => pipeline.with_warehouse(contact_etl::adapters::warehouse::PostgresSink::new(
            url.as_str(),
        )),
        None => pipeline,
    };

    EtlEngine::new_with_monitoring(pipeline, monitor_enabled)
        .run_with_report()
        .await
}

fn exit_with(e: EtlError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ ETL process failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

fn display_config_summary(config: &TomlConfig, transforms: &TransformsConfig, args: &CliConfig) {
    println!("📋 Configuration Summary:");
    println!(
        "  Pipeline: {} v{}",
        config.pipeline.name, config.pipeline.version
    );
    match (&args.offline, &config.source) {
        (Some(dir), _) => println!("  Source: offline files in {}", dir),
        (None, Some(source)) => println!("  Source: {}", source.contacts_url),
        (None, None) => println!("  Source: <none>"),
    }
    println!("  Interaction type: {}", config.interaction_type());
    match config.date_range() {
        Some((start, end)) => println!("  Dates: {} .. {}", start, end),
        None => println!("  Dates: yesterday"),
    }
    println!(
        "  Timezones: system {}, api {}",
        config.system_timezone(),
        config.api_timezone()
    );
    println!("  Output: {} ({})", config.output_path(), config.filetype());
    println!(
        "  Transforms: {} transcript, {} summary",
        transforms.transcript.len(),
        transforms.transcript_meta.len()
    );
    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }
    println!();
}

fn perform_dry_run(config: &TomlConfig, transforms: &TransformsConfig) -> Result<()> {
    println!("🔍 Dry Run Analysis:");
    println!();

    let system = config.system_timezone();
    let (start, end) = config.date_range().unwrap_or_else(|| {
        let today = chrono::Utc::now().with_timezone(&system).date_naive();
        let day = yesterday(today);
        (day, day)
    });
    println!("📡 Requests:");
    for window in day_windows(start, end, system, config.api_timezone())? {
        println!("  {}: {} .. {}", window.day, window.start, window.end);
    }
    println!("  Transcript chunk size: {}", config.chunk_size());

    println!();
    println!("⚙️ Transcript transforms:");
    for spec in &transforms.transcript {
        println!("  {} -> {} {:?}", spec.name(), spec.output, spec.resolve_inputs());
    }
    println!("⚙️ Summary transforms:");
    for spec in &transforms.transcript_meta {
        println!("  {} -> {} {:?}", spec.name(), spec.output, spec.resolve_inputs());
    }

    println!();
    println!("💾 Output:");
    let filetype: FileType = config.filetype().parse()?;
    for name in ["contacts", "messages", "summary"] {
        println!("  {}", object_key(config.output_prefix(), name, filetype));
    }
    Ok(())
}
