use anyhow::Context;
use atclean::config::Command;
use atclean::core::Pipeline;
use atclean::utils::error::{AtCleanError, ErrorSeverity};
use atclean::utils::{logger, validation::Validate};
use atclean::{
    CleanPipeline, CliConfig, DetectPipeline, DownloadPipeline, EtlEngine, LocalStorage,
    TomlConfig,
};
use clap::Parser;

async fn run_pipeline<P: Pipeline>(pipeline: P, monitor_enabled: bool) -> atclean::Result<String> {
    let engine = EtlEngine::new_with_monitoring(pipeline, monitor_enabled);
    engine.run().await
}

/// 讀取配置並套用命令列覆蓋
fn resolve_config(cli: &CliConfig) -> anyhow::Result<TomlConfig> {
    let mut config = cli.load_toml().context("Failed to load the configuration file")?;
    match &cli.command {
        Command::Download(args) => args.apply(&mut config),
        Command::Clean(args) => args.apply(&mut config),
        Command::Detect(args) => args.apply(&mut config),
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(cli: &CliConfig, config: TomlConfig) -> anyhow::Result<String> {
    let storage = LocalStorage::default();
    let monitor_enabled = cli.monitor_enabled(&config);
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let output = match &cli.command {
        Command::Download(args) => {
            let options = args.options();
            options.validate()?;
            run_pipeline(DownloadPipeline::new(storage, config, options), monitor_enabled).await?
        }
        Command::Clean(args) => {
            let options = args.options(&config);
            options.validate()?;
            run_pipeline(CleanPipeline::new(storage, config, options), monitor_enabled).await?
        }
        Command::Detect(args) => {
            let options = args.options(&config);
            options.validate()?;
            run_pipeline(DetectPipeline::new(storage, config, options), monitor_enabled).await?
        }
    };
    Ok(output)
}

fn exit_code(e: &anyhow::Error) -> i32 {
    // 根據錯誤嚴重程度決定退出碼
    match e.downcast_ref::<AtCleanError>().map(AtCleanError::severity) {
        Some(ErrorSeverity::Low) => 0,
        Some(ErrorSeverity::Medium) => 2,
        Some(ErrorSeverity::High) | None => 1,
        Some(ErrorSeverity::Critical) => 3,
    }
}

fn report(e: &anyhow::Error) {
    match e.downcast_ref::<AtCleanError>() {
        Some(err) => {
            tracing::error!(
                "❌ {:#} (Category: {:?}, Severity: {:?})",
                e,
                err.category(),
                err.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", err.recovery_suggestion());
            eprintln!("❌ {}", err.user_friendly_message());
            eprintln!("💡 Suggestion: {}", err.recovery_suggestion());
        }
        None => {
            tracing::error!("❌ {:#}", e);
            eprintln!("❌ {:#}", e);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::info!("Starting atclean");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let result = match resolve_config(&cli) {
        Ok(config) => run(&cli, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(output_path) => {
            println!("✅ atclean finished successfully!");
            println!("📁 Output saved to: {}", output_path);
        }
        Err(e) => {
            report(&e);
            let code = exit_code(&e);
            if code > 0 {
                std::process::exit(code);
            }
        }
    }
}
