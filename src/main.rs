use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use kuberight::cli::{Args, Commands, DialectArg, ReportFormat, ScanArgs, StrategyArg};
use kuberight::config::{AiSettings, ScanConfig, SimpleLimitSettings, SimpleSettings};
use kuberight::discovery::{Discoverer, DiscoveryFilter};
use kuberight::k8s::K8sClient;
use kuberight::model::{ScanReport, WorkloadKind};
use kuberight::prom::client::{PromAuth, PromHttpClient};
use kuberight::prom::dialect::PromDialect;
use kuberight::prom::service::{resolve_dialect, MetricService};
use kuberight::reporting;
use kuberight::scan::{ClusterTarget, ScanRunner};
use kuberight::strategy::ai::{AiStrategy, HttpLlmClient};
use kuberight::strategy::simple::{SimpleLimitStrategy, SimpleStrategy};
use kuberight::strategy::Strategy;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    match args.command {
        Commands::Scan(scan) => run_scan_command(scan).await,
    }
}

fn scan_config(args: &ScanArgs) -> ScanConfig {
    let mut cfg = ScanConfig::default();
    cfg.history_duration_hours = args.history_duration_hours;
    cfg.timeframe_duration_minutes = args.timeframe_duration_minutes;
    cfg.points_required = args.points_required;
    cfg.max_workers = args.max_workers;
    cfg.cpu_min_millicores = args.cpu_min_millicores;
    cfg.memory_min_mib = args.memory_min_mib;
    cfg.allow_hpa = args.allow_hpa;
    cfg.use_oomkill_data = !args.no_oomkill_data;
    cfg.owner_batch_size = args.owner_batch_size;
    cfg.job_grouping_labels = args.job_group_labels.clone();
    cfg.cluster_label = args
        .cluster_label_key
        .clone()
        .zip(args.cluster_label_value.clone());
    cfg.simple = SimpleSettings {
        cpu_percentile: args.cpu_percentile,
        memory_buffer_percentage: args.memory_buffer_percentage,
        oom_memory_buffer_percentage: args.oom_memory_buffer_percentage,
    };
    cfg.simple_limit = SimpleLimitSettings {
        cpu_request_percentile: args.cpu_request_percentile,
        cpu_limit_percentile: args.cpu_limit_percentile,
        memory_buffer_percentage: args.memory_buffer_percentage,
        oom_memory_buffer_percentage: args.oom_memory_buffer_percentage,
    };
    cfg.ai = AiSettings {
        endpoint: args.ai_endpoint.clone().unwrap_or_default(),
        timeout: Duration::from_secs(args.ai_timeout_seconds),
        ..AiSettings::default()
    };
    cfg
}

fn discovery_filter(args: &ScanArgs) -> Result<DiscoveryFilter> {
    let mut kinds = Vec::new();
    for raw in &args.kinds {
        let kind: WorkloadKind = raw
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("invalid --kind {raw:?}"))?;
        kinds.push(kind);
    }
    Ok(DiscoveryFilter {
        namespaces: args.namespaces.clone(),
        kinds,
        selector: args.selector.clone(),
        allow_hpa: args.allow_hpa,
    })
}

fn parse_headers(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|h| {
            h.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .with_context(|| format!("header {h:?} must look like \"Name: value\""))
        })
        .collect()
}

fn build_strategy(args: &ScanArgs, cfg: &ScanConfig) -> Result<Arc<dyn Strategy>> {
    Ok(match args.strategy {
        StrategyArg::Simple => Arc::new(SimpleStrategy::new(cfg.simple.clone())),
        StrategyArg::SimpleLimit => Arc::new(SimpleLimitStrategy::new(cfg.simple_limit.clone())),
        StrategyArg::Ai => {
            if cfg.ai.endpoint.is_empty() {
                bail!("--strategy ai requires --ai-endpoint");
            }
            let llm = HttpLlmClient::new(&cfg.ai).context("building LLM client")?;
            Arc::new(AiStrategy::new(
                Arc::new(llm),
                cfg.ai.clone(),
                cfg.simple.clone(),
            ))
        }
    })
}

async fn run_scan_command(args: ScanArgs) -> Result<()> {
    println!("{}", "📐 Kuberight - container right-sizing".bright_cyan().bold());
    println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_cyan());

    info!("starting scan");
    let cfg = scan_config(&args);
    let filter = discovery_filter(&args)?;
    let strategy = build_strategy(&args, &cfg)?;

    print!("🔗 Connecting to cluster... ");
    let kube = match K8sClient::new(
        args.config_file.as_deref(),
        args.as_user.as_deref(),
        Some(&args.as_groups),
    )
    .await
    {
        Ok(client) => {
            println!("{}", "✅ Success".bright_green());
            client
        }
        Err(e) => {
            println!("{}", "❌ Failed".bright_red());
            eprintln!("Error: {}", e);
            return Err(e);
        }
    };
    let cluster_name = args
        .cluster_name
        .clone()
        .or_else(|| kube.cluster_name().map(str::to_string))
        .unwrap_or_else(|| "default".to_string());

    print!("📈 Connecting to Prometheus... ");
    let auth = match &args.prometheus_token {
        Some(token) => PromAuth::Bearer(token.clone()),
        None => PromAuth::None,
    };
    let prom = PromHttpClient::new(
        &args.prometheus_url,
        auth,
        Duration::from_secs(60),
        parse_headers(&args.prometheus_headers)?,
    )
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    match prom.check_connection().await {
        Ok(()) => println!("{}", "✅ Success".bright_green()),
        Err(e) => {
            println!("{}", "❌ Failed".bright_red());
            eprintln!("Error: {}", e);
            bail!("Prometheus backend unreachable");
        }
    }

    let dialect = resolve_dialect(
        &args.prometheus_url,
        args.anthos,
        args.prometheus_dialect.map(|d| match d {
            DialectArg::Standard => PromDialect::Standard,
            DialectArg::Gcp => PromDialect::GcpManaged,
            DialectArg::Anthos => PromDialect::Anthos,
        }),
    );
    println!("   Query dialect: {}", format!("{:?}", dialect).bright_green());
    println!(
        "   History window: {} | step: {}s | strategy: {}",
        format!("{}h", cfg.history_duration_hours).bright_green(),
        cfg.step().as_secs(),
        strategy.name().bright_green()
    );
    println!();

    let metrics = Arc::new(MetricService::new(Arc::new(prom), dialect, &cfg));
    let discoverer = Arc::new(Discoverer::new(
        cluster_name.clone(),
        kube,
        Arc::clone(&metrics),
        cfg.clone(),
        filter,
    ));
    let runner = ScanRunner::new(
        vec![ClusterTarget {
            name: cluster_name,
            source: discoverer,
            metrics,
        }],
        strategy,
        cfg,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, draining workers");
            signal_cancel.cancel();
        }
    });

    println!("🔍 Scanning workloads...");
    let report = runner.run(cancel).await;
    println!(
        "   {} result(s), {} cluster failure(s)",
        report.results.len(),
        report.cluster_failures.len()
    );
    println!();

    write_report(&report, &args)?;

    if report.failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn render<W: std::io::Write>(report: &ScanReport, format: ReportFormat, out: &mut W) -> Result<()> {
    match format {
        ReportFormat::Table => reporting::write_table(report, out),
        ReportFormat::Json => reporting::write_json(report, out),
        ReportFormat::Yaml => reporting::write_yaml(report, out),
        ReportFormat::Csv => reporting::write_csv(report, out),
    }
}

fn write_report(report: &ScanReport, args: &ScanArgs) -> Result<()> {
    match &args.output {
        Some(path) => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("creating report file {path}"))?;
            render(report, args.format, &mut file)?;
            println!("{}", "🎉 Scan completed".bright_green().bold());
            println!("   Report: {}", path.bright_cyan());
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            render(report, args.format, &mut lock)?;
        }
    }
    Ok(())
}
