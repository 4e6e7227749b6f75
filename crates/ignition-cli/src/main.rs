mod plan;
mod report;
mod serve;

use std::sync::Arc;

use clap::Parser;
use ignition_core::CancellationToken;

#[derive(Parser)]
#[command(name = "ignition", about = "Sample startup readiness coordinator CLI")]
struct Cli {
    /// Path to the ignition.toml readiness plan.
    plan: String,

    /// Print the aggregate result as JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Serve a /healthz endpoint after the initial run instead of exiting.
    #[arg(long)]
    serve: bool,

    /// Bind address for --serve.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port for --serve.
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let content = std::fs::read_to_string(&cli.plan)
        .map_err(|e| anyhow::anyhow!("failed to read plan {:?}: {e}", cli.plan))?;
    let parsed = plan::parse_plan_toml(&content)?;
    let coordinator = Arc::new(plan::build_coordinator(&parsed)?);

    if cli.serve {
        serve::run_serve(coordinator, &cli.bind, cli.port).await?;
        return Ok(());
    }

    let result = match coordinator.wait_all(CancellationToken::new()).await {
        Ok(result) => result,
        Err(ignition_core::CoordinatorError::Failed(e)) => {
            let snapshot = ignition_core::AggregateResult {
                per_signal_results: e.results.clone(),
                total_duration: std::time::Duration::ZERO,
                overall_status: coordinator.get_result().overall_status,
            };
            report_and_exit(&snapshot, cli.json)
        }
        Err(ignition_core::CoordinatorError::Configuration(e)) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2)
        }
    };

    report_and_exit(&result, cli.json);
}

fn report_and_exit(result: &ignition_core::AggregateResult, json: bool) -> ! {
    if json {
        report::print_json(result);
    } else {
        report::print_human(result);
    }
    std::process::exit(report::exit_code(result));
}
