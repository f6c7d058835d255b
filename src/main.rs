use circonus_backend::backend::{CirconusBackend, FlushHandler};
use circonus_backend::batch::{read_batches, read_batches_from_file, unix_now, MetricsBatch};
use circonus_backend::cli::Commands::GenerateAutoComplete;
use circonus_backend::cli::{BackendArgs, Cli, Commands};
use circonus_backend::config::BackendConfig;
use circonus_backend::error::BackendResult;
use circonus_backend::prometheus_endpoint::PrometheusEndpoint;
use circonus_backend::status::{StatusField, BACKEND_NAME};
use clap::{Command, CommandFactory, Parser};
use clap_complete::{generate, Generator};
use futures::stream::Stream;
use futures::StreamExt;
use std::io;
use strum::IntoEnumIterator;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> BackendResult<()> {
    let mut cmd = Cli::command();
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into());
    let subscriber = fmt()
        .pretty()
        .with_file(true)
        .with_line_number(true)
        .with_writer(io::stderr)
        .with_env_filter(filter);

    subscriber.init();

    match cli.command {
        GenerateAutoComplete { shell } => {
            eprintln!("Generating completion file for {shell}...");
            print_completions(shell, &mut cmd);
        }
        Commands::StatusKeys => {
            for field in StatusField::iter() {
                println!("{} {}", BACKEND_NAME, field);
            }
        }
        Commands::Run { backend, input } => {
            let (config, mut circonus) = init_backend(&backend).await?;
            let _prometheus_endpoint = config.prometheus_addr.map(PrometheusEndpoint::new);
            info!(
                "flush interval {:?}, thresholds {:?}",
                config.flush_interval(),
                config.percent_threshold
            );
            match input {
                Some(path) => {
                    let batches = read_batches_from_file(path).await?;
                    flush_all(&mut circonus, batches, backend.dry_run).await;
                }
                None => {
                    flush_all(&mut circonus, read_batches(tokio::io::stdin()), backend.dry_run)
                        .await;
                }
            }
            log_status(&circonus);
        }
        Commands::Flush {
            backend: args,
            batch,
        } => {
            let (_config, mut circonus) = init_backend(&args).await?;
            let batch = MetricsBatch::from_file(batch.path()).await?;
            flush_one(&mut circonus, &batch, args.dry_run).await?;
            log_status(&circonus);
        }
    }

    Ok(())
}

async fn init_backend(args: &BackendArgs) -> BackendResult<(BackendConfig, CirconusBackend)> {
    let path = args.config.as_ref().map(|file| file.path().as_path());
    let config = BackendConfig::load(path, args.overrides()).await?;
    let startup_time = unix_now();
    let backend = if args.dry_run {
        info!("dry run, stats will be printed to stdout");
        CirconusBackend::with_sink(config.thresholds()?, None, startup_time)
    } else {
        CirconusBackend::new(&config, startup_time)?
    };
    Ok((config, backend))
}

/// Flush every batch in order; a failed flush is logged and the next batch is still sent.
async fn flush_all<S>(
    backend: &mut CirconusBackend,
    batches: S,
    dry_run: bool,
)
where
    S: Stream<Item = BackendResult<MetricsBatch>>,
{
    let mut batches = std::pin::pin!(batches);
    let mut count: u64 = 0;
    while let Some(batch) = batches.next().await {
        match batch {
            Ok(batch) => {
                count += 1;
                if let Err(e) = flush_one(backend, &batch, dry_run).await {
                    error!("flush {} failed: {}", count, e);
                }
            }
            Err(e) => error!("skipping unreadable batch: {}", e),
        }
    }
    info!("processed {} batches", count);
}

async fn flush_one(
    backend: &mut CirconusBackend,
    batch: &MetricsBatch,
    dry_run: bool,
) -> BackendResult<()> {
    let stats = backend.flush(batch).await?;
    if dry_run {
        println!("{}", serde_json::to_string(&stats)?);
    }
    info!(
        "flush at {}: {} stats",
        batch.timestamp_or_now(),
        stats.len()
    );
    Ok(())
}

fn log_status(backend: &CirconusBackend) {
    for (name, field, value) in backend.report_status().entries() {
        info!("{}.{}: {}", name, field, value);
    }
}

fn print_completions<G: Generator>(
    gen: G,
    cmd: &mut Command,
) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}
