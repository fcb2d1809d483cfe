//! The canonical client binary for running a `freightline-core` scan-and-transport pipeline.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod config;

use std::sync::Arc;

use clap::Parser;
use freightline_core::{PipelineConfig, ScanResult};
use freightline_transport::{Endpoint, Ftp, FtpMode, Local, Sftp, Transport};
use log::{debug, info, Level};
use stable_eyre::{eyre::Context, Result};
use stderrlog::ColorChoice;

use crate::config::{Dedup, Packaging, Scan, Transport as TransportArgs};

/// Discover matching files under one or more roots, deduplicate, package, and upload them.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Cmd {
    #[clap(flatten)]
    scan: Scan,

    #[clap(flatten)]
    transport: TransportArgs,

    #[clap(flatten)]
    packaging: Packaging,

    #[clap(flatten)]
    dedup: Dedup,

    /// External task correlator, echoed back in the result document and log lines.
    #[clap(long)]
    task_id: String,

    /// Where the run's plain-text log is written.
    #[clap(long)]
    log_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    stable_eyre::install()?;
    let cmd = Cmd::parse();
    init_logging(cmd.scan.debug)?;

    let transport = cmd.transport.validate()?;
    let rules = cmd.scan.rule_specs().context("parse --rule arguments")?;

    let endpoint = Endpoint {
        host: transport.host.clone(),
        port: transport.port,
        username: transport.username.clone(),
        password: transport.password.clone(),
        remote_path: transport.remote_path.clone(),
    };
    let protocol: freightline_core::Protocol = transport.protocol.into();
    let dry_run_dir = transport.dry_run_dir.clone();

    let transport_factory: freightline_core::TransportFactory = Arc::new(move || -> Box<dyn Transport> {
        if let Some(dir) = &dry_run_dir {
            return Box::new(Local::new(dir.clone()));
        }
        match protocol {
            freightline_core::Protocol::Ftp => Box::new(Ftp::new(endpoint.clone(), FtpMode::Plain)),
            freightline_core::Protocol::Ftps => Box::new(Ftp::new(endpoint.clone(), FtpMode::Explicit)),
            freightline_core::Protocol::Sftp => Box::new(Sftp::new(endpoint.clone())),
        }
    });

    let log_file_path = cmd.log_file.unwrap_or_else(|| {
        std::path::PathBuf::from(format!(
            "./scan_transport_log_{}.log",
            chrono::Utc::now().timestamp_millis()
        ))
    });

    let config = PipelineConfig::builder()
        .root_dirs(cmd.scan.root_dirs)
        .rules(rules)
        .transport(
            freightline_core::TransportConfig::builder()
                .protocol(protocol)
                .host(transport.host)
                .port(transport.port)
                .username(transport.username)
                .password(transport.password)
                .remote_path(transport.remote_path)
                .enabled(!transport.no_transport)
                .retry_count(transport.retry_count)
                .timeout_ms(transport.timeout_ms)
                .concurrency(transport.concurrency)
                .build(),
        )
        .transport_factory(transport_factory)
        .task_id(cmd.task_id)
        .output_dir(cmd.packaging.output_dir)
        .results_dir(cmd.packaging.results_dir)
        .log_file_path(log_file_path)
        .package_name_pattern(cmd.packaging.package_name_pattern)
        .max_file_size(cmd.scan.max_file_size_mib * 1024 * 1024)
        .skip_dirs(cmd.scan.skip_dirs)
        .depth(cmd.scan.depth)
        .scan_nested_archives(!cmd.scan.no_nested_archives)
        .max_nested_level(cmd.scan.max_nested_level)
        .packaging_trigger(cmd.packaging.trigger())
        .calculate_digest(!cmd.dedup.no_digest)
        .emit_manifest(!cmd.packaging.no_manifest)
        .queue(cmd.dedup.queue())
        .dedup(cmd.dedup.options())
        .build();

    debug!("starting run with config built from CLI arguments");
    let result = freightline_core::scan_and_transport(config).await.context("run pipeline")?;
    print_summary(&result);

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(result: &ScanResult) {
    info!(
        "run {} finished: success={} processed={} failed={} packages={}",
        result.scan_id,
        result.success,
        result.processed_files.len(),
        result.failed_items.len(),
        result.package_paths.len()
    );
    println!("{}", serde_json::to_string_pretty(result).expect("result serializes infallibly"));
}

fn init_logging(debug: bool) -> Result<()> {
    stderrlog::new()
        .module(module_path!())
        .color(ColorChoice::Never)
        .verbosity(if debug { Level::Debug } else { Level::Info })
        .init()?;
    Ok(())
}
