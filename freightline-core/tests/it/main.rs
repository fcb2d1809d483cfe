//! Integration tests covering the testable properties the core pipeline must satisfy:
//! task-scoped and cross-run deduplication, archive member matching, packaging triggers and
//! name-collision resolution, and transient-transport retry.

mod archives;
mod dedup;
mod packaging;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use freightline_core::{PipelineConfig, Protocol, RuleSpec, ScanResult, TransportConfig};
use freightline_transport::{Local, Transport};

/// Build a minimal, valid config for one root directory matching every `.txt` file, uploading
/// via a [`Local`] transport rooted at `dest`. `scratch` hosts this run's `output_dir`/
/// `results_dir`/`log_file_path` so parallel tests never share scratch state.
fn base_config(root: PathBuf, dest: PathBuf, scratch: &std::path::Path, task_id: &str) -> PipelineConfig {
    PipelineConfig::builder()
        .root_dirs(vec![root])
        .rules(vec![RuleSpec {
            extensions: vec!["txt".to_owned()],
            name_pattern: ".*".to_owned(),
        }])
        .transport(
            TransportConfig::builder()
                .protocol(Protocol::Ftp)
                .host("localhost")
                .port(21)
                .username("user")
                .password("pass")
                .remote_path("/")
                .build(),
        )
        .transport_factory(Arc::new(move || -> Box<dyn Transport> { Box::new(Local::new(dest.clone())) }))
        .task_id(task_id)
        .output_dir(scratch.join("packages"))
        .results_dir(scratch.join("results"))
        .log_file_path(scratch.join("run.log"))
        .build()
}

async fn run(config: PipelineConfig) -> ScanResult {
    freightline_core::scan_and_transport(config).await.expect("pipeline run should not hit a configuration error")
}
