//! S4: a package seals as soon as the configured file-count trigger is reached, rather than
//! waiting for the whole run to finish. S5: several files with the same base name land in the
//! same package, each given a `-N`-suffixed entry name, while every manifest entry still
//! records its shared `original_name`.

use std::fs;
use std::io::Read as _;
use std::sync::Arc;

use tempfile::tempdir;

use freightline_core::{PipelineConfig, Protocol, RuleSpec, TransportConfig};
use freightline_transport::Local;

use crate::{base_config, run};

#[tokio::test]
async fn max_files_trigger_seals_before_the_run_ends() {
    let root = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let scratch = tempdir().unwrap();

    for i in 0..5 {
        fs::write(root.path().join(format!("f{i}.txt")), format!("contents {i}")).unwrap();
    }

    let mut config = base_config(root.path().to_owned(), dest.path().to_owned(), scratch.path(), "task-pkg-1");
    config.packaging_trigger.max_files = 2;
    let result = run(config).await;

    assert!(result.success, "failures: {:?}", result.failed_items);
    assert_eq!(result.processed_files.len(), 5);
    // 5 files sealed 2-at-a-time yields 3 packages (2, 2, 1).
    assert_eq!(result.package_paths.len(), 3);
}

#[tokio::test]
async fn colliding_base_names_get_suffixed_entry_names_but_share_original_name() {
    let root = tempdir().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    let c = root.path().join("c");
    fs::create_dir(&a).unwrap();
    fs::create_dir(&b).unwrap();
    fs::create_dir(&c).unwrap();
    let dest = tempdir().unwrap();
    let scratch = tempdir().unwrap();

    fs::write(a.join("MeiTuan-plan.doc"), b"first").unwrap();
    fs::write(b.join("MeiTuan-plan.doc"), b"second, different content").unwrap();
    fs::write(c.join("MeiTuan-plan.doc"), b"third, also different").unwrap();

    let dest_path = dest.path().to_owned();
    let config = PipelineConfig::builder()
        .root_dirs(vec![root.path().to_owned()])
        .rules(vec![RuleSpec {
            extensions: vec!["doc".to_owned()],
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
        .transport_factory(Arc::new(move || -> Box<dyn freightline_transport::Transport> {
            Box::new(Local::new(dest_path.clone()))
        }))
        .task_id("task-pkg-2")
        .output_dir(scratch.path().join("packages"))
        .results_dir(scratch.path().join("results"))
        .log_file_path(scratch.path().join("run.log"))
        .build();
    let result = run(config).await;

    assert!(result.success, "failures: {:?}", result.failed_items);
    assert_eq!(result.processed_files.len(), 3);
    assert_eq!(result.package_paths.len(), 1);

    let package_path = &result.package_paths[0];
    let bytes = fs::read(package_path).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_owned())
        .filter(|n| n != "manifest.json")
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "MeiTuan-plan-1.doc".to_owned(),
            "MeiTuan-plan-2.doc".to_owned(),
            "MeiTuan-plan.doc".to_owned(),
        ]
    );

    let mut manifest_text = String::new();
    archive.by_name("manifest.json").unwrap().read_to_string(&mut manifest_text).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).unwrap();
    let entries = manifest["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    for entry in entries {
        assert_eq!(entry["original_name"], "MeiTuan-plan.doc");
    }
    assert_eq!(manifest["warnings"].as_array().unwrap().len(), 2);
}
