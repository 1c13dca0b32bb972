use crossload_api::HostContainer;
use crossload_core::DelegationConfig;
use crossload_runtime::{InMemoryHost, Runtime};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::info;

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Context")]
    context: String,
    #[tabled(rename = "Classes")]
    classes: usize,
    #[tabled(rename = "Resources")]
    resources: usize,
    #[tabled(rename = "Aliases")]
    aliases: String,
}

pub async fn run(dir: PathBuf, config: DelegationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let host = Arc::new(InMemoryHost::new());
    host.install_directory(&dir)?;
    info!(
        "Installed {} modules from {}",
        host.list_modules().len(),
        dir.display()
    );

    let runtime = Runtime::start(host, config).await;

    let rows: Vec<RecordRow> = runtime
        .registry()
        .records()
        .iter()
        .map(|record| RecordRow {
            module: record.module().symbolic_name().to_string(),
            version: record.version().to_string(),
            context: if record.context().is_empty() {
                "-".to_string()
            } else {
                record.context().to_string()
            },
            classes: record.classes().len(),
            resources: record.resources().len(),
            aliases: record
                .aliases()
                .iter()
                .map(|(alias, canonical)| format!("{alias}={canonical}"))
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();

    if rows.is_empty() {
        println!("No provider records published.");
    } else {
        println!("{}", Table::new(rows));
    }

    let stats = runtime.registry().stats();
    println!("{} records from {} modules", stats.total_records, stats.modules);

    runtime.shutdown().await;
    Ok(())
}
