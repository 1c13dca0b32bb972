use crossload_core::{DelegationConfig, LoadOptions};
use crossload_runtime::{InMemoryHost, Runtime};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct Request {
    pub name: String,
    pub context: Option<String>,
    pub version: Option<String>,
    pub timeout_ms: Option<u64>,
}

pub async fn run(
    dir: PathBuf,
    config: DelegationConfig,
    request: Request,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = Arc::new(InMemoryHost::new());
    host.install_directory(&dir)?;
    let runtime = Runtime::start(host, config).await;

    let options = LoadOptions {
        context: request.context,
        version: request.version,
        timeout: request.timeout_ms.map(Duration::from_millis),
    };
    let result = runtime.loader().load(&request.name, &options).await;
    runtime.shutdown().await;

    let class = result?;
    println!(
        "{} defined by {} ({})",
        class.name(),
        class.defining_module_name(),
        class.defining_module()
    );
    if let Some(marker) = class.marker() {
        if !marker.contexts.is_empty() {
            println!("  contexts: {}", marker.contexts.join(", "));
        }
        if let Some(alias) = &marker.alias {
            println!("  alias:    {alias}");
        }
    }
    Ok(())
}
