#![allow(dead_code)]

use crossload_api::{Module, ModuleId};
use crossload_core::DelegationConfig;
use crossload_runtime::{InMemoryHost, Runtime, StaticModule, StaticModuleBuilder};
use std::sync::Arc;
use std::time::Duration;

pub fn test_config() -> DelegationConfig {
    DelegationConfig {
        default_timeout_ms: 200,
        ..DelegationConfig::default()
    }
}

pub async fn boot(host: &Arc<InMemoryHost>) -> Runtime {
    Runtime::start(host.clone(), test_config()).await
}

/// Install and start a module assembled by `build`.
pub fn deploy(
    host: &InMemoryHost,
    name: &str,
    version: &str,
    build: impl FnOnce(StaticModuleBuilder) -> StaticModuleBuilder,
) -> Arc<StaticModule> {
    let module = host.install(|id| build(StaticModule::builder(id, name, version)).build());
    host.start(module.id()).unwrap();
    module
}

pub fn id_of(module: &Arc<StaticModule>) -> ModuleId {
    module.id()
}

/// Poll until `condition` holds; event processing is asynchronous.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}
