use crate::error::Result;
use crate::module::ClassRef;
use async_trait::async_trait;

/// Load-by-name capability a host's module loader can delegate to.
///
/// Implementations resolve the class in whichever module provides it; the
/// returned class is defined by that module, not by the caller.
#[async_trait]
pub trait ClassResolver: Send + Sync {
    async fn resolve_class(&self, name: &str) -> Result<ClassRef>;
}
