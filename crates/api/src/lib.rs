//! Contracts shared between the delegation core and a host module container.

pub mod error;
pub mod host;
pub mod module;
pub mod resolver;

pub use error::{DelegationError, Result};
pub use host::{HostContainer, ModuleEvent, ModuleEventKind};
pub use module::{
    ClassRef, LoadedClass, Module, ModuleId, ModuleRef, ModuleState, ProvideMarker,
};
pub use resolver::ClassResolver;
