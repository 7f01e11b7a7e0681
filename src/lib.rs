//! tee-core: the internal API core of a Trusted Execution Environment
//!
//! Untrusted callers open sessions against secure services, invoke commands
//! with a four-slot typed parameter vector, keep key and data objects behind
//! opaque handles, and drive multi-step crypto operations through an
//! explicit state machine.

pub mod config;
pub mod control;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod object;
pub mod param;
pub mod secmem;
pub mod service;
pub mod session;

pub use config::{BusyPolicy, TeeConfig};
pub use dispatcher::Dispatcher;
pub use error::{return_code, TeeError, TeeResult};
pub use identity::{Identity, LoginMethod, TeeUuid};
pub use object::{Attribute, AttributeId, ObjectHandle, ObjectInfo, ObjectType};
pub use param::{param_types, Param, ParamType, Params};
pub use service::{CryptCommand, EchoCommand, GlobalCommand, ServiceId, StorageCommand};
pub use session::SessionId;
