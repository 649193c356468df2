//! cairn-services — the server-side protocol engine of the Cairn OPC UA
//! toolkit: channel and session tables, the I/O dispatcher, service
//! handlers, authorization and subscriptions, plus the dependency seams the
//! host implements.

pub mod address_space;
pub mod authorization;
pub mod channels;
pub mod deps;
pub mod dispatcher;
pub mod service_misc;
pub mod service_read;
pub mod service_write;
pub mod session;
pub mod session_mgr;
pub mod subscription;

pub use address_space::{AddressSpace, MemoryAddressSpace};
pub use deps::{CallContext, Clock, SystemClock, User, UserAuthN, UserAuthZ};
pub use dispatcher::{DispatchAction, DispatchEvent, Dispatcher, ServiceClass};
