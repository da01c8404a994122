//! Task dispatch: the ten-step loop (§4.H) and the versioned handler
//! registry it routes through (§4.I).

#[path = "loop.rs"]
pub mod dispatch_loop;
pub mod handler;
pub mod registry;

pub use dispatch_loop::{dispatch_one, run_forever};
pub use handler::DefaultTaskHandler;
pub use registry::{HandlerRegistry, RegistryError, Resolution, TaskHandler};
