//! Access to Mach-O images mapped in a target task.
//!
//! This layer is the parser's only route to target memory. It provides the
//! image handle ([`MachImage`]), section windows ([`SectionMap`]), target
//! C strings ([`MachoString`]), and the raw task-memory and byte-order
//! primitives they are built on.

mod macho;
mod section;
mod string;
pub mod structs;
mod task;

pub use macho::MachImage;
pub use section::SectionMap;
pub use string::MachoString;
#[cfg(target_os = "macos")]
pub use task::MachTask;
pub use task::{ByteOrder, TaskMemory};
