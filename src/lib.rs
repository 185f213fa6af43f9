//! objsym - Async-signal-safe Objective-C method symbolication.
//!
//! This library resolves an instruction pointer captured from a crashed
//! thread back to the `-[Class selector]` or `+[Class selector]` that
//! contains it, by walking the Objective-C metadata of the Mach-O image
//! mapped in the target task. It is built to run from inside a signal
//! handler over a process in an undefined state:
//!
//! - No heap allocation on the lookup path; the only pages come from the
//!   kernel, once, for an optional class cache.
//! - No locks, and no non-reentrant library calls.
//! - Every pointer read out of the target is treated as hostile and is
//!   validated through a mapped section window or a bounded task copy
//!   before use.
//!
//! # Supported metadata
//!
//! Both Objective-C ABIs are understood: the legacy "ObjC1" module_info
//! data found in old 32-bit images, and the modern "ObjC2" classlist data
//! in 32- and 64-bit images, including tag-carrying `isa` pointers on
//! ARM64.
//!
//! # Example
//!
//! ```no_run
//! use objsym::{MachImage, ObjcCache, TaskMemory};
//!
//! fn symbolicate(task: &dyn TaskMemory, image_base: u64, crashed_ip: u64) -> objsym::Result<()> {
//!     let image = MachImage::new(task, image_base, "MyApp")?;
//!     let mut cache = ObjcCache::new();
//!     objsym::find_method(&image, &mut cache, crashed_ip, |is_class_method, class, method, imp| {
//!         let sigil = if is_class_method { '+' } else { '-' };
//!         println!("{sigil}[{class} {method}] at {imp:#x}");
//!     })?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod objc;
pub mod util;

#[cfg(test)]
mod fixtures;

// Re-export main types
pub use error::{Error, Result};
#[cfg(target_os = "macos")]
pub use image::MachTask;
pub use image::{ByteOrder, MachImage, MachoString, SectionMap, TaskMemory};
pub use objc::{find_method, ObjcCache};
