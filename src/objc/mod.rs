//! Objective-C metadata parsing and method lookup.
//!
//! This module resolves a code address in a target process back to the
//! Objective-C method containing it, by walking the metadata of the Mach-O
//! image the address belongs to. It understands both the legacy ObjC1
//! ("module_info") ABI and the modern ObjC2 ("classlist") ABI, in their
//! 32- and 64-bit variants.
//!
//! Everything here is written to run from a crash handler: no locks, no
//! heap allocation on the enumeration path, and no pointer read from the
//! target is ever dereferenced without first being validated through a
//! section window or a bounded task copy.

mod cache;
mod objc1;
mod objc2;
pub mod structs;

pub use cache::ObjcCache;

use tracing::debug;

use crate::error::{Error, Result};
use crate::image::{MachImage, MachoString};

/// Internal callback shape shared by the walkers and the two lookup
/// passes: `(is_class_method, class_name, method_name, imp)`.
pub(crate) type MethodSink<'a> = dyn FnMut(bool, &MachoString, &MachoString, u64) + 'a;

/// Enumerates every Objective-C method the image declares.
///
/// Tries the legacy ObjC1 data first, then falls back to ObjC2. Once an
/// image has parsed successfully via ObjC2, the cache remembers it and the
/// legacy probe (a per-call section lookup that can never succeed on a
/// modern image) is skipped on subsequent calls.
fn parse(image: &MachImage<'_>, cache: &mut ObjcCache, sink: &mut MethodSink<'_>) -> Result<()> {
    let result = if cache.tried_objc2 {
        Err(Error::NotFound)
    } else {
        objc1::parse_module_info(image, sink)
    };

    match result {
        Err(Error::NotFound) => {
            let result = objc2::parse_data_section(image, cache, sink);
            if result.is_ok() {
                cache.tried_objc2 = true;
            }
            result
        }
        other => other,
    }
}

/// Finds the method whose implementation contains `target`, and reports it
/// through `callback`.
///
/// The winner is the method with the greatest implementation address not
/// exceeding `target`. On success the callback has fired exactly once with
/// `(is_class_method, class_name, method_name, imp)`; the two name strings
/// are borrows valid only for the duration of the call. When no method
/// implementation lies at or below `target`, or the image carries no
/// Objective-C metadata at all, the result is [`Error::NotFound`] and the
/// callback has not fired.
///
/// The search runs two full enumerations: the first reduces every reported
/// implementation address to the best candidate, and the second re-walks
/// the image to re-materialize that method's names, which do not outlive
/// their first-pass callback. Signal context forbids retaining the strings
/// across callbacks, so the lookup trades a second scan for zero retained
/// state.
pub fn find_method<F>(
    image: &MachImage<'_>,
    cache: &mut ObjcCache,
    target: u64,
    mut callback: F,
) -> Result<()>
where
    F: FnMut(bool, &MachoString, &MachoString, u64),
{
    let mut best: u64 = 0;
    {
        let mut search = |_is_meta: bool, _class: &MachoString, _method: &MachoString, imp: u64| {
            if imp >= best && imp <= target {
                best = imp;
            }
        };
        if let Err(err) = parse(image, cache, &mut search) {
            if !err.is_not_found() {
                debug!("Objective-C parse of {} failed: {err}", image.name());
            }
            return Err(err);
        }
    }

    if best == 0 {
        return Err(Error::NotFound);
    }

    let mut armed = true;
    let mut call = |is_meta: bool, class: &MachoString, method: &MachoString, imp: u64| {
        if armed && imp == best {
            callback(is_meta, class, method, imp);
            armed = false;
        }
    };
    parse(image, cache, &mut call)
}
