//! Legacy Objective-C 1 metadata walker.
//!
//! ObjC1 images (32-bit, pre-modern-runtime) root their class metadata in
//! `__OBJC,__module_info`: an array of module records, each pointing at a
//! symbol table whose class-definition pointers follow it in memory. None
//! of this data lives in conveniently mappable spans, so the walk proceeds
//! almost entirely by bounded task copies.

use tracing::debug;

use crate::error::{Error, Result};
use crate::image::{MachImage, MachoString};
use crate::objc::structs::*;
use crate::objc::MethodSink;

/// Walks all ObjC1 metadata in the image, reporting each method found.
///
/// Returns [`Error::NotFound`] when the image has no `__module_info`
/// section, which is how every modern image looks; any other failure
/// aborts the walk.
pub(crate) fn parse_module_info(image: &MachImage<'_>, sink: &mut MethodSink<'_>) -> Result<()> {
    let bo = image.byteorder();

    let modules = image.map_section(SEG_OBJC, SECT_MODULE_INFO).map_err(|err| {
        if !err.is_not_found() {
            debug!(
                "mapping {SEG_OBJC},{SECT_MODULE_INFO} of {} failed: {err}",
                image.name()
            );
        }
        err
    })?;

    let module_count = modules.len() / Objc1Module::SIZE;
    for index in 0..module_count {
        let addr = modules.base_addr() + (index * Objc1Module::SIZE) as u64;
        let module: Objc1Module = modules.read_object(addr)?;

        let symtab_addr = bo.swap32(module.symtab) as u64;
        if symtab_addr == 0 {
            continue;
        }

        let symtab: Objc1Symtab = copy_logged(image, symtab_addr)?;

        // Class definition pointers are laid out directly after the symtab
        // header.
        let class_count = bo.swap16(symtab.cls_def_count) as u64;
        for i in 0..class_count {
            let cursor = symtab_addr + Objc1Symtab::SIZE as u64 + i * 4;
            let class_ptr: u32 = copy_logged(image, cursor)?;
            let class_addr = bo.swap32(class_ptr) as u64;

            let class: Objc1Class = copy_logged(image, class_addr)?;
            parse_class(image, &class, false, sink)?;

            // The metaclass, carrying the class methods, hangs off isa.
            let isa = bo.swap32(class.isa) as u64;
            let metaclass: Objc1Class = copy_logged(image, isa)?;
            parse_class(image, &metaclass, true, sink)?;
        }
    }

    Ok(())
}

/// Reports every method of a single ObjC1 class or metaclass.
fn parse_class(
    image: &MachImage<'_>,
    class: &Objc1Class,
    is_meta: bool,
    sink: &mut MethodSink<'_>,
) -> Result<()> {
    let bo = image.byteorder();

    let name_addr = bo.swap32(class.name) as u64;
    let class_name = MachoString::new(image, name_addr).map_err(|err| {
        debug!("class name at {name_addr:#x} unreadable: {err}");
        err
    })?;

    // The methods field is either a pointer to a single method_list, or a
    // pointer to an array of method_list pointers, depending on the
    // CLS_NO_METHOD_ARRAY info bit.
    let multiple_lists = bo.swap32(class.info) & CLS_NO_METHOD_ARRAY == 0;
    let mut cursor = bo.swap32(class.methods) as u64;

    loop {
        let list_addr = if multiple_lists {
            let raw: u32 = copy_logged(image, cursor)?;
            let ptr = bo.swap32(raw);
            // The runtime accepts either terminator.
            if ptr == 0 || ptr == END_OF_METHODS_LIST {
                break;
            }
            cursor += 4;
            ptr as u64
        } else {
            if cursor == 0 {
                break;
            }
            cursor
        };

        let list: Objc1MethodList = copy_logged(image, list_addr)?;
        let count = bo.swap32(list.count) as u64;
        for i in 0..count {
            let method_addr = list_addr + Objc1MethodList::SIZE as u64 + i * Objc1Method::SIZE as u64;
            let method: Objc1Method = copy_logged(image, method_addr)?;

            let name_addr = bo.swap32(method.name) as u64;
            let method_name = MachoString::new(image, name_addr).map_err(|err| {
                debug!("method name at {name_addr:#x} unreadable: {err}");
                err
            })?;

            let imp = bo.swap32(method.imp) as u64;
            sink(is_meta, &class_name, &method_name, imp);
        }

        if !multiple_lists {
            break;
        }
    }

    Ok(())
}

fn copy_logged<T: zerocopy::FromBytes + zerocopy::IntoBytes>(
    image: &MachImage<'_>,
    addr: u64,
) -> Result<T> {
    image.copy_object(addr).map_err(|err: Error| {
        debug!("task copy at {addr:#x} failed: {err}");
        err
    })
}
