//! Modern Objective-C 2 metadata walker.
//!
//! ObjC2 images root their metadata in `__DATA,__objc_classlist`: an array
//! of pointers into `__objc_data`, where each class object carries a
//! `class_rw_t` pointer whose RO half (in `__objc_const`, or heap-copied by
//! the runtime) names the class and lists its methods. The walk visits each
//! class and then its metaclass (reached through a possibly tag-carrying
//! `isa`), decoding both pointer widths of every structure along the way.

use tracing::debug;
use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::image::{MachImage, MachoString, SectionMap};
use crate::objc::cache::{ImageSections, ObjcCache, RoTable};
use crate::objc::structs::*;
use crate::objc::MethodSink;
use crate::util::{read_u32_at, read_u64_at};

/// Class object fields the walker reads, normalized to 64 bits.
struct ClassFields {
    isa: u64,
    data_rw: u64,
}

/// `class_rw_t` fields the walker reads, normalized to 64 bits.
struct ClassRwFields {
    flags: ClassRwFlags,
    data_ro: u64,
}

/// `class_ro_t` fields the walker reads, normalized to 64 bits.
struct ClassRoFields {
    name: u64,
    base_methods: u64,
}

/// Walks all ObjC2 metadata in the image, reporting each method found.
///
/// Returns [`Error::NotFound`] when the image has no ObjC2 sections; any
/// other mapping failure is logged and propagated.
pub(crate) fn parse_data_section(
    image: &MachImage<'_>,
    cache: &mut ObjcCache,
    sink: &mut MethodSink<'_>,
) -> Result<()> {
    if let Err(err) = cache.ensure_sections(image) {
        if !err.is_not_found() {
            debug!(
                "unable to map Objective-C sections of {} for class parsing: {err}",
                image.name()
            );
        }
        return Err(err);
    }

    let (sections, ro_table) = cache.sections_and_table()?;
    walk(image, sections, ro_table, sink)
}

fn walk(
    image: &MachImage<'_>,
    sections: &ImageSections,
    ro_table: &mut RoTable,
    sink: &mut MethodSink<'_>,
) -> Result<()> {
    let bo = image.byteorder();
    let ptr_size = if image.m64() { 8 } else { 4 };

    // The class list is an array of pointers into __objc_data, one per
    // class defined by the image.
    let class_ptrs = sections.classlist.bytes();
    let class_count = class_ptrs.len() / ptr_size;

    for i in 0..class_count {
        let class_addr = if image.m64() {
            bo.swap64(read_u64_at(class_ptrs, i * 8))
        } else {
            bo.swap32(read_u32_at(class_ptrs, i * 4)) as u64
        };

        let class = read_class(image, &sections.objc_data, class_addr)?;
        match parse_class(image, sections, ro_table, class.data_rw, false, sink) {
            // The class has not been realized by the runtime; its RW data
            // is unusable. Skip the whole entry and keep walking.
            Err(Error::NotFound) => continue,
            other => other?,
        }

        let meta_addr = tagged_isa(image, class.isa);
        let metaclass = read_class(image, &sections.objc_data, meta_addr)?;
        match parse_class(image, sections, ro_table, metaclass.data_rw, true, sink) {
            Err(Error::NotFound) => continue,
            other => other?,
        }
    }

    // Categories are validated but contribute no methods yet; see
    // parse_category.
    let cat_ptrs = sections.catlist.bytes();
    let cat_count = cat_ptrs.len() / ptr_size;

    for i in 0..cat_count {
        let cat_addr = if image.m64() {
            bo.swap64(read_u64_at(cat_ptrs, i * 8))
        } else {
            bo.swap32(read_u32_at(cat_ptrs, i * 4)) as u64
        };

        let cat_size = if image.m64() {
            Objc2Category64::SIZE
        } else {
            Objc2Category32::SIZE
        };
        if sections.objc_data.remap(cat_addr, cat_size).is_none() {
            debug!("category pointer {cat_addr:#x} falls outside {SECT_OBJC_DATA}");
            return Err(Error::invalid(cat_addr));
        }

        parse_category(image, cat_addr, sink)?;
    }

    Ok(())
}

/// Strips refcounting tag bits from an `isa` pointer.
///
/// Only ARM64 runtimes pack tags into `isa`; other architectures use plain
/// pointers. The decision follows the inspected image's CPU type, not the
/// host's.
#[inline]
fn tagged_isa(image: &MachImage<'_>, isa: u64) -> u64 {
    if image.is_arm64() {
        isa & ARM64_ISA_MASK
    } else {
        isa
    }
}

/// Reads a class object out of `__objc_data`, whichever width the image
/// uses.
fn read_class(image: &MachImage<'_>, objc_data: &SectionMap, addr: u64) -> Result<ClassFields> {
    let bo = image.byteorder();
    if image.m64() {
        let class: Objc2Class64 = objc_data.read_object(addr).map_err(|err| {
            debug!("class pointer {addr:#x} falls outside {SECT_OBJC_DATA}");
            err
        })?;
        Ok(ClassFields {
            isa: bo.swap64(class.isa),
            data_rw: bo.swap64(class.data_rw),
        })
    } else {
        let class: Objc2Class32 = objc_data.read_object(addr).map_err(|err| {
            debug!("class pointer {addr:#x} falls outside {SECT_OBJC_DATA}");
            err
        })?;
        Ok(ClassFields {
            isa: bo.swap32(class.isa) as u64,
            data_rw: bo.swap32(class.data_rw) as u64,
        })
    }
}

/// Decodes a single class (or metaclass) and reports its base methods.
///
/// Returns [`Error::NotFound`] as the skip signal for classes the runtime
/// has not realized.
fn parse_class(
    image: &MachImage<'_>,
    sections: &ImageSections,
    ro_table: &mut RoTable,
    data_rw: u64,
    is_meta: bool,
    sink: &mut MethodSink<'_>,
) -> Result<()> {
    // The class's data pointer doubles as a flag word in its low bits.
    let data_addr = data_rw & !CLASS_DATA_FLAG_MASK;

    let cached_ro_addr = ro_table.lookup(data_addr);
    let ro = if cached_ro_addr == 0 {
        let rw = copy_class_rw(image, data_addr)?;

        if !rw.flags.contains(ClassRwFlags::REALIZED) {
            return Err(Error::NotFound);
        }

        // The RO data is either a runtime heap copy (RW_COPIED_RO) or the
        // compiler's original inside __objc_const.
        let ro = if rw.flags.contains(ClassRwFlags::COPIED_RO) {
            copy_class_ro(image, rw.data_ro).map_err(|err| {
                debug!("heap-copied class_ro at {:#x} unreadable: {err}", rw.data_ro);
                err
            })?
        } else {
            remap_class_ro(image, &sections.objc_const, rw.data_ro)?
        };

        ro_table.set(data_addr, rw.data_ro);
        ro
    } else {
        // The address was validated when it was cached, but this image may
        // mix in-section and heap-copied RO data; try the cheap window
        // first and fall back to a copy.
        match remap_class_ro(image, &sections.objc_const, cached_ro_addr) {
            Ok(ro) => ro,
            Err(_) => copy_class_ro(image, cached_ro_addr).map_err(|err| {
                debug!("cached class_ro at {cached_ro_addr:#x} unreadable: {err}");
                Error::invalid(cached_ro_addr)
            })?,
        }
    };

    let class_name = MachoString::new(image, ro.name).map_err(|err| {
        debug!("class name at {:#x} unreadable: {err}", ro.name);
        err
    })?;

    // A NULL base method list just means the class defines no methods.
    if ro.base_methods == 0 {
        return Ok(());
    }

    parse_method_list(
        image,
        &sections.objc_const,
        &class_name,
        is_meta,
        ro.base_methods,
        sink,
    )
}

/// Reports every entry of a `method_list_t`.
fn parse_method_list(
    image: &MachImage<'_>,
    objc_const: &SectionMap,
    class_name: &MachoString,
    is_meta: bool,
    list_addr: u64,
    sink: &mut MethodSink<'_>,
) -> Result<()> {
    let bo = image.byteorder();

    let header: Objc2ListHeader = objc_const.read_object(list_addr).map_err(|err| {
        debug!("method list {list_addr:#x} falls outside {SECT_OBJC_CONST}");
        err
    })?;

    // The low entsize bits are flags; the rest is the on-disk stride,
    // which may exceed the method record size.
    let entsize = (bo.swap32(header.entsize) & !METHOD_LIST_FLAG_MASK) as u64;
    let count = bo.swap32(header.count) as u64;

    let list_start = list_addr + Objc2ListHeader::SIZE as u64;
    let list_len = entsize
        .checked_mul(count)
        .ok_or_else(|| Error::invalid(list_addr))? as usize;
    let entries = objc_const.remap(list_start, list_len).ok_or_else(|| {
        debug!("method list {list_start:#x} ({list_len} bytes) falls outside {SECT_OBJC_CONST}");
        Error::invalid(list_start)
    })?;

    for i in 0..count {
        let offset = (i * entsize) as usize;
        let (name_addr, imp) = if image.m64() {
            let method = Objc2Method64::read_from_prefix(&entries[offset..])
                .map_err(|_| Error::invalid(list_start + offset as u64))?
                .0;
            (bo.swap64(method.name), bo.swap64(method.imp))
        } else {
            let method = Objc2Method32::read_from_prefix(&entries[offset..])
                .map_err(|_| Error::invalid(list_start + offset as u64))?
                .0;
            (bo.swap32(method.name) as u64, bo.swap32(method.imp) as u64)
        };

        let method_name = MachoString::new(image, name_addr).map_err(|err| {
            debug!("method name at {name_addr:#x} unreadable: {err}");
            err
        })?;

        sink(is_meta, class_name, &method_name, imp);
    }

    Ok(())
}

/// Parses one category record.
///
/// Currently a deliberate no-op: whether category methods belong in the
/// enumeration, and how to attribute them to the category's target class,
/// is unresolved. Entries are bounds-checked by the caller and skipped.
fn parse_category(
    _image: &MachImage<'_>,
    _cat_addr: u64,
    _sink: &mut MethodSink<'_>,
) -> Result<()> {
    Ok(())
}

fn copy_class_rw(image: &MachImage<'_>, addr: u64) -> Result<ClassRwFields> {
    let bo = image.byteorder();
    if image.m64() {
        let rw: Objc2ClassRw64 = image.copy_object(addr).map_err(|err| {
            debug!("class_rw copy at {addr:#x} failed: {err}");
            err
        })?;
        Ok(ClassRwFields {
            flags: ClassRwFlags::from_bits_truncate(bo.swap32(rw.flags)),
            data_ro: bo.swap64(rw.data_ro),
        })
    } else {
        let rw: Objc2ClassRw32 = image.copy_object(addr).map_err(|err| {
            debug!("class_rw copy at {addr:#x} failed: {err}");
            err
        })?;
        Ok(ClassRwFields {
            flags: ClassRwFlags::from_bits_truncate(bo.swap32(rw.flags)),
            data_ro: bo.swap32(rw.data_ro) as u64,
        })
    }
}

fn copy_class_ro(image: &MachImage<'_>, addr: u64) -> Result<ClassRoFields> {
    let bo = image.byteorder();
    if image.m64() {
        let ro: Objc2ClassRo64 = image.copy_object(addr)?;
        Ok(ClassRoFields {
            name: bo.swap64(ro.name),
            base_methods: bo.swap64(ro.base_methods),
        })
    } else {
        let ro: Objc2ClassRo32 = image.copy_object(addr)?;
        Ok(ClassRoFields {
            name: bo.swap32(ro.name) as u64,
            base_methods: bo.swap32(ro.base_methods) as u64,
        })
    }
}

fn remap_class_ro(
    image: &MachImage<'_>,
    objc_const: &SectionMap,
    addr: u64,
) -> Result<ClassRoFields> {
    let bo = image.byteorder();
    if image.m64() {
        let ro: Objc2ClassRo64 = objc_const.read_object(addr)?;
        Ok(ClassRoFields {
            name: bo.swap64(ro.name),
            base_methods: bo.swap64(ro.base_methods),
        })
    } else {
        let ro: Objc2ClassRo32 = objc_const.read_object(addr)?;
        Ok(ClassRoFields {
            name: bo.swap32(ro.name) as u64,
            base_methods: bo.swap32(ro.base_methods) as u64,
        })
    }
}
