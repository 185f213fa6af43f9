//! Objective-C runtime binary structures.
//!
//! These structures match the in-memory metadata layouts of Apple's
//! Objective-C runtimes: the legacy "ObjC1" ABI (32-bit only, rooted in
//! `__OBJC,__module_info`) and the modern "ObjC2" ABI (32- and 64-bit,
//! rooted in `__DATA,__objc_classlist`). Only the fields the symbolicator
//! reads are ever interpreted; everything else is carried for layout.

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

// =============================================================================
// Section Names
// =============================================================================

/// Legacy Objective-C segment.
pub const SEG_OBJC: &str = "__OBJC";

/// Data segment holding modern Objective-C metadata.
pub const SEG_DATA: &str = "__DATA";

/// ObjC1 module records.
pub const SECT_MODULE_INFO: &str = "__module_info";

/// ObjC2 class pointer list.
pub const SECT_CLASSLIST: &str = "__objc_classlist";

/// ObjC2 category pointer list.
pub const SECT_CATLIST: &str = "__objc_catlist";

/// ObjC2 read-only class data and method lists.
pub const SECT_OBJC_CONST: &str = "__objc_const";

/// ObjC2 class objects.
pub const SECT_OBJC_DATA: &str = "__objc_data";

// =============================================================================
// Flags and Masks
// =============================================================================

/// ObjC1 class info bit: the class's method pointer references a single
/// method list rather than an array of method-list pointers.
pub const CLS_NO_METHOD_ARRAY: u32 = 0x4000;

/// ObjC1 method-list array terminator (the runtime accepts NULL as well).
pub const END_OF_METHODS_LIST: u32 = 0xFFFF_FFFF;

/// Flags carried in the low bits of an ObjC2 class's `data` pointer.
pub const CLASS_DATA_FLAG_MASK: u64 = 0x3;

/// Flags carried in an ObjC2 method list's `entsize` field.
pub const METHOD_LIST_FLAG_MASK: u32 = 0x3;

/// Mask recovering the metaclass address from an ARM64 `isa` pointer.
///
/// libobjc packs refcount and side-table bits into the unused high bits of
/// `isa`, even inside the writable class data. The usable pointer range is
/// an implementation detail of a particular runtime era; if libobjc ever
/// widens it, lookups through this mask will start failing and the value
/// must be revisited against the live runtime.
pub const ARM64_ISA_MASK: u64 = 0x1_FFFF_FFF8;

bitflags! {
    /// State bits in `class_rw_t.flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassRwFlags: u32 {
        /// The runtime has realized the class; its RW data is usable.
        const REALIZED = 1 << 31;
        /// The class's RO data is a heap copy, not the compiler's
        /// in-section original.
        const COPIED_RO = 1 << 27;
    }
}

// =============================================================================
// ObjC1 (module_info) Structures
// =============================================================================

/// ObjC1 module record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc1Module {
    /// ABI version
    pub version: u32,
    /// Record size
    pub size: u32,
    /// Module name pointer
    pub name: u32,
    /// Symbol table pointer
    pub symtab: u32,
}

impl Objc1Module {
    /// Size of a module record.
    pub const SIZE: usize = 16;
}

/// ObjC1 symbol table header; class pointers follow it directly.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc1Symtab {
    /// Selector reference count
    pub sel_ref_cnt: u32,
    /// Selector references pointer
    pub refs: u32,
    /// Number of class definitions
    pub cls_def_count: u16,
    /// Number of category definitions
    pub cat_def_count: u16,
}

impl Objc1Symtab {
    /// Size of the symtab header.
    pub const SIZE: usize = 12;
}

/// ObjC1 class record. The metaclass is reached through `isa`.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc1Class {
    /// Metaclass pointer
    pub isa: u32,
    /// Superclass pointer
    pub super_class: u32,
    /// Class name pointer
    pub name: u32,
    /// Class version
    pub version: u32,
    /// Info bits (`CLS_NO_METHOD_ARRAY` among them)
    pub info: u32,
    /// Instance size
    pub instance_size: u32,
    /// Instance variable list pointer
    pub ivars: u32,
    /// Method list pointer, or method-list-array pointer
    pub methods: u32,
    /// Method cache pointer
    pub cache: u32,
    /// Protocol list pointer
    pub protocols: u32,
}

impl Objc1Class {
    /// Size of a class record.
    pub const SIZE: usize = 40;
}

/// ObjC1 method list header; method records follow it directly.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc1MethodList {
    /// Obsolete list pointer
    pub obsolete: u32,
    /// Number of methods in the list
    pub count: u32,
}

impl Objc1MethodList {
    /// Size of the list header.
    pub const SIZE: usize = 8;
}

/// ObjC1 method record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc1Method {
    /// Selector name pointer
    pub name: u32,
    /// Type encoding pointer
    pub types: u32,
    /// Implementation address
    pub imp: u32,
}

impl Objc1Method {
    /// Size of a method record.
    pub const SIZE: usize = 12;
}

// =============================================================================
// ObjC2 (classlist) Structures
// =============================================================================

/// ObjC2 class object, 32-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2Class32 {
    /// Metaclass pointer (possibly tagged)
    pub isa: u32,
    /// Superclass pointer
    pub superclass: u32,
    /// Method cache pointer
    pub cache: u32,
    /// Vtable pointer
    pub vtable: u32,
    /// `class_rw_t` pointer with flag bits in the low bits
    pub data_rw: u32,
}

impl Objc2Class32 {
    /// Size of a class object.
    pub const SIZE: usize = 20;
}

/// ObjC2 class object, 64-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2Class64 {
    /// Metaclass pointer (possibly tagged)
    pub isa: u64,
    /// Superclass pointer
    pub superclass: u64,
    /// Method cache pointer
    pub cache: u64,
    /// Vtable pointer
    pub vtable: u64,
    /// `class_rw_t` pointer with flag bits in the low bits
    pub data_rw: u64,
}

impl Objc2Class64 {
    /// Size of a class object.
    pub const SIZE: usize = 40;
}

/// ObjC2 `class_rw_t` prefix, 32-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2ClassRw32 {
    /// State flags ([`ClassRwFlags`])
    pub flags: u32,
    /// Runtime version
    pub version: u32,
    /// `class_ro_t` pointer
    pub data_ro: u32,
}

impl Objc2ClassRw32 {
    /// Size of the RW prefix.
    pub const SIZE: usize = 12;
}

/// ObjC2 `class_rw_t` prefix, 64-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2ClassRw64 {
    /// State flags ([`ClassRwFlags`])
    pub flags: u32,
    /// Runtime version
    pub version: u32,
    /// `class_ro_t` pointer
    pub data_ro: u64,
}

impl Objc2ClassRw64 {
    /// Size of the RW prefix.
    pub const SIZE: usize = 16;
}

/// ObjC2 `class_ro_t`, 32-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2ClassRo32 {
    /// Class flags
    pub flags: u32,
    /// Offset of the first ivar
    pub instance_start: u32,
    /// Instance size
    pub instance_size: u32,
    /// Ivar layout pointer
    pub ivar_layout: u32,
    /// Class name pointer
    pub name: u32,
    /// Base method list pointer
    pub base_methods: u32,
    /// Base protocol list pointer
    pub base_protocols: u32,
    /// Ivar list pointer
    pub ivars: u32,
    /// Weak ivar layout pointer
    pub weak_ivar_layout: u32,
    /// Base property list pointer
    pub base_properties: u32,
}

impl Objc2ClassRo32 {
    /// Size of the RO record.
    pub const SIZE: usize = 40;
}

/// ObjC2 `class_ro_t`, 64-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2ClassRo64 {
    /// Class flags
    pub flags: u32,
    /// Offset of the first ivar
    pub instance_start: u32,
    /// Instance size
    pub instance_size: u32,
    /// Reserved
    pub reserved: u32,
    /// Ivar layout pointer
    pub ivar_layout: u64,
    /// Class name pointer
    pub name: u64,
    /// Base method list pointer
    pub base_methods: u64,
    /// Base protocol list pointer
    pub base_protocols: u64,
    /// Ivar list pointer
    pub ivars: u64,
    /// Weak ivar layout pointer
    pub weak_ivar_layout: u64,
    /// Base property list pointer
    pub base_properties: u64,
}

impl Objc2ClassRo64 {
    /// Size of the RO record.
    pub const SIZE: usize = 72;
}

/// ObjC2 category record, 32-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2Category32 {
    /// Category name pointer
    pub name: u32,
    /// Target class pointer
    pub cls: u32,
    /// Instance method list pointer
    pub instance_methods: u32,
    /// Class method list pointer
    pub class_methods: u32,
    /// Protocol list pointer
    pub protocols: u32,
    /// Instance property list pointer
    pub instance_properties: u32,
}

impl Objc2Category32 {
    /// Size of a category record.
    pub const SIZE: usize = 24;
}

/// ObjC2 category record, 64-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2Category64 {
    /// Category name pointer
    pub name: u64,
    /// Target class pointer
    pub cls: u64,
    /// Instance method list pointer
    pub instance_methods: u64,
    /// Class method list pointer
    pub class_methods: u64,
    /// Protocol list pointer
    pub protocols: u64,
    /// Instance property list pointer
    pub instance_properties: u64,
}

impl Objc2Category64 {
    /// Size of a category record.
    pub const SIZE: usize = 48;
}

/// ObjC2 method record, 32-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2Method32 {
    /// Selector name pointer
    pub name: u32,
    /// Type encoding pointer
    pub types: u32,
    /// Implementation address
    pub imp: u32,
}

impl Objc2Method32 {
    /// Size of a method record.
    pub const SIZE: usize = 12;
}

/// ObjC2 method record, 64-bit layout.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2Method64 {
    /// Selector name pointer
    pub name: u64,
    /// Type encoding pointer
    pub types: u64,
    /// Implementation address
    pub imp: u64,
}

impl Objc2Method64 {
    /// Size of a method record.
    pub const SIZE: usize = 24;
}

/// ObjC2 method list header; method records follow at `entsize` strides.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Objc2ListHeader {
    /// Entry stride in bytes, with flags in the low two bits
    pub entsize: u32,
    /// Number of entries
    pub count: u32,
}

impl Objc2ListHeader {
    /// Size of the list header.
    pub const SIZE: usize = 8;
}
