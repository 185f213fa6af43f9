//! Per-image parser state: section windows and the class-RO cache.

use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::image::{MachImage, SectionMap};
use crate::objc::structs::*;
use crate::util::{read_u64_at, write_u64_at};

/// Number of buckets in the class-RO cache table.
const RO_TABLE_BUCKETS: usize = 1024;

/// Bytes backing the table: one key word and one value word per bucket.
const RO_TABLE_BYTES: usize = RO_TABLE_BUCKETS * 2 * 8;

/// The four section windows an ObjC2 walk needs, held as one unit.
///
/// Holding them together makes the rotation invariant structural: either
/// all four are mapped and belong to the cache's current image, or none
/// are.
pub(crate) struct ImageSections {
    /// `__DATA,__objc_const`: read-only class data and method lists.
    pub objc_const: SectionMap,
    /// `__DATA,__objc_classlist`: class pointer array.
    pub classlist: SectionMap,
    /// `__DATA,__objc_catlist`: category pointer array.
    pub catlist: SectionMap,
    /// `__DATA,__objc_data`: class objects.
    pub objc_data: SectionMap,
}

/// Open-addressed `class_rw_t` address → `class_ro_t` address table.
///
/// The table is a bare pair of word arrays in anonymous pages, sized once
/// and never grown. There is no chaining and no eviction: a colliding
/// insert is dropped (first writer wins) and a zero key marks an empty
/// bucket. Correctness never depends on a hit, since every miss re-reads
/// the class data from the target; the table can also fail to allocate
/// entirely and parsing merely slows down.
pub(crate) enum RoTable {
    /// No `set` has happened yet; pages are not committed.
    Unallocated,
    /// Pages are live: keys in the first half, values in the second.
    Ready(MmapMut),
    /// Allocation failed once; never retried.
    Failed,
}

impl RoTable {
    /// Looks up the cached RO address for a `class_rw_t` address.
    ///
    /// Returns 0 on a miss. Zero values cannot be confused with misses
    /// because the bucket's key is compared, and zero keys are never
    /// stored.
    pub fn lookup(&self, key: u64) -> u64 {
        if let RoTable::Ready(pages) = self {
            let index = Self::index(key);
            if read_u64_at(pages, index * 8) == key {
                return read_u64_at(pages, RO_TABLE_BUCKETS * 8 + index * 8);
            }
        }
        0
    }

    /// Stores a key/value pair, allocating the table on first use.
    ///
    /// Storage is best-effort: an occupied bucket keeps its existing entry,
    /// and an allocation failure permanently disables the table for this
    /// cache.
    pub fn set(&mut self, key: u64, value: u64) {
        if key == 0 {
            return;
        }

        if let RoTable::Unallocated = self {
            // Pages come straight from the kernel; the heap may be locked
            // or corrupt in the crashed process.
            match MmapMut::map_anon(RO_TABLE_BYTES) {
                Ok(pages) => *self = RoTable::Ready(pages),
                Err(err) => {
                    warn!(
                        "class cache allocation failed ({err}); \
                         Objective-C parsing will be substantially slower"
                    );
                    *self = RoTable::Failed;
                }
            }
        }

        if let RoTable::Ready(pages) = self {
            let index = Self::index(key);
            if read_u64_at(pages, index * 8) == 0 {
                write_u64_at(pages, index * 8, key);
                write_u64_at(pages, RO_TABLE_BUCKETS * 8 + index * 8, value);
            }
        }
    }

    #[inline]
    fn index(key: u64) -> usize {
        // Class data pointers are at least 4-byte aligned; shifting spreads
        // them across buckets.
        ((key >> 2) as usize) % RO_TABLE_BUCKETS
    }
}

/// Reusable parser state for [`find_method`](crate::objc::find_method).
///
/// A cache may serve many lookups and many images over its lifetime; the
/// section windows rotate when the image changes, while the class-RO table
/// persists. It is owned by a single caller and must not be shared across
/// threads.
pub struct ObjcCache {
    /// Base address of the image the current section windows belong to.
    last_image: Option<u64>,
    sections: Option<ImageSections>,
    pub(crate) ro_table: RoTable,
    /// Once an image parses via the modern ABI, the legacy probe is never
    /// repeated for this cache.
    pub(crate) tried_objc2: bool,
}

impl ObjcCache {
    /// Creates an empty cache. Never fails and commits no pages.
    pub fn new() -> Self {
        ObjcCache {
            last_image: None,
            sections: None,
            ro_table: RoTable::Unallocated,
            tried_objc2: false,
        }
    }

    /// Ensures the cache's section windows cover `image`.
    ///
    /// When the cache already holds this image's sections this is free.
    /// Otherwise all held windows are released and the four Objective-C
    /// sections are acquired together; on any failure the cache is left
    /// empty so the next call retries from scratch.
    ///
    /// The first three sections may legitimately be absent (`NotFound`
    /// propagates and the image simply has no ObjC2 data). A classlist
    /// without its backing `__objc_data` section is a malformed layout and
    /// reported as [`Error::Invalid`].
    pub(crate) fn ensure_sections(&mut self, image: &MachImage<'_>) -> Result<()> {
        if self.last_image == Some(image.base()) && self.sections.is_some() {
            return Ok(());
        }

        // Drop stale windows before acquiring, and clear the image marker
        // so an early error cannot leave it pointing at half-mapped state.
        self.sections = None;
        self.last_image = None;

        let objc_const = map_objc_section(image, SECT_OBJC_CONST)?;
        let classlist = map_objc_section(image, SECT_CLASSLIST)?;
        let catlist = map_objc_section(image, SECT_CATLIST)?;

        let objc_data = match image.map_section(SEG_DATA, SECT_OBJC_DATA) {
            Ok(map) => map,
            Err(err) => {
                debug!(
                    "image {} has {SECT_CLASSLIST} but no usable {SECT_OBJC_DATA}: {err}",
                    image.name()
                );
                return Err(match err {
                    Error::NotFound => Error::invalid(image.base()),
                    other => other,
                });
            }
        };

        self.sections = Some(ImageSections {
            objc_const,
            classlist,
            catlist,
            objc_data,
        });
        self.last_image = Some(image.base());
        Ok(())
    }

    /// Splits the cache into its section windows and the RO table, so a
    /// walk can read through the former while populating the latter.
    pub(crate) fn sections_and_table(&mut self) -> Result<(&ImageSections, &mut RoTable)> {
        let ObjcCache {
            sections, ro_table, ..
        } = self;
        match sections {
            Some(sections) => Ok((sections, ro_table)),
            None => Err(Error::NotFound),
        }
    }
}

impl Default for ObjcCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ObjcCache {
    /// Releases all held section windows and the cache-table pages.
    ///
    /// The windows and the table are anonymous page mappings; clearing them
    /// returns the pages to the kernel. Nothing here can fail, matching the
    /// infallible free operation of the public surface.
    fn drop(&mut self) {
        self.sections = None;
        self.last_image = None;
        self.ro_table = RoTable::Unallocated;
    }
}

fn map_objc_section(image: &MachImage<'_>, section: &str) -> Result<SectionMap> {
    image.map_section(SEG_DATA, section).map_err(|err| {
        if !err.is_not_found() {
            debug!("mapping {SEG_DATA},{section} of {} failed: {err}", image.name());
        }
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FakeImageBuilder, FakeTask};
    use crate::image::structs::CPU_TYPE_X86_64;

    #[test]
    fn test_ro_table_set_and_lookup() {
        let mut table = RoTable::Unallocated;
        assert_eq!(table.lookup(0x1000), 0);

        table.set(0x1000, 0x2000);
        assert_eq!(table.lookup(0x1000), 0x2000);
        // 0x2000 hashes to the same bucket; the key compare must reject it.
        assert_eq!(table.lookup(0x2000), 0);
    }

    #[test]
    fn test_ro_table_first_writer_wins() {
        let mut table = RoTable::Unallocated;
        // Both keys index the same bucket (offset by buckets * stride).
        let first = 0x1000u64;
        let second = first + (RO_TABLE_BUCKETS as u64) * 4;
        table.set(first, 0xAAAA);
        table.set(second, 0xBBBB);
        assert_eq!(table.lookup(first), 0xAAAA);
        // The collision was dropped, not misfiled.
        assert_eq!(table.lookup(second), 0);
    }

    #[test]
    fn test_ro_table_zero_key_ignored() {
        let mut table = RoTable::Unallocated;
        table.set(0, 0x1234);
        assert_eq!(table.lookup(0), 0);
    }

    #[test]
    fn test_ro_table_failed_stays_quiet() {
        let mut table = RoTable::Failed;
        table.set(0x1000, 0x2000);
        assert_eq!(table.lookup(0x1000), 0);
    }

    fn objc2_sections(task: &mut FakeTask, base: u64) {
        FakeImageBuilder::new64(base, CPU_TYPE_X86_64)
            .section("__DATA", "__objc_const", base + 0x4000, 0x10)
            .section("__DATA", "__objc_classlist", base + 0x5000, 0x10)
            .section("__DATA", "__objc_catlist", base + 0x6000, 0)
            .section("__DATA", "__objc_data", base + 0x7000, 0x10)
            .build(task);
        task.alloc(base + 0x4000, 0x10);
        task.alloc(base + 0x5000, 0x10);
        task.alloc(base + 0x7000, 0x10);
    }

    #[test]
    fn test_sections_rotate_between_images() {
        let mut task = FakeTask::new();
        objc2_sections(&mut task, 0x100000000);
        objc2_sections(&mut task, 0x200000000);

        let first = MachImage::new(&task, 0x100000000, "first").unwrap();
        let second = MachImage::new(&task, 0x200000000, "second").unwrap();

        let mut cache = ObjcCache::new();
        cache.ensure_sections(&first).unwrap();
        let (sections, _) = cache.sections_and_table().unwrap();
        assert_eq!(sections.objc_const.base_addr(), 0x100004000);

        cache.ensure_sections(&second).unwrap();
        let (sections, _) = cache.sections_and_table().unwrap();
        assert_eq!(sections.objc_const.base_addr(), 0x200004000);

        // Re-ensuring the current image keeps the windows.
        cache.ensure_sections(&second).unwrap();
        assert!(cache.last_image == Some(0x200000000));
    }

    #[test]
    fn test_missing_classlist_is_not_found() {
        let mut task = FakeTask::new();
        FakeImageBuilder::new64(0x100000000, CPU_TYPE_X86_64)
            .section("__DATA", "__objc_const", 0x100004000, 0x10)
            .build(&mut task);
        task.alloc(0x100004000, 0x10);

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        let mut cache = ObjcCache::new();
        assert_eq!(cache.ensure_sections(&image), Err(Error::NotFound));
        assert!(cache.sections_and_table().is_err());
    }

    #[test]
    fn test_classlist_without_objc_data_is_invalid() {
        let mut task = FakeTask::new();
        FakeImageBuilder::new64(0x100000000, CPU_TYPE_X86_64)
            .section("__DATA", "__objc_const", 0x100004000, 0x10)
            .section("__DATA", "__objc_classlist", 0x100005000, 0x10)
            .section("__DATA", "__objc_catlist", 0x100006000, 0)
            .build(&mut task);
        task.alloc(0x100004000, 0x10);
        task.alloc(0x100005000, 0x10);

        let image = MachImage::new(&task, 0x100000000, "test").unwrap();
        let mut cache = ObjcCache::new();
        assert_eq!(
            cache.ensure_sections(&image),
            Err(Error::invalid(0x100000000))
        );
        // The failed attempt must not leave a stale image marker.
        assert_eq!(cache.last_image, None);
    }
}
