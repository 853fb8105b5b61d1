//! `HeapArena` — a first-fit-by-traversal, best-fit-by-policy, coalescing
//! allocator over a caller-supplied byte buffer.
//!
//! The block traversal and split/coalesce machinery follows a kernel-style
//! `memory/heap.rs` (in-band block headers, split-on-allocate,
//! sweep-to-fixpoint coalesce-on-free); the fit policy instead tracks the
//! smallest free block that still fits and breaks early on an exact match,
//! the way an older C allocator's `getFreeBlock` does it, rather than taking
//! the first block that fits.
//!
//! A `HeapArena` is an ordinary value, not a process-wide singleton:
//! construct as many as you like over as many buffers as you like. There is
//! also no heap growth: the arena is a fixed region for its entire lifetime,
//! and `allocate` returns null rather than retrying by extending the region.

use core::ptr::NonNull;

use crate::sync::CriticalSection;

/// Pointer-width alignment every payload address satisfies.
pub const ALIGNMENT: usize = core::mem::size_of::<usize>();

/// Highest payload size the packed `size_and_flags` word can hold: one bit
/// is reserved for the occupied flag, leaving 31 bits of size.
const MAX_PAYLOAD_SIZE: usize = 0x7FFF_FFFF;

const IN_USE_BIT: u32 = 1;
const SIZE_SHIFT: u32 = 1;

/// In-band per-block header: one packed `occupied | size` word plus a
/// singly-linked `next` pointer to the next block in address order (`None`
/// for the last block). This mirrors an older C allocator's block-list
/// layout field for field: a 1-bit flag plus 31-bit size word, followed by a
/// link pointer.
#[repr(C)]
struct BlockHeader {
    size_and_flags: u32,
    next: Option<NonNull<BlockHeader>>,
}

/// Size of one in-band header, as actually laid out (including the padding
/// needed to keep `next` pointer-aligned). On a 64-bit target a 4-byte
/// size/flags word plus an 8-byte link pointer is 12 logical bytes, padded
/// to a 16-byte, `usize`-aligned struct.
pub const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

impl BlockHeader {
    #[inline]
    fn size(&self) -> u32 {
        self.size_and_flags >> SIZE_SHIFT
    }

    #[inline]
    fn set_size(&mut self, size: u32) {
        self.size_and_flags = (size << SIZE_SHIFT) | (self.size_and_flags & IN_USE_BIT);
    }

    #[inline]
    fn in_use(&self) -> bool {
        self.size_and_flags & IN_USE_BIT != 0
    }

    #[inline]
    fn set_in_use(&mut self, in_use: bool) {
        if in_use {
            self.size_and_flags |= IN_USE_BIT;
        } else {
            self.size_and_flags &= !IN_USE_BIT;
        }
    }
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[inline]
fn header_at(addr: usize) -> NonNull<BlockHeader> {
    // SAFETY: callers only ever pass addresses known to host a live header.
    unsafe { NonNull::new_unchecked(addr as *mut BlockHeader) }
}

#[inline]
fn payload_ptr(block: NonNull<BlockHeader>) -> *mut u8 {
    // SAFETY: `block` points to a full header; the payload immediately
    // follows it.
    unsafe { (block.as_ptr() as *mut u8).add(HEADER_SIZE) }
}

#[inline]
fn block_from_payload(ptr: *mut u8) -> NonNull<BlockHeader> {
    // SAFETY: caller ensures `ptr` was previously returned as a payload
    // pointer, so subtracting `HEADER_SIZE` lands back on the header.
    unsafe { NonNull::new_unchecked(ptr.sub(HEADER_SIZE) as *mut BlockHeader) }
}

/// A bump-style first-fit/best-fit coalescing heap over a fixed byte region.
///
/// `HeapArena` does not own the buffer it manages — the caller supplies it
/// and keeps it alive for the arena's whole lifetime. There is no destructor
/// that frees the backing memory; it was never this arena's to free.
pub struct HeapArena {
    base: usize,
    end: usize,
    total_size: usize,
    guard: CriticalSection,
}

// SAFETY: `HeapArena`'s own fields are plain, write-once-at-init values; all
// mutation happens through raw pointers into the caller-supplied buffer,
// bracketed by `guard` under the single-threaded-cooperative contract
// documented in `crate::sync`.
unsafe impl Sync for HeapArena {}

impl HeapArena {
    /// Initializes an arena over `buffer`, aligning the usable region up to
    /// [`ALIGNMENT`] as needed. If `buffer` is too small to host even one
    /// block header, the arena is constructed but [`is_initialized`] reports
    /// `false` and every operation becomes a no-op/failure rather than a
    /// panic.
    ///
    /// [`is_initialized`]: HeapArena::is_initialized
    pub fn init(buffer: &mut [u8], critical_section: CriticalSection) -> HeapArena {
        let start_addr = buffer.as_mut_ptr() as usize;
        let aligned_start = align_up(start_addr, ALIGNMENT);
        let pad = aligned_start - start_addr;

        if pad >= buffer.len() || buffer.len() - pad < HEADER_SIZE + ALIGNMENT {
            return HeapArena {
                base: 0,
                end: 0,
                total_size: 0,
                guard: critical_section,
            };
        }

        let usable_len = buffer.len() - pad;
        let base = aligned_start;
        let end = base + usable_len;

        // SAFETY: `base..end` is the aligned, in-bounds slice of `buffer` we
        // just computed; writing the initial header is the first access.
        unsafe {
            let head = header_at(base);
            (*head.as_ptr()).size_and_flags = 0;
            (*head.as_ptr()).set_size((usable_len - HEADER_SIZE) as u32);
            (*head.as_ptr()).set_in_use(false);
            (*head.as_ptr()).next = None;
        }

        crate::logging::logln(
            "arena",
            format_args!("init base={:#x} size={}", base, usable_len),
        );

        HeapArena {
            base,
            end,
            total_size: usable_len,
            guard: critical_section,
        }
    }

    /// True once `init` has successfully carved out at least one block.
    pub fn is_initialized(&self) -> bool {
        self.total_size != 0
    }

    /// Boolean membership test: is `ptr` an address this arena owns.
    ///
    /// Mirrors `HeapManager_checkHeapBlock`'s bounds check; like the
    /// original, this is a range test and not a full header-chain lookup, so
    /// it cannot distinguish a genuine payload pointer from an arbitrary
    /// address that merely falls inside the arena's byte range.
    pub fn contains(&self, ptr: *const u8) -> bool {
        if ptr.is_null() || !self.is_initialized() {
            return false;
        }
        let addr = ptr as usize;
        addr > self.base && addr < self.end
    }

    /// Allocates `n` bytes, aligned to [`ALIGNMENT`]. Returns null if no
    /// block fits or `n` is zero.
    pub fn allocate(&self, n: usize) -> *mut u8 {
        if n == 0 || !self.is_initialized() {
            return core::ptr::null_mut();
        }
        self.guard.bracket(|| self.allocate_locked(n))
    }

    fn allocate_locked(&self, n: usize) -> *mut u8 {
        let payload = align_up(n, ALIGNMENT);
        if payload > MAX_PAYLOAD_SIZE {
            return core::ptr::null_mut();
        }

        let block = match self.find_best_fit(payload) {
            Some(block) => block,
            None => return core::ptr::null_mut(),
        };

        let block_ptr = block.as_ptr();
        // SAFETY: `block` was just found in our own list; it is live.
        let snapshot_size = unsafe { (*block_ptr).size() };
        let snapshot_next = unsafe { (*block_ptr).next };

        self.split_block(block, payload);
        // SAFETY: see above.
        unsafe {
            (*block_ptr).set_in_use(true);
        }

        #[cfg(feature = "debug-checks")]
        {
            if !self.self_check() {
                // SAFETY: restores the header to its pre-allocation state;
                // any split-off free header becomes unreferenced, harmless
                // bytes inside the restored block's own span.
                unsafe {
                    (*block_ptr).set_in_use(false);
                    (*block_ptr).set_size(snapshot_size);
                    (*block_ptr).next = snapshot_next;
                }
                crate::logging::logln(
                    "arena",
                    format_args!("self-check failed, rolled back allocate of {} bytes", n),
                );
                return core::ptr::null_mut();
            }
        }
        #[cfg(not(feature = "debug-checks"))]
        {
            let _ = snapshot_size;
            let _ = snapshot_next;
        }

        let ptr = payload_ptr(block);
        crate::logging::logln(
            "arena",
            format_args!(
                "alloc ptr={:#x} requested={} payload={}",
                ptr as usize, n, payload
            ),
        );
        ptr
    }

    /// Best-fit search: smallest free block whose payload is `>= need`,
    /// breaking early on an exact match. Grounded on
    /// `HeapManager_getFreeBlock` in the original source.
    fn find_best_fit(&self, need: usize) -> Option<NonNull<BlockHeader>> {
        let mut current = Some(header_at(self.base));
        let mut best: Option<NonNull<BlockHeader>> = None;
        let mut best_size = usize::MAX;

        while let Some(node) = current {
            // SAFETY: every node in the chain starting at `base` is a live
            // header written by `init`/`split_block`/`merge_neighbors`.
            let hdr = unsafe { node.as_ref() };
            let size = hdr.size() as usize;
            if !hdr.in_use() && size >= need {
                if size < best_size {
                    best_size = size;
                    best = Some(node);
                    if size == need {
                        break;
                    }
                }
            }
            current = hdr.next;
        }

        best
    }

    /// Splits `block` if the tail remainder is large enough to host a new
    /// free block on its own (`S >= n + header + alignment`); otherwise the
    /// whole block is handed over, carrying internal fragmentation rather
    /// than orphaning a sub-minimal free fragment.
    fn split_block(&self, block: NonNull<BlockHeader>, need: usize) {
        let block_ptr = block.as_ptr();
        // SAFETY: `block` is a live header in our chain.
        unsafe {
            let old_size = (*block_ptr).size() as usize;
            if old_size >= need + HEADER_SIZE + ALIGNMENT {
                let new_free_addr = block_ptr as usize + HEADER_SIZE + need;
                let new_free = header_at(new_free_addr);
                let new_free_payload = old_size - need - HEADER_SIZE;

                (*new_free.as_ptr()).size_and_flags = 0;
                (*new_free.as_ptr()).set_size(new_free_payload as u32);
                (*new_free.as_ptr()).set_in_use(false);
                (*new_free.as_ptr()).next = (*block_ptr).next;

                (*block_ptr).set_size(need as u32);
                (*block_ptr).next = Some(new_free);
            }
        }
    }

    /// Frees a previously allocated payload pointer. Null is a no-op;
    /// pointers this arena does not recognize as its own are silently
    /// ignored.
    pub fn free(&self, ptr: *mut u8) {
        if ptr.is_null() || !self.contains(ptr) {
            return;
        }
        self.guard.bracket(|| self.free_locked(ptr));
    }

    fn free_locked(&self, ptr: *mut u8) {
        let block = block_from_payload(ptr);
        let block_ptr = block.as_ptr();
        // SAFETY: `ptr` passed `contains`, and the caller contract requires
        // it was previously returned by `allocate`/`reallocate`/`callocate`.
        unsafe {
            (*block_ptr).set_in_use(false);
        }
        crate::logging::logln("arena", format_args!("free ptr={:#x}", ptr as usize));
        self.merge_neighbors(block);
    }

    /// Eager coalesce: absorb a free upper (address-wise next) neighbor,
    /// then let a free lower (predecessor) neighbor absorb this block.
    /// Restores the invariant that no two adjacent free blocks exist.
    fn merge_neighbors(&self, block: NonNull<BlockHeader>) {
        let block_ptr = block.as_ptr();
        // SAFETY: `block` is a live header in our chain.
        unsafe {
            if let Some(next) = (*block_ptr).next {
                if !(*next.as_ptr()).in_use() {
                    let combined = (*block_ptr).size() as usize + HEADER_SIZE + (*next.as_ptr()).size() as usize;
                    (*block_ptr).set_size(combined as u32);
                    (*block_ptr).next = (*next.as_ptr()).next;
                }
            }
        }

        if let Some(prev) = self.find_predecessor(block) {
            let prev_ptr = prev.as_ptr();
            // SAFETY: `prev` is a live header in our chain.
            unsafe {
                if !(*prev_ptr).in_use() {
                    let combined = (*prev_ptr).size() as usize + HEADER_SIZE + (*block_ptr).size() as usize;
                    (*prev_ptr).set_size(combined as u32);
                    (*prev_ptr).next = (*block_ptr).next;
                }
            }
        }
    }

    fn find_predecessor(&self, target: NonNull<BlockHeader>) -> Option<NonNull<BlockHeader>> {
        let mut current = Some(header_at(self.base));
        while let Some(node) = current {
            // SAFETY: every node in the chain is a live header.
            let hdr = unsafe { node.as_ref() };
            if hdr.next == Some(target) {
                return Some(node);
            }
            if core::ptr::eq(node.as_ptr(), target.as_ptr()) {
                return None;
            }
            current = hdr.next;
        }
        None
    }

    /// Grow/shrink a previous allocation. Shrink is a no-op — tail slack is
    /// not split back into a free block; grow is always allocate-copy-free.
    /// `reallocate(null, n)` is `allocate(n)`; `reallocate(p, 0)` frees `p`
    /// and returns null.
    pub fn reallocate(&self, ptr: *mut u8, n: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.allocate(n);
        }
        if n == 0 {
            self.free(ptr);
            return core::ptr::null_mut();
        }
        if !self.contains(ptr) {
            return core::ptr::null_mut();
        }
        self.guard.bracket(|| self.reallocate_locked(ptr, n))
    }

    fn reallocate_locked(&self, ptr: *mut u8, n: usize) -> *mut u8 {
        let block = block_from_payload(ptr);
        // SAFETY: `ptr` passed `contains` and is caller-guaranteed live.
        let old_payload = unsafe { (*block.as_ptr()).size() as usize };
        let want = align_up(n, ALIGNMENT);

        if old_payload >= want {
            return ptr;
        }

        let new_ptr = self.allocate_locked(n);
        if new_ptr.is_null() {
            return core::ptr::null_mut();
        }

        // SAFETY: `ptr` has at least `old_payload` readable bytes, `new_ptr`
        // has at least `want >= old_payload` writable bytes, and the two
        // regions never overlap (one was just split out of free memory).
        unsafe {
            core::ptr::copy_nonoverlapping(ptr, new_ptr, old_payload.min(want));
        }
        self.free_locked(ptr);
        new_ptr
    }

    /// `allocate(count * size)` followed by a zero-fill. Rejects the request
    /// if `count * size` overflows or exceeds `2^32 - 1`.
    pub fn callocate(&self, count: usize, size: usize) -> *mut u8 {
        let total = match count.checked_mul(size) {
            Some(total) if total > 0 && total <= u32::MAX as usize => total,
            _ => return core::ptr::null_mut(),
        };
        self.guard.bracket(|| self.callocate_locked(total))
    }

    fn callocate_locked(&self, total: usize) -> *mut u8 {
        let ptr = self.allocate_locked(total);
        if !ptr.is_null() {
            // SAFETY: `allocate_locked` returned a non-null pointer to
            // `total` writable bytes.
            unsafe {
                core::ptr::write_bytes(ptr, 0, total);
            }
        }
        ptr
    }

    /// Largest contiguous free payload currently available.
    pub fn max_free_block_size(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        self.guard.bracket(|| {
            let mut current = Some(header_at(self.base));
            let mut max = 0usize;
            while let Some(node) = current {
                // SAFETY: every node in the chain is a live header.
                let hdr = unsafe { node.as_ref() };
                if !hdr.in_use() {
                    max = max.max(hdr.size() as usize);
                }
                current = hdr.next;
            }
            max
        })
    }

    /// Diagnostic enumeration of every block (address, occupied, size).
    pub fn log_pool(&self) {
        if !self.is_initialized() {
            return;
        }
        let mut current = Some(header_at(self.base));
        while let Some(node) = current {
            // SAFETY: every node in the chain is a live header.
            let hdr = unsafe { node.as_ref() };
            crate::logging::logln(
                "arena",
                format_args!(
                    "block addr={:#x} in_use={} size={}",
                    node.as_ptr() as usize,
                    hdr.in_use(),
                    hdr.size()
                ),
            );
            current = hdr.next;
        }
    }

    /// Optional debug self-check: `Σ payload + count * header == total_size`.
    /// Gated behind the `debug-checks` feature since it walks the whole
    /// block list.
    #[cfg(feature = "debug-checks")]
    fn self_check(&self) -> bool {
        let mut sum = 0usize;
        let mut count = 0usize;
        let mut current = Some(header_at(self.base));
        while let Some(node) = current {
            // SAFETY: every node in the chain is a live header.
            let hdr = unsafe { node.as_ref() };
            sum += hdr.size() as usize;
            count += 1;
            current = hdr.next;
        }
        sum + count * HEADER_SIZE == self.total_size
    }
}
