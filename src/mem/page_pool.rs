//! Page-granular allocator for kernel thread stacks.
//!
//! Every thread gets exactly one zero-filled, page-aligned page; the stack
//! grows down from the top of the page. Freed pages are kept on a free list
//! for reuse. A canary word at the lowest address catches stacks that grew
//! past their page; the check runs lazily at the next scheduling event.

use core::alloc::Layout;
use core::ptr::NonNull;
use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;

extern crate alloc;
use alloc::vec::Vec;

/// Size of a kernel stack page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Pattern written at the overflow end of every stack page.
const STACK_CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// One page of stack memory, page-aligned.
pub struct StackPage {
    memory: NonNull<u8>,
}

impl StackPage {
    /// Lowest address of the page.
    pub fn base(&self) -> *mut u8 {
        self.memory.as_ptr()
    }

    /// One past the highest address of the page; the initial stack pointer.
    ///
    /// Page alignment makes this 16-byte aligned, as the common calling
    /// conventions require.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.memory.as_ptr().add(PAGE_SIZE) }
    }

    /// Write the canary at the overflow end of the page.
    pub fn install_canary(&self) {
        unsafe { (self.base() as *mut u64).write(STACK_CANARY) };
    }

    /// Whether the canary is still intact.
    pub fn canary_ok(&self) -> bool {
        unsafe { (self.base() as *const u64).read() == STACK_CANARY }
    }

    fn zero(&self) {
        unsafe { core::ptr::write_bytes(self.base(), 0, PAGE_SIZE) };
    }

    fn layout() -> Layout {
        // PAGE_SIZE is a power of two, so this cannot fail.
        Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap()
    }
}

impl Drop for StackPage {
    fn drop(&mut self) {
        unsafe { alloc::alloc::dealloc(self.memory.as_ptr(), Self::layout()) };
    }
}

unsafe impl Send for StackPage {}
unsafe impl Sync for StackPage {}

/// Free-list allocator for stack pages.
pub struct PagePool {
    free: Mutex<Vec<StackPage>>,
    allocated: AtomicUsize,
    in_use: AtomicUsize,
}

impl PagePool {
    pub const fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Hand out a zero-filled page, reusing a freed one when possible.
    ///
    /// Returns `None` when the underlying allocator is exhausted.
    pub fn allocate(&self) -> Option<StackPage> {
        if let Some(page) = self.free.lock().pop() {
            page.zero();
            self.in_use.fetch_add(1, Ordering::AcqRel);
            return Some(page);
        }

        let raw = unsafe { alloc::alloc::alloc_zeroed(StackPage::layout()) };
        let memory = NonNull::new(raw)?;
        self.allocated.fetch_add(1, Ordering::AcqRel);
        self.in_use.fetch_add(1, Ordering::AcqRel);
        Some(StackPage { memory })
    }

    /// Return a page to the pool for reuse.
    pub fn deallocate(&self, page: StackPage) {
        self.free.lock().push(page);
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }

    /// `(pages ever allocated, pages in use, pages on the free list)`.
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.allocated.load(Ordering::Acquire),
            self.in_use.load(Ordering::Acquire),
            self.free.lock().len(),
        )
    }
}

impl Default for PagePool {
    fn default() -> Self {
        Self::new()
    }
}
