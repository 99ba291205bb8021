//! Page descriptors and the per-order free lists threaded through them.

use vmm_info::memory::NUM_OF_ORDERS;

/// End-of-list marker for descriptor links.
const NIL: u32 = u32::MAX;

/// State of one pool page.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PageType {
    /// Head of a free block, linked into the list of its order.
    Free,
    /// Inside a larger block; never handed out on its own.
    NotHead,
    /// Head of a block owned by a caller.
    Allocated,
    /// Never managed (VMM image, firmware tables, ...).
    Reserved,
}

/// Bookkeeping for one base page of the pool.
///
/// The page's addresses are not stored; descriptor `i` always describes pool
/// page `i`, whose physical and virtual addresses follow from the pool
/// window.
#[derive(Debug, Copy, Clone)]
pub struct PageDescriptor {
    kind: PageType,
    order: u8,
    prev: u32,
    next: u32,
}

impl PageDescriptor {
    pub const RESERVED: Self = Self {
        kind: PageType::Reserved,
        order: 0,
        prev: NIL,
        next: NIL,
    };

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PageType {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn order(&self) -> u8 {
        self.order
    }
}

impl Default for PageDescriptor {
    fn default() -> Self {
        Self::RESERVED
    }
}

/// Doubly-linked free lists, one per order, using descriptor indices as
/// links. Pushes and pops happen at the head.
pub(crate) struct FreeLists<'a> {
    pages: &'a mut [PageDescriptor],
    heads: [u32; NUM_OF_ORDERS],
    counts: [usize; NUM_OF_ORDERS],
}

impl<'a> FreeLists<'a> {
    pub(crate) fn new(pages: &'a mut [PageDescriptor]) -> Self {
        assert!(pages.len() < NIL as usize, "pool too large for u32 links");
        pages.fill(PageDescriptor::RESERVED);
        Self {
            pages,
            heads: [NIL; NUM_OF_ORDERS],
            counts: [0; NUM_OF_ORDERS],
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub(crate) fn page(&self, idx: usize) -> &PageDescriptor {
        &self.pages[idx]
    }

    #[inline]
    pub(crate) fn set(&mut self, idx: usize, kind: PageType, order: u8) {
        let p = &mut self.pages[idx];
        p.kind = kind;
        p.order = order;
    }

    #[inline]
    pub(crate) fn count(&self, order: usize) -> usize {
        self.counts[order]
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn push(&mut self, order: usize, idx: usize) {
        let old = self.heads[order];
        {
            let p = &mut self.pages[idx];
            p.prev = NIL;
            p.next = old;
        }
        if old != NIL {
            self.pages[old as usize].prev = idx as u32;
        }
        self.heads[order] = idx as u32;
        self.counts[order] += 1;
    }

    pub(crate) fn remove(&mut self, order: usize, idx: usize) {
        let (prev, next) = {
            let p = &mut self.pages[idx];
            let links = (p.prev, p.next);
            p.prev = NIL;
            p.next = NIL;
            links
        };
        if prev == NIL {
            assert_eq!(self.heads[order] as usize, idx, "page {idx} not on list {order}");
            self.heads[order] = next;
        } else {
            self.pages[prev as usize].next = next;
        }
        if next != NIL {
            self.pages[next as usize].prev = prev;
        }
        self.counts[order] -= 1;
    }

    pub(crate) fn pop(&mut self, order: usize) -> Option<usize> {
        let head = self.heads[order];
        if head == NIL {
            return None;
        }
        let idx = head as usize;
        self.remove(order, idx);
        Some(idx)
    }

    #[cfg(test)]
    pub(crate) fn iter(&self, order: usize) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.heads[order];
        core::iter::from_fn(move || {
            (cur != NIL).then(|| {
                let idx = cur as usize;
                cur = self.pages[idx].next;
                idx
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_lifo_and_removal_relinks() {
        let mut storage = vec![PageDescriptor::default(); 8];
        let mut lists = FreeLists::new(&mut storage);
        for idx in [1, 3, 5] {
            lists.push(0, idx);
        }
        assert_eq!(lists.iter(0).collect::<Vec<_>>(), vec![5, 3, 1]);
        lists.remove(0, 3);
        assert_eq!(lists.iter(0).collect::<Vec<_>>(), vec![5, 1]);
        assert_eq!(lists.count(0), 2);
        assert_eq!(lists.pop(0), Some(5));
        assert_eq!(lists.pop(0), Some(1));
        assert_eq!(lists.pop(0), None);
        assert_eq!(lists.count(0), 0);
    }
}
