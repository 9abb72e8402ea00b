//! # Page Serializer
//!
//! Two-pass packing of a subtree into pages.
//!
//! ## Pass 1 — Measure
//!
//! [`Store::measure`] computes, for every subtree, the metrics that
//! determine its packed size: the common key prefix, leaf and arrow counts,
//! key/value body bytes, structure bits, and an inherited pin slot. At each
//! fork it decides the page boundary:
//!
//! 1. If fork + both subtrees fit in `PAGE_SIZE` and their pin slots are
//!    compatible, the merged metrics bubble up — no page is emitted yet.
//! 2. Otherwise the larger child is committed as its own page (ties commit
//!    the right child) and replaced by an arrow, and fork + remaining child
//!    are re-tested.
//! 3. If that still does not fit, the other child is committed too and a
//!    minimal fork-of-two-arrows remains.
//!
//! ## Pin Slots
//!
//! A pin slot `(id, is_old)` rides up with the metrics. An old pin (the node
//! was deserialized out of page `id` and must stay there) forces the page to
//! be rewritten at that id. A fresh slot reserves a unique marker id for a
//! node that acquired an arrow this transaction; the marker is never
//! written, it only keeps two arrow-carrying subtrees from merging into one
//! page. Two slots are compatible iff either is zero or both are identical;
//! the merged slot is the non-zero one, falling back to the fork's own.
//!
//! ## Pass 2 — Emit
//!
//! [`Store::commit_page`] lays the page out exactly as sized and walks the
//! subtree once more, writing key headers and bodies (prefix-stripped),
//! value headers and bodies (inline, or value id + hash slot), arrow
//! headers, the per-node page-bit, and the structure bitstream: leaves and
//! arrows write `1` unless pin-marked, forks advance one bit after their
//! left subtree and close with an unconditional `1`. Cursor positions are
//! checked against the measured metrics before the page is written out.

use eyre::{ensure, Result};
use tracing::trace;
use zerocopy::byteorder::big_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::Store;
use crate::config::{ARROW_HEADER_FIXED, PAGE_SIZE, VALUE_REF_SIZE};
use crate::encoding::be::{put_u32, put_u64, set_bit, words_for_bits};
use crate::encoding::common_prefix;
use crate::node::{Arrow, Node, NodeId, Side};
use crate::storage::PageId;

/// Fixed prelude of an on-page arrow record; the hash slot follows.
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub(crate) struct ArrowHeader {
    pub page_id: U64,
    pub height: U32,
}

const _: () = assert!(size_of::<ArrowHeader>() == ARROW_HEADER_FIXED as usize);

/// Pin slot carried by pass-1 metrics. `is_old` distinguishes a real page
/// assignment from a fresh merge-blocking marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PinSlot {
    pub id: PageId,
    pub is_old: bool,
}

impl PinSlot {
    fn old(id: PageId) -> Self {
        Self { id, is_old: true }
    }

    fn fresh(id: PageId) -> Self {
        Self { id, is_old: false }
    }
}

/// Merges a child slot with the fork's own slot.
fn merge_pin(child: PinSlot, own: PinSlot) -> Option<PinSlot> {
    if child.id == 0 {
        Some(own)
    } else if own.id == 0 {
        Some(child)
    } else if child == own {
        Some(own)
    } else {
        None
    }
}

/// Merges both children's slots with the fork's own slot.
fn merge_pin3(left: PinSlot, right: PinSlot, own: PinSlot) -> Option<PinSlot> {
    if left.id == 0 && right.id == 0 {
        Some(own)
    } else if left.id == 0 && own.id == 0 {
        Some(right)
    } else if right.id == 0 && own.id == 0 {
        Some(left)
    } else if left == right && right == own {
        Some(own)
    } else {
        None
    }
}

/// The pin slot a node contributes on its own behalf.
fn pin_slot(has_arrow: bool, pinned_page: PageId, reserve: &mut PageId) -> PinSlot {
    if pinned_page != 0 {
        PinSlot::old(pinned_page)
    } else if has_arrow {
        *reserve += 1;
        PinSlot::fresh(*reserve)
    } else {
        PinSlot::default()
    }
}

/// Pass-1 result for one subtree.
#[derive(Debug, Clone)]
pub(crate) struct PackMetrics {
    pub prefix: Vec<u8>,
    pub key_count: u32,
    pub page_count: u32,
    pub key_body: u32,
    pub val_body: u32,
    pub struct_bits: u32,
    pub pin: PinSlot,
}

/// Pass-2 write positions, advanced in step with the traversal and checked
/// against the metrics when the page is done.
struct EmitCursor {
    node_index: u32,
    struct_bit: u32,
    key_header: usize,
    arrow_header: usize,
    value_header: usize,
    key_body: usize,
    val_body: usize,
}

impl Store {
    /// Packed byte size of a subtree with metrics `m`, per the page layout.
    pub(crate) fn page_byte_size(&self, m: &PackMetrics) -> u32 {
        let node_count = m.key_count + m.page_count;
        let prefix_len = m.prefix.len() as u32;
        4
            + words_for_bits(node_count)
            + 4
            + 4 * node_count + 4
            + (ARROW_HEADER_FIXED + self.hash_len) * m.page_count
            + 4 * m.key_count
            + words_for_bits(m.struct_bits)
            + prefix_len
            + (m.key_body - node_count * prefix_len)
            + m.val_body
    }

    /// Pass 1. Emits child pages as a side effect wherever the subtree at
    /// `id` cannot stay whole, replacing the committed child with an arrow.
    /// `reserve` hands out fresh pin-marker ids.
    pub(crate) fn measure(&mut self, id: NodeId, reserve: &mut PageId) -> Result<PackMetrics> {
        match self.arena.node(id) {
            Node::Leaf(l) => {
                let val_body = if l.value_len > self.inline_max {
                    VALUE_REF_SIZE + self.hash_len
                } else {
                    l.value_len
                };
                Ok(PackMetrics {
                    prefix: l.key.clone(),
                    key_count: 1,
                    page_count: 0,
                    key_body: l.key.len() as u32,
                    val_body,
                    struct_bits: 1,
                    pin: pin_slot(l.arrow.is_some(), l.pinned_page, reserve),
                })
            }
            Node::Arrow(a) => Ok(PackMetrics {
                prefix: a.max.clone(),
                key_count: 0,
                page_count: 1,
                key_body: a.max.len() as u32,
                val_body: 0,
                struct_bits: 1,
                pin: PinSlot::default(),
            }),
            Node::Fork(f) => {
                let (left, right, has_arrow, pinned_page) =
                    (f.left, f.right, f.arrow.is_some(), f.pinned_page);
                let own = pin_slot(has_arrow, pinned_page, reserve);
                let ml = self.measure(left, reserve)?;
                let mr = self.measure(right, reserve)?;

                if let Some(pin) = merge_pin3(ml.pin, mr.pin, own) {
                    let merged = PackMetrics {
                        prefix: common_prefix(&ml.prefix, &mr.prefix).to_vec(),
                        key_count: ml.key_count + mr.key_count,
                        page_count: ml.page_count + mr.page_count,
                        key_body: ml.key_body + mr.key_body,
                        val_body: ml.val_body + mr.val_body,
                        // Two extra bits for the fork itself.
                        struct_bits: ml.struct_bits + mr.struct_bits + 2,
                        pin,
                    };
                    if self.page_byte_size(&merged) < PAGE_SIZE as u32 {
                        return Ok(merged);
                    }
                }

                let size_l = self.page_byte_size(&ml);
                let size_r = self.page_byte_size(&mr);
                if size_l > size_r {
                    let l_arrow = self.child_as_arrow(id, Side::Left, ml)?;
                    let l_max = self.arena.arrow(l_arrow).max.clone();
                    if let Some(pin) = merge_pin(mr.pin, own) {
                        let remainder = PackMetrics {
                            prefix: common_prefix(&mr.prefix, &l_max).to_vec(),
                            key_count: mr.key_count,
                            page_count: mr.page_count + 1,
                            key_body: mr.key_body + l_max.len() as u32,
                            val_body: mr.val_body,
                            // Two bits for the fork, one for the new arrow.
                            struct_bits: mr.struct_bits + 3,
                            pin,
                        };
                        if self.page_byte_size(&remainder) < PAGE_SIZE as u32 {
                            return Ok(remainder);
                        }
                    }
                    let r_arrow = self.child_as_arrow(id, Side::Right, mr)?;
                    let r_max = self.arena.arrow(r_arrow).max.clone();
                    Ok(two_arrow_metrics(&l_max, &r_max, own))
                } else {
                    let r_arrow = self.child_as_arrow(id, Side::Right, mr)?;
                    let r_max = self.arena.arrow(r_arrow).max.clone();
                    if let Some(pin) = merge_pin(ml.pin, own) {
                        let remainder = PackMetrics {
                            prefix: common_prefix(&ml.prefix, &r_max).to_vec(),
                            key_count: ml.key_count,
                            page_count: ml.page_count + 1,
                            key_body: ml.key_body + r_max.len() as u32,
                            val_body: ml.val_body,
                            struct_bits: ml.struct_bits + 3,
                            pin,
                        };
                        if self.page_byte_size(&remainder) < PAGE_SIZE as u32 {
                            return Ok(remainder);
                        }
                    }
                    let l_arrow = self.child_as_arrow(id, Side::Left, ml)?;
                    let l_max = self.arena.arrow(l_arrow).max.clone();
                    Ok(two_arrow_metrics(&l_max, &r_max, own))
                }
            }
        }
    }

    /// Commits the child of `fork` on `side` as its own page (unless it
    /// already is an arrow) and splices an arrow to it into the fork.
    fn child_as_arrow(&mut self, fork: NodeId, side: Side, m: PackMetrics) -> Result<NodeId> {
        let child = {
            let f = self.arena.fork(fork);
            match side {
                Side::Left => f.left,
                Side::Right => f.right,
            }
        };
        if matches!(self.arena.node(child), Node::Arrow(_)) {
            return Ok(child);
        }
        let page_id = self.commit_page(child, m)?;
        let arrow = self.arena.alloc(Node::Arrow(Arrow {
            page_id,
            height: self.arena.height(child),
            max: self.arena.max_key(child).to_vec(),
            back: None,
            parent: None,
            side,
        }));
        match side {
            Side::Left => self.arena.fork_mut(fork).left = arrow,
            Side::Right => self.arena.fork_mut(fork).right = arrow,
        }
        Ok(arrow)
    }

    /// Pass 2 driver: lays out and writes one page holding the subtree at
    /// `id`, whose metrics are `m`.
    pub(crate) fn commit_page(&mut self, id: NodeId, m: PackMetrics) -> Result<PageId> {
        let node_count = m.key_count + m.page_count;
        let size = self.page_byte_size(&m) as usize;
        ensure!(
            size <= PAGE_SIZE,
            "subtree max {:?} packs to {} bytes, over the {} page budget",
            String::from_utf8_lossy(self.arena.max_key(id)),
            size,
            PAGE_SIZE
        );

        let mut data = vec![0u8; size];
        put_u32(&mut data, 0, node_count);
        let mut offset = 4usize;
        let page_bits_off = offset;
        offset += words_for_bits(node_count) as usize;
        let prefix_offset_field = offset;
        offset += 4;
        let key_header_off = offset;
        offset += 4 * node_count as usize + 4;
        let arrow_header_off = offset;
        offset += ((ARROW_HEADER_FIXED + self.hash_len) * m.page_count) as usize;
        let value_header_off = offset;
        offset += 4 * m.key_count as usize;
        let struct_bits_off = offset;
        offset += words_for_bits(m.struct_bits) as usize;
        put_u32(&mut data, prefix_offset_field, offset as u32);
        data[offset..offset + m.prefix.len()].copy_from_slice(&m.prefix);
        offset += m.prefix.len();
        let key_body_off = offset;
        offset += (m.key_body - node_count * m.prefix.len() as u32) as usize;
        let val_body_off = offset;

        let page_id = if m.pin.is_old {
            m.pin.id
        } else {
            self.pages.allocate()
        };

        let mut cur = EmitCursor {
            node_index: 0,
            struct_bit: 0,
            key_header: key_header_off,
            arrow_header: arrow_header_off,
            value_header: value_header_off,
            key_body: key_body_off,
            val_body: val_body_off,
        };
        self.emit(
            id,
            page_id,
            &mut data,
            m.prefix.len(),
            false,
            page_bits_off,
            struct_bits_off,
            &mut cur,
        )?;
        // Terminator: the end offset of the last key body.
        put_u32(&mut data, cur.key_header, cur.key_body as u32);

        ensure!(
            cur.val_body == size,
            "page {} value cursor ended at {}, layout says {}",
            page_id,
            cur.val_body,
            size
        );
        ensure!(
            cur.node_index == node_count,
            "page {} emitted {} nodes, measured {}",
            page_id,
            cur.node_index,
            node_count
        );
        ensure!(
            cur.struct_bit == m.struct_bits,
            "page {} emitted {} structure bits, measured {}",
            page_id,
            cur.struct_bit,
            m.struct_bits
        );

        trace!(page_id, node_count, size, "committed page");
        self.pages.write(page_id, data)?;
        self.committed_pages += 1;
        Ok(page_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        id: NodeId,
        page_id: PageId,
        data: &mut [u8],
        prefix_len: usize,
        subtree_pinned: bool,
        page_bits_off: usize,
        struct_bits_off: usize,
        cur: &mut EmitCursor,
    ) -> Result<()> {
        match self.arena.node(id) {
            Node::Leaf(l) => {
                let (key, value, value_len, pinned_page, arrow) = (
                    l.key.clone(),
                    l.value.clone(),
                    l.value_len,
                    l.pinned_page,
                    l.arrow,
                );
                write_key(&key[prefix_len..], data, cur);
                put_u32(data, cur.value_header, value_len);
                cur.value_header += 4;
                if value_len > self.inline_max {
                    let mut value_id = self.arena.leaf(id).value_id;
                    if value_id == 0 {
                        value_id = self.values.next_id();
                        self.values.add(value_id, &value)?;
                        self.arena.leaf_mut(id).value_id = value_id;
                    }
                    put_u64(data, cur.val_body, value_id);
                    cur.val_body += 8;
                    if let Some(hash) = self.values.hash(value_id) {
                        let n = hash.len().min(self.hash_len as usize);
                        data[cur.val_body..cur.val_body + n].copy_from_slice(&hash[..n]);
                    }
                    cur.val_body += self.hash_len as usize;
                } else {
                    data[cur.val_body..cur.val_body + value_len as usize]
                        .copy_from_slice(&value[..value_len as usize]);
                    cur.val_body += value_len as usize;
                }
                // A pin marker is a 0 bit where an ordinary leaf writes 1.
                let pinned = subtree_pinned || pinned_page == page_id || arrow.is_some();
                if !pinned {
                    set_bit(data, struct_bits_off, cur.struct_bit);
                }
                cur.struct_bit += 1;
                cur.node_index += 1;
                if let Some(a) = arrow {
                    self.arena.arrow_mut(a).page_id = page_id;
                }
                Ok(())
            }
            Node::Fork(f) => {
                let (left, right, arrow, pinned_page) =
                    (f.left, f.right, f.arrow, f.pinned_page);
                let pinned = subtree_pinned || pinned_page == page_id || arrow.is_some();
                self.emit(
                    left,
                    page_id,
                    data,
                    prefix_len,
                    pinned,
                    page_bits_off,
                    struct_bits_off,
                    cur,
                )?;
                // The fork's own bit stays 0 between its subtrees.
                cur.struct_bit += 1;
                if let Some(a) = arrow {
                    self.arena.arrow_mut(a).page_id = page_id;
                }
                self.emit(
                    right,
                    page_id,
                    data,
                    prefix_len,
                    pinned,
                    page_bits_off,
                    struct_bits_off,
                    cur,
                )?;
                set_bit(data, struct_bits_off, cur.struct_bit);
                cur.struct_bit += 1;
                Ok(())
            }
            Node::Arrow(a) => {
                let (a_page, a_height, a_max) = (a.page_id, a.height, a.max.clone());
                let header = ArrowHeader {
                    page_id: U64::new(a_page),
                    height: U32::new(a_height),
                };
                data[cur.arrow_header..cur.arrow_header + ARROW_HEADER_FIXED as usize]
                    .copy_from_slice(header.as_bytes());
                cur.arrow_header += ARROW_HEADER_FIXED as usize;
                write_key(&a_max[prefix_len..], data, cur);
                // Hash slot stays zero until a page hash algorithm exists.
                cur.arrow_header += self.hash_len as usize;
                set_bit(data, page_bits_off, cur.node_index);
                cur.node_index += 1;
                if !subtree_pinned {
                    set_bit(data, struct_bits_off, cur.struct_bit);
                }
                cur.struct_bit += 1;
                Ok(())
            }
        }
    }
}

fn two_arrow_metrics(l_max: &[u8], r_max: &[u8], pin: PinSlot) -> PackMetrics {
    PackMetrics {
        prefix: common_prefix(r_max, l_max).to_vec(),
        key_count: 0,
        page_count: 2,
        key_body: (l_max.len() + r_max.len()) as u32,
        val_body: 0,
        // Two bits for the arrows, two for the fork.
        struct_bits: 4,
        pin,
    }
}

fn write_key(key_tail: &[u8], data: &mut [u8], cur: &mut EmitCursor) {
    put_u32(data, cur.key_header, cur.key_body as u32);
    cur.key_header += 4;
    data[cur.key_body..cur.key_body + key_tail.len()].copy_from_slice(key_tail);
    cur.key_body += key_tail.len();
}
