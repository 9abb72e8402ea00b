//! # Page Deserializer
//!
//! Rebuilds a page's subtree with an explicit stack, one structure bit at a
//! time. The bitstream is a balanced-parentheses encoding of the tree shape
//! with pin markers folded in:
//!
//! - a bit while expecting a node (`no_leaf == false`) reads the next leaf
//!   or arrow (the page-bit at the node index says which) and pushes it;
//!   `0` instead of `1` marks the node as pin-marked;
//! - `0` while holding a node starts a fork: the top of stack becomes the
//!   fork's left child;
//! - `1` while holding a node closes a fork: pop the right child, attach,
//!   recompute height and max-key bottom-up.
//!
//! Zero bits after the last node are padding and end the scan.
//!
//! ## Pin Re-Anchoring
//!
//! Pin markers cover a pinned node and its whole in-page subtree. Closing a
//! fork narrows them back down: if only one side was marked, that side's
//! topmost node is the anchor and gets `pinned_page`; if both were marked
//! the fork is still inside the pinned region and the decision moves up.
//! Whatever is still marked when the stack settles anchors at its top node.
//! A page observed to contain any pin marker is not releasable — recycling
//! it would orphan the previous version's arrows into it.
//!
//! ## Point Addressing
//!
//! The caller addresses a node inside the page by `(key, height)`; passing
//! nothing selects the whole subtree. Leaves match while being read, forks
//! match as they close.

use eyre::Result;
use smallvec::SmallVec;
use tracing::trace;

use super::pack::ArrowHeader;
use super::Store;
use crate::config::ARROW_HEADER_FIXED;
use crate::encoding::be::{count_ones, get_bit, get_u32, get_u64, words_for_bits};
use crate::node::{Arrow, Fork, Leaf, Node, NodeId, Side};
use crate::storage::{PageId, ValueId};
use zerocopy::FromBytes;

impl Store {
    /// Reconstructs the subtree stored in `page_id`. `expected` addresses a
    /// node within the page by `(key, height)`; `None` selects the whole
    /// subtree. Returns the addressed node (or `None` when the page is
    /// absent/blank or the descriptor matches nothing) plus a release flag:
    /// `true` when the page held no pin markers and may be recycled once
    /// the caller has spliced the subtree in.
    pub(crate) fn load_page(
        &mut self,
        page_id: PageId,
        expected: Option<(&[u8], u32)>,
    ) -> Result<(Option<NodeId>, bool)> {
        let Some(data) = self.pages.read(page_id)? else {
            return Ok((None, false));
        };
        if data.len() < 4 {
            return Ok((None, false));
        }
        let node_count = get_u32(&data, 0);
        if node_count == 0 {
            return Ok((None, false));
        }
        let (want_key, want_height) = match expected {
            Some((key, height)) => (Some(key), height),
            None => (None, 0),
        };
        trace!(page_id, node_count, "deserializing page");

        let mut offset = 4usize;
        let page_bits_off = offset;
        let page_bits_len = words_for_bits(node_count) as usize;
        let page_count = count_ones(&data, page_bits_off, page_bits_len);
        offset += page_bits_len;
        let key_count = node_count - page_count;

        let prefix_offset = get_u32(&data, offset) as usize;
        offset += 4;
        let mut key_header = offset;
        // The first key body starts right after the prefix, which gives the
        // prefix length without storing it.
        let prefix_len = get_u32(&data, key_header) as usize - prefix_offset;
        let prefix = data[prefix_offset..prefix_offset + prefix_len].to_vec();
        offset += 4 * node_count as usize;
        let mut val_body = get_u32(&data, offset) as usize;
        offset += 4;
        let mut arrow_header = offset;
        offset += ((ARROW_HEADER_FIXED + self.hash_len) * page_count) as usize;
        let mut value_header = offset;
        offset += 4 * key_count as usize;
        let struct_bits_off = offset;
        let max_struct_bits = ((prefix_offset - struct_bits_off) * 8) as u32;

        let mut stack: SmallVec<[(NodeId, bool); 32]> = SmallVec::new();
        let mut node_index: u32 = 0;
        let mut struct_bit: u32 = 0;
        let mut no_leaf = false;
        let mut release = true;
        let mut point: Option<NodeId> = None;

        while node_index < node_count || struct_bit < max_struct_bits {
            let sbit = get_bit(&data, struct_bits_off, struct_bit);
            if !sbit && node_index == node_count {
                // Padding bits after the last node.
                break;
            }
            if no_leaf {
                if sbit {
                    // Close the innermost open fork.
                    let Some((x, x_pinned)) = stack.pop() else {
                        eyre::bail!("page {page_id}: structure bit closes nothing");
                    };
                    let Some(&(y, y_pinned)) = stack.last() else {
                        eyre::bail!("page {page_id}: fork close with empty stack");
                    };
                    let x_height = self.arena.height(x);
                    let x_max = self.arena.max_key(x).to_vec();
                    let f = self.arena.fork_mut(y);
                    f.right = x;
                    f.height = f.height.max(1 + x_height);
                    f.max = x_max;
                    if let Some(key) = want_key {
                        let f = self.arena.fork(y);
                        if f.height == want_height && f.max == key {
                            point = Some(y);
                        }
                    }
                    if x_pinned {
                        if !y_pinned {
                            // The right subtree alone was marked: x anchors.
                            self.arena.pin(x, page_id);
                        }
                    } else if y_pinned {
                        // Only the left subtree was marked: it anchors and
                        // the fork leaves the pinned region.
                        let y_left = self.arena.fork(y).left;
                        self.arena.pin(y_left, page_id);
                        stack.last_mut().unwrap().1 = false;
                    }
                } else {
                    // Start a fork over the node on top of the stack. Its
                    // right child is patched in when the fork closes; the
                    // pin flag transfers from the left child.
                    let Some(&(x, _)) = stack.last() else {
                        eyre::bail!("page {page_id}: fork open with empty stack");
                    };
                    let x_height = self.arena.height(x);
                    let fork = self.arena.alloc(Node::Fork(Fork {
                        height: 1 + x_height,
                        left: x,
                        right: x,
                        max: Vec::new(),
                        arrow: None,
                        pinned_page: 0,
                    }));
                    stack.last_mut().expect("just checked").0 = fork;
                    no_leaf = false;
                }
            } else {
                let is_page = get_bit(&data, page_bits_off, node_index);
                let node = if is_page {
                    let header = ArrowHeader::read_from_prefix(&data[arrow_header..])
                        .map_err(|e| eyre::eyre!("page {page_id}: arrow header: {e:?}"))?
                        .0;
                    arrow_header += ARROW_HEADER_FIXED as usize;
                    // Skip the reserved page-hash slot.
                    arrow_header += self.hash_len as usize;
                    let max = read_key(&data, &mut key_header, &prefix);
                    self.arena.alloc(Node::Arrow(Arrow {
                        page_id: header.page_id.get(),
                        height: header.height.get(),
                        max,
                        back: None,
                        parent: None,
                        side: Side::Left,
                    }))
                } else {
                    let key = read_key(&data, &mut key_header, &prefix);
                    let (value, value_id, value_len) =
                        self.read_val(&data, &mut value_header, &mut val_body);
                    let matches = want_height == 1 && want_key == Some(key.as_slice());
                    let leaf = self.arena.alloc(Node::Leaf(Leaf {
                        key,
                        value,
                        value_id,
                        value_len,
                        arrow: None,
                        pinned_page: 0,
                    }));
                    if matches {
                        point = Some(leaf);
                    }
                    leaf
                };
                node_index += 1;
                no_leaf = true;
                if !sbit {
                    release = false;
                }
                stack.push((node, !sbit));
            }
            struct_bit += 1;
        }

        // Whatever is still marked anchors at its subtree root.
        for &(node, pinned) in stack.iter() {
            if pinned {
                self.arena.pin(node, page_id);
            }
        }
        if want_key.is_none() && point.is_none() {
            point = stack.first().map(|&(node, _)| node);
        }
        Ok((point, release))
    }

    fn read_val(
        &self,
        data: &[u8],
        value_header: &mut usize,
        val_body: &mut usize,
    ) -> (Vec<u8>, ValueId, u32) {
        let value_len = get_u32(data, *value_header);
        *value_header += 4;
        if value_len > self.inline_max {
            let value_id = get_u64(data, *val_body);
            *val_body += 8;
            // Skip the reserved value-hash slot.
            *val_body += self.hash_len as usize;
            (Vec::new(), value_id, value_len)
        } else {
            let value = data[*val_body..*val_body + value_len as usize].to_vec();
            *val_body += value_len as usize;
            (value, 0, value_len)
        }
    }
}

fn read_key(data: &[u8], key_header: &mut usize, prefix: &[u8]) -> Vec<u8> {
    let start = get_u32(data, *key_header) as usize;
    // The next header (or the terminator) bounds this key's body.
    let end = get_u32(data, *key_header + 4) as usize;
    *key_header += 4;
    let mut key = Vec::with_capacity(prefix.len() + end - start);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&data[start..end]);
    key
}
