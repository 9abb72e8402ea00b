//! # Reachability and Space Accounting
//!
//! Offline diagnostics over the committed state:
//!
//! - [`Store::scan`] walks the current version from its root page, follows
//!   every arrow (validating each against the subtree it lands in), and
//!   reports how many distinct pages the version touches and how deep the
//!   arrow chain goes.
//! - [`Store::space_scan`] re-measures every parseable page in the store
//!   and breaks the file down by byte category — headers, bitmaps, prefix,
//!   key/value bodies, slack. Pages that do not parse (holes, never-written
//!   ids, torn writes) are skipped.

use eyre::Result;
use hashbrown::HashSet;

use super::Store;
use crate::config::{ARROW_HEADER_FIXED, PAGE_SIZE};
use crate::encoding::be::words_for_bits;
use crate::node::{Node, NodeId};
use crate::storage::{PageId, Version};

/// Point-in-time counters for the whole store.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub current_version: Version,
    pub max_page_id: PageId,
    /// Total bytes of committed page payloads (not slab space).
    pub page_space: u64,
    pub committed_pages: u64,
    /// Out-of-line values tracked in memory mode; 0 over a value file.
    pub large_values: usize,
    pub large_value_bytes: u64,
}

/// Result of walking the current version's page graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Longest chain of arrows from the root page to a leaf.
    pub max_arrow_depth: usize,
    /// Distinct pages reachable from the current root.
    pub pages: usize,
}

/// Byte breakdown of every parseable page.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceReport {
    pub pages: u64,
    pub leaves: u64,
    pub arrows: u64,
    /// `pages * PAGE_SIZE`: the slab space the parseable pages occupy.
    pub total_size: u64,
    pub fixed_headers: u64,
    pub key_headers: u64,
    pub arrow_headers: u64,
    pub value_headers: u64,
    pub page_bits: u64,
    pub struct_bits: u64,
    pub prefixes: u64,
    pub key_bodies: u64,
    pub val_bodies: u64,
    /// Slab space not accounted to any category above.
    pub slack: u64,
}

impl Store {
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            current_version: self.versions.current(),
            max_page_id: self.pages.max_page_id(),
            page_space: self.pages.page_space(),
            committed_pages: self.committed_pages,
            large_values: self.values.tracked(),
            large_value_bytes: self.values.total_bytes(),
        }
    }

    /// Walks the current version from its root page, validating every arrow
    /// against the page it points into.
    pub fn scan(&mut self) -> Result<ScanReport> {
        let current = self.versions.current();
        let Some(root_page) = self.versions.root_of(current) else {
            eyre::bail!("nothing committed yet");
        };
        let mark = self.arena.mark();
        let mut seen: HashSet<PageId> = HashSet::new();
        seen.insert(root_page);
        let result = (|| {
            let (point, _) = self.load_page(root_page, None)?;
            let point =
                point.ok_or_else(|| eyre::eyre!("current root page {root_page} missing"))?;
            self.scan_depth(point, &mut seen)
        })();
        self.arena.truncate(mark);
        Ok(ScanReport {
            max_arrow_depth: result?,
            pages: seen.len(),
        })
    }

    fn scan_depth(&mut self, id: NodeId, seen: &mut HashSet<PageId>) -> Result<usize> {
        match self.arena.node(id) {
            Node::Leaf(_) => Ok(0),
            Node::Fork(f) => {
                let (left, right) = (f.left, f.right);
                let ld = self.scan_depth(left, seen)?;
                let rd = self.scan_depth(right, seen)?;
                Ok(ld.max(rd))
            }
            Node::Arrow(a) => {
                let (page_id, max, height) = (a.page_id, a.max.clone(), a.height);
                seen.insert(page_id);
                let (sub, _) = self.load_page(page_id, None)?;
                let sub = sub.ok_or_else(|| eyre::eyre!("page {page_id} missing during scan"))?;
                let (point, _) = self.walk_to_arrow_point(sub, &max, height)?;
                Ok(1 + self.scan_depth(point, seen)?)
            }
        }
    }

    /// Re-measures every parseable page and attributes its slab bytes to
    /// layout categories.
    pub fn space_scan(&mut self) -> Result<SpaceReport> {
        let max_page_id = self.pages.max_page_id();
        let mut report = SpaceReport::default();
        let mut body_bytes = (0u64, 0u64, 0u64, 0u64, 0u64);

        for page_id in 1..=max_page_id {
            let mark = self.arena.mark();
            let (point, _) = self.load_page(page_id, None)?;
            let Some(point) = point else {
                self.arena.truncate(mark);
                continue;
            };
            let mut reserve = max_page_id;
            let metrics = self.measure(point, &mut reserve)?;
            self.arena.truncate(mark);

            let node_count = metrics.key_count + metrics.page_count;
            let prefix_len = metrics.prefix.len() as u64;
            report.pages += 1;
            report.leaves += u64::from(metrics.key_count);
            report.arrows += u64::from(metrics.page_count);
            body_bytes.0 += u64::from(words_for_bits(node_count));
            body_bytes.1 += u64::from(words_for_bits(metrics.struct_bits));
            body_bytes.2 += prefix_len;
            body_bytes.3 +=
                u64::from(metrics.key_body) - u64::from(node_count) * prefix_len;
            body_bytes.4 += u64::from(metrics.val_body);
        }

        report.total_size = report.pages * PAGE_SIZE as u64;
        // Fixed per page: node count, prefix offset, key-header terminator.
        report.fixed_headers = report.pages * 12;
        report.key_headers = (report.leaves + report.arrows) * 4;
        report.arrow_headers =
            report.arrows * u64::from(ARROW_HEADER_FIXED + self.hash_len);
        report.value_headers = report.leaves * 4;
        (
            report.page_bits,
            report.struct_bits,
            report.prefixes,
            report.key_bodies,
            report.val_bodies,
        ) = body_bytes;
        report.slack = report.total_size
            - report.fixed_headers
            - report.key_headers
            - report.arrow_headers
            - report.value_headers
            - report.page_bits
            - report.struct_bits
            - report.prefixes
            - report.key_bodies
            - report.val_bodies;
        Ok(report)
    }
}
