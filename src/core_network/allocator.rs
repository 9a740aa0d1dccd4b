//! Rotating allocators for configured passive/active bind addresses and
//! port ranges. One instance of each is owned by the server context and
//! shared across every session's negotiation call, so the cursors live
//! behind mutexes. Exhaustion is the caller's concern: remember the first
//! value handed out and give up when it comes back around.

use std::sync::Mutex;

use serde::Deserialize;

/// An inclusive port range from the configuration file.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

#[derive(Debug, Default)]
struct AddrCursor {
    addresses: Vec<String>,
    index: usize,
}

/// Round-robin cursor over the configured candidate addresses.
#[derive(Debug, Default)]
pub struct AddrAllocator {
    inner: Mutex<AddrCursor>,
}

impl AddrAllocator {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            inner: Mutex::new(AddrCursor {
                addresses,
                index: 0,
            }),
        }
    }

    /// Next candidate address, or `None` when no pool is configured.
    /// Always advances past the returned value.
    pub fn next_addr(&self) -> Option<String> {
        let mut cur = self.inner.lock().unwrap();
        if cur.addresses.is_empty() {
            return None;
        }
        if cur.index >= cur.addresses.len() {
            cur.index = 0;
        }
        let addr = cur.addresses[cur.index].clone();
        cur.index += 1;
        Some(addr)
    }
}

#[derive(Debug, Default)]
struct PortCursor {
    ranges: Vec<PortRange>,
    range_index: usize,
    next_port: u16,
}

/// Round-robin cursor over the configured port ranges. Returns port 0
/// (kernel-assigned ephemeral) when no ranges are configured.
#[derive(Debug, Default)]
pub struct PortAllocator {
    inner: Mutex<PortCursor>,
}

impl PortAllocator {
    pub fn new(ranges: Vec<PortRange>) -> Self {
        Self {
            inner: Mutex::new(PortCursor {
                ranges,
                range_index: 0,
                next_port: 0,
            }),
        }
    }

    pub fn next_port(&self) -> u16 {
        let mut cur = self.inner.lock().unwrap();
        if cur.ranges.is_empty() {
            return 0;
        }
        if cur.next_port == 0 {
            cur.next_port = cur.ranges[0].from;
        }
        loop {
            let range = cur.ranges[cur.range_index];
            if cur.next_port >= range.from && cur.next_port <= range.to {
                let port = cur.next_port;
                if cur.next_port == range.to {
                    // move to the next range, wrapping around
                    cur.range_index = (cur.range_index + 1) % cur.ranges.len();
                    cur.next_port = cur.ranges[cur.range_index].from;
                } else {
                    cur.next_port += 1;
                }
                return port;
            }
            cur.range_index = (cur.range_index + 1) % cur.ranges.len();
            cur.next_port = cur.ranges[cur.range_index].from;
        }
    }
}
