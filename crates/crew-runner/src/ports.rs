//! Host port blocks for environments.

use crate::{Result, RunnerError};
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Service, interactive shell, control and status ports.
pub const BLOCK_SIZE: u16 = 4;

type Probe = Box<dyn Fn(u16) -> bool + Send + Sync>;

pub fn bind_probe(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// Reserves disjoint, contiguous 4-port blocks inside `[base, max]`, one per environment name.
pub struct PortAllocator {
    base: u16,
    max: u16,
    probe: Probe,
    reserved: Mutex<BTreeMap<u16, String>>,
}

impl PortAllocator {
    pub fn new(base: u16, max: u16) -> Self {
        Self::with_probe(base, max, bind_probe)
    }

    pub fn with_probe(
        base: u16,
        max: u16,
        probe: impl Fn(u16) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            base,
            max,
            probe: Box::new(probe),
            reserved: Mutex::new(BTreeMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<u16, String>> {
        self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn base_of(table: &BTreeMap<u16, String>, name: &str) -> Option<u16> {
        table
            .iter()
            .find(|(_, owner)| owner.as_str() == name)
            .map(|(port, _)| *port)
    }

    /// Returns the block's first port. Idempotent per name.
    pub fn allocate(&self, name: &str) -> Result<u16> {
        let mut table = self.table();
        if let Some(port) = Self::base_of(&table, name) {
            return Ok(port);
        }

        let last = u32::from(self.max);
        let mut start = u32::from(self.base);
        while start + u32::from(BLOCK_SIZE) - 1 <= last {
            let block: Vec<u16> = (start..start + u32::from(BLOCK_SIZE))
                .map(|p| p as u16)
                .collect();
            let free = block.iter().all(|p| !table.contains_key(p))
                && block.iter().all(|p| (self.probe)(*p));
            if free {
                for p in &block {
                    table.insert(*p, name.to_string());
                }
                debug!(environment = name, base_port = block[0], "port block reserved");
                return Ok(block[0]);
            }
            start += u32::from(BLOCK_SIZE);
        }

        Err(RunnerError::PortExhaustion {
            base: self.base,
            max: self.max,
        })
    }

    pub fn release(&self, name: &str) {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, owner| owner.as_str() != name);
        if table.len() != before {
            debug!(environment = name, freed = before - table.len(), "port block released");
        }
    }

    pub fn port_of(&self, name: &str) -> Option<u16> {
        Self::base_of(&self.table(), name)
    }

    pub fn reserved(&self) -> BTreeMap<u16, String> {
        self.table().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    fn always_free(_: u16) -> bool {
        true
    }

    #[test]
    fn five_environments_get_disjoint_blocks() {
        let alloc = PortAllocator::with_probe(8080, 8180, always_free);
        let mut seen = BTreeSet::new();
        for i in 0..5 {
            let base = alloc.allocate(&format!("env-{}", i)).expect("allocate");
            for p in base..base + BLOCK_SIZE {
                assert!(seen.insert(p), "port {} handed out twice", p);
            }
        }
        assert_eq!(seen.len(), 20);
        assert_eq!(alloc.reserved().len(), 20);
    }

    #[test]
    fn allocate_is_idempotent_per_name() {
        let alloc = PortAllocator::with_probe(8080, 8180, always_free);
        let a = alloc.allocate("web").expect("first");
        let b = alloc.allocate("web").expect("second");
        assert_eq!(a, b);
        assert_eq!(alloc.reserved().len(), 4);
    }

    #[test]
    fn release_frees_exactly_the_owned_block() {
        let alloc = PortAllocator::with_probe(8080, 8180, always_free);
        let first = alloc.allocate("a").expect("a");
        let second = alloc.allocate("b").expect("b");
        alloc.release("a");
        let table = alloc.reserved();
        assert_eq!(table.len(), 4);
        assert!(table.values().all(|owner| owner == "b"));
        assert_eq!(alloc.port_of("a"), None);
        assert_eq!(alloc.port_of("b"), Some(second));

        let reused = alloc.allocate("c").expect("c");
        assert_eq!(reused, first);
    }

    #[test]
    fn strides_with_a_busy_port_are_skipped() {
        let alloc = PortAllocator::with_probe(8080, 8180, |p| p != 8082);
        assert_eq!(alloc.allocate("x").expect("x"), 8084);
    }

    #[test]
    fn exhaustion_is_reported() {
        let alloc = PortAllocator::with_probe(9000, 9007, always_free);
        alloc.allocate("a").expect("a");
        alloc.allocate("b").expect("b");
        let err = alloc.allocate("c").expect_err("range full");
        assert!(matches!(err, RunnerError::PortExhaustion { base: 9000, max: 9007 }));
    }

    #[test]
    fn partial_trailing_stride_is_not_used() {
        let alloc = PortAllocator::with_probe(9000, 9006, always_free);
        alloc.allocate("a").expect("a");
        assert!(alloc.allocate("b").is_err());
    }

    #[test]
    fn top_of_port_space_does_not_overflow() {
        let alloc = PortAllocator::with_probe(65530, 65535, always_free);
        assert_eq!(alloc.allocate("a").expect("a"), 65530);
        assert!(alloc.allocate("b").is_err());
    }

    #[test]
    fn concurrent_allocations_never_overlap() {
        let alloc = Arc::new(PortAllocator::with_probe(8080, 8180, always_free));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || alloc.allocate(&format!("t{}", i)).expect("allocate"))
            })
            .collect();
        let bases: BTreeSet<u16> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();
        assert_eq!(bases.len(), 8);
        assert_eq!(alloc.reserved().len(), 32);
    }

    #[test]
    fn live_probe_skips_a_port_held_by_another_socket() {
        let held = TcpListener::bind(("0.0.0.0", 0)).expect("ephemeral listener");
        let port = held.local_addr().expect("addr").port();
        assert!(!bind_probe(port));
        if port <= u16::MAX - 7 {
            let alloc = PortAllocator::new(port, port + 7);
            if let Ok(base) = alloc.allocate("probe") {
                assert_ne!(base, port);
            }
        }
    }
}
