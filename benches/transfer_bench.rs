//! Transfer Benchmark Suite
//!
//! Times the platform operations a Fletcher runtime issues per batch:
//! - host to device and device to host copies at several sizes
//! - prepare vs cache staging on shared and disjoint devices
//! - malloc/free churn on the device heap
//!
//! Run with: `cargo bench --bench transfer_bench`
//! Runs on the software device; no card required.

use std::hint::black_box;
use std::time::{Duration, Instant};

use fletcher_alveo::{AddressSpace, PlatformConfig, Session, SimDevice};

const SIM_MEMORY: usize = 256 << 20;

struct BenchResult {
    name: String,
    iterations: usize,
    total: Duration,
    bytes_per_iter: usize,
}

impl BenchResult {
    fn report(&self) {
        let per_iter = self.total / self.iterations as u32;
        let secs = self.total.as_secs_f64();
        if self.bytes_per_iter > 0 && secs > 0.0 {
            let gib = (self.bytes_per_iter * self.iterations) as f64 / (1u64 << 30) as f64;
            println!(
                "  {:<40} {:>10.2?}/iter  {:>8.2} GiB/s",
                self.name,
                per_iter,
                gib / secs
            );
        } else {
            println!("  {:<40} {:>10.2?}/iter", self.name, per_iter);
        }
    }
}

fn bench<F: FnMut()>(name: &str, iterations: usize, bytes_per_iter: usize, mut f: F) -> BenchResult {
    // Warmup
    for _ in 0..iterations.min(3) {
        f();
    }
    let start = Instant::now();
    for _ in 0..iterations {
        f();
    }
    BenchResult {
        name: name.to_string(),
        iterations,
        total: start.elapsed(),
        bytes_per_iter,
    }
}

fn open(address_space: AddressSpace) -> Session<SimDevice> {
    let config = PlatformConfig::default()
        .with_address_space(address_space)
        .with_sim_memory_bytes(SIM_MEMORY);
    match Session::init(config) {
        Ok(session) => session,
        Err(e) => panic!("cannot open sim device: {}", e),
    }
}

fn bench_copies() {
    println!("\n[copy_host_to_device / copy_device_to_host]");
    for space in [AddressSpace::Disjoint, AddressSpace::Shared] {
        let mut session = open(space);
        for size in [4 << 10, 256 << 10, 16 << 20] {
            let host = vec![0x5Au8; size];
            let mut back = vec![0u8; size];
            let addr = session.device_malloc(size).unwrap();
            let iterations = if size > (1 << 20) { 20 } else { 500 };

            bench(&format!("h2d {:?} {} KiB", space, size >> 10), iterations, size, || {
                session.copy_host_to_device(black_box(&host), addr).unwrap();
            })
            .report();
            bench(&format!("d2h {:?} {} KiB", space, size >> 10), iterations, size, || {
                session.copy_device_to_host(addr, black_box(&mut back)).unwrap();
            })
            .report();

            session.device_free(addr).unwrap();
        }
    }
}

fn bench_staging() {
    println!("\n[prepare_host_buffer / cache_host_buffer]");
    let host = vec![1u8; 1 << 20];
    for space in [AddressSpace::Disjoint, AddressSpace::Shared] {
        let mut session = open(space);
        bench(&format!("prepare {:?} 1 MiB", space), 200, host.len(), || {
            let prepared = session.prepare_host_buffer(black_box(&host)).unwrap();
            if prepared.allocated {
                session.device_free(prepared.address).unwrap();
            }
        })
        .report();
        bench(&format!("cache {:?} 1 MiB", space), 200, host.len(), || {
            let addr = session.cache_host_buffer(black_box(&host)).unwrap();
            session.device_free(addr).unwrap();
        })
        .report();
    }
}

fn bench_alloc_churn() {
    println!("\n[device_malloc / device_free]");
    let mut session = open(AddressSpace::Disjoint);
    let sizes = [64usize, 4096, 100_000, 1 << 20];
    bench("malloc+free mixed sizes", 2000, 0, || {
        let addrs: Vec<_> = sizes
            .iter()
            .map(|&s| session.device_malloc(black_box(s)).unwrap())
            .collect();
        for addr in addrs.into_iter().rev() {
            session.device_free(addr).unwrap();
        }
    })
    .report();
}

fn main() {
    println!("Fletcher Alveo transfer benchmarks (software device)");
    bench_copies();
    bench_staging();
    bench_alloc_churn();
}
