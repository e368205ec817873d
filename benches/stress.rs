use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use slotbook::auth::Principal;
use slotbook::booking::validate::format_instant;
use slotbook::booking::{BookingInput, BookingService};
use slotbook::model::{BookingFilter, Ms, Organization, now_ms};
use slotbook::store::{NewOrganization, Store};

const HOUR: Ms = 3_600_000;

fn bench_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_bench");
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn input(cid: usize, callsign: &str, start: Ms, end: Ms) -> BookingInput {
    BookingInput {
        cid: Some((1_000_000 + cid).to_string()),
        callsign: Some(callsign.to_string()),
        start: Some(format_instant(start)),
        end: Some(format_instant(end)),
        division: Some("EUD".into()),
        ..Default::default()
    }
}

async fn setup(name: &str, orgs: usize) -> (Arc<BookingService>, Vec<Organization>) {
    let store = Arc::new(Store::open(bench_wal_path(name)).expect("open store"));
    let mut created = Vec::with_capacity(orgs);
    for i in 0..orgs {
        let org = store
            .create_organization(
                NewOrganization {
                    name: format!("FIR {i}"),
                    division: "EUD".into(),
                    subdivision: None,
                    portal_enabled: true,
                },
                now_ms(),
            )
            .await
            .expect("create organization");
        created.push(org);
    }
    (Arc::new(BookingService::new(store)), created)
}

async fn phase1_sequential() {
    let (svc, orgs) = setup("phase1.wal", 1).await;
    let principal = Principal::Organization(orgs[0].clone());
    let base = now_ms() + HOUR;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let s = base + (i as Ms) * HOUR;
        let t = Instant::now();
        svc.create(&principal, input(i, "EDDF_TWR", s, s + HOUR), now_ms())
            .await
            .expect("sequential create");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many organizations race for the same slots on one callsign. Exactly one
/// create per slot may win.
async fn phase2_contention() {
    let n_tasks = 20;
    let n_slots = 100;
    let (svc, orgs) = setup("phase2.wal", n_tasks).await;
    let base = now_ms() + HOUR;

    let start = Instant::now();
    let tasks = orgs.into_iter().enumerate().map(|(i, org)| {
        let svc = svc.clone();
        tokio::spawn(async move {
            let principal = Principal::Organization(org);
            let mut won = 0usize;
            for slot in 0..n_slots {
                let s = base + (slot as Ms) * HOUR;
                if svc
                    .create(&principal, input(i, "EGLL_APP", s, s + HOUR), now_ms())
                    .await
                    .is_ok()
                {
                    won += 1;
                }
            }
            won
        })
    });
    let won: usize = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .sum();

    let elapsed = start.elapsed();
    let attempts = n_tasks * n_slots;
    println!(
        "  {n_tasks} tasks x {n_slots} slots = {attempts} attempts in {:.2}s, {won} accepted",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots, "every slot must be booked exactly once");
}

async fn phase3_read_under_load() {
    let (svc, orgs) = setup("phase3.wal", 1).await;
    let principal = Principal::Organization(orgs[0].clone());
    let base = now_ms() + HOUR;
    for i in 0..500 {
        let s = base + (i as Ms) * HOUR;
        svc.create(&principal, input(i, "LFPG_DEP", s, s + HOUR), now_ms())
            .await
            .expect("seed create");
    }

    let writer = {
        let svc = svc.clone();
        let principal = principal.clone();
        tokio::spawn(async move {
            for i in 0..1000 {
                let s = base + (i as Ms) * HOUR;
                let _ = svc
                    .create(&principal, input(i, "LFPG_GND", s, s + HOUR), now_ms())
                    .await;
            }
        })
    };

    let filter = BookingFilter {
        callsign: Some("LFPG".into()),
        ..Default::default()
    };
    let mut latencies = Vec::with_capacity(200);
    for _ in 0..200 {
        let t = Instant::now();
        let listed = svc.list(&filter, now_ms());
        latencies.push(t.elapsed());
        assert!(listed.len() >= 500);
        tokio::task::yield_now().await;
    }
    writer.await.expect("writer panicked");
    print_latency("list latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== slotbook stress benchmark ===");

    println!("\n[phase 1] sequential create throughput");
    phase1_sequential().await;

    println!("\n[phase 2] contended creates on one callsign");
    phase2_contention().await;

    println!("\n[phase 3] list latency under write load");
    phase3_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
