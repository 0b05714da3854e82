use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use roomlet::catalog::InMemoryCatalog;
use roomlet::engine::{Engine, EngineError, EngineSettings};
use roomlet::model::{Actor, Room};
use roomlet::notify::NotifyHub;

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

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
}

fn night(offset: u64) -> NaiveDate {
    base_date() + Days::new(offset)
}

struct Bench {
    engine: Arc<Engine>,
    rooms: Vec<Ulid>,
}

fn setup(n_rooms: usize) -> Bench {
    let dir = std::env::temp_dir().join(format!("roomlet_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();

    let catalog = InMemoryCatalog::new();
    let owner = Ulid::new();
    let mut rooms = Vec::with_capacity(n_rooms);
    for _ in 0..n_rooms {
        let id = Ulid::new();
        catalog
            .upsert(Room {
                id,
                owner_id: owner,
                name: None,
                daily_rate: 100,
                min_nights: 1,
                max_nights: 30,
            })
            .unwrap();
        rooms.push(id);
    }
    let engine = Engine::new(
        dir.join("bookings.wal"),
        Arc::new(catalog),
        Arc::new(NotifyHub::new()),
        EngineSettings::default(),
    )
    .unwrap();
    Bench {
        engine: Arc::new(engine),
        rooms,
    }
}

async fn phase1_sequential() {
    let bench = setup(1);
    let room = bench.rooms[0];
    let customer = Actor::customer(Ulid::new());

    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        bench
            .engine
            .create_booking(&customer, room, night(i), night(i + 1), 100)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admission latency", &mut latencies);
}

/// Every task races for the same nights on one room; exactly one per slot may win.
async fn phase2_hot_room() {
    let bench = setup(1);
    let room = bench.rooms[0];
    let n_tasks = 64;
    let n_slots = 50u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = bench.engine.clone();
        handles.push(tokio::spawn(async move {
            let customer = Actor::customer(Ulid::new());
            let mut won = 0u64;
            let mut latencies = Vec::new();
            for slot in 0..n_slots {
                let t = Instant::now();
                match engine
                    .create_booking(&customer, room, night(slot * 3), night(slot * 3 + 2), 200)
                    .await
                {
                    Ok(_) => won += 1,
                    Err(EngineError::RoomUnavailable { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(t.elapsed());
            }
            (won, latencies)
        }));
    }

    let mut admitted = 0;
    let mut all_latencies = Vec::new();
    for h in handles {
        let (won, latencies) = h.await.unwrap();
        admitted += won;
        all_latencies.extend(latencies);
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_tasks} tasks x {n_slots} slots: {admitted} admitted (expected {n_slots}) in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(admitted, n_slots, "double booking detected");
    print_latency("contended admission latency", &mut all_latencies);
}

/// One task per room, no overlap anywhere: measures how well rooms stay independent.
async fn phase3_spread() {
    let n_rooms = 32;
    let per_room = 200u64;
    let bench = setup(n_rooms);

    let start = Instant::now();
    let mut handles = Vec::new();
    for &room in &bench.rooms {
        let engine = bench.engine.clone();
        handles.push(tokio::spawn(async move {
            let customer = Actor::customer(Ulid::new());
            for i in 0..per_room {
                engine
                    .create_booking(&customer, room, night(i), night(i + 1), 100)
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    let elapsed = start.elapsed();
    let total = n_rooms as u64 * per_room;
    println!(
        "  {total} bookings over {n_rooms} rooms in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
}

/// Calendar reads while writers keep the room busy.
async fn phase4_reads_under_load() {
    let bench = setup(1);
    let room = bench.rooms[0];

    let writer = {
        let engine = bench.engine.clone();
        tokio::spawn(async move {
            let customer = Actor::customer(Ulid::new());
            for i in 0..1000u64 {
                let _ = engine
                    .create_booking(&customer, room, night(i), night(i + 1), 100)
                    .await;
            }
        })
    };

    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        let _ = bench.engine.list_bookings_for_room(room).await;
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    print_latency("room listing latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== roomlet contention benchmark ===\n");

    println!("[phase 1] sequential admissions");
    phase1_sequential().await;

    println!("\n[phase 2] one hot room, overlapping requests");
    phase2_hot_room().await;

    println!("\n[phase 3] disjoint rooms in parallel");
    phase3_spread().await;

    println!("\n[phase 4] room listing under write load");
    phase4_reads_under_load().await;

    println!("\n=== benchmark complete ===");
}
