use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const T0: i64 = 1_800_000_000_000;
const HOUR: i64 = 3_600_000;

async fn connect(host: &str, port: u16, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("roomhold")
        .user(user)
        .password("roomhold");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// Values of column `col` across the rows returned by `sql`.
async fn column(client: &tokio_postgres::Client, sql: &str, col: &str) -> Vec<String> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get(col).map(str::to_string),
            _ => None,
        })
        .collect()
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
        println!("  {label}: no samples");
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

/// A fresh room with `n` back-to-back one-hour slots, created in one bulk insert.
async fn room_with_slots(client: &tokio_postgres::Client, n: usize) -> (String, Vec<String>) {
    let room = column(
        client,
        &format!("INSERT INTO rooms (name) VALUES ('bench-{}')", Ulid::new()),
        "id",
    )
    .await;
    let room_id = room[0].clone();

    let values: Vec<String> = (0..n)
        .map(|i| {
            let s = T0 + (i as i64) * HOUR;
            format!("('{room_id}', {s}, {})", s + HOUR)
        })
        .collect();
    let slots = column(
        client,
        &format!(
            r#"INSERT INTO time_slots (room_id, start, "end") VALUES {}"#,
            values.join(", ")
        ),
        "id",
    )
    .await;
    (room_id, slots)
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, "bench-seq").await;
    let (_, slots) = room_with_slots(&client, 1000).await;

    let mut latencies = Vec::with_capacity(slots.len());
    let start = Instant::now();
    for slot in &slots {
        let t = Instant::now();
        let ids = column(
            &client,
            &format!("INSERT INTO reservations (time_slot_id) VALUES ('{slot}')"),
            "id",
        )
        .await;
        client
            .batch_execute(&format!(
                "UPDATE reservations SET status = 'CONFIRMED' WHERE id = '{}'",
                ids[0]
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = slots.len() as f64 / elapsed.as_secs_f64();
    println!(
        "  {} reserve+confirm in {:.2}s = {ops:.0} ops/sec",
        slots.len(),
        elapsed.as_secs_f64()
    );
    print_latency("reserve+confirm latency", &mut latencies);
}

async fn phase2_contention(host: &str, port: u16) {
    let n_users = 50;
    let setup = connect(host, port, "bench-setup").await;
    let (_, slots) = room_with_slots(&setup, 20).await;
    let slots = Arc::new(slots);

    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for u in 0..n_users {
        let host = host.to_string();
        let slots = slots.clone();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("user{u}")).await;
            for slot in slots.iter() {
                let sql = format!("INSERT INTO reservations (time_slot_id) VALUES ('{slot}')");
                match client.batch_execute(&sql).await {
                    Ok(()) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(_) => conflicts.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let wins = wins.load(Ordering::Relaxed);
    println!(
        "  {n_users} users x {} slots in {:.2}s: {wins} holds, {} conflicts",
        slots.len(),
        elapsed.as_secs_f64(),
        conflicts.load(Ordering::Relaxed)
    );
    assert_eq!(wins, slots.len(), "exactly one hold per slot");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let setup = connect(host, port, "bench-setup").await;
    let (room_id, _) = room_with_slots(&setup, 200).await;
    drop(setup);

    // Writers keep adding rooms and holds in the background.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("writer{w}")).await;
            while !stop.load(Ordering::Relaxed) {
                let (_, slots) = room_with_slots(&client, 10).await;
                for slot in slots {
                    let _ = client
                        .batch_execute(&format!(
                            "INSERT INTO reservations (time_slot_id) VALUES ('{slot}')"
                        ))
                        .await;
                }
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let room_id = room_id.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("reader{r}")).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM available_slots WHERE room_id = '{room_id}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("available_slots query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("storm{c}")).await;
            let (_, slots) = room_with_slots(&client, ops_per_conn).await;
            for slot in slots {
                client
                    .batch_execute(&format!(
                        "INSERT INTO reservations (time_slot_id) VALUES ('{slot}')"
                    ))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} holds each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMHOLD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMHOLD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROOMHOLD_PORT");

    println!("=== roomhold stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential reserve + confirm");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] many users racing for the same slots");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
