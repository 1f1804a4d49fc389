use std::hint::black_box;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use globalfifo_channel::{BoundedChannel, OpenOptions};
use globalfifo_perf::*;

const CAPACITY: usize = 4096;
const BATCHES: usize = 2_000;
const BATCH_SIZE: usize = 100;
const WARMUP: usize = 20;
const ECHO_SAMPLES: usize = 50_000;
const STREAM_BYTES: usize = 64 << 20;

fn main() {
    let ncpu = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(0);
    let mut results: Vec<BenchResult> = Vec::new();

    // ═══════════════════════════════════════════════════════════════════════
    // 1. Banner
    // ═══════════════════════════════════════════════════════════════════════
    let bar = "\u{2550}".repeat(90);
    println!("\n{bar}");
    println!("  GLOBALFIFO PERFORMANCE REPORT");
    println!("  capacity {}  |  {ncpu} cpus", format_bytes(CAPACITY as u64));
    println!("{bar}");

    // ═══════════════════════════════════════════════════════════════════════
    // 2. Same-thread transfers
    // ═══════════════════════════════════════════════════════════════════════
    section_header("SAME-THREAD WRITE + READ (non-blocking, uncontended lock)");
    print_table_header();
    for &len in &[1usize, 64, 512, 4096] {
        let chan = BoundedChannel::with_capacity(CAPACITY);
        let h = chan.open_with(OpenOptions::new().non_blocking(true));
        let payload = make_payload(len);
        let mut out = vec![0u8; len];

        let r = measure_batched(&format!("write_read/{len}"), BATCHES, BATCH_SIZE, WARMUP, || {
            h.write(black_box(&payload)).expect("write");
            black_box(h.read(&mut out).expect("read"));
        });
        print_result_row(&r);
        results.push(r);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // 3. Cross-thread round trip
    // ═══════════════════════════════════════════════════════════════════════
    section_header("CROSS-THREAD ECHO ROUND TRIP (blocking, two wakeups per op)");
    print_table_header();
    for &len in &[8usize, 256] {
        let echo = Echo::spawn(CAPACITY);
        let msg = make_payload(len);
        let mut scratch = vec![0u8; len];

        for _ in 0..1_000 {
            echo.round_trip(&msg, &mut scratch).expect("warmup round trip");
        }
        let mut samples = Vec::with_capacity(ECHO_SAMPLES);
        for _ in 0..ECHO_SAMPLES {
            let start = Instant::now();
            echo.round_trip(&msg, &mut scratch).expect("round trip");
            samples.push(start.elapsed().as_nanos() as u64);
        }

        let r = BenchResult {
            name: format!("echo/{len}"),
            unit: "ns".to_string(),
            stats: compute_stats(&mut samples),
        };
        print_result_row(&r);
        println!(
            "  {:<30} mean {}, stddev {}",
            "",
            format_ns(r.stats.mean),
            format_ns(r.stats.stddev)
        );
        results.push(r);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // 4. Streaming throughput
    // ═══════════════════════════════════════════════════════════════════════
    section_header("STREAMING THROUGHPUT (one producer, one consumer, blocking)");
    let throughput_mib_s = stream_throughput();
    println!(
        "  {} streamed at {:.1} MiB/s",
        format_bytes(STREAM_BYTES as u64),
        throughput_mib_s
    );

    // ═══════════════════════════════════════════════════════════════════════
    // 5. JSON Output
    // ═══════════════════════════════════════════════════════════════════════
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let output = serde_json::json!({
        "report_type": "channel",
        "timestamp": timestamp,
        "capacity": CAPACITY,
        "ncpu": ncpu,
        "benchmarks": results,
        "stream": {
            "bytes": STREAM_BYTES,
            "throughput_mib_s": throughput_mib_s,
        },
    });

    let json_path = format!("globalfifo_perf_{timestamp}.json");
    let json = match serde_json::to_string_pretty(&output) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("\n  [failed to serialize results: {e}]\n");
            return;
        }
    };
    match std::fs::write(&json_path, json) {
        Ok(()) => {
            println!("\n{bar}");
            println!("  Results saved to: {json_path}");
            println!("{bar}\n");
        }
        Err(e) => eprintln!("\n  [failed to save results: {e}]\n"),
    }
}

fn stream_throughput() -> f64 {
    let chan = BoundedChannel::with_capacity(CAPACITY);
    let writer = chan.open();
    let reader = chan.open();
    let chunk = make_payload(CAPACITY);

    let start = Instant::now();
    let producer = std::thread::spawn(move || {
        let mut sent = 0;
        while sent < STREAM_BYTES {
            let n = (STREAM_BYTES - sent).min(chunk.len());
            writer.write_all(&chunk[..n]).expect("stream write");
            sent += n;
        }
    });

    let mut buf = vec![0u8; CAPACITY];
    let mut received = 0;
    while received < STREAM_BYTES {
        received += reader.read(&mut buf).expect("stream read");
    }
    let _ = producer.join();

    let elapsed = start.elapsed().as_secs_f64();
    STREAM_BYTES as f64 / (1024.0 * 1024.0) / elapsed
}
