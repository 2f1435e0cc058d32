//! Load test for the anti-xray engine.
//!
//! Spawns multiple fake host-bridge clients that:
//! - Connect one participant each
//! - Random-walk it through the world, sending a move per step
//! - Query its visibility after every step and track round trips and distances
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]
//!
//! Options:
//!   --clients N      Number of clients to spawn (default: 100)
//!   --duration S     Test duration in seconds (default: 30)
//!   --step-rate R    Moves per second per client (default: 10)
//!   --seed S         RNG seed for the random walks (default: 1)
//!   --url URL        Server URL (default: ws://127.0.0.1:9002/ws)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use antixray_shared::protocol::{ClientMsg, ServerMsg};
use antixray_shared::types::{ParticipantId, WorldId};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Walk area and eye height, matching the server's generated worlds
const WALK_HALF_EXTENT: f64 = 40.0;
const EYE_HEIGHT: f64 = 65.6;

// === Metrics ===

#[derive(Default)]
struct Metrics {
    connected: AtomicU64,
    moves_sent: AtomicU64,
    queries: AtomicU64,
    results: AtomicU64,
    errors: AtomicU64,
    /// Sum of reported distances, in thousandths of a block
    distance_sum_milli: AtomicU64,
    rtt_sum_us: AtomicU64,
    max_tick: AtomicU64,
}

// === Client task ===

async fn request(ws: &mut Ws, msg: &ClientMsg) -> Option<ServerMsg> {
    let json = serde_json::to_string(msg).ok()?;
    ws.send(Message::Text(json.into())).await.ok()?;
    recv(ws).await
}

async fn recv(ws: &mut Ws) -> Option<ServerMsg> {
    let next = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => return serde_json::from_str::<ServerMsg>(&text).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                _ => {}
            }
        }
        None
    });
    next.await.ok().flatten()
}

fn random_direction(rng: &mut ChaCha8Rng) -> [f64; 3] {
    let yaw = rng.gen_range(0.0..std::f64::consts::TAU);
    let pitch: f64 = rng.gen_range(-0.8..0.4);
    [
        yaw.cos() * pitch.cos(),
        pitch.sin(),
        yaw.sin() * pitch.cos(),
    ]
}

async fn run_client(
    client_id: u64,
    url: String,
    step_rate: f64,
    duration: Duration,
    seed: u64,
    metrics: Arc<Metrics>,
) {
    let mut ws = match connect_async(&url).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    if !matches!(recv(&mut ws).await, Some(ServerMsg::Welcome(_))) {
        if client_id < 3 {
            eprintln!("Client {} got no welcome", client_id);
        }
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(client_id));
    let id = ParticipantId(client_id + 1);
    let mut position = [
        rng.gen_range(-WALK_HALF_EXTENT..WALK_HALF_EXTENT),
        EYE_HEIGHT,
        rng.gen_range(-WALK_HALF_EXTENT..WALK_HALF_EXTENT),
    ];

    let connect = ClientMsg::Connect {
        id,
        world: WorldId(0),
        position,
        direction: random_direction(&mut rng),
        exempt: false,
    };
    if !matches!(request(&mut ws, &connect).await, Some(ServerMsg::Ack { .. })) {
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        return;
    }
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    let step_interval = Duration::from_secs_f64(1.0 / step_rate.max(0.01));
    let mut step_timer = tokio::time::interval(step_interval);
    step_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let test_end = Instant::now() + duration;

    while Instant::now() < test_end {
        step_timer.tick().await;

        position[0] = (position[0] + rng.gen_range(-1.0..1.0))
            .clamp(-WALK_HALF_EXTENT, WALK_HALF_EXTENT);
        position[2] = (position[2] + rng.gen_range(-1.0..1.0))
            .clamp(-WALK_HALF_EXTENT, WALK_HALF_EXTENT);
        let step = ClientMsg::Move {
            id,
            position,
            direction: random_direction(&mut rng),
        };
        match request(&mut ws, &step).await {
            Some(ServerMsg::Ack { .. }) => {
                metrics.moves_sent.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }

        let sent = Instant::now();
        metrics.queries.fetch_add(1, Ordering::Relaxed);
        match request(&mut ws, &ClientMsg::Query { id }).await {
            Some(ServerMsg::Visibility(vis)) => {
                metrics
                    .rtt_sum_us
                    .fetch_add(sent.elapsed().as_micros() as u64, Ordering::Relaxed);
                metrics.max_tick.fetch_max(vis.tick, Ordering::Relaxed);
                if let Some(ray) = vis.rays.first() {
                    metrics.results.fetch_add(1, Ordering::Relaxed);
                    metrics
                        .distance_sum_milli
                        .fetch_add((ray.distance * 1000.0) as u64, Ordering::Relaxed);
                }
            }
            _ => {
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    let _ = request(&mut ws, &ClientMsg::Disconnect { id }).await;
    let _ = ws.close(None).await;
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

fn print_stats(label: &str, metrics: &Metrics) {
    let queries = metrics.queries.load(Ordering::Relaxed);
    let results = metrics.results.load(Ordering::Relaxed);
    let avg_rtt_us = if queries > 0 {
        metrics.rtt_sum_us.load(Ordering::Relaxed) / queries
    } else {
        0
    };
    let avg_distance = if results > 0 {
        metrics.distance_sum_milli.load(Ordering::Relaxed) as f64 / results as f64 / 1000.0
    } else {
        0.0
    };
    println!(
        "[{}] connected={}, moves={}, queries={}, results={}, errors={}, tick={}, avg_rtt={}us, avg_distance={:.2}",
        label,
        metrics.connected.load(Ordering::Relaxed),
        metrics.moves_sent.load(Ordering::Relaxed),
        queries,
        results,
        metrics.errors.load(Ordering::Relaxed),
        metrics.max_tick.load(Ordering::Relaxed),
        avg_rtt_us,
        avg_distance
    );
}

// === Main ===

struct Options {
    clients: u64,
    duration: Duration,
    step_rate: f64,
    seed: u64,
    url: String,
}

impl Options {
    fn from_args(mut args: impl Iterator<Item = String>) -> Self {
        let mut options = Options {
            clients: 100,
            duration: Duration::from_secs(30),
            step_rate: 10.0,
            seed: 1,
            url: "ws://127.0.0.1:9002/ws".to_string(),
        };
        while let Some(flag) = args.next() {
            let value = args.next();
            let parsed = value.as_deref().map(str::parse::<f64>);
            match (flag.as_str(), parsed) {
                ("--clients", Some(Ok(n))) => options.clients = n as u64,
                ("--duration", Some(Ok(s))) => options.duration = Duration::from_secs_f64(s),
                ("--step-rate", Some(Ok(r))) => options.step_rate = r,
                ("--seed", Some(Ok(s))) => options.seed = s as u64,
                ("--url", Some(_)) => options.url = value.unwrap_or_default(),
                _ => eprintln!("Ignoring option {}", flag),
            }
        }
        options
    }
}

#[tokio::main]
async fn main() {
    let options = Options::from_args(std::env::args().skip(1));

    println!("=== Anti-Xray Engine Load Test ===");
    println!(
        "{} clients for {:?}, {} steps/s each, seed {}",
        options.clients, options.duration, options.step_rate, options.seed
    );
    println!("Server: {}", options.url);
    println!();

    let metrics = Arc::new(Metrics::default());
    let started = Instant::now();
    let clients: Vec<_> = (0..options.clients)
        .map(|client_id| {
            tokio::spawn(run_client(
                client_id,
                options.url.clone(),
                options.step_rate,
                options.duration,
                options.seed,
                Arc::clone(&metrics),
            ))
        })
        .collect();

    let reporter = {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            let mut every = tokio::time::interval(Duration::from_secs(5));
            every.tick().await;
            loop {
                every.tick().await;
                print_stats(&format!("{:3}s", started.elapsed().as_secs()), &metrics);
            }
        })
    };

    for client in clients {
        let _ = client.await;
    }
    reporter.abort();

    println!();
    println!("=== Final Results ===");
    print_stats("final", &metrics);

    let moves = metrics.moves_sent.load(Ordering::Relaxed) as f64;
    let secs = options.duration.as_secs_f64().max(1.0);
    println!("Moves/sec (total): {:.0}", moves / secs);
    let expected = options.clients as f64 * secs * options.step_rate;
    if expected > 0.0 {
        println!("Step delivery rate: {:.1}%", moves / expected * 100.0);
    }
}
