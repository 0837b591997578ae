//! StatsD push observer.
//!
//! Counters are aggregated between flushes; latency samples are buffered up
//! to a fixed bound and sent as timers. A flush packs lines into datagrams
//! that fit a typical MTU. Delivery is best-effort UDP: send failures are
//! counted and reported, never retried.

use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::StatsdConfig;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::event::MetricEvent;
use crate::observability::observer::{Observer, ObserverError};

/// Largest datagram sent; stays under a 1500-byte MTU with headroom.
const MAX_PACKET: usize = 1432;
/// Latency samples kept between flushes.
const MAX_PENDING_TIMINGS: usize = 10_000;

#[derive(Default)]
struct Pending {
    requests: BTreeMap<String, u64>,
    errors: BTreeMap<String, u64>,
    timings: Vec<(String, f64)>,
    dropped_timings: u64,
}

/// Observer that pushes aggregated call metrics to a StatsD daemon.
pub struct StatsdObserver {
    socket: UdpSocket,
    target: String,
    prefix: String,
    pending: Mutex<Pending>,
    packets: AtomicU64,
    send_errors: AtomicU64,
}

impl StatsdObserver {
    pub const NAME: &'static str = "statsd";

    /// Keys are prefixed with `config.prefix`, or `service` when that is empty.
    pub fn new(config: &StatsdConfig, service: &str) -> std::io::Result<Self> {
        let local = if config.host.contains(':') { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        let base = if config.prefix.is_empty() { service } else { config.prefix.as_str() };
        let prefix = if base.is_empty() || base.ends_with('.') {
            base.to_string()
        } else {
            format!("{base}.")
        };
        Ok(Self {
            socket,
            target: config.address(),
            prefix,
            pending: Mutex::new(Pending::default()),
            packets: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        })
    }

    /// Send everything aggregated since the last flush.
    pub fn flush(&self) {
        let pending = match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        if pending.dropped_timings > 0 {
            tracing::debug!(dropped = pending.dropped_timings, "StatsD timing buffer overflowed");
        }

        let mut lines = Vec::new();
        for (op, count) in &pending.requests {
            lines.push(format!("{}{}.requests:{}|c", self.prefix, op, count));
        }
        for (op, count) in &pending.errors {
            lines.push(format!("{}{}.errors:{}|c", self.prefix, op, count));
        }
        for (op, ms) in &pending.timings {
            lines.push(format!("{}{}.latency_ms:{:.3}|ms", self.prefix, op, ms));
        }

        for packet in pack_lines(&lines) {
            match self.socket.send_to(packet.as_bytes(), &self.target) {
                Ok(_) => {
                    self.packets.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.send_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(target_addr = %self.target, error = %e, "StatsD send failed");
                }
            }
        }
    }

    /// Flush on a fixed interval until `shutdown` fires.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let observer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let cancelled = shutdown.cancelled();
            tokio::pin!(cancelled);
            loop {
                tokio::select! {
                    _ = &mut cancelled => break,
                    _ = ticker.tick() => observer.flush(),
                }
            }
        })
    }
}

impl Observer for StatsdObserver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn accept(&self, event: &MetricEvent) {
        let key = metric_key(&event.operation);
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        *pending.requests.entry(key.clone()).or_default() += 1;
        if !event.outcome.is_success() {
            *pending.errors.entry(key.clone()).or_default() += 1;
        }
        if pending.timings.len() < MAX_PENDING_TIMINGS {
            pending.timings.push((key, event.duration.as_secs_f64() * 1000.0));
        } else {
            pending.dropped_timings += 1;
        }
    }

    fn report(&self) -> Result<Value, ObserverError> {
        Ok(serde_json::json!({
            "target": self.target,
            "packets_sent": self.packets.load(Ordering::Relaxed),
            "send_errors": self.send_errors.load(Ordering::Relaxed),
        }))
    }

    fn finish(&self) {
        self.flush();
    }
}

/// `/eyepi.EyePi/HelloProxy` → `eyepi.EyePi.HelloProxy`
fn metric_key(operation: &str) -> String {
    operation
        .trim_start_matches('/')
        .chars()
        .map(|c| match c {
            '/' => '.',
            ':' | '|' | '@' | ' ' => '_',
            c => c,
        })
        .collect()
}

/// Join lines with newlines into packets no larger than `MAX_PACKET`.
fn pack_lines(lines: &[String]) -> Vec<String> {
    let mut packets = Vec::new();
    let mut current = String::new();
    for line in lines {
        if !current.is_empty() && current.len() + 1 + line.len() > MAX_PACKET {
            packets.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        packets.push(current);
    }
    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Outcome;

    fn config_for(addr: std::net::SocketAddr) -> StatsdConfig {
        StatsdConfig {
            enabled: true,
            host: addr.ip().to_string(),
            port: addr.port(),
            prefix: "eyepi".to_string(),
            flush_interval_ms: 1000,
        }
    }

    #[test]
    fn test_metric_key() {
        assert_eq!(metric_key("/eyepi.EyePi/HelloProxy"), "eyepi.EyePi.HelloProxy");
        assert_eq!(metric_key("a:b|c"), "a_b_c");
    }

    #[test]
    fn test_pack_lines_respects_packet_size() {
        let lines: Vec<String> = (0..200).map(|i| format!("metric.{i}:1|c")).collect();
        let packets = pack_lines(&lines);
        assert!(packets.len() > 1);
        assert!(packets.iter().all(|p| p.len() <= MAX_PACKET));
        assert_eq!(packets.iter().map(|p| p.lines().count()).sum::<usize>(), 200);
    }

    #[test]
    fn test_flush_sends_aggregated_lines() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        sink.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let observer = StatsdObserver::new(&config_for(sink.local_addr().unwrap()), "ignored").unwrap();

        let op = "/eyepi.EyePi/HelloProxy";
        observer.accept(&MetricEvent::new(op, Duration::from_millis(2), Outcome::Success));
        observer.accept(&MetricEvent::new(op, Duration::from_millis(3), Outcome::Failure(3)));
        observer.finish();

        let mut buf = [0u8; 2048];
        let n = sink.recv(&mut buf).unwrap();
        let packet = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(packet.contains("eyepi.eyepi.EyePi.HelloProxy.requests:2|c"), "{packet}");
        assert!(packet.contains("eyepi.eyepi.EyePi.HelloProxy.errors:1|c"), "{packet}");
        assert_eq!(packet.matches("|ms").count(), 2);

        let report = observer.report().unwrap();
        assert_eq!(report["packets_sent"], 1);
    }

    #[test]
    fn test_prefix_falls_back_to_service_name() {
        let mut config = config_for("127.0.0.1:8125".parse().unwrap());
        config.prefix.clear();
        let observer = StatsdObserver::new(&config, "eyepi").unwrap();
        assert_eq!(observer.prefix, "eyepi.");
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        let observer = StatsdObserver::new(&config_for(sink.local_addr().unwrap()), "ignored").unwrap();
        observer.flush();
        assert_eq!(observer.report().unwrap()["packets_sent"], 0);
    }

    #[tokio::test]
    async fn test_flusher_pushes_on_every_interval_until_shutdown() {
        let sink = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let observer = Arc::new(StatsdObserver::new(&config_for(sink.local_addr().unwrap()), "ignored").unwrap());
        let shutdown = crate::lifecycle::Shutdown::new();
        let flusher = observer.spawn_flusher(Duration::from_millis(50), shutdown.subscribe());

        let op = "/eyepi.EyePi/HelloProxy";
        let mut buf = [0u8; 2048];
        for round in 1..=2u64 {
            observer.accept(&MetricEvent::new(op, Duration::from_millis(1), Outcome::Success));
            let n = tokio::time::timeout(Duration::from_secs(2), sink.recv(&mut buf))
                .await
                .expect("no flush within the interval")
                .unwrap();
            let packet = std::str::from_utf8(&buf[..n]).unwrap();
            assert!(packet.contains("HelloProxy.requests:1|c"), "round {round}: {packet}");
        }

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), flusher).await.unwrap().unwrap();
        assert_eq!(observer.report().unwrap()["packets_sent"], 2);
    }
}
