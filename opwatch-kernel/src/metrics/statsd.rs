//! StatsD sink: hierarchical `cluster.group.host.<metric>` gauges sent as UDP
//! line-protocol datagrams. UDP is fire-and-forget by design here; a send
//! failure is logged at debug level and the sweep carries on.

use crate::metrics::MetricSink;
use crate::models::NodeStatus;
use std::io;
use std::net::UdpSocket;
use tracing::debug;

pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    pub fn new(host: &str, port: u16, prefix: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect((host, port))?;
        Ok(Self {
            socket,
            prefix: prefix.to_string(),
        })
    }

    fn gauge(&self, path: &str, value: u64) {
        let line = if self.prefix.is_empty() {
            format!("{path}:{value}|g")
        } else {
            format!("{}.{path}:{value}|g", self.prefix)
        };
        if let Err(e) = self.socket.send(line.as_bytes()) {
            debug!("statsd send failed for {path}: {e}");
        }
    }
}

impl MetricSink for StatsdSink {
    fn send(&self, cluster: &str, group: &str, host: &str, status: &NodeStatus) {
        let node = format!("{cluster}.{group}.{host}");

        let gauges = [
            ("scripts.count", status.scripts.len() as u64),
            ("memory.free", status.memory.free),
            ("memory.used", status.memory.used),
            ("memory.wasted", status.memory.wasted),
            ("keys.free", status.keys.free),
            ("keys.usedKeys", status.keys.used_keys),
            ("keys.usedScripts", status.keys.used_scripts),
            ("keyHits.misses", status.key_hits.misses),
        ];
        for (name, value) in gauges {
            self.gauge(&format!("{node}.{name}"), value);
        }

        if let Some(apcu) = status.apcu.as_ref().filter(|a| a.enabled) {
            if let Some(sma) = &apcu.sma_info {
                self.gauge(&format!("{node}.apcu.memory.free"), sma.avail_mem);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApcuSmaInfo, ApcuStatus, ScriptStatus};
    use std::collections::HashSet;
    use std::time::Duration;

    fn sample_status() -> NodeStatus {
        let mut status = NodeStatus::default();
        status
            .scripts
            .insert("/var/www/index.php".into(), ScriptStatus::default());
        status
            .scripts
            .insert("/var/www/api.php".into(), ScriptStatus::default());
        status.memory.free = 1000;
        status.memory.used = 2000;
        status.memory.wasted = 30;
        status.keys.free = 283;
        status.keys.used_keys = 700;
        status.keys.used_scripts = 650;
        status.key_hits.misses = 7;
        status
    }

    fn receive_lines(socket: &UdpSocket, expected: usize) -> HashSet<String> {
        let mut lines = HashSet::new();
        let mut buf = [0u8; 512];
        while lines.len() < expected {
            let (n, _) = socket.recv_from(&mut buf).expect("datagram within timeout");
            lines.insert(String::from_utf8_lossy(&buf[..n]).into_owned());
        }
        lines
    }

    #[test]
    fn emits_one_gauge_per_exported_field() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sink = StatsdSink::new("127.0.0.1", port, "opcache").unwrap();
        sink.send("prod", "web", "h1", &sample_status());

        let lines = receive_lines(&receiver, 8);
        assert!(lines.contains("opcache.prod.web.h1.scripts.count:2|g"));
        assert!(lines.contains("opcache.prod.web.h1.memory.free:1000|g"));
        assert!(lines.contains("opcache.prod.web.h1.memory.used:2000|g"));
        assert!(lines.contains("opcache.prod.web.h1.memory.wasted:30|g"));
        assert!(lines.contains("opcache.prod.web.h1.keys.free:283|g"));
        assert!(lines.contains("opcache.prod.web.h1.keys.usedKeys:700|g"));
        assert!(lines.contains("opcache.prod.web.h1.keys.usedScripts:650|g"));
        assert!(lines.contains("opcache.prod.web.h1.keyHits.misses:7|g"));
    }

    #[test]
    fn empty_prefix_starts_at_the_cluster() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sink = StatsdSink::new("127.0.0.1", port, "").unwrap();
        sink.send("prod", "web", "h1", &sample_status());

        let lines = receive_lines(&receiver, 8);
        assert!(lines.contains("prod.web.h1.keyHits.misses:7|g"));
    }

    #[test]
    fn enabled_apcu_adds_the_free_memory_gauge() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut status = sample_status();
        status.apcu = Some(ApcuStatus {
            enabled: true,
            sma_info: Some(ApcuSmaInfo {
                num_seg: 1,
                seg_size: 33_554_432,
                avail_mem: 12_345_678,
            }),
            settings: None,
        });

        let sink = StatsdSink::new("127.0.0.1", port, "").unwrap();
        sink.send("prod", "web", "h1", &status);

        let lines = receive_lines(&receiver, 9);
        assert!(lines.contains("prod.web.h1.apcu.memory.free:12345678|g"));
    }
}
