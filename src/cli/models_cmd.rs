// Copyright 2026 Diffusion Studio Contributors
// SPDX-License-Identifier: Apache-2.0

//! Models CLI subcommand: list resident pipelines on a running server.

use super::client::StudioClient;
use crate::models::CacheSnapshot;

/// Returns exit code: 0 on success, 3 on connection failure.
pub async fn run_list(addr: &str) -> i32 {
    let snapshot = match StudioClient::new(addr) {
        Ok(client) => client.resident().await,
        Err(e) => Err(e),
    };
    match snapshot {
        Ok(snapshot) => {
            print_resident(&snapshot);
            0
        }
        Err(e) => {
            eprintln!("Error connecting to diffusion-studio: {}", e);
            eprintln!("Is the server running? Check STUDIO_SERVER_ADDR.");
            3
        }
    }
}

pub fn print_resident(snapshot: &CacheSnapshot) {
    println!(
        "Device: {}  |  {}/{} resident",
        snapshot.device,
        snapshot.entries.len(),
        snapshot.capacity
    );
    if snapshot.entries.is_empty() {
        println!("No models currently resident.");
        return;
    }

    println!(
        "{:<40} {:>8} {:>12} {:>10} {:>8}",
        "MODEL", "HITS", "MEMORY (MB)", "AGE (s)", "IN USE"
    );
    println!("{}", "-".repeat(82));
    for m in &snapshot.entries {
        let memory = m
            .memory_bytes
            .map(|b| (b / (1024 * 1024)).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:>8} {:>12} {:>10} {:>8}",
            truncate(&m.model_id, 39),
            m.hits,
            memory,
            m.resident_secs,
            m.in_use,
        );
    }
    let s = &snapshot.stats;
    println!("{}", "-".repeat(82));
    println!(
        "hits {}  misses {}  loads {}  load failures {}  evictions {}",
        s.hits, s.misses, s.loads, s.load_failures, s.evictions
    );
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DeviceSpec;
    use crate::models::{CacheStatsSnapshot, ResidentModel};

    fn snapshot(entries: Vec<ResidentModel>) -> CacheSnapshot {
        CacheSnapshot {
            capacity: 2,
            device: DeviceSpec::cpu(),
            entries,
            stats: CacheStatsSnapshot::default(),
        }
    }

    #[test]
    fn test_print_resident_empty() {
        print_resident(&snapshot(vec![]));
    }

    #[test]
    fn test_print_resident_long_names() {
        print_resident(&snapshot(vec![ResidentModel {
            model_id: "a".repeat(80),
            device: DeviceSpec::cpu(),
            hits: 3,
            resident_secs: 12,
            memory_bytes: Some(2 * 1024 * 1024 * 1024),
            in_use: 1,
        }]));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello");
        assert_eq!(truncate("ééé", 2), "éé");
    }

    #[tokio::test]
    async fn test_run_list_connection_failure_returns_3() {
        assert_eq!(run_list("http://127.0.0.1:9").await, 3);
    }
}
