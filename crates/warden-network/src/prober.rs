//! [`ReachabilityProber`] – "can we still reach the internet?"
//!
//! Pinging a public host directly says little about the local uplink, so
//! the prober first finds routers that several independent routes share
//! (hop discovery with `traceroute`) and pings those instead.  Discovered
//! targets are cached for a TTL (see [`TargetCache`]).
//!
//! Every call blocks on subprocesses; async callers go through
//! `spawn_blocking`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use warden_hal::CommandRunner;

use crate::cache::{CachedTargets, TargetCache};

/// Path of the hop discovery tool.
pub const TRACEROUTE: &str = "/usr/bin/traceroute";

/// Ping binary, looked up on `PATH`.
pub const PING: &str = "ping";

/// Public DNS hosts whose routes are compared during hop discovery.
pub const TARGETS: [&str; 7] = [
    "88.208.245.221",
    "198.199.103.49",
    "8.8.8.8",
    "8.8.4.4",
    "194.55.30.46",
    "87.250.250.242",
    "195.19.220.16",
];

/// A hop index together with the node seen there.
type Hop = (i64, String);

/// Anything that can answer a reachability question.  Blocking.
pub trait Probe: Send + Sync {
    fn check(&self) -> bool;
}

/// Traceroute + ping based [`Probe`].
pub struct ReachabilityProber {
    commands: Arc<dyn CommandRunner>,
    cache: TargetCache,
    probes: Vec<String>,
}

impl ReachabilityProber {
    pub fn new(commands: Arc<dyn CommandRunner>, cache: TargetCache) -> Self {
        Self {
            commands,
            cache,
            probes: TARGETS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Replace the list of hosts used for hop discovery.
    pub fn with_probes(mut self, probes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.probes = probes.into_iter().map(Into::into).collect();
        self
    }

    /// Trace every probe host and return the nodes common to at least two
    /// routes.
    pub fn discover(&self) -> Vec<String> {
        let routes: Vec<BTreeSet<Hop>> = self
            .probes
            .iter()
            .map(|dest| {
                let args = ["-I", "-n", "-q", "1", dest.as_str()];
                match self.commands.run(TRACEROUTE, &args) {
                    Ok(out) => parse_hops(&out.stdout, dest),
                    Err(e) => {
                        warn!(destination = %dest, error = %e, "traceroute failed");
                        BTreeSet::new()
                    }
                }
            })
            .collect();
        let nodes = common_nodes(&routes);
        debug!(?nodes, "hop discovery finished");
        nodes
    }

    /// Ping targets: a fresh cache if there is one, otherwise a new
    /// discovery (written back to the cache), otherwise stale cache content.
    pub fn targets(&self) -> Vec<String> {
        let now = Utc::now();
        let stale = match self.cache.load(now) {
            Ok(CachedTargets::Fresh(targets)) if !targets.is_empty() => return targets,
            Ok(cached) => cached.into_targets(),
            Err(e) => {
                debug!(path = %self.cache.path().display(), error = %e, "target cache unusable");
                Vec::new()
            }
        };

        let discovered = self.discover();
        if discovered.is_empty() {
            return stale;
        }
        if let Err(e) = self.cache.store(&discovered, now) {
            error!(path = %self.cache.path().display(), error = %e, "target cache not written");
        }
        discovered
    }

    /// Ping `targets` in order and return the first positive round-trip
    /// time in milliseconds.
    pub fn ping(&self, targets: &[String]) -> Option<f64> {
        targets.iter().find_map(|target| {
            let out = self.commands.run(PING, &["-c1", "-w2", target.as_str()]).ok()?;
            parse_ping_time(&out.stdout).filter(|ms| *ms > 0.0)
        })
    }
}

impl Probe for ReachabilityProber {
    fn check(&self) -> bool {
        if !self.commands.exists(TRACEROUTE) {
            error!(program = TRACEROUTE, "network check impossible: tool not installed");
            return false;
        }
        let targets = self.targets();
        if targets.is_empty() {
            warn!("network check: no targets");
            return false;
        }
        match self.ping(&targets) {
            Some(ms) => {
                info!(ping_ms = ms, "network reachable");
                true
            }
            None => {
                warn!(?targets, "no target answered");
                false
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output parsing
// ────────────────────────────────────────────────────────────────────────────

/// Extract `(index ± d, node)` pairs (`d` in `0..=4`) for every hop beyond
/// the second from `traceroute -n` output.  Lines naming the destination or
/// lacking a timing are ignored.
pub fn parse_hops(stdout: &str, destination: &str) -> BTreeSet<Hop> {
    let mut hops = BTreeSet::new();
    for line in stdout.lines() {
        if line.contains(destination) || !line.contains("ms") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(index), Some(node)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(index) = index.parse::<i64>() else {
            continue;
        };
        if index > 2 {
            for d in 0..=4 {
                hops.insert((index - d, node.to_string()));
                hops.insert((index + d, node.to_string()));
            }
        }
    }
    hops
}

/// Nodes that appear with the same `(index, node)` pair in at least two
/// routes, sorted and deduplicated.
pub fn common_nodes(routes: &[BTreeSet<Hop>]) -> Vec<String> {
    let mut tally: BTreeMap<&Hop, usize> = BTreeMap::new();
    for route in routes {
        for hop in route {
            *tally.entry(hop).or_default() += 1;
        }
    }
    let nodes: BTreeSet<&str> = tally
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|((_, node), _)| node.as_str())
        .collect();
    nodes.into_iter().map(str::to_string).collect()
}

/// Round-trip time from `ping` output (`... time=12.3 ms`).
pub fn parse_ping_time(stdout: &str) -> Option<f64> {
    stdout.lines().find_map(|line| {
        let (_, rest) = line.split_once("time=")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_hal::CommandOutput;
    use warden_hal::sim::SimCommandRunner;

    fn trace(dest: &str, hops: &[&str]) -> String {
        let mut out = format!("traceroute to {dest} ({dest}), 30 hops max, 60 byte packets\n");
        for (i, hop) in hops.iter().enumerate() {
            out.push_str(&format!("{:>2}  {hop}  {}.512 ms\n", i + 1, i + 3));
        }
        out.push_str(&format!("{:>2}  {dest}  20.1 ms\n", hops.len() + 1));
        out
    }

    const PING_OK: &str = "PING 10.0.0.9 (10.0.0.9) 56(84) bytes of data.\n\
        64 bytes from 10.0.0.9: icmp_seq=1 ttl=60 time=14.2 ms\n\n\
        --- 10.0.0.9 ping statistics ---\n";

    fn cache(dir: &tempfile::TempDir) -> TargetCache {
        TargetCache::new(dir.path().join("nodes.json"), Duration::from_secs(3600))
    }

    #[test]
    fn hops_skip_first_two_and_destination() {
        let out = trace("8.8.8.8", &["192.168.1.1", "10.0.0.1", "100.64.0.1"]);
        let hops = parse_hops(&out, "8.8.8.8");
        assert!(hops.iter().all(|(_, node)| node == "100.64.0.1"));
        assert!(hops.contains(&(3, "100.64.0.1".to_string())));
        assert!(hops.contains(&(-1, "100.64.0.1".to_string())));
        assert!(hops.contains(&(7, "100.64.0.1".to_string())));
        assert_eq!(hops.len(), 9);
    }

    #[test]
    fn hops_ignore_timeouts_and_garbage() {
        let out = " 3  * * *\n x  10.0.0.1  1 ms\n";
        assert!(parse_hops(out, "8.8.8.8").is_empty());
    }

    #[test]
    fn common_nodes_need_two_routes() {
        let a = parse_hops(&trace("1.1.1.1", &["gw", "isp", "core-a", "shared"]), "1.1.1.1");
        let b = parse_hops(&trace("2.2.2.2", &["gw", "isp", "shared", "core-b"]), "2.2.2.2");
        assert_eq!(common_nodes(&[a, b]), vec!["shared".to_string()]);
    }

    #[test]
    fn ping_time_is_parsed() {
        assert_eq!(parse_ping_time(PING_OK), Some(14.2));
        assert_eq!(parse_ping_time("100% packet loss"), None);
    }

    #[test]
    fn fresh_cache_skips_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache.store(&["10.0.0.9".to_string()], Utc::now()).unwrap();
        let runner = Arc::new(SimCommandRunner::new());
        let prober = ReachabilityProber::new(runner.clone(), cache);

        assert_eq!(prober.targets(), vec!["10.0.0.9".to_string()]);
        assert_eq!(runner.call_count(TRACEROUTE), 0);
    }

    #[test]
    fn discovery_result_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            SimCommandRunner::new()
                .with_stdout_for(TRACEROUTE, "1.1.1.1", &trace("1.1.1.1", &["gw", "isp", "core"]))
                .with_stdout_for(TRACEROUTE, "2.2.2.2", &trace("2.2.2.2", &["gw", "isp", "core"])),
        );
        let prober =
            ReachabilityProber::new(runner.clone(), cache(&dir)).with_probes(["1.1.1.1", "2.2.2.2"]);

        assert_eq!(prober.targets(), vec!["core".to_string()]);
        assert_eq!(runner.call_count(TRACEROUTE), 2);
        assert_eq!(
            cache(&dir).load(Utc::now()).unwrap(),
            CachedTargets::Fresh(vec!["core".to_string()])
        );
    }

    #[test]
    fn stale_cache_is_fallback_when_discovery_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let old = Utc::now() - chrono::TimeDelta::hours(2);
        cache(&dir).store(&["10.9.9.9".to_string()], old).unwrap();
        let runner = Arc::new(SimCommandRunner::new());
        let prober = ReachabilityProber::new(runner.clone(), cache(&dir)).with_probes(["1.1.1.1"]);

        assert_eq!(prober.targets(), vec!["10.9.9.9".to_string()]);
        assert_eq!(runner.call_count(TRACEROUTE), 1);
    }

    #[test]
    fn ping_stops_at_first_answer() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            SimCommandRunner::new()
                .with_output_for(PING, "10.0.0.1", CommandOutput::default())
                .with_stdout_for(PING, "10.0.0.9", PING_OK),
        );
        let prober = ReachabilityProber::new(runner.clone(), cache(&dir));
        let targets: Vec<String> = ["10.0.0.1", "10.0.0.9", "10.0.0.5"]
            .iter()
            .map(|t| t.to_string())
            .collect();

        assert_eq!(prober.ping(&targets), Some(14.2));
        assert_eq!(runner.call_count(PING), 2);
    }

    #[test]
    fn check_without_traceroute_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(SimCommandRunner::new().without_program(TRACEROUTE));
        let prober = ReachabilityProber::new(runner.clone(), cache(&dir));
        assert!(!prober.check());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn check_pings_cached_targets() {
        let dir = tempfile::tempdir().unwrap();
        cache(&dir).store(&["10.0.0.9".to_string()], Utc::now()).unwrap();
        let runner = Arc::new(SimCommandRunner::new().with_stdout_for(PING, "10.0.0.9", PING_OK));
        let prober = ReachabilityProber::new(runner, cache(&dir));
        assert!(prober.check());
    }
}
