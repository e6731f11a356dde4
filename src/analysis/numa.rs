/*!
 * NUMA-aware work partitioning
 *
 * Dimensions are split into contiguous ranges, one per memory node,
 * and each node gets its own worker pool pinned to that node's CPUs.
 * Machines without exposed topology degrade to a single pool with
 * identical behavior.
 */

use std::ops::Range;

use crossbeam_channel::unbounded;

/// One memory node and the CPUs local to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaNode {
    pub id: usize,
    pub cpus: Vec<usize>,
}

/// Detected node topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaTopology {
    nodes: Vec<NumaNode>,
}

impl NumaTopology {
    /// Probe the system. On Linux this reads
    /// `/sys/devices/system/node/node*/cpulist`; elsewhere (or when the
    /// probe fails) a single node covering every CPU is assumed.
    pub fn detect() -> Self {
        #[cfg(target_os = "linux")]
        {
            if let Some(topology) = Self::from_sysfs("/sys/devices/system/node") {
                return topology;
            }
        }
        Self::single_node()
    }

    /// The degenerate one-node topology
    pub fn single_node() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            nodes: vec![NumaNode {
                id: 0,
                cpus: (0..cpu_count).collect(),
            }],
        }
    }

    #[cfg(target_os = "linux")]
    fn from_sysfs(root: &str) -> Option<Self> {
        let mut nodes = Vec::new();
        let entries = std::fs::read_dir(root).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(id_str) = name.strip_prefix("node") else {
                continue;
            };
            let Ok(id) = id_str.parse::<usize>() else {
                continue;
            };
            let cpulist = std::fs::read_to_string(entry.path().join("cpulist")).ok()?;
            let cpus = parse_cpu_list(cpulist.trim());
            if !cpus.is_empty() {
                nodes.push(NumaNode { id, cpus });
            }
        }
        if nodes.is_empty() {
            return None;
        }
        nodes.sort_by_key(|n| n.id);
        Some(Self { nodes })
    }

    pub fn nodes(&self) -> &[NumaNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Split `[0, total)` into one contiguous range of size
    /// `ceil(total / nodes)` per node; trailing nodes may come up empty
    /// for small inputs.
    pub fn partition(&self, total: usize) -> Vec<Range<usize>> {
        let nodes = self.node_count();
        if total == 0 || nodes == 0 {
            return vec![0..0; nodes];
        }
        let per_node = total.div_ceil(nodes);
        (0..nodes)
            .map(|i| {
                let start = (i * per_node).min(total);
                let end = ((i + 1) * per_node).min(total);
                start..end
            })
            .collect()
    }
}

/// Parse a sysfs CPU list such as `"0-3,8,10-11"`
pub fn parse_cpu_list(list: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                cpus.extend(lo..=hi);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }
    cpus
}

/// Pin the calling thread to the node's CPUs. Best-effort; failures
/// are logged and ignored.
fn pin_to_node(node: &NumaNode) {
    #[cfg(target_os = "linux")]
    {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            for &cpu in &node.cpus {
                libc::CPU_SET(cpu, &mut set);
            }
            if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
                tracing::debug!("failed to pin thread to node {}", node.id);
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = node;
    }
}

/// Run `work` over every index in `[0, total)`, partitioned across the
/// topology's nodes with `max(1, parallelism / nodes)` pinned workers
/// per node. Results come back indexed.
pub fn run_partitioned<T, F>(
    total: usize,
    parallelism: usize,
    topology: &NumaTopology,
    work: F,
) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    if total == 0 {
        return Vec::new();
    }

    let node_count = topology.node_count().max(1);
    let workers_per_node = (parallelism.max(1) / node_count).max(1);
    let ranges = topology.partition(total);

    let (result_tx, result_rx) = unbounded::<(usize, T)>();

    std::thread::scope(|scope| {
        for (node, range) in topology.nodes().iter().zip(ranges) {
            if range.is_empty() {
                continue;
            }

            let (index_tx, index_rx) = unbounded::<usize>();
            for index in range {
                index_tx.send(index).expect("index queue send failed");
            }
            drop(index_tx);

            for _ in 0..workers_per_node {
                let index_rx = index_rx.clone();
                let result_tx = result_tx.clone();
                let work = &work;
                scope.spawn(move || {
                    pin_to_node(node);
                    while let Ok(index) = index_rx.recv() {
                        let output = work(index);
                        if result_tx.send((index, output)).is_err() {
                            return;
                        }
                    }
                });
            }
        }
        drop(result_tx);

        while let Ok((index, output)) = result_rx.recv() {
            results[index] = Some(output);
        }
    });

    results
        .into_iter()
        .map(|r| r.expect("partitioned work left an index unprocessed"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_topology() -> NumaTopology {
        NumaTopology {
            nodes: vec![
                NumaNode {
                    id: 0,
                    cpus: vec![0, 1],
                },
                NumaNode {
                    id: 1,
                    cpus: vec![2, 3],
                },
            ],
        }
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3"), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0-1,4,6-7"), vec![0, 1, 4, 6, 7]);
        assert_eq!(parse_cpu_list("5"), vec![5]);
        assert!(parse_cpu_list("").is_empty());
    }

    #[test]
    fn test_detect_always_yields_a_node() {
        let topology = NumaTopology::detect();
        assert!(topology.node_count() >= 1);
        assert!(!topology.nodes()[0].cpus.is_empty());
    }

    #[test]
    fn test_partition_contiguous_and_complete() {
        let topology = two_node_topology();

        // 10 dimensions over 2 nodes: 5 each
        assert_eq!(topology.partition(10), vec![0..5, 5..10]);
        // 7 over 2: ceil -> 4 and 3
        assert_eq!(topology.partition(7), vec![0..4, 4..7]);
        // 1 over 2: second node idles
        assert_eq!(topology.partition(1), vec![0..1, 1..1]);
        assert_eq!(topology.partition(0), vec![0..0, 0..0]);
    }

    #[test]
    fn test_single_node_partition() {
        let topology = NumaTopology::single_node();
        assert_eq!(topology.partition(42), vec![0..42]);
    }

    #[test]
    fn test_run_partitioned_covers_all_indices() {
        let topology = two_node_topology();
        let results = run_partitioned(100, 4, &topology, |i| i * i);
        assert_eq!(results.len(), 100);
        for (i, &value) in results.iter().enumerate() {
            assert_eq!(value, i * i);
        }
    }

    #[test]
    fn test_run_partitioned_single_node_equivalent() {
        let multi = run_partitioned(50, 4, &two_node_topology(), |i| i + 1);
        let single = run_partitioned(50, 4, &NumaTopology::single_node(), |i| i + 1);
        assert_eq!(multi, single);
    }

    #[test]
    fn test_run_partitioned_empty() {
        let results: Vec<usize> = run_partitioned(0, 4, &NumaTopology::single_node(), |i| i);
        assert!(results.is_empty());
    }
}
