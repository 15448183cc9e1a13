//! Deadlock detection over a waits-for graph
//!
//! The thread dump is turned into a directed graph with an edge from
//! thread T to thread U whenever T is blocked acquiring a lock U
//! currently owns. Cycle detection runs an iterative depth-first
//! search with the usual three-way coloring (unvisited, in-progress,
//! done); a back-edge into an in-progress node marks every node on the
//! search path from there upward as deadlocked.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::probe::ThreadInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Ids of every thread participating in any waits-for cycle, in
/// ascending order. Empty when no deadlock exists.
pub fn find_deadlocked(threads: &[ThreadInfo]) -> Vec<u64> {
    // lock identity -> owning thread(s)
    let mut owners: HashMap<u64, Vec<u64>> = HashMap::new();
    for thread in threads {
        for &lock in &thread.locks_held {
            owners.entry(lock).or_default().push(thread.id);
        }
    }

    // waits-for adjacency, keyed deterministically
    let mut graph: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for thread in threads {
        let successors = thread
            .waiting_on
            .and_then(|lock| owners.get(&lock))
            .cloned()
            .unwrap_or_default();
        graph.insert(thread.id, successors);
    }

    let mut color: HashMap<u64, Color> = graph.keys().map(|&id| (id, Color::White)).collect();
    let mut deadlocked: BTreeSet<u64> = BTreeSet::new();

    for &start in graph.keys() {
        if color[&start] != Color::White {
            continue;
        }
        color.insert(start, Color::Gray);
        // (node, index of the next successor to explore)
        let mut stack: Vec<(u64, usize)> = vec![(start, 0)];

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let next_index = frame.1;
            let successors = &graph[&node];

            if next_index < successors.len() {
                frame.1 += 1;
                let next = successors[next_index];
                match color.get(&next).copied() {
                    Some(Color::White) => {
                        color.insert(next, Color::Gray);
                        stack.push((next, 0));
                    }
                    Some(Color::Gray) => {
                        // Back edge: the path from `next` to the top
                        // of the stack is a cycle.
                        if let Some(pos) = stack.iter().position(|&(n, _)| n == next) {
                            for &(member, _) in &stack[pos..] {
                                deadlocked.insert(member);
                            }
                        }
                    }
                    // Done, or an edge to a thread absent from the dump
                    _ => {}
                }
            } else {
                color.insert(node, Color::Black);
                stack.pop();
            }
        }
    }

    deadlocked.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ThreadState;

    fn thread(id: u64, waiting_on: Option<u64>, locks_held: Vec<u64>) -> ThreadInfo {
        ThreadInfo {
            id,
            name: format!("thread-{}", id),
            state: ThreadState::Blocked,
            stack_trace: vec![],
            waiting_on,
            locks_held,
        }
    }

    #[test]
    fn test_two_cycle() {
        // t1 holds lock 100 and waits for lock 200; t2 the reverse
        let threads = vec![
            thread(1, Some(200), vec![100]),
            thread(2, Some(100), vec![200]),
        ];
        assert_eq!(find_deadlocked(&threads), vec![1, 2]);
    }

    #[test]
    fn test_acyclic_chain() {
        // t1 waits on t2, t2 waits on t3, t3 runs free
        let threads = vec![
            thread(1, Some(20), vec![10]),
            thread(2, Some(30), vec![20]),
            thread(3, None, vec![30]),
        ];
        assert!(find_deadlocked(&threads).is_empty());
    }

    #[test]
    fn test_no_lock_info() {
        let threads = vec![thread(1, None, vec![]), thread(2, None, vec![])];
        assert!(find_deadlocked(&threads).is_empty());
    }

    #[test]
    fn test_three_cycle_with_bystander() {
        // 1 -> 2 -> 3 -> 1 cycle; 4 waits into the cycle but is not
        // part of it
        let threads = vec![
            thread(1, Some(20), vec![10]),
            thread(2, Some(30), vec![20]),
            thread(3, Some(10), vec![30]),
            thread(4, Some(10), vec![]),
        ];
        assert_eq!(find_deadlocked(&threads), vec![1, 2, 3]);
    }

    #[test]
    fn test_self_deadlock() {
        // a thread blocked on a lock it already owns
        let threads = vec![thread(7, Some(70), vec![70])];
        assert_eq!(find_deadlocked(&threads), vec![7]);
    }

    #[test]
    fn test_two_independent_cycles() {
        let threads = vec![
            thread(1, Some(20), vec![10]),
            thread(2, Some(10), vec![20]),
            thread(8, Some(90), vec![80]),
            thread(9, Some(80), vec![90]),
        ];
        assert_eq!(find_deadlocked(&threads), vec![1, 2, 8, 9]);
    }

    #[test]
    fn test_waiting_on_unowned_lock() {
        // lock 999 has no owner in the dump
        let threads = vec![thread(1, Some(999), vec![])];
        assert!(find_deadlocked(&threads).is_empty());
    }
}
