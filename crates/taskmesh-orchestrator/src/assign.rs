/// Round-robin partition of `subtasks` across `agent_count` agents.
///
/// Agent `i` receives the subtasks at indices congruent to `i` modulo
/// `agent_count`, in original order. Agents beyond the number of subtasks get
/// an empty list. Zero agents yields an empty mapping.
pub fn assign(subtasks: &[String], agent_count: usize) -> Vec<Vec<String>> {
    let mut lists = vec![Vec::new(); agent_count];
    if agent_count == 0 {
        return lists;
    }
    for (idx, subtask) in subtasks.iter().enumerate() {
        lists[idx % agent_count].push(subtask.clone());
    }
    lists
}

/// `agent_1 .. agent_N` in declared order.
pub fn agent_names(agent_count: usize) -> Vec<String> {
    (1..=agent_count).map(|i| format!("agent_{i}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{i}")).collect()
    }

    #[test]
    fn test_partition_is_complete_and_congruent() {
        for agents in 1..=5 {
            for m in 0..=12 {
                let subtasks = items(m);
                let lists = assign(&subtasks, agents);
                assert_eq!(lists.len(), agents);

                let total: usize = lists.iter().map(Vec::len).sum();
                assert_eq!(total, m);

                for (i, list) in lists.iter().enumerate() {
                    let expected: Vec<String> = subtasks
                        .iter()
                        .enumerate()
                        .filter(|(idx, _)| idx % agents == i)
                        .map(|(_, s)| s.clone())
                        .collect();
                    assert_eq!(list, &expected);
                }
            }
        }
    }

    #[test]
    fn test_more_agents_than_subtasks() {
        let lists = assign(&items(2), 4);
        assert_eq!(lists[0], vec!["s0"]);
        assert_eq!(lists[1], vec!["s1"]);
        assert!(lists[2].is_empty());
        assert!(lists[3].is_empty());
    }

    #[test]
    fn test_zero_agents() {
        assert!(assign(&items(3), 0).is_empty());
    }

    #[test]
    fn test_agent_names() {
        assert_eq!(agent_names(3), vec!["agent_1", "agent_2", "agent_3"]);
        assert!(agent_names(0).is_empty());
    }
}
