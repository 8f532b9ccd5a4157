//! Level assignment of work items into concurrently runnable waves.

use crate::model::WorkItem;
use std::collections::BTreeMap;

pub type Wave = Vec<WorkItem>;

/// Groups items so that every item lands one wave after its deepest dependency.
///
/// Items whose dependencies can never all be placed (cycles, or ids that name
/// no item) are forced together into one extra wave after the last placed one.
pub fn execution_waves(items: &[WorkItem]) -> Vec<Wave> {
    if items.is_empty() {
        return Vec::new();
    }

    let mut wave_of: BTreeMap<i64, usize> = BTreeMap::new();
    let max_passes = items.len() + 1;

    for _ in 0..max_passes {
        let mut progress = false;
        for item in items {
            if wave_of.contains_key(&item.id) {
                continue;
            }
            let mut level = 0usize;
            let mut ready = true;
            for dep in &item.depends_on {
                match wave_of.get(dep) {
                    Some(w) => level = level.max(w + 1),
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
            if ready {
                wave_of.insert(item.id, level);
                progress = true;
            }
        }

        if !progress {
            let forced = wave_of.values().max().map_or(0, |w| w + 1);
            for item in items {
                wave_of.entry(item.id).or_insert(forced);
            }
            break;
        }

        if items.iter().all(|i| wave_of.contains_key(&i.id)) {
            break;
        }
    }

    let depth = wave_of.values().max().map_or(0, |w| w + 1);
    let mut waves: Vec<Wave> = vec![Vec::new(); depth];
    for item in items {
        if let Some(&w) = wave_of.get(&item.id) {
            waves[w].push(item.clone());
        }
    }
    for wave in &mut waves {
        wave.sort_by_key(|w| w.id);
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, deps: &[i64]) -> WorkItem {
        WorkItem {
            id,
            title: format!("t{}", id),
            prompt: format!("p{}", id),
            files: Vec::new(),
            depends_on: deps.to_vec(),
        }
    }

    fn ids(waves: &[Wave]) -> Vec<Vec<i64>> {
        waves
            .iter()
            .map(|w| w.iter().map(|i| i.id).collect())
            .collect()
    }

    #[test]
    fn diamond_groups_into_three_waves() {
        let items = vec![item(1, &[]), item(2, &[1]), item(3, &[]), item(4, &[2, 3])];
        assert_eq!(ids(&execution_waves(&items)), vec![vec![1, 3], vec![2], vec![4]]);
    }

    #[test]
    fn wave_contents_are_sorted_regardless_of_authoring_order() {
        let items = vec![item(9, &[]), item(3, &[]), item(5, &[9])];
        assert_eq!(ids(&execution_waves(&items)), vec![vec![3, 9], vec![5]]);
    }

    #[test]
    fn dependency_declared_after_dependent_still_orders_correctly() {
        let items = vec![item(1, &[3]), item(2, &[1]), item(3, &[])];
        assert_eq!(ids(&execution_waves(&items)), vec![vec![3], vec![1], vec![2]]);
    }

    #[test]
    fn every_item_is_strictly_after_its_dependencies() {
        let items = vec![
            item(1, &[]),
            item(2, &[1]),
            item(3, &[1]),
            item(4, &[2]),
            item(5, &[3, 4]),
            item(6, &[]),
            item(7, &[6, 1]),
        ];
        let waves = execution_waves(&items);
        let mut index = BTreeMap::new();
        for (w, wave) in waves.iter().enumerate() {
            for it in wave {
                index.insert(it.id, w);
            }
        }
        assert_eq!(index.len(), items.len());
        for it in &items {
            if it.depends_on.is_empty() {
                assert_eq!(index[&it.id], 0, "root {} not in wave 0", it.id);
            }
            for dep in &it.depends_on {
                assert!(index[&it.id] > index[dep], "{} not after {}", it.id, dep);
            }
        }
    }

    #[test]
    fn cycle_is_forced_into_one_final_wave() {
        let items = vec![item(1, &[2]), item(2, &[1])];
        assert_eq!(ids(&execution_waves(&items)), vec![vec![1, 2]]);
    }

    #[test]
    fn cycle_lands_after_the_acyclic_part() {
        let items = vec![
            item(1, &[]),
            item(2, &[1]),
            item(3, &[4]),
            item(4, &[3]),
            item(5, &[3]),
        ];
        assert_eq!(
            ids(&execution_waves(&items)),
            vec![vec![1], vec![2], vec![3, 4, 5]]
        );
    }

    #[test]
    fn self_dependency_terminates() {
        let items = vec![item(1, &[1])];
        assert_eq!(ids(&execution_waves(&items)), vec![vec![1]]);
    }

    #[test]
    fn missing_dependency_is_satisfied_once_present_ids_are_placed() {
        let items = vec![item(1, &[]), item(2, &[1]), item(3, &[99])];
        assert_eq!(ids(&execution_waves(&items)), vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn empty_input_has_no_waves() {
        assert!(execution_waves(&[]).is_empty());
    }
}
