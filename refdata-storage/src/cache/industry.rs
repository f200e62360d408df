//! Industrial classification view.
//!
//! The classification is a five-level tree whose level is the length of the
//! code ("A", "01", "011", "0111", "01110"). Most consumers only want
//! sections, divisions and leaf classes, so the three-level view keeps levels
//! 1, 2 and 5 and hangs every leaf directly under its division.

use std::collections::{HashMap, HashSet};

use refdata_core::{EntityId, Record};
use tracing::debug;

pub const SECTION_LEVEL: usize = 1;
pub const DIVISION_LEVEL: usize = 2;
pub const CLASS_LEVEL: usize = 5;

/// Reduce a five-level classification to sections, divisions and classes.
///
/// Classes are re-parented onto their division ancestor; levels 3 and 4 are
/// dropped. A class with no division ancestor is dropped as well.
pub fn compress_to_three_levels(records: impl IntoIterator<Item = Record>) -> Vec<Record> {
    let by_id: HashMap<EntityId, Record> = records.into_iter().map(|r| (r.id, r)).collect();
    let mut kept = Vec::with_capacity(by_id.len());
    let mut stranded = 0usize;

    for record in by_id.values() {
        match record.level() {
            Some(SECTION_LEVEL) | Some(DIVISION_LEVEL) => kept.push(record.clone()),
            Some(CLASS_LEVEL) => match division_of(&by_id, record) {
                Some(division) => kept.push(record.clone().with_parent(division)),
                None => stranded += 1,
            },
            _ => {}
        }
    }

    if stranded > 0 {
        debug!(stranded, "Classes without a division ancestor left out");
    }
    kept
}

fn division_of(by_id: &HashMap<EntityId, Record>, record: &Record) -> Option<EntityId> {
    let mut seen = HashSet::new();
    let mut cursor = record.parent_id;
    while let Some(id) = cursor {
        if !seen.insert(id) {
            return None;
        }
        let parent = by_id.get(&id)?;
        if parent.level() == Some(DIVISION_LEVEL) {
            return Some(id);
        }
        cursor = parent.parent_id;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use refdata_core::new_entity_id;

    fn node(code: &str, parent: Option<&Record>) -> Record {
        let record = Record::new(new_entity_id(), Utc::now()).with_code(code);
        match parent {
            Some(p) => record.with_parent(p.id),
            None => record,
        }
    }

    #[test]
    fn test_classes_hang_under_division() {
        let section = node("A", None);
        let division = node("01", Some(&section));
        let group = node("011", Some(&division));
        let class4 = node("0111", Some(&group));
        let class5 = node("01110", Some(&class4));

        let compressed = compress_to_three_levels(vec![
            section.clone(),
            division.clone(),
            group,
            class4,
            class5.clone(),
        ]);

        assert_eq!(compressed.len(), 3);
        let leaf = compressed.iter().find(|r| r.id == class5.id).unwrap();
        assert_eq!(leaf.parent_id, Some(division.id));
        let kept_division = compressed.iter().find(|r| r.id == division.id).unwrap();
        assert_eq!(kept_division.parent_id, Some(section.id));
    }

    #[test]
    fn test_class_without_division_dropped() {
        let section = node("B", None);
        let orphan = node("05100", Some(&section));

        let compressed = compress_to_three_levels(vec![section.clone(), orphan]);
        assert_eq!(compressed.len(), 1);
        assert_eq!(compressed[0].id, section.id);
    }

    #[test]
    fn test_cyclic_parents_terminate() {
        let mut a = node("011", None);
        let b = node("0111", Some(&a));
        a.parent_id = Some(b.id);
        let leaf = node("01110", Some(&b));

        assert!(compress_to_three_levels(vec![a, b, leaf]).is_empty());
    }

    #[test]
    fn test_codeless_records_dropped() {
        let bare = Record::new(new_entity_id(), Utc::now());
        assert!(compress_to_three_levels(vec![bare]).is_empty());
    }
}
