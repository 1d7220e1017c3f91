//! codec/record — снимок графа (SnapshotRecord) и формат закодированных значений.
//!
//! Запись — неизменяемые данные, сериализуемые serde в любой формат, умеющий
//! вложенные последовательности/словари и примитивы (в store — JSON):
//!
//! {
//!   "object_count": 5,
//!   "structural": [
//!     {"id":0,"type_id":-1,"placement":{"kind":"anchored","path":".","index":0},"groups":[[...]]},
//!     {"id":1,"type_id":0,"placement":{"kind":"ephemeral","parent":0,"index":2},"groups":[[...],[...]]}
//!   ],
//!   "freestanding": [ {"id":2,"type_id":1,"groups":[[...]]} ],
//!   "type_paths": ["res://mob.type", "res://orbit.type"]
//! }
//!
//! Slot (закодированное значение) — untagged: null/bool/int/float/string/seq/map.
//! Строки всегда несут тег (см. value_codec), поэтому ссылки на объекты и
//! обычные строки делят один формат слота.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::type_table::TypeTable;
use crate::error::{SnapError, SnapResult};

/// type_id структурного объекта в режиме ANCHORED.
pub const ANCHORED_TYPE: i64 = -1;

/// parent эфемерного корня снимка (id 0), не прикреплённого ни к чему.
pub const DETACHED_PARENT: i64 = -1;

/// Путь anchored-корня относительно самого себя.
pub const ROOT_PATH: &str = ".";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Slot {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Slot>),
    Map(BTreeMap<String, Slot>),
}

/// Одна объявленная группа полей: значения в порядке объявления имён.
pub type FieldGroup = Vec<Slot>;

/// Размещение структурного объекта.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    /// Путь от якоря + индекс среди соседей в момент снимка.
    Anchored { path: String, index: usize },
    /// id структурного родителя (DETACHED_PARENT для корня) + индекс среди соседей.
    Ephemeral { parent: i64, index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralEntry {
    pub id: u32,
    /// ANCHORED_TYPE либо индекс в type_paths.
    pub type_id: i64,
    pub placement: Placement,
    pub groups: Vec<FieldGroup>,
}

impl StructuralEntry {
    #[inline]
    pub fn is_anchored(&self) -> bool {
        self.type_id == ANCHORED_TYPE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreestandingEntry {
    pub id: u32,
    pub type_id: u32,
    pub groups: Vec<FieldGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub object_count: u32,
    pub structural: Vec<StructuralEntry>,
    pub freestanding: Vec<FreestandingEntry>,
    pub type_paths: Vec<String>,
}

/// Сводка по записи (для логов и CLI).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordStats {
    pub objects: u32,
    pub anchored: usize,
    pub ephemeral: usize,
    pub freestanding: usize,
    pub types: usize,
    pub fields: usize,
    pub per_type: BTreeMap<String, usize>,
}

impl SnapshotRecord {
    /// Корень снимка — эфемерный (restore вернёт новый отсоединённый корень).
    pub fn root_is_ephemeral(&self) -> bool {
        self.structural
            .first()
            .map(|e| !e.is_anchored())
            .unwrap_or(false)
    }

    /// Структурная проверка записи. Вызывается restore до любых мутаций хоста.
    pub fn validate(&self) -> SnapResult<()> {
        let n_struct = self.structural.len();
        let n_free = self.freestanding.len();
        let n_types = self.type_paths.len() as i64;

        if n_struct == 0 {
            return Err(SnapError::malformed("record has no root entry"));
        }
        if self.object_count as usize != n_struct + n_free {
            return Err(SnapError::malformed(format!(
                "object_count={} but record holds {} structural + {} freestanding",
                self.object_count, n_struct, n_free
            )));
        }

        let root_ephemeral = self.root_is_ephemeral();

        for (i, e) in self.structural.iter().enumerate() {
            if e.id as usize != i {
                return Err(SnapError::malformed(format!(
                    "structural entry #{} carries id {}",
                    i, e.id
                )));
            }
            match (&e.placement, e.is_anchored()) {
                (Placement::Anchored { path, .. }, true) => {
                    if root_ephemeral {
                        return Err(SnapError::malformed(format!(
                            "anchored entry {} ('{}') under an ephemeral root",
                            e.id, path
                        )));
                    }
                    if (i == 0) != (path == ROOT_PATH) {
                        return Err(SnapError::malformed(format!(
                            "anchored entry {} has path '{}'",
                            e.id, path
                        )));
                    }
                }
                (Placement::Ephemeral { parent, .. }, false) => {
                    if e.type_id < 0 || e.type_id >= n_types {
                        return Err(SnapError::malformed(format!(
                            "entry {} has type_id {} (types: {})",
                            e.id, e.type_id, n_types
                        )));
                    }
                    if i == 0 {
                        if *parent != DETACHED_PARENT {
                            return Err(SnapError::malformed(format!(
                                "ephemeral root has parent {}",
                                parent
                            )));
                        }
                    } else if *parent < 0 || *parent >= i as i64 {
                        return Err(SnapError::malformed(format!(
                            "entry {} has parent {} (must precede it)",
                            e.id, parent
                        )));
                    }
                }
                (p, anchored) => {
                    return Err(SnapError::malformed(format!(
                        "entry {} placement {:?} disagrees with type_id {} (anchored={})",
                        e.id, p, e.type_id, anchored
                    )));
                }
            }
        }

        for (j, e) in self.freestanding.iter().enumerate() {
            if e.id as usize != n_struct + j {
                return Err(SnapError::malformed(format!(
                    "freestanding entry #{} carries id {} (expected {})",
                    j,
                    e.id,
                    n_struct + j
                )));
            }
            if e.type_id as i64 >= n_types {
                return Err(SnapError::malformed(format!(
                    "freestanding entry {} has type_id {} (types: {})",
                    e.id, e.type_id, n_types
                )));
            }
        }

        TypeTable::from_paths(&self.type_paths)?;

        Ok(())
    }

    pub fn stats(&self) -> RecordStats {
        let mut st = RecordStats {
            objects: self.object_count,
            types: self.type_paths.len(),
            freestanding: self.freestanding.len(),
            ..Default::default()
        };

        let type_name = |id: i64| -> String {
            if id == ANCHORED_TYPE {
                "(anchored)".to_string()
            } else {
                self.type_paths
                    .get(id as usize)
                    .cloned()
                    .unwrap_or_else(|| format!("(bad type {})", id))
            }
        };

        for e in &self.structural {
            if e.is_anchored() {
                st.anchored += 1;
            } else {
                st.ephemeral += 1;
            }
            st.fields += e.groups.iter().map(Vec::len).sum::<usize>();
            *st.per_type.entry(type_name(e.type_id)).or_insert(0) += 1;
        }
        for e in &self.freestanding {
            st.fields += e.groups.iter().map(Vec::len).sum::<usize>();
            *st.per_type.entry(type_name(e.type_id as i64)).or_insert(0) += 1;
        }
        st
    }
}
