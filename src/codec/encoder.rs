//! codec/encoder — проход кодирования: живой граф -> SnapshotRecord.
//!
//! Порядок:
//! 1) index_graph: структурные объекты получают id 0..n в pre-order;
//! 2) для каждого структурного объекта — размещение + группы полей;
//! 3) очередь свободных объектов, найденных по ссылкам в полях, дренируется
//!    до пустоты (каждый объект кодируется ровно один раз, охраняется индексом).

use std::collections::VecDeque;

use log::{debug, info};

use super::indexer::{index_graph, GraphIndex};
use super::record::{
    FieldGroup, FreestandingEntry, Placement, SnapshotRecord, StructuralEntry, ANCHORED_TYPE,
    DETACHED_PARENT, ROOT_PATH,
};
use super::type_table::TypeTable;
use super::value_codec::{IdentityResolver, ValueEncoder};
use crate::config::SnapConfig;
use crate::error::{SnapError, SnapResult};
use crate::host::{PersistHost, PersistMode};
use crate::metrics::{record_encode, record_freestanding_discovered};
use crate::value::ObjRef;

/// Состояние одного вызова encode: индекс, таблица типов, очередь свободных.
struct EncodeState<'h, H: PersistHost + ?Sized> {
    host: &'h H,
    index: GraphIndex,
    types: TypeTable,
    pending: VecDeque<ObjRef>,
    strict_refs: bool,
}

impl<'h, H: PersistHost + ?Sized> IdentityResolver for EncodeState<'h, H> {
    fn resolve(&mut self, obj: ObjRef) -> SnapResult<u32> {
        if let Some(id) = self.index.id_of(obj) {
            return Ok(id);
        }

        let mode = self.host.persist_mode(obj);
        if self.host.parent(obj).is_some() {
            // структурный объект вне индексированного дерева
            if self.strict_refs || mode != PersistMode::Ephemeral {
                return Err(SnapError::contract(format!(
                    "reference to structural {} ({:?}) outside the snapshot tree",
                    obj, mode
                )));
            }
            debug!("encode: promoting structural {} to freestanding", obj);
        } else if mode != PersistMode::Ephemeral {
            return Err(SnapError::contract(format!(
                "freestanding {} must be ephemeral, found {:?}",
                obj, mode
            )));
        }

        let id = self.index.push(obj);
        self.pending.push_back(obj);
        record_freestanding_discovered();
        debug!("encode: freestanding {} -> id {}", obj, id);
        Ok(id)
    }

    fn type_id(&mut self, path: &str) -> u32 {
        self.types.intern(path)
    }

    fn is_alive(&self, obj: ObjRef) -> bool {
        self.host.is_alive(obj)
    }
}

impl<'h, H: PersistHost + ?Sized> EncodeState<'h, H> {
    fn type_of(&mut self, obj: ObjRef) -> SnapResult<u32> {
        let path = self.host.type_path(obj).ok_or_else(|| {
            SnapError::contract(format!("ephemeral {} has no type descriptor", obj))
        })?;
        Ok(self.types.intern(&path))
    }

    fn encode_groups(&mut self, obj: ObjRef, max_depth: usize) -> SnapResult<Vec<FieldGroup>> {
        let host = self.host;
        let declared = host.field_groups(obj);
        let mut groups = Vec::with_capacity(declared.len());

        for names in declared {
            let mut group = Vec::with_capacity(names.len());
            for name in &names {
                let v = host.get_field(obj, name).ok_or_else(|| {
                    SnapError::contract(format!("{} does not expose declared field '{}'", obj, name))
                })?;
                let slot = ValueEncoder::new(&mut *self, max_depth)
                    .encode(&v)
                    .map_err(|e| match e {
                        SnapError::Contract(m) => {
                            SnapError::Contract(format!("field '{}' of {}: {}", name, obj, m))
                        }
                        other => other,
                    })?;
                group.push(slot);
            }
            groups.push(group);
        }
        Ok(groups)
    }

    fn placement(&mut self, root: ObjRef, id: u32, obj: ObjRef) -> SnapResult<(i64, Placement)> {
        let host = self.host;
        let index = host.index_in_parent(obj).unwrap_or(0);

        if host.persist_mode(obj) == PersistMode::Ephemeral {
            let type_id = self.type_of(obj)? as i64;
            let parent = if id == 0 {
                DETACHED_PARENT
            } else {
                let p = host
                    .parent(obj)
                    .and_then(|p| self.index.id_of(p))
                    .ok_or_else(|| {
                        SnapError::contract(format!("structural {} lost its indexed parent", obj))
                    })?;
                p as i64
            };
            return Ok((type_id, Placement::Ephemeral { parent, index }));
        }

        let path = if id == 0 {
            ROOT_PATH.to_string()
        } else {
            host.path_from(root, obj).ok_or_else(|| {
                SnapError::contract(format!("anchored {} has no stable path from {}", obj, root))
            })?
        };
        Ok((ANCHORED_TYPE, Placement::Anchored { path, index }))
    }
}

/// Снять снимок графа под `root`.
///
/// Ошибки — только нарушения контракта (SnapError::Contract); запись либо
/// строится целиком, либо не строится вовсе.
pub fn encode_snapshot<H: PersistHost + ?Sized>(
    host: &H,
    root: ObjRef,
    cfg: &SnapConfig,
) -> SnapResult<SnapshotRecord> {
    let index = index_graph(host, root)?;
    let n_struct = index.structural_count();
    debug!("encode: indexed {} structural object(s) under {}", n_struct, root);

    let mut st = EncodeState {
        host,
        index,
        types: TypeTable::new(),
        pending: VecDeque::new(),
        strict_refs: cfg.strict_refs,
    };

    let mut structural = Vec::with_capacity(n_struct);
    for id in 0..n_struct as u32 {
        let obj = st
            .index
            .object(id)
            .ok_or_else(|| SnapError::contract(format!("index lost structural id {}", id)))?;
        let (type_id, placement) = st.placement(root, id, obj)?;
        let groups = st.encode_groups(obj, cfg.max_depth)?;
        structural.push(StructuralEntry {
            id,
            type_id,
            placement,
            groups,
        });
    }

    let mut freestanding = Vec::new();
    while let Some(obj) = st.pending.pop_front() {
        let id = st
            .index
            .id_of(obj)
            .ok_or_else(|| SnapError::contract(format!("queued {} was never indexed", obj)))?;
        let type_id = st.type_of(obj)?;
        let groups = st.encode_groups(obj, cfg.max_depth)?;
        freestanding.push(FreestandingEntry {
            id,
            type_id,
            groups,
        });
    }

    let object_count = st.index.len() as u32;
    record_encode(object_count as usize);
    info!(
        "encode: {} object(s) ({} structural, {} freestanding), {} type(s)",
        object_count,
        structural.len(),
        freestanding.len(),
        st.types.len()
    );

    Ok(SnapshotRecord {
        object_count,
        structural,
        freestanding,
        type_paths: st.types.into_paths(),
    })
}
