//! codec/indexer — первый проход: плотные id для сохраняемых объектов.
//!
//! Корень получает id 0, далее pre-order по структурным детям с режимом
//! != NONE; в поддерево NONE-объекта обход не спускается. Свободные объекты
//! дописываются в индекс позже, кодировщиком, по мере обнаружения.

use std::collections::HashMap;

use crate::error::{SnapError, SnapResult};
use crate::host::{PersistHost, PersistMode};
use crate::value::ObjRef;

#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    objects: Vec<ObjRef>,
    ids: HashMap<ObjRef, u32>,
    structural: usize,
}

impl GraphIndex {
    #[inline]
    pub fn id_of(&self, obj: ObjRef) -> Option<u32> {
        self.ids.get(&obj).copied()
    }

    #[inline]
    pub fn object(&self, id: u32) -> Option<ObjRef> {
        self.objects.get(id as usize).copied()
    }

    /// Всего объектов (структурных + уже обнаруженных свободных).
    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Число структурных объектов (фиксируется после index_graph).
    #[inline]
    pub fn structural_count(&self) -> usize {
        self.structural
    }

    pub(crate) fn push(&mut self, obj: ObjRef) -> u32 {
        let id = self.objects.len() as u32;
        self.objects.push(obj);
        self.ids.insert(obj, id);
        id
    }
}

/// Проиндексировать структурное дерево под root.
///
/// Ошибка контракта: root мёртв или NONE, либо ANCHORED-объект лежит под
/// EPHEMERAL-предком.
pub fn index_graph<H: PersistHost + ?Sized>(host: &H, root: ObjRef) -> SnapResult<GraphIndex> {
    if !host.is_alive(root) {
        return Err(SnapError::contract(format!("snapshot root {} is not alive", root)));
    }
    if host.persist_mode(root) == PersistMode::None {
        return Err(SnapError::contract(format!("snapshot root {} is not persisted", root)));
    }

    let mut index = GraphIndex::default();
    // (объект, есть ли EPHEMERAL-предок)
    let mut stack: Vec<(ObjRef, bool)> = vec![(root, false)];

    while let Some((obj, under_ephemeral)) = stack.pop() {
        let mode = host.persist_mode(obj);
        if mode == PersistMode::Anchored && under_ephemeral {
            return Err(SnapError::contract(format!(
                "anchored {} has an ephemeral ancestor",
                obj
            )));
        }
        index.push(obj);

        let below_ephemeral = under_ephemeral || mode == PersistMode::Ephemeral;
        let children = host.children(obj);
        for child in children.into_iter().rev() {
            if host.persist_mode(child) != PersistMode::None {
                stack.push((child, below_ephemeral));
            }
        }
    }

    index.structural = index.objects.len();
    Ok(index)
}
