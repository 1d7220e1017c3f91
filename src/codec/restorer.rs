//! codec/restorer — восстановление графа из SnapshotRecord.
//!
//! Машина состояний, шаги строго по порядку:
//!   Validate  -> структурная проверка записи, наличие/живость якоря
//!   LoadTypes -> каждый путь type_paths резолвится в тип хоста
//!   Locate    -> anchored-объекты ищутся по пути под якорем, проверяются
//!                раскладки групп полей; затем создаются эфемерные и свободные
//!   Decode    -> все значения декодируются в staging (id-токены уже резолвятся)
//!   Replay    -> staging записывается в поля (структурные, затем свободные)
//!   Attach    -> эфемерные структурные объекты (кроме id 0) цепляются к родителю
//!                и сдвигаются на записанный индекс (с обрезкой)
//!
//! Любая ошибка до Replay освобождает созданные объекты; якорь не тронут.

use log::{debug, info, warn};

use super::record::{FieldGroup, Placement, SnapshotRecord};
use super::type_table::TypeTable;
use super::value_codec::{IdentityLookup, ValueDecoder};
use crate::config::SnapConfig;
use crate::error::{SnapError, SnapResult};
use crate::host::{PersistHost, PersistMode};
use crate::metrics::{
    record_fields_replayed, record_instantiated, record_restore, record_restore_rollback,
};
use crate::value::{ObjRef, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Validate,
    LoadTypes,
    Locate,
    Decode,
    Replay,
    Attach,
    Done,
}

/// Одна запись поля, ожидающая применения.
struct StagedField {
    obj: ObjRef,
    name: String,
    value: Value,
}

/// Таблица id -> объект для декодера (зеркало индекса, но на новом графе).
struct Resolved<'a> {
    table: &'a [ObjRef],
    types: &'a TypeTable,
}

impl IdentityLookup for Resolved<'_> {
    fn object(&self, id: u32) -> Option<ObjRef> {
        self.table.get(id as usize).copied()
    }

    fn type_path(&self, id: u32) -> Option<&str> {
        self.types.path_of(id)
    }
}

struct Restore<'r, H: PersistHost + ?Sized> {
    record: &'r SnapshotRecord,
    anchor: Option<ObjRef>,
    max_depth: usize,
    stage: Stage,
    /// пути типов записи; заполняется в LoadTypes
    type_table: TypeTable,
    types: Vec<H::TypeHandle>,
    /// id -> объект; заполняется в Locate
    table: Vec<ObjRef>,
    /// имена полей по id (объявленные хостом)
    layouts: Vec<Vec<Vec<String>>>,
    /// созданные в этом restore объекты (для отката)
    fresh: Vec<ObjRef>,
    staged: Vec<StagedField>,
}

impl<'r, H: PersistHost + ?Sized> Restore<'r, H> {
    fn new(record: &'r SnapshotRecord, anchor: Option<ObjRef>, cfg: &SnapConfig) -> Self {
        Self {
            record,
            anchor,
            max_depth: cfg.max_depth,
            stage: Stage::Validate,
            type_table: TypeTable::new(),
            types: Vec::with_capacity(record.type_paths.len()),
            table: Vec::with_capacity(record.object_count as usize),
            layouts: Vec::with_capacity(record.object_count as usize),
            fresh: Vec::new(),
            staged: Vec::new(),
        }
    }

    fn run(&mut self, host: &mut H) -> SnapResult<Option<ObjRef>> {
        loop {
            let next = match self.stage {
                Stage::Validate => self.validate(host).map(|_| Stage::LoadTypes),
                Stage::LoadTypes => self.load_types(host).map(|_| Stage::Locate),
                Stage::Locate => self.locate(host).map(|_| Stage::Decode),
                Stage::Decode => self.decode().map(|_| Stage::Replay),
                Stage::Replay => self.replay(host).map(|_| Stage::Attach),
                Stage::Attach => self.attach(host).map(|_| Stage::Done),
                Stage::Done => break,
            };
            match next {
                Ok(stage) => {
                    debug!("restore: {:?} -> {:?}", self.stage, stage);
                    self.stage = stage;
                }
                Err(e) => {
                    warn!("restore: failed in {:?}: {}", self.stage, e);
                    self.rollback(host);
                    return Err(e);
                }
            }
        }

        if self.record.root_is_ephemeral() {
            Ok(self.table.first().copied())
        } else {
            Ok(None)
        }
    }

    fn validate(&mut self, host: &H) -> SnapResult<()> {
        self.record.validate()?;
        if self.record.root_is_ephemeral() {
            if let Some(a) = self.anchor {
                debug!("restore: ephemeral root, anchor {} unused", a);
            }
            return Ok(());
        }
        match self.anchor {
            None => Err(SnapError::resolution(
                "record has an anchored root but no anchor was supplied",
            )),
            Some(a) if !host.is_alive(a) => {
                Err(SnapError::resolution(format!("anchor {} is not alive", a)))
            }
            Some(_) => Ok(()),
        }
    }

    fn load_types(&mut self, host: &H) -> SnapResult<()> {
        self.type_table = TypeTable::from_paths(&self.record.type_paths)?;
        for path in self.type_table.paths() {
            let ty = host.resolve_type(path).ok_or_else(|| {
                SnapError::resolution(format!("type descriptor '{}' cannot be loaded", path))
            })?;
            self.types.push(ty);
        }
        Ok(())
    }

    fn type_handle(&self, type_id: i64) -> SnapResult<H::TypeHandle> {
        usize::try_from(type_id)
            .ok()
            .and_then(|i| self.types.get(i))
            .cloned()
            .ok_or_else(|| SnapError::malformed(format!("type id {} out of range", type_id)))
    }

    fn locate(&mut self, host: &mut H) -> SnapResult<()> {
        let record = self.record;

        // 1) без мутаций: anchored-объекты и раскладки полей
        let mut located: Vec<Option<ObjRef>> = Vec::with_capacity(record.structural.len());
        for e in &record.structural {
            let (obj, declared) = match &e.placement {
                Placement::Anchored { path, .. } => {
                    let obj = self.find_anchored(host, e.id, path)?;
                    (Some(obj), host.field_groups(obj))
                }
                Placement::Ephemeral { .. } => {
                    let ty = self.type_handle(e.type_id)?;
                    (None, host.declared_groups(&ty))
                }
            };
            check_layout(e.id, &e.groups, &declared)?;
            located.push(obj);
            self.layouts.push(declared);
        }
        for e in &record.freestanding {
            let ty = self.type_handle(e.type_id as i64)?;
            let declared = host.declared_groups(&ty);
            check_layout(e.id, &e.groups, &declared)?;
            self.layouts.push(declared);
        }

        // 2) создание эфемерных структурных, затем свободных
        for (e, found) in record.structural.iter().zip(located) {
            let obj = match found {
                Some(obj) => obj,
                None => self.instantiate(host, e.type_id)?,
            };
            self.table.push(obj);
        }
        for e in &record.freestanding {
            let obj = self.instantiate(host, e.type_id as i64)?;
            self.table.push(obj);
        }

        debug!(
            "restore: located {} anchored, instantiated {} object(s)",
            self.table.len() - self.fresh.len(),
            self.fresh.len()
        );
        Ok(())
    }

    fn find_anchored(&self, host: &H, id: u32, path: &str) -> SnapResult<ObjRef> {
        let anchor = self
            .anchor
            .ok_or_else(|| SnapError::resolution("anchored entry without an anchor"))?;
        let obj = if id == 0 {
            anchor
        } else {
            host.find_by_path(anchor, path).ok_or_else(|| {
                SnapError::resolution(format!("anchored path '{}' not found under {}", path, anchor))
            })?
        };
        if host.persist_mode(obj) != PersistMode::Anchored {
            return Err(SnapError::resolution(format!(
                "object at '{}' is {:?}, expected anchored",
                path,
                host.persist_mode(obj)
            )));
        }
        Ok(obj)
    }

    fn instantiate(&mut self, host: &mut H, type_id: i64) -> SnapResult<ObjRef> {
        let ty = self.type_handle(type_id)?;
        let obj = host.instantiate(&ty)?;
        self.fresh.push(obj);
        record_instantiated();
        Ok(obj)
    }

    fn decode(&mut self) -> SnapResult<()> {
        let record = self.record;
        let lookup = Resolved {
            table: &self.table,
            types: &self.type_table,
        };
        let decoder = ValueDecoder::new(&lookup, self.max_depth);

        let entries = record
            .structural
            .iter()
            .map(|e| (e.id, &e.groups))
            .chain(record.freestanding.iter().map(|e| (e.id, &e.groups)));

        let mut staged = Vec::new();
        for (id, groups) in entries {
            let obj = self.table[id as usize];
            let declared = &self.layouts[id as usize];
            // лишние хвостовые группы (в живом типе их нет) пропускаются
            for (group, names) in groups.iter().zip(declared) {
                for (slot, name) in group.iter().zip(names) {
                    let value = decoder.decode(slot).map_err(|e| match e {
                        SnapError::Malformed(m) => SnapError::Malformed(format!(
                            "field '{}' of entry {}: {}",
                            name, id, m
                        )),
                        other => other,
                    })?;
                    staged.push(StagedField {
                        obj,
                        name: name.clone(),
                        value,
                    });
                }
            }
        }
        self.staged = staged;
        Ok(())
    }

    fn replay(&mut self, host: &mut H) -> SnapResult<()> {
        let staged = std::mem::take(&mut self.staged);
        let n = staged.len();
        for f in staged {
            host.set_field(f.obj, &f.name, f.value)?;
        }
        record_fields_replayed(n);
        debug!("restore: replayed {} field(s)", n);
        Ok(())
    }

    fn attach(&mut self, host: &mut H) -> SnapResult<()> {
        for e in self.record.structural.iter().skip(1) {
            let (parent, index) = match e.placement {
                Placement::Ephemeral { parent, index } => (parent, index),
                Placement::Anchored { .. } => continue,
            };
            let child = self.table[e.id as usize];
            let parent = self.table[parent as usize];
            host.attach_child(parent, child)?;
            let last = host.child_count(parent).saturating_sub(1);
            host.move_child(parent, child, index.min(last))?;
        }
        Ok(())
    }

    fn rollback(&mut self, host: &mut H) {
        if self.fresh.is_empty() {
            return;
        }
        for obj in self.fresh.drain(..).rev() {
            host.free(obj);
        }
        record_restore_rollback();
    }
}

/// Проверить, что записанные группы ложатся на объявленные хостом.
///
/// Меньше полей/групп — норма (поля остаются по умолчанию); лишние хвостовые
/// группы игнорируются; группа длиннее объявленной — ошибка.
fn check_layout(id: u32, groups: &[FieldGroup], declared: &[Vec<String>]) -> SnapResult<()> {
    for (g, group) in groups.iter().enumerate() {
        match declared.get(g) {
            Some(names) if group.len() > names.len() => {
                return Err(SnapError::malformed(format!(
                    "entry {} group {} carries {} field(s), target declares {}",
                    id,
                    g,
                    group.len(),
                    names.len()
                )));
            }
            Some(_) => {}
            None => {
                debug!(
                    "restore: entry {} has {} trailing group(s) unknown to the target, ignored",
                    id,
                    groups.len() - g
                );
                break;
            }
        }
    }
    Ok(())
}

/// Восстановить снимок.
///
/// `anchor` обязателен, если корень записи — anchored; тогда поля пишутся в
/// существующие объекты под якорем и возвращается None. Для эфемерного корня
/// возвращается новый отсоединённый корень.
pub fn restore_snapshot<H: PersistHost + ?Sized>(
    host: &mut H,
    record: &SnapshotRecord,
    anchor: Option<ObjRef>,
    cfg: &SnapConfig,
) -> SnapResult<Option<ObjRef>> {
    let mut r = Restore::<H>::new(record, anchor, cfg);
    let out = r.run(host)?;
    record_restore();
    info!(
        "restore: {} object(s) ({} instantiated), root {}",
        record.object_count,
        r.fresh.len(),
        match out {
            Some(root) => root.to_string(),
            None => "anchored".to_string(),
        }
    );
    Ok(out)
}
