//! codec — снимок живого графа объектов и обратное восстановление.
//!
//! Поток данных:
//!   live graph -> index_graph -> encode_snapshot (+value_codec, +type_table)
//!              -> SnapshotRecord -> [store] -> restore_snapshot -> live graph
//!
//! Кодек синхронный, без I/O и без блокировок: вызывающий держит граф
//! неизменным на время прохода.

pub mod encoder;
pub mod indexer;
pub mod record;
pub mod restorer;
pub mod teardown;
pub mod type_table;
pub mod value_codec;

pub use encoder::encode_snapshot;
pub use indexer::{index_graph, GraphIndex};
pub use record::{
    FieldGroup, FreestandingEntry, Placement, RecordStats, Slot, SnapshotRecord, StructuralEntry,
    ANCHORED_TYPE, DETACHED_PARENT, ROOT_PATH,
};
pub use restorer::restore_snapshot;
pub use teardown::free_ephemeral;
pub use type_table::TypeTable;

use crate::config::SnapConfig;
use crate::error::SnapResult;
use crate::host::PersistHost;
use crate::value::ObjRef;

/// Кодек с зафиксированной конфигурацией.
#[derive(Debug, Clone, Default)]
pub struct SnapCodec {
    config: SnapConfig,
}

impl SnapCodec {
    pub fn new(config: SnapConfig) -> Self {
        Self { config }
    }

    /// Конфигурация из окружения (SNAPGRAPH_*).
    pub fn from_env() -> Self {
        Self::new(SnapConfig::from_env())
    }

    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    pub fn encode<H: PersistHost + ?Sized>(
        &self,
        host: &H,
        root: ObjRef,
    ) -> SnapResult<SnapshotRecord> {
        encode_snapshot(host, root, &self.config)
    }

    pub fn restore<H: PersistHost + ?Sized>(
        &self,
        host: &mut H,
        record: &SnapshotRecord,
        anchor: Option<ObjRef>,
    ) -> SnapResult<Option<ObjRef>> {
        restore_snapshot(host, record, anchor, &self.config)
    }

    /// Снести эфемерную часть под `anchor` и восстановить запись на её место.
    pub fn reload<H: PersistHost + ?Sized>(
        &self,
        host: &mut H,
        record: &SnapshotRecord,
        anchor: ObjRef,
    ) -> SnapResult<Option<ObjRef>> {
        free_ephemeral(host, anchor);
        restore_snapshot(host, record, Some(anchor), &self.config)
    }
}
