#![allow(non_snake_case)]

// Базовые модули
pub mod config;
pub mod error;
pub mod metrics;

// Модель значений и граница с живым графом
pub mod value;
pub mod host;
pub mod graph;  // src/graph/{mod,registry}.rs

// Кодек снимков
pub mod codec;  // src/codec/{mod,indexer,encoder,value_codec,type_table,record,restorer,teardown}.rs

// Хранение записей и CLI
pub mod store;
pub mod cli;    // src/cli.rs + src/cli/demo.rs

// Удобные реэкспорты
pub use codec::{
    encode_snapshot, free_ephemeral, index_graph, restore_snapshot, SnapCodec, SnapshotRecord,
};
pub use config::{SnapBuilder, SnapConfig};
pub use error::{SnapError, SnapResult};
pub use graph::{ObjectGraph, TypeDecl, TypeRegistry};
pub use host::{PersistHost, PersistMode};
pub use value::{Array, Dict, ElemType, Key, ObjRef, Value, WeakRef};
