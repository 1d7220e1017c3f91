//! Lightweight global metrics for SnapGraph.
//!
//! Потокобезопасные атомарные счётчики:
//! - Encode (проходы, объекты, свободные объекты, типы, мёртвые weak)
//! - Restore (проходы, созданные объекты, записанные поля, откаты)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Encode -----
static ENCODES_TOTAL: AtomicU64 = AtomicU64::new(0);
static OBJECTS_ENCODED: AtomicU64 = AtomicU64::new(0);
static FREESTANDING_DISCOVERED: AtomicU64 = AtomicU64::new(0);
static TYPES_INTERNED: AtomicU64 = AtomicU64::new(0);
static DEAD_WEAK_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Restore -----
static RESTORES_TOTAL: AtomicU64 = AtomicU64::new(0);
static OBJECTS_INSTANTIATED: AtomicU64 = AtomicU64::new(0);
static FIELDS_REPLAYED: AtomicU64 = AtomicU64::new(0);
static RESTORE_ROLLBACKS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Encode
    pub encodes_total: u64,
    pub objects_encoded: u64,
    pub freestanding_discovered: u64,
    pub types_interned: u64,
    pub dead_weak_written: u64,

    // Restore
    pub restores_total: u64,
    pub objects_instantiated: u64,
    pub fields_replayed: u64,
    pub restore_rollbacks: u64,
}

impl MetricsSnapshot {
    pub fn avg_objects_per_encode(&self) -> f64 {
        if self.encodes_total == 0 {
            0.0
        } else {
            self.objects_encoded as f64 / self.encodes_total as f64
        }
    }
}

// ----- Recorders (Encode) -----
pub fn record_encode(objects: usize) {
    ENCODES_TOTAL.fetch_add(1, Ordering::Relaxed);
    OBJECTS_ENCODED.fetch_add(objects as u64, Ordering::Relaxed);
}

pub fn record_freestanding_discovered() {
    FREESTANDING_DISCOVERED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_type_interned() {
    TYPES_INTERNED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_dead_weak() {
    DEAD_WEAK_WRITTEN.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Restore) -----
pub fn record_restore() {
    RESTORES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_instantiated() {
    OBJECTS_INSTANTIATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_fields_replayed(n: usize) {
    FIELDS_REPLAYED.fetch_add(n as u64, Ordering::Relaxed);
}

pub fn record_restore_rollback() {
    RESTORE_ROLLBACKS.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        encodes_total: ENCODES_TOTAL.load(Ordering::Relaxed),
        objects_encoded: OBJECTS_ENCODED.load(Ordering::Relaxed),
        freestanding_discovered: FREESTANDING_DISCOVERED.load(Ordering::Relaxed),
        types_interned: TYPES_INTERNED.load(Ordering::Relaxed),
        dead_weak_written: DEAD_WEAK_WRITTEN.load(Ordering::Relaxed),

        restores_total: RESTORES_TOTAL.load(Ordering::Relaxed),
        objects_instantiated: OBJECTS_INSTANTIATED.load(Ordering::Relaxed),
        fields_replayed: FIELDS_REPLAYED.load(Ordering::Relaxed),
        restore_rollbacks: RESTORE_ROLLBACKS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    ENCODES_TOTAL.store(0, Ordering::Relaxed);
    OBJECTS_ENCODED.store(0, Ordering::Relaxed);
    FREESTANDING_DISCOVERED.store(0, Ordering::Relaxed);
    TYPES_INTERNED.store(0, Ordering::Relaxed);
    DEAD_WEAK_WRITTEN.store(0, Ordering::Relaxed);

    RESTORES_TOTAL.store(0, Ordering::Relaxed);
    OBJECTS_INSTANTIATED.store(0, Ordering::Relaxed);
    FIELDS_REPLAYED.store(0, Ordering::Relaxed);
    RESTORE_ROLLBACKS.store(0, Ordering::Relaxed);
}
