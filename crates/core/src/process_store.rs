//! 进程内共享缓存
//!
//! 组件（例如周期性刷新的缓存）把计算结果写入 [`ProcessStore`]，
//! 其他调用方按键读取，并可通过修改时间判断数据是否过期。

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::value::ConfigValue;

struct Entry {
    value: ConfigValue,
    modified: DateTime<Utc>,
}

/// Keyed values shared across the process, each stamped with the time it
/// was last written.
pub struct ProcessStore {
    entries: RwLock<Option<HashMap<String, Entry>>>,
}

static GLOBAL: ProcessStore = ProcessStore::new();

/// The process-wide store.
pub fn process_store() -> &'static ProcessStore {
    &GLOBAL
}

impl ProcessStore {
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(None),
        }
    }

    /// 写入并记录修改时间，返回旧值
    pub fn insert<K: Into<String>, V: Into<ConfigValue>>(&self, key: K, value: V) -> Option<ConfigValue> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .get_or_insert_with(HashMap::new)
            .insert(
                key.into(),
                Entry {
                    value: value.into(),
                    modified: Utc::now(),
                },
            )
            .map(|old| old.value)
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.read(key, |entry| entry.value.clone())
    }

    /// When `key` was last written.
    pub fn modified(&self, key: &str) -> Option<DateTime<Utc>> {
        self.read(key, |entry| entry.modified)
    }

    pub fn remove(&self, key: &str) -> Option<ConfigValue> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.as_mut()?.remove(key).map(|entry| entry.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read(key, |_| ()).is_some()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.as_ref()?.get(key).map(f)
    }
}

impl Default for ProcessStore {
    fn default() -> Self {
        Self::new()
    }
}
