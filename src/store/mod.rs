use dashmap::DashMap;

/// Last emitted reading per device.
///
/// One slot per tracked device, created at startup and never removed.
/// Each slot is guarded by its DashMap shard, so concurrent device tasks can
/// read-modify-write their own entry without a global lock.
pub struct StateStore {
    last_values: DashMap<String, Option<f64>>,
}

impl StateStore {
    /// Create a store with one empty slot per device id.
    ///
    /// Duplicate ids collapse into a single slot.
    pub fn from_devices<I, S>(device_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let last_values = DashMap::new();
        for id in device_ids {
            last_values.insert(id.into(), None);
        }
        Self { last_values }
    }

    /// Number of tracked devices
    pub fn len(&self) -> usize {
        self.last_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_values.is_empty()
    }

    /// Snapshot of tracked device ids (unordered).
    pub fn device_ids(&self) -> Vec<String> {
        self.last_values.iter().map(|e| e.key().clone()).collect()
    }

    /// Last value for `device_id`.
    ///
    /// `None` if the device is untracked, `Some(None)` if it has not
    /// emitted yet.
    pub fn last(&self, device_id: &str) -> Option<Option<f64>> {
        self.last_values.get(device_id).map(|v| *v)
    }

    /// Replace a device's value with `next(previous)` under the slot lock.
    ///
    /// Returns the new value, or `None` if the device is not tracked; untracked
    /// ids are never inserted.
    pub fn advance<F>(&self, device_id: &str, next: F) -> Option<f64>
    where
        F: FnOnce(Option<f64>) -> f64,
    {
        let mut slot = self.last_values.get_mut(device_id)?;
        let value = next(*slot);
        *slot = Some(value);
        Some(value)
    }
}
