//! Per-sensor sample buffers for one aggregation window, reduced by median.

use std::collections::BTreeMap;

/// Median of `values`; the mean of the two middle values for even lengths.
/// `None` for an empty slice.
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Per-sensor medians of one aggregation window.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Medians {
    pub moisture: BTreeMap<String, f32>,
    pub temperature: BTreeMap<String, f32>,
}

/// Readings keyed by sensor name, accumulated between aggregations.
#[derive(Debug, Default)]
pub struct SampleBuffers {
    buffers: BTreeMap<String, Vec<f32>>,
}

impl SampleBuffers {
    /// Pre-allocate a buffer of `capacity` for every sensor name.
    pub fn with_names<'a>(names: impl IntoIterator<Item = &'a str>, capacity: usize) -> Self {
        let buffers = names
            .into_iter()
            .map(|n| (n.to_string(), Vec::with_capacity(capacity)))
            .collect();
        Self { buffers }
    }

    pub fn push(&mut self, name: &str, value: f32) {
        match self.buffers.get_mut(name) {
            Some(buf) => buf.push(value),
            None => {
                self.buffers.insert(name.to_string(), vec![value]);
            }
        }
    }

    /// Median of every non-empty buffer.
    pub fn medians(&self) -> BTreeMap<String, f32> {
        self.buffers
            .iter()
            .filter_map(|(name, buf)| median(buf).map(|m| (name.clone(), m)))
            .collect()
    }

    /// Empty every buffer, keeping its allocation for the next window.
    pub fn clear(&mut self) {
        for buf in self.buffers.values_mut() {
            buf.clear();
        }
    }

    #[cfg(test)]
    pub fn samples(&self, name: &str) -> &[f32] {
        self.buffers.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ===========================================================================
// Tests
// ===========================================================================
