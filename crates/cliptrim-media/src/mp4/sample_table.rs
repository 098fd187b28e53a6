//! MP4 sample table resolution.
//!
//! The stbl atom describes samples indirectly through five tables:
//! - stts: decode durations (run-length encoded)
//! - stss: sync sample numbers (keyframes)
//! - stsc: sample-to-chunk runs
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//! - ctts: composition time offsets
//!
//! [`RawSampleTables::resolve`] expands them into one flat entry per
//! sample so cursor positioning and sample reads are plain lookups.

use std::collections::HashSet;

/// A resolved sample with everything needed to read and retime it.
#[derive(Debug, Clone, Copy)]
pub struct SampleEntry {
    /// Sample index (0-based).
    pub index: u32,
    /// File offset where sample data starts.
    pub offset: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Decode timestamp in media timescale ticks.
    pub dts: u64,
    /// Composition time offset relative to dts.
    pub cts_offset: i32,
    /// Whether this sample is a keyframe (sync sample).
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// Get the presentation timestamp in media timescale ticks.
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Flat, resolved sample index for one track.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    /// All resolved samples in decode order.
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    /// Number of samples in the track.
    pub fn len(&self) -> u32 {
        self.samples.len() as u32
    }

    /// Whether the track has no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get sample by index.
    pub fn get(&self, index: u32) -> Option<&SampleEntry> {
        self.samples.get(index as usize)
    }

    /// Find the last sample whose presentation time is at or before `pts`.
    ///
    /// Returns `None` when even the first sample starts after `pts`.
    /// Relies on presentation order being non-decreasing, which
    /// [`SampleTable::is_presentation_ordered`] verifies at parse time.
    pub fn find_sample_at_or_before(&self, pts: u64) -> Option<u32> {
        let n = self.samples.partition_point(|s| s.pts() <= pts);
        if n == 0 {
            None
        } else {
            Some((n - 1) as u32)
        }
    }

    /// Find the keyframe at or before the given sample index.
    pub fn find_keyframe_at_or_before(&self, index: u32) -> Option<u32> {
        let last = self.len().checked_sub(1)?;
        for i in (0..=index.min(last)).rev() {
            if self.samples[i as usize].is_keyframe {
                return Some(i);
            }
        }
        None
    }

    /// Check that presentation timestamps never decrease in decode order.
    ///
    /// Streams with B-frame reordering fail this check; the demuxer
    /// rejects them up front rather than emitting out-of-order samples.
    pub fn is_presentation_ordered(&self) -> bool {
        self.samples.windows(2).all(|w| w[0].pts() <= w[1].pts())
    }
}

/// Raw per-atom table data collected while walking an stbl atom.
#[derive(Debug, Default)]
pub struct RawSampleTables {
    /// stts runs: (sample count, decode delta).
    pub time_to_sample: Vec<(u32, u32)>,
    /// stss sync sample numbers, 1-based; empty means every sample syncs.
    pub sync_samples: Vec<u32>,
    /// stsc runs: (first chunk, samples per chunk, description index).
    pub sample_to_chunk: Vec<(u32, u32, u32)>,
    /// stsz uniform size; 0 means `sample_sizes` carries per-sample sizes.
    pub uniform_size: u32,
    /// stsz per-sample sizes.
    pub sample_sizes: Vec<u32>,
    /// stco/co64 chunk base offsets.
    pub chunk_offsets: Vec<u64>,
    /// ctts runs: (sample count, composition offset).
    pub composition_offsets: Vec<(u32, i32)>,
}

impl RawSampleTables {
    /// Resolve the runs into one flat entry per sample.
    pub fn resolve(self) -> SampleTable {
        let count = self.sample_count();
        if count == 0 {
            return SampleTable::default();
        }

        let chunk_of_sample = self.expand_chunk_runs(count);
        let offsets = self.resolve_offsets(&chunk_of_sample, count);
        let dts_values = self.resolve_decode_times(count);
        let cts_offsets = self.expand_composition_runs(count);

        // stss uses 1-based sample numbers
        let sync_set: HashSet<u32> = self.sync_samples.iter().copied().collect();

        let mut samples = Vec::with_capacity(count as usize);
        for i in 0..count {
            let is_keyframe = if self.sync_samples.is_empty() {
                true
            } else {
                sync_set.contains(&(i + 1))
            };

            samples.push(SampleEntry {
                index: i,
                offset: offsets.get(i as usize).copied().unwrap_or(0),
                size: self.size_of(i as usize),
                dts: dts_values.get(i as usize).copied().unwrap_or(0),
                cts_offset: cts_offsets.get(i as usize).copied().unwrap_or(0),
                is_keyframe,
            });
        }

        SampleTable { samples }
    }

    fn sample_count(&self) -> u32 {
        if self.uniform_size > 0 {
            self.total_stts_samples()
        } else {
            self.sample_sizes.len() as u32
        }
    }

    fn total_stts_samples(&self) -> u32 {
        self.time_to_sample.iter().map(|(count, _)| *count).sum()
    }

    fn size_of(&self, index: usize) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sample_sizes.get(index).copied().unwrap_or(0)
        }
    }

    /// Expand stsc runs into a 0-based chunk index per sample.
    fn expand_chunk_runs(&self, sample_count: u32) -> Vec<u32> {
        if self.sample_to_chunk.is_empty() {
            return vec![0; sample_count as usize];
        }

        let mut result = Vec::with_capacity(sample_count as usize);
        let num_chunks = self.chunk_offsets.len() as u32;

        for i in 0..self.sample_to_chunk.len() {
            let (first_chunk, samples_per_chunk, _) = self.sample_to_chunk[i];
            let next_first = if i + 1 < self.sample_to_chunk.len() {
                self.sample_to_chunk[i + 1].0
            } else {
                num_chunks + 1
            };

            for chunk in first_chunk..next_first {
                if chunk > num_chunks {
                    break;
                }
                for _ in 0..samples_per_chunk {
                    if result.len() as u32 >= sample_count {
                        break;
                    }
                    result.push(chunk - 1);
                }
            }
        }

        // Pad if the runs come up short
        while (result.len() as u32) < sample_count {
            result.push(result.last().copied().unwrap_or(0));
        }

        result
    }

    /// Compute the absolute file offset of each sample from its chunk
    /// base plus the sizes of earlier samples in the same chunk.
    fn resolve_offsets(&self, chunk_of_sample: &[u32], sample_count: u32) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(sample_count as usize);
        let mut within_chunk = vec![0u64; self.chunk_offsets.len()];

        for i in 0..sample_count as usize {
            let chunk_idx = chunk_of_sample.get(i).copied().unwrap_or(0) as usize;
            let chunk_base = self.chunk_offsets.get(chunk_idx).copied().unwrap_or(0);
            let intra = within_chunk.get(chunk_idx).copied().unwrap_or(0);
            offsets.push(chunk_base + intra);

            if chunk_idx < within_chunk.len() {
                within_chunk[chunk_idx] += self.size_of(i) as u64;
            }
        }

        offsets
    }

    /// Walk the stts runs into an absolute decode time per sample.
    fn resolve_decode_times(&self, sample_count: u32) -> Vec<u64> {
        let mut dts_values = Vec::with_capacity(sample_count as usize);
        let mut current_dts = 0u64;
        let mut last_delta = 1u32;

        for (count, delta) in &self.time_to_sample {
            for _ in 0..*count {
                if dts_values.len() as u32 >= sample_count {
                    break;
                }
                dts_values.push(current_dts);
                current_dts += *delta as u64;
                last_delta = *delta;
            }
        }

        // Pad with the last delta if the runs come up short
        while (dts_values.len() as u32) < sample_count {
            dts_values.push(current_dts);
            current_dts += last_delta as u64;
        }

        dts_values
    }

    fn expand_composition_runs(&self, sample_count: u32) -> Vec<i32> {
        if self.composition_offsets.is_empty() {
            return vec![0; sample_count as usize];
        }

        let mut offsets = Vec::with_capacity(sample_count as usize);
        for (count, offset) in &self.composition_offsets {
            for _ in 0..*count {
                if offsets.len() as u32 >= sample_count {
                    break;
                }
                offsets.push(*offset);
            }
        }

        while (offsets.len() as u32) < sample_count {
            offsets.push(0);
        }

        offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_entry_pts() {
        let sample = SampleEntry {
            index: 0,
            offset: 100,
            size: 1000,
            dts: 1000,
            cts_offset: 500,
            is_keyframe: true,
        };
        assert_eq!(sample.pts(), 1500);

        let sample_negative = SampleEntry {
            index: 0,
            offset: 100,
            size: 1000,
            dts: 100,
            cts_offset: -200,
            is_keyframe: true,
        };
        assert_eq!(sample_negative.pts(), 0); // Clamped to 0
    }

    #[test]
    fn test_resolve_basic() {
        let raw = RawSampleTables {
            // 3 samples, each with duration 1000
            time_to_sample: vec![(3, 1000)],
            // Sample 1 is a keyframe (1-based)
            sync_samples: vec![1],
            // All samples in chunk 1
            sample_to_chunk: vec![(1, 3, 1)],
            uniform_size: 0,
            sample_sizes: vec![100, 200, 150],
            chunk_offsets: vec![1000],
            composition_offsets: vec![],
        };

        let table = raw.resolve();
        assert_eq!(table.len(), 3);

        assert_eq!(table.samples[0].offset, 1000);
        assert_eq!(table.samples[0].size, 100);
        assert_eq!(table.samples[0].dts, 0);
        assert!(table.samples[0].is_keyframe);

        assert_eq!(table.samples[1].offset, 1100); // 1000 + 100
        assert_eq!(table.samples[1].dts, 1000);
        assert!(!table.samples[1].is_keyframe);

        assert_eq!(table.samples[2].offset, 1300); // 1000 + 100 + 200
        assert_eq!(table.samples[2].dts, 2000);
    }

    #[test]
    fn test_resolve_multiple_chunks() {
        // Chunks 1-2 hold two samples each, chunk 3 holds one
        let raw = RawSampleTables {
            time_to_sample: vec![(5, 100)],
            sync_samples: vec![],
            sample_to_chunk: vec![(1, 2, 1), (3, 1, 1)],
            uniform_size: 0,
            sample_sizes: vec![10, 20, 30, 40, 50],
            chunk_offsets: vec![1000, 2000, 3000],
            composition_offsets: vec![],
        };

        let table = raw.resolve();
        assert_eq!(table.len(), 5);
        assert_eq!(table.samples[0].offset, 1000);
        assert_eq!(table.samples[1].offset, 1010);
        assert_eq!(table.samples[2].offset, 2000);
        assert_eq!(table.samples[3].offset, 2030);
        assert_eq!(table.samples[4].offset, 3000);

        // No stss: everything is a keyframe
        assert!(table.samples.iter().all(|s| s.is_keyframe));
    }

    #[test]
    fn test_keyframe_search() {
        let raw = RawSampleTables {
            time_to_sample: vec![(10, 1000)],
            sync_samples: vec![1, 5, 9], // Keyframes at 0, 4, 8 (0-indexed)
            sample_to_chunk: vec![(1, 10, 1)],
            uniform_size: 100,
            sample_sizes: vec![],
            chunk_offsets: vec![0],
            composition_offsets: vec![],
        };

        let table = raw.resolve();

        assert_eq!(table.find_keyframe_at_or_before(0), Some(0));
        assert_eq!(table.find_keyframe_at_or_before(3), Some(0));
        assert_eq!(table.find_keyframe_at_or_before(4), Some(4));
        assert_eq!(table.find_keyframe_at_or_before(7), Some(4));
        assert_eq!(table.find_keyframe_at_or_before(8), Some(8));
        assert_eq!(table.find_keyframe_at_or_before(9), Some(8));
    }

    #[test]
    fn test_sample_search_by_pts() {
        let raw = RawSampleTables {
            time_to_sample: vec![(4, 1000)],
            sync_samples: vec![],
            sample_to_chunk: vec![(1, 4, 1)],
            uniform_size: 100,
            sample_sizes: vec![],
            chunk_offsets: vec![0],
            composition_offsets: vec![],
        };

        let table = raw.resolve();

        assert_eq!(table.find_sample_at_or_before(0), Some(0));
        assert_eq!(table.find_sample_at_or_before(999), Some(0));
        assert_eq!(table.find_sample_at_or_before(1000), Some(1));
        assert_eq!(table.find_sample_at_or_before(3500), Some(3));
        assert_eq!(table.find_sample_at_or_before(9999), Some(3));
    }

    #[test]
    fn test_presentation_order_check() {
        let ordered = RawSampleTables {
            time_to_sample: vec![(3, 1000)],
            sample_to_chunk: vec![(1, 3, 1)],
            uniform_size: 100,
            chunk_offsets: vec![0],
            // Constant offset keeps presentation order intact
            composition_offsets: vec![(3, 500)],
            ..Default::default()
        };
        assert!(ordered.resolve().is_presentation_ordered());

        let reordered = RawSampleTables {
            time_to_sample: vec![(3, 1000)],
            sample_to_chunk: vec![(1, 3, 1)],
            uniform_size: 100,
            chunk_offsets: vec![0],
            // I P B pattern: the last sample presents before its predecessor
            composition_offsets: vec![(1, 1000), (1, 2000), (1, 0)],
            ..Default::default()
        };
        assert!(!reordered.resolve().is_presentation_ordered());
    }
}
