//! Hash-keyed caching for layout objects.
//!
//! Descriptor-set and pipeline layouts are small, immutable and requested over and over with
//! identical contents, so the device keys them by a hash of their creation inputs and returns
//! the cached handle on a hit instead of minting a new driver object per request.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Maps a layout-description hash to the handle already created for it.
#[derive(Debug)]
pub struct LayoutCache<H> {
    entries: HashMap<u64, H>,
}

impl<H: Copy> LayoutCache<H> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        LayoutCache {
            entries: HashMap::new(),
        }
    }

    /// Hashes `key` with the std hasher. The hash is stable within a process run, which is
    /// all a driver-object cache needs.
    pub fn hash_key<K: Hash>(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns the cached handle for `hash`, if one exists.
    pub fn get(&self, hash: u64) -> Option<H> {
        self.entries.get(&hash).copied()
    }

    /// Records `handle` as the owner of `hash`.
    pub fn insert(&mut self, hash: u64, handle: H) {
        self.entries.insert(hash, handle);
    }

    /// Evicts the entry for `hash`; destroying a cached layout must drop it from the cache
    /// or later creates would resurrect the dead handle.
    pub fn remove(&mut self, hash: u64) {
        self.entries.remove(&hash);
    }

    /// Number of cached layouts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: Copy> Default for LayoutCache<H> {
    fn default() -> Self {
        LayoutCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::rhi_enums::{DescriptorType, ShaderStageFlags};
    use crate::rhi::rhi_structs::BindGroupLayoutBinding;

    fn binding() -> BindGroupLayoutBinding {
        BindGroupLayoutBinding {
            binding: 0,
            descriptor_type: DescriptorType::ConstantBuffer,
            count: 1,
            stages: ShaderStageFlags::VERTEX,
        }
    }

    #[test]
    fn identical_bindings_hash_identically() {
        let a = vec![binding()];
        let b = vec![binding()];
        assert_eq!(
            LayoutCache::<u32>::hash_key(&a),
            LayoutCache::<u32>::hash_key(&b)
        );
    }

    #[test]
    fn each_field_participates_in_the_hash() {
        let base = vec![binding()];
        let base_hash = LayoutCache::<u32>::hash_key(&base);

        let mut changed_index = binding();
        changed_index.binding = 1;
        let mut changed_type = binding();
        changed_type.descriptor_type = DescriptorType::SampledImage;
        let mut changed_count = binding();
        changed_count.count = 4;
        let mut changed_stages = binding();
        changed_stages.stages = ShaderStageFlags::FRAGMENT;

        for variant in [changed_index, changed_type, changed_count, changed_stages].iter() {
            let hash = LayoutCache::<u32>::hash_key(&vec![variant.clone()]);
            assert_ne!(base_hash, hash, "changing {:?} must change the hash", variant);
        }
    }

    #[test]
    fn hits_return_the_original_handle_until_evicted() {
        let mut cache = LayoutCache::new();
        let hash = LayoutCache::<u32>::hash_key(&vec![binding()]);

        assert_eq!(cache.get(hash), None);
        cache.insert(hash, 7u32);
        assert_eq!(cache.get(hash), Some(7));

        cache.remove(hash);
        assert_eq!(cache.get(hash), None);
    }
}
