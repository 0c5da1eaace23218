//! End-to-end checks of the CPU-side resource model: generational handles, pool reuse,
//! deferred deletion timing, and layout-cache identity, through the crate's public API only.

use borealis::rhi::{
    transition_masks, BindGroupLayoutBinding, BufferHandle, BufferTag, DescriptorType, DeferredQueue, Handle,
    ImageLayout, ImageState, LayoutCache, PipelineStageFlags, ResourceAccessFlags, ResourcePool,
    ShaderStageFlags, FRAMES_IN_FLIGHT,
};

use std::cell::Cell;
use std::rc::Rc;

#[test]
fn generational_reuse_across_destroy() {
    let mut pool: ResourcePool<BufferTag, &str> = ResourcePool::new();

    let a: BufferHandle = pool.insert("a");
    let b: BufferHandle = pool.insert("b");
    let c: BufferHandle = pool.insert("c");
    assert_eq!((a.index(), a.generation()), (0, 1));
    assert_eq!((b.index(), b.generation()), (1, 1));
    assert_eq!((c.index(), c.generation()), (2, 1));

    pool.remove(b).expect("b is live");
    let d: BufferHandle = pool.insert("d");
    assert_eq!((d.index(), d.generation()), (1, 2));

    assert_eq!(pool.get(b), None);
    assert_eq!(pool.get(d), Some(&"d"));
}

#[test]
fn handles_survive_packing() {
    let handle: Handle<BufferTag> = {
        let mut pool: ResourcePool<BufferTag, u32> = ResourcePool::new();
        pool.insert(42)
    };
    assert_eq!(Handle::<BufferTag>::from_u64(handle.as_u64()), handle);
}

/// A resource destroyed on frame N must not be released until the ring has fully cycled,
/// which is when frame N's fence has been waited on.
#[test]
fn deferred_release_waits_for_the_ring() {
    struct Probe(Rc<Cell<bool>>);

    let released = Rc::new(Cell::new(false));
    let mut deferred = DeferredQueue::new(FRAMES_IN_FLIGHT);
    deferred.push(Probe(released.clone()));

    for _ in 0..FRAMES_IN_FLIGHT - 1 {
        for probe in deferred.flush() {
            probe.0.set(true);
        }
        assert!(!released.get(), "released before the destroy frame retired");
    }

    for probe in deferred.flush() {
        probe.0.set(true);
    }
    assert!(released.get(), "never released after the ring cycled");
}

#[test]
fn identical_layouts_share_an_identity() {
    let bindings = |stages| {
        vec![
            BindGroupLayoutBinding {
                binding: 0,
                descriptor_type: DescriptorType::ConstantBuffer,
                count: 1,
                stages,
            },
            BindGroupLayoutBinding {
                binding: 1,
                descriptor_type: DescriptorType::SampledImage,
                count: 1,
                stages,
            },
        ]
    };

    let first = LayoutCache::<u64>::hash_key(&bindings(ShaderStageFlags::FRAGMENT));
    let second = LayoutCache::<u64>::hash_key(&bindings(ShaderStageFlags::FRAGMENT));
    let with_other_stages = LayoutCache::<u64>::hash_key(&bindings(ShaderStageFlags::VERTEX));

    assert_eq!(first, second);
    assert_ne!(first, with_other_stages);

    let mut cache = LayoutCache::new();
    cache.insert(first, 7u64);
    assert_eq!(cache.get(second), Some(7));
    assert_eq!(cache.get(with_other_stages), None);
}

#[test]
fn upload_transition_chain_is_bit_exact() {
    let first = transition_masks(ImageState::Unknown, ImageState::TransferDst).unwrap();
    assert_eq!(first.src_access, ResourceAccessFlags::empty());
    assert_eq!(first.dst_access, ResourceAccessFlags::TRANSFER_WRITE);
    assert_eq!(first.src_stage, PipelineStageFlags::TOP_OF_PIPE);
    assert_eq!(first.dst_stage, PipelineStageFlags::TRANSFER);
    assert_eq!(first.old_layout, ImageLayout::Undefined);
    assert_eq!(first.new_layout, ImageLayout::TransferDst);

    let second = transition_masks(ImageState::TransferDst, ImageState::ShaderResource).unwrap();
    assert_eq!(second.src_access, ResourceAccessFlags::TRANSFER_WRITE);
    assert_eq!(second.dst_access, ResourceAccessFlags::SHADER_READ);
    assert_eq!(second.src_stage, PipelineStageFlags::TRANSFER);
    assert_eq!(second.dst_stage, PipelineStageFlags::FRAGMENT_SHADER);
    assert_eq!(second.old_layout, ImageLayout::TransferDst);
    assert_eq!(second.new_layout, ImageLayout::ShaderReadOnly);

    assert!(transition_masks(ImageState::ShaderResource, ImageState::TransferDst).is_err());
}
