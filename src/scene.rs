//! Scene-graph queries and world-render batching.
//!
//! The rendering core does not own a scene graph. It consumes four
//! read-only queries: enumerate renderables, enumerate a renderable's
//! (material, mesh-list) pairs, a renderable's transform index, and a
//! camera's target surface. [`batch_by_material`] turns the answers into
//! material-grouped draw batches so per-material device state is applied
//! at most once per tick.
//!
//! This module also carries the two attachable resources that exercise
//! the arena lifecycle: [`Camera`] (a uniform block) and [`MeshBuffers`]
//! (vertex/index ranges).

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use parking_lot::Mutex;

use crate::arena::{ArenaPointer, MemoryArena};
use crate::attach::{AttachState, Attachable};
use crate::target::RenderTarget;

/// Identifier for a material's device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u64);

/// Identifier for a bound shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u64);

/// Depth comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthTest {
    /// Never pass.
    Never,
    /// Pass when closer.
    #[default]
    Less,
    /// Pass when closer or equal.
    LessEqual,
    /// Always pass.
    Always,
}

/// Per-material device state, applied once per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialState {
    /// Material identity; batches are keyed on this.
    pub id: MaterialId,
    /// Shader program to bind.
    pub shader: ShaderId,
    /// Cull back faces.
    pub backface_culling: bool,
    /// Depth comparison.
    pub depth_test: DepthTest,
    /// Write depth.
    pub depth_write: bool,
}

impl MaterialState {
    /// Opaque default state for a material/shader pair.
    pub fn new(id: MaterialId, shader: ShaderId) -> Self {
        Self {
            id,
            shader,
            backface_culling: true,
            depth_test: DepthTest::Less,
            depth_write: true,
        }
    }
}

/// Arena ranges describing one drawable mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshRange {
    /// Vertex data range.
    pub vertices: ArenaPointer,
    /// Index data range.
    pub indices: ArenaPointer,
    /// Number of indices to draw.
    pub index_count: u32,
}

/// An object reachable from a scene graph that can be drawn.
pub trait Renderable: Send + Sync {
    /// The (material, mesh-list) pairs this object draws with.
    fn draw_groups(&self) -> Vec<(MaterialState, Vec<MeshRange>)>;

    /// Index of this object's slot in the shared transform buffer.
    fn transform_index(&self) -> u32;
}

/// Read-only view of a scene graph.
pub trait SceneSource: Send + Sync {
    /// All renderable objects, in scene order.
    fn renderables(&self) -> Vec<Arc<dyn Renderable>>;
}

/// Read-only view of a camera.
pub trait CameraSource: Send + Sync {
    /// The surface this camera renders to.
    fn target(&self) -> RenderTarget;
}

/// Draws sharing one material state.
#[derive(Debug, Clone)]
pub struct MaterialBatch {
    /// State to apply before the draws.
    pub material: MaterialState,
    /// (mesh, transform index) per object, in scene order.
    pub draws: Vec<(MeshRange, u32)>,
}

/// Group renderables by material, in order of first appearance.
///
/// Per-material GPU state (culling, depth mode, shader) is then set at
/// most once per tick per material; per-object differences reduce to the
/// transform index carried with each draw.
pub fn batch_by_material(renderables: &[Arc<dyn Renderable>]) -> Vec<MaterialBatch> {
    let mut batches: Vec<MaterialBatch> = Vec::new();

    for renderable in renderables {
        let transform_index = renderable.transform_index();
        for (material, meshes) in renderable.draw_groups() {
            let draws = meshes.into_iter().map(|m| (m, transform_index));
            match batches.iter_mut().find(|b| b.material.id == material.id) {
                Some(batch) => batch.draws.extend(draws),
                None => batches.push(MaterialBatch {
                    material,
                    draws: draws.collect(),
                }),
            }
        }
    }

    batches
}

/// Camera uniform block layout: view then projection.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CameraUniforms {
    view: Mat4,
    projection: Mat4,
}

/// A camera with an arena-backed uniform block.
///
/// Attaching allocates the block; a failed allocation degrades this one
/// camera (updates become no-ops) without affecting the pipeline.
/// Detaching releases the block exactly once.
pub struct Camera {
    arena: Arc<MemoryArena>,
    target: RenderTarget,
    state: AttachState,
    block: Mutex<ArenaPointer>,
    uniforms: Mutex<CameraUniforms>,
}

impl Camera {
    /// Size of the uniform block in bytes (two 4x4 matrices).
    pub const UNIFORM_BLOCK_SIZE: u64 = std::mem::size_of::<CameraUniforms>() as u64;

    /// Create a camera drawing to `target`, allocating from `arena`.
    pub fn new(arena: Arc<MemoryArena>, target: RenderTarget) -> Self {
        Self {
            arena,
            target,
            state: AttachState::new(),
            block: Mutex::new(ArenaPointer::NULL),
            uniforms: Mutex::new(CameraUniforms {
                view: Mat4::IDENTITY,
                projection: Mat4::IDENTITY,
            }),
        }
    }

    /// Set the view and projection matrices. Uploaded on the next update.
    pub fn set_matrices(&self, view: Mat4, projection: Mat4) {
        *self.uniforms.lock() = CameraUniforms { view, projection };
    }

    /// The camera's uniform block range; null while detached or degraded.
    pub fn uniform_block(&self) -> ArenaPointer {
        *self.block.lock()
    }
}

impl Attachable for Camera {
    fn attach(&self) -> bool {
        self.state.try_attach(|| {
            let ptr = self.arena.allocate(Self::UNIFORM_BLOCK_SIZE);
            if ptr.is_null() {
                log::error!("Camera: uniform block allocation failed, camera is degraded");
            }
            *self.block.lock() = ptr;
            true
        })
    }

    fn detach(&self) -> bool {
        self.state.try_detach(|| {
            let mut block = self.block.lock();
            if !block.is_null() {
                self.arena.release(*block);
                *block = ArenaPointer::NULL;
            }
        })
    }

    fn update(&self) {
        self.state.if_attached(|| {
            let block = *self.block.lock();
            if block.is_null() {
                return;
            }
            let uniforms = *self.uniforms.lock();
            self.arena.update(block, bytemuck::bytes_of(&uniforms));
        });
    }
}

impl CameraSource for Camera {
    fn target(&self) -> RenderTarget {
        self.target.clone()
    }
}

// Ensure Camera is Send + Sync
static_assertions::assert_impl_all!(Camera: Send, Sync);

/// Vertex and index ranges for one mesh, allocated on attach.
pub struct MeshBuffers {
    vertex_arena: Arc<MemoryArena>,
    index_arena: Arc<MemoryArena>,
    vertex_size: u64,
    index_size: u64,
    index_count: u32,
    state: AttachState,
    ranges: Mutex<(ArenaPointer, ArenaPointer)>,
}

impl MeshBuffers {
    /// Create mesh buffers of fixed byte sizes.
    pub fn new(
        vertex_arena: Arc<MemoryArena>,
        index_arena: Arc<MemoryArena>,
        vertex_size: u64,
        index_size: u64,
        index_count: u32,
    ) -> Self {
        Self {
            vertex_arena,
            index_arena,
            vertex_size,
            index_size,
            index_count,
            state: AttachState::new(),
            ranges: Mutex::new((ArenaPointer::NULL, ArenaPointer::NULL)),
        }
    }

    /// Upload vertex and index bytes. No-op while detached or degraded.
    ///
    /// The range lock is held across both writes; a concurrent detach
    /// cannot release the ranges mid-upload, so the bytes never land in
    /// a range a later allocation now owns.
    pub fn upload(&self, vertex_data: &[u8], index_data: &[u8]) -> bool {
        let ranges = self.ranges.lock();
        let (vertices, indices) = *ranges;
        if vertices.is_null() || indices.is_null() {
            return false;
        }
        self.vertex_arena.update(vertices, vertex_data)
            && self.index_arena.update(indices, index_data)
    }

    /// The mesh's arena ranges, for draw emission.
    pub fn mesh_range(&self) -> MeshRange {
        let (vertices, indices) = *self.ranges.lock();
        MeshRange {
            vertices,
            indices,
            index_count: self.index_count,
        }
    }
}

impl Attachable for MeshBuffers {
    fn attach(&self) -> bool {
        self.state.try_attach(|| {
            let vertices = self.vertex_arena.allocate(self.vertex_size);
            let indices = self.index_arena.allocate(self.index_size);
            if vertices.is_null() || indices.is_null() {
                // Partial allocation is rolled back; the mesh stays degraded.
                log::error!("MeshBuffers: range allocation failed, mesh is degraded");
                if !vertices.is_null() {
                    self.vertex_arena.release(vertices);
                }
                if !indices.is_null() {
                    self.index_arena.release(indices);
                }
                *self.ranges.lock() = (ArenaPointer::NULL, ArenaPointer::NULL);
            } else {
                *self.ranges.lock() = (vertices, indices);
            }
            true
        })
    }

    fn detach(&self) -> bool {
        self.state.try_detach(|| {
            let mut ranges = self.ranges.lock();
            let (vertices, indices) = *ranges;
            if !vertices.is_null() {
                self.vertex_arena.release(vertices);
            }
            if !indices.is_null() {
                self.index_arena.release(indices);
            }
            *ranges = (ArenaPointer::NULL, ArenaPointer::NULL);
        })
    }

    fn update(&self) {}
}

// Ensure MeshBuffers is Send + Sync
static_assertions::assert_impl_all!(MeshBuffers: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{ArenaDescriptor, ArenaUsage};
    use crate::backend::NullBackend;
    use crate::target::TargetKind;

    fn test_arena(size: u64) -> Arc<MemoryArena> {
        Arc::new(
            MemoryArena::new(
                &ArenaDescriptor::new(size, ArenaUsage::UNIFORM).with_resize(size == 0),
                Arc::new(NullBackend::new()),
            )
            .unwrap(),
        )
    }

    struct FixedRenderable {
        groups: Vec<(MaterialState, Vec<MeshRange>)>,
        transform_index: u32,
    }

    impl Renderable for FixedRenderable {
        fn draw_groups(&self) -> Vec<(MaterialState, Vec<MeshRange>)> {
            self.groups.clone()
        }
        fn transform_index(&self) -> u32 {
            self.transform_index
        }
    }

    fn mesh(offset: u64) -> MeshRange {
        MeshRange {
            vertices: ArenaPointer::new(offset, 64),
            indices: ArenaPointer::new(offset + 64, 16),
            index_count: 6,
        }
    }

    fn renderable(material: u64, transform_index: u32, mesh_offset: u64) -> Arc<dyn Renderable> {
        Arc::new(FixedRenderable {
            groups: vec![(
                MaterialState::new(MaterialId(material), ShaderId(material)),
                vec![mesh(mesh_offset)],
            )],
            transform_index,
        })
    }

    #[test]
    fn test_batching_groups_by_material() {
        let renderables = vec![
            renderable(1, 0, 0),
            renderable(2, 1, 128),
            renderable(1, 2, 256),
            renderable(2, 3, 384),
        ];

        let batches = batch_by_material(&renderables);
        assert_eq!(batches.len(), 2);

        // First-appearance order.
        assert_eq!(batches[0].material.id, MaterialId(1));
        assert_eq!(batches[1].material.id, MaterialId(2));

        // Scene order preserved within a batch.
        let indices: Vec<u32> = batches[0].draws.iter().map(|(_, i)| *i).collect();
        assert_eq!(indices, vec![0, 2]);
        let indices: Vec<u32> = batches[1].draws.iter().map(|(_, i)| *i).collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn test_batching_multi_group_renderable() {
        let multi = Arc::new(FixedRenderable {
            groups: vec![
                (
                    MaterialState::new(MaterialId(1), ShaderId(1)),
                    vec![mesh(0), mesh(128)],
                ),
                (MaterialState::new(MaterialId(2), ShaderId(2)), vec![mesh(256)]),
            ],
            transform_index: 5,
        }) as Arc<dyn Renderable>;

        let batches = batch_by_material(&[multi]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].draws.len(), 2);
        assert_eq!(batches[1].draws.len(), 1);
        assert!(batches[0].draws.iter().all(|(_, i)| *i == 5));
    }

    #[test]
    fn test_camera_attach_allocates_and_detach_releases() {
        let arena = test_arena(256);
        let target = RenderTarget::new(0, TargetKind::Window, 800, 600);
        let camera = Camera::new(arena.clone(), target);

        assert!(camera.uniform_block().is_null());
        assert!(camera.attach());
        let block = camera.uniform_block();
        assert_eq!(block.size, Camera::UNIFORM_BLOCK_SIZE);

        assert!(camera.detach());
        assert!(camera.uniform_block().is_null());
        // The block is free again.
        assert_eq!(arena.free_regions(), vec![ArenaPointer::new(0, 256)]);
    }

    #[test]
    fn test_camera_update_writes_uniforms() {
        let arena = test_arena(256);
        let target = RenderTarget::new(0, TargetKind::Window, 800, 600);
        let camera = Camera::new(arena.clone(), target);
        camera.attach();

        let view = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        camera.set_matrices(view, Mat4::IDENTITY);
        camera.update();

        let bytes = arena.read(camera.uniform_block()).unwrap();
        let view_back: Mat4 = bytemuck::pod_read_unaligned(&bytes[..64]);
        assert_eq!(view_back, view);

        camera.detach();
    }

    #[test]
    fn test_camera_degrades_on_exhaustion() {
        // Fixed arena too small for a uniform block.
        let arena = test_arena(64);
        let target = RenderTarget::new(0, TargetKind::Window, 800, 600);
        let camera = Camera::new(arena, target);

        assert!(camera.attach()); // attaches, but degraded
        assert!(camera.uniform_block().is_null());
        camera.update(); // must not panic
        assert!(camera.detach());
    }

    #[test]
    fn test_camera_double_attach_noop() {
        let arena = test_arena(256);
        let target = RenderTarget::new(0, TargetKind::Window, 800, 600);
        let camera = Camera::new(arena, target);

        assert!(camera.attach());
        let block = camera.uniform_block();
        assert!(!camera.attach());
        assert_eq!(camera.uniform_block(), block);
        camera.detach();
        assert!(!camera.detach());
    }

    #[test]
    fn test_mesh_buffers_lifecycle() {
        let vertex_arena = test_arena(0);
        let index_arena = test_arena(0);
        let mesh = MeshBuffers::new(vertex_arena.clone(), index_arena, 96, 24, 12);

        assert!(mesh.attach());
        let range = mesh.mesh_range();
        assert_eq!(range.vertices.size, 96);
        assert_eq!(range.indices.size, 24);
        assert_eq!(range.index_count, 12);

        assert!(mesh.upload(&[1u8; 96], &[2u8; 24]));
        assert_eq!(
            vertex_arena.read(range.vertices),
            Some(vec![1u8; 96])
        );

        assert!(mesh.detach());
        assert!(mesh.mesh_range().vertices.is_null());
        assert!(!mesh.upload(&[1u8; 96], &[2u8; 24]));
    }

    #[test]
    fn test_mesh_buffers_upload_racing_detach_never_goes_stale() {
        let vertex_arena = test_arena(0);
        let index_arena = test_arena(0);
        let mesh = Arc::new(MeshBuffers::new(
            vertex_arena.clone(),
            index_arena,
            64,
            16,
            8,
        ));
        assert!(mesh.attach());

        let uploader = {
            let mesh = mesh.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    mesh.upload(&[0xFF; 64], &[0xFF; 16]);
                }
            })
        };

        std::thread::sleep(std::time::Duration::from_micros(200));
        assert!(mesh.detach());

        // The freed vertex range goes to a new owner; stale uploads must
        // not be able to clobber it.
        let owner = vertex_arena.allocate(64);
        assert_eq!(owner, ArenaPointer::new(0, 64));
        assert!(vertex_arena.update(owner, &[0u8; 64]));

        uploader.join().unwrap();
        assert_eq!(vertex_arena.read(owner), Some(vec![0u8; 64]));
        assert!(!mesh.upload(&[0xFF; 64], &[0xFF; 16]));
        vertex_arena.release(owner);
    }

    #[test]
    fn test_mesh_buffers_partial_failure_rolls_back() {
        let vertex_arena = test_arena(128); // fits
        let index_arena = test_arena(8); // too small, fixed size
        let mesh = MeshBuffers::new(vertex_arena.clone(), index_arena, 96, 24, 12);

        assert!(mesh.attach()); // degraded
        assert!(mesh.mesh_range().vertices.is_null());
        // The vertex range was rolled back.
        assert_eq!(vertex_arena.free_regions(), vec![ArenaPointer::new(0, 128)]);
        mesh.detach();
    }
}
