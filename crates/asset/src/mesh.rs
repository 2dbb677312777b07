//! CPU-side mesh representation used by loaders.

use bytemuck::{Pod, Zeroable};

/// Each axis is scaled to `1 / EXTENT_DIVISOR` of unit size around its
/// center, so a normalized mesh fits in a cube with an edge of 0.2.
pub const EXTENT_DIVISOR: f32 = 5.0;

/// Vertex as laid out in the vertex buffer: position + color.
///
/// The OBJ loader stores the unit normal of the vertex in `color`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    /// Stride of one vertex in the vertex buffer, in bytes.
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    /// Byte offset of `color` within a vertex.
    pub const COLOR_OFFSET: u32 = std::mem::offset_of!(Vertex, color) as u32;

    pub fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self { position, color }
    }
}

/// Axis-aligned extrema of a set of vertex positions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn center(&self) -> [f32; 3] {
        std::array::from_fn(|axis| (self.max[axis] + self.min[axis]) / 2.0)
    }

    /// Absolute span per axis.
    pub fn extent(&self) -> [f32; 3] {
        std::array::from_fn(|axis| (self.max[axis] - self.min[axis]).abs())
    }
}

/// Indexed triangle mesh with tightly-packed vertices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Returns `true` if both vertex and index buffers are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.vertices.is_empty() && !self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// First index that does not reference a vertex, if any.
    pub fn out_of_range_index(&self) -> Option<u32> {
        let count = self.vertices.len();
        self.indices.iter().copied().find(|&i| i as usize >= count)
    }

    /// Per-axis extrema of all positions, `None` for a mesh without vertices.
    ///
    /// Comparisons are strict less-than, so the first vertex reaching an
    /// extremum wins and NaN coordinates never replace a finite extremum
    /// found earlier.
    pub fn bounds(&self) -> Option<Bounds> {
        let (first, rest) = self.vertices.split_first()?;
        let mut bounds = Bounds {
            min: first.position,
            max: first.position,
        };
        for v in rest {
            for axis in 0..3 {
                let p = v.position[axis];
                if bounds.max[axis] < p {
                    bounds.max[axis] = p;
                }
                if p < bounds.min[axis] {
                    bounds.min[axis] = p;
                }
            }
        }
        Some(bounds)
    }

    /// Recenters the positions on the origin and divides each axis by
    /// `EXTENT_DIVISOR` times its span. Returns the bounds measured before
    /// the rescale, or `None` when there is nothing to normalize.
    ///
    /// A zero span on an axis (flat mesh) is not guarded and yields
    /// non-finite coordinates on that axis.
    pub fn normalize_into_cube(&mut self) -> Option<Bounds> {
        let bounds = self.bounds()?;
        let center = bounds.center();
        let extent = bounds.extent();
        for v in &mut self.vertices {
            for axis in 0..3 {
                v.position[axis] -= center[axis];
                v.position[axis] /= EXTENT_DIVISOR * extent[axis];
            }
        }
        Some(bounds)
    }
}
