//! Asset loading/parsers.
//! Restricted OBJ mesh loader producing normalized, GPU-ready mesh data.

pub mod error;
pub mod mesh;
pub mod obj;

pub use error::ObjError;
pub use mesh::{Bounds, EXTENT_DIVISOR, MeshData, Vertex};
pub use obj::{
    NumericFieldPolicy, ObjLoadOptions, load_obj_from_path, load_obj_from_reader, load_obj_from_str,
};
