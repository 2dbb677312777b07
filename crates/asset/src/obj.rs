//! Restricted OBJ parser: `vn`, `v` and triangular `f` records only.
//!
//! Each `vn` record opens a new vertex carrying the unit normal, and the `v`
//! record that follows fills in its position. Faces are stored with their
//! winding reversed. Records with an unexpected token count are skipped.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use crate::{
    error::ObjError,
    mesh::{MeshData, Vertex},
};

const PROGRESS_INTERVAL: usize = 1000;

/// What to do with a record whose numeric fields do not parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NumericFieldPolicy {
    /// Skip the record and keep loading.
    #[default]
    Lenient,
    /// Abort the load with [`ObjError::InvalidNumber`].
    Strict,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjLoadOptions {
    pub numeric_fields: NumericFieldPolicy,
}

impl ObjLoadOptions {
    pub fn strict() -> Self {
        Self {
            numeric_fields: NumericFieldPolicy::Strict,
        }
    }
}

/// Load an OBJ mesh from a file path.
///
/// A file that cannot be opened is not an error: the caller gets an empty,
/// unnormalized mesh.
pub fn load_obj_from_path(
    path: impl AsRef<Path>,
    options: ObjLoadOptions,
) -> Result<MeshData, ObjError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            log::warn!(
                "Failed to open OBJ file {}: {err}; continuing with an empty mesh",
                path.display()
            );
            return Ok(MeshData::default());
        }
    };
    log::info!("Loading OBJ mesh from {}", path.display());
    load_obj_from_reader(BufReader::new(file), options)
}

/// Load an OBJ mesh from a [`BufRead`] implementation.
pub fn load_obj_from_reader<R: BufRead>(
    reader: R,
    options: ObjLoadOptions,
) -> Result<MeshData, ObjError> {
    parse_obj(reader, options)
}

/// Convenience helper to parse an OBJ string literal.
pub fn load_obj_from_str(contents: &str, options: ObjLoadOptions) -> Result<MeshData, ObjError> {
    parse_obj(io::Cursor::new(contents), options)
}

fn parse_obj<R: BufRead>(mut reader: R, options: ObjLoadOptions) -> Result<MeshData, ObjError> {
    let mut builder = MeshBuilder::new(options);
    let mut raw = Vec::new();
    let mut line_no = 0;

    // Lines are read as bytes: comments may carry any encoding.
    loop {
        raw.clear();
        let read = reader
            .read_until(b'\n', &mut raw)
            .map_err(|source| ObjError::Io {
                line: line_no + 1,
                source,
            })?;
        if read == 0 {
            break;
        }
        line_no += 1;
        if line_no % PROGRESS_INTERVAL == 0 {
            log::debug!("{line_no} lines parsed");
        }

        let line = trim_line_ending(&raw);
        // Any '#' marks the whole line as a comment, wherever it appears.
        if line.contains(&b'#') {
            continue;
        }
        builder.parse_line(&String::from_utf8_lossy(line), line_no)?;
    }

    let mut mesh = builder.finish();
    mesh.normalize_into_cube().ok_or(ObjError::EmptyMesh)?;

    if let Some(index) = mesh.out_of_range_index() {
        log::warn!(
            "OBJ face references vertex {} but only {} vertices were defined",
            index + 1,
            mesh.vertices.len()
        );
    }
    log::info!(
        "OBJ mesh loaded: {} vertices, {} triangles",
        mesh.vertices.len(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Accumulation state for a single load.
struct MeshBuilder {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    options: ObjLoadOptions,
}

impl MeshBuilder {
    fn new(options: ObjLoadOptions) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            options,
        }
    }

    fn finish(self) -> MeshData {
        MeshData::new(self.vertices, self.indices)
    }

    fn parse_line(&mut self, line: &str, line_no: usize) -> Result<(), ObjError> {
        if line.is_empty() {
            return Ok(());
        }

        let tokens = tokenize(line);
        let Some((&tag, fields)) = tokens.split_first() else {
            return Ok(());
        };

        let result = match (tag, fields.len()) {
            ("vn", 3) => self.push_normal(fields, line_no),
            ("v", 3 | 6) => self.set_position(fields, line_no),
            ("f", 3) => self.push_face(fields, line_no),
            ("vn" | "v" | "f", count) => {
                log::trace!("Skipping '{tag}' record with {count} fields on line {line_no}");
                Ok(())
            }
            _ => Ok(()),
        };

        match result {
            Err(ObjError::InvalidNumber { line, token })
                if self.options.numeric_fields == NumericFieldPolicy::Lenient =>
            {
                log::warn!("Skipping OBJ line {line}: invalid numeric field '{token}'");
                Ok(())
            }
            other => other,
        }
    }

    fn push_normal(&mut self, fields: &[&str], line_no: usize) -> Result<(), ObjError> {
        let [nx, ny, nz] = parse_vec3(fields, line_no)?;
        // A zero-length normal divides by zero and yields NaN components.
        let length = (nx * nx + ny * ny + nz * nz).sqrt();
        self.vertices.push(Vertex {
            position: [0.0; 3],
            color: [nx / length, ny / length, nz / length],
        });
        Ok(())
    }

    fn set_position(&mut self, fields: &[&str], line_no: usize) -> Result<(), ObjError> {
        let position = parse_vec3(fields, line_no)?;
        if fields.len() == 6 {
            // Per-vertex color is validated but not applied; the color slot
            // carries the normal.
            parse_vec3(&fields[3..], line_no)?;
        }
        let vertex = self
            .vertices
            .last_mut()
            .ok_or(ObjError::PositionWithoutNormal { line: line_no })?;
        vertex.position = position;
        Ok(())
    }

    fn push_face(&mut self, fields: &[&str], line_no: usize) -> Result<(), ObjError> {
        let v1 = parse_face_ref(fields[0], line_no)?;
        let v2 = parse_face_ref(fields[1], line_no)?;
        let v3 = parse_face_ref(fields[2], line_no)?;
        self.indices.extend([v3, v2, v1]);
        Ok(())
    }
}

/// Splits on single spaces. Runs of spaces produce empty tokens, but a
/// single trailing space does not add one.
fn tokenize(line: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = line.split(' ').collect();
    if tokens.len() > 1 && tokens.last() == Some(&"") {
        tokens.pop();
    }
    tokens
}

fn parse_f32(token: &str, line_no: usize) -> Result<f32, ObjError> {
    token.parse::<f32>().map_err(|_| ObjError::InvalidNumber {
        line: line_no,
        token: token.to_owned(),
    })
}

fn parse_vec3(fields: &[&str], line_no: usize) -> Result<[f32; 3], ObjError> {
    Ok([
        parse_f32(fields[0], line_no)?,
        parse_f32(fields[1], line_no)?,
        parse_f32(fields[2], line_no)?,
    ])
}

/// Parses the position part of a face reference (`i`, `i/j`, `i//k`,
/// `i/j/k`) into a 0-based index.
fn parse_face_ref(token: &str, line_no: usize) -> Result<u32, ObjError> {
    let position = token.split_once('/').map_or(token, |(head, _)| head);
    position
        .parse::<u32>()
        .ok()
        .and_then(|one_based| one_based.checked_sub(1))
        .ok_or_else(|| ObjError::InvalidNumber {
            line: line_no,
            token: token.to_owned(),
        })
}
