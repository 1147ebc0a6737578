//! Mesh file writers: STL (binary and ASCII), OBJ, and binary PLY.
//!
//! Writers only; the host feeds geometry in as flat arrays, so there is
//! no corresponding reader path.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::error::{ScanError, ScanResult};
use crate::types::Mesh;

fn io_write(path: &Path) -> impl Fn(std::io::Error) -> ScanError + '_ {
    move |e| ScanError::IoWrite {
        path: path.to_path_buf(),
        source: e,
    }
}

/// Save a mesh as binary STL.
///
/// Layout: 80-byte header, `u32` triangle count, then 50 bytes per
/// triangle (normal, three vertices, zero attribute count), all
/// little-endian. Facet normals are computed from the winding.
pub fn export_stl_binary(mesh: &Mesh, path: &Path) -> ScanResult<()> {
    info!("exporting binary STL to {:?}", path);

    let file = File::create(path).map_err(io_write(path))?;
    let mut writer = BufWriter::new(file);

    let triangles: Vec<stl_io::Triangle> = mesh
        .faces
        .iter()
        .enumerate()
        .map(|(i, &[a, b, c])| {
            let n = mesh.face_normal(i);
            let v0 = mesh.vertices[a as usize];
            let v1 = mesh.vertices[b as usize];
            let v2 = mesh.vertices[c as usize];
            stl_io::Triangle {
                normal: stl_io::Normal::new([n.x, n.y, n.z]),
                vertices: [
                    stl_io::Vertex::new([v0.x, v0.y, v0.z]),
                    stl_io::Vertex::new([v1.x, v1.y, v1.z]),
                    stl_io::Vertex::new([v2.x, v2.y, v2.z]),
                ],
            }
        })
        .collect();

    stl_io::write_stl(&mut writer, triangles.iter()).map_err(io_write(path))?;
    writer.flush().map_err(io_write(path))?;

    info!("wrote {} triangles to {:?}", mesh.face_count(), path);
    Ok(())
}

/// Save a mesh as ASCII STL.
pub fn export_stl_ascii(mesh: &Mesh, path: &Path) -> ScanResult<()> {
    info!("exporting ASCII STL to {:?}", path);

    let file = File::create(path).map_err(io_write(path))?;
    let mut w = BufWriter::new(file);
    let err = io_write(path);

    writeln!(w, "solid scanforge").map_err(&err)?;
    for (i, &[a, b, c]) in mesh.faces.iter().enumerate() {
        let n = mesh.face_normal(i);
        let v0 = mesh.vertices[a as usize];
        let v1 = mesh.vertices[b as usize];
        let v2 = mesh.vertices[c as usize];

        writeln!(w, "  facet normal {:.6} {:.6} {:.6}", n.x, n.y, n.z).map_err(&err)?;
        writeln!(w, "    outer loop").map_err(&err)?;
        writeln!(w, "      vertex {:.6} {:.6} {:.6}", v0.x, v0.y, v0.z).map_err(&err)?;
        writeln!(w, "      vertex {:.6} {:.6} {:.6}", v1.x, v1.y, v1.z).map_err(&err)?;
        writeln!(w, "      vertex {:.6} {:.6} {:.6}", v2.x, v2.y, v2.z).map_err(&err)?;
        writeln!(w, "    endloop").map_err(&err)?;
        writeln!(w, "  endfacet").map_err(&err)?;
    }
    writeln!(w, "endsolid scanforge").map_err(&err)?;
    w.flush().map_err(&err)?;

    Ok(())
}

/// Save a mesh as OBJ with per-vertex normals.
///
/// Vertex normals are the area-summed face normals; faces reference them
/// as `f a//a b//b c//c` with 1-based indices.
pub fn export_obj(mesh: &Mesh, path: &Path) -> ScanResult<()> {
    info!("exporting OBJ to {:?}", path);

    let file = File::create(path).map_err(io_write(path))?;
    let mut w = BufWriter::new(file);
    let err = io_write(path);

    writeln!(w, "# scanforge OBJ export").map_err(&err)?;
    writeln!(w, "# vertices: {}", mesh.vertex_count()).map_err(&err)?;
    writeln!(w, "# faces: {}", mesh.face_count()).map_err(&err)?;
    writeln!(w).map_err(&err)?;

    for v in &mesh.vertices {
        writeln!(w, "v {:.6} {:.6} {:.6}", v.x, v.y, v.z).map_err(&err)?;
    }

    for n in mesh.vertex_normals() {
        writeln!(w, "vn {:.6} {:.6} {:.6}", n.x, n.y, n.z).map_err(&err)?;
    }

    writeln!(w).map_err(&err)?;

    for &[a, b, c] in &mesh.faces {
        writeln!(
            w,
            "f {}//{} {}//{} {}//{}",
            a + 1,
            a + 1,
            b + 1,
            b + 1,
            c + 1,
            c + 1
        )
        .map_err(&err)?;
    }

    w.flush().map_err(&err)?;
    Ok(())
}

/// Save a mesh as binary little-endian PLY.
///
/// The header declares float x/y/z vertex properties and a
/// `list uchar int vertex_indices` face property; the payload follows as
/// raw little-endian bytes.
pub fn export_ply(mesh: &Mesh, path: &Path) -> ScanResult<()> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };
    use ply_rs::writer::Writer;

    info!("exporting binary PLY to {:?}", path);

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;

    let mut vertex_def = ElementDef::new("vertex".to_string());
    vertex_def.properties.add(PropertyDef::new(
        "x".to_string(),
        PropertyType::Scalar(ScalarType::Float),
    ));
    vertex_def.properties.add(PropertyDef::new(
        "y".to_string(),
        PropertyType::Scalar(ScalarType::Float),
    ));
    vertex_def.properties.add(PropertyDef::new(
        "z".to_string(),
        PropertyType::Scalar(ScalarType::Float),
    ));
    vertex_def.count = mesh.vertices.len();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.faces.len();
    ply.header.elements.add(face_def);

    let mut vertices_payload: Vec<DefaultElement> = Vec::with_capacity(mesh.vertices.len());
    for v in &mesh.vertices {
        let mut element = DefaultElement::new();
        element.insert("x".to_string(), Property::Float(v.x));
        element.insert("y".to_string(), Property::Float(v.y));
        element.insert("z".to_string(), Property::Float(v.z));
        vertices_payload.push(element);
    }
    ply.payload.insert("vertex".to_string(), vertices_payload);

    let mut faces_payload: Vec<DefaultElement> = Vec::with_capacity(mesh.faces.len());
    for face in &mesh.faces {
        let mut element = DefaultElement::new();
        element.insert(
            "vertex_indices".to_string(),
            Property::ListInt(vec![face[0] as i32, face[1] as i32, face[2] as i32]),
        );
        faces_payload.push(element);
    }
    ply.payload.insert("face".to_string(), faces_payload);

    ply.make_consistent().map_err(|e| ScanError::IoWrite {
        path: path.to_path_buf(),
        source: std::io::Error::other(format!("PLY consistency error: {:?}", e)),
    })?;

    let file = File::create(path).map_err(io_write(path))?;
    let mut writer = BufWriter::new(file);
    Writer::new()
        .write_ply(&mut writer, &mut ply)
        .map_err(io_write(path))?;

    info!(
        "wrote {} vertices, {} faces to {:?}",
        mesh.vertex_count(),
        mesh.face_count(),
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn one_triangle() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Point3::new(0.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(1.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);
        mesh
    }

    #[test]
    fn binary_stl_has_exact_size() {
        let mesh = one_triangle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.stl");

        export_stl_binary(&mesh, &path).unwrap();

        // 80-byte header + 4-byte count + 50 bytes per triangle.
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 84 + 50);
    }

    #[test]
    fn binary_stl_triangle_count_field() {
        let mesh = one_triangle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.stl");

        export_stl_binary(&mesh, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]);
        assert_eq!(count, 1);
    }

    #[test]
    fn ascii_stl_structure() {
        let mesh = one_triangle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri_ascii.stl");

        export_stl_ascii(&mesh, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("solid scanforge"));
        assert!(content.trim_end().ends_with("endsolid scanforge"));
        assert_eq!(content.matches("facet normal").count(), 1);
        assert_eq!(content.matches("vertex").count(), 3);
        assert!(content.contains("outer loop"));
    }

    #[test]
    fn obj_indices_are_one_based() {
        let mesh = one_triangle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.obj");

        export_obj(&mesh, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().filter(|l| l.starts_with("v ")).count(), 3);
        assert_eq!(content.lines().filter(|l| l.starts_with("vn ")).count(), 3);
        assert!(content.contains("f 1//1 2//2 3//3"));
    }

    #[test]
    fn ply_header_and_payload() {
        let mesh = one_triangle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.ply");

        export_ply(&mesh, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let marker = bytes
            .windows(10)
            .position(|w| w == b"end_header")
            .expect("header terminator");
        // The terminator line may end in \n or \r\n depending on writer.
        let mut header_end = marker + 10;
        if bytes[header_end] == b'\r' {
            header_end += 1;
        }
        if bytes[header_end] == b'\n' {
            header_end += 1;
        }
        let header = std::str::from_utf8(&bytes[..header_end]).unwrap();

        assert!(header.starts_with("ply"));
        assert!(header.contains("format binary_little_endian 1.0"));
        assert!(header.contains("element vertex 3"));
        assert!(header.contains("property float x"));
        assert!(header.contains("element face 1"));
        assert!(header.contains("property list uchar int vertex_indices"));

        // Payload: 3 vertices * 12 bytes + (1 count byte + 3 * 4 index bytes).
        assert_eq!(bytes.len() - header_end, 36 + 13);

        // Face list count byte is 3.
        assert_eq!(bytes[header_end + 36], 3);
    }

    #[test]
    fn empty_mesh_writes_minimal_files() {
        // An empty mesh is not an error; each writer produces a minimal
        // valid file.
        let mesh = Mesh::new();
        let dir = tempfile::tempdir().unwrap();

        let stl = dir.path().join("empty.stl");
        export_stl_binary(&mesh, &stl).unwrap();
        let bytes = std::fs::read(&stl).unwrap();
        // Header plus a zero triangle count, nothing else.
        assert_eq!(bytes.len(), 84);
        assert_eq!(
            u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]),
            0
        );

        let ascii = dir.path().join("empty_ascii.stl");
        export_stl_ascii(&mesh, &ascii).unwrap();
        let content = std::fs::read_to_string(&ascii).unwrap();
        assert!(content.starts_with("solid scanforge"));
        assert_eq!(content.matches("facet").count(), 0);

        let obj = dir.path().join("empty.obj");
        export_obj(&mesh, &obj).unwrap();
        let content = std::fs::read_to_string(&obj).unwrap();
        assert!(content.contains("# vertices: 0"));
        assert_eq!(content.lines().filter(|l| l.starts_with("v ")).count(), 0);

        let ply = dir.path().join("empty.ply");
        export_ply(&mesh, &ply).unwrap();
        let content = std::fs::read(&ply).unwrap();
        let header = String::from_utf8_lossy(&content);
        assert!(header.contains("element vertex 0"));
        assert!(header.contains("element face 0"));
    }

    #[test]
    fn export_to_invalid_path_fails() {
        let mesh = one_triangle();
        let path = Path::new("/nonexistent-dir/mesh.stl");
        assert!(export_stl_binary(&mesh, path).is_err());
        assert!(export_obj(&mesh, path).is_err());
        assert!(export_ply(&mesh, path).is_err());
    }
}
