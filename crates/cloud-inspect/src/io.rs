//! PLY file loading and writing.
//!
//! Clouds are read tolerantly (any scalar type coerces to the expected kind)
//! and written in ASCII: colorized clouds carry `x y z` floats plus
//! `red green blue` uchar channels, meshes carry vertex positions and
//! triangle index lists. All writes go through a temporary sibling file and
//! an atomic rename, so a failed write never leaves a partial output behind.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{CloudError, CloudResult};
use crate::types::{CloudPoint, Mesh, PointCloud, PointColor};

/// Load a point cloud from a PLY file (ASCII or binary).
///
/// Expects `vertex` elements with `x`, `y`, `z` properties. Color channels
/// (`red`, `green`, `blue`) are read when present; all other properties are
/// ignored.
pub fn load_cloud_ply(path: &Path) -> CloudResult<PointCloud> {
    use ply_rs::parser::Parser;

    check_extension(path)?;

    let file = File::open(path).map_err(|e| CloudError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<ply_rs::ply::DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| CloudError::parse_error(path, format!("PLY parse error: {:?}", e)))?;

    let mut cloud = PointCloud::new();

    if let Some(vertices) = ply.payload.get("vertex") {
        cloud.points.reserve(vertices.len());
        for vertex_element in vertices {
            let x = get_ply_float(vertex_element.get("x"), "x", path)?;
            let y = get_ply_float(vertex_element.get("y"), "y", path)?;
            let z = get_ply_float(vertex_element.get("z"), "z", path)?;

            let mut point = CloudPoint::from_coords(x, y, z);

            if let (Some(r), Some(g), Some(b)) = (
                vertex_element.get("red"),
                vertex_element.get("green"),
                vertex_element.get("blue"),
            ) {
                if let (Ok(r), Ok(g), Ok(b)) =
                    (get_ply_u8(Some(r)), get_ply_u8(Some(g)), get_ply_u8(Some(b)))
                {
                    point.color = PointColor::new(r, g, b);
                }
            }

            cloud.points.push(point);
        }
    }

    if cloud.is_empty() {
        return Err(CloudError::empty_cloud(format!(
            "no vertex elements in {}",
            path.display()
        )));
    }

    debug!("PLY loaded: {} points from {:?}", cloud.len(), path);

    Ok(cloud)
}

/// Write a colorized point cloud as ASCII PLY.
///
/// The vertex element carries `x y z` as floats and `red green blue` as
/// uchar, in that order.
pub fn write_colored_cloud(cloud: &PointCloud, path: &Path) -> CloudResult<()> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;

    let mut vertex_def = ElementDef::new("vertex".to_string());
    vertex_def
        .properties
        .add(PropertyDef::new("x".to_string(), PropertyType::Scalar(ScalarType::Float)));
    vertex_def
        .properties
        .add(PropertyDef::new("y".to_string(), PropertyType::Scalar(ScalarType::Float)));
    vertex_def
        .properties
        .add(PropertyDef::new("z".to_string(), PropertyType::Scalar(ScalarType::Float)));
    vertex_def
        .properties
        .add(PropertyDef::new("red".to_string(), PropertyType::Scalar(ScalarType::UChar)));
    vertex_def
        .properties
        .add(PropertyDef::new("green".to_string(), PropertyType::Scalar(ScalarType::UChar)));
    vertex_def
        .properties
        .add(PropertyDef::new("blue".to_string(), PropertyType::Scalar(ScalarType::UChar)));
    vertex_def.count = cloud.len();
    ply.header.elements.add(vertex_def);

    let mut vertices_payload: Vec<DefaultElement> = Vec::with_capacity(cloud.len());
    for p in &cloud.points {
        let mut element = DefaultElement::new();
        element.insert("x".to_string(), Property::Float(p.position.x as f32));
        element.insert("y".to_string(), Property::Float(p.position.y as f32));
        element.insert("z".to_string(), Property::Float(p.position.z as f32));
        element.insert("red".to_string(), Property::UChar(p.color.r));
        element.insert("green".to_string(), Property::UChar(p.color.g));
        element.insert("blue".to_string(), Property::UChar(p.color.b));
        vertices_payload.push(element);
    }
    ply.payload.insert("vertex".to_string(), vertices_payload);

    write_ply_atomic(ply, path)?;

    info!("Saved {} colorized points to {:?}", cloud.len(), path);

    Ok(())
}

/// Write a triangle mesh as ASCII PLY.
pub fn write_mesh_ply(mesh: &Mesh, path: &Path) -> CloudResult<()> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;

    let mut vertex_def = ElementDef::new("vertex".to_string());
    vertex_def
        .properties
        .add(PropertyDef::new("x".to_string(), PropertyType::Scalar(ScalarType::Float)));
    vertex_def
        .properties
        .add(PropertyDef::new("y".to_string(), PropertyType::Scalar(ScalarType::Float)));
    vertex_def
        .properties
        .add(PropertyDef::new("z".to_string(), PropertyType::Scalar(ScalarType::Float)));
    vertex_def.count = mesh.vertex_count();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.face_count();
    ply.header.elements.add(face_def);

    let mut vertices_payload: Vec<DefaultElement> = Vec::with_capacity(mesh.vertex_count());
    for v in &mesh.vertices {
        let mut element = DefaultElement::new();
        element.insert("x".to_string(), Property::Float(v.position.x as f32));
        element.insert("y".to_string(), Property::Float(v.position.y as f32));
        element.insert("z".to_string(), Property::Float(v.position.z as f32));
        vertices_payload.push(element);
    }
    ply.payload.insert("vertex".to_string(), vertices_payload);

    let mut faces_payload: Vec<DefaultElement> = Vec::with_capacity(mesh.face_count());
    for face in &mesh.faces {
        let mut element = DefaultElement::new();
        element.insert(
            "vertex_indices".to_string(),
            Property::ListInt(vec![face[0] as i32, face[1] as i32, face[2] as i32]),
        );
        faces_payload.push(element);
    }
    ply.payload.insert("face".to_string(), faces_payload);

    write_ply_atomic(ply, path)?;

    info!(
        "Saved {} vertices and {} faces to {:?}",
        mesh.vertex_count(),
        mesh.face_count(),
        path
    );

    Ok(())
}

/// Write a PLY document to a temporary sibling and rename it into place.
fn write_ply_atomic(
    mut ply: ply_rs::ply::Ply<ply_rs::ply::DefaultElement>,
    path: &Path,
) -> CloudResult<()> {
    use ply_rs::writer::Writer;

    ply.make_consistent().map_err(|e| CloudError::IoWrite {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("PLY consistency error: {:?}", e),
        ),
    })?;

    let tmp = temp_sibling(path);

    let result = (|| -> CloudResult<()> {
        let file = File::create(&tmp).map_err(|e| CloudError::io_write(path, e))?;
        let mut writer = BufWriter::new(file);

        let ply_writer = Writer::new();
        ply_writer
            .write_ply(&mut writer, &mut ply)
            .map_err(|e| CloudError::IoWrite {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("PLY write error: {:?}", e),
                ),
            })?;

        writer.flush().map_err(|e| CloudError::io_write(path, e))?;

        std::fs::rename(&tmp, path).map_err(|e| CloudError::io_write(path, e))
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }

    result
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn check_extension(path: &Path) -> CloudResult<()> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("ply") => Ok(()),
        other => Err(CloudError::UnsupportedFormat {
            extension: other.map(String::from),
        }),
    }
}

fn get_ply_float(prop: Option<&ply_rs::ply::Property>, name: &str, path: &Path) -> CloudResult<f64> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::Float(v)) => Ok(*v as f64),
        Some(Property::Double(v)) => Ok(*v),
        Some(Property::Int(v)) => Ok(*v as f64),
        Some(Property::UInt(v)) => Ok(*v as f64),
        Some(Property::Short(v)) => Ok(*v as f64),
        Some(Property::UShort(v)) => Ok(*v as f64),
        Some(Property::Char(v)) => Ok(*v as f64),
        Some(Property::UChar(v)) => Ok(*v as f64),
        _ => Err(CloudError::parse_error(
            path,
            format!("Missing or invalid PLY property: {}", name),
        )),
    }
}

fn get_ply_u8(prop: Option<&ply_rs::ply::Property>) -> CloudResult<u8> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::UChar(v)) => Ok(*v),
        Some(Property::Char(v)) => Ok(*v as u8),
        Some(Property::UShort(v)) => Ok((*v).min(255) as u8),
        Some(Property::Short(v)) => Ok((*v).clamp(0, 255) as u8),
        Some(Property::UInt(v)) => Ok((*v).min(255) as u8),
        Some(Property::Int(v)) => Ok((*v).clamp(0, 255) as u8),
        Some(Property::Float(v)) => Ok((v * 255.0).clamp(0.0, 255.0) as u8),
        Some(Property::Double(v)) => Ok((v * 255.0).clamp(0.0, 255.0) as u8),
        _ => Err(CloudError::empty_cloud("invalid color property")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use nalgebra::Point3;

    fn sample_cloud() -> PointCloud {
        let mut cloud = PointCloud::new();
        cloud.push_coords(0.0, 0.0, 0.0);
        cloud.push_coords(1.0, 2.0, 3.0);
        cloud.points[1].color = PointColor::RED;
        cloud
    }

    #[test]
    fn colored_cloud_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud_colored.ply");

        write_colored_cloud(&sample_cloud(), &path).unwrap();
        let loaded = load_cloud_ply(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.points[0].color, PointColor::BLACK);
        assert_eq!(loaded.points[1].color, PointColor::RED);
        assert!((loaded.points[1].position - Point3::new(1.0, 2.0, 3.0)).norm() < 1e-6);
    }

    #[test]
    fn colored_cloud_header_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud_colored.ply");
        write_colored_cloud(&sample_cloud(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let header: Vec<&str> = text.lines().take_while(|l| *l != "end_header").collect();
        assert_eq!(header[0], "ply");
        assert_eq!(header[1], "format ascii 1.0");
        assert!(header.contains(&"element vertex 2"));
        assert!(header.contains(&"property float x"));
        assert!(header.contains(&"property uchar red"));
        assert!(header.contains(&"property uchar blue"));
    }

    #[test]
    fn mesh_write_and_reload_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.ply");

        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);

        write_mesh_ply(&mesh, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("element vertex 3"));
        assert!(text.contains("element face 1"));
        assert!(text.contains("3 0 1 2"));
    }

    #[test]
    fn missing_file_is_io_read_error() {
        let err = load_cloud_ply(Path::new("/nonexistent/cloud.ply")).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::IoRead);
    }

    #[test]
    fn wrong_extension_is_rejected() {
        let err = load_cloud_ply(Path::new("cloud.obj")).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::UnsupportedFormat);

        let err = load_cloud_ply(Path::new("cloud")).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::UnsupportedFormat);
    }

    #[test]
    fn failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-subdir").join("out.ply");

        let err = write_colored_cloud(&sample_cloud(), &path).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::IoWrite);
        assert!(!path.exists());
    }
}
