//! End-to-end pipeline tests: synthetic scan -> filters -> normals ->
//! reconstruction -> repair -> decimation -> smoothing -> export.

use nalgebra::{Point3, Vector3};
use scanforge_core::{
    bridge, decimate_mesh, estimate_normals, icp_align, reconstruct_surface,
    remove_statistical_outliers, repair_mesh, taubin_smooth, voxel_downsample, DecimateParams,
    IcpParams, PointCloud, ReconstructionParams, TAUBIN_LAMBDA, TAUBIN_MU,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Dense synthetic scan of a unit sphere with a little deterministic
/// noise and a handful of gross outliers.
fn noisy_sphere_scan() -> PointCloud {
    let mut cloud = PointCloud::new();
    let mut state = 12345u64;
    let mut next = || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as f32 / (u32::MAX >> 1) as f32) * 2.0 - 1.0
    };

    let rings = 40;
    let segs = 60;
    for i in 1..rings {
        let theta = std::f32::consts::PI * i as f32 / rings as f32;
        for j in 0..segs {
            let phi = 2.0 * std::f32::consts::PI * j as f32 / segs as f32;
            let jitter = 1.0 + next() * 0.002;
            cloud.push(Point3::new(
                theta.sin() * phi.cos() * jitter,
                theta.sin() * phi.sin() * jitter,
                theta.cos() * jitter,
            ));
        }
    }

    // Gross outliers well away from the surface.
    cloud.push_coords(5.0, 5.0, 5.0);
    cloud.push_coords(-6.0, 2.0, 4.0);
    cloud.push_coords(0.0, -7.0, 1.0);

    cloud
}

#[test]
fn full_scan_pipeline_produces_watertight_export() {
    init_logging();
    let raw = noisy_sphere_scan();
    let raw_len = raw.len();

    // Downsample, then drop the gross outliers.
    let filtered = voxel_downsample(&raw, 0.05);
    assert!(filtered.len() < raw_len);

    let cleaned = remove_statistical_outliers(&filtered, 8, 1.5);
    assert!(cleaned.len() < filtered.len());
    for p in &cleaned.points {
        assert!(p.coords.norm() < 1.5, "outlier survived: {:?}", p);
    }

    // Oriented normals should point outward on a sphere.
    let normals = estimate_normals(&cleaned, 10);
    let outward = cleaned
        .points
        .iter()
        .zip(normals.iter())
        .filter(|(p, n)| n.dot(&p.coords) > 0.0)
        .count();
    assert!(outward as f32 > cleaned.len() as f32 * 0.95);

    // Reconstruct and repair.
    let mut mesh = reconstruct_surface(&cleaned, &normals, &ReconstructionParams::with_depth(5));
    assert!(!mesh.is_empty());

    repair_mesh(&mut mesh);
    assert!(mesh.is_manifold());
    assert!(mesh.is_watertight());
    assert!(mesh.signed_volume() > 0.0);

    // The repaired sphere has roughly the right volume (4/3 pi ~ 4.19).
    let volume = mesh.signed_volume();
    assert!(
        (3.0..5.5).contains(&volume),
        "sphere volume way off: {}",
        volume
    );

    // Decimate to a quarter of the triangles.
    let target = mesh.face_count() / 4;
    let decimated = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(target));
    assert!(decimated.final_triangles <= target + target / 20 + 1);
    let vcount = decimated.mesh.vertices.len() as u32;
    for face in &decimated.mesh.faces {
        assert!(face.iter().all(|&i| i < vcount));
    }

    // Smooth without collapsing the shape.
    let mut smoothed = decimated.mesh.clone();
    let before = {
        let (min, max) = smoothed.bounds().unwrap();
        (max - min).norm()
    };
    taubin_smooth(&mut smoothed, 5, TAUBIN_LAMBDA, TAUBIN_MU);
    let after = {
        let (min, max) = smoothed.bounds().unwrap();
        (max - min).norm()
    };
    assert!((after - before).abs() / before < 0.1);

    // Export all formats.
    let dir = tempfile::tempdir().unwrap();
    scanforge_core::export_stl_binary(&smoothed, &dir.path().join("scan.stl")).unwrap();
    scanforge_core::export_stl_ascii(&smoothed, &dir.path().join("scan_ascii.stl")).unwrap();
    scanforge_core::export_obj(&smoothed, &dir.path().join("scan.obj")).unwrap();
    scanforge_core::export_ply(&smoothed, &dir.path().join("scan.ply")).unwrap();

    let stl_len = std::fs::metadata(dir.path().join("scan.stl")).unwrap().len();
    assert_eq!(stl_len, 84 + 50 * smoothed.face_count() as u64);
}

#[test]
fn icp_aligns_rigidly_moved_scan() {
    init_logging();
    // A volumetric blob: point-to-point ICP slides tangentially on smooth
    // closed surfaces, so exact pose recovery needs interior structure.
    let mut state = 2024u64;
    let mut next = || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as f32 / (u32::MAX >> 1) as f32) * 2.0 - 1.0
    };
    let mut source = PointCloud::with_capacity(400);
    for _ in 0..400 {
        let x = next() * 1.0;
        let y = next() * 0.5;
        let z = next() * 0.25;
        source.push_coords(x, y, z);
    }

    // Target = source rotated 20 degrees about z and shifted.
    let angle = 20.0f32.to_radians();
    let (sin, cos) = angle.sin_cos();
    let shift = Vector3::new(0.3, -0.1, 0.2);
    let mut target = PointCloud::with_capacity(source.len());
    for p in &source.points {
        target.push(Point3::new(
            cos * p.x - sin * p.y + shift.x,
            sin * p.x + cos * p.y + shift.y,
            p.z + shift.z,
        ));
    }

    let params = IcpParams::default().with_max_iterations(50).with_tolerance(1e-7);
    let result = icp_align(&source, &target, &params);

    assert!(result.fitness > 0.95, "fitness {}", result.fitness);
    assert!(result.rmse < 0.01, "rmse {}", result.rmse);

    for (s, t) in source.points.iter().zip(target.points.iter()) {
        let mapped = result.transform.transform_point(s);
        assert!((mapped - t).norm() < 5e-3);
    }
}

#[test]
fn bridge_pipeline_matches_library_path() {
    init_logging();
    // Flat-array path: filter -> normals -> reconstruct -> repair ->
    // decimate -> export, all through the host boundary.
    let cloud = noisy_sphere_scan();
    let mut flat = Vec::with_capacity(cloud.len() * 3);
    for p in &cloud.points {
        flat.extend_from_slice(&[p.x, p.y, p.z]);
    }

    let filtered = bridge::voxel_filter(&flat, 0.05);
    assert_eq!(filtered.len() % 3, 0);

    let cleaned = bridge::statistical_outlier_removal(&filtered, 8, 1.5);
    assert!(cleaned.len() < filtered.len());

    let oriented = bridge::estimate_normals(&cleaned, 10);
    assert_eq!(oriented.len() / 6, cleaned.len() / 3);

    let blob = bridge::reconstruct(&oriented, 5);
    assert!(blob.len() > 2);
    assert!(blob[0] > 0.0 && blob[1] > 0.0);

    let repaired = bridge::repair(&blob);
    let decimated = bridge::decimate(&repaired, 0.5);
    assert!(decimated[1] <= repaired[1] * 0.5 + 1.0);

    let dir = tempfile::tempdir().unwrap();
    assert!(bridge::export_stl(&decimated, &dir.path().join("b.stl")));
    assert!(bridge::export_obj(&decimated, &dir.path().join("b.obj")));
    assert!(bridge::export_ply(&decimated, &dir.path().join("b.ply")));
}
