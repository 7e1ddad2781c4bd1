use super::*;
use approx::assert_relative_eq;
use nalgebra::Matrix2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn rotation_matrix(angle: f64) -> Matrix2<f64> {
    let cos_a = angle.cos();
    let sin_a = angle.sin();
    Matrix2::new(cos_a, -sin_a, sin_a, cos_a)
}

/// Grid of source points pushed through a rotation + translation
fn rigid_pairs(angle: f64, tx: f64, ty: f64) -> Vec<PointPair> {
    let rot = rotation_matrix(angle);
    let mut pairs = Vec::new();
    for gx in 0..6 {
        for gy in 0..6 {
            // Uneven spacing so no sample is a perfect lattice
            let x = gx as f64 * 37.0 + (gy as f64) * 3.0;
            let y = gy as f64 * 29.0 + (gx as f64) * 2.0;
            let p = rot * Vector2::new(x, y);
            pairs.push(PointPair::new(x, y, p.x + tx, p.y + ty));
        }
    }
    pairs
}

#[test]
fn test_fit_homography_identity() {
    let pairs = rigid_pairs(0.0, 0.0, 0.0);
    let h = fit_homography(&pairs).unwrap();
    assert_relative_eq!(h, Matrix3::identity(), epsilon = 1e-8);
}

#[test]
fn test_fit_homography_exact_four_points() {
    let pairs = vec![
        PointPair::new(0.0, 0.0, 5.0, -3.0),
        PointPair::new(100.0, 0.0, 105.0, -3.0),
        PointPair::new(100.0, 80.0, 105.0, 77.0),
        PointPair::new(0.0, 80.0, 5.0, 77.0),
    ];
    let h = fit_homography(&pairs).unwrap();
    assert_relative_eq!(h[(0, 2)], 5.0, epsilon = 1e-8);
    assert_relative_eq!(h[(1, 2)], -3.0, epsilon = 1e-8);
    assert_relative_eq!(h[(0, 0)], 1.0, epsilon = 1e-8);
    assert_relative_eq!(h[(1, 1)], 1.0, epsilon = 1e-8);
}

#[test]
fn test_fit_homography_rejects_too_few_points() {
    let pairs = rigid_pairs(0.0, 1.0, 1.0);
    let err = fit_homography(&pairs[..3]).unwrap_err();
    assert_eq!(
        err,
        HomographyError::InsufficientPoints {
            required: 4,
            got: 3
        }
    );
}

#[test]
fn test_fit_homography_coincident_points_degenerate() {
    let pairs = vec![PointPair::new(3.0, 3.0, 4.0, 4.0); 6];
    assert_eq!(fit_homography(&pairs), Err(HomographyError::Degenerate));
}

#[test]
fn test_ransac_recovers_translation() {
    let pairs = rigid_pairs(0.0, 12.5, -7.25);
    let fit = estimate_homography_ransac(&pairs, &RansacConfig::default()).unwrap();

    assert_eq!(fit.inlier_count, pairs.len());
    assert_relative_eq!(fit.translation().x, 12.5, epsilon = 1e-6);
    assert_relative_eq!(fit.translation().y, -7.25, epsilon = 1e-6);
    assert_relative_eq!(fit.rotation(), 0.0, epsilon = 1e-9);
    assert!(fit.rms_error < 1e-6);
}

#[test]
fn test_ransac_recovers_rotation() {
    let angle = 3.0_f64.to_radians();
    let pairs = rigid_pairs(angle, -4.0, 9.0);
    let fit = estimate_homography_ransac(&pairs, &RansacConfig::default()).unwrap();

    assert_relative_eq!(fit.rotation(), angle, epsilon = 1e-8);
    assert_relative_eq!(fit.translation().x, -4.0, epsilon = 1e-6);
    assert_relative_eq!(fit.translation().y, 9.0, epsilon = 1e-6);
}

#[test]
fn test_ransac_ignores_outliers() {
    let mut pairs = rigid_pairs(0.0, 20.0, 15.0);
    let clean = pairs.len();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    // 25% gross mismatches
    for _ in 0..clean / 3 {
        let x = rng.random_range(0.0..200.0);
        let y = rng.random_range(0.0..200.0);
        let u = rng.random_range(0.0..200.0);
        let v = rng.random_range(0.0..200.0);
        pairs.push(PointPair::new(x, y, u, v));
    }

    let fit = estimate_homography_ransac(&pairs, &RansacConfig::default()).unwrap();

    assert!(fit.inlier_count >= clean);
    assert!(fit.inliers[..clean].iter().all(|&i| i));
    assert_relative_eq!(fit.translation().x, 20.0, epsilon = 0.5);
    assert_relative_eq!(fit.translation().y, 15.0, epsilon = 0.5);
}

#[test]
fn test_ransac_is_reproducible_for_a_seed() {
    let mut pairs = rigid_pairs(0.01, 2.0, 3.0);
    pairs.push(PointPair::new(10.0, 10.0, 180.0, -40.0));
    pairs.push(PointPair::new(50.0, 20.0, -90.0, 60.0));

    let config = RansacConfig::default();
    let a = estimate_homography_ransac(&pairs, &config).unwrap();
    let b = estimate_homography_ransac(&pairs, &config).unwrap();

    assert_eq!(a.iterations, b.iterations);
    assert_eq!(a.inliers, b.inliers);
    assert_relative_eq!(a.matrix, b.matrix);
}

#[test]
fn test_ransac_rejects_too_few_pairs() {
    let pairs = rigid_pairs(0.0, 0.0, 0.0);
    let err = estimate_homography_ransac(&pairs[..2], &RansacConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        HomographyError::InsufficientPoints { got: 2, .. }
    ));
}
