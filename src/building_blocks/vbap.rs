//! Vector-base amplitude panning over a triangulated set of directions.
//!
//! Used twice: to re-pan the virtual loudspeakers of the AllRAD decoder onto
//! the real layout, and to find the three measured HRIR directions (and their
//! interpolation weights) for any point of a regular azimuth/elevation grid.

use crate::error::{AmbiDecError, Result};

/// tolerance for "point lies outside of this face"
const HULL_EPS: f64 = 1e-9;

/// gains slightly below zero still count as inside a triangle
const GAIN_EPS: f64 = 1e-6;

/// unit vector from azimuth/elevation in degrees
#[inline(always)]
pub fn unit_vec_deg(azi_deg: f64, elev_deg: f64) -> [f64; 3] {
    let (azi, elev) = (azi_deg.to_radians(), elev_deg.to_radians());
    [elev.cos() * azi.cos(), elev.cos() * azi.sin(), elev.sin()]
}

#[inline(always)]
fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline(always)]
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline(always)]
fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(a: [f64; 3]) -> [f64; 3] {
    let len = dot(a, a).sqrt();
    if len > 0.0 {
        [a[0] / len, a[1] / len, a[2] / len]
    } else {
        a
    }
}

/// rows of the 3x3 matrix are the three vertices of a face
fn invert3(m: [[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);

    if det.abs() < 1e-9 {
        return None;
    }

    let inv_det = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

#[derive(Clone, Copy, Debug)]
struct HullFace {
    v: [usize; 3],
    normal: [f64; 3],
}

impl HullFace {
    fn new(v: [usize; 3], points: &[[f64; 3]]) -> Self {
        let normal = normalize(cross(
            sub(points[v[1]], points[v[0]]),
            sub(points[v[2]], points[v[0]]),
        ));
        HullFace { v, normal }
    }

    fn distance(&self, p: [f64; 3], points: &[[f64; 3]]) -> f64 {
        dot(self.normal, sub(p, points[self.v[0]]))
    }
}

/// incremental convex hull, faces oriented outwards
fn convex_hull(points: &[[f64; 3]]) -> Result<Vec<[usize; 3]>> {
    let n = points.len();
    if n < 4 {
        return Err(AmbiDecError::Triangulation(format!(
            "need at least 4 directions, got {n}"
        )));
    }

    // initial tetrahedron, from extreme-ish points
    let i0 = 0;
    let i1 = (1..n)
        .max_by(|a, b| {
            let da = dot(sub(points[*a], points[i0]), sub(points[*a], points[i0]));
            let db = dot(sub(points[*b], points[i0]), sub(points[*b], points[i0]));
            da.total_cmp(&db)
        })
        .unwrap_or(1);

    let line = normalize(sub(points[i1], points[i0]));
    let line_dist = |i: usize| {
        let d = sub(points[i], points[i0]);
        let c = cross(d, line);
        dot(c, c)
    };
    let i2 = (0..n)
        .max_by(|a, b| line_dist(*a).total_cmp(&line_dist(*b)))
        .unwrap_or(2);
    if line_dist(i2) < HULL_EPS {
        return Err(AmbiDecError::Triangulation(
            "all directions are collinear".to_string(),
        ));
    }

    let plane = HullFace::new([i0, i1, i2], points);
    let i3 = (0..n)
        .max_by(|a, b| {
            plane
                .distance(points[*a], points)
                .abs()
                .total_cmp(&plane.distance(points[*b], points).abs())
        })
        .unwrap_or(3);
    if plane.distance(points[i3], points).abs() < HULL_EPS {
        return Err(AmbiDecError::Triangulation(
            "all directions are coplanar".to_string(),
        ));
    }

    let centroid = {
        let mut c = [0.0; 3];
        for i in [i0, i1, i2, i3] {
            for k in 0..3 {
                c[k] += points[i][k] / 4.0;
            }
        }
        c
    };

    let mut faces: Vec<HullFace> = Vec::new();
    for tri in [[i0, i1, i2], [i0, i1, i3], [i0, i2, i3], [i1, i2, i3]] {
        let mut face = HullFace::new(tri, points);
        if face.distance(centroid, points) > 0.0 {
            face = HullFace::new([tri[0], tri[2], tri[1]], points);
        }
        faces.push(face);
    }

    let mut visible_edges: Vec<(usize, usize)> = Vec::new();

    for p in 0..n {
        if p == i0 || p == i1 || p == i2 || p == i3 {
            continue;
        }

        visible_edges.clear();
        let mut any_visible = false;
        faces.retain(|face| {
            if face.distance(points[p], points) > HULL_EPS {
                any_visible = true;
                visible_edges.push((face.v[0], face.v[1]));
                visible_edges.push((face.v[1], face.v[2]));
                visible_edges.push((face.v[2], face.v[0]));
                false
            } else {
                true
            }
        });

        // inside the hull, or a duplicate direction
        if !any_visible {
            continue;
        }

        // edges that are shared by two visible faces are interior
        for &(a, b) in visible_edges.iter() {
            if !visible_edges.contains(&(b, a)) {
                faces.push(HullFace::new([a, b, p], points));
            }
        }
    }

    Ok(faces.into_iter().map(|f| f.v).collect())
}

/**
 * A set of directions, triangulated by their convex hull,
 * with the inverted vertex matrices of all faces ready for panning.
 */
#[derive(Clone, Debug)]
pub struct Triangulation {
    points: Vec<[f64; 3]>,
    faces: Vec<[usize; 3]>,
    inverses: Vec<[[f64; 3]; 3]>,
}

impl Triangulation {
    /// triangulate directions given as [azimuth, elevation] in degrees
    pub fn from_dirs_deg(dirs_deg: &[[f64; 2]]) -> Result<Self> {
        let points: Vec<[f64; 3]> = dirs_deg
            .iter()
            .map(|d| unit_vec_deg(d[0], d[1]))
            .collect();

        let hull = convex_hull(&points)?;

        let mut faces = Vec::with_capacity(hull.len());
        let mut inverses = Vec::with_capacity(hull.len());
        for f in hull {
            if let Some(inv) = invert3([points[f[0]], points[f[1]], points[f[2]]]) {
                faces.push(f);
                inverses.push(inv);
            }
        }

        if faces.is_empty() {
            return Err(AmbiDecError::Triangulation(
                "no usable triangles".to_string(),
            ));
        }

        Ok(Triangulation {
            points,
            faces,
            inverses,
        })
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// Raw (un-normalised) vbap gains for a direction: the vertex indices of
    /// the enclosing triangle and the three gains. If no triangle encloses the
    /// direction (layouts with gaps), the "least outside" triangle is used
    /// and negative gains are clamped to zero.
    pub fn raw_gains(&self, p: [f64; 3]) -> ([usize; 3], [f64; 3]) {
        let mut best = (0, f64::NEG_INFINITY, [0.0; 3]);

        for (idx, inv) in self.inverses.iter().enumerate() {
            let g = [
                p[0] * inv[0][0] + p[1] * inv[1][0] + p[2] * inv[2][0],
                p[0] * inv[0][1] + p[1] * inv[1][1] + p[2] * inv[2][1],
                p[0] * inv[0][2] + p[1] * inv[1][2] + p[2] * inv[2][2],
            ];
            let min_g = g[0].min(g[1]).min(g[2]);
            if min_g >= -GAIN_EPS && g[0] + g[1] + g[2] > 0.0 {
                return (self.faces[idx], g.map(|x| x.max(0.0)));
            }
            if min_g > best.1 && g[0] + g[1] + g[2] > 0.0 {
                best = (idx, min_g, g);
            }
        }

        (self.faces[best.0], best.2.map(|x| x.max(0.0)))
    }

    /// Energy-normalised gains for all points (the classic vbap panning law).
    pub fn energy_gains(&self, p: [f64; 3], out: &mut [f64]) {
        out.iter_mut().for_each(|g| *g = 0.0);
        let (face, g) = self.raw_gains(p);
        let norm = (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]).sqrt();
        if norm > 0.0 {
            for k in 0..3 {
                out[face[k]] += g[k] / norm;
            }
        }
    }
}

/**
 * VBAP gain table over a regular azimuth/elevation grid, compressed to the
 * three non-zero (index, weight) pairs of each grid point. The weights are
 * amplitude-normalised, so they sum up to one, which is what the HRTF
 * interpolation needs.
 */
#[derive(Clone, Debug)]
pub struct CompressedVbapTable {
    azi_res: usize,
    elev_res: usize,
    num_azi: usize,
    num_elev: usize,
    indices: Vec<[usize; 3]>,
    weights: Vec<[f32; 3]>,
}

impl CompressedVbapTable {
    /// Generates the table for the given directions.
    /// Azimuth runs from -180 (inclusive) to 180 (exclusive),
    /// elevation from -90 to 90 (both inclusive).
    pub fn generate(dirs_deg: &[[f64; 2]], azi_res: usize, elev_res: usize) -> Result<Self> {
        let triangulation = Triangulation::from_dirs_deg(dirs_deg)
            .map_err(|e| AmbiDecError::HrtfTableGeneration(e.to_string()))?;

        let num_azi = 360 / azi_res;
        let num_elev = 180 / elev_res + 1;
        let mut indices = Vec::with_capacity(num_azi * num_elev);
        let mut weights = Vec::with_capacity(num_azi * num_elev);

        for e in 0..num_elev {
            let elev = -90.0 + (e * elev_res) as f64;
            for a in 0..num_azi {
                let azi = -180.0 + (a * azi_res) as f64;
                let (face, g) = triangulation.raw_gains(unit_vec_deg(azi, elev));
                let sum = g[0] + g[1] + g[2];
                if sum <= 0.0 {
                    continue;
                }
                indices.push(face);
                weights.push([
                    (g[0] / sum) as f32,
                    (g[1] / sum) as f32,
                    (g[2] / sum) as f32,
                ]);
            }
        }

        // every single grid point needs an entry
        if indices.len() != num_azi * num_elev {
            return Err(AmbiDecError::HrtfTableGeneration(format!(
                "only {} of {} grid points could be panned",
                indices.len(),
                num_azi * num_elev
            )));
        }

        Ok(CompressedVbapTable {
            azi_res,
            elev_res,
            num_azi,
            num_elev,
            indices,
            weights,
        })
    }

    pub fn grid_size(&self) -> usize {
        self.num_azi * self.num_elev
    }

    /// index of the grid point nearest to the given direction
    #[inline(always)]
    pub fn cell_index(&self, azi_deg: f32, elev_deg: f32) -> usize {
        let azi = (azi_deg + 180.0).rem_euclid(360.0);
        let a = (azi / self.azi_res as f32).round() as usize % self.num_azi;
        let elev = elev_deg.clamp(-90.0, 90.0) + 90.0;
        let e = ((elev / self.elev_res as f32).round() as usize).min(self.num_elev - 1);
        e * self.num_azi + a
    }

    #[inline(always)]
    pub fn cell(&self, idx: usize) -> (&[usize; 3], &[f32; 3]) {
        (&self.indices[idx], &self.weights[idx])
    }

    #[inline(always)]
    pub fn lookup(&self, azi_deg: f32, elev_deg: f32) -> (&[usize; 3], &[f32; 3]) {
        self.cell(self.cell_index(azi_deg, elev_deg))
    }
}

// TEST TEST TEST
#[cfg(test)]
mod tests {
    use super::*;

    fn octahedron() -> Vec<[f64; 2]> {
        vec![
            [0.0, 0.0],
            [90.0, 0.0],
            [180.0, 0.0],
            [-90.0, 0.0],
            [0.0, 90.0],
            [0.0, -90.0],
        ]
    }

    #[test]
    fn test_octahedron_hull() {
        let tri = Triangulation::from_dirs_deg(&octahedron()).unwrap();
        assert_eq!(tri.faces().len(), 8);
    }

    #[test]
    fn test_coplanar_directions_fail() {
        let ring: Vec<[f64; 2]> = (0..8).map(|i| [i as f64 * 45.0, 0.0]).collect();
        assert!(Triangulation::from_dirs_deg(&ring).is_err());
        assert!(matches!(
            CompressedVbapTable::generate(&ring, 2, 5),
            Err(AmbiDecError::HrtfTableGeneration(_))
        ));
    }

    #[test]
    fn test_gains_on_vertex() {
        let tri = Triangulation::from_dirs_deg(&octahedron()).unwrap();
        let mut gains = vec![0.0; 6];
        tri.energy_gains(unit_vec_deg(90.0, 0.0), &mut gains);
        assert_approx_eq::assert_approx_eq!(gains[1], 1.0, 0.000001);
        assert_approx_eq::assert_approx_eq!(gains.iter().sum::<f64>(), 1.0, 0.000001);

        // in between two loudspeakers, energy is preserved
        tri.energy_gains(unit_vec_deg(45.0, 0.0), &mut gains);
        assert_approx_eq::assert_approx_eq!(gains[0], gains[1], 0.000001);
        let energy: f64 = gains.iter().map(|g| g * g).sum();
        assert_approx_eq::assert_approx_eq!(energy, 1.0, 0.000001);
    }

    #[test]
    fn test_table_weight_partition() {
        // a slightly irregular set
        let mut dirs = octahedron();
        dirs.push([45.0, 35.0]);
        dirs.push([-135.0, -35.0]);
        dirs.push([130.0, 20.0]);

        let table = CompressedVbapTable::generate(&dirs, 2, 5).unwrap();
        assert_eq!(table.grid_size(), 180 * 37);

        for idx in 0..table.grid_size() {
            let (indices, weights) = table.cell(idx);
            let mut sum = 0.0;
            for k in 0..3 {
                assert!(indices[k] < dirs.len());
                assert!(weights[k] >= 0.0 && weights[k] <= 1.0);
                sum += weights[k];
            }
            assert_approx_eq::assert_approx_eq!(sum, 1.0, 0.0001);
        }
    }

    #[test]
    fn test_lookup_quantisation() {
        let table = CompressedVbapTable::generate(&octahedron(), 2, 5).unwrap();
        assert_eq!(table.cell_index(-180.0, -90.0), 0);
        // 180 wraps around to -180
        assert_eq!(table.cell_index(180.0, -90.0), 0);
        assert_eq!(table.cell_index(179.5, -90.0), 0);
        assert_eq!(table.cell_index(-179.2, -90.0), 0);
        assert_eq!(table.cell_index(-178.9, -90.0), 1);

        let (indices, weights) = table.lookup(90.0, 0.0);
        let pos = indices.iter().position(|i| *i == 1).unwrap();
        assert_approx_eq::assert_approx_eq!(weights[pos], 1.0, 0.0001);
    }
}
