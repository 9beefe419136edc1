/// loudspeaker array presets
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoudspeakerArrayPreset {
    FivePointX,
    SevenPointX,
    EightRing,
    TwelveRing,
    Cube,
    Icosahedron,
    Dodecahedron,
    TDesign24,
    TwentyTwoPointTwo, // without the LFE channels
}

// spherical 7-design, rotated to have a loudspeaker right at (90, 0)
const T_DESIGN_24: [[f64; 2]; 24] = [
    [29.0247, 68.4111],
    [176.5146, 68.4052],
    [-45.7414, 47.4498],
    [-108.7293, 47.4466],
    [97.5435, 40.8053],
    [145.6241, 27.5126],
    [-164.1175, 25.1649],
    [46.7855, 24.9248],
    [1.3909, 22.8065],
    [-81.2381, 9.1695],
    [-126.2456, 5.2515],
    [-40.0753, 2.9240],
    [90.0, 0.0],
    [130.1339, -11.0431],
    [175.8423, -11.3097],
    [47.7221, -16.4415],
    [4.2987, -18.4722],
    [-92.1492, -30.8609],
    [-145.1764, -31.9926],
    [-42.0742, -38.4111],
    [89.1672, -44.7886],
    [152.6118, -51.9672],
    [21.9726, -61.5022],
    [-114.8857, -74.1545],
];

const CUBE_ELEV: f64 = 35.2644;
const ICOSAHEDRON_ELEV: f64 = 26.5651;
const DODECAHEDRON_ELEV_HIGH: f64 = 52.6226;
const DODECAHEDRON_ELEV_LOW: f64 = 10.8123;

fn ring(azimuths: &[f64], elev: f64) -> impl Iterator<Item = [f64; 2]> + '_ {
    azimuths.iter().map(move |a| [*a, elev])
}

impl LoudspeakerArrayPreset {
    /// loudspeaker directions as [azimuth, elevation] in degrees
    pub fn dirs_deg(self) -> Vec<[f64; 2]> {
        match self {
            LoudspeakerArrayPreset::FivePointX => {
                ring(&[0.0, 30.0, -30.0, 110.0, -110.0], 0.0).collect()
            }
            LoudspeakerArrayPreset::SevenPointX => {
                ring(&[0.0, 30.0, -30.0, 90.0, -90.0, 150.0, -150.0], 0.0).collect()
            }
            LoudspeakerArrayPreset::EightRing => (0..8)
                .map(|i| [wrap_azi(45.0 * i as f64), 0.0])
                .collect(),
            LoudspeakerArrayPreset::TwelveRing => (0..12)
                .map(|i| [wrap_azi(30.0 * i as f64), 0.0])
                .collect(),
            LoudspeakerArrayPreset::Cube => {
                let azis = [45.0, -45.0, 135.0, -135.0];
                ring(&azis, CUBE_ELEV)
                    .chain(ring(&azis, -CUBE_ELEV))
                    .collect()
            }
            LoudspeakerArrayPreset::Icosahedron => {
                let mut dirs = vec![[0.0, 90.0]];
                dirs.extend(ring(&[0.0, 72.0, 144.0, -144.0, -72.0], ICOSAHEDRON_ELEV));
                dirs.extend(ring(&[36.0, 108.0, 180.0, -108.0, -36.0], -ICOSAHEDRON_ELEV));
                dirs.push([0.0, -90.0]);
                dirs
            }
            LoudspeakerArrayPreset::Dodecahedron => {
                let odd = [36.0, 108.0, 180.0, -108.0, -36.0];
                let even = [0.0, 72.0, 144.0, -144.0, -72.0];
                ring(&odd, DODECAHEDRON_ELEV_HIGH)
                    .chain(ring(&odd, DODECAHEDRON_ELEV_LOW))
                    .chain(ring(&even, -DODECAHEDRON_ELEV_LOW))
                    .chain(ring(&even, -DODECAHEDRON_ELEV_HIGH))
                    .collect()
            }
            LoudspeakerArrayPreset::TDesign24 => T_DESIGN_24.to_vec(),
            LoudspeakerArrayPreset::TwentyTwoPointTwo => {
                let mut dirs: Vec<[f64; 2]> = ring(
                    &[0.0, 30.0, -30.0, 60.0, -60.0, 90.0, -90.0, 135.0, -135.0, 180.0],
                    0.0,
                )
                .collect();
                dirs.extend(ring(
                    &[0.0, 45.0, -45.0, 90.0, -90.0, 135.0, -135.0, 180.0],
                    45.0,
                ));
                dirs.push([0.0, 90.0]);
                dirs.extend(ring(&[0.0, 45.0, -45.0], -30.0));
                dirs
            }
        }
    }

    pub fn num_loudspeakers(self) -> usize {
        self.dirs_deg().len()
    }
}

/// wrap an azimuth to [-180, 180)
pub fn wrap_azi(azi: f64) -> f64 {
    (azi + 180.0).rem_euclid(360.0) - 180.0
}
