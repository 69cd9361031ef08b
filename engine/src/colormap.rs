//! Pseudo-color lookup tables. Each table maps an 8-bit intensity to RGB
//! and is computed once on first use.

use schlieren_common::settings::Colormap;
use std::sync::OnceLock;

pub type Lut = [[u8; 3]; 256];

/// Table for `colormap`, or `None` for grayscale passthrough.
pub fn lut(colormap: Colormap) -> Option<&'static Lut> {
    static JET: OnceLock<Lut> = OnceLock::new();
    static HOT: OnceLock<Lut> = OnceLock::new();
    static BONE: OnceLock<Lut> = OnceLock::new();
    static VIRIDIS: OnceLock<Lut> = OnceLock::new();
    static INFERNO: OnceLock<Lut> = OnceLock::new();
    static TURBO: OnceLock<Lut> = OnceLock::new();

    let table = match colormap {
        Colormap::None => return None,
        Colormap::Jet => JET.get_or_init(|| build(jet)),
        Colormap::Hot => HOT.get_or_init(|| build(hot)),
        Colormap::Bone => BONE.get_or_init(|| build(bone)),
        Colormap::Viridis => VIRIDIS.get_or_init(|| build(|t| polynomial(t, &VIRIDIS_COEFFS))),
        Colormap::Inferno => INFERNO.get_or_init(|| build(|t| polynomial(t, &INFERNO_COEFFS))),
        Colormap::Turbo => TURBO.get_or_init(|| build(turbo)),
    };
    Some(table)
}

fn build(f: impl Fn(f64) -> [f64; 3]) -> Lut {
    let mut table = [[0u8; 3]; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let rgb = f(i as f64 / 255.0);
        *entry = rgb.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
    }
    table
}

fn jet(t: f64) -> [f64; 3] {
    let channel = |offset: f64| (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

fn hot(t: f64) -> [f64; 3] {
    [
        (3.0 * t).clamp(0.0, 1.0),
        (3.0 * t - 1.0).clamp(0.0, 1.0),
        (3.0 * t - 2.0).clamp(0.0, 1.0),
    ]
}

/// Gray with a blue cast in the shadows: `(7 * gray + hot reversed) / 8`.
fn bone(t: f64) -> [f64; 3] {
    let [hr, hg, hb] = hot(t);
    [
        (7.0 * t + hb) / 8.0,
        (7.0 * t + hg) / 8.0,
        (7.0 * t + hr) / 8.0,
    ]
}

fn turbo(t: f64) -> [f64; 3] {
    let r = 0.13572138
        + t * (4.6153926 + t * (-42.66032 + t * (132.13108 + t * (-152.54825 + t * 59.28144))));
    let g = 0.09140261
        + t * (2.19418 + t * (4.84296 + t * (-14.18503 + t * (4.27805 + t * 2.53377))));
    let b = 0.1066733
        + t * (12.64194 + t * (-60.58204 + t * (109.99648 + t * (-82.52904 + t * 20.43388))));
    [r, g, b]
}

// Degree-6 polynomial fits of the matplotlib perceptual maps, c0..c6 per channel.
const VIRIDIS_COEFFS: [[f64; 3]; 7] = [
    [0.2777273272234177, 0.005407344544966578, 0.3340998053353061],
    [0.1050930431085774, 1.404613529898575, 1.384590162594685],
    [-0.3308618287255563, 0.214847559468213, 0.09509516302823659],
    [-4.634230498983486, -5.799100973351585, -19.33244095627987],
    [6.228269936347081, 14.17993336680509, 56.69055260068105],
    [4.776384997670288, -13.74514537774601, -65.35303263337234],
    [-5.435455855934631, 4.645852612178535, 26.3124352495832],
];

const INFERNO_COEFFS: [[f64; 3]; 7] = [
    [0.0002189403691192265, 0.001651004631001012, -0.01948089843709184],
    [0.1065134194856116, 0.5639564367884091, 3.932712388889277],
    [11.60249308247187, -3.972853965665698, -15.9423941062914],
    [-41.70399613139459, 17.43639888205313, 44.35414519872813],
    [77.162935699427, -33.40235894210092, -81.80730925738993],
    [-71.31942824499214, 32.62606426397723, 73.20951985803202],
    [25.13112622477341, -12.24266895238567, -23.07032500287172],
];

fn polynomial(t: f64, coeffs: &[[f64; 3]; 7]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (c, value) in out.iter_mut().enumerate() {
        *value = coeffs.iter().rev().fold(0.0, |acc, k| acc * t + k[c]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_has_no_table() {
        assert!(lut(Colormap::None).is_none());
    }

    #[test]
    fn tables_are_cached() {
        let a = lut(Colormap::Jet).unwrap() as *const Lut;
        let b = lut(Colormap::Jet).unwrap() as *const Lut;
        assert_eq!(a, b);
    }

    #[test]
    fn jet_runs_blue_to_red() {
        let jet = lut(Colormap::Jet).unwrap();
        assert_eq!(jet[0], [0, 0, 128]);
        assert_eq!(jet[255], [128, 0, 0]);
        let mid = jet[128];
        assert!(mid[1] == 255, "green peaks mid-scale, got {mid:?}");
    }

    #[test]
    fn hot_and_bone_endpoints() {
        let hot = lut(Colormap::Hot).unwrap();
        assert_eq!(hot[0], [0, 0, 0]);
        assert_eq!(hot[255], [255, 255, 255]);
        assert_eq!(hot[85], [255, 0, 0]);

        let bone = lut(Colormap::Bone).unwrap();
        assert_eq!(bone[0], [0, 0, 0]);
        assert_eq!(bone[255], [255, 255, 255]);
        // blue leads red in the shadows
        assert!(bone[64][2] > bone[64][0]);
    }

    #[test]
    fn perceptual_maps_match_reference_endpoints() {
        let viridis = lut(Colormap::Viridis).unwrap();
        assert_eq!(viridis[0], [71, 1, 85]);
        let last = viridis[255];
        assert!(last[0] > 240 && last[1] > 220 && last[2] < 60, "{last:?}");

        let inferno = lut(Colormap::Inferno).unwrap();
        assert!(inferno[0].iter().all(|&c| c < 5));
        let last = inferno[255];
        assert!(last[0] > 240 && last[1] > 240, "{last:?}");
    }

    #[test]
    fn every_map_is_defined_for_all_intensities() {
        for map in Colormap::ALL {
            if let Some(table) = lut(map) {
                assert_eq!(table.len(), 256);
            }
        }
    }
}
