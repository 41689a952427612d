use crate::device::ColorDepth;
use std::sync::LazyLock;

/// A color as stored in a palette, in gamma-encoded sRGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const WHITE: Rgb = Rgb([255, 255, 255]);

    pub fn gray(level: u8) -> Self {
        Self([level, level, level])
    }
}

/// A color in CIE L*a*b* space (D65 illuminant).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f32,
    pub a: f32,
    pub b: f32,
}

impl Lab {
    pub fn distance_squared(self, other: Lab) -> f32 {
        let dl = self.l - other.l;
        let da = self.a - other.a;
        let db = self.b - other.b;
        dl * dl + da * da + db * db
    }
}

/// Euclidean ΔE*76 between two LAB colors.
pub fn lab_distance(a: Lab, b: Lab) -> f32 {
    a.distance_squared(b).sqrt()
}

/// Converts a gamma-encoded sRGB color to CIE L*a*b* by linearizing,
/// passing through CIE XYZ with the D65 white point, and applying the
/// LAB transfer function.
pub fn srgb_to_lab(rgb: Rgb) -> Lab {
    fn linearize(channel: u8) -> f32 {
        let c = channel as f32 / 255.0;
        if c <= 0.04045 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
    }

    fn lab_f(t: f32) -> f32 {
        const DELTA: f32 = 6.0 / 29.0;
        if t > DELTA.powi(3) { t.cbrt() } else { t / (3.0 * DELTA * DELTA) + 4.0 / 29.0 }
    }

    let r = linearize(rgb.0[0]);
    let g = linearize(rgb.0[1]);
    let b = linearize(rgb.0[2]);

    // sRGB -> XYZ (D65)
    let x = 0.4124 * r + 0.3576 * g + 0.1805 * b;
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let z = 0.0193 * r + 0.1192 * g + 0.9505 * b;

    // D65 reference white
    let fx = lab_f(x / 0.95047);
    let fy = lab_f(y / 1.0);
    let fz = lab_f(z / 1.08883);

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

const CUBE_BITS: u32 = 5;
const CUBE_SIDE: usize = 1 << CUBE_BITS;
const CUBE_LEN: usize = CUBE_SIDE.pow(3);

/// A fixed, ordered set of colors. Entry ordinals are wire-level meaningful:
/// they are the values packed into EBDImage pixel bytes.
///
/// Each palette carries its entries in LAB form and a 32³ sRGB bucket cube
/// mapping every bucket to the nearest entry, so that per-pixel lookups are
/// a single table read instead of a LAB conversion plus a linear scan.
pub struct Palette {
    entries: Vec<Rgb>,
    labs: Vec<Lab>,
    cube: Box<[u8]>,
}

impl Palette {
    fn new(entries: Vec<Rgb>) -> Self {
        assert!(!entries.is_empty() && entries.len() <= 256);
        let labs: Vec<Lab> = entries.iter().map(|&rgb| srgb_to_lab(rgb)).collect();

        let mut cube = vec![0; CUBE_LEN].into_boxed_slice();
        for (bucket, slot) in cube.iter_mut().enumerate() {
            let r = ((bucket >> (2 * CUBE_BITS)) as u8) << (8 - CUBE_BITS);
            let g = (((bucket >> CUBE_BITS) & (CUBE_SIDE - 1)) as u8) << (8 - CUBE_BITS);
            let b = ((bucket & (CUBE_SIDE - 1)) as u8) << (8 - CUBE_BITS);
            // Bucket centers sit half a bucket width in from the corner
            let half = 1 << (8 - CUBE_BITS - 1);
            let center = srgb_to_lab(Rgb([r + half, g + half, b + half]));
            *slot = nearest_entry(&labs, center);
        }

        Self { entries, labs, cube }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn color(&self, index: u8) -> Rgb {
        self.entries[index as usize]
    }

    pub fn lab(&self, index: u8) -> Lab {
        self.labs[index as usize]
    }

    /// Returns the palette index nearest to `rgb` under ΔE*76, via the
    /// precomputed bucket cube.
    pub fn index_of(&self, rgb: Rgb) -> u8 {
        let r = (rgb.0[0] >> (8 - CUBE_BITS)) as usize;
        let g = (rgb.0[1] >> (8 - CUBE_BITS)) as usize;
        let b = (rgb.0[2] >> (8 - CUBE_BITS)) as usize;
        self.cube[(r << (2 * CUBE_BITS)) | (g << CUBE_BITS) | b]
    }

    /// Exact nearest-entry search for an arbitrary LAB color. Slower than
    /// [`index_of`](Self::index_of) but accepts colors pushed off the sRGB
    /// grid by error diffusion.
    pub fn nearest_lab(&self, lab: Lab) -> u8 {
        nearest_entry(&self.labs, lab)
    }
}

/// Ties in distance break toward the lower palette index, keeping lookups
/// deterministic across runs.
fn nearest_entry(labs: &[Lab], target: Lab) -> u8 {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (index, &lab) in labs.iter().enumerate() {
        let distance = target.distance_squared(lab);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best as u8
}

/// Returns the process-wide palette matching a device's color depth.
pub fn palette_for(depth: ColorDepth) -> &'static Palette {
    match depth {
        ColorDepth::Mono => &BW_2,
        ColorDepth::Gray2 => &GRAY_4,
        ColorDepth::Gray4 => &GRAY_16,
        ColorDepth::Color8 => &COLOR_256,
    }
}

/// Forces construction of every palette and lookup cube. Called once at
/// startup so that the first request does not pay the build cost.
pub fn initialize() {
    for depth in [ColorDepth::Mono, ColorDepth::Gray2, ColorDepth::Gray4, ColorDepth::Color8] {
        let _ = palette_for(depth).len();
    }
}

/*
    The color palette follows the Palm OS 8-bit system palette layout:
    a 6x6x6 web-safe cube with channel levels descending from 0xFF to 0x00
    (index 0 is white, matching the Palm convention of white-first), then
    ten intermediate grays absent from the cube, then black padding out to
    256 entries.
*/
static COLOR_256: LazyLock<Palette> = LazyLock::new(|| {
    const LEVELS: [u8; 6] = [0xFF, 0xCC, 0x99, 0x66, 0x33, 0x00];
    const EXTRA_GRAYS: [u8; 10] = [0xEE, 0xDD, 0xBB, 0xAA, 0x88, 0x77, 0x55, 0x44, 0x22, 0x11];

    let mut entries = Vec::with_capacity(256);
    for r in LEVELS {
        for g in LEVELS {
            for b in LEVELS {
                entries.push(Rgb([r, g, b]));
            }
        }
    }
    entries.extend(EXTRA_GRAYS.into_iter().map(Rgb::gray));
    entries.resize(256, Rgb::gray(0x00));
    Palette::new(entries)
});

static GRAY_16: LazyLock<Palette> = LazyLock::new(|| Palette::new(gray_ramp(16)));
static GRAY_4: LazyLock<Palette> = LazyLock::new(|| Palette::new(gray_ramp(4)));
static BW_2: LazyLock<Palette> = LazyLock::new(|| Palette::new(gray_ramp(2)));

/// Evenly spaced grays from white (index 0) to black (index n-1).
fn gray_ramp(n: usize) -> Vec<Rgb> {
    (0..n)
        .map(|i| Rgb::gray(255 - (255 * i / (n - 1)) as u8))
        .collect()
}
