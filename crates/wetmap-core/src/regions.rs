//! Static county table: administrative code, bounding rectangle and boundary
//! simplification tolerance. Loaded once into a lookup map.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::geometry::BBox;

/// One entry of the administrative region table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct County {
    pub name: &'static str,
    /// Matches the integer region-code attribute of the boundary layer.
    pub code: u32,
    pub bbox: BBox,
    /// Douglas–Peucker tolerance (m) applied to the boundary before use;
    /// 0 keeps the full geometry.
    pub simplify_m: f64,
}

/// Pseudo-region covering the whole country.
pub const ALL: &str = "all";

pub const NATIONAL_BBOX: BBox = BBox::new(10.9231, 55.0000, 25.4839, 69.1492);

const COUNTIES: [County; 21] = [
    County { name: "Stockholm", code: 1, bbox: BBox::new(17.2147, 58.688, 19.7237, 60.3146), simplify_m: 0.0 },
    County { name: "Uppsala", code: 3, bbox: BBox::new(16.6567, 59.3516, 18.9345, 60.6744), simplify_m: 10.0 },
    County { name: "Sodermanland", code: 4, bbox: BBox::new(15.6086, 58.4985, 17.7656, 59.5456), simplify_m: 0.0 },
    County { name: "Ostergotland", code: 5, bbox: BBox::new(14.4027, 57.6836, 17.1262, 59.0209), simplify_m: 0.0 },
    County { name: "Jonkoping", code: 6, bbox: BBox::new(13.0213, 56.8663, 15.6767, 58.1868), simplify_m: 0.0 },
    County { name: "Kronoberg", code: 7, bbox: BBox::new(13.2799, 56.3477, 15.8429, 57.236), simplify_m: 0.0 },
    County { name: "Kalmar", code: 8, bbox: BBox::new(15.3347, 56.1832, 17.2832, 58.1471), simplify_m: 0.0 },
    County { name: "Gotland", code: 9, bbox: BBox::new(17.9273, 56.8751, 19.4033, 58.4298), simplify_m: 0.0 },
    County { name: "Blekinge", code: 10, bbox: BBox::new(14.3874, 55.949, 16.0736, 56.5031), simplify_m: 0.0 },
    County { name: "Skane", code: 12, bbox: BBox::new(12.432, 55.3225, 14.5941, 56.5356), simplify_m: 0.0 },
    County { name: "Halland", code: 13, bbox: BBox::new(11.8119, 56.2984, 13.7158, 57.6192), simplify_m: 0.0 },
    County { name: "VastraGotaland", code: 14, bbox: BBox::new(10.9231, 57.1011, 14.7879, 59.2924), simplify_m: 10.0 },
    County { name: "Varmland", code: 17, bbox: BBox::new(11.5418, 58.6971, 14.4879, 61.075), simplify_m: 10.0 },
    County { name: "Orebro", code: 18, bbox: BBox::new(14.2613, 58.6438, 15.8211, 60.1085), simplify_m: 0.0 },
    County { name: "Vastmanland", code: 19, bbox: BBox::new(15.414, 59.1856, 17.0048, 60.206), simplify_m: 0.0 },
    County { name: "Dalarna", code: 20, bbox: BBox::new(12.0866, 59.8278, 16.8206, 62.2818), simplify_m: 0.0 },
    County { name: "Gavleborg", code: 21, bbox: BBox::new(14.4338, 60.1765, 17.6936, 62.3436), simplify_m: 0.0 },
    County { name: "Vasternorrland", code: 22, bbox: BBox::new(14.7693, 62.0984, 19.3636, 64.0379), simplify_m: 20.0 },
    County { name: "Jamtland", code: 23, bbox: BBox::new(11.7697, 61.5351, 17.1597, 65.1049), simplify_m: 30.0 },
    County { name: "Vasterbotten", code: 24, bbox: BBox::new(14.2933, 63.3353, 22.0705, 66.3443), simplify_m: 20.0 },
    County { name: "Norrbotten", code: 25, bbox: BBox::new(15.3589, 64.9372, 25.4839, 69.1492), simplify_m: 30.0 },
];

fn table() -> &'static BTreeMap<String, County> {
    static TABLE: OnceLock<BTreeMap<String, County>> = OnceLock::new();
    TABLE.get_or_init(|| COUNTIES.iter().map(|c| (c.name.to_ascii_lowercase(), *c)).collect())
}

/// Case-insensitive county lookup.
pub fn lookup(name: &str) -> Option<County> {
    table().get(&name.trim().to_ascii_lowercase()).copied()
}

pub fn by_code(code: u32) -> Option<County> {
    table().values().find(|c| c.code == code).copied()
}

/// Whether `name` selects a known county or the national pseudo-region.
pub fn is_known(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(ALL) || lookup(name).is_some()
}

/// Bounding rectangle for a selector, including `all`.
pub fn bbox_for(name: &str) -> Option<BBox> {
    if name.trim().eq_ignore_ascii_case(ALL) {
        Some(NATIONAL_BBOX)
    } else {
        lookup(name).map(|c| c.bbox)
    }
}

pub fn names() -> impl Iterator<Item = &'static str> {
    COUNTIES.iter().map(|c| c.name)
}
