// Light-influence stamps.
//
// A `Stamp` is the square 2 m kernel a tree multiplies onto the light
// field: for one species and one (dbh, h/d) size class it captures the
// reduction the tree imposes on each cell of its neighborhood. Every
// writer stamp carries a companion *reader* stamp — a smaller, normalized
// crown-readout kernel used when the tree's own light resource index is
// read back from the field.
//
// Stamps are immutable after species setup and shared by reference between
// all trees of a size class. The container synthesizes them from the
// species' crown-radius allometry (the original model ships them as binary
// files; the shape contract is identical): influence falls off from the
// stem position to twice the crown radius, the reader covers the crown
// itself and sums to 1.

use crate::types::LIF_CELL_SIZE;

/// Permitted internal stamp edge lengths (pixels).
pub const STAMP_SIZES: [usize; 8] = [4, 8, 12, 16, 24, 32, 48, 64];

/// Width of a dbh size class (cm) and the smallest stamped dbh.
pub const DBH_CLASS_WIDTH: f64 = 4.0;
pub const DBH_CLASS_LOW: f64 = 4.0;
pub const DBH_CLASS_COUNT: usize = 38;

/// Width of an h/d-ratio class and the lowest class midpoint.
pub const HD_CLASS_WIDTH: f64 = 10.0;
pub const HD_CLASS_LOW: f64 = 35.0;
pub const HD_CLASS_COUNT: usize = 16;

/// A square float kernel with an integer center offset.
#[derive(Clone, Debug)]
pub struct Stamp {
    data: Vec<f32>,
    /// Edge length of the internal data block.
    data_size: usize,
    /// Index of the logical center: the tree sits at (offset, offset).
    offset: usize,
    crown_radius: f32,
    crown_area: f32,
    reader: Option<Box<Stamp>>,
}

impl Stamp {
    fn empty(data_size: usize, offset: usize) -> Self {
        Self {
            data: vec![0.0; data_size * data_size],
            data_size,
            offset,
            crown_radius: 0.0,
            crown_area: 0.0,
            reader: None,
        }
    }

    /// Delta between the stamp edge and the logical center point.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Logical edge length (`2 * offset + 1`), the iteration range when
    /// the stamp is applied.
    pub fn size(&self) -> usize {
        self.offset * 2 + 1
    }

    /// Internal edge length of the data block.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    #[inline]
    pub fn value(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.data_size + x]
    }

    /// Read with both indices shifted by `d_offset` — maps reader-stamp
    /// indices into this (writer) stamp's coordinates.
    #[inline]
    pub fn offset_value(&self, x: usize, y: usize, d_offset: usize) -> f32 {
        self.value(x + d_offset, y + d_offset)
    }

    /// Metric distance from cell (ix, iy) to the stamp center.
    #[inline]
    pub fn distance_to_center(&self, ix: usize, iy: usize) -> f32 {
        let dx = ix as f32 - self.offset as f32;
        let dy = iy as f32 - self.offset as f32;
        (dx * dx + dy * dy).sqrt() * LIF_CELL_SIZE as f32
    }

    pub fn reader(&self) -> Option<&Stamp> {
        self.reader.as_deref()
    }

    pub fn crown_radius(&self) -> f32 {
        self.crown_radius
    }

    pub fn crown_area(&self) -> f32 {
        self.crown_area
    }

    fn set_crown_radius(&mut self, radius: f32) {
        self.crown_radius = radius;
        self.crown_area = radius * radius * std::f32::consts::PI;
    }

    /// Sum over all cells.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }
}

/// Smallest permitted data size covering a logical edge length.
fn fitting_size(logical: usize) -> usize {
    for s in STAMP_SIZES {
        if s >= logical {
            return s;
        }
    }
    STAMP_SIZES[STAMP_SIZES.len() - 1]
}

/// Build a writer stamp (with its reader) for a crown radius in meters.
///
/// The influence kernel decays from the stem to `2 * crown_radius` with a
/// smooth shoulder; the reader covers the crown disc and is normalized to
/// a sum of 1 so the readout is a weighted mean over the crown.
pub fn synthesize_stamp(crown_radius: f64) -> Stamp {
    // cap so the largest permitted stamp can hold the influence field
    let crown_radius = crown_radius.clamp(0.5, 31.0);
    let influence_radius = (2.0 * crown_radius).min(62.0);

    let half_px = (influence_radius / LIF_CELL_SIZE).ceil() as usize;
    let data_size = fitting_size(2 * half_px + 1);
    let mut writer = Stamp::empty(data_size, half_px);
    for y in 0..writer.size() {
        for x in 0..writer.size() {
            let d = writer.distance_to_center(x, y) as f64;
            let rel = 1.0 - d / influence_radius;
            if rel > 0.0 {
                writer.data[y * data_size + x] = rel.powf(1.5) as f32;
            }
        }
    }
    writer.set_crown_radius(crown_radius as f32);

    // reader kernel: crown coverage, sum-normalized
    let r_half_px = (crown_radius / LIF_CELL_SIZE).ceil() as usize;
    let r_size = fitting_size(2 * r_half_px + 1);
    let mut reader = Stamp::empty(r_size, r_half_px);
    let mut sum = 0.0f32;
    for y in 0..reader.size() {
        for x in 0..reader.size() {
            let d = reader.distance_to_center(x, y) as f64;
            // coverage of the cell by the crown disc, with a soft edge of
            // one cell width
            let cover = ((crown_radius - d) / LIF_CELL_SIZE + 0.5).clamp(0.0, 1.0) as f32;
            reader.data[y * r_size + x] = cover;
            sum += cover;
        }
    }
    if sum > 0.0 {
        for v in &mut reader.data {
            *v /= sum;
        }
    }
    reader.set_crown_radius(crown_radius as f32);
    writer.reader = Some(Box::new(reader));
    writer
}

/// Per-species store of writer stamps, one per (dbh class, h/d class).
#[derive(Debug)]
pub struct StampContainer {
    stamps: Vec<Stamp>,
}

impl StampContainer {
    /// Build the full class table from a crown-radius allometry
    /// `radius(dbh_cm) -> m`.
    pub fn build(crown_radius_of_dbh: impl Fn(f64) -> f64) -> Self {
        let mut stamps = Vec::with_capacity(DBH_CLASS_COUNT * HD_CLASS_COUNT);
        for dbh_class in 0..DBH_CLASS_COUNT {
            let dbh = DBH_CLASS_LOW + (dbh_class as f64 + 0.5) * DBH_CLASS_WIDTH;
            let radius = crown_radius_of_dbh(dbh);
            for _hd_class in 0..HD_CLASS_COUNT {
                // the h/d class currently shares one kernel per dbh class;
                // the lookup keeps both axes so species can differentiate
                stamps.push(synthesize_stamp(radius));
            }
        }
        Self { stamps }
    }

    /// Index of the stamp for a tree of the given dimensions.
    pub fn index_for(&self, dbh: f64, height: f64) -> u32 {
        let dbh_class = (((dbh - DBH_CLASS_LOW) / DBH_CLASS_WIDTH).floor().max(0.0) as usize)
            .min(DBH_CLASS_COUNT - 1);
        let hd = if dbh > 0.0 { height * 100.0 / dbh } else { HD_CLASS_LOW };
        let hd_class = (((hd - HD_CLASS_LOW) / HD_CLASS_WIDTH).floor().max(0.0) as usize)
            .min(HD_CLASS_COUNT - 1);
        (dbh_class * HD_CLASS_COUNT + hd_class) as u32
    }

    #[inline]
    pub fn get(&self, index: u32) -> &Stamp {
        &self.stamps[index as usize]
    }

    pub fn stamp_for(&self, dbh: f64, height: f64) -> &Stamp {
        self.get(self.index_for(dbh, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_size_fits_data_block() {
        for r in [0.5, 1.0, 2.5, 5.0, 12.0, 31.0] {
            let s = synthesize_stamp(r);
            assert!(s.size() <= s.data_size(), "r={r}");
            assert!(STAMP_SIZES.contains(&s.data_size()));
        }
    }

    #[test]
    fn center_value_is_peak() {
        let s = synthesize_stamp(3.0);
        let c = s.offset();
        let center = s.value(c, c);
        assert!(center > 0.9);
        for y in 0..s.size() {
            for x in 0..s.size() {
                assert!(s.value(x, y) <= center + 1e-6);
            }
        }
    }

    #[test]
    fn reader_is_normalized() {
        let s = synthesize_stamp(4.0);
        let reader = s.reader().unwrap();
        assert!((reader.sum() - 1.0).abs() < 1e-5);
        assert!(reader.offset() <= s.offset());
    }

    #[test]
    fn distance_to_center_is_metric() {
        let s = synthesize_stamp(2.0);
        let c = s.offset();
        assert_eq!(s.distance_to_center(c, c), 0.0);
        assert!((s.distance_to_center(c + 1, c) - LIF_CELL_SIZE as f32).abs() < 1e-6);
    }

    #[test]
    fn container_lookup_clamps_classes() {
        let c = StampContainer::build(|dbh| 0.5 + dbh * 0.05);
        let small = c.index_for(1.0, 2.0);
        let big = c.index_for(500.0, 60.0);
        assert_eq!(small, c.index_for(4.0, 4.0 * 0.35));
        assert!(c.get(big).crown_radius() >= c.get(small).crown_radius());
        // bigger trees shade a larger neighborhood
        assert!(c.stamp_for(80.0, 30.0).size() > c.stamp_for(8.0, 7.0).size());
    }
}
